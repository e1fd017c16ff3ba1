//! Instruction sent to the upstream generator.
//!
//! The instruction names the exact JSON shape the validator accepts, so
//! a cooperative upstream answers with `{"questions": [...]}` and nothing
//! else. Anything it wraps around the object is stripped by
//! [`quizwell_core::extract_payload`].

use quizwell_core::{ContentRequest, OPTION_COUNT};

/// Output contract appended to every instruction.
pub const OUTPUT_FORMAT: &str = r#"
## Output Format (JSON only, no prose)
{
  "questions": [
    {
      "question": "the question text",
      "options": ["option A", "option B", "option C", "option D"],
      "correct_index": 0,
      "explanation": "one sentence on why the answer is correct"
    }
  ]
}

## Rules
- "options" has exactly 4 distinct strings
- "correct_index" is the zero-based position of the correct option (0-3)
- "question" is never empty
- Return only the JSON object
"#;

/// Render the instruction for one request.
pub fn build_instruction(request: &ContentRequest) -> String {
    format!(
        "Generate exactly {count} multiple-choice quiz questions about \"{topic}\".\n\
         Each question has {options} answer options and exactly one correct answer.\n\
         Vary difficulty and avoid repeating questions.\n{format}",
        count = request.count(),
        topic = request.topic(),
        options = OPTION_COUNT,
        format = OUTPUT_FORMAT,
    )
}
