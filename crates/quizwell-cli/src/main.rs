//! `quizwell` command-line interface.
//!
//! Generates quiz content through the resilient service and inspects
//! the fallback bank. JSON goes to stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quizwell_core::{FallbackBank, DEFAULT_COUNT};
use quizwell_runtime::{HttpProvider, ResilientContentService, RuntimeConfig};

/// Resilient quiz content generation.
#[derive(Parser)]
#[command(name = "quizwell")]
#[command(about = "Generate quiz content with retries, a circuit breaker and a static fallback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate questions for a topic.
    Generate {
        /// Topic to generate questions about.
        topic: String,

        /// Number of questions.
        #[arg(short = 'n', long, default_value_t = DEFAULT_COUNT)]
        count: usize,

        /// Runtime configuration file (YAML).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Alternate fallback bank (YAML).
        #[arg(short, long)]
        bank: Option<PathBuf>,

        /// Upstream settings (JSON with `api_key` and `api_url`).
        #[arg(long)]
        provider_config: Option<PathBuf>,

        /// Pretty-print the JSON result.
        #[arg(long)]
        pretty: bool,
    },

    /// List fallback bank topics with item counts.
    Topics {
        /// Alternate fallback bank (YAML).
        #[arg(short, long)]
        bank: Option<PathBuf>,
    },

    /// Show which bank topic a requested topic resolves to.
    Resolve {
        /// Requested topic.
        topic: String,

        /// Alternate fallback bank (YAML).
        #[arg(short, long)]
        bank: Option<PathBuf>,
    },

    /// Validate a fallback bank file.
    CheckBank {
        /// Bank file to validate.
        file: PathBuf,
    },

    /// Print service stats and the effective configuration.
    Stats {
        /// Runtime configuration file (YAML).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Upstream settings (JSON with `api_key` and `api_url`).
        #[arg(long)]
        provider_config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct TopicSummary<'a> {
    key: &'a str,
    items: usize,
    default: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quizwell=info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            topic,
            count,
            config,
            bank,
            provider_config,
            pretty,
        } => {
            let service = build_service(
                config.as_deref(),
                bank.as_deref(),
                provider_config.as_deref(),
            )?;
            let result = service.generate(&topic, count).await;
            print_json(&result, pretty)?;

            let stats = service.stats();
            tracing::info!(
                source = %result.source,
                items = result.count,
                total = stats.usage.total_requests,
                fallback = stats.usage.fallback_used_count,
                state = %stats.circuit_breaker.state,
                "Generation finished"
            );
        }

        Commands::Topics { bank } => {
            let bank = load_bank(bank.as_deref())?;
            let summary: Vec<TopicSummary<'_>> = bank
                .topics()
                .map(|key| TopicSummary {
                    key,
                    items: bank.len_of(key),
                    default: key == bank.default_topic(),
                })
                .collect();
            print_json(&summary, true)?;
        }

        Commands::Resolve { topic, bank } => {
            let bank = load_bank(bank.as_deref())?;
            println!("{}", bank.resolve(&topic));
        }

        Commands::CheckBank { file } => {
            let bank = FallbackBank::from_yaml_file(&file)
                .with_context(|| format!("Invalid fallback bank: {}", file.display()))?;
            let topics = bank.topics().count();
            let items: usize = bank.topics().map(|key| bank.len_of(key)).sum();
            println!(
                "OK: version {} with {} topics and {} items (default '{}')",
                bank.version(),
                topics,
                items,
                bank.default_topic()
            );
        }

        Commands::Stats {
            config,
            provider_config,
        } => {
            let service = build_service(config.as_deref(), None, provider_config.as_deref())?;
            let view = serde_json::json!({
                "stats": service.stats(),
                "config": service.config(),
                "upstreamConfigured": service.health_check().await,
            });
            print_json(&view, true)?;
        }
    }

    Ok(())
}

fn build_service(
    config: Option<&Path>,
    bank: Option<&Path>,
    provider_config: Option<&Path>,
) -> Result<ResilientContentService> {
    let runtime_config = RuntimeConfig::load(config).with_context(|| match config {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load config from environment".to_string(),
    })?;

    let provider = match provider_config {
        Some(path) => HttpProvider::from_config(&load_provider_config(path)?),
        None => HttpProvider::from_env(),
    };

    let mut builder = ResilientContentService::builder()
        .provider(Arc::new(provider))
        .config(runtime_config);

    if let Some(path) = bank {
        builder = builder.bank(
            FallbackBank::from_yaml_file(path)
                .with_context(|| format!("Failed to load fallback bank from {}", path.display()))?,
        );
    }

    builder.build().context("Failed to build content service")
}

fn load_provider_config(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read provider config {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid provider config JSON in {}", path.display()))
}

fn load_bank(path: Option<&Path>) -> Result<FallbackBank> {
    match path {
        Some(path) => FallbackBank::from_yaml_file(path)
            .with_context(|| format!("Failed to load fallback bank from {}", path.display())),
        None => Ok(FallbackBank::builtin()
            .context("Built-in fallback bank is invalid")?
            .clone()),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}
