//! Usage counters for the content service.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::resilience::CircuitSnapshot;

/// Request counters.
///
/// `total_requests` counts every `generate` call. Every call ends in
/// exactly one of: an upstream success, an upstream failure (which also
/// uses the fallback), or an open-circuit short cut (fallback only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// Every call to generate
    pub total_requests: u64,

    /// Calls answered by the upstream
    pub successful_requests: u64,

    /// Calls whose upstream attempt failed
    pub failed_requests: u64,

    /// Calls answered from the fallback bank
    pub fallback_used_count: u64,

    /// When an upstream attempt was last made
    pub last_call_at: Option<DateTime<Utc>>,
}

impl UsageStats {
    /// Fraction of upstream attempts that succeeded, if any were made.
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.successful_requests + self.failed_requests;
        if attempted == 0 {
            None
        } else {
            Some(self.successful_requests as f64 / attempted as f64)
        }
    }
}

/// Stats and breaker view returned by the administrative endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub usage: UsageStats,
    pub circuit_breaker: CircuitSnapshot,
}

/// Shared, lock-guarded [`UsageStats`].
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<UsageStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.inner.lock().total_requests += 1;
    }

    /// An upstream attempt is about to be made.
    pub fn record_attempt(&self) {
        self.inner.lock().last_call_at = Some(Utc::now());
    }

    pub fn record_success(&self) {
        self.inner.lock().successful_requests += 1;
    }

    /// Upstream failed and the fallback answered.
    pub fn record_failure(&self) {
        let mut stats = self.inner.lock();
        stats.failed_requests += 1;
        stats.fallback_used_count += 1;
    }

    /// The circuit was open and the fallback answered.
    pub fn record_short_circuit(&self) {
        self.inner.lock().fallback_used_count += 1;
    }

    pub fn snapshot(&self) -> UsageStats {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let recorder = StatsRecorder::new();
        recorder.record_request();
        recorder.record_attempt();
        recorder.record_success();
        recorder.record_request();
        recorder.record_attempt();
        recorder.record_failure();
        recorder.record_request();
        recorder.record_short_circuit();

        let stats = recorder.snapshot();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.fallback_used_count, 2);
        assert!(stats.last_call_at.is_some());
        assert_eq!(stats.success_rate(), Some(0.5));
    }

    #[test]
    fn test_short_circuit_does_not_touch_last_call() {
        let recorder = StatsRecorder::new();
        recorder.record_request();
        recorder.record_short_circuit();

        let stats = recorder.snapshot();
        assert!(stats.last_call_at.is_none());
        assert_eq!(stats.success_rate(), None);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(UsageStats::default()).unwrap();
        assert_eq!(json["totalRequests"], 0);
        assert_eq!(json["successfulRequests"], 0);
        assert_eq!(json["failedRequests"], 0);
        assert_eq!(json["fallbackUsedCount"], 0);
        assert!(json["lastCallAt"].is_null());
    }
}
