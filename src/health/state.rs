// src/health/state.rs
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Per-backend probe-driven health state machine (spec §4.5).
#[derive(Debug, Clone)]
pub struct HealthState {
    pub status: HealthStatus,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_probe: Option<DateTime<Utc>>,
    pub ewma_latency_ms: Option<f64>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_probe: None,
            ewma_latency_ms: None,
        }
    }
}

impl HealthState {
    /// Record a successful probe. Returns `true` if this probe caused a
    /// transition to `Healthy` (the caller uses this to invalidate nothing
    /// — only the unhealthy transition needs a side effect — but the
    /// return value is kept symmetric for observability/logging).
    pub fn record_success(
        &mut self,
        measured_ms: f64,
        alpha: f64,
        healthy_threshold: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.last_probe = Some(now);
        self.ewma_latency_ms = Some(match self.ewma_latency_ms {
            Some(prev) => alpha * measured_ms + (1.0 - alpha) * prev,
            None => measured_ms,
        });

        let was_not_healthy = matches!(self.status, HealthStatus::Unknown | HealthStatus::Unhealthy);
        if was_not_healthy && self.consecutive_successes >= healthy_threshold {
            self.status = HealthStatus::Healthy;
            return true;
        }
        false
    }

    /// Record a failed probe. Returns `true` if this probe caused a
    /// transition to `Unhealthy` — the caller must then invalidate sticky
    /// bindings for this backend (spec §4.5, §8 invariant 5).
    pub fn record_failure(&mut self, unhealthy_threshold: u32, now: DateTime<Utc>) -> bool {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        self.last_probe = Some(now);

        let was_not_unhealthy = matches!(self.status, HealthStatus::Unknown | HealthStatus::Healthy);
        if was_not_unhealthy && self.consecutive_failures >= unhealthy_threshold {
            self.status = HealthStatus::Unhealthy;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_to_healthy_after_threshold() {
        let mut state = HealthState::default();
        let now = Utc::now();
        assert!(!state.record_success(10.0, 0.3, 2, now));
        assert_eq!(state.status, HealthStatus::Unknown);
        assert!(state.record_success(10.0, 0.3, 2, now));
        assert_eq!(state.status, HealthStatus::Healthy);
    }

    #[test]
    fn transitions_to_unhealthy_after_threshold_and_resets_counters() {
        let mut state = HealthState::default();
        let now = Utc::now();
        state.record_success(10.0, 0.3, 1, now);
        assert_eq!(state.status, HealthStatus::Healthy);

        assert!(!state.record_failure(3, now));
        assert!(!state.record_failure(3, now));
        assert!(state.record_failure(3, now));
        assert_eq!(state.status, HealthStatus::Unhealthy);
        assert_eq!(state.consecutive_successes, 0);

        // recovering resets the failure streak
        state.record_success(5.0, 0.3, 1, now);
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn ewma_initializes_from_first_success_then_smooths() {
        let mut state = HealthState::default();
        let now = Utc::now();
        state.record_success(100.0, 0.3, 99, now);
        assert_eq!(state.ewma_latency_ms, Some(100.0));
        state.record_success(0.0, 0.3, 99, now);
        assert!((state.ewma_latency_ms.unwrap() - 70.0).abs() < 1e-9);
    }
}
