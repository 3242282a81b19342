//! Risk-control escalation: a per-subsystem pause after repeated abuse signals.
//!
//! Each polling subsystem (posts, live) owns one tracker. Qualifying failures
//! accumulate; at the threshold the tracker enters a timed blocked state with
//! exponentially escalating, capped duration. The block clears only when its
//! timer elapses — success resets the failure counter but never shortens an
//! active block.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use castwatch_core::RiskControlStatus;

use crate::error::{ApiError, CODE_ABUSE_DETECTED, CODE_REQUEST_BLOCKED};

/// Message substrings that mark a failure as an abuse signal even when the
/// code alone does not.
const ABUSE_MESSAGE_MARKERS: &[&str] = &["risk control", "blocked", "rate limit", "identity"];

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Consecutive qualifying failures required to enter the blocked state.
    pub failure_threshold: u32,
    pub base_block_secs: u64,
    pub max_block_secs: u64,
    /// Minimum gap between repeated blocked-state warnings in the logs.
    pub log_interval_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_block_secs: 300,
            max_block_secs: 3_600,
            log_interval_secs: 300,
        }
    }
}

/// Returns `true` if `err` counts toward risk-control escalation.
///
/// Qualifying: the dedicated abuse variant, the known abuse envelope codes,
/// or an upstream message carrying one of the abuse markers. Anything else
/// (plain network errors, not-found, deserialize) is tracked by the caller's
/// logging but does not escalate this tracker.
#[must_use]
pub fn is_risk_signal(err: &ApiError) -> bool {
    match err {
        ApiError::AbuseDetected { .. } => true,
        ApiError::Upstream { code, message, .. } => {
            *code == CODE_ABUSE_DETECTED
                || *code == CODE_REQUEST_BLOCKED
                || {
                    let lowered = message.to_lowercase();
                    ABUSE_MESSAGE_MARKERS.iter().any(|m| lowered.contains(m))
                }
        }
        _ => false,
    }
}

#[derive(Default)]
struct RiskState {
    is_blocked: bool,
    block_started_at: Option<Instant>,
    block_duration: Duration,
    consecutive_failures: u32,
    last_error_kind: Option<String>,
    last_log_at: Option<Instant>,
}

pub struct RiskTracker {
    /// Subsystem name, only used in log lines ("posts", "live").
    scope: String,
    config: RiskConfig,
    state: Mutex<RiskState>,
}

impl RiskTracker {
    #[must_use]
    pub fn new(scope: &str, config: RiskConfig) -> Self {
        Self {
            scope: scope.to_string(),
            config,
            state: Mutex::new(RiskState::default()),
        }
    }

    /// Records a failed upstream call. Only qualifying failures (see
    /// [`is_risk_signal`]) advance the escalation counter.
    pub fn record_failure(&self, err: &ApiError, context: &str) {
        let mut state = self.lock_state();
        state.last_error_kind = Some(err.kind_label().to_string());

        if !is_risk_signal(err) {
            tracing::debug!(
                scope = %self.scope,
                context,
                error = %err,
                "non-qualifying failure — escalation counter unchanged"
            );
            return;
        }

        state.consecutive_failures += 1;
        tracing::debug!(
            scope = %self.scope,
            context,
            consecutive_failures = state.consecutive_failures,
            error = %err,
            "abuse signal recorded"
        );

        if state.consecutive_failures >= self.config.failure_threshold {
            let exponent = (state.consecutive_failures - self.config.failure_threshold + 1).min(4);
            let computed = self
                .config
                .base_block_secs
                .saturating_mul(1u64 << exponent)
                .min(self.config.max_block_secs);
            // Monotonic within an episode: escalation never shortens a block.
            let duration = Duration::from_secs(computed).max(state.block_duration);
            state.block_duration = duration;
            state.block_started_at = Some(Instant::now());
            if !state.is_blocked {
                tracing::warn!(
                    scope = %self.scope,
                    context,
                    block_secs = duration.as_secs(),
                    "entering risk-control block"
                );
            }
            state.is_blocked = true;
        }
    }

    /// Records a successful upstream call. Resets the failure counter; an
    /// active block keeps running until its timer elapses.
    pub fn record_success(&self) {
        let mut state = self.lock_state();
        state.consecutive_failures = 0;
        state.last_error_kind = None;
        if !state.is_blocked {
            // Episode closed: next escalation starts from the base duration.
            state.block_duration = Duration::ZERO;
        }
    }

    /// Whether the subsystem is currently blocked. Expiry is evaluated
    /// lazily here; there is no background timer.
    pub fn is_blocked(&self) -> bool {
        let mut state = self.lock_state();
        Self::expire_if_elapsed(&mut state, &self.scope);
        state.is_blocked
    }

    /// Returns `true` at most once per configured interval while blocked, so
    /// a long block produces a heartbeat warning instead of log spam.
    pub fn should_log_warning(&self) -> bool {
        let mut state = self.lock_state();
        Self::expire_if_elapsed(&mut state, &self.scope);
        if !state.is_blocked {
            return false;
        }
        let due = state
            .last_log_at
            .is_none_or(|at| at.elapsed() >= Duration::from_secs(self.config.log_interval_secs));
        if due {
            state.last_log_at = Some(Instant::now());
        }
        due
    }

    #[must_use]
    pub fn status(&self) -> RiskControlStatus {
        let mut state = self.lock_state();
        Self::expire_if_elapsed(&mut state, &self.scope);
        let remaining_secs = if state.is_blocked {
            state
                .block_started_at
                .map_or(0, |at| state.block_duration.saturating_sub(at.elapsed()).as_secs())
        } else {
            0
        };
        RiskControlStatus {
            is_blocked: state.is_blocked,
            remaining_secs,
            consecutive_failures: state.consecutive_failures,
            block_duration_secs: state.block_duration.as_secs(),
            last_error_kind: state.last_error_kind.clone(),
        }
    }

    fn expire_if_elapsed(state: &mut RiskState, scope: &str) {
        if state.is_blocked {
            if let Some(started) = state.block_started_at {
                if started.elapsed() >= state.block_duration {
                    state.is_blocked = false;
                    state.block_started_at = None;
                    state.last_log_at = None;
                    tracing::info!(scope = %scope, "risk-control block elapsed");
                }
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RiskState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "risk_test.rs"]
mod tests;
