//! Serializable status snapshots consumed by the CLI and status commands.

use serde::Serialize;

/// Snapshot of one risk-control tracker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskControlStatus {
    pub is_blocked: bool,
    /// Seconds until an active block elapses; 0 when not blocked.
    pub remaining_secs: u64,
    pub consecutive_failures: u32,
    pub block_duration_secs: u64,
    pub last_error_kind: Option<String>,
}

/// Snapshot of the whole watch service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub is_running: bool,
    pub subject_count: usize,
    pub room_count: usize,
    pub live_room_count: usize,
    pub push_connected_count: usize,
    pub posts_risk: RiskControlStatus,
    pub live_risk: RiskControlStatus,
}
