//! Closed status enumerations and the snapshot types published by the
//! procedures for external polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::ControlCommandInfo;

/// Placeholder reported while an adapter is disconnected or declines to
/// report its state/status.
pub const NOT_AVAILABLE: &str = "not available";

/// Which subsystem a procedure talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    ExternalSystem,
    ProcessModel,
}

name_table!(Side {
    ExternalSystem => "external_system",
    ProcessModel => "process_model",
});

/// Connection state of a procedure's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connected,
    /// Connect-time I/O failure; left only through an explicit reconnect.
    Error,
}

name_table!(LinkState {
    Disconnected => "disconnected",
    Connected => "connected",
    Error => "error",
});

/// Coarse health of a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Unknown,
    Ok,
    Nok,
}

name_table!(StatusCode {
    Unknown => "unknown",
    Ok => "ok",
    Nok => "nok",
});

/// What a procedure was doing during its most recent cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    #[default]
    Connecting,
    Transferring,
    Idle,
    AwaitingRecovery,
    Stopped,
}

name_table!(Activity {
    Connecting => "connecting",
    Transferring => "transferring",
    Idle => "idle",
    AwaitingRecovery => "awaiting_recovery",
    Stopped => "stopped",
});

/// Cumulative counters of one procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferStatistics {
    /// Frames overwritten before delivery, plus ticks skipped by overruns.
    pub dropped_frames: u64,
    pub reads_ok: u64,
    pub read_failures: u64,
    pub writes_ok: u64,
    pub write_failures: u64,
    /// Simulator commands the adapter failed to execute.
    pub command_failures: u64,
    /// Failed attempts to collect commands emitted by the process model.
    pub command_read_failures: u64,
}

/// Point-in-time view of a procedure, cheap to clone and poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureSnapshot {
    pub side: Side,
    pub state: LinkState,
    pub status: StatusCode,
    pub status_message: Option<String>,
    pub activity: Activity,
    pub adapter_state: String,
    pub adapter_status: String,
    pub statistics: TransferStatistics,
    pub cycles: u64,
    pub refreshed_at: DateTime<Utc>,
}

impl ProcedureSnapshot {
    /// The snapshot published before the first refresh.
    pub fn initial(side: Side) -> Self {
        Self {
            side,
            state: LinkState::Disconnected,
            status: StatusCode::Unknown,
            status_message: None,
            activity: Activity::Connecting,
            adapter_state: NOT_AVAILABLE.to_string(),
            adapter_status: NOT_AVAILABLE.to_string(),
            statistics: TransferStatistics::default(),
            cycles: 0,
            refreshed_at: Utc::now(),
        }
    }
}

/// One pipeline stage as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    /// Zero-based position in the pipeline; the address for control commands.
    pub sequence: usize,
    pub id: String,
    pub kind: String,
    pub commands: Vec<ControlCommandInfo>,
}
