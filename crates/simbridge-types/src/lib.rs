//! `simbridge-types` – shared vocabulary of the bridge.
//!
//! Every other crate speaks in these types: the calendar [`SimTime`] used to
//! tag frames, the signal layout ([`SignalMetadata`], [`SignalLayout`]), the
//! byte-accurate [`SignalBuffer`], discrete [`Command`]s, the closed status
//! enumerations published by the procedures, and the error types
//! ([`BridgeError`], [`AdapterError`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Implements `as_str`, `from_name`, [`Display`](std::fmt::Display) and
/// [`FromStr`](std::str::FromStr) for a fieldless enum from an explicit
/// variant → name table.
macro_rules! name_table {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Every variant paired with its canonical name.
            pub const NAMES: &'static [($ty, &'static str)] = &[$(($ty::$variant, $name)),+];

            /// Canonical lower-case name of this variant.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }

            /// Look a variant up by name (ASCII case-insensitive).
            pub fn from_name(name: &str) -> Option<Self> {
                Self::NAMES
                    .iter()
                    .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
                    .map(|(v, _)| *v)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = $crate::BridgeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_name(s).ok_or_else(|| {
                    $crate::BridgeError::Config(format!(
                        "unknown {} name '{}'",
                        stringify!($ty),
                        s
                    ))
                })
            }
        }
    };
}

pub mod buffer;
pub mod command;
pub mod signal;
pub mod status;
pub mod time;

pub use buffer::{Frame, SignalBuffer};
pub use command::{Command, CommandReply, ControlCommandInfo};
pub use signal::{
    ByteOrder, DataType, Direction, SignalDefinition, SignalKind, SignalLayout, SignalMetadata,
};
pub use status::{
    Activity, LinkState, ProcedureSnapshot, Side, StageInfo, StatusCode, TransferStatistics,
    NOT_AVAILABLE,
};
pub use time::SimTime;

/// Failure reported by an adapter call.
///
/// The variant decides how a procedure reacts: [`AdapterError::Io`] is fatal
/// for the current connection and forces a disconnect, everything else is a
/// transient per-call failure that is counted and the cycle carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterError {
    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// `true` for failures that invalidate the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AdapterError::Io(_))
    }
}

/// Global error type spanning adapter failures, command invocation,
/// configuration and layout problems.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Command execution failed: {0}")]
    Execution(String),

    #[error("Command cancelled before execution")]
    Cancelled,

    #[error("Timed out after {0} ms waiting for a result")]
    Timeout(u64),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Signal Layout Error: {0}")]
    Layout(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Unknown pipeline stage #{0}")]
    UnknownStage(usize),

    #[error("Unknown control command '{0}'")]
    UnknownCommand(String),

    #[error("Executive is already running")]
    AlreadyStarted,

    #[error("Executive is not running")]
    NotRunning,
}

impl From<AdapterError> for BridgeError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Io(msg) => BridgeError::Io(msg),
            AdapterError::Rejected(msg) => BridgeError::Rejected(msg),
            AdapterError::Unsupported(msg) => BridgeError::Unsupported(msg),
        }
    }
}
