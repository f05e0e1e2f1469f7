//! [`BridgeConfig`] – runtime settings of the executive and both procedures.
//!
//! Deserialised from TOML by the CLI; every field has a default so a file
//! only needs the sections it changes.  [`BridgeConfig::validate`] is the
//! single place configuration errors are raised.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use simbridge_middleware::StageSpec;
use simbridge_types::{BridgeError, ByteOrder, SignalDefinition, SignalLayout};

/// Log output style selected by [`ExecutiveConfig::log_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(BridgeError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveConfig {
    /// How long `stop()` waits for each procedure thread.
    pub stop_grace_ms: u64,
    /// Interval between snapshot refreshes.
    pub status_refresh_ms: u64,
    /// How long a caller waits for a control command to execute.
    pub command_timeout_ms: u64,
    pub log_format: LogFormat,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: 2000,
            status_refresh_ms: 1000,
            command_timeout_ms: 5000,
            log_format: LogFormat::Compact,
        }
    }
}

impl ExecutiveConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSystemConfig {
    pub byte_order: ByteOrder,
    pub read_poll_interval_ms: u64,
    pub connect_retry_delay_ms: u64,
    /// Operating frequency of the simulated adapter.
    pub frequency_hz: u32,
}

impl Default for ExternalSystemConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Big,
            read_poll_interval_ms: 20,
            connect_retry_delay_ms: 250,
            frequency_hz: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessModelConfig {
    pub byte_order: ByteOrder,
    /// Transfer towards the external system at least this often while the
    /// sim clock stands still.  `0` disables idle transfers.
    pub idle_transfer_interval_ms: u64,
    pub connect_retry_delay_ms: u64,
    /// Operating frequency of the simulated adapter.
    pub frequency_hz: u32,
    /// Frame rate the sim clock is subdivided into; defaults to the external
    /// system adapter's operating frequency.
    pub es_frequency_hz: Option<u32>,
}

impl Default for ProcessModelConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Little,
            idle_transfer_interval_ms: 100,
            connect_retry_delay_ms: 250,
            frequency_hz: 100,
            es_frequency_hz: None,
        }
    }
}

/// A stage parameter as written in TOML; numbers and booleans are accepted
/// as well as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Integer(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// One `[[stages]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl From<&StageConfig> for StageSpec {
    fn from(stage: &StageConfig) -> Self {
        StageSpec {
            kind: stage.kind.clone(),
            id: stage.id.clone(),
            params: stage
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub executive: ExecutiveConfig,
    pub external_system: ExternalSystemConfig,
    pub process_model: ProcessModelConfig,
    pub signals: Vec<SignalDefinition>,
    pub stages: Vec<StageConfig>,
}

impl BridgeConfig {
    /// Check every numeric constraint.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let checks: [(bool, &str); 6] = [
            (self.executive.stop_grace_ms > 0, "executive.stop_grace_ms must be > 0"),
            (self.executive.status_refresh_ms > 0, "executive.status_refresh_ms must be > 0"),
            (
                self.external_system.read_poll_interval_ms > 0,
                "external_system.read_poll_interval_ms must be > 0",
            ),
            (self.external_system.frequency_hz > 0, "external_system.frequency_hz must be > 0"),
            (self.process_model.frequency_hz > 0, "process_model.frequency_hz must be > 0"),
            (
                self.process_model.es_frequency_hz != Some(0),
                "process_model.es_frequency_hz must be > 0",
            ),
        ];
        if let Some((_, message)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(BridgeError::Config((*message).to_string()));
        }

        let subdivided = self.subdivider_frequency(self.external_system.frequency_hz);
        if subdivided > self.process_model.frequency_hz {
            return Err(BridgeError::Config(format!(
                "subdivider frequency {subdivided} Hz exceeds process model frequency {} Hz",
                self.process_model.frequency_hz
            )));
        }
        Ok(())
    }

    /// Target frequency of the subdivider given the ES adapter frequency.
    pub fn subdivider_frequency(&self, es_adapter_hz: u32) -> u32 {
        self.process_model.es_frequency_hz.unwrap_or(es_adapter_hz)
    }

    /// Build the signal layout from `[[signals]]`.
    pub fn layout(&self) -> Result<SignalLayout, BridgeError> {
        SignalLayout::build(self.signals.clone())
    }

    /// `[[stages]]` in registry form.
    pub fn stage_specs(&self) -> Vec<StageSpec> {
        self.stages.iter().map(StageSpec::from).collect()
    }
}
