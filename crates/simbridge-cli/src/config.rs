//! Configuration file handling – reads/writes the bridge's TOML config.
//!
//! The file location is, in order of precedence: the path given on the
//! command line, `$SIMBRIDGE_CONFIG`, then `./simbridge.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use simbridge_runtime::{BridgeConfig, LogFormat, StageConfig};
use simbridge_types::{DataType, Direction, SignalDefinition, SignalKind};

/// Default file name looked up in the working directory.
pub const DEFAULT_FILE_NAME: &str = "simbridge.toml";

/// Resolve the config path from an explicit argument or the environment.
pub fn config_path(arg: Option<&Path>) -> PathBuf {
    resolve_path(arg, std::env::var("SIMBRIDGE_CONFIG").ok())
}

/// Pure part of [`config_path`], for tests that must not touch the
/// environment.
pub(crate) fn resolve_path(arg: Option<&Path>, env: Option<String>) -> PathBuf {
    arg.map(Path::to_path_buf)
        .or_else(|| env.filter(|v| !v.trim().is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_NAME))
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<BridgeConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: BridgeConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SIMBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SIMBRIDGE_LOG_FORMAT` | `executive.log_format` |
/// | `SIMBRIDGE_STATUS_REFRESH_MS` | `executive.status_refresh_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut BridgeConfig) {
    if let Ok(v) = std::env::var("SIMBRIDGE_LOG_FORMAT")
        && let Ok(format) = v.parse::<LogFormat>()
    {
        cfg.executive.log_format = format;
    }
    if let Ok(v) = std::env::var("SIMBRIDGE_STATUS_REFRESH_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.executive.status_refresh_ms = ms;
    }
}

/// Save `cfg` to `path`, creating parent directories as needed.
pub fn save_to(cfg: &BridgeConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

/// Configuration used when no file exists: a small demo plant with a level
/// sensor, a valve and a pump flowing through an offset and a clamp stage.
pub fn demo_config() -> BridgeConfig {
    let mut cfg = BridgeConfig::default();
    cfg.signals = vec![
        SignalDefinition::new("tank_level", DataType::Float64, Direction::ToExternalSystem)
            .with_endpoints("model", "plc"),
        SignalDefinition::new("pump_speed", DataType::Int32, Direction::ToExternalSystem)
            .with_endpoints("model", "plc"),
        SignalDefinition::new("valve_open", DataType::Int8, Direction::ToProcessModel)
            .with_kind(SignalKind::Digital)
            .with_length(2)
            .with_endpoints("plc", "model"),
        SignalDefinition::new("setpoint", DataType::Float32, Direction::ToProcessModel)
            .with_endpoints("plc", "model"),
    ];
    cfg.stages = vec![
        StageConfig {
            kind: "offset".into(),
            id: Some("level-bias".into()),
            params: [
                ("offset".to_string(), simbridge_runtime::ParamValue::Float(0.5)),
                (
                    "signals".to_string(),
                    simbridge_runtime::ParamValue::Text("tank_level".into()),
                ),
            ]
            .into(),
        },
        StageConfig {
            kind: "clamp".into(),
            id: Some("setpoint-limit".into()),
            params: [
                ("min".to_string(), simbridge_runtime::ParamValue::Integer(0)),
                ("max".to_string(), simbridge_runtime::ParamValue::Integer(80)),
                (
                    "direction".to_string(),
                    simbridge_runtime::ParamValue::Text("to_process_model".into()),
                ),
            ]
            .into(),
        },
    ];
    cfg
}
