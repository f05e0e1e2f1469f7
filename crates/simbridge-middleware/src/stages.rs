//! Built-in element-wise stages: `offset`, `factor` and `clamp`.
//!
//! All three apply a scalar function to every element of the selected
//! signals and share their parameter handling through [`ElementwiseStage`].
//!
//! | Parameter | Stage | Meaning |
//! |---|---|---|
//! | `offset` | offset | added to every element (required) |
//! | `factor` | factor | every element multiplied by it (required) |
//! | `min`, `max` | clamp | bounds, at least one required |
//! | `direction` | all | `to_external_system`, `to_process_model` or `both` (default) |
//! | `signals` | all | comma-separated signal names; default every analog signal |
//!
//! Control commands: `get` reports the current parameters, `set` changes
//! them (`value=` addresses the stage's main parameter), `enable` and
//! `disable` toggle the stage without removing it.

use std::collections::BTreeMap;

use simbridge_types::{
    BridgeError, Command, CommandReply, ControlCommandInfo, Direction, SignalBuffer,
    SignalKind, SignalMetadata,
};
use tracing::info;

use crate::pipeline::TransferStage;

/// The scalar function behind an [`ElementwiseStage`].
pub trait ElementOp: Default + Send {
    /// Registry name.
    const KIND: &'static str;

    /// Parameter addressed by `set value=...`, if the operation has one.
    const MAIN_PARAMETER: Option<&'static str>;

    /// Names of the numeric parameters this operation reads.
    fn parameter_names(&self) -> &'static [&'static str];

    /// Current value of every parameter, in [`parameter_names`][Self::parameter_names] order.
    fn parameters(&self) -> Vec<(&'static str, f64)>;

    /// Apply the parameters found in `values` (already parsed).
    ///
    /// `initial` is `true` during setup, when required parameters must be
    /// present.
    fn configure(&mut self, values: &BTreeMap<&'static str, f64>, initial: bool) -> Result<(), BridgeError>;

    fn apply(&self, value: f64) -> f64;
}

// ────────────────────────────────────────────────────────────────────────────
// Operations
// ────────────────────────────────────────────────────────────────────────────

fn required(values: &BTreeMap<&'static str, f64>, key: &str, initial: bool) -> Result<Option<f64>, BridgeError> {
    match values.get(key) {
        Some(v) => Ok(Some(*v)),
        None if initial => Err(BridgeError::Config(format!("missing parameter '{key}'"))),
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct Offset {
    offset: f64,
}

impl ElementOp for Offset {
    const KIND: &'static str = "offset";
    const MAIN_PARAMETER: Option<&'static str> = Some("offset");

    fn parameter_names(&self) -> &'static [&'static str] {
        &["offset"]
    }

    fn parameters(&self) -> Vec<(&'static str, f64)> {
        vec![("offset", self.offset)]
    }

    fn configure(&mut self, values: &BTreeMap<&'static str, f64>, initial: bool) -> Result<(), BridgeError> {
        if let Some(v) = required(values, "offset", initial)? {
            self.offset = v;
        }
        Ok(())
    }

    fn apply(&self, value: f64) -> f64 {
        value + self.offset
    }
}

#[derive(Debug)]
pub struct Factor {
    factor: f64,
}

impl Default for Factor {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl ElementOp for Factor {
    const KIND: &'static str = "factor";
    const MAIN_PARAMETER: Option<&'static str> = Some("factor");

    fn parameter_names(&self) -> &'static [&'static str] {
        &["factor"]
    }

    fn parameters(&self) -> Vec<(&'static str, f64)> {
        vec![("factor", self.factor)]
    }

    fn configure(&mut self, values: &BTreeMap<&'static str, f64>, initial: bool) -> Result<(), BridgeError> {
        if let Some(v) = required(values, "factor", initial)? {
            self.factor = v;
        }
        Ok(())
    }

    fn apply(&self, value: f64) -> f64 {
        value * self.factor
    }
}

#[derive(Debug)]
pub struct Clamp {
    min: f64,
    max: f64,
}

impl Default for Clamp {
    fn default() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }
}

impl ElementOp for Clamp {
    const KIND: &'static str = "clamp";
    const MAIN_PARAMETER: Option<&'static str> = None;

    fn parameter_names(&self) -> &'static [&'static str] {
        &["min", "max"]
    }

    fn parameters(&self) -> Vec<(&'static str, f64)> {
        vec![("min", self.min), ("max", self.max)]
    }

    fn configure(&mut self, values: &BTreeMap<&'static str, f64>, initial: bool) -> Result<(), BridgeError> {
        if initial && values.is_empty() {
            return Err(BridgeError::Config("clamp needs 'min', 'max' or both".to_string()));
        }
        let min = values.get("min").copied().unwrap_or(self.min);
        let max = values.get("max").copied().unwrap_or(self.max);
        if min > max {
            return Err(BridgeError::Config(format!("clamp min {min} exceeds max {max}")));
        }
        self.min = min;
        self.max = max;
        Ok(())
    }

    fn apply(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ElementwiseStage
// ────────────────────────────────────────────────────────────────────────────

/// Applies an [`ElementOp`] to the selected signals of each frame.
pub struct ElementwiseStage<O: ElementOp> {
    id: String,
    op: O,
    enabled: bool,
    to_pm: Vec<SignalMetadata>,
    to_es: Vec<SignalMetadata>,
}

pub type OffsetStage = ElementwiseStage<Offset>;
pub type FactorStage = ElementwiseStage<Factor>;
pub type ClampStage = ElementwiseStage<Clamp>;

impl<O: ElementOp> Default for ElementwiseStage<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ElementOp> ElementwiseStage<O> {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            op: O::default(),
            enabled: true,
            to_pm: Vec::new(),
            to_es: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Names of the signals this stage rewrites in `direction`.
    pub fn selected(&self, direction: Direction) -> Vec<&str> {
        self.selection(direction).iter().map(SignalMetadata::name).collect()
    }

    fn selection(&self, direction: Direction) -> &[SignalMetadata] {
        match direction {
            Direction::ToProcessModel => &self.to_pm,
            Direction::ToExternalSystem => &self.to_es,
        }
    }

    fn parse_values(
        &self,
        params: &BTreeMap<String, String>,
        allow_value_alias: bool,
    ) -> Result<BTreeMap<&'static str, f64>, BridgeError> {
        let names = self.op.parameter_names();
        let mut values = BTreeMap::new();
        for (key, raw) in params {
            let name = match names.iter().find(|n| **n == key.as_str()) {
                Some(name) => *name,
                None if allow_value_alias && key == "value" => O::MAIN_PARAMETER.ok_or_else(|| {
                    BridgeError::Rejected(format!("{} has no main parameter; name it explicitly", O::KIND))
                })?,
                None if matches!(key.as_str(), "direction" | "signals") => continue,
                None => {
                    return Err(BridgeError::Config(format!(
                        "unknown parameter '{key}' for {} stage",
                        O::KIND
                    )));
                }
            };
            let value: f64 = raw.trim().parse().map_err(|_| {
                BridgeError::Config(format!("parameter '{key}' is not a number: '{raw}'"))
            })?;
            if value.is_nan() {
                return Err(BridgeError::Config(format!("parameter '{key}' is NaN")));
            }
            values.insert(name, value);
        }
        Ok(values)
    }

    fn reply(&self) -> CommandReply {
        let mut reply: CommandReply = self
            .op
            .parameters()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        reply.insert("enabled".to_string(), self.enabled.to_string());
        reply
    }
}

fn select(
    pool: &[SignalMetadata],
    names: Option<&[String]>,
) -> Vec<SignalMetadata> {
    match names {
        Some(names) => pool
            .iter()
            .filter(|s| names.iter().any(|n| n == s.name()))
            .cloned()
            .collect(),
        None => pool
            .iter()
            .filter(|s| s.kind() == SignalKind::Analog)
            .cloned()
            .collect(),
    }
}

impl<O: ElementOp> TransferStage for ElementwiseStage<O> {
    fn kind(&self) -> &str {
        O::KIND
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn setup(
        &mut self,
        id: &str,
        signals_to_pm: &[SignalMetadata],
        signals_to_es: &[SignalMetadata],
        params: &BTreeMap<String, String>,
    ) -> Result<(), BridgeError> {
        let (to_pm, to_es) = match params.get("direction").map(|d| d.trim()) {
            None | Some("both") => (true, true),
            Some(other) => match other.parse::<Direction>()? {
                Direction::ToProcessModel => (true, false),
                Direction::ToExternalSystem => (false, true),
            },
        };

        let names: Option<Vec<String>> = params.get("signals").map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        });
        if let Some(names) = &names {
            let pool = || {
                signals_to_pm
                    .iter()
                    .filter(move |_| to_pm)
                    .chain(signals_to_es.iter().filter(move |_| to_es))
            };
            if let Some(unknown) = names.iter().find(|n| !pool().any(|s| s.name() == n.as_str())) {
                return Err(BridgeError::Config(format!(
                    "stage '{id}': unknown signal '{unknown}'"
                )));
            }
        }

        let values = self.parse_values(params, false)?;
        self.op.configure(&values, true)?;

        self.id = id.to_string();
        self.to_pm = if to_pm { select(signals_to_pm, names.as_deref()) } else { Vec::new() };
        self.to_es = if to_es { select(signals_to_es, names.as_deref()) } else { Vec::new() };
        Ok(())
    }

    fn process(&mut self, buffer: &mut SignalBuffer, direction: Direction) -> Result<(), BridgeError> {
        if !self.enabled {
            return Ok(());
        }
        for signal in self.selection(direction) {
            for i in 0..signal.length() {
                let value = buffer.read_value(signal, i)?;
                buffer.write_value(signal, i, self.op.apply(value))?;
            }
        }
        Ok(())
    }

    fn available_control_commands(&self) -> Vec<ControlCommandInfo> {
        let mut set = ControlCommandInfo::new("set", "Change stage parameters");
        if O::MAIN_PARAMETER.is_some() {
            set = set.with_parameter("value");
        }
        for name in self.op.parameter_names() {
            set = set.with_parameter(*name);
        }
        vec![
            ControlCommandInfo::new("get", "Report the current parameters"),
            set,
            ControlCommandInfo::new("enable", "Resume transforming frames"),
            ControlCommandInfo::new("disable", "Pass frames through untouched"),
        ]
    }

    fn invoke_control_command(&mut self, command: &Command) -> Result<CommandReply, BridgeError> {
        match command.id() {
            "get" => Ok(self.reply()),
            "set" => {
                let values = self.parse_values(command.params(), true)?;
                if values.is_empty() {
                    return Err(BridgeError::Rejected("set needs at least one parameter".to_string()));
                }
                self.op.configure(&values, false)?;
                info!(stage = %self.id, kind = O::KIND, ?values, "stage parameters changed");
                Ok(self.reply())
            }
            "enable" | "disable" => {
                self.enabled = command.id() == "enable";
                info!(stage = %self.id, enabled = self.enabled, "stage toggled");
                Ok(self.reply())
            }
            other => Err(BridgeError::UnknownCommand(other.to_string())),
        }
    }
}
