//! In-process simulated adapters for headless runs and CI.
//!
//! [`SimProcessModel`] and [`SimExternalSystem`] implement the adapter traits
//! without any real subsystem behind them.  They produce plausible signal
//! values, record what they receive and answer a few control commands, so
//! the complete bridge can run end to end on a laptop.
//!
//! # Example
//!
//! ```rust
//! use simbridge_hal::adapter::{Adapter, ExternalSystemAdapter};
//! use simbridge_hal::sim::SimExternalSystem;
//! use simbridge_types::{
//!     ByteOrder, DataType, Direction, SignalBuffer, SignalDefinition, SignalLayout,
//! };
//!
//! let layout = SignalLayout::build(vec![
//!     SignalDefinition::new("level", DataType::Float32, Direction::ToProcessModel),
//! ])
//! .unwrap();
//! let signals = layout.signals(Direction::ToProcessModel).to_vec();
//!
//! let mut es = SimExternalSystem::new("plc", 50, signals.clone());
//! assert!(es.connect().unwrap());
//!
//! let mut buf = SignalBuffer::allocate(&signals, ByteOrder::Big);
//! es.read_signal_data(&mut buf).unwrap();
//! es.read_signal_data(&mut buf).unwrap();
//! assert_eq!(buf.read_value(&signals[0], 0).unwrap(), 1.0);
//! ```

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::Instant;

use simbridge_types::{
    AdapterError, Command, CommandReply, ControlCommandInfo, SignalBuffer, SignalKind,
    SignalMetadata, SimTime,
};
use tracing::{debug, info};

use crate::adapter::{Adapter, ExternalSystemAdapter, ProcessModelAdapter};

/// How many executed commands a [`SimExternalSystem`] remembers.
const COMMAND_HISTORY: usize = 64;

fn not_connected(name: &str) -> AdapterError {
    AdapterError::Io(format!("{name}: not connected"))
}

fn reply(pairs: &[(&str, String)]) -> CommandReply {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn common_commands() -> Vec<ControlCommandInfo> {
    vec![
        ControlCommandInfo::new("ping", "Round-trip check, answers 'pong'"),
        ControlCommandInfo::new("reset", "Zero all counters"),
        ControlCommandInfo::new("describe", "Report adapter name, frequency and counters"),
    ]
}

/// Write `value` into every element of every signal; digital signals get
/// `0`/`1` from the parity of the integer part.
fn fill(buffer: &mut SignalBuffer, signals: &[SignalMetadata], value: f64) -> Result<(), AdapterError> {
    for signal in signals {
        let v = match signal.kind() {
            SignalKind::Analog => value,
            SignalKind::Digital => (value.trunc().abs() as u64 % 2) as f64,
        };
        for i in 0..signal.length() {
            buffer
                .write_value(signal, i, v)
                .map_err(|e| AdapterError::Rejected(e.to_string()))?;
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated external system
// ────────────────────────────────────────────────────────────────────────────

/// A simulated control interface.
///
/// Every read fills all to-process-model signals with a ramp counter; every
/// write is recorded.  In synchronous mode the ramp only advances through
/// [`time_step_control`][ExternalSystemAdapter::time_step_control].
pub struct SimExternalSystem {
    name: String,
    frequency: u32,
    signals: Vec<SignalMetadata>,
    synchronous: bool,
    connected: bool,
    ramp: u64,
    steps: u64,
    reads: u64,
    writes: u64,
    last_written: Option<SignalBuffer>,
    executed: VecDeque<Command>,
}

impl SimExternalSystem {
    /// `signals` are the to-process-model signals this adapter produces.
    pub fn new(name: impl Into<String>, frequency: u32, signals: Vec<SignalMetadata>) -> Self {
        Self {
            name: name.into(),
            frequency,
            signals,
            synchronous: false,
            connected: false,
            ramp: 0,
            steps: 0,
            reads: 0,
            writes: 0,
            last_written: None,
            executed: VecDeque::new(),
        }
    }

    /// Require explicit time stepping.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// The most recent to-external-system buffer received.
    pub fn last_written(&self) -> Option<&SignalBuffer> {
        self.last_written.as_ref()
    }

    /// Commands executed so far (most recent last, bounded history).
    pub fn executed_commands(&self) -> impl Iterator<Item = &Command> {
        self.executed.iter()
    }

    /// Number of time steps taken in synchronous mode.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Adapter for SimExternalSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<bool, AdapterError> {
        if !self.connected {
            info!(adapter = %self.name, "simulated external system connected");
        }
        self.connected = true;
        Ok(true)
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn operating_frequency(&self) -> u32 {
        self.frequency
    }

    fn state(&self) -> Option<String> {
        Some(if self.connected { "online" } else { "offline" }.to_string())
    }

    fn status(&self) -> Option<String> {
        Some(format!("{} reads, {} writes", self.reads, self.writes))
    }

    fn available_control_commands(&self) -> Vec<ControlCommandInfo> {
        common_commands()
    }

    fn invoke_control_command(&mut self, command: &Command) -> Result<CommandReply, AdapterError> {
        match command.id() {
            "ping" => Ok(reply(&[("reply", "pong".to_string())])),
            "reset" => {
                self.ramp = 0;
                self.steps = 0;
                self.reads = 0;
                self.writes = 0;
                self.executed.clear();
                Ok(CommandReply::new())
            }
            "describe" => Ok(reply(&[
                ("name", self.name.clone()),
                ("frequency_hz", self.frequency.to_string()),
                ("synchronous", self.synchronous.to_string()),
                ("reads", self.reads.to_string()),
                ("writes", self.writes.to_string()),
                ("steps", self.steps.to_string()),
            ])),
            other => Err(AdapterError::Unsupported(format!("control command '{other}'"))),
        }
    }
}

impl ExternalSystemAdapter for SimExternalSystem {
    fn read_signal_data(&mut self, buffer: &mut SignalBuffer) -> Result<(), AdapterError> {
        if !self.connected {
            return Err(not_connected(&self.name));
        }
        let value = if self.synchronous { self.steps } else { self.ramp };
        fill(buffer, &self.signals, value as f64)?;
        self.ramp += 1;
        self.reads += 1;
        Ok(())
    }

    fn write_signal_data(&mut self, buffer: &SignalBuffer) -> Result<(), AdapterError> {
        if !self.connected {
            return Err(not_connected(&self.name));
        }
        self.last_written = Some(buffer.clone());
        self.writes += 1;
        Ok(())
    }

    fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    fn time_step_control(&mut self) -> Result<(), AdapterError> {
        if !self.connected {
            return Err(not_connected(&self.name));
        }
        self.steps += 1;
        Ok(())
    }

    fn accepts_sim_commands(&self) -> bool {
        true
    }

    fn execute_sim_command(&mut self, command: &Command) -> Result<(), AdapterError> {
        debug!(adapter = %self.name, command = command.id(), "executing simulator command");
        if self.executed.len() == COMMAND_HISTORY {
            self.executed.pop_front();
        }
        self.executed.push_back(command.clone());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated process model
// ────────────────────────────────────────────────────────────────────────────

/// A simulated simulation engine.
///
/// Sim time runs in lock-step with the wall clock from the moment of
/// connection, starting at the configured origin.  Reads produce a
/// 0.1 Hz sine wave scaled to ±100 on analog signals.
pub struct SimProcessModel {
    name: String,
    frequency: u32,
    signals: Vec<SignalMetadata>,
    origin: SimTime,
    connected_at: Option<Instant>,
    outbox: VecDeque<Command>,
    last_received: Option<(SignalBuffer, SimTime)>,
    reads: u64,
    writes: u64,
}

impl SimProcessModel {
    /// `signals` are the to-external-system signals this model produces.
    pub fn new(name: impl Into<String>, frequency: u32, signals: Vec<SignalMetadata>) -> Self {
        Self {
            name: name.into(),
            frequency,
            signals,
            origin: SimTime::now(),
            connected_at: None,
            outbox: VecDeque::new(),
            last_received: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Sim time reported at the moment of connection.
    pub fn with_origin(mut self, origin: SimTime) -> Self {
        self.origin = origin;
        self
    }

    /// Queue a command to be emitted on the next [`read_sim_commands`]
    /// call.
    ///
    /// [`read_sim_commands`]: ProcessModelAdapter::read_sim_commands
    pub fn emit(&mut self, command: Command) {
        self.outbox.push_back(command);
    }

    /// Most recent to-process-model buffer and its origin time.
    pub fn last_received(&self) -> Option<&(SignalBuffer, SimTime)> {
        self.last_received.as_ref()
    }

    fn elapsed_millis(&self) -> i64 {
        self.connected_at
            .map(|t| i64::try_from(t.elapsed().as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

impl Adapter for SimProcessModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<bool, AdapterError> {
        if self.connected_at.is_none() {
            info!(adapter = %self.name, origin = %self.origin, "simulated process model connected");
            self.connected_at = Some(Instant::now());
        }
        Ok(true)
    }

    fn disconnect(&mut self) {
        // The next connect resumes from where the clock stopped.
        self.origin = self.origin.add_millis(self.elapsed_millis());
        self.connected_at = None;
    }

    fn operating_frequency(&self) -> u32 {
        self.frequency
    }

    fn state(&self) -> Option<String> {
        Some(if self.connected_at.is_some() { "running" } else { "stopped" }.to_string())
    }

    fn status(&self) -> Option<String> {
        Some(format!("{} reads, {} writes", self.reads, self.writes))
    }

    fn available_control_commands(&self) -> Vec<ControlCommandInfo> {
        let mut commands = common_commands();
        commands.push(
            ControlCommandInfo::new("emit", "Emit a simulator command towards the external system")
                .with_parameter("id"),
        );
        commands
    }

    fn invoke_control_command(&mut self, command: &Command) -> Result<CommandReply, AdapterError> {
        match command.id() {
            "ping" => Ok(reply(&[("reply", "pong".to_string())])),
            "reset" => {
                self.reads = 0;
                self.writes = 0;
                self.outbox.clear();
                Ok(CommandReply::new())
            }
            "describe" => Ok(reply(&[
                ("name", self.name.clone()),
                ("frequency_hz", self.frequency.to_string()),
                ("sim_time", self.origin.add_millis(self.elapsed_millis()).to_string()),
                ("reads", self.reads.to_string()),
                ("writes", self.writes.to_string()),
            ])),
            "emit" => {
                let id = command
                    .param("id")
                    .ok_or_else(|| AdapterError::Rejected("emit requires an 'id' parameter".into()))?;
                let params = command
                    .params()
                    .iter()
                    .filter(|(k, _)| k.as_str() != "id")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.emit(Command::new(id).with_params(params));
                Ok(reply(&[("queued", self.outbox.len().to_string())]))
            }
            other => Err(AdapterError::Unsupported(format!("control command '{other}'"))),
        }
    }
}

impl ProcessModelAdapter for SimProcessModel {
    fn read_signal_data(&mut self, buffer: &mut SignalBuffer) -> Result<(), AdapterError> {
        if self.connected_at.is_none() {
            return Err(not_connected(&self.name));
        }
        let seconds = self.elapsed_millis() as f64 / 1000.0;
        fill(buffer, &self.signals, (seconds * TAU * 0.1).sin() * 100.0)?;
        self.reads += 1;
        Ok(())
    }

    fn write_signal_data(
        &mut self,
        buffer: &SignalBuffer,
        origin: &SimTime,
    ) -> Result<(), AdapterError> {
        if self.connected_at.is_none() {
            return Err(not_connected(&self.name));
        }
        self.last_received = Some((buffer.clone(), *origin));
        self.writes += 1;
        Ok(())
    }

    fn sim_time(&mut self) -> Result<SimTime, AdapterError> {
        if self.connected_at.is_none() {
            return Err(not_connected(&self.name));
        }
        Ok(self.origin.add_millis(self.elapsed_millis()))
    }

    fn read_sim_commands(&mut self) -> Result<Vec<Command>, AdapterError> {
        if self.connected_at.is_none() {
            return Err(not_connected(&self.name));
        }
        let now = self.origin.add_millis(self.elapsed_millis());
        Ok(self
            .outbox
            .drain(..)
            .map(|c| c.with_origin(now))
            .collect())
    }
}
