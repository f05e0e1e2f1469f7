//! [`ProcessModelProcedure`] – the loop that owns the process model adapter
//! and the signal transfer pipeline.
//!
//! The process model's sim clock is the bridge's time base.  Every cycle the
//! current sim time is fed through a [`FrequencySubdivider`]; each step it
//! reports is one external-system frame.  The procedure advances the shared
//! frame counter by that many steps and, whenever at least one step
//! elapsed, transfers a fresh frame towards the external system.  While the
//! sim clock stands still an idle timer keeps transfers flowing.
//!
//! # States
//!
//! | State | Leaves on | To |
//! |---|---|---|
//! | `Disconnected` | `connect()` succeeds | `Connected` |
//! | `Disconnected` | `connect()` fails with an I/O error | `Error` |
//! | `Connected` | reconnect request or any I/O error | `Disconnected` |
//! | `Error` | reconnect request | `Disconnected` |
//!
//! `Error` is terminal until an operator asks for a reconnect: a process
//! model that cannot even be reached is not retried blindly.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use simbridge_hal::ProcessModelAdapter;
use simbridge_kernel::{CommandInvoker, FrequencySubdivider, Mailbox, Timeout};
use simbridge_middleware::SignalTransferPipeline;
use simbridge_types::{
    Activity, AdapterError, BridgeError, ByteOrder, Command, CommandReply, Direction, Frame,
    LinkState, ProcedureSnapshot, Side, SignalBuffer, SignalMetadata, SimTime,
};
use tracing::{debug, error, info, warn};

use crate::config::ProcessModelConfig;
use crate::procedure::{budget_for, Health, Procedure};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Disconnected,
    Connected,
    Error(String),
}

impl State {
    fn link(&self) -> LinkState {
        match self {
            State::Disconnected => LinkState::Disconnected,
            State::Connected => LinkState::Connected,
            State::Error(_) => LinkState::Error,
        }
    }
}

/// Drives a [`ProcessModelAdapter`] and the pipeline against the shared
/// [`Mailbox`].
pub struct ProcessModelProcedure {
    adapter: Box<dyn ProcessModelAdapter>,
    mailbox: Arc<Mailbox>,
    pipeline: SignalTransferPipeline,
    signals: Vec<SignalMetadata>,
    byte_order: ByteOrder,
    retry_delay_ms: i64,
    subdivider: FrequencySubdivider,
    baseline_pending: bool,
    idle: Timeout,
    state: State,
    retry_at: i64,
    health: Health,
    invoker: CommandInvoker<Self>,
    shut_down: bool,
}

impl ProcessModelProcedure {
    /// `signals` are the to-external-system signals the adapter reads.
    pub fn new(
        adapter: Box<dyn ProcessModelAdapter>,
        mailbox: Arc<Mailbox>,
        pipeline: SignalTransferPipeline,
        signals: Vec<SignalMetadata>,
        subdivider: FrequencySubdivider,
        config: &ProcessModelConfig,
    ) -> Self {
        let idle_ms = i64::try_from(config.idle_transfer_interval_ms).unwrap_or(i64::MAX);
        Self {
            adapter,
            mailbox,
            pipeline,
            signals,
            byte_order: config.byte_order,
            retry_delay_ms: i64::try_from(config.connect_retry_delay_ms).unwrap_or(i64::MAX),
            subdivider,
            baseline_pending: true,
            idle: Timeout::new(0, idle_ms),
            state: State::Disconnected,
            retry_at: i64::MIN,
            health: Health::new(Side::ProcessModel),
            invoker: CommandInvoker::new(),
            shut_down: false,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.state.link()
    }

    /// Execute an adapter control command.  Must run on the procedure's own
    /// thread, i.e. through its invoker.
    pub fn invoke_adapter_command(&mut self, command: &Command) -> Result<CommandReply, BridgeError> {
        debug!(side = "pm", command = command.id(), "invoking control command");
        self.adapter
            .invoke_control_command(command)
            .map_err(BridgeError::from)
    }

    /// Execute a control command on pipeline stage `sequence`.  Must run on
    /// the procedure's own thread, i.e. through its invoker.
    pub fn invoke_stage_command(
        &mut self,
        sequence: usize,
        command: &Command,
    ) -> Result<CommandReply, BridgeError> {
        self.pipeline.invoke_stage_command(sequence, command)
    }

    // ── Disconnected ────────────────────────────────────────────────────────

    fn try_connect(&mut self, now: i64) {
        if now < self.retry_at {
            return;
        }
        self.health.activity = Activity::Connecting;
        match self.adapter.connect() {
            Ok(true) => {
                match self.adapter.sim_time() {
                    Ok(time) => {
                        self.subdivider.reset(&time);
                        self.baseline_pending = false;
                    }
                    Err(e) if e.is_fatal() => {
                        self.link_lost(now, &e);
                        return;
                    }
                    Err(e) => {
                        warn!(side = "pm", error = %e, "sim time unavailable at connect, deferring baseline");
                        self.baseline_pending = true;
                    }
                }
                self.idle.reset(now);
                if self.idle.interval() > 0 {
                    self.idle.force_timeout();
                }
                self.mailbox.clear();
                self.health.take_reconnect();
                self.health.ok();
                self.enter(State::Connected);
                info!(side = "pm", adapter = self.adapter.name(), "process model connected");
            }
            Ok(false) => {
                debug!(side = "pm", "process model not ready, retrying");
                self.retry_at = now.saturating_add(self.retry_delay_ms);
            }
            Err(e) if e.is_fatal() => {
                error!(side = "pm", error = %e, "process model unreachable, awaiting reconnect request");
                self.adapter.disconnect();
                self.health.nok(e.to_string());
                self.health.activity = Activity::AwaitingRecovery;
                self.enter(State::Error(e.to_string()));
            }
            Err(e) => {
                warn!(side = "pm", error = %e, "process model connect failed");
                self.health.nok(e.to_string());
                self.retry_at = now.saturating_add(self.retry_delay_ms);
            }
        }
    }

    // ── Error ───────────────────────────────────────────────────────────────

    fn await_recovery(&mut self, now: i64) {
        self.health.activity = Activity::AwaitingRecovery;
        if self.health.take_reconnect() {
            info!(side = "pm", "reconnect requested, leaving error state");
            self.retry_at = now;
            self.enter(State::Disconnected);
        }
    }

    // ── Connected ───────────────────────────────────────────────────────────

    fn transfer_to_external_system(&mut self, time: SimTime) -> Result<(), AdapterError> {
        let mut buffer = SignalBuffer::allocate(&self.signals, self.byte_order);
        match self.adapter.read_signal_data(&mut buffer) {
            Ok(()) => self.health.statistics.reads_ok += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.health.statistics.read_failures += 1;
                warn!(side = "pm", error = %e, "read failed");
                return Ok(());
            }
        }
        if let Err(e) = self.pipeline.process(&mut buffer, Direction::ToExternalSystem) {
            self.health.statistics.read_failures += 1;
            warn!(side = "pm", error = %e, "to-ES frame rejected by pipeline");
            return Ok(());
        }
        let dropped = self.mailbox.put_to_es(Frame::new(buffer, time));
        if dropped > 0 {
            debug!(side = "pm", dropped, "unconsumed to-ES frame replaced");
        }
        self.health.statistics.dropped_frames += dropped;
        Ok(())
    }

    fn transfer_to_process_model(&mut self) -> Result<bool, AdapterError> {
        let Some(frame) = self.mailbox.take_to_pm() else {
            return Ok(false);
        };
        let Frame { mut buffer, origin } = frame;
        if let Err(e) = self.pipeline.process(&mut buffer, Direction::ToProcessModel) {
            self.health.statistics.write_failures += 1;
            warn!(side = "pm", error = %e, "to-PM frame rejected by pipeline");
            return Ok(true);
        }
        match self.adapter.write_signal_data(&buffer, &origin) {
            Ok(()) => self.health.statistics.writes_ok += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.health.statistics.write_failures += 1;
                warn!(side = "pm", error = %e, "write failed");
            }
        }
        Ok(true)
    }

    fn transfer(&mut self, now: i64) -> Result<bool, AdapterError> {
        match self.adapter.read_sim_commands() {
            Ok(commands) => {
                if !commands.is_empty() {
                    debug!(side = "pm", count = commands.len(), "simulator commands queued");
                }
                self.mailbox.push_commands(commands);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.health.statistics.command_read_failures += 1;
                warn!(side = "pm", error = %e, "reading simulator commands failed");
            }
        }

        let time = match self.adapter.sim_time() {
            Ok(time) => time,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.health.statistics.read_failures += 1;
                warn!(side = "pm", error = %e, "sim time unavailable");
                return Ok(false);
            }
        };

        let step = if self.baseline_pending {
            self.subdivider.reset(&time);
            self.baseline_pending = false;
            0
        } else {
            self.subdivider.step_change(&time)
        };
        self.mailbox.advance_frame(step);

        let mut active = false;
        if step > 0 {
            self.transfer_to_external_system(time)?;
            self.idle.reset(now);
            // One frame per cycle; the rest were skipped.
            self.health.statistics.dropped_frames += u64::try_from(step - 1).unwrap_or(0);
            active = true;
        } else if self.idle.is_timeout(now) {
            let elapsed = self.idle.reschedule(now);
            self.transfer_to_external_system(time)?;
            if elapsed > 1 {
                self.health.statistics.dropped_frames += u64::try_from(elapsed - 1).unwrap_or(0);
            }
            active = true;
        }

        active |= self.transfer_to_process_model()?;
        Ok(active)
    }

    fn run_connected(&mut self, now: i64) {
        if self.health.reconnect_requested() {
            info!(side = "pm", "reconnect requested");
            self.adapter.disconnect();
            self.retry_at = now;
            self.enter(State::Disconnected);
            return;
        }
        match self.transfer(now) {
            Ok(active) => {
                self.health.activity = if active { Activity::Transferring } else { Activity::Idle };
            }
            Err(e) => self.link_lost(now, &e),
        }
    }

    fn link_lost(&mut self, now: i64, e: &AdapterError) {
        error!(side = "pm", error = %e, "process model link lost");
        self.health.nok(e.to_string());
        self.health.activity = Activity::Connecting;
        self.adapter.disconnect();
        self.retry_at = now.saturating_add(self.retry_delay_ms);
        self.enter(State::Disconnected);
    }

    fn enter(&mut self, next: State) {
        self.health.transition(self.state.link(), next.link());
        self.state = next;
    }
}

impl Procedure for ProcessModelProcedure {
    fn side(&self) -> Side {
        Side::ProcessModel
    }

    fn run_once(&mut self, now_ms: i64) {
        self.health.cycles += 1;
        match self.state {
            State::Disconnected => self.try_connect(now_ms),
            State::Connected => self.run_connected(now_ms),
            State::Error(_) => self.await_recovery(now_ms),
        }
    }

    fn invoker(&self) -> CommandInvoker<Self> {
        self.invoker.clone()
    }

    fn reconnect_flag(&self) -> Arc<AtomicBool> {
        self.health.reconnect_flag()
    }

    fn cycle_budget(&self) -> Duration {
        budget_for(self.adapter.operating_frequency())
    }

    fn snapshot(&self) -> ProcedureSnapshot {
        let mut snapshot =
            self.health
                .snapshot(self.state.link(), self.adapter.state(), self.adapter.status());
        if let State::Error(cause) = &self.state
            && snapshot.status_message.is_none()
        {
            snapshot.status_message = Some(cause.clone());
        }
        snapshot
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.adapter.disconnect();
        self.adapter.teardown();
        self.enter(State::Disconnected);
        self.health.activity = Activity::Stopped;
        info!(side = "pm", adapter = self.adapter.name(), "process model procedure stopped");
    }
}
