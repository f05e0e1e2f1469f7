//! [`ExternalSystemProcedure`] – the loop that owns the external system
//! adapter.
//!
//! # States
//!
//! | State | Cycle |
//! |---|---|
//! | `Disconnected` | attempt `connect()` once the retry delay has passed |
//! | `Connected` | time steps, read poll, one command, pending write |
//!
//! A connected cycle runs, in order:
//!
//! 1. **Time steps** – a synchronous adapter gets one
//!    `time_step_control()` per mailbox frame advanced since the last cycle.
//! 2. **Read** – when the read-poll timer elapses, the to-PM signals are read
//!    into a fresh buffer and put into the mailbox.
//! 3. **Command** – at most one queued simulator command is executed.
//! 4. **Write** – the pending to-ES frame, if any, is written.
//!
//! An [`AdapterError::Io`] at any step ends the cycle and requests a
//! reconnect; every other failure is counted and the cycle carries on.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use simbridge_hal::ExternalSystemAdapter;
use simbridge_kernel::{CommandInvoker, Mailbox, Timeout};
use simbridge_types::{
    Activity, AdapterError, BridgeError, ByteOrder, Command, CommandReply, Frame, LinkState,
    ProcedureSnapshot, Side, SignalBuffer, SignalMetadata, SimTime,
};
use tracing::{debug, error, info, warn};

use crate::config::ExternalSystemConfig;
use crate::procedure::{budget_for, Health, Procedure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Disconnected,
    Connected,
}

impl State {
    fn link(self) -> LinkState {
        match self {
            State::Disconnected => LinkState::Disconnected,
            State::Connected => LinkState::Connected,
        }
    }
}

/// Drives an [`ExternalSystemAdapter`] against the shared [`Mailbox`].
pub struct ExternalSystemProcedure {
    adapter: Box<dyn ExternalSystemAdapter>,
    mailbox: Arc<Mailbox>,
    signals: Vec<SignalMetadata>,
    byte_order: ByteOrder,
    retry_delay_ms: i64,
    state: State,
    retry_at: i64,
    read_poll: Timeout,
    frame_cursor: u64,
    health: Health,
    invoker: CommandInvoker<Self>,
    shut_down: bool,
}

impl ExternalSystemProcedure {
    /// `signals` are the to-process-model signals the adapter reads.
    pub fn new(
        adapter: Box<dyn ExternalSystemAdapter>,
        mailbox: Arc<Mailbox>,
        signals: Vec<SignalMetadata>,
        config: &ExternalSystemConfig,
    ) -> Self {
        let poll_ms = i64::try_from(config.read_poll_interval_ms).unwrap_or(i64::MAX);
        Self {
            adapter,
            mailbox,
            signals,
            byte_order: config.byte_order,
            retry_delay_ms: i64::try_from(config.connect_retry_delay_ms).unwrap_or(i64::MAX),
            state: State::Disconnected,
            retry_at: i64::MIN,
            read_poll: Timeout::new(0, poll_ms),
            frame_cursor: 0,
            health: Health::new(Side::ExternalSystem),
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
        debug!(side = "es", command = command.id(), "invoking control command");
        self.adapter
            .invoke_control_command(command)
            .map_err(BridgeError::from)
    }

    // ── Disconnected ────────────────────────────────────────────────────────

    fn try_connect(&mut self, now: i64) {
        if now < self.retry_at {
            return;
        }
        self.health.activity = Activity::Connecting;
        match self.adapter.connect() {
            Ok(true) => {
                self.mailbox.clear_to_pm();
                self.health.take_reconnect();
                self.frame_cursor = self.mailbox.frame();
                self.read_poll.reset(now);
                self.read_poll.force_timeout();
                self.health.ok();
                self.enter(State::Connected);
                info!(side = "es", adapter = self.adapter.name(), "external system connected");
            }
            Ok(false) => {
                debug!(side = "es", "external system not ready, retrying");
                self.retry_at = now.saturating_add(self.retry_delay_ms);
            }
            Err(e) => {
                warn!(side = "es", error = %e, "external system connect failed");
                self.health.nok(e.to_string());
                self.adapter.disconnect();
                self.retry_at = now.saturating_add(self.retry_delay_ms);
            }
        }
    }

    // ── Connected ───────────────────────────────────────────────────────────

    fn transfer(&mut self, now: i64) -> Result<bool, AdapterError> {
        let mut active = false;

        let frame = self.mailbox.frame();
        let steps = frame.wrapping_sub(self.frame_cursor);
        self.frame_cursor = frame;
        if self.adapter.is_synchronous() {
            for _ in 0..steps {
                match self.adapter.time_step_control() {
                    Ok(()) => active = true,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        self.health.statistics.write_failures += 1;
                        warn!(side = "es", error = %e, "time step failed");
                    }
                }
            }
        }

        if self.read_poll.is_timeout(now) {
            self.read_poll.reschedule(now);
            active = true;
            let mut buffer = SignalBuffer::allocate(&self.signals, self.byte_order);
            match self.adapter.read_signal_data(&mut buffer) {
                Ok(()) => {
                    buffer.rewind();
                    self.health.statistics.reads_ok += 1;
                    let dropped = self.mailbox.put_to_pm(Frame::new(buffer, SimTime::now()));
                    if dropped > 0 {
                        debug!(side = "es", dropped, "unconsumed to-PM frame replaced");
                    }
                    self.health.statistics.dropped_frames += dropped;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.health.statistics.read_failures += 1;
                    warn!(side = "es", error = %e, "read failed");
                }
            }
        }

        if let Some(command) = self.mailbox.pop_command() {
            active = true;
            if self.adapter.accepts_sim_commands() {
                match self.adapter.execute_sim_command(&command) {
                    Ok(()) => debug!(side = "es", command = command.id(), "simulator command executed"),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        self.health.statistics.command_failures += 1;
                        warn!(side = "es", command = command.id(), error = %e, "simulator command failed");
                    }
                }
            } else {
                debug!(side = "es", command = command.id(), "adapter takes no simulator commands, discarded");
            }
        }

        if let Some(frame) = self.mailbox.take_to_es() {
            active = true;
            match self.adapter.write_signal_data(&frame.buffer) {
                Ok(()) => self.health.statistics.writes_ok += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.health.statistics.write_failures += 1;
                    warn!(side = "es", error = %e, "write failed");
                }
            }
        }

        Ok(active)
    }

    fn run_connected(&mut self, now: i64) {
        match self.transfer(now) {
            Ok(active) => {
                self.health.activity = if active { Activity::Transferring } else { Activity::Idle };
            }
            Err(e) => {
                error!(side = "es", error = %e, "external system link lost");
                self.health.nok(e.to_string());
                self.health.request_reconnect();
            }
        }
        if self.health.reconnect_requested() {
            self.adapter.disconnect();
            self.retry_at = now;
            self.health.activity = Activity::Connecting;
            self.enter(State::Disconnected);
        }
    }

    fn enter(&mut self, next: State) {
        self.health.transition(self.state.link(), next.link());
        self.state = next;
    }
}

impl Procedure for ExternalSystemProcedure {
    fn side(&self) -> Side {
        Side::ExternalSystem
    }

    fn run_once(&mut self, now_ms: i64) {
        self.health.cycles += 1;
        match self.state {
            State::Disconnected => self.try_connect(now_ms),
            State::Connected => self.run_connected(now_ms),
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
        self.health
            .snapshot(self.state.link(), self.adapter.state(), self.adapter.status())
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
        info!(side = "es", adapter = self.adapter.name(), "external system procedure stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    use simbridge_hal::Adapter;
    use simbridge_types::{DataType, Direction, SignalDefinition, SignalLayout, StatusCode};

    /// What the mock saw, shared with the test body.
    #[derive(Default)]
    struct Log {
        connects: usize,
        disconnects: usize,
        teardowns: usize,
        reads: usize,
        writes: Vec<SignalBuffer>,
        steps: usize,
        executed: Vec<String>,
    }

    struct MockEs {
        log: Arc<Mutex<Log>>,
        connect_script: VecDeque<Result<bool, AdapterError>>,
        read_error: Option<AdapterError>,
        write_error: Option<AdapterError>,
        step_error: Option<AdapterError>,
        synchronous: bool,
        accepts_commands: bool,
    }

    impl MockEs {
        fn new(log: &Arc<Mutex<Log>>) -> Self {
            Self {
                log: Arc::clone(log),
                connect_script: VecDeque::new(),
                read_error: None,
                write_error: None,
                step_error: None,
                synchronous: false,
                accepts_commands: true,
            }
        }
    }

    impl Adapter for MockEs {
        fn name(&self) -> &str {
            "mock-es"
        }
        fn connect(&mut self) -> Result<bool, AdapterError> {
            self.log.lock().unwrap().connects += 1;
            self.connect_script.pop_front().unwrap_or(Ok(true))
        }
        fn disconnect(&mut self) {
            self.log.lock().unwrap().disconnects += 1;
        }
        fn operating_frequency(&self) -> u32 {
            50
        }
        fn invoke_control_command(&mut self, command: &Command) -> Result<CommandReply, AdapterError> {
            match command.id() {
                "ping" => Ok(CommandReply::from([("reply".to_string(), "pong".to_string())])),
                other => Err(AdapterError::Unsupported(other.to_string())),
            }
        }
        fn teardown(&mut self) {
            self.log.lock().unwrap().teardowns += 1;
        }
    }

    impl ExternalSystemAdapter for MockEs {
        fn read_signal_data(&mut self, _buffer: &mut SignalBuffer) -> Result<(), AdapterError> {
            self.log.lock().unwrap().reads += 1;
            match &self.read_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
        fn write_signal_data(&mut self, buffer: &SignalBuffer) -> Result<(), AdapterError> {
            if let Some(e) = &self.write_error {
                return Err(e.clone());
            }
            self.log.lock().unwrap().writes.push(buffer.clone());
            Ok(())
        }
        fn is_synchronous(&self) -> bool {
            self.synchronous
        }
        fn time_step_control(&mut self) -> Result<(), AdapterError> {
            self.log.lock().unwrap().steps += 1;
            match &self.step_error {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
        fn accepts_sim_commands(&self) -> bool {
            self.accepts_commands
        }
        fn execute_sim_command(&mut self, command: &Command) -> Result<(), AdapterError> {
            self.log.lock().unwrap().executed.push(command.id().to_string());
            if command.id() == "bad" {
                return Err(AdapterError::Rejected("bad command".into()));
            }
            Ok(())
        }
    }

    fn signals() -> Vec<SignalMetadata> {
        SignalLayout::build(vec![SignalDefinition::new(
            "level",
            DataType::Float32,
            Direction::ToProcessModel,
        )])
        .unwrap()
        .signals(Direction::ToProcessModel)
        .to_vec()
    }

    fn config() -> ExternalSystemConfig {
        ExternalSystemConfig {
            read_poll_interval_ms: 20,
            connect_retry_delay_ms: 0,
            ..ExternalSystemConfig::default()
        }
    }

    fn procedure(mock: MockEs) -> (ExternalSystemProcedure, Arc<Mailbox>) {
        let mailbox = Arc::new(Mailbox::new());
        let proc = ExternalSystemProcedure::new(Box::new(mock), Arc::clone(&mailbox), signals(), &config());
        (proc, mailbox)
    }

    fn empty_frame() -> Frame {
        Frame::new(SignalBuffer::allocate(&[], ByteOrder::Big), SimTime::now())
    }

    #[test]
    fn connect_retries_until_adapter_is_ready() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.connect_script = VecDeque::from([Ok(false), Ok(false), Ok(false), Ok(true)]);
        let (mut proc, _) = procedure(mock);

        for now in 0..3 {
            proc.run_once(now);
            assert_eq!(proc.link_state(), LinkState::Disconnected);
        }
        proc.run_once(3);
        assert_eq!(proc.link_state(), LinkState::Connected);
        assert_eq!(log.lock().unwrap().connects, 4);
        assert_eq!(proc.snapshot().status, StatusCode::Ok);
    }

    #[test]
    fn retry_delay_is_honoured() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.connect_script = VecDeque::from([Ok(false)]);
        let mailbox = Arc::new(Mailbox::new());
        let config = ExternalSystemConfig {
            connect_retry_delay_ms: 100,
            ..config()
        };
        let mut proc = ExternalSystemProcedure::new(Box::new(mock), mailbox, signals(), &config);

        proc.run_once(1000);
        proc.run_once(1050);
        assert_eq!(log.lock().unwrap().connects, 1);
        proc.run_once(1100);
        assert_eq!(log.lock().unwrap().connects, 2);
        assert_eq!(proc.link_state(), LinkState::Connected);
    }

    #[test]
    fn connect_error_reports_nok_and_disconnects() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.connect_script = VecDeque::from([Err(AdapterError::Io("refused".into()))]);
        let (mut proc, _) = procedure(mock);

        proc.run_once(0);
        let snap = proc.snapshot();
        assert_eq!(snap.state, LinkState::Disconnected);
        assert_eq!(snap.status, StatusCode::Nok);
        assert!(snap.status_message.unwrap().contains("refused"));
        assert_eq!(log.lock().unwrap().disconnects, 1);

        proc.run_once(1);
        assert_eq!(proc.link_state(), LinkState::Connected);
    }

    #[test]
    fn connect_clears_stale_to_pm_frame() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, mailbox) = procedure(MockEs::new(&log));
        mailbox.put_to_pm(empty_frame());
        proc.run_once(0);
        assert!(!mailbox.has_pending_to_pm());
    }

    #[test]
    fn reads_on_poll_boundary_and_counts_drops() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, mailbox) = procedure(MockEs::new(&log));

        proc.run_once(0); // connect
        proc.run_once(0); // forced first read
        proc.run_once(10); // inside the interval
        assert_eq!(log.lock().unwrap().reads, 1);
        proc.run_once(20);
        assert_eq!(log.lock().unwrap().reads, 2);

        // The PM never consumed the first frame.
        assert_eq!(proc.snapshot().statistics.dropped_frames, 1);
        assert_eq!(proc.snapshot().statistics.reads_ok, 2);
        assert!(mailbox.take_to_pm().is_some());
    }

    #[test]
    fn transient_read_failure_is_counted() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.read_error = Some(AdapterError::Rejected("busy".into()));
        let (mut proc, mailbox) = procedure(mock);

        proc.run_once(0);
        proc.run_once(0);
        assert_eq!(proc.link_state(), LinkState::Connected);
        assert_eq!(proc.snapshot().statistics.read_failures, 1);
        assert!(!mailbox.has_pending_to_pm());
    }

    #[test]
    fn fatal_read_failure_forces_reconnect() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.read_error = Some(AdapterError::Io("cable pulled".into()));
        let (mut proc, _) = procedure(mock);

        proc.run_once(0);
        proc.run_once(0);
        assert_eq!(proc.link_state(), LinkState::Disconnected);
        assert_eq!(proc.snapshot().status, StatusCode::Nok);
        assert_eq!(log.lock().unwrap().disconnects, 1);

        // Auto-retry reconnects and clears the request.
        proc.run_once(1);
        assert_eq!(proc.link_state(), LinkState::Connected);
        assert!(!proc.reconnect_flag().load(Ordering::Acquire));
    }

    #[test]
    fn writes_pending_to_es_frame() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, mailbox) = procedure(MockEs::new(&log));
        proc.run_once(0);
        mailbox.put_to_es(empty_frame());
        proc.run_once(5);
        assert_eq!(log.lock().unwrap().writes.len(), 1);
        assert_eq!(proc.snapshot().statistics.writes_ok, 1);
        assert!(!mailbox.has_pending_to_es());
    }

    #[test]
    fn transient_step_and_write_failures_are_counted() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.synchronous = true;
        mock.step_error = Some(AdapterError::Rejected("step refused".into()));
        mock.write_error = Some(AdapterError::Rejected("write refused".into()));
        let (mut proc, mailbox) = procedure(mock);

        proc.run_once(0);
        mailbox.advance_frame(2);
        mailbox.put_to_es(empty_frame());
        proc.run_once(1);

        assert_eq!(proc.link_state(), LinkState::Connected);
        assert_eq!(log.lock().unwrap().steps, 2);
        let stats = proc.snapshot().statistics;
        assert_eq!(stats.write_failures, 3);
        assert_eq!(stats.writes_ok, 0);
        assert!(!mailbox.has_pending_to_es());
    }

    #[test]
    fn fatal_step_failure_forces_reconnect() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.synchronous = true;
        mock.step_error = Some(AdapterError::Io("sync lost".into()));
        let (mut proc, mailbox) = procedure(mock);

        proc.run_once(0);
        mailbox.advance_frame(3);
        proc.run_once(1);
        assert_eq!(proc.link_state(), LinkState::Disconnected);
        assert_eq!(proc.snapshot().status, StatusCode::Nok);
        assert_eq!(log.lock().unwrap().steps, 1);
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[test]
    fn fatal_write_failure_forces_reconnect() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.write_error = Some(AdapterError::Io("broken pipe".into()));
        let (mut proc, mailbox) = procedure(mock);

        proc.run_once(0);
        mailbox.put_to_es(empty_frame());
        proc.run_once(1);
        assert_eq!(proc.link_state(), LinkState::Disconnected);
        assert_eq!(proc.snapshot().statistics.write_failures, 0);
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[test]
    fn executes_one_command_per_cycle_in_order() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, mailbox) = procedure(MockEs::new(&log));
        proc.run_once(0);
        mailbox.push_commands([Command::new("a"), Command::new("bad"), Command::new("c")]);

        proc.run_once(1);
        assert_eq!(log.lock().unwrap().executed, vec!["a"]);
        proc.run_once(2);
        proc.run_once(3);
        assert_eq!(log.lock().unwrap().executed, vec!["a", "bad", "c"]);
        assert_eq!(proc.snapshot().statistics.command_failures, 1);
        assert_eq!(mailbox.pending_commands(), 0);
    }

    #[test]
    fn commands_are_discarded_when_not_accepted() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.accepts_commands = false;
        let (mut proc, mailbox) = procedure(mock);
        proc.run_once(0);
        mailbox.push_command(Command::new("a"));
        proc.run_once(1);
        assert!(log.lock().unwrap().executed.is_empty());
        assert_eq!(mailbox.pending_commands(), 0);
    }

    #[test]
    fn synchronous_adapter_steps_once_per_frame() {
        let log = Arc::new(Mutex::new(Log::default()));
        let mut mock = MockEs::new(&log);
        mock.synchronous = true;
        let (mut proc, mailbox) = procedure(mock);

        mailbox.advance_frame(7); // before connect: not stepped
        proc.run_once(0);
        mailbox.advance_frame(3);
        proc.run_once(1);
        assert_eq!(log.lock().unwrap().steps, 3);
        proc.run_once(2);
        assert_eq!(log.lock().unwrap().steps, 3);
    }

    #[test]
    fn reconnect_flag_cycles_the_connection() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, _) = procedure(MockEs::new(&log));
        proc.run_once(0);
        proc.reconnect_flag().store(true, Ordering::Release);
        proc.run_once(1);
        assert_eq!(proc.link_state(), LinkState::Disconnected);
        proc.run_once(2);
        assert_eq!(proc.link_state(), LinkState::Connected);
        assert_eq!(log.lock().unwrap().connects, 2);
    }

    #[test]
    fn control_commands_run_through_the_invoker() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, _) = procedure(MockEs::new(&log));
        let invoker = proc.invoker();
        let pong = invoker.schedule(|p| p.invoke_adapter_command(&Command::new("ping")));
        let bad = invoker.schedule(|p| p.invoke_adapter_command(&Command::new("warp")));

        while invoker.drain_one(&mut proc) {}
        assert_eq!(pong.get().unwrap()["reply"], "pong");
        assert!(matches!(bad.get(), Err(BridgeError::Unsupported(_))));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let log = Arc::new(Mutex::new(Log::default()));
        let (mut proc, _) = procedure(MockEs::new(&log));
        proc.run_once(0);
        proc.shutdown();
        proc.shutdown();
        let log = log.lock().unwrap();
        assert_eq!(log.teardowns, 1);
        assert_eq!(log.disconnects, 1);
        assert_eq!(proc.snapshot().activity, Activity::Stopped);
    }
}
