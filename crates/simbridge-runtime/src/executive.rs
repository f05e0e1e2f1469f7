//! [`IntegrationExecutive`] – owns both procedures and runs each on its own
//! thread.
//!
//! # Worker loop
//!
//! Each procedure thread repeats until the shutdown flag is raised:
//!
//! 1. `run_once(now)`; a panic is logged and ends that thread.
//! 2. Execute at most one queued control command.
//! 3. Publish a fresh [`ProcedureSnapshot`] when the refresh timer fires.
//! 4. Park for whatever is left of the cycle budget (a fifth of the
//!    adapter's frame period).  [`stop`][IntegrationExecutive::stop] unparks
//!    the thread so shutdown never waits for a full budget.
//!
//! On exit the thread disconnects and tears down its adapter, cancels any
//! command still queued and publishes a final `Stopped` snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use simbridge_hal::{SimExternalSystem, SimProcessModel};
//! use simbridge_middleware::SignalTransferPipeline;
//! use simbridge_runtime::{BridgeConfig, IntegrationExecutive};
//! use simbridge_types::Direction;
//!
//! let config = BridgeConfig::default();
//! let layout = config.layout().unwrap();
//! let es = SimExternalSystem::new("plc", 50, layout.signals(Direction::ToProcessModel).to_vec());
//! let pm = SimProcessModel::new("model", 100, layout.signals(Direction::ToExternalSystem).to_vec());
//!
//! let mut executive = IntegrationExecutive::new(
//!     config,
//!     layout,
//!     Box::new(es),
//!     Box::new(pm),
//!     SignalTransferPipeline::new(),
//! )
//! .unwrap();
//! executive.start().unwrap();
//! println!("{:?}", executive.process_model_snapshot());
//! executive.stop();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use simbridge_hal::{ExternalSystemAdapter, ProcessModelAdapter};
use simbridge_kernel::{AsyncResult, CommandInvoker, FrequencySubdivider, Mailbox, Timeout};
use simbridge_middleware::SignalTransferPipeline;
use simbridge_types::{
    Activity, BridgeError, Command, CommandReply, Direction, LinkState, ProcedureSnapshot, Side,
    SignalLayout, StageInfo,
};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::es_procedure::ExternalSystemProcedure;
use crate::pm_procedure::ProcessModelProcedure;
use crate::procedure::Procedure;

/// Control command handled by the executive itself rather than the adapter.
pub const RECONNECT_COMMAND: &str = "reconnect";

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

type SharedSnapshot = Arc<Mutex<ProcedureSnapshot>>;

/// One procedure plus everything other threads need to reach it.
struct Worker<P: Procedure> {
    procedure: Option<P>,
    invoker: CommandInvoker<P>,
    reconnect: Arc<AtomicBool>,
    snapshot: SharedSnapshot,
    /// Cleared by the thread itself before it releases queued commands.
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<P: Procedure> Worker<P> {
    fn new(procedure: P) -> Self {
        let snapshot = Arc::new(Mutex::new(procedure.snapshot()));
        Self {
            invoker: procedure.invoker(),
            reconnect: procedure.reconnect_flag(),
            procedure: Some(procedure),
            snapshot,
            alive: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn spawn(
        &mut self,
        name: &str,
        shutdown: &Arc<AtomicBool>,
        refresh_ms: i64,
    ) -> Result<(), BridgeError> {
        let procedure = self.procedure.take().ok_or(BridgeError::AlreadyStarted)?;
        let invoker = self.invoker.clone();
        let snapshot = Arc::clone(&self.snapshot);
        let shutdown = Arc::clone(shutdown);
        let alive = Arc::clone(&self.alive);
        alive.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(procedure, invoker, snapshot, shutdown, alive, refresh_ms));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                return Err(BridgeError::Io(format!("failed to spawn {name}: {e}")));
            }
        };
        self.handle = Some(handle);
        Ok(())
    }

    fn snapshot(&self) -> ProcedureSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `work` on the procedure thread and wait up to `timeout`.
    fn invoke<F>(&self, command: Command, timeout: Duration, work: F) -> Result<CommandReply, BridgeError>
    where
        F: FnOnce(&mut P, &Command) -> Result<CommandReply, BridgeError> + Send + 'static,
    {
        if !self.alive.load(Ordering::Acquire) {
            return Err(BridgeError::NotRunning);
        }
        let result = self.invoker.schedule(move |procedure| work(procedure, &command));
        await_reply(&self.alive, &result, timeout)
    }
}

/// Wait for `result`, unless the worker exited while the job was being
/// queued: nothing drains the queue after that.
fn await_reply(
    alive: &AtomicBool,
    result: &AsyncResult<CommandReply>,
    timeout: Duration,
) -> Result<CommandReply, BridgeError> {
    if !alive.load(Ordering::Acquire) {
        result.cancel();
        if result.is_cancelled() {
            return Err(BridgeError::NotRunning);
        }
    }
    result.get_timeout(timeout)
}

fn publish(target: &SharedSnapshot, snapshot: ProcedureSnapshot) {
    *target.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn worker_loop<P: Procedure>(
    mut procedure: P,
    invoker: CommandInvoker<P>,
    snapshot: SharedSnapshot,
    shutdown: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    refresh_ms: i64,
) {
    let side = procedure.side();
    let budget = procedure.cycle_budget();
    let mut refresh = Timeout::new(now_ms(), refresh_ms);
    refresh.force_timeout();
    debug!(%side, ?budget, "procedure thread started");

    while !shutdown.load(Ordering::Acquire) {
        let started = Instant::now();
        let now = now_ms();

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| procedure.run_once(now))) {
            error!(%side, panic = %panic_message(panic.as_ref()), "procedure panicked, stopping its thread");
            break;
        }
        invoker.drain_one(&mut procedure);

        if refresh.is_timeout(now) {
            refresh.reschedule(now);
            publish(&snapshot, procedure.snapshot());
        }

        if let Some(rest) = budget.checked_sub(started.elapsed()) {
            thread::park_timeout(rest);
        }
    }

    alive.store(false, Ordering::Release);
    if catch_unwind(AssertUnwindSafe(|| procedure.shutdown())).is_err() {
        error!(%side, "adapter panicked during shutdown");
    }
    let cancelled = invoker.cancel_pending();
    if cancelled > 0 {
        debug!(%side, cancelled, "cancelled queued commands at shutdown");
    }
    let mut last = procedure.snapshot();
    last.state = LinkState::Disconnected;
    last.activity = Activity::Stopped;
    publish(&snapshot, last);
    debug!(%side, "procedure thread finished");
}

// ────────────────────────────────────────────────────────────────────────────
// IntegrationExecutive
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Top-level owner of the mailbox, both procedures and their threads.
pub struct IntegrationExecutive {
    config: BridgeConfig,
    layout: SignalLayout,
    mailbox: Arc<Mailbox>,
    stages: Vec<StageInfo>,
    es: Worker<ExternalSystemProcedure>,
    pm: Worker<ProcessModelProcedure>,
    shutdown: Arc<AtomicBool>,
    phase: Phase,
}

impl IntegrationExecutive {
    /// Validate `config` and assemble both procedures.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for an invalid configuration or an adapter
    /// reporting a zero operating frequency.
    pub fn new(
        config: BridgeConfig,
        layout: SignalLayout,
        es_adapter: Box<dyn ExternalSystemAdapter>,
        pm_adapter: Box<dyn ProcessModelAdapter>,
        pipeline: SignalTransferPipeline,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        for (side, hz) in [
            (Side::ExternalSystem, es_adapter.operating_frequency()),
            (Side::ProcessModel, pm_adapter.operating_frequency()),
        ] {
            if hz == 0 {
                return Err(BridgeError::Config(format!(
                    "{side} adapter reports a zero operating frequency"
                )));
            }
        }
        let subdivider_hz = config.subdivider_frequency(es_adapter.operating_frequency());
        if subdivider_hz > pm_adapter.operating_frequency() {
            return Err(BridgeError::Config(format!(
                "subdivider frequency {subdivider_hz} Hz exceeds process model adapter frequency {} Hz",
                pm_adapter.operating_frequency()
            )));
        }
        let subdivider = FrequencySubdivider::new(subdivider_hz)?;

        let mailbox = Arc::new(Mailbox::new());
        let stages = pipeline.stage_infos();
        let es = ExternalSystemProcedure::new(
            es_adapter,
            Arc::clone(&mailbox),
            layout.signals(Direction::ToProcessModel).to_vec(),
            &config.external_system,
        );
        let pm = ProcessModelProcedure::new(
            pm_adapter,
            Arc::clone(&mailbox),
            pipeline,
            layout.signals(Direction::ToExternalSystem).to_vec(),
            subdivider,
            &config.process_model,
        );
        info!(
            signals = layout.len(),
            stages = stages.len(),
            subdivider_hz,
            "integration executive assembled"
        );

        Ok(Self {
            config,
            layout,
            mailbox,
            stages,
            es: Worker::new(es),
            pm: Worker::new(pm),
            shutdown: Arc::new(AtomicBool::new(false)),
            phase: Phase::Idle,
        })
    }

    /// Spawn both procedure threads.
    ///
    /// # Errors
    ///
    /// [`BridgeError::AlreadyStarted`] on a second call (also after
    /// [`stop`][Self::stop]); [`BridgeError::Io`] if a thread cannot be
    /// spawned, in which case nothing keeps running.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.phase != Phase::Idle {
            return Err(BridgeError::AlreadyStarted);
        }
        let refresh_ms = i64::try_from(self.config.executive.status_refresh_ms).unwrap_or(i64::MAX);
        self.phase = Phase::Running;
        if let Err(e) = self
            .pm
            .spawn("simbridge-pm", &self.shutdown, refresh_ms)
            .and_then(|()| self.es.spawn("simbridge-es", &self.shutdown, refresh_ms))
        {
            self.stop();
            return Err(e);
        }
        info!("integration executive started");
        Ok(())
    }

    /// Stop both threads, waiting up to the configured grace period for
    /// each.  Idempotent.
    pub fn stop(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        self.phase = Phase::Stopped;
        self.shutdown.store(true, Ordering::Release);

        let mut handles = [
            (Side::ProcessModel, self.pm.handle.take()),
            (Side::ExternalSystem, self.es.handle.take()),
        ];
        for (_, handle) in &handles {
            if let Some(handle) = handle {
                handle.thread().unpark();
            }
        }

        let deadline = Instant::now() + self.config.executive.stop_grace();
        for (side, slot) in &mut handles {
            let Some(handle) = slot.take() else { continue };
            while !handle.is_finished() && Instant::now() < deadline {
                handle.thread().unpark();
                thread::sleep(Duration::from_millis(1));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!(%side, "procedure thread panicked");
                }
            } else {
                warn!(
                    %side,
                    grace_ms = self.config.executive.stop_grace_ms,
                    "procedure thread did not stop in time, detaching"
                );
            }
        }
        info!("integration executive stopped");
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn layout(&self) -> &SignalLayout {
        &self.layout
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Pipeline stages in order, as configured.
    pub fn stages(&self) -> &[StageInfo] {
        &self.stages
    }

    pub fn external_system_snapshot(&self) -> ProcedureSnapshot {
        self.es.snapshot()
    }

    pub fn process_model_snapshot(&self) -> ProcedureSnapshot {
        self.pm.snapshot()
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Run a control command on the external system adapter.
    ///
    /// `reconnect` is answered immediately by raising the procedure's
    /// reconnect flag.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotRunning`] outside `start`/`stop`,
    /// [`BridgeError::Timeout`] when the procedure thread does not get to the
    /// command in time, otherwise the adapter's error.
    pub fn invoke_external_system_command(&self, command: Command) -> Result<CommandReply, BridgeError> {
        if command.id() == RECONNECT_COMMAND {
            self.es.reconnect.store(true, Ordering::Release);
            info!(side = "es", "reconnect requested");
            return Ok(CommandReply::new());
        }
        self.ensure_running()?;
        self.es.invoke(command, self.command_timeout(), |p, c| p.invoke_adapter_command(c))
    }

    /// Run a control command on the process model adapter.
    ///
    /// # Errors
    ///
    /// As [`invoke_external_system_command`][Self::invoke_external_system_command].
    pub fn invoke_process_model_command(&self, command: Command) -> Result<CommandReply, BridgeError> {
        if command.id() == RECONNECT_COMMAND {
            self.pm.reconnect.store(true, Ordering::Release);
            info!(side = "pm", "reconnect requested");
            return Ok(CommandReply::new());
        }
        self.ensure_running()?;
        self.pm.invoke(command, self.command_timeout(), |p, c| p.invoke_adapter_command(c))
    }

    /// Run a control command on pipeline stage `sequence`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownStage`] for an out-of-range sequence, otherwise
    /// as [`invoke_external_system_command`][Self::invoke_external_system_command].
    pub fn invoke_stage_command(&self, sequence: usize, command: Command) -> Result<CommandReply, BridgeError> {
        if sequence >= self.stages.len() {
            return Err(BridgeError::UnknownStage(sequence));
        }
        self.ensure_running()?;
        self.pm.invoke(command, self.command_timeout(), move |p, c| {
            p.invoke_stage_command(sequence, c)
        })
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BridgeError::NotRunning)
        }
    }

    fn command_timeout(&self) -> Duration {
        self.config.executive.command_timeout()
    }
}

impl Drop for IntegrationExecutive {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use simbridge_hal::{Adapter, SimExternalSystem, SimProcessModel};
    use simbridge_middleware::{StageRegistry, StageSpec};
    use simbridge_types::{
        AdapterError, DataType, SignalBuffer, SignalDefinition, StatusCode,
    };

    fn layout() -> SignalLayout {
        SignalLayout::build(vec![
            SignalDefinition::new("level", DataType::Float64, Direction::ToProcessModel),
            SignalDefinition::new("speed", DataType::Float64, Direction::ToExternalSystem),
        ])
        .unwrap()
    }

    fn fast_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.executive.status_refresh_ms = 10;
        config.executive.command_timeout_ms = 2000;
        config.external_system.read_poll_interval_ms = 5;
        config.external_system.connect_retry_delay_ms = 5;
        config.process_model.connect_retry_delay_ms = 5;
        config.process_model.idle_transfer_interval_ms = 10;
        config
    }

    fn sim_executive(config: BridgeConfig, specs: &[StageSpec]) -> IntegrationExecutive {
        let layout = layout();
        let pipeline = StageRegistry::with_builtin()
            .build_pipeline(specs, &layout)
            .unwrap();
        let es = SimExternalSystem::new("plc", 50, layout.signals(Direction::ToProcessModel).to_vec());
        let pm = SimProcessModel::new("model", 100, layout.signals(Direction::ToExternalSystem).to_vec());
        IntegrationExecutive::new(config, layout, Box::new(es), Box::new(pm), pipeline).unwrap()
    }

    #[test]
    fn reply_queued_after_worker_exit_is_not_running() {
        let alive = AtomicBool::new(false);
        let orphaned = AsyncResult::<CommandReply>::new();
        let started = Instant::now();
        assert_eq!(
            await_reply(&alive, &orphaned, Duration::from_secs(5)),
            Err(BridgeError::NotRunning)
        );
        assert!(started.elapsed() < Duration::from_secs(1));

        // A job the worker finished on its way out still delivers.
        let finished = AsyncResult::new();
        finished.set_value(CommandReply::from([("reply".to_string(), "pong".to_string())]));
        assert_eq!(
            await_reply(&alive, &finished, Duration::from_secs(5)).unwrap()["reply"],
            "pong"
        );

        let live = AtomicBool::new(true);
        let pending = AsyncResult::<CommandReply>::new();
        assert!(matches!(
            await_reply(&live, &pending, Duration::from_millis(10)),
            Err(BridgeError::Timeout(_))
        ));
    }

    /// Poll `cond` for up to five seconds.
    fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = fast_config();
        config.external_system.read_poll_interval_ms = 0;
        let layout = layout();
        let result = IntegrationExecutive::new(
            config,
            layout,
            Box::new(SimExternalSystem::new("plc", 50, Vec::new())),
            Box::new(SimProcessModel::new("model", 100, Vec::new())),
            SignalTransferPipeline::new(),
        );
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn zero_adapter_frequency_is_rejected() {
        let result = IntegrationExecutive::new(
            fast_config(),
            layout(),
            Box::new(SimExternalSystem::new("plc", 0, Vec::new())),
            Box::new(SimProcessModel::new("model", 100, Vec::new())),
            SignalTransferPipeline::new(),
        );
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn commands_require_a_running_executive() {
        let executive = sim_executive(fast_config(), &[]);
        assert_eq!(
            executive.invoke_external_system_command(Command::new("ping")),
            Err(BridgeError::NotRunning)
        );
        // Reconnect is only a flag and always accepted.
        assert!(executive.invoke_process_model_command(Command::new("reconnect")).is_ok());
    }

    #[test]
    fn start_twice_and_restart_are_rejected() {
        let mut executive = sim_executive(fast_config(), &[]);
        executive.start().unwrap();
        assert_eq!(executive.start(), Err(BridgeError::AlreadyStarted));
        executive.stop();
        assert_eq!(executive.start(), Err(BridgeError::AlreadyStarted));
    }

    #[test]
    fn both_sides_connect_and_exchange_frames() {
        let mut executive = sim_executive(fast_config(), &[]);
        executive.start().unwrap();

        assert!(eventually(|| {
            let es = executive.external_system_snapshot();
            let pm = executive.process_model_snapshot();
            es.state == LinkState::Connected
                && pm.state == LinkState::Connected
                && es.statistics.writes_ok > 0
                && pm.statistics.writes_ok > 0
        }));
        let pm = executive.process_model_snapshot();
        assert_eq!(pm.status, StatusCode::Ok);
        assert_eq!(pm.adapter_state, "running");
        assert!(executive.mailbox().frame() > 0);

        executive.stop();
        let es = executive.external_system_snapshot();
        assert_eq!(es.state, LinkState::Disconnected);
        assert_eq!(es.activity, Activity::Stopped);
        assert_eq!(es.adapter_state, "offline");
    }

    #[test]
    fn adapter_and_stage_commands_round_trip() {
        let specs = [StageSpec {
            kind: "offset".into(),
            id: Some("shift".into()),
            params: [("offset".to_string(), "1".to_string())].into(),
        }];
        let mut executive = sim_executive(fast_config(), &specs);
        assert_eq!(executive.stages().len(), 1);
        assert_eq!(executive.stages()[0].id, "shift");
        executive.start().unwrap();
        // The simulated adapters only answer while connected.
        assert!(eventually(|| {
            executive.external_system_snapshot().state == LinkState::Connected
                && executive.process_model_snapshot().state == LinkState::Connected
        }));

        let pong = executive
            .invoke_external_system_command(Command::new("ping"))
            .unwrap();
        assert_eq!(pong["reply"], "pong");

        let described = executive
            .invoke_process_model_command(Command::new("describe"))
            .unwrap();
        assert_eq!(described["frequency_hz"], "100");

        let set = executive
            .invoke_stage_command(0, Command::new("set").with_param("value", "4"))
            .unwrap();
        assert_eq!(set["offset"], "4");

        assert_eq!(
            executive.invoke_stage_command(1, Command::new("get")),
            Err(BridgeError::UnknownStage(1))
        );
        assert!(matches!(
            executive.invoke_external_system_command(Command::new("warp")),
            Err(BridgeError::Unsupported(_))
        ));
        executive.stop();
    }

    #[test]
    fn reconnect_command_cycles_the_link() {
        let mut executive = sim_executive(fast_config(), &[]);
        executive.start().unwrap();
        assert!(eventually(|| executive.external_system_snapshot().state == LinkState::Connected));

        executive
            .invoke_external_system_command(Command::new(RECONNECT_COMMAND))
            .unwrap();
        // The flag is consumed by the next successful connect.
        assert!(eventually(|| {
            !executive.es.reconnect.load(Ordering::Acquire)
                && executive.external_system_snapshot().state == LinkState::Connected
        }));
        assert_eq!(
            executive
                .invoke_external_system_command(Command::new("ping"))
                .unwrap()["reply"],
            "pong"
        );
        executive.stop();
    }

    // ── Slow and panicking adapters ─────────────────────────────────────────

    /// External system whose writes block for a long time and whose
    /// teardown is counted.
    struct Stubborn {
        teardowns: Arc<AtomicUsize>,
        block_for: Duration,
        panic_on_read: bool,
    }

    impl Adapter for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn connect(&mut self) -> Result<bool, AdapterError> {
            Ok(true)
        }
        fn disconnect(&mut self) {}
        fn operating_frequency(&self) -> u32 {
            50
        }
        fn teardown(&mut self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ExternalSystemAdapter for Stubborn {
        fn read_signal_data(&mut self, _buffer: &mut SignalBuffer) -> Result<(), AdapterError> {
            if self.panic_on_read {
                panic!("driver bug");
            }
            thread::sleep(self.block_for);
            Ok(())
        }
        fn write_signal_data(&mut self, _buffer: &SignalBuffer) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn stubborn_executive(
        teardowns: &Arc<AtomicUsize>,
        block_for: Duration,
        panic_on_read: bool,
        stop_grace_ms: u64,
    ) -> IntegrationExecutive {
        let mut config = fast_config();
        config.executive.stop_grace_ms = stop_grace_ms;
        let es = Stubborn {
            teardowns: Arc::clone(teardowns),
            block_for,
            panic_on_read,
        };
        let pm = SimProcessModel::new("model", 100, Vec::new());
        IntegrationExecutive::new(config, layout(), Box::new(es), Box::new(pm), SignalTransferPipeline::new())
            .unwrap()
    }

    #[test]
    fn stop_detaches_a_thread_stuck_in_the_adapter() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let mut executive = stubborn_executive(&teardowns, Duration::from_millis(400), false, 50);
        executive.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        executive.stop();
        assert!(started.elapsed() < Duration::from_millis(350));
        assert!(!executive.is_running());

        // Teardown still happens once the blocked call returns.
        assert!(eventually(|| teardowns.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn panicking_procedure_stops_only_its_own_thread() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let mut executive = stubborn_executive(&teardowns, Duration::ZERO, true, 2000);
        executive.start().unwrap();

        assert!(eventually(|| executive.external_system_snapshot().activity == Activity::Stopped));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(eventually(|| executive.process_model_snapshot().state == LinkState::Connected));

        // Commands for the dead side fail fast instead of timing out.
        assert_eq!(
            executive.invoke_external_system_command(Command::new("ping")),
            Err(BridgeError::NotRunning)
        );
        assert!(executive.invoke_process_model_command(Command::new("ping")).is_ok());
        executive.stop();
    }

    #[test]
    fn stop_is_idempotent_and_runs_on_drop() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        {
            let mut executive = stubborn_executive(&teardowns, Duration::ZERO, false, 2000);
            executive.start().unwrap();
            executive.stop();
            executive.stop();
        }
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);

        {
            let mut executive = stubborn_executive(&teardowns, Duration::ZERO, false, 2000);
            executive.start().unwrap();
        }
        assert_eq!(teardowns.load(Ordering::SeqCst), 2);
    }
}
