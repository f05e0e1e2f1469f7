//! The [`Procedure`] trait – what the executive's worker loop drives.
//!
//! Both procedures are plain state machines: [`run_once`][Procedure::run_once]
//! performs exactly one cycle and returns, never sleeping.  Timing, snapshot
//! publication, command draining and shutdown are the worker loop's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use simbridge_kernel::CommandInvoker;
use simbridge_types::{
    Activity, LinkState, ProcedureSnapshot, Side, StatusCode, TransferStatistics, NOT_AVAILABLE,
};
use tracing::info;

/// A clocked state machine owning one adapter.
pub trait Procedure: Send + Sized + 'static {
    fn side(&self) -> Side;

    /// Advance by one cycle.  `now_ms` is wall-clock epoch milliseconds.
    fn run_once(&mut self, now_ms: i64);

    /// Queue through which other threads reach this procedure.
    fn invoker(&self) -> CommandInvoker<Self>;

    /// Flag other threads set to request a reconnect.
    fn reconnect_flag(&self) -> Arc<AtomicBool>;

    /// Upper bound of one loop iteration, used for the idle park.
    fn cycle_budget(&self) -> Duration;

    fn snapshot(&self) -> ProcedureSnapshot;

    /// Force a disconnect and tear the adapter down.  Idempotent.
    fn shutdown(&mut self);
}

/// A fifth of the adapter's frame period, never below one millisecond.
pub(crate) fn budget_for(frequency_hz: u32) -> Duration {
    let period_micros = 1_000_000 / u64::from(frequency_hz.max(1));
    Duration::from_micros((period_micros / 5).max(1_000))
}

/// Status bookkeeping shared by both procedures.
#[derive(Debug, Clone)]
pub(crate) struct Health {
    side: Side,
    pub status: StatusCode,
    pub message: Option<String>,
    pub activity: Activity,
    pub statistics: TransferStatistics,
    pub cycles: u64,
    reconnect: Arc<AtomicBool>,
}

impl Health {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            status: StatusCode::Unknown,
            message: None,
            activity: Activity::Connecting,
            statistics: TransferStatistics::default(),
            cycles: 0,
            reconnect: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn ok(&mut self) {
        self.status = StatusCode::Ok;
        self.message = None;
    }

    pub fn nok(&mut self, message: impl Into<String>) {
        self.status = StatusCode::Nok;
        self.message = Some(message.into());
    }

    pub fn reconnect_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reconnect)
    }

    pub fn reconnect_requested(&self) -> bool {
        self.reconnect.load(Ordering::Acquire)
    }

    pub fn request_reconnect(&self) {
        self.reconnect.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take_reconnect(&self) -> bool {
        self.reconnect.swap(false, Ordering::AcqRel)
    }

    pub fn transition(&self, from: LinkState, to: LinkState) {
        if from != to {
            info!(side = %self.side, %from, %to, "link state changed");
        }
    }

    pub fn snapshot(
        &self,
        state: LinkState,
        adapter_state: Option<String>,
        adapter_status: Option<String>,
    ) -> ProcedureSnapshot {
        ProcedureSnapshot {
            side: self.side,
            state,
            status: self.status,
            status_message: self.message.clone(),
            activity: self.activity,
            adapter_state: adapter_state.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            adapter_status: adapter_status.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            statistics: self.statistics,
            cycles: self.cycles,
            refreshed_at: chrono::Utc::now(),
        }
    }
}
