//! [`Mailbox`] – the only state shared between the two procedure threads.
//!
//! One mutex covers all four structures:
//!
//! | Structure | Producer | Consumer | Policy |
//! |---|---|---|---|
//! | to-PM slot | external-system procedure | process-model procedure | latest wins |
//! | to-ES slot | process-model procedure | external-system procedure | latest wins |
//! | command FIFO | process-model procedure | external-system procedure | strict FIFO |
//! | frame counter | process-model procedure | external-system procedure | monotonic |
//!
//! Every operation holds the lock only for a constant-time slot swap, queue
//! operation or counter update; adapters and pipeline stages are never
//! called with the lock held.  A slot holds at most one frame: putting a new
//! frame replaces the pending one and reports it as dropped.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use simbridge_types::{Command, Direction, Frame};

#[derive(Default)]
struct Inner {
    to_process_model: Option<Frame>,
    to_external_system: Option<Frame>,
    commands: VecDeque<Command>,
    frame: u64,
}

/// Lock-guarded exchange point between the two procedures.
#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<Inner>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Frame slots ─────────────────────────────────────────────────────────

    /// Store a frame for the process model.  Returns the number of pending
    /// frames it replaced (0 or 1).
    pub fn put_to_pm(&self, frame: Frame) -> u64 {
        self.put(Direction::ToProcessModel, frame)
    }

    /// Store a frame for the external system.  Returns the number of pending
    /// frames it replaced (0 or 1).
    pub fn put_to_es(&self, frame: Frame) -> u64 {
        self.put(Direction::ToExternalSystem, frame)
    }

    /// Take the pending frame for the process model, if any.
    pub fn take_to_pm(&self) -> Option<Frame> {
        self.lock().to_process_model.take()
    }

    /// Take the pending frame for the external system, if any.
    pub fn take_to_es(&self) -> Option<Frame> {
        self.lock().to_external_system.take()
    }

    pub fn has_pending_to_pm(&self) -> bool {
        self.lock().to_process_model.is_some()
    }

    pub fn has_pending_to_es(&self) -> bool {
        self.lock().to_external_system.is_some()
    }

    fn put(&self, direction: Direction, frame: Frame) -> u64 {
        let mut inner = self.lock();
        let slot = match direction {
            Direction::ToProcessModel => &mut inner.to_process_model,
            Direction::ToExternalSystem => &mut inner.to_external_system,
        };
        u64::from(slot.replace(frame).is_some())
    }

    // ── Commands ────────────────────────────────────────────────────────────

    pub fn push_command(&self, command: Command) {
        self.lock().commands.push_back(command);
    }

    /// Append a batch of commands in order under a single lock.
    pub fn push_commands(&self, commands: impl IntoIterator<Item = Command>) {
        let batch: Vec<Command> = commands.into_iter().collect();
        if batch.is_empty() {
            return;
        }
        self.lock().commands.extend(batch);
    }

    /// Pop the oldest pending command.
    pub fn pop_command(&self) -> Option<Command> {
        self.lock().commands.pop_front()
    }

    pub fn pending_commands(&self) -> usize {
        self.lock().commands.len()
    }

    // ── Frame counter ───────────────────────────────────────────────────────

    /// Advance the shared frame counter by `steps` (negative values are ignored).
    pub fn advance_frame(&self, steps: i64) {
        if let Ok(steps) = u64::try_from(steps)
            && steps > 0
        {
            let mut inner = self.lock();
            inner.frame = inner.frame.wrapping_add(steps);
        }
    }

    pub fn frame(&self) -> u64 {
        self.lock().frame
    }

    // ── Reset ───────────────────────────────────────────────────────────────

    /// Discard the pending to-PM frame.
    pub fn clear_to_pm(&self) {
        self.lock().to_process_model = None;
    }

    /// Discard both pending frames and every queued command.  The frame
    /// counter keeps counting.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.to_process_model = None;
        inner.to_external_system = None;
        inner.commands.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
