//! [`AsyncResult`] and [`Invoker`] – run work on a procedure's own thread.
//!
//! Adapters are single-threaded: only the procedure loop that owns one may
//! call into it.  Other threads (status handlers, the CLI) that need to
//! invoke a control command [`schedule`][Invoker::schedule] a closure
//! instead.  The owning loop calls [`drain_one`][Invoker::drain_one] once per
//! cycle, which executes the oldest closure against the procedure and
//! completes its [`AsyncResult`].  The scheduling thread blocks on that
//! result.
//!
//! ```text
//! caller thread                     procedure thread
//!     | schedule(work) ──► queue ──►  drain_one(&mut procedure)
//!     | result.get_timeout(..)            work(&mut procedure)
//!     |◄──────────── set_value / set_error
//! ```
//!
//! Queue entries own their result handle; a result is never lost because
//! the caller dropped its copy.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use simbridge_types::{BridgeError, CommandReply};
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// AsyncResult
// ────────────────────────────────────────────────────────────────────────────

enum Slot<T> {
    Pending,
    Value(T),
    Error(BridgeError),
    Cancelled,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Single-assignment future.
///
/// Exactly one terminal state (value, error, cancelled) is ever reached;
/// later completions are ignored.  Clones share the same cell.
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.lock() {
            Slot::Pending => "pending",
            Slot::Value(_) => "value",
            Slot::Error(_) => "error",
            Slot::Cancelled => "cancelled",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

impl<T> AsyncResult<T> {
    /// A new pending result.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// Complete with a value.  Returns `false` if already terminal.
    pub fn set_value(&self, value: T) -> bool {
        self.complete(Slot::Value(value))
    }

    /// Complete with an error.  Returns `false` if already terminal.
    pub fn set_error(&self, error: BridgeError) -> bool {
        self.complete(Slot::Error(error))
    }

    /// Cancel while still pending, waking every waiter.
    ///
    /// Has no effect on work that a drain already picked up.
    pub fn cancel(&self) -> bool {
        self.complete(Slot::Cancelled)
    }

    /// `true` once any terminal state has been reached.
    pub fn is_done(&self) -> bool {
        !matches!(*self.lock(), Slot::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.lock(), Slot::Cancelled)
    }

    fn complete(&self, terminal: Slot<T>) -> bool {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        *slot = terminal;
        drop(slot);
        self.shared.ready.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> AsyncResult<T> {
    /// Block until a terminal state is reached.
    ///
    /// # Errors
    ///
    /// The stored error, or [`BridgeError::Cancelled`].
    pub fn get(&self) -> Result<T, BridgeError> {
        let mut slot = self.lock();
        while matches!(*slot, Slot::Pending) {
            slot = self
                .shared
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Self::resolve(&slot)
    }

    /// Like [`get`][Self::get] but gives up after `timeout`.
    ///
    /// Timing out leaves the result (and the scheduled work) untouched.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Timeout`] when nothing completed in time, otherwise as
    /// [`get`][Self::get].
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, BridgeError> {
        let slot = self.lock();
        let (slot, _) = self
            .shared
            .ready
            .wait_timeout_while(slot, timeout, |s| matches!(s, Slot::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(*slot, Slot::Pending) {
            return Err(BridgeError::Timeout(timeout.as_millis() as u64));
        }
        Self::resolve(&slot)
    }

    fn resolve(slot: &Slot<T>) -> Result<T, BridgeError> {
        match slot {
            Slot::Value(v) => Ok(v.clone()),
            Slot::Error(e) => Err(e.clone()),
            Slot::Cancelled => Err(BridgeError::Cancelled),
            Slot::Pending => unreachable!("resolve is only called on terminal slots"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Invoker
// ────────────────────────────────────────────────────────────────────────────

type Work<T, R> = Box<dyn FnOnce(&mut T) -> Result<R, BridgeError> + Send>;

struct Job<T, R> {
    work: Work<T, R>,
    result: AsyncResult<R>,
}

/// Many-producer, single-consumer FIFO of work items targeting a `T`.
///
/// Clones share one queue.  Any clone may [`schedule`][Self::schedule]; only
/// the thread that owns the target may [`drain_one`][Self::drain_one].
pub struct Invoker<T, R = CommandReply> {
    tx: Sender<Job<T, R>>,
    rx: Receiver<Job<T, R>>,
}

/// Invoker for control commands that reply with result parameters.
pub type CommandInvoker<T> = Invoker<T, CommandReply>;

impl<T, R> Clone for Invoker<T, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T, R> Default for Invoker<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R> Invoker<T, R> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Queue `work` for execution on the owner's thread.  Never blocks.
    pub fn schedule<F>(&self, work: F) -> AsyncResult<R>
    where
        F: FnOnce(&mut T) -> Result<R, BridgeError> + Send + 'static,
    {
        let result = AsyncResult::new();
        let job = Job {
            work: Box::new(work),
            result: result.clone(),
        };
        if let Err(returned) = self.tx.send(job) {
            // Unreachable while `self` holds a receiver, kept for completeness.
            returned
                .0
                .result
                .set_error(BridgeError::Execution("invoker queue closed".to_string()));
        }
        result
    }

    /// Execute the oldest queued work item against `target`.
    ///
    /// Entries cancelled before they reached the head are discarded without
    /// running.  Returns `true` when a work item executed.
    pub fn drain_one(&self, target: &mut T) -> bool {
        while let Ok(job) = self.rx.try_recv() {
            if job.result.is_done() {
                debug!("discarding cancelled invocation");
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (job.work)(target)));
            match outcome {
                Ok(Ok(value)) => {
                    job.result.set_value(value);
                }
                Ok(Err(err)) => {
                    job.result.set_error(err);
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    warn!(panic = %msg, "scheduled invocation panicked");
                    job.result
                        .set_error(BridgeError::Execution(format!("invocation panicked: {msg}")));
                }
            }
            return true;
        }
        false
    }

    /// Number of queued (not yet drained) entries, cancelled ones included.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Cancel every queued entry without running it.  Used when the owning
    /// loop exits so that waiters wake up instead of timing out.
    pub fn cancel_pending(&self) -> usize {
        let mut cancelled = 0;
        while let Ok(job) = self.rx.try_recv() {
            if job.result.cancel() {
                cancelled += 1;
            }
        }
        cancelled
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn value_is_single_assignment() {
        let r: AsyncResult<u32> = AsyncResult::new();
        assert!(!r.is_done());
        assert!(r.set_value(1));
        assert!(!r.set_value(2));
        assert!(!r.set_error(BridgeError::Execution("late".into())));
        assert!(!r.cancel());
        assert_eq!(r.get(), Ok(1));
    }

    #[test]
    fn error_is_returned_from_get() {
        let r: AsyncResult<u32> = AsyncResult::new();
        r.set_error(BridgeError::Rejected("busy".into()));
        assert_eq!(r.get(), Err(BridgeError::Rejected("busy".into())));
    }

    #[test]
    fn cancel_only_while_pending() {
        let r: AsyncResult<u32> = AsyncResult::new();
        assert!(r.cancel());
        assert!(r.is_cancelled());
        assert_eq!(r.get(), Err(BridgeError::Cancelled));
        assert!(!r.set_value(5));
    }

    #[test]
    fn get_timeout_does_not_change_state() {
        let r: AsyncResult<u32> = AsyncResult::new();
        assert_eq!(
            r.get_timeout(Duration::from_millis(10)),
            Err(BridgeError::Timeout(10))
        );
        assert!(!r.is_done());
        r.set_value(9);
        assert_eq!(r.get_timeout(Duration::from_millis(10)), Ok(9));
    }

    #[test]
    fn waiter_is_woken_from_another_thread() {
        let r: AsyncResult<String> = AsyncResult::new();
        let producer = r.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set_value("done".to_string());
        });
        assert_eq!(r.get_timeout(Duration::from_secs(5)), Ok("done".to_string()));
        handle.join().unwrap();
    }

    #[test]
    fn cancel_wakes_blocked_waiter() {
        let r: AsyncResult<u32> = AsyncResult::new();
        let waiter = r.clone();
        let handle = thread::spawn(move || waiter.get());
        thread::sleep(Duration::from_millis(20));
        r.cancel();
        assert_eq!(handle.join().unwrap(), Err(BridgeError::Cancelled));
    }

    #[test]
    fn schedule_does_not_execute_until_drained() {
        let invoker: Invoker<Vec<u32>, ()> = Invoker::new();
        let result = invoker.schedule(|log| {
            log.push(1);
            Ok(())
        });
        assert!(!result.is_done());
        assert_eq!(invoker.pending(), 1);

        let mut log = Vec::new();
        assert!(invoker.drain_one(&mut log));
        assert!(result.is_done());
        assert_eq!(log, vec![1]);
    }

    #[test]
    fn drain_one_executes_exactly_one_in_fifo_order() {
        let invoker: Invoker<Vec<u32>, u32> = Invoker::new();
        let results: Vec<_> = (1..=3)
            .map(|n| {
                invoker.schedule(move |log| {
                    log.push(n);
                    Ok(n * 10)
                })
            })
            .collect();

        let mut log = Vec::new();
        assert!(invoker.drain_one(&mut log));
        assert_eq!(log, vec![1]);
        assert!(results[0].is_done());
        assert!(!results[1].is_done());
        assert!(!results[2].is_done());

        assert!(invoker.drain_one(&mut log));
        assert!(invoker.drain_one(&mut log));
        assert!(!invoker.drain_one(&mut log));
        assert_eq!(log, vec![1, 2, 3]);
        let values: Vec<u32> = results.iter().map(|r| r.get().unwrap()).collect();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[test]
    fn drain_on_empty_queue_is_noop() {
        let invoker: Invoker<u32, ()> = Invoker::new();
        let mut target = 0;
        assert!(!invoker.drain_one(&mut target));
    }

    #[test]
    fn work_error_reaches_the_caller() {
        let invoker: Invoker<(), ()> = Invoker::new();
        let result = invoker.schedule(|_| Err(BridgeError::UnknownCommand("warp".into())));
        invoker.drain_one(&mut ());
        assert_eq!(result.get(), Err(BridgeError::UnknownCommand("warp".into())));
    }

    #[test]
    fn cancelled_entry_is_skipped() {
        let invoker: Invoker<Vec<u32>, ()> = Invoker::new();
        let first = invoker.schedule(|log| {
            log.push(1);
            Ok(())
        });
        let second = invoker.schedule(|log| {
            log.push(2);
            Ok(())
        });
        assert!(first.cancel());

        let mut log = Vec::new();
        assert!(invoker.drain_one(&mut log));
        assert_eq!(log, vec![2]);
        assert!(second.is_done());
        assert_eq!(first.get(), Err(BridgeError::Cancelled));
    }

    #[test]
    fn panicking_work_is_reported_as_execution_error() {
        let invoker: Invoker<(), ()> = Invoker::new();
        let result = invoker.schedule(|_| panic!("adapter exploded"));
        assert!(invoker.drain_one(&mut ()));
        match result.get() {
            Err(BridgeError::Execution(msg)) => assert!(msg.contains("adapter exploded")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn cancel_pending_releases_waiters() {
        let invoker: Invoker<(), ()> = Invoker::new();
        let first = invoker.schedule(|_| Ok(()));
        let second = invoker.schedule(|_| Ok(()));
        second.cancel();

        assert_eq!(invoker.cancel_pending(), 1);
        assert_eq!(invoker.pending(), 0);
        assert_eq!(first.get(), Err(BridgeError::Cancelled));
        assert!(!invoker.drain_one(&mut ()));
    }

    #[test]
    fn result_survives_caller_dropping_its_handle() {
        let invoker: Invoker<Vec<u32>, ()> = Invoker::new();
        drop(invoker.schedule(|log| {
            log.push(7);
            Ok(())
        }));
        let mut log = Vec::new();
        assert!(invoker.drain_one(&mut log));
        assert_eq!(log, vec![7]);
    }

    #[test]
    fn schedule_from_many_threads() {
        let invoker: Invoker<Vec<u32>, ()> = Invoker::new();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let inv = invoker.clone();
                thread::spawn(move || {
                    inv.schedule(move |log| {
                        log.push(n);
                        Ok(())
                    })
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut log = Vec::new();
        while invoker.drain_one(&mut log) {}
        log.sort_unstable();
        assert_eq!(log, vec![0, 1, 2, 3]);
        assert!(results.iter().all(AsyncResult::is_done));
    }
}
