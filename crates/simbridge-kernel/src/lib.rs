//! `simbridge-kernel` – timing and synchronisation primitives
//!
//! The small, self-contained building blocks both procedures are made of.
//! Nothing in here talks to an adapter.
//!
//! # Modules
//!
//! - [`timeout`] – [`Timeout`][timeout::Timeout]: start time plus interval,
//!   with drift-compensated rescheduling; drives read polling, idle
//!   transfers and status refreshes.
//! - [`subdivider`] – [`FrequencySubdivider`][subdivider::FrequencySubdivider]:
//!   turns the process model's sim clock into step counts at the external
//!   system's frequency, handling day rollover and clock jumps.
//! - [`invoker`] – [`Invoker`][invoker::Invoker] and
//!   [`AsyncResult`][invoker::AsyncResult]: lets any thread run a closure on
//!   a procedure's own loop and wait for the outcome.
//! - [`mailbox`] – [`Mailbox`][mailbox::Mailbox]: the single lock-guarded
//!   exchange point between the two procedure threads.

pub mod invoker;
pub mod mailbox;
pub mod subdivider;
pub mod timeout;

pub use invoker::{AsyncResult, CommandInvoker, Invoker};
pub use mailbox::Mailbox;
pub use subdivider::{FrequencySubdivider, MAX_STEP_DELTA};
pub use timeout::Timeout;
