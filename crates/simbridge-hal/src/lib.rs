//! `simbridge-hal` – adapter contracts
//!
//! The boundary between the bridge and the two subsystems it connects.
//!
//! # Modules
//!
//! - [`adapter`] – the [`Adapter`][adapter::Adapter] lifecycle trait and its
//!   two specialisations, [`ExternalSystemAdapter`][adapter::ExternalSystemAdapter]
//!   and [`ProcessModelAdapter`][adapter::ProcessModelAdapter].
//! - [`sim`] – [`SimExternalSystem`][sim::SimExternalSystem] and
//!   [`SimProcessModel`][sim::SimProcessModel]: in-process stand-ins that let
//!   the whole bridge run without either subsystem present.

pub mod adapter;
pub mod sim;

pub use adapter::{Adapter, ExternalSystemAdapter, ProcessModelAdapter};
pub use sim::{SimExternalSystem, SimProcessModel};

// Adapters report failures in this type; re-exported so implementors only
// need this crate.
pub use simbridge_types::AdapterError;
