//! `simbridge-runtime` – the integration executive
//!
//! Runs the two transfer procedures that connect an external system (a real
//! or emulated controller) with a process model (a simulator), each on its
//! own thread, and exchanges signal frames between them through the kernel's
//! [`Mailbox`][simbridge_kernel::Mailbox].
//!
//! # Modules
//!
//! - [`config`] – [`BridgeConfig`][config::BridgeConfig]: executive and
//!   procedure settings, signal definitions and pipeline stages, loaded from
//!   TOML and validated in one place.
//! - [`procedure`] – the [`Procedure`][procedure::Procedure] trait both state
//!   machines implement, driven one non-blocking cycle at a time.
//! - [`es_procedure`] –
//!   [`ExternalSystemProcedure`][es_procedure::ExternalSystemProcedure]:
//!   polls the external system, forwards its data and the discrete commands
//!   queued by the process model, and steps synchronous systems.
//! - [`pm_procedure`] –
//!   [`ProcessModelProcedure`][pm_procedure::ProcessModelProcedure]:
//!   subdivides the sim clock into frames, pushes model outputs through the
//!   transfer pipeline and feeds external system data back in.
//! - [`executive`] –
//!   [`IntegrationExecutive`][executive::IntegrationExecutive]: owns both
//!   procedures, their threads, snapshots and control command routing.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod config;
pub mod es_procedure;
pub mod executive;
pub mod pm_procedure;
pub mod procedure;
pub mod telemetry;

pub use config::{
    BridgeConfig, ExecutiveConfig, ExternalSystemConfig, LogFormat, ParamValue, ProcessModelConfig,
    StageConfig,
};
pub use es_procedure::ExternalSystemProcedure;
pub use executive::{IntegrationExecutive, RECONNECT_COMMAND};
pub use pm_procedure::ProcessModelProcedure;
pub use procedure::Procedure;
pub use telemetry::{TracerProviderGuard, init_tracing};
