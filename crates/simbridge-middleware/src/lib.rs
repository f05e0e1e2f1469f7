//! `simbridge-middleware` – the signal transfer pipeline
//!
//! Transforms frames on their way between the two subsystems without caring
//! where they come from or go to.
//!
//! # Modules
//!
//! - [`pipeline`] – [`SignalTransferPipeline`][pipeline::SignalTransferPipeline]
//!   and the [`TransferStage`][pipeline::TransferStage] trait: ordered,
//!   in-place, sequence-addressable stages.
//! - [`stages`] – the built-in `offset`, `factor` and `clamp` stages.
//! - [`registry`] – [`StageRegistry`][registry::StageRegistry]: builds stages
//!   by kind name and assembles pipelines from configuration.

pub mod pipeline;
pub mod registry;
pub mod stages;

pub use pipeline::{SignalTransferPipeline, TransferStage};
pub use registry::{StageRegistry, StageSpec};
pub use stages::{ClampStage, ElementOp, ElementwiseStage, FactorStage, OffsetStage};
