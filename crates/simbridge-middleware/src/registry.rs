//! [`StageRegistry`] – builds pipeline stages by kind name.
//!
//! The configuration names stages by kind (`"offset"`, `"factor"`, ...); the
//! registry maps each kind to a factory producing an unconfigured stage.
//! Applications with their own stages register extra factories before
//! building the pipeline.

use std::collections::{BTreeMap, HashMap};

use simbridge_types::{BridgeError, SignalLayout};

use crate::pipeline::{SignalTransferPipeline, TransferStage};
use crate::stages::{ClampStage, FactorStage, OffsetStage};

type StageFactory = Box<dyn Fn() -> Box<dyn TransferStage> + Send + Sync>;

/// One entry of a pipeline description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub kind: String,
    /// Instance id; defaults to `"<kind>-<sequence>"` when `None`.
    pub id: Option<String>,
    pub params: BTreeMap<String, String>,
}

/// Kind name → stage factory.
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl StageRegistry {
    /// A registry without any kinds.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry knowing `offset`, `factor` and `clamp`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("offset", || Box::new(OffsetStage::new()));
        registry.register("factor", || Box::new(FactorStage::new()));
        registry.register("clamp", || Box::new(ClampStage::new()));
        registry
    }

    /// Register `factory` under `kind`, replacing any previous factory.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn TransferStage> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// A fresh, unconfigured stage of `kind`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for an unregistered kind.
    pub fn build(&self, kind: &str) -> Result<Box<dyn TransferStage>, BridgeError> {
        self.factories
            .get(kind)
            .map(|factory| factory())
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "unknown stage kind '{kind}' (known: {})",
                    self.kinds().join(", ")
                ))
            })
    }

    /// Build and set up every stage in `specs`, in order.
    ///
    /// # Errors
    ///
    /// The first unknown kind or rejected setup.
    pub fn build_pipeline(
        &self,
        specs: &[StageSpec],
        layout: &SignalLayout,
    ) -> Result<SignalTransferPipeline, BridgeError> {
        let mut pipeline = SignalTransferPipeline::new();
        for (sequence, spec) in specs.iter().enumerate() {
            let stage = self.build(&spec.kind)?;
            let id = spec
                .id
                .clone()
                .unwrap_or_else(|| format!("{}-{sequence}", spec.kind));
            pipeline.add_stage(stage, &id, layout, &spec.params)?;
        }
        Ok(pipeline)
    }
}
