//! [`SignalTransferPipeline`] – ordered in-place transformation of frames.
//!
//! Every frame the process-model procedure moves passes through the
//! pipeline once, in one [`Direction`].  Stages run in registration order
//! and may rewrite any signal of the buffer in place; the buffer's length
//! never changes because stages only ever see it through
//! [`SignalBuffer`]'s fixed-size accessors.
//!
//! Stages are addressed from outside by their zero-based sequence number,
//! which is what [`StageInfo::sequence`] reports and what
//! [`invoke_stage_command`][SignalTransferPipeline::invoke_stage_command]
//! takes.

use std::collections::BTreeMap;

use simbridge_types::{
    BridgeError, Command, CommandReply, ControlCommandInfo, Direction, SignalBuffer,
    SignalLayout, SignalMetadata, StageInfo,
};
use tracing::{debug, warn};

/// One transformation step of the pipeline.
///
/// A stage is created unconfigured (usually by a
/// [`StageRegistry`][crate::registry::StageRegistry]) and receives its id,
/// the signal tables and its parameters exactly once through
/// [`setup`][Self::setup] before the first frame.
pub trait TransferStage: Send {
    /// Registry name of the stage type, e.g. `"offset"`.
    fn kind(&self) -> &str;

    /// Instance id given at setup.
    fn id(&self) -> &str;

    /// Configure the stage.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for missing, unknown or malformed parameters.
    fn setup(
        &mut self,
        id: &str,
        signals_to_pm: &[SignalMetadata],
        signals_to_es: &[SignalMetadata],
        params: &BTreeMap<String, String>,
    ) -> Result<(), BridgeError>;

    /// Transform `buffer` in place.  `direction` says which signal table the
    /// buffer was allocated from.
    fn process(&mut self, buffer: &mut SignalBuffer, direction: Direction) -> Result<(), BridgeError>;

    fn available_control_commands(&self) -> Vec<ControlCommandInfo> {
        Vec::new()
    }

    fn invoke_control_command(&mut self, command: &Command) -> Result<CommandReply, BridgeError> {
        Err(BridgeError::UnknownCommand(command.id().to_string()))
    }
}

/// Ordered list of configured [`TransferStage`]s.
#[derive(Default)]
pub struct SignalTransferPipeline {
    stages: Vec<Box<dyn TransferStage>>,
}

impl SignalTransferPipeline {
    /// An empty pipeline; frames pass through untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `stage` up against `layout` and append it.
    ///
    /// # Errors
    ///
    /// Whatever [`TransferStage::setup`] rejects; the stage is not added.
    pub fn add_stage(
        &mut self,
        mut stage: Box<dyn TransferStage>,
        id: &str,
        layout: &SignalLayout,
        params: &BTreeMap<String, String>,
    ) -> Result<usize, BridgeError> {
        stage.setup(
            id,
            layout.signals(Direction::ToProcessModel),
            layout.signals(Direction::ToExternalSystem),
            params,
        )?;
        debug!(stage = id, kind = stage.kind(), sequence = self.stages.len(), "pipeline stage added");
        self.stages.push(stage);
        Ok(self.stages.len() - 1)
    }

    /// Run every stage over `buffer` in order.
    ///
    /// The cursor is rewound before every stage and after the last.
    ///
    /// # Errors
    ///
    /// The first stage failure; later stages are skipped for this frame.
    pub fn process(&mut self, buffer: &mut SignalBuffer, direction: Direction) -> Result<(), BridgeError> {
        for stage in &mut self.stages {
            buffer.rewind();
            if let Err(e) = stage.process(buffer, direction) {
                warn!(stage = stage.id(), %direction, error = %e, "pipeline stage failed");
                buffer.rewind();
                return Err(e);
            }
        }
        buffer.rewind();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage at position `sequence`.
    pub fn stage_mut(&mut self, sequence: usize) -> Option<&mut (dyn TransferStage + 'static)> {
        self.stages.get_mut(sequence).map(Box::as_mut)
    }

    /// Forward a control command to the stage at `sequence`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownStage`] for an out-of-range sequence number,
    /// otherwise whatever the stage returns.
    pub fn invoke_stage_command(
        &mut self,
        sequence: usize,
        command: &Command,
    ) -> Result<CommandReply, BridgeError> {
        let stage = self
            .stage_mut(sequence)
            .ok_or(BridgeError::UnknownStage(sequence))?;
        stage.invoke_control_command(command)
    }

    /// Describe every stage in order.
    pub fn stage_infos(&self) -> Vec<StageInfo> {
        self.stages
            .iter()
            .enumerate()
            .map(|(sequence, stage)| StageInfo {
                sequence,
                id: stage.id().to_string(),
                kind: stage.kind().to_string(),
                commands: stage.available_control_commands(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_types::{ByteOrder, DataType, SignalDefinition};

    /// Appends its tag as a decimal digit to the first signal, so the result
    /// spells out the order in which stages ran.
    struct Tagger {
        id: String,
        tag: f64,
        signals: Vec<SignalMetadata>,
    }

    impl Tagger {
        fn boxed(tag: f64) -> Box<dyn TransferStage> {
            Box::new(Tagger {
                id: String::new(),
                tag,
                signals: Vec::new(),
            })
        }
    }

    impl TransferStage for Tagger {
        fn kind(&self) -> &str {
            "tagger"
        }
        fn id(&self) -> &str {
            &self.id
        }
        fn setup(
            &mut self,
            id: &str,
            _to_pm: &[SignalMetadata],
            to_es: &[SignalMetadata],
            _params: &BTreeMap<String, String>,
        ) -> Result<(), BridgeError> {
            self.id = id.to_string();
            self.signals = to_es.to_vec();
            Ok(())
        }
        fn process(&mut self, buffer: &mut SignalBuffer, _: Direction) -> Result<(), BridgeError> {
            assert_eq!(buffer.position(), 0);
            let previous = buffer.read_value(&self.signals[0], 0)?;
            buffer.write_value(&self.signals[0], 0, previous * 10.0 + self.tag)?;
            Ok(())
        }
    }

    struct Failing;

    impl TransferStage for Failing {
        fn kind(&self) -> &str {
            "failing"
        }
        fn id(&self) -> &str {
            "broken"
        }
        fn setup(
            &mut self,
            _: &str,
            _: &[SignalMetadata],
            _: &[SignalMetadata],
            params: &BTreeMap<String, String>,
        ) -> Result<(), BridgeError> {
            if params.contains_key("reject") {
                return Err(BridgeError::Config("rejected".into()));
            }
            Ok(())
        }
        fn process(&mut self, _: &mut SignalBuffer, _: Direction) -> Result<(), BridgeError> {
            Err(BridgeError::Execution("boom".into()))
        }
    }

    fn layout() -> SignalLayout {
        SignalLayout::build(vec![SignalDefinition::new(
            "x",
            DataType::Int32,
            Direction::ToExternalSystem,
        )])
        .unwrap()
    }

    #[test]
    fn stages_run_in_registration_order() {
        let layout = layout();
        let mut pipeline = SignalTransferPipeline::new();
        let empty = BTreeMap::new();
        assert_eq!(pipeline.add_stage(Tagger::boxed(1.0), "a", &layout, &empty), Ok(0));
        assert_eq!(pipeline.add_stage(Tagger::boxed(2.0), "b", &layout, &empty), Ok(1));

        let signals = layout.signals(Direction::ToExternalSystem);
        let mut buffer = SignalBuffer::allocate(signals, ByteOrder::Big);
        pipeline.process(&mut buffer, Direction::ToExternalSystem).unwrap();

        // ((0 * 10) + 1) * 10 + 2
        assert_eq!(buffer.read_value(&signals[0], 0).unwrap(), 12.0);
        assert_eq!(buffer.position(), 0);
    }

    #[test]
    fn empty_pipeline_is_identity() {
        let layout = layout();
        let signals = layout.signals(Direction::ToExternalSystem);
        let mut buffer = SignalBuffer::allocate(signals, ByteOrder::Little);
        buffer.write_value(&signals[0], 0, 42.0).unwrap();
        let before = buffer.clone();

        SignalTransferPipeline::new()
            .process(&mut buffer, Direction::ToExternalSystem)
            .unwrap();
        assert_eq!(buffer, before);
    }

    #[test]
    fn failed_setup_does_not_add_stage() {
        let mut pipeline = SignalTransferPipeline::new();
        let params = BTreeMap::from([("reject".to_string(), "yes".to_string())]);
        assert!(matches!(
            pipeline.add_stage(Box::new(Failing), "f", &layout(), &params),
            Err(BridgeError::Config(_))
        ));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn stage_failure_is_reported() {
        let layout = layout();
        let mut pipeline = SignalTransferPipeline::new();
        pipeline
            .add_stage(Box::new(Failing), "f", &layout, &BTreeMap::new())
            .unwrap();
        let mut buffer =
            SignalBuffer::allocate(layout.signals(Direction::ToExternalSystem), ByteOrder::Big);
        assert_eq!(
            pipeline.process(&mut buffer, Direction::ToExternalSystem),
            Err(BridgeError::Execution("boom".into()))
        );
    }

    #[test]
    fn stage_commands_are_addressed_by_sequence() {
        let layout = layout();
        let mut pipeline = SignalTransferPipeline::new();
        pipeline
            .add_stage(Tagger::boxed(1.0), "only", &layout, &BTreeMap::new())
            .unwrap();

        assert_eq!(
            pipeline.invoke_stage_command(3, &Command::new("get")),
            Err(BridgeError::UnknownStage(3))
        );
        assert_eq!(
            pipeline.invoke_stage_command(0, &Command::new("get")),
            Err(BridgeError::UnknownCommand("get".into()))
        );

        let infos = pipeline.stage_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].sequence, 0);
        assert_eq!(infos[0].id, "only");
        assert_eq!(infos[0].kind, "tagger");
        assert_eq!(pipeline.stage_mut(0).map(|s| s.id().to_string()), Some("only".into()));
    }
}
