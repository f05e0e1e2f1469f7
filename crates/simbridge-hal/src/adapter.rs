//! Adapter traits – the capability objects the procedures drive.
//!
//! The bridge never speaks a concrete protocol.  Each subsystem is reached
//! through an adapter that implements [`ExternalSystemAdapter`] or
//! [`ProcessModelAdapter`]; both share the lifecycle and control-command
//! surface of [`Adapter`].
//!
//! # Threading
//!
//! An adapter is owned by exactly one procedure and only ever called from
//! that procedure's thread, so implementations need `Send` but not `Sync`.
//! Calls from other threads are queued on the procedure's invoker and run
//! by its loop.
//!
//! # Failure classes
//!
//! Every fallible call returns an [`AdapterError`]:
//!
//! | Variant | Meaning | Procedure reaction |
//! |---|---|---|
//! | [`AdapterError::Io`] | the connection is broken | disconnect, retry (or error state) |
//! | [`AdapterError::Rejected`] | this one call failed | count, continue |
//! | [`AdapterError::Unsupported`] | capability not offered | count, continue |

use simbridge_types::{
    AdapterError, Command, CommandReply, ControlCommandInfo, SignalBuffer, SimTime,
};

/// Lifecycle and control surface shared by both adapter kinds.
pub trait Adapter: Send {
    /// Human-readable adapter name used in logs.
    fn name(&self) -> &str;

    /// Try to establish the connection.
    ///
    /// `Ok(false)` means "not yet, try again later"; an
    /// [`AdapterError::Io`] means the attempt failed hard.
    fn connect(&mut self) -> Result<bool, AdapterError>;

    /// Drop the connection.  Must be safe to call when not connected.
    fn disconnect(&mut self);

    /// Frequency in Hz at which this subsystem produces and consumes frames.
    fn operating_frequency(&self) -> u32;

    /// Adapter-specific state text, or `None` if the adapter does not report
    /// one.
    fn state(&self) -> Option<String> {
        None
    }

    /// Adapter-specific status text, or `None` if the adapter does not report
    /// one.
    fn status(&self) -> Option<String> {
        None
    }

    /// Control commands accepted by [`invoke_control_command`][Self::invoke_control_command].
    fn available_control_commands(&self) -> Vec<ControlCommandInfo> {
        Vec::new()
    }

    /// Execute a control command and return its result parameters.
    fn invoke_control_command(&mut self, command: &Command) -> Result<CommandReply, AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "control command '{}'",
            command.id()
        )))
    }

    /// Release every resource.  Called once when the executive stops, after
    /// [`disconnect`][Self::disconnect].
    fn teardown(&mut self) {}
}

/// Adapter for the external (physical or emulated) control system.
pub trait ExternalSystemAdapter: Adapter {
    /// Fill `buffer` with the current to-process-model signal values.
    fn read_signal_data(&mut self, buffer: &mut SignalBuffer) -> Result<(), AdapterError>;

    /// Deliver the to-external-system signal values in `buffer`.
    fn write_signal_data(&mut self, buffer: &SignalBuffer) -> Result<(), AdapterError>;

    /// `true` if the external clock must be advanced explicitly through
    /// [`time_step_control`][Self::time_step_control], once per frame.
    fn is_synchronous(&self) -> bool {
        false
    }

    /// Advance the external clock by one frame.
    fn time_step_control(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// `true` if [`execute_sim_command`][Self::execute_sim_command] is
    /// supported.
    fn accepts_sim_commands(&self) -> bool {
        false
    }

    /// Execute a command emitted by the process model.
    fn execute_sim_command(&mut self, command: &Command) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "simulator command '{}'",
            command.id()
        )))
    }
}

/// Adapter for the simulation engine.
pub trait ProcessModelAdapter: Adapter {
    /// Fill `buffer` with the current to-external-system signal values.
    fn read_signal_data(&mut self, buffer: &mut SignalBuffer) -> Result<(), AdapterError>;

    /// Deliver to-process-model values produced at `origin`.
    fn write_signal_data(
        &mut self,
        buffer: &SignalBuffer,
        origin: &SimTime,
    ) -> Result<(), AdapterError>;

    /// Current simulation time of the model.
    fn sim_time(&mut self) -> Result<SimTime, AdapterError>;

    /// Commands the model emitted since the previous call.
    fn read_sim_commands(&mut self) -> Result<Vec<Command>, AdapterError> {
        Ok(Vec::new())
    }
}
