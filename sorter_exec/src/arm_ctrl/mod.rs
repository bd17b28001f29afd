//! # Arm control module
//!
//! This module converts a classification decision into coordinated motion of the arm joints and
//! the gripper, while keeping a single consistent arm state that can be shared between the
//! automatic detection loop, operator commands and the emergency stop path.
//!
//! The module is layered, leaves first:
//!
//! - [`Actuator`] - a single joint or the gripper, simulated or a real servo.
//! - [`MotionProfile`] - the eased angle samples of a single joint move.
//! - [`move_joint`] and [`move_concurrently`] - playing profiles onto actuators, one thread per
//!   joint, joined at the end of each step.
//! - [`PositionTable`] - named arm presets.
//! - [`SequenceEngine`] - the pick, lift, transit, place and return sequence.
//! - [`ArmCtrl`] - the thread safe controller used by the rest of the executable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Single joint actuators (simulated and servo based).
pub mod actuator;

mod ctrl;
mod mover;
mod params;
mod position;
mod profile;
mod sequence;
mod stop;

#[cfg(test)]
mod testing;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use actuator::{Actuator, ActuatorError, ActuatorSet, SimActuator};
pub use ctrl::{ArmBackend, ArmCtrl, SequenceTask};
pub use mover::{
    move_concurrently, move_joint, move_joint_from, snap_joint, JointMove, JointOutcome,
    MoveStatus, MoveTiming, StepReport,
};
pub use params::{ArmCtrlParams, Pacing, ServoParams};
pub use position::{Position, PositionError, PositionTable};
pub use profile::{ease_in_out_quad, MotionProfile, ProfileIter, Sample};
pub use sequence::{
    plan, Action, PlannedStep, SeqOutcome, SeqStep, SequenceEngine, SequenceReport, StepRecord,
};
pub use stop::StopToken;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::tm::ArmMode;
use serde::Serialize;
use std::fmt;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Minimum commandable angle of any joint.
pub const MIN_ANGLE_DEG: f64 = 0.0;

/// Maximum commandable angle of any joint.
pub const MAX_ANGLE_DEG: f64 = 180.0;

/// Moves smaller than this are not performed.
pub const MIN_MOVE_DEG: f64 = 1.0;

/// Position name reported when the arm is not known to be at a preset.
pub const UNKNOWN_POSITION: &str = "unknown";

/// Name of the rest position.
pub const HOME: &str = "home";

/// Name of the position above the conveyor where fabric is picked up.
pub const PICKUP: &str = "pickup";

/// Name of the drop position for defective fabric.
pub const DEFECTIVE: &str = "defective";

/// Name of the drop position for good fabric.
pub const NON_DEFECTIVE: &str = "non_defective";

/// Presets every position table must contain.
pub const REQUIRED_POSITIONS: [&str; 4] = [HOME, PICKUP, DEFECTIVE, NON_DEFECTIVE];

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Identifier of a joint, equal to the channel it is driven on.
pub type JointId = u8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A fault on a single joint during a motion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointFault {
    pub joint: JointId,
    pub error: ActuatorError,
}

/// All joint faults seen during a motion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultReport {
    pub faults: Vec<JointFault>,

    /// The sequence step at which the sequence was aborted, if it was.
    pub aborted_at: Option<SeqStep>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors returned by the arm controller.
#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("The arm is busy")]
    Busy,

    #[error("The arm has not been initialised")]
    NotInitialized,

    #[error("No position named \"{0}\" exists")]
    UnknownPosition(String),

    #[error("One or more actuators faulted: {0}")]
    ActuatorFault(FaultReport),

    #[error("Actuator hardware is unavailable: {0}")]
    HardwareUnavailable(ActuatorError),

    #[error("The motion was cancelled by an emergency stop")]
    CancelledByEmergencyStop,

    #[error("Invalid arm parameters: {0}")]
    InvalidParams(String),

    #[error("Could not spawn the sequence thread: {0}")]
    TaskSpawn(std::io::Error),

    #[error("The sequence thread panicked")]
    TaskPanicked,
}

/// Events emitted by the controller to an optional listener.
#[derive(Debug, Clone, Serialize)]
pub enum ArmEvent {
    /// A sequence step is about to start.
    StepStarted(SeqStep),

    /// A sequence step has finished, all its movers have been joined.
    StepFinished {
        step: SeqStep,
        degraded: bool,
        elapsed_s: f64,
    },

    /// A joint faulted during a motion.
    JointFault(JointFault),

    /// The arm reached a named position.
    PositionReached(String),

    /// The gripper was commanded to a new angle.
    GripperMoved { angle_deg: f64 },

    /// The hardware backend failed and the controller fell back to simulation.
    HardwareUnavailable(ActuatorError),

    /// An emergency stop was issued.
    EmergencyStop,

    /// The controller changed mode.
    ModeChanged(ArmMode),

    /// A full sequence has finished, in whatever way.
    SequenceFinished(SequenceReport),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotionError {
    /// Returns true if the same command may succeed if retried shortly.
    pub fn is_retriable(&self) -> bool {
        matches!(self, MotionError::Busy)
    }
}

impl FaultReport {
    pub fn new(faults: Vec<JointFault>, aborted_at: Option<SeqStep>) -> Self {
        Self { faults, aborted_at }
    }

    /// Returns true if the given joint is in the report.
    pub fn contains_joint(&self, joint: JointId) -> bool {
        self.faults.iter().any(|f| f.joint == joint)
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let faults: Vec<String> = self
            .faults
            .iter()
            .map(|fault| fault.error.to_string())
            .collect();

        write!(f, "[{}]", faults.join("; "))?;

        if let Some(step) = self.aborted_at {
            write!(f, ", sequence aborted at {:?}", step)?;
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
