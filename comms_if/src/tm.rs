//! # Arm telemetry

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Gripper angles below this are considered open.
pub const GRIPPER_OPEN_THRESHOLD_DEG: f64 = 90.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Snapshot of the arm controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStatus {
    /// The arm is initialised, not faulted, and not running a command.
    pub ready: bool,

    /// A command is currently running.
    pub busy: bool,

    /// Motion is simulated rather than sent to hardware.
    pub simulation: bool,

    /// Admission control mode of the controller.
    pub mode: ArmMode,

    /// Name of the position the arm is at, or `"unknown"`.
    pub position: String,

    /// Time at which the last command finished.
    pub last_action: Option<DateTime<Utc>>,

    /// State of the gripper, derived from the last commanded gripper angle.
    pub gripper: GripperState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Admission control mode of the arm controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArmMode {
    Uninitialized,
    Ready,
    Busy,
    Faulted,
}

/// Open/closed state of the gripper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperState {
    Open,
    Closed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GripperState {
    /// Derive the gripper state from a gripper angle.
    pub fn from_angle(angle_deg: f64) -> Self {
        if angle_deg < GRIPPER_OPEN_THRESHOLD_DEG {
            GripperState::Open
        } else {
            GripperState::Closed
        }
    }
}

impl std::fmt::Display for GripperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GripperState::Open => write!(f, "open"),
            GripperState::Closed => write!(f, "closed"),
        }
    }
}
