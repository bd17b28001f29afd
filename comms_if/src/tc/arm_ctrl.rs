//! # Arm control telecommands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A manual command for the arm, issued by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, StructOpt)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ArmCmd {
    /// Run the pick and place sequence for one piece of fabric.
    #[structopt(name = "sort")]
    Sort {
        /// Place the piece in the defective bin rather than the good one.
        #[structopt(long)]
        #[serde(default)]
        defective: bool,
    },

    /// Move the arm to a named position from the position table.
    #[structopt(name = "goto")]
    Goto {
        /// Name of the position, for example `home` or `pickup`.
        position: String,
    },

    /// Move the arm to the home position.
    #[structopt(name = "home")]
    Home,

    /// Open the gripper.
    #[structopt(name = "open")]
    GripperOpen,

    /// Close the gripper.
    #[structopt(name = "close")]
    GripperClose,

    /// Emergency stop, holding every joint at its current angle.
    #[structopt(name = "stop")]
    Stop,

    /// Report the arm status.
    #[structopt(name = "status")]
    Status,
}
