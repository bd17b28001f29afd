//! # Sorter library.
//!
//! This library allows other crates in the workspace (and the tests) to access items defined
//! inside the sorter crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arm control - converts classification decisions into coordinated arm and gripper motion
pub mod arm_ctrl;

/// Hardware backend - builds the servo actuators when the driver board is available
pub mod hardware;

/// Parameters for the sorter executable
pub mod params;

/// Sorter - throttles classification decisions into arm sequences
pub mod sorter;
