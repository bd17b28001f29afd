//! # Communications interface crate.
//!
//! Provides the interface types shared between the arm controller, the sorter executable and any
//! external operator or vision process.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Telecommands, i.e. instructions sent to the sorter.
pub mod tc;

/// Telemetry, i.e. status reported by the sorter.
pub mod tm;
