//! # Telecommand module
//!
//! This module provides telecommand functionality to the communications 
//! interface.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod arm_ctrl;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Serialize, Deserialize};
use structopt::StructOpt;
use thiserror::Error;

// Internal
use self::arm_ctrl::ArmCmd;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A classification decision made by the vision service for one inspection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// True if the piece of fabric contains a defect.
    pub defective: bool,

    /// Confidence of the decision in the range `[0, 1]`, if the vision service provides one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the sorter.
///
/// In JSON telecommands are represented as `{"type": "...", "payload": ...}`, for example
/// `{"type": "CLASSIFICATION", "payload": {"defective": true, "confidence": 0.8}}` or
/// `{"type": "ARM", "payload": {"cmd": "goto", "position": "home"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tc {
    /// Keep-alive with no effect.
    Heartbeat,

    /// Classification decision from the vision service.
    Classification(Classification),

    /// Operator command for the arm.
    Arm(ArmCmd),
}

/// Possible parsing errors.
#[derive(Debug, Error)]
pub enum TcParseError {
    #[error("TC contains invalid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Invalid operator command: {0}")]
    InvalidCommand(String),

    #[error("The command line is empty")]
    Empty,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {

    /// Parse a new TC from a JSON packet
    pub fn from_json(json_str: &str) -> Result<Self, TcParseError> {
        serde_json::from_str(json_str).map_err(TcParseError::InvalidJson)
    }

    /// Parse a TC from a line typed by an operator.
    ///
    /// Lines starting with `{` are parsed as JSON, anything else is parsed as an arm command,
    /// for example `goto pickup` or `sort --defective`.
    pub fn from_operator_line(line: &str) -> Result<Self, TcParseError> {
        let line = line.trim();

        if line.is_empty() {
            return Err(TcParseError::Empty)
        }

        if line.starts_with('{') {
            return Self::from_json(line)
        }

        ArmCmd::from_iter_safe(std::iter::once("arm").chain(line.split_whitespace()))
            .map(Tc::Arm)
            .map_err(|e| TcParseError::InvalidCommand(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
