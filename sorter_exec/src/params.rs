//! # Sorter Executable Parameters
//!
//! This module provides parameters for the sorter executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use util::time::seconds_to_std;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterExecParams {
    /// Target period of one main loop cycle.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Minimum time between two sequences started by classifications.
    ///
    /// Units: seconds
    pub detection_cooldown_s: f64,

    /// Classifications with a confidence below this are ignored. Classifications without a
    /// confidence are always accepted.
    pub confidence_threshold: f64,

    /// Never try to open the arm hardware.
    pub force_simulation: bool,

    /// Period at which the arm status is saved into the session, zero disables saving.
    ///
    /// Units: seconds
    pub status_save_period_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SorterExecParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.1,
            detection_cooldown_s: 5.0,
            confidence_threshold: 0.5,
            force_simulation: false,
            status_save_period_s: 10.0,
        }
    }
}

impl SorterExecParams {
    pub fn cycle_period(&self) -> Duration {
        seconds_to_std(self.cycle_period_s)
    }

    pub fn detection_cooldown(&self) -> Duration {
        seconds_to_std(self.detection_cooldown_s)
    }

    /// Status save period, `None` if saving is disabled.
    pub fn status_save_period(&self) -> Option<Duration> {
        match seconds_to_std(self.status_save_period_s) {
            d if d == Duration::from_secs(0) => None,
            d => Some(d),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
