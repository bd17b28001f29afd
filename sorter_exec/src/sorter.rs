//! # Sorter
//!
//! Turns classification decisions from the vision service into arm sequences. Decisions are
//! throttled by a cooldown, ignored below a confidence threshold, and dropped while the arm is
//! busy: the arm works on one piece of fabric at a time and decisions are never queued.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::tc::Classification;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::arm_ctrl::{ArmCtrl, MotionError, SequenceReport, SequenceTask};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Sorter {
    arm: ArmCtrl,
    cooldown: Duration,
    confidence_threshold: f64,

    last_started: Option<Instant>,
    pending: Option<SequenceTask>,
    stats: SortStats,
}

/// Counters of what happened to each decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SortStats {
    pub sorted_defective: u64,
    pub sorted_good: u64,
    pub failed: u64,
    pub dropped_busy: u64,
    pub dropped_cooldown: u64,
    pub dropped_low_confidence: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What was done with a classification.
#[derive(Debug)]
pub enum Decision {
    /// A sequence was started.
    Started,

    /// A sequence was started too recently.
    Cooldown,

    /// The classification was not confident enough.
    LowConfidence,

    /// The arm was busy.
    Busy,

    /// The arm refused the sequence for another reason.
    Rejected(MotionError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Sorter {
    pub fn new(arm: ArmCtrl, cooldown: Duration, confidence_threshold: f64) -> Self {
        Self {
            arm,
            cooldown,
            confidence_threshold,
            last_started: None,
            pending: None,
            stats: SortStats::default(),
        }
    }

    /// Handle a classification from the vision service.
    pub fn on_classification(&mut self, classification: &Classification) -> Decision {
        self.poll();

        if let Some(confidence) = classification.confidence {
            if confidence < self.confidence_threshold {
                debug!(
                    "Ignoring classification with confidence {:.2} (threshold {:.2})",
                    confidence, self.confidence_threshold
                );
                self.stats.dropped_low_confidence += 1;
                return Decision::LowConfidence;
            }
        }

        if let Some(last) = self.last_started {
            if last.elapsed() < self.cooldown {
                debug!("Ignoring classification during the detection cooldown");
                self.stats.dropped_cooldown += 1;
                return Decision::Cooldown;
            }
        }

        self.start(classification.defective)
    }

    /// Start a sequence on operator request, skipping the cooldown and confidence checks.
    pub fn sort_now(&mut self, defective: bool) -> Decision {
        self.poll();
        self.start(defective)
    }

    /// Collect the result of the running sequence if it has finished.
    pub fn poll(&mut self) -> Option<Result<SequenceReport, MotionError>> {
        let finished = self
            .pending
            .as_ref()
            .map_or(false, SequenceTask::is_finished);

        if finished {
            self.collect()
        } else {
            None
        }
    }

    /// Block until the running sequence, if any, has finished.
    pub fn wait_idle(&mut self) -> Option<Result<SequenceReport, MotionError>> {
        self.collect()
    }

    pub fn is_sorting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stats(&self) -> SortStats {
        self.stats
    }

    fn start(&mut self, defective: bool) -> Decision {
        match self.arm.submit_handle(defective) {
            Ok(task) => {
                // A sequence which ended just before this one was admitted
                if self.pending.is_some() {
                    self.collect();
                }

                info!(
                    "Sorting {} fabric",
                    if defective { "defective" } else { "good" }
                );
                self.last_started = Some(Instant::now());
                self.pending = Some(task);
                Decision::Started
            }
            Err(MotionError::Busy) => {
                warn!("Robot busy, classification dropped");
                self.stats.dropped_busy += 1;
                Decision::Busy
            }
            Err(e) => {
                warn!("Arm refused the sequence: {}", e);
                Decision::Rejected(e)
            }
        }
    }

    fn collect(&mut self) -> Option<Result<SequenceReport, MotionError>> {
        let result = self.pending.take()?.wait();

        match &result {
            Ok(report) => {
                info!(
                    "Sequence completed in {:.2} s",
                    report.elapsed.as_secs_f64()
                );
                if report.defective {
                    self.stats.sorted_defective += 1;
                } else {
                    self.stats.sorted_good += 1;
                }
            }
            Err(MotionError::CancelledByEmergencyStop) => {
                warn!("Sequence cancelled by emergency stop");
                self.stats.failed += 1;
            }
            Err(e) => {
                error!("Sequence failed: {}", e);
                self.stats.failed += 1;
            }
        }

        Some(result)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::{ArmBackend, ArmCtrlParams};
    use std::thread;

    fn sim_arm(movement_delay_s: f64) -> ArmCtrl {
        let params = ArmCtrlParams {
            movement_steps: 5,
            movement_delay_s,
            settle_pause_s: 0.001,
            gripper_actuation_s: 0.001,
            sim_time_scale: 1.0,
            ..ArmCtrlParams::default()
        };
        let arm = ArmCtrl::new(params, ArmBackend::Simulation).unwrap();
        arm.initialize().unwrap();
        arm
    }

    fn classification(defective: bool, confidence: Option<f64>) -> Classification {
        Classification {
            defective,
            confidence,
        }
    }

    #[test]
    fn test_low_confidence_ignored() {
        let mut sorter = Sorter::new(sim_arm(0.001), Duration::from_secs(0), 0.6);

        assert!(matches!(
            sorter.on_classification(&classification(true, Some(0.4))),
            Decision::LowConfidence
        ));
        assert!(!sorter.is_sorting());

        assert!(matches!(
            sorter.on_classification(&classification(true, None)),
            Decision::Started
        ));
        assert!(sorter.wait_idle().unwrap().is_ok());
        assert_eq!(sorter.stats().sorted_defective, 1);
        assert_eq!(sorter.stats().dropped_low_confidence, 1);
    }

    #[test]
    fn test_cooldown() {
        let mut sorter = Sorter::new(sim_arm(0.001), Duration::from_secs(60), 0.0);

        assert!(matches!(
            sorter.on_classification(&classification(false, Some(0.9))),
            Decision::Started
        ));
        sorter.wait_idle();

        // The arm is free again but the cooldown has not expired
        assert!(matches!(
            sorter.on_classification(&classification(false, Some(0.9))),
            Decision::Cooldown
        ));

        // Operators are not subject to the cooldown
        assert!(matches!(sorter.sort_now(true), Decision::Started));
        sorter.wait_idle();

        let stats = sorter.stats();
        assert_eq!(stats.sorted_good, 1);
        assert_eq!(stats.sorted_defective, 1);
        assert_eq!(stats.dropped_cooldown, 1);
    }

    #[test]
    fn test_busy_drops_classification() {
        let mut sorter = Sorter::new(sim_arm(0.01), Duration::from_secs(0), 0.0);

        assert!(matches!(sorter.sort_now(false), Decision::Started));
        assert!(matches!(
            sorter.on_classification(&classification(true, Some(1.0))),
            Decision::Busy
        ));
        assert_eq!(sorter.stats().dropped_busy, 1);

        // The running sequence is collected once finished
        while sorter.poll().is_none() {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!sorter.is_sorting());
        assert_eq!(sorter.stats().sorted_good, 1);
    }
}
