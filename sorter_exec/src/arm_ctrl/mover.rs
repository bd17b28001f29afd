//! # Joint mover
//!
//! Plays motion profiles onto actuators. Each move of a step runs on its own thread and the step
//! only finishes once every mover has been joined, whether it completed, was cancelled or
//! faulted.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use serde::Serialize;
use std::{
    thread,
    time::{Duration, Instant},
};

use super::{Actuator, ActuatorError, JointFault, JointId, MotionProfile, StopToken};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Interpolation settings of a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveTiming {
    pub steps: usize,
    pub step_delay: Duration,
}

/// A single joint move to be run as part of a step.
#[derive(Clone, Copy)]
pub struct JointMove<'a> {
    pub actuator: &'a dyn Actuator,
    pub target_deg: f64,

    /// Explicit start angle, if `None` the actuator's current angle is used.
    pub start_deg: Option<f64>,
}

/// The result of one joint's move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointOutcome {
    pub joint: JointId,
    pub target_deg: f64,

    /// The last angle successfully written during the move, if any.
    pub last_angle_deg: Option<f64>,

    pub result: Result<MoveStatus, ActuatorError>,
}

/// The joined outcomes of all the moves of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepReport {
    pub outcomes: Vec<JointOutcome>,
    pub elapsed: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoveStatus {
    Completed,
    Cancelled,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Move a joint from its current angle to `target_deg`.
///
/// A joint whose angle is unknown is assumed to be at 0 degrees.
pub fn move_joint(
    actuator: &dyn Actuator,
    target_deg: f64,
    timing: &MoveTiming,
    stop: &StopToken,
) -> JointOutcome {
    let start_deg = match actuator.get_angle() {
        Ok(Some(angle_deg)) => angle_deg,
        Ok(None) => {
            debug!(
                "Angle of joint {} is unknown, assuming 0 deg",
                actuator.id()
            );
            0.0
        }
        Err(e) => return JointOutcome::fault(actuator.id(), target_deg, None, e),
    };

    move_joint_from(actuator, start_deg, target_deg, timing, stop)
}

/// Move a joint along the profile from `start_deg` to `target_deg`.
///
/// The stop token is checked before every write and the delay after each write is cut short by
/// a stop, so a stop takes effect within one step delay. A move is only completed once the delay
/// after its final sample has elapsed; a stop during that delay cancels it, as for
/// [`snap_joint`].
pub fn move_joint_from(
    actuator: &dyn Actuator,
    start_deg: f64,
    target_deg: f64,
    timing: &MoveTiming,
    stop: &StopToken,
) -> JointOutcome {
    let joint = actuator.id();
    let profile = MotionProfile::new(start_deg, target_deg, timing.steps, timing.step_delay);
    let mut last_angle_deg = None;

    for sample in profile.iter() {
        if stop.is_stopped() {
            debug!("Joint {} move cancelled at {:?} deg", joint, last_angle_deg);
            return JointOutcome::cancelled(joint, target_deg, last_angle_deg);
        }

        if let Err(e) = actuator.set_angle(sample.angle_deg) {
            warn!("Joint {} faulted while moving: {}", joint, e);
            return JointOutcome::fault(joint, target_deg, last_angle_deg, e);
        }
        last_angle_deg = Some(sample.angle_deg);
        trace!("Joint {} -> {:.2} deg", joint, sample.angle_deg);

        if !stop.wait(sample.delay) {
            debug!("Joint {} move cancelled at {:?} deg", joint, last_angle_deg);
            return JointOutcome::cancelled(joint, target_deg, last_angle_deg);
        }
    }

    JointOutcome::completed(joint, target_deg, last_angle_deg)
}

/// Command a single write of `target_deg` then wait `actuation` for the actuator to get there.
///
/// Used for the gripper, which is opened and closed rather than interpolated.
pub fn snap_joint(
    actuator: &dyn Actuator,
    target_deg: f64,
    actuation: Duration,
    stop: &StopToken,
) -> JointOutcome {
    let joint = actuator.id();

    if stop.is_stopped() {
        return JointOutcome::cancelled(joint, target_deg, None);
    }

    if let Err(e) = actuator.set_angle(target_deg) {
        warn!("Joint {} faulted: {}", joint, e);
        return JointOutcome::fault(joint, target_deg, None, e);
    }
    trace!("Joint {} -> {:.2} deg", joint, target_deg);

    if stop.wait(actuation) {
        JointOutcome::completed(joint, target_deg, Some(target_deg))
    } else {
        JointOutcome::cancelled(joint, target_deg, Some(target_deg))
    }
}

/// Run every move on its own thread and join them all.
///
/// A fault or panic in one mover never stops its siblings.
pub fn move_concurrently(
    moves: &[JointMove<'_>],
    timing: &MoveTiming,
    stop: &StopToken,
) -> StepReport {
    let start = Instant::now();

    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = moves
            .iter()
            .map(|m| (m, scope.spawn(move || m.run(timing, stop))))
            .collect();

        handles
            .into_iter()
            .map(|(m, handle)| {
                let joint = m.actuator.id();
                handle.join().unwrap_or_else(|_| {
                    JointOutcome::fault(
                        joint,
                        m.target_deg,
                        None,
                        ActuatorError::MoverPanicked(joint),
                    )
                })
            })
            .collect()
    });

    StepReport {
        outcomes,
        elapsed: start.elapsed(),
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<'a> JointMove<'a> {
    /// Move from the actuator's current angle.
    pub fn new(actuator: &'a dyn Actuator, target_deg: f64) -> Self {
        Self {
            actuator,
            target_deg,
            start_deg: None,
        }
    }

    /// Move from an explicit start angle.
    pub fn from(actuator: &'a dyn Actuator, start_deg: f64, target_deg: f64) -> Self {
        Self {
            actuator,
            target_deg,
            start_deg: Some(start_deg),
        }
    }

    fn run(&self, timing: &MoveTiming, stop: &StopToken) -> JointOutcome {
        match self.start_deg {
            Some(start_deg) => {
                move_joint_from(self.actuator, start_deg, self.target_deg, timing, stop)
            }
            None => move_joint(self.actuator, self.target_deg, timing, stop),
        }
    }
}

impl JointOutcome {
    fn completed(joint: JointId, target_deg: f64, last_angle_deg: Option<f64>) -> Self {
        Self {
            joint,
            target_deg,
            last_angle_deg,
            result: Ok(MoveStatus::Completed),
        }
    }

    fn cancelled(joint: JointId, target_deg: f64, last_angle_deg: Option<f64>) -> Self {
        Self {
            joint,
            target_deg,
            last_angle_deg,
            result: Ok(MoveStatus::Cancelled),
        }
    }

    pub(crate) fn fault(
        joint: JointId,
        target_deg: f64,
        last_angle_deg: Option<f64>,
        error: ActuatorError,
    ) -> Self {
        Self {
            joint,
            target_deg,
            last_angle_deg,
            result: Err(error),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.result.is_err()
    }

    pub fn is_cancelled(&self) -> bool {
        self.result == Ok(MoveStatus::Cancelled)
    }

    /// The fault of this joint, if it faulted.
    pub fn fault_report(&self) -> Option<JointFault> {
        self.result.as_ref().err().map(|error| JointFault {
            joint: self.joint,
            error: error.clone(),
        })
    }
}

impl StepReport {
    pub fn faults(&self) -> Vec<JointFault> {
        self.outcomes
            .iter()
            .filter_map(JointOutcome::fault_report)
            .collect()
    }

    /// True if at least one mover faulted.
    pub fn is_degraded(&self) -> bool {
        self.outcomes.iter().any(JointOutcome::is_fault)
    }

    /// True if there was at least one mover and every mover faulted.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(JointOutcome::is_fault)
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes.iter().any(JointOutcome::is_cancelled)
    }

    /// Append the outcomes of another report run as part of the same step.
    pub fn absorb(&mut self, other: StepReport) {
        self.outcomes.extend(other.outcomes);
        self.elapsed += other.elapsed;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
