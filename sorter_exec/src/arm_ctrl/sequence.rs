//! # Sequence engine
//!
//! Runs the sorting sequence for one piece of fabric:
//!
//! ```text
//! Idle -> PickApproach -> Grasp -> Lift -> Transit -> Place -> Release -> Return -> Idle
//! ```
//!
//! Each step is a barrier, all its movers are joined before the next step starts. A joint fault
//! degrades the step but the sequence carries on, unless every mover of an action failed, in
//! which case the remaining steps are abandoned. A stop request abandons the remaining steps.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{
    move_concurrently, snap_joint, JointOutcome, ActuatorError, ActuatorSet, ArmCtrlParams,
    ArmEvent, FaultReport, JointFault, JointMove, MotionError, Pacing, Position, PositionTable,
    StepReport, StopToken, DEFECTIVE, HOME, NON_DEFECTIVE, PICKUP,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One step of a planned sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub step: SeqStep,
    pub actions: Vec<Action>,

    /// Preset the arm is at once the step completes cleanly.
    pub reaches: Option<&'static str>,
}

/// Runs planned steps against an actuator set.
pub struct SequenceEngine<'a> {
    motion: ArmMotion<'a>,
    params: &'a ArmCtrlParams,
    events: &'a dyn Fn(ArmEvent),
}

/// Executes single actions, shared by the engine and the controller's direct commands.
pub(crate) struct ArmMotion<'a> {
    pub actuators: &'a ActuatorSet,
    pub pacing: Pacing,
    pub stop: &'a StopToken,
    pub gripper_skip_threshold_deg: f64,
}

/// The report of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: SeqStep,
    pub report: StepReport,
}

/// The report of a full sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceReport {
    pub defective: bool,
    pub steps: Vec<StepRecord>,
    pub outcome: SeqOutcome,
    pub elapsed: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeqStep {
    Idle,
    PickApproach,
    Grasp,
    Lift,
    Transit,
    Place,
    Release,
    Return,
}

/// A single motion within a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Move the arm joints to a position, all joints at once.
    Arm(Position),

    /// Move the arm joints to a position while the gripper moves between two angles.
    ArmWithGripper {
        position: Position,
        gripper_from_deg: f64,
        gripper_to_deg: f64,
    },

    /// Command the gripper to an angle and wait for it to get there.
    Gripper(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeqOutcome {
    /// Every step ran with no faults.
    Completed,

    /// Every step ran but some joints faulted.
    Degraded,

    /// Every mover of an action in this step failed, later steps were not run.
    Aborted(SeqStep),

    /// A stop request was seen during or before this step.
    Cancelled(SeqStep),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Plan the sorting sequence for one piece of fabric.
pub fn plan(
    defective: bool,
    positions: &PositionTable,
    params: &ArmCtrlParams,
) -> Result<Vec<PlannedStep>, MotionError> {
    let place_name = if defective { DEFECTIVE } else { NON_DEFECTIVE };

    let lookup = |name: &str| {
        positions
            .get(name)
            .ok_or_else(|| MotionError::UnknownPosition(name.to_string()))
    };
    let pick = lookup(PICKUP)?;
    let place = lookup(place_name)?;
    let home = lookup(HOME)?;

    let h = params.horizontal_joint;
    let pick_safe = pick.with_safe_height(h, &params.safe_height);
    let place_safe = place.with_safe_height(h, &params.safe_height);

    let open = params.gripper_open_deg;
    let closed = params.gripper_closed_deg;

    Ok(vec![
        PlannedStep {
            step: SeqStep::PickApproach,
            actions: vec![Action::ArmWithGripper {
                position: pick.clone(),
                gripper_from_deg: closed,
                gripper_to_deg: open,
            }],
            reaches: Some(PICKUP),
        },
        PlannedStep {
            step: SeqStep::Grasp,
            actions: vec![Action::Gripper(closed)],
            reaches: None,
        },
        PlannedStep {
            step: SeqStep::Lift,
            actions: vec![Action::Arm(pick_safe)],
            reaches: None,
        },
        PlannedStep {
            step: SeqStep::Transit,
            actions: vec![Action::Arm(place_safe.clone())],
            reaches: None,
        },
        PlannedStep {
            step: SeqStep::Place,
            actions: vec![Action::Arm(place.clone())],
            reaches: Some(place_name),
        },
        PlannedStep {
            step: SeqStep::Release,
            actions: vec![Action::Gripper(open)],
            reaches: None,
        },
        PlannedStep {
            step: SeqStep::Return,
            actions: vec![
                Action::Arm(place_safe),
                Action::ArmWithGripper {
                    position: home.clone(),
                    gripper_from_deg: open,
                    gripper_to_deg: closed,
                },
            ],
            reaches: Some(HOME),
        },
    ])
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<'a> ArmMotion<'a> {
    pub fn new(
        actuators: &'a ActuatorSet,
        params: &ArmCtrlParams,
        pacing: Pacing,
        stop: &'a StopToken,
    ) -> Self {
        Self {
            actuators,
            pacing,
            stop,
            gripper_skip_threshold_deg: params.gripper_skip_threshold_deg,
        }
    }

    pub fn execute(&self, action: &Action) -> StepReport {
        match action {
            Action::Arm(position) => self.move_arm(position, None),
            Action::ArmWithGripper {
                position,
                gripper_from_deg,
                gripper_to_deg,
            } => self.move_arm(position, Some((*gripper_from_deg, *gripper_to_deg))),
            Action::Gripper(angle_deg) => self.set_gripper(*angle_deg),
        }
    }

    /// Move every joint of the position at once, optionally interpolating the gripper alongside.
    ///
    /// The gripper is never moved by the position itself, even if the position names it.
    pub fn move_arm(&self, position: &Position, gripper: Option<(f64, f64)>) -> StepReport {
        let gripper_id = self.actuators.gripper().id();
        let mut moves = Vec::with_capacity(position.len() + 1);
        let mut missing = Vec::new();

        for (joint, angle_deg) in position.iter().filter(|&(j, _)| j != gripper_id) {
            match self.actuators.joint(joint) {
                Some(actuator) => moves.push(JointMove::new(actuator.as_ref(), angle_deg)),
                None => missing.push(JointOutcome::fault(
                    joint,
                    angle_deg,
                    None,
                    ActuatorError::NoSuchJoint(joint),
                )),
            }
        }

        if let Some((from_deg, to_deg)) = gripper {
            if (from_deg - to_deg).abs() > self.gripper_skip_threshold_deg {
                moves.push(JointMove::from(
                    self.actuators.gripper().as_ref(),
                    from_deg,
                    to_deg,
                ));
            }
        }

        let mut report = move_concurrently(&moves, &self.pacing.timing, self.stop);
        report.outcomes.extend(missing);
        report
    }

    /// Snap the gripper to an angle and wait for it to actuate.
    pub fn set_gripper(&self, angle_deg: f64) -> StepReport {
        let start = Instant::now();
        let outcome = snap_joint(
            self.actuators.gripper().as_ref(),
            angle_deg,
            self.pacing.gripper_actuation,
            self.stop,
        );

        StepReport {
            outcomes: vec![outcome],
            elapsed: start.elapsed(),
        }
    }

    /// Last angle written to the gripper by a report, if the gripper moved.
    pub fn gripper_angle(&self, report: &StepReport) -> Option<f64> {
        let gripper_id = self.actuators.gripper().id();
        report
            .outcomes
            .iter()
            .filter(|o| o.joint == gripper_id)
            .filter_map(|o| o.last_angle_deg)
            .last()
    }
}

impl<'a> SequenceEngine<'a> {
    pub fn new(
        actuators: &'a ActuatorSet,
        params: &'a ArmCtrlParams,
        pacing: Pacing,
        stop: &'a StopToken,
        events: &'a dyn Fn(ArmEvent),
    ) -> Self {
        Self {
            motion: ArmMotion::new(actuators, params, pacing, stop),
            params,
            events,
        }
    }

    /// Run the full sequence for one piece of fabric.
    ///
    /// Only fails if a preset the sequence needs is missing, motion failures are described by the
    /// returned report.
    pub fn run(
        &self,
        defective: bool,
        positions: &PositionTable,
    ) -> Result<SequenceReport, MotionError> {
        let planned = plan(defective, positions, self.params)?;
        let stop = self.motion.stop;
        let start = Instant::now();

        let mut records = Vec::with_capacity(planned.len());
        let mut outcome = SeqOutcome::Completed;

        info!(
            "Starting {} sequence",
            if defective { "defective" } else { "non-defective" }
        );

        for (i, planned_step) in planned.iter().enumerate() {
            let step = planned_step.step;

            // Let the arm settle between steps
            if (i > 0 && !stop.wait(self.motion.pacing.settle)) || stop.is_stopped() {
                outcome = SeqOutcome::Cancelled(step);
                break;
            }

            (self.events)(ArmEvent::StepStarted(step));
            info!("Sequence step {:?}", step);

            let mut report = StepReport::default();
            let mut aborted = false;

            for action in planned_step.actions.iter() {
                let action_report = self.motion.execute(action);

                if let Some(angle_deg) = self.motion.gripper_angle(&action_report) {
                    (self.events)(ArmEvent::GripperMoved { angle_deg });
                }

                aborted = action_report.all_failed();
                report.absorb(action_report);

                if aborted || stop.is_stopped() {
                    break;
                }
            }

            for fault in report.faults() {
                warn!("Joint {} faulted during {:?}: {}", fault.joint, step, fault.error);
                (self.events)(ArmEvent::JointFault(fault));
            }

            let degraded = report.is_degraded();
            (self.events)(ArmEvent::StepFinished {
                step,
                degraded,
                elapsed_s: report.elapsed.as_secs_f64(),
            });
            records.push(StepRecord { step, report });

            if aborted {
                warn!("Every joint failed during {:?}, aborting the sequence", step);
                outcome = SeqOutcome::Aborted(step);
                break;
            }

            if stop.is_stopped() {
                outcome = SeqOutcome::Cancelled(step);
                break;
            }

            if let (Some(name), false) = (planned_step.reaches, degraded) {
                (self.events)(ArmEvent::PositionReached(name.to_string()));
            }
        }

        if outcome == SeqOutcome::Completed && records.iter().any(|r| r.report.is_degraded()) {
            outcome = SeqOutcome::Degraded;
        }

        info!("Sequence finished: {:?}", outcome);

        Ok(SequenceReport {
            defective,
            steps: records,
            outcome,
            elapsed: start.elapsed(),
        })
    }
}

impl SequenceReport {
    pub fn faults(&self) -> Vec<JointFault> {
        self.steps.iter().flat_map(|r| r.report.faults()).collect()
    }

    pub fn fault_report(&self) -> FaultReport {
        let aborted_at = match self.outcome {
            SeqOutcome::Aborted(step) => Some(step),
            _ => None,
        };

        FaultReport::new(self.faults(), aborted_at)
    }

    /// Steps that were run, in order.
    pub fn step_names(&self) -> Vec<SeqStep> {
        self.steps.iter().map(|r| r.step).collect()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::{
        testing::{fast_params, FlakyActuator},
        Actuator,
    };
    use std::sync::{Arc, Mutex};

    const ALL_STEPS: [SeqStep; 7] = [
        SeqStep::PickApproach,
        SeqStep::Grasp,
        SeqStep::Lift,
        SeqStep::Transit,
        SeqStep::Place,
        SeqStep::Release,
        SeqStep::Return,
    ];

    fn sim_set(params: &ArmCtrlParams) -> ActuatorSet {
        let home = params.positions.get(HOME).unwrap();
        ActuatorSet::simulated(
            &params.joint_channels,
            params.gripper_channel,
            home,
            params.gripper_closed_deg,
        )
    }

    #[test]
    fn test_plan() {
        let params = ArmCtrlParams::default();
        let steps = plan(true, &params.positions, &params).unwrap();

        let names: Vec<SeqStep> = steps.iter().map(|s| s.step).collect();
        assert_eq!(names, ALL_STEPS.to_vec());

        // Approach opens the gripper on the way down
        assert_eq!(
            steps[0].actions,
            vec![Action::ArmWithGripper {
                position: Position::from_pairs(&[(0, 0.0), (1, 0.0), (2, 180.0)]),
                gripper_from_deg: 180.0,
                gripper_to_deg: 0.0,
            }]
        );
        assert_eq!(steps[1].actions, vec![Action::Gripper(180.0)]);
        assert_eq!(
            steps[2].actions,
            vec![Action::Arm(Position::from_pairs(&[(0, 0.0), (1, 45.0), (2, 45.0)]))]
        );
        assert_eq!(
            steps[3].actions,
            vec![Action::Arm(Position::from_pairs(&[(0, 180.0), (1, 45.0), (2, 45.0)]))]
        );
        assert_eq!(steps[4].reaches, Some(DEFECTIVE));
        assert_eq!(steps[5].actions, vec![Action::Gripper(0.0)]);
        assert_eq!(steps[6].actions.len(), 2);
        assert_eq!(steps[6].reaches, Some(HOME));

        let good = plan(false, &params.positions, &params).unwrap();
        assert_eq!(good[4].reaches, Some(NON_DEFECTIVE));
        assert_eq!(
            good[3].actions,
            vec![Action::Arm(Position::from_pairs(&[(0, 90.0), (1, 45.0), (2, 45.0)]))]
        );
    }

    #[test]
    fn test_run_completes() {
        let params = fast_params();
        let set = sim_set(&params);
        let stop = StopToken::new();
        let events = Mutex::new(Vec::new());
        let listener = |e: ArmEvent| events.lock().unwrap().push(e);

        let engine = SequenceEngine::new(&set, &params, params.pacing(false), &stop, &listener);
        let report = engine.run(false, &params.positions).unwrap();

        assert_eq!(report.outcome, SeqOutcome::Completed);
        assert_eq!(report.step_names(), ALL_STEPS.to_vec());
        assert!(report.faults().is_empty());

        // Back home with the gripper closed
        assert_eq!(set.joint(0).unwrap().get_angle(), Ok(Some(120.0)));
        assert_eq!(set.joint(1).unwrap().get_angle(), Ok(Some(45.0)));
        assert_eq!(set.joint(2).unwrap().get_angle(), Ok(Some(45.0)));
        assert_eq!(set.gripper().get_angle(), Ok(Some(180.0)));

        let events = events.into_inner().unwrap();
        let started: Vec<SeqStep> = events
            .iter()
            .filter_map(|e| match e {
                ArmEvent::StepStarted(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(started, ALL_STEPS.to_vec());

        let reached: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                ArmEvent::PositionReached(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(reached, vec![PICKUP, NON_DEFECTIVE, HOME]);

        let finished = events.iter().rev().find_map(|e| match e {
            ArmEvent::StepFinished { step, degraded, .. } => Some((*step, *degraded)),
            _ => None,
        });
        assert_eq!(finished, Some((SeqStep::Return, false)));
        assert!(matches!(events.last(), Some(ArmEvent::PositionReached(p)) if p == HOME));
    }

    #[test]
    fn test_gripper_not_moved_by_positions() {
        let mut params = fast_params();
        let mut positions: std::collections::HashMap<String, Position> =
            params.positions.clone().into();
        positions.insert(
            PICKUP.into(),
            Position::from_pairs(&[(0, 0.0), (1, 0.0), (2, 180.0), (3, 180.0)]),
        );
        params.positions = PositionTable::new(positions).unwrap();

        let set = sim_set(&params);
        let stop = StopToken::new();
        let motion = ArmMotion::new(&set, &params, params.pacing(false), &stop);

        set.gripper().set_angle(0.0).unwrap();
        let report = motion.move_arm(params.positions.get(PICKUP).unwrap(), None);

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(set.gripper().get_angle(), Ok(Some(0.0)));
    }

    #[test]
    fn test_small_gripper_transition_skipped() {
        let params = fast_params();
        let set = sim_set(&params);
        let stop = StopToken::new();
        let motion = ArmMotion::new(&set, &params, params.pacing(false), &stop);
        let home = params.positions.get(HOME).unwrap();

        let report = motion.move_arm(home, Some((180.0, 176.0)));
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(motion.gripper_angle(&report), None);

        let report = motion.move_arm(home, Some((180.0, 170.0)));
        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(motion.gripper_angle(&report), Some(170.0));
    }

    #[test]
    fn test_unknown_joint_is_a_fault() {
        let params = fast_params();
        let set = sim_set(&params);
        let stop = StopToken::new();
        let motion = ArmMotion::new(&set, &params, params.pacing(false), &stop);

        let report = motion.move_arm(&Position::from_pairs(&[(0, 30.0), (9, 30.0)]), None);
        assert!(report.is_degraded());
        assert_eq!(report.faults()[0].error, ActuatorError::NoSuchJoint(9));
        assert_eq!(set.joint(0).unwrap().get_angle(), Ok(Some(30.0)));
    }

    #[test]
    fn test_all_joints_failing_aborts() {
        let params = fast_params();
        let joints: Vec<Arc<FlakyActuator>> = params
            .joint_channels
            .iter()
            .map(|&id| Arc::new(FlakyActuator::new(id, Some(90.0))))
            .collect();
        for joint in joints.iter() {
            joint.set_failing(true);
        }

        let set = ActuatorSet::new(
            joints
                .iter()
                .map(|j| j.clone() as Arc<dyn Actuator>)
                .collect(),
            Arc::new(FlakyActuator::new(params.gripper_channel, Some(180.0))),
        );
        let stop = StopToken::new();
        let listener = |_: ArmEvent| {};

        let engine = SequenceEngine::new(&set, &params, params.pacing(false), &stop, &listener);
        let report = engine.run(true, &params.positions).unwrap();

        // The gripper still moves during the approach, so the first all-joint step is the lift
        assert_eq!(report.outcome, SeqOutcome::Aborted(SeqStep::Lift));
        assert_eq!(
            report.step_names(),
            vec![SeqStep::PickApproach, SeqStep::Grasp, SeqStep::Lift]
        );

        let faults = report.fault_report();
        assert_eq!(faults.aborted_at, Some(SeqStep::Lift));
        assert_eq!(faults.faults.len(), 6);
    }

    #[test]
    fn test_stopped_before_start() {
        let params = fast_params();
        let set = sim_set(&params);
        let stop = StopToken::new();
        stop.stop();
        let listener = |_: ArmEvent| {};

        let engine = SequenceEngine::new(&set, &params, params.pacing(false), &stop, &listener);
        let report = engine.run(true, &params.positions).unwrap();

        assert_eq!(report.outcome, SeqOutcome::Cancelled(SeqStep::PickApproach));
        assert!(report.steps.is_empty());
        assert_eq!(set.joint(0).unwrap().get_angle(), Ok(Some(120.0)));
    }
}
