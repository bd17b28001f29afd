//! # Arm controller
//!
//! [`ArmCtrl`] owns the arm state and is the only way the rest of the executable moves the arm.
//! It is cheap to clone, every clone shares the same state, so the detection loop, the operator
//! command path and the emergency stop path can each hold one.
//!
//! Commands are admitted under the state mutex: an uninitialised arm rejects every command, a
//! busy arm rejects further commands (they are never queued), and a ready or faulted arm accepts
//! them. Each admitted command owns a [`RunGuard`] which returns the arm to its resting mode
//! however the command ends. A separate motion lock makes sure a new command never overlaps the
//! last step of a command that was cut short by an emergency stop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Utc;
use comms_if::tm::{ArmMode, ArmStatus, GripperState};
use log::{debug, error, info, warn};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

use super::{
    sequence::ArmMotion, snap_joint, ActuatorError, ActuatorSet, ArmCtrlParams, ArmEvent,
    FaultReport, MotionError, SeqOutcome, SequenceEngine, SequenceReport, StepReport, StopToken,
    HOME, UNKNOWN_POSITION,
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type Listener = Arc<dyn Fn(&ArmEvent) + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Thread safe controller of the arm.
#[derive(Clone)]
pub struct ArmCtrl {
    inner: Arc<Inner>,
}

/// Handle on a sequence running in the background.
#[derive(Debug)]
pub struct SequenceTask {
    handle: JoinHandle<Result<SequenceReport, MotionError>>,
}

struct Inner {
    params: ArmCtrlParams,
    state: Mutex<ArmState>,
    motion: Mutex<()>,
    listener: Mutex<Option<Listener>>,
}

struct ArmState {
    mode: ArmMode,

    /// Mode the arm returns to once the current command ends.
    resting: ArmMode,

    position: String,
    gripper_angle_deg: f64,
    last_action: Option<chrono::DateTime<Utc>>,

    run: Option<ActiveRun>,
    next_run_id: u64,

    actuators: Arc<ActuatorSet>,
    simulation: bool,
}

struct ActiveRun {
    id: u64,
    stop: StopToken,
}

/// Ownership of the arm for the duration of one command.
///
/// Dropping the guard ends the command. If the command is still the active one (it was not
/// superseded by an emergency stop) the arm returns to its resting mode.
struct RunGuard {
    inner: Arc<Inner>,
    id: u64,
    stop: StopToken,
    actuators: Arc<ActuatorSet>,
    simulation: bool,

    /// Position to record when the command ends, `None` leaves the position unchanged.
    position_on_exit: Option<String>,

    /// New resting mode to adopt when the command ends.
    resting_on_exit: Option<ArmMode>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The actuators the controller drives.
pub enum ArmBackend {
    /// Real actuators.
    Hardware(ActuatorSet),

    /// In-memory actuators starting at the home position.
    Simulation,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ArmCtrl {
    /// Create a new controller, which must be initialised before it accepts commands.
    pub fn new(params: ArmCtrlParams, backend: ArmBackend) -> Result<Self, MotionError> {
        params.validate().map_err(MotionError::InvalidParams)?;

        let (actuators, simulation) = match backend {
            ArmBackend::Hardware(set) => (set, false),
            ArmBackend::Simulation => (simulated_set(&params), true),
        };

        let state = ArmState {
            mode: ArmMode::Uninitialized,
            resting: ArmMode::Uninitialized,
            position: UNKNOWN_POSITION.to_string(),
            gripper_angle_deg: params.gripper_closed_deg,
            last_action: None,
            run: None,
            next_run_id: 0,
            actuators: Arc::new(actuators),
            simulation,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                params,
                state: Mutex::new(state),
                motion: Mutex::new(()),
                listener: Mutex::new(None),
            }),
        })
    }

    pub fn params(&self) -> &ArmCtrlParams {
        &self.inner.params
    }

    /// Register a callback which receives every [`ArmEvent`].
    ///
    /// The callback is invoked synchronously from whichever thread produced the event, with no
    /// controller lock held.
    pub fn set_event_listener<F>(&self, listener: F)
    where
        F: Fn(&ArmEvent) + Send + Sync + 'static,
    {
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    pub fn clear_event_listener(&self) {
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Bring the arm to its start state.
    ///
    /// On hardware every joint is sent to the neutral angle one at a time, then the arm goes
    /// home and the gripper closes. If any actuator fails the controller switches to simulated
    /// actuators and comes up `Faulted`, which still accepts commands. In simulation the arm is
    /// simply placed at home with the gripper closed, and a controller that fell back from its
    /// hardware stays `Faulted`.
    ///
    /// An emergency stop during initialisation returns
    /// [`MotionError::CancelledByEmergencyStop`] and leaves the arm `Ready` at an unknown
    /// position.
    pub fn initialize(&self) -> Result<ArmMode, MotionError> {
        let mut guard = {
            let mut state = self.inner.lock_state();

            if state.mode == ArmMode::Busy {
                return Err(MotionError::Busy);
            }

            if state.simulation {
                // An arm which lost its hardware stays faulted
                let mode = match state.resting {
                    ArmMode::Faulted => ArmMode::Faulted,
                    _ => ArmMode::Ready,
                };

                state.actuators = Arc::new(simulated_set(&self.inner.params));
                state.mode = mode;
                state.resting = mode;
                state.position = HOME.to_string();
                state.gripper_angle_deg = self.inner.params.gripper_closed_deg;
                state.last_action = Some(Utc::now());
                drop(state);

                info!("Arm initialised in simulation ({:?})", mode);
                self.inner.dispatch(None, ArmEvent::ModeChanged(mode));
                return Ok(mode);
            }

            // A stop during initialisation leaves the arm ready at an unknown position
            if state.resting == ArmMode::Uninitialized {
                state.resting = ArmMode::Ready;
            }

            self.inner.begin_run(&mut state, true)
        };
        self.inner.dispatch(Some(guard.id), ArmEvent::ModeChanged(ArmMode::Busy));

        info!("Initialising arm hardware");
        let report = self.init_hardware(&guard);

        if report.was_cancelled() || guard.stop.is_stopped() {
            warn!("Arm initialisation cancelled");
            return Err(MotionError::CancelledByEmergencyStop);
        }

        match report.faults().into_iter().next() {
            Some(fault) => {
                self.fall_back_to_simulation(&mut guard, fault.error);
                Ok(ArmMode::Faulted)
            }
            None => {
                guard.position_on_exit = Some(HOME.to_string());
                guard.resting_on_exit = Some(ArmMode::Ready);
                self.inner.dispatch(Some(guard.id), ArmEvent::PositionReached(HOME.into()));
                info!("Arm initialised");
                Ok(ArmMode::Ready)
            }
        }
    }

    /// Move the arm joints to the named position, all joints at once.
    pub fn move_to(&self, name: &str) -> Result<StepReport, MotionError> {
        let position = self
            .inner
            .params
            .positions
            .get(name)
            .ok_or_else(|| MotionError::UnknownPosition(name.to_string()))?;

        let mut guard = self.admit(true)?;
        info!("Moving arm to {}", name);

        let report = {
            let _motion = self.inner.lock_motion();
            self.arm_motion(&guard).move_arm(position, None)
        };

        self.finish_direct(&guard, &report)?;
        guard.position_on_exit = Some(name.to_string());
        self.inner
            .dispatch(Some(guard.id), ArmEvent::PositionReached(name.to_string()));

        Ok(report)
    }

    pub fn move_home(&self) -> Result<StepReport, MotionError> {
        self.move_to(HOME)
    }

    pub fn gripper_open(&self) -> Result<StepReport, MotionError> {
        self.set_gripper(self.inner.params.gripper_open_deg)
    }

    pub fn gripper_close(&self) -> Result<StepReport, MotionError> {
        self.set_gripper(self.inner.params.gripper_closed_deg)
    }

    /// Run the full sorting sequence for one piece of fabric, blocking until it ends.
    ///
    /// Returns the report of a clean run, [`MotionError::ActuatorFault`] if any joint faulted
    /// (even if the sequence ran to the end) and [`MotionError::CancelledByEmergencyStop`] if the
    /// run was stopped. The report of every run, whatever its outcome, is also sent to the event
    /// listener.
    pub fn handle(&self, defective: bool) -> Result<SequenceReport, MotionError> {
        let guard = self.admit(true)?;
        self.run_sequence(guard, defective)
    }

    /// Run the sorting sequence on a background thread.
    ///
    /// Admission is decided before this returns, so a busy arm is reported immediately.
    pub fn submit_handle(&self, defective: bool) -> Result<SequenceTask, MotionError> {
        let guard = self.admit(true)?;
        let ctrl = self.clone();

        let handle = thread::Builder::new()
            .name("arm_sequence".into())
            .spawn(move || ctrl.run_sequence(guard, defective))
            .map_err(MotionError::TaskSpawn)?;

        Ok(SequenceTask { handle })
    }

    /// Stop whatever the arm is doing.
    ///
    /// Signals the active command to stop, holds every actuator at its current angle and makes
    /// the arm available again straight away. The arm's position is unknown afterwards.
    pub fn emergency_stop(&self) {
        warn!("EMERGENCY STOP");

        let (actuators, new_mode) = {
            let mut state = self.inner.lock_state();

            if let Some(run) = state.run.take() {
                run.stop.stop();
            }

            if state.mode == ArmMode::Busy {
                state.mode = state.resting;
            }
            state.position = UNKNOWN_POSITION.to_string();
            state.last_action = Some(Utc::now());

            (state.actuators.clone(), state.mode)
        };

        for actuator in actuators.iter() {
            let held = actuator
                .get_angle()
                .and_then(|angle| match angle {
                    Some(angle_deg) => actuator.set_angle(angle_deg),
                    None => Ok(()),
                });

            if let Err(e) = held {
                warn!("Could not hold joint {}: {}", actuator.id(), e);
            }
        }

        self.inner.dispatch(None, ArmEvent::EmergencyStop);
        self.inner.dispatch(None, ArmEvent::ModeChanged(new_mode));
    }

    /// Get a snapshot of the arm state.
    pub fn get_status(&self) -> ArmStatus {
        let state = self.inner.lock_state();

        ArmStatus {
            ready: state.mode == ArmMode::Ready,
            busy: state.mode == ArmMode::Busy,
            simulation: state.simulation,
            mode: state.mode,
            position: state.position.clone(),
            last_action: state.last_action,
            gripper: GripperState::from_angle(state.gripper_angle_deg),
        }
    }

    pub fn is_simulation(&self) -> bool {
        self.inner.lock_state().simulation
    }

    /// Park the arm at home with the gripper closed, if it is idle.
    pub fn shutdown(&self) {
        match self.get_status().mode {
            ArmMode::Uninitialized => {
                info!("Arm was never initialised, nothing to park");
                return;
            }
            ArmMode::Busy => {
                warn!("Arm is busy, shutting down without parking");
                return;
            }
            ArmMode::Ready | ArmMode::Faulted => (),
        }

        info!("Parking arm");
        if let Err(e) = self.move_home() {
            error!("Could not move the arm home during shutdown: {}", e);
        }
        if let Err(e) = self.gripper_close() {
            error!("Could not close the gripper during shutdown: {}", e);
        }
    }

    /// Check and claim the arm for a new command.
    fn admit(&self, moves_arm: bool) -> Result<RunGuard, MotionError> {
        let guard = {
            let mut state = self.inner.lock_state();

            match state.mode {
                ArmMode::Uninitialized => return Err(MotionError::NotInitialized),
                ArmMode::Busy => {
                    debug!("Command rejected, arm is busy");
                    return Err(MotionError::Busy);
                }
                ArmMode::Ready | ArmMode::Faulted => (),
            }

            self.inner.begin_run(&mut state, moves_arm)
        };

        self.inner
            .dispatch(Some(guard.id), ArmEvent::ModeChanged(ArmMode::Busy));

        Ok(guard)
    }

    fn arm_motion<'a>(&'a self, guard: &'a RunGuard) -> ArmMotion<'a> {
        ArmMotion::new(
            &guard.actuators,
            &self.inner.params,
            self.inner.params.pacing(guard.simulation),
            &guard.stop,
        )
    }

    fn set_gripper(&self, angle_deg: f64) -> Result<StepReport, MotionError> {
        let guard = self.admit(false)?;
        info!("Moving gripper to {:.1} deg", angle_deg);

        let report = {
            let _motion = self.inner.lock_motion();
            self.arm_motion(&guard).set_gripper(angle_deg)
        };

        if report.outcomes.iter().any(|o| o.last_angle_deg.is_some()) {
            self.inner
                .dispatch(Some(guard.id), ArmEvent::GripperMoved { angle_deg });
        }

        self.finish_direct(&guard, &report)?;
        Ok(report)
    }

    /// Convert the report of a direct command into the command's result.
    fn finish_direct(&self, guard: &RunGuard, report: &StepReport) -> Result<(), MotionError> {
        if report.was_cancelled() || guard.stop.is_stopped() {
            return Err(MotionError::CancelledByEmergencyStop);
        }

        if report.is_degraded() {
            let faults = report.faults();
            for fault in faults.iter() {
                warn!("Joint {} faulted: {}", fault.joint, fault.error);
                self.inner
                    .dispatch(Some(guard.id), ArmEvent::JointFault(fault.clone()));
            }
            return Err(MotionError::ActuatorFault(FaultReport::new(faults, None)));
        }

        Ok(())
    }

    fn run_sequence(
        &self,
        mut guard: RunGuard,
        defective: bool,
    ) -> Result<SequenceReport, MotionError> {
        let report = {
            let _motion = self.inner.lock_motion();
            let params = &self.inner.params;
            let run_id = guard.id;
            let inner = &self.inner;
            let events = move |event: ArmEvent| inner.dispatch(Some(run_id), event);

            SequenceEngine::new(
                &guard.actuators,
                params,
                params.pacing(guard.simulation),
                &guard.stop,
                &events,
            )
            .run(defective, &params.positions)?
        };

        self.inner
            .dispatch(Some(guard.id), ArmEvent::SequenceFinished(report.clone()));

        match report.outcome {
            SeqOutcome::Completed => {
                guard.position_on_exit = Some(HOME.to_string());
                Ok(report)
            }
            SeqOutcome::Degraded | SeqOutcome::Aborted(_) => {
                Err(MotionError::ActuatorFault(report.fault_report()))
            }
            SeqOutcome::Cancelled(step) => {
                info!("Sequence cancelled at {:?}", step);
                Err(MotionError::CancelledByEmergencyStop)
            }
        }
    }

    /// Bring the hardware to its start state, stopping at the first fault.
    fn init_hardware(&self, guard: &RunGuard) -> StepReport {
        let _motion = self.inner.lock_motion();
        let params = &self.inner.params;
        let motion = self.arm_motion(guard);
        let mut report = StepReport::default();

        for actuator in guard.actuators.joints() {
            report.outcomes.push(snap_joint(
                actuator.as_ref(),
                params.neutral_angle_deg,
                motion.pacing.neutral_pause,
                &guard.stop,
            ));

            if report.is_degraded() || report.was_cancelled() {
                return report;
            }
        }

        if let Some(home) = params.positions.get(HOME) {
            report.absorb(motion.move_arm(home, None));
            if report.is_degraded() || report.was_cancelled() {
                return report;
            }
        }

        report.absorb(motion.set_gripper(params.gripper_closed_deg));
        if motion.gripper_angle(&report).is_some() {
            self.inner.dispatch(
                Some(guard.id),
                ArmEvent::GripperMoved {
                    angle_deg: params.gripper_closed_deg,
                },
            );
        }

        report
    }

    /// Replace the hardware actuators with simulated ones after a hardware failure.
    fn fall_back_to_simulation(&self, guard: &mut RunGuard, cause: ActuatorError) {
        error!(
            "Arm hardware unavailable ({}), continuing in simulation",
            cause
        );

        {
            let mut state = self.inner.lock_state();
            state.actuators = Arc::new(simulated_set(&self.inner.params));
            state.simulation = true;
            state.gripper_angle_deg = self.inner.params.gripper_closed_deg;
        }

        guard.position_on_exit = Some(HOME.to_string());
        guard.resting_on_exit = Some(ArmMode::Faulted);
        self.inner
            .dispatch(Some(guard.id), ArmEvent::HardwareUnavailable(cause));
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ArmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_motion(&self) -> MutexGuard<'_, ()> {
        self.motion.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the arm busy with a new command. Admission must already have been checked.
    fn begin_run(self: &Arc<Self>, state: &mut ArmState, moves_arm: bool) -> RunGuard {
        let id = state.next_run_id;
        state.next_run_id += 1;

        let stop = StopToken::new();
        state.run = Some(ActiveRun {
            id,
            stop: stop.clone(),
        });
        state.mode = ArmMode::Busy;

        if moves_arm {
            state.position = UNKNOWN_POSITION.to_string();
        }

        RunGuard {
            inner: self.clone(),
            id,
            stop,
            actuators: state.actuators.clone(),
            simulation: state.simulation,
            position_on_exit: if moves_arm {
                Some(UNKNOWN_POSITION.to_string())
            } else {
                None
            },
            resting_on_exit: None,
        }
    }

    /// Apply an event to the state then pass it to the listener.
    ///
    /// Events from a command that is no longer active only reach the listener.
    fn dispatch(&self, run_id: Option<u64>, event: ArmEvent) {
        {
            let mut state = self.lock_state();
            let current = run_id.is_none() || state.run.as_ref().map(|r| r.id) == run_id;

            match &event {
                ArmEvent::GripperMoved { angle_deg } => state.gripper_angle_deg = *angle_deg,
                ArmEvent::StepStarted(_) if current => {
                    state.position = UNKNOWN_POSITION.to_string()
                }
                ArmEvent::PositionReached(name) if current => state.position = name.clone(),
                _ => (),
            }
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(listener) = listener {
            listener(&event);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mode = {
            let mut state = self.inner.lock_state();

            if state.run.as_ref().map(|r| r.id) != Some(self.id) {
                return;
            }

            state.run = None;
            if let Some(resting) = self.resting_on_exit {
                state.resting = resting;
            }
            state.mode = state.resting;
            if let Some(position) = self.position_on_exit.take() {
                state.position = position;
            }
            state.last_action = Some(Utc::now());

            state.mode
        };

        self.inner.dispatch(None, ArmEvent::ModeChanged(mode));
    }
}

impl SequenceTask {
    /// True once the sequence has ended, `wait` will then return immediately.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the sequence ends and get its result.
    pub fn wait(self) -> Result<SequenceReport, MotionError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(MotionError::TaskPanicked),
        }
    }
}

/// Simulated actuators at the home position with the gripper closed.
fn simulated_set(params: &ArmCtrlParams) -> ActuatorSet {
    let home = params.positions.get(HOME).cloned().unwrap_or_default();

    ActuatorSet::simulated(
        &params.joint_channels,
        params.gripper_channel,
        &home,
        params.gripper_closed_deg,
    )
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::{
        testing::{fast_params, FlakyActuator},
        Actuator, SeqStep, DEFECTIVE, PICKUP,
    };
    use std::{
        sync::Barrier,
        time::{Duration, Instant},
    };

    struct FlakyArm {
        ctrl: ArmCtrl,
        joints: Vec<Arc<FlakyActuator>>,
    }

    fn sim_ctrl(params: ArmCtrlParams) -> ArmCtrl {
        let ctrl = ArmCtrl::new(params, ArmBackend::Simulation).unwrap();
        assert_eq!(ctrl.initialize().unwrap(), ArmMode::Ready);
        ctrl
    }

    fn slow_params(steps: usize, delay_s: f64) -> ArmCtrlParams {
        ArmCtrlParams {
            movement_steps: steps,
            movement_delay_s: delay_s,
            ..fast_params()
        }
    }

    fn flaky_arm(params: ArmCtrlParams) -> FlakyArm {
        let joints: Vec<Arc<FlakyActuator>> = params
            .joint_channels
            .iter()
            .map(|&id| Arc::new(FlakyActuator::new(id, None)))
            .collect();
        let gripper = Arc::new(FlakyActuator::new(params.gripper_channel, None));

        let set = ActuatorSet::new(
            joints
                .iter()
                .map(|j| j.clone() as Arc<dyn Actuator>)
                .collect(),
            gripper,
        );

        FlakyArm {
            ctrl: ArmCtrl::new(params, ArmBackend::Hardware(set)).unwrap(),
            joints,
        }
    }

    fn record_events(ctrl: &ArmCtrl) -> Arc<Mutex<Vec<ArmEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        ctrl.set_event_listener(move |e: &ArmEvent| sink.lock().unwrap().push(e.clone()));
        events
    }

    #[test]
    fn test_uninitialized_rejects_commands() {
        let ctrl = ArmCtrl::new(fast_params(), ArmBackend::Simulation).unwrap();

        assert!(matches!(ctrl.handle(true), Err(MotionError::NotInitialized)));
        assert!(matches!(ctrl.move_home(), Err(MotionError::NotInitialized)));
        assert!(matches!(ctrl.gripper_open(), Err(MotionError::NotInitialized)));

        let status = ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Uninitialized);
        assert!(!status.ready);
        assert!(!status.busy);
        assert!(status.simulation);
        assert_eq!(status.position, UNKNOWN_POSITION);

        // Stopping an uninitialised arm leaves it uninitialised
        ctrl.emergency_stop();
        assert_eq!(ctrl.get_status().mode, ArmMode::Uninitialized);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = fast_params();
        params.gripper_channel = params.joint_channels[0];

        assert!(matches!(
            ArmCtrl::new(params, ArmBackend::Simulation),
            Err(MotionError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_sim_initialize() {
        let ctrl = sim_ctrl(fast_params());
        let status = ctrl.get_status();

        assert!(status.ready);
        assert!(status.simulation);
        assert_eq!(status.position, HOME);
        assert_eq!(status.gripper, GripperState::Closed);
        assert!(status.last_action.is_some());
    }

    #[test]
    fn test_handle_completes() {
        let ctrl = sim_ctrl(fast_params());
        let events = record_events(&ctrl);

        let report = ctrl.handle(true).unwrap();
        assert_eq!(report.outcome, SeqOutcome::Completed);
        assert!(report.defective);

        let status = ctrl.get_status();
        assert!(status.ready);
        assert!(!status.busy);
        assert_eq!(status.position, HOME);
        assert_eq!(status.gripper, GripperState::Closed);

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ArmEvent::PositionReached(p) if p == DEFECTIVE)));
        assert!(events.iter().any(|e| matches!(
            e,
            ArmEvent::SequenceFinished(r) if r.outcome == SeqOutcome::Completed
        )));
        assert!(matches!(
            events.last(),
            Some(ArmEvent::ModeChanged(ArmMode::Ready))
        ));
    }

    #[test]
    fn test_simultaneous_handles() {
        let ctrl = sim_ctrl(slow_params(10, 0.01));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let ctrl = ctrl.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ctrl.handle(i == 0)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(MotionError::Busy)))
                .count(),
            1
        );
        assert!(ctrl.get_status().ready);
    }

    #[test]
    fn test_submit_while_busy() {
        let ctrl = sim_ctrl(slow_params(10, 0.005));

        let task = ctrl.submit_handle(false).unwrap();
        assert!(ctrl.get_status().busy);

        match ctrl.submit_handle(true) {
            Err(e) => assert!(e.is_retriable()),
            Ok(_) => panic!("Second sequence was admitted"),
        }
        assert!(matches!(ctrl.move_home(), Err(MotionError::Busy)));

        let report = task.wait().unwrap();
        assert!(!report.defective);
        assert!(ctrl.get_status().ready);
    }

    #[test]
    fn test_emergency_stop_mid_sequence() {
        let ctrl = sim_ctrl(slow_params(20, 0.01));
        let events = record_events(&ctrl);

        let task = ctrl.submit_handle(true).unwrap();
        thread::sleep(Duration::from_millis(50));

        let stopped_at = Instant::now();
        ctrl.emergency_stop();

        // The arm is available straight away
        let status = ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Ready);
        assert!(!status.busy);
        assert_eq!(status.position, UNKNOWN_POSITION);

        assert!(matches!(
            task.wait(),
            Err(MotionError::CancelledByEmergencyStop)
        ));
        assert!(stopped_at.elapsed() < Duration::from_millis(500));

        // The stopped run does not overwrite the state when it finishes
        let status = ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Ready);
        assert_eq!(status.position, UNKNOWN_POSITION);

        {
            let events = events.lock().unwrap();
            assert!(events.iter().any(|e| matches!(e, ArmEvent::EmergencyStop)));
            assert!(events.iter().any(|e| matches!(
                e,
                ArmEvent::SequenceFinished(r) if r.outcome == SeqOutcome::Cancelled(SeqStep::PickApproach)
            )));
        }

        // A fresh run is not affected by the earlier stop
        let report = ctrl.handle(false).unwrap();
        assert_eq!(report.outcome, SeqOutcome::Completed);
        assert_eq!(ctrl.get_status().position, HOME);
    }

    #[test]
    fn test_emergency_stop_when_idle() {
        let ctrl = sim_ctrl(fast_params());
        ctrl.emergency_stop();

        let status = ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Ready);
        assert_eq!(status.position, UNKNOWN_POSITION);

        ctrl.move_home().unwrap();
        assert_eq!(ctrl.get_status().position, HOME);
    }

    #[test]
    fn test_fault_during_place() {
        let arm = flaky_arm(fast_params());
        assert_eq!(arm.ctrl.initialize().unwrap(), ArmMode::Ready);
        assert!(!arm.ctrl.is_simulation());
        assert_eq!(arm.ctrl.get_status().position, HOME);

        let joint_1 = arm.joints[1].clone();
        arm.ctrl.set_event_listener(move |e: &ArmEvent| match e {
            ArmEvent::StepStarted(SeqStep::Place) => joint_1.set_failing(true),
            ArmEvent::StepStarted(SeqStep::Release) => joint_1.set_failing(false),
            _ => (),
        });

        match arm.ctrl.handle(true) {
            Err(MotionError::ActuatorFault(report)) => {
                assert!(report.contains_joint(1));
                assert!(!report.contains_joint(0));
                assert_eq!(report.aborted_at, None);
            }
            other => panic!("Unexpected result {:?}", other),
        }

        // The other joints carried on to the drop position and back home
        assert_eq!(arm.joints[0].get_angle(), Ok(Some(120.0)));
        assert_eq!(arm.joints[2].get_angle(), Ok(Some(45.0)));

        let status = arm.ctrl.get_status();
        assert!(status.ready);
        assert!(!status.busy);
        assert_eq!(status.position, UNKNOWN_POSITION);
    }

    #[test]
    fn test_init_failure_falls_back_to_simulation() {
        let arm = flaky_arm(fast_params());
        let events = record_events(&arm.ctrl);
        arm.joints[2].set_failing(true);

        assert_eq!(arm.ctrl.initialize().unwrap(), ArmMode::Faulted);

        let status = arm.ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Faulted);
        assert!(status.simulation);
        assert!(!status.ready);
        assert_eq!(status.position, HOME);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ArmEvent::HardwareUnavailable(ActuatorError::NotResponding(2)))));

        // Faulted still accepts commands, on the simulated actuators
        let report = arm.ctrl.handle(false).unwrap();
        assert_eq!(report.outcome, SeqOutcome::Completed);
        assert_eq!(arm.ctrl.get_status().mode, ArmMode::Faulted);
        assert_eq!(arm.joints[0].get_angle(), Ok(Some(90.0)));
    }

    #[test]
    fn test_fault_during_transit() {
        let arm = flaky_arm(fast_params());
        assert_eq!(arm.ctrl.initialize().unwrap(), ArmMode::Ready);

        // Joint 1 stays at its safe angle through transit, so it is only read, not written
        let joint_1 = arm.joints[1].clone();
        arm.ctrl.set_event_listener(move |e: &ArmEvent| match e {
            ArmEvent::StepStarted(SeqStep::Transit) => joint_1.set_failing(true),
            ArmEvent::StepStarted(SeqStep::Place) => joint_1.set_failing(false),
            _ => (),
        });

        match arm.ctrl.handle(false) {
            Err(MotionError::ActuatorFault(report)) => {
                assert!(report.contains_joint(1));
                assert_eq!(report.faults.len(), 1);
                assert_eq!(report.aborted_at, None);
            }
            other => panic!("Unexpected result {:?}", other),
        }

        let status = arm.ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Ready);
        assert_eq!(status.position, UNKNOWN_POSITION);
    }

    #[test]
    fn test_reinitialize_after_fallback_stays_faulted() {
        let arm = flaky_arm(fast_params());
        arm.joints[2].set_failing(true);

        assert_eq!(arm.ctrl.initialize().unwrap(), ArmMode::Faulted);
        assert_eq!(arm.ctrl.initialize().unwrap(), ArmMode::Faulted);

        let status = arm.ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Faulted);
        assert!(!status.ready);
        assert!(status.simulation);
        assert_eq!(status.position, HOME);

        // Still usable, and still faulted after a stop
        arm.ctrl.move_home().unwrap();
        arm.ctrl.emergency_stop();
        assert_eq!(arm.ctrl.get_status().mode, ArmMode::Faulted);
    }

    #[test]
    fn test_emergency_stop_during_initialize() {
        let params = ArmCtrlParams {
            neutral_pause_s: 0.3,
            ..fast_params()
        };
        let arm = flaky_arm(params);

        let ctrl = arm.ctrl.clone();
        let init = thread::spawn(move || ctrl.initialize());
        thread::sleep(Duration::from_millis(50));
        assert!(arm.ctrl.get_status().busy);

        arm.ctrl.emergency_stop();

        let status = arm.ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Ready);
        assert_eq!(status.position, UNKNOWN_POSITION);

        assert!(matches!(
            init.join().unwrap(),
            Err(MotionError::CancelledByEmergencyStop)
        ));
        assert_eq!(arm.ctrl.get_status().mode, ArmMode::Ready);

        // The arm accepts commands again
        arm.ctrl.move_home().unwrap();
        assert_eq!(arm.ctrl.get_status().position, HOME);
        assert!(!arm.ctrl.is_simulation());
    }

    #[test]
    fn test_emergency_stop_with_failing_reads() {
        let arm = flaky_arm(slow_params(20, 0.01));
        assert_eq!(arm.ctrl.initialize().unwrap(), ArmMode::Ready);

        let task = arm.ctrl.submit_handle(true).unwrap();
        thread::sleep(Duration::from_millis(30));

        arm.joints[0].set_failing(true);
        arm.ctrl.emergency_stop();

        let status = arm.ctrl.get_status();
        assert_eq!(status.mode, ArmMode::Ready);
        assert_eq!(status.position, UNKNOWN_POSITION);
        assert!(task.wait().is_err());

        // The readable joints were held where they stopped
        let angle = arm.joints[1].get_angle().unwrap().unwrap();
        assert!(angle < 45.0);

        arm.joints[0].set_failing(false);
        let report = arm.ctrl.handle(false).unwrap();
        assert_eq!(report.outcome, SeqOutcome::Completed);
    }

    #[test]
    fn test_move_to_and_gripper() {
        let ctrl = sim_ctrl(fast_params());

        assert!(matches!(
            ctrl.move_to("nowhere"),
            Err(MotionError::UnknownPosition(_))
        ));
        assert_eq!(ctrl.get_status().position, HOME);
        assert!(ctrl.get_status().ready);

        ctrl.move_to(PICKUP).unwrap();
        assert_eq!(ctrl.get_status().position, PICKUP);

        ctrl.gripper_open().unwrap();
        let status = ctrl.get_status();
        assert_eq!(status.gripper, GripperState::Open);
        assert_eq!(status.position, PICKUP);

        ctrl.shutdown();
        let status = ctrl.get_status();
        assert_eq!(status.position, HOME);
        assert_eq!(status.gripper, GripperState::Closed);
        assert!(status.ready);
    }
}
