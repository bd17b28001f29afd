//! Actuators and settings shared by the arm control tests

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use super::{Actuator, ActuatorError, ArmCtrlParams, JointId, MoveTiming, SimActuator};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Simulated actuator which can be made to fail on demand and records its writes.
///
/// A failing actuator rejects both reads and writes, like a servo board that dropped off the bus.
pub struct FlakyActuator {
    inner: SimActuator,
    failing: AtomicBool,
    history: Mutex<Vec<f64>>,
}

/// Actuator which panics whenever it is used.
pub struct PanickingActuator {
    joint: JointId,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

pub fn fast_timing() -> MoveTiming {
    MoveTiming {
        steps: 5,
        step_delay: Duration::from_millis(1),
    }
}

/// Arm parameters with millisecond timings.
pub fn fast_params() -> ArmCtrlParams {
    ArmCtrlParams {
        movement_steps: 5,
        movement_delay_s: 0.001,
        settle_pause_s: 0.001,
        gripper_actuation_s: 0.002,
        neutral_pause_s: 0.001,
        sim_time_scale: 1.0,
        ..ArmCtrlParams::default()
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FlakyActuator {
    pub fn new(joint: JointId, angle_deg: Option<f64>) -> Self {
        let inner = match angle_deg {
            Some(a) => SimActuator::at(joint, a),
            None => SimActuator::new(joint),
        };

        Self {
            inner,
            failing: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every angle successfully written so far.
    pub fn history(&self) -> Vec<f64> {
        self.history.lock().unwrap().clone()
    }
}

impl Actuator for FlakyActuator {
    fn id(&self) -> JointId {
        self.inner.id()
    }

    fn set_angle(&self, angle_deg: f64) -> Result<(), ActuatorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActuatorError::NotResponding(self.id()));
        }

        self.inner.set_angle(angle_deg)?;
        self.history.lock().unwrap().push(angle_deg);
        Ok(())
    }

    fn get_angle(&self) -> Result<Option<f64>, ActuatorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ActuatorError::NotResponding(self.id()));
        }

        self.inner.get_angle()
    }
}

impl PanickingActuator {
    pub fn new(joint: JointId) -> Self {
        Self { joint }
    }
}

impl Actuator for PanickingActuator {
    fn id(&self) -> JointId {
        self.joint
    }

    fn set_angle(&self, _angle_deg: f64) -> Result<(), ActuatorError> {
        panic!("Actuator {} exploded", self.joint)
    }

    fn get_angle(&self) -> Result<Option<f64>, ActuatorError> {
        Ok(Some(0.0))
    }
}
