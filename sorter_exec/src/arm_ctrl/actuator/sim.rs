//! Simulated actuator

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, PoisonError};

use super::{check_range, Actuator, ActuatorError};
use crate::arm_ctrl::{JointId, MAX_ANGLE_DEG, MIN_ANGLE_DEG};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An actuator which only remembers the last commanded angle.
#[derive(Debug)]
pub struct SimActuator {
    joint: JointId,
    angle_deg: Mutex<Option<f64>>,
    range: (f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimActuator {
    /// Create a simulated actuator whose angle is unknown.
    pub fn new(joint: JointId) -> Self {
        Self {
            joint,
            angle_deg: Mutex::new(None),
            range: (MIN_ANGLE_DEG, MAX_ANGLE_DEG),
        }
    }

    /// Create a simulated actuator starting at the given angle.
    pub fn at(joint: JointId, angle_deg: f64) -> Self {
        Self {
            joint,
            angle_deg: Mutex::new(Some(angle_deg)),
            range: (MIN_ANGLE_DEG, MAX_ANGLE_DEG),
        }
    }

    /// Restrict the range of the actuator.
    pub fn with_range(mut self, min_deg: f64, max_deg: f64) -> Self {
        self.range = (min_deg, max_deg);
        self
    }
}

impl Actuator for SimActuator {
    fn id(&self) -> JointId {
        self.joint
    }

    fn set_angle(&self, angle_deg: f64) -> Result<(), ActuatorError> {
        check_range(self.joint, angle_deg, self.range)?;

        *self
            .angle_deg
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(angle_deg);

        Ok(())
    }

    fn get_angle(&self) -> Result<Option<f64>, ActuatorError> {
        Ok(*self
            .angle_deg
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn range(&self) -> (f64, f64) {
        self.range
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sim_actuator() {
        let sim = SimActuator::new(2);
        assert_eq!(sim.id(), 2);
        assert_eq!(sim.get_angle(), Ok(None));

        sim.set_angle(45.0).unwrap();
        assert_eq!(sim.get_angle(), Ok(Some(45.0)));

        // Rejected writes leave the angle unchanged
        assert!(matches!(
            sim.set_angle(181.0),
            Err(ActuatorError::OutOfRange { joint: 2, .. })
        ));
        assert_eq!(sim.get_angle(), Ok(Some(45.0)));
    }

    #[test]
    fn test_restricted_range() {
        let sim = SimActuator::at(0, 20.0).with_range(10.0, 170.0);
        assert_eq!(sim.range(), (10.0, 170.0));
        assert!(sim.set_angle(5.0).is_err());
        assert!(sim.set_angle(170.0).is_ok());
    }
}
