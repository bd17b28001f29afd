//! # Actuators
//!
//! An [`Actuator`] is a single joint of the arm, or the gripper. Actuators are shared between the
//! controller and the per-joint mover threads so all operations take `&self`.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`ServoDriver`] implementation for the PCA9685 16 channel servo driver board.
pub mod pca9685;
mod servo;
mod sim;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use servo::{PulseRange, ServoActuator, ServoDriver, ServoError};
pub use sim::SimActuator;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;
use std::{fmt, sync::Arc};

use super::{JointId, Position, MAX_ANGLE_DEG, MIN_ANGLE_DEG};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A single positional actuator.
pub trait Actuator: Send + Sync {
    /// The joint this actuator drives.
    fn id(&self) -> JointId;

    /// Command the actuator to the given angle.
    ///
    /// Angles outside [`Actuator::range`] are rejected with [`ActuatorError::OutOfRange`].
    fn set_angle(&self, angle_deg: f64) -> Result<(), ActuatorError>;

    /// Get the last known angle of the actuator, or `None` if it has never been commanded.
    fn get_angle(&self) -> Result<Option<f64>, ActuatorError>;

    /// The valid range of the actuator as `(min, max)`.
    fn range(&self) -> (f64, f64) {
        (MIN_ANGLE_DEG, MAX_ANGLE_DEG)
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The actuators of one arm: the positional joints plus the gripper.
#[derive(Clone)]
pub struct ActuatorSet {
    joints: Vec<Arc<dyn Actuator>>,
    gripper: Arc<dyn Actuator>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum ActuatorError {
    #[error(
        "Angle {angle_deg:.1} deg is outside the range of joint {joint} \
        ({min_deg:.1} to {max_deg:.1} deg)"
    )]
    OutOfRange {
        joint: JointId,
        angle_deg: f64,
        min_deg: f64,
        max_deg: f64,
    },

    #[error("Servo driver error on joint {joint}: {error}")]
    Driver { joint: JointId, error: ServoError },

    #[error("Joint {0} is not responding")]
    NotResponding(JointId),

    #[error("No actuator is attached to joint {0}")]
    NoSuchJoint(JointId),

    #[error("The mover thread of joint {0} panicked")]
    MoverPanicked(JointId),

    #[error("{0}")]
    Unavailable(String),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check that an angle is within the given range, NaN is always out of range.
pub(crate) fn check_range(
    joint: JointId,
    angle_deg: f64,
    range: (f64, f64),
) -> Result<(), ActuatorError> {
    if angle_deg >= range.0 && angle_deg <= range.1 {
        Ok(())
    } else {
        Err(ActuatorError::OutOfRange {
            joint,
            angle_deg,
            min_deg: range.0,
            max_deg: range.1,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ActuatorSet {
    pub fn new(joints: Vec<Arc<dyn Actuator>>, gripper: Arc<dyn Actuator>) -> Self {
        Self { joints, gripper }
    }

    /// Build a fully simulated actuator set.
    ///
    /// Joints named in `start` begin at that angle, all others begin unknown.
    pub fn simulated(
        joint_ids: &[JointId],
        gripper_id: JointId,
        start: &Position,
        gripper_deg: f64,
    ) -> Self {
        let joints = joint_ids
            .iter()
            .map(|&id| {
                let sim = match start.angle(id) {
                    Some(angle_deg) => SimActuator::at(id, angle_deg),
                    None => SimActuator::new(id),
                };
                Arc::new(sim) as Arc<dyn Actuator>
            })
            .collect();

        Self {
            joints,
            gripper: Arc::new(SimActuator::at(gripper_id, gripper_deg)),
        }
    }

    /// Get the actuator of a positional joint.
    pub fn joint(&self, id: JointId) -> Option<&Arc<dyn Actuator>> {
        self.joints.iter().find(|a| a.id() == id)
    }

    pub fn joints(&self) -> &[Arc<dyn Actuator>] {
        &self.joints
    }

    pub fn gripper(&self) -> &Arc<dyn Actuator> {
        &self.gripper
    }

    /// Iterate over all actuators, the gripper last.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Actuator>> {
        self.joints.iter().chain(std::iter::once(&self.gripper))
    }
}

impl fmt::Debug for ActuatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joints: Vec<JointId> = self.joints.iter().map(|a| a.id()).collect();

        f.debug_struct("ActuatorSet")
            .field("joints", &joints)
            .field("gripper", &self.gripper.id())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 0.0, (0.0, 180.0)).is_ok());
        assert!(check_range(0, 180.0, (0.0, 180.0)).is_ok());
        assert!(check_range(0, -0.1, (0.0, 180.0)).is_err());
        assert!(check_range(0, 180.1, (0.0, 180.0)).is_err());
        assert!(check_range(0, f64::NAN, (0.0, 180.0)).is_err());
    }

    #[test]
    fn test_simulated_set() {
        let start = Position::from_pairs(&[(0, 120.0), (1, 45.0)]);
        let set = ActuatorSet::simulated(&[0, 1, 2], 3, &start, 180.0);

        assert_eq!(set.joints().len(), 3);
        assert_eq!(set.iter().count(), 4);
        assert_eq!(set.joint(0).unwrap().get_angle(), Ok(Some(120.0)));
        assert_eq!(set.joint(1).unwrap().get_angle(), Ok(Some(45.0)));
        assert_eq!(set.joint(2).unwrap().get_angle(), Ok(None));
        assert!(set.joint(3).is_none());
        assert_eq!(set.gripper().id(), 3);
        assert_eq!(set.gripper().get_angle(), Ok(Some(180.0)));
    }
}
