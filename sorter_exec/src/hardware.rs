//! # Hardware backend
//!
//! Builds the servo actuators of the arm. On a Raspberry Pi the servos are driven by a PCA9685
//! board on the I2C bus, on any other host there is no hardware and the arm must be simulated.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use std::sync::{Arc, Mutex};

use crate::arm_ctrl::{
    actuator::{ServoActuator, ServoDriver},
    Actuator, ActuatorError, ActuatorSet, ArmBackend, ArmCtrlParams, JointId, MotionError,
};

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the arm hardware.
///
/// On failure the caller is expected to fall back to [`ArmBackend::Simulation`].
pub fn open_backend(params: &ArmCtrlParams) -> Result<ArmBackend, MotionError> {
    open_pca9685(params)
        .map(ArmBackend::Hardware)
        .map_err(MotionError::HardwareUnavailable)
}

/// Build one servo actuator per joint, plus the gripper, all sharing the same driver board.
pub fn servo_actuators<D, F>(
    driver: D,
    params: &ArmCtrlParams,
    channel_of: F,
) -> Result<ActuatorSet, ActuatorError>
where
    D: ServoDriver + 'static,
    F: Fn(JointId) -> Option<D::Channel>,
{
    let driver = Arc::new(Mutex::new(driver));

    let servo = |joint: JointId| -> Result<Arc<dyn Actuator>, ActuatorError> {
        let channel = channel_of(joint).ok_or_else(|| {
            ActuatorError::Unavailable(format!("The driver board has no channel {}", joint))
        })?;

        Ok(Arc::new(ServoActuator::new(
            joint,
            channel,
            driver.clone(),
            params.servo.pulse,
        )))
    };

    let joints = params
        .joint_channels
        .iter()
        .map(|&joint| servo(joint))
        .collect::<Result<Vec<_>, _>>()?;
    let gripper = servo(params.gripper_channel)?;

    Ok(ActuatorSet::new(joints, gripper))
}

#[cfg(all(target_arch = "arm", target_os = "linux", target_env = "gnu"))]
fn open_pca9685(params: &ArmCtrlParams) -> Result<ActuatorSet, ActuatorError> {
    use crate::arm_ctrl::actuator::pca9685::{channel_from_index, prescale_for};
    use pwm_pca9685::{Address, Pca9685};
    use rppal::i2c::I2c;

    let i2c = I2c::new()
        .map_err(|e| ActuatorError::Unavailable(format!("Cannot open the I2C bus: {}", e)))?;

    let mut pwm = Pca9685::new(i2c, Address::from(params.servo.i2c_address)).map_err(|e| {
        ActuatorError::Unavailable(format!("Cannot open the PCA9685 board: {:?}", e))
    })?;

    pwm.enable()
        .and_then(|_| pwm.set_prescale(prescale_for(params.servo.pulse.pwm_frequency_hz)))
        .map_err(|e| {
            ActuatorError::Unavailable(format!("Cannot configure the PCA9685 board: {:?}", e))
        })?;

    info!(
        "PCA9685 opened at address {:#04x}, {} Hz",
        params.servo.i2c_address, params.servo.pulse.pwm_frequency_hz
    );

    servo_actuators(pwm, params, channel_from_index)
}

#[cfg(not(all(target_arch = "arm", target_os = "linux", target_env = "gnu")))]
fn open_pca9685(_params: &ArmCtrlParams) -> Result<ActuatorSet, ActuatorError> {
    info!("Not running on a Raspberry Pi, no servo driver board is available");

    Err(ActuatorError::Unavailable(
        "There is no servo driver board on this host".into(),
    ))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::arm_ctrl::{actuator::ServoError, ArmCtrl, HOME};
    use comms_if::tm::ArmMode;

    /// Eight channel board which records the last duty cycle of each channel.
    struct TestBoard {
        duty: Arc<Mutex<[Option<f64>; 8]>>,
    }

    impl ServoDriver for TestBoard {
        type Channel = usize;

        fn set_duty_cycle(&mut self, channel: usize, duty_cycle: f64) -> Result<(), ServoError> {
            self.duty.lock().unwrap()[channel] = Some(duty_cycle);
            Ok(())
        }
    }

    fn channel_of(joint: JointId) -> Option<usize> {
        Some(joint as usize).filter(|&c| c < 8)
    }

    #[test]
    fn test_servo_actuators() {
        let duty = Arc::new(Mutex::new([None; 8]));
        let params = ArmCtrlParams::default();

        let set = servo_actuators(TestBoard { duty: duty.clone() }, &params, channel_of).unwrap();
        assert_eq!(set.joints().len(), 3);
        assert_eq!(set.gripper().id(), 3);

        set.gripper().set_angle(180.0).unwrap();
        set.joint(0).unwrap().set_angle(0.0).unwrap();

        let duty = duty.lock().unwrap();
        assert!((duty[3].unwrap() - 0.125).abs() < 1e-9);
        assert!((duty[0].unwrap() - 0.025).abs() < 1e-9);
        assert_eq!(duty[1], None);
    }

    #[test]
    fn test_missing_channel() {
        let mut params = ArmCtrlParams::default();
        params.gripper_channel = 12;

        let board = TestBoard {
            duty: Arc::new(Mutex::new([None; 8])),
        };
        assert!(matches!(
            servo_actuators(board, &params, channel_of),
            Err(ActuatorError::Unavailable(_))
        ));
    }

    #[cfg(not(all(target_arch = "arm", target_os = "linux", target_env = "gnu")))]
    #[test]
    fn test_no_hardware_off_target() {
        assert!(matches!(
            open_backend(&ArmCtrlParams::default()),
            Err(MotionError::HardwareUnavailable(ActuatorError::Unavailable(_)))
        ));
    }

    #[test]
    fn test_servo_backend_initialises() {
        let mut params = ArmCtrlParams::default();
        params.movement_steps = 2;
        params.movement_delay_s = 0.0;
        params.neutral_pause_s = 0.0;
        params.gripper_actuation_s = 0.0;

        let duty = Arc::new(Mutex::new([None; 8]));
        let set = servo_actuators(TestBoard { duty: duty.clone() }, &params, channel_of).unwrap();
        let ctrl = ArmCtrl::new(params, ArmBackend::Hardware(set)).unwrap();

        assert_eq!(ctrl.initialize().unwrap(), ArmMode::Ready);
        assert_eq!(ctrl.get_status().position, HOME);
        assert!(duty.lock().unwrap().iter().take(4).all(Option::is_some));
    }
}
