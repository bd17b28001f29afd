//! Parameters structure for ArmCtrl

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    actuator::PulseRange, JointId, MoveTiming, Position, PositionTable, MAX_ANGLE_DEG,
    MIN_ANGLE_DEG,
};
use util::time::seconds_to_std;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Parameters for Arm control.
///
/// Every field has a default, so a parameter file only needs to list what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmCtrlParams {
    // ---- CHANNELS ----
    /// Channels of the positional joints, which are also their joint ids.
    pub joint_channels: Vec<JointId>,

    /// Channel of the gripper servo.
    pub gripper_channel: JointId,

    /// Joint which swings the arm horizontally between the pickup and drop positions.
    pub horizontal_joint: JointId,

    // ---- POSITIONS ----
    /// Angles of the non-horizontal joints which lift the arm clear of the work surface.
    pub safe_height: Position,

    /// Named arm presets.
    pub positions: PositionTable,

    // ---- GRIPPER ----
    /// Units: degrees
    pub gripper_open_deg: f64,

    /// Units: degrees
    pub gripper_closed_deg: f64,

    /// Gripper transitions smaller than this are skipped during coordinated moves.
    ///
    /// Units: degrees
    pub gripper_skip_threshold_deg: f64,

    // ---- TIMING ----
    /// Number of interpolation steps in one joint move.
    pub movement_steps: usize,

    /// Delay after each interpolation step.
    ///
    /// Units: seconds
    pub movement_delay_s: f64,

    /// Pause between two steps of a sequence.
    ///
    /// Units: seconds
    pub settle_pause_s: f64,

    /// Time given to the gripper to open or close.
    ///
    /// Units: seconds
    pub gripper_actuation_s: f64,

    /// Angle every joint is sent to, one by one, when the hardware is initialised.
    ///
    /// Units: degrees
    pub neutral_angle_deg: f64,

    /// Pause after each joint reaches the neutral angle.
    ///
    /// Units: seconds
    pub neutral_pause_s: f64,

    /// Factor applied to every delay when running in simulation.
    pub sim_time_scale: f64,

    // ---- HARDWARE ----
    pub servo: ServoParams,
}

/// Parameters of the servo driver board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoParams {
    /// I2C address of the PCA9685 board.
    pub i2c_address: u8,

    /// Pulse range and PWM frequency of the servos.
    pub pulse: PulseRange,
}

/// Concrete delays used by a run, once the simulation scaling has been applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub timing: MoveTiming,
    pub settle: Duration,
    pub gripper_actuation: Duration,
    pub neutral_pause: Duration,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ArmCtrlParams {
    fn default() -> Self {
        Self {
            joint_channels: vec![0, 1, 2],
            gripper_channel: 3,
            horizontal_joint: 0,
            safe_height: Position::from_pairs(&[(1, 45.0), (2, 45.0)]),
            positions: PositionTable::default(),
            gripper_open_deg: 0.0,
            gripper_closed_deg: 180.0,
            gripper_skip_threshold_deg: 5.0,
            movement_steps: 50,
            movement_delay_s: 0.01,
            settle_pause_s: 0.5,
            gripper_actuation_s: 1.0,
            neutral_angle_deg: 90.0,
            neutral_pause_s: 0.1,
            sim_time_scale: 0.2,
            servo: ServoParams::default(),
        }
    }
}

impl Default for ServoParams {
    fn default() -> Self {
        Self {
            i2c_address: 0x40,
            pulse: PulseRange::default(),
        }
    }
}

impl ArmCtrlParams {
    /// Check the parameters are consistent, returning a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.joint_channels.is_empty() {
            return Err("no joint channels are configured".into());
        }

        if self.joint_channels.contains(&self.gripper_channel) {
            return Err(format!(
                "gripper channel {} is also a joint channel",
                self.gripper_channel
            ));
        }

        let mut sorted = self.joint_channels.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != self.joint_channels.len() {
            return Err("joint channels must be unique".into());
        }

        if !self.joint_channels.contains(&self.horizontal_joint) {
            return Err(format!(
                "horizontal joint {} is not a joint channel",
                self.horizontal_joint
            ));
        }

        let angles = [
            ("gripper_open_deg", self.gripper_open_deg),
            ("gripper_closed_deg", self.gripper_closed_deg),
            ("neutral_angle_deg", self.neutral_angle_deg),
        ];
        for &(name, angle) in angles.iter() {
            if !(angle >= MIN_ANGLE_DEG && angle <= MAX_ANGLE_DEG) {
                return Err(format!("{} ({}) must be within 0 to 180 deg", name, angle));
            }
        }

        if let Some((joint, angle)) = self
            .safe_height
            .iter()
            .find(|&(_, a)| !(a >= MIN_ANGLE_DEG && a <= MAX_ANGLE_DEG))
        {
            return Err(format!(
                "safe height of joint {} ({}) must be within 0 to 180 deg",
                joint, angle
            ));
        }

        let durations = [
            ("movement_delay_s", self.movement_delay_s),
            ("settle_pause_s", self.settle_pause_s),
            ("gripper_actuation_s", self.gripper_actuation_s),
            ("neutral_pause_s", self.neutral_pause_s),
            ("sim_time_scale", self.sim_time_scale),
        ];
        for &(name, value) in durations.iter() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("{} ({}) must be a non-negative number", name, value));
            }
        }

        let pulse = &self.servo.pulse;
        if !(pulse.pwm_frequency_hz > 0.0 && pulse.min_pulse_us < pulse.max_pulse_us) {
            return Err("servo pulse range is invalid".into());
        }

        Ok(())
    }

    /// Delays to use, scaled down when running in simulation.
    pub fn pacing(&self, simulation: bool) -> Pacing {
        let scale = if simulation { self.sim_time_scale } else { 1.0 };

        Pacing {
            timing: MoveTiming {
                steps: self.movement_steps,
                step_delay: seconds_to_std(self.movement_delay_s * scale),
            },
            settle: seconds_to_std(self.settle_pause_s * scale),
            gripper_actuation: seconds_to_std(self.gripper_actuation_s * scale),
            neutral_pause: seconds_to_std(self.neutral_pause_s * scale),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(ArmCtrlParams::default().validate(), Ok(()));
    }

    #[test]
    fn test_partial_file() {
        let params: ArmCtrlParams = util::params::from_toml_str(
            r#"
            gripper_channel = 5
            movement_steps = 10

            [servo]
            i2c_address = 65
        "#,
        )
        .unwrap();

        assert_eq!(params.gripper_channel, 5);
        assert_eq!(params.movement_steps, 10);
        assert_eq!(params.servo.i2c_address, 0x41);
        assert_eq!(params.servo.pulse, PulseRange::default());
        assert_eq!(params.joint_channels, vec![0, 1, 2]);
        assert_eq!(params.positions, PositionTable::default());
    }

    #[test]
    fn test_invalid_params() {
        let mut params = ArmCtrlParams::default();
        params.gripper_channel = 1;
        assert!(params.validate().is_err());

        let mut params = ArmCtrlParams::default();
        params.horizontal_joint = 7;
        assert!(params.validate().is_err());

        let mut params = ArmCtrlParams::default();
        params.settle_pause_s = -1.0;
        assert!(params.validate().is_err());

        let mut params = ArmCtrlParams::default();
        params.joint_channels = vec![0, 0, 2];
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_pacing() {
        let params = ArmCtrlParams::default();

        let hw = params.pacing(false);
        assert_eq!(hw.timing.steps, 50);
        assert_eq!(hw.timing.step_delay, Duration::from_millis(10));
        assert_eq!(hw.settle, Duration::from_millis(500));
        assert_eq!(hw.gripper_actuation, Duration::from_secs(1));

        let sim = params.pacing(true);
        assert_eq!(sim.settle, Duration::from_millis(100));
        assert!(sim.gripper_actuation < hw.gripper_actuation);
    }
}
