//! # Servo actuators
//!
//! Hobby servos are positioned by the width of a pulse repeated at a fixed PWM frequency. A
//! [`ServoActuator`] converts an angle into that pulse width and then into a duty cycle for a
//! channel of a shared [`ServoDriver`] board.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use super::{check_range, Actuator, ActuatorError};
use crate::arm_ctrl::{JointId, MAX_ANGLE_DEG, MIN_ANGLE_DEG};
use util::maths::lin_map;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing servo driver boards.
pub trait ServoDriver: Send {
    /// The type that the underlying driver uses for channel identification
    type Channel: Copy + Debug + Send + Sync + 'static;

    /// Set the duty cycle of a channel.
    ///
    /// ## Arguments
    /// - `channel` - The channel to set the duty cycle for
    /// - `duty_cycle` - The duty cycle to set. Must be a value between 0.0 and 1.0. Values outside
    ///   this range will be rejected.
    fn set_duty_cycle(&mut self, channel: Self::Channel, duty_cycle: f64) -> Result<(), ServoError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pulse widths of a servo at either end of its travel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseRange {
    /// Pulse width at 0 degrees.
    ///
    /// Units: microseconds
    pub min_pulse_us: f64,

    /// Pulse width at 180 degrees.
    ///
    /// Units: microseconds
    pub max_pulse_us: f64,

    /// Units: hertz
    pub pwm_frequency_hz: f64,
}

/// A servo connected to one channel of a driver board.
///
/// Several servos usually share a single board, so the driver is behind an `Arc<Mutex<_>>`.
/// Servos cannot report their position, so the last successfully commanded angle is cached and
/// returned by [`Actuator::get_angle`].
pub struct ServoActuator<D: ServoDriver> {
    joint: JointId,
    channel: D::Channel,
    driver: Arc<Mutex<D>>,
    pulse: PulseRange,
    last_angle_deg: Mutex<Option<f64>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ServoError {
    #[error("An I2C error occured")]
    I2c,

    #[error("Duty cycle must be between 0.0 and 1.0")]
    InvalidDutyCycle,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PulseRange {
    fn default() -> Self {
        Self {
            min_pulse_us: 500.0,
            max_pulse_us: 2500.0,
            pwm_frequency_hz: 50.0,
        }
    }
}

impl PulseRange {
    /// Length of one PWM period.
    ///
    /// Units: microseconds
    pub fn period_us(&self) -> f64 {
        1e6 / self.pwm_frequency_hz
    }

    /// Pulse width for the given angle.
    pub fn angle_to_pulse_us(&self, angle_deg: f64) -> f64 {
        lin_map(
            (MIN_ANGLE_DEG, MAX_ANGLE_DEG),
            (self.min_pulse_us, self.max_pulse_us),
            angle_deg,
        )
    }

    /// Duty cycle for the given angle.
    pub fn angle_to_duty_cycle(&self, angle_deg: f64) -> f64 {
        self.angle_to_pulse_us(angle_deg) / self.period_us()
    }
}

impl<D: ServoDriver> ServoActuator<D> {
    pub fn new(joint: JointId, channel: D::Channel, driver: Arc<Mutex<D>>, pulse: PulseRange) -> Self {
        Self {
            joint,
            channel,
            driver,
            pulse,
            last_angle_deg: Mutex::new(None),
        }
    }
}

impl<D: ServoDriver> Actuator for ServoActuator<D> {
    fn id(&self) -> JointId {
        self.joint
    }

    fn set_angle(&self, angle_deg: f64) -> Result<(), ActuatorError> {
        check_range(self.joint, angle_deg, self.range())?;

        let duty_cycle = self.pulse.angle_to_duty_cycle(angle_deg);

        {
            // A poisoned driver means another joint panicked mid write, the board state is not
            // trusted any more
            let mut driver = self
                .driver
                .lock()
                .map_err(|_| ActuatorError::NotResponding(self.joint))?;

            driver
                .set_duty_cycle(self.channel, duty_cycle)
                .map_err(|error| ActuatorError::Driver {
                    joint: self.joint,
                    error,
                })?;
        }

        trace!(
            "Servo {} ({:?}) set to {:.2} deg (duty {:.4})",
            self.joint,
            self.channel,
            angle_deg,
            duty_cycle
        );

        *self
            .last_angle_deg
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(angle_deg);

        Ok(())
    }

    fn get_angle(&self) -> Result<Option<f64>, ActuatorError> {
        Ok(*self
            .last_angle_deg
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
