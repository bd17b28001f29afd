//! [`ServoDriver`] implementation for the PCA9685 driver

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use embedded_hal::blocking::i2c::{Write, WriteRead};
use pwm_pca9685::{Channel, Pca9685};

use super::{ServoDriver, ServoError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const MAX_PWM: u16 = 4096;

/// Prescale value giving a 50 Hz PWM frequency from the 25 MHz internal oscillator.
pub const PRESCALE_50_HZ: u8 = 121;

/// Number of channels on one board.
pub const NUM_CHANNELS: u8 = 16;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Prescale value for the given PWM frequency, as in the PCA9685 datasheet.
pub fn prescale_for(pwm_frequency_hz: f64) -> u8 {
    let prescale = (25e6 / (f64::from(MAX_PWM) * pwm_frequency_hz)).round() - 1.0;

    // The board only accepts prescale values in [3, 255]
    util::maths::clamp(prescale, 3.0, 255.0) as u8
}

/// Get the PCA9685 channel with the given index.
pub fn channel_from_index(index: u8) -> Option<Channel> {
    let channel = match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        _ => return None,
    };

    Some(channel)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> ServoDriver for Pca9685<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E> + Send,
{
    type Channel = Channel;

    fn set_duty_cycle(&mut self, channel: Self::Channel, duty_cycle: f64) -> Result<(), ServoError> {
        // If the duty cycle is out of range return an error
        if !(0.0..=1.0).contains(&duty_cycle) {
            return Err(ServoError::InvalidDutyCycle);
        }

        // Pulse starts at count 0 and ends at the count matching the duty cycle
        let off = ((duty_cycle * f64::from(MAX_PWM)) as u16).min(MAX_PWM - 1);

        match self.set_channel_on_off(channel, 0, off) {
            Ok(_) => Ok(()),
            Err(pwm_pca9685::Error::InvalidInputData) => Err(ServoError::InvalidDutyCycle),
            Err(_) => Err(ServoError::I2c),
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
    fn test_channel_from_index() {
        assert_eq!(channel_from_index(0), Some(Channel::C0));
        assert_eq!(channel_from_index(15), Some(Channel::C15));
        assert_eq!(channel_from_index(NUM_CHANNELS), None);
    }

    #[test]
    fn test_prescale() {
        assert_eq!(prescale_for(50.0), PRESCALE_50_HZ);
        assert_eq!(prescale_for(1.0), 255);
        assert_eq!(prescale_for(10_000.0), 3);
    }
}
