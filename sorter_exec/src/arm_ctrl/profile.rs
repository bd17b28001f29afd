//! # Motion profile generator
//!
//! A [`MotionProfile`] is the eased sequence of angles a joint passes through when moving from a
//! start angle to a target angle in a fixed number of steps.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use util::maths::{clamp, lerp};

use super::{MAX_ANGLE_DEG, MIN_ANGLE_DEG, MIN_MOVE_DEG};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An eased interpolation between two angles.
///
/// The profile is a pure value: iterating it has no side effects and it can be iterated any
/// number of times, always producing the same samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    start_deg: f64,
    target_deg: f64,
    steps: usize,
    step_delay: Duration,
}

/// One sample of a motion profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Angle to command.
    ///
    /// Units: degrees
    pub angle_deg: f64,

    /// Time to wait after commanding the angle.
    pub delay: Duration,
}

/// Iterator over the samples of a [`MotionProfile`].
#[derive(Debug, Clone)]
pub struct ProfileIter {
    profile: MotionProfile,
    next_step: usize,
    len: usize,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Quadratic ease-in/ease-out of a normalised progress `t` in `[0, 1]`.
pub fn ease_in_out_quad(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - 2.0 * (1.0 - t) * (1.0 - t)
    }
}

/// Clamp an angle into the commandable range.
pub fn clamp_angle(angle_deg: f64) -> f64 {
    clamp(angle_deg, MIN_ANGLE_DEG, MAX_ANGLE_DEG)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotionProfile {
    /// Create a new profile.
    ///
    /// Both angles are clamped into `[0, 180]`. A step count of zero is treated as one.
    pub fn new(start_deg: f64, target_deg: f64, steps: usize, step_delay: Duration) -> Self {
        Self {
            start_deg: clamp_angle(start_deg),
            target_deg: clamp_angle(target_deg),
            steps: steps.max(1),
            step_delay,
        }
    }

    pub fn start_deg(&self) -> f64 {
        self.start_deg
    }

    pub fn target_deg(&self) -> f64 {
        self.target_deg
    }

    /// Number of samples the profile yields, zero for negligible moves.
    pub fn len(&self) -> usize {
        if (self.target_deg - self.start_deg).abs() < MIN_MOVE_DEG {
            0
        } else {
            self.steps
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total time taken to play the profile.
    pub fn duration(&self) -> Duration {
        self.step_delay * self.len() as u32
    }

    /// Get an iterator over the samples, starting from the first.
    pub fn iter(&self) -> ProfileIter {
        ProfileIter {
            profile: *self,
            next_step: 1,
            len: self.len(),
        }
    }

    /// Angle of the sample at `step` (1-based).
    fn angle_at(&self, step: usize) -> f64 {
        // The final sample is exactly the target, without any rounding from the easing
        if step >= self.steps {
            return self.target_deg;
        }

        let t = step as f64 / self.steps as f64;
        lerp(self.start_deg, self.target_deg, ease_in_out_quad(t))
    }
}

impl IntoIterator for &MotionProfile {
    type Item = Sample;
    type IntoIter = ProfileIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Iterator for ProfileIter {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_step > self.len {
            return None;
        }

        let sample = Sample {
            angle_deg: self.profile.angle_at(self.next_step),
            delay: self.profile.step_delay,
        };
        self.next_step += 1;

        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.len + 1).saturating_sub(self.next_step);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ProfileIter {}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const DELAY: Duration = Duration::from_millis(10);

    #[test]
    fn test_ease_in_out_quad() {
        assert_eq!(ease_in_out_quad(0.0), 0.0);
        assert_eq!(ease_in_out_quad(0.25), 0.125);
        assert_eq!(ease_in_out_quad(0.5), 0.5);
        assert_eq!(ease_in_out_quad(0.75), 0.875);
        assert_eq!(ease_in_out_quad(1.0), 1.0);
    }

    #[test]
    fn test_final_sample_is_exact_target() {
        let starts = [0.0, 0.3, 17.7, 90.0, 133.3, 180.0];
        let targets = [-20.0, 0.0, 1.1, 45.5, 99.999, 179.3, 180.0, 250.0];

        for &start in starts.iter() {
            for &target in targets.iter() {
                for &steps in [1usize, 2, 3, 7, 50, 101].iter() {
                    let profile = MotionProfile::new(start, target, steps, DELAY);
                    let expected = clamp_angle(target);

                    if (expected - clamp_angle(start)).abs() < MIN_MOVE_DEG {
                        assert!(profile.is_empty());
                        continue;
                    }

                    let samples: Vec<Sample> = profile.iter().collect();
                    assert_eq!(samples.len(), steps);
                    assert_eq!(samples.last().unwrap().angle_deg, expected);
                }
            }
        }
    }

    #[test]
    fn test_negligible_moves_are_empty() {
        assert_eq!(MotionProfile::new(90.0, 90.0, 50, DELAY).iter().count(), 0);
        assert_eq!(MotionProfile::new(90.0, 90.99, 50, DELAY).iter().count(), 0);
        assert_eq!(MotionProfile::new(45.0, 44.01, 50, DELAY).iter().count(), 0);

        // Both ends are clamped before the comparison
        assert_eq!(MotionProfile::new(190.0, 200.0, 50, DELAY).iter().count(), 0);
        assert_eq!(MotionProfile::new(-5.0, 0.5, 50, DELAY).iter().count(), 0);

        assert_eq!(MotionProfile::new(90.0, 91.0, 50, DELAY).iter().count(), 50);
    }

    #[test]
    fn test_profile_shape() {
        let profile = MotionProfile::new(0.0, 180.0, 4, DELAY);
        let angles: Vec<f64> = profile.iter().map(|s| s.angle_deg).collect();

        assert_eq!(angles, vec![22.5, 90.0, 157.5, 180.0]);
        assert!(profile.iter().all(|s| s.delay == DELAY));
        assert_eq!(profile.duration(), DELAY * 4);

        // Moving down mirrors moving up
        let down: Vec<f64> = MotionProfile::new(180.0, 0.0, 4, DELAY)
            .iter()
            .map(|s| s.angle_deg)
            .collect();
        assert_eq!(down, vec![157.5, 90.0, 22.5, 0.0]);
    }

    #[test]
    fn test_profile_is_restartable() {
        let profile = MotionProfile::new(10.0, 120.0, 9, DELAY);

        let first: Vec<Sample> = profile.iter().collect();
        let second: Vec<Sample> = (&profile).into_iter().collect();
        assert_eq!(first, second);

        let mut iter = profile.iter();
        assert_eq!(iter.len(), 9);
        iter.next();
        assert_eq!(iter.len(), 8);
    }

    #[test]
    fn test_profile_is_monotonic() {
        let profile = MotionProfile::new(30.0, 150.0, 50, DELAY);
        let angles: Vec<f64> = profile.iter().map(|s| s.angle_deg).collect();

        assert!(angles.windows(2).all(|w| w[1] >= w[0]));
        assert!(angles.iter().all(|&a| a > 30.0 && a <= 150.0));
    }

    #[test]
    fn test_zero_steps() {
        let samples: Vec<Sample> = MotionProfile::new(0.0, 90.0, 0, DELAY).iter().collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].angle_deg, 90.0);
    }
}
