//! # Position table
//!
//! Named arm presets, loaded from the arm parameters. Positions are keyed by joint id, in the
//! parameter file that looks like:
//!
//! ```toml
//! [positions.home]
//! 0 = 120.0
//! 1 = 45.0
//! 2 = 45.0
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    convert::TryFrom,
};

use super::{
    JointId, DEFECTIVE, HOME, MAX_ANGLE_DEG, MIN_ANGLE_DEG, NON_DEFECTIVE, PICKUP,
    REQUIRED_POSITIONS,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Target angles for a set of joints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct Position(BTreeMap<JointId, f64>);

/// The named presets of the arm.
///
/// A table always contains the `home`, `pickup`, `defective` and `non_defective` presets, and all
/// of its angles are within the joint range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HashMap<String, Position>", into = "HashMap<String, Position>")]
pub struct PositionTable(HashMap<String, Position>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("The required position \"{0}\" is missing from the position table")]
    MissingPreset(String),

    #[error("Joint {joint} of position \"{position}\" is at {angle_deg} deg, outside of 0 to 180 deg")]
    AngleOutOfRange {
        position: String,
        joint: JointId,
        angle_deg: f64,
    },

    #[error("\"{0}\" is not a valid joint id")]
    InvalidJointId(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Position {
    pub fn new(angles: BTreeMap<JointId, f64>) -> Self {
        Self(angles)
    }

    pub fn from_pairs(pairs: &[(JointId, f64)]) -> Self {
        Self(pairs.iter().copied().collect())
    }

    /// Target angle of the given joint, if the position sets it.
    pub fn angle(&self, joint: JointId) -> Option<f64> {
        self.0.get(&joint).copied()
    }

    /// Iterate over `(joint, angle)` pairs in joint order.
    pub fn iter(&self) -> impl Iterator<Item = (JointId, f64)> + '_ {
        self.0.iter().map(|(&j, &a)| (j, a))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This position without the given joint.
    pub fn without(&self, joint: JointId) -> Position {
        let mut angles = self.0.clone();
        angles.remove(&joint);
        Position(angles)
    }

    /// The intermediate position above this one.
    ///
    /// Keeps the angle of the horizontal joint and takes every other angle from `safe`, so that
    /// the arm can swing horizontally without dragging over the work surface.
    pub fn with_safe_height(&self, horizontal_joint: JointId, safe: &Position) -> Position {
        let mut angles = safe.0.clone();

        match self.angle(horizontal_joint) {
            Some(angle_deg) => {
                angles.insert(horizontal_joint, angle_deg);
            }
            None => {
                angles.remove(&horizontal_joint);
            }
        }

        Position(angles)
    }

    /// Check every angle is within the joint range.
    fn validate(&self, name: &str) -> Result<(), PositionError> {
        match self
            .iter()
            .find(|&(_, a)| !(a >= MIN_ANGLE_DEG && a <= MAX_ANGLE_DEG))
        {
            Some((joint, angle_deg)) => Err(PositionError::AngleOutOfRange {
                position: name.to_string(),
                joint,
                angle_deg,
            }),
            None => Ok(()),
        }
    }
}

impl TryFrom<BTreeMap<String, f64>> for Position {
    type Error = PositionError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        map.into_iter()
            .map(|(key, angle_deg)| {
                key.trim()
                    .parse::<JointId>()
                    .map(|joint| (joint, angle_deg))
                    .map_err(|_| PositionError::InvalidJointId(key))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Position)
    }
}

impl From<Position> for BTreeMap<String, f64> {
    fn from(position: Position) -> Self {
        position
            .0
            .into_iter()
            .map(|(joint, angle_deg)| (joint.to_string(), angle_deg))
            .collect()
    }
}

impl PositionTable {
    /// Build a table, checking the required presets are present and the angles are valid.
    pub fn new(positions: HashMap<String, Position>) -> Result<Self, PositionError> {
        for &name in REQUIRED_POSITIONS.iter() {
            if !positions.contains_key(name) {
                return Err(PositionError::MissingPreset(name.to_string()));
            }
        }

        for (name, position) in positions.iter() {
            position.validate(name)?;
        }

        Ok(Self(positions))
    }

    pub fn get(&self, name: &str) -> Option<&Position> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Names of all presets, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.0.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PositionTable {
    fn default() -> Self {
        let mut positions = HashMap::new();
        positions.insert(
            HOME.to_string(),
            Position::from_pairs(&[(0, 120.0), (1, 45.0), (2, 45.0)]),
        );
        positions.insert(
            PICKUP.to_string(),
            Position::from_pairs(&[(0, 0.0), (1, 0.0), (2, 180.0)]),
        );
        positions.insert(
            DEFECTIVE.to_string(),
            Position::from_pairs(&[(0, 180.0), (1, 0.0), (2, 180.0)]),
        );
        positions.insert(
            NON_DEFECTIVE.to_string(),
            Position::from_pairs(&[(0, 90.0), (1, 0.0), (2, 180.0)]),
        );

        Self(positions)
    }
}

impl TryFrom<HashMap<String, Position>> for PositionTable {
    type Error = PositionError;

    fn try_from(positions: HashMap<String, Position>) -> Result<Self, Self::Error> {
        Self::new(positions)
    }
}

impl From<PositionTable> for HashMap<String, Position> {
    fn from(table: PositionTable) -> Self {
        table.0
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
