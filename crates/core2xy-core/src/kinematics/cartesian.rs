// Cartesian kinematics - one stepper per axis

use std::fmt;

use crate::{
    itersolve::{ActiveFlags, CalcPositionCallback},
    trap_queue::{Coord, Move},
};

/// Toolhead axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub(crate) fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn name(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }

    /// Component of `c` along this axis.
    pub fn of(self, c: Coord) -> f64 {
        match self {
            Axis::X => c.x,
            Axis::Y => c.y,
            Axis::Z => c.z,
        }
    }

    /// `c` with its component along this axis replaced by `value`.
    pub fn with(self, c: Coord, value: f64) -> Coord {
        match self {
            Axis::X => Coord { x: value, ..c },
            Axis::Y => Coord { y: value, ..c },
            Axis::Z => Coord { z: value, ..c },
        }
    }
}

/// Cartesian kinematics - the stepper follows a single axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartesianKin {
    axis: Axis,
}

impl CartesianKin {
    pub fn new(axis: Axis) -> Self {
        Self { axis }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn active_flags(&self) -> ActiveFlags {
        match self.axis {
            Axis::X => ActiveFlags::new().with_x(),
            Axis::Y => ActiveFlags::new().with_y(),
            Axis::Z => ActiveFlags::new().with_z(),
        }
    }
}

impl fmt::Display for CartesianKin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cartesian {}", self.axis.name().to_ascii_lowercase())
    }
}

impl CalcPositionCallback for CartesianKin {
    fn calc_position(&self, m: &Move, move_time: f64) -> f64 {
        self.axis.of(m.get_coord(move_time))
    }
}
