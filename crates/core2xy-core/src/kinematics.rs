// Kinematics for Core2XY printers

use thiserror::Error;

use crate::kinematics::core2xy::StepperType;

pub mod cartesian;
pub mod core2xy;
pub mod machine;
pub mod rail;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KinematicsError {
    #[error("unsupported core2xy stepper variant {0:?}")]
    UnsupportedVariant(String),
    #[error("stepper variant {0:?} is selected by carriage commands and cannot be configured")]
    UnconfigurableVariant(String),
    #[error("stepper mappings {carriage} and {belt} cannot recover both X and Y")]
    SingularMapping {
        carriage: StepperType,
        belt: StepperType,
    },
    #[error("kinematics has no dual carriage")]
    NoDualCarriage,
    #[error("invalid carriage {0}, expected 0 or 1")]
    InvalidCarriage(usize),
    #[error("move to {x:.3}, {y:.3}, {z:.3} requires homing first")]
    MustHomeFirst { x: f64, y: f64, z: f64 },
    #[error("move out of range: {x:.3}, {y:.3}, {z:.3}")]
    MoveOutOfRange { x: f64, y: f64, z: f64 },
}
