//! Core2XY stepper kinematics.
//!
//! Maps planned toolhead motion onto the belts of a Core2XY (H-bot family)
//! machine, including dual carriage park, copy and mirror mappings. The
//! crate carries its own trapezoid move queue and iterative step solver so
//! the mappings can be driven end to end, but nothing MCU- or
//! transport-specific.

pub mod config;
pub mod itersolve;
pub mod kinematics;
pub mod trap_queue;
