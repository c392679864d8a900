// Stepper rails

use std::fmt;

use crate::{
    config::RailConfig,
    itersolve::{ActiveFlags, CalcPositionCallback, IterativeSolver, Step},
    kinematics::{
        KinematicsError,
        cartesian::CartesianKin,
        core2xy::{Core2XYKin, StepperType},
    },
    trap_queue::{Coord, MoveQueue},
};

/// A stepper mapping that can be installed on a rail.
pub trait RailKinematics: CalcPositionCallback + Copy + fmt::Display {
    fn active_flags(&self) -> ActiveFlags;
}

impl RailKinematics for Core2XYKin {
    fn active_flags(&self) -> ActiveFlags {
        self.stepper_type().active_flags()
    }
}

impl RailKinematics for CartesianKin {
    fn active_flags(&self) -> ActiveFlags {
        CartesianKin::active_flags(self)
    }
}

/// A stepper driving one belt or axis, with its travel range and solver.
#[derive(Debug, Clone)]
pub struct Rail<K = Core2XYKin> {
    name: String,
    position_min: f64,
    position_max: f64,
    position_endstop: f64,
    homing_positive_dir: bool,
    /// Mapping used while this rail drives the active carriage
    primary: K,
    solver: IterativeSolver<K>,
}

impl<K: RailKinematics> Rail<K> {
    /// Build a rail from a validated config.
    pub fn new(name: impl Into<String>, config: &RailConfig, kin: K) -> Self {
        Self {
            name: name.into(),
            position_min: config.position_min,
            position_max: config.position_max,
            position_endstop: config.position_endstop,
            homing_positive_dir: config.homes_positive().unwrap_or_default(),
            primary: kin,
            solver: IterativeSolver::new(config.step_distance, kin.active_flags(), kin),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> (f64, f64) {
        (self.position_min, self.position_max)
    }

    pub fn position_endstop(&self) -> f64 {
        self.position_endstop
    }

    pub fn homing_positive_dir(&self) -> bool {
        self.homing_positive_dir
    }

    pub fn step_distance(&self) -> f64 {
        self.solver.step_dist()
    }

    pub fn primary(&self) -> K {
        self.primary
    }

    /// Mapping currently installed in the solver.
    pub fn kin(&self) -> K {
        *self.solver.calc()
    }

    /// Install a new mapping. The commanded position keeps the old mapping's
    /// frame until the next [`set_position`](Self::set_position).
    pub fn set_kin(&mut self, kin: K) {
        tracing::debug!(rail = %self.name, mapping = %kin, "installing mapping");
        self.solver.set_calc(kin, kin.active_flags());
    }

    pub fn commanded_position(&self) -> f64 {
        self.solver.commanded_pos()
    }

    pub fn set_position(&mut self, pos: Coord) {
        self.solver.set_position(pos.x, pos.y, pos.z);
    }

    pub fn generate_steps(&mut self, queue: &MoveQueue, flush_time: f64) -> Vec<Step> {
        let mut steps = Vec::new();
        self.solver.generate_steps(&mut steps, queue, flush_time);
        steps
    }

    pub fn check_active_time(&self, queue: &MoveQueue, flush_time: f64) -> Option<f64> {
        self.solver.check_active_time(queue, flush_time)
    }
}

impl Rail {
    /// Build a belt rail, taking its mapping from the config `variant` key or
    /// falling back to `default`.
    ///
    /// Park, copy and mirror belong to the dual carriage commands, which pick
    /// their offsets at runtime, so they are refused here.
    pub fn from_config(
        name: &str,
        config: &RailConfig,
        default: StepperType,
    ) -> Result<Self, KinematicsError> {
        let stepper_type = match config.variant.as_deref() {
            Some(variant) => match StepperType::parse(variant, 0.0)? {
                StepperType::Park | StepperType::Copy { .. } | StepperType::Mirror { .. } => {
                    return Err(KinematicsError::UnconfigurableVariant(variant.to_string()));
                }
                stepper_type => stepper_type,
            },
            None => default,
        };
        tracing::debug!(rail = name, %stepper_type, "allocated core2xy stepper");
        Ok(Self::new(name, config, Core2XYKin::new(stepper_type)))
    }
}
