//! Core2XY kinematics with optional dual carriage.
//!
//! Belt A follows the active carriage (`x + y`), belt B is shared (`x - y`)
//! and Z is driven directly. A second carriage on the X axis is parked
//! (`y` only) while the primary carriage prints, or slaved to it in
//! copy/mirror mode with a fixed offset.

use std::path::Path;

use anyhow::Context;

use crate::{
    config::Config,
    itersolve::Step,
    kinematics::{
        KinematicsError,
        cartesian::CartesianKin,
        core2xy::{Core2XYKin, StepperType},
        rail::{Rail, RailKinematics},
    },
    trap_queue::{Coord, MoveQueue},
};

pub use crate::kinematics::cartesian::Axis;

const UNHOMED: (f64, f64) = (1.0, -1.0);

/// Homing overshoot as a multiple of the distance to the far end of travel
const HOMING_OVERSHOOT: f64 = 1.5;

/// How the inactive dual carriage follows the toolhead
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CarriageMode {
    /// Inactive carriage stays parked
    #[default]
    Primary,
    /// Inactive carriage moves in the same X direction
    Copy,
    /// Inactive carriage moves in the opposite X direction
    Mirror,
}

/// Steps generated for one rail during a flush
#[derive(Debug, Clone, PartialEq)]
pub struct RailSteps {
    pub rail: String,
    pub steps: Vec<Step>,
}

/// Velocity and acceleration caps for a single move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimit {
    pub velocity: f64,
    pub accel: f64,
}

/// Drive a rail towards its endstop along one axis
#[derive(Debug, Clone, PartialEq)]
pub struct HomingMove {
    pub rail: String,
    pub axis: Axis,
    /// Position assumed before the move, far enough out to reach the endstop
    pub force_pos: f64,
    /// Position once the endstop triggers
    pub home_pos: f64,
}

impl HomingMove {
    fn for_rail<K: RailKinematics>(axis: Axis, rail: &Rail<K>) -> Self {
        let (min, max) = rail.range();
        let home_pos = rail.position_endstop();
        let force_pos = if rail.homing_positive_dir() {
            home_pos - HOMING_OVERSHOOT * (home_pos - min)
        } else {
            home_pos + HOMING_OVERSHOOT * (max - home_pos)
        };
        Self {
            rail: rail.name().to_string(),
            axis,
            force_pos,
            home_pos,
        }
    }
}

/// Performs homing moves on the hardware.
pub trait RailHomer {
    type Error: From<KinematicsError>;

    fn home_rail(&mut self, homing: &HomingMove) -> Result<(), Self::Error>;
}

impl RailHomer for Vec<HomingMove> {
    type Error = KinematicsError;

    fn home_rail(&mut self, homing: &HomingMove) -> Result<(), Self::Error> {
        self.push(homing.clone());
        Ok(())
    }
}

fn check_invertible(carriage: Core2XYKin, belt: Core2XYKin) -> Result<(), KinematicsError> {
    let [ax, ay, _] = carriage.stepper_type().coefficients();
    let [bx, by, _] = belt.stepper_type().coefficients();
    // A pair that ignores X only loses X, which calc_position carries over
    if ax * by - ay * bx == 0.0 && (ax != 0.0 || bx != 0.0) {
        return Err(KinematicsError::SingularMapping {
            carriage: carriage.stepper_type(),
            belt: belt.stepper_type(),
        });
    }
    Ok(())
}

fn must_home(end: Coord) -> KinematicsError {
    KinematicsError::MustHomeFirst {
        x: end.x,
        y: end.y,
        z: end.z,
    }
}

fn out_of_range(end: Coord) -> KinematicsError {
    KinematicsError::MoveOutOfRange {
        x: end.x,
        y: end.y,
        z: end.z,
    }
}

#[derive(Debug)]
pub struct Core2XYKinematics {
    carriages: Vec<Rail>,
    rail_y: Rail,
    rail_z: Rail<CartesianKin>,
    active: usize,
    mode: CarriageMode,
    /// X position of the inactive carriage while parked
    parked_x: f64,
    position: Coord,
    limits: [(f64, f64); 3],
    max_z_velocity: f64,
    max_z_accel: f64,
}

impl Core2XYKinematics {
    /// Build the kinematics from an already validated config.
    pub fn from_config(config: &Config) -> Result<Self, KinematicsError> {
        let mut carriages = vec![Rail::from_config(
            "stepper_x",
            &config.stepper_x,
            StepperType::Plus,
        )?];
        let rail_y = Rail::from_config("stepper_y", &config.stepper_y, StepperType::Minus)?;
        check_invertible(carriages[0].primary(), rail_y.primary())?;
        let rail_z = Rail::new("stepper_z", &config.stepper_z, CartesianKin::new(Axis::Z));

        let mut parked_x = 0.0;
        if let Some(dc) = &config.dual_carriage {
            let mut rail = Rail::from_config("dual_carriage", &dc.rail, StepperType::Plus)?;
            check_invertible(rail.primary(), rail_y.primary())?;
            rail.set_kin(Core2XYKin::new(StepperType::Park));
            parked_x = rail.position_endstop();
            carriages.push(rail);
        }

        tracing::info!(
            dual_carriage = carriages.len() > 1,
            "configured core2xy kinematics"
        );

        Ok(Self {
            carriages,
            rail_y,
            rail_z,
            active: 0,
            mode: CarriageMode::Primary,
            parked_x,
            position: Coord::default(),
            limits: [UNHOMED; 3],
            max_z_velocity: config.z_velocity(),
            max_z_accel: config.z_accel(),
        })
    }

    /// Load, validate and build the kinematics from a config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let config = Config::from_file(path)?;
        config.validate()?;
        Self::from_config(&config).context("failed to configure core2xy kinematics")
    }

    pub fn has_dual_carriage(&self) -> bool {
        self.carriages.len() > 1
    }

    pub fn active_carriage(&self) -> usize {
        self.active
    }

    pub fn mode(&self) -> CarriageMode {
        self.mode
    }

    pub fn parked_x(&self) -> Option<f64> {
        self.has_dual_carriage().then_some(self.parked_x)
    }

    /// Belt rails: carriages in index order, then belt B.
    pub fn rails(&self) -> impl Iterator<Item = &Rail> {
        self.carriages.iter().chain(std::iter::once(&self.rail_y))
    }

    pub fn rail_z(&self) -> &Rail<CartesianKin> {
        &self.rail_z
    }

    fn rails_mut(&mut self) -> impl Iterator<Item = &mut Rail> {
        self.carriages
            .iter_mut()
            .chain(std::iter::once(&mut self.rail_y))
    }

    /// Toolhead position derived from the active carriage, belt B and Z.
    pub fn calc_position(&self) -> Coord {
        let a = &self.carriages[self.active];
        let [ax, ay, ac] = a.kin().stepper_type().coefficients();
        let [bx, by, bc] = self.rail_y.kin().stepper_type().coefficients();
        let pa = a.commanded_position() - ac;
        let pb = self.rail_y.commanded_position() - bc;

        let z = self.rail_z.commanded_position();

        let det = ax * by - ay * bx;
        if det == 0.0 {
            // Neither belt depends on X; keep the last set X
            let y = if ay != 0.0 { pa / ay } else { pb / by };
            return Coord::new(self.position.x, y, z);
        }
        Coord {
            x: (pa * by - ay * pb) / det,
            y: (ax * pb - pa * bx) / det,
            z,
        }
    }

    /// Reset every rail to `pos`. Axes in `homing_axes` adopt the range of
    /// the rail that drives them as their motion limits.
    pub fn set_position(&mut self, pos: Coord, homing_axes: &[Axis]) {
        self.position = pos;
        for rail in self.rails_mut() {
            rail.set_position(pos);
        }
        self.rail_z.set_position(pos);
        for &axis in homing_axes {
            self.limits[axis.index()] = match axis {
                Axis::X => self.carriages[self.active].range(),
                Axis::Y => self.rail_y.range(),
                Axis::Z => self.rail_z.range(),
            };
        }
    }

    /// Check the end point of a move against the homed limits.
    ///
    /// Moves along Z come back with the speed limit the slower Z axis
    /// imposes on the whole move.
    pub fn check_move(
        &self,
        start: Coord,
        end: Coord,
    ) -> Result<Option<SpeedLimit>, KinematicsError> {
        for axis in Axis::ALL {
            let (min, max) = self.limits[axis.index()];
            let pos = axis.of(end);
            if axis.of(start) != pos && (pos < min || pos > max) {
                if min > max {
                    return Err(must_home(end));
                }
                return Err(out_of_range(end));
            }
        }

        if start.x != end.x && self.mode != CarriageMode::Primary {
            let inactive = &self.carriages[1 - self.active];
            let carriage_x = match inactive.kin().stepper_type() {
                StepperType::Copy { offset } => Some(end.x + offset),
                StepperType::Mirror { offset } => Some(-end.x + offset),
                _ => None,
            };
            let (min, max) = inactive.range();
            if carriage_x.is_some_and(|x| x < min || x > max) {
                return Err(out_of_range(end));
            }
        }

        let dz = end.z - start.z;
        if dz == 0.0 {
            return Ok(None);
        }
        let (dx, dy) = (end.x - start.x, end.y - start.y);
        let z_ratio = (dx * dx + dy * dy + dz * dz).sqrt() / dz.abs();
        Ok(Some(SpeedLimit {
            velocity: self.max_z_velocity * z_ratio,
            accel: self.max_z_accel * z_ratio,
        }))
    }

    /// Forget homing state.
    pub fn motor_off(&mut self) {
        self.limits = [UNHOMED; 3];
    }

    pub fn homed_axes(&self) -> String {
        Axis::ALL
            .into_iter()
            .zip(self.limits)
            .filter(|(_, (min, max))| min <= max)
            .map(|(axis, _)| axis.name())
            .collect()
    }

    /// Home `axes` in order.
    ///
    /// With a dual carriage, X homes carriage 0 then carriage 1 and finally
    /// reactivates whichever carriage was active before.
    pub fn home<H: RailHomer>(&mut self, axes: &[Axis], homer: &mut H) -> Result<(), H::Error> {
        for &axis in axes {
            if axis == Axis::X && self.has_dual_carriage() {
                let active = self.active;
                for carriage in 0..2 {
                    self.activate_carriage(carriage)?;
                    self.home_axis(axis, homer)?;
                }
                self.activate_carriage(active)?;
            } else {
                self.home_axis(axis, homer)?;
            }
        }
        Ok(())
    }

    fn home_axis<H: RailHomer>(&mut self, axis: Axis, homer: &mut H) -> Result<(), H::Error> {
        let homing = match axis {
            Axis::X => HomingMove::for_rail(axis, &self.carriages[self.active]),
            Axis::Y => HomingMove::for_rail(axis, &self.rail_y),
            Axis::Z => HomingMove::for_rail(axis, &self.rail_z),
        };
        homer.home_rail(&homing)?;

        let pos = axis.with(self.calc_position(), homing.home_pos);
        self.set_position(pos, &[axis]);
        tracing::info!(rail = %homing.rail, home_pos = homing.home_pos, "homed rail");
        Ok(())
    }

    fn require_dual_carriage(&self) -> Result<(), KinematicsError> {
        if self.has_dual_carriage() {
            Ok(())
        } else {
            Err(KinematicsError::NoDualCarriage)
        }
    }

    /// Make `carriage` the printing carriage and park the other one.
    pub fn activate_carriage(&mut self, carriage: usize) -> Result<(), KinematicsError> {
        self.require_dual_carriage()?;
        if carriage > 1 {
            return Err(KinematicsError::InvalidCarriage(carriage));
        }
        self.set_carriage_mode(CarriageMode::Primary)?;
        if carriage == self.active {
            return Ok(());
        }

        let cur = self.calc_position();
        let previous = self.active;
        let new_x = std::mem::replace(&mut self.parked_x, cur.x);

        self.carriages[previous].set_kin(Core2XYKin::new(StepperType::Park));
        let primary = self.carriages[carriage].primary();
        self.carriages[carriage].set_kin(primary);
        self.active = carriage;

        let (min, max) = self.limits[Axis::X.index()];
        if min <= max {
            self.limits[Axis::X.index()] = self.carriages[carriage].range();
        }
        self.set_position(Coord { x: new_x, ..cur }, &[]);

        tracing::info!(carriage, parked_x = self.parked_x, "activated carriage");
        Ok(())
    }

    /// Switch how the inactive carriage follows the toolhead.
    pub fn set_carriage_mode(&mut self, mode: CarriageMode) -> Result<(), KinematicsError> {
        self.require_dual_carriage()?;
        if mode == self.mode {
            return Ok(());
        }

        let cur = self.calc_position();
        let inactive = 1 - self.active;

        // Where the inactive carriage currently sits
        self.parked_x = match self.carriages[inactive].kin().stepper_type() {
            StepperType::Copy { offset } => cur.x + offset,
            StepperType::Mirror { offset } => -cur.x + offset,
            _ => self.parked_x,
        };

        let stepper_type = match mode {
            CarriageMode::Primary => StepperType::Park,
            CarriageMode::Copy => StepperType::Copy {
                offset: self.parked_x - cur.x,
            },
            CarriageMode::Mirror => StepperType::Mirror {
                offset: self.parked_x + cur.x,
            },
        };
        let rail = &mut self.carriages[inactive];
        rail.set_kin(Core2XYKin::new(stepper_type));
        rail.set_position(cur);
        self.position = cur;
        self.mode = mode;

        tracing::info!(?mode, parked_x = self.parked_x, "set dual carriage mode");
        Ok(())
    }

    /// Run every rail's solver up to `flush_time`.
    pub fn generate_steps(&mut self, queue: &MoveQueue, flush_time: f64) -> Vec<RailSteps> {
        let mut flushed: Vec<RailSteps> = self
            .rails_mut()
            .map(|rail| RailSteps {
                rail: rail.name().to_string(),
                steps: rail.generate_steps(queue, flush_time),
            })
            .collect();
        flushed.push(RailSteps {
            rail: self.rail_z.name().to_string(),
            steps: self.rail_z.generate_steps(queue, flush_time),
        });
        flushed
    }
}
