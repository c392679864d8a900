// Core2XY kinematics

use std::fmt;

use crate::{
    itersolve::{ActiveFlags, CalcPositionCallback},
    kinematics::KinematicsError,
    trap_queue::{Coord, Move},
};

/// Core2XY stepper type
///
/// The dual carriage variants carry the carriage offset directly so a
/// stepper can never be configured without the data its mapping needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepperType {
    /// position = X + Y
    Plus,
    /// position = X - Y
    Minus,
    /// position = Y
    YOnly,
    /// Parked dual carriage: position = Y
    Park,
    /// Dual carriage copying the primary: position = X + Y + offset
    Copy { offset: f64 },
    /// Dual carriage mirroring the primary: position = -X + Y + offset
    Mirror { offset: f64 },
}

impl StepperType {
    /// Build a stepper type from its single character code.
    ///
    /// `offset` is only used by the copy and mirror variants.
    pub fn from_code(code: char, offset: f64) -> Result<Self, KinematicsError> {
        match code {
            '+' => Ok(StepperType::Plus),
            '-' => Ok(StepperType::Minus),
            'y' => Ok(StepperType::YOnly),
            'P' => Ok(StepperType::Park),
            'C' => Ok(StepperType::Copy { offset }),
            'M' => Ok(StepperType::Mirror { offset }),
            _ => Err(KinematicsError::UnsupportedVariant(code.to_string())),
        }
    }

    /// Parse a stepper type from a code (`"+"`, `"P"`, ...) or a name
    /// (`"plus"`, `"park"`, ...). Names are case-insensitive, codes are not.
    pub fn parse(s: &str, offset: f64) -> Result<Self, KinematicsError> {
        let mut chars = s.chars();
        if let (Some(code), None) = (chars.next(), chars.next()) {
            return Self::from_code(code, offset);
        }
        match s.to_lowercase().as_str() {
            "plus" => Ok(StepperType::Plus),
            "minus" => Ok(StepperType::Minus),
            "y-only" | "y_only" => Ok(StepperType::YOnly),
            "park" => Ok(StepperType::Park),
            "copy" => Ok(StepperType::Copy { offset }),
            "mirror" => Ok(StepperType::Mirror { offset }),
            _ => Err(KinematicsError::UnsupportedVariant(s.to_string())),
        }
    }

    pub fn code(&self) -> char {
        match self {
            StepperType::Plus => '+',
            StepperType::Minus => '-',
            StepperType::YOnly => 'y',
            StepperType::Park => 'P',
            StepperType::Copy { .. } => 'C',
            StepperType::Mirror { .. } => 'M',
        }
    }

    /// Offset carried by the copy and mirror variants.
    pub fn offset(&self) -> Option<f64> {
        match self {
            StepperType::Copy { offset } | StepperType::Mirror { offset } => Some(*offset),
            _ => None,
        }
    }

    /// Stepper position for a toolhead coordinate.
    #[inline]
    pub fn position(&self, c: Coord) -> f64 {
        match *self {
            StepperType::Plus => c.x + c.y,
            StepperType::Minus => c.x - c.y,
            StepperType::YOnly | StepperType::Park => c.y,
            StepperType::Copy { offset } => c.x + c.y + offset,
            StepperType::Mirror { offset } => -c.x + c.y + offset,
        }
    }

    /// `[x, y, constant]` coefficients of the linear mapping.
    pub fn coefficients(&self) -> [f64; 3] {
        match *self {
            StepperType::Plus => [1.0, 1.0, 0.0],
            StepperType::Minus => [1.0, -1.0, 0.0],
            StepperType::YOnly | StepperType::Park => [0.0, 1.0, 0.0],
            StepperType::Copy { offset } => [1.0, 1.0, offset],
            StepperType::Mirror { offset } => [-1.0, 1.0, offset],
        }
    }

    pub fn active_flags(&self) -> ActiveFlags {
        match self {
            StepperType::YOnly | StepperType::Park => ActiveFlags::new().with_y(),
            _ => ActiveFlags::new().with_x().with_y(),
        }
    }
}

impl fmt::Display for StepperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepperType::Plus => f.write_str("plus"),
            StepperType::Minus => f.write_str("minus"),
            StepperType::YOnly => f.write_str("y-only"),
            StepperType::Park => f.write_str("park"),
            StepperType::Copy { offset } => write!(f, "copy({offset})"),
            StepperType::Mirror { offset } => write!(f, "mirror({offset})"),
        }
    }
}

/// Core2XY kinematics - maps the toolhead XY position onto one belt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Core2XYKin {
    stepper_type: StepperType,
}

impl Core2XYKin {
    pub fn new(stepper_type: StepperType) -> Self {
        Self { stepper_type }
    }

    pub fn from_code(code: char, offset: f64) -> Result<Self, KinematicsError> {
        let stepper_type = StepperType::from_code(code, offset)?;
        tracing::debug!(%stepper_type, "allocated core2xy stepper");
        Ok(Self::new(stepper_type))
    }

    pub fn parse(s: &str, offset: f64) -> Result<Self, KinematicsError> {
        let stepper_type = StepperType::parse(s, offset)?;
        tracing::debug!(%stepper_type, "allocated core2xy stepper");
        Ok(Self::new(stepper_type))
    }

    pub fn stepper_type(&self) -> StepperType {
        self.stepper_type
    }

    pub fn active_flags(&self) -> ActiveFlags {
        self.stepper_type.active_flags()
    }
}

impl fmt::Display for Core2XYKin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.stepper_type, f)
    }
}

impl CalcPositionCallback for Core2XYKin {
    fn calc_position(&self, m: &Move, move_time: f64) -> f64 {
        self.stepper_type.position(m.get_coord(move_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(x: f64, y: f64) -> Move {
        Move::stationary(0.0, 1.0, Coord::new(x, y, 30.0))
    }

    fn pos(code: char, offset: f64, x: f64, y: f64) -> f64 {
        let kin = Core2XYKin::from_code(code, offset).unwrap();
        kin.calc_position(&hold(x, y), 0.5)
    }

    #[test]
    fn stepper_type_from_code() {
        assert_eq!(StepperType::from_code('+', 1.0), Ok(StepperType::Plus));
        assert_eq!(StepperType::from_code('-', 1.0), Ok(StepperType::Minus));
        assert_eq!(StepperType::from_code('y', 1.0), Ok(StepperType::YOnly));
        assert_eq!(StepperType::from_code('P', 1.0), Ok(StepperType::Park));
        assert_eq!(
            StepperType::from_code('C', 1.0),
            Ok(StepperType::Copy { offset: 1.0 })
        );
        assert_eq!(
            StepperType::from_code('M', -2.0),
            Ok(StepperType::Mirror { offset: -2.0 })
        );
    }

    #[test]
    fn unknown_codes_are_rejected() {
        for code in ['d', 'x', 'p', 'c', 'Y', ' '] {
            assert_eq!(
                Core2XYKin::from_code(code, 0.0),
                Err(KinematicsError::UnsupportedVariant(code.to_string()))
            );
        }
        assert!(StepperType::parse("", 0.0).is_err());
        assert!(StepperType::parse("dual", 0.0).is_err());
    }

    #[test]
    fn stepper_type_parse() {
        assert_eq!(StepperType::parse("+", 0.0), Ok(StepperType::Plus));
        assert_eq!(StepperType::parse("plus", 0.0), Ok(StepperType::Plus));
        assert_eq!(StepperType::parse("MINUS", 0.0), Ok(StepperType::Minus));
        assert_eq!(StepperType::parse("y-only", 0.0), Ok(StepperType::YOnly));
        assert_eq!(StepperType::parse("park", 3.0), Ok(StepperType::Park));
        assert_eq!(
            StepperType::parse("Mirror", 3.0),
            Ok(StepperType::Mirror { offset: 3.0 })
        );
    }

    #[test]
    fn codes_round_trip() {
        for code in ['+', '-', 'y', 'P', 'C', 'M'] {
            assert_eq!(StepperType::from_code(code, 0.0).unwrap().code(), code);
        }
    }

    #[test]
    fn offset_only_on_dual_carriage_mappings() {
        assert_eq!(StepperType::from_code('+', 4.0).unwrap().offset(), None);
        assert_eq!(StepperType::from_code('P', 4.0).unwrap().offset(), None);
        assert_eq!(StepperType::from_code('C', 4.0).unwrap().offset(), Some(4.0));
        assert_eq!(StepperType::from_code('M', 4.0).unwrap().offset(), Some(4.0));
    }

    #[test]
    fn variant_symmetry() {
        assert_eq!(pos('+', 0.0, 4.0, 1.0), 5.0);
        assert_eq!(pos('-', 0.0, 4.0, 1.0), 3.0);
        assert_eq!(pos('y', 0.0, 4.0, 1.0), 1.0);
        assert_eq!(pos('P', 0.0, 4.0, 1.0), 1.0);
    }

    #[test]
    fn mirror_negates_x() {
        assert_eq!(pos('M', 2.0, 4.0, 1.0), -1.0);
        assert_eq!(pos('C', 2.0, 4.0, 1.0), 7.0);
    }

    #[test]
    fn park_ignores_offset() {
        assert_eq!(pos('P', 0.0, 2.0, 3.0), pos('P', 25.0, 2.0, 3.0));
    }

    #[test]
    fn offset_shifts_position() {
        for code in ['C', 'M'] {
            let delta = pos(code, 5.0, 2.0, 3.0) - pos(code, 0.0, 2.0, 3.0);
            assert_eq!(delta, 5.0);
        }
    }

    #[test]
    fn coefficients_match_position() {
        for code in ['+', '-', 'y', 'P', 'C', 'M'] {
            let t = StepperType::from_code(code, 1.25).unwrap();
            let [cx, cy, c0] = t.coefficients();
            let c = Coord::new(3.5, -2.0, 7.0);
            assert_eq!(t.position(c), cx * c.x + cy * c.y + c0, "variant {t}");
        }
    }

    #[test]
    fn follows_moving_toolhead() {
        let kin = Core2XYKin::new(StepperType::Minus);
        let m = Move {
            print_time: 0.0,
            move_t: 1.0,
            start_v: 10.0,
            half_accel: 0.0,
            start_pos: Coord::new(10.0, 20.0, 0.0),
            axes_r: Coord::new(0.0, 1.0, 0.0),
        };
        assert_eq!(kin.calc_position(&m, 0.0), -10.0);
        assert_eq!(kin.calc_position(&m, 0.5), -15.0);
    }

    #[test]
    fn active_flags_follow_mapping() {
        let park = Core2XYKin::new(StepperType::Park).active_flags();
        assert!(!park.has_x() && park.has_y() && !park.has_z());
        let mirror = Core2XYKin::new(StepperType::Mirror { offset: 1.0 }).active_flags();
        assert!(mirror.has_x() && mirror.has_y());
    }

    #[test]
    fn repeated_queries_are_identical() {
        let kin = Core2XYKin::from_code('M', 0.3).unwrap();
        let m = Move {
            print_time: 0.0,
            move_t: 1.0,
            start_v: 1.7,
            half_accel: -0.4,
            start_pos: Coord::new(0.1, 0.2, 0.0),
            axes_r: Coord::new(0.6, -0.8, 0.0),
        };
        let first = kin.calc_position(&m, 0.37).to_bits();
        for _ in 0..16 {
            assert_eq!(kin.calc_position(&m, 0.37).to_bits(), first);
        }
    }

    #[test]
    fn concurrent_queries_agree() {
        let kin = &Core2XYKin::from_code('C', 1.5).unwrap();
        let m = &hold(2.0, 3.0);
        let results: Vec<f64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(move || kin.calc_position(m, 0.25)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|&r| r == 6.5));
    }

    #[test]
    fn plus_and_minus_match_formula() {
        bolero::check!()
            .with_type::<(f64, f64)>()
            .for_each(|&(x, y)| {
                let c = Coord::new(x, y, 0.0);
                assert_eq!(StepperType::Plus.position(c).to_bits(), (x + y).to_bits());
                assert_eq!(StepperType::Minus.position(c).to_bits(), (x - y).to_bits());
                assert_eq!(StepperType::YOnly.position(c).to_bits(), y.to_bits());
                assert_eq!(StepperType::Park.position(c).to_bits(), y.to_bits());
            });
    }

    #[test]
    fn copy_and_mirror_match_formula() {
        bolero::check!()
            .with_type::<(f64, f64, f64)>()
            .for_each(|&(x, y, offset)| {
                let c = Coord::new(x, y, 0.0);
                let copy = StepperType::Copy { offset }.position(c);
                let mirror = StepperType::Mirror { offset }.position(c);
                assert_eq!(copy.to_bits(), (x + y + offset).to_bits());
                assert_eq!(mirror.to_bits(), (-x + y + offset).to_bits());
            });
    }

    #[test]
    fn variant_table() {
        let table: Vec<String> = ['+', '-', 'y', 'P', 'C', 'M']
            .into_iter()
            .map(|code| {
                let kin = Core2XYKin::from_code(code, 2.0).unwrap();
                format!("{} {}", kin.stepper_type(), pos(code, 2.0, 4.0, 1.0))
            })
            .collect();
        insta::assert_snapshot!(table.join("\n"), @r"
        plus 5
        minus 3
        y-only 1
        park 1
        copy(2) 7
        mirror(2) -1
        ");
    }
}
