//! Trapezoidal velocity move queue.
//!
//! Stores planned toolhead motion as constant-acceleration segments and
//! answers "where is the toolhead at time t within move m". Gaps between
//! queued moves are filled with stationary null moves so the solver always
//! has a segment covering any instant up to the last planned move.

use std::collections::VecDeque;

/// Longest leading null move inserted ahead of the first real move.
const MAX_NULL_MOVE: f64 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A single constant-acceleration segment of toolhead motion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Move {
    pub print_time: f64,
    pub move_t: f64,
    pub start_v: f64,
    pub half_accel: f64,
    pub start_pos: Coord,
    pub axes_r: Coord,
}

impl Move {
    /// A move that holds `pos` for `move_t` seconds.
    pub fn stationary(print_time: f64, move_t: f64, pos: Coord) -> Self {
        Self {
            print_time,
            move_t,
            start_pos: pos,
            ..Self::default()
        }
    }

    pub fn end_time(&self) -> f64 {
        self.print_time + self.move_t
    }

    /// Distance travelled along `axes_r` at `move_time` seconds into the move.
    pub fn get_distance(&self, move_time: f64) -> f64 {
        (self.start_v + self.half_accel * move_time) * move_time
    }

    /// Toolhead coordinate at `move_time` seconds into the move.
    ///
    /// Times outside `0..=move_t` extrapolate along the same equation.
    pub fn get_coord(&self, move_time: f64) -> Coord {
        let move_dist = self.get_distance(move_time);
        Coord {
            x: self.start_pos.x + self.axes_r.x * move_dist,
            y: self.start_pos.y + self.axes_r.y * move_dist,
            z: self.start_pos.z + self.axes_r.z * move_dist,
        }
    }

    pub fn end_coord(&self) -> Coord {
        self.get_coord(self.move_t)
    }

    fn is_null(&self) -> bool {
        self.start_v == 0.0 && self.half_accel == 0.0
    }
}

/// Velocity profile of one planned toolhead move.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Trapezoid {
    pub accel_t: f64,
    pub cruise_t: f64,
    pub decel_t: f64,
    pub start_v: f64,
    pub cruise_v: f64,
    pub accel: f64,
}

impl Trapezoid {
    pub fn total_time(&self) -> f64 {
        self.accel_t + self.cruise_t + self.decel_t
    }
}

#[derive(Debug, Default)]
pub struct MoveQueue {
    moves: VecDeque<Move>,
}

impl MoveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a move, inserting a null move over any gap since the last one.
    pub fn add_move(&mut self, m: Move) {
        let (gap_start, prev_is_origin) = match self.moves.back() {
            Some(prev) => (prev.end_time(), false),
            None => (0.0, true),
        };
        if gap_start < m.print_time {
            let null_start = if prev_is_origin && m.print_time > MAX_NULL_MOVE {
                m.print_time - MAX_NULL_MOVE
            } else {
                gap_start
            };
            self.moves.push_back(Move::stationary(
                null_start,
                m.print_time - null_start,
                m.start_pos,
            ));
        }
        self.moves.push_back(m);
    }

    /// Split a trapezoidal move into its accel, cruise and decel segments.
    pub fn append(&mut self, print_time: f64, start: Coord, axes_r: Coord, trap: Trapezoid) {
        let phases = [
            (trap.accel_t, trap.start_v, 0.5 * trap.accel),
            (trap.cruise_t, trap.cruise_v, 0.0),
            (trap.decel_t, trap.cruise_v, -0.5 * trap.accel),
        ];
        let mut cur_time = print_time;
        let mut cur_pos = start;
        for (move_t, start_v, half_accel) in phases {
            if move_t <= 0.0 {
                continue;
            }
            let m = Move {
                print_time: cur_time,
                move_t,
                start_v,
                half_accel,
                start_pos: cur_pos,
                axes_r,
            };
            self.add_move(m);
            cur_time += move_t;
            cur_pos = m.end_coord();
        }
    }

    /// Drop every move that ended at or before `print_time`.
    pub fn finalize_moves(&mut self, print_time: f64) {
        while let Some(m) = self.moves.front() {
            if m.end_time() > print_time {
                break;
            }
            self.moves.pop_front();
        }
    }

    /// Active moves in time order.
    pub fn moves(&self) -> impl Iterator<Item = &Move> {
        self.moves.iter()
    }

    /// Number of active moves that carry motion (null moves excluded).
    pub fn motion_len(&self) -> usize {
        self.moves.iter().filter(|m| !m.is_null()).count()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// End time of the last queued move, if any.
    pub fn last_time(&self) -> Option<f64> {
        self.moves.back().map(Move::end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trap(accel_t: f64, cruise_t: f64, decel_t: f64, cruise_v: f64, accel: f64) -> Trapezoid {
        Trapezoid {
            accel_t,
            cruise_t,
            decel_t,
            start_v: 0.0,
            cruise_v,
            accel,
        }
    }

    #[test]
    fn coord_follows_axes_ratio() {
        let m = Move {
            print_time: 0.0,
            move_t: 2.0,
            start_v: 3.0,
            half_accel: 0.0,
            start_pos: Coord::new(1.0, 2.0, 0.0),
            axes_r: Coord::new(0.6, 0.8, 0.0),
        };
        let c = m.get_coord(1.0);
        assert!((c.x - 2.8).abs() < 1e-12);
        assert!((c.y - 4.4).abs() < 1e-12);
        assert_eq!(c.z, 0.0);
    }

    #[test]
    fn appends_trapezoid_segments_after_leading_null() {
        let mut q = MoveQueue::new();
        q.append(
            0.5,
            Coord::default(),
            Coord::new(1.0, 0.0, 0.0),
            trap(1.0, 2.0, 1.0, 2.0, 2.0),
        );
        // leading null + accel + cruise + decel
        assert_eq!(q.len(), 4);
        assert_eq!(q.motion_len(), 3);
        assert_eq!(q.last_time(), Some(4.5));

        // 1mm accelerating, 4mm cruising, 1mm decelerating
        let end = q.moves().last().map(Move::end_coord).unwrap_or_default();
        assert!((end.x - 6.0).abs() < 1e-12);
    }

    #[test]
    fn leading_null_move_is_capped() {
        let mut q = MoveQueue::new();
        q.add_move(Move::stationary(5.0, 1.0, Coord::default()));
        let first = *q.moves().next().unwrap();
        assert_eq!(first.print_time, 4.0);
        assert_eq!(first.move_t, 1.0);
    }

    #[test]
    fn inserts_null_move_for_gap() {
        let mut q = MoveQueue::new();
        q.add_move(Move::stationary(0.0, 0.5, Coord::default()));
        q.add_move(Move::stationary(2.0, 0.5, Coord::new(1.0, 1.0, 0.0)));
        assert_eq!(q.len(), 3);
        let gap = *q.moves().nth(1).unwrap();
        assert_eq!(gap.print_time, 0.5);
        assert_eq!(gap.move_t, 1.5);
        assert_eq!(gap.start_pos, Coord::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn finalize_drops_expired_moves() {
        let mut q = MoveQueue::new();
        q.append(
            0.0,
            Coord::default(),
            Coord::new(0.0, 1.0, 0.0),
            trap(0.5, 0.5, 0.5, 1.0, 2.0),
        );
        q.finalize_moves(1.0);
        assert_eq!(q.len(), 1);
        q.finalize_moves(2.0);
        assert!(q.is_empty());
        assert_eq!(q.last_time(), None);
    }
}
