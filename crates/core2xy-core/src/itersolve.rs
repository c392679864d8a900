// Iterative solver for kinematic moves

use crate::trap_queue::{Coord, Move, MoveQueue};

const SEEK_TIME_RESET: f64 = 0.000100;
const POSITION_TOLERANCE: f64 = 0.000000001;
const TIME_TOLERANCE: f64 = 0.000000001;
// Distance behind the target, beyond a full step, that flags a reversal
const DIR_CHANGE_TOLERANCE: f64 = 10.0 * POSITION_TOLERANCE;
// Search window after a step, relative to the previous step interval
const SEEK_TIME_GROWTH: f64 = 1.5;

// Axes a stepper depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveFlags(u8);

impl ActiveFlags {
    const X: u8 = 1 << 0;
    const Y: u8 = 1 << 1;
    const Z: u8 = 1 << 2;

    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn with_x(mut self) -> Self {
        self.0 |= Self::X;
        self
    }

    pub const fn with_y(mut self) -> Self {
        self.0 |= Self::Y;
        self
    }

    pub const fn with_z(mut self) -> Self {
        self.0 |= Self::Z;
        self
    }

    pub const fn has_x(&self) -> bool {
        self.0 & Self::X != 0
    }

    pub const fn has_y(&self) -> bool {
        self.0 & Self::Y != 0
    }

    pub const fn has_z(&self) -> bool {
        self.0 & Self::Z != 0
    }
}

/// Maps a point in a planned move to a stepper position.
///
/// Implementations must be pure: the solver calls this many times per step
/// at arbitrary trial times and relies on identical inputs giving identical
/// outputs.
pub trait CalcPositionCallback {
    fn calc_position(&self, m: &Move, move_time: f64) -> f64;
}

/// A single step pulse at an absolute print time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub print_time: f64,
    /// `true` for a step in the positive direction
    pub dir: bool,
}

/// Receives the steps found by the solver.
pub trait StepSink {
    fn step(&mut self, step: Step);
}

impl StepSink for Vec<Step> {
    fn step(&mut self, step: Step) {
        self.push(step);
    }
}

#[derive(Debug, Clone, Copy)]
struct TimePos {
    time: f64,
    position: f64,
}

/// Iterative solver for generating step times from kinematic moves
#[derive(Debug, Clone)]
pub struct IterativeSolver<C> {
    step_dist: f64,
    commanded_pos: f64,
    last_flush_time: f64,
    last_dir: bool,
    active_flags: ActiveFlags,
    calc: C,
}

impl<C: CalcPositionCallback> IterativeSolver<C> {
    pub fn new(step_dist: f64, active_flags: ActiveFlags, calc: C) -> Self {
        Self {
            step_dist,
            commanded_pos: 0.0,
            last_flush_time: 0.0,
            last_dir: false,
            active_flags,
            calc,
        }
    }

    pub fn step_dist(&self) -> f64 {
        self.step_dist
    }

    pub fn commanded_pos(&self) -> f64 {
        self.commanded_pos
    }

    pub fn calc(&self) -> &C {
        &self.calc
    }

    pub fn active_flags(&self) -> ActiveFlags {
        self.active_flags
    }

    /// Replace the position callback. Callers must follow up with
    /// [`set_position`](Self::set_position) since the commanded position is
    /// expressed in the old callback's frame.
    pub fn set_calc(&mut self, calc: C, active_flags: ActiveFlags) {
        self.calc = calc;
        self.active_flags = active_flags;
    }

    pub fn set_position(&mut self, x: f64, y: f64, z: f64) {
        self.commanded_pos = self.calc_position_from_coord(x, y, z);
    }

    pub fn calc_position_from_coord(&self, x: f64, y: f64, z: f64) -> f64 {
        let m = Move::stationary(0.0, 1000.0, Coord { x, y, z });
        self.calc.calc_position(&m, 500.0)
    }

    // Check if a move is likely to cause movement on this stepper
    fn check_active(&self, m: &Move) -> bool {
        (self.active_flags.has_x() && m.axes_r.x != 0.0)
            || (self.active_flags.has_y() && m.axes_r.y != 0.0)
            || (self.active_flags.has_z() && m.axes_r.z != 0.0)
    }

    // Generate step times for a portion of a move using the secant method
    fn gen_steps_range<S: StepSink>(
        &mut self,
        sink: &mut S,
        m: &Move,
        abs_start: f64,
        abs_end: f64,
    ) {
        let step_dist = self.step_dist;
        let half_step = 0.5 * step_dist;
        let start = (abs_start - m.print_time).max(0.0);
        let end = (abs_end - m.print_time).min(m.move_t);

        let mut old_guess = TimePos {
            time: start,
            position: self.commanded_pos,
        };
        let mut guess = old_guess;
        let mut sdir = self.last_dir;
        let mut is_dir_change = false;
        let mut have_bracket = false;
        let mut check_oscillate = false;
        let mut target = self.commanded_pos + if sdir { half_step } else { -half_step };
        let mut last_time = start;
        let mut low_time = start;
        let mut high_time = (start + SEEK_TIME_RESET).min(end);

        loop {
            let guess_dist = guess.position - target;
            let og_dist = old_guess.position - target;
            let mut next_time =
                (old_guess.time * guess_dist - guess.time * og_dist) / (guess_dist - og_dist);

            if !(next_time > low_time && next_time < high_time) {
                if have_bracket {
                    // Poor secant guess - bisect
                    next_time = (low_time + high_time) * 0.5;
                    check_oscillate = false;
                } else if guess.time >= end {
                    // No more steps in the requested range
                    break;
                } else {
                    // Exponential search for a bracket
                    next_time = high_time;
                    high_time = (2.0 * high_time - last_time).min(end);
                }
            }

            old_guess = guess;
            guess.time = next_time;
            guess.position = self.calc.calc_position(m, next_time);
            let guess_dist = guess.position - target;

            if guess_dist.abs() > POSITION_TOLERANCE {
                let rel_dist = if sdir { guess_dist } else { -guess_dist };

                if rel_dist > 0.0 {
                    // Position past target, so a step is present
                    if have_bracket && old_guess.time <= low_time {
                        if check_oscillate {
                            // Force bisection to break persistent oscillation
                            old_guess = guess;
                        }
                        check_oscillate = true;
                    }
                    high_time = guess.time;
                    have_bracket = true;
                } else if rel_dist < -(step_dist + DIR_CHANGE_TOLERANCE) {
                    // Direction change
                    sdir = !sdir;
                    target += if sdir { step_dist } else { -step_dist };
                    low_time = last_time;
                    high_time = guess.time;
                    is_dir_change = true;
                    have_bracket = true;
                    check_oscillate = false;
                } else {
                    low_time = guess.time;
                }

                if !have_bracket || high_time - low_time > TIME_TOLERANCE {
                    continue;
                }
            }

            sink.step(Step {
                print_time: m.print_time + guess.time,
                dir: sdir,
            });
            self.last_dir = sdir;
            target += if sdir { step_dist } else { -step_dist };

            let mut seek_time_delta =
                (SEEK_TIME_GROWTH * (guess.time - last_time)).max(TIME_TOLERANCE);
            if is_dir_change && seek_time_delta > SEEK_TIME_RESET {
                seek_time_delta = SEEK_TIME_RESET;
            }
            last_time = guess.time;
            low_time = guess.time;
            high_time = (guess.time + seek_time_delta).min(end);
            is_dir_change = false;
            have_bracket = false;
            check_oscillate = false;
        }

        self.commanded_pos = target - if sdir { half_step } else { -half_step };
    }

    /// Generate steps for every queued move between the previous flush and
    /// `flush_time`.
    pub fn generate_steps<S: StepSink>(
        &mut self,
        sink: &mut S,
        queue: &MoveQueue,
        flush_time: f64,
    ) {
        let last_flush_time = self.last_flush_time;
        self.last_flush_time = flush_time;

        for m in queue.moves() {
            if m.end_time() <= last_flush_time {
                continue;
            }
            if m.print_time >= flush_time {
                break;
            }
            if self.check_active(m) {
                self.gen_steps_range(sink, m, last_flush_time, flush_time);
            }
        }
        tracing::trace!(
            flush_time,
            commanded_pos = self.commanded_pos,
            "generated steps"
        );
    }

    /// Print time of the first unflushed move that would move this stepper.
    pub fn check_active_time(&self, queue: &MoveQueue, flush_time: f64) -> Option<f64> {
        for m in queue.moves() {
            if m.end_time() <= self.last_flush_time {
                continue;
            }
            if self.check_active(m) {
                return Some(m.print_time);
            }
            if flush_time <= m.end_time() {
                return None;
            }
        }
        None
    }

    // Check if this stepper is registered for the given axis
    pub fn is_active_axis(&self, axis: char) -> bool {
        match axis {
            'x' | 'X' => self.active_flags.has_x(),
            'y' | 'Y' => self.active_flags.has_y(),
            'z' | 'Z' => self.active_flags.has_z(),
            _ => false,
        }
    }
}
