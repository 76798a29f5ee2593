//! Movement Engine
//!
//! Advances a player along its heading one grid cell at a time using
//! integer incremental-error line tracing (Bresenham). The line runs from
//! the current cell towards a point projected far along the heading; only
//! the first few cells are consumed per tick.

use crate::core::heading::Heading;
use crate::game::arena::Arena;
use crate::game::state::PlayerId;

/// Length of the projected ray. Longer than any arena side, so the
/// endpoint is never reached within a tick.
pub const PROJECTION_DISTANCE: f64 = 1000.0;

/// Cells advanced per movement tick.
pub const STEPS_PER_TICK: usize = 3;

/// One traced step between adjacent cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    /// Cell the step starts from.
    pub from: (i32, i32),
    /// Cell the step ends in.
    pub to: (i32, i32),
}

/// Incremental-error line tracer.
///
/// Yields one [`Step`] per cell until the projected endpoint is reached.
#[derive(Clone, Debug)]
pub struct LineTracer {
    x: i32,
    y: i32,
    x1: i32,
    y1: i32,
    dx: i32,
    dy: i32,
    sx: i32,
    sy: i32,
    err: i32,
}

impl LineTracer {
    /// Start tracing from `(x0, y0)` along `heading`.
    pub fn new(x0: i32, y0: i32, heading: Heading) -> Self {
        let rad = heading.radians();
        let x1 = (x0 as f64 + rad.cos() * PROJECTION_DISTANCE) as i32;
        let y1 = (y0 as f64 + rad.sin() * PROJECTION_DISTANCE) as i32;
        Self::towards(x0, y0, x1, y1)
    }

    /// Start tracing from `(x0, y0)` towards an explicit endpoint.
    pub fn towards(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        Self {
            x: x0,
            y: y0,
            x1,
            y1,
            dx,
            dy,
            sx: if x1 < x0 { -1 } else { 1 },
            sy: if y1 < y0 { -1 } else { 1 },
            err: dx + dy,
        }
    }

    /// Cell the tracer currently sits on.
    #[inline]
    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

impl Iterator for LineTracer {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        if self.x == self.x1 && self.y == self.y1 {
            return None;
        }

        let from = (self.x, self.y);
        let e2 = 2 * self.err;
        if e2 >= self.dy && self.x != self.x1 {
            self.err += self.dy;
            self.x += self.sx;
        }
        if e2 <= self.dx && self.y != self.y1 {
            self.err += self.dx;
            self.y += self.sy;
        }

        Some(Step { from, to: (self.x, self.y) })
    }
}

/// Result of advancing one player for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvanceResult {
    /// Last committed cell.
    pub x: i32,
    /// Last committed cell.
    pub y: i32,
    /// Number of steps committed.
    pub steps: usize,
    /// Whether a step was rejected. No further steps were taken.
    pub collided: bool,
}

/// Advance a player up to `steps` cells, committing each valid step.
///
/// Each step is validated against the previously committed cell. With
/// `trace` on, every entered cell becomes owned by `owner`.
pub fn advance(
    arena: &mut Arena,
    owner: PlayerId,
    x: i32,
    y: i32,
    heading: Heading,
    trace: bool,
    steps: usize,
) -> AdvanceResult {
    let mut result = AdvanceResult { x, y, steps: 0, collided: false };

    for step in LineTracer::new(x, y, heading).take(steps) {
        let (from_x, from_y) = step.from;
        let (to_x, to_y) = step.to;

        if !arena.is_valid_move(from_x, from_y, to_x, to_y) {
            result.collided = true;
            break;
        }

        result.x = to_x;
        result.y = to_y;
        result.steps += 1;
        if trace {
            arena.set_used(to_x, to_y, owner);
        }
    }

    result
}

/// Count the valid steps along `heading` before the first invalid cell.
///
/// Nothing is committed; this is the probe used by the bot heuristic.
pub fn ray_distance(arena: &Arena, x: i32, y: i32, heading: Heading) -> u32 {
    let mut distance = 0;
    for step in LineTracer::new(x, y, heading) {
        let (from_x, from_y) = step.from;
        let (to_x, to_y) = step.to;
        if !arena.is_valid_move(from_x, from_y, to_x, to_y) {
            break;
        }
        distance += 1;
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    const P0: PlayerId = PlayerId::new(0);

    #[test]
    fn test_tracer_axis_aligned() {
        let steps: Vec<_> = LineTracer::new(10, 10, Heading::EAST).take(3).map(|s| s.to).collect();
        assert_eq!(steps, vec![(11, 10), (12, 10), (13, 10)]);

        let steps: Vec<_> = LineTracer::new(10, 10, Heading::SOUTH).take(2).map(|s| s.to).collect();
        assert_eq!(steps, vec![(10, 11), (10, 12)]);

        let steps: Vec<_> = LineTracer::new(10, 10, Heading::NORTH).take(2).map(|s| s.to).collect();
        assert_eq!(steps, vec![(10, 9), (10, 8)]);
    }

    #[test]
    fn test_tracer_diagonal() {
        let steps: Vec<_> = LineTracer::new(0, 0, Heading::new(45)).take(3).collect();
        assert_eq!(steps[0], Step { from: (0, 0), to: (1, 1) });
        assert_eq!(steps[1], Step { from: (1, 1), to: (2, 2) });
        assert_eq!(steps[2].from, (2, 2));
    }

    #[test]
    fn test_tracer_stops_at_endpoint() {
        let tracer = LineTracer::towards(0, 0, 3, 0);
        assert_eq!(tracer.count(), 3);
    }

    #[test]
    fn test_advance_commits_trail() {
        let mut arena = Arena::new(50, 50);
        let result = advance(&mut arena, P0, 10, 10, Heading::EAST, true, STEPS_PER_TICK);

        assert_eq!(result, AdvanceResult { x: 13, y: 10, steps: 3, collided: false });
        assert_eq!(arena.owner(11, 10), Some(P0));
        assert_eq!(arena.owner(13, 10), Some(P0));
        assert_eq!(arena.used_count(), 3);
    }

    #[test]
    fn test_advance_without_trace_leaves_gap() {
        let mut arena = Arena::new(50, 50);
        let result = advance(&mut arena, P0, 10, 10, Heading::EAST, false, STEPS_PER_TICK);

        assert_eq!((result.x, result.y), (13, 10));
        assert_eq!(arena.used_count(), 0);
    }

    #[test]
    fn test_advance_stops_at_wall() {
        let mut arena = Arena::new(12, 50);
        let result = advance(&mut arena, P0, 10, 10, Heading::EAST, true, STEPS_PER_TICK);

        assert!(result.collided);
        assert_eq!(result.steps, 1);
        assert_eq!((result.x, result.y), (11, 10));
    }

    #[test]
    fn test_advance_stops_at_trail() {
        let mut arena = Arena::new(50, 50);
        arena.set_used(12, 10, PlayerId::new(1));
        let result = advance(&mut arena, P0, 10, 10, Heading::EAST, true, STEPS_PER_TICK);

        assert!(result.collided);
        assert_eq!((result.x, result.y), (11, 10));
        // The blocking cell keeps its owner
        assert_eq!(arena.owner(12, 10), Some(PlayerId::new(1)));
    }

    #[test]
    fn test_ray_distance() {
        let arena = Arena::new(100, 100);
        assert_eq!(ray_distance(&arena, 10, 50, Heading::EAST), 89);
        assert_eq!(ray_distance(&arena, 10, 50, Heading::WEST), 10);
        assert_eq!(ray_distance(&arena, 10, 50, Heading::NORTH), 50);
    }

    #[test]
    fn test_ray_distance_does_not_commit() {
        let mut arena = Arena::new(100, 100);
        arena.set_used(10, 50, P0);
        let _ = ray_distance(&arena, 10, 50, Heading::EAST);
        assert_eq!(arena.used_count(), 1);
    }
}
