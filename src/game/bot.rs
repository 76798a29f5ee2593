//! Bot Heuristic
//!
//! Picks the heading with the longest free run. Thirty-six rays spaced ten
//! degrees apart are cast from the bot's cell using the same line tracer
//! and validity rule as real movement, and the longest ray wins.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

use crate::core::heading::{Heading, RotationDirection};
use crate::game::arena::Arena;
use crate::game::movement::ray_distance;

/// Number of candidate headings.
pub const RAY_COUNT: usize = 36;

/// Degrees between candidate headings.
pub const RAY_SPACING: i32 = 10;

/// Measured free distance along one candidate heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayHit {
    /// Candidate heading.
    pub heading: Heading,
    /// Valid steps before the first invalid cell.
    pub distance: u32,
}

/// Candidate heading for a scan slot.
#[inline]
pub fn candidate_heading(slot: usize) -> Heading {
    Heading::new(slot as i32 * RAY_SPACING)
}

/// Cast all rays sequentially.
pub fn scan(arena: &Arena, x: i32, y: i32) -> Vec<RayHit> {
    (0..RAY_COUNT)
        .map(|slot| {
            let heading = candidate_heading(slot);
            RayHit { heading, distance: ray_distance(arena, x, y, heading) }
        })
        .collect()
}

/// Choose the longest ray. Ties go to the earliest heading in scan order.
pub fn pick_farthest(hits: &[RayHit]) -> Option<Heading> {
    let mut best: Option<RayHit> = None;
    for hit in hits {
        match best {
            Some(b) if b.distance >= hit.distance => {}
            _ => best = Some(*hit),
        }
    }
    best.map(|b| b.heading)
}

/// Cast all rays concurrently, one task per heading, and pick the longest.
///
/// Every ray is awaited before choosing, so the result does not depend on
/// completion order. A ray whose task fails counts as distance zero.
pub async fn find_farthest_heading(arena: Arc<Arena>, x: i32, y: i32) -> Heading {
    let mut tasks = JoinSet::new();
    for slot in 0..RAY_COUNT {
        let arena = Arc::clone(&arena);
        tasks.spawn(async move {
            let heading = candidate_heading(slot);
            (slot, ray_distance(&arena, x, y, heading))
        });
    }

    let mut distances = [0u32; RAY_COUNT];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, distance)) => distances[slot] = distance,
            Err(e) => warn!("Ray task failed: {}", e),
        }
    }

    let hits: Vec<RayHit> = distances
        .iter()
        .enumerate()
        .map(|(slot, &distance)| RayHit { heading: candidate_heading(slot), distance })
        .collect();

    pick_farthest(&hits).unwrap_or(Heading::EAST)
}

/// Steering needed to bring `current` onto `target`.
///
/// Returns `None` once the heading is within one rotation step.
#[inline]
pub fn steer(current: Heading, target: Heading, rotation_step: i32) -> Option<RotationDirection> {
    current.steer_towards(target, rotation_step)
}
