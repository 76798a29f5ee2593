//! Arena Grid
//!
//! Fixed-size grid of cells. A cell is either free or owned by the player
//! whose trail passed over it. Cells are never freed during a match.

use crate::game::state::PlayerId;

/// The playing field of one match.
#[derive(Clone, Debug)]
pub struct Arena {
    width: i32,
    height: i32,
    /// Column-major ownership, `cells[x * height + y]`.
    cells: Vec<Option<PlayerId>>,
}

impl Arena {
    /// Create an empty arena.
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Self {
            width,
            height,
            cells: vec![None; (width as usize) * (height as usize)],
        }
    }

    /// Arena width in cells.
    #[inline]
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Arena height in cells.
    #[inline]
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Check whether a cell lies inside `[0, width) x [0, height)`.
    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if self.in_bounds(x, y) {
            Some(x as usize * self.height as usize + y as usize)
        } else {
            None
        }
    }

    /// Owner of a cell, if any. Out-of-bounds cells have no owner.
    #[inline]
    pub fn owner(&self, x: i32, y: i32) -> Option<PlayerId> {
        self.index(x, y).and_then(|i| self.cells[i])
    }

    /// Whether a cell is owned.
    #[inline]
    pub fn is_used(&self, x: i32, y: i32) -> bool {
        self.owner(x, y).is_some()
    }

    /// Check a single step from `(from_x, from_y)` to `(to_x, to_y)`.
    ///
    /// The destination must be in bounds and free. A diagonal step is also
    /// rejected when both orthogonal neighbours `(to_x, from_y)` and
    /// `(from_x, to_y)` are owned, so a trail cannot be slipped through at
    /// a corner where two owned cells touch.
    pub fn is_valid_move(&self, from_x: i32, from_y: i32, to_x: i32, to_y: i32) -> bool {
        if !self.in_bounds(to_x, to_y) || self.is_used(to_x, to_y) {
            return false;
        }

        let diagonal = to_x != from_x && to_y != from_y;
        if diagonal && self.is_used(to_x, from_y) && self.is_used(from_x, to_y) {
            return false;
        }

        true
    }

    /// Mark a cell as owned.
    ///
    /// Returns `true` if the cell was free. An already-owned cell keeps its
    /// first owner. Out-of-bounds coordinates are ignored.
    pub fn set_used(&mut self, x: i32, y: i32, owner: PlayerId) -> bool {
        match self.index(x, y) {
            Some(i) if self.cells[i].is_none() => {
                self.cells[i] = Some(owner);
                true
            }
            _ => false,
        }
    }

    /// Number of owned cells.
    pub fn used_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }
}
