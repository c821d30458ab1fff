//! Block allocator: segmented storage for the row address space.
//!
//! ## Design
//!
//! Rows live in an ordered list of blocks of at most [`MAX_BLOCK_LINES`]
//! lines each. Growing and trimming happen at the ends, so pushing a row
//! into history and collecting old history never move the middle of the
//! address space, and no allocation scales with the total history.
//!
//! `locate` answers "which block owns row `py`" with a two-sided scan, and
//! a caller-supplied one-entry [`LocateCache`] short-circuits it when
//! successive lookups land in the same block. The cache is load-bearing:
//! bulk operations address rows in monotone order, and without it each
//! lookup would be linear in the number of blocks.

use crate::cell::{Cell, Color};
use crate::grid::Grid;
use crate::line::Line;

/// Upper bound on lines per block (allocator policy).
pub const MAX_BLOCK_LINES: u32 = 1024;

/// A contiguous run of lines.
///
/// Each block carries the width its lines were last laid out at and a
/// pending-reflow bit; history blocks keep their old layout after a resize
/// until something reads them (see [`crate::reflow`]).
#[derive(Debug, Default)]
pub struct Block {
    pub(crate) lines: Vec<Line>,
    pub(crate) sx: u32,
    pub(crate) need_reflow: bool,
}

impl Block {
    #[must_use]
    pub(crate) fn new(sx: u32) -> Self {
        Self {
            lines: Vec::new(),
            sx,
            need_reflow: false,
        }
    }

    /// Number of lines in this block.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> u32 {
        self.lines.len() as u32
    }

    pub(crate) fn check_y(&self, what: &str, py: u32) -> bool {
        if py >= self.block_size() {
            log::debug!("{what}: block y {py} out of range");
            return false;
        }
        true
    }

    /// Expand the line at `py` to at least `width` cells.
    pub(crate) fn expand_line(&mut self, py: u32, width: u32, bg: Color) {
        let sx = self.sx;
        self.lines[py as usize].expand(width, sx, bg);
    }

    /// Reset the line at `py` to empty, carrying a non-default background.
    pub(crate) fn empty_line(&mut self, py: u32, bg: Color) {
        self.lines[py as usize] = Line::default();
        if !bg.is_default() {
            let sx = self.sx;
            self.expand_line(py, sx, bg);
        }
    }

    /// Write `cell` at a block-relative position.
    pub(crate) fn set_cell(&mut self, px: u32, py: u32, cell: &Cell) {
        if !self.check_y("set_cell", py) {
            return;
        }
        self.expand_line(py, px + 1, Color::DEFAULT);
        self.lines[py as usize].set_cell(px, cell);
    }

    /// Move `nx` entries within one line from `px` to `dx`, clearing the
    /// vacated range to `bg`.
    pub(crate) fn move_cells(&mut self, dx: u32, px: u32, py: u32, nx: u32, bg: Color) {
        if nx == 0 || px == dx {
            return;
        }
        if !self.check_y("move_cells", py) {
            return;
        }

        self.expand_line(py, px + nx, Color::DEFAULT);
        self.expand_line(py, dx + nx, Color::DEFAULT);

        let line = &mut self.lines[py as usize];
        line.cells
            .copy_within(px as usize..(px + nx) as usize, dx as usize);
        if dx + nx > line.cellused {
            line.cellused = dx + nx;
        }

        for xx in px..px + nx {
            if xx >= dx && xx < dx + nx {
                continue;
            }
            line.clear_cell(xx, bg);
        }
    }
}

/// One-entry cache for [`Grid::locate`]: the base row of the last block
/// hit and its index. Valid only within a single bulk operation.
#[derive(Debug, Default)]
pub struct LocateCache {
    offset: u32,
    block: Option<usize>,
}

impl Grid {
    /// Debug-build structural check: block sizes must sum to `hallocated`.
    pub(crate) fn validate(&self) {
        #[cfg(debug_assertions)]
        {
            let total: u32 = self.blocks.iter().map(Block::block_size).sum();
            assert!(
                total == self.hallocated,
                "block sizes sum to {total}, hallocated is {}",
                self.hallocated
            );
        }
    }

    /// Find the block owning absolute row `py`.
    ///
    /// Returns the block index and the row's block-relative position, or
    /// `None` when `py` is outside `[0, hallocated)`. Scans from whichever
    /// end of the list is closer; `cache` short-circuits repeat hits.
    pub(crate) fn locate_cached(&self, py: u32, cache: &mut LocateCache) -> Option<(usize, u32)> {
        if let Some(index) = cache.block {
            if let Some(block) = self.blocks.get(index) {
                if cache.offset <= py && py < cache.offset + block.block_size() {
                    return Some((index, py - cache.offset));
                }
            }
        }

        let total = self.hallocated;
        if py < total / 2 {
            let mut offset = 0;
            for (index, block) in self.blocks.iter().enumerate() {
                let size = block.block_size();
                if offset <= py && py < offset + size {
                    cache.offset = offset;
                    cache.block = Some(index);
                    return Some((index, py - offset));
                }
                offset += size;
            }
        } else {
            let mut offset = total;
            for (index, block) in self.blocks.iter().enumerate().rev() {
                let size = block.block_size();
                offset -= size;
                if offset <= py && py < offset + size {
                    cache.offset = offset;
                    cache.block = Some(index);
                    return Some((index, py - offset));
                }
            }
        }
        None
    }

    /// Uncached [`Grid::locate_cached`].
    pub(crate) fn locate(&self, py: u32) -> Option<(usize, u32)> {
        self.locate_cached(py, &mut LocateCache::default())
    }

    /// Grow or shrink the row address space to exactly `total_goal` rows.
    ///
    /// Growth appends to the tail block, opening a new block when the tail
    /// is full; new rows are empty lines. Shrink frees whole tail blocks
    /// and then trims the last one. `hsize` and `sy` are the caller's to
    /// adjust.
    pub(crate) fn realloc_linedata(&mut self, total_goal: u32) {
        let mut total = self.hallocated;
        self.validate();

        while total_goal > total {
            let tail_full = self
                .blocks
                .back()
                .map_or(true, |block| block.block_size() >= MAX_BLOCK_LINES);
            if tail_full {
                let sx = self.sx;
                self.blocks.push_back(Block::new(sx));
            }
            if let Some(tail) = self.blocks.back_mut() {
                let new_size = (tail.block_size() + total_goal - total).min(MAX_BLOCK_LINES);
                total += new_size - tail.block_size();
                tail.lines.resize_with(new_size as usize, Line::default);
            }
        }

        while total_goal < total {
            let Some(tail) = self.blocks.back_mut() else {
                break;
            };

            let to_remove = total - total_goal;
            if to_remove >= tail.block_size() {
                total -= tail.block_size();
                self.blocks.pop_back();
                continue;
            }

            let new_size = tail.block_size() - to_remove;
            tail.lines.truncate(new_size as usize);
            total -= to_remove;
        }

        self.hallocated = total;
        self.validate();
    }

    /// Free the first `n` rows of the address space.
    ///
    /// Whole head blocks are dropped when they fit; a partial removal
    /// shifts the head block's remaining lines forward in place. Partial
    /// trims are rare (history collection almost always removes whole
    /// blocks), so the linear shift is acceptable.
    pub(crate) fn trim_head(&mut self, mut n: u32) {
        while n > 0 {
            let Some(head) = self.blocks.front_mut() else {
                break;
            };

            if head.block_size() <= n {
                let size = head.block_size();
                self.blocks.pop_front();
                self.hallocated -= size;
                n -= size;
                continue;
            }

            head.lines.drain(..n as usize);
            self.hallocated -= n;
            break;
        }

        self.validate();
    }
}
