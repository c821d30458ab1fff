//! Grid facade: public row, cell and history operations.
//!
//! ## Design
//!
//! All coordinates here are absolute: row 0 is the oldest history line and
//! rows `[hsize, hsize + sy)` are the visible region. The facade
//! bounds-checks every y, logs and returns on a bad write, and returns the
//! default cell on a bad read; the grid is never corrupted by an
//! out-of-range request.
//!
//! Reads that land in a block with a pending reflow first complete the
//! rewrap (see [`crate::reflow`]); plain writes do not, matching the
//! original engine.

use std::collections::VecDeque;

use crate::block::{Block, LocateCache};
use crate::cell::{Cell, CellText, Color};
use crate::line::Line;

/// The storage for one virtual terminal screen.
///
/// Owns a list of line blocks covering rows `[0, hallocated)`, where
/// `hallocated = hsize + sy` outside of reflow.
#[derive(Debug)]
pub struct Grid {
    /// Screen width in columns.
    pub(crate) sx: u32,
    /// Visible height in rows.
    pub(crate) sy: u32,
    pub(crate) blocks: VecDeque<Block>,
    /// Total addressable rows; sum of all block sizes.
    pub(crate) hallocated: u32,
    /// History rows above the visible region.
    pub(crate) hsize: u32,
    /// Rows scrolled out beyond the limit, for scrollbar placement.
    pub(crate) hscrolled: u32,
    /// Maximum history before collection fires.
    pub(crate) hlimit: u32,
    /// Re-entry guard for lazy reflow completion.
    pub(crate) reflowing: bool,
}

impl Grid {
    /// Create a grid of `sx` columns by `sy` visible rows, with up to
    /// `hlimit` rows of history.
    #[must_use]
    pub fn new(sx: u32, sy: u32, hlimit: u32) -> Self {
        let mut gd = Self {
            sx,
            sy: 0,
            blocks: VecDeque::new(),
            hallocated: 0,
            hsize: 0,
            hscrolled: 0,
            hlimit,
            reflowing: false,
        };
        gd.realloc_linedata(sy);
        gd.sy = sy;
        gd
    }

    /// Screen width in columns.
    #[must_use]
    #[inline]
    pub fn cols(&self) -> u32 {
        self.sx
    }

    /// Visible height in rows.
    #[must_use]
    #[inline]
    pub fn visible_rows(&self) -> u32 {
        self.sy
    }

    /// Number of history rows.
    #[must_use]
    #[inline]
    pub fn history_size(&self) -> u32 {
        self.hsize
    }

    /// Maximum history rows before collection.
    #[must_use]
    #[inline]
    pub fn history_limit(&self) -> u32 {
        self.hlimit
    }

    /// Rows scrolled out beyond the limit.
    #[must_use]
    #[inline]
    pub fn history_scrolled(&self) -> u32 {
        self.hscrolled
    }

    /// Total addressable rows (history plus visible).
    #[must_use]
    #[inline]
    pub fn total_rows(&self) -> u32 {
        self.hsize + self.sy
    }

    pub(crate) fn check_y(&self, what: &str, py: u32) -> bool {
        if py >= self.hsize + self.sy {
            log::debug!("{what}: y {py} out of range");
            return false;
        }
        true
    }

    /// Locate `py`, completing any pending reflow on its block first.
    pub(crate) fn resolve_block(&mut self, py: u32) -> Option<(usize, u32)> {
        if !self.reflowing {
            if let Some((index, _)) = self.locate(py) {
                if self.blocks[index].need_reflow {
                    self.reflow_complete();
                }
            }
        }
        self.locate(py)
    }

    pub(crate) fn line_mut(&mut self, py: u32) -> Option<&mut Line> {
        let (index, by) = self.resolve_block(py)?;
        Some(&mut self.blocks[index].lines[by as usize])
    }

    /// Borrow the line at `py` for inspection.
    pub fn peek_line(&mut self, py: u32) -> Option<&Line> {
        if !self.check_y("peek_line", py) {
            return None;
        }
        self.line_mut(py).map(|line| &*line)
    }

    /// Mark (or unmark) the line at `py` as continuing onto the next one.
    pub fn set_wrapped(&mut self, py: u32, wrapped: bool) {
        if !self.check_y("set_wrapped", py) {
            return;
        }
        if let Some(line) = self.line_mut(py) {
            line.set_wrapped(wrapped);
        }
    }

    fn empty_line(&mut self, py: u32, bg: Color) {
        if let Some((index, by)) = self.locate(py) {
            self.blocks[index].empty_line(by, bg);
        }
    }

    /// Read the cell at `(px, py)`; out-of-range reads as the default.
    pub fn get_cell(&mut self, px: u32, py: u32) -> Cell {
        if !self.check_y("get_cell", py) {
            return Cell::DEFAULT;
        }
        match self.line_mut(py) {
            Some(line) => line.get_cell(px),
            None => Cell::DEFAULT,
        }
    }

    /// Write `cell` at `(px, py)`.
    pub fn set_cell(&mut self, px: u32, py: u32, cell: &Cell) {
        if !self.check_y("set_cell", py) {
            return;
        }
        let Some((index, by)) = self.locate(py) else {
            return;
        };
        self.blocks[index].set_cell(px, by, cell);
    }

    /// Write a run of ASCII bytes sharing one style template, starting at
    /// `(px, py)`.
    pub fn set_cells(&mut self, px: u32, py: u32, template: &Cell, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.check_y("set_cells", py) {
            return;
        }
        let Some((index, by)) = self.resolve_block(py) else {
            return;
        };

        let len = text.len() as u32;
        let block = &mut self.blocks[index];
        block.expand_line(by, px + len, Color::DEFAULT);

        let line = &mut block.lines[by as usize];
        if px + len > line.cellused {
            line.cellused = px + len;
        }
        for (i, ch) in text.bytes().enumerate() {
            let xx = (px as usize + i) as u32;
            if line.cells[xx as usize].needs_extended(template) {
                let cell = line.extended_cell(xx, template);
                cell.text = CellText::from_byte(ch);
            } else {
                line.cells[xx as usize].store(template, ch);
            }
        }
    }

    /// Clear a rectangle to `bg`.
    ///
    /// A full-width rectangle is delegated to [`Grid::clear_lines`]. A
    /// default-background clear that reaches the right edge trims the
    /// line instead of materializing trailing default cells.
    pub fn clear(&mut self, px: u32, py: u32, nx: u32, ny: u32, bg: Color) {
        if nx == 0 || ny == 0 {
            return;
        }
        if px == 0 && nx == self.sx {
            self.clear_lines(py, ny, bg);
            return;
        }
        if !self.check_y("clear", py) || !self.check_y("clear", py + ny - 1) {
            return;
        }

        let mut cache = LocateCache::default();
        for yy in py..py + ny {
            let Some((index, by)) = self.locate_cached(yy, &mut cache) else {
                continue;
            };
            let sx = self.sx;
            let block = &mut self.blocks[index];

            let line = &mut block.lines[by as usize];
            if px + nx >= sx && px < line.cellused {
                line.cellused = px;
            }
            if px > line.cellsize() && bg.is_default() {
                continue;
            }
            if px + nx >= line.cellsize() && bg.is_default() {
                line.cells.truncate(px as usize);
                continue;
            }

            block.expand_line(by, px + nx, Color::DEFAULT);
            let line = &mut block.lines[by as usize];
            for xx in px..px + nx {
                line.clear_cell(xx, bg);
            }
        }
    }

    /// Reset whole lines, releasing their buffers.
    pub fn clear_lines(&mut self, py: u32, ny: u32, bg: Color) {
        if ny == 0 {
            return;
        }
        if !self.check_y("clear_lines", py) || !self.check_y("clear_lines", py + ny - 1) {
            return;
        }
        let mut cache = LocateCache::default();
        for yy in py..py + ny {
            if let Some((index, by)) = self.locate_cached(yy, &mut cache) {
                self.blocks[index].empty_line(by, bg);
            }
        }
    }

    fn move_one(
        &mut self,
        dyy: u32,
        syy: u32,
        src_cache: &mut LocateCache,
        dst_cache: &mut LocateCache,
    ) {
        let Some((sb, sly)) = self.locate_cached(syy, src_cache) else {
            return;
        };
        let Some((db, dly)) = self.locate_cached(dyy, dst_cache) else {
            return;
        };
        // Transfers ownership of the line's buffers; the source slot is
        // left empty, never double-freed.
        let line = std::mem::take(&mut self.blocks[sb].lines[sly as usize]);
        self.blocks[db].lines[dly as usize] = line;
    }

    /// Move `n` line records from `py` to `dy` without wiping the source.
    ///
    /// Traversal order depends on the direction so overlapping ranges
    /// never alias.
    pub(crate) fn move_lines_raw(&mut self, dy: u32, py: u32, n: u32) {
        let mut src_cache = LocateCache::default();
        let mut dst_cache = LocateCache::default();

        if py > dy {
            for syy in py..py + n {
                self.move_one(syy - py + dy, syy, &mut src_cache, &mut dst_cache);
            }
        } else if py < dy {
            for syy in (py..py + n).rev() {
                self.move_one(syy - py + dy, syy, &mut src_cache, &mut dst_cache);
            }
        }
    }

    /// Move `ny` lines from `py` to `dy`, re-emptying the vacated rows
    /// with `bg`.
    pub fn move_lines(&mut self, dy: u32, py: u32, ny: u32, bg: Color) {
        if ny == 0 || py == dy {
            return;
        }
        if !self.check_y("move_lines", py)
            || !self.check_y("move_lines", py + ny - 1)
            || !self.check_y("move_lines", dy)
            || !self.check_y("move_lines", dy + ny - 1)
        {
            return;
        }

        self.move_lines_raw(dy, py, ny);

        let mut cache = LocateCache::default();
        for yy in py..py + ny {
            if yy < dy || yy >= dy + ny {
                if let Some((index, by)) = self.locate_cached(yy, &mut cache) {
                    self.blocks[index].empty_line(by, bg);
                }
            }
        }
    }

    /// Move `nx` cells within line `py` from `px` to `dx`, clearing the
    /// vacated range to `bg`.
    pub fn move_cells(&mut self, dx: u32, px: u32, py: u32, nx: u32, bg: Color) {
        if !self.check_y("move_cells", py) {
            return;
        }
        let Some((index, by)) = self.locate(py) else {
            return;
        };
        self.blocks[index].move_cells(dx, px, by, nx, bg);
    }

    /// Scroll the entire visible screen, moving its top line into history.
    ///
    /// Allocates one new row at the bottom and moves the history boundary
    /// down; the newly historical row has its extended table compacted.
    /// Collection fires first when the history is at its limit.
    pub fn scroll_history(&mut self, bg: Color) {
        self.collect_history();

        let yy = self.hsize + self.sy;
        self.realloc_linedata(yy + 1);
        self.empty_line(yy, bg);

        self.hscrolled += 1;
        let hsize = self.hsize;
        if let Some(line) = self.line_mut(hsize) {
            line.compact();
        }
        self.hsize += 1;
    }

    /// Scroll the region `[upper, lower]` up one line, moving the region's
    /// top line into history.
    ///
    /// `upper` and `lower` are absolute rows. Three phases over the
    /// freshly extended address space:
    ///
    /// ```text
    ///           a    b    c
    ///  1   [1] [1]  [1]  [1]
    ///  2 u [2] [2]  [2]  [2]
    ///  3   [3] [3]  [_]  [4]
    ///  4 l [4] [4]  [4]  [5]
    ///  5   [5] [5]  [5]  [_]
    ///  6   [6] [6]  [6]  [6]
    ///  7   [x] [_]  [3]  [3]
    ///  8   [y] [x]  [x]  [x]
    ///  9   [z] [y]  [y]  [y]
    /// 10       [z]  [z]  [z]
    /// ```
    ///
    /// (a) push the whole visible region down one, (b) move the region's
    /// top into the vacated history slot, (c) shift the rest of the region
    /// back up and blank its new bottom row.
    pub fn scroll_history_region(&mut self, upper: u32, lower: u32, bg: Color) {
        self.collect_history();

        let yy = self.hsize + self.sy;
        self.realloc_linedata(yy + 1);

        // [a]
        self.move_lines_raw(self.hsize + 1, self.hsize, self.sy);

        // The region shifted down with everything else.
        let upper = upper + 1;
        let lower = lower + 1;

        // [b]
        self.move_lines_raw(self.hsize, upper, 1);

        // [c]
        self.move_lines_raw(upper, upper + 1, lower - upper);
        self.empty_line(lower, bg);

        self.hscrolled += 1;
        self.hsize += 1;
    }

    /// Collect history at the limit: trim the oldest tenth (at least one
    /// row) off the head.
    pub fn collect_history(&mut self) {
        if self.hsize == 0 || self.hsize < self.hlimit {
            return;
        }

        let ny = (self.hlimit / 10).max(1).min(self.hsize);
        log::debug!("collect_history: trimming {ny} of {} rows", self.hsize);

        self.trim_head(ny);
        self.hsize -= ny;
        if self.hscrolled > self.hsize {
            self.hscrolled = self.hsize;
        }
    }

    /// Drop all history rows.
    pub fn clear_history(&mut self) {
        self.trim_head(self.hsize);
        self.hscrolled = 0;
        self.hsize = 0;
    }

    /// Copy `ny` lines from `src` starting at `sy` into `dst` at `dy`,
    /// deep-cloning cell buffers so the grids stay independent.
    pub fn duplicate_lines(dst: &mut Grid, dy: u32, src: &mut Grid, sy: u32, ny: u32) {
        let ny = ny
            .min((dst.hsize + dst.sy).saturating_sub(dy))
            .min((src.hsize + src.sy).saturating_sub(sy));

        for i in 0..ny {
            let Some(line) = src.line_mut(sy + i) else {
                continue;
            };
            let copy = line.clone();
            if let Some(dst_line) = dst.line_mut(dy + i) {
                *dst_line = copy;
            }
        }
    }

    /// Compare two grids cell by cell over their first `sy` rows.
    ///
    /// Returns `true` when they are equal.
    pub fn compare(ga: &mut Grid, gb: &mut Grid) -> bool {
        if ga.sx != gb.sx || ga.sy != gb.sy {
            return false;
        }

        for yy in 0..ga.sy {
            let asize = match ga.peek_line(yy) {
                Some(line) => line.cellsize(),
                None => return false,
            };
            let bsize = match gb.peek_line(yy) {
                Some(line) => line.cellsize(),
                None => return false,
            };
            if asize != bsize {
                return false;
            }
            for xx in 0..asize {
                if ga.get_cell(xx, yy) != gb.get_cell(xx, yy) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellAttrs, EntryData};

    fn check_invariants(gd: &Grid) {
        assert!(!gd.reflowing);
        assert_eq!(gd.hallocated, gd.hsize + gd.sy, "hallocated == hsize + sy");
        let total: u32 = gd.blocks.iter().map(Block::block_size).sum();
        assert_eq!(total, gd.hallocated, "block sizes sum to hallocated");
        assert!(gd.hscrolled <= gd.hsize, "hscrolled <= hsize");
        for block in &gd.blocks {
            assert!(block.block_size() > 0);
            for line in &block.lines {
                assert!(line.cellused() <= line.cellsize());
                for entry in &line.cells {
                    if let EntryData::Offset(offset) = entry.data {
                        assert!((offset as usize) < line.extended.len());
                    }
                }
            }
        }
    }

    fn row_text(gd: &mut Grid, py: u32) -> String {
        let sx = gd.cols();
        gd.string_cells(0, py, sx, None, crate::ansi::StringFlags::TRIM)
    }

    #[test]
    fn basic_write() {
        // S1.
        let mut gd = Grid::new(5, 2, 100);
        gd.set_cell(0, 0, &Cell::from_char('H'));
        gd.set_cell(1, 0, &Cell::from_char('i'));

        let out = gd.string_cells(0, 0, 5, None, crate::ansi::StringFlags::empty());
        assert_eq!(out, "Hi");
        assert_eq!(gd.peek_line(0).unwrap().cellused(), 2);
        check_invariants(&gd);
    }

    #[test]
    fn set_get_roundtrip() {
        let mut gd = Grid::new(20, 4, 10);

        let mut cell = Cell::from_char('x');
        cell.attr = CellAttrs::BRIGHT | CellAttrs::UNDERSCORE;
        cell.fg = Color::indexed(99);
        cell.bg = Color(4);
        gd.set_cell(7, 2, &cell);
        assert_eq!(gd.get_cell(7, 2), cell);

        // Unwritten positions read as the default.
        assert_eq!(gd.get_cell(0, 0), Cell::DEFAULT);
        assert_eq!(gd.get_cell(19, 3), Cell::DEFAULT);
        check_invariants(&gd);
    }

    #[test]
    fn out_of_range_is_harmless() {
        let mut gd = Grid::new(10, 4, 10);
        gd.set_cell(0, 99, &Cell::from_char('x'));
        assert_eq!(gd.get_cell(0, 99), Cell::DEFAULT);
        gd.clear(0, 2, 4, 99, Color::DEFAULT);
        gd.move_lines(0, 2, 99, Color::DEFAULT);
        assert!(gd.peek_line(99).is_none());
        check_invariants(&gd);
    }

    #[test]
    fn set_cells_vectorized() {
        let mut gd = Grid::new(10, 2, 10);
        let mut template = Cell::DEFAULT;
        template.fg = Color::indexed(2);

        gd.set_cells(1, 0, &template, "hello");
        assert_eq!(gd.peek_line(0).unwrap().cellused(), 6);
        assert_eq!(gd.get_cell(3, 0).text.as_str(), "l");
        assert_eq!(gd.get_cell(3, 0).fg, Color::indexed(2));
        assert_eq!(gd.get_cell(0, 0), Cell::DEFAULT);
        check_invariants(&gd);
    }

    #[test]
    fn clear_trims_default_background() {
        let mut gd = Grid::new(8, 2, 10);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abcdefgh");

        // Clearing to the right edge with the default bg trims the line
        // instead of writing default cells.
        gd.clear(3, 0, 5, 1, Color::DEFAULT);
        let line = gd.peek_line(0).unwrap();
        assert_eq!(line.cellused(), 3);
        assert_eq!(line.cellsize(), 3);
        assert_eq!(row_text(&mut gd, 0), "abc");
        check_invariants(&gd);
    }

    #[test]
    fn clear_interior_writes_background() {
        let mut gd = Grid::new(8, 2, 10);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abcdefgh");

        let bg = Color::indexed(33);
        gd.clear(2, 0, 3, 1, bg);
        assert_eq!(gd.get_cell(2, 0).bg, bg);
        assert_eq!(gd.get_cell(4, 0).bg, bg);
        assert_eq!(gd.get_cell(5, 0).text.as_str(), "f");
        check_invariants(&gd);
    }

    #[test]
    fn clear_idempotent() {
        let mut gd = Grid::new(8, 2, 10);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abcdefgh");

        gd.clear(2, 0, 4, 1, Color::indexed(7));
        let first: Vec<Cell> = (0..8).map(|xx| gd.get_cell(xx, 0)).collect();
        gd.clear(2, 0, 4, 1, Color::indexed(7));
        let second: Vec<Cell> = (0..8).map(|xx| gd.get_cell(xx, 0)).collect();
        assert_eq!(first, second);
        check_invariants(&gd);
    }

    #[test]
    fn clear_full_width_releases_lines() {
        let mut gd = Grid::new(8, 3, 10);
        gd.set_cells(0, 1, &Cell::DEFAULT, "abcdefgh");

        gd.clear(0, 1, 8, 1, Color::DEFAULT);
        let line = gd.peek_line(1).unwrap();
        assert_eq!(line.cellsize(), 0);
        assert_eq!(line.cellused(), 0);
        check_invariants(&gd);
    }

    #[test]
    fn move_lines_and_back_restores() {
        let mut gd = Grid::new(10, 6, 10);
        gd.set_cells(0, 0, &Cell::DEFAULT, "one");
        gd.set_cells(0, 1, &Cell::DEFAULT, "two");

        gd.move_lines(3, 0, 2, Color::DEFAULT);
        assert_eq!(row_text(&mut gd, 3), "one");
        assert_eq!(row_text(&mut gd, 4), "two");
        assert_eq!(row_text(&mut gd, 0), "");

        gd.move_lines(0, 3, 2, Color::DEFAULT);
        assert_eq!(row_text(&mut gd, 0), "one");
        assert_eq!(row_text(&mut gd, 1), "two");
        assert_eq!(row_text(&mut gd, 3), "");
        check_invariants(&gd);
    }

    #[test]
    fn move_lines_overlapping() {
        let mut gd = Grid::new(10, 5, 10);
        for (py, text) in ["r0", "r1", "r2", "r3"].iter().enumerate() {
            gd.set_cells(0, py as u32, &Cell::DEFAULT, text);
        }

        // Shift rows 0..3 down one; traversal must not alias.
        gd.move_lines(1, 0, 3, Color::DEFAULT);
        assert_eq!(row_text(&mut gd, 0), "");
        assert_eq!(row_text(&mut gd, 1), "r0");
        assert_eq!(row_text(&mut gd, 2), "r1");
        assert_eq!(row_text(&mut gd, 3), "r2");
        check_invariants(&gd);
    }

    #[test]
    fn move_cells_clears_vacated() {
        let mut gd = Grid::new(12, 2, 10);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abc");

        gd.move_cells(6, 0, 0, 3, Color::indexed(5));
        assert_eq!(gd.get_cell(6, 0).text.as_str(), "a");
        assert_eq!(gd.get_cell(8, 0).text.as_str(), "c");
        assert_eq!(gd.get_cell(0, 0).bg, Color::indexed(5));
        check_invariants(&gd);
    }

    #[test]
    fn scroll_pushes_top_into_history() {
        // S2.
        let mut gd = Grid::new(3, 2, 8);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abc");
        gd.set_wrapped(0, true);
        gd.set_cells(0, 1, &Cell::DEFAULT, "def");

        gd.scroll_history(Color::DEFAULT);

        assert_eq!(gd.history_size(), 1);
        assert_eq!(row_text(&mut gd, 0), "abc");
        assert!(gd.peek_line(0).unwrap().is_wrapped());
        assert_eq!(row_text(&mut gd, 1), "def");
        let bottom = gd.peek_line(2).unwrap();
        assert_eq!(bottom.cellused(), 0);
        assert_eq!(gd.get_cell(0, 2).bg, Color::DEFAULT);
        check_invariants(&gd);
    }

    #[test]
    fn scroll_carries_background() {
        let mut gd = Grid::new(4, 2, 8);
        gd.scroll_history(Color::indexed(12));
        assert_eq!(gd.get_cell(0, 2).bg, Color::indexed(12));
        assert_eq!(gd.peek_line(2).unwrap().cellsize(), 4);
        check_invariants(&gd);
    }

    #[test]
    fn scroll_history_region_phases() {
        let mut gd = Grid::new(4, 4, 10);
        for (py, text) in ["r0", "r1", "r2", "r3"].iter().enumerate() {
            gd.set_cells(0, py as u32, &Cell::DEFAULT, text);
        }

        // Region rows 1..=2: r1 goes to history, r2 shifts up, a blank
        // opens at row 2, r0 and r3 stay put.
        gd.scroll_history_region(1, 2, Color::DEFAULT);

        assert_eq!(gd.history_size(), 1);
        assert_eq!(gd.history_scrolled(), 1);
        assert_eq!(row_text(&mut gd, 0), "r1");
        assert_eq!(row_text(&mut gd, 1), "r0");
        assert_eq!(row_text(&mut gd, 2), "r2");
        assert_eq!(row_text(&mut gd, 3), "");
        assert_eq!(row_text(&mut gd, 4), "r3");
        check_invariants(&gd);
    }

    #[test]
    fn collect_fires_at_limit() {
        // S5.
        let mut gd = Grid::new(4, 2, 100);
        for _ in 0..100 {
            gd.scroll_history(Color::DEFAULT);
        }
        assert_eq!(gd.history_size(), 100);

        // The next push collects 10% first.
        gd.scroll_history(Color::DEFAULT);
        assert_eq!(gd.history_size(), 91);
        assert!(gd.history_scrolled() <= gd.history_size() + gd.visible_rows());
        check_invariants(&gd);
    }

    #[test]
    fn collect_removes_at_least_one() {
        let mut gd = Grid::new(4, 2, 5);
        for _ in 0..5 {
            gd.scroll_history(Color::DEFAULT);
        }
        assert_eq!(gd.history_size(), 5);
        gd.collect_history();
        assert_eq!(gd.history_size(), 4);
        check_invariants(&gd);
    }

    #[test]
    fn clear_history_drops_everything() {
        let mut gd = Grid::new(4, 2, 100);
        gd.set_cells(0, 0, &Cell::DEFAULT, "top");
        for _ in 0..20 {
            gd.scroll_history(Color::DEFAULT);
        }
        assert_eq!(gd.history_size(), 20);

        gd.clear_history();
        assert_eq!(gd.history_size(), 0);
        assert_eq!(gd.history_scrolled(), 0);
        assert_eq!(gd.total_rows(), 2);
        check_invariants(&gd);
    }

    #[test]
    fn extended_promotion_and_compaction() {
        // S6.
        let mut gd = Grid::new(5, 2, 100);
        let mut cell = Cell::from_char('R');
        cell.fg = Color::rgb(0x01, 0x02, 0x03);
        gd.set_cell(0, 0, &cell);

        let got = gd.get_cell(0, 0);
        assert_eq!(got.fg.split_rgb(), (0x01, 0x02, 0x03));
        assert!(gd.peek_line(0).unwrap().extended_len() >= 1);

        gd.scroll_history(Color::DEFAULT);
        assert_eq!(gd.peek_line(0).unwrap().extended_len(), 1);
        assert_eq!(gd.get_cell(0, 0).fg, Color::rgb(1, 2, 3));
        check_invariants(&gd);
    }

    #[test]
    fn duplicate_lines_isolates_grids() {
        let mut src = Grid::new(10, 3, 10);
        let mut dst = Grid::new(10, 3, 10);
        src.set_cells(0, 0, &Cell::DEFAULT, "copy me");

        Grid::duplicate_lines(&mut dst, 0, &mut src, 0, 3);
        assert_eq!(row_text(&mut dst, 0), "copy me");

        src.set_cells(0, 0, &Cell::DEFAULT, "mutated");
        assert_eq!(row_text(&mut dst, 0), "copy me");
        check_invariants(&dst);
    }

    #[test]
    fn compare_grids() {
        let mut ga = Grid::new(10, 2, 10);
        let mut gb = Grid::new(10, 2, 10);
        assert!(Grid::compare(&mut ga, &mut gb));

        ga.set_cells(0, 0, &Cell::DEFAULT, "diff");
        assert!(!Grid::compare(&mut ga, &mut gb));

        gb.set_cells(0, 0, &Cell::DEFAULT, "diff");
        assert!(Grid::compare(&mut ga, &mut gb));

        let mut gc = Grid::new(9, 2, 10);
        assert!(!Grid::compare(&mut ga, &mut gc));
    }

    #[test]
    fn history_spans_blocks() {
        // Push enough rows that history crosses a block boundary.
        let mut gd = Grid::new(4, 2, 5000);
        for i in 0..1500u32 {
            gd.set_cells(0, gd.history_size(), &Cell::DEFAULT, &format!("{i}"));
            gd.scroll_history(Color::DEFAULT);
        }
        assert_eq!(gd.history_size(), 1500);
        assert!(gd.blocks.len() > 1);
        assert_eq!(row_text(&mut gd, 0), "0");
        assert_eq!(row_text(&mut gd, 1234), "1234");
        check_invariants(&gd);
    }
}
