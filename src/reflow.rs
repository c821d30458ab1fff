//! Reflow engine: rewrap blocks to a new width.
//!
//! ## Design
//!
//! A resize rewrites each block into a fresh target block at the new
//! width: over-long lines split, wrapped fragments join, everything else
//! moves across unchanged. Source lines are marked dead in place as they
//! are consumed so the pass can keep walking the old block without
//! unlinking anything.
//!
//! The grid-level driver walks blocks from the tail (the visible region)
//! towards the head. Once it has emitted more than a screenful of rewritten
//! rows, the remaining blocks lie entirely in history: they are only
//! tagged `need_reflow` and rewrapped on first access
//! ([`Grid::reflow_complete`]), so resizing a grid with a huge scrollback
//! does not stall on rows nobody is looking at.
//!
//! Callers hand in y-coordinates that point into the rows being rewritten
//! (the cursor row, the scroll offset); split and join update them in
//! place so they land on the row holding the same cell as before.

use crate::block::Block;
use crate::cell::Color;
use crate::grid::Grid;
use crate::line::{Line, LineFlags};

/// Take a line's contents, leaving a dead marker in its slot.
fn reflow_dead(line: &mut Line) -> Line {
    let taken = std::mem::take(line);
    line.flags = LineFlags::DEAD;
    taken
}

impl Block {
    /// Append `n` empty lines; returns the index of the first one.
    pub(crate) fn reflow_add(&mut self, n: u32) -> usize {
        let first = self.lines.len();
        self.lines
            .resize_with(first + n as usize, Line::default);
        first
    }

    /// Move a source line across unchanged.
    fn reflow_move(&mut self, from: &mut Line) -> usize {
        let to = self.reflow_add(1);
        self.lines[to] = reflow_dead(from);
        to
    }

    /// Join as much of the following logical paragraph as fits onto the
    /// current target row.
    ///
    /// With `already` set the target row is the one most recently
    /// appended (a split just filled it partially); otherwise source row
    /// `yy` is moved across first. `width` is the columns already used on
    /// that row.
    fn reflow_join(
        &mut self,
        src: &mut Block,
        sx: u32,
        yy: u32,
        mut width: u32,
        fixups: &mut [&mut u32],
        already: bool,
    ) {
        let to = if already {
            self.lines.len() - 1
        } else {
            let moved = reflow_dead(&mut src.lines[yy as usize]);
            let to = self.reflow_add(1);
            self.lines[to] = moved;
            to
        };
        let mut at = self.lines[to].cellused();

        // Consume source rows until the paragraph ends or the target row
        // is full.
        let mut lines = 0u32;
        let mut wrapped = true;
        let mut from: Option<usize> = None;
        let mut want = 0u32;
        loop {
            if yy + 1 + lines == src.block_size() {
                break;
            }
            let line = (yy + 1 + lines) as usize;

            if !src.lines[line].flags().contains(LineFlags::WRAPPED) {
                wrapped = false;
            }
            if src.lines[line].cellused() == 0 {
                if !wrapped {
                    break;
                }
                lines += 1;
                continue;
            }

            // Copy the first cell separately: `from` must stay pointed at
            // the last row we actually took cells out of.
            let cell = src.lines[line].cell_at(0);
            if width + cell.width() > sx {
                break;
            }
            width += cell.width();
            self.set_cell(at, to as u32, &cell);
            at += 1;

            from = Some(line);
            want = 1;
            while want < src.lines[line].cellused() {
                let cell = src.lines[line].cell_at(want);
                if width + cell.width() > sx {
                    break;
                }
                width += cell.width();
                self.set_cell(at, to as u32, &cell);
                at += 1;
                want += 1;
            }
            lines += 1;

            if !wrapped || want != src.lines[line].cellused() || width == sx {
                break;
            }
        }
        if lines == 0 {
            return;
        }

        // `from` is unset when only empty continuation rows were
        // consumed; there is nothing to shift or unwrap then.
        let mut lines = lines;
        if let Some(from) = from {
            let left = src.lines[from].cellused() - want;
            if left != 0 {
                // Partially consumed: shift what remains to column 0.
                src.move_cells(0, want, yy + lines, left, Color::DEFAULT);
                let line = &mut src.lines[from];
                line.cells.truncate(left as usize);
                line.cellused = left;
                lines -= 1;
            } else if !wrapped {
                // Consumed the paragraph's final row: the target row now
                // ends it.
                self.lines[to].flags -= LineFlags::WRAPPED;
            }
        }

        for i in (yy + 1)..(yy + 1 + lines) {
            drop(reflow_dead(&mut src.lines[i as usize]));
        }

        for fixup in fixups.iter_mut() {
            if **fixup > to as u32 + lines {
                **fixup -= lines;
            } else if **fixup > to as u32 {
                **fixup = to as u32;
            }
        }
    }

    /// Split source row `yy` into as many target rows as its cells need,
    /// breaking at `at` (the column where the available width ran out).
    fn reflow_split(
        &mut self,
        src: &mut Block,
        sx: u32,
        yy: u32,
        at: u32,
        fixups: &mut [&mut u32],
    ) {
        let used = src.lines[yy as usize].cellused();
        let flags = src.lines[yy as usize].flags();

        // Output rows needed beyond the first. The dense path is pure
        // arithmetic; the extended path simulates placement so a width-2
        // cell never straddles a row boundary.
        let lines = if !flags.contains(LineFlags::EXTENDED) {
            1 + (used - 1) / sx
        } else {
            let mut lines = 2;
            let mut width = 0;
            for i in at..used {
                let cell = src.lines[yy as usize].cell_at(i);
                if width + cell.width() > sx {
                    lines += 1;
                    width = 0;
                }
                width += cell.width();
            }
            lines
        };

        let first = self.reflow_add(lines);
        let mut line = first as u32 + 1;

        // Distribute the tail across the new rows.
        let mut width = 0;
        let mut xx = 0;
        for i in at..used {
            let cell = src.lines[yy as usize].cell_at(i);
            if width + cell.width() > sx {
                self.lines[line as usize].flags |= LineFlags::WRAPPED;
                line += 1;
                width = 0;
                xx = 0;
            }
            width += cell.width();
            self.set_cell(xx, line, &cell);
            xx += 1;
        }
        if flags.contains(LineFlags::WRAPPED) {
            self.lines[line as usize].flags |= LineFlags::WRAPPED;
        }

        // The head of the original line becomes the first new row.
        {
            let head = &mut src.lines[yy as usize];
            head.cells.truncate(at as usize);
            head.cellused = at;
            head.flags |= LineFlags::WRAPPED;
            let moved = reflow_dead(head);
            self.lines[first] = moved;
        }

        for fixup in fixups.iter_mut() {
            if yy <= **fixup {
                **fixup += lines - 1;
            }
        }

        // If the original line continued and the last new row has room,
        // pull the continuation straight in.
        if width < sx && flags.contains(LineFlags::WRAPPED) {
            self.reflow_join(src, sx, yy, width, fixups, true);
        }
    }

    /// Rewrap this block to width `sx`, returning the replacement block.
    ///
    /// Source lines are consumed (marked dead); the caller swaps the
    /// returned block's lines into place.
    pub(crate) fn reflow(&mut self, sx: u32, fixups: &mut [&mut u32]) -> Block {
        let mut target = Block::new(sx);

        for yy in 0..self.block_size() {
            if self.lines[yy as usize].is_dead() {
                continue;
            }

            // Work out the line's display width, the width of its first
            // cell, and the column where `sx` runs out.
            let mut first = 0;
            let mut at = 0;
            let mut width = 0;
            if !self.lines[yy as usize]
                .flags()
                .contains(LineFlags::EXTENDED)
            {
                first = 1;
                width = self.lines[yy as usize].cellused();
                at = if width > sx { sx } else { width };
            } else {
                let used = self.lines[yy as usize].cellused();
                for i in 0..used {
                    let cell = self.lines[yy as usize].cell_at(i);
                    if i == 0 {
                        first = cell.width();
                    }
                    if at == 0 && width + cell.width() > sx {
                        at = i;
                    }
                    width += cell.width();
                }
            }

            // Exactly right, or a first cell too wide to ever fit: move
            // the line across unchanged.
            if width == sx || first > sx {
                target.reflow_move(&mut self.lines[yy as usize]);
                continue;
            }

            if width > sx {
                target.reflow_split(self, sx, yy, at, fixups);
                continue;
            }

            if self.lines[yy as usize]
                .flags()
                .contains(LineFlags::WRAPPED)
            {
                target.reflow_join(self, sx, yy, width, fixups, false);
            } else {
                target.reflow_move(&mut self.lines[yy as usize]);
            }
        }

        target
    }
}

impl Grid {
    fn apply_hsize_diff(&mut self, hsize_diff: i64) {
        if hsize_diff < 0 && hsize_diff.unsigned_abs() > u64::from(self.hsize) {
            // More rows vanished than history held: clamp history to zero
            // and pad the tail back out so hallocated still covers a full
            // screen.
            let residual = (hsize_diff.unsigned_abs() - u64::from(self.hsize)) as u32;
            self.hsize = 0;
            if let Some(tail) = self.blocks.back_mut() {
                tail.reflow_add(residual);
                self.hallocated += residual;
            }
        } else {
            self.hsize = (i64::from(self.hsize) + hsize_diff) as u32;
        }
    }

    /// Rewrap every block still tagged from a lazy resize.
    pub(crate) fn reflow_complete(&mut self) {
        self.reflowing = true;
        let mut hsize_diff: i64 = 0;

        for index in 0..self.blocks.len() {
            if !self.blocks[index].need_reflow {
                continue;
            }

            let sx = self.blocks[index].sx;
            let mut fixups: [&mut u32; 0] = [];
            let new_block = self.blocks[index].reflow(sx, &mut fixups);

            let old_size = self.blocks[index].block_size();
            let new_size = new_block.block_size();
            hsize_diff += i64::from(new_size) - i64::from(old_size);
            self.hallocated = self.hallocated - old_size + new_size;

            let block = &mut self.blocks[index];
            block.lines = new_block.lines;
            block.need_reflow = false;
        }

        self.apply_hsize_diff(hsize_diff);
        self.reflowing = false;
    }

    /// Rewrap the grid to `sx` columns.
    ///
    /// `cursor` is the visible-relative cursor row, updated in place to
    /// follow its cell. Blocks wholly above the visible region are only
    /// tagged and rewrapped lazily on first access.
    pub fn reflow(&mut self, sx: u32, cursor: &mut u32) {
        let total = self.hsize + self.sy;

        // Rows from the bottom are stable while history grows above.
        let mut cy = self.sy.saturating_sub(1).saturating_sub(*cursor);
        let rev_hscrolled = total - self.hscrolled;

        log::debug!(
            "reflow: {total} rows to width {sx}, cy={cy}, hscrolled={}",
            self.hscrolled
        );

        self.sx = sx;
        self.reflowing = true;

        let mut offset = 0u32;
        let mut reflow_offset = 0u32;
        let mut hsize_diff: i64 = 0;
        let mut cy_fixed = false;
        let mut hscrolled_fixed = false;

        for index in (0..self.blocks.len()).rev() {
            if reflow_offset > self.sy {
                // Entirely in history: rewrap on first access instead.
                let block = &mut self.blocks[index];
                block.need_reflow = true;
                block.sx = sx;
                continue;
            }

            let block_size = self.blocks[index].block_size();

            // Register fixups for coordinates inside this block, as
            // distance-from-the-block-end so split and join can adjust
            // them as row indices.
            let mut cy_delta = 0u32;
            let mut hscrolled_delta = 0u32;
            let track_hscrolled = !hscrolled_fixed
                && rev_hscrolled >= offset
                && rev_hscrolled < offset + block_size;
            if track_hscrolled {
                hscrolled_delta = block_size - 1 - (rev_hscrolled - offset);
            }
            let track_cy = !cy_fixed && offset <= cy && cy < offset + block_size;
            if track_cy {
                cy_delta = block_size - 1 - (cy - offset);
            }

            let new_block = {
                let mut fixups: smallvec::SmallVec<[&mut u32; 2]> = smallvec::SmallVec::new();
                if track_hscrolled {
                    fixups.push(&mut hscrolled_delta);
                }
                if track_cy {
                    fixups.push(&mut cy_delta);
                }
                self.blocks[index].reflow(sx, &mut fixups)
            };
            let new_size = new_block.block_size();

            // Translate the block-local deltas back to global positions.
            if track_cy {
                cy = reflow_offset + (new_size - 1 - cy_delta);
                cy_fixed = true;
            }
            if track_hscrolled {
                self.hscrolled = total - (reflow_offset + (new_size - 1 - hscrolled_delta));
                hscrolled_fixed = true;
            }

            offset += block_size;
            reflow_offset += new_size;
            hsize_diff += i64::from(new_size) - i64::from(block_size);
            self.hallocated = self.hallocated - block_size + new_size;

            let block = &mut self.blocks[index];
            block.lines = new_block.lines;
            block.sx = sx;
            block.need_reflow = false;
        }

        self.apply_hsize_diff(hsize_diff);

        if self.hscrolled > self.hsize {
            self.hscrolled = self.hsize;
        }
        *cursor = if cy >= self.sy {
            0
        } else {
            self.sy - 1 - cy
        };
        self.reflowing = false;

        log::debug!(
            "reflow: now {} rows, hsize={}, cursor={cursor}",
            self.hsize + self.sy,
            self.hsize
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ansi::StringFlags;
    use crate::cell::{Cell, CellText, EntryData};

    fn check_invariants(gd: &Grid) {
        assert!(!gd.reflowing);
        assert_eq!(gd.hallocated, gd.hsize + gd.sy, "hallocated == hsize + sy");
        let total: u32 = gd.blocks.iter().map(Block::block_size).sum();
        assert_eq!(total, gd.hallocated, "block sizes sum to hallocated");
        assert!(gd.hscrolled <= gd.hsize);
        for block in &gd.blocks {
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
        gd.string_cells(0, py, sx, None, StringFlags::TRIM)
    }

    fn wide(ch: char) -> Cell {
        let mut cell = Cell::DEFAULT;
        cell.text = CellText::from_char(ch);
        cell
    }

    /// All rows with content, top to bottom, with their wrapped flags.
    fn rows(gd: &mut Grid) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        for py in 0..gd.total_rows() {
            let wrapped = gd.peek_line(py).map(|l| l.is_wrapped()).unwrap_or(false);
            out.push((row_text(gd, py), wrapped));
        }
        while matches!(out.last(), Some((text, false)) if text.is_empty()) {
            out.pop();
        }
        out
    }

    #[test]
    fn widen_joins_wrapped_lines() {
        // S3.
        let mut gd = Grid::new(4, 2, 100);
        gd.set_cells(0, 0, &Cell::DEFAULT, "ab");
        gd.set_wrapped(0, true);
        gd.set_cells(0, 1, &Cell::DEFAULT, "cd");

        let mut cursor = 0;
        gd.reflow(8, &mut cursor);

        assert_eq!(row_text(&mut gd, 0), "abcd");
        assert!(!gd.peek_line(0).unwrap().is_wrapped());
        assert_eq!(gd.history_size(), 0);
        check_invariants(&gd);
    }

    #[test]
    fn narrow_splits_long_line() {
        // S4. The in-place value is the visible-relative row; with the
        // head of the paragraph pushed into history the absolute row is
        // hsize + cursor.
        let mut gd = Grid::new(6, 2, 100);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abcdef");

        let mut cursor = 0;
        gd.reflow(3, &mut cursor);

        assert_eq!(gd.history_size(), 1);
        assert_eq!(row_text(&mut gd, 0), "abc");
        assert!(gd.peek_line(0).unwrap().is_wrapped());
        assert_eq!(row_text(&mut gd, 1), "def");
        assert!(!gd.peek_line(1).unwrap().is_wrapped());
        assert_eq!(gd.history_size() + cursor, 1);
        check_invariants(&gd);
    }

    #[test]
    fn same_width_is_identity() {
        let mut gd = Grid::new(5, 3, 100);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abcde");
        gd.set_wrapped(0, true);
        gd.set_cells(0, 1, &Cell::DEFAULT, "fg");
        let before = rows(&mut gd);

        let mut cursor = 1;
        gd.reflow(5, &mut cursor);

        assert_eq!(rows(&mut gd), before);
        assert_eq!(cursor, 1);
        check_invariants(&gd);
    }

    #[test]
    fn join_cursor_follows_protocol() {
        let mut gd = Grid::new(4, 2, 100);
        gd.set_cells(0, 0, &Cell::DEFAULT, "ab");
        gd.set_wrapped(0, true);
        gd.set_cells(0, 1, &Cell::DEFAULT, "cd");

        // Cursor on the continuation row. The join collapses the
        // paragraph to one row; with no history to absorb the shrink the
        // screen pads below, and the bottom-anchored cursor stays on the
        // bottom row.
        let mut cursor = 1;
        gd.reflow(8, &mut cursor);
        assert_eq!(row_text(&mut gd, 0), "abcd");
        assert_eq!(cursor, 1);
        check_invariants(&gd);
    }

    #[test]
    fn reflow_compose_matches_direct() {
        let fill = |gd: &mut Grid| {
            gd.set_cells(0, 0, &Cell::DEFAULT, "abcdefgh");
            gd.set_cells(0, 1, &Cell::DEFAULT, "xy");
        };

        let mut via = Grid::new(8, 2, 100);
        fill(&mut via);
        let mut cursor = 0;
        via.reflow(3, &mut cursor);
        via.reflow(8, &mut cursor);

        let mut direct = Grid::new(8, 2, 100);
        fill(&mut direct);
        let mut cursor = 0;
        direct.reflow(8, &mut cursor);

        assert_eq!(rows(&mut via), rows(&mut direct));
        check_invariants(&via);
        check_invariants(&direct);
    }

    #[test]
    fn paragraph_content_preserved() {
        let paragraph = "abcdefghijklmnopqrs";
        for new_sx in 2..24u32 {
            let mut gd = Grid::new(24, 2, 100);
            gd.set_cells(0, 0, &Cell::DEFAULT, paragraph);

            let mut cursor = 0;
            gd.reflow(new_sx, &mut cursor);

            let mut joined = String::new();
            for py in 0..gd.total_rows() {
                joined.push_str(&row_text(&mut gd, py));
            }
            assert_eq!(joined, paragraph, "width {new_sx}");
            check_invariants(&gd);
        }
    }

    #[test]
    fn wide_cells_never_straddle() {
        let mut gd = Grid::new(6, 2, 100);
        gd.set_cell(0, 0, &Cell::from_char('a'));
        gd.set_cell(1, 0, &wide('\u{4e2d}'));
        gd.set_cell(2, 0, &Cell::from_char('b'));
        gd.set_cell(3, 0, &wide('\u{56fd}'));

        let mut cursor = 0;
        gd.reflow(3, &mut cursor);

        // a + wide fills row 0 exactly; b + wide fills row 1.
        assert_eq!(gd.get_cell(0, 0).text.as_str(), "a");
        assert_eq!(gd.get_cell(1, 0).text.as_str(), "\u{4e2d}");
        assert!(gd.peek_line(0).unwrap().is_wrapped());
        assert_eq!(gd.get_cell(0, 1).text.as_str(), "b");
        assert_eq!(gd.get_cell(1, 1).text.as_str(), "\u{56fd}");
        assert!(!gd.peek_line(1).unwrap().is_wrapped());
        check_invariants(&gd);
    }

    #[test]
    fn wide_rows_split_exactly_full() {
        // Three width-2 cells at width 2: every output row is exactly
        // full, wrapped except the last, with no trailing empty row.
        let mut gd = Grid::new(6, 2, 100);
        gd.set_cell(0, 0, &wide('\u{4e00}'));
        gd.set_cell(1, 0, &wide('\u{4e8c}'));
        gd.set_cell(2, 0, &wide('\u{4e09}'));

        let mut cursor = 0;
        gd.reflow(2, &mut cursor);

        assert_eq!(gd.total_rows(), 4);
        assert_eq!(gd.get_cell(0, 0).text.as_str(), "\u{4e00}");
        assert!(gd.peek_line(0).unwrap().is_wrapped());
        assert_eq!(gd.get_cell(0, 1).text.as_str(), "\u{4e8c}");
        assert!(gd.peek_line(1).unwrap().is_wrapped());
        assert_eq!(gd.get_cell(0, 2).text.as_str(), "\u{4e09}");
        assert!(!gd.peek_line(2).unwrap().is_wrapped());
        check_invariants(&gd);
    }

    #[test]
    fn oversized_first_cell_moves_unchanged() {
        let mut gd = Grid::new(4, 2, 100);
        gd.set_cell(0, 0, &wide('\u{4e2d}'));

        let mut cursor = 0;
        gd.reflow(1, &mut cursor);

        // A width-2 cell can never fit a 1-column screen; the line moves
        // across as-is rather than splitting forever.
        assert_eq!(gd.get_cell(0, 0).text.as_str(), "\u{4e2d}");
        check_invariants(&gd);
    }

    #[test]
    fn history_blocks_reflow_lazily() {
        let mut gd = Grid::new(4, 2, 5000);
        for i in 0..1100u32 {
            gd.set_cells(0, gd.history_size(), &Cell::DEFAULT, &format!("h{i}"));
            gd.scroll_history(Color::DEFAULT);
        }
        assert!(gd.blocks.len() >= 2);

        let mut cursor = 0;
        gd.reflow(8, &mut cursor);

        // The head block lies entirely in history and was only tagged.
        assert!(gd.blocks[0].need_reflow);
        check_invariants(&gd);

        // First read through the facade completes the rewrap.
        let text = row_text(&mut gd, 0);
        assert_eq!(text, "h0");
        assert!(gd.blocks.iter().all(|block| !block.need_reflow));
        check_invariants(&gd);
    }

    #[test]
    fn reflow_narrow_grows_history() {
        let mut gd = Grid::new(8, 2, 100);
        gd.set_cells(0, 0, &Cell::DEFAULT, "abcdefgh");
        gd.set_cells(0, 1, &Cell::DEFAULT, "rest");

        let mut cursor = 1;
        gd.reflow(4, &mut cursor);

        assert_eq!(gd.history_size(), 1);
        assert_eq!(
            rows(&mut gd),
            vec![
                ("abcd".to_string(), true),
                ("efgh".to_string(), false),
                ("rest".to_string(), false),
            ]
        );
        // The cursor row still holds the same cells.
        assert_eq!(cursor, 1);
        check_invariants(&gd);
    }
}
