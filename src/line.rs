//! Line store: one row of dense cell entries plus its extended side table.
//!
//! ## Design
//!
//! A line allocates nothing until written. `cells` grows in three tiers
//! (quarter, half, full screen width) so sparse lines stay small while a
//! line being filled left-to-right reallocates at most three times.
//! `cellused` tracks the rightmost written column; readers treat anything
//! past it (or past `cells.len()`) as the default cell.
//!
//! The extended table may accumulate unreferenced slots as cells are
//! overwritten; [`Line::compact`] rewrites it in traversal order, and is
//! invoked when a row is pushed into history.

use crate::cell::{Cell, CellAttrs, CellEntry, CellFlags, CellText, Color, EntryData};

bitflags::bitflags! {
    /// Line flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct LineFlags: u8 {
        /// The next line continues this one (same logical paragraph).
        const WRAPPED  = 0x1;
        /// Some cell uses the extended table.
        const EXTENDED = 0x2;
        /// Scratch sentinel: the line was consumed during reflow.
        const DEAD     = 0x4;
    }
}

/// One row of cells.
#[derive(Debug, Clone, Default)]
pub struct Line {
    pub(crate) cells: Vec<CellEntry>,
    pub(crate) extended: Vec<Cell>,
    pub(crate) cellused: u32,
    pub(crate) flags: LineFlags,
}

impl Line {
    /// Allocated width in cells.
    #[must_use]
    #[inline]
    pub fn cellsize(&self) -> u32 {
        self.cells.len() as u32
    }

    /// Rightmost written column + 1.
    #[must_use]
    #[inline]
    pub fn cellused(&self) -> u32 {
        self.cellused
    }

    #[must_use]
    #[inline]
    pub fn flags(&self) -> LineFlags {
        self.flags
    }

    #[must_use]
    #[inline]
    pub fn is_wrapped(&self) -> bool {
        self.flags.contains(LineFlags::WRAPPED)
    }

    #[inline]
    pub fn set_wrapped(&mut self, wrapped: bool) {
        if wrapped {
            self.flags |= LineFlags::WRAPPED;
        } else {
            self.flags -= LineFlags::WRAPPED;
        }
    }

    #[must_use]
    #[inline]
    pub(crate) fn is_dead(&self) -> bool {
        self.flags.contains(LineFlags::DEAD)
    }

    /// Number of slots in the extended side table (referenced or not).
    #[must_use]
    #[inline]
    pub fn extended_len(&self) -> u32 {
        self.extended.len() as u32
    }

    /// Enlarge `cells` to hold at least `width` entries.
    ///
    /// Growth snaps to `sx / 4`, then `sx / 2`, then `sx` (never below the
    /// request, so an out-of-contract width cannot under-allocate). New
    /// cells are default; a non-default `bg` is written into each.
    pub(crate) fn expand(&mut self, width: u32, sx: u32, bg: Color) {
        if width <= self.cellsize() {
            return;
        }
        let want = if width < sx / 4 {
            sx / 4
        } else if width < sx / 2 {
            sx / 2
        } else {
            sx.max(width)
        };

        let old = self.cellsize();
        self.cells.resize(want as usize, CellEntry::DEFAULT);
        if !bg.is_default() {
            for px in old..want {
                self.clear_cell(px, bg);
            }
        }
    }

    /// Overwrite the entry at `px` with the default, then apply `bg`.
    ///
    /// An RGB background cannot be packed, so it promotes the fresh entry.
    pub(crate) fn clear_cell(&mut self, px: u32, bg: Color) {
        self.cells[px as usize] = CellEntry::DEFAULT;
        if bg.is_rgb() {
            let cell = self.extended_cell(px, &Cell::DEFAULT);
            cell.bg = bg;
        } else {
            let entry = &mut self.cells[px as usize];
            if bg.is_256() {
                entry.flags |= CellFlags::BG256;
            }
            if let EntryData::Packed(packed) = &mut entry.data {
                packed.bg = bg.index();
            }
        }
    }

    /// Read the cell at `px`, which must be below `cellsize`.
    ///
    /// An indirection whose offset fell outside the side table reads as
    /// the default cell; that only happens after an internal bug, and the
    /// guard keeps the damage bounded.
    pub(crate) fn cell_at(&self, px: u32) -> Cell {
        let entry = &self.cells[px as usize];
        match entry.data {
            EntryData::Offset(offset) => self
                .extended
                .get(offset as usize)
                .copied()
                .unwrap_or(Cell::DEFAULT),
            EntryData::Packed(packed) => {
                let mut cell = Cell {
                    flags: entry.flags - (CellFlags::FG256 | CellFlags::BG256),
                    attr: CellAttrs::from_bits_truncate(u16::from(packed.attr)),
                    fg: Color(u32::from(packed.fg)),
                    bg: Color(u32::from(packed.bg)),
                    text: CellText::from_byte(packed.ch),
                };
                if entry.flags.contains(CellFlags::FG256) {
                    cell.fg.0 |= Color::FLAG_256;
                }
                if entry.flags.contains(CellFlags::BG256) {
                    cell.bg.0 |= Color::FLAG_256;
                }
                cell
            }
        }
    }

    /// Read the cell at `px`, defaulting past the allocated width.
    #[must_use]
    pub fn get_cell(&self, px: u32) -> Cell {
        if px >= self.cellsize() {
            return Cell::DEFAULT;
        }
        self.cell_at(px)
    }

    /// Write `cell` at `px`. The caller has already expanded the line.
    pub(crate) fn set_cell(&mut self, px: u32, cell: &Cell) {
        if px + 1 > self.cellused {
            self.cellused = px + 1;
        }
        if self.cells[px as usize].needs_extended(cell) {
            self.extended_cell(px, cell);
        } else {
            self.cells[px as usize].store(cell, cell.text.first_byte());
        }
    }

    /// Promote the entry at `px` and write `cell` into its slot.
    ///
    /// A fresh promotion appends a slot; an entry that is already an
    /// indirection reuses its slot.
    pub(crate) fn extended_cell(&mut self, px: u32, cell: &Cell) -> &mut Cell {
        self.flags |= LineFlags::EXTENDED;

        let offset = match self.cells[px as usize].data {
            EntryData::Offset(offset) => offset as usize,
            EntryData::Packed(_) => {
                let offset = self.extended.len();
                self.extended.push(Cell::DEFAULT);
                let entry = &mut self.cells[px as usize];
                entry.flags = cell.flags | CellFlags::EXTENDED;
                entry.data = EntryData::Offset(offset as u32);
                offset
            }
        };
        debug_assert!(offset < self.extended.len(), "extended offset out of range");

        self.extended[offset] = *cell;
        &mut self.extended[offset]
    }

    /// Rewrite the extended table to a packed form.
    ///
    /// Slots are re-indexed in traversal order; if no entry references the
    /// table any more it is released.
    pub fn compact(&mut self) {
        if self.extended.is_empty() {
            return;
        }

        let used = self
            .cells
            .iter()
            .filter(|entry| entry.is_extended())
            .count();
        if used == 0 {
            self.extended = Vec::new();
            return;
        }

        let mut packed = Vec::with_capacity(used);
        for px in 0..self.cells.len() {
            if let EntryData::Offset(offset) = self.cells[px].data {
                let cell = self
                    .extended
                    .get(offset as usize)
                    .copied()
                    .unwrap_or(Cell::DEFAULT);
                self.cells[px].data = EntryData::Offset(packed.len() as u32);
                packed.push(cell);
            }
        }
        self.extended = packed;
    }
}


#[cfg(kani)]
mod proofs {
    /// The growth tiers never allocate below the requested width.
    #[kani::proof]
    fn expand_never_under_allocates() {
        let width: u32 = kani::any();
        let sx: u32 = kani::any();

        kani::assume(width > 0 && width <= 1 << 16);
        kani::assume(sx <= 1 << 16);

        let want = if width < sx / 4 {
            sx / 4
        } else if width < sx / 2 {
            sx / 2
        } else {
            sx.max(width)
        };

        kani::assert(want >= width, "allocation covers the request");
    }
}
