//! ANSI serialization: re-emit a row as the minimal escape-sequence string.
//!
//! Given the previously emitted cell as an anchor, [`Grid::string_cells`]
//! produces only the SGR prefix needed to transition rendering state from
//! that cell to the next, then the cell text. If any attribute has to be
//! *removed*, a full reset (`ESC[0m`) is emitted first and the remaining
//! attributes are treated as newly set; the charset shift survives the
//! reset because it is carried by SO/SI, not SGR.

use std::fmt::Write as _;

use smallvec::SmallVec;

use crate::cell::{Cell, CellAttrs, CellFlags, Color};
use crate::grid::Grid;

bitflags::bitflags! {
    /// Options for [`Grid::string_cells`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct StringFlags: u8 {
        /// Emit SGR transitions between cells.
        const SEQUENCES = 0x1;
        /// Emit control bytes as backslash escapes and double literal
        /// backslashes.
        const ESCAPE_C0 = 0x2;
        /// Strip trailing spaces from the result.
        const TRIM      = 0x4;
    }
}

/// SGR codes in emission order.
const SGR_ATTRS: [(CellAttrs, u32); 8] = [
    (CellAttrs::BRIGHT, 1),
    (CellAttrs::DIM, 2),
    (CellAttrs::ITALICS, 3),
    (CellAttrs::UNDERSCORE, 4),
    (CellAttrs::BLINK, 5),
    (CellAttrs::REVERSE, 7),
    (CellAttrs::HIDDEN, 8),
    (CellAttrs::STRIKETHROUGH, 9),
];

type Params = SmallVec<[u32; 8]>;

/// SGR parameters selecting the foreground of `cell`.
fn fg_params(cell: &Cell) -> Params {
    let mut params = Params::new();
    let fg = cell.fg;
    if fg.is_256() {
        params.extend_from_slice(&[38, 5, u32::from(fg.index())]);
    } else if fg.is_rgb() {
        let (r, g, b) = fg.split_rgb();
        params.extend_from_slice(&[38, 2, u32::from(r), u32::from(g), u32::from(b)]);
    } else {
        match fg.0 {
            0..=7 => params.push(fg.0 + 30),
            8 => params.push(39),
            90..=97 => params.push(fg.0),
            _ => {}
        }
    }
    params
}

/// SGR parameters selecting the background of `cell`.
fn bg_params(cell: &Cell) -> Params {
    let mut params = Params::new();
    let bg = cell.bg;
    if bg.is_256() {
        params.extend_from_slice(&[48, 5, u32::from(bg.index())]);
    } else if bg.is_rgb() {
        let (r, g, b) = bg.split_rgb();
        params.extend_from_slice(&[48, 2, u32::from(r), u32::from(g), u32::from(b)]);
    } else {
        match bg.0 {
            0..=7 => params.push(bg.0 + 40),
            8 => params.push(49),
            100..=107 => params.push(bg.0 - 10),
            _ => {}
        }
    }
    params
}

fn emit_csi(out: &mut String, params: &[u32], escape_c0: bool) {
    out.push_str(if escape_c0 { "\\033[" } else { "\x1b[" });
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let _ = write!(out, "{param}");
    }
    out.push('m');
}

/// Append the transition from `last` to `cell` to `out`.
fn transition(last: &Cell, cell: &Cell, escape_c0: bool, out: &mut String) {
    let attr = cell.attr;
    let mut lastattr = last.attr;

    // If any attribute is removed, begin with a reset; charset is the one
    // attribute that survives it.
    let mut codes: SmallVec<[u32; 16]> = SmallVec::new();
    for (mask, _) in SGR_ATTRS {
        if !attr.contains(mask) && lastattr.contains(mask) {
            codes.push(0);
            lastattr &= CellAttrs::CHARSET;
            break;
        }
    }
    for (mask, code) in SGR_ATTRS {
        if attr.contains(mask) && !lastattr.contains(mask) {
            codes.push(code);
        }
    }
    if !codes.is_empty() {
        emit_csi(out, &codes, escape_c0);
    }
    let reset = !codes.is_empty() && codes[0] == 0;

    let new_fg = fg_params(cell);
    if new_fg != fg_params(last) || reset {
        emit_csi(out, &new_fg, escape_c0);
    }

    let new_bg = bg_params(cell);
    if new_bg != bg_params(last) || reset {
        emit_csi(out, &new_bg, escape_c0);
    }

    if attr.contains(CellAttrs::CHARSET) && !lastattr.contains(CellAttrs::CHARSET) {
        out.push_str(if escape_c0 { "\\016" } else { "\u{0e}" });
    }
    if !attr.contains(CellAttrs::CHARSET) && lastattr.contains(CellAttrs::CHARSET) {
        out.push_str(if escape_c0 { "\\017" } else { "\u{0f}" });
    }
}

impl Grid {
    /// Serialize `nx` cells of row `py` starting at `px`.
    ///
    /// `last` carries the rendering state across calls: when supplied, the
    /// transition starts from it and it is updated to the final cell's
    /// style; `None` starts from the default cell. Padding cells are
    /// skipped, so a wide glyph is emitted once.
    pub fn string_cells(
        &mut self,
        px: u32,
        py: u32,
        nx: u32,
        last: Option<&mut Cell>,
        flags: StringFlags,
    ) -> String {
        let mut scratch = Cell::DEFAULT;
        let anchor: &mut Cell = match last {
            Some(cell) => cell,
            None => &mut scratch,
        };

        let with_codes = flags.contains(StringFlags::SEQUENCES);
        let escape_c0 = flags.contains(StringFlags::ESCAPE_C0);

        let mut out = String::new();
        if let Some(line) = self.peek_line(py) {
            for xx in px..px.saturating_add(nx) {
                if xx >= line.cellsize() {
                    break;
                }
                let cell = line.get_cell(xx);
                if cell.flags.contains(CellFlags::PADDING) {
                    continue;
                }

                if with_codes {
                    transition(anchor, &cell, escape_c0, &mut out);
                    *anchor = cell;
                }

                let text = cell.text.as_str();
                if escape_c0 && text == "\\" {
                    out.push_str("\\\\");
                } else {
                    out.push_str(text);
                }
            }
        }

        if flags.contains(StringFlags::TRIM) {
            let trimmed = out.trim_end_matches(' ').len();
            out.truncate(trimmed);
        }
        out
    }
}
