//! Grid storage engine for a terminal multiplexer.
//!
//! A [`Grid`] holds the characters, styling and scrollback history of one
//! virtual terminal screen. Rows `[0, hsize)` are history; rows
//! `[hsize, hsize + sy)` are the visible region. All coordinates on this
//! surface are absolute (history included); the embedding screen layer is
//! expected to translate.
//!
//! ## Design
//!
//! - Two-tier cell representation: an 8-byte-class packed entry for the
//!   common case (ASCII, palette colors), a side table of full [`Cell`]s
//!   for wide glyphs, multi-byte clusters, RGB color and high attributes.
//! - Block-segmented row storage: a list of line blocks (≤ 1024 lines
//!   each) so that trimming history and growing the tail never touch the
//!   middle, and no single allocation scales with the full history.
//! - Lazy reflow: on resize only the blocks near the visible region are
//!   rewritten eagerly; history blocks are tagged and rewrapped on first
//!   access.
//!
//! The parser and renderer live elsewhere; this crate only exposes
//! cell-level read/write/clear/move/reflow operations and the minimal ANSI
//! serialization needed to re-emit a row ([`Grid::string_cells`]).

pub mod ansi;
pub mod block;
pub mod cell;
pub mod grid;
pub mod line;
pub mod reflow;

pub use ansi::StringFlags;
pub use block::{Block, LocateCache, MAX_BLOCK_LINES};
pub use cell::{Cell, CellAttrs, CellEntry, CellFlags, CellText, Color, EntryData, PackedCell};
pub use grid::Grid;
pub use line::{Line, LineFlags};
