//! Packed cell representation and codec.
//!
//! ## Design
//!
//! Every screen position is logically a [`Cell`]: a UTF-8 cluster plus
//! attributes and two colors. Storing that directly would cost ~40 bytes
//! per position, so a line stores 8-byte-class [`CellEntry`] records
//! instead and keeps a side table of full cells for the minority that do
//! not fit: multi-byte text, width ≠ 1, RGB color, or attributes above the
//! low byte.
//!
//! The codec has two operations: *store* packs a cell into the dense form,
//! *promote* upgrades an entry to a side-table slot (see
//! [`Line::extended_cell`](crate::line::Line::extended_cell)). Compaction
//! of the side table lives with the line store.

use unicode_width::UnicodeWidthChar;

/// Maximum UTF-8 bytes stored inline for one cluster.
pub const CELL_TEXT_SIZE: usize = 21;

bitflags::bitflags! {
    /// Visual attributes of a cell.
    ///
    /// Bits above the low byte do not fit the dense entry and force the
    /// extended form.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct CellAttrs: u16 {
        const BRIGHT        = 0x001;
        const DIM           = 0x002;
        const UNDERSCORE    = 0x004;
        const BLINK         = 0x008;
        const REVERSE       = 0x010;
        const HIDDEN        = 0x020;
        const ITALICS       = 0x040;
        /// Alternate (line-drawing) charset shift.
        const CHARSET       = 0x080;
        const STRIKETHROUGH = 0x100;
    }
}

bitflags::bitflags! {
    /// Per-entry flags, shared between the dense and extended forms.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct CellFlags: u8 {
        /// Foreground index is in the 256-color palette.
        const FG256    = 0x1;
        /// Background index is in the 256-color palette.
        const BG256    = 0x2;
        /// Right half of a width-2 glyph.
        const PADDING  = 0x4;
        /// Entry is an indirection into the line's extended table.
        const EXTENDED = 0x8;
    }
}

/// A terminal color.
///
/// Low byte is the index; flag bits select the palette. The value `8`
/// with no flags is the "terminal default" sentinel for both foreground
/// and background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Color(pub u32);

impl Color {
    /// Index is in the xterm-256 palette.
    pub const FLAG_256: u32 = 0x0100_0000;
    /// Value carries 24-bit RGB in the low three bytes.
    pub const FLAG_RGB: u32 = 0x0200_0000;

    /// The "terminal default" sentinel.
    pub const DEFAULT: Self = Self(8);

    /// A 256-palette color.
    #[must_use]
    #[inline]
    pub const fn indexed(index: u8) -> Self {
        Self(index as u32 | Self::FLAG_256)
    }

    /// A 24-bit RGB color.
    #[must_use]
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(Self::FLAG_RGB | ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    #[must_use]
    #[inline]
    pub const fn is_default(self) -> bool {
        self.0 == 8
    }

    #[must_use]
    #[inline]
    pub const fn is_256(self) -> bool {
        self.0 & Self::FLAG_256 != 0
    }

    #[must_use]
    #[inline]
    pub const fn is_rgb(self) -> bool {
        self.0 & Self::FLAG_RGB != 0
    }

    /// Palette index (low byte).
    #[must_use]
    #[inline]
    pub const fn index(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// RGB components (only meaningful when [`Color::is_rgb`]).
    #[must_use]
    #[inline]
    pub const fn split_rgb(self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xff) as u8,
            ((self.0 >> 8) & 0xff) as u8,
            (self.0 & 0xff) as u8,
        )
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Inline UTF-8 cluster buffer with display width.
///
/// Holds the code units of one grapheme cluster (usually a single ASCII
/// byte) and the number of columns it occupies (1 or 2).
#[derive(Clone, Copy)]
pub struct CellText {
    data: [u8; CELL_TEXT_SIZE],
    size: u8,
    width: u8,
}

impl CellText {
    /// A single byte, width 1.
    #[must_use]
    pub const fn from_byte(ch: u8) -> Self {
        let mut data = [0u8; CELL_TEXT_SIZE];
        data[0] = ch;
        Self {
            data,
            size: 1,
            width: 1,
        }
    }

    /// A single character, width from the Unicode tables.
    #[must_use]
    pub fn from_char(ch: char) -> Self {
        let mut data = [0u8; CELL_TEXT_SIZE];
        let size = ch.encode_utf8(&mut data).len() as u8;
        let width = ch.width().unwrap_or(1).clamp(1, 2) as u8;
        Self { data, size, width }
    }

    /// A grapheme cluster. Bytes beyond the inline capacity are dropped at
    /// a character boundary; combining marks contribute width 0.
    #[must_use]
    pub fn from_cluster(text: &str) -> Self {
        let mut data = [0u8; CELL_TEXT_SIZE];
        let mut size = 0usize;
        let mut width = 0usize;
        for ch in text.chars() {
            let len = ch.len_utf8();
            if size + len > CELL_TEXT_SIZE {
                break;
            }
            ch.encode_utf8(&mut data[size..size + len]);
            size += len;
            width += ch.width().unwrap_or(0);
        }
        Self {
            data,
            size: size as u8,
            width: width.clamp(1, 2) as u8,
        }
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        // Always valid UTF-8 by construction.
        std::str::from_utf8(self.as_bytes()).unwrap_or("")
    }

    /// Byte length of the cluster.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> u32 {
        self.size as u32
    }

    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Display columns occupied (1 or 2).
    #[must_use]
    #[inline]
    pub const fn width(&self) -> u32 {
        self.width as u32
    }

    /// First code unit, for the dense encoding.
    #[must_use]
    #[inline]
    pub const fn first_byte(&self) -> u8 {
        self.data[0]
    }
}

impl PartialEq for CellText {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for CellText {}

impl std::fmt::Debug for CellText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellText")
            .field("text", &self.as_str())
            .field("width", &self.width)
            .finish()
    }
}

/// The full styled character at one screen position.
///
/// Dense entries reconstruct one of these on read; the line's extended
/// table stores them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub flags: CellFlags,
    pub attr: CellAttrs,
    pub fg: Color,
    pub bg: Color,
    pub text: CellText,
}

impl Cell {
    /// The shared default cell: a space with default colors.
    pub const DEFAULT: Self = Self {
        flags: CellFlags::empty(),
        attr: CellAttrs::empty(),
        fg: Color::DEFAULT,
        bg: Color::DEFAULT,
        text: CellText::from_byte(b' '),
    };

    /// A default-styled cell holding one character.
    #[must_use]
    pub fn from_char(ch: char) -> Self {
        Self {
            text: CellText::from_char(ch),
            ..Self::DEFAULT
        }
    }

    /// Display columns occupied.
    #[must_use]
    #[inline]
    pub fn width(&self) -> u32 {
        self.text.width()
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Dense payload: attributes and colors truncated to a byte each, plus a
/// single ASCII code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedCell {
    pub attr: u8,
    pub fg: u8,
    pub bg: u8,
    pub ch: u8,
}

/// Entry payload: packed in place, or an index into the line's extended
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryData {
    Packed(PackedCell),
    Offset(u32),
}

/// One slot in a line's cell array.
///
/// The `EXTENDED` flag mirrors the `Offset` variant; the codec keeps the
/// two in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellEntry {
    pub flags: CellFlags,
    pub data: EntryData,
}

impl CellEntry {
    /// The shared default dense entry.
    pub const DEFAULT: Self = Self {
        flags: CellFlags::empty(),
        data: EntryData::Packed(PackedCell {
            attr: 0,
            fg: 8,
            bg: 8,
            ch: b' ',
        }),
    };

    #[must_use]
    #[inline]
    pub const fn is_extended(&self) -> bool {
        matches!(self.data, EntryData::Offset(_))
    }

    /// Whether `cell` can only be represented through the extended table.
    ///
    /// True when the entry is already an indirection, when any attribute
    /// above the low byte is set, when the text is not a single width-1
    /// code unit, or when either color carries RGB.
    #[must_use]
    pub fn needs_extended(&self, cell: &Cell) -> bool {
        if self.is_extended() {
            return true;
        }
        if cell.attr.bits() > 0xff {
            return true;
        }
        if cell.text.len() != 1 || cell.text.width() != 1 {
            return true;
        }
        cell.fg.is_rgb() || cell.bg.is_rgb()
    }

    /// Pack `cell` into the dense form, with `ch` as its code unit.
    ///
    /// The caller has already ruled out [`CellEntry::needs_extended`].
    pub fn store(&mut self, cell: &Cell, ch: u8) {
        let mut flags = cell.flags;
        if cell.fg.is_256() {
            flags |= CellFlags::FG256;
        }
        if cell.bg.is_256() {
            flags |= CellFlags::BG256;
        }
        self.flags = flags;
        self.data = EntryData::Packed(PackedCell {
            attr: cell.attr.bits() as u8,
            fg: cell.fg.index(),
            bg: cell.bg.index(),
            ch,
        });
    }
}

impl Default for CellEntry {
    fn default() -> Self {
        Self::DEFAULT
    }
}
