//! Quadtree path: the key of every packet.
//!
//! A path is a sequence of up to [`MAX_LEVEL`] digits in `0..=3`. It is packed
//! into a `u64`: digit `i` occupies bits `62-2i..=63-2i`, the level sits in
//! the low 16 bits and all other bits are zero. Comparing the packed values
//! therefore gives preorder: digit by digit, with a prefix sorting before all
//! of its extensions.
//!
//! Digits map to rows and columns as
//! ```text
//! +---+---+
//! | 3 | 2 |   row 1
//! +---+---+
//! | 0 | 1 |   row 0
//! +---+---+
//! ```

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use crate::def::MAX_LEVEL;
use crate::error::{PacketFileError, Result};

const LEVEL_MASK: u64 = 0xFFFF;

#[inline]
fn path_mask(level: u32) -> u64 {
    if level == 0 {
        0
    } else {
        u64::MAX << (64 - 2 * level)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuadtreePath(u64);

impl QuadtreePath {
    /// The root path, level 0
    pub const fn root() -> Self {
        QuadtreePath(0)
    }

    /// Build a path from digit values `0..=3`
    pub fn from_digits(digits: &[u8]) -> Result<Self> {
        if digits.len() > MAX_LEVEL as usize {
            return Err(PacketFileError::InvalidPath(format!("{:?}", digits)));
        }
        let mut raw = 0u64;
        for (i, d) in digits.iter().enumerate() {
            if *d > 3 {
                return Err(PacketFileError::InvalidPath(format!("{:?}", digits)));
            }
            raw |= (*d as u64) << (62 - 2 * i);
        }
        Ok(QuadtreePath(raw | digits.len() as u64))
    }

    /// Accept a packed value read from disk, rejecting level overflow and
    /// stray bits.
    pub fn from_raw(raw: u64) -> Result<Self> {
        let level = (raw & LEVEL_MASK) as u32;
        if level > MAX_LEVEL || raw & !(path_mask(level) | LEVEL_MASK) != 0 {
            return Err(PacketFileError::InvalidPath(format!("{:#018x}", raw)));
        }
        Ok(QuadtreePath(raw))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_le_bytes(bz: &[u8]) -> Result<Self> {
        Self::from_raw(LittleEndian::read_u64(bz))
    }

    pub fn write_le_bytes(&self, bz: &mut [u8]) {
        LittleEndian::write_u64(bz, self.0);
    }

    pub fn level(&self) -> u32 {
        (self.0 & LEVEL_MASK) as u32
    }

    pub fn is_root(&self) -> bool {
        self.level() == 0
    }

    /// Digit at depth `i`; must be below `level()`
    pub fn digit(&self, i: u32) -> u8 {
        debug_assert!(i < self.level());
        ((self.0 >> (62 - 2 * i)) & 3) as u8
    }

    pub fn digits(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.level()).map(move |i| self.digit(i))
    }

    /// Child in quadrant `quad`, `None` at the deepest level
    pub fn child(&self, quad: u8) -> Option<Self> {
        let level = self.level();
        if quad > 3 || level >= MAX_LEVEL {
            return None;
        }
        let bits = self.0 & path_mask(level);
        Some(QuadtreePath(
            bits | ((quad as u64) << (62 - 2 * level)) | (level + 1) as u64,
        ))
    }

    pub fn parent(&self) -> Option<Self> {
        let level = self.level();
        if level == 0 {
            None
        } else {
            Some(self.prefix(level - 1))
        }
    }

    /// The ancestor at `level`, or `self` when `level` is not above it
    pub fn prefix(&self, level: u32) -> Self {
        if level >= self.level() {
            return *self;
        }
        QuadtreePath((self.0 & path_mask(level)) | level as u64)
    }

    /// A path is its own ancestor
    pub fn is_ancestor_of(&self, other: &QuadtreePath) -> bool {
        self.level() <= other.level() && other.prefix(self.level()) == *self
    }

    /// Append the digits of `suffix`, `None` if the result is too deep
    pub fn concatenate(&self, suffix: &QuadtreePath) -> Option<Self> {
        let level = self.level() + suffix.level();
        if level > MAX_LEVEL {
            return None;
        }
        let head = self.0 & path_mask(self.level());
        let tail = (suffix.0 & path_mask(suffix.level())) >> (2 * self.level());
        Some(QuadtreePath(head | tail | level as u64))
    }

    /// The digits of `child` below `parent`, `None` unless `parent` is an
    /// ancestor of `child`
    pub fn relative_path(parent: &QuadtreePath, child: &QuadtreePath) -> Option<Self> {
        if !parent.is_ancestor_of(child) {
            return None;
        }
        let level = child.level() - parent.level();
        let bits = (child.0 & path_mask(child.level())) << (2 * parent.level());
        Some(QuadtreePath(bits | level as u64))
    }

    /// Move to the next path of the same level. Returns false, leaving the
    /// path untouched, when this is the last path of the level.
    pub fn advance_in_level(&mut self) -> bool {
        let level = self.level();
        let mask = path_mask(level);
        if level == 0 || self.0 & mask == mask {
            return false;
        }
        self.0 += 1u64 << (64 - 2 * level);
        true
    }

    /// Move to the preorder successor among paths no deeper than `max_level`.
    /// Returns false, leaving the path untouched, at the end of the walk.
    pub fn advance(&mut self, max_level: u32) -> bool {
        if self.level() < max_level {
            if let Some(child) = self.child(0) {
                *self = child;
                return true;
            }
        }
        let mut next = *self;
        while next.level() > 0 && next.digit(next.level() - 1) == 3 {
            next = next.prefix(next.level() - 1);
        }
        if next.level() == 0 {
            return false;
        }
        next.advance_in_level();
        *self = next;
        true
    }

    /// Position of the ancestor at `level` among all paths of that level,
    /// counting in preorder
    pub fn as_index(&self, level: u32) -> u64 {
        if level == 0 {
            0
        } else {
            self.0 >> (64 - 2 * level)
        }
    }

    /// Whether `self` comes before `other` in postorder (children first)
    pub fn is_postorder_before(&self, other: &QuadtreePath) -> bool {
        if self == other {
            return false;
        }
        if other.is_ancestor_of(self) {
            return true;
        }
        if self.is_ancestor_of(other) {
            return false;
        }
        self < other
    }

    pub fn from_level_row_col(level: u32, row: u32, col: u32) -> Result<Self> {
        if level > MAX_LEVEL || row >> level != 0 || col >> level != 0 {
            return Err(PacketFileError::InvalidPath(format!(
                "level {} row {} col {}",
                level, row, col
            )));
        }
        let mut digits = Vec::with_capacity(level as usize);
        for j in 0..level {
            let shift = level - 1 - j;
            let r = (row >> shift) & 1;
            let c = (col >> shift) & 1;
            digits.push(if r == 0 { c as u8 } else { (3 - c) as u8 });
        }
        Self::from_digits(&digits)
    }

    /// (level, row, col) of the tile this path addresses
    pub fn level_row_col(&self) -> (u32, u32, u32) {
        const ROW_BITS: [u32; 4] = [0, 0, 1, 1];
        const COL_BITS: [u32; 4] = [0, 1, 1, 0];
        let mut row = 0;
        let mut col = 0;
        for d in self.digits() {
            row = (row << 1) | ROW_BITS[d as usize];
            col = (col << 1) | COL_BITS[d as usize];
        }
        (self.level(), row, col)
    }
}

impl FromStr for QuadtreePath {
    type Err = PacketFileError;

    fn from_str(s: &str) -> Result<Self> {
        let mut digits = Vec::with_capacity(s.len());
        for c in s.bytes() {
            if !(b'0'..=b'3').contains(&c) {
                return Err(PacketFileError::InvalidPath(s.to_string()));
            }
            digits.push(c - b'0');
        }
        Self::from_digits(&digits).map_err(|_| PacketFileError::InvalidPath(s.to_string()))
    }
}

impl fmt::Display for QuadtreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.digits() {
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}
