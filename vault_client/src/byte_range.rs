use std::fmt;

use serde::{Deserialize, Serialize};

/// Inclusive byte range, following the cold store's wire convention where
/// both endpoints belong to the range (`"0-4"` covers five bytes).
///
/// All range arithmetic in the workspace goes through this type; inclusive
/// endpoints are too easy to get wrong with ad-hoc math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    /// Creates a range from explicit inclusive endpoints.
    pub fn new(start: u64, end_inclusive: u64) -> Self {
        debug_assert!(start <= end_inclusive);
        Self { start, end_inclusive }
    }

    /// Creates a range covering `len` bytes starting at `offset`.
    /// `len` must be nonzero; the store has no notion of an empty range.
    pub fn from_offset_len(offset: u64, len: u64) -> Self {
        debug_assert!(len > 0);
        Self {
            start: offset,
            end_inclusive: offset + len - 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end_inclusive)
    }
}
