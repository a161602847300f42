use std::ops::Range;

use tracing::warn;

use crate::error::{ReadError, Result};

/// A `[start, end)` restriction of record ids
///
/// Either bound may be left open: an open start means the first record, an open
/// end means "up to the last record".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub start: Option<u64>,
    pub end: Option<u64>,
}
impl Region {
    /// The whole store
    pub const NONE: Self = Self {
        start: None,
        end: None,
    };

    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Every record from `start` onward
    #[must_use]
    pub fn from_start(start: u64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Resolves the region against a store of `count` records
    ///
    /// An end beyond the record count is clamped with a warning.
    ///
    /// # Errors
    ///
    /// [`ReadError::InvalidRegion`] if the start lies beyond the last record or the
    /// end precedes the start. A start equal to `count` yields an empty range.
    pub fn resolve(&self, count: u64) -> Result<Range<u64>> {
        let start = self.start.unwrap_or(0);
        if start > count {
            return Err(ReadError::InvalidRegion {
                start,
                end: self.end.unwrap_or(count),
                count,
            }
            .into());
        }
        let end = match self.end {
            None => count,
            Some(end) if end > count => {
                warn!("The end sequence id {end} is out of range, it must be from {start} to {count}. Defaulting end to {count}");
                count
            }
            Some(end) => end,
        };
        if end < start {
            return Err(ReadError::InvalidRegion { start, end, count }.into());
        }
        Ok(start..end)
    }
}
impl From<Range<u64>> for Region {
    fn from(range: Range<u64>) -> Self {
        Self::new(range.start, range.end)
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(Region::NONE.resolve(10).unwrap(), 0..10);
        assert_eq!(Region::NONE.resolve(0).unwrap(), 0..0);
        assert_eq!(Region::from_start(3).resolve(10).unwrap(), 3..10);
        assert_eq!(Region::from(2..5).resolve(10).unwrap(), 2..5);
        assert_eq!(Region::new(4, 4).resolve(10).unwrap(), 4..4);
    }

    #[test]
    fn test_end_is_clamped() {
        assert_eq!(Region::new(2, 50).resolve(10).unwrap(), 2..10);
    }

    #[test]
    fn test_invalid_regions() {
        assert_eq!(Region::from_start(10).resolve(10).unwrap(), 10..10);
        assert!(Region::from_start(11).resolve(10).is_err());
        assert!(Region::new(5, 3).resolve(10).is_err());
        assert!(Region::from_start(1).resolve(0).is_err());
    }
}
