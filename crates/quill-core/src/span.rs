//! Source location tracking for diagnostics.
//!
//! Provides [`Span`], a byte range inside one source unit. Every typed
//! expression node carries one so that structural compile errors (stack too
//! deep, storage overflow) can point back at the offending code.

use std::fmt;

/// A byte range `[start, end)` within source unit `source`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Index of the source unit the range belongs to.
    pub source: u32,
    /// First byte of the range.
    pub start: u32,
    /// One past the last byte of the range.
    pub end: u32,
}

impl Span {
    /// Create a span covering `[start, end)` in source unit 0.
    #[inline]
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            source: 0,
            start,
            end: end.max(start),
        }
    }

    /// Create a span in a specific source unit.
    #[inline]
    pub fn in_source(source: u32, start: u32, end: u32) -> Self {
        Self {
            source,
            start,
            end: end.max(start),
        }
    }

    /// A zero-length span at `offset`.
    #[inline]
    pub fn point(offset: u32) -> Self {
        Self::new(offset, offset)
    }

    /// Whether the span covers no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of bytes covered.
    #[inline]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    /// Smallest span covering both `self` and `other`.
    ///
    /// Spans from different source units cannot be joined; `self` wins.
    #[inline]
    pub fn merge(self, other: Span) -> Span {
        if self.source != other.source {
            return self;
        }
        Span {
            source: self.source,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}..{}", self.source, self.start, self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}..{}", self.source, self.start, self.end)
    }
}
