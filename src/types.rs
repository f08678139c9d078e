use serde::Serialize;
use std::fmt;
use std::ops::Range;

pub type Offset = u64;

/// Position of a record in its [`SignatureDatabase`](crate::SignatureDatabase).
/// Registration order doubles as tie-break priority: lower wins.
pub type RecordIndex = usize;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchKind {
    Header = 0,
    Footer = 1,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Header => write!(f, "HEADER"),
            MatchKind::Footer => write!(f, "FOOTER"),
        }
    }
}

/// A single pattern hit. Field order is the scan order: offset first, then
/// database order, then header before footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchEvent {
    pub offset: Offset,
    pub record: RecordIndex,
    pub kind: MatchKind,
}

impl MatchEvent {
    #[inline]
    pub fn header(offset: Offset, record: RecordIndex) -> Self {
        Self {
            offset,
            record,
            kind: MatchKind::Header,
        }
    }

    #[inline]
    pub fn footer(offset: Offset, record: RecordIndex) -> Self {
        Self {
            offset,
            record,
            kind: MatchKind::Footer,
        }
    }

    #[inline]
    pub fn is_header(&self) -> bool {
        self.kind == MatchKind::Header
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    /// End offset comes from a paired footer.
    Exact,
    /// End offset comes from the size cap, a container boundary or the end of the stream.
    Estimated,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Exact => write!(f, "EXACT"),
            Confidence::Estimated => write!(f, "ESTIMATED"),
        }
    }
}

/// Descriptor of a carved file. Holds no bytes; `end_offset` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarvedRegion {
    pub type_id: String,
    #[serde(skip)]
    pub record: RecordIndex,
    pub start_offset: Offset,
    pub end_offset: Offset,
    pub confidence: Confidence,
}

impl CarvedRegion {
    pub fn new(
        type_id: impl Into<String>,
        record: RecordIndex,
        range: Range<Offset>,
        confidence: Confidence,
    ) -> Self {
        debug_assert!(range.start < range.end, "empty carved region");
        Self {
            type_id: type_id.into(),
            record,
            start_offset: range.start,
            end_offset: range.end,
            confidence,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start_offset >= self.end_offset
    }

    #[inline]
    pub fn range(&self) -> Range<Offset> {
        self.start_offset..self.end_offset
    }

    /// True when `offset` lies inside the region but is not its first byte.
    #[inline]
    pub fn strictly_contains(&self, offset: Offset) -> bool {
        offset > self.start_offset && offset < self.end_offset
    }

    #[inline]
    pub fn is_exact(&self) -> bool {
        self.confidence == Confidence::Exact
    }
}

impl fmt::Display for CarvedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:#x}..{:#x}) {} bytes {}",
            self.type_id,
            self.start_offset,
            self.end_offset,
            self.len(),
            self.confidence
        )
    }
}
