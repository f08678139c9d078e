//! Signature records and the immutable signature database.
//!
//! Patterns are compiled once, when a record is built, into a fixed
//! literal-or-wildcard representation. Nothing is re-parsed while scanning.

use crate::error::ConfigError;
use crate::types::{Offset, RecordIndex};
use std::collections::HashSet;
use std::fmt;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;

pub const DEFAULT_EXTENSION: &str = "bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteMatcher {
    Literal(u8),
    Any,
}

impl ByteMatcher {
    #[inline]
    pub fn accepts(self, byte: u8) -> bool {
        match self {
            ByteMatcher::Literal(expected) => expected == byte,
            ByteMatcher::Any => true,
        }
    }
}

/// An ordered sequence of byte matchers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    matchers: Box<[ByteMatcher]>,
}

impl Pattern {
    pub fn literal(bytes: &[u8]) -> Self {
        Self {
            matchers: bytes.iter().copied().map(ByteMatcher::Literal).collect(),
        }
    }

    pub fn from_matchers(matchers: Vec<ByteMatcher>) -> Self {
        Self {
            matchers: matchers.into_boxed_slice(),
        }
    }

    /// Parses hex text such as `"FF D8 ?? E0"` or `"ffd8??e0"`.
    ///
    /// On failure the offending token is returned.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        let mut matchers = Vec::with_capacity(digits.len() / 2);

        for pair in digits.chunks(2) {
            let token: String = pair.iter().collect();
            if pair.len() != 2 {
                return Err(token);
            }
            if token == "??" {
                matchers.push(ByteMatcher::Any);
                continue;
            }
            match hex::decode(&token) {
                Ok(bytes) => matchers.push(ByteMatcher::Literal(bytes[0])),
                Err(_) => return Err(token),
            }
        }

        Ok(Self::from_matchers(matchers))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    #[inline]
    pub fn matchers(&self) -> &[ByteMatcher] {
        &self.matchers
    }

    /// Checks the pattern against the start of `window`. A window shorter
    /// than the pattern never matches.
    #[inline]
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.matchers.len()
            && self
                .matchers
                .iter()
                .zip(window)
                .all(|(matcher, &byte)| matcher.accepts(byte))
    }

    /// Longest run of literal bytes, as `(position in pattern, bytes)`.
    /// The first run wins on equal length. `None` for all-wildcard patterns.
    pub fn anchor(&self) -> Option<(usize, Vec<u8>)> {
        let mut best: Option<(usize, usize)> = None;
        let mut run_start = 0;

        for i in 0..=self.matchers.len() {
            let literal = i < self.matchers.len() && matches!(self.matchers[i], ByteMatcher::Literal(_));
            if literal {
                continue;
            }
            let run_len = i - run_start;
            if run_len > 0 && best.is_none_or(|(_, len)| run_len > len) {
                best = Some((run_start, run_len));
            }
            run_start = i + 1;
        }

        best.map(|(start, len)| {
            let bytes = self.matchers[start..start + len]
                .iter()
                .filter_map(|m| match m {
                    ByteMatcher::Literal(b) => Some(*b),
                    ByteMatcher::Any => None,
                })
                .collect();
            (start, bytes)
        })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, matcher) in self.matchers.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match matcher {
                ByteMatcher::Literal(b) => write!(f, "{:02X}", b)?,
                ByteMatcher::Any => write!(f, "??")?,
            }
        }
        Ok(())
    }
}

/// One file type's recognisable byte patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    type_id: String,
    header: Pattern,
    footer: Option<Pattern>,
    max_size: Option<u64>,
    extension: Option<String>,
}

impl SignatureRecord {
    pub fn new(type_id: impl Into<String>, header: Pattern) -> Self {
        Self {
            type_id: type_id.into(),
            header,
            footer: None,
            max_size: None,
            extension: None,
        }
    }

    pub fn with_footer(mut self, footer: Pattern) -> Self {
        self.footer = Some(footer);
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    #[inline]
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    #[inline]
    pub fn header(&self) -> &Pattern {
        &self.header
    }

    #[inline]
    pub fn footer(&self) -> Option<&Pattern> {
        self.footer.as_ref()
    }

    /// Heuristic upper bound on the size of a carved file of this type.
    #[inline]
    pub fn typical_max_size(&self) -> Option<u64> {
        self.max_size
    }

    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or(DEFAULT_EXTENSION)
    }

    /// Last offset at which the header can still fit in a stream of
    /// `stream_len` bytes, or `None` if the stream is too short.
    pub fn max_header_offset_in_stream(&self, stream_len: u64) -> Option<Offset> {
        stream_len.checked_sub(self.header.len() as u64)
    }

    /// Longest pattern carried by this record.
    pub fn max_pattern_len(&self) -> usize {
        self.header
            .len()
            .max(self.footer.as_ref().map_or(0, Pattern::len))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.header.is_empty() {
            return Err(ConfigError::EmptyPattern {
                type_id: self.type_id.clone(),
                part: "header",
            });
        }
        if self.footer.as_ref().is_some_and(Pattern::is_empty) {
            return Err(ConfigError::EmptyPattern {
                type_id: self.type_id.clone(),
                part: "footer",
            });
        }
        if self.max_size == Some(0) {
            return Err(ConfigError::ZeroMaxSize(self.type_id.clone()));
        }
        Ok(())
    }
}

/// Read-only signature table, iterated in registration order.
#[derive(Debug, Clone)]
pub struct SignatureDatabase {
    records: Vec<SignatureRecord>,
    max_pattern_len: usize,
}

impl SignatureDatabase {
    /// Validates and freezes `records`. Fails on an empty table, an empty
    /// pattern, a zero size cap or a repeated `type_id`.
    pub fn new(records: Vec<SignatureRecord>) -> Result<Self, ConfigError> {
        if records.is_empty() {
            return Err(ConfigError::EmptyDatabase);
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            record.validate()?;
            if !seen.insert(record.type_id.as_str()) {
                return Err(ConfigError::DuplicateTypeId(record.type_id.clone()));
            }
        }

        Ok(Self::assemble(records))
    }

    /// The built-in carving table used when no signature file is given.
    pub fn builtin() -> Self {
        Self::assemble(builtin_records())
    }

    fn assemble(records: Vec<SignatureRecord>) -> Self {
        let max_pattern_len = records
            .iter()
            .map(SignatureRecord::max_pattern_len)
            .max()
            .unwrap_or(0);
        Self {
            records,
            max_pattern_len,
        }
    }

    /// All records, in registration order.
    #[inline]
    pub fn lookup_candidates(&self) -> &[SignatureRecord] {
        &self.records
    }

    #[inline]
    pub fn get(&self, index: RecordIndex) -> Option<&SignatureRecord> {
        self.records.get(index)
    }

    pub fn index_of(&self, type_id: &str) -> Option<RecordIndex> {
        self.records.iter().position(|r| r.type_id == type_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }
}

impl Default for SignatureDatabase {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn builtin_records() -> Vec<SignatureRecord> {
    let lit = Pattern::literal;
    let masked = |bytes: &[Option<u8>]| {
        Pattern::from_matchers(
            bytes.iter()
                .map(|b| b.map_or(ByteMatcher::Any, ByteMatcher::Literal))
                .collect(),
        )
    };

    vec![
        // JPEG: SOI + first marker prefix, EOI
        SignatureRecord::new("JPEG", lit(&[0xFF, 0xD8, 0xFF]))
            .with_footer(lit(&[0xFF, 0xD9]))
            .with_max_size(50 * MB)
            .with_extension("jpg"),
        // PNG: signature, IEND type + CRC
        SignatureRecord::new("PNG", lit(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]))
            .with_footer(lit(&[0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82]))
            .with_max_size(100 * MB)
            .with_extension("png"),
        SignatureRecord::new("GIF89a", lit(b"GIF89a"))
            .with_footer(lit(&[0x00, 0x3B]))
            .with_max_size(50 * MB)
            .with_extension("gif"),
        SignatureRecord::new("GIF87a", lit(b"GIF87a"))
            .with_footer(lit(&[0x00, 0x3B]))
            .with_max_size(50 * MB)
            .with_extension("gif"),
        SignatureRecord::new("PDF", lit(b"%PDF-"))
            .with_footer(lit(b"%%EOF"))
            .with_max_size(200 * MB)
            .with_extension("pdf"),
        // ZIP: local file header, end of central directory
        SignatureRecord::new("ZIP", lit(&[0x50, 0x4B, 0x03, 0x04]))
            .with_footer(lit(&[0x50, 0x4B, 0x05, 0x06]))
            .with_max_size(500 * MB)
            .with_extension("zip"),
        SignatureRecord::new("RAR", lit(&[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07]))
            .with_max_size(500 * MB)
            .with_extension("rar"),
        SignatureRecord::new("7Z", lit(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]))
            .with_max_size(500 * MB)
            .with_extension("7z"),
        // OLE2 compound document (legacy Office)
        SignatureRecord::new("OLE2", lit(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]))
            .with_max_size(100 * MB)
            .with_extension("doc"),
        // RIFF size is unknown ahead of time
        SignatureRecord::new("WEBP", masked(&[
            Some(0x52), Some(0x49), Some(0x46), Some(0x46),
            None, None, None, None,
            Some(0x57), Some(0x45), Some(0x42), Some(0x50),
        ]))
            .with_max_size(100 * MB)
            .with_extension("webp"),
        // "BM", file size, two reserved zero words
        SignatureRecord::new("BMP", masked(&[
            Some(0x42), Some(0x4D),
            None, None, None, None,
            Some(0x00), Some(0x00), Some(0x00), Some(0x00),
        ]))
            .with_max_size(100 * MB)
            .with_extension("bmp"),
        SignatureRecord::new("ELF", lit(&[0x7F, 0x45, 0x4C, 0x46]))
            .with_max_size(100 * MB)
            .with_extension("elf"),
    ]
}
