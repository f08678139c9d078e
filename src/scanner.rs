//! Windowed signature scanner.
//!
//! Produces the same event sequence as testing every record at every
//! offset, ordered by offset, then database order, then header before
//! footer. Reads go through bounded windows that overlap by
//! `max_pattern_len - 1` bytes, so no pattern straddling a window or shard
//! boundary is lost and no offset is tested twice.

use crate::config::ScanConfig;
use crate::error::{ConfigError, CoreError, Result};
use crate::io::BlockSource;
use crate::matching::{match_footer, match_header};
use crate::signatures::SignatureDatabase;
use crate::types::{MatchEvent, MatchKind, Offset, RecordIndex};
use aho_corasick::AhoCorasick;
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Receives the number of newly scanned bytes after each window.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Sync);

#[derive(Debug, Clone, Copy)]
struct Probe {
    record: RecordIndex,
    kind: MatchKind,
    /// Position of the anchor inside the full pattern.
    anchor_at: usize,
}

/// Multi-pattern prefilter over the literal anchors of every pattern.
/// Candidates it yields are always re-verified against the full pattern.
#[derive(Debug)]
struct Prefilter {
    automaton: Option<AhoCorasick>,
    probes: Vec<Vec<Probe>>,
    unanchored: Vec<Probe>,
}

impl Prefilter {
    fn build(db: &SignatureDatabase) -> std::result::Result<Self, ConfigError> {
        let mut anchors: Vec<Vec<u8>> = Vec::new();
        let mut probes: Vec<Vec<Probe>> = Vec::new();
        let mut by_anchor: HashMap<Vec<u8>, usize> = HashMap::new();
        let mut unanchored = Vec::new();

        for (record, sig) in db.lookup_candidates().iter().enumerate() {
            let patterns = [(MatchKind::Header, Some(sig.header())), (MatchKind::Footer, sig.footer())];

            for (kind, pattern) in patterns {
                let Some(pattern) = pattern else { continue };
                match pattern.anchor() {
                    Some((anchor_at, bytes)) => {
                        let probe = Probe {
                            record,
                            kind,
                            anchor_at,
                        };
                        let slot = *by_anchor.entry(bytes.clone()).or_insert_with(|| {
                            anchors.push(bytes);
                            probes.push(Vec::new());
                            anchors.len() - 1
                        });
                        probes[slot].push(probe);
                    }
                    None => unanchored.push(Probe {
                        record,
                        kind,
                        anchor_at: 0,
                    }),
                }
            }
        }

        let automaton = if anchors.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&anchors).map_err(|e| ConfigError::Matcher(e.to_string()))?)
        };

        Ok(Self {
            automaton,
            probes,
            unanchored,
        })
    }
}

/// Events found in (a prefix of) a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutput {
    pub events: Vec<MatchEvent>,
    /// Size of the source when the scan started.
    pub stream_len: u64,
    /// Offsets `0..bytes_scanned` were fully tested.
    pub bytes_scanned: u64,
    pub cancelled: bool,
}

impl ScanOutput {
    pub fn header_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_header()).count()
    }

    pub fn footer_count(&self) -> usize {
        self.events.len() - self.header_count()
    }
}

#[derive(Debug)]
struct RangeOutput {
    events: Vec<MatchEvent>,
    scanned_to: Offset,
    cancelled: bool,
}

pub struct Scanner<'db> {
    db: &'db SignatureDatabase,
    prefilter: Prefilter,
    window: usize,
    overlap: usize,
    config: ScanConfig,
}

impl<'db> Scanner<'db> {
    pub fn new(db: &'db SignatureDatabase, config: ScanConfig) -> std::result::Result<Self, ConfigError> {
        let max_len = db.max_pattern_len();
        config.validate(max_len)?;

        Ok(Self {
            db,
            prefilter: Prefilter::build(db)?,
            window: config.effective_window(max_len),
            overlap: max_len.saturating_sub(1),
            config,
        })
    }

    /// Scans the whole source sequentially.
    pub fn scan<S: BlockSource>(&self, source: &mut S) -> Result<ScanOutput> {
        self.scan_with_progress(source, &|_| {})
    }

    pub fn scan_with_progress<S: BlockSource>(
        &self,
        source: &mut S,
        progress: ProgressFn<'_>,
    ) -> Result<ScanOutput> {
        let stream_len = source.size();
        let out = self.scan_range(source, 0..stream_len, progress)?;

        Ok(ScanOutput {
            events: out.events,
            stream_len,
            bytes_scanned: out.scanned_to,
            cancelled: out.cancelled,
        })
    }

    /// Splits the source into `config.shard_count()` disjoint offset ranges
    /// and scans them on the rayon pool, each shard through its own source
    /// handle from `open`. Shard results are concatenated in offset order.
    ///
    /// On cancellation only the leading run of shards up to and including
    /// the first interrupted one is kept, so the result stays a prefix.
    pub fn scan_parallel<S, F>(&self, open: F, progress: ProgressFn<'_>) -> Result<ScanOutput>
    where
        S: BlockSource,
        F: Fn() -> Result<S> + Sync,
    {
        let shards = self.config.shard_count();
        let mut first = open()?;
        let stream_len = first.size();

        if shards <= 1 || stream_len <= self.window as u64 {
            return self.scan_with_progress(&mut first, progress);
        }
        drop(first);

        let ranges = shard_ranges(stream_len, shards);
        debug!(shards = ranges.len(), stream_len, "scanning in parallel");

        let done = AtomicU64::new(0);
        let report = |delta: u64| {
            done.fetch_add(delta, Ordering::Relaxed);
            progress(delta);
        };

        let outputs: Vec<RangeOutput> = ranges
            .into_par_iter()
            .map(|range| {
                let mut source = open()?;
                self.scan_range(&mut source, range, &report)
            })
            .collect::<Result<_>>()?;

        let mut merged = ScanOutput {
            stream_len,
            ..Default::default()
        };
        for out in outputs {
            merged.events.extend(out.events);
            merged.bytes_scanned = out.scanned_to;
            if out.cancelled {
                merged.cancelled = true;
                break;
            }
        }

        debug!(
            scanned = done.load(Ordering::Relaxed),
            events = merged.events.len(),
            "parallel scan merged"
        );
        Ok(merged)
    }

    /// Tests every start offset in `range`, reading past `range.end` by the
    /// pattern overlap when the source allows.
    fn scan_range<S: BlockSource>(
        &self,
        source: &mut S,
        range: Range<Offset>,
        progress: ProgressFn<'_>,
    ) -> Result<RangeOutput> {
        let size = source.size();
        let end = range.end.min(size);
        let mut buffer = vec![0u8; self.window];
        let mut offset = range.start;
        let mut events = Vec::new();

        while offset < end {
            if self.config.cancel.is_cancelled() {
                debug!(offset, "scan cancelled");
                return Ok(RangeOutput {
                    events,
                    scanned_to: offset,
                    cancelled: true,
                });
            }

            let want = (end - offset)
                .saturating_add(self.overlap as u64)
                .min(size - offset)
                .min(self.window as u64) as usize;

            let n = source.read_chunk(offset, &mut buffer[..want])?;
            if n < want {
                // The source promised `size` bytes; a short read before that is a failure.
                return Err(CoreError::Truncated {
                    offset,
                    expected: want as u64,
                    actual: n as u64,
                });
            }

            let at_end = offset + n as u64 >= size;
            let testable = if at_end { n } else { n - self.overlap };
            let testable = testable.min((end - offset) as usize);

            self.scan_window(&buffer[..n], offset, testable, &mut events);
            trace!(offset, bytes = n, events = events.len(), "window scanned");

            offset += testable as u64;
            progress(testable as u64);

            if at_end {
                break;
            }
        }

        Ok(RangeOutput {
            events,
            scanned_to: offset.max(range.start).min(end),
            cancelled: false,
        })
    }

    /// Appends events for start positions `0..testable` of `window`, in
    /// scan order.
    fn scan_window(&self, window: &[u8], base: Offset, testable: usize, out: &mut Vec<MatchEvent>) {
        let records = self.db.lookup_candidates();
        let mut hits = Vec::new();

        let mut probe_at = |start: usize, probe: &Probe| {
            let record = &records[probe.record];
            let tail = &window[start..];
            let matched = match probe.kind {
                MatchKind::Header => match_header(tail, record),
                MatchKind::Footer => match_footer(tail, record),
            };
            if matched {
                hits.push(MatchEvent {
                    offset: base + start as u64,
                    record: probe.record,
                    kind: probe.kind,
                });
            }
        };

        if let Some(automaton) = &self.prefilter.automaton {
            for mat in automaton.find_overlapping_iter(window) {
                for probe in &self.prefilter.probes[mat.pattern().as_usize()] {
                    let Some(start) = mat.start().checked_sub(probe.anchor_at) else {
                        continue;
                    };
                    if start < testable {
                        probe_at(start, probe);
                    }
                }
            }
        }

        for start in 0..testable {
            for probe in &self.prefilter.unanchored {
                probe_at(start, probe);
            }
        }

        hits.sort_unstable();
        out.extend(hits);
    }
}

/// Splits `0..len` into at most `shards` contiguous, non-empty ranges.
pub fn shard_ranges(len: u64, shards: usize) -> Vec<Range<Offset>> {
    let shards = shards.max(1) as u64;
    let step = len.div_ceil(shards).max(1);

    (0..shards)
        .map(|i| (i * step).min(len)..((i + 1) * step).min(len))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Brute-force scan of an in-memory buffer: every record at every offset.
/// The windowed scanner must produce exactly this sequence.
pub fn reference_scan(db: &SignatureDatabase, data: &[u8]) -> Vec<MatchEvent> {
    let mut events = Vec::new();
    for offset in 0..data.len() {
        let tail = &data[offset..];
        for (record, sig) in db.lookup_candidates().iter().enumerate() {
            let header_fits = sig
                .max_header_offset_in_stream(data.len() as u64)
                .is_some_and(|last| offset as u64 <= last);
            if header_fits && match_header(tail, sig) {
                events.push(MatchEvent::header(offset as u64, record));
            }
            if match_footer(tail, sig) {
                events.push(MatchEvent::footer(offset as u64, record));
            }
        }
    }
    events
}
