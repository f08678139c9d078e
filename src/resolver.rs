//! Turns the ordered match-event sequence into carved regions.
//!
//! Headers are processed in offset order. At one offset only the most
//! specific header survives (longest pattern, then database order). Each
//! surviving header is closed against the nearest later footer of its own
//! type, or estimated from the size cap and the end of the stream.
//!
//! A header that starts inside an earlier region of another type is an
//! embedded file: it gets its own region, bounded by its container. A
//! header inside an earlier region of the same type is absorbed when that
//! region is EXACT and ends it when that region is ESTIMATED.

use crate::signatures::SignatureDatabase;
use crate::types::{CarvedRegion, Confidence, MatchEvent, Offset, RecordIndex};
use std::cmp::Reverse;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Headers dropped because a more specific one matched at the same offset.
    pub ambiguous: usize,
    /// Same-type headers swallowed by an EXACT region.
    pub absorbed: usize,
    /// ESTIMATED regions cut short by a later same-type header.
    pub clipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub regions: Vec<CarvedRegion>,
    pub stats: ResolveStats,
}

/// Resolves `events` (as produced by the scanner) for a stream of
/// `stream_len` bytes.
pub fn resolve(events: &[MatchEvent], db: &SignatureDatabase, stream_len: u64) -> Vec<CarvedRegion> {
    resolve_with_stats(events, db, stream_len).regions
}

pub fn resolve_with_stats(events: &[MatchEvent], db: &SignatureDatabase, stream_len: u64) -> Resolution {
    let footers = footer_index(events, db);

    let mut headers: Vec<MatchEvent> = events
        .iter()
        .filter(|e| e.is_header() && e.offset < stream_len && db.get(e.record).is_some())
        .copied()
        .collect();
    headers.sort_unstable();
    headers.dedup();

    let mut resolution = Resolution::default();
    // Indices into `regions` of still-open containers, innermost last.
    let mut open: Vec<usize> = Vec::new();

    for group in headers.chunk_by(|a, b| a.offset == b.offset) {
        let Some(winner) = most_specific(group, db) else {
            continue;
        };
        resolution.stats.ambiguous += group.len() - 1;

        let start = winner.offset;
        let regions = &mut resolution.regions;

        while open.last().is_some_and(|&top| regions[top].end_offset <= start) {
            open.pop();
        }

        let mut limit = stream_len;
        let mut absorbed = false;
        while let Some(&top) = open.last() {
            let container = &mut regions[top];
            if container.record != winner.record {
                limit = container.end_offset;
                break;
            }
            if container.is_exact() {
                absorbed = true;
                break;
            }
            debug!(
                type_id = %container.type_id,
                from = container.end_offset,
                to = start,
                "clipping estimated region at next header"
            );
            container.end_offset = start;
            resolution.stats.clipped += 1;
            open.pop();
        }

        if absorbed {
            resolution.stats.absorbed += 1;
            continue;
        }

        let region = close_region(start, winner.record, limit, db, &footers);
        debug!(%region, "resolved region");
        regions.push(region);
        open.push(regions.len() - 1);
    }

    resolution
}

/// Footer offsets per record, ascending.
fn footer_index(events: &[MatchEvent], db: &SignatureDatabase) -> Vec<Vec<Offset>> {
    let mut footers = vec![Vec::new(); db.len()];
    for event in events.iter().filter(|e| !e.is_header()) {
        if let Some(list) = footers.get_mut(event.record) {
            list.push(event.offset);
        }
    }
    for list in &mut footers {
        list.sort_unstable();
        list.dedup();
    }
    footers
}

/// Longest header pattern wins; on equal length the earliest record.
fn most_specific(group: &[MatchEvent], db: &SignatureDatabase) -> Option<MatchEvent> {
    group.iter().copied().max_by_key(|e| {
        let len = db.get(e.record).map_or(0, |r| r.header().len());
        (len, Reverse(e.record))
    })
}

fn close_region(
    start: Offset,
    record: RecordIndex,
    limit: Offset,
    db: &SignatureDatabase,
    footers: &[Vec<Offset>],
) -> CarvedRegion {
    let sig = &db.lookup_candidates()[record];
    let cap_end = sig.typical_max_size().map(|cap| start.saturating_add(cap));

    if let Some(footer) = sig.footer() {
        let list = &footers[record];
        let next = list.partition_point(|&f| f <= start);
        if let Some(&f) = list.get(next) {
            let end = f + footer.len() as u64;
            if end <= limit && cap_end.is_none_or(|cap| end <= cap) {
                return CarvedRegion::new(sig.type_id(), record, start..end, Confidence::Exact);
            }
        }
    }

    let end = cap_end.map_or(limit, |cap| cap.min(limit));
    CarvedRegion::new(sig.type_id(), record, start..end, Confidence::Estimated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{Pattern, SignatureRecord};

    fn db() -> SignatureDatabase {
        SignatureDatabase::new(vec![
            SignatureRecord::new("ZIP", Pattern::literal(&[0x50, 0x4B, 0x03, 0x04]))
                .with_footer(Pattern::literal(&[0x50, 0x4B, 0x05, 0x06])),
            SignatureRecord::new("JPEG", Pattern::literal(&[0xFF, 0xD8, 0xFF]))
                .with_footer(Pattern::literal(&[0xFF, 0xD9]))
                .with_max_size(1000),
            SignatureRecord::new("BMP", Pattern::literal(&[0x42, 0x4D])).with_max_size(500),
            SignatureRecord::new("JFIF", Pattern::literal(&[0xFF, 0xD8, 0xFF, 0xE0])),
        ])
        .unwrap()
    }

    const ZIP: usize = 0;
    const JPEG: usize = 1;
    const BMP: usize = 2;
    const JFIF: usize = 3;

    #[test]
    fn footer_pairs_into_exact_region() {
        let events = [MatchEvent::header(0, ZIP), MatchEvent::footer(96, ZIP)];
        let regions = resolve(&events, &db(), 200);
        assert_eq!(regions, vec![CarvedRegion::new("ZIP", ZIP, 0..100, Confidence::Exact)]);
    }

    #[test]
    fn missing_footer_estimates_to_cap_or_stream_end() {
        let events = [MatchEvent::header(10, JPEG)];
        let regions = resolve(&events, &db(), 5000);
        assert_eq!(
            regions,
            vec![CarvedRegion::new("JPEG", JPEG, 10..1010, Confidence::Estimated)]
        );

        let regions = resolve(&events, &db(), 300);
        assert_eq!(regions[0].range(), 10..300);

        let zip = [MatchEvent::header(5, ZIP)];
        let regions = resolve(&zip, &db(), 80);
        assert_eq!(
            regions,
            vec![CarvedRegion::new("ZIP", ZIP, 5..80, Confidence::Estimated)]
        );
    }

    #[test]
    fn footer_beyond_cap_is_ignored() {
        let events = [MatchEvent::header(0, JPEG), MatchEvent::footer(999, JPEG)];
        let regions = resolve(&events, &db(), 5000);
        assert_eq!(regions[0].range(), 0..1000);
        assert_eq!(regions[0].confidence, Confidence::Estimated);

        let events = [MatchEvent::header(0, JPEG), MatchEvent::footer(998, JPEG)];
        let regions = resolve(&events, &db(), 5000);
        assert_eq!(regions[0].range(), 0..1000);
        assert_eq!(regions[0].confidence, Confidence::Exact);
    }

    #[test]
    fn footers_before_header_are_not_paired() {
        let events = [
            MatchEvent::footer(2, ZIP),
            MatchEvent::header(10, ZIP),
            MatchEvent::footer(10, ZIP),
            MatchEvent::footer(40, ZIP),
        ];
        let regions = resolve(&events, &db(), 100);
        assert_eq!(regions[0].range(), 10..44);
    }

    #[test]
    fn longest_header_wins_at_same_offset() {
        let events = [MatchEvent::header(0, JPEG), MatchEvent::header(0, JFIF)];
        let res = resolve_with_stats(&events, &db(), 100);
        assert_eq!(res.regions.len(), 1);
        assert_eq!(res.regions[0].type_id, "JFIF");
        assert_eq!(res.stats.ambiguous, 1);
    }

    #[test]
    fn equal_length_tie_goes_to_first_registered() {
        let db = SignatureDatabase::new(vec![
            SignatureRecord::new("first", Pattern::literal(&[1, 2])),
            SignatureRecord::new("second", Pattern::parse("01 ??").unwrap()),
        ])
        .unwrap();
        let events = [MatchEvent::header(3, 1), MatchEvent::header(3, 0)];
        let regions = resolve(&events, &db, 10);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].type_id, "first");
    }

    #[test]
    fn embedded_file_of_other_type_is_kept_inside_container() {
        let events = [
            MatchEvent::header(0, ZIP),
            MatchEvent::header(20, JPEG),
            MatchEvent::footer(50, JPEG),
            MatchEvent::footer(96, ZIP),
        ];
        let regions = resolve(&events, &db(), 200);
        assert_eq!(
            regions,
            vec![
                CarvedRegion::new("ZIP", ZIP, 0..100, Confidence::Exact),
                CarvedRegion::new("JPEG", JPEG, 20..52, Confidence::Exact),
            ]
        );
    }

    #[test]
    fn embedded_estimate_is_bounded_by_container() {
        let events = [
            MatchEvent::header(0, ZIP),
            MatchEvent::header(20, BMP),
            MatchEvent::footer(96, ZIP),
        ];
        let regions = resolve(&events, &db(), 1000);
        assert_eq!(regions[1], CarvedRegion::new("BMP", BMP, 20..100, Confidence::Estimated));
    }

    #[test]
    fn embedded_footer_past_container_end_is_not_paired() {
        let events = [
            MatchEvent::header(0, ZIP),
            MatchEvent::header(20, JPEG),
            MatchEvent::footer(96, ZIP),
            MatchEvent::footer(150, JPEG),
        ];
        let regions = resolve(&events, &db(), 1000);
        assert_eq!(regions[1], CarvedRegion::new("JPEG", JPEG, 20..100, Confidence::Estimated));
    }

    #[test]
    fn same_type_header_inside_exact_region_is_absorbed() {
        let events = [
            MatchEvent::header(0, JPEG),
            MatchEvent::header(100, JPEG),
            MatchEvent::footer(200, JPEG),
        ];
        let res = resolve_with_stats(&events, &db(), 1000);
        assert_eq!(
            res.regions,
            vec![CarvedRegion::new("JPEG", JPEG, 0..202, Confidence::Exact)]
        );
        assert_eq!(res.stats.absorbed, 1);
    }

    #[test]
    fn same_type_header_ends_estimated_region() {
        let events = [MatchEvent::header(0, BMP), MatchEvent::header(300, BMP)];
        let res = resolve_with_stats(&events, &db(), 1000);
        assert_eq!(
            res.regions,
            vec![
                CarvedRegion::new("BMP", BMP, 0..300, Confidence::Estimated),
                CarvedRegion::new("BMP", BMP, 300..800, Confidence::Estimated),
            ]
        );
        assert_eq!(res.stats.clipped, 1);
    }

    #[test]
    fn headers_after_a_region_start_fresh() {
        let events = [
            MatchEvent::header(0, ZIP),
            MatchEvent::footer(10, ZIP),
            MatchEvent::header(50, ZIP),
        ];
        let regions = resolve(&events, &db(), 80);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].range(), 0..14);
        assert_eq!(regions[1].range(), 50..80);
        assert_eq!(regions[1].confidence, Confidence::Estimated);
    }

    #[test]
    fn duplicate_events_collapse() {
        let events = [
            MatchEvent::header(4, BMP),
            MatchEvent::header(4, BMP),
            MatchEvent::header(4, BMP),
        ];
        let regions = resolve(&events, &db(), 100);
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn no_events_no_regions() {
        assert!(resolve(&[], &db(), 100).is_empty());
    }
}
