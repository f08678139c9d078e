//! One carve session: a frozen signature database plus scan options,
//! driving scan, resolve and (optionally) extraction over a source.

use crate::config::ScanConfig;
use crate::error::{ConfigError, Result};
use crate::extraction::{self, ExtractionReport};
use crate::io::{BlockSource, DiskReader, Reader};
use crate::resolver::{ResolveStats, resolve_with_stats};
use crate::scanner::{ProgressFn, ScanOutput, Scanner};
use crate::signatures::SignatureDatabase;
use crate::types::CarvedRegion;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CarveOutcome {
    pub regions: Vec<CarvedRegion>,
    pub stream_len: u64,
    pub bytes_scanned: u64,
    pub headers: usize,
    pub footers: usize,
    pub ambiguous: usize,
    pub absorbed: usize,
    pub clipped: usize,
    /// The scan stopped early; `regions` covers `0..bytes_scanned` only.
    pub cancelled: bool,
}

impl CarveOutcome {
    fn new(scan: ScanOutput, regions: Vec<CarvedRegion>, stats: ResolveStats) -> Self {
        Self {
            headers: scan.header_count(),
            footers: scan.footer_count(),
            regions,
            stream_len: scan.stream_len,
            bytes_scanned: scan.bytes_scanned,
            ambiguous: stats.ambiguous,
            absorbed: stats.absorbed,
            clipped: stats.clipped,
            cancelled: scan.cancelled,
        }
    }

    /// The region starting at offset 0, i.e. the type of the source itself.
    pub fn identified(&self) -> Option<&CarvedRegion> {
        self.regions.first().filter(|r| r.start_offset == 0)
    }

    pub fn exact_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_exact()).count()
    }
}

#[derive(Debug, Clone)]
pub struct CarveSession {
    db: SignatureDatabase,
    config: ScanConfig,
}

impl CarveSession {
    /// Fails if `config` cannot be used with `db`.
    pub fn new(db: SignatureDatabase, config: ScanConfig) -> std::result::Result<Self, ConfigError> {
        config.validate(db.max_pattern_len())?;
        Ok(Self { db, config })
    }

    #[inline]
    pub fn database(&self) -> &SignatureDatabase {
        &self.db
    }

    #[inline]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn scanner(&self) -> Result<Scanner<'_>> {
        Ok(Scanner::new(&self.db, self.config.clone())?)
    }

    /// Scans `source` sequentially and resolves the events into regions.
    pub fn carve<S: BlockSource>(&self, source: &mut S) -> Result<CarveOutcome> {
        self.carve_with_progress(source, &|_| {})
    }

    pub fn carve_with_progress<S: BlockSource>(
        &self,
        source: &mut S,
        progress: ProgressFn<'_>,
    ) -> Result<CarveOutcome> {
        let start = Instant::now();
        let scan = self.scanner()?.scan_with_progress(source, progress)?;
        Ok(self.finish(scan, start))
    }

    /// Carves a file, sharding the scan over `config.threads` when it asks
    /// for more than one.
    pub fn carve_path(&self, path: &Path, progress: ProgressFn<'_>) -> Result<CarveOutcome> {
        let start = Instant::now();
        let scan = self
            .scanner()?
            .scan_parallel(|| Reader::open(path), progress)?;
        Ok(self.finish(scan, start))
    }

    fn finish(&self, scan: ScanOutput, start: Instant) -> CarveOutcome {
        // A cancelled scan resolves over the prefix it actually covered.
        let limit = if scan.cancelled { scan.bytes_scanned } else { scan.stream_len };
        let resolution = resolve_with_stats(&scan.events, &self.db, limit);
        let outcome = CarveOutcome::new(scan, resolution.regions, resolution.stats);

        info!(
            regions = outcome.regions.len(),
            exact = outcome.exact_count(),
            headers = outcome.headers,
            footers = outcome.footers,
            scanned = outcome.bytes_scanned,
            cancelled = outcome.cancelled,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "carve finished"
        );
        outcome
    }

    /// Extracts `regions` of the file at `path` into `output_dir` and writes
    /// the manifest next to them.
    ///
    /// The file is reopened with buffered reads, so one truncated since the
    /// scan fails region by region instead of faulting a mapping.
    pub fn extract(&self, regions: &[CarvedRegion], path: &Path, output_dir: &Path) -> Result<ExtractionReport> {
        let report = extraction::extract_all(regions, &self.db, || DiskReader::new(path), output_dir)?;
        extraction::write_manifest(&report, path, output_dir)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CancelToken;
    use crate::error::CoreError;
    use crate::io::MemoryReader;
    use crate::signatures::{Pattern, SignatureRecord};
    use crate::types::Confidence;

    fn zip_db() -> SignatureDatabase {
        SignatureDatabase::new(vec![
            SignatureRecord::new("ZIP", Pattern::literal(b"PK\x03\x04"))
                .with_footer(Pattern::literal(b"PK\x05\x06"))
                .with_extension("zip"),
        ])
        .unwrap()
    }

    fn zip_stream() -> Vec<u8> {
        let mut data = vec![0u8; 200];
        data[0..4].copy_from_slice(b"PK\x03\x04");
        data[96..100].copy_from_slice(b"PK\x05\x06");
        data
    }

    #[test]
    fn carve_identifies_source_type() {
        let session = CarveSession::new(zip_db(), ScanConfig::default()).unwrap();
        let outcome = session.carve(&mut MemoryReader::new(zip_stream())).unwrap();

        assert_eq!(outcome.regions.len(), 1);
        let id = outcome.identified().unwrap();
        assert_eq!(id.type_id, "ZIP");
        assert_eq!(id.range(), 0..100);
        assert_eq!(id.confidence, Confidence::Exact);
        assert_eq!((outcome.headers, outcome.footers), (1, 1));
        assert_eq!(outcome.exact_count(), 1);
    }

    #[test]
    fn no_match_is_not_an_error() {
        let session = CarveSession::new(zip_db(), ScanConfig::default()).unwrap();
        let outcome = session.carve(&mut MemoryReader::new(vec![0u8; 64])).unwrap();
        assert!(outcome.regions.is_empty());
        assert!(outcome.identified().is_none());
        assert_eq!(outcome.bytes_scanned, 64);
    }

    #[test]
    fn cancelled_before_start_yields_empty_prefix() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let session = CarveSession::new(zip_db(), ScanConfig::new().with_cancel(cancel)).unwrap();

        let outcome = session.carve(&mut MemoryReader::new(zip_stream())).unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.regions.is_empty());
        assert_eq!(outcome.bytes_scanned, 0);
    }

    #[test]
    fn cancel_mid_scan_resolves_over_scanned_prefix() {
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(b"PK\x03\x04");
        data[200..204].copy_from_slice(b"PK\x03\x04");
        data[3000..3004].copy_from_slice(b"PK\x05\x06");

        let cancel = CancelToken::new();
        let config = ScanConfig::new().with_window_size(64).with_cancel(cancel.clone());
        let session = CarveSession::new(zip_db(), config).unwrap();
        let outcome = session
            .carve_with_progress(&mut MemoryReader::new(&data), &|_| cancel.cancel())
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.bytes_scanned, 61);
        assert_eq!(
            outcome.regions,
            vec![CarvedRegion::new("ZIP", 0, 0..61, Confidence::Estimated)]
        );
        assert!(outcome.regions.iter().all(|r| r.end_offset <= outcome.bytes_scanned));
    }

    #[test]
    fn unreadable_tail_is_an_error() {
        struct Shrunk(Vec<u8>);

        impl BlockSource for Shrunk {
            fn read_chunk(&mut self, offset: u64, buffer: &mut [u8]) -> Result<usize> {
                MemoryReader::new(self.0.as_slice()).read_chunk(offset, buffer)
            }

            fn size(&self) -> u64 {
                100
            }
        }

        let session = CarveSession::new(zip_db(), ScanConfig::default()).unwrap();
        let err = session.carve(&mut Shrunk(zip_stream()[..50].to_vec())).unwrap_err();
        assert!(matches!(err, CoreError::Truncated { offset: 0, expected: 100, actual: 50 }));
    }

    #[test]
    fn rejects_window_smaller_than_pattern() {
        let err = CarveSession::new(zip_db(), ScanConfig::new().with_window_size(2)).unwrap_err();
        assert_eq!(err, ConfigError::InvalidWindow { window: 2, min: 4 });
    }

    #[test]
    fn carve_path_and_extract() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("image.bin");
        std::fs::write(&input, zip_stream()).unwrap();

        let session = CarveSession::new(zip_db(), ScanConfig::new().with_threads(2)).unwrap();
        let outcome = session.carve_path(&input, &|_| {}).unwrap();
        assert_eq!(outcome.regions.len(), 1);

        let out_dir = dir.path().join("carved");
        let report = session.extract(&outcome.regions, &input, &out_dir).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failures(), 0);

        let written = std::fs::read(out_dir.join("ZIP_000000_0000000000000000.zip")).unwrap();
        assert_eq!(written, &zip_stream()[..100]);
        assert!(out_dir.join(extraction::MANIFEST_NAME).exists());
    }
}
