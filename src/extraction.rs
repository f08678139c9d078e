//! Materialises carved regions.
//!
//! Carving is positional: bytes are copied verbatim, never interpreted.
//! A failed extraction leaves nothing behind, neither in a caller-supplied
//! sink nor on disk.

use crate::error::{CoreError, Result};
use crate::io::BlockSource;
use crate::signatures::{DEFAULT_EXTENSION, SignatureDatabase};
use crate::types::CarvedRegion;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EXTRACTION_BUFFER_SIZE: usize = 64 * 1024;
/// Largest region [`extract`] will stage in memory.
pub const MAX_BUFFERED_EXTRACTION: u64 = 256 * 1024 * 1024;
const PARTIAL_SUFFIX: &str = ".part";
pub const MANIFEST_NAME: &str = "manifest.json";

/// Copies `region` from `source` into `sink` and returns the number of
/// bytes written.
///
/// The whole range is read before the first byte reaches the sink, so a
/// short source leaves the sink untouched. That costs one buffer of the
/// region's size; regions above [`MAX_BUFFERED_EXTRACTION`] are refused and
/// belong to [`extract_to_path`], which streams.
pub fn extract<S, W>(region: &CarvedRegion, source: &mut S, sink: &mut W) -> Result<u64>
where
    S: BlockSource + ?Sized,
    W: Write + ?Sized,
{
    check_bounds(region, source.size())?;
    if region.len() > MAX_BUFFERED_EXTRACTION {
        return Err(CoreError::RegionTooLarge {
            len: region.len(),
            max: MAX_BUFFERED_EXTRACTION,
        });
    }

    let mut data = vec![0u8; region.len() as usize];
    source.read_exact_at(region.start_offset, &mut data)?;

    sink.write_all(&data)?;
    sink.flush()?;
    Ok(region.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFile {
    pub file_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(flatten)]
    pub region: CarvedRegion,
    pub bytes_written: u64,
    pub sha256: String,
}

/// Streams `region` into `path`. The bytes go to a sibling `.part` file
/// first, which is renamed into place only once the full range was copied.
pub fn extract_to_path<S>(region: &CarvedRegion, source: &mut S, path: &Path) -> Result<ExtractedFile>
where
    S: BlockSource + ?Sized,
{
    check_bounds(region, source.size())?;

    let partial = partial_path(path);
    let outcome = copy_range(region, source, &partial);

    match outcome {
        Ok(sha256) => {
            fs::rename(&partial, path)?;
            Ok(ExtractedFile {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: path.to_path_buf(),
                region: region.clone(),
                bytes_written: region.len(),
                sha256,
            })
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn copy_range<S>(region: &CarvedRegion, source: &mut S, target: &Path) -> Result<String>
where
    S: BlockSource + ?Sized,
{
    let mut out = BufWriter::new(File::create(target)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; EXTRACTION_BUFFER_SIZE];
    let mut offset = region.start_offset;

    while offset < region.end_offset {
        let want = (region.end_offset - offset).min(EXTRACTION_BUFFER_SIZE as u64) as usize;
        source.read_exact_at(offset, &mut buffer[..want])?;
        hasher.update(&buffer[..want]);
        out.write_all(&buffer[..want])?;
        offset += want as u64;
    }

    let file = out.into_inner().map_err(|e| CoreError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(hex::encode(hasher.finalize()))
}

fn check_bounds(region: &CarvedRegion, size: u64) -> Result<()> {
    if region.end_offset > size {
        return Err(CoreError::OutOfBounds {
            offset: region.end_offset,
            max: size,
        });
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// `{type}_{ordinal}_{start offset}.{ext}`, with the type id reduced to
/// characters safe in a file name.
pub fn generate_filename(index: usize, region: &CarvedRegion, extension: &str) -> String {
    let type_id: String = region
        .type_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{:06}_{:016X}.{}", type_id, index, region.start_offset, extension)
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedExtraction {
    #[serde(flatten)]
    pub region: CarvedRegion,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub extracted: Vec<ExtractedFile>,
    pub failed: Vec<FailedExtraction>,
}

impl ExtractionReport {
    pub fn succeeded(&self) -> usize {
        self.extracted.len()
    }

    pub fn failures(&self) -> usize {
        self.failed.len()
    }

    pub fn bytes_written(&self) -> u64 {
        self.extracted.iter().map(|f| f.bytes_written).sum()
    }
}

/// Extracts every region into `output_dir`, concurrently. Each rayon worker
/// opens its own source through `open`. A failing region is recorded in the
/// report and does not stop the others.
pub fn extract_all<S, F>(
    regions: &[CarvedRegion],
    db: &SignatureDatabase,
    open: F,
    output_dir: &Path,
) -> Result<ExtractionReport>
where
    S: BlockSource,
    F: Fn() -> Result<S> + Sync,
{
    fs::create_dir_all(output_dir)?;

    let outcomes: Vec<std::result::Result<ExtractedFile, String>> = regions
        .par_iter()
        .enumerate()
        .map_init(
            || open().map_err(|e| e.to_string()),
            |source, (index, region)| {
                let source = source.as_mut().map_err(|e| format!("cannot open source: {e}"))?;
                let extension = db
                    .get(region.record)
                    .map_or(DEFAULT_EXTENSION, |r| r.extension());
                let path = output_dir.join(generate_filename(index, region, extension));
                extract_to_path(region, source, &path).map_err(|e| e.to_string())
            },
        )
        .collect();

    let mut report = ExtractionReport::default();
    for (region, outcome) in regions.iter().zip(outcomes) {
        match outcome {
            Ok(file) => {
                debug!(file = %file.file_name, bytes = file.bytes_written, "extracted");
                report.extracted.push(file);
            }
            Err(reason) => {
                warn!(%region, %reason, "extraction failed");
                report.failed.push(FailedExtraction {
                    region: region.clone(),
                    reason,
                });
            }
        }
    }

    info!(
        succeeded = report.succeeded(),
        failed = report.failures(),
        bytes = report.bytes_written(),
        "extraction finished"
    );
    Ok(report)
}

#[derive(Serialize)]
struct Manifest<'a> {
    source: &'a str,
    extracted: &'a [ExtractedFile],
    failed: &'a [FailedExtraction],
}

/// Writes the chain-of-custody manifest (`manifest.json`) for a batch.
pub fn write_manifest(report: &ExtractionReport, source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let source = source.display().to_string();
    let manifest = Manifest {
        source: &source,
        extracted: &report.extracted,
        failed: &report.failed,
    };
    let path = output_dir.join(MANIFEST_NAME);
    let json = serde_json::to_vec_pretty(&manifest).map_err(std::io::Error::other)?;
    fs::write(&path, json)?;
    Ok(path)
}
