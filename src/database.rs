//! Signature files.
//!
//! Two JSON layouts are accepted. The full one is a list of records:
//!
//! ```json
//! [{"type_id": "JPEG", "header": "FF D8 FF", "footer": "FF D9",
//!   "max_size": 20971520, "extension": "jpg"}]
//! ```
//!
//! The compact one maps a type to header signatures, each becoming its own
//! header-only record (`type`, `type#2`, ...):
//!
//! ```json
//! {"application/pdf": ["25504446"], "image/gif": ["474946383761", "474946383961"]}
//! ```
//!
//! Compact entries are registered in key order.

use crate::error::{ConfigError, Result};
use crate::signatures::{Pattern, SignatureDatabase, SignatureRecord};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignatureFile {
    Records(Vec<RecordEntry>),
    Compact(BTreeMap<String, Vec<String>>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordEntry {
    type_id: String,
    header: String,
    #[serde(default)]
    footer: Option<String>,
    #[serde(default)]
    max_size: Option<u64>,
    #[serde(default)]
    extension: Option<String>,
}

impl RecordEntry {
    fn compile(self) -> std::result::Result<SignatureRecord, ConfigError> {
        let header = compile_pattern(&self.type_id, &self.header)?;
        let mut record = SignatureRecord::new(self.type_id.clone(), header);
        if let Some(footer) = &self.footer {
            record = record.with_footer(compile_pattern(&self.type_id, footer)?);
        }
        if let Some(max_size) = self.max_size {
            record = record.with_max_size(max_size);
        }
        if let Some(extension) = self.extension {
            record = record.with_extension(extension);
        }
        Ok(record)
    }
}

fn compile_pattern(type_id: &str, text: &str) -> std::result::Result<Pattern, ConfigError> {
    Pattern::parse(text).map_err(|token| ConfigError::InvalidPattern {
        type_id: type_id.to_string(),
        token,
    })
}

fn compact_records(map: BTreeMap<String, Vec<String>>) -> std::result::Result<Vec<SignatureRecord>, ConfigError> {
    let mut records = Vec::new();
    for (type_name, signatures) in map {
        for (i, signature) in signatures.iter().enumerate() {
            let type_id = match i {
                0 => type_name.clone(),
                n => format!("{}#{}", type_name, n + 1),
            };
            let header = compile_pattern(&type_id, signature)?;
            records.push(SignatureRecord::new(type_id, header));
        }
    }
    Ok(records)
}

/// Parses and validates a signature file held in memory.
pub fn parse_database(text: &str) -> std::result::Result<SignatureDatabase, ConfigError> {
    let file: SignatureFile =
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let records = match file {
        SignatureFile::Records(entries) => entries
            .into_iter()
            .map(RecordEntry::compile)
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SignatureFile::Compact(map) => compact_records(map)?,
    };

    SignatureDatabase::new(records)
}

/// Reads a signature file from disk.
pub fn load_database(path: impl AsRef<Path>) -> Result<SignatureDatabase> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let db = parse_database(&text)?;
    debug!(path = %path.display(), records = db.len(), "loaded signature database");
    Ok(db)
}
