pub mod config;
pub mod database;
pub mod error;
pub mod extraction;
pub mod io;
pub mod matching;
pub mod resolver;
pub mod scanner;
pub mod session;
pub mod signatures;
pub mod types;

pub use config::{CancelToken, ScanConfig};
pub use error::{ConfigError, CoreError, Result};
pub use extraction::{ExtractionReport, extract, extract_all};
pub use io::{BlockSource, DiskReader, MemoryReader, MmapReader, Reader};
pub use resolver::resolve;
pub use scanner::{ScanOutput, Scanner};
pub use session::{CarveOutcome, CarveSession};
pub use signatures::{ByteMatcher, Pattern, SignatureDatabase, SignatureRecord};
pub use types::{CarvedRegion, Confidence, MatchEvent, MatchKind, Offset};
