use thiserror::Error;

/// Problems with a signature table or scan configuration. Reported before
/// any byte of the source is scanned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("signature database contains no records")]
    EmptyDatabase,

    #[error("signature '{type_id}' has an empty {part} pattern")]
    EmptyPattern { type_id: String, part: &'static str },

    #[error("duplicate signature type id: {0}")]
    DuplicateTypeId(String),

    #[error("signature '{type_id}': invalid pattern token '{token}'")]
    InvalidPattern { type_id: String, token: String },

    #[error("signature '{0}' has a zero max size")]
    ZeroMaxSize(String),

    #[error("window of {window} bytes is smaller than the longest pattern ({min} bytes)")]
    InvalidWindow { window: usize, min: usize },

    #[error("failed to build pattern matcher: {0}")]
    Matcher(String),

    #[error("failed to parse signature file: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated read at offset {offset}: expected {expected} bytes, got {actual}")]
    Truncated {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Offset {offset} is out of bounds (max: {max})")]
    OutOfBounds { offset: u64, max: u64 },

    #[error("region of {len} bytes exceeds the {max}-byte in-memory limit, extract it to a file")]
    RegionTooLarge { len: u64, max: u64 },
}

impl CoreError {
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_convert_into_core_errors() {
        let err: CoreError = ConfigError::DuplicateTypeId("ZIP".into()).into();
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "configuration error: duplicate signature type id: ZIP"
        );
    }

    #[test]
    fn io_errors_are_not_config_errors() {
        let err: CoreError = std::io::Error::other("boom").into();
        assert!(!err.is_config());
    }
}
