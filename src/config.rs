//! Scan configuration.

use crate::error::ConfigError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_WINDOW_SIZE: usize = 4 * 1024 * 1024;

/// Cooperative cancellation flag shared between a scan and whoever may
/// want to stop it (a Ctrl-C handler, a UI thread).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for a scan session
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Bytes read per buffer window
    pub window_size: usize,
    /// Shards scanned in parallel: 1 = sequential, 0 = one per core
    pub threads: usize,
    /// Checked once per window
    pub cancel: CancelToken,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            threads: 1,
            cancel: CancelToken::new(),
        }
    }
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rejects a window that cannot hold the longest pattern.
    pub fn validate(&self, max_pattern_len: usize) -> Result<(), ConfigError> {
        if self.window_size < max_pattern_len {
            return Err(ConfigError::InvalidWindow {
                window: self.window_size,
                min: max_pattern_len,
            });
        }
        Ok(())
    }

    /// Window actually used: large enough that each read makes progress
    /// past the pattern overlap.
    pub fn effective_window(&self, max_pattern_len: usize) -> usize {
        self.window_size.max(max_pattern_len.saturating_mul(2)).max(1)
    }

    /// Number of shards to split a scan into.
    pub fn shard_count(&self) -> usize {
        match self.threads {
            0 => rayon::current_num_threads().max(1),
            n => n,
        }
    }
}
