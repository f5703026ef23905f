//! Persistent auto-tuning cache.
//!
//! The cache file is plain text with one record per line:
//! `<fingerprint> <implementation-name> <variant-index>`. A variant index of
//! `-1` names the implementation's default configuration. Records are only
//! ever appended; when a fingerprint appears more than once the last record
//! wins. Parsing stops at the first incomplete or malformed record, so a
//! partially written tail is ignored. No locking is done: concurrent writers
//! from several processes may interleave records.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::kernel::KernelData;

/// Device-execution timer used while tuning.
///
/// Each plan is executed and timed on its own; the returned durations line
/// up with the input slice.
pub trait KernelRunner: Send + Sync {
    fn run_kernels(&self, kernels: &[KernelData]) -> anyhow::Result<Vec<Duration>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TuningMode {
    #[default]
    Disabled,
    /// Consult the cache file and the offline table, never measure.
    UseCache,
    /// Consult the cache, measure on a miss and append the winner.
    TuneAndCache,
}

#[derive(Clone, Default)]
pub struct TuningConfig {
    pub mode: TuningMode,
    pub cache_path: Option<PathBuf>,
    pub runner: Option<Arc<dyn KernelRunner>>,
}

impl TuningConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn use_cache(path: impl Into<PathBuf>) -> Self {
        Self {
            mode: TuningMode::UseCache,
            cache_path: Some(path.into()),
            runner: None,
        }
    }

    pub fn tune_and_cache(path: impl Into<PathBuf>, runner: Arc<dyn KernelRunner>) -> Self {
        Self {
            mode: TuningMode::TuneAndCache,
            cache_path: Some(path.into()),
            runner: Some(runner),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != TuningMode::Disabled
    }
}

impl fmt::Debug for TuningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TuningConfig")
            .field("mode", &self.mode)
            .field("cache_path", &self.cache_path)
            .field("runner", &self.runner.as_ref().map(|_| "<runner>"))
            .finish()
    }
}

/// Winning implementation and variant for one request fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningEntry {
    pub kernel_name: String,
    /// `None` is the implementation's default configuration.
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuningCache {
    entries: HashMap<String, TuningEntry>,
}

fn parse_index(token: &str) -> Option<Option<usize>> {
    let value: i64 = token.parse().ok()?;
    if value < 0 {
        Some(None)
    } else {
        usize::try_from(value).ok().map(Some)
    }
}

impl TuningCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut cache = TuningCache::new();
        let mut tokens = text.split_whitespace();
        loop {
            let (Some(hash), Some(name), Some(index)) =
                (tokens.next(), tokens.next(), tokens.next())
            else {
                break;
            };
            let Some(index) = parse_index(index) else {
                tracing::debug!(hash, name, index, "stopping at malformed tuning record");
                break;
            };
            cache.insert(
                hash,
                TuningEntry {
                    kernel_name: name.to_string(),
                    index,
                },
            );
        }
        cache
    }

    /// Reads `path`. A missing or unreadable file is an empty cache.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => {
                let cache = Self::parse(&text);
                tracing::debug!(path = %path.display(), entries = cache.len(), "loaded tuning cache");
                cache
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => TuningCache::new(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable tuning cache");
                TuningCache::new()
            }
        }
    }

    pub fn lookup(&self, hash: &str) -> Option<&TuningEntry> {
        self.entries.get(hash)
    }

    pub fn insert(&mut self, hash: impl Into<String>, entry: TuningEntry) {
        self.entries.insert(hash.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends one record to `path`, creating the file if needed.
    pub fn store(
        path: &Path,
        hash: &str,
        kernel_name: &str,
        index: Option<usize>,
    ) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let index = index.map_or(-1, |i| i as i64);
        writeln!(file, "{hash} {kernel_name} {index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_index_is_default_variant() {
        let cache = TuningCache::parse("abc convolution_gpu_ref -1\n");
        assert_eq!(cache.lookup("abc").and_then(|e| e.index), None);
        assert_eq!(
            cache.lookup("abc").map(|e| e.kernel_name.as_str()),
            Some("convolution_gpu_ref")
        );
    }

    #[test]
    fn malformed_index_stops_parsing() {
        let cache = TuningCache::parse("a k 1\nb k x\nc k 2\n");
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("c").is_none());
    }
}
