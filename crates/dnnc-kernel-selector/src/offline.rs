//! Built-in tuning results for known devices, keyed by compute-unit count.

use std::borrow::Cow;

use once_cell::sync::OnceCell;

use crate::tuning::{TuningCache, TuningEntry};

const FALLBACK_COMPUTE_UNITS: u32 = 24;

// The shipped records are placeholders in the right format; real entries are
// copied from the cache file of a tune-and-cache run on the matching device.
const SKU_TABLES: [(u32, &str); 5] = [
    (72, include_str!("../data/tuning_cu72.txt")),
    (24, include_str!("../data/tuning_cu24.txt")),
    (48, include_str!("../data/tuning_cu48.txt")),
    (64, include_str!("../data/tuning_cu64.txt")),
    (18, include_str!("../data/tuning_cu18.txt")),
];

/// Maps a device's compute-unit count onto the table that serves it.
pub fn table_compute_units(compute_units: u32) -> u32 {
    match compute_units {
        12 => 18,
        72 | 24 | 48 | 64 | 18 => compute_units,
        _ => FALLBACK_COMPUTE_UNITS,
    }
}

/// Offline tuning data. Each table is parsed at most once, on first use,
/// even when several threads ask for it concurrently.
#[derive(Debug)]
pub struct OfflineTuningTable {
    sources: Vec<(u32, Cow<'static, str>)>,
    tables: Vec<OnceCell<TuningCache>>,
}

impl Default for OfflineTuningTable {
    fn default() -> Self {
        Self::with_sources(
            SKU_TABLES
                .iter()
                .map(|(units, text)| (*units, Cow::Borrowed(*text)))
                .collect(),
        )
    }
}

impl OfflineTuningTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables given as `(compute units, records)` pairs, records in the
    /// tuning cache file format.
    pub fn from_tables(tables: &[(u32, &str)]) -> Self {
        Self::with_sources(
            tables
                .iter()
                .map(|(units, text)| (*units, Cow::Owned(text.to_string())))
                .collect(),
        )
    }

    fn with_sources(sources: Vec<(u32, Cow<'static, str>)>) -> Self {
        let tables = sources.iter().map(|_| OnceCell::new()).collect();
        Self { sources, tables }
    }

    fn slot(&self, compute_units: u32) -> Option<usize> {
        let position = |units: u32| self.sources.iter().position(|(u, _)| *u == units);
        position(compute_units)
            .or_else(|| position(table_compute_units(compute_units)))
            .or_else(|| position(FALLBACK_COMPUTE_UNITS))
    }

    pub fn table(&self, compute_units: u32) -> Option<&TuningCache> {
        let slot = self.slot(compute_units)?;
        let (units, text) = &self.sources[slot];
        Some(self.tables[slot].get_or_init(|| {
            tracing::debug!(compute_units = *units, "parsing offline tuning table");
            TuningCache::parse(text)
        }))
    }

    pub fn lookup(&self, compute_units: u32, hash: &str) -> Option<&TuningEntry> {
        self.table(compute_units)?.lookup(hash)
    }

    pub fn is_initialized(&self, compute_units: u32) -> bool {
        self.slot(compute_units)
            .is_some_and(|slot| self.tables[slot].get().is_some())
    }
}
