use std::fs;

use dnnc_kernel_selector::{TuningCache, TuningEntry};

#[test]
fn truncated_trailing_record_is_ignored() {
    let cache = TuningCache::parse("aa conv_a 1\nbb conv_b 4\ncc conv_c");
    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache.lookup("bb"),
        Some(&TuningEntry {
            kernel_name: "conv_b".to_string(),
            index: Some(4),
        })
    );
    assert!(cache.lookup("cc").is_none());
}

#[test]
fn missing_file_is_an_empty_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = TuningCache::load(&dir.path().join("absent.cache"));
    assert!(cache.is_empty());
}

#[test]
fn later_records_overwrite_earlier_ones() {
    let cache = TuningCache::parse("abc123 kernel_A 2\nabc123 kernel_B 7\n");
    let entry = cache.lookup("abc123").expect("entry");
    assert_eq!(entry.kernel_name, "kernel_B");
    assert_eq!(entry.index, Some(7));
}

#[test]
fn store_appends_records_that_load_reads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    TuningCache::store(&path, "h1", "kernel_A", Some(3)).expect("first store");
    TuningCache::store(&path, "h2", "kernel_B", None).expect("second store");

    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "h1 kernel_A 3\nh2 kernel_B -1\n"
    );
    let cache = TuningCache::load(&path);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.lookup("h2").map(|e| e.index), Some(None));
}

#[test]
fn records_may_span_arbitrary_whitespace() {
    let cache = TuningCache::parse("h1\tkernel_A\n 3   h2 kernel_B 0");
    assert_eq!(cache.len(), 2);
}
