mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{activation_request, key_for, ScriptedRunner, StubKernel};
use dnnc_kernel_selector::{
    Datatype, EngineInfo, ImplementationRegistry, KernelOverrides, KernelSelector,
    OfflineTuningTable, OptionalParams, TuningConfig,
};

fn registry(kernels: &[Arc<StubKernel>]) -> ImplementationRegistry {
    let mut registry = ImplementationRegistry::empty();
    for kernel in kernels {
        registry.register(kernel.clone());
    }
    registry
}

fn kernels() -> (Arc<StubKernel>, Arc<StubKernel>) {
    let key = key_for(&[Datatype::F32]);
    (
        Arc::new(StubKernel::new("kernel_A", key, 5.0).tunable(8)),
        Arc::new(StubKernel::new("kernel_B", key, 1.0)),
    )
}

#[test]
fn cache_hit_bypasses_search_and_runner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    let request = activation_request(Datatype::F32);
    let hash = request.fingerprint().unwrap();
    fs::write(&path, format!("{hash} kernel_A 2\n")).expect("write cache");

    let (a, b) = kernels();
    let runner = ScriptedRunner::new(0);
    let selector = KernelSelector::new(EngineInfo::default())
        .with_registry(registry(&[a.clone(), b.clone()]))
        .with_overrides(KernelOverrides::new())
        .with_tuning(TuningConfig::tune_and_cache(&path, runner.clone()));

    let chosen = selector
        .select(&request, &OptionalParams::default())
        .expect("cached selection");
    assert_eq!(chosen.kernel_name, "kernel_A");
    assert_eq!(chosen.auto_tune_index, Some(2));
    assert_eq!(a.tuned_calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.default_calls.load(Ordering::SeqCst), 0);
    assert_eq!(a.tuning_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b.total_calls(), 0);
    assert_eq!(runner.call_count(), 0);
}

#[test]
fn tune_and_cache_measures_and_persists_the_winner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    let request = activation_request(Datatype::F32);

    let (a, b) = kernels();
    let runner = ScriptedRunner::new(3);
    let selector = KernelSelector::new(EngineInfo::default())
        .with_registry(registry(&[a.clone(), b.clone()]))
        .with_overrides(KernelOverrides::new())
        .with_tuning(TuningConfig::tune_and_cache(&path, runner.clone()));

    let chosen = selector
        .select(&request, &OptionalParams::default())
        .expect("tuned selection");
    assert_eq!(chosen.kernel_name, "kernel_A");
    assert_eq!(chosen.auto_tune_index, Some(3));
    assert!(chosen.run_time.is_some());
    // Tunable implementations produced a result, so the plain one is never timed.
    assert_eq!(runner.call_count(), 1);
    assert_eq!(b.total_calls(), 0);

    let text = fs::read_to_string(&path).expect("cache written");
    assert_eq!(text, format!("{} kernel_A 3\n", request.fingerprint().unwrap()));

    let second_runner = ScriptedRunner::new(0);
    let again = KernelSelector::new(EngineInfo::default())
        .with_registry(registry(&[a, b]))
        .with_overrides(KernelOverrides::new())
        .with_tuning(TuningConfig::tune_and_cache(&path, second_runner.clone()))
        .select(&request, &OptionalParams::default())
        .expect("cached selection");
    assert_eq!(again.auto_tune_index, Some(3));
    assert_eq!(second_runner.call_count(), 0);
}

#[test]
fn runner_failure_skips_only_that_candidate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    let request = activation_request(Datatype::F32);

    let (a, b) = kernels();
    let runner = ScriptedRunner::failing_for(0, "kernel_A");
    let chosen = KernelSelector::new(EngineInfo::default())
        .with_registry(registry(&[a, b]))
        .with_overrides(KernelOverrides::new())
        .with_tuning(TuningConfig::tune_and_cache(&path, runner.clone()))
        .select(&request, &OptionalParams::default())
        .expect("kernel_B is still measurable");
    assert_eq!(chosen.kernel_name, "kernel_B");
    assert_eq!(chosen.auto_tune_index, None);
    assert_eq!(runner.call_count(), 2);

    let text = fs::read_to_string(&path).expect("cache written");
    assert_eq!(text, format!("{} kernel_B -1\n", request.fingerprint().unwrap()));
}

#[test]
fn use_cache_miss_falls_back_to_naive_selection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("missing.cache");
    let (a, b) = kernels();
    let chosen = KernelSelector::new(EngineInfo::default())
        .with_registry(registry(&[a, b]))
        .with_overrides(KernelOverrides::new())
        .with_tuning(TuningConfig::use_cache(&path))
        .select(&activation_request(Datatype::F32), &OptionalParams::default())
        .expect("naive fallback");
    assert_eq!(chosen.kernel_name, "kernel_B");
    assert!(chosen.run_time.is_none());
    assert!(!path.exists(), "use_cache mode never writes the cache");
}

#[test]
fn stale_cache_entry_falls_through_to_tuning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    let request = activation_request(Datatype::F32);
    fs::write(
        &path,
        format!("{} kernel_A 99\n", request.fingerprint().unwrap()),
    )
    .expect("write cache");

    let (a, b) = kernels();
    let runner = ScriptedRunner::new(5);
    let chosen = KernelSelector::new(EngineInfo::default())
        .with_registry(registry(&[a, b]))
        .with_overrides(KernelOverrides::new())
        .with_tuning(TuningConfig::tune_and_cache(&path, runner.clone()))
        .select(&request, &OptionalParams::default())
        .expect("retuned selection");
    assert_eq!(chosen.auto_tune_index, Some(5));
    assert_eq!(runner.call_count(), 1);

    let text = fs::read_to_string(&path).expect("cache");
    assert_eq!(text.lines().count(), 2);
}

/// Offline records for `hash`: kernel_A variant 4 on 24-unit devices,
/// variant 6 on 48-unit devices.
fn offline_tables(hash: &str) -> Arc<OfflineTuningTable> {
    let cu24 = format!("{hash} kernel_A 4\n");
    let cu48 = format!("{hash} kernel_A 6\n");
    Arc::new(OfflineTuningTable::from_tables(&[(24, &cu24), (48, &cu48)]))
}

fn engine(compute_units: u32) -> EngineInfo {
    EngineInfo {
        compute_units,
        ..EngineInfo::default()
    }
}

#[test]
fn use_cache_consults_the_offline_table_after_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    fs::write(&path, "").expect("empty cache");
    let request = activation_request(Datatype::F32);

    let (a, b) = kernels();
    let chosen = KernelSelector::new(engine(48))
        .with_registry(registry(&[a.clone(), b.clone()]))
        .with_overrides(KernelOverrides::new())
        .with_offline_table(offline_tables(&request.fingerprint().unwrap()))
        .with_tuning(TuningConfig::use_cache(&path))
        .select(&request, &OptionalParams::default())
        .expect("offline selection");
    assert_eq!(chosen.kernel_name, "kernel_A");
    assert_eq!(chosen.auto_tune_index, Some(6));
    assert_eq!(a.tuned_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.total_calls(), 0);
}

#[test]
fn unknown_device_reads_the_24_unit_offline_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    let request = activation_request(Datatype::F32);

    let (a, b) = kernels();
    let chosen = KernelSelector::new(engine(7))
        .with_registry(registry(&[a, b]))
        .with_overrides(KernelOverrides::new())
        .with_offline_table(offline_tables(&request.fingerprint().unwrap()))
        .with_tuning(TuningConfig::use_cache(&path))
        .select(&request, &OptionalParams::default())
        .expect("offline selection");
    assert_eq!(chosen.kernel_name, "kernel_A");
    assert_eq!(chosen.auto_tune_index, Some(4));
}

#[test]
fn tune_and_cache_ignores_the_offline_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tuning.cache");
    let request = activation_request(Datatype::F32);

    let (a, b) = kernels();
    let runner = ScriptedRunner::new(2);
    let chosen = KernelSelector::new(engine(48))
        .with_registry(registry(&[a.clone(), b]))
        .with_overrides(KernelOverrides::new())
        .with_offline_table(offline_tables(&request.fingerprint().unwrap()))
        .with_tuning(TuningConfig::tune_and_cache(&path, runner.clone()))
        .select(&request, &OptionalParams::default())
        .expect("tuned selection");
    assert_eq!(chosen.auto_tune_index, Some(2));
    assert_eq!(runner.call_count(), 1);
    assert_eq!(a.tuned_calls.load(Ordering::SeqCst), 0);
}
