//! Kernel selection: naive cost comparison and cache-backed auto-tuning.

use std::sync::Arc;

use crate::engine::EngineInfo;
use crate::error::SelectorError;
use crate::kernel::{KernelData, KernelImpl};
use crate::offline::OfflineTuningTable;
use crate::overrides::KernelOverrides;
use crate::params::{OptionalParams, Params};
use crate::registry::ImplementationRegistry;
use crate::tensor::Datatype;
use crate::tuning::{KernelRunner, TuningCache, TuningConfig, TuningMode};

/// Binds requests to implementations. Construct one per compilation and
/// pass it in; it holds no process-wide state.
#[derive(Debug)]
pub struct KernelSelector {
    registry: ImplementationRegistry,
    engine: EngineInfo,
    tuning: TuningConfig,
    overrides: KernelOverrides,
    offline: Arc<OfflineTuningTable>,
}

impl KernelSelector {
    pub fn new(engine: EngineInfo) -> Self {
        #[cfg(feature = "env-overrides")]
        let overrides = KernelOverrides::from_env();
        #[cfg(not(feature = "env-overrides"))]
        let overrides = KernelOverrides::new();

        Self {
            registry: ImplementationRegistry::builtin(),
            engine,
            tuning: TuningConfig::disabled(),
            overrides,
            offline: Arc::new(OfflineTuningTable::new()),
        }
    }

    pub fn with_registry(mut self, registry: ImplementationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_overrides(mut self, overrides: KernelOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_offline_table(mut self, offline: Arc<OfflineTuningTable>) -> Self {
        self.offline = offline;
        self
    }

    pub fn engine(&self) -> &EngineInfo {
        &self.engine
    }

    pub fn registry(&self) -> &ImplementationRegistry {
        &self.registry
    }

    pub fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    /// Picks a plan using auto-tuning when it is enabled, naive selection otherwise.
    pub fn select(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelData, SelectorError> {
        if self.tuning.is_enabled() {
            self.select_auto_tune(params, options)
        } else {
            self.select_naive(params, options)
        }
    }

    fn check_device(&self, params: &Params) -> Result<(), SelectorError> {
        let Some(base) = params.base() else {
            return Ok(());
        };
        let uses_fp16 = base
            .inputs
            .iter()
            .chain(std::iter::once(&base.output))
            .any(|tensor| tensor.dtype == Datatype::F16);
        if uses_fp16 && !self.engine.supports_fp16 {
            return Err(SelectorError::TypeMismatch {
                what: "half precision".to_string(),
                layer_id: base.layer_id.clone(),
            });
        }
        Ok(())
    }

    fn candidates<'a>(
        &'a self,
        params: &Params,
        options: &OptionalParams,
    ) -> impl Iterator<Item = &'a Arc<dyn KernelImpl>> + 'a {
        let request = options.request_key(params);
        let engine = self.engine;
        self.registry
            .implementations(params.kind())
            .iter()
            .filter(move |candidate| {
                let key = candidate.supported_key();
                key.supports(&request) && engine.can_run(&key)
            })
    }

    fn no_implementation(params: &Params) -> SelectorError {
        SelectorError::NoImplementation {
            kind: params.kind().as_str(),
            layer_id: params.layer_id().to_string(),
        }
    }

    /// Cheapest plan among the implementations that accept the request.
    /// Exact cost ties keep the earlier-registered implementation.
    pub fn select_naive(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelData, SelectorError> {
        self.check_device(params)?;
        let mut best: Option<KernelData> = None;

        for implementation in self.candidates(params, options) {
            let name = implementation.name();
            let plan = match implementation.kernels_data(params, options) {
                Ok(plans) => plans.into_iter().next().filter(|kd| !kd.is_empty()),
                Err(err) => {
                    tracing::trace!(kernel = name, error = %err, "candidate skipped");
                    continue;
                }
            };
            let Some(mut plan) = plan else {
                continue;
            };
            plan.kernel_name = name.to_string();

            if self.overrides.is_forced(name) {
                tracing::debug!(layer = params.layer_id(), kernel = name, "forced kernel");
                return Ok(plan);
            }
            if self.overrides.is_denied(name) {
                tracing::debug!(layer = params.layer_id(), kernel = name, "denied kernel");
                continue;
            }
            if best
                .as_ref()
                .is_none_or(|current| plan.estimated_time < current.estimated_time)
            {
                best = Some(plan);
            }
        }

        let best = best.ok_or_else(|| Self::no_implementation(params))?;
        tracing::debug!(
            layer = params.layer_id(),
            kernel = %best.kernel_name,
            estimated_time = best.estimated_time,
            "selected kernel"
        );
        Ok(best)
    }

    /// Plan of one named implementation's tuning variant.
    pub fn select_variant(
        &self,
        params: &Params,
        options: &OptionalParams,
        kernel_name: &str,
        index: Option<usize>,
    ) -> Result<KernelData, SelectorError> {
        let unavailable = |reason: String| SelectorError::TunedVariantUnavailable {
            kernel_name: kernel_name.to_string(),
            index,
            reason,
        };
        let implementation = self
            .registry
            .find(params.kind(), kernel_name)
            .ok_or_else(|| unavailable("no such implementation".to_string()))?;
        let key = implementation.supported_key();
        if !key.supports(&options.request_key(params)) || !self.engine.can_run(&key) {
            return Err(unavailable("request no longer matches its key".to_string()));
        }
        let mut plan = implementation
            .tuned_kernels_data(params, options, index)
            .map_err(|err| unavailable(err.to_string()))?
            .into_iter()
            .next()
            .filter(|kd| !kd.is_empty())
            .ok_or_else(|| unavailable("empty plan".to_string()))?;
        plan.kernel_name = kernel_name.to_string();
        Ok(plan)
    }

    /// Cache lookup first; on a miss either measure candidates (tune-and-cache
    /// with a runner) or fall back to naive selection.
    pub fn select_auto_tune(
        &self,
        params: &Params,
        options: &OptionalParams,
    ) -> Result<KernelData, SelectorError> {
        self.check_device(params)?;
        let hash = params.fingerprint()?;
        let cache = self
            .tuning
            .cache_path
            .as_deref()
            .map(TuningCache::load)
            .unwrap_or_default();

        let cached = cache.lookup(&hash).cloned().or_else(|| {
            (self.tuning.mode == TuningMode::UseCache)
                .then(|| self.offline.lookup(self.engine.compute_units, &hash).cloned())
                .flatten()
        });
        if let Some(entry) = cached {
            match self.select_variant(params, options, &entry.kernel_name, entry.index) {
                Ok(plan) => {
                    tracing::debug!(layer = params.layer_id(), hash = %hash, kernel = %plan.kernel_name, "tuning cache hit");
                    return Ok(plan);
                }
                Err(err) => {
                    tracing::debug!(layer = params.layer_id(), hash = %hash, error = %err, "cached tuning result unusable");
                }
            }
        }

        let runner = match (self.tuning.mode, self.tuning.runner.as_ref()) {
            (TuningMode::TuneAndCache, Some(runner)) => runner,
            _ => return self.select_naive(params, options),
        };
        tracing::debug!(layer = params.layer_id(), hash = %hash, "tuning cache miss, measuring");

        let candidates: Vec<&Arc<dyn KernelImpl>> = self
            .candidates(params, options)
            .filter(|candidate| !self.overrides.is_denied(candidate.name()))
            .collect();
        let mut best: Option<KernelData> = None;
        for tunable in [true, false] {
            for implementation in candidates
                .iter()
                .copied()
                .filter(|candidate| candidate.supports_tuning() == tunable)
            {
                match measure(implementation.as_ref(), runner.as_ref(), params, options) {
                    Ok(measured) => {
                        for plan in measured {
                            if best
                                .as_ref()
                                .is_none_or(|current| plan.run_time < current.run_time)
                            {
                                best = Some(plan);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(kernel = implementation.name(), error = %err, "skipping candidate while tuning");
                    }
                }
            }
            if best.is_some() {
                break;
            }
        }

        let Some(best) = best else {
            return self.select_naive(params, options);
        };
        if let Some(path) = self.tuning.cache_path.as_deref() {
            if let Err(err) =
                TuningCache::store(path, &hash, &best.kernel_name, best.auto_tune_index)
            {
                let err = SelectorError::from(err);
                tracing::warn!(path = %path.display(), error = %err, "tuning result not persisted");
            }
        }
        tracing::debug!(
            layer = params.layer_id(),
            kernel = %best.kernel_name,
            index = ?best.auto_tune_index,
            run_time = ?best.run_time,
            "tuned kernel"
        );
        Ok(best)
    }
}

fn measure(
    implementation: &dyn KernelImpl,
    runner: &dyn KernelRunner,
    params: &Params,
    options: &OptionalParams,
) -> Result<Vec<KernelData>, SelectorError> {
    let plans: Vec<KernelData> = match implementation.kernels_data_for_auto_tune(params, options) {
        Ok(plans) => plans.into_iter().filter(|kd| !kd.is_empty()).collect(),
        Err(err) => {
            tracing::trace!(kernel = implementation.name(), error = %err, "candidate skipped");
            return Ok(Vec::new());
        }
    };
    if plans.is_empty() {
        return Ok(plans);
    }
    let timings = runner
        .run_kernels(&plans)
        .map_err(|err| SelectorError::runner(format!("{err:#}")))?;
    if timings.len() != plans.len() {
        return Err(SelectorError::runner(format!(
            "{} timings for {} plans",
            timings.len(),
            plans.len()
        )));
    }
    Ok(plans
        .into_iter()
        .zip(timings)
        .map(|(mut plan, time)| {
            plan.run_time = Some(time);
            plan.kernel_name = implementation.name().to_string();
            plan
        })
        .collect())
}
