#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dnnc_kernel_selector::jit::JitConstants;
use dnnc_kernel_selector::kernel::KernelString;
use dnnc_kernel_selector::params::{ActivationParams, BaseParams};
use dnnc_kernel_selector::{
    ArgumentDescriptor, ClKernelData, DataLayout, DataTensor, Datatype, KernelData, KernelError,
    KernelImpl, KernelRunner, KernelType, KernelsData, OptionalParams, Params, ParamsKey,
    WorkGroups,
};

pub fn activation_request(dtype: Datatype) -> Params {
    let tensor = DataTensor::new(dtype, DataLayout::Bfyx, 1, 8, 4, 4);
    Params::Activation(ActivationParams {
        base: BaseParams::new("relu1", vec![tensor.clone()], tensor),
    })
}

pub fn key_for(dtypes: &[Datatype]) -> ParamsKey {
    let mut key = ParamsKey::new();
    for dtype in dtypes {
        key.enable_input_data_type(*dtype);
        key.enable_output_data_type(*dtype);
    }
    key.enable_all_input_layout();
    key.enable_all_output_layout();
    key
}

pub fn plan(name: &str, cost: f32, index: Option<usize>) -> KernelData {
    let kernel = ClKernelData {
        kernel_string: KernelString::new(format!("{name}__relu1"), JitConstants::new()),
        work_groups: WorkGroups::new([128, 1, 1], [16, 1, 1]),
        arguments: vec![ArgumentDescriptor::Input(0), ArgumentDescriptor::Output],
        layer_id: "relu1".to_string(),
    };
    let mut kd = KernelData::new(KernelType::Activation, kernel, cost);
    kd.auto_tune_index = index;
    kd
}

/// Activation implementation with a fixed cost and optional tuning variants.
pub struct StubKernel {
    pub name: &'static str,
    pub key: ParamsKey,
    pub cost: f32,
    pub fails: bool,
    pub variants: usize,
    pub default_calls: AtomicUsize,
    pub tuned_calls: AtomicUsize,
    pub tuning_calls: AtomicUsize,
}

impl StubKernel {
    pub fn new(name: &'static str, key: ParamsKey, cost: f32) -> Self {
        Self {
            name,
            key,
            cost,
            fails: false,
            variants: 0,
            default_calls: AtomicUsize::new(0),
            tuned_calls: AtomicUsize::new(0),
            tuning_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn tunable(mut self, variants: usize) -> Self {
        self.variants = variants;
        self
    }

    pub fn total_calls(&self) -> usize {
        self.default_calls.load(Ordering::SeqCst)
            + self.tuned_calls.load(Ordering::SeqCst)
            + self.tuning_calls.load(Ordering::SeqCst)
    }
}

impl KernelImpl for StubKernel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Activation
    }

    fn supported_key(&self) -> ParamsKey {
        self.key
    }

    fn kernels_data(
        &self,
        _params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        self.default_calls.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(KernelError::not_applicable("stub refuses"));
        }
        Ok(vec![plan(self.name, self.cost, None)])
    }

    fn supports_tuning(&self) -> bool {
        self.variants > 0
    }

    fn tuned_kernels_data(
        &self,
        _params: &Params,
        _options: &OptionalParams,
        index: Option<usize>,
    ) -> Result<KernelsData, KernelError> {
        self.tuned_calls.fetch_add(1, Ordering::SeqCst);
        match index {
            Some(i) if i >= self.variants => Err(KernelError::not_applicable("no such variant")),
            _ => Ok(vec![plan(self.name, self.cost, index)]),
        }
    }

    fn kernels_data_for_auto_tune(
        &self,
        _params: &Params,
        _options: &OptionalParams,
    ) -> Result<KernelsData, KernelError> {
        self.tuning_calls.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(KernelError::not_applicable("stub refuses"));
        }
        let mut plans: Vec<KernelData> = (0..self.variants)
            .map(|i| plan(self.name, self.cost, Some(i)))
            .collect();
        plans.push(plan(self.name, self.cost, None));
        Ok(plans)
    }
}

/// Runner timing each plan by its variant index: variant `best` is fastest,
/// default configurations take 50ms.
pub struct ScriptedRunner {
    pub best: usize,
    pub fail_for: Option<&'static str>,
    pub calls: AtomicUsize,
    pub measured: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(best: usize) -> Arc<Self> {
        Arc::new(Self {
            best,
            fail_for: None,
            calls: AtomicUsize::new(0),
            measured: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_for(best: usize, name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            best,
            fail_for: Some(name),
            calls: AtomicUsize::new(0),
            measured: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KernelRunner for ScriptedRunner {
    fn run_kernels(&self, kernels: &[KernelData]) -> anyhow::Result<Vec<Duration>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let entry = &kernels[0].kernels[0].kernel_string.entry_point;
        if let Some(name) = self.fail_for {
            if entry.starts_with(name) {
                anyhow::bail!("device lost while timing {name}");
            }
        }
        self.measured.lock().unwrap().push(entry.clone());
        Ok(kernels
            .iter()
            .map(|kd| match kd.auto_tune_index {
                Some(i) => Duration::from_millis(1 + i.abs_diff(self.best) as u64),
                None => Duration::from_millis(50),
            })
            .collect())
    }
}
