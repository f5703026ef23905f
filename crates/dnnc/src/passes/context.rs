use dnnc_kernel_selector::KernelSelector;

use crate::constant::ConstantEvaluator;
use crate::layout_optimizer::LayoutOptimizer;

/// Services shared by the passes of one compilation.
pub struct PassContext<'a> {
    selector: &'a KernelSelector,
    evaluator: Option<&'a dyn ConstantEvaluator>,
    layout_optimizer: LayoutOptimizer,
    debug: bool,
}

impl<'a> PassContext<'a> {
    pub fn new(selector: &'a KernelSelector) -> Self {
        Self {
            selector,
            evaluator: None,
            layout_optimizer: LayoutOptimizer::new(),
            debug: false,
        }
    }

    pub fn with_evaluator(mut self, evaluator: &'a dyn ConstantEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn selector(&self) -> &'a KernelSelector {
        self.selector
    }

    pub fn evaluator(&self) -> Option<&'a dyn ConstantEvaluator> {
        self.evaluator
    }

    pub fn layout_optimizer(&self) -> &LayoutOptimizer {
        &self.layout_optimizer
    }

    pub fn layout_optimizer_mut(&mut self) -> &mut LayoutOptimizer {
        &mut self.layout_optimizer
    }

    /// Every node is observable: outputs may be fused into and nothing is trimmed.
    pub fn debug(&self) -> bool {
        self.debug
    }
}
