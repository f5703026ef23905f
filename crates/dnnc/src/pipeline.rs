use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::CompileError;
use crate::passes::{
    CalculateLayoutsPass, CompileGraphPass, PassContext, PassResult, PostOptimizeWeightsPass,
    PreOptimizeBiasPass, PreparePaddingPass, PreparePrimitiveFusingPass, ProgramPass,
    PropagateConstantsPass, RemoveRedundantReordersPass, ReorderInputsPass, TrimToOutputsPass,
};
use crate::program::Program;

/// Upper bound on rounds of the trailing reorder and constant cleanup.
const CLEANUP_ITERS: usize = 4;

pub enum Step {
    Pass(Arc<dyn ProgramPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn ProgramPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered pass sequence applied to a program.
pub struct PassPipeline {
    steps: Vec<Step>,
    log_stats: bool,
    run_counter: AtomicUsize,
}

impl PassPipeline {
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            log_stats: crate::env::pass_stats_enabled(),
            run_counter: AtomicUsize::new(0),
        }
    }

    /// Standard compilation sequence. Data optimizations (fusion, input and
    /// bias reorders) run only when `optimize_data` is set.
    pub fn standard(optimize_data: bool) -> Self {
        let mut builder = PipelineBuilder::new();
        builder.pass(Arc::new(TrimToOutputsPass));
        builder.pass(Arc::new(CalculateLayoutsPass));
        if optimize_data {
            builder.pass(Arc::new(PreparePrimitiveFusingPass));
            builder.pass(Arc::new(ReorderInputsPass));
            builder.pass(Arc::new(PreOptimizeBiasPass));
        }
        builder.pass(Arc::new(RemoveRedundantReordersPass));
        builder.pass(Arc::new(PreparePaddingPass));
        builder.pass(Arc::new(PropagateConstantsPass));
        builder.pass(Arc::new(CompileGraphPass));
        builder.pass(Arc::new(PostOptimizeWeightsPass));
        builder.fixed_point(CLEANUP_ITERS, |p| {
            p.pass(Arc::new(RemoveRedundantReordersPass));
            p.pass(Arc::new(PropagateConstantsPass));
        });
        Self::from_steps(builder.finish())
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        fn collect(steps: &[Step], out: &mut Vec<&'static str>) {
            for step in steps {
                match step {
                    Step::Pass(pass) => out.push(pass.name()),
                    Step::FixedPoint { steps, .. } => collect(steps, out),
                }
            }
        }
        let mut names = Vec::new();
        collect(&self.steps, &mut names);
        names
    }

    pub fn run(&self, program: &mut Program, cx: &mut PassContext<'_>) -> Result<PassResult, CompileError> {
        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let mut totals = PassResult::default();
        run_steps(&self.steps, program, cx, run_id, &mut totals, self.log_stats)?;
        Ok(totals)
    }
}

fn run_steps(
    steps: &[Step],
    program: &mut Program,
    cx: &mut PassContext<'_>,
    run_id: usize,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool, CompileError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let _span = tracing::debug_span!("pass", name = pass.name()).entered();
                let started = Instant::now();
                let stats = pass.run(program, cx)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                log_pass_stats(pass.name(), program, run_id, stats, started, log_stats);
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, program, cx, run_id, &mut local, log_stats)?;
                    local.iterations += 1;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}

fn log_pass_stats(
    name: &str,
    program: &Program,
    run_id: usize,
    stats: PassResult,
    started: Instant,
    log_stats: bool,
) {
    let elapsed_us = started.elapsed().as_micros() as u64;
    if log_stats {
        tracing::info!(
            run_id,
            pass = name,
            changed = stats.changed,
            rewrites = stats.rewrites_applied,
            removed = stats.removed_nodes,
            nodes = program.len(),
            elapsed_us,
            "pass finished"
        );
    } else {
        tracing::debug!(
            run_id,
            pass = name,
            changed = stats.changed,
            rewrites = stats.rewrites_applied,
            removed = stats.removed_nodes,
            nodes = program.len(),
            elapsed_us,
            "pass finished"
        );
    }
}
