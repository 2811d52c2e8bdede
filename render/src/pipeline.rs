//! Frame pipelines.
//!
//! A pipeline is an ordered list of steps, each with a target, a set of
//! contexts and an executor that fills the contexts with commands. Executing
//! the pipeline runs every step's executor, sorts its contexts and
//! dispatches them on the owning backend.

use crate::backend::Backend;
use crate::context::Context;
use crate::handle::Handle;
use crate::sort::sort_merge;
use std::sync::Arc;

pub type StepExecutor = Box<dyn FnMut(&Arc<Backend>, Handle, &[Arc<Context>]) + Send>;

pub struct RenderPipelineStep {
    target: Handle,
    contexts: Vec<Arc<Context>>,
    executor: StepExecutor,
}

impl RenderPipelineStep {
    pub fn new(target: Handle, executor: StepExecutor) -> RenderPipelineStep {
        RenderPipelineStep {
            target,
            contexts: Vec::new(),
            executor,
        }
    }

    pub fn add_context(&mut self, context: Arc<Context>) {
        context.set_target(self.target);
        self.contexts.push(context);
    }

    pub fn contexts(&self) -> &[Arc<Context>] {
        &self.contexts
    }
}

pub struct RenderPipeline {
    backend: Arc<Backend>,
    steps: Vec<RenderPipelineStep>,
}

impl RenderPipeline {
    pub fn new(backend: Arc<Backend>) -> RenderPipeline {
        RenderPipeline {
            backend,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: RenderPipelineStep) {
        self.steps.push(step);
    }

    /// Runs every step: fill, sort, dispatch.
    pub fn execute(&mut self) {
        for step in &mut self.steps {
            (step.executor)(&self.backend, step.target, &step.contexts);

            let contexts: Vec<&Context> =
                step.contexts.iter().map(|context| context.as_ref()).collect();
            sort_merge(&contexts);
            self.backend.dispatch(&contexts);
        }
    }
}
