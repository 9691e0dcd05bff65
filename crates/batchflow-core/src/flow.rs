//! Flow composer: sequential chains of nodes and parallel splits.
//!
//! A [`Flow`] runs its nodes in order and stops at the first node that does not
//! complete. A [`Split`] runs each branch flow as its own tokio task and waits
//! for all of them; a failed branch never cancels its siblings.

use crate::error::{BatchError, Result};
use crate::status::BatchStatus;
use crate::step::{run_step, ChunkStep, JobScope, Step};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use tracing::Instrument;

/// One node of a flow graph
#[derive(Clone)]
pub enum FlowNode {
    Step(Arc<dyn Step>),
    Split(Split),
    Flow(Arc<Flow>),
}

impl FlowNode {
    pub fn step<S: Step + 'static>(step: S) -> Self {
        FlowNode::Step(Arc::new(step))
    }

    pub fn name(&self) -> &str {
        match self {
            FlowNode::Step(step) => step.name(),
            FlowNode::Split(split) => &split.name,
            FlowNode::Flow(flow) => &flow.name,
        }
    }

    fn collect_step_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            FlowNode::Step(step) => names.push(step.name()),
            FlowNode::Split(split) => {
                for branch in &split.branches {
                    branch.collect_step_names(names);
                }
            },
            FlowNode::Flow(flow) => flow.collect_step_names(names),
        }
    }

    fn execute<'a>(&'a self, scope: &'a JobScope) -> BoxFuture<'a, Result<BatchStatus>> {
        match self {
            FlowNode::Step(step) => run_step(step.as_ref(), scope).boxed(),
            FlowNode::Split(split) => split.execute(scope),
            FlowNode::Flow(flow) => flow.execute(scope),
        }
    }
}

impl From<Arc<dyn Step>> for FlowNode {
    fn from(step: Arc<dyn Step>) -> Self {
        FlowNode::Step(step)
    }
}

impl<I, O> From<ChunkStep<I, O>> for FlowNode
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn from(step: ChunkStep<I, O>) -> Self {
        FlowNode::step(step)
    }
}

impl From<Split> for FlowNode {
    fn from(split: Split) -> Self {
        FlowNode::Split(split)
    }
}

impl From<Flow> for FlowNode {
    fn from(flow: Flow) -> Self {
        FlowNode::Flow(Arc::new(flow))
    }
}

/// Named sequence of nodes
pub struct Flow {
    name: String,
    nodes: Vec<FlowNode>,
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    /// Every step name reachable from this flow, in definition order.
    pub fn step_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_step_names(&mut names);
        names
    }

    fn collect_step_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        for node in &self.nodes {
            node.collect_step_names(names);
        }
    }

    /// Runs the nodes in order.
    ///
    /// Returns the first error, or STOPPED as soon as a node stops; the
    /// remaining nodes are not started in either case.
    pub fn execute<'a>(&'a self, scope: &'a JobScope) -> BoxFuture<'a, Result<BatchStatus>> {
        async move {
            for node in &self.nodes {
                match node.execute(scope).await? {
                    BatchStatus::Completed => {},
                    status => {
                        tracing::info!(
                            flow = %self.name,
                            node = %node.name(),
                            status = %status,
                            "Flow halted"
                        );
                        return Ok(status);
                    },
                }
            }
            Ok(BatchStatus::Completed)
        }
        .boxed()
    }
}

pub struct FlowBuilder {
    name: String,
    nodes: Vec<FlowNode>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// First node of the flow.
    pub fn start(self, node: impl Into<FlowNode>) -> Self {
        self.next(node)
    }

    pub fn next(mut self, node: impl Into<FlowNode>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Appends a split whose branches run concurrently.
    pub fn split(self, name: impl Into<String>, branches: Vec<Flow>) -> Self {
        self.next(Split::new(name, branches))
    }

    pub fn build(self) -> Result<Flow> {
        if self.nodes.is_empty() {
            return Err(BatchError::InvalidDefinition(format!(
                "flow '{}' has no steps",
                self.name
            )));
        }
        Ok(Flow {
            name: self.name,
            nodes: self.nodes,
        })
    }
}

/// Named set of branch flows run concurrently
#[derive(Clone)]
pub struct Split {
    name: String,
    branches: Vec<Arc<Flow>>,
}

impl Split {
    pub fn new(name: impl Into<String>, branches: Vec<Flow>) -> Self {
        Self {
            name: name.into(),
            branches: branches.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn branches(&self) -> &[Arc<Flow>] {
        &self.branches
    }

    fn execute<'a>(&'a self, scope: &'a JobScope) -> BoxFuture<'a, Result<BatchStatus>> {
        let span = tracing::info_span!("split", split = %self.name);
        async move {
            tracing::info!(branches = self.branches.len(), "Starting split");

            let tasks = self.branches.iter().map(|branch| {
                let branch = Arc::clone(branch);
                let scope = scope.clone();
                let span = tracing::info_span!("branch", flow = %branch.name);
                tokio::spawn(async move { branch.execute(&scope).await }.instrument(span))
            });
            let results = join_all(tasks).await;

            let mut failed = Vec::new();
            let mut stopped = false;
            for (branch, joined) in self.branches.iter().zip(results) {
                let outcome = joined.unwrap_or_else(|e| {
                    Err(BatchError::TaskFailed(format!(
                        "branch '{}' task ended abnormally: {e}",
                        branch.name
                    )))
                });
                match outcome {
                    Ok(BatchStatus::Completed) => {},
                    Ok(BatchStatus::Stopped) => stopped = true,
                    Ok(status) => {
                        tracing::error!(flow = %branch.name, status = %status, "Branch did not complete");
                        failed.push(branch.name.clone());
                    },
                    Err(err) => {
                        tracing::error!(flow = %branch.name, error = %err, "Branch failed");
                        failed.push(branch.name.clone());
                    },
                }
            }

            if !failed.is_empty() {
                return Err(BatchError::BranchFailure {
                    split: self.name.clone(),
                    branches: failed,
                });
            }
            if stopped {
                return Ok(BatchStatus::Stopped);
            }
            tracing::info!("Split completed");
            Ok(BatchStatus::Completed)
        }
        .instrument(span)
        .boxed()
    }
}
