//! Runs predicted steps ahead of the oracle.
//!
//! Each predicted node is checked against the live screen, its action is
//! resolved onto the live elements, executed and recorded. The first
//! divergence stops the run; the caller then continues with normal
//! oracle-driven steps from the returned observation.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::is_finish_sentinel;
use crate::config::ELEMENTS_MATCH_THRESHOLD;
use crate::context::SharedContext;
use crate::controller::reflection::{self, Reflector};
use crate::device::{observe, Device, ElementExtractor, Observation};
use crate::error::{EngineError, Result};
use crate::graph::{NodeId, WorkAction};
use crate::matcher::{find_current_node_matches, find_relevant_workflows, similarity};
use crate::memory::WorkflowMemory;
use crate::predictor::{format_context, predict_future_nodes, SpeculativeNode};
use crate::recorder::WorkflowRecorder;
use crate::resolver::{ActionResolver, ResolvedAction};
use crate::ui::{ElementSchema, UiElement, UiSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeculationState {
    Idle,
    Checking,
    Resolving,
    Executing,
    Recording,
    Aborted,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// Live screen is not the predicted one. Expected, not an error.
    MatchMiss { node_index: usize, similarity: f64 },
    Parse { node_index: usize, message: String },
    Unresolved { node_index: usize },
    /// The action targets an element but was not bound to a live one.
    MissingIdentity { node_index: usize },
    Device { node_index: usize, message: String },
    ExecutionFailed { node_index: usize, message: String },
    /// The device ran the action and reported failure.
    ActionFailed { node_index: usize },
    Recording { node_index: usize, message: String },
}

/// One oracle-proposed step for a predicted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictedStep {
    pub description: String,
    pub template: String,
}

impl PredictedStep {
    pub fn new(description: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            template: template.into(),
        }
    }
}

/// Memory and recorder of the running session.
pub struct RecordingContext<'a> {
    pub memory: &'a mut WorkflowMemory,
    pub recorder: &'a mut WorkflowRecorder,
}

#[derive(Debug, Clone)]
pub struct SpeculationOutcome {
    /// Most recent live observation; `None` only if nothing was captured.
    pub observation: Option<Observation>,
    pub executed: usize,
    pub state: SpeculationState,
    pub abort_reason: Option<AbortReason>,
    /// A finish action was reached or the device asked to stop.
    pub finished: bool,
}

enum NodeStep {
    Advanced(Observation),
    Skipped,
    Finished(Option<Observation>),
    Aborted(AbortReason, Option<Observation>),
}

struct Anchor {
    from: NodeId,
    index: usize,
}

pub struct SpeculativeExecutor {
    device: Arc<dyn Device>,
    extractor: Arc<dyn ElementExtractor>,
    resolver: ActionResolver,
    reflector: Option<Reflector>,
    future_nodes: Vec<SpeculativeNode>,
    state: SpeculationState,
}

impl SpeculativeExecutor {
    pub fn new(device: Arc<dyn Device>, extractor: Arc<dyn ElementExtractor>, schema: ElementSchema) -> Self {
        Self {
            device,
            extractor,
            resolver: ActionResolver::new(schema),
            reflector: None,
            future_nodes: Vec::new(),
            state: SpeculationState::Idle,
        }
    }

    pub fn with_reflector(mut self, reflector: Reflector) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn state(&self) -> SpeculationState {
        self.state
    }

    pub fn future_nodes(&self) -> &[SpeculativeNode] {
        &self.future_nodes
    }

    /// Match the live screen against historical workflows of `app` and keep
    /// the predicted nodes for the next [`execute`](Self::execute). Returns
    /// the context text for the oracle, empty when nothing was predicted.
    pub fn prepare(&mut self, memory: &WorkflowMemory, app: &str, live: &[UiElement]) -> String {
        self.future_nodes.clear();
        self.state = SpeculationState::Idle;

        let relevant = find_relevant_workflows(memory, app);
        if relevant.is_empty() {
            debug!(app, "no relevant workflows");
            return String::new();
        }
        let Some(best) = find_current_node_matches(memory, live, &relevant) else {
            debug!(app, workflows = relevant.len(), "live screen matches no recorded node");
            return String::new();
        };

        self.future_nodes = predict_future_nodes(memory, &best);
        info!(
            app,
            workflow_id = %best.workflow_id,
            similarity = best.similarity,
            predicted = self.future_nodes.len(),
            "speculative context prepared"
        );
        format_context(&self.future_nodes)
    }

    /// Execute `prediction[i]` for each prepared node `i` in order.
    ///
    /// Only capturing the initial observation can fail; everything after it
    /// ends the run with an [`AbortReason`]. Prepared nodes are consumed.
    pub async fn execute(
        &mut self,
        prediction: &[PredictedStep],
        mut recording: Option<RecordingContext<'_>>,
        context: &mut SharedContext,
        initial: Option<Observation>,
    ) -> Result<SpeculationOutcome> {
        let nodes = std::mem::take(&mut self.future_nodes);
        if nodes.is_empty() || prediction.is_empty() {
            self.state = SpeculationState::Idle;
            return Ok(SpeculationOutcome {
                observation: initial,
                executed: 0,
                state: SpeculationState::Idle,
                abort_reason: None,
                finished: false,
            });
        }

        let mut current = match initial {
            Some(o) => o,
            None => observe(self.device.as_ref(), self.extractor.as_ref()).await?,
        };
        let mut executed = 0;
        let mut pending_closed = false;
        let mut abort_reason = None;
        let mut finished = false;

        for (i, node) in nodes.into_iter().enumerate() {
            let Some(step) = prediction.get(i) else {
                break;
            };
            let step_result = self
                .run_node(i, node, step, &current, &mut recording, context, &mut pending_closed)
                .await;
            match step_result {
                NodeStep::Advanced(after) => {
                    executed += 1;
                    current = after;
                }
                NodeStep::Skipped => {}
                NodeStep::Finished(after) => {
                    if let Some(after) = after {
                        executed += 1;
                        current = after;
                    }
                    finished = true;
                    break;
                }
                NodeStep::Aborted(reason, after) => {
                    if let Some(after) = after {
                        executed += 1;
                        current = after;
                    }
                    abort_reason = Some(reason);
                    break;
                }
            }
        }

        self.state = if abort_reason.is_some() {
            SpeculationState::Aborted
        } else {
            SpeculationState::Completed
        };
        info!(executed, state = ?self.state, finished, "speculation finished");
        Ok(SpeculationOutcome {
            observation: Some(current),
            executed,
            state: self.state,
            abort_reason,
            finished,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_node(
        &mut self,
        i: usize,
        mut node: SpeculativeNode,
        step: &PredictedStep,
        current: &Observation,
        recording: &mut Option<RecordingContext<'_>>,
        context: &mut SharedContext,
        pending_closed: &mut bool,
    ) -> NodeStep {
        let template = step.template.as_str();

        self.state = SpeculationState::Checking;
        let score = similarity(&current.elements, &node.elements);
        if score <= ELEMENTS_MATCH_THRESHOLD {
            debug!(template, node_index = i, similarity = score, "live screen diverged from prediction");
            return NodeStep::Aborted(AbortReason::MatchMiss { node_index: i, similarity: score }, None);
        }

        if !*pending_closed {
            *pending_closed = true;
            if let Some(rec) = recording.as_mut() {
                if rec.recorder.has_pending_transition() {
                    if let Err(reason) = self.close_pending(i, rec, current).await {
                        return self.abort(reason, template, i, score, None);
                    }
                }
            }
        }

        self.state = SpeculationState::Resolving;
        node.assign_ids(i);
        if is_finish_sentinel(template) {
            info!(node_index = i, "predicted step is finish");
            return NodeStep::Finished(None);
        }
        let resolved = match self.resolver.resolve(template, &node, &current.elements) {
            Ok(Some(r)) => r,
            Ok(None) => {
                return self.abort(AbortReason::Unresolved { node_index: i }, template, i, score, None);
            }
            Err(e) => {
                let reason = AbortReason::Parse {
                    node_index: i,
                    message: e.to_string(),
                };
                return self.abort(reason, template, i, score, None);
            }
        };
        let ResolvedAction { action, identity } = resolved;
        if action.is_finish() {
            info!(node_index = i, "predicted step is finish");
            return NodeStep::Finished(None);
        }
        if action.element().is_some() && identity.is_none() {
            return self.abort(AbortReason::MissingIdentity { node_index: i }, template, i, score, None);
        }

        let anchor_from = match recording.as_mut() {
            Some(rec) => match anchor_node(rec) {
                Some(from) => Some(from),
                None => {
                    warn!(template, node_index = i, "workflow has no recorded node to extend, skipping step");
                    return NodeStep::Skipped;
                }
            },
            None => None,
        };
        let work = WorkAction::from_action(&action, step.description.clone(), identity);

        self.state = SpeculationState::Executing;
        debug!(template, node_index = i, similarity = score, action = %action.describe(), "executing speculative action");
        let outcome = match self
            .device
            .execute_action(&action, current.screenshot.width, current.screenshot.height)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                let reason = AbortReason::ExecutionFailed {
                    node_index: i,
                    message: e.to_string(),
                };
                return self.abort(reason, template, i, score, None);
            }
        };

        // the edge only exists once the device has actually run the action
        self.state = SpeculationState::Recording;
        let anchor = match (recording.as_mut(), anchor_from) {
            (Some(rec), Some(from)) => match rec.memory.add_action(&from, work.clone()) {
                Ok(index) => {
                    rec.recorder.on_action_executed(&from, work, Some(index), outcome.success);
                    Some(Anchor { from, index })
                }
                Err(e) => {
                    let reason = AbortReason::Recording {
                        node_index: i,
                        message: e.to_string(),
                    };
                    return self.abort(reason, template, i, score, None);
                }
            },
            _ => None,
        };

        let after = match observe(self.device.as_ref(), self.extractor.as_ref()).await {
            Ok(o) => o,
            Err(e) => {
                let reason = AbortReason::Device {
                    node_index: i,
                    message: e.to_string(),
                };
                return self.abort(reason, template, i, score, None);
            }
        };

        if let Some(rec) = recording.as_mut() {
            if anchor.is_some() {
                if let Err(reason) = self.close_pending(i, rec, &after).await {
                    return self.abort(reason, template, i, score, Some(after));
                }
            }
        }

        if let Some(reflector) = &self.reflector {
            if let Some(result) = reflector.reflect(action.kind(), &step.description, current, &after).await {
                match (recording.as_mut(), anchor.as_ref()) {
                    (Some(rec), Some(anchor)) => {
                        if let Err(e) = reflection::attach_reflection(
                            rec.memory,
                            context,
                            &anchor.from,
                            anchor.index,
                            &step.description,
                            result,
                        ) {
                            warn!(template, node_index = i, error = %e, "could not attach reflection");
                        }
                    }
                    _ => context.add_reflection(action.kind().as_str(), &step.description, &result),
                }
            }
        }

        context.add_history_entry("", step.description.clone(), template, outcome.success);

        if !outcome.success {
            return self.abort(AbortReason::ActionFailed { node_index: i }, template, i, score, Some(after));
        }
        if outcome.should_finish {
            info!(node_index = i, "device reported task finished");
            return NodeStep::Finished(Some(after));
        }
        NodeStep::Advanced(after)
    }

    /// Create the node for `observation` and close the recorder's pending
    /// transition with it.
    async fn close_pending(
        &self,
        i: usize,
        rec: &mut RecordingContext<'_>,
        observation: &Observation,
    ) -> std::result::Result<NodeId, AbortReason> {
        let app = self.device.current_app().await.map_err(|e| AbortReason::Device {
            node_index: i,
            message: e.to_string(),
        })?;
        let node_id = rec
            .memory
            .graph_or_insert(&app)
            .create_node(UiSnapshot::new(observation.elements.clone()));
        rec.recorder
            .on_new_node(rec.memory, &node_id)
            .map_err(|e: EngineError| AbortReason::Recording {
                node_index: i,
                message: e.to_string(),
            })?;
        Ok(node_id)
    }

    fn abort(
        &mut self,
        reason: AbortReason,
        template: &str,
        node_index: usize,
        similarity: f64,
        after: Option<Observation>,
    ) -> NodeStep {
        self.state = SpeculationState::Aborted;
        warn!(template, node_index, similarity, reason = ?reason, "speculation aborted");
        NodeStep::Aborted(reason, after)
    }
}

/// Node the session workflow currently ends at. `None` when the workflow has
/// nothing to extend.
fn anchor_node(rec: &RecordingContext<'_>) -> Option<NodeId> {
    let from = rec.recorder.last_node_id(rec.memory)?;
    rec.memory.find_node(from).map(|node| node.id.clone())
}
