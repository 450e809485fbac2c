//! Bookkeeping between the step loop and the memory.
//!
//! A step is recorded in two halves: `on_action_executed` remembers where an
//! action started, and the next `on_new_node` closes it with the state the
//! action led to. Between the two the recorder has a pending transition.

use tracing::{debug, info};

use crate::error::Result;
use crate::graph::{NodeId, WorkAction};
use crate::memory::WorkflowMemory;
use crate::workflow::WorkTransition;

#[derive(Debug, Clone)]
struct PendingTransition {
    from_node_id: NodeId,
    action: WorkAction,
    action_index: Option<usize>,
    success: bool,
}

#[derive(Debug)]
pub struct WorkflowRecorder {
    task: String,
    root_workflow_id: String,
    workflow_id: String,
    completed: Vec<String>,
    pending: Option<PendingTransition>,
    current_tag: String,
    sub_counter: u32,
}

impl WorkflowRecorder {
    /// Create a session workflow for `task` and start recording into it.
    pub fn start(memory: &mut WorkflowMemory, task: &str) -> Self {
        let workflow_id = memory.create_workflow(task);
        info!(workflow_id = %workflow_id, task, "recording started");
        Self {
            task: task.to_string(),
            root_workflow_id: workflow_id.clone(),
            workflow_id,
            completed: Vec::new(),
            pending: None,
            current_tag: String::new(),
            sub_counter: 1,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn current_workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn current_tag(&self) -> &str {
        &self.current_tag
    }

    pub fn has_pending_transition(&self) -> bool {
        self.pending.is_some()
    }

    /// Node the current workflow ends at.
    pub fn last_node_id<'m>(&self, memory: &'m WorkflowMemory) -> Option<&'m str> {
        memory
            .workflow(&self.workflow_id)
            .and_then(|wf| wf.last_node_id())
    }

    pub fn on_action_executed(
        &mut self,
        from_node_id: &str,
        action: WorkAction,
        action_index: Option<usize>,
        success: bool,
    ) {
        self.pending = Some(PendingTransition {
            from_node_id: from_node_id.to_string(),
            action,
            action_index,
            success,
        });
    }

    /// Close the pending transition, if any, at `node_id`. The pending state
    /// is cleared even when the transition is rejected.
    pub fn on_new_node(&mut self, memory: &mut WorkflowMemory, node_id: &str) -> Result<()> {
        memory.annotate_node(node_id, &self.task, &self.current_tag);
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        debug!(
            workflow_id = %self.workflow_id,
            from = %pending.from_node_id,
            to = node_id,
            success = pending.success,
            "closing transition"
        );
        memory.add_transition(
            &self.workflow_id,
            WorkTransition {
                from_node_id: pending.from_node_id,
                to_node_id: node_id.to_string(),
                action: pending.action,
                action_index: pending.action_index,
                success: pending.success,
            },
        )
    }

    /// Label the current workflow. A tag different from the current one
    /// completes the workflow and continues in a new sub-workflow.
    pub fn set_tag(&mut self, memory: &mut WorkflowMemory, tag: &str) -> Result<()> {
        let tag = tag.trim();
        if tag.is_empty() || tag == self.current_tag {
            return Ok(());
        }

        if self.current_tag.is_empty() {
            self.current_tag = tag.to_string();
            if let Some(wf) = memory.workflow_mut(&self.workflow_id) {
                wf.tag = tag.to_string();
            }
            return Ok(());
        }

        self.complete_current(memory);
        let sub_id = format!("{}_sub_{}", self.root_workflow_id, self.sub_counter);
        self.sub_counter += 1;
        memory.create_workflow_with_id(&sub_id, &self.task)?;
        if let Some(wf) = memory.workflow_mut(&sub_id) {
            wf.tag = tag.to_string();
        }
        info!(workflow_id = %sub_id, tag, "started sub-workflow");
        self.workflow_id = sub_id;
        self.current_tag = tag.to_string();
        Ok(())
    }

    /// Drop any half-recorded step and complete the current workflow.
    pub fn flush(&mut self, memory: &WorkflowMemory) {
        self.pending = None;
        self.complete_current(memory);
    }

    /// Completed workflows followed by the current one when it is tagged.
    pub fn all_workflows(&self, memory: &WorkflowMemory) -> Vec<String> {
        let mut ids = self.completed.clone();
        let current_tagged = memory
            .workflow(&self.workflow_id)
            .map(|wf| !wf.tag.is_empty())
            .unwrap_or(false);
        if current_tagged && !ids.contains(&self.workflow_id) {
            ids.push(self.workflow_id.clone());
        }
        ids
    }

    fn complete_current(&mut self, memory: &WorkflowMemory) {
        let Some(wf) = memory.workflow(&self.workflow_id) else {
            return;
        };
        if wf.tag.is_empty() || wf.is_empty() || self.completed.contains(&wf.id) {
            return;
        }
        info!(workflow_id = %wf.id, tag = %wf.tag, transitions = wf.len(), "workflow completed");
        self.completed.push(wf.id.clone());
    }
}
