use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::{NodeId, WorkAction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkTransition {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub action: WorkAction,
    /// Position of `action` in the from-node's adjacency list, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_index: Option<usize>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

/// Loaded from disk, or recorded during the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOrigin {
    #[default]
    Historical,
    Session,
}

/// Ordered transitions recorded for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub task: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub step: u32,
    #[serde(default)]
    pub timecost: f64,
    #[serde(skip)]
    pub origin: WorkflowOrigin,
    #[serde(default)]
    path: Vec<WorkTransition>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, task: impl Into<String>, origin: WorkflowOrigin) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            tag: String::new(),
            step: 0,
            timecost: 0.0,
            origin,
            path: Vec::new(),
        }
    }

    pub fn path(&self) -> &[WorkTransition] {
        &self.path
    }

    pub(crate) fn path_mut(&mut self) -> &mut [WorkTransition] {
        &mut self.path
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn is_historical(&self) -> bool {
        self.origin == WorkflowOrigin::Historical
    }

    pub fn start_id(&self) -> Option<&str> {
        self.path.first().map(|t| t.from_node_id.as_str())
    }

    pub fn last_node_id(&self) -> Option<&str> {
        self.path.last().map(|t| t.to_node_id.as_str())
    }

    /// Append a transition. It must start where the workflow currently ends.
    pub fn add_transition(&mut self, transition: WorkTransition) -> Result<()> {
        if let Some(last) = self.last_node_id() {
            if last != transition.from_node_id {
                return Err(EngineError::Recording(format!(
                    "transition {} -> {} does not extend workflow {} (last node {})",
                    transition.from_node_id, transition.to_node_id, self.id, last
                )));
            }
        }
        self.path.push(transition);
        self.step = self.path.len() as u32;
        Ok(())
    }
}
