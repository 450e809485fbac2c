//! Projection of the next one or two recorded states after a match.

use crate::config::MAX_SPECULATIVE_NODES;
use crate::graph::{NodeId, WorkAction};
use crate::matcher::NodeMatch;
use crate::memory::WorkflowMemory;
use crate::ui::UiElement;

/// A recorded state expected to come up, valid for one speculative attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeNode {
    pub node_id: NodeId,
    pub elements: Vec<UiElement>,
    pub source_workflow: String,
    /// Action recorded from this state in the source workflow.
    pub transition_action: WorkAction,
    /// Symbolic ids parallel to `elements`, empty until assigned.
    pub ids: Vec<String>,
}

impl SpeculativeNode {
    /// `B1, B2, ...` for the first predicted node, `C1, C2, ...` after that.
    pub fn id_prefix(index: usize) -> &'static str {
        if index == 0 {
            "B"
        } else {
            "C"
        }
    }

    pub fn assign_ids(&mut self, index: usize) {
        let prefix = Self::id_prefix(index);
        self.ids = (1..=self.elements.len())
            .map(|j| format!("{}{}", prefix, j))
            .collect();
    }

    pub fn element_by_id(&self, id: &str) -> Option<&UiElement> {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .and_then(|idx| self.elements.get(idx))
    }
}

pub fn predict_future_nodes(memory: &WorkflowMemory, best: &NodeMatch) -> Vec<SpeculativeNode> {
    let Some(workflow) = memory.workflow(&best.workflow_id) else {
        return Vec::new();
    };
    let path = workflow.path();

    (1..=MAX_SPECULATIVE_NODES)
        .filter_map(|offset| path.get(best.position + offset))
        .filter_map(|t| {
            memory.find_node(&t.from_node_id).map(|node| SpeculativeNode {
                node_id: node.id.clone(),
                elements: node.elements().to_vec(),
                source_workflow: workflow.id.clone(),
                transition_action: t.action.clone(),
                ids: Vec::new(),
            })
        })
        .take(MAX_SPECULATIVE_NODES)
        .collect()
}

/// Text block describing the predicted states, empty when there are none.
pub fn format_context(nodes: &[SpeculativeNode]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for (i, node) in nodes.iter().take(MAX_SPECULATIVE_NODES).enumerate() {
        let header = if i == 0 {
            "--- NEXT UI STATE (after current action) ---"
        } else {
            "--- UI STATE AFTER NEXT (two steps ahead) ---"
        };
        lines.push(header.to_string());
        lines.push("Key UI Elements:".to_string());
        let prefix = SpeculativeNode::id_prefix(i);
        for (j, element) in node.elements.iter().enumerate() {
            if let Some(content) = element.trimmed_content() {
                lines.push(format!("  {}{}: {}", prefix, j + 1, content));
            }
        }
    }
    lines.join("\n")
}
