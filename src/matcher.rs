//! Content similarity between a live screen and recorded nodes.

use tracing::debug;

use crate::config::ELEMENTS_MATCH_THRESHOLD;
use crate::graph::NodeId;
use crate::memory::WorkflowMemory;
use crate::ui::{content_set, UiElement};
use crate::workflow::Workflow;

/// Best recorded position for the live screen.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMatch {
    pub node_id: NodeId,
    pub workflow_id: String,
    /// Index of the matching transition in the workflow path.
    pub position: usize,
    pub similarity: f64,
}

/// Jaccard similarity of the trimmed, non-empty contents. Zero when either
/// side has no content at all.
pub fn similarity(current: &[UiElement], stored: &[UiElement]) -> f64 {
    let a = content_set(current);
    let b = content_set(stored);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f64 / union as f64
}

pub fn elements_match(current: &[UiElement], stored: &[UiElement]) -> bool {
    similarity(current, stored) > ELEMENTS_MATCH_THRESHOLD
}

/// Historical workflows with at least one step taken inside `app`.
pub fn find_relevant_workflows<'m>(memory: &'m WorkflowMemory, app: &str) -> Vec<&'m Workflow> {
    memory
        .historical_workflows()
        .filter(|wf| {
            wf.path().iter().any(|t| {
                memory
                    .graph_of_node(&t.from_node_id)
                    .map(|g| g.app == app)
                    .unwrap_or(false)
            })
        })
        .collect()
}

/// Single best (workflow, position) for the live screen. Candidates are
/// visited in workflow order, then path order; on equal scores the first one
/// visited wins.
pub fn find_current_node_matches(
    memory: &WorkflowMemory,
    current: &[UiElement],
    workflows: &[&Workflow],
) -> Option<NodeMatch> {
    let mut candidates: Vec<NodeMatch> = Vec::new();
    for wf in workflows {
        for (position, t) in wf.path().iter().enumerate() {
            let Some(node) = memory.find_node(&t.from_node_id) else {
                continue;
            };
            let score = similarity(current, node.elements());
            if score > ELEMENTS_MATCH_THRESHOLD {
                candidates.push(NodeMatch {
                    node_id: node.id.clone(),
                    workflow_id: wf.id.clone(),
                    position,
                    similarity: score,
                });
            }
        }
    }

    // sort_by is stable: equal scores keep visit order
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    let best = candidates.into_iter().next();
    if let Some(m) = &best {
        debug!(
            workflow_id = %m.workflow_id,
            node_id = %m.node_id,
            position = m.position,
            similarity = m.similarity,
            "best node match"
        );
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::graph::WorkAction;
    use crate::ui::{BBox, UiSnapshot};
    use crate::workflow::{WorkTransition, WorkflowOrigin};

    fn els(items: &[&str]) -> Vec<UiElement> {
        items
            .iter()
            .map(|c| UiElement::new(*c, BBox::new(0, 0, 10, 10)))
            .collect()
    }

    fn historical(mem: &mut WorkflowMemory, id: &str, app: &str, screens: &[&[&str]]) {
        let ids: Vec<String> = screens
            .iter()
            .map(|s| mem.graph_or_insert(app).create_node(UiSnapshot::new(els(s))))
            .collect();
        let mut wf = Workflow::new(id, "task", WorkflowOrigin::Historical);
        for pair in ids.windows(2) {
            wf.add_transition(WorkTransition {
                from_node_id: pair[0].clone(),
                to_node_id: pair[1].clone(),
                action: WorkAction::new(ActionKind::Tap, "tap", None),
                action_index: None,
                success: true,
            })
            .unwrap();
        }
        assert!(mem.insert_workflow(wf));
    }

    #[test]
    fn test_similarity_properties() {
        let a = els(&["Login", "Password"]);
        let b = els(&["Login", "Password", "Remember me"]);
        assert_eq!(similarity(&a, &a), 1.0);
        assert_eq!(similarity(&a, &[]), 0.0);
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
        assert!((similarity(&a, &b) - 2.0 / 3.0).abs() < 1e-9);
        assert!(!elements_match(&a, &b));
        assert!(elements_match(&b, &b));
    }

    #[test]
    fn test_blank_content_is_ignored() {
        let a = els(&["  OK ", "", "   "]);
        let b = els(&["OK"]);
        assert_eq!(similarity(&a, &b), 1.0);
        assert_eq!(similarity(&els(&["", " "]), &b), 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // 7 shared of 10 total is exactly 0.7
        let shared: Vec<String> = (0..7).map(|i| format!("s{}", i)).collect();
        let mut a: Vec<&str> = shared.iter().map(String::as_str).collect();
        let mut b = a.clone();
        a.extend(["a1", "a2"]);
        b.push("b1");
        let (a, b) = (els(&a), els(&b));
        assert!((similarity(&a, &b) - 0.7).abs() < 1e-12);
        assert!(!elements_match(&a, &b));
    }

    #[test]
    fn test_relevant_workflows_filter_by_app() {
        let mut mem = WorkflowMemory::new();
        historical(&mut mem, "wf-settings", "settings", &[&["Wi-Fi"], &["Network"]]);
        historical(&mut mem, "wf-clock", "clock", &[&["Alarm"], &["Timer"]]);
        mem.create_workflow("session only");

        let found = find_relevant_workflows(&mem, "settings");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "wf-settings");
        assert!(find_relevant_workflows(&mem, "maps").is_empty());
    }

    #[test]
    fn test_single_best_match_with_first_wins_ties() {
        let mut mem = WorkflowMemory::new();
        historical(&mut mem, "wf-1", "app", &[&["A", "B", "C"], &["D"], &["E"]]);
        historical(&mut mem, "wf-2", "app", &[&["X"], &["A", "B", "C"], &["F"]]);

        let workflows = find_relevant_workflows(&mem, "app");
        let best = find_current_node_matches(&mem, &els(&["A", "B", "C"]), &workflows).unwrap();
        assert_eq!(best.workflow_id, "wf-1");
        assert_eq!(best.position, 0);
        assert_eq!(best.similarity, 1.0);

        assert!(find_current_node_matches(&mem, &els(&["Z"]), &workflows).is_none());
    }
}
