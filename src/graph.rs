//! Per-application graph of UI states.
//!
//! Nodes live in an arena keyed by id; each node owns its outgoing actions as
//! an adjacency list. Edges point at destinations only through workflow
//! transitions, so there is no cyclic ownership to manage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::action::{Action, ActionKind, SwipeDirection, SwipeDistance};
use crate::controller::reflection::ReflectionResult;
use crate::error::{EngineError, Result};
use crate::ui::{UiElement, UiSnapshot};

pub type NodeId = String;

/// One outgoing edge of a [`WorkNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAction {
    pub kind: ActionKind,
    #[serde(default)]
    pub description: String,
    /// Identity string of the element acted on, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<SwipeDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<SwipeDistance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<ReflectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

impl WorkAction {
    pub fn new(kind: ActionKind, description: impl Into<String>, target: Option<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            target,
            text: None,
            direction: None,
            distance: None,
            reflection: None,
            confidence_score: None,
        }
    }

    /// Build the stored form of an executed action. Only `Type` keeps its
    /// text and only `Swipe` keeps direction and distance.
    pub fn from_action(action: &Action, description: impl Into<String>, target: Option<String>) -> Self {
        let mut work = Self::new(action.kind(), description, target);
        match action {
            Action::Type { text, .. } => work.text = Some(text.clone()),
            Action::Swipe { direction, distance, .. } => {
                work.direction = Some(*direction);
                work.distance = Some(*distance);
            }
            _ => {}
        }
        work
    }

    pub fn skill(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(ActionKind::Skill, description, Some(name.into()))
    }

    /// Replaces any earlier result; an action keeps at most one.
    pub fn attach_reflection(&mut self, result: ReflectionResult) {
        self.confidence_score = Some(result.confidence);
        self.reflection = Some(result);
    }

    fn same_edge(&self, other: &WorkAction) -> bool {
        self.kind == other.kind
            && self.target == other.target
            && self.text == other.text
            && self.direction == other.direction
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkNode {
    pub id: NodeId,
    pub app: String,
    snapshot: UiSnapshot,
    #[serde(default)]
    fingerprint: String,
    #[serde(default)]
    pub actions: Vec<WorkAction>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkNode {
    fn new(app: &str, snapshot: UiSnapshot) -> Self {
        let fingerprint = snapshot.fingerprint();
        Self {
            id: Uuid::new_v4().to_string(),
            app: app.to_string(),
            snapshot,
            fingerprint,
            actions: Vec::new(),
            tasks: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> &UiSnapshot {
        &self.snapshot
    }

    pub fn elements(&self) -> &[UiElement] {
        &self.snapshot.elements
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn add_task(&mut self, task: &str) {
        if !task.is_empty() && !self.tasks.iter().any(|t| t == task) {
            self.tasks.push(task.to_string());
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Files written before fingerprints existed carry an empty one.
    fn ensure_fingerprint(&mut self) {
        if self.fingerprint.is_empty() {
            self.fingerprint = self.snapshot.fingerprint();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkGraph {
    pub app: String,
    #[serde(default)]
    nodes: BTreeMap<NodeId, WorkNode>,
}

impl WorkGraph {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkNode> {
        self.nodes.get(node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut WorkNode> {
        self.nodes.get_mut(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkNode> {
        self.nodes.values()
    }

    /// Return the id of the node holding this UI state, creating it if the
    /// state has not been seen before.
    pub fn create_node(&mut self, snapshot: UiSnapshot) -> NodeId {
        let fingerprint = snapshot.fingerprint();
        if let Some(existing) = self
            .nodes
            .values()
            .find(|n| n.fingerprint == fingerprint && n.snapshot.same_state(&snapshot))
        {
            debug!(node_id = %existing.id, app = %self.app, "reusing existing node");
            return existing.id.clone();
        }

        let node = WorkNode::new(&self.app, snapshot);
        let id = node.id.clone();
        debug!(node_id = %id, app = %self.app, elements = node.snapshot.len(), "created node");
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Add an outgoing action, returning its index. An equal edge that is
    /// already present is reused.
    pub fn add_action(&mut self, node_id: &str, action: WorkAction) -> Result<usize> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| EngineError::Recording(format!("unknown node {}", node_id)))?;
        if let Some(idx) = node.actions.iter().position(|a| a.same_edge(&action)) {
            return Ok(idx);
        }
        node.actions.push(action);
        Ok(node.actions.len() - 1)
    }

    pub fn attach_reflection(&mut self, node_id: &str, action_index: usize, result: ReflectionResult) -> Result<()> {
        let action = self
            .nodes
            .get_mut(node_id)
            .and_then(|n| n.actions.get_mut(action_index))
            .ok_or_else(|| {
                EngineError::Recording(format!("no action {} on node {}", action_index, node_id))
            })?;
        action.attach_reflection(result);
        Ok(())
    }

    /// Insert nodes from `other` whose ids are not present yet.
    pub fn merge(&mut self, other: WorkGraph) {
        for (id, node) in other.nodes {
            self.nodes.entry(id).or_insert(node);
        }
    }

    /// Keep only nodes seen under `tag`.
    pub(crate) fn retain_tag(&mut self, tag: &str) {
        self.nodes.retain(|_, n| n.tags.iter().any(|t| t == tag));
    }

    pub(crate) fn normalize_after_load(&mut self) {
        let app = self.app.clone();
        for (id, node) in self.nodes.iter_mut() {
            node.id = id.clone();
            node.app = app.clone();
            node.ensure_fingerprint();
        }
    }
}
