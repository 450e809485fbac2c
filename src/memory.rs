//! Workflow memory: every app's [`WorkGraph`] plus the recorded workflows.
//!
//! One instance belongs to one session and is passed explicitly to whatever
//! mutates it. Saving and loading are optional; nothing inside the session
//! depends on the on-disk layout.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::reflection::ReflectionResult;
use crate::error::{EngineError, Result};
use crate::graph::{WorkAction, WorkGraph, WorkNode};
use crate::workflow::{WorkTransition, Workflow, WorkflowOrigin};

const GRAPH_DIR: &str = "graph";
const WORKFLOW_DIR: &str = "workflow";

#[derive(Debug, Default, Clone)]
pub struct WorkflowMemory {
    graphs: Vec<WorkGraph>,
    workflows: Vec<Workflow>,
}

/// Counts of what `load_from_dir` actually took in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub graphs: usize,
    pub nodes: usize,
    pub workflows: usize,
    pub skipped_workflows: usize,
}

#[derive(Serialize)]
struct MemoryExport<'a> {
    graphs: &'a [WorkGraph],
    workflows: &'a [Workflow],
}

impl WorkflowMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // =====================================================
    // GRAPHS
    // =====================================================

    pub fn graphs(&self) -> &[WorkGraph] {
        &self.graphs
    }

    pub fn graph(&self, app: &str) -> Option<&WorkGraph> {
        self.graphs.iter().find(|g| g.app == app)
    }

    pub fn graph_mut(&mut self, app: &str) -> Option<&mut WorkGraph> {
        self.graphs.iter_mut().find(|g| g.app == app)
    }

    pub fn graph_or_insert(&mut self, app: &str) -> &mut WorkGraph {
        match self.graphs.iter().position(|g| g.app == app) {
            Some(idx) => &mut self.graphs[idx],
            None => {
                debug!(app, "new work graph");
                self.graphs.push(WorkGraph::new(app));
                let last = self.graphs.len() - 1;
                &mut self.graphs[last]
            }
        }
    }

    /// Graph holding `node_id`. Graphs are searched in insertion order and
    /// the first hit wins.
    pub fn graph_of_node(&self, node_id: &str) -> Option<&WorkGraph> {
        self.graphs.iter().find(|g| g.contains(node_id))
    }

    fn graph_of_node_mut(&mut self, node_id: &str) -> Option<&mut WorkGraph> {
        self.graphs.iter_mut().find(|g| g.contains(node_id))
    }

    pub fn find_node(&self, node_id: &str) -> Option<&WorkNode> {
        self.graph_of_node(node_id).and_then(|g| g.node(node_id))
    }

    /// Remember that a node was seen under this task and tag.
    pub fn annotate_node(&mut self, node_id: &str, task: &str, tag: &str) {
        if let Some(node) = self.graph_of_node_mut(node_id).and_then(|g| g.node_mut(node_id)) {
            node.add_task(task);
            node.add_tag(tag);
        }
    }

    /// Add an outgoing action to an existing node, returning its index.
    pub fn add_action(&mut self, node_id: &str, action: WorkAction) -> Result<usize> {
        self.graph_of_node_mut(node_id)
            .ok_or_else(|| EngineError::Recording(format!("unknown node {}", node_id)))?
            .add_action(node_id, action)
    }

    /// Attach a reflection to a node's action and to every transition that
    /// recorded that action.
    pub fn attach_reflection(&mut self, node_id: &str, action_index: usize, result: ReflectionResult) -> Result<()> {
        self.graph_of_node_mut(node_id)
            .ok_or_else(|| EngineError::Recording(format!("unknown node {}", node_id)))?
            .attach_reflection(node_id, action_index, result.clone())?;

        for wf in self.workflows.iter_mut() {
            for t in wf.path_mut() {
                if t.from_node_id == node_id && t.action_index == Some(action_index) {
                    t.action.attach_reflection(result.clone());
                }
            }
        }
        Ok(())
    }

    // =====================================================
    // WORKFLOWS
    // =====================================================

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn historical_workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.iter().filter(|w| w.is_historical())
    }

    /// Start a new session workflow and return its id.
    pub fn create_workflow(&mut self, task: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.workflows
            .push(Workflow::new(id.clone(), task, WorkflowOrigin::Session));
        id
    }

    pub(crate) fn create_workflow_with_id(&mut self, id: &str, task: &str) -> Result<()> {
        if self.workflow(id).is_some() {
            return Err(EngineError::Recording(format!("workflow {} already exists", id)));
        }
        self.workflows
            .push(Workflow::new(id, task, WorkflowOrigin::Session));
        Ok(())
    }

    /// Add an already built workflow. Returns false when the id is taken.
    pub fn insert_workflow(&mut self, workflow: Workflow) -> bool {
        if self.workflow(&workflow.id).is_some() {
            return false;
        }
        self.workflows.push(workflow);
        true
    }

    pub fn find_workflows(&self, task: &str) -> Vec<&Workflow> {
        self.workflows.iter().filter(|w| w.task == task).collect()
    }

    pub fn workflow(&self, id: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.id == id)
    }

    pub fn workflow_mut(&mut self, id: &str) -> Option<&mut Workflow> {
        self.workflows.iter_mut().find(|w| w.id == id)
    }

    /// Append a transition to a workflow. Both endpoints must be known nodes.
    pub fn add_transition(&mut self, workflow_id: &str, transition: WorkTransition) -> Result<()> {
        for id in [&transition.from_node_id, &transition.to_node_id] {
            if self.find_node(id).is_none() {
                return Err(EngineError::Recording(format!("unknown node {}", id)));
            }
        }
        self.workflow_mut(workflow_id)
            .ok_or_else(|| EngineError::Recording(format!("unknown workflow {}", workflow_id)))?
            .add_transition(transition)
    }

    // =====================================================
    // PERSISTENCE
    // =====================================================

    /// Whole memory as a JSON value.
    pub fn export(&self) -> Result<Value> {
        Ok(serde_json::to_value(MemoryExport {
            graphs: &self.graphs,
            workflows: &self.workflows,
        })?)
    }

    /// Write `graph/<app>.json` and `workflow/<tag>.json` under `dir`,
    /// merging with whatever is already there.
    pub fn save_to_dir(&self, dir: &Path) -> Result<()> {
        let graph_dir = dir.join(GRAPH_DIR);
        let workflow_dir = dir.join(WORKFLOW_DIR);
        fs::create_dir_all(&graph_dir)?;
        fs::create_dir_all(&workflow_dir)?;

        for graph in &self.graphs {
            let path = graph_dir.join(graph_file_name(&graph.app));
            let mut merged = graph.clone();
            merged.merge(read_existing_graph(&path, &graph.app));
            fs::write(&path, serde_json::to_string_pretty(&merged)?)?;
            info!(app = %graph.app, nodes = merged.len(), path = %path.display(), "saved work graph");
        }

        for wf in &self.workflows {
            let path = workflow_dir.join(workflow_file_name(&wf.tag));
            let mut existing = read_existing_workflows(&path);
            let already = existing
                .iter()
                .any(|v| v.get("id").and_then(Value::as_str) == Some(wf.id.as_str()));
            if already {
                debug!(workflow_id = %wf.id, "workflow already saved, skipping");
                continue;
            }
            existing.push(serde_json::to_value(wf)?);
            fs::write(&path, serde_json::to_string_pretty(&existing)?)?;
            info!(workflow_id = %wf.id, task = %wf.task, path = %path.display(), "saved workflow");
        }
        Ok(())
    }

    /// Load graphs and workflows saved by [`save_to_dir`](Self::save_to_dir).
    /// Loaded workflows are historical. When `tag_filter` is set only nodes
    /// and workflows carrying that tag are kept.
    pub fn load_from_dir(&mut self, dir: &Path, tag_filter: Option<&str>) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();

        for path in json_files(&dir.join(GRAPH_DIR))? {
            let raw = fs::read_to_string(&path)?;
            let mut graph: WorkGraph = match serde_json::from_str(&raw) {
                Ok(g) => g,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable graph file");
                    continue;
                }
            };
            if self.graph(&graph.app).is_some() {
                debug!(app = %graph.app, "graph already in memory, skipping load");
                continue;
            }
            graph.normalize_after_load();
            if let Some(tag) = tag_filter {
                graph.retain_tag(tag);
            }
            summary.graphs += 1;
            summary.nodes += graph.len();
            self.graphs.push(graph);
        }

        for path in json_files(&dir.join(WORKFLOW_DIR))? {
            let raw = fs::read_to_string(&path)?;
            let entries: Vec<Value> = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable workflow file");
                    continue;
                }
            };
            for entry in entries {
                match self.load_workflow_entry(entry, tag_filter) {
                    Some(true) => summary.workflows += 1,
                    Some(false) => summary.skipped_workflows += 1,
                    None => {}
                }
            }
        }

        info!(
            graphs = summary.graphs,
            nodes = summary.nodes,
            workflows = summary.workflows,
            skipped = summary.skipped_workflows,
            dir = %dir.display(),
            "loaded workflow memory"
        );
        Ok(summary)
    }

    /// `None` when filtered out by tag, otherwise whether it was accepted.
    fn load_workflow_entry(&mut self, entry: Value, tag_filter: Option<&str>) -> Option<bool> {
        let has_ids = entry.get("id").and_then(Value::as_str).is_some()
            && entry.get("task").and_then(Value::as_str).is_some();
        if !has_ids {
            warn!("workflow entry without id or task");
            return Some(false);
        }
        let parsed: Workflow = match serde_json::from_value(entry) {
            Ok(wf) => wf,
            Err(e) => {
                warn!(error = %e, "malformed workflow entry");
                return Some(false);
            }
        };
        if let Some(tag) = tag_filter {
            if parsed.tag != tag {
                return None;
            }
        }
        if self.workflow(&parsed.id).is_some() {
            debug!(workflow_id = %parsed.id, "duplicate workflow id, skipping");
            return Some(false);
        }

        let mut wf = Workflow::new(parsed.id.clone(), parsed.task.clone(), WorkflowOrigin::Historical);
        wf.tag = parsed.tag.clone();
        wf.timecost = parsed.timecost;
        for t in parsed.path() {
            if let Err(e) = wf.add_transition(t.clone()) {
                warn!(workflow_id = %parsed.id, error = %e, "invalid transition chain");
                return Some(false);
            }
        }
        if parsed.step > 0 {
            wf.step = parsed.step;
        }
        self.workflows.push(wf);
        Some(true)
    }
}

fn graph_file_name(app: &str) -> String {
    format!("{}.json", app.replace([' ', '/'], "_"))
}

fn workflow_file_name(tag: &str) -> String {
    let tag = tag.trim();
    if tag.is_empty() {
        "untagged.json".to_string()
    } else {
        format!("{}.json", tag.replace(['.', '/'], "_"))
    }
}

fn read_existing_graph(path: &Path, app: &str) -> WorkGraph {
    let Ok(raw) = fs::read_to_string(path) else {
        return WorkGraph::new(app);
    };
    match serde_json::from_str::<WorkGraph>(&raw) {
        Ok(g) if g.app == app => g,
        Ok(_) => {
            warn!(path = %path.display(), "graph file belongs to another app, resetting");
            WorkGraph::new(app)
        }
        Err(_) => {
            warn!(path = %path.display(), "corrupt graph file, resetting");
            WorkGraph::new(app)
        }
    }
}

fn read_existing_workflows(path: &Path) -> Vec<Value> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(items)) => items,
        _ => {
            warn!(path = %path.display(), "invalid workflow file, resetting");
            Vec::new()
        }
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
