//! Shared fakes for the integration tests.
//!
//! `FakePhone` plays back a fixed sequence of screens: every observation pops
//! the next one until a single screen is left, which then repeats.

#![allow(dead_code)]

use action_memory::action::{Action, ActionKind};
use action_memory::device::{Device, ElementExtractor, ExecutionOutcome, Observation, Screenshot};
use action_memory::oracle::{ChatMessage, Oracle, OracleDecision};
use action_memory::workflow::WorkflowOrigin;
use action_memory::{BBox, UiElement, UiSnapshot, WorkAction, WorkTransition, Workflow, WorkflowMemory};
use async_trait::async_trait;
use std::sync::Mutex;

pub const APP: &str = "Settings";

pub const HOME: &[&str] = &["Network", "Display", "Sound", "About phone"];
pub const NETWORK: &[&str] = &["Wi-Fi", "Mobile data", "Airplane mode", "Hotspot"];
pub const WIFI: &[&str] = &["Use Wi-Fi", "Saved networks", "Add network", "Preferences"];
pub const ADD_NETWORK: &[&str] = &["Network name", "Security", "Save", "Cancel"];

/// Elements stacked 100px apart, each 200px wide.
pub fn screen(contents: &[&str]) -> Vec<UiElement> {
    contents
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let top = i as i32 * 100;
            UiElement::new(*c, BBox::new(0, top, 200, top + 100))
        })
        .collect()
}

pub fn observation(contents: &[&str]) -> Observation {
    Observation {
        screenshot: Screenshot::from_bytes(b"png", 1080, 2400),
        elements: screen(contents),
    }
}

pub struct FakePhone {
    app: String,
    screens: Mutex<Vec<Vec<UiElement>>>,
    outcome: Mutex<ExecutionOutcome>,
    fail_execution: bool,
    executed: Mutex<Vec<Action>>,
}

impl FakePhone {
    pub fn new(screens: &[&[&str]]) -> Self {
        Self {
            app: APP.to_string(),
            screens: Mutex::new(screens.iter().map(|s| screen(s)).collect()),
            outcome: Mutex::new(ExecutionOutcome::ok()),
            fail_execution: false,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Every `execute_action` call errors out.
    pub fn broken(screens: &[&[&str]]) -> Self {
        Self {
            fail_execution: true,
            ..Self::new(screens)
        }
    }

    pub fn set_outcome(&self, outcome: ExecutionOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn executed(&self) -> Vec<Action> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Device for FakePhone {
    async fn capture_screenshot(&self) -> anyhow::Result<Screenshot> {
        Ok(Screenshot::from_bytes(b"png", 1080, 2400))
    }

    async fn current_app(&self) -> anyhow::Result<String> {
        Ok(self.app.clone())
    }

    async fn execute_action(&self, action: &Action, _width: u32, _height: u32) -> anyhow::Result<ExecutionOutcome> {
        if self.fail_execution {
            anyhow::bail!("adb: device offline");
        }
        self.executed.lock().unwrap().push(action.clone());
        Ok(self.outcome.lock().unwrap().clone())
    }
}

#[async_trait]
impl ElementExtractor for FakePhone {
    async fn extract_elements(&self, _screenshot: &Screenshot) -> anyhow::Result<Vec<UiElement>> {
        let mut screens = self.screens.lock().unwrap();
        match screens.len() {
            0 => Ok(Vec::new()),
            1 => Ok(screens[0].clone()),
            _ => Ok(screens.remove(0)),
        }
    }
}

/// Oracle that answers every judgment with the same text.
pub struct CannedOracle {
    verdict: String,
    judged: Mutex<usize>,
}

impl CannedOracle {
    pub fn new(verdict: &str) -> Self {
        Self {
            verdict: verdict.to_string(),
            judged: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.judged.lock().unwrap()
    }
}

#[async_trait]
impl Oracle for CannedOracle {
    async fn plan(&self, _messages: &[ChatMessage]) -> anyhow::Result<OracleDecision> {
        anyhow::bail!("planning is not scripted")
    }

    async fn judge(&self, _prompt: &str, _before: &Screenshot, _after: &Screenshot) -> anyhow::Result<String> {
        *self.judged.lock().unwrap() += 1;
        Ok(self.verdict.clone())
    }
}

/// Record `screens` as one historical workflow of [`APP`], tapping through
/// them in order. Returns the node ids in screen order.
pub fn record_history(memory: &mut WorkflowMemory, id: &str, tag: &str, screens: &[&[&str]]) -> Vec<String> {
    let node_ids: Vec<String> = screens
        .iter()
        .map(|s| memory.graph_or_insert(APP).create_node(UiSnapshot::new(screen(s))))
        .collect();
    for node_id in &node_ids {
        memory.annotate_node(node_id, "connect to wifi", tag);
    }

    let mut workflow = Workflow::new(id, "connect to wifi", WorkflowOrigin::Historical);
    workflow.tag = tag.to_string();
    for (i, pair) in node_ids.windows(2).enumerate() {
        let action = WorkAction::new(ActionKind::Tap, format!("step {}", i + 1), None);
        let index = memory.add_action(&pair[0], action.clone()).unwrap();
        workflow
            .add_transition(WorkTransition {
                from_node_id: pair[0].clone(),
                to_node_id: pair[1].clone(),
                action,
                action_index: Some(index),
                success: true,
            })
            .unwrap();
    }
    assert!(memory.insert_workflow(workflow));
    node_ids
}
