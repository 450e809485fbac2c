//! Did an executed action do what it was meant to?
//!
//! An obvious screen change after a plain action is accepted on the spot.
//! Anything less clear goes to the oracle. Reflection never fails: problems
//! turn into an indeterminate result.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::action::ActionKind;
use crate::context::SharedContext;
use crate::device::Observation;
use crate::error::Result;
use crate::matcher::similarity;
use crate::memory::WorkflowMemory;
use crate::oracle::Oracle;
use crate::prompts;
use crate::ui::{content_set, UiElement};

const FAST_PATH_CONFIDENCE: f64 = 0.9;
const OBVIOUS_CHANGE_MAX_SIMILARITY: f64 = 0.5;
const DEFAULT_CONFIDENCE: f64 = 0.5;

static FENCED_JSON: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionResult {
    /// `None` when the outcome is unclear or only partly achieved.
    pub success: Option<bool>,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub suggestions: String,
    pub timestamp: DateTime<Utc>,
}

impl ReflectionResult {
    pub fn indeterminate(rationale: impl Into<String>) -> Self {
        Self {
            success: None,
            confidence: 0.0,
            rationale: rationale.into(),
            changes: Vec::new(),
            suggestions: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Contents that appeared or vanished between two screens.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReport {
    pub appeared: Vec<String>,
    pub disappeared: Vec<String>,
    pub similarity: f64,
}

impl ChangeReport {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }

    /// Something changed and the screens share at most half their content.
    pub fn is_obvious(&self) -> bool {
        !self.is_empty() && self.similarity <= OBVIOUS_CHANGE_MAX_SIMILARITY
    }

    pub fn describe(&self) -> Vec<String> {
        self.appeared
            .iter()
            .map(|c| format!("appeared: {}", c))
            .chain(self.disappeared.iter().map(|c| format!("disappeared: {}", c)))
            .collect()
    }
}

pub fn detect_changes(before: &[UiElement], after: &[UiElement]) -> ChangeReport {
    let b: HashSet<&str> = content_set(before);
    let a: HashSet<&str> = content_set(after);
    let mut appeared: Vec<String> = a.difference(&b).map(|s| s.to_string()).collect();
    let mut disappeared: Vec<String> = b.difference(&a).map(|s| s.to_string()).collect();
    appeared.sort();
    disappeared.sort();
    ChangeReport {
        appeared,
        disappeared,
        similarity: similarity(before, after),
    }
}

pub struct Reflector {
    enabled: bool,
    oracle: Option<Arc<dyn Oracle>>,
}

impl Reflector {
    pub fn new(enabled: bool, oracle: Option<Arc<dyn Oracle>>) -> Self {
        Self { enabled, oracle }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, oracle: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Judge one executed action. `None` only when reflection is switched off.
    pub async fn reflect(
        &self,
        kind: ActionKind,
        description: &str,
        before: &Observation,
        after: &Observation,
    ) -> Option<ReflectionResult> {
        if !self.enabled {
            return None;
        }

        let report = detect_changes(&before.elements, &after.elements);
        if kind != ActionKind::Skill && report.is_obvious() {
            debug!(action = kind.as_str(), similarity = report.similarity, "reflection fast path");
            return Some(ReflectionResult {
                success: Some(true),
                confidence: FAST_PATH_CONFIDENCE,
                rationale: "UI changed clearly after the action".to_string(),
                changes: report.describe(),
                suggestions: String::new(),
                timestamp: Utc::now(),
            });
        }

        let Some(oracle) = &self.oracle else {
            return Some(ReflectionResult::indeterminate("no oracle available for reflection"));
        };

        let changes = report.describe();
        let prompt = prompts::reflection_prompt(&format!("{} ({})", kind.as_str(), description), &changes);
        match oracle.judge(&prompt, &before.screenshot, &after.screenshot).await {
            Ok(raw) => Some(parse_judgment(&raw, changes)),
            Err(e) => {
                warn!(error = %e, action = kind.as_str(), "reflection oracle call failed");
                Some(ReflectionResult::indeterminate(format!("oracle error: {}", e)))
            }
        }
    }
}

/// Store a reflection on the action it judged and surface it in the context.
pub fn attach_reflection(
    memory: &mut WorkflowMemory,
    context: &mut SharedContext,
    node_id: &str,
    action_index: usize,
    description: &str,
    result: ReflectionResult,
) -> Result<()> {
    let kind = memory
        .find_node(node_id)
        .and_then(|n| n.actions.get(action_index))
        .map(|a| a.kind.as_str())
        .unwrap_or("Unknown");
    context.add_reflection(kind, description, &result);
    memory.attach_reflection(node_id, action_index, result)
}

/// Turn the oracle's reply into a result. Unusable replies are indeterminate
/// with zero confidence.
pub fn parse_judgment(raw: &str, changes: Vec<String>) -> ReflectionResult {
    let Some(json) = extract_json(raw) else {
        return with_changes(ReflectionResult::indeterminate("unparseable reflection response"), changes);
    };

    let verdict = json
        .get("execution_result")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase());
    let success = match verdict.as_deref() {
        Some("success") => Some(true),
        Some("partial_success") | Some("partial") => None,
        Some("failure") | Some("failed") => Some(false),
        _ => {
            return with_changes(ReflectionResult::indeterminate("missing execution_result"), changes);
        }
    };

    let confidence = match json.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(DEFAULT_CONFIDENCE),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_CONFIDENCE),
        _ => DEFAULT_CONFIDENCE,
    }
    .clamp(0.0, 1.0);

    let rationale = json
        .get("reasoning")
        .or_else(|| json.get("reflection_reasoning"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let suggestions = match json.get("improvement_suggestions") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    };

    ReflectionResult {
        success,
        confidence,
        rationale,
        changes,
        suggestions,
        timestamp: Utc::now(),
    }
}

fn with_changes(mut result: ReflectionResult, changes: Vec<String>) -> ReflectionResult {
    result.changes = changes;
    result
}

fn extract_json(raw: &str) -> Option<Value> {
    if let Some(re) = FENCED_JSON.as_ref() {
        if let Some(body) = re.captures(raw).and_then(|c| c.get(1)) {
            if let Ok(v) = serde_json::from_str::<Value>(body.as_str()) {
                return Some(v);
            }
        }
    }
    let candidate = first_balanced_object(raw)?;
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
