use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::action::ActionKind;
use crate::controller::reflection::ReflectionResult;
use crate::graph::WorkAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    RepeatedFailure,
    WrongElement,
    TimingIssue,
    InputValidation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPattern {
    pub pattern_type: PatternType,
    pub description: String,
    pub failed_actions: Vec<WorkAction>,
    pub conditions: Vec<String>,
    pub alternatives: Vec<String>,
    pub confidence: f64,
}

/// What the screen looked like when the action failed.
#[derive(Debug, Clone, Default)]
pub struct UiConditions {
    pub element_count: usize,
    pub current_app: String,
}

impl UiConditions {
    fn labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.element_count > 20 {
            labels.push("COMPLEX_UI".to_string());
        } else if self.element_count < 5 {
            labels.push("SIMPLE_UI".to_string());
        }
        if !self.current_app.is_empty() {
            labels.push(format!("APP_{}", self.current_app.to_uppercase()));
        }
        labels
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub total_failures: usize,
    pub detected_patterns: usize,
    pub pattern_types: Vec<PatternType>,
    pub most_failed_actions: Vec<(String, u32)>,
}

const WRONG_ELEMENT_HINTS: &[&str] = &[
    "wrong element",
    "incorrect target",
    "element not found",
    "no response",
    "element not clickable",
    "element disabled",
];

const TIMING_HINTS: &[&str] = &[
    "loading",
    "not ready",
    "still processing",
    "animation",
    "transition",
    "delay needed",
    "too fast",
    "ui not stable",
];

const VALIDATION_HINTS: &[&str] = &[
    "invalid format",
    "validation error",
    "format required",
    "invalid input",
    "text rejected",
    "field validation",
];

/// Learns from failed actions and warns before they are repeated.
#[derive(Debug, Default)]
pub struct ErrorAnalyzer {
    total_failures: usize,
    patterns: BTreeMap<String, ErrorPattern>,
    failure_counts: HashMap<String, u32>,
}

fn signature(action: &WorkAction) -> String {
    format!("{}_{}", action.kind.as_str(), action.target.as_deref().unwrap_or(""))
}

fn same_target(a: &WorkAction, b: &WorkAction) -> bool {
    a.kind == b.kind && a.target == b.target
}

fn mentions(text: &str, hints: &[&str]) -> bool {
    hints.iter().any(|h| text.contains(h))
}

impl ErrorAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a failed action. `recent` is the action history, oldest first.
    pub fn analyze_failure(
        &mut self,
        action: &WorkAction,
        reflection: &ReflectionResult,
        ui: &UiConditions,
        recent: &[WorkAction],
    ) -> Option<ErrorPattern> {
        self.total_failures += 1;
        let recent = &recent[recent.len().saturating_sub(5)..];
        let pattern = Self::detect(action, reflection, ui, recent)?;
        info!(
            pattern = ?pattern.pattern_type,
            action = action.kind.as_str(),
            "failure pattern detected"
        );
        let key = format!("{:?}_{}", pattern.pattern_type, pattern.description);
        self.patterns.insert(key, pattern.clone());
        Some(pattern)
    }

    fn detect(
        action: &WorkAction,
        reflection: &ReflectionResult,
        ui: &UiConditions,
        recent: &[WorkAction],
    ) -> Option<ErrorPattern> {
        let reasoning = reflection.rationale.to_lowercase();

        let last_three = &recent[recent.len().saturating_sub(3)..];
        let repeats = last_three.iter().filter(|a| same_target(a, action)).count();
        if repeats >= 2 {
            let mut failed = vec![action.clone()];
            failed.extend(recent.iter().filter(|a| a.kind == action.kind).cloned());
            return Some(ErrorPattern {
                pattern_type: PatternType::RepeatedFailure,
                description: format!("Repeated {} action failing", action.kind.as_str()),
                failed_actions: failed,
                conditions: ui.labels(),
                alternatives: repeated_failure_alternatives(action.kind),
                confidence: 0.8,
            });
        }

        if mentions(&reasoning, WRONG_ELEMENT_HINTS) {
            return Some(ErrorPattern {
                pattern_type: PatternType::WrongElement,
                description: "Targeting wrong UI element".to_string(),
                failed_actions: vec![action.clone()],
                conditions: ui.labels(),
                alternatives: vec![
                    "Look for elements with similar text or function".to_string(),
                    "Check for buttons or links near the target area".to_string(),
                    "Try elements with keywords related to the task".to_string(),
                    "Look for alternative navigation paths".to_string(),
                ],
                confidence: 0.7,
            });
        }

        if mentions(&reasoning, TIMING_HINTS) {
            return Some(ErrorPattern {
                pattern_type: PatternType::TimingIssue,
                description: "Action executed too early or UI not ready".to_string(),
                failed_actions: vec![action.clone()],
                conditions: vec!["UI_NOT_READY".to_string(), "LOADING_STATE".to_string()],
                alternatives: vec![
                    "Wait for UI to stabilize".to_string(),
                    "Check for loading indicators".to_string(),
                ],
                confidence: 0.6,
            });
        }

        if action.kind == ActionKind::Type && mentions(&reasoning, VALIDATION_HINTS) {
            return Some(ErrorPattern {
                pattern_type: PatternType::InputValidation,
                description: "Input text rejected or invalid format".to_string(),
                failed_actions: vec![action.clone()],
                conditions: ui.labels(),
                alternatives: input_alternatives(action.text.as_deref().unwrap_or("")),
                confidence: 0.75,
            });
        }

        None
    }

    /// Success resets the counter for that exact action.
    pub fn record_action_result(&mut self, action: &WorkAction, success: bool) {
        let count = self.failure_counts.entry(signature(action)).or_insert(0);
        if success {
            *count = 0;
        } else {
            *count += 1;
        }
    }

    /// Warnings for an action that is about to run.
    pub fn prevention_guidance(&self, action: &WorkAction) -> Option<String> {
        let mut parts: Vec<String> = self
            .patterns
            .values()
            .filter(|p| p.failed_actions.first().map(|f| same_target(f, action)).unwrap_or(false))
            .map(|p| {
                let tips: Vec<&str> = p.alternatives.iter().take(2).map(String::as_str).collect();
                format!(
                    "⚠️ Warning: Similar action failed before ({}). Consider: {}",
                    p.description,
                    tips.join("; ")
                )
            })
            .collect();

        let count = self.failure_counts.get(&signature(action)).copied().unwrap_or(0);
        if count >= 2 {
            parts.push(format!(
                "⚠️ This exact action has failed {} times. Consider alternative approach or different element.",
                count
            ));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut pattern_types: Vec<PatternType> = self.patterns.values().map(|p| p.pattern_type).collect();
        pattern_types.sort();
        pattern_types.dedup();

        let mut most_failed: Vec<(String, u32)> = self
            .failure_counts
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(k, c)| (k.clone(), *c))
            .collect();
        most_failed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_failed.truncate(5);

        ErrorSummary {
            total_failures: self.total_failures,
            detected_patterns: self.patterns.len(),
            pattern_types,
            most_failed_actions: most_failed,
        }
    }
}

fn repeated_failure_alternatives(kind: ActionKind) -> Vec<String> {
    let tips: &[&str] = match kind {
        ActionKind::Tap => &[
            "Try long press instead of tap",
            "Look for alternative UI elements with similar function",
            "Check if element is scrolled out of view",
            "Wait for UI to stabilize before tapping",
        ],
        ActionKind::Type => &[
            "Clear field before typing",
            "Check input format requirements",
            "Try typing shorter text first",
            "Look for input validation messages",
        ],
        ActionKind::Swipe => &[
            "Try different swipe direction",
            "Use shorter swipe distance",
            "Check if element is scrollable",
            "Try tap instead of swipe",
        ],
        _ => &["Try a different approach", "Check UI state before action"],
    };
    tips.iter().map(|s| s.to_string()).collect()
}

fn input_alternatives(text: &str) -> Vec<String> {
    let mut out = vec![
        "Check field requirements (format, length, etc.)".to_string(),
        "Try simpler input without special characters".to_string(),
    ];
    if text.chars().any(|c| "!@#$%^&*()".contains(c)) {
        out.push("Remove special characters from input".to_string());
    }
    if text.chars().count() > 50 {
        out.push("Try shorter input text".to_string());
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        out.push("Check if numeric format is correct".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tap(target: &str) -> WorkAction {
        WorkAction::new(ActionKind::Tap, "tap", Some(target.to_string()))
    }

    fn failed(rationale: &str) -> ReflectionResult {
        let mut r = ReflectionResult::indeterminate(rationale);
        r.success = Some(false);
        r
    }

    #[test]
    fn test_detects_repeated_failure() {
        let mut analyzer = ErrorAnalyzer::new();
        let action = tap("//OK");
        let recent = vec![tap("//Other"), tap("//OK"), tap("//OK")];
        let p = analyzer
            .analyze_failure(&action, &failed("nothing"), &UiConditions::default(), &recent)
            .unwrap();
        assert_eq!(p.pattern_type, PatternType::RepeatedFailure);
        assert_eq!(p.alternatives[0], "Try long press instead of tap");
        assert_eq!(p.conditions, vec!["SIMPLE_UI".to_string()]);
    }

    #[test]
    fn test_keyword_patterns() {
        let mut analyzer = ErrorAnalyzer::new();
        let ui = UiConditions { element_count: 30, current_app: "Settings".into() };

        let p = analyzer.analyze_failure(&tap("//A"), &failed("Wrong element was tapped"), &ui, &[]).unwrap();
        assert_eq!(p.pattern_type, PatternType::WrongElement);
        assert_eq!(p.conditions, vec!["COMPLEX_UI".to_string(), "APP_SETTINGS".to_string()]);

        let p = analyzer.analyze_failure(&tap("//A"), &failed("Screen still LOADING"), &ui, &[]).unwrap();
        assert_eq!(p.pattern_type, PatternType::TimingIssue);

        let mut typed = WorkAction::new(ActionKind::Type, "type", None);
        typed.text = Some("12345".into());
        let p = analyzer.analyze_failure(&typed, &failed("invalid input shown"), &ui, &[]).unwrap();
        assert_eq!(p.pattern_type, PatternType::InputValidation);
        assert!(p.alternatives.contains(&"Check if numeric format is correct".to_string()));

        assert!(analyzer.analyze_failure(&tap("//A"), &failed("hm"), &ui, &[]).is_none());
        let summary = analyzer.summary();
        assert_eq!(summary.total_failures, 4);
        assert_eq!(summary.detected_patterns, 3);
    }

    #[test]
    fn test_guidance_from_patterns_and_counts() {
        let mut analyzer = ErrorAnalyzer::new();
        let action = tap("//Send");
        assert!(analyzer.prevention_guidance(&action).is_none());

        analyzer.record_action_result(&action, false);
        analyzer.record_action_result(&action, false);
        let g = analyzer.prevention_guidance(&action).unwrap();
        assert!(g.contains("failed 2 times"));

        analyzer.record_action_result(&action, true);
        assert!(analyzer.prevention_guidance(&action).is_none());

        analyzer.analyze_failure(&action, &failed("element not clickable"), &UiConditions::default(), &[]);
        let g = analyzer.prevention_guidance(&action).unwrap();
        assert!(g.starts_with("⚠️ Warning: Similar action failed before (Targeting wrong UI element)"));
        assert!(analyzer.prevention_guidance(&tap("//Other")).is_none());
    }
}
