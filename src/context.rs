//! Conversation context handed to the oracle, kept as sections rather than a
//! flat message list.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;

use crate::config::EngineConfig;
use crate::controller::reflection::ReflectionResult;
use crate::device::Screenshot;
use crate::oracle::ChatMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub step: usize,
    pub thinking: String,
    pub action_description: String,
    pub action_code: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionEntry {
    pub step: usize,
    pub action_type: String,
    pub action_description: String,
    pub success: Option<bool>,
    pub confidence: f64,
    pub reasoning: String,
    pub suggestions: String,
}

#[derive(Debug, Clone)]
pub struct SharedContext {
    system_prompt: String,
    task: String,
    started_at: Option<DateTime<Utc>>,
    history: VecDeque<HistoryEntry>,
    history_max: usize,
    reflections: VecDeque<ReflectionEntry>,
    reflection_max: usize,
    screenshot: Option<Screenshot>,
    current_app: String,
    screen_info: Map<String, Value>,
    speculative: Option<String>,
    step_count: usize,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::with_limits(10, 5)
    }
}

impl SharedContext {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_limits(config.history_max_entries, config.reflection_max_entries)
    }

    pub fn with_limits(history_max: usize, reflection_max: usize) -> Self {
        Self {
            system_prompt: String::new(),
            task: String::new(),
            started_at: None,
            history: VecDeque::new(),
            history_max: history_max.max(1),
            reflections: VecDeque::new(),
            reflection_max: reflection_max.max(1),
            screenshot: None,
            current_app: String::new(),
            screen_info: Map::new(),
            speculative: None,
            step_count: 0,
        }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn set_task(&mut self, task: impl Into<String>) {
        self.task = task.into();
        self.started_at = Some(Utc::now());
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn reflections(&self) -> impl Iterator<Item = &ReflectionEntry> {
        self.reflections.iter()
    }

    /// Record one executed step. Oldest entries fall off past the limit.
    pub fn add_history_entry(
        &mut self,
        thinking: impl Into<String>,
        action_description: impl Into<String>,
        action_code: impl Into<String>,
        success: bool,
    ) {
        self.step_count += 1;
        self.history.push_back(HistoryEntry {
            step: self.step_count,
            thinking: thinking.into(),
            action_description: action_description.into(),
            action_code: action_code.into(),
            success,
        });
        while self.history.len() > self.history_max {
            self.history.pop_front();
        }
    }

    pub fn add_reflection(&mut self, action_type: &str, action_description: &str, result: &ReflectionResult) {
        self.reflections.push_back(ReflectionEntry {
            step: self.step_count,
            action_type: action_type.to_string(),
            action_description: action_description.to_string(),
            success: result.success,
            confidence: result.confidence,
            reasoning: result.rationale.clone(),
            suggestions: result.suggestions.clone(),
        });
        while self.reflections.len() > self.reflection_max {
            self.reflections.pop_front();
        }
    }

    pub fn set_screenshot(&mut self, screenshot: Screenshot) {
        self.screenshot = Some(screenshot);
    }

    pub fn set_screen_info(&mut self, current_app: impl Into<String>, extra: Map<String, Value>) {
        self.current_app = current_app.into();
        self.screen_info = extra;
    }

    pub fn set_speculative_context(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.speculative = if text.is_empty() { None } else { Some(text) };
    }

    pub fn clear_speculative_context(&mut self) {
        self.speculative = None;
    }

    /// Drop the per-step screen data.
    pub fn clear_current_step(&mut self) {
        self.screenshot = None;
        self.screen_info = Map::new();
    }

    pub fn reset(&mut self) {
        *self = Self::with_limits(self.history_max, self.reflection_max);
    }

    /// System, task, history, latest reflection, screenshot, screen info,
    /// predicted states. Empty sections are left out.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.system_prompt.clone()));
        }

        if !self.task.is_empty() {
            let mut content = format!("# Task Description\n\n{}", self.task);
            if let Some(ts) = self.started_at {
                content.push_str(&format!("\n\n**Started at:** {}", ts.to_rfc3339()));
            }
            messages.push(ChatMessage::user(content));
        }

        if !self.history.is_empty() {
            let mut content = String::from("# Action History\n\n");
            for entry in &self.history {
                let status = if entry.success { "✅" } else { "❌" };
                content.push_str(&format!("**Step {}** {}\n", entry.step, status));
                if !entry.thinking.is_empty() {
                    content.push_str(&format!("- {}\n", entry.thinking));
                }
                content.push_str(&format!("- Action: {}\n", entry.action_description));
            }
            messages.push(ChatMessage::assistant(content));
        }

        if let Some(latest) = self.reflections.back() {
            messages.push(ChatMessage::assistant(reflection_note(latest)));
        }

        if let Some(shot) = &self.screenshot {
            let content = format!("# Current Screen\n\n**Resolution:** {}x{}", shot.width, shot.height);
            messages.push(ChatMessage::user(content).with_image(shot.base64_data.clone()));
        }

        if !self.screen_info.is_empty() {
            let mut info = Map::new();
            info.insert("current_app".into(), Value::String(self.current_app.clone()));
            info.extend(self.screen_info.clone());
            let pretty = serde_json::to_string_pretty(&Value::Object(info)).unwrap_or_default();
            messages.push(ChatMessage::user(format!("# Screen Info\n\n{}", pretty)));
        }

        if let Some(predicted) = &self.speculative {
            messages.push(ChatMessage::user(format!("# Predicted Future UI States\n\n{}", predicted)));
        }

        messages
    }
}

fn reflection_note(entry: &ReflectionEntry) -> String {
    let mut note = String::from("# Reflection of Previous Action\n\n");
    match entry.success {
        Some(true) if entry.confidence >= 0.8 => {
            note.push_str(&format!("**✅ Step {}** - {} was successful\n", entry.step, entry.action_type));
            return note;
        }
        Some(false) => {
            note.push_str(&format!(
                "**❌ Step {}** - {} (confidence: {:.2})\n",
                entry.step, entry.action_type, entry.confidence
            ));
            note.push_str(&format!("- Issue: {}\n", entry.reasoning));
        }
        _ => {
            note.push_str(&format!(
                "**⚠️ Step {}** - {} (confidence: {:.2})\n",
                entry.step, entry.action_type, entry.confidence
            ));
            note.push_str(&format!("- Observation: {}\n", entry.reasoning));
        }
    }
    if !entry.suggestions.is_empty() {
        note.push_str(&format!("- Suggestion: {}", entry.suggestions));
    }
    note
}
