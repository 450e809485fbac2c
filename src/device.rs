//! Seams to the device automation layer.

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::action::Action;
use crate::error::EngineError;
use crate::ui::UiElement;

#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub fn from_bytes(bytes: &[u8], width: u32, height: u32) -> Self {
        Self {
            base64_data: general_purpose::STANDARD.encode(bytes),
            width,
            height,
            captured_at: Utc::now(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.base64_data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub should_finish: bool,
    pub message: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: Some(message.into()),
        }
    }
}

/// Screen capture and input primitives. Errors abort whatever speculative
/// run is in progress.
#[async_trait]
pub trait Device: Send + Sync {
    async fn capture_screenshot(&self) -> Result<Screenshot>;

    async fn current_app(&self) -> Result<String>;

    /// Points are absolute pixels of a `viewport_width` x `viewport_height`
    /// screen.
    async fn execute_action(&self, action: &Action, viewport_width: u32, viewport_height: u32) -> Result<ExecutionOutcome>;
}

/// Turns a screenshot into UI elements.
#[async_trait]
pub trait ElementExtractor: Send + Sync {
    async fn extract_elements(&self, screenshot: &Screenshot) -> Result<Vec<UiElement>>;
}

/// A screenshot and the elements read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub screenshot: Screenshot,
    pub elements: Vec<UiElement>,
}

pub async fn observe(device: &dyn Device, extractor: &dyn ElementExtractor) -> crate::error::Result<Observation> {
    let screenshot = device.capture_screenshot().await.map_err(EngineError::Device)?;
    let elements = extractor
        .extract_elements(&screenshot)
        .await
        .map_err(EngineError::Device)?;
    debug!(elements = elements.len(), "observed screen");
    Ok(Observation { screenshot, elements })
}

/// Last observation of a session.
#[derive(Debug, Default)]
pub struct ScreenshotCache {
    last: Option<Observation>,
}

impl ScreenshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached observation, unless this is the session's first step.
    pub fn get(&mut self, step: usize) -> Option<&Observation> {
        if step == 0 {
            self.last = None;
        }
        self.last.as_ref()
    }

    pub fn store(&mut self, observation: Observation) {
        self.last = Some(observation);
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// Cached observation or a fresh capture, which is then cached.
    pub async fn get_or_observe(
        &mut self,
        step: usize,
        device: &dyn Device,
        extractor: &dyn ElementExtractor,
    ) -> crate::error::Result<Observation> {
        if let Some(hit) = self.get(step) {
            return Ok(hit.clone());
        }
        let fresh = observe(device, extractor).await?;
        self.last = Some(fresh.clone());
        Ok(fresh)
    }
}
