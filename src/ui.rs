//! UI elements as seen on one captured screen.
//!
//! An element is only meaningful inside the snapshot it came from: bounding
//! boxes move between captures, so anything that must survive across screens
//! goes through [`ElementSchema::identity`] instead.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Two corner points, `[[x1, y1], [x2, y2]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BBox(pub [i32; 2], pub [i32; 2]);

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        BBox([x1, y1], [x2, y2])
    }

    pub fn center(&self) -> (i32, i32) {
        (
            (self.0[0] + self.1[0]).div_euclid(2),
            (self.0[1] + self.1[1]).div_euclid(2),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

impl UiElement {
    pub fn new(content: impl Into<String>, bbox: BBox) -> Self {
        Self {
            content: content.into(),
            bbox,
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, resource_id: impl Into<String>, class_name: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self.class_name = Some(class_name.into());
        self
    }

    /// Content with surrounding whitespace removed, `None` when blank.
    pub fn trimmed_content(&self) -> Option<&str> {
        let trimmed = self.content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

/// Which element fields make up an element's identity across screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSchema {
    /// Accessibility-tree elements: `resourceId/className/content`.
    #[default]
    Rich,
    /// Screen-parsed elements that only carry content.
    Reduced,
}

impl ElementSchema {
    pub fn identity(&self, element: &UiElement) -> String {
        match self {
            ElementSchema::Rich => format!(
                "{}/{}/{}",
                element.resource_id.as_deref().unwrap_or(""),
                element.class_name.as_deref().unwrap_or(""),
                element.content
            ),
            ElementSchema::Reduced => element.content.clone(),
        }
    }
}

/// Ordered elements captured at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UiSnapshot {
    pub elements: Vec<UiElement>,
}

impl UiSnapshot {
    pub fn new(elements: Vec<UiElement>) -> Self {
        Self { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Set of trimmed, non-empty contents.
    pub fn content_set(&self) -> HashSet<&str> {
        content_set(&self.elements)
    }

    /// SHA-256 over every element's identity fields, bounding boxes excluded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for e in &self.elements {
            hasher.update(e.content.as_bytes());
            hasher.update([0x1f]);
            hasher.update(e.resource_id.as_deref().unwrap_or("").as_bytes());
            hasher.update([0x1f]);
            hasher.update(e.class_name.as_deref().unwrap_or("").as_bytes());
            hasher.update([0x1f]);
            hasher.update(match e.checked {
                Some(true) => b"1",
                Some(false) => b"0",
                None => b"-",
            });
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Same UI state: equal identity fields element by element, boxes ignored.
    pub fn same_state(&self, other: &UiSnapshot) -> bool {
        self.elements.len() == other.elements.len()
            && self.elements.iter().zip(&other.elements).all(|(a, b)| {
                a.content == b.content
                    && a.resource_id == b.resource_id
                    && a.class_name == b.class_name
                    && a.checked == b.checked
            })
    }
}

impl From<Vec<UiElement>> for UiSnapshot {
    fn from(elements: Vec<UiElement>) -> Self {
        Self { elements }
    }
}

pub fn content_set(elements: &[UiElement]) -> HashSet<&str> {
    elements.iter().filter_map(|e| e.trimmed_content()).collect()
}
