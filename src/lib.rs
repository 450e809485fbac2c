//! Workflow memory and speculative execution for UI automation agents.
//!
//! Recorded interaction histories are kept as per-app graphs of UI states
//! ([`graph`]) and ordered transition paths ([`workflow`]). When the live
//! screen matches a recorded state, the next one or two recorded states are
//! predicted and their actions executed ahead of the decision oracle,
//! stopping at the first divergence.

pub mod action;
pub mod config;
pub mod context;
pub mod controller;
pub mod device;
pub mod error;
pub mod graph;
pub mod logging;
pub mod matcher;
pub mod memory;
pub mod oracle;
pub mod predictor;
pub mod prompts;
pub mod recorder;
pub mod resolver;
pub mod ui;
pub mod workflow;

pub use action::{Action, ActionKind, ElementRef};
pub use config::{EngineConfig, ELEMENTS_MATCH_THRESHOLD, MAX_SPECULATIVE_NODES};
pub use context::SharedContext;
pub use controller::executor::{
    AbortReason, PredictedStep, RecordingContext, SpeculationOutcome, SpeculationState, SpeculativeExecutor,
};
pub use controller::reflection::{ReflectionResult, Reflector};
pub use error::{EngineError, Result};
pub use graph::{WorkAction, WorkGraph, WorkNode};
pub use memory::WorkflowMemory;
pub use recorder::WorkflowRecorder;
pub use ui::{BBox, ElementSchema, UiElement, UiSnapshot};
pub use workflow::{WorkTransition, Workflow};
