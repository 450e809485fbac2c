use std::env;
use std::path::PathBuf;

use crate::ui::ElementSchema;

/// Similarity a live screen must exceed (strictly) to count as a stored node.
pub const ELEMENTS_MATCH_THRESHOLD: f64 = 0.7;

/// Upper bound on how many future nodes a prediction may project.
pub const MAX_SPECULATIVE_NODES: usize = 2;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub memory_dir: PathBuf,
    pub reflection_enabled: bool,
    pub element_schema: ElementSchema,
    pub history_max_entries: usize,
    pub reflection_max_entries: usize,
    pub oracle: OracleConfig,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let memory_dir = lookup("ACTION_MEMORY_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output/memory"));

        let reflection_enabled = lookup("ACTION_MEMORY_REFLECTION")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "off" | "no"))
            .unwrap_or(true);

        let element_schema = match lookup("ACTION_MEMORY_ELEMENT_SCHEMA")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "reduced" | "content" => ElementSchema::Reduced,
            _ => ElementSchema::Rich,
        };

        let history_max_entries = lookup("ACTION_MEMORY_HISTORY_MAX")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(10);

        let reflection_max_entries = lookup("ACTION_MEMORY_REFLECTION_MAX")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(5);

        let oracle = OracleConfig {
            base_url: lookup("ORACLE_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: lookup("ORACLE_API_KEY").filter(|v| !v.is_empty()),
            model: lookup("ORACLE_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
        };

        Self {
            memory_dir,
            reflection_enabled,
            element_schema,
            history_max_entries,
            reflection_max_entries,
            oracle,
        }
    }
}
