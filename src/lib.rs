//! LLM-driven browser task execution engine
//!
//! Runs natural-language tasks against a live page through a planner and a
//! navigator agent, a schema-validated action registry, a bounded
//! token-accounted conversation memory, and a structural element identity
//! engine. The browser itself, the model transport, and content
//! sanitization are collaborator traits supplied by the caller.

pub mod actions;
pub mod agent;
pub mod browser;
pub mod dom;
pub mod errors;
pub mod executor;
pub mod memory;
pub mod sanitizer;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub use browser::{
    BrowserDriver, ElementRef, ExtractOptions, PageExtractor, PageSnapshot, ScrollInfo, TabInfo,
    extract_tree,
};
pub use errors::{BrowserError, BrowserResult, EngineError, EngineResult};
pub use executor::{
    ExecutionSettings, ExecutionStatus, Executor, ExecutorBuilder, TaskControl, TaskOutcome,
};
pub use transport::{ChatResponse, ModelTransport, StructuredResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_max_actions_per_step")]
    pub max_actions_per_step: usize,

    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    #[serde(default = "default_planning_interval")]
    pub planning_interval: usize,

    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default)]
    pub use_vision: bool,

    #[serde(default)]
    pub validate_output: bool,

    /// Path of the JSONL step-history file; history is disabled when unset.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

fn default_max_steps() -> usize {
    100
}
fn default_max_actions_per_step() -> usize {
    10
}
fn default_max_failures() -> usize {
    3
}
fn default_planning_interval() -> usize {
    3
}
fn default_token_budget() -> usize {
    128_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_actions_per_step: default_max_actions_per_step(),
            max_failures: default_max_failures(),
            planning_interval: default_planning_interval(),
            token_budget: default_token_budget(),
            use_vision: false,
            validate_output: false,
            history_path: None,
        }
    }
}

impl From<&Config> for ExecutionSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_steps: config.max_steps,
            max_actions_per_step: config.max_actions_per_step,
            max_failures: config.max_failures,
            planning_interval: config.planning_interval,
            token_budget: config.token_budget,
            use_vision: config.use_vision,
            validate_output: config.validate_output,
        }
    }
}

/// Load config from config.yaml in package root
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("max_steps: 20\nuse_vision: true\n").unwrap();
        assert_eq!(config.max_steps, 20);
        assert!(config.use_vision);
        assert_eq!(config.planning_interval, 3);
        assert!(config.history_path.is_none());
    }
}
