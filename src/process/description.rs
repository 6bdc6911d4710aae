//! Process description types
//!
//! The flat, order-irrelevant data model a process is declared with: a map
//! of task code to task description plus process-level metadata. Pure data,
//! no behavior; the resolver turns it into a validated graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Behavior when a task's own execution raises an unrecoverable error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Re-throw to the caller of the engine; the run terminates immediately
    #[default]
    Propagate,
    /// Swallow, suppress the success branch, route the failing input to the
    /// error branch if one is declared
    Skip,
    /// Swallow and halt the run gracefully; the caller receives the last
    /// good output instead of an error
    Stop,
}

/// Output declaration: absent, a single task code, or an ordered list
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Outputs {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Outputs {
    /// Convert to a vector of task codes, preserving declaration order
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Outputs::None => vec![],
            Outputs::Single(code) => vec![code.clone()],
            Outputs::Multiple(codes) => codes.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Outputs::None => true,
            Outputs::Single(_) => false,
            Outputs::Multiple(codes) => codes.is_empty(),
        }
    }
}

impl From<&[&str]> for Outputs {
    fn from(codes: &[&str]) -> Self {
        match codes {
            [] => Outputs::None,
            [one] => Outputs::Single((*one).to_string()),
            many => Outputs::Multiple(many.iter().map(|c| (*c).to_string()).collect()),
        }
    }
}

/// Description of a single task within a process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskDescription {
    /// Service reference resolved through the task registry at bind time
    pub service: String,
    /// Raw options handed to the task at bind time
    #[serde(default)]
    pub options: HashMap<String, Value>,
    /// Codes of tasks to invoke, in order, on success
    #[serde(default)]
    pub outputs: Outputs,
    /// Codes of tasks to invoke when this task reports an error output
    #[serde(default)]
    pub error_outputs: Outputs,
    /// Deprecated alias for `error_outputs`; declaring both is a
    /// configuration error
    #[serde(default)]
    pub errors: Outputs,
    #[serde(default)]
    pub error_strategy: ErrorStrategy,
    /// Level used when logging this task's run states
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TaskDescription {
    fn default() -> Self {
        Self {
            service: String::new(),
            options: HashMap::new(),
            outputs: Outputs::None,
            error_outputs: Outputs::None,
            errors: Outputs::None,
            error_strategy: ErrorStrategy::Propagate,
            log_level: default_log_level(),
        }
    }
}

impl TaskDescription {
    /// Parse the declared log level, falling back to debug
    pub fn level(&self) -> log::Level {
        match self.log_level.as_str() {
            "error" => log::Level::Error,
            "warn" | "warning" => log::Level::Warn,
            "info" => log::Level::Info,
            "trace" => log::Level::Trace,
            _ => log::Level::Debug,
        }
    }
}

fn default_log_level() -> String {
    "debug".to_string()
}

/// Description of a whole process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessDescription {
    /// Documentation only, no runtime effect
    #[serde(default)]
    pub description: String,
    /// Documentation only, no runtime effect
    #[serde(default)]
    pub help: String,
    /// Visibility flag for external invocation; no effect on engine behavior
    #[serde(default = "default_public")]
    pub public: bool,
    /// If set, the single task a fresh run starts from; must have no
    /// predecessors
    #[serde(default)]
    pub entry_point: Option<String>,
    /// If set, only this task's output counts as the process result
    #[serde(default)]
    pub end_point: Option<String>,
    /// Process-level options, handed through to inspection tooling
    #[serde(default)]
    pub options: HashMap<String, Value>,
    /// Task descriptions keyed by task code
    #[serde(default)]
    pub tasks: HashMap<String, TaskDescription>,
}

impl Default for ProcessDescription {
    fn default() -> Self {
        Self {
            description: String::new(),
            help: String::new(),
            public: default_public(),
            entry_point: None,
            end_point: None,
            options: HashMap::new(),
            tasks: HashMap::new(),
        }
    }
}

fn default_public() -> bool {
    true
}
