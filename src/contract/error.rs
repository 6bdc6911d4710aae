// SPDX-License-Identifier: MIT

//! Typed error handling for tramline-rs
//!
//! Three error classes map to three moments in a process lifetime:
//! configuration errors at resolution time, option errors at bind time, and
//! task/transformation failures at run time. All of them carry the offending
//! process/task/transformer code so a failing configuration can be diagnosed
//! from the message alone.

use thiserror::Error;

/// Top-level error type returned by the execution engine
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Structural problems detected while resolving a process graph
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Option resolution failed while binding a task or transformer
    #[error("Invalid options for {owner}: {source}")]
    Options {
        owner: String,
        #[source]
        source: OptionsError,
    },

    /// A task raised under the `propagate` error strategy
    #[error("Task '{task}' (service '{service}') failed in process '{process}': {source}")]
    TaskFailed {
        process: String,
        task: String,
        service: String,
        /// Last error output the task produced before raising, if any
        error_output: Option<serde_json::Value>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A transformer rejected its input
    #[error(transparent)]
    Transformation(#[from] TransformationError),

    /// I/O errors while loading configuration files
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Resolution-time errors: the process can never run
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No description registered under the requested process code
    #[error("Unknown process '{0}'")]
    MissingProcess(String),

    /// An output declaration points at a task code that does not exist
    #[error("Task '{target}' referenced by task '{referenced_from}' does not exist in process '{process}'")]
    MissingTask {
        process: String,
        referenced_from: String,
        target: String,
    },

    /// A task is reachable from itself
    #[error("Circular process '{process}': task '{task}' is its own ancestor")]
    CircularProcess { process: String, task: String },

    /// The declared entry point is a descendant of another task
    #[error("Entry point '{task}' of process '{process}' has predecessors")]
    EntryPointHasAncestors { process: String, task: String },

    /// The declared entry point does not resolve to a task
    #[error("Entry point '{task}' of process '{process}' does not exist")]
    UnknownEntryPoint { process: String, task: String },

    /// The declared end point does not resolve to a task
    #[error("End point '{task}' of process '{process}' does not exist")]
    UnknownEndPoint { process: String, task: String },

    /// Both `error_outputs` and its deprecated alias `errors` are declared
    #[error("Task '{task}' in process '{process}' declares both 'errors' and 'error_outputs'")]
    ConflictingErrorOutputs { process: String, task: String },

    /// No task builder registered for a service reference
    #[error("No task registered for service '{0}'")]
    MissingService(String),

    /// No transformer registered under a code
    #[error("No transformer registered for code '{0}'")]
    MissingTransformer(String),
}

/// Bind-time option resolution errors
#[derive(Debug, Error)]
pub enum OptionsError {
    /// A required option was not supplied
    #[error("Missing required option '{0}'")]
    MissingOption(String),

    /// An option value has the wrong type
    #[error("Option '{option}' expects {expected}, got {actual}")]
    InvalidType {
        option: String,
        expected: String,
        actual: String,
    },

    /// An option value is outside its allowed set
    #[error("Option '{option}' does not allow value {value}")]
    DisallowedValue {
        option: String,
        value: serde_json::Value,
    },

    /// An option key is not declared by the schema
    #[error("Unknown option '{0}'")]
    UnknownOption(String),
}

/// A transformer failure, always naming the transformer and, when known,
/// the property being populated. The original cause stays chained.
#[derive(Debug)]
pub struct TransformationError {
    pub code: String,
    pub target_property: Option<String>,
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransformationError {
    pub fn new(
        code: impl Into<String>,
        target_property: Option<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            code: code.into(),
            target_property,
            source,
        }
    }
}

impl std::fmt::Display for TransformationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transformer '{}' failed", self.code)?;
        if let Some(property) = &self.target_property {
            write!(f, " for property '{}'", property)?;
        }
        write!(f, ": {}", self.source)
    }
}

impl std::error::Error for TransformationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
