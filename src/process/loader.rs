//! Process file loader - YAML front-end
//!
//! YAML is one interchangeable front-end; the resolver consumes only the
//! in-memory description structs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contract::error::ProcessError;
use crate::process::description::ProcessDescription;

/// A parsed process file: process descriptions keyed by process code
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProcessFile {
    #[serde(default)]
    pub processes: HashMap<String, ProcessDescription>,
}

/// Loads process descriptions from YAML files
pub struct ProcessLoader;

impl ProcessLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a process file from a YAML path
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<ProcessFile, ProcessError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a process file from a YAML string
    pub fn parse_yaml(content: &str) -> Result<ProcessFile, ProcessError> {
        let file: ProcessFile = serde_yaml::from_str(content)?;
        Ok(file)
    }
}

impl Default for ProcessLoader {
    fn default() -> Self {
        Self::new()
    }
}
