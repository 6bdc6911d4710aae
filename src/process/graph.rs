//! Resolved process graph types
//!
//! Nodes are built incrementally by the resolver, then frozen: every field
//! is private and only read accessors are public, so a graph can be shared
//! across concurrent runs without locking.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::process::description::{ErrorStrategy, TaskDescription};

/// A resolved task node: the task description plus bidirectional links
#[derive(Debug, Clone)]
pub struct TaskNode {
    code: String,
    description: TaskDescription,
    next_nodes: Vec<String>,
    error_nodes: Vec<String>,
    previous_nodes: HashSet<String>,
    in_error_branch: bool,
}

impl TaskNode {
    pub(crate) fn new(
        code: String,
        description: TaskDescription,
        next_nodes: Vec<String>,
        error_nodes: Vec<String>,
        previous_nodes: HashSet<String>,
        in_error_branch: bool,
    ) -> Self {
        Self {
            code,
            description,
            next_nodes,
            error_nodes,
            previous_nodes,
            in_error_branch,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// Service reference bound through the task registry
    pub fn service(&self) -> &str {
        &self.description.service
    }

    /// Raw options handed to the task at bind time
    pub fn options(&self) -> &HashMap<String, Value> {
        &self.description.options
    }

    pub fn error_strategy(&self) -> ErrorStrategy {
        self.description.error_strategy
    }

    /// Level used when logging this task's run states
    pub fn log_level(&self) -> log::Level {
        self.description.level()
    }

    /// Tasks invoked, in declaration order, on success
    pub fn next_nodes(&self) -> &[String] {
        &self.next_nodes
    }

    /// Tasks invoked, in declaration order, on an error output
    pub fn error_nodes(&self) -> &[String] {
        &self.error_nodes
    }

    /// Back-references, used only for ancestor queries
    pub fn previous_nodes(&self) -> &HashSet<String> {
        &self.previous_nodes
    }

    pub fn is_root(&self) -> bool {
        self.previous_nodes.is_empty()
    }

    /// True when this node is reachable only through an error edge
    pub fn in_error_branch(&self) -> bool {
        self.in_error_branch
    }
}

/// A validated, immutable process graph
#[derive(Debug, Clone)]
pub struct ProcessGraph {
    code: String,
    options: HashMap<String, Value>,
    entry_point: Option<String>,
    end_point: Option<String>,
    nodes: HashMap<String, TaskNode>,
    roots: Vec<String>,
}

impl ProcessGraph {
    pub(crate) fn new(
        code: String,
        options: HashMap<String, Value>,
        entry_point: Option<String>,
        end_point: Option<String>,
        nodes: HashMap<String, TaskNode>,
        roots: Vec<String>,
    ) -> Self {
        Self {
            code,
            options,
            entry_point,
            end_point,
            nodes,
            roots,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn options(&self) -> &HashMap<String, Value> {
        &self.options
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    pub fn end_point(&self) -> Option<&str> {
        self.end_point.as_deref()
    }

    pub fn node(&self, code: &str) -> Option<&TaskNode> {
        self.nodes.get(code)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.values()
    }

    /// Task codes with no predecessors, sorted for deterministic start order
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
