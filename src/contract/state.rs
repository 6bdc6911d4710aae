// SPDX-License-Identifier: MIT

//! Per-task run state
//!
//! A fresh [`RunState`] is created every time a task is about to execute,
//! carrying the upstream output as its input. The executing task is the only
//! writer; the engine reads the outcome flags afterwards to decide where
//! control flows next.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Mutable execution record for one task invocation.
///
/// A task signals its outcome by setting exactly one of: an output, an error
/// output, the skipped flag, or the stopped flag. A clean success with no
/// explicit output passes the input through unchanged.
#[derive(Debug, Clone)]
pub struct RunState {
    task_code: String,
    input: Value,
    output: Option<Value>,
    error_output: Option<Value>,
    skipped: bool,
    stopped: bool,
    context: Arc<HashMap<String, Value>>,
}

impl RunState {
    pub fn new(task_code: impl Into<String>, input: Value) -> Self {
        Self::with_context(task_code, input, Arc::new(HashMap::new()))
    }

    pub fn with_context(
        task_code: impl Into<String>,
        input: Value,
        context: Arc<HashMap<String, Value>>,
    ) -> Self {
        Self {
            task_code: task_code.into(),
            input,
            output: None,
            error_output: None,
            skipped: false,
            stopped: false,
            context,
        }
    }

    /// Code of the task this state belongs to
    pub fn task_code(&self) -> &str {
        &self.task_code
    }

    /// Input handed to the task (the upstream output)
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Read-only execution context passed in at process invocation
    pub fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }

    pub fn set_output(&mut self, output: Value) {
        self.output = Some(output);
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn set_error_output(&mut self, error_output: Value) {
        self.error_output = Some(error_output);
    }

    pub fn error_output(&self) -> Option<&Value> {
        self.error_output.as_ref()
    }

    pub fn has_error_output(&self) -> bool {
        self.error_output.is_some()
    }

    /// Suppress this task's success transition
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// Halt the whole run gracefully after this task
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Clear outcome fields before a deferred `proceed` call, keeping the
    /// last input and the shared context
    pub fn reset_outcome(&mut self) {
        self.output = None;
        self.error_output = None;
        self.skipped = false;
        self.stopped = false;
    }
}
