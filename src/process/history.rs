// SPDX-License-Identifier: MIT

//! Per-run bookkeeping record

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Lightweight record of one process run, owned by the engine for the
/// duration of the run and exposed read-only to logging collaborators
#[derive(Debug, Clone)]
pub struct ProcessHistory {
    id: Uuid,
    process_code: String,
    context: Arc<HashMap<String, Value>>,
    started_at: DateTime<Utc>,
}

impl ProcessHistory {
    pub fn new(process_code: impl Into<String>, context: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_code: process_code.into(),
            context: Arc::new(context),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process_code(&self) -> &str {
        &self.process_code
    }

    /// The arbitrary key/value execution context passed in at invocation
    pub fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }

    /// Shared handle to the context, cloned into every run state
    pub(crate) fn context_arc(&self) -> Arc<HashMap<String, Value>> {
        self.context.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
