// SPDX-License-Identifier: MIT

//! Transformer contract - pure value-mapping collaborators
//!
//! Transformers are composed inside tasks (key mapping, normalization,
//! cache key derivation). They hold no execution state: `transform` is a
//! pure function of the input value and the resolved options, so one shared
//! instance serves every concurrent run.

use std::error::Error;

use serde_json::Value;

use crate::contract::options::{OptionsSchema, ResolvedOptions};

/// A pure value-to-value mapping identified by a stable code
pub trait Transformer: Send + Sync {
    /// Stable identifier used for registry lookup and error messages
    fn code(&self) -> &str;

    /// Option keys this transformer accepts
    fn options_schema(&self) -> OptionsSchema {
        OptionsSchema::new()
    }

    /// Map an input value to an output value. Must not mutate shared state;
    /// invalid input is reported by returning an error.
    fn transform(
        &self,
        value: &Value,
        options: &ResolvedOptions,
    ) -> Result<Value, Box<dyn Error + Send + Sync>>;
}
