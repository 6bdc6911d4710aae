// SPDX-License-Identifier: MIT

//! Task contract - the unit of work bound to each graph node
//!
//! A task reads `state.input()` and signals its outcome on the same state.
//! Beyond the required `execute`, a task may opt into capabilities:
//! iteration (`next`), blocking accumulation (`proceed`), end-of-run
//! finalization (`finalize`), and bind-time option resolution
//! (`options_schema` + `configure`). Capabilities are declared once and
//! snapshotted by the engine at bind time.

use async_trait::async_trait;
use std::error::Error;

use crate::contract::error::OptionsError;
use crate::contract::options::{OptionsSchema, ResolvedOptions};
use crate::contract::state::RunState;

/// Capability flags declared by a task implementation.
///
/// The engine resolves these once per bound instance instead of probing on
/// every iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `next()` is meaningful: the task streams items one execute at a time
    pub iterable: bool,
    /// `proceed()` is meaningful: the task absorbs upstream items and emits
    /// its output once, after the producer is exhausted
    pub blocking: bool,
    /// `finalize()` must be called once at end of run
    pub finalizable: bool,
}

impl Capabilities {
    pub const fn new() -> Self {
        Self {
            iterable: false,
            blocking: false,
            finalizable: false,
        }
    }

    pub const fn with_iterable(mut self) -> Self {
        self.iterable = true;
        self
    }

    pub const fn with_blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub const fn with_finalizable(mut self) -> Self {
        self.finalizable = true;
        self
    }
}

/// Core task trait bound to every graph node
#[async_trait]
pub trait Task: Send + Sync {
    /// Capability flags for this instance, read once at bind time
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Option keys this task accepts; an empty schema passes raw options
    /// through to `configure` untouched
    fn options_schema(&self) -> OptionsSchema {
        OptionsSchema::new()
    }

    /// Receive the resolved options, once, before the first execution
    fn configure(&mut self, _options: ResolvedOptions) -> Result<(), OptionsError> {
        Ok(())
    }

    /// Perform one unit of work. Reads `state.input()`; must signal the
    /// outcome on the state or return an error to trigger the task's
    /// error strategy.
    async fn execute(&mut self, state: &mut RunState) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Iterable capability: report whether another item is available. The
    /// engine re-invokes `execute` while this returns true.
    async fn next(&mut self, _state: &mut RunState) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(false)
    }

    /// Blocking capability: emit the final output after the upstream
    /// producer is fully drained
    async fn proceed(&mut self, _state: &mut RunState) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Finalizable capability: invoked exactly once at end of run,
    /// successful or not
    async fn finalize(
        &mut self,
        _state: &mut RunState,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Task")
    }
}

/// Builds fresh task instances.
///
/// Every process run binds its own instances, since a task may carry
/// execution-scoped state (an open file, a counter) across iterations.
pub trait TaskBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Task>;
}

impl<F> TaskBuilder for F
where
    F: Fn() -> Box<dyn Task> + Send + Sync,
{
    fn build(&self) -> Box<dyn Task> {
        self()
    }
}
