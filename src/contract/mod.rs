// SPDX-License-Identifier: MIT

//! Contracts implemented by externally supplied units of work
//!
//! This module defines everything a task or transformer author programs
//! against: the capability traits, the option schema machinery, the mutable
//! run state handed to each execution, and the error taxonomy.

pub mod error;
pub mod options;
pub mod state;
pub mod task;
pub mod transformer;

pub use error::{ConfigurationError, OptionsError, ProcessError, TransformationError};
pub use options::{FieldType, OptionsSchema, ResolvedOptions};
pub use state::RunState;
pub use task::{Capabilities, Task, TaskBuilder};
pub use transformer::Transformer;
