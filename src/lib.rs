// SPDX-License-Identifier: MIT

//! tramline-rs — a declarative, graph-based pipeline execution engine.
//!
//! A process is a directed graph of named tasks wired together by success
//! and error edges. The flat description of a process is resolved once into
//! a validated [`process::graph::ProcessGraph`], then executed any number of
//! times by the [`process::manager::ProcessManager`]. Units of work plug in
//! through the [`contract::task::Task`] and
//! [`contract::transformer::Transformer`] traits.

pub mod contract;
pub mod process;
