//! Process execution engine
//!
//! Walks a resolved graph once per invocation: binds a fresh task instance
//! per node, executes depth-first in declaration order, drives iteration
//! (execute, flow downstream, pull next), defers blocking tasks until their
//! producer is exhausted, applies each task's error strategy, and finalizes
//! activated tasks in reverse activation order. The engine holds no mutable
//! state outside the per-run structures, so it is reentrant: a task may
//! invoke another process through the same manager.

use std::collections::HashMap;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::contract::error::ProcessError;
use crate::contract::state::RunState;
use crate::contract::task::{Capabilities, Task};
use crate::process::description::ErrorStrategy;
use crate::process::graph::{ProcessGraph, TaskNode};
use crate::process::history::ProcessHistory;
use crate::process::registry::TaskRegistry;
use crate::process::resolver::ProcessResolver;

const LOG_TARGET: &str = "tramline::manager";
const ERROR_BRANCH_TARGET: &str = "tramline::error_branch";

/// Executes resolved process graphs
#[derive(Clone)]
pub struct ProcessManager {
    resolver: Arc<ProcessResolver>,
    tasks: TaskRegistry,
}

/// A task instance bound to one node for the duration of one run
struct BoundTask {
    task: Box<dyn Task>,
    capabilities: Capabilities,
    last_state: RunState,
    pending_proceed: bool,
    finalized: bool,
}

/// Mutable state of one process run
struct ProcessRun {
    graph: Arc<ProcessGraph>,
    history: ProcessHistory,
    context: Arc<HashMap<String, Value>>,
    bound: HashMap<String, BoundTask>,
    activation_order: Vec<String>,
    /// Innermost scope last; index 0 is the run-level scope
    blocking_scopes: Vec<Vec<String>>,
    stopped: bool,
    last_output: Option<Value>,
    end_point_output: Option<Value>,
}

impl ProcessRun {
    fn terminal_output(self) -> Value {
        if self.graph.end_point().is_some() {
            self.end_point_output.unwrap_or(Value::Null)
        } else {
            self.last_output.unwrap_or(Value::Null)
        }
    }
}

/// The value a node forwards on its success edges: the explicit output,
/// or the input passed through when the node produced neither an output
/// nor an error output
fn success_value(state: &RunState) -> Option<Value> {
    if let Some(output) = state.output() {
        Some(output.clone())
    } else if !state.has_error_output() {
        Some(state.input().clone())
    } else {
        None
    }
}

impl ProcessManager {
    pub fn new(resolver: Arc<ProcessResolver>, tasks: TaskRegistry) -> Self {
        Self { resolver, tasks }
    }

    pub fn resolver(&self) -> &Arc<ProcessResolver> {
        &self.resolver
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Execute a process with an empty context
    pub async fn execute(&self, process_code: &str, input: Value) -> Result<Value, ProcessError> {
        self.execute_in_context(process_code, input, HashMap::new())
            .await
    }

    /// Execute a process once, returning the terminal output.
    ///
    /// The terminal output is the configured end point's output when one is
    /// declared, otherwise the output of the last task that produced one.
    pub async fn execute_in_context(
        &self,
        process_code: &str,
        input: Value,
        context: HashMap<String, Value>,
    ) -> Result<Value, ProcessError> {
        let graph = self.resolver.resolve(process_code).await?;
        let history = ProcessHistory::new(process_code, context);
        log::info!(
            target: LOG_TARGET,
            "Starting process '{}' (run {})",
            process_code,
            history.id()
        );

        let context = history.context_arc();
        let mut run = ProcessRun {
            graph,
            history,
            context,
            bound: HashMap::new(),
            activation_order: Vec::new(),
            blocking_scopes: vec![Vec::new()],
            stopped: false,
            last_output: None,
            end_point_output: None,
        };

        let outcome = self.walk(&mut run, input).await;
        // Finalizers run whether the walk succeeded or not
        self.finalize_run(&mut run).await;

        match outcome {
            Ok(()) => {
                log::info!(
                    target: LOG_TARGET,
                    "Process '{}' finished (run {})",
                    process_code,
                    run.history.id()
                );
                Ok(run.terminal_output())
            }
            Err(error) => {
                log::error!(
                    target: LOG_TARGET,
                    "Process '{}' aborted (run {}): {}",
                    process_code,
                    run.history.id(),
                    error
                );
                Err(error)
            }
        }
    }

    /// Run the graph from its entry point (or every root) and drain the
    /// run-level blocking scope
    async fn walk(&self, run: &mut ProcessRun, input: Value) -> Result<(), ProcessError> {
        let graph = run.graph.clone();
        let start_codes: Vec<String> = match graph.entry_point() {
            Some(entry) => vec![entry.to_string()],
            None => graph.roots().to_vec(),
        };

        for code in start_codes {
            if run.stopped {
                break;
            }
            self.dispatch_to(run, code, input.clone()).await?;
        }

        // Blocking tasks with no iterable producer settle here; draining may
        // register further blocking tasks, so loop until the scope stays empty
        while !run.stopped {
            let scope = match run.blocking_scopes.first_mut() {
                Some(scope) if !scope.is_empty() => std::mem::take(scope),
                _ => break,
            };
            self.drain_blocking(run, scope).await?;
        }
        Ok(())
    }

    /// Route a value to a node: blocking nodes receive it as one item and
    /// defer their downstream; every other node runs in place
    fn dispatch_to<'a>(
        &'a self,
        run: &'a mut ProcessRun,
        target: String,
        value: Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProcessError>> + Send + 'a>> {
        Box::pin(async move {
            let graph = run.graph.clone();
            let node = graph
                .node(&target)
                .expect("edge target validated at resolution");
            self.bind(run, node).await?;

            let blocking = run
                .bound
                .get(&target)
                .map(|bound| bound.capabilities.blocking)
                .unwrap_or(false);
            if !blocking {
                return self.run_node(run, node, value).await;
            }

            // Deliver one item; the success transition waits for proceed()
            let state = self.execute_once(run, node, value).await?;
            if state.is_stopped() {
                run.stopped = true;
                return Ok(());
            }
            self.dispatch_error(run, node, &state).await?;
            if run.stopped || state.is_skipped() {
                return Ok(());
            }
            let bound = run
                .bound
                .get_mut(&target)
                .expect("task bound before delivery");
            if !bound.pending_proceed {
                bound.pending_proceed = true;
                if let Some(scope) = run.blocking_scopes.last_mut() {
                    scope.push(target);
                }
            }
            Ok(())
        })
    }

    /// Execute a non-blocking node and advance through its transitions,
    /// looping in place while the node has more items to produce
    async fn run_node(
        &self,
        run: &mut ProcessRun,
        node: &TaskNode,
        input: Value,
    ) -> Result<(), ProcessError> {
        let mut state = self.execute_once(run, node, input.clone()).await?;
        if state.is_stopped() {
            run.stopped = true;
            return Ok(());
        }
        self.dispatch_error(run, node, &state).await?;
        if run.stopped || state.is_skipped() {
            return Ok(());
        }

        let iterable = run
            .bound
            .get(node.code())
            .map(|bound| bound.capabilities.iterable)
            .unwrap_or(false);
        if !iterable {
            if let Some(value) = success_value(&state) {
                self.dispatch_success(run, node, value).await?;
            }
            return Ok(());
        }

        // Each item flows through the whole downstream subgraph before the
        // next one is pulled; blocking descendants settle once the source
        // is exhausted
        run.blocking_scopes.push(Vec::new());
        loop {
            if let Some(value) = success_value(&state) {
                self.dispatch_success(run, node, value).await?;
            }
            if run.stopped {
                break;
            }

            let next_result = run
                .bound
                .get_mut(node.code())
                .expect("task bound before iteration")
                .task
                .next(&mut state)
                .await;
            let more = match next_result {
                Ok(more) => more,
                Err(error) => {
                    self.classify(run.graph.code(), node, &mut state, Err(error))?;
                    if state.is_stopped() {
                        run.stopped = true;
                    }
                    false
                }
            };
            if run.stopped || !more {
                break;
            }

            state = self.execute_once(run, node, input.clone()).await?;
            if state.is_stopped() {
                run.stopped = true;
                break;
            }
            self.dispatch_error(run, node, &state).await?;
            if run.stopped || state.is_skipped() {
                break;
            }
        }
        let scope = run.blocking_scopes.pop().unwrap_or_default();
        if !run.stopped {
            self.drain_blocking(run, scope).await?;
        }
        Ok(())
    }

    /// Fire each pending blocking task exactly once, then advance its
    /// downstream with the output it synthesized
    async fn drain_blocking(
        &self,
        run: &mut ProcessRun,
        scope: Vec<String>,
    ) -> Result<(), ProcessError> {
        for code in scope {
            if run.stopped {
                break;
            }
            let graph = run.graph.clone();
            let node = graph
                .node(&code)
                .expect("blocking node validated at resolution");
            let process_code = graph.code().to_string();

            let bound = run
                .bound
                .get_mut(&code)
                .expect("blocking task bound before drain");
            if !bound.pending_proceed {
                continue;
            }
            bound.pending_proceed = false;
            let mut state = bound.last_state.clone();
            state.reset_outcome();
            let result = bound.task.proceed(&mut state).await;

            let classified = self.classify(&process_code, node, &mut state, result);
            self.log_state(node, &state);
            if let Some(bound) = run.bound.get_mut(&code) {
                bound.last_state = state.clone();
            }
            classified?;

            if state.is_stopped() {
                run.stopped = true;
                break;
            }
            self.dispatch_error(run, node, &state).await?;
            if run.stopped || state.is_skipped() {
                continue;
            }
            if let Some(value) = success_value(&state) {
                self.dispatch_success(run, node, value).await?;
            }
        }
        Ok(())
    }

    /// Record the produced output and route it to each success edge in
    /// declaration order
    async fn dispatch_success(
        &self,
        run: &mut ProcessRun,
        node: &TaskNode,
        output: Value,
    ) -> Result<(), ProcessError> {
        run.last_output = Some(output.clone());
        if run.graph.end_point() == Some(node.code()) {
            run.end_point_output = Some(output.clone());
        }
        for target in node.next_nodes() {
            if run.stopped {
                break;
            }
            self.dispatch_to(run, target.clone(), output.clone()).await?;
        }
        Ok(())
    }

    /// Route the error output, if any, to each error edge in declaration
    /// order. Applies even when the node was skipped.
    async fn dispatch_error(
        &self,
        run: &mut ProcessRun,
        node: &TaskNode,
        state: &RunState,
    ) -> Result<(), ProcessError> {
        let Some(error_output) = state.error_output().cloned() else {
            return Ok(());
        };
        for target in node.error_nodes() {
            if run.stopped {
                break;
            }
            self.dispatch_to(run, target.clone(), error_output.clone())
                .await?;
        }
        Ok(())
    }

    /// Execute the bound task once with a fresh state and classify the
    /// outcome through the node's error strategy
    async fn execute_once(
        &self,
        run: &mut ProcessRun,
        node: &TaskNode,
        input: Value,
    ) -> Result<RunState, ProcessError> {
        let process_code = run.graph.code().to_string();
        let mut state = RunState::with_context(node.code(), input, run.context.clone());

        let result = run
            .bound
            .get_mut(node.code())
            .expect("task bound before execution")
            .task
            .execute(&mut state)
            .await;

        let classified = self.classify(&process_code, node, &mut state, result);
        self.log_state(node, &state);
        if let Some(bound) = run.bound.get_mut(node.code()) {
            bound.last_state = state.clone();
        }
        classified?;
        Ok(state)
    }

    /// Apply the node's error strategy to a raised task error
    fn classify(
        &self,
        process_code: &str,
        node: &TaskNode,
        state: &mut RunState,
        result: Result<(), Box<dyn Error + Send + Sync>>,
    ) -> Result<(), ProcessError> {
        let Err(error) = result else {
            return Ok(());
        };
        match node.error_strategy() {
            ErrorStrategy::Propagate => {
                log::error!(
                    target: LOG_TARGET,
                    "Task '{}' failed in process '{}': {}",
                    node.code(),
                    process_code,
                    error
                );
                Err(ProcessError::TaskFailed {
                    process: process_code.to_string(),
                    task: node.code().to_string(),
                    service: node.service().to_string(),
                    error_output: state.error_output().cloned(),
                    source: error,
                })
            }
            ErrorStrategy::Skip => {
                log::warn!(
                    target: LOG_TARGET,
                    "Task '{}' failed in process '{}', skipping its branch: {}",
                    node.code(),
                    process_code,
                    error
                );
                state.skip();
                // Declared error branches receive the input that failed
                if !state.has_error_output() {
                    let failing_input = state.input().clone();
                    state.set_error_output(failing_input);
                }
                Ok(())
            }
            ErrorStrategy::Stop => {
                log::warn!(
                    target: LOG_TARGET,
                    "Task '{}' failed in process '{}', stopping the run: {}",
                    node.code(),
                    process_code,
                    error
                );
                state.stop();
                Ok(())
            }
        }
    }

    /// Bind a fresh task instance to a node on first activation: build,
    /// resolve options, configure, snapshot capabilities
    async fn bind(&self, run: &mut ProcessRun, node: &TaskNode) -> Result<(), ProcessError> {
        if run.bound.contains_key(node.code()) {
            return Ok(());
        }

        let mut task = self.tasks.bind(node.service()).await?;
        let options = task
            .options_schema()
            .resolve(node.options())
            .map_err(|source| ProcessError::Options {
                owner: owner_label(node),
                source,
            })?;
        task.configure(options).map_err(|source| ProcessError::Options {
            owner: owner_label(node),
            source,
        })?;
        let capabilities = task.capabilities();
        log::debug!(
            target: LOG_TARGET,
            "Bound task '{}' to service '{}' (iterable={}, blocking={}, finalizable={})",
            node.code(),
            node.service(),
            capabilities.iterable,
            capabilities.blocking,
            capabilities.finalizable
        );

        run.bound.insert(
            node.code().to_string(),
            BoundTask {
                task,
                capabilities,
                last_state: RunState::with_context(node.code(), Value::Null, run.context.clone()),
                pending_proceed: false,
                finalized: false,
            },
        );
        run.activation_order.push(node.code().to_string());
        Ok(())
    }

    /// Finalize every activated finalizable task exactly once, in reverse
    /// activation order. Failures are logged, never thrown: the run's
    /// outcome is already decided.
    async fn finalize_run(&self, run: &mut ProcessRun) {
        let process_code = run.graph.code().to_string();
        for code in run.activation_order.clone().into_iter().rev() {
            let Some(bound) = run.bound.get_mut(&code) else {
                continue;
            };
            if !bound.capabilities.finalizable || bound.finalized {
                continue;
            }
            bound.finalized = true;
            let mut state = bound.last_state.clone();
            if let Err(error) = bound.task.finalize(&mut state).await {
                log::error!(
                    target: LOG_TARGET,
                    "Finalizer of task '{}' failed in process '{}': {}",
                    code,
                    process_code,
                    error
                );
            }
        }
    }

    fn log_state(&self, node: &TaskNode, state: &RunState) {
        let target = if node.in_error_branch() {
            ERROR_BRANCH_TARGET
        } else {
            LOG_TARGET
        };
        log::log!(
            target: target,
            node.log_level(),
            "Task '{}': skipped={} stopped={} error_output={}",
            node.code(),
            state.is_skipped(),
            state.is_stopped(),
            state.has_error_output()
        );
    }
}

fn owner_label(node: &TaskNode) -> String {
    format!("task '{}' (service '{}')", node.code(), node.service())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::error::{ConfigurationError, OptionsError};
    use crate::contract::options::{FieldType, OptionsSchema, ResolvedOptions};
    use crate::process::description::{Outputs, ProcessDescription, TaskDescription};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    // ------------------------------------------------------------------
    // Mock tasks
    // ------------------------------------------------------------------

    struct EchoTask;

    #[async_trait]
    impl Task for EchoTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let input = state.input().clone();
            state.set_output(input);
            Ok(())
        }
    }

    struct AppendTask {
        suffix: &'static str,
    }

    #[async_trait]
    impl Task for AppendTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let text = state.input().as_str().unwrap_or_default().to_string();
            state.set_output(json!(format!("{text}{}", self.suffix)));
            Ok(())
        }
    }

    /// Records every input it sees; produces no explicit output so the
    /// input passes through
    struct RecorderTask {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl Task for RecorderTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, state.input()));
            Ok(())
        }
    }

    struct FailTask;

    #[async_trait]
    impl Task for FailTask {
        async fn execute(
            &mut self,
            _state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("boom".into())
        }
    }

    struct StopTask;

    #[async_trait]
    impl Task for StopTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            state.stop();
            Ok(())
        }
    }

    struct ErrorEmitTask;

    #[async_trait]
    impl Task for ErrorEmitTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            state.set_error_output(json!("bad record"));
            Ok(())
        }
    }

    /// Streams a fixed list of items, one per execute
    struct SourceTask {
        items: Vec<Value>,
        cursor: usize,
    }

    #[async_trait]
    impl Task for SourceTask {
        fn capabilities(&self) -> Capabilities {
            Capabilities::new().with_iterable()
        }

        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let item = self.items.get(self.cursor).cloned().unwrap_or(Value::Null);
            state.set_output(item);
            Ok(())
        }

        async fn next(
            &mut self,
            _state: &mut RunState,
        ) -> Result<bool, Box<dyn Error + Send + Sync>> {
            self.cursor += 1;
            Ok(self.cursor < self.items.len())
        }
    }

    /// Accumulates every delivered item, emits them all once on proceed
    struct CollectTask {
        journal: Journal,
        gathered: Vec<Value>,
    }

    #[async_trait]
    impl Task for CollectTask {
        fn capabilities(&self) -> Capabilities {
            Capabilities::new().with_blocking()
        }

        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.journal.lock().unwrap().push("collect:exec".to_string());
            self.gathered.push(state.input().clone());
            Ok(())
        }

        async fn proceed(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.journal
                .lock()
                .unwrap()
                .push("collect:proceed".to_string());
            state.set_output(Value::Array(self.gathered.clone()));
            Ok(())
        }
    }

    struct FinalizeProbeTask {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl Task for FinalizeProbeTask {
        fn capabilities(&self) -> Capabilities {
            Capabilities::new().with_finalizable()
        }

        async fn execute(
            &mut self,
            _state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("exec:{}", self.name));
            Ok(())
        }

        async fn finalize(
            &mut self,
            _state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("finalize:{}", self.name));
            Ok(())
        }
    }

    struct ContextProbeTask;

    #[async_trait]
    impl Task for ContextProbeTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let tenant = state.context().get("tenant").cloned().unwrap_or(Value::Null);
            state.set_output(tenant);
            Ok(())
        }
    }

    struct ConfiguredTask {
        path: String,
    }

    #[async_trait]
    impl Task for ConfiguredTask {
        fn options_schema(&self) -> OptionsSchema {
            OptionsSchema::new()
                .required("path", FieldType::String)
                .optional("mode", FieldType::String, json!("append"))
        }

        fn configure(&mut self, options: ResolvedOptions) -> Result<(), OptionsError> {
            self.path = options.get_str("path").unwrap_or_default().to_string();
            Ok(())
        }

        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            state.set_output(json!(self.path));
            Ok(())
        }
    }

    /// Invokes another process through the same manager
    struct SubProcessTask {
        manager: ProcessManager,
        process: String,
    }

    #[async_trait]
    impl Task for SubProcessTask {
        async fn execute(
            &mut self,
            state: &mut RunState,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let output = self
                .manager
                .execute(&self.process, state.input().clone())
                .await?;
            state.set_output(output);
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn task(service: &str, outputs: &[&str]) -> TaskDescription {
        TaskDescription {
            service: service.to_string(),
            outputs: Outputs::from(outputs),
            ..Default::default()
        }
    }

    fn process(tasks: Vec<(&str, TaskDescription)>) -> ProcessDescription {
        ProcessDescription {
            tasks: tasks
                .into_iter()
                .map(|(code, task)| (code.to_string(), task))
                .collect(),
            ..Default::default()
        }
    }

    async fn manager_for(
        code: &str,
        description: ProcessDescription,
        registry: TaskRegistry,
    ) -> ProcessManager {
        let resolver = Arc::new(ProcessResolver::new());
        resolver.register(code, description).await;
        ProcessManager::new(resolver, registry)
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_linear_chain_returns_last_output() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("echo", || Box::new(EchoTask) as Box<dyn Task>)
            .await;
        registry
            .register_fn("decorate", || {
                Box::new(AppendTask { suffix: " world" }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![
            ("read", task("echo", &["decorate"])),
            ("decorate", task("decorate", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!("hello")).await.unwrap();
        assert_eq!(result, json!("hello world"));
    }

    #[tokio::test]
    async fn test_skip_strategy_halts_branch_cleanly() {
        // a throws with skip strategy: no exception reaches the caller, b
        // never executes, the final output is absent
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("fail", || Box::new(FailTask) as Box<dyn Task>)
            .await;
        let b_journal = journal.clone();
        registry
            .register_fn("recorder", move || {
                Box::new(RecorderTask {
                    name: "b",
                    journal: b_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let mut failing = task("fail", &["b"]);
        failing.error_strategy = ErrorStrategy::Skip;
        let description = process(vec![("a", failing), ("b", task("recorder", &[]))]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!("X")).await.unwrap();
        assert_eq!(result, Value::Null);
        assert!(entries(&journal).is_empty(), "b must never execute");
    }

    #[tokio::test]
    async fn test_skip_routes_failing_input_to_error_branch() {
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("fail", || Box::new(FailTask) as Box<dyn Task>)
            .await;
        let q_journal = journal.clone();
        registry
            .register_fn("recorder", move || {
                Box::new(RecorderTask {
                    name: "q",
                    journal: q_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let mut failing = task("fail", &[]);
        failing.error_strategy = ErrorStrategy::Skip;
        failing.error_outputs = Outputs::Single("q".to_string());
        let description = process(vec![("a", failing), ("q", task("recorder", &[]))]);
        let manager = manager_for("p", description, registry).await;

        manager.execute("p", json!("payload")).await.unwrap();
        assert_eq!(entries(&journal), vec![r#"q:"payload""#.to_string()]);
    }

    #[tokio::test]
    async fn test_stop_halts_run_with_last_good_output() {
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("echo", || Box::new(EchoTask) as Box<dyn Task>)
            .await;
        registry
            .register_fn("halt", || Box::new(StopTask) as Box<dyn Task>)
            .await;
        let c_journal = journal.clone();
        registry
            .register_fn("recorder", move || {
                Box::new(RecorderTask {
                    name: "c",
                    journal: c_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![
            ("a", task("echo", &["halt"])),
            ("halt", task("halt", &["c"])),
            ("c", task("recorder", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!("x")).await.unwrap();
        assert_eq!(result, json!("x"));
        assert!(entries(&journal).is_empty(), "c must never execute");
    }

    #[tokio::test]
    async fn test_stop_strategy_absorbs_failure() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("echo", || Box::new(EchoTask) as Box<dyn Task>)
            .await;
        registry
            .register_fn("fail", || Box::new(FailTask) as Box<dyn Task>)
            .await;

        let mut failing = task("fail", &[]);
        failing.error_strategy = ErrorStrategy::Stop;
        let description = process(vec![("a", task("echo", &["boom"])), ("boom", failing)]);
        let manager = manager_for("p", description, registry).await;

        // The caller gets the last good output, not an error
        let result = manager.execute("p", json!("x")).await.unwrap();
        assert_eq!(result, json!("x"));
    }

    #[tokio::test]
    async fn test_propagate_surfaces_full_context() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("fail", || Box::new(FailTask) as Box<dyn Task>)
            .await;

        let description = process(vec![("boom", task("fail", &[]))]);
        let manager = manager_for("p", description, registry).await;

        let err = manager.execute("p", json!(1)).await.unwrap_err();
        match err {
            ProcessError::TaskFailed {
                process,
                task,
                service,
                ..
            } => {
                assert_eq!(process, "p");
                assert_eq!(task, "boom");
                assert_eq!(service, "fail");
            }
            other => panic!("Expected TaskFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_iterable_drives_downstream_once_per_item() {
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("source", || {
                Box::new(SourceTask {
                    items: vec![json!(1), json!(2), json!(3)],
                    cursor: 0,
                }) as Box<dyn Task>
            })
            .await;
        let rec_journal = journal.clone();
        registry
            .register_fn("recorder", move || {
                Box::new(RecorderTask {
                    name: "rec",
                    journal: rec_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![
            ("src", task("source", &["rec"])),
            ("rec", task("recorder", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!(null)).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec!["rec:1".to_string(), "rec:2".to_string(), "rec:3".to_string()]
        );
        assert_eq!(result, json!(3));
    }

    #[tokio::test]
    async fn test_blocking_consumes_stream_then_proceeds_once() {
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("source", || {
                Box::new(SourceTask {
                    items: vec![json!(1), json!(2), json!(3)],
                    cursor: 0,
                }) as Box<dyn Task>
            })
            .await;
        let collect_journal = journal.clone();
        registry
            .register_fn("collector", move || {
                Box::new(CollectTask {
                    journal: collect_journal.clone(),
                    gathered: Vec::new(),
                }) as Box<dyn Task>
            })
            .await;
        let rec_journal = journal.clone();
        registry
            .register_fn("recorder", move || {
                Box::new(RecorderTask {
                    name: "rec",
                    journal: rec_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![
            ("src", task("source", &["write"])),
            ("write", task("collector", &["rec"])),
            ("rec", task("recorder", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!(null)).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec![
                "collect:exec".to_string(),
                "collect:exec".to_string(),
                "collect:exec".to_string(),
                "collect:proceed".to_string(),
                "rec:[1,2,3]".to_string(),
            ]
        );
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_blocking_without_iterable_producer_settles_at_run_end() {
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("echo", || Box::new(EchoTask) as Box<dyn Task>)
            .await;
        let collect_journal = journal.clone();
        registry
            .register_fn("collector", move || {
                Box::new(CollectTask {
                    journal: collect_journal.clone(),
                    gathered: Vec::new(),
                }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![
            ("a", task("echo", &["write"])),
            ("write", task("collector", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!("only")).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec!["collect:exec".to_string(), "collect:proceed".to_string()]
        );
        assert_eq!(result, json!(["only"]));
    }

    #[tokio::test]
    async fn test_finalizers_run_in_reverse_activation_order() {
        let journal = journal();
        let registry = TaskRegistry::new();
        let first_journal = journal.clone();
        registry
            .register_fn("first", move || {
                Box::new(FinalizeProbeTask {
                    name: "first",
                    journal: first_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;
        let second_journal = journal.clone();
        registry
            .register_fn("second", move || {
                Box::new(FinalizeProbeTask {
                    name: "second",
                    journal: second_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![
            ("a", task("first", &["b"])),
            ("b", task("second", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        manager.execute("p", json!(null)).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec![
                "exec:first".to_string(),
                "exec:second".to_string(),
                "finalize:second".to_string(),
                "finalize:first".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_finalizers_still_run_when_a_task_propagates() {
        let journal = journal();
        let registry = TaskRegistry::new();
        let probe_journal = journal.clone();
        registry
            .register_fn("probe", move || {
                Box::new(FinalizeProbeTask {
                    name: "probe",
                    journal: probe_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;
        registry
            .register_fn("fail", || Box::new(FailTask) as Box<dyn Task>)
            .await;

        let description = process(vec![
            ("a", task("probe", &["boom"])),
            ("boom", task("fail", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!(null)).await;
        assert!(result.is_err());
        assert!(entries(&journal).contains(&"finalize:probe".to_string()));
    }

    #[tokio::test]
    async fn test_end_point_selects_the_process_result() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("echo", || Box::new(EchoTask) as Box<dyn Task>)
            .await;
        registry
            .register_fn("decorate", || {
                Box::new(AppendTask { suffix: "!" }) as Box<dyn Task>
            })
            .await;

        let description = ProcessDescription {
            end_point: Some("a".to_string()),
            tasks: [
                ("a".to_string(), task("echo", &["b"])),
                ("b".to_string(), task("decorate", &[])),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let manager = manager_for("p", description, registry).await;

        // b still runs, but only a's output counts
        let result = manager.execute("p", json!("x")).await.unwrap();
        assert_eq!(result, json!("x"));
    }

    #[tokio::test]
    async fn test_clean_error_output_takes_error_edges_only() {
        let journal = journal();
        let registry = TaskRegistry::new();
        registry
            .register_fn("emit", || Box::new(ErrorEmitTask) as Box<dyn Task>)
            .await;
        let ok_journal = journal.clone();
        registry
            .register_fn("ok_recorder", move || {
                Box::new(RecorderTask {
                    name: "ok",
                    journal: ok_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;
        let err_journal = journal.clone();
        registry
            .register_fn("err_recorder", move || {
                Box::new(RecorderTask {
                    name: "err",
                    journal: err_journal.clone(),
                }) as Box<dyn Task>
            })
            .await;

        let mut emitting = task("emit", &["ok"]);
        emitting.error_outputs = Outputs::Single("err".to_string());
        let description = process(vec![
            ("emit", emitting),
            ("ok", task("ok_recorder", &[])),
            ("err", task("err_recorder", &[])),
        ]);
        let manager = manager_for("p", description, registry).await;

        manager.execute("p", json!("row")).await.unwrap();
        assert_eq!(entries(&journal), vec![r#"err:"bad record""#.to_string()]);
    }

    #[tokio::test]
    async fn test_subprocess_invocation_is_reentrant() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("decorate", || {
                Box::new(AppendTask { suffix: "+inner" }) as Box<dyn Task>
            })
            .await;

        let resolver = Arc::new(ProcessResolver::new());
        resolver
            .register("inner", process(vec![("only", task("decorate", &[]))]))
            .await;
        resolver
            .register("outer", process(vec![("sub", task("subprocess", &[]))]))
            .await;
        let manager = ProcessManager::new(resolver, registry.clone());

        let inner_manager = manager.clone();
        registry
            .register_fn("subprocess", move || {
                Box::new(SubProcessTask {
                    manager: inner_manager.clone(),
                    process: "inner".to_string(),
                }) as Box<dyn Task>
            })
            .await;

        let result = manager.execute("outer", json!("x")).await.unwrap();
        assert_eq!(result, json!("x+inner"));
    }

    #[tokio::test]
    async fn test_context_is_visible_to_tasks() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("probe", || Box::new(ContextProbeTask) as Box<dyn Task>)
            .await;

        let description = process(vec![("probe", task("probe", &[]))]);
        let manager = manager_for("p", description, registry).await;

        let context = [("tenant".to_string(), json!("acme"))]
            .into_iter()
            .collect();
        let result = manager
            .execute_in_context("p", json!(null), context)
            .await
            .unwrap();
        assert_eq!(result, json!("acme"));
    }

    #[tokio::test]
    async fn test_missing_required_option_fails_at_bind() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("writer", || {
                Box::new(ConfiguredTask {
                    path: String::new(),
                }) as Box<dyn Task>
            })
            .await;

        let description = process(vec![("write", task("writer", &[]))]);
        let manager = manager_for("p", description, registry).await;

        let err = manager.execute("p", json!(null)).await.unwrap_err();
        match err {
            ProcessError::Options { owner, source } => {
                assert!(owner.contains("write"));
                assert!(matches!(source, OptionsError::MissingOption(name) if name == "path"));
            }
            other => panic!("Expected Options error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_configured_options_reach_the_task() {
        let registry = TaskRegistry::new();
        registry
            .register_fn("writer", || {
                Box::new(ConfiguredTask {
                    path: String::new(),
                }) as Box<dyn Task>
            })
            .await;

        let mut write = task("writer", &[]);
        write
            .options
            .insert("path".to_string(), json!("/var/out.csv"));
        let description = process(vec![("write", write)]);
        let manager = manager_for("p", description, registry).await;

        let result = manager.execute("p", json!(null)).await.unwrap();
        assert_eq!(result, json!("/var/out.csv"));
    }

    #[tokio::test]
    async fn test_unregistered_service_fails_at_bind() {
        let registry = TaskRegistry::new();
        let description = process(vec![("a", task("ghost", &[]))]);
        let manager = manager_for("p", description, registry).await;

        let err = manager.execute("p", json!(null)).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Configuration(ConfigurationError::MissingService(s)) if s == "ghost"
        ));
    }
}
