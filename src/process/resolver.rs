//! Graph resolver - turns flat process descriptions into validated graphs
//!
//! Resolution runs once per process code and the result is memoized; every
//! structural problem (missing reference, conflicting error declarations,
//! entry point with ancestors, circular dependency) is fatal here, before
//! any task can execute.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::contract::error::ConfigurationError;
use crate::process::description::ProcessDescription;
use crate::process::graph::{ProcessGraph, TaskNode};
use crate::process::loader::ProcessFile;

const LOG_TARGET: &str = "tramline::resolver";

/// Registry of process descriptions with memoized graph resolution
pub struct ProcessResolver {
    descriptions: RwLock<HashMap<String, ProcessDescription>>,
    cache: RwLock<HashMap<String, Arc<ProcessGraph>>>,
}

impl ProcessResolver {
    pub fn new() -> Self {
        Self {
            descriptions: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a resolver with every process from a parsed file
    pub fn from_file(file: ProcessFile) -> Self {
        Self {
            descriptions: RwLock::new(file.processes),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a process description
    pub async fn register(&self, code: impl Into<String>, description: ProcessDescription) {
        let code = code.into();
        self.cache.write().await.remove(&code);
        self.descriptions.write().await.insert(code, description);
    }

    /// All registered process codes, sorted
    pub async fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.descriptions.read().await.keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Resolve a process code to its validated graph, reusing a previously
    /// resolved graph when available
    pub async fn resolve(&self, code: &str) -> Result<Arc<ProcessGraph>, ConfigurationError> {
        if let Some(graph) = self.cache.read().await.get(code) {
            return Ok(graph.clone());
        }

        let graph = {
            let descriptions = self.descriptions.read().await;
            let description = descriptions
                .get(code)
                .ok_or_else(|| ConfigurationError::MissingProcess(code.to_string()))?;
            Arc::new(build_graph(code, description)?)
        };

        self.cache.write().await.insert(code.to_string(), graph.clone());
        Ok(graph)
    }
}

impl Default for ProcessResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a validated graph from a single process description
pub fn build_graph(
    code: &str,
    description: &ProcessDescription,
) -> Result<ProcessGraph, ConfigurationError> {
    let mut next_map: HashMap<String, Vec<String>> = HashMap::new();
    let mut error_map: HashMap<String, Vec<String>> = HashMap::new();
    let mut previous_map: HashMap<String, HashSet<String>> = HashMap::new();
    for task_code in description.tasks.keys() {
        previous_map.insert(task_code.clone(), HashSet::new());
    }

    // Linking pass: validate every declared edge and record back-references
    for (task_code, task) in &description.tasks {
        if !task.errors.is_empty() && !task.error_outputs.is_empty() {
            return Err(ConfigurationError::ConflictingErrorOutputs {
                process: code.to_string(),
                task: task_code.clone(),
            });
        }
        let error_targets = if task.errors.is_empty() {
            task.error_outputs.to_vec()
        } else {
            log::warn!(
                target: LOG_TARGET,
                "Task '{}' in process '{}' declares 'errors'; rename it to 'error_outputs'",
                task_code,
                code
            );
            task.errors.to_vec()
        };
        let next_targets = task.outputs.to_vec();

        for target in next_targets.iter().chain(error_targets.iter()) {
            match previous_map.get_mut(target) {
                Some(previous) => {
                    previous.insert(task_code.clone());
                }
                None => {
                    return Err(ConfigurationError::MissingTask {
                        process: code.to_string(),
                        referenced_from: task_code.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        next_map.insert(task_code.clone(), next_targets);
        error_map.insert(task_code.clone(), error_targets);
    }

    let mut roots: Vec<String> = previous_map
        .iter()
        .filter(|(_, previous)| previous.is_empty())
        .map(|(task_code, _)| task_code.clone())
        .collect();
    roots.sort();

    let mut in_error: HashMap<String, bool> = description
        .tasks
        .keys()
        .map(|task_code| (task_code.clone(), false))
        .collect();
    apply_error_branch_marking(&mut in_error, &next_map, &error_map, &roots);

    // Entry/end point validation
    if let Some(entry) = &description.entry_point {
        match previous_map.get(entry) {
            None => {
                return Err(ConfigurationError::UnknownEntryPoint {
                    process: code.to_string(),
                    task: entry.clone(),
                });
            }
            Some(previous) if !previous.is_empty() => {
                return Err(ConfigurationError::EntryPointHasAncestors {
                    process: code.to_string(),
                    task: entry.clone(),
                });
            }
            Some(_) => {}
        }
    }
    if let Some(end) = &description.end_point {
        if !description.tasks.contains_key(end) {
            return Err(ConfigurationError::UnknownEndPoint {
                process: code.to_string(),
                task: end.clone(),
            });
        }
    }

    // Cycle detection: ancestor walk over back-references from every node
    let mut sorted_codes: Vec<&String> = description.tasks.keys().collect();
    sorted_codes.sort();
    for task_code in &sorted_codes {
        let mut seen: HashSet<&String> = HashSet::new();
        let mut stack: Vec<&String> = previous_map[*task_code].iter().collect();
        while let Some(ancestor) = stack.pop() {
            if ancestor == *task_code {
                return Err(ConfigurationError::CircularProcess {
                    process: code.to_string(),
                    task: (*task_code).clone(),
                });
            }
            if seen.insert(ancestor) {
                stack.extend(previous_map[ancestor].iter());
            }
        }
    }

    // Connectivity: a single task group is expected, but not required
    let components = count_components(&next_map, &error_map);
    if components > 1 {
        log::warn!(
            target: LOG_TARGET,
            "Process '{}' contains {} disconnected task groups",
            code,
            components
        );
    }

    let mut nodes = HashMap::new();
    for (task_code, task) in &description.tasks {
        nodes.insert(
            task_code.clone(),
            TaskNode::new(
                task_code.clone(),
                task.clone(),
                next_map.remove(task_code).unwrap_or_default(),
                error_map.remove(task_code).unwrap_or_default(),
                previous_map.remove(task_code).unwrap_or_default(),
                in_error.get(task_code).copied().unwrap_or(false),
            ),
        );
    }

    Ok(ProcessGraph::new(
        code.to_string(),
        description.options.clone(),
        description.entry_point.clone(),
        description.end_point.clone(),
        nodes,
        roots,
    ))
}

/// Mark error branches, then let legitimate non-error paths win.
///
/// Marking: every target of an error edge, and everything reachable from it
/// through success or error edges, is flagged. Un-marking: from every root
/// not itself flagged, everything reachable through success edges alone is
/// un-flagged. Both walks use explicit stacks and terminate on cycles.
/// Applying the passes repeatedly is idempotent.
fn apply_error_branch_marking(
    in_error: &mut HashMap<String, bool>,
    next_map: &HashMap<String, Vec<String>>,
    error_map: &HashMap<String, Vec<String>>,
    roots: &[String],
) {
    let mut stack: Vec<String> = error_map.values().flatten().cloned().collect();
    while let Some(current) = stack.pop() {
        match in_error.get_mut(&current) {
            Some(flag) if !*flag => *flag = true,
            _ => continue,
        }
        stack.extend(next_map[&current].iter().cloned());
        stack.extend(error_map[&current].iter().cloned());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = roots
        .iter()
        .filter(|root| !in_error.get(*root).copied().unwrap_or(false))
        .cloned()
        .collect();
    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(flag) = in_error.get_mut(&current) {
            *flag = false;
        }
        stack.extend(next_map[&current].iter().cloned());
    }
}

/// Count weakly connected components over the union of success and error
/// edges
fn count_components(
    next_map: &HashMap<String, Vec<String>>,
    error_map: &HashMap<String, Vec<String>>,
) -> usize {
    let mut undirected: HashMap<&String, Vec<&String>> = HashMap::new();
    for task_code in next_map.keys() {
        undirected.entry(task_code).or_default();
    }
    for (from, targets) in next_map.iter().chain(error_map.iter()) {
        for to in targets {
            undirected.entry(from).or_default().push(to);
            undirected.entry(to).or_default().push(from);
        }
    }

    let mut visited: HashSet<&String> = HashSet::new();
    let mut components = 0;
    for start in undirected.keys() {
        if visited.contains(*start) {
            continue;
        }
        components += 1;
        let mut stack = vec![*start];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            stack.extend(undirected[current].iter().copied());
        }
    }
    components
}
