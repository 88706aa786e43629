// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-diagram
//!
//! Builds the relationship graph of cycles and tasks — from the
//! authoritative hierarchy only (`childCycleIds` and `taskIds`; no
//! implicit edges) — and renders it to Mermaid flowchart text. A
//! fingerprint cache skips the rebuild when the inputs are unchanged.

use gitgov_record::{CycleRecord, CycleStatus, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// Label lines wrap at this many characters.
const LABEL_WRAP: usize = 24;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from diagram rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagramError {
    /// The generated Mermaid text failed its own validation.
    #[error("generated mermaid is invalid: {detail}")]
    RenderInvalid {
        /// What the validator found.
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Node kind in the relationship graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A cycle (rendered hexagonal).
    Cycle,
    /// A task (rendered rectangular).
    Task,
}

/// One node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Record ID.
    pub id: String,
    /// Human title.
    pub label: String,
    /// Cycle or task.
    pub kind: NodeKind,
    /// Status string, mapped to a CSS class in rendering.
    pub status: String,
}

/// One containment edge (cycle → child cycle, or cycle → task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Parent cycle ID.
    pub from: String,
    /// Child cycle or task ID.
    pub to: String,
}

/// The relationship graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes, in insertion order (cycles first).
    pub nodes: Vec<GraphNode>,
    /// Containment edges.
    pub edges: Vec<GraphEdge>,
}

/// Filters applied while building the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagramFilter {
    /// Restrict to the subtree rooted at this cycle.
    pub cycle_id: Option<String>,
    /// Restrict to this task and the cycles containing it.
    pub task_id: Option<String>,
    /// Restrict to tasks tagged with this package (`name` or
    /// `package:name`).
    pub package_name: Option<String>,
    /// Include archived cycles and tasks (excluded by default).
    pub include_archived: bool,
}

/// Build the relationship graph from the authoritative hierarchy.
#[must_use]
pub fn analyze_relationships(
    cycles: &[CycleRecord],
    tasks: &[TaskRecord],
    filter: &DiagramFilter,
) -> Graph {
    let cycle_by_id: BTreeMap<&str, &CycleRecord> =
        cycles.iter().map(|c| (c.id.as_str(), c)).collect();
    let task_by_id: BTreeMap<&str, &TaskRecord> =
        tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    // Which cycles are in scope.
    let cycle_scope: BTreeSet<&str> = match &filter.cycle_id {
        Some(root) => subtree_cycles(root, &cycle_by_id),
        None => match &filter.task_id {
            Some(task_id) => cycles
                .iter()
                .filter(|c| c.task_ids.iter().any(|t| t == task_id))
                .map(|c| c.id.as_str())
                .collect(),
            None => cycle_by_id.keys().copied().collect(),
        },
    };

    let task_in_scope = |task: &TaskRecord| -> bool {
        if let Some(task_id) = &filter.task_id
            && task.id != *task_id
        {
            return false;
        }
        if let Some(package) = &filter.package_name {
            let tagged = task
                .tags
                .iter()
                .any(|tag| tag == package || *tag == format!("package:{package}"));
            if !tagged {
                return false;
            }
        }
        if !filter.include_archived && task.status == TaskStatus::Archived {
            return false;
        }
        true
    };

    let mut graph = Graph::default();
    let mut included_tasks: BTreeSet<&str> = BTreeSet::new();

    for cycle in cycles {
        if !cycle_scope.contains(cycle.id.as_str()) {
            continue;
        }
        if !filter.include_archived && cycle.status == CycleStatus::Archived {
            continue;
        }
        graph.nodes.push(GraphNode {
            id: cycle.id.clone(),
            label: cycle.title.clone(),
            kind: NodeKind::Cycle,
            status: status_str(&cycle.status),
        });

        for child in &cycle.child_cycle_ids {
            let in_scope = cycle_scope.contains(child.as_str());
            let archived_child = cycle_by_id
                .get(child.as_str())
                .is_some_and(|c| c.status == CycleStatus::Archived);
            if in_scope && (filter.include_archived || !archived_child) {
                graph.edges.push(GraphEdge {
                    from: cycle.id.clone(),
                    to: child.clone(),
                });
            }
        }

        for task_id in &cycle.task_ids {
            let Some(task) = task_by_id.get(task_id.as_str()) else {
                // Dangling reference; traversal is by lookup only.
                continue;
            };
            if !task_in_scope(task) {
                continue;
            }
            included_tasks.insert(task.id.as_str());
            graph.edges.push(GraphEdge {
                from: cycle.id.clone(),
                to: task.id.clone(),
            });
        }
    }

    for task_id in included_tasks {
        let task = task_by_id[task_id];
        graph.nodes.push(GraphNode {
            id: task.id.clone(),
            label: task.title.clone(),
            kind: NodeKind::Task,
            status: task.status.as_str().to_string(),
        });
    }

    graph
}

fn status_str(status: &CycleStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "unknown".into())
}

/// Cycles reachable from `root` through `childCycleIds`.
fn subtree_cycles<'a>(
    root: &str,
    cycles: &BTreeMap<&'a str, &'a CycleRecord>,
) -> BTreeSet<&'a str> {
    let mut seen: BTreeSet<&'a str> = BTreeSet::new();
    let mut queue: VecDeque<&'a str> = VecDeque::new();
    if let Some((id, _)) = cycles.get_key_value(root) {
        queue.push_back(*id);
    }
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(cycle) = cycles.get(id) {
            for child in &cycle.child_cycle_ids {
                if let Some((child_id, _)) = cycles.get_key_value(child.as_str()) {
                    queue.push_back(*child_id);
                }
            }
        }
    }
    seen
}

// ---------------------------------------------------------------------------
// Mermaid
// ---------------------------------------------------------------------------

/// Render a graph to Mermaid flowchart text.
///
/// Cycles are hexagonal, tasks rectangular; statuses map to CSS classes.
/// The output is validated (every edge references a declared node) before
/// it is returned.
///
/// # Errors
///
/// [`DiagramError::RenderInvalid`] when the generated text fails its own
/// validation.
pub fn render_mermaid(graph: &Graph) -> Result<String, DiagramError> {
    let mut out = String::from("flowchart TD\n");

    let mut declared: BTreeSet<String> = BTreeSet::new();
    for node in &graph.nodes {
        let id = sanitize_id(&node.id);
        let label = wrap_label(&node.label);
        match node.kind {
            NodeKind::Cycle => {
                out.push_str(&format!("    {id}{{{{\"{label}\"}}}}\n"));
            }
            NodeKind::Task => {
                out.push_str(&format!("    {id}[\"{label}\"]\n"));
            }
        }
        declared.insert(id);
    }

    for edge in &graph.edges {
        let from = sanitize_id(&edge.from);
        let to = sanitize_id(&edge.to);
        out.push_str(&format!("    {from} --> {to}\n"));
    }

    // Status classes.
    let mut by_status: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for node in &graph.nodes {
        by_status
            .entry(node.status.clone())
            .or_default()
            .push(sanitize_id(&node.id));
    }
    for (status, ids) in &by_status {
        out.push_str(&format!(
            "    classDef status_{status} stroke-width:2px;\n"
        ));
        out.push_str(&format!(
            "    class {} status_{status};\n",
            ids.join(",")
        ));
    }

    validate_mermaid(&out, &declared)?;
    Ok(out)
}

fn sanitize_id(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, 'n');
    }
    out
}

fn wrap_label(label: &str) -> String {
    let escaped = label.replace('"', "#quot;");
    let mut lines: Vec<String> = vec![String::new()];
    for word in escaped.split_whitespace() {
        let current = lines.last_mut().expect("at least one line");
        if !current.is_empty() && current.len() + 1 + word.len() > LABEL_WRAP {
            lines.push(word.to_string());
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    lines.join("<br/>")
}

/// Re-scan the generated text: every edge must reference a declared node.
fn validate_mermaid(text: &str, declared: &BTreeSet<String>) -> Result<(), DiagramError> {
    if !text.starts_with("flowchart") {
        return Err(DiagramError::RenderInvalid {
            detail: "missing flowchart header".into(),
        });
    }
    for line in text.lines() {
        let line = line.trim();
        if let Some((from, to)) = line.split_once(" --> ") {
            for endpoint in [from, to] {
                if !declared.contains(endpoint) {
                    return Err(DiagramError::RenderInvalid {
                        detail: format!("edge references undeclared node {endpoint}"),
                    });
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Rebuilds avoided.
    pub hits: u64,
    /// Rebuilds performed.
    pub misses: u64,
}

/// A single-entry graph cache keyed by a fingerprint of the sorted input
/// IDs plus the filter options.
#[derive(Default)]
pub struct GraphCache {
    entry: Mutex<(Option<(String, Graph)>, CacheStats)>,
}

impl GraphCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build (or reuse) the graph for these inputs.
    #[must_use]
    pub fn get_or_build(
        &self,
        cycles: &[CycleRecord],
        tasks: &[TaskRecord],
        filter: &DiagramFilter,
    ) -> Graph {
        let key = fingerprint(cycles, tasks, filter);
        let mut guard = self.entry.lock().expect("cache lock");
        if let (Some((cached_key, graph)), stats) = &mut *guard
            && *cached_key == key
        {
            stats.hits += 1;
            return graph.clone();
        }

        let graph = analyze_relationships(cycles, tasks, filter);
        let (entry, stats) = &mut *guard;
        stats.misses += 1;
        *entry = Some((key, graph.clone()));
        graph
    }

    /// Current hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.entry.lock().expect("cache lock").1
    }
}

/// Fingerprint of sorted record IDs (with per-record status so content
/// changes invalidate) plus the filter.
fn fingerprint(cycles: &[CycleRecord], tasks: &[TaskRecord], filter: &DiagramFilter) -> String {
    let mut ids: Vec<String> = Vec::with_capacity(cycles.len() + tasks.len());
    for cycle in cycles {
        ids.push(format!(
            "c:{}:{}:{}:{}",
            cycle.id,
            status_str(&cycle.status),
            cycle.child_cycle_ids.join("+"),
            cycle.task_ids.join("+"),
        ));
    }
    for task in tasks {
        ids.push(format!("t:{}:{}:{}", task.id, task.status, task.tags.join("+")));
    }
    ids.sort();

    let mut hasher = Sha256::new();
    for id in &ids {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(format!("{filter:?}").as_bytes());
    format!("{:x}", hasher.finalize())
}
