use crate::discovery::{normalize_path, BuildUnit};
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
    Direction,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Edge from a unit to a unit it depends on. The weight is the position of the
/// reference in the unit's build config, so traversal follows declaration order.
pub type DependencyGraph = DiGraph<BuildUnit, usize>;

#[derive(Debug, Deserialize)]
struct BuildConfigReferences {
    #[serde(default)]
    references: Vec<ProjectReference>,
}

#[derive(Debug, Deserialize)]
struct ProjectReference {
    path: String,
}

/// An edge dropped while ordering because it closed a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSummary {
    pub units: usize,
    pub edges: usize,
    pub cycles: usize,
}

/// Dependency-ordered units for one run.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub order: Vec<BuildUnit>,
    pub skipped_edges: Vec<SkippedEdge>,
}

pub struct Scheduler {
    graph: DependencyGraph,
    node_map: HashMap<PathBuf, NodeIndex>,
}

impl Scheduler {
    /// Build the graph from each unit's declared project references. Only
    /// references to units in `units` become edges.
    pub fn new(units: &[BuildUnit]) -> Self {
        let mut graph = DependencyGraph::new();
        let mut node_map = HashMap::new();
        for unit in units {
            if node_map.contains_key(&unit.path) {
                continue;
            }
            let index = graph.add_node(unit.clone());
            node_map.insert(unit.path.clone(), index);
        }

        let mut scheduler = Self { graph, node_map };
        for unit in units {
            scheduler.add_reference_edges(unit);
        }
        scheduler
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    fn add_reference_edges(&mut self, unit: &BuildUnit) {
        let Some(&from) = self.node_map.get(&unit.path) else {
            return;
        };
        for (position, target) in unit.references.iter().enumerate() {
            let Some(&to) = self.node_map.get(target) else {
                debug!("{}: reference {} is outside the unit set", unit.name(), target.display());
                continue;
            };
            if to == from {
                warn!("{}: ignoring self reference", unit.name());
                continue;
            }
            if self.graph.find_edge(from, to).is_none() {
                self.graph.add_edge(from, to, position);
            }
        }
    }

    /// Units the given unit depends on, in declaration order.
    pub fn dependencies_of(&self, unit: &BuildUnit) -> Vec<&BuildUnit> {
        self.node_map
            .get(&unit.path)
            .map(|&index| {
                self.ordered_dependencies(index)
                    .into_iter()
                    .map(|dep| &self.graph[dep])
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ordered_dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        edges.sort_by_key(|(position, _)| *position);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    /// Depth-first topological order: every unit comes after the units it
    /// depends on. Independent units keep discovery order. An edge that closes
    /// a cycle is skipped with a warning and the walk continues.
    pub fn schedule(&self) -> Schedule {
        let mut walk = Walk {
            visited: HashSet::new(),
            in_progress: HashSet::new(),
            order: Vec::with_capacity(self.graph.node_count()),
            skipped_edges: Vec::new(),
        };

        for index in self.graph.node_indices() {
            if !walk.visited.contains(&index) {
                self.visit(index, &mut walk);
            }
        }

        let summary = GraphSummary {
            units: self.graph.node_count(),
            edges: self.graph.edge_count(),
            cycles: walk.skipped_edges.len(),
        };
        info!(
            "Dependency graph: {} unit(s), {} edge(s), {} cycle edge(s) skipped",
            summary.units, summary.edges, summary.cycles
        );

        Schedule {
            order: walk.order.into_iter().map(|i| self.graph[i].clone()).collect(),
            skipped_edges: walk.skipped_edges,
        }
    }

    fn visit(&self, index: NodeIndex, walk: &mut Walk) {
        walk.in_progress.insert(index);
        for dep in self.ordered_dependencies(index) {
            if walk.in_progress.contains(&dep) {
                let edge = SkippedEdge {
                    from: self.graph[index].relative_path.clone(),
                    to: self.graph[dep].relative_path.clone(),
                };
                warn!("Dependency cycle detected, skipping edge {} -> {}", edge.from, edge.to);
                walk.skipped_edges.push(edge);
                continue;
            }
            if !walk.visited.contains(&dep) {
                self.visit(dep, walk);
            }
        }
        walk.in_progress.remove(&index);
        walk.visited.insert(index);
        walk.order.push(index);
    }
}

struct Walk {
    visited: HashSet<NodeIndex>,
    in_progress: HashSet<NodeIndex>,
    order: Vec<NodeIndex>,
    skipped_edges: Vec<SkippedEdge>,
}

/// Absolute directories named by the `references` of the build config at
/// `config_path`, resolved against `unit_dir`. Broken configs yield none.
pub fn read_references(config_path: &Path, unit_dir: &Path) -> Vec<PathBuf> {
    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read {}: {}", config_path.display(), e);
            return Vec::new();
        }
    };
    let parsed: BuildConfigReferences = match serde_json::from_str(&strip_json_comments(&content)) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Could not parse {}: {}", config_path.display(), e);
            return Vec::new();
        }
    };

    parsed
        .references
        .into_iter()
        .map(|reference| resolve_reference(unit_dir, &reference.path))
        .collect()
}

fn resolve_reference(unit_dir: &Path, reference: &str) -> PathBuf {
    let target = normalize_path(&unit_dir.join(reference));
    let is_config_file = target
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    match target.parent() {
        Some(parent) if is_config_file => parent.to_path_buf(),
        _ => target,
    }
}

/// Remove `//` and `/* */` comments and trailing commas so JSON-with-comments
/// build configs parse as JSON. String literals are left untouched. Comments
/// go first so a comma followed by a comment and a closing bracket is seen as
/// trailing.
pub fn strip_json_comments(input: &str) -> String {
    strip_trailing_commas(&strip_comments(input))
}

fn strip_comments(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn unit(root: &Path, rel: &str, config: &str) -> BuildUnit {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("tsconfig.json"), config).unwrap();
        BuildUnit::load(root, normalize_path(&dir), "tsconfig.json")
    }

    fn order(schedule: &Schedule) -> Vec<&str> {
        schedule.order.iter().map(|u| u.relative_path.as_str()).collect()
    }

    fn position(schedule: &Schedule, name: &str) -> usize {
        order(schedule).iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let app = unit(root, "app", r#"{"references": [{"path": "../ui"}, {"path": "../core/tsconfig.json"}]}"#);
        let ui = unit(root, "ui", r#"{"references": [{"path": "../core"}]}"#);
        let core = unit(root, "core", "{}");

        let schedule = Scheduler::new(&[app, ui, core]).schedule();
        assert_eq!(order(&schedule), vec!["core", "ui", "app"]);
        assert!(schedule.skipped_edges.is_empty());
    }

    #[test]
    fn independent_units_keep_discovery_order() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let units = vec![
            unit(root, "c", "{}"),
            unit(root, "a", "{}"),
            unit(root, "b", r#"{"references": [{"path": "../outside"}]}"#),
        ];
        let schedule = Scheduler::new(&units).schedule();
        assert_eq!(order(&schedule), vec!["c", "a", "b"]);
    }

    #[test]
    fn cycles_are_broken_without_dropping_units() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let a = unit(root, "a", r#"{"references": [{"path": "../b"}]}"#);
        let b = unit(root, "b", r#"{"references": [{"path": "../c"}]}"#);
        let c = unit(root, "c", r#"{"references": [{"path": "../a"}, {"path": "."}]}"#);

        let schedule = Scheduler::new(&[a, b, c]).schedule();
        assert_eq!(schedule.order.len(), 3);
        assert_eq!(
            schedule.skipped_edges,
            vec![SkippedEdge { from: "c".into(), to: "a".into() }]
        );
        assert!(position(&schedule, "c") < position(&schedule, "b"));
        assert!(position(&schedule, "b") < position(&schedule, "a"));
    }

    #[test]
    fn unparseable_config_means_no_dependencies() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let broken = unit(root, "broken", "{ references: nope");
        let other = unit(root, "other", "{}");

        let scheduler = Scheduler::new(&[broken.clone(), other]);
        assert!(scheduler.dependencies_of(&broken).is_empty());
        assert_eq!(order(&scheduler.schedule()), vec!["broken", "other"]);
    }

    #[test]
    fn commented_configs_are_understood() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let lib = unit(root, "lib", "{}");
        let app = unit(
            root,
            "app",
            r#"{
                // project references
                "compilerOptions": { "baseUrl": "http://not-a-comment" }, /* block */
                "references": [
                    { "path": "../lib" },
                ],
            }"#,
        );

        let scheduler = Scheduler::new(&[app.clone(), lib]);
        let deps: Vec<&str> = scheduler
            .dependencies_of(&app)
            .iter()
            .map(|u| u.relative_path.as_str())
            .collect();
        assert_eq!(deps, vec!["lib"]);
    }

    #[test]
    fn trailing_comma_before_a_comment_is_removed() {
        let stripped = strip_json_comments("{\"references\": [{\"path\": \"../a\"}, // core\n]}");
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["references"][0]["path"], "../a");

        let stripped = strip_json_comments("{\"a\": 1, /* last */ }");
        assert!(serde_json::from_str::<serde_json::Value>(&stripped).is_ok());
    }

    #[test]
    fn reference_list_with_commented_trailing_comma_keeps_edges() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        let core = unit(root, "core", "{}");
        let app = unit(
            root,
            "app",
            "{\n  \"references\": [\n    { \"path\": \"../core\" }, // core\n  ]\n}",
        );

        let schedule = Scheduler::new(&[app, core]).schedule();
        assert_eq!(order(&schedule), vec!["core", "app"]);
    }

    #[test]
    fn strip_keeps_string_contents() {
        let stripped = strip_json_comments(r#"{"a": "// keep", "b": [1, 2,], } // gone"#);
        let value: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(value["a"], "// keep");
        assert_eq!(value["b"].as_array().unwrap().len(), 2);
    }
}
