//! Dependency graph over issues.
//!
//! Design:
//! - Forward edges: issue -> issues it depends on
//! - Reverse edges: issue -> issues that depend on it (dependents)
//! - Invariant: edges and reverse_edges must be kept in sync
//! - Invariant: the graph stays acyclic; `add_dependency` refuses back edges

use std::collections::{HashMap, HashSet};

use super::ids::IssueId;
use super::issue::{Dependency, DependencyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// The edge would close a cycle: `path` runs from the new dependency back to
/// the dependent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<IssueId>,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// issue -> (depends_on -> kind)
    edges: HashMap<IssueId, HashMap<IssueId, DependencyKind>>,

    /// depends_on -> dependents
    reverse_edges: HashMap<IssueId, HashSet<IssueId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `dependency.issue_id` -> `dependency.depends_on_id`.
    ///
    /// Soft edges are checked too: a cycle of any kind makes the backlog
    /// impossible to explain, even if it would not deadlock readiness.
    pub fn add_dependency(&mut self, dependency: Dependency) -> Result<(), CycleError> {
        let Dependency {
            issue_id,
            depends_on_id,
            kind,
        } = dependency;

        if let Some(mut path) = self.path(depends_on_id, issue_id) {
            path.push(depends_on_id);
            return Err(CycleError { path });
        }

        self.edges
            .entry(issue_id)
            .or_default()
            .insert(depends_on_id, kind);
        self.reverse_edges
            .entry(depends_on_id)
            .or_default()
            .insert(issue_id);
        Ok(())
    }

    /// Edges out of `issue` (what it waits for).
    pub fn dependencies(&self, issue: IssueId) -> Vec<Dependency> {
        self.edges
            .get(&issue)
            .map(|deps| {
                deps.iter()
                    .map(|(&depends_on_id, &kind)| Dependency {
                        issue_id: issue,
                        depends_on_id,
                        kind,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Edges into `issue` (who waits for it).
    pub fn dependents(&self, issue: IssueId) -> Vec<Dependency> {
        self.reverse_edges
            .get(&issue)
            .map(|waiting| {
                waiting
                    .iter()
                    .filter_map(|&dependent| {
                        self.edges
                            .get(&dependent)
                            .and_then(|deps| deps.get(&issue))
                            .map(|&kind| Dependency {
                                issue_id: dependent,
                                depends_on_id: issue,
                                kind,
                            })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_dependencies(&self, issue: IssueId) -> bool {
        self.edges.get(&issue).is_some_and(|deps| !deps.is_empty())
    }

    /// DFS from `from` following forward edges; returns the path to `to`.
    fn path(&self, from: IssueId, to: IssueId) -> Option<Vec<IssueId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut color: HashMap<IssueId, Color> = HashMap::new();
        let mut prev: HashMap<IssueId, IssueId> = HashMap::new();
        let mut stack = vec![from];

        while let Some(node) = stack.pop() {
            if color.get(&node).copied().unwrap_or(Color::White) != Color::White {
                continue;
            }
            color.insert(node, Color::Gray);
            for dep in self.edges.get(&node).into_iter().flat_map(|d| d.keys()) {
                if color.get(dep).copied().unwrap_or(Color::White) != Color::White {
                    continue;
                }
                prev.entry(*dep).or_insert(node);
                if *dep == to {
                    let mut path = vec![to];
                    let mut current = to;
                    while let Some(&p) = prev.get(&current) {
                        path.push(p);
                        current = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                stack.push(*dep);
            }
            color.insert(node, Color::Black);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<IssueId> {
        (0..n).map(|_| IssueId::random()).collect()
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(!graph.has_dependencies(IssueId::random()));
    }

    #[test]
    fn add_dependency_creates_both_edges() {
        let mut graph = DependencyGraph::new();
        let v = ids(2);
        let (a, b) = (v[0], v[1]);

        graph.add_dependency(Dependency::blocks(b, a)).unwrap(); // B waits for A

        assert!(graph.has_dependencies(b));
        assert!(!graph.has_dependencies(a));
        assert_eq!(graph.dependencies(b), vec![Dependency::blocks(b, a)]);
        assert_eq!(graph.dependents(a), vec![Dependency::blocks(b, a)]);
    }

    #[test]
    fn edge_kind_is_preserved() {
        let mut graph = DependencyGraph::new();
        let v = ids(3);
        graph.add_dependency(Dependency::blocks(v[2], v[0])).unwrap();
        graph.add_dependency(Dependency::related(v[2], v[1])).unwrap();

        let deps = graph.dependencies(v[2]);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps.iter().filter(|d| d.is_blocking()).count(), 1);
    }

    #[test]
    fn rejects_self_dependency() {
        let mut graph = DependencyGraph::new();
        let a = IssueId::random();
        assert!(graph.add_dependency(Dependency::blocks(a, a)).is_err());
    }

    #[test]
    fn rejects_edge_closing_a_cycle() {
        let mut graph = DependencyGraph::new();
        let v = ids(4);
        // B->A, C->B, D->C; adding A->D closes A->D->C->B->A
        graph.add_dependency(Dependency::blocks(v[1], v[0])).unwrap();
        graph.add_dependency(Dependency::blocks(v[2], v[1])).unwrap();
        graph.add_dependency(Dependency::blocks(v[3], v[2])).unwrap();

        let err = graph
            .add_dependency(Dependency::blocks(v[0], v[3]))
            .unwrap_err();
        assert_eq!(err.path.first(), Some(&v[3]));
        assert_eq!(err.path.last(), Some(&v[3]));
        assert!(!graph.has_dependencies(v[0]));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let v = ids(4);
        graph.add_dependency(Dependency::blocks(v[1], v[0])).unwrap();
        graph.add_dependency(Dependency::blocks(v[2], v[0])).unwrap();
        graph.add_dependency(Dependency::blocks(v[3], v[1])).unwrap();
        graph.add_dependency(Dependency::blocks(v[3], v[2])).unwrap();
        graph.add_dependency(Dependency::blocks(v[3], v[0])).unwrap();

        assert_eq!(graph.dependencies(v[3]).len(), 3);
        assert_eq!(graph.dependents(v[0]).len(), 3);
    }
}
