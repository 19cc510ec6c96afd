//! Dependency graph builder
//!
//! Edges run from a node to the nodes whose outputs it reads (plus any
//! explicit `depends_on`). Declaration order never decides provisioning
//! order; it only breaks ties between nodes that are otherwise unordered,
//! which keeps runs deterministic and their reports diffable.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{Error, Result};
use crate::model::ResourceNode;

/// Visit state for cycle detection
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Validated, acyclic dependency graph over a set of nodes
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node names in declaration order
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// `deps[i]`: nodes `i` reads from
    deps: Vec<Vec<usize>>,
    /// `dependents[i]`: nodes reading from `i`
    dependents: Vec<Vec<usize>>,
    /// Topological order, ties broken by declaration index
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicates, dangling references and cycles.
    pub fn build(nodes: &[ResourceNode]) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(Error::DuplicateNode {
                    name: node.name.clone(),
                });
            }
        }

        let mut deps = vec![Vec::new(); nodes.len()];
        let mut dependents = vec![Vec::new(); nodes.len()];

        for (i, node) in nodes.iter().enumerate() {
            for reference in node.spec.references() {
                let Some(&target) = index.get(&reference.node) else {
                    return Err(Error::DanglingReference {
                        node: node.name.clone(),
                        target: reference.node.clone(),
                    });
                };
                let kind = nodes[target].kind();
                if !kind.spec().has_output(&reference.output) {
                    return Err(Error::UnknownOutput {
                        node: node.name.clone(),
                        target: reference.node.clone(),
                        kind,
                        output: reference.output.clone(),
                    });
                }
            }

            for dep in node.dependencies() {
                let &target = index.get(dep).ok_or_else(|| Error::DanglingReference {
                    node: node.name.clone(),
                    target: dep.to_string(),
                })?;
                deps[i].push(target);
                dependents[target].push(i);
            }
        }

        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();

        if let Some(cycle) = find_cycle(&deps) {
            return Err(Error::CyclicDependency {
                cycle: cycle.into_iter().map(|i| names[i].clone()).collect(),
            });
        }

        let order = topological_order(&deps, &dependents);
        log::debug!(
            "Dependency order: {}",
            order
                .iter()
                .map(|&i| names[i].as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            names,
            index,
            deps,
            dependents,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Node names in execution order
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Position of a node in the execution order
    pub fn position(&self, name: &str) -> Option<usize> {
        let i = *self.index.get(name)?;
        self.order.iter().position(|&o| o == i)
    }

    /// Execution order grouped by dependency depth.
    ///
    /// Nodes in one layer are independent of each other; each layer keeps
    /// execution order.
    pub fn layers(&self) -> Vec<Vec<&str>> {
        let mut level = vec![0usize; self.names.len()];
        for &i in &self.order {
            level[i] = self.deps[i].iter().map(|&d| level[d] + 1).max().unwrap_or(0);
        }

        let depth = level.iter().max().map_or(0, |m| m + 1);
        let mut layers = vec![Vec::new(); depth];
        for &i in &self.order {
            layers[level[i]].push(self.names[i].as_str());
        }
        layers
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| self.deps[i].iter().map(|&d| self.names[d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Every node that reads from `name`, directly or transitively, in
    /// execution order
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };

        let mut seen = vec![false; self.names.len()];
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &d in &self.dependents[i] {
                if !seen[d] {
                    seen[d] = true;
                    stack.push(d);
                }
            }
        }

        self.order
            .iter()
            .filter(|&&i| seen[i])
            .map(|&i| self.names[i].as_str())
            .collect()
    }
}

/// Depth-first search with an on-stack marker. Returns the first cycle
/// found as a node sequence with its first node repeated at the end.
fn find_cycle(deps: &[Vec<usize>]) -> Option<Vec<usize>> {
    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnStack;
        path.push(node);

        for &next in &deps[node] {
            match marks[next] {
                Mark::OnStack => {
                    let start = path.iter().position(|&p| p == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, deps, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; deps.len()];
    let mut path = Vec::new();
    for node in 0..deps.len() {
        if marks[node] == Mark::Unvisited
            && let Some(cycle) = visit(node, deps, &mut marks, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

/// Kahn's algorithm; among ready nodes the earliest declared goes first.
fn topological_order(deps: &[Vec<usize>], dependents: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &d in &dependents[i] {
            remaining[d] -= 1;
            if remaining[d] == 0 {
                ready.push(Reverse(d));
            }
        }
    }
    order
}
