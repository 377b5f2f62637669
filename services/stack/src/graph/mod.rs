//! Resource Dependency Graph
//!
//! Components declare [`ResourceDescriptor`]s into a [`StackGraph`]. Edges are
//! the union of explicit `depends_on` entries and the output references found
//! in each property bag. The graph is validated and topologically sorted
//! before anything is handed to a provisioning engine.

mod descriptor;
mod output;

pub use descriptor::{attr, ResourceDescriptor, ResourceHandle, ResourceKind};
pub use output::{
    first_segment, join, references, resolve, OutputRef, OutputStore, ResourceOutputs,
};

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GraphError;

/// Validated set of descriptors for one stack
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "Vec<ResourceDescriptor>", try_from = "Vec<ResourceDescriptor>")]
pub struct StackGraph {
    descriptors: Vec<ResourceDescriptor>,
    index: HashMap<String, usize>,
}

impl StackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from descriptors in any order. Cycles and dangling edges are
    /// rejected here, before any materialization.
    pub fn from_descriptors(descriptors: Vec<ResourceDescriptor>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for descriptor in descriptors {
            graph.insert(descriptor)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Declare a descriptor whose predecessors are already declared.
    /// Declaring in dependency order makes cycles impossible.
    pub fn declare(&mut self, descriptor: ResourceDescriptor) -> Result<ResourceHandle, GraphError> {
        for predecessor in descriptor.predecessors() {
            if !self.index.contains_key(&predecessor) {
                return Err(GraphError::UnknownPredecessor {
                    resource: descriptor.name.clone(),
                    missing: predecessor,
                });
            }
        }
        let handle = ResourceHandle {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
        };
        debug!(
            resource = %descriptor.name,
            kind = %descriptor.kind,
            provider = %descriptor.provider,
            "Declared resource"
        );
        self.insert(descriptor)?;
        Ok(handle)
    }

    fn insert(&mut self, descriptor: ResourceDescriptor) -> Result<(), GraphError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(GraphError::DuplicateName(descriptor.name));
        }
        self.index
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors in declaration order
    pub fn descriptors(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Check that every edge points at a declared descriptor and that the
    /// graph is acyclic
    pub fn validate(&self) -> Result<(), GraphError> {
        self.waves().map(|_| ())
    }

    /// Any topological order, made deterministic by declaration order
    pub fn topological_order(&self) -> Result<Vec<&ResourceDescriptor>, GraphError> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }

    /// Descriptors grouped so that every predecessor of a wave member is in an
    /// earlier wave. Members of one wave are independent of each other.
    pub fn waves(&self) -> Result<Vec<Vec<&ResourceDescriptor>>, GraphError> {
        let n = self.descriptors.len();
        let mut predecessors: Vec<BTreeSet<usize>> = Vec::with_capacity(n);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, descriptor) in self.descriptors.iter().enumerate() {
            let mut preds = BTreeSet::new();
            for name in descriptor.predecessors() {
                let &p = self.index.get(&name).ok_or_else(|| GraphError::UnknownPredecessor {
                    resource: descriptor.name.clone(),
                    missing: name.clone(),
                })?;
                preds.insert(p);
                dependents[p].push(i);
            }
            predecessors.push(preds);
        }

        let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut waves = Vec::new();
        let mut placed = 0;

        while !ready.is_empty() {
            ready.sort_unstable();
            let mut next = Vec::new();
            for &i in &ready {
                for &d in &dependents[i] {
                    in_degree[d] -= 1;
                    if in_degree[d] == 0 {
                        next.push(d);
                    }
                }
            }
            placed += ready.len();
            waves.push(ready.iter().map(|&i| &self.descriptors[i]).collect());
            ready = next;
        }

        if placed < n {
            let remaining: HashSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
            let cycle = self.find_cycle(&predecessors, &remaining);
            warn!(cycle = ?cycle, "Dependency cycle detected");
            return Err(GraphError::Cycle(cycle));
        }

        Ok(waves)
    }

    /// Walk predecessor edges inside the unplaced set until a node repeats.
    /// Every unplaced node has an unplaced predecessor, so this terminates.
    fn find_cycle(&self, predecessors: &[BTreeSet<usize>], remaining: &HashSet<usize>) -> Vec<String> {
        let Some(&start) = remaining.iter().min() else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut seen = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let next = predecessors[current]
                .iter()
                .copied()
                .find(|p| remaining.contains(p));
            let Some(next) = next else {
                break;
            };
            if let Some(&pos) = seen.get(&next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.descriptors[i].name.clone())
                    .collect();
                cycle.push(self.descriptors[next].name.clone());
                return cycle;
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }
        path.into_iter()
            .map(|i| self.descriptors[i].name.clone())
            .collect()
    }

    /// Names of every descriptor that transitively depends on `name`
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for descriptor in &self.descriptors {
                if descriptor.predecessors().contains(&current)
                    && found.insert(descriptor.name.clone())
                {
                    frontier.push(descriptor.name.clone());
                }
            }
        }
        found
    }
}

impl From<StackGraph> for Vec<ResourceDescriptor> {
    fn from(graph: StackGraph) -> Self {
        graph.descriptors
    }
}

impl TryFrom<Vec<ResourceDescriptor>> for StackGraph {
    type Error = GraphError;

    fn try_from(descriptors: Vec<ResourceDescriptor>) -> Result<Self, Self::Error> {
        StackGraph::from_descriptors(descriptors)
    }
}
