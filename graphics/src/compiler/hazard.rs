//! Execution-order hazards between surviving passes.
//!
//! Culling only needs data flow. Ordering needs every hazard: a pass accessing
//! a buffer exclusively (any write state, or `PRESENT`) must run after the
//! previous exclusive access (write-after-write) and after every read since
//! then (write-after-read); a reading pass must run after the last exclusive
//! access (read-after-write). Explicit graph edges are included as well.
//!
//! Reads can still conflict: when a read needs the buffer in a state it is
//! not already in, its barrier is recorded right before it, so it must also
//! run after every use of the previous state. Imported buffers start in their
//! initial state.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use strata_core::{AdjacencyGraph, Name};

use crate::error::GraphError;
use crate::compiler::BarrierSettings;
use crate::graph::{PassHandle, RenderGraph};
use crate::types::BufferStateFlags;

/// Dependencies of each pass, by position in the culled pass list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HazardGraph {
    names: Vec<Name>,
    deps: Vec<Vec<usize>>,
}

#[derive(Default)]
struct BufferAccess {
    last_exclusive: Option<usize>,
    readers: Vec<usize>,
    /// State the buffer is in, widened by merged reads.
    state: Option<BufferStateFlags>,
    /// Pass whose barrier put the buffer into `state`.
    entered_by: Option<usize>,
    /// Whether any transition was recorded yet, so later reads may merge.
    transitioned: bool,
    /// Every use since the buffer entered `state`.
    since: Vec<usize>,
}

impl BufferAccess {
    fn starting_in(state: Option<BufferStateFlags>) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Record a use of the buffer in `next` by `pos`, adding the passes it
    /// must follow to `deps`.
    fn track_state(
        &mut self,
        pos: usize,
        next: BufferStateFlags,
        settings: BarrierSettings,
        deps: &mut BTreeSet<usize>,
    ) {
        let exclusive = next.intersects(BufferStateFlags::EXCLUSIVE);
        let Some(current) = self.state else {
            // Transient buffers are created in their first state.
            self.state = Some(next);
            self.since.push(pos);
            return;
        };

        let contained = current.contains_state(next);
        let merged =
            self.transitioned && settings.merge_read_states && current.is_mergeable_with(next);
        if !exclusive && (contained || merged) {
            deps.extend(self.entered_by);
            self.state = Some(current | next);
            self.since.push(pos);
        } else {
            deps.extend(self.since.drain(..));
            self.state = Some(next);
            self.entered_by = Some(pos);
            self.transitioned |= !contained;
            self.since.push(pos);
        }
    }
}

impl HazardGraph {
    /// Analyse `passes` (culled, in declaration order).
    ///
    /// `settings` decides which reads widen an earlier transition instead of
    /// needing their own.
    pub(crate) fn build(
        graph: &RenderGraph,
        passes: &[PassHandle],
        settings: BarrierSettings,
    ) -> Self {
        let position: HashMap<PassHandle, usize> = passes
            .iter()
            .enumerate()
            .map(|(pos, &handle)| (handle, pos))
            .collect();

        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); passes.len()];
        let mut names = Vec::with_capacity(passes.len());
        let mut access: HashMap<Name, BufferAccess> = HashMap::new();

        for (pos, pass) in passes.iter().filter_map(|&h| graph.pass(h)).enumerate() {
            names.push(pass.name());
            for config in pass.buffers() {
                let name = config.name();
                let buffer = access.entry(name).or_insert_with(|| {
                    BufferAccess::starting_in(graph.imports().get(&name).and_then(|i| i.initial_state))
                });
                if let Some(writer) = buffer.last_exclusive {
                    deps[pos].insert(writer);
                }
                if config.state.intersects(BufferStateFlags::EXCLUSIVE) {
                    deps[pos].extend(buffer.readers.drain(..));
                    buffer.last_exclusive = Some(pos);
                } else {
                    buffer.readers.push(pos);
                }
                buffer.track_state(pos, config.state, settings, &mut deps[pos]);
            }
            deps[pos].remove(&pos);
        }

        for &(dependent, dependency) in graph.edges() {
            if let (Some(&a), Some(&b)) = (position.get(&dependent), position.get(&dependency)) {
                deps[a].insert(b);
            }
        }

        Self {
            names,
            deps: deps.into_iter().map(|set| set.into_iter().collect()).collect(),
        }
    }

    /// Number of passes.
    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    /// Direct dependencies of the pass at `pos`.
    pub(crate) fn deps(&self, pos: usize) -> &[usize] {
        &self.deps[pos]
    }

    /// Name of the pass at `pos`.
    pub(crate) fn name(&self, pos: usize) -> Name {
        self.names[pos]
    }

    /// The hazards as a name-keyed adjacency map.
    pub(crate) fn to_adjacency(&self) -> AdjacencyGraph {
        let mut graph = AdjacencyGraph::new();
        for (pos, deps) in self.deps.iter().enumerate() {
            graph.add_node(self.names[pos]);
            for &dep in deps {
                graph.add_edge(self.names[pos], self.names[dep]);
            }
        }
        graph
    }

    /// Topological order preferring the earliest declared ready pass.
    ///
    /// Without explicit edges pointing forward this is the declaration order.
    pub(crate) fn sorted_order(&self) -> Result<Vec<usize>, GraphError> {
        let n = self.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (pos, deps) in self.deps.iter().enumerate() {
            in_degree[pos] = deps.len();
            for &dep in deps {
                dependents[dep].push(pos);
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&pos| in_degree[pos] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(pos)) = ready.pop() {
            order.push(pos);
            for &dependent in &dependents[pos] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != n {
            let culprit = self
                .to_adjacency()
                .find_cycle()
                .or_else(|| (0..n).find(|&pos| in_degree[pos] > 0).map(|pos| self.names[pos]))
                .unwrap_or(Name::from_raw(0));
            return Err(GraphError::CyclicDependency(culprit));
        }
        Ok(order)
    }
}
