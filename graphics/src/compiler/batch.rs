//! Queue batching and cross-queue synchronization.
//!
//! Passes are grouped into [`QueueBatch`]es: runs of passes on one queue that
//! are submitted as a single command list. A batch waits for other queues
//! only at its start and signals only at its end, so every wait points to an
//! earlier batch and the plan cannot deadlock.
//!
//! Scheduling is greedy list scheduling over a topological order. A pass is
//! ready when all of its hazards are scheduled and it is the next unscheduled
//! pass of its own queue, which keeps each queue's relative order. The open
//! batch keeps growing while its queue has a ready pass whose cross-queue
//! dependencies the batch has already waited for; otherwise the batch is
//! closed and the earliest ready pass opens the next one.
//!
//! Redundant waits are avoided with a per-queue clock: each batch records,
//! for every queue, the newest batch on that queue known to be complete when
//! it starts. Waiting on a batch also inherits that batch's clock, so a
//! wait that is already implied transitively is never emitted.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use strata_core::Name;

use super::barrier::BarrierPlan;
use super::hazard::HazardGraph;
use crate::error::GraphError;
use crate::graph::UsageTable;
use crate::types::{PerQueue, QueueType};

/// A GPU-side wait at the start of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWait {
    /// Queue of the awaited batch.
    pub queue: QueueType,
    /// Index of the awaited batch.
    pub batch: usize,
}

/// A run of passes submitted to one queue as one command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBatch {
    /// Queue the batch executes on.
    pub queue: QueueType,
    /// Positions of the batch's passes in the compiled order.
    pub passes: Range<usize>,
    /// Batches on other queues that must complete before this one starts.
    pub waits: Vec<BatchWait>,
    /// Whether a later batch waits on this one, requiring a fence signal.
    pub signals: bool,
}

impl QueueBatch {
    /// Number of passes in the batch.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if the batch has no passes.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

/// Cross-queue signal/wait pairs at the pass level.
///
/// Maps the last pass of each signalling batch to the first passes of the
/// batches waiting on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSignalInfo {
    signals: BTreeMap<Name, BTreeSet<Name>>,
}

impl PassSignalInfo {
    fn insert(&mut self, signal: Name, waiter: Name) {
        self.signals.entry(signal).or_default().insert(waiter);
    }

    /// Passes waiting on `signal`.
    pub fn waiters(&self, signal: Name) -> impl Iterator<Item = Name> + '_ {
        self.signals.get(&signal).into_iter().flatten().copied()
    }

    /// Check if `pass` ends a signalling batch.
    pub fn is_signal(&self, pass: Name) -> bool {
        self.signals.contains_key(&pass)
    }

    /// Iterate `(signalling pass, waiting passes)`.
    pub fn iter(&self) -> impl Iterator<Item = (Name, &BTreeSet<Name>)> {
        self.signals.iter().map(|(&name, waiters)| (name, waiters))
    }

    /// Number of signalling passes.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Check if no cross-queue synchronization is required.
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/// Result of batching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BatchPlan {
    /// Hazard-graph positions in final execution order.
    pub(crate) order: Vec<usize>,
    pub(crate) batches: Vec<QueueBatch>,
    /// Batch index of each pass in final order.
    pub(crate) batch_of: Vec<usize>,
    pub(crate) signal_info: PassSignalInfo,
}

struct OpenBatch {
    queue: QueueType,
    start: usize,
    waits: Vec<BatchWait>,
    clock: PerQueue<Option<usize>>,
}

/// Group passes into queue batches.
///
/// `sorted` is a topological order of `hazards`; `queues` gives the queue
/// each hazard-graph position executes on.
pub(crate) fn build_batches(
    hazards: &HazardGraph,
    queues: &[QueueType],
    sorted: &[usize],
) -> Result<BatchPlan, GraphError> {
    let n = sorted.len();
    let mut rank = vec![0usize; hazards.len()];
    let mut per_queue: PerQueue<Vec<usize>> = PerQueue::default();
    for (r, &pos) in sorted.iter().enumerate() {
        rank[pos] = r;
        per_queue[queues[pos]].push(pos);
    }
    let mut cursor: PerQueue<usize> = PerQueue::default();

    let mut batch_of_pos: Vec<Option<usize>> = vec![None; hazards.len()];
    let mut clocks: Vec<PerQueue<Option<usize>>> = Vec::new();
    let mut plan = BatchPlan::default();
    let mut open: Option<OpenBatch> = None;
    let mut last_on_queue: PerQueue<Option<usize>> = PerQueue::default();

    let head = |queue: QueueType, cursor: &PerQueue<usize>| {
        per_queue[queue].get(cursor[queue]).copied()
    };
    let is_ready = |pos: usize, batch_of_pos: &[Option<usize>]| {
        hazards.deps(pos).iter().all(|&dep| batch_of_pos[dep].is_some())
    };

    while plan.order.len() < n {
        if let Some(batch) = open.as_ref()
            && let Some(pos) = head(batch.queue, &cursor)
            && is_ready(pos, &batch_of_pos)
            && covered(hazards, pos, batch, &batch_of_pos, &plan.batches)
        {
            let index = plan.batches.len();
            schedule(pos, index, batch.queue, &mut plan, &mut batch_of_pos, &mut cursor);
            continue;
        }

        if let Some(batch) = open.take() {
            close(batch, &mut plan, &mut clocks, &mut last_on_queue);
        }

        let next = QueueType::ALL
            .into_iter()
            .filter_map(|queue| head(queue, &cursor))
            .filter(|&pos| is_ready(pos, &batch_of_pos))
            .min_by_key(|&pos| rank[pos]);
        let Some(pos) = next else {
            let stuck = sorted
                .iter()
                .copied()
                .find(|&pos| batch_of_pos[pos].is_none())
                .map(|pos| hazards.name(pos))
                .unwrap_or(Name::from_raw(0));
            return Err(GraphError::CyclicDependency(stuck));
        };

        let queue = queues[pos];
        let batch = open_batch(
            hazards,
            pos,
            queue,
            plan.order.len(),
            &batch_of_pos,
            &mut plan.batches,
            &clocks,
            &last_on_queue,
        );
        let index = plan.batches.len();
        schedule(pos, index, queue, &mut plan, &mut batch_of_pos, &mut cursor);
        open = Some(batch);
    }

    if let Some(batch) = open.take() {
        close(batch, &mut plan, &mut clocks, &mut last_on_queue);
    }

    plan.signal_info = signal_info(hazards, &plan);
    log::debug!(
        "batching: {} passes in {} batches, {} cross-queue waits",
        n,
        plan.batches.len(),
        plan.batches.iter().map(|b| b.waits.len()).sum::<usize>()
    );
    Ok(plan)
}

/// Make the batch that records final-state transitions wait for every other
/// queue that used the transitioned buffers.
///
/// Such a transition is issued after the buffer's last use, always inside the
/// frame's last batch, which need not depend on uses on other queues.
pub(crate) fn order_final_transitions(
    plan: &mut BatchPlan,
    hazards: &HazardGraph,
    usages: &UsageTable,
    barriers: &BarrierPlan,
) {
    let Some(last) = plan.batches.len().checked_sub(1) else {
        return;
    };
    let queue = plan.batches[last].queue;

    let mut needed: PerQueue<Option<usize>> = PerQueue::default();
    for (id, record) in usages.records() {
        let Some(last_use) = record.last_use() else {
            continue;
        };
        let at_end = barriers
            .buffer_barriers(id)
            .iter()
            .any(|barrier| barrier.slot > last_use.pass_index);
        if !at_end {
            continue;
        }
        for usage in &record.usages {
            let batch = plan.batch_of[usage.pass_index];
            let user = plan.batches[batch].queue;
            if user != queue {
                needed[user] = max_known(needed[user], Some(batch));
            }
        }
    }

    let mut added = 0;
    for other in QueueType::ALL {
        let Some(batch) = needed[other] else {
            continue;
        };
        let waits = &mut plan.batches[last].waits;
        if waits.iter().any(|wait| wait.queue == other && wait.batch >= batch) {
            continue;
        }
        waits.retain(|wait| wait.queue != other);
        waits.push(BatchWait {
            queue: other,
            batch,
        });
        plan.batches[batch].signals = true;
        added += 1;
    }

    if added > 0 {
        plan.batches[last]
            .waits
            .sort_by_key(|wait| (wait.queue, wait.batch));
        plan.signal_info = signal_info(hazards, plan);
        log::debug!(
            "batching: {} waits added before final transitions in batch {}",
            added,
            last
        );
    }
}

fn schedule(
    pos: usize,
    batch: usize,
    queue: QueueType,
    plan: &mut BatchPlan,
    batch_of_pos: &mut [Option<usize>],
    cursor: &mut PerQueue<usize>,
) {
    plan.order.push(pos);
    plan.batch_of.push(batch);
    batch_of_pos[pos] = Some(batch);
    cursor[queue] += 1;
}

/// Whether every cross-queue dependency of `pos` is already complete at the
/// start of `batch`.
fn covered(
    hazards: &HazardGraph,
    pos: usize,
    batch: &OpenBatch,
    batch_of_pos: &[Option<usize>],
    batches: &[QueueBatch],
) -> bool {
    hazards.deps(pos).iter().all(|&dep| match batch_of_pos[dep] {
        // Still open, therefore on this batch's queue.
        Some(b) if b >= batches.len() => true,
        Some(b) => {
            let queue = batches[b].queue;
            queue == batch.queue || batch.clock[queue].is_some_and(|known| known >= b)
        }
        None => false,
    })
}

#[allow(clippy::too_many_arguments)]
fn open_batch(
    hazards: &HazardGraph,
    pos: usize,
    queue: QueueType,
    start: usize,
    batch_of_pos: &[Option<usize>],
    batches: &mut [QueueBatch],
    clocks: &[PerQueue<Option<usize>>],
    last_on_queue: &PerQueue<Option<usize>>,
) -> OpenBatch {
    // Work on the same queue runs in submission order, so this batch knows
    // everything its predecessor on the queue knew.
    let mut clock = match last_on_queue[queue] {
        Some(previous) => {
            let mut clock = clocks[previous];
            clock[queue] = Some(previous);
            clock
        }
        None => PerQueue::default(),
    };

    let mut needed: Vec<usize> = hazards
        .deps(pos)
        .iter()
        .filter_map(|&dep| batch_of_pos[dep])
        .filter(|&b| batches[b].queue != queue)
        .collect();
    needed.sort_unstable_by(|a, b| b.cmp(a));
    needed.dedup();

    let mut waits = Vec::new();
    for b in needed {
        let producer_queue = batches[b].queue;
        if clock[producer_queue].is_some_and(|known| known >= b) {
            continue;
        }
        waits.push(BatchWait {
            queue: producer_queue,
            batch: b,
        });
        batches[b].signals = true;
        for other in QueueType::ALL {
            clock[other] = max_known(clock[other], clocks[b][other]);
        }
        clock[producer_queue] = max_known(clock[producer_queue], Some(b));
    }
    waits.sort_by_key(|wait| (wait.queue, wait.batch));

    OpenBatch {
        queue,
        start,
        waits,
        clock,
    }
}

fn max_known(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn close(
    batch: OpenBatch,
    plan: &mut BatchPlan,
    clocks: &mut Vec<PerQueue<Option<usize>>>,
    last_on_queue: &mut PerQueue<Option<usize>>,
) {
    let index = plan.batches.len();
    log::trace!(
        "batch {}: {} queue, passes {}..{}, {} waits",
        index,
        batch.queue,
        batch.start,
        plan.order.len(),
        batch.waits.len()
    );
    plan.batches.push(QueueBatch {
        queue: batch.queue,
        passes: batch.start..plan.order.len(),
        waits: batch.waits,
        signals: false,
    });
    clocks.push(batch.clock);
    last_on_queue[batch.queue] = Some(index);
}

fn signal_info(hazards: &HazardGraph, plan: &BatchPlan) -> PassSignalInfo {
    let mut info = PassSignalInfo::default();
    for batch in &plan.batches {
        let Some(&first) = plan.order.get(batch.passes.start) else {
            continue;
        };
        for wait in &batch.waits {
            let awaited = &plan.batches[wait.batch];
            if let Some(&last) = awaited.passes.end.checked_sub(1).and_then(|i| plan.order.get(i)) {
                info.insert(hazards.name(last), hazards.name(first));
            }
        }
    }
    info
}
