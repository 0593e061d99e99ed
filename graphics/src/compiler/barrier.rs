//! Resource barrier synthesis.
//!
//! For every buffer the usage record is walked pair by pair. A use whose
//! state is already contained in the current state needs nothing. A read
//! that can be merged with the previous transition widens that transition's
//! target state instead of adding a new one. Anything else becomes a
//! transition: a single barrier when the two uses are adjacent, or a
//! begin/end split pair spanning the passes in between so the GPU can overlap
//! the transition with unrelated work.
//!
//! # Slots
//!
//! Barriers are grouped into `pass_count + 1` slots. Slot `i` is issued
//! immediately before pass `i`; the final slot is issued after the last
//! pass. Equivalently, a barrier anchored after pass `a` lives in slot
//! `a + 1`, and slot `0` holds transitions out of an imported buffer's
//! initial state.

use std::collections::BTreeMap;

use strata_core::Name;

use crate::graph::{BufferId, ImportedBuffer, UsageTable};
use crate::types::BufferStateFlags;

/// Which half of a split barrier a [`BarrierConfig`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SplitType {
    /// A complete transition.
    #[default]
    None,
    /// Start of a transition; the buffer must not be used until the end.
    Begin,
    /// Completion of a previously begun transition.
    End,
}

/// A state transition for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarrierConfig {
    pub buffer: BufferId,
    pub split: SplitType,
    pub before: BufferStateFlags,
    pub after: BufferStateFlags,
}

/// A barrier and the slot it is issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchoredBarrier {
    pub slot: usize,
    pub config: BarrierConfig,
}

impl AnchoredBarrier {
    /// The pass this barrier follows, or `None` for the slot before the
    /// first pass.
    pub fn anchor(&self) -> Option<usize> {
        self.slot.checked_sub(1)
    }
}

/// Barrier settings taken from the compile options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSettings {
    /// Emit begin/end pairs across gaps.
    pub split_barriers: bool,
    /// Widen read transitions instead of adding new ones.
    pub merge_read_states: bool,
}

impl Default for BarrierSettings {
    fn default() -> Self {
        Self {
            split_barriers: true,
            merge_read_states: true,
        }
    }
}

/// All barriers of a compiled graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierPlan {
    per_buffer: Vec<Vec<AnchoredBarrier>>,
    slots: Vec<Vec<BarrierConfig>>,
}

impl Default for BarrierPlan {
    fn default() -> Self {
        Self {
            per_buffer: Vec::new(),
            slots: vec![Vec::new()],
        }
    }
}

impl BarrierPlan {
    /// Barriers issued before pass `index`.
    pub fn before_pass(&self, index: usize) -> &[BarrierConfig] {
        self.slot(index)
    }

    /// Barriers issued after pass `index`.
    pub fn after_pass(&self, index: usize) -> &[BarrierConfig] {
        self.slot(index + 1)
    }

    /// Barriers in `slot`; empty for slots past the end.
    pub fn slot(&self, slot: usize) -> &[BarrierConfig] {
        self.slots.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every slot in order.
    pub fn slots(&self) -> &[Vec<BarrierConfig>] {
        &self.slots
    }

    /// Number of slots (`pass_count + 1`).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Barriers of one buffer in issue order.
    pub fn buffer_barriers(&self, buffer: BufferId) -> &[AnchoredBarrier] {
        self.per_buffer
            .get(buffer.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of barrier commands, counting split halves separately.
    pub fn barrier_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}

/// One use in the walk; `pass` is `-1` for an imported initial state and
/// `pass_count` for a required final state.
type Use = (isize, BufferStateFlags);

/// Synthesize barriers for every buffer in `usages`.
///
/// `batch_of` gives the queue batch of each pass. A split pair is only
/// emitted when both halves land in the same batch; otherwise the transition
/// is issued whole, right before its consumer.
pub fn synthesize(
    usages: &UsageTable,
    imports: &BTreeMap<Name, ImportedBuffer>,
    pass_count: usize,
    batch_of: &[usize],
    settings: BarrierSettings,
) -> BarrierPlan {
    let mut plan = BarrierPlan {
        per_buffer: Vec::with_capacity(usages.buffer_count()),
        slots: vec![Vec::new(); pass_count + 1],
    };

    let mut uses: Vec<Use> = Vec::new();
    for (id, record) in usages.records() {
        let import = imports.get(&record.name);

        uses.clear();
        if let Some(state) = import.and_then(|i| i.initial_state) {
            uses.push((-1, state));
        }
        uses.extend(
            record
                .usages
                .iter()
                .map(|usage| (usage.pass_index as isize, usage.state)),
        );
        if let Some(state) = import.and_then(|i| i.final_state) {
            uses.push((pass_count as isize, state));
        }

        let barriers = synthesize_buffer(id, &uses, pass_count, batch_of, settings);
        for barrier in &barriers {
            log::trace!(
                "barrier {:?} slot {}: {:?} {:?} -> {:?}",
                id,
                barrier.slot,
                barrier.config.split,
                barrier.config.before,
                barrier.config.after
            );
            plan.slots[barrier.slot].push(barrier.config);
        }
        plan.per_buffer.push(barriers);
    }

    plan
}

fn synthesize_buffer(
    buffer: BufferId,
    uses: &[Use],
    pass_count: usize,
    batch_of: &[usize],
    settings: BarrierSettings,
) -> Vec<AnchoredBarrier> {
    let mut out: Vec<AnchoredBarrier> = Vec::new();
    let Some((&(first_pass, first_state), rest)) = uses.split_first() else {
        return out;
    };

    let same_batch = |a: usize, b: usize| {
        if pass_count == 0 {
            return true;
        }
        let batch = |slot: usize| batch_of.get(slot.min(pass_count - 1)).copied().unwrap_or(0);
        batch(a) == batch(b)
    };

    let mut current = first_state;
    let mut producer = first_pass;
    // Index in `out` of the first half of the latest transition.
    let mut last: Option<usize> = None;

    for &(consumer, next) in rest {
        if current.contains_state(next) {
            // Already in a compatible state.
        } else if let Some(index) = last
            && settings.merge_read_states
            && out[index].config.after.is_mergeable_with(next)
        {
            let widened = out[index].config.after | next;
            out[index].config.after = widened;
            if out[index].config.split == SplitType::Begin
                && let Some(end) = out.get_mut(index + 1)
            {
                end.config.after = widened;
            }
            current = widened;
        } else {
            let begin_slot = (producer + 1) as usize;
            let end_slot = consumer as usize;
            let config = |split| BarrierConfig {
                buffer,
                split,
                before: current,
                after: next,
            };

            last = Some(out.len());
            if begin_slot < end_slot && settings.split_barriers && same_batch(begin_slot, end_slot) {
                out.push(AnchoredBarrier {
                    slot: begin_slot,
                    config: config(SplitType::Begin),
                });
                out.push(AnchoredBarrier {
                    slot: end_slot,
                    config: config(SplitType::End),
                });
            } else {
                out.push(AnchoredBarrier {
                    slot: end_slot,
                    config: config(SplitType::None),
                });
            }
            current = next;
        }
        producer = consumer;
    }

    out
}
