//! Per-buffer usage tracking.
//!
//! [`configure_usages`] scans an ordered pass list once and records, for
//! every buffer, the `(pass index, state)` pairs in which it is used. The
//! records are the input to barrier synthesis; their order is exactly the
//! order of the pass list, which the tracker never changes.

use std::collections::HashMap;

use strata_core::Name;

use super::pass::{BufferConfig, RenderPass};
use crate::types::BufferStateFlags;

/// Dense handle for a buffer within one compiled graph.
///
/// Buffers are numbered in the order of their first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index into per-buffer tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One use of a buffer by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage {
    /// Position of the pass in the compiled order.
    pub pass_index: usize,
    /// State the pass requires.
    pub state: BufferStateFlags,
}

/// All uses of one buffer, in pass order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferUsageRecord {
    /// Buffer name.
    pub name: Name,
    /// Uses with strictly increasing pass index.
    pub usages: Vec<BufferUsage>,
}

impl BufferUsageRecord {
    /// The last pass using the buffer.
    pub fn last_use(&self) -> Option<BufferUsage> {
        self.usages.last().copied()
    }
}

/// Usage records for every buffer of a pass list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTable {
    ids: HashMap<Name, BufferId>,
    records: Vec<BufferUsageRecord>,
    /// Per pass, the id of each declared buffer in declaration order.
    pass_buffers: Vec<Vec<BufferId>>,
}

impl UsageTable {
    /// Id assigned to `buffer`, if any pass uses it.
    pub fn buffer_id(&self, buffer: Name) -> Option<BufferId> {
        self.ids.get(&buffer).copied()
    }

    /// Record for a buffer id.
    pub fn record(&self, id: BufferId) -> Option<&BufferUsageRecord> {
        self.records.get(id.index())
    }

    /// Records in id order.
    pub fn records(&self) -> impl Iterator<Item = (BufferId, &BufferUsageRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (BufferId::new(index as u32), record))
    }

    /// Buffer ids used by the pass at `pass_index`, in declaration order.
    pub fn pass_buffers(&self, pass_index: usize) -> &[BufferId] {
        self.pass_buffers
            .get(pass_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct buffers.
    pub fn buffer_count(&self) -> usize {
        self.records.len()
    }

    /// Check if no pass uses any buffer.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Build usage records for `passes` in the given order.
///
/// Each pass's uses are appended in one linear scan; a pass index appears at
/// most once per record because passes cannot list a buffer twice.
pub fn configure_usages<'a, I>(passes: I) -> UsageTable
where
    I: IntoIterator<Item = &'a RenderPass>,
{
    let mut table = UsageTable::default();
    for (pass_index, pass) in passes.into_iter().enumerate() {
        let mut ids = Vec::with_capacity(pass.buffers().len());
        for config in pass.buffers() {
            let id = table.track(config);
            table.records[id.index()].usages.push(BufferUsage {
                pass_index,
                state: config.state,
            });
            ids.push(id);
        }
        table.pass_buffers.push(ids);
    }
    log::trace!(
        "configure_usages: {} buffers across {} passes",
        table.records.len(),
        table.pass_buffers.len()
    );
    table
}

impl UsageTable {
    fn track(&mut self, config: &BufferConfig) -> BufferId {
        if let Some(&id) = self.ids.get(&config.name()) {
            return id;
        }
        let id = BufferId::new(self.records.len() as u32);
        self.ids.insert(config.name(), id);
        self.records.push(BufferUsageRecord {
            name: config.name(),
            usages: Vec::new(),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferStateFlags as S;

    fn usage(pass_index: usize, state: S) -> BufferUsage {
        BufferUsage { pass_index, state }
    }

    #[test]
    fn test_ids_follow_first_use() {
        let passes = [
            RenderPass::new("a").writes("y", S::RTV),
            RenderPass::new("b").reads("x", S::SRV_PIXEL).reads("y", S::SRV_PIXEL),
        ];
        let table = configure_usages(&passes);
        assert_eq!(table.buffer_id(Name::hash_str("y")), Some(BufferId::new(0)));
        assert_eq!(table.buffer_id(Name::hash_str("x")), Some(BufferId::new(1)));
        assert_eq!(table.buffer_count(), 2);
        assert_eq!(table.pass_buffers(1), &[BufferId::new(1), BufferId::new(0)]);
        assert!(table.pass_buffers(5).is_empty());
    }

    #[test]
    fn test_records_preserve_pass_order() {
        let passes = [
            RenderPass::new("p0").writes("b", S::RTV),
            RenderPass::new("p1").reads("b", S::SRV_PIXEL),
            RenderPass::new("p2"),
            RenderPass::new("p3").writes("b", S::UAV),
        ];
        let table = configure_usages(&passes);
        let id = table.buffer_id(Name::hash_str("b")).unwrap();
        let record = table.record(id).unwrap();
        assert_eq!(
            record.usages,
            vec![usage(0, S::RTV), usage(1, S::SRV_PIXEL), usage(3, S::UAV)]
        );
        assert_eq!(record.last_use(), Some(usage(3, S::UAV)));
    }

    #[test]
    fn test_empty_pass_list() {
        let table = configure_usages(std::iter::empty());
        assert!(table.is_empty());
        assert_eq!(table.records().count(), 0);
    }
}
