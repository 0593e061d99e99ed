//! GPU queue kinds.

use std::fmt;

/// The hardware queue a pass is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueType {
    /// Direct queue: rasterization, compute and copies.
    #[default]
    Graphics,
    /// Async compute queue.
    Compute,
    /// Copy-only queue.
    Transfer,
}

impl QueueType {
    /// Number of queue kinds.
    pub const COUNT: usize = 3;

    /// All queue kinds in index order.
    pub const ALL: [QueueType; Self::COUNT] =
        [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

    /// Dense index for per-queue arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }

    /// Short name used in logs and debug labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per queue, indexed by [`QueueType::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerQueue<T>(pub [T; QueueType::COUNT]);

impl<T> PerQueue<T> {
    /// Value for `queue`.
    pub fn get(&self, queue: QueueType) -> &T {
        &self.0[queue.index()]
    }

    /// Mutable value for `queue`.
    pub fn get_mut(&mut self, queue: QueueType) -> &mut T {
        &mut self.0[queue.index()]
    }

    /// Iterate `(queue, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (QueueType, &T)> {
        QueueType::ALL.into_iter().zip(self.0.iter())
    }

    pub fn values_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.0.iter_mut()
    }
}

impl<T> std::ops::Index<QueueType> for PerQueue<T> {
    type Output = T;

    fn index(&self, queue: QueueType) -> &T {
        self.get(queue)
    }
}

impl<T> std::ops::IndexMut<QueueType> for PerQueue<T> {
    fn index_mut(&mut self, queue: QueueType) -> &mut T {
        self.get_mut(queue)
    }
}
