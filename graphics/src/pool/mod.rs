//! Command allocator and command list pooling.
//!
//! Native command objects are expensive to create and cheap to reuse, so they
//! are kept in per-queue free stacks. A caller checks out a
//! [`PooledBatch`] of objects with [`CommandObjectPool::retain`] and hands it
//! back with [`CommandObjectPool::release`] once the GPU is done with them.
//!
//! Every checkout carries a [`BatchTicket`] recorded in the pool's side
//! table. Returning a batch the pool does not know about, or tearing the pool
//! down with batches still out, is a bookkeeping error: it is logged as a
//! warning and never panics.
//!
//! # Example
//!
//! ```
//! use strata_graphics::QueueType;
//! use strata_graphics::pool::CommandObjectPool;
//!
//! let mut pool: CommandObjectPool<u32> = CommandObjectPool::new("ids", 4);
//! let batch = pool
//!     .retain(QueueType::Compute, 2, |_| Ok::<_, ()>(7))
//!     .unwrap();
//! assert_eq!(batch.len(), 2);
//! assert_eq!(pool.free_count(QueueType::Compute), 2);
//!
//! pool.release(batch);
//! assert_eq!(pool.free_count(QueueType::Compute), 4);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{BackendResult, GpuBackend};
use crate::types::{PerQueue, QueueType};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one checkout from one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchTicket {
    pool: u64,
    id: u64,
    queue: QueueType,
    count: usize,
}

impl BatchTicket {
    /// Queue the objects belong to.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Number of objects checked out.
    pub fn count(&self) -> usize {
        self.count
    }
}

/// Objects checked out of a pool.
///
/// The batch owns its objects until it is handed back, so a batch can only
/// be returned once.
#[derive(Debug)]
pub struct PooledBatch<T> {
    ticket: BatchTicket,
    objects: Vec<T>,
}

impl<T> PooledBatch<T> {
    pub fn ticket(&self) -> BatchTicket {
        self.ticket
    }

    pub fn queue(&self) -> QueueType {
        self.ticket.queue
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.objects.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.objects.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.objects.iter_mut()
    }
}

/// Per-queue pool of one kind of command object.
pub struct CommandObjectPool<T> {
    label: &'static str,
    id: u64,
    initial_capacity: usize,
    free: PerQueue<Vec<T>>,
    created: PerQueue<usize>,
    outstanding: HashMap<u64, BatchTicket>,
    next_ticket: u64,
}

impl<T> CommandObjectPool<T> {
    /// Create an empty pool. The first growth on a queue creates at least
    /// `initial_capacity` objects.
    pub fn new(label: &'static str, initial_capacity: usize) -> Self {
        Self {
            label,
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            initial_capacity: initial_capacity.max(1),
            free: PerQueue::default(),
            created: PerQueue::default(),
            outstanding: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Check out `count` objects for `queue`, creating more with `create`
    /// when the free stack runs short.
    ///
    /// Growth doubles the number of objects the queue owns; the first growth
    /// creates `max(initial_capacity, count)`.
    pub fn retain<E, F>(
        &mut self,
        queue: QueueType,
        count: usize,
        mut create: F,
    ) -> Result<PooledBatch<T>, E>
    where
        F: FnMut(QueueType) -> Result<T, E>,
    {
        while self.free[queue].len() < count {
            let grow = match self.created[queue] {
                0 => self.initial_capacity.max(count),
                created => created,
            };
            log::debug!(
                "{} pool: growing {} queue by {} (had {})",
                self.label,
                queue,
                grow,
                self.created[queue]
            );
            self.free[queue].reserve(grow);
            for _ in 0..grow {
                let object = create(queue)?;
                self.free[queue].push(object);
                self.created[queue] += 1;
            }
        }

        let free = &mut self.free[queue];
        let objects = free.split_off(free.len() - count);

        let ticket = BatchTicket {
            pool: self.id,
            id: self.next_ticket,
            queue,
            count,
        };
        self.next_ticket += 1;
        self.outstanding.insert(ticket.id, ticket);
        log::trace!(
            "{} pool: retained {} on {} queue (ticket {})",
            self.label,
            count,
            queue,
            ticket.id
        );
        Ok(PooledBatch { ticket, objects })
    }

    /// Return a checkout to its free stack.
    pub fn release(&mut self, batch: PooledBatch<T>) {
        self.release_with(batch, |_| Ok::<(), std::convert::Infallible>(()));
    }

    /// Return a checkout, preparing each object with `reset` first.
    ///
    /// Objects whose reset fails are dropped instead of reused.
    pub fn release_with<E, F>(&mut self, batch: PooledBatch<T>, mut reset: F)
    where
        E: fmt::Display,
        F: FnMut(&mut T) -> Result<(), E>,
    {
        let PooledBatch { ticket, objects } = batch;
        if ticket.pool != self.id || self.outstanding.remove(&ticket.id).is_none() {
            log::warn!(
                "{} pool: unknown ticket {} returned for {} queue, dropping {} objects",
                self.label,
                ticket.id,
                ticket.queue,
                objects.len()
            );
            return;
        }

        for mut object in objects {
            match reset(&mut object) {
                Ok(()) => self.free[ticket.queue].push(object),
                Err(err) => {
                    log::error!("{} pool: failed to reset object: {}", self.label, err);
                    self.created[ticket.queue] -= 1;
                }
            }
        }
        log::trace!("{} pool: released ticket {}", self.label, ticket.id);
    }

    /// Tear the pool down, reporting checkouts that were never returned.
    ///
    /// Returns the number of leaked tickets.
    pub fn term(&mut self) -> usize {
        let leaked = self.outstanding.len();
        for ticket in self.outstanding.values() {
            log::warn!(
                "{} pool: ticket {} with {} objects on {} queue was never returned",
                self.label,
                ticket.id,
                ticket.count,
                ticket.queue
            );
        }
        self.outstanding.clear();
        for free in self.free.values_mut() {
            free.clear();
        }
        self.created = PerQueue::default();
        leaked
    }

    /// Objects ready for checkout on `queue`.
    pub fn free_count(&self, queue: QueueType) -> usize {
        self.free[queue].len()
    }

    /// Objects ever created for `queue` and still owned by the pool.
    pub fn created_count(&self, queue: QueueType) -> usize {
        self.created[queue]
    }

    /// Checkouts not yet returned.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

impl<T> fmt::Debug for CommandObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandObjectPool")
            .field("label", &self.label)
            .field("created", &self.created)
            .field("outstanding", &self.outstanding.len())
            .finish_non_exhaustive()
    }
}

/// Allocators and lists checked out together for one submission.
pub struct CommandCheckout<B: GpuBackend> {
    pub allocators: PooledBatch<B::CommandAllocator>,
    pub lists: PooledBatch<B::CommandList>,
}

impl<B: GpuBackend> CommandCheckout<B> {
    pub fn queue(&self) -> QueueType {
        self.lists.queue()
    }
}

impl<B: GpuBackend> fmt::Debug for CommandCheckout<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCheckout")
            .field("allocators", &self.allocators.ticket())
            .field("lists", &self.lists.ticket())
            .finish()
    }
}

/// Allocator and list pools for one backend.
pub struct CommandPools<B: GpuBackend> {
    allocators: CommandObjectPool<B::CommandAllocator>,
    lists: CommandObjectPool<B::CommandList>,
}

impl<B: GpuBackend> CommandPools<B> {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            allocators: CommandObjectPool::new("allocator", initial_capacity),
            lists: CommandObjectPool::new("command list", initial_capacity),
        }
    }

    /// Check out `count` allocators and `count` lists for `queue`.
    pub fn retain(
        &mut self,
        backend: &B,
        queue: QueueType,
        count: usize,
    ) -> BackendResult<CommandCheckout<B>> {
        let allocators = self
            .allocators
            .retain(queue, count, |queue| backend.create_command_allocator(queue))?;
        let lists = match self
            .lists
            .retain(queue, count, |queue| backend.create_command_list(queue))
        {
            Ok(lists) => lists,
            Err(err) => {
                self.allocators.release(allocators);
                return Err(err);
            }
        };
        Ok(CommandCheckout { allocators, lists })
    }

    /// Return a checkout whose GPU work has completed. Allocators are reset
    /// before they become available again.
    pub fn release(&mut self, backend: &B, checkout: CommandCheckout<B>) {
        let CommandCheckout { allocators, lists } = checkout;
        self.allocators
            .release_with(allocators, |allocator| backend.reset_command_allocator(allocator));
        self.lists.release(lists);
    }

    /// Tear down both pools; returns the number of leaked tickets.
    pub fn term(&mut self) -> usize {
        self.allocators.term() + self.lists.term()
    }

    pub fn allocators(&self) -> &CommandObjectPool<B::CommandAllocator> {
        &self.allocators
    }

    pub fn lists(&self) -> &CommandObjectPool<B::CommandList> {
        &self.lists
    }
}

impl<B: GpuBackend> fmt::Debug for CommandPools<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPools")
            .field("allocators", &self.allocators)
            .field("lists", &self.lists)
            .finish()
    }
}
