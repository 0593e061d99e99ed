//! Scoped bump allocation.
//!
//! Graph compilation produces a lot of short-lived scratch data (worklists,
//! ready queues, per-buffer cursors). [`FrameArena`] owns a `bumpalo::Bump`
//! and hands out [`ArenaScope`] guards; everything allocated through a scope
//! is released in bulk when the guard drops, while the arena keeps its memory
//! for the next scope.
//!
//! ```
//! use strata_core::arena::FrameArena;
//!
//! let mut arena = FrameArena::new();
//! {
//!     let scope = arena.scope();
//!     let mut scratch = scope.vec::<u32>();
//!     scratch.extend([1, 2, 3]);
//!     assert_eq!(scratch.len(), 3);
//! }
//! assert_eq!(arena.reset_count(), 1);
//! ```

use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;

/// Long-lived owner of scratch memory.
#[derive(Debug, Default)]
pub struct FrameArena {
    bump: Bump,
    resets: u64,
}

impl FrameArena {
    /// Create an arena that allocates lazily.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an arena with `bytes` preallocated.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bump: Bump::with_capacity(bytes),
            resets: 0,
        }
    }

    /// Open a scope. Its allocations are reset when the guard drops.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        ArenaScope { arena: self }
    }

    /// Bytes currently reserved by the underlying allocator.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// How many scopes have been closed.
    pub fn reset_count(&self) -> u64 {
        self.resets
    }
}

/// Guard over a [`FrameArena`]; resets the arena on drop.
pub struct ArenaScope<'a> {
    arena: &'a mut FrameArena,
}

impl ArenaScope<'_> {
    /// The bump allocator backing this scope.
    pub fn bump(&self) -> &Bump {
        &self.arena.bump
    }

    /// Empty vector allocated in this scope.
    pub fn vec<T>(&self) -> BumpVec<'_, T> {
        BumpVec::new_in(&self.arena.bump)
    }

    /// Vector with room for `capacity` elements.
    pub fn vec_with_capacity<T>(&self, capacity: usize) -> BumpVec<'_, T> {
        BumpVec::with_capacity_in(capacity, &self.arena.bump)
    }

    /// Move `value` into the scope.
    pub fn alloc<T>(&self, value: T) -> &mut T {
        self.arena.bump.alloc(value)
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        self.arena.bump.reset();
        self.arena.resets += 1;
    }
}
