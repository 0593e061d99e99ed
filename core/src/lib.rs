//! # Strata Core
//!
//! Building blocks shared by the Strata render graph scheduler:
//!
//! - [`name`] - 32-bit interned names with collision detection
//! - [`adjacency`] - Dependency maps and transitive closure
//! - [`arena`] - Scoped bump allocation for per-compile scratch data
//! - [`profiling`] - Optional Tracy instrumentation macros

pub mod adjacency;
pub mod arena;
pub mod name;
pub mod profiling;

pub use adjacency::{AdjacencyGraph, Worklist};
pub use arena::{ArenaScope, FrameArena};
pub use name::{Name, NameError, NameTable};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
