//! Render graph declaration.
//!
//! A [`RenderGraph`] is the declarative description of one frame's GPU work:
//! an ordered list of [`RenderPass`]es, each naming the buffers it touches and
//! the state it needs them in, plus the set of mandatory outputs the frame
//! must produce.
//!
//! Declaration order is meaningful: a pass that reads a buffer consumes the
//! output of the most recent earlier pass that wrote it. Explicit
//! dependencies can be added for ordering that is not expressed through
//! buffers.
//!
//! The graph compiler turns a declaration into a
//! [`CompiledGraph`](crate::compiler::CompiledGraph): unreachable passes are
//! culled, passes are grouped into per-queue batches with cross-queue waits,
//! and resource barriers are synthesized.
//!
//! # Example
//!
//! ```
//! use strata_graphics::{BufferStateFlags, CompileOptions, RenderGraph, RenderPass};
//!
//! let mut graph = RenderGraph::new();
//! graph.add_pass(RenderPass::new("gbuffer").writes("albedo", BufferStateFlags::RTV))?;
//! graph.add_pass(
//!     RenderPass::new("lighting")
//!         .reads("albedo", BufferStateFlags::SRV_PIXEL)
//!         .writes("hdr", BufferStateFlags::RTV),
//! )?;
//! graph.mark_output("hdr")?;
//!
//! let compiled = graph.compile(&CompileOptions::default())?;
//! assert_eq!(compiled.pass_count(), 2);
//! # Ok::<(), strata_graphics::GraphError>(())
//! ```

mod pass;
mod resource_usage;

use std::collections::{BTreeMap, HashSet};

use strata_core::{Name, NameTable};

pub use pass::{BufferConfig, PassFlags, RenderPass};
pub use resource_usage::{BufferId, BufferUsage, BufferUsageRecord, UsageTable, configure_usages};

use crate::compiler::{CompileOptions, CompiledGraph};
use crate::error::GraphError;
use crate::types::BufferStateFlags;

/// Handle to a pass in the render graph.
///
/// `PassHandle` is `Copy` and cheap to pass around. It is only valid within
/// the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(u32);

impl PassHandle {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    /// Declaration index of the pass.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A buffer whose lifetime extends beyond the frame.
///
/// Transient buffers are assumed to be created in the state of their first
/// use. An imported buffer instead enters the frame in `initial_state` and,
/// when `final_state` is set, is transitioned back to it after the last pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportedBuffer {
    /// State at frame start.
    pub initial_state: Option<BufferStateFlags>,
    /// State required at frame end.
    pub final_state: Option<BufferStateFlags>,
}

impl ImportedBuffer {
    /// Buffer entering and leaving the frame in the same state.
    pub fn persistent(state: BufferStateFlags) -> Self {
        Self {
            initial_state: Some(state),
            final_state: Some(state),
        }
    }
}

/// The render graph describes a frame's rendering operations.
///
/// # Construction
///
/// ```ignore
/// let mut graph = RenderGraph::new();
/// let shadows = graph.add_pass(RenderPass::new("shadows").writes("shadow_map", DEPTH_WRITE))?;
/// let upload = graph.add_pass(RenderPass::transfer("upload").never_cull())?;
/// graph.add_dependency(shadows, upload)?;
/// graph.mark_output("shadow_map")?;
/// ```
#[derive(Debug, Default)]
pub struct RenderGraph {
    passes: Vec<RenderPass>,
    /// Explicit dependency edges stored as (dependent, dependency) pairs.
    edges: Vec<(PassHandle, PassHandle)>,
    outputs: Vec<Name>,
    imports: BTreeMap<Name, ImportedBuffer>,
    pass_names: HashSet<Name>,
    names: NameTable,
}

impl RenderGraph {
    /// Create a new empty render graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass.
    ///
    /// Pass names must be unique within the graph and a pass may list each
    /// buffer only once. Pass and buffer names share one name table, so a
    /// hash collision between any two distinct strings is rejected.
    pub fn add_pass(&mut self, pass: RenderPass) -> Result<PassHandle, GraphError> {
        if self.pass_names.contains(&pass.name()) {
            return Err(GraphError::DuplicatePass(pass.label().to_string()));
        }

        let mut seen = HashSet::with_capacity(pass.buffers().len());
        for config in pass.buffers() {
            if !seen.insert(config.name()) {
                return Err(GraphError::DuplicateBufferUse {
                    pass: pass.label().to_string(),
                    buffer: config.label().to_string(),
                });
            }
        }

        let labels: Vec<(Name, &str)> = std::iter::once((pass.name(), pass.label()))
            .chain(pass.buffers().iter().map(|config| (config.name(), config.label())))
            .collect();
        self.names.register_all(&labels)?;

        let index = self.passes.len() as u32;
        log::trace!(
            "RenderGraph: add pass {} '{}' on {} queue",
            index,
            pass.label(),
            pass.queue()
        );
        self.pass_names.insert(pass.name());
        self.passes.push(pass);
        Ok(PassHandle::new(index))
    }

    /// Add a dependency between passes.
    ///
    /// The `dependent` pass will execute after the `dependency` pass and keeps
    /// it alive during culling.
    pub fn add_dependency(
        &mut self,
        dependent: PassHandle,
        dependency: PassHandle,
    ) -> Result<(), GraphError> {
        let dependent_pass = self
            .pass(dependent)
            .ok_or(GraphError::InvalidPassHandle(dependent))?;
        if self.pass(dependency).is_none() {
            return Err(GraphError::InvalidPassHandle(dependency));
        }
        if dependent == dependency {
            return Err(GraphError::SelfDependency(dependent_pass.name()));
        }

        let exists = self
            .edges
            .iter()
            .any(|&(d, dep)| d == dependent && dep == dependency);
        if !exists {
            self.edges.push((dependent, dependency));
        }
        Ok(())
    }

    /// Require `buffer` to be produced by the frame.
    ///
    /// The last pass writing it, and everything that pass transitively
    /// consumes, survives culling.
    pub fn mark_output(&mut self, buffer: &str) -> Result<Name, GraphError> {
        let name = self.names.intern(buffer)?;
        if !self.outputs.contains(&name) {
            self.outputs.push(name);
        }
        Ok(name)
    }

    /// Register `buffer` as imported with the given frame-boundary states.
    pub fn import_buffer(
        &mut self,
        buffer: &str,
        import: ImportedBuffer,
    ) -> Result<Name, GraphError> {
        let name = self.names.intern(buffer)?;
        self.imports.insert(name, import);
        Ok(name)
    }

    /// Get dependencies of a pass.
    pub fn dependencies(&self, handle: PassHandle) -> impl Iterator<Item = PassHandle> + '_ {
        self.edges
            .iter()
            .filter(move |&&(dependent, _)| dependent == handle)
            .map(|&(_, dependency)| dependency)
    }

    /// All explicit dependency edges as (dependent, dependency).
    pub fn edges(&self) -> &[(PassHandle, PassHandle)] {
        &self.edges
    }

    /// Get all passes in declaration order.
    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    /// Get a pass by handle.
    pub fn pass(&self, handle: PassHandle) -> Option<&RenderPass> {
        self.passes.get(handle.index())
    }

    /// Find a pass by name.
    pub fn find_pass(&self, label: &str) -> Option<PassHandle> {
        let name = Name::hash_str(label);
        self.passes
            .iter()
            .position(|pass| pass.name() == name)
            .map(|index| PassHandle::new(index as u32))
    }

    /// Get the number of passes in the graph.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Mandatory outputs in the order they were marked.
    pub fn outputs(&self) -> &[Name] {
        &self.outputs
    }

    /// Imported buffers and their frame-boundary states.
    pub fn imports(&self) -> &BTreeMap<Name, ImportedBuffer> {
        &self.imports
    }

    /// Names of every pass and buffer declared so far.
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    /// Compile the graph for execution.
    pub fn compile(&self, options: &CompileOptions) -> Result<CompiledGraph, GraphError> {
        crate::compiler::compile(self, options)
    }

    /// Clear all passes, outputs and imports.
    pub fn clear(&mut self) {
        self.passes.clear();
        self.edges.clear();
        self.outputs.clear();
        self.imports.clear();
        self.pass_names.clear();
        self.names = NameTable::new();
    }
}
