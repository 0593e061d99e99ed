//! Common utilities for scheduling integration tests.
//!
//! Tests run against the dummy backend, whose queues are worker threads, so
//! cross-queue ordering is observable through its execution log.

use std::sync::Arc;
use std::time::Duration;

use strata_graphics::backend::dummy::ExecutionLog;
use strata_graphics::pool::CommandPools;
use strata_graphics::{
    CompileOptions, CompiledGraph, DummyBackend, FrameSchedule, PassCallbacks, QueueSync,
    RenderGraph, SubmittedFrame,
};

/// Upper bound on every CPU wait so a scheduling bug fails instead of hanging.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise logging once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Backend, fences and pools for driving frames by hand.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub sync: QueueSync<DummyBackend>,
    pub pools: CommandPools<DummyBackend>,
}

impl TestContext {
    pub fn new() -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new().expect("dummy backend"));
        let sync = QueueSync::new(Arc::clone(&backend), Some(WAIT_TIMEOUT)).expect("queue sync");
        Self {
            backend,
            sync,
            pools: CommandPools::new(2),
        }
    }

    pub fn log(&self) -> &ExecutionLog {
        self.backend.execution_log()
    }

    /// Compile `graph` with `options` and submit it.
    pub fn submit(
        &mut self,
        graph: &RenderGraph,
        options: &CompileOptions,
        callbacks: &mut PassCallbacks<DummyBackend>,
    ) -> (CompiledGraph, SubmittedFrame<DummyBackend>) {
        let compiled = graph.compile(options).expect("graph compiles");
        let frame = FrameSchedule::new(&*self.backend, &mut self.sync, &mut self.pools)
            .execute(graph, &compiled, callbacks)
            .expect("frame executes");
        (compiled, frame)
    }

    /// Wait for `frame` on the CPU and return its command objects.
    pub fn finish(&mut self, frame: SubmittedFrame<DummyBackend>) {
        self.sync
            .wait_on_cpu(frame.fence_values())
            .expect("frame completes");
        frame.retire(&self.backend, &mut self.pools);
    }
}

/// Callbacks that record a marker named after each pass.
pub fn marking_callbacks(labels: &[&str]) -> PassCallbacks<DummyBackend> {
    let mut callbacks: PassCallbacks<DummyBackend> = PassCallbacks::new();
    for &label in labels {
        let owned = label.to_string();
        callbacks.insert(label, move |ctx| ctx.list().marker(owned.clone()));
    }
    callbacks
}
