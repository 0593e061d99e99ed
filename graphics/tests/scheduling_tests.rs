//! End-to-end scheduling tests on the dummy backend.
//!
//! Graphs are compiled, recorded and submitted to the threaded dummy queues;
//! assertions read the order in which the queues actually executed work.
//!
//! Tests are parameterized using `rstest`.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use common::{TestContext, WAIT_TIMEOUT, init_logging, marking_callbacks};
use strata_graphics::backend::dummy::ExecutionEvent;
use strata_graphics::compiler::cull_passes;
use strata_graphics::pool::CommandObjectPool;
use strata_graphics::{
    BufferId, BufferStateFlags as S, CompileOptions, CompiledGraph, DeviceConfig, DummyBackend,
    GraphicsDevice, ImportedBuffer, PassCallbacks, QueueType, RenderGraph, RenderPass, SplitType,
};
use strata_core::FrameArena;

fn producer_consumer_graph() -> RenderGraph {
    let mut graph = RenderGraph::new();
    graph
        .add_pass(RenderPass::compute("produce").writes("particles", S::UAV))
        .unwrap();
    graph
        .add_pass(
            RenderPass::new("consume")
                .reads("particles", S::SRV_NON_PIXEL)
                .writes("color", S::RTV),
        )
        .unwrap();
    graph.mark_output("color").unwrap();
    graph
}

// ============================================================================
// Cross-queue ordering
// ============================================================================

#[rstest]
#[case::no_delay(0)]
#[case::short_delay(20)]
#[case::long_delay(80)]
fn test_consumer_waits_for_delayed_producer(#[case] delay_ms: u64) {
    let mut ctx = TestContext::new();
    let graph = producer_consumer_graph();

    let mut callbacks: PassCallbacks<DummyBackend> = PassCallbacks::new();
    callbacks.insert("produce", move |pass| {
        pass.list().delay(Duration::from_millis(delay_ms));
        pass.list().marker("produce");
    });
    callbacks.insert("consume", |pass| pass.list().marker("consume"));

    let (compiled, frame) = ctx.submit(&graph, &CompileOptions::default(), &mut callbacks);
    assert_eq!(compiled.batches().len(), 2);

    let produced = frame.batch_signal(0).unwrap();
    ctx.sync
        .wait_on_cpu(&HashMap::from([(QueueType::Compute, produced)]))
        .unwrap();
    assert!(ctx.sync.completed_value(QueueType::Compute) >= produced);

    ctx.finish(frame);
    let log = ctx.log();
    let produce = log.marker_position("produce").unwrap();
    let consume = log.marker_position("consume").unwrap();
    assert!(produce < consume, "consumer ran before producer signalled");

    let waited = log.events().iter().any(|event| {
        matches!(
            event,
            ExecutionEvent::Wait { queue: QueueType::Graphics, value } if *value == produced
        )
    });
    assert!(waited);
}

#[rstest]
#[case::async_compute(true, 2)]
#[case::graphics_only(false, 1)]
fn test_batches_follow_async_option(#[case] async_compute: bool, #[case] batches: usize) {
    let mut ctx = TestContext::new();
    let graph = producer_consumer_graph();
    let options = CompileOptions::default().with_async_compute(async_compute);

    let mut callbacks = marking_callbacks(&["produce", "consume"]);
    let (compiled, frame) = ctx.submit(&graph, &options, &mut callbacks);
    assert_eq!(compiled.batches().len(), batches);
    assert_eq!(frame.fence_value(QueueType::Compute).is_some(), async_compute);

    ctx.finish(frame);
    assert_eq!(ctx.log().markers(), vec!["produce", "consume"]);
}

/// Position of the marker `label` in the event log.
fn marker_event(events: &[ExecutionEvent], label: &str) -> Option<usize> {
    events
        .iter()
        .position(|event| matches!(event, ExecutionEvent::Marker { label: l, .. } if l == label))
}

/// Position of the first barrier on `buffer` executed by `queue`.
fn first_barrier(events: &[ExecutionEvent], queue: QueueType, buffer: BufferId) -> Option<usize> {
    events.iter().position(|event| {
        matches!(
            event,
            ExecutionEvent::Barrier { queue: q, barrier } if *q == queue && barrier.buffer == buffer
        )
    })
}

#[test]
fn test_final_transition_waits_for_compute_writer() {
    let mut ctx = TestContext::new();
    let mut graph = RenderGraph::new();
    graph
        .import_buffer(
            "history",
            ImportedBuffer {
                initial_state: Some(S::UAV),
                final_state: Some(S::SRV_PIXEL),
            },
        )
        .unwrap();
    graph
        .add_pass(RenderPass::compute("sim").writes("history", S::UAV).never_cull())
        .unwrap();
    graph.add_pass(RenderPass::new("draw").writes("color", S::RTV)).unwrap();
    graph.mark_output("color").unwrap();

    let mut callbacks: PassCallbacks<DummyBackend> = PassCallbacks::new();
    callbacks.insert("sim", |pass| {
        pass.list().delay(Duration::from_millis(100));
        pass.list().marker("sim");
    });
    callbacks.insert("draw", |pass| pass.list().marker("draw"));

    let (compiled, frame) = ctx.submit(&graph, &CompileOptions::default(), &mut callbacks);
    ctx.finish(frame);

    let history = compiled.buffer_id("history").unwrap();
    let events = ctx.log().events();
    let sim = marker_event(&events, "sim").unwrap();
    let transition = first_barrier(&events, QueueType::Graphics, history).unwrap();
    assert!(sim < transition, "final transition ran before the compute write finished");
}

#[test]
fn test_read_transition_waits_for_other_queue_reader() {
    let mut ctx = TestContext::new();
    let mut graph = RenderGraph::new();
    graph
        .import_buffer(
            "lut",
            ImportedBuffer {
                initial_state: Some(S::SRV_PIXEL),
                final_state: None,
            },
        )
        .unwrap();
    graph
        .add_pass(RenderPass::new("shade").reads("lut", S::SRV_PIXEL).writes("color", S::RTV))
        .unwrap();
    graph
        .add_pass(
            RenderPass::compute("bake")
                .reads("lut", S::SRV_NON_PIXEL)
                .writes("baked", S::UAV),
        )
        .unwrap();
    graph.mark_output("color").unwrap();
    graph.mark_output("baked").unwrap();

    let mut callbacks: PassCallbacks<DummyBackend> = PassCallbacks::new();
    callbacks.insert("shade", |pass| {
        pass.list().delay(Duration::from_millis(100));
        pass.list().marker("shade");
    });
    callbacks.insert("bake", |pass| pass.list().marker("bake"));

    let (compiled, frame) = ctx.submit(&graph, &CompileOptions::default(), &mut callbacks);
    ctx.finish(frame);

    let lut = compiled.buffer_id("lut").unwrap();
    let events = ctx.log().events();
    let shade = marker_event(&events, "shade").unwrap();
    let transition = first_barrier(&events, QueueType::Compute, lut).unwrap();
    assert!(shade < transition, "lut left SRV_PIXEL while shade still read it");
    assert!(events.iter().all(|event| !matches!(
        event,
        ExecutionEvent::Barrier { queue: QueueType::Graphics, barrier } if barrier.buffer == lut
    )));
}

// ============================================================================
// Barriers
// ============================================================================

/// Async compute and transfer work around a persistent history buffer read
/// in several states.
fn multi_batch_graph() -> RenderGraph {
    let mut graph = RenderGraph::new();
    graph
        .import_buffer("history", ImportedBuffer::persistent(S::SRV_PIXEL))
        .unwrap();
    graph
        .add_pass(RenderPass::transfer("upload").writes("constants", S::COPY_DST))
        .unwrap();
    graph
        .add_pass(
            RenderPass::new("gbuffer")
                .reads("constants", S::CONSTANT_BUFFER)
                .writes("albedo", S::RTV),
        )
        .unwrap();
    graph
        .add_pass(
            RenderPass::compute("reproject")
                .reads("history", S::SRV_NON_PIXEL)
                .writes("motion", S::UAV),
        )
        .unwrap();
    graph
        .add_pass(RenderPass::new("depth").writes("depth", S::DEPTH_WRITE))
        .unwrap();
    graph
        .add_pass(
            RenderPass::new("lighting")
                .reads("albedo", S::SRV_PIXEL)
                .reads("depth", S::DEPTH_READ)
                .reads("motion", S::SRV_PIXEL)
                .writes("hdr", S::RTV),
        )
        .unwrap();
    graph
        .add_pass(
            RenderPass::compute("resolve")
                .reads("hdr", S::SRV_NON_PIXEL)
                .writes("history", S::UAV),
        )
        .unwrap();
    graph
        .add_pass(
            RenderPass::new("tonemap")
                .reads("history", S::SRV_PIXEL)
                .writes("backbuffer", S::RTV),
        )
        .unwrap();
    graph
        .add_pass(
            RenderPass::transfer("readback")
                .reads("hdr", S::COPY_SRC)
                .writes("capture", S::COPY_DST),
        )
        .unwrap();
    graph.mark_output("backbuffer").unwrap();
    graph.mark_output("capture").unwrap();
    graph
}

fn assert_split_pairs_match(compiled: &CompiledGraph) {
    let batch_of_slot = |slot: usize| compiled.passes()[slot.min(compiled.pass_count() - 1)].batch;
    for (id, _) in compiled.usages().records() {
        let mut open = None;
        for barrier in compiled.barrier_plan().buffer_barriers(id) {
            let config = barrier.config;
            match config.split {
                SplitType::Begin => {
                    assert!(open.is_none(), "{id:?}: nested begin");
                    open = Some(*barrier);
                }
                SplitType::End => {
                    let begin = open.take().expect("end without begin");
                    assert_eq!(
                        (begin.config.before, begin.config.after),
                        (config.before, config.after)
                    );
                    assert!(begin.slot < barrier.slot);
                    assert_eq!(batch_of_slot(begin.slot), batch_of_slot(barrier.slot));
                }
                SplitType::None => assert!(open.is_none(), "{id:?}: whole barrier inside a split"),
            }
        }
        assert!(open.is_none(), "{id:?}: begin without end");
    }
}

#[rstest]
#[case::async_compute(CompileOptions::default())]
#[case::graphics_only(CompileOptions::default().with_async_compute(false))]
#[case::no_merge(CompileOptions::default().with_merge_read_states(false))]
fn test_every_begin_has_one_matching_end(#[case] options: CompileOptions) {
    init_logging();
    let graph = multi_batch_graph();
    let compiled = graph.compile(&options).unwrap();
    if options.async_compute {
        assert!(compiled.batches().len() > 2);
    }
    let begins = compiled
        .barrier_plan()
        .slots()
        .iter()
        .flatten()
        .filter(|b| b.split == SplitType::Begin)
        .count();
    let ends = compiled
        .barrier_plan()
        .slots()
        .iter()
        .flatten()
        .filter(|b| b.split == SplitType::End)
        .count();
    assert_eq!(begins, ends);
    assert_split_pairs_match(&compiled);
}

#[test]
fn test_multi_batch_frame_records_every_barrier() {
    let mut ctx = TestContext::new();
    let graph = multi_batch_graph();
    let labels = [
        "upload", "gbuffer", "reproject", "depth", "lighting", "resolve", "tonemap", "readback",
    ];
    let mut callbacks = marking_callbacks(&labels);
    let (compiled, frame) = ctx.submit(&graph, &CompileOptions::default(), &mut callbacks);
    ctx.finish(frame);

    let recorded: usize = QueueType::ALL
        .into_iter()
        .map(|queue| ctx.log().barrier_count(queue))
        .sum();
    assert_eq!(recorded, compiled.barrier_count());
    assert_eq!(ctx.log().markers().len(), labels.len());

    // The history buffer returns to SRV_PIXEL only after the compute resolve.
    let history = compiled.buffer_id("history").unwrap();
    let events = ctx.log().events();
    let resolve = marker_event(&events, "resolve").unwrap();
    let tonemap = marker_event(&events, "tonemap").unwrap();
    let to_pixel = events
        .iter()
        .position(|event| {
            matches!(
                event,
                ExecutionEvent::Barrier { barrier, .. }
                    if barrier.buffer == history && barrier.after == S::SRV_PIXEL
            )
        })
        .unwrap();
    assert!(resolve < to_pixel && to_pixel < tonemap);
}

#[test]
fn test_four_pass_two_buffer_barriers_reach_queue() {
    let mut ctx = TestContext::new();
    let mut graph = RenderGraph::new();
    graph
        .add_pass(RenderPass::new("p0").writes("b1", S::RTV).reads("b2", S::PRESENT))
        .unwrap();
    graph.add_pass(RenderPass::new("p1").reads("b1", S::RTV)).unwrap();
    graph
        .add_pass(RenderPass::new("p2").reads("b1", S::SRV_PIXEL).writes("b2", S::RTV))
        .unwrap();
    graph
        .add_pass(RenderPass::new("p3").writes("b1", S::RTV).reads("b2", S::PRESENT))
        .unwrap();
    graph.mark_output("b1").unwrap();
    graph.mark_output("b2").unwrap();

    let mut callbacks = marking_callbacks(&["p0", "p1", "p2", "p3"]);
    let (compiled, frame) = ctx.submit(&graph, &CompileOptions::default(), &mut callbacks);
    assert_eq!(compiled.barrier_count(), 5);

    ctx.finish(frame);
    assert_eq!(ctx.log().barrier_count(QueueType::Graphics), 5);
    assert_eq!(ctx.log().markers(), vec!["p0", "p1", "p2", "p3"]);

    // The split pair around p1 brackets its marker.
    let events = ctx.log().events();
    let p1 = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::Marker { label, .. } if label == "p1"))
        .unwrap();
    let b2 = compiled.buffer_id("b2").unwrap();
    let before_p1 = events[..p1]
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::Barrier { barrier, .. } if barrier.buffer == b2))
        .count();
    assert_eq!(before_p1, 1);
}

#[test]
fn test_culling_is_idempotent() {
    init_logging();
    let mut graph = RenderGraph::new();
    graph.add_pass(RenderPass::new("debug").writes("overlay", S::RTV)).unwrap();
    graph.add_pass(RenderPass::new("gbuffer").writes("albedo", S::RTV)).unwrap();
    graph
        .add_pass(
            RenderPass::new("lighting")
                .reads("albedo", S::SRV_PIXEL)
                .writes("hdr", S::RTV),
        )
        .unwrap();
    graph.mark_output("hdr").unwrap();

    let mut arena = FrameArena::new();
    let kept = cull_passes(&graph, &mut arena).unwrap();
    assert_eq!(kept.len(), 2);

    let mut culled = RenderGraph::new();
    for &handle in &kept {
        culled.add_pass(graph.pass(handle).unwrap().clone()).unwrap();
    }
    culled.mark_output("hdr").unwrap();

    let again = cull_passes(&culled, &mut arena).unwrap();
    assert_eq!(again.len(), kept.len());
    let labels: Vec<_> = again
        .iter()
        .map(|&h| culled.pass(h).unwrap().label().to_string())
        .collect();
    assert_eq!(labels, vec!["gbuffer", "lighting"]);
}

// ============================================================================
// Pools and fences
// ============================================================================

#[rstest]
#[case::single(QueueType::Graphics, 1)]
#[case::exact_initial(QueueType::Compute, 4)]
#[case::forces_growth(QueueType::Transfer, 9)]
fn test_pool_retain_release_invariant(#[case] queue: QueueType, #[case] count: usize) {
    init_logging();
    let mut pool: CommandObjectPool<u32> = CommandObjectPool::new("test", 4);
    let mut next = 0;
    let mut create = |_: QueueType| {
        next += 1;
        Ok::<_, ()>(next)
    };

    let batch = pool.retain(queue, count, &mut create).unwrap();
    assert_eq!(batch.len(), count);
    let created = pool.created_count(queue);
    assert_eq!(pool.free_count(queue) + batch.len(), created);

    pool.release(batch);
    assert_eq!(pool.free_count(queue), created);
    assert_eq!(pool.outstanding_count(), 0);

    // Reuse does not create anything new.
    let again = pool.retain(queue, count, &mut create).unwrap();
    assert_eq!(pool.created_count(queue), created);
    pool.release(again);
    assert_eq!(pool.term(), 0);
}

#[test]
fn test_empty_cpu_wait_returns_immediately() {
    let ctx = TestContext::new();
    ctx.sync.wait_on_cpu(&HashMap::new()).unwrap();
}

#[rstest]
#[case::one_frame(1)]
#[case::two_frames(2)]
#[case::three_frames(3)]
fn test_device_frames_in_flight(#[case] frames_in_flight: usize) {
    init_logging();
    let backend = Arc::new(DummyBackend::new().unwrap());
    let config = DeviceConfig::new()
        .with_frames_in_flight(frames_in_flight)
        .with_cpu_wait_timeout(WAIT_TIMEOUT);
    let mut device = GraphicsDevice::new(backend, config).unwrap();

    let graph = producer_consumer_graph();
    let compiled = device.compile(&graph, &CompileOptions::default()).unwrap();
    let mut callbacks = marking_callbacks(&["produce", "consume"]);

    let mut last = HashMap::new();
    for _ in 0..8 {
        last = device.submit(&graph, &compiled, &mut callbacks).unwrap();
        assert!(device.pipeline().in_flight_count() <= frames_in_flight);
    }
    assert_eq!(last.get(&QueueType::Graphics), Some(&8));
    assert_eq!(last.get(&QueueType::Compute), Some(&8));

    assert_eq!(device.shutdown().unwrap(), 0);
    assert_eq!(device.backend().execution_log().markers().len(), 16);
}
