//! Pass culling.
//!
//! A pass survives when a mandatory output transitively depends on it, or
//! when it is flagged [`PassFlags::NEVER_CULL`](crate::graph::PassFlags).
//! Dependencies come from data flow: a pass that reads a buffer, or writes it
//! with [`LoadOp::Load`](crate::types::LoadOp), depends on the most recent
//! earlier pass that wrote the buffer. Explicit graph edges are added on top.

use std::collections::{HashMap, HashSet};

use strata_core::{AdjacencyGraph, FrameArena, Name, profile_function};

use crate::error::GraphError;
use crate::graph::{PassHandle, RenderGraph};

/// Build the producer graph: `pass -> {passes whose output it consumes}`.
///
/// Every pass is a node, including passes with no buffer usages.
pub fn producer_graph(graph: &RenderGraph) -> AdjacencyGraph {
    let mut producers = AdjacencyGraph::new();
    let mut last_writer: HashMap<Name, Name> = HashMap::new();

    for pass in graph.passes() {
        producers.add_node(pass.name());
        for config in pass.buffers() {
            if config.consumes_previous()
                && let Some(&writer) = last_writer.get(&config.name())
            {
                producers.add_edge(pass.name(), writer);
            }
        }
        for config in pass.buffers().iter().filter(|config| config.is_write()) {
            last_writer.insert(config.name(), pass.name());
        }
    }

    for &(dependent, dependency) in graph.edges() {
        if let (Some(dependent), Some(dependency)) = (graph.pass(dependent), graph.pass(dependency))
        {
            producers.add_edge(dependent.name(), dependency.name());
        }
    }

    producers
}

/// Passes the culling walk starts from.
fn seeds(graph: &RenderGraph) -> Result<Vec<Name>, GraphError> {
    let mut last_writer: HashMap<Name, Name> = HashMap::new();
    let mut used: HashSet<Name> = HashSet::new();
    for pass in graph.passes() {
        for config in pass.buffers() {
            used.insert(config.name());
            if config.is_write() {
                last_writer.insert(config.name(), pass.name());
            }
        }
    }

    let mut seeds = Vec::new();
    for &output in graph.outputs() {
        match last_writer.get(&output) {
            Some(&writer) => seeds.push(writer),
            // Imported buffers may legitimately pass through untouched.
            None if graph.imports().contains_key(&output) => {}
            None if used.contains(&output) => {
                return Err(GraphError::UnreachableOutput(graph.names().label(output)));
            }
            None => return Err(GraphError::UnknownOutput(graph.names().label(output))),
        }
    }

    seeds.extend(
        graph
            .passes()
            .iter()
            .filter(|pass| pass.is_never_cull())
            .map(|pass| pass.name()),
    );
    Ok(seeds)
}

/// Remove passes no mandatory output depends on.
///
/// Returns the surviving handles in declaration order. Running the cull
/// again over the survivors keeps all of them.
pub fn cull_passes(
    graph: &RenderGraph,
    arena: &mut FrameArena,
) -> Result<Vec<PassHandle>, GraphError> {
    profile_function!();

    let producers = producer_graph(graph);
    let seeds = seeds(graph)?;

    let mut reachable = HashSet::with_capacity(graph.pass_count());
    {
        let scope = arena.scope();
        let mut worklist = scope.vec_with_capacity(graph.pass_count());
        for seed in seeds {
            producers.closure(seed, &mut worklist, &mut reachable);
        }
    }

    let kept: Vec<PassHandle> = graph
        .passes()
        .iter()
        .enumerate()
        .filter(|(_, pass)| reachable.contains(&pass.name()))
        .map(|(index, _)| PassHandle::new(index as u32))
        .collect();

    log::debug!("cull: kept {}/{} passes", kept.len(), graph.pass_count());
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ImportedBuffer, RenderPass};
    use crate::types::BufferStateFlags as S;

    fn labels(graph: &RenderGraph, handles: &[PassHandle]) -> Vec<String> {
        handles
            .iter()
            .map(|&h| graph.pass(h).unwrap().label().to_string())
            .collect()
    }

    fn deferred_graph() -> RenderGraph {
        let mut graph = RenderGraph::new();
        graph
            .add_pass(RenderPass::new("gbuffer").writes("albedo", S::RTV))
            .unwrap();
        graph
            .add_pass(RenderPass::new("debug_overlay").writes("debug", S::RTV))
            .unwrap();
        graph
            .add_pass(
                RenderPass::new("lighting")
                    .reads("albedo", S::SRV_PIXEL)
                    .writes("hdr", S::RTV),
            )
            .unwrap();
        graph
            .add_pass(
                RenderPass::new("tonemap")
                    .reads("hdr", S::SRV_PIXEL)
                    .writes("backbuffer", S::RTV),
            )
            .unwrap();
        graph.mark_output("backbuffer").unwrap();
        graph
    }

    #[test]
    fn test_unreachable_pass_is_culled() {
        let graph = deferred_graph();
        let kept = cull_passes(&graph, &mut FrameArena::new()).unwrap();
        assert_eq!(labels(&graph, &kept), vec!["gbuffer", "lighting", "tonemap"]);
    }

    #[test]
    fn test_culling_is_idempotent() {
        let graph = deferred_graph();
        let kept = cull_passes(&graph, &mut FrameArena::new()).unwrap();

        let mut survivors = RenderGraph::new();
        for &handle in &kept {
            survivors.add_pass(graph.pass(handle).unwrap().clone()).unwrap();
        }
        survivors.mark_output("backbuffer").unwrap();

        let again = cull_passes(&survivors, &mut FrameArena::new()).unwrap();
        assert_eq!(again.len(), kept.len());
        assert_eq!(labels(&survivors, &again), labels(&graph, &kept));
    }

    #[test]
    fn test_overwriting_write_breaks_dependency() {
        let mut graph = RenderGraph::new();
        graph.add_pass(RenderPass::new("old").writes("x", S::RTV)).unwrap();
        graph.add_pass(RenderPass::new("clear").writes("x", S::RTV)).unwrap();
        graph.mark_output("x").unwrap();

        let kept = cull_passes(&graph, &mut FrameArena::new()).unwrap();
        assert_eq!(labels(&graph, &kept), vec!["clear"]);
    }

    #[test]
    fn test_loading_write_keeps_previous_writer() {
        let mut graph = RenderGraph::new();
        graph.add_pass(RenderPass::new("opaque").writes("color", S::RTV)).unwrap();
        graph
            .add_pass(RenderPass::new("transparent").reads("color", S::RTV))
            .unwrap();
        graph.mark_output("color").unwrap();

        let kept = cull_passes(&graph, &mut FrameArena::new()).unwrap();
        assert_eq!(labels(&graph, &kept), vec!["opaque", "transparent"]);
    }

    #[test]
    fn test_never_cull_and_explicit_dependency() {
        let mut graph = RenderGraph::new();
        let upload = graph.add_pass(RenderPass::transfer("upload")).unwrap();
        let sync = graph.add_pass(RenderPass::new("sync_point").never_cull()).unwrap();
        graph.add_pass(RenderPass::new("dead")).unwrap();
        graph.add_dependency(sync, upload).unwrap();

        let kept = cull_passes(&graph, &mut FrameArena::new()).unwrap();
        assert_eq!(labels(&graph, &kept), vec!["upload", "sync_point"]);
    }

    #[test]
    fn test_no_outputs_culls_everything() {
        let mut graph = RenderGraph::new();
        graph.add_pass(RenderPass::new("a").writes("x", S::UAV)).unwrap();
        assert!(cull_passes(&graph, &mut FrameArena::new()).unwrap().is_empty());
    }

    #[test]
    fn test_output_errors() {
        let mut graph = RenderGraph::new();
        graph.add_pass(RenderPass::new("reader").reads("x", S::SRV_PIXEL)).unwrap();
        graph.mark_output("x").unwrap();
        assert_eq!(
            cull_passes(&graph, &mut FrameArena::new()),
            Err(GraphError::UnreachableOutput("x".into()))
        );

        let mut graph = RenderGraph::new();
        graph.mark_output("nothing").unwrap();
        assert_eq!(
            cull_passes(&graph, &mut FrameArena::new()),
            Err(GraphError::UnknownOutput("nothing".into()))
        );
    }

    #[test]
    fn test_imported_output_may_be_untouched() {
        let mut graph = RenderGraph::new();
        graph
            .import_buffer("history", ImportedBuffer::persistent(S::SRV_PIXEL))
            .unwrap();
        graph.mark_output("history").unwrap();
        assert!(cull_passes(&graph, &mut FrameArena::new()).unwrap().is_empty());
    }

    #[test]
    fn test_producer_graph_edges() {
        let graph = deferred_graph();
        let producers = producer_graph(&graph);
        assert_eq!(producers.node_count(), 4);
        assert!(producers.has_edge(Name::hash_str("lighting"), Name::hash_str("gbuffer")));
        assert!(producers.has_edge(Name::hash_str("tonemap"), Name::hash_str("lighting")));
        assert_eq!(producers.edge_count(), 2);
    }
}
