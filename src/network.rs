//! Shader network walking: from a resolved material prim to the terminal
//! shader that defines its surface.
//!
//! Materials expose surface outputs under several namespaces; NodeGraph
//! containers forward their outputs into their interior and are unwrapped
//! transparently with an explicit visited set and hop budget.

use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::scene::{Prim, SceneTree, last_segment, split_target};

/// Surface output namespaces, strongest first: the engine-specific shading
/// language, then node-graph outputs, then the generic surface output.
const OUTPUT_PRIORITY: [&str; 3] = [
    "outputs:mdl:surface",
    "outputs:nodegraph:surface",
    "outputs:surface",
];

/// Outcome of following surface outputs through NodeGraph containers.
#[derive(Debug)]
pub enum WalkOutcome<'a> {
    /// Reached a prim carrying a shading-model identifier.
    Found(&'a Prim),
    /// No surface output present, or a target that does not resolve.
    NotFound,
    /// Cycle detected or hop budget exhausted.
    Exhausted,
}

/// Resolve the terminal shader for `material`.
///
/// Falls back to a bounded search under the material for any prim with a
/// model identifier when output connections lead nowhere.
pub fn resolve_terminal_shader<'a>(
    material: &'a Prim,
    tree: &'a SceneTree,
    config: &EngineConfig,
) -> Option<&'a Prim> {
    match walk_surface_outputs(material, tree, config) {
        WalkOutcome::Found(shader) => return Some(shader),
        WalkOutcome::NotFound => {}
        WalkOutcome::Exhausted => {
            if config.verbose {
                eprintln!(
                    "[network] surface walk exhausted under {} (cycle or too deep)",
                    material.path
                );
            }
        }
    }

    // Last resort: any identifiable shader prim beneath the material.
    material
        .walk()
        .take(config.shader_search_budget)
        .find(|p| is_terminal_shader(p))
}

/// Follow surface-output connections from `start`, unwrapping NodeGraphs.
pub fn walk_surface_outputs<'a>(
    start: &'a Prim,
    tree: &'a SceneTree,
    config: &EngineConfig,
) -> WalkOutcome<'a> {
    let mut current = start;
    let mut visited: HashSet<&str> = HashSet::new();

    for _ in 0..config.network_hop_budget {
        if !visited.insert(current.path.as_str()) {
            return WalkOutcome::Exhausted;
        }

        let Some(target) = OUTPUT_PRIORITY
            .iter()
            .find_map(|name| current.connection(name))
        else {
            return WalkOutcome::NotFound;
        };

        let (prim_path, _field) = split_target(target);
        let Some(next) = resolve_output_target(current, tree, prim_path) else {
            return WalkOutcome::NotFound;
        };

        if is_terminal_shader(next) {
            return WalkOutcome::Found(next);
        }
        // No model identifier: a NodeGraph container. Re-apply the same
        // output-priority search on its own outputs.
        current = next;
    }

    WalkOutcome::Exhausted
}

/// Resolve an output-connection target prim.
///
/// Composition over references can drop absolute-path resolvability for a
/// subtree, so a direct child of the source prim with the target's leaf name
/// is preferred over the absolute lookup.
fn resolve_output_target<'a>(
    source: &'a Prim,
    tree: &'a SceneTree,
    prim_path: &str,
) -> Option<&'a Prim> {
    if let Some(child) = source.child(last_segment(prim_path)) {
        return Some(child);
    }
    tree.find(prim_path)
}

fn is_terminal_shader(prim: &Prim) -> bool {
    prim.shader_id().is_some() || prim.has_external_source()
}
