//! Material binding resolution.
//!
//! Finds the material bound to a renderable prim by walking its ancestor
//! chain, honoring namespace inheritance: the nearest ancestor with any
//! binding relationship wins, even when that relationship fails to resolve
//! further (binding presence masks ancestors).

use crate::scene::{Prim, SceneTree, first_segment, last_segment};

/// Canonical binding relationship name.
pub const BINDING_REL: &str = "material:binding";

/// Purpose-qualified binding names, strongest first. Anything else under the
/// `material:binding:` namespace is considered after these, in lexicographic
/// order, so resolution never depends on property authoring order.
const BINDING_PRIORITY: [&str; 2] = ["material:binding:preview", "material:binding:full"];

/// Informal legacy property: a leaf prim naming its material path directly.
const LEGACY_ASSIGNMENT: &str = "materialAssignment";

/// Resolve the material bound to `prim`.
///
/// `instance_root` marks the prototype boundary for instanced prims: the
/// ancestor walk stops below it, and unresolvable absolute material paths are
/// remapped into the prototype's namespace.
pub fn resolve_binding<'a>(
    prim: &Prim,
    tree: &'a SceneTree,
    instance_root: Option<&Prim>,
) -> Option<&'a Prim> {
    for ancestor_path in ancestor_paths(&prim.path) {
        if let Some(root) = instance_root {
            if ancestor_path == root.path {
                break;
            }
        }
        let Some(ancestor) = tree.find(&ancestor_path) else {
            continue;
        };

        if let Some(targets) = binding_targets(ancestor) {
            // Binding presence masks higher ancestors: resolve here or not at all.
            return targets
                .into_iter()
                .find_map(|t| resolve_material_path(tree, &t, instance_root));
        }
    }

    // Legacy fallbacks: a `materialBind` child prim carrying a path-shaped
    // property, or an informal string property on the prim itself.
    if let Some(bind) = prim.child("materialBind") {
        if let Some(target) = bind
            .properties
            .iter()
            .find_map(|(_, p)| p.value().and_then(|v| v.as_path()))
        {
            if let Some(found) = resolve_material_path(tree, target, instance_root) {
                return Some(found);
            }
        }
    }
    let legacy = prim.value(LEGACY_ASSIGNMENT)?.as_str()?;
    resolve_material_path(tree, legacy, instance_root)
}

/// Paths of `prim` and all its ancestors, nearest first, root excluded.
fn ancestor_paths(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while !current.is_empty() && current != "/" {
        out.push(current.to_string());
        match current.rfind('/') {
            Some(0) | None => break,
            Some(idx) => current = &current[..idx],
        }
    }
    out
}

/// Relationship targets of the strongest binding relationship on `prim`,
/// or `None` when the prim carries no binding at all.
///
/// A relationship whose value is not path-shaped is treated as absent.
fn binding_targets(prim: &Prim) -> Option<Vec<String>> {
    let mut candidates: Vec<&str> = Vec::new();

    if prim.prop(BINDING_REL).is_some() {
        candidates.push(BINDING_REL);
    }
    for name in BINDING_PRIORITY {
        if prim.prop(name).is_some() {
            candidates.push(name);
        }
    }

    // Remaining purpose-qualified names, lexicographic, skipping sub-field
    // suffixes like `material:binding:preview:bindMaterialAs`.
    let prefix = format!("{BINDING_REL}:");
    let mut extras: Vec<&str> = prim
        .property_names()
        .filter(|n| n.starts_with(&prefix))
        .filter(|n| !n[prefix.len()..].contains(':'))
        .filter(|n| !candidates.contains(n))
        .collect();
    extras.sort_unstable();
    candidates.extend(extras);

    for name in candidates {
        let targets = prim
            .value(name)
            .map(|v| v.as_path_list())
            .unwrap_or_default();
        if !targets.is_empty() {
            return Some(targets.into_iter().map(str::to_string).collect());
        }
    }
    None
}

/// Resolve a material path, trying prototype remappings when the plain
/// absolute lookup misses.
fn resolve_material_path<'a>(
    tree: &'a SceneTree,
    path: &str,
    instance_root: Option<&Prim>,
) -> Option<&'a Prim> {
    if let Some(found) = tree.find(path) {
        return Some(found);
    }
    let root = instance_root?;

    // The material was authored relative to the referenced layer's own root;
    // swap that root prefix for the prototype's path.
    let first = first_segment(path);
    if !first.is_empty() {
        let rest = path
            .trim_start_matches('/')
            .strip_prefix(first)
            .unwrap_or("");
        let remapped = format!("{}{rest}", root.path);
        if let Some(found) = tree.find(&remapped) {
            return Some(found);
        }
    }

    // Generic: material leaf directly under the prototype.
    let leaf = format!("{}/{}", root.path, last_segment(path));
    if let Some(found) = tree.find(&leaf) {
        return Some(found);
    }

    // Simple concatenation.
    let concat = format!("{}{path}", root.path);
    tree.find(&concat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::load_scene_from_str;

    fn scene() -> SceneTree {
        load_scene_from_str(
            r#"{
            "World": {
                "type": "Xform",
                "properties": {
                    "material:binding": { "rel": "/World/Looks/Outer" }
                },
                "children": {
                    "Group": {
                        "type": "Xform",
                        "properties": {
                            "material:binding:preview": { "rel": "/World/Looks/Inner" }
                        },
                        "children": {
                            "Mesh": { "type": "Mesh" }
                        }
                    },
                    "Bare": { "type": "Mesh" },
                    "Looks": {
                        "type": "Scope",
                        "children": {
                            "Outer": { "type": "Material" },
                            "Inner": { "type": "Material" }
                        }
                    }
                }
            }
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn nearest_ancestor_binding_wins() {
        let tree = scene();
        let mesh = tree.find("/World/Group/Mesh").unwrap();
        let mat = resolve_binding(mesh, &tree, None).unwrap();
        assert_eq!(mat.path, "/World/Looks/Inner");
    }

    #[test]
    fn unbound_chain_resolves_to_none() {
        let tree = load_scene_from_str(
            r#"{ "World": { "type": "Xform", "children": { "Mesh": { "type": "Mesh" } } } }"#,
        )
        .unwrap();
        let mesh = tree.find("/World/Mesh").unwrap();
        assert!(resolve_binding(mesh, &tree, None).is_none());
    }

    #[test]
    fn unresolvable_binding_masks_ancestors() {
        let tree = load_scene_from_str(
            r#"{
            "World": {
                "type": "Xform",
                "properties": { "material:binding": { "rel": "/World/Looks/Real" } },
                "children": {
                    "Group": {
                        "type": "Xform",
                        "properties": { "material:binding": { "rel": "/World/Looks/Missing" } },
                        "children": { "Mesh": { "type": "Mesh" } }
                    },
                    "Looks": {
                        "type": "Scope",
                        "children": { "Real": { "type": "Material" } }
                    }
                }
            }
        }"#,
        )
        .unwrap();
        let mesh = tree.find("/World/Group/Mesh").unwrap();
        // Group has a binding, so World's resolvable one must not be reached.
        assert!(resolve_binding(mesh, &tree, None).is_none());
    }

    #[test]
    fn relationship_array_takes_first_resolvable() {
        let tree = load_scene_from_str(
            r#"{
            "World": {
                "type": "Xform",
                "children": {
                    "Mesh": {
                        "type": "Mesh",
                        "properties": {
                            "material:binding": { "rel": ["/World/Missing", "/World/Mat"] }
                        }
                    },
                    "Mat": { "type": "Material" }
                }
            }
        }"#,
        )
        .unwrap();
        let mesh = tree.find("/World/Mesh").unwrap();
        let mat = resolve_binding(mesh, &tree, None).unwrap();
        assert_eq!(mat.path, "/World/Mat");
    }

    #[test]
    fn malformed_relationship_treated_as_absent() {
        let tree = load_scene_from_str(
            r#"{
            "World": {
                "type": "Xform",
                "properties": { "material:binding": { "rel": "/World/Mat" } },
                "children": {
                    "Mesh": {
                        "type": "Mesh",
                        "properties": { "material:binding": { "number": 7 } }
                    },
                    "Mat": { "type": "Material" }
                }
            }
        }"#,
        )
        .unwrap();
        let mesh = tree.find("/World/Mesh").unwrap();
        // The malformed local relationship does not mask the ancestor's.
        let mat = resolve_binding(mesh, &tree, None).unwrap();
        assert_eq!(mat.path, "/World/Mat");
    }

    #[test]
    fn legacy_assignment_property_is_last_resort() {
        let tree = load_scene_from_str(
            r#"{
            "World": {
                "type": "Xform",
                "children": {
                    "Mesh": {
                        "type": "Mesh",
                        "properties": { "materialAssignment": "/World/Mat" }
                    },
                    "Mat": { "type": "Material" }
                }
            }
        }"#,
        )
        .unwrap();
        let mesh = tree.find("/World/Mesh").unwrap();
        let mat = resolve_binding(mesh, &tree, None).unwrap();
        assert_eq!(mat.path, "/World/Mat");
    }

    #[test]
    fn prototype_remapping_strategies() {
        let tree = load_scene_from_str(
            r#"{
            "Prototype": {
                "type": "Xform",
                "metadata": { "instanceable": true },
                "children": {
                    "Mesh": {
                        "type": "Mesh",
                        "properties": { "material:binding": { "rel": "/Asset/Looks/Mat" } }
                    },
                    "Looks": {
                        "type": "Scope",
                        "children": { "Mat": { "type": "Material" } }
                    }
                }
            }
        }"#,
        )
        .unwrap();
        let proto = tree.find("/Prototype").unwrap();
        let mesh = tree.find("/Prototype/Mesh").unwrap();
        // /Asset/Looks/Mat is unresolvable; first-segment substitution maps it
        // to /Prototype/Looks/Mat.
        let mat = resolve_binding(mesh, &tree, Some(proto)).unwrap();
        assert_eq!(mat.path, "/Prototype/Looks/Mat");
    }
}
