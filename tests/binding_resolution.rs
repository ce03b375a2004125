use proptest::prelude::*;

use usd_shade_engine::binding::resolve_binding;
use usd_shade_engine::load_scene_from_str;

#[test]
fn direct_binding_beats_purpose_qualified() {
    let tree = load_scene_from_str(
        r#"{
        "Cube": {
            "type": "Mesh",
            "properties": {
                "material:binding": { "rel": "/Looks/Generic" },
                "material:binding:preview": { "rel": "/Looks/Preview" }
            }
        },
        "Looks": {
            "type": "Scope",
            "children": {
                "Generic": { "type": "Material" },
                "Preview": { "type": "Material" }
            }
        }
    }"#,
    )
    .unwrap();
    let cube = tree.find("/Cube").unwrap();
    let material = resolve_binding(cube, &tree, None).unwrap();
    assert_eq!(material.path, "/Looks/Generic");
}

#[test]
fn purpose_priority_is_deterministic_without_direct_binding() {
    // Authoring order puts `full` first; the priority list must still pick
    // `preview`.
    let tree = load_scene_from_str(
        r#"{
        "Cube": {
            "type": "Mesh",
            "properties": {
                "material:binding:full": { "rel": "/Looks/Full" },
                "material:binding:preview": { "rel": "/Looks/Preview" }
            }
        },
        "Looks": {
            "type": "Scope",
            "children": {
                "Full": { "type": "Material" },
                "Preview": { "type": "Material" }
            }
        }
    }"#,
    )
    .unwrap();
    let cube = tree.find("/Cube").unwrap();
    let material = resolve_binding(cube, &tree, None).unwrap();
    assert_eq!(material.path, "/Looks/Preview");
}

#[test]
fn nearest_binding_masks_ancestors_even_when_broken() {
    // The child's binding targets a material that does not exist; the
    // ancestor's working binding must NOT shine through.
    let tree = load_scene_from_str(
        r#"{
        "World": {
            "type": "Xform",
            "properties": {
                "material:binding": { "rel": "/Looks/Good" }
            },
            "children": {
                "Cube": {
                    "type": "Mesh",
                    "properties": {
                        "material:binding": { "rel": "/Looks/Gone" }
                    }
                }
            }
        },
        "Looks": {
            "type": "Scope",
            "children": {
                "Good": { "type": "Material" }
            }
        }
    }"#,
    )
    .unwrap();
    let cube = tree.find("/World/Cube").unwrap();
    assert!(resolve_binding(cube, &tree, None).is_none());
}

#[test]
fn legacy_material_bind_child_resolves() {
    let tree = load_scene_from_str(
        r#"{
        "Cube": {
            "type": "Mesh",
            "children": {
                "materialBind": {
                    "type": "",
                    "properties": {
                        "binding": { "rel": "/Looks/Old" }
                    }
                }
            }
        },
        "Looks": {
            "type": "Scope",
            "children": {
                "Old": { "type": "Material" }
            }
        }
    }"#,
    )
    .unwrap();
    let cube = tree.find("/Cube").unwrap();
    let material = resolve_binding(cube, &tree, None).unwrap();
    assert_eq!(material.path, "/Looks/Old");
}

#[test]
fn legacy_assignment_is_the_last_resort() {
    let tree = load_scene_from_str(
        r#"{
        "Cube": {
            "type": "Mesh",
            "properties": {
                "materialAssignment": "/Looks/Old"
            }
        },
        "Looks": {
            "type": "Scope",
            "children": {
                "Old": { "type": "Material" }
            }
        }
    }"#,
    )
    .unwrap();
    let cube = tree.find("/Cube").unwrap();
    let material = resolve_binding(cube, &tree, None).unwrap();
    assert_eq!(material.path, "/Looks/Old");
}

#[test]
fn instanced_prim_remaps_prototype_material_path() {
    // The binding was authored against the prototype namespace; under the
    // instance it must remap into the instance's own subtree.
    let tree = load_scene_from_str(
        r#"{
        "Instance": {
            "type": "Xform",
            "children": {
                "Geo": {
                    "type": "Mesh",
                    "properties": {
                        "material:binding": { "rel": "/Prototype/Looks/Wood" }
                    }
                },
                "Looks": {
                    "type": "Scope",
                    "children": {
                        "Wood": { "type": "Material" }
                    }
                }
            }
        }
    }"#,
    )
    .unwrap();
    let geo = tree.find("/Instance/Geo").unwrap();
    let root = tree.find("/Instance").unwrap();
    let material = resolve_binding(geo, &tree, Some(root)).unwrap();
    assert_eq!(material.path, "/Instance/Looks/Wood");
}

/// Build a chain of nested Xforms with a binding authored at one level.
fn chain_scene(depth: usize, binding_level: usize) -> String {
    let mut body = String::new();
    for level in (0..depth).rev() {
        let props = if level == binding_level {
            r#""properties": { "material:binding": { "rel": "/Looks/M" } },"#
        } else {
            ""
        };
        if body.is_empty() {
            body = format!(r#""N{level}": {{ "type": "Mesh", {props} "children": {{}} }}"#);
        } else {
            body = format!(
                r#""N{level}": {{ "type": "Xform", {props} "children": {{ {body} }} }}"#
            );
        }
    }
    format!(
        r#"{{ {body}, "Looks": {{ "type": "Scope", "children": {{ "M": {{ "type": "Material" }} }} }} }}"#
    )
}

proptest! {
    // A binding authored anywhere on the ancestor chain must resolve for the
    // leaf, regardless of depth.
    #[test]
    fn binding_resolves_from_any_ancestor_depth(
        depth in 1usize..8,
        binding_offset in 0usize..8,
    ) {
        let binding_level = binding_offset % depth;
        let scene = chain_scene(depth, binding_level);
        let tree = load_scene_from_str(&scene).unwrap();

        let leaf_path: String = (0..depth).map(|l| format!("/N{l}")).collect();
        let leaf = tree.find(&leaf_path).unwrap();
        let material = resolve_binding(leaf, &tree, None);
        prop_assert_eq!(material.map(|m| m.path.as_str()), Some("/Looks/M"));
    }
}
