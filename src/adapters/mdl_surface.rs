//! Adapter for MDL-defined surfaces (OmniPBR / OmniGlass / OmniSurface and
//! arbitrary externally-compiled modules).
//!
//! Parameter names for the builtin modules are statically known and read
//! straight off the shader prim. Influence inputs multiply into the final
//! factor rather than overwrite it: the consuming renderer multiplies a
//! texture channel into the scalar factor, so influence 0.7 becomes
//! `0.7 * texel`.

use crate::mdl::{ExternalModelResult, MdlResolver};
use crate::params::{ResolvedMaterialParameters, TextureChannel, TextureRef, TextureRole};
use crate::scene::{Prim, SceneTree, Value};

use super::{ShaderInput, resolve_input};

pub fn adapt_mdl(
    shader: &Prim,
    material: &Prim,
    tree: &SceneTree,
    mdl: &MdlResolver,
    material_asset: Option<&str>,
) -> ResolvedMaterialParameters {
    let external = mdl.resolve_external(shader, material_asset);

    // Direct reads from the shader prim come first: authored overrides beat
    // module defaults.
    let mut params = read_builtin_inputs(shader, material, tree);

    if let ExternalModelResult::Parsed(parsed) = external {
        if params.base_color.is_none() {
            params.base_color = parsed.base_color;
        }
        if params.roughness.is_none() {
            params.roughness = parsed.roughness;
        }
        if params.metalness.is_none() {
            params.metalness = parsed.metalness;
        }
        for (role, path) in parsed.textures {
            if params.texture(role).is_none() {
                params.set_texture(role, TextureRef::new(path));
            }
        }
    }

    params
}

/// Read the statically-known builtin parameter names from the shader prim.
fn read_builtin_inputs(
    shader: &Prim,
    material: &Prim,
    tree: &SceneTree,
) -> ResolvedMaterialParameters {
    let mut params = ResolvedMaterialParameters::default();

    let constant = |name: &str| -> Option<Value> {
        match resolve_input(shader, name, material, tree)? {
            ShaderInput::Constant(v) => Some(v),
            ShaderInput::Texture(_) => None,
        }
    };
    let asset = |name: &str| -> Option<TextureRef> {
        let value = constant(name)?;
        let (path, base) = value.as_asset()?;
        if path.is_empty() {
            return None;
        }
        let mut texture = TextureRef::new(path);
        texture.base_identifier = base.map(str::to_string);
        Some(texture)
    };

    // Glass parameters first: their presence switches the transmission path.
    if let Some(glass_color) = constant("glass_color").and_then(|v| v.as_color()) {
        params.transmission = Some(1.0);
        params.transmission_color = Some(glass_color);
        params.roughness = constant("frosting_roughness").and_then(|v| v.as_f32());
        params.ior = constant("glass_ior").and_then(|v| v.as_f32());
        params.opacity = Some(0.3);
        return params;
    }

    params.base_color = constant("diffuse_color_constant")
        .or_else(|| constant("base_color_factor"))
        .and_then(|v| v.as_color());
    if let Some(texture) = asset("diffuse_texture").or_else(|| asset("base_color_texture")) {
        params.set_texture(TextureRole::BaseColor, texture);
    }

    params.roughness = constant("reflection_roughness_constant")
        .or_else(|| constant("roughness_constant"))
        .and_then(|v| v.as_f32());
    params.metalness = constant("metallic_constant").and_then(|v| v.as_f32());

    if let Some(texture) = asset("ORM_texture").or_else(|| asset("orm_texture")) {
        params.set_texture(TextureRole::OcclusionRoughnessMetal, texture);
        // Influence inputs modulate the packed channels.
        if let Some(influence) =
            constant("reflectionroughness_texture_influence").and_then(|v| v.as_f32())
        {
            params.roughness = Some(params.roughness.unwrap_or(1.0) * influence);
        } else if params.roughness.is_none() {
            params.roughness = Some(1.0);
        }
        if let Some(influence) = constant("metallic_texture_influence").and_then(|v| v.as_f32()) {
            params.metalness = Some(params.metalness.unwrap_or(1.0) * influence);
        } else if params.metalness.is_none() {
            params.metalness = Some(1.0);
        }
    } else {
        if let Some(mut texture) = asset("reflectionroughness_texture") {
            texture.channel = TextureChannel::G;
            params.set_texture(TextureRole::Roughness, texture);
            if let Some(influence) =
                constant("reflectionroughness_texture_influence").and_then(|v| v.as_f32())
            {
                params.roughness = Some(params.roughness.unwrap_or(1.0) * influence);
            }
        }
        if let Some(mut texture) = asset("metallic_texture") {
            texture.channel = TextureChannel::B;
            params.set_texture(TextureRole::Metal, texture);
            if let Some(influence) =
                constant("metallic_texture_influence").and_then(|v| v.as_f32())
            {
                params.metalness = Some(params.metalness.unwrap_or(1.0) * influence);
            }
        }
        if let Some(mut texture) = asset("ao_texture") {
            texture.channel = TextureChannel::R;
            params.set_texture(TextureRole::Occlusion, texture);
        }
    }

    if let Some(texture) = asset("normalmap_texture") {
        params.set_texture(TextureRole::Normal, texture);
    }

    let emission_enabled = constant("enable_emission")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if emission_enabled {
        params.emissive_color = constant("emissive_color").and_then(|v| v.as_color());
        params.emissive_intensity =
            constant("emissive_intensity").and_then(|v| v.as_f32());
        if let Some(texture) = asset("emissive_color_texture") {
            params.set_texture(TextureRole::Emissive, texture);
            params.emissive_color = params.emissive_color.or(Some([1.0, 1.0, 1.0]));
        }
    }

    let opacity_enabled = constant("enable_opacity")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if opacity_enabled {
        params.opacity = constant("opacity_constant").and_then(|v| v.as_f32());
        params.opacity_threshold = constant("opacity_threshold").and_then(|v| v.as_f32());
        if let Some(mut texture) = asset("opacity_texture") {
            texture.channel = TextureChannel::R;
            params.set_texture(TextureRole::Opacity, texture);
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;
    use crate::scene::load_scene_from_str;
    use std::sync::Arc;

    fn adapt(scene: &str) -> ResolvedMaterialParameters {
        let tree = load_scene_from_str(scene).unwrap();
        let material = tree.find("/Mat").unwrap();
        let shader = tree.find("/Mat/Shader").unwrap();
        let mdl = MdlResolver::new(Arc::new(MemoryAssets::new()), false);
        adapt_mdl(shader, material, &tree, &mdl, None)
    }

    #[test]
    fn orm_influences_multiply_into_factors() {
        let params = adapt(
            r#"{
            "Mat": {
                "type": "Material",
                "children": {
                    "Shader": {
                        "type": "Shader",
                        "properties": {
                            "info:mdl:sourceAsset": { "asset": "OmniPBR.mdl" },
                            "inputs:ORM_texture": { "asset": "crate_orm.png" },
                            "inputs:reflectionroughness_texture_influence": 0.7,
                            "inputs:metallic_texture_influence": 1.0
                        }
                    }
                }
            }
        }"#,
        );
        assert_eq!(params.roughness, Some(0.7));
        assert_eq!(params.metalness, Some(1.0));
        assert!(params.texture(TextureRole::OcclusionRoughnessMetal).is_some());
    }

    #[test]
    fn glass_module_maps_to_transmission() {
        let params = adapt(
            r#"{
            "Mat": {
                "type": "Material",
                "children": {
                    "Shader": {
                        "type": "Shader",
                        "properties": {
                            "info:mdl:sourceAsset": { "asset": "OmniGlass.mdl" },
                            "inputs:glass_color": { "tuple3": [0.9, 0.95, 1.0] },
                            "inputs:glass_ior": 1.45
                        }
                    }
                }
            }
        }"#,
        );
        assert_eq!(params.transmission, Some(1.0));
        assert_eq!(params.transmission_color, Some([0.9, 0.95, 1.0]));
        assert_eq!(params.ior, Some(1.45));
    }

    #[test]
    fn emission_requires_enable_flag() {
        let params = adapt(
            r#"{
            "Mat": {
                "type": "Material",
                "children": {
                    "Shader": {
                        "type": "Shader",
                        "properties": {
                            "info:mdl:sourceAsset": { "asset": "OmniPBR.mdl" },
                            "inputs:emissive_color": { "tuple3": [1.0, 0.5, 0.0] },
                            "inputs:emissive_intensity": 100.0
                        }
                    }
                }
            }
        }"#,
        );
        assert!(params.emissive_color.is_none());
    }

    #[test]
    fn unresolvable_module_still_reads_authored_inputs() {
        // Module path resolves nowhere (simulated 404); the shader's own
        // authored inputs must still produce parameters.
        let params = adapt(
            r#"{
            "Mat": {
                "type": "Material",
                "children": {
                    "Shader": {
                        "type": "Shader",
                        "properties": {
                            "info:mdl:sourceAsset": { "asset": "materials/Missing.mdl" },
                            "inputs:diffuse_color_constant": { "tuple3": [0.3, 0.3, 0.9] },
                            "inputs:reflection_roughness_constant": 0.2
                        }
                    }
                }
            }
        }"#,
        );
        assert_eq!(params.base_color, Some([0.3, 0.3, 0.9]));
        assert_eq!(params.roughness, Some(0.2));
    }

    #[test]
    fn parsed_module_supplements_missing_fields() {
        let assets = MemoryAssets::new();
        assets.insert(
            "materials/Crate.mdl",
            br#"
            export material Crate(
                uniform texture_2d diffuse_texture = texture_2d("./crate_albedo.png"),
                uniform float reflection_roughness_constant = 0.35
            ) = material();
            "#
            .to_vec(),
        );
        let tree = load_scene_from_str(
            r#"{
            "Mat": {
                "type": "Material",
                "children": {
                    "Shader": {
                        "type": "Shader",
                        "properties": {
                            "info:mdl:sourceAsset": { "asset": "materials/Crate.mdl" },
                            "inputs:metallic_constant": 0.1
                        }
                    }
                }
            }
        }"#,
        )
        .unwrap();
        let material = tree.find("/Mat").unwrap();
        let shader = tree.find("/Mat/Shader").unwrap();
        let mdl = MdlResolver::new(Arc::new(assets), false);
        let params = adapt_mdl(shader, material, &tree, &mdl, None);

        // Authored input wins; parsed module fills the rest.
        assert_eq!(params.metalness, Some(0.1));
        assert_eq!(params.roughness, Some(0.35));
        assert_eq!(
            params
                .texture(TextureRole::BaseColor)
                .map(|t| t.asset_path.as_str()),
            Some("materials/crate_albedo.png")
        );
    }
}
