//! Adapter for the generic preview-surface shading model.
//!
//! Input-name mapping (constants unless texture-connected):
//!
//! | input             | canonical field                          |
//! |-------------------|------------------------------------------|
//! | diffuseColor      | base color / BaseColor slot              |
//! | emissiveColor     | emissive color / Emissive slot           |
//! | roughness         | roughness / Roughness slot (G channel)   |
//! | metallic          | metalness / Metal slot (B channel)       |
//! | occlusion         | Occlusion slot (R channel)               |
//! | normal            | Normal slot (scale/bias preserved)       |
//! | opacity           | opacity / Opacity slot (connected chan)  |
//! | opacityThreshold  | cutout threshold                         |
//! | ior               | index of refraction                      |
//! | clearcoat         | clearcoat (texture-driven: see below)    |
//! | clearcoatRoughness| clearcoat roughness                      |
//!
//! Roughness/metallic/occlusion connections that share one texture file
//! collapse into the packed occlusion-roughness-metal slot.

use crate::params::{ResolvedMaterialParameters, TextureChannel, TextureRef, TextureRole};
use crate::scene::{Prim, SceneTree};

use super::{ShaderInput, resolve_input, texture_ref_from_source};

pub fn adapt_preview_surface(
    shader: &Prim,
    material: &Prim,
    tree: &SceneTree,
) -> ResolvedMaterialParameters {
    let mut params = ResolvedMaterialParameters::default();

    let input = |name: &str| resolve_input(shader, name, material, tree);
    let texture_of = |src: &super::TextureSource<'_>| texture_ref_from_source(src, material, tree);

    match input("diffuseColor") {
        Some(ShaderInput::Constant(v)) => params.base_color = v.as_color(),
        Some(ShaderInput::Texture(src)) => {
            if let Some(texture) = texture_of(&src) {
                params.set_texture(TextureRole::BaseColor, texture);
            }
        }
        None => {}
    }

    match input("emissiveColor") {
        Some(ShaderInput::Constant(v)) => {
            let color = v.as_color();
            // All-black emissive is the authored "off" state.
            if color.is_some_and(|c| c != [0.0, 0.0, 0.0]) {
                params.emissive_color = color;
            }
        }
        Some(ShaderInput::Texture(src)) => {
            if let Some(texture) = texture_of(&src) {
                params.emissive_color = Some([1.0, 1.0, 1.0]);
                params.set_texture(TextureRole::Emissive, texture);
            }
        }
        None => {}
    }

    match input("roughness") {
        Some(ShaderInput::Constant(v)) => params.roughness = v.as_f32(),
        Some(ShaderInput::Texture(src)) => {
            if let Some(mut texture) = texture_of(&src) {
                if texture.channel == TextureChannel::Rgb {
                    texture.channel = TextureChannel::G;
                }
                params.set_texture(TextureRole::Roughness, texture);
            }
        }
        None => {}
    }

    match input("metallic") {
        Some(ShaderInput::Constant(v)) => params.metalness = v.as_f32(),
        Some(ShaderInput::Texture(src)) => {
            if let Some(mut texture) = texture_of(&src) {
                if texture.channel == TextureChannel::Rgb {
                    texture.channel = TextureChannel::B;
                }
                params.set_texture(TextureRole::Metal, texture);
            }
        }
        None => {}
    }

    if let Some(ShaderInput::Texture(src)) = input("occlusion") {
        if let Some(mut texture) = texture_of(&src) {
            if texture.channel == TextureChannel::Rgb {
                texture.channel = TextureChannel::R;
            }
            params.set_texture(TextureRole::Occlusion, texture);
        }
    }

    if let Some(ShaderInput::Texture(src)) = input("normal") {
        if let Some(texture) = texture_of(&src) {
            params.set_texture(TextureRole::Normal, texture);
        }
    }

    match input("opacity") {
        Some(ShaderInput::Constant(v)) => params.opacity = v.as_f32(),
        Some(ShaderInput::Texture(src)) => {
            if let Some(texture) = texture_of(&src) {
                params.set_texture(TextureRole::Opacity, texture);
            }
        }
        None => {}
    }
    if let Some(ShaderInput::Constant(v)) = input("opacityThreshold") {
        params.opacity_threshold = v.as_f32();
    }

    if let Some(ShaderInput::Constant(v)) = input("ior") {
        params.ior = v.as_f32();
    }

    let mut clearcoat_textured = false;
    match input("clearcoat") {
        Some(ShaderInput::Constant(v)) => params.clearcoat = v.as_f32(),
        Some(ShaderInput::Texture(_)) => {
            params.clearcoat = Some(1.0);
            clearcoat_textured = true;
        }
        None => {}
    }
    if let Some(ShaderInput::Constant(v)) = input("clearcoatRoughness") {
        params.clearcoat_roughness = v.as_f32();
    }

    merge_packed_orm(&mut params);

    // Texture-driven clearcoat over a rough, non-metallic substrate: only the
    // coat layer should show glossy reflections. Explicit special case, not a
    // general layering rule.
    if clearcoat_textured {
        let base_rough = params.roughness.unwrap_or(1.0) >= 0.5
            || params.texture(TextureRole::Roughness).is_some()
            || params.texture(TextureRole::OcclusionRoughnessMetal).is_some();
        let base_nonmetal = params.metalness.unwrap_or(0.0) == 0.0;
        if base_rough && base_nonmetal {
            params.suppress_base_specular = true;
        }
    }

    params
}

/// Collapse roughness/metal/occlusion slots that share one texture file into
/// the packed ORM slot.
fn merge_packed_orm(params: &mut ResolvedMaterialParameters) {
    let paths: Vec<Option<String>> = [
        TextureRole::Occlusion,
        TextureRole::Roughness,
        TextureRole::Metal,
    ]
    .iter()
    .map(|role| params.texture(*role).map(|t| t.asset_path.clone()))
    .collect();

    let mut shared: Option<&String> = None;
    let mut count = 0;
    for path in paths.iter().flatten() {
        match shared {
            Some(existing) if existing == path => count += 1,
            None => {
                shared = Some(path);
                count = 1;
            }
            Some(_) => return, // distinct files: keep separate slots
        }
    }
    if count < 2 {
        return;
    }

    // Adopt the first contributing slot's settings for the shared texture.
    let donor = [
        TextureRole::Occlusion,
        TextureRole::Roughness,
        TextureRole::Metal,
    ]
    .iter()
    .find_map(|role| params.texture(*role).cloned());
    let Some(donor) = donor else { return };

    for role in [
        TextureRole::Occlusion,
        TextureRole::Roughness,
        TextureRole::Metal,
    ] {
        params.textures.remove(&role);
    }
    let mut packed = TextureRef::new(donor.asset_path);
    packed.base_identifier = donor.base_identifier;
    packed.wrap_mode = donor.wrap_mode;
    packed.color_space = donor.color_space;
    params.set_texture(TextureRole::OcclusionRoughnessMetal, packed);
}
