//! Shading-model adapters.
//!
//! One adapter per supported shading model, selected by the model identifier
//! on the resolved terminal shader. Each adapter lowers its model's inputs
//! into [`ResolvedMaterialParameters`]; unknown models yield an empty result
//! and the caller degrades to the generic fallback.

mod mdl_surface;
mod preview_surface;

pub use mdl_surface::adapt_mdl;
pub use preview_surface::adapt_preview_surface;

use crate::mdl::MdlResolver;
use crate::params::{
    ResolvedMaterialParameters, SourceColorSpace, TextureChannel, TextureRef, WrapMode,
};
use crate::scene::{Prim, SceneTree, Value, last_segment, split_target};

/// Bound on connection-following while resolving one input.
const INPUT_HOP_BUDGET: usize = 8;

/// Lower `shader`'s inputs to canonical parameters.
pub fn adapt(
    shader: &Prim,
    material: &Prim,
    tree: &SceneTree,
    mdl: &MdlResolver,
    material_asset: Option<&str>,
) -> ResolvedMaterialParameters {
    if shader.has_external_source() {
        return adapt_mdl(shader, material, tree, mdl, material_asset);
    }
    match shader.shader_id() {
        Some("UsdPreviewSurface") => adapt_preview_surface(shader, material, tree),
        // Vendor surfaces occasionally appear as inline tags when composition
        // dropped the source-asset declaration; same parameter names apply.
        Some("OmniPBR") | Some("OmniGlass") | Some("OmniSurface") => {
            adapt_mdl(shader, material, tree, mdl, material_asset)
        }
        _ => ResolvedMaterialParameters::default(),
    }
}

/// A resolved shader input: either a concrete constant or a texture source.
#[derive(Debug)]
pub enum ShaderInput<'a> {
    Constant(Value),
    Texture(TextureSource<'a>),
}

/// A texture-sampling node reached through a connection, plus which output
/// channel the connection selected.
#[derive(Debug)]
pub struct TextureSource<'a> {
    pub node: &'a Prim,
    pub channel: TextureChannel,
}

impl<'a> ShaderInput<'a> {
    pub fn constant(&self) -> Option<&Value> {
        match self {
            ShaderInput::Constant(v) => Some(v),
            ShaderInput::Texture(_) => None,
        }
    }

    pub fn texture(&self) -> Option<&TextureSource<'a>> {
        match self {
            ShaderInput::Texture(t) => Some(t),
            ShaderInput::Constant(_) => None,
        }
    }
}

/// Resolve the named input on `shader`, preferring a connected value.
///
/// A connected value is followed to its target; if the target is the
/// enclosing material's own interface input, or a constant-folding node
/// inside a NodeGraph (its `constant`-tagged input), the constant behind it
/// is returned.
pub fn resolve_input<'a>(
    shader: &'a Prim,
    name: &str,
    material: &'a Prim,
    tree: &'a SceneTree,
) -> Option<ShaderInput<'a>> {
    let full = format!("inputs:{name}");
    let prop = shader.prop(&full)?;

    let mut target = match prop {
        crate::scene::Property::Value(v) => return Some(ShaderInput::Constant(v.clone())),
        crate::scene::Property::Connection(t) => t.as_str(),
    };

    for _ in 0..INPUT_HOP_BUDGET {
        let (prim_path, field) = split_target(target);
        let node = resolve_connection_prim(prim_path, material, tree)?;

        if is_texture_node(node) {
            let channel = field
                .map(TextureChannel::from_output_field)
                .unwrap_or_default();
            return Some(ShaderInput::Texture(TextureSource { node, channel }));
        }

        // UV-plumbing nodes carry no material data: a 2d transform passes its
        // incoming connection through, a primvar reader terminates the chain.
        match node.shader_id() {
            Some("UsdTransform2d") => {
                if let Some(next) = node.connection("inputs:in") {
                    target = next;
                    continue;
                }
                return None;
            }
            Some("UsdPrimvarReader_float2") => return None,
            _ => {}
        }

        // Material interface input: the field names an `inputs:` property on
        // the material itself, which may in turn be connected further.
        if node.path == material.path {
            let field = field?;
            match node.prop(field)? {
                crate::scene::Property::Value(v) => {
                    return Some(ShaderInput::Constant(v.clone()));
                }
                crate::scene::Property::Connection(next) => {
                    target = next.as_str();
                    continue;
                }
            }
        }

        // Constant-folding node inside a NodeGraph.
        if let Some(constant) = node.value("inputs:constant") {
            return Some(ShaderInput::Constant(constant.clone()));
        }

        // Generic pass-through: follow the named output if it is connected.
        if let Some(field) = field {
            if let Some(next) = node.connection(field) {
                target = next;
                continue;
            }
            if let Some(v) = node.value(field) {
                return Some(ShaderInput::Constant(v.clone()));
            }
        }
        return None;
    }
    None
}

/// Resolve a connection target prim: absolute lookup first, then a direct
/// child of the material (referenced subtrees lose absolute resolvability),
/// then a leaf-name scan under the material.
fn resolve_connection_prim<'a>(
    prim_path: &str,
    material: &'a Prim,
    tree: &'a SceneTree,
) -> Option<&'a Prim> {
    if let Some(found) = tree.find(prim_path) {
        return Some(found);
    }
    let leaf = last_segment(prim_path);
    if let Some(child) = material.child(leaf) {
        return Some(child);
    }
    material.walk().find(|p| p.name == leaf)
}

fn is_texture_node(prim: &Prim) -> bool {
    matches!(prim.shader_id(), Some("UsdUVTexture") | Some("UsdUVTexture_2"))
}

/// Extract a canonical texture reference from a texture-sampling node:
/// file path, wrap modes, declared color space, and per-channel scale/bias.
pub fn texture_ref_from_source(
    source: &TextureSource<'_>,
    material: &Prim,
    tree: &SceneTree,
) -> Option<TextureRef> {
    let node = source.node;

    // The file input itself may route through the material interface.
    let file = match resolve_input(node, "file", material, tree)? {
        ShaderInput::Constant(v) => {
            let (path, base) = v.as_asset()?;
            (path.to_string(), base.map(str::to_string))
        }
        ShaderInput::Texture(_) => return None,
    };

    let mut texture = TextureRef::new(file.0);
    texture.base_identifier = file.1;
    texture.channel = source.channel;

    if let Some(wrap) = node
        .value("inputs:wrapS")
        .or_else(|| node.value("inputs:wrapT"))
        .and_then(|v| v.as_token())
    {
        texture.wrap_mode = WrapMode::from_token(wrap);
    }
    if let Some(space) = node
        .value("inputs:sourceColorSpace")
        .and_then(|v| v.as_token())
    {
        texture.color_space = SourceColorSpace::from_token(space);
    }
    if let Some(scale) = node.value("inputs:scale").and_then(vec4_from_value) {
        texture.scale = scale;
    }
    if let Some(bias) = node.value("inputs:bias").and_then(vec4_from_value) {
        texture.bias = bias;
    }
    Some(texture)
}

fn vec4_from_value(value: &Value) -> Option<[f32; 4]> {
    match value {
        Value::Tuple3(t) => Some([t[0] as f32, t[1] as f32, t[2] as f32, 1.0]),
        Value::Array(items) => {
            let nums: Vec<f32> = items.iter().filter_map(|v| v.as_f32()).collect();
            match nums.len() {
                4 => Some([nums[0], nums[1], nums[2], nums[3]]),
                3 => Some([nums[0], nums[1], nums[2], 1.0]),
                _ => None,
            }
        }
        Value::Number(n) => {
            let v = *n as f32;
            Some([v, v, v, v])
        }
        _ => None,
    }
}
