//! Canonical, renderer-agnostic material parameters.
//!
//! Every shading-model adapter lowers its model's inputs into this one shape;
//! the engine then turns it into a `GpuMaterial`.

use std::collections::BTreeMap;

/// Logical role a texture plays in the canonical parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureRole {
    BaseColor,
    Normal,
    /// Packed occlusion(R) / roughness(G) / metal(B) texture.
    OcclusionRoughnessMetal,
    Roughness,
    Metal,
    Occlusion,
    Emissive,
    Opacity,
}

impl TextureRole {
    /// Stable identifier used in generated shader code and cache keys.
    pub fn slot_name(self) -> &'static str {
        match self {
            TextureRole::BaseColor => "base_color",
            TextureRole::Normal => "normal",
            TextureRole::OcclusionRoughnessMetal => "orm",
            TextureRole::Roughness => "roughness",
            TextureRole::Metal => "metal",
            TextureRole::Occlusion => "occlusion",
            TextureRole::Emissive => "emissive",
            TextureRole::Opacity => "opacity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    Clamp,
    Mirror,
    Black,
}

impl WrapMode {
    pub fn from_token(token: &str) -> Self {
        match token {
            "clamp" => WrapMode::Clamp,
            "mirror" => WrapMode::Mirror,
            "black" => WrapMode::Black,
            _ => WrapMode::Repeat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceColorSpace {
    /// Infer from role: color data sRGB, data textures linear.
    #[default]
    Auto,
    Srgb,
    Raw,
}

impl SourceColorSpace {
    pub fn from_token(token: &str) -> Self {
        match token {
            "sRGB" | "srgb" => SourceColorSpace::Srgb,
            "raw" | "linear" => SourceColorSpace::Raw,
            _ => SourceColorSpace::Auto,
        }
    }
}

/// Which channel(s) of the source texture feed the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureChannel {
    #[default]
    Rgb,
    R,
    G,
    B,
    A,
}

impl TextureChannel {
    pub fn from_output_field(field: &str) -> Self {
        match field {
            "outputs:r" | "r" => TextureChannel::R,
            "outputs:g" | "g" => TextureChannel::G,
            "outputs:b" | "b" => TextureChannel::B,
            "outputs:a" | "a" => TextureChannel::A,
            _ => TextureChannel::Rgb,
        }
    }

    /// WGSL swizzle for this channel selection.
    pub fn swizzle(self) -> &'static str {
        match self {
            TextureChannel::Rgb => "rgb",
            TextureChannel::R => "r",
            TextureChannel::G => "g",
            TextureChannel::B => "b",
            TextureChannel::A => "a",
        }
    }
}

/// One texture-slot reference in the canonical parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureRef {
    /// Logical asset path as authored (may contain the `<UDIM>` placeholder).
    pub asset_path: String,
    /// Identifier of the asset the path is relative to, if any.
    pub base_identifier: Option<String>,
    pub wrap_mode: WrapMode,
    pub color_space: SourceColorSpace,
    /// Per-channel transform applied as `sample * scale + bias`.
    pub scale: [f32; 4],
    pub bias: [f32; 4],
    pub channel: TextureChannel,
}

impl TextureRef {
    pub fn new(asset_path: impl Into<String>) -> Self {
        Self {
            asset_path: asset_path.into(),
            base_identifier: None,
            wrap_mode: WrapMode::default(),
            color_space: SourceColorSpace::default(),
            scale: [1.0; 4],
            bias: [0.0; 4],
            channel: TextureChannel::default(),
        }
    }

    /// Whether this reference addresses a UDIM tile grid.
    pub fn is_tiled(&self) -> bool {
        self.asset_path.contains(crate::udim::UDIM_TOKEN)
    }

    /// The renderer's normal-map convention is `sample * 2 - 1`; anything else
    /// needs injected remap code.
    pub fn has_standard_normal_transform(&self) -> bool {
        self.scale[..3] == [2.0, 2.0, 2.0] && self.bias[..3] == [-1.0, -1.0, -1.0]
    }

    /// Whether scale/bias were left at the unauthored identity.
    pub fn has_identity_transform(&self) -> bool {
        self.scale == [1.0; 4] && self.bias == [0.0; 4]
    }
}

/// Canonical output of shading-model adaptation.
///
/// `None` fields were not authored; consumers apply the documented defaults
/// (base color white, roughness 1.0, metalness 0.0, double-sided on).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMaterialParameters {
    pub base_color: Option<[f32; 3]>,
    pub roughness: Option<f32>,
    pub metalness: Option<f32>,
    pub emissive_color: Option<[f32; 3]>,
    pub emissive_intensity: Option<f32>,
    pub opacity: Option<f32>,
    pub opacity_threshold: Option<f32>,
    pub ior: Option<f32>,
    pub clearcoat: Option<f32>,
    pub clearcoat_roughness: Option<f32>,
    pub transmission: Option<f32>,
    pub transmission_color: Option<[f32; 3]>,
    pub double_sided: Option<bool>,
    /// Suppress the base layer's direct specular so only the clearcoat layer
    /// shows glossy reflections (texture-driven clearcoat over a rough,
    /// non-metallic substrate). Deliberately a named special case.
    pub suppress_base_specular: bool,
    pub textures: BTreeMap<TextureRole, TextureRef>,
}

impl ResolvedMaterialParameters {
    pub fn texture(&self, role: TextureRole) -> Option<&TextureRef> {
        self.textures.get(&role)
    }

    pub fn set_texture(&mut self, role: TextureRole, texture: TextureRef) {
        self.textures.insert(role, texture);
    }

    /// True when nothing at all was resolved (the caller should degrade to
    /// the generic fallback material).
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
            && self.base_color.is_none()
            && self.roughness.is_none()
            && self.metalness.is_none()
            && self.emissive_color.is_none()
            && self.opacity.is_none()
            && self.clearcoat.is_none()
            && self.transmission.is_none()
    }
}
