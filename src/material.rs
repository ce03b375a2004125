//! The material object handed to the renderable-construction layer.
//!
//! Holds scalar factors, assigned texture slots, and the generated WGSL
//! fragment source the host pipeline compiles. The generated body contains
//! one named sample statement per texture slot; the UDIM pass rewrites those
//! statements in place and extends the program cache key accordingly.

use std::collections::BTreeMap;

use bytemuck::{Pod, Zeroable};

use crate::params::{ResolvedMaterialParameters, TextureChannel, TextureRole};
use crate::texture::TextureInstance;

/// Transparency handling. Blend and cutout are mutually exclusive; an
/// authored threshold wins (cutout re-enables depth writes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlphaMode {
    Opaque,
    Blend,
    /// Alpha test at the given cutoff.
    Mask(f32),
}

/// CPU-side layout of the `MaterialParams` uniform in the generated WGSL.
/// Field order must match the emitted struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color_factor: [f32; 4],
    pub emissive_factor: [f32; 4],
    /// x: roughness, y: metalness, z: opacity, w: alpha cutoff.
    pub factors: [f32; 4],
    /// x: clearcoat, y: clearcoat roughness, z: ior, w: base specular scale.
    pub coat: [f32; 4],
}

/// A texture slot assignment: shared decoded pixels plus the channel that
/// feeds the slot.
#[derive(Debug, Clone)]
pub struct AssignedTexture {
    pub instance: TextureInstance,
    pub channel: TextureChannel,
}

#[derive(Debug, Clone)]
pub struct GpuMaterial {
    pub name: String,
    pub base_color_factor: [f32; 4],
    pub roughness_factor: f32,
    pub metalness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub opacity_factor: f32,
    pub ior: f32,
    pub clearcoat_factor: f32,
    pub clearcoat_roughness: f32,
    pub transmission_factor: f32,
    pub transmission_color: [f32; 3],
    pub alpha: AlphaMode,
    pub depth_write: bool,
    pub double_sided: bool,
    /// Base-layer direct specular suppressed in favor of the clearcoat layer.
    pub suppress_base_specular: bool,
    /// Non-standard (scale, bias) for normal-map decoding. `None` means the
    /// renderer default `sample * 2 - 1`.
    pub normal_transform: Option<([f32; 3], [f32; 3])>,
    pub textures: BTreeMap<TextureRole, AssignedTexture>,
    /// Extra sampler uniforms injected by shader variants (name, texture).
    pub extra_samplers: Vec<(String, TextureInstance)>,
    /// Injected WGSL declarations, deduplicated by key.
    pub extra_decls: BTreeMap<String, String>,
    /// Generated fragment module source.
    pub fragment_source: String,
    /// Compiled-program identity; must change whenever generated code does.
    pub program_key: String,
}

impl GpuMaterial {
    /// Build a material from canonical parameters, applying the documented
    /// defaults for anything unauthored.
    pub fn from_params(name: impl Into<String>, params: &ResolvedMaterialParameters) -> Self {
        let name = name.into();
        let opacity = params.opacity.unwrap_or(1.0);
        let threshold = params.opacity_threshold.unwrap_or(0.0);
        let has_opacity_texture = params.texture(TextureRole::Opacity).is_some();

        // Threshold takes precedence: cutout disables blending and keeps
        // depth writes on.
        let (alpha, depth_write) = if threshold > 0.0 {
            (AlphaMode::Mask(threshold), true)
        } else if opacity < 1.0 || has_opacity_texture {
            (AlphaMode::Blend, false)
        } else {
            (AlphaMode::Opaque, true)
        };

        let base = params.base_color.unwrap_or([1.0, 1.0, 1.0]);
        let emissive_intensity = params.emissive_intensity.unwrap_or(1.0);
        let emissive = params
            .emissive_color
            .map(|c| {
                [
                    c[0] * emissive_intensity,
                    c[1] * emissive_intensity,
                    c[2] * emissive_intensity,
                ]
            })
            .unwrap_or([0.0, 0.0, 0.0]);

        let mut material = Self {
            program_key: format!("shade:{name}"),
            name,
            base_color_factor: [base[0], base[1], base[2], opacity],
            roughness_factor: params.roughness.unwrap_or(1.0),
            metalness_factor: params.metalness.unwrap_or(0.0),
            emissive_factor: emissive,
            opacity_factor: opacity,
            ior: params.ior.unwrap_or(1.5),
            clearcoat_factor: params.clearcoat.unwrap_or(0.0),
            clearcoat_roughness: params.clearcoat_roughness.unwrap_or(0.01),
            transmission_factor: params.transmission.unwrap_or(0.0),
            transmission_color: params.transmission_color.unwrap_or([1.0, 1.0, 1.0]),
            alpha,
            depth_write,
            double_sided: params.double_sided.unwrap_or(true),
            suppress_base_specular: params.suppress_base_specular,
            normal_transform: None,
            textures: BTreeMap::new(),
            extra_samplers: Vec::new(),
            extra_decls: BTreeMap::new(),
            fragment_source: String::new(),
        };
        material.rebuild_fragment_source();
        material
    }

    /// The fixed generic gray PBR material used when resolution fails.
    pub fn generic_gray(name: impl Into<String>) -> Self {
        let params = ResolvedMaterialParameters {
            base_color: Some([0.5, 0.5, 0.5]),
            roughness: Some(0.8),
            metalness: Some(0.0),
            ..Default::default()
        };
        Self::from_params(name, &params)
    }

    /// Assign a decoded texture to a slot and regenerate the shader source.
    pub fn assign_texture(
        &mut self,
        role: TextureRole,
        instance: TextureInstance,
        channel: TextureChannel,
    ) {
        self.textures.insert(role, AssignedTexture { instance, channel });
        self.rebuild_fragment_source();
    }

    /// Plain single-texture sample expression for a slot, as emitted into the
    /// fragment body when no tile-sampling function overrides it.
    pub fn sample_expr(role: TextureRole) -> String {
        let slot = role.slot_name();
        format!("textureSample({slot}_tex, {slot}_samp, in.uv)")
    }

    /// Whether the generated source still samples `role` through the normal
    /// single-texture path.
    pub fn has_plain_sample(&self, role: TextureRole) -> bool {
        self.fragment_source.contains(&Self::sample_expr(role))
    }

    /// The uniform block the host uploads next to the generated module.
    pub fn uniform(&self) -> MaterialUniform {
        let cutoff = match self.alpha {
            AlphaMode::Mask(c) => c,
            _ => 0.0,
        };
        let spec_scale = if self.suppress_base_specular { 0.0 } else { 1.0 };
        MaterialUniform {
            base_color_factor: self.base_color_factor,
            emissive_factor: [
                self.emissive_factor[0],
                self.emissive_factor[1],
                self.emissive_factor[2],
                0.0,
            ],
            factors: [
                self.roughness_factor,
                self.metalness_factor,
                self.opacity_factor,
                cutoff,
            ],
            coat: [
                self.clearcoat_factor,
                self.clearcoat_roughness,
                self.ior,
                spec_scale,
            ],
        }
    }

    /// Byte view of [`Self::uniform`] for buffer upload.
    pub fn uniform_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(&self.uniform()).to_vec()
    }

    /// The texture feeding `role`. Occlusion, roughness and metal fall back
    /// to the packed slot when they were collapsed into it.
    pub fn texture_for(&self, role: TextureRole) -> Option<&AssignedTexture> {
        if let Some(assigned) = self.textures.get(&role) {
            return Some(assigned);
        }
        match role {
            TextureRole::Occlusion | TextureRole::Roughness | TextureRole::Metal => {
                self.textures.get(&TextureRole::OcclusionRoughnessMetal)
            }
            _ => None,
        }
    }

    /// Regenerate `fragment_source` from current factors and slots.
    ///
    /// Injected declarations and rewritten sample sites are preserved by the
    /// variant pass re-applying itself; callers that mutate slots after a
    /// variant was applied must re-apply the variant.
    pub fn rebuild_fragment_source(&mut self) {
        self.fragment_source = self.generate_fragment_source();
    }

    fn generate_fragment_source(&self) -> String {
        let mut bindings = String::new();
        let mut binding_index = 1u32;
        for role in self.textures.keys() {
            let slot = role.slot_name();
            bindings.push_str(&format!(
                "@group(1) @binding({}) var {slot}_tex: texture_2d<f32>;\n",
                binding_index
            ));
            bindings.push_str(&format!(
                "@group(1) @binding({}) var {slot}_samp: sampler;\n",
                binding_index + 1
            ));
            binding_index += 2;
        }
        for (sampler_name, _) in &self.extra_samplers {
            bindings.push_str(&format!(
                "@group(1) @binding({}) var {sampler_name}: texture_2d<f32>;\n",
                binding_index
            ));
            binding_index += 1;
        }
        if !self.extra_samplers.is_empty() {
            bindings.push_str(&format!(
                "@group(1) @binding({}) var udim_samp: sampler;\n",
                binding_index
            ));
        }

        let mut body = String::new();
        for role in self.textures.keys() {
            let slot = role.slot_name();
            // A slot with an injected tile-sampling function samples through
            // it; rebuilding never regresses to the plain path.
            let udim_fn = format!("sample_udim_{slot}");
            if self.extra_decls.contains_key(&udim_fn) {
                body.push_str(&format!("    let {slot}_texel = {udim_fn}(in.uv);\n"));
            } else {
                body.push_str(&format!(
                    "    let {slot}_texel = {};\n",
                    Self::sample_expr(*role)
                ));
            }
        }

        body.push_str("    var base_color = material.base_color_factor.rgb;\n");
        if self.textures.contains_key(&TextureRole::BaseColor) {
            body.push_str("    base_color = base_color * base_color_texel.rgb;\n");
        }

        body.push_str("    var occlusion = 1.0;\n");
        body.push_str("    var roughness = material.factors.x;\n");
        body.push_str("    var metalness = material.factors.y;\n");
        if self.textures.contains_key(&TextureRole::OcclusionRoughnessMetal) {
            // Packed convention: R occlusion, G roughness, B metal.
            body.push_str("    occlusion = orm_texel.r;\n");
            body.push_str("    roughness = roughness * orm_texel.g;\n");
            body.push_str("    metalness = metalness * orm_texel.b;\n");
        } else {
            if self.textures.contains_key(&TextureRole::Occlusion) {
                body.push_str("    occlusion = occlusion_texel.r;\n");
            }
            if self.textures.contains_key(&TextureRole::Roughness) {
                body.push_str("    roughness = roughness * roughness_texel.g;\n");
            }
            if self.textures.contains_key(&TextureRole::Metal) {
                body.push_str("    metalness = metalness * metal_texel.b;\n");
            }
        }

        body.push_str("    var opacity = material.factors.z;\n");
        if let Some(assigned) = self.textures.get(&TextureRole::Opacity) {
            body.push_str(&format!(
                "    opacity = opacity * opacity_texel.{};\n",
                assigned.channel.swizzle()
            ));
        } else if self.textures.contains_key(&TextureRole::BaseColor) {
            body.push_str("    opacity = opacity * base_color_texel.a;\n");
        }
        if let AlphaMode::Mask(_) = self.alpha {
            body.push_str("    if opacity < material.factors.w {\n        discard;\n    }\n");
        }

        if self.textures.contains_key(&TextureRole::Normal) {
            match self.normal_transform {
                Some((scale, bias)) => {
                    body.push_str(&format!(
                        "    let tangent_normal = normal_texel.rgb * vec3f({:?}, {:?}, {:?}) + vec3f({:?}, {:?}, {:?});\n",
                        scale[0], scale[1], scale[2], bias[0], bias[1], bias[2]
                    ));
                }
                None => {
                    body.push_str("    let tangent_normal = normal_texel.rgb * 2.0 - 1.0;\n");
                }
            }
            body.push_str("    let shading_normal = normalize(in.normal + tangent_normal);\n");
        } else {
            body.push_str("    let shading_normal = normalize(in.normal);\n");
        }

        body.push_str("    var emissive = material.emissive_factor.rgb;\n");
        if self.textures.contains_key(&TextureRole::Emissive) {
            body.push_str("    emissive = emissive * emissive_texel.rgb;\n");
        }

        // The host pipeline runs the full BRDF; this module only produces the
        // resolved surface inputs. Keep a representative combine so the module
        // is a complete, validating fragment shader.
        body.push_str(
            "    let n_dot_up = max(dot(shading_normal, vec3f(0.0, 1.0, 0.0)), 0.0);\n",
        );
        body.push_str("    let lit = base_color * occlusion * (0.2 + 0.8 * n_dot_up);\n");
        body.push_str("    let spec_scale = material.coat.w;\n");
        body.push_str(
            "    let sheen = (1.0 - roughness) * (1.0 - metalness) * spec_scale * 0.04;\n",
        );
        body.push_str("    let color = lit + vec3f(sheen) + emissive;\n");
        body.push_str("    return vec4f(color, opacity);\n");

        format!(
            "struct VertexOutput {{\n    @builtin(position) position: vec4f,\n    @location(0) uv: vec2f,\n    @location(1) normal: vec3f,\n}};\n\nstruct MaterialParams {{\n    base_color_factor: vec4f,\n    emissive_factor: vec4f,\n    // x: roughness, y: metalness, z: opacity, w: alpha cutoff\n    factors: vec4f,\n    // x: clearcoat, y: clearcoat roughness, z: ior, w: base specular scale\n    coat: vec4f,\n}};\n\n@group(0) @binding(0) var<uniform> material: MaterialParams;\n{bindings}\n{decls}@fragment\nfn fs_main(in: VertexOutput) -> @location(0) vec4f {{\n{body}}}\n",
            bindings = bindings,
            decls = self
                .extra_decls
                .values()
                .map(|d| format!("{d}\n"))
                .collect::<String>(),
            body = body,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TextureRef;

    #[test]
    fn defaults_follow_authoring_conventions() {
        let mat = GpuMaterial::from_params("m", &ResolvedMaterialParameters::default());
        assert_eq!(mat.base_color_factor, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(mat.roughness_factor, 1.0);
        assert_eq!(mat.metalness_factor, 0.0);
        assert!(mat.double_sided);
        assert_eq!(mat.alpha, AlphaMode::Opaque);
        assert!(mat.depth_write);
    }

    #[test]
    fn threshold_beats_blend() {
        // Authoring both opacity and a threshold is a documented edge case:
        // the threshold wins and depth writes stay on.
        let params = ResolvedMaterialParameters {
            opacity: Some(0.5),
            opacity_threshold: Some(0.4),
            ..Default::default()
        };
        let mat = GpuMaterial::from_params("m", &params);
        assert_eq!(mat.alpha, AlphaMode::Mask(0.4));
        assert!(mat.depth_write);
    }

    #[test]
    fn constant_opacity_blends() {
        let params = ResolvedMaterialParameters {
            opacity: Some(0.5),
            ..Default::default()
        };
        let mat = GpuMaterial::from_params("m", &params);
        assert_eq!(mat.alpha, AlphaMode::Blend);
        assert!(!mat.depth_write);
    }

    #[test]
    fn fragment_source_contains_slot_anchor() {
        let mut params = ResolvedMaterialParameters::default();
        params.set_texture(TextureRole::BaseColor, TextureRef::new("b.png"));
        let mut mat = GpuMaterial::from_params("m", &params);
        // Until a texture is actually assigned, no anchor is emitted.
        assert!(!mat.has_plain_sample(TextureRole::BaseColor));

        mat.assign_texture(
            TextureRole::BaseColor,
            fake_instance("b.png"),
            TextureChannel::Rgb,
        );
        assert!(mat.has_plain_sample(TextureRole::BaseColor));
        assert!(mat.fragment_source.contains("base_color_texel.rgb"));
    }

    #[test]
    fn uniform_layout_matches_generated_struct() {
        let params = ResolvedMaterialParameters {
            roughness: Some(0.3),
            metalness: Some(0.9),
            opacity: Some(0.5),
            opacity_threshold: Some(0.4),
            suppress_base_specular: true,
            ..Default::default()
        };
        let mat = GpuMaterial::from_params("m", &params);
        let uniform = mat.uniform();
        assert_eq!(uniform.factors, [0.3, 0.9, 0.5, 0.4]);
        assert_eq!(uniform.coat[3], 0.0);
        // Four vec4s, tightly packed.
        assert_eq!(mat.uniform_bytes().len(), 64);
    }

    #[test]
    fn generic_gray_is_mid_gray_rough() {
        let mat = GpuMaterial::generic_gray("fallback");
        assert_eq!(mat.base_color_factor, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(mat.roughness_factor, 0.8);
        assert_eq!(mat.metalness_factor, 0.0);
    }

    pub(crate) fn fake_instance(url: &str) -> crate::texture::TextureInstance {
        use crate::texture::{DecodedImage, PixelData};
        use std::sync::Arc;
        crate::texture::TextureInstance {
            base: Arc::new(DecodedImage {
                width: 1,
                height: 1,
                pixels: PixelData::Rgba8(vec![255, 255, 255, 255]),
            }),
            url: url.to_string(),
            wrap_mode: Default::default(),
            color_space: Default::default(),
            linear_filter: true,
        }
    }
}
