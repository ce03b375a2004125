//! UDIM virtual tile sampling.
//!
//! A texture path containing the literal `<UDIM>` token addresses a 10x10
//! grid of same-size tiles, `tile_id = 1001 + u + 10*v` for `(u, v) =
//! floor(uv)`. Tiles discovered at load time become dedicated sampler
//! uniforms plus one injected WGSL function that branches through an explicit
//! if/else-if chain per tile. The branch chain is deliberate: dynamic array
//! indexing of sampler bindings is unavailable on constrained GPU profiles.
//!
//! Each rewrite is a shader variant keyed by (slot, tile-id set); the
//! material's program cache key is extended with that key so the host
//! pipeline never reuses a program compiled for a different tile set.

use crate::assets::AssetResolver;
use crate::material::GpuMaterial;
use crate::params::{TextureChannel, TextureRole};
use crate::texture::{TextureCache, TextureInstance};

/// Literal tile placeholder in authored asset paths.
pub const UDIM_TOKEN: &str = "<UDIM>";

/// First tile id; the grid spans ids 1001..=1100.
pub const UDIM_BASE: u32 = 1001;

/// Discovered tiles for one tiled asset path, ordered by tile id.
/// Absent tiles are holes.
#[derive(Debug, Clone, Default)]
pub struct TextureTileSet {
    pub tiles: Vec<(u32, TextureInstance)>,
}

impl TextureTileSet {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile_ids(&self) -> Vec<u32> {
        self.tiles.iter().map(|(id, _)| *id).collect()
    }

    pub fn first(&self) -> Option<&(u32, TextureInstance)> {
        self.tiles.first()
    }
}

/// Tile id addressed by a UV position. Negative UV clamps into the first
/// row/column, matching the generated shader code.
pub fn tile_id_for_uv(uv: [f32; 2]) -> u32 {
    let u = uv[0].floor().max(0.0) as u32;
    let v = uv[1].floor().max(0.0) as u32;
    UDIM_BASE + u + 10 * v
}

/// CPU mirror of the injected branch chain: the tile whose id matches, or
/// the first tile as fallback.
pub fn select_tile(tile_set: &TextureTileSet, uv: [f32; 2]) -> Option<u32> {
    let wanted = tile_id_for_uv(uv);
    if tile_set.tiles.iter().any(|(id, _)| *id == wanted) {
        return Some(wanted);
    }
    tile_set.first().map(|(id, _)| *id)
}

/// Probe the tile grid for present tiles of a tiled asset path.
///
/// Probing goes through the asset-resolution callback: a tile whose URL does
/// not resolve is a hole, and decode failures are holes as well.
pub fn discover_tiles(
    tiled_path: &str,
    base_identifier: Option<&str>,
    assets: &dyn AssetResolver,
    cache: &TextureCache,
    configure: impl Fn(&mut TextureInstance) + Copy,
) -> TextureTileSet {
    let mut set = TextureTileSet::default();
    if !tiled_path.contains(UDIM_TOKEN) {
        return set;
    }
    for v in 0..10u32 {
        for u in 0..10u32 {
            let id = UDIM_BASE + u + 10 * v;
            let candidate = tiled_path.replace(UDIM_TOKEN, &id.to_string());
            let Some(url) = assets.resolve_url(&candidate, base_identifier) else {
                continue;
            };
            if let Ok(instance) = cache.get_or_load_clone(&url, configure) {
                set.tiles.push((id, instance));
            }
        }
    }
    set
}

/// A code-generation pass specializing one texture slot for a tile set.
#[derive(Debug, Clone)]
pub struct UdimVariant {
    pub slot: TextureRole,
    pub tile_ids: Vec<u32>,
}

impl UdimVariant {
    pub fn new(slot: TextureRole, tile_set: &TextureTileSet) -> Self {
        Self {
            slot,
            tile_ids: tile_set.tile_ids(),
        }
    }

    pub fn function_name(&self) -> String {
        format!("sample_udim_{}", self.slot.slot_name())
    }

    pub fn sampler_name(&self, tile_id: u32) -> String {
        format!("{}_udim_{tile_id}", self.slot.slot_name())
    }

    /// Cache-key fragment identifying this specialization.
    pub fn cache_key(&self) -> String {
        let ids: Vec<String> = self.tile_ids.iter().map(u32::to_string).collect();
        format!("udim[{}:{}]", self.slot.slot_name(), ids.join("-"))
    }

    /// The injected WGSL sampling function. `debug_name` is stamped into the
    /// generated source so shader dumps identify the originating slot.
    ///
    /// Derivatives are taken before branching so the per-tile samples are
    /// valid in non-uniform control flow.
    pub fn generate_function(&self, debug_name: &str) -> String {
        let fn_name = self.function_name();
        let mut body = String::new();
        body.push_str(&format!("// udim tiles for {debug_name}\n"));
        body.push_str(&format!("fn {fn_name}(uv: vec2f) -> vec4f {{\n"));
        body.push_str("    let tile = max(vec2i(floor(uv)), vec2i(0));\n");
        body.push_str("    let tile_id = 1001 + tile.x + 10 * tile.y;\n");
        body.push_str("    let tuv = fract(uv);\n");
        body.push_str("    let grad_x = dpdx(tuv);\n");
        body.push_str("    let grad_y = dpdy(tuv);\n");

        for (i, id) in self.tile_ids.iter().enumerate() {
            let keyword = if i == 0 { "if" } else { "} else if" };
            body.push_str(&format!("    {keyword} tile_id == {id} {{\n"));
            body.push_str(&format!(
                "        return textureSampleGrad({}, udim_samp, tuv, grad_x, grad_y);\n",
                self.sampler_name(*id)
            ));
        }
        body.push_str("    }\n");

        // No matching tile: fall back to the first tile in the set.
        let first = self.tile_ids.first().copied().unwrap_or(UDIM_BASE);
        body.push_str(&format!(
            "    return textureSampleGrad({}, udim_samp, tuv, grad_x, grad_y);\n",
            self.sampler_name(first)
        ));
        body.push_str("}\n");
        body
    }
}

/// Patch `material` so `slot` samples the virtual tile grid instead of its
/// single assigned texture.
///
/// The packed occlusion-roughness-metal slot is the specialization that keeps
/// the sampler budget in check: one tile set and one injected function serve
/// the occlusion, roughness and metal channels together, because the slot's
/// generated post-processing already splits the packed channels.
///
/// An empty tile set is a no-op; the caller falls back to single-texture
/// loading.
pub fn apply_tiled_sampling(
    material: &mut GpuMaterial,
    slot: TextureRole,
    tile_set: &TextureTileSet,
    debug_name: &str,
) {
    let Some((_, first_instance)) = tile_set.first() else {
        return;
    };

    // The slot's normal texture assignment only exists to trigger the host
    // pipeline's feature flags and UV-varying generation; the injected code
    // never samples it.
    let channel = material
        .textures
        .get(&slot)
        .map(|t| t.channel)
        .unwrap_or(TextureChannel::Rgb);
    material
        .textures
        .insert(slot, crate::material::AssignedTexture {
            instance: first_instance.clone(),
            channel,
        });

    let variant = UdimVariant::new(slot, tile_set);
    for (id, instance) in &tile_set.tiles {
        let name = variant.sampler_name(*id);
        if !material.extra_samplers.iter().any(|(n, _)| *n == name) {
            material.extra_samplers.push((name, instance.clone()));
        }
    }
    material.extra_decls.insert(
        variant.function_name(),
        variant.generate_function(debug_name),
    );

    // The generator routes a slot through its injected function whenever the
    // declaration is present, so this (and any later) rebuild picks it up.
    material.rebuild_fragment_source();

    material
        .program_key
        .push_str(&format!("+{}", variant.cache_key()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::GpuMaterial;
    use crate::params::ResolvedMaterialParameters;
    use std::sync::Arc;

    fn instance(url: &str) -> TextureInstance {
        use crate::texture::{DecodedImage, PixelData};
        TextureInstance {
            base: Arc::new(DecodedImage {
                width: 1,
                height: 1,
                pixels: PixelData::Rgba8(vec![0, 0, 0, 255]),
            }),
            url: url.to_string(),
            wrap_mode: Default::default(),
            color_space: Default::default(),
            linear_filter: true,
        }
    }

    fn tile_set(ids: &[u32]) -> TextureTileSet {
        TextureTileSet {
            tiles: ids
                .iter()
                .map(|id| (*id, instance(&format!("t.{id}.png"))))
                .collect(),
        }
    }

    #[test]
    fn tile_addressing_matches_convention() {
        let set = tile_set(&[1001, 1002, 1011]);
        assert_eq!(select_tile(&set, [1.5, 0.5]), Some(1002));
        assert_eq!(select_tile(&set, [0.5, 1.5]), Some(1011));
        // No tile at (5,5): falls back to the first tile in the set.
        assert_eq!(select_tile(&set, [5.5, 5.5]), Some(1001));
    }

    #[test]
    fn negative_uv_clamps_like_the_generated_code() {
        let set = tile_set(&[1001, 1002]);
        // Both sides land in the first row/column, not the fallback branch.
        assert_eq!(select_tile(&set, [-0.5, 0.5]), Some(1001));
        assert_eq!(select_tile(&set, [0.5, -0.5]), Some(1001));
        let source = UdimVariant::new(TextureRole::BaseColor, &set).generate_function("m/base");
        assert!(source.contains("max(vec2i(floor(uv)), vec2i(0))"));
    }

    #[test]
    fn empty_tile_set_is_a_noop() {
        let mut material =
            GpuMaterial::from_params("m", &ResolvedMaterialParameters::default());
        let before_source = material.fragment_source.clone();
        let before_key = material.program_key.clone();
        apply_tiled_sampling(
            &mut material,
            TextureRole::BaseColor,
            &TextureTileSet::default(),
            "m/base",
        );
        assert_eq!(material.fragment_source, before_source);
        assert_eq!(material.program_key, before_key);
    }

    #[test]
    fn rewrite_replaces_anchor_and_extends_cache_key() {
        let mut material =
            GpuMaterial::from_params("m", &ResolvedMaterialParameters::default());
        let set = tile_set(&[1001, 1002, 1011]);
        apply_tiled_sampling(&mut material, TextureRole::BaseColor, &set, "m/base");

        assert!(!material.has_plain_sample(TextureRole::BaseColor));
        assert!(material.fragment_source.contains("sample_udim_base_color(in.uv)"));
        assert!(material.fragment_source.contains("tile_id == 1002"));
        assert!(material.fragment_source.contains("base_color_udim_1011"));
        assert!(material.program_key.contains("udim[base_color:1001-1002-1011]"));
        assert_eq!(material.extra_samplers.len(), 3);
    }

    #[test]
    fn later_assignments_keep_the_tiled_rewrite() {
        let mut material =
            GpuMaterial::from_params("m", &ResolvedMaterialParameters::default());
        apply_tiled_sampling(
            &mut material,
            TextureRole::BaseColor,
            &tile_set(&[1001, 1002]),
            "m/base",
        );
        // A plain assignment for another slot rebuilds the whole module.
        material.assign_texture(TextureRole::Normal, instance("n.png"), TextureChannel::Rgb);

        assert!(!material.has_plain_sample(TextureRole::BaseColor));
        assert!(material
            .fragment_source
            .contains("sample_udim_base_color(in.uv)"));
        assert!(material.has_plain_sample(TextureRole::Normal));
    }

    #[test]
    fn packed_orm_uses_one_function_for_three_channels() {
        let mut material =
            GpuMaterial::from_params("m", &ResolvedMaterialParameters::default());
        let set = tile_set(&[1001, 1002]);
        apply_tiled_sampling(
            &mut material,
            TextureRole::OcclusionRoughnessMetal,
            &set,
            "m/orm",
        );

        // One injected function, one sample call, three channel reads.
        assert_eq!(
            material
                .fragment_source
                .matches("sample_udim_orm(in.uv)")
                .count(),
            1
        );
        assert!(material.fragment_source.contains("orm_texel.r"));
        assert!(material.fragment_source.contains("orm_texel.g"));
        assert!(material.fragment_source.contains("orm_texel.b"));
        assert_eq!(material.extra_samplers.len(), 2);
    }

    #[test]
    fn variant_function_falls_back_to_first_tile() {
        let variant = UdimVariant::new(TextureRole::BaseColor, &tile_set(&[1003, 1004]));
        let source = variant.generate_function("m/base");
        // The trailing return (outside the chain) must target the first tile.
        let fallback = source.rsplit("return ").next().unwrap();
        assert!(fallback.contains("base_color_udim_1003"));
    }
}
