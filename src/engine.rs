//! The engine façade: one object wiring binding resolution, the shader
//! network walk, model adapters, texture loading and tile discovery into a
//! single "prim in, GPU material out" call.
//!
//! Material resolution never fails. Every degradation path (no binding,
//! no terminal shader, unknown shading model, fetch or decode errors) ends
//! at the generic gray fallback or a material with the failing slot skipped,
//! so one bad asset never takes down scene construction.
//!
//! Resolution hands out shared material handles. Factors and the base
//! fragment module are available immediately; texture assignment and tiled
//! shader rewrites are queued on the cache's apply queue and land on the
//! live material when the host pumps [`ShadeEngine::tick`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::adapters;
use crate::assets::AssetResolver;
use crate::binding::resolve_binding;
use crate::config::EngineConfig;
use crate::material::GpuMaterial;
use crate::mdl::MdlResolver;
use crate::network::resolve_terminal_shader;
use crate::params::{TextureRef, TextureRole};
use crate::scene::{Prim, SceneTree};
use crate::texture::{TextureCache, TextureInstance};
use crate::udim;

/// A material handle shared between the engine's memo, the host, and the
/// queued texture applies that mutate it.
pub type SharedMaterial = Arc<Mutex<GpuMaterial>>;

pub struct ShadeEngine {
    config: EngineConfig,
    assets: Arc<dyn AssetResolver>,
    cache: TextureCache,
    mdl: MdlResolver,
    /// Built materials keyed by (material prim path, terminal shader path).
    memo: Mutex<HashMap<(String, String), SharedMaterial>>,
}

impl ShadeEngine {
    pub fn new(assets: Arc<dyn AssetResolver>, config: EngineConfig) -> Self {
        let cache = TextureCache::new(assets.clone(), &config);
        let mdl = MdlResolver::new(assets.clone(), config.verbose);
        Self {
            config,
            assets,
            cache,
            mdl,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    /// Run one batch of deferred texture applies; call once per host tick.
    pub fn tick(&self) -> usize {
        self.cache.pump_applies()
    }

    /// Resolve the material for a renderable prim.
    ///
    /// `instance_root` marks the prototype boundary when `prim` comes from an
    /// instanced subtree. Materials are memoized per (material path, terminal
    /// shader path), so many prims bound to one material share one handle.
    ///
    /// The returned handle carries factors and the base fragment module right
    /// away; texture assignments arrive on later [`ShadeEngine::tick`] calls.
    pub fn resolve_material(
        &self,
        prim: &Prim,
        tree: &SceneTree,
        instance_root: Option<&Prim>,
    ) -> SharedMaterial {
        let Some(material) = resolve_binding(prim, tree, instance_root) else {
            if self.config.verbose {
                eprintln!("[engine] no material binding for {}", prim.path);
            }
            return Arc::new(Mutex::new(GpuMaterial::generic_gray(&prim.name)));
        };

        let Some(shader) = resolve_terminal_shader(material, tree, &self.config) else {
            if self.config.verbose {
                eprintln!("[engine] no terminal shader under {}", material.path);
            }
            return Arc::new(Mutex::new(GpuMaterial::generic_gray(&material.name)));
        };

        let key = (material.path.clone(), shader.path.clone());
        if let Ok(memo) = self.memo.lock() {
            if let Some(hit) = memo.get(&key) {
                return hit.clone();
            }
        }

        let built = self.build_material(material, shader, tree);
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(key, built.clone());
        }
        built
    }

    fn build_material(&self, material: &Prim, shader: &Prim, tree: &SceneTree) -> SharedMaterial {
        // A material composed in from another asset resolves its module and
        // texture paths relative to that asset.
        let material_asset = material.metadata.references.first().map(String::as_str);
        let params = adapters::adapt(shader, material, tree, &self.mdl, material_asset);
        if params.is_empty() {
            if self.config.verbose {
                eprintln!(
                    "[engine] unknown shading model {:?} on {}",
                    shader.shader_id(),
                    shader.path
                );
            }
            return Arc::new(Mutex::new(GpuMaterial::generic_gray(&material.name)));
        }

        let handle = Arc::new(Mutex::new(GpuMaterial::from_params(&material.name, &params)));
        for (role, texture) in &params.textures {
            self.attach_texture(&handle, &material.name, *role, texture, material_asset);
        }
        handle
    }

    /// Fetch and decode the slot's texture now, then queue the material
    /// mutation (assignment or tiled-sampling rewrite) on the apply queue.
    fn attach_texture(
        &self,
        handle: &SharedMaterial,
        name: &str,
        role: TextureRole,
        texture: &TextureRef,
        material_asset: Option<&str>,
    ) {
        let base = texture.base_identifier.as_deref().or(material_asset);

        if texture.is_tiled() {
            let tiles = udim::discover_tiles(
                &texture.asset_path,
                base,
                self.assets.as_ref(),
                &self.cache,
                |instance| configure_instance(instance, texture),
            );
            if tiles.is_empty() {
                if self.config.verbose {
                    eprintln!(
                        "[engine] no tiles found for {} on {name}",
                        texture.asset_path
                    );
                }
                return;
            }
            let debug_name = format!("{name}/{}", role.slot_name());
            let handle = handle.clone();
            self.cache.queue_apply(Box::new(move || {
                if let Ok(mut gpu) = handle.lock() {
                    udim::apply_tiled_sampling(&mut gpu, role, &tiles, &debug_name);
                }
            }));
            return;
        }

        let Some(url) = self.assets.resolve_url(&texture.asset_path, base) else {
            if self.config.verbose {
                eprintln!(
                    "[engine] unresolvable texture path {} on {name}",
                    texture.asset_path
                );
            }
            return;
        };
        match self
            .cache
            .get_or_load_clone(&url, |instance| configure_instance(instance, texture))
        {
            Ok(instance) => {
                // Authored scale/bias other than the renderer's `* 2 - 1`
                // convention needs remap code in the generated shader.
                let remap = (role == TextureRole::Normal
                    && !texture.has_standard_normal_transform()
                    && !texture.has_identity_transform())
                .then(|| {
                    (
                        [texture.scale[0], texture.scale[1], texture.scale[2]],
                        [texture.bias[0], texture.bias[1], texture.bias[2]],
                    )
                });
                let channel = texture.channel;
                let handle = handle.clone();
                self.cache.queue_apply(Box::new(move || {
                    let Ok(mut gpu) = handle.lock() else {
                        return;
                    };
                    if let Some((scale, bias)) = remap {
                        gpu.normal_transform = Some((scale, bias));
                        gpu.program_key.push_str(&format!(
                            "+ntx[{:?},{:?},{:?};{:?},{:?},{:?}]",
                            scale[0], scale[1], scale[2], bias[0], bias[1], bias[2]
                        ));
                    }
                    gpu.assign_texture(role, instance, channel);
                }));
            }
            Err(err) => {
                if self.config.verbose {
                    eprintln!("[engine] texture load failed for {url}: {err:#}");
                }
            }
        }
    }

    /// Scan the scene for an environment/background image declared by any
    /// externally-defined shader. First hit wins.
    pub fn environment_asset(&self, tree: &SceneTree) -> Option<String> {
        tree.root
            .walk()
            .filter(|p| p.has_external_source())
            .find_map(|shader| self.mdl.environment_asset(shader))
    }
}

fn configure_instance(instance: &mut TextureInstance, texture: &TextureRef) {
    instance.wrap_mode = texture.wrap_mode;
    instance.color_space = texture.color_space;
}
