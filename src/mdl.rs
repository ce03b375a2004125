//! External shader-source resolution.
//!
//! Shaders may point at an externally-compiled MDL module instead of carrying
//! an inline model identifier. Full execution of the shading language is out
//! of scope; this module extracts just enough from the source text (texture
//! declarations and a few constant literals) to build a plausible material.
//! Everything degrades: builtin modules and fetch failures fall back to
//! reading the shader prim's own inputs, and never abort material creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use crate::assets::{AssetResolver, join_relative};
use crate::params::TextureRole;
use crate::scene::Prim;

/// Known builtin MDL modules whose parameter names are statically known, so
/// their source is never fetched.
const BUILTIN_MODULES: [&str; 4] = [
    "OmniPBR.mdl",
    "OmniGlass.mdl",
    "OmniSurface.mdl",
    "gltf/pbr.mdl",
];

/// Outcome of resolving an external shader source.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalModelResult {
    /// Read parameters directly from the shader prim's own inputs.
    /// Used for builtins and as the fallback for fetch/parse failures.
    Builtin,
    /// Values extracted from fetched source text.
    Parsed(ParsedMdl),
}

/// What the source-text scan recovered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMdl {
    pub base_color: Option<[f32; 3]>,
    pub roughness: Option<f32>,
    pub metalness: Option<f32>,
    /// Role -> asset path, resolved relative to the module's own directory.
    pub textures: HashMap<TextureRole, String>,
}

/// Resolves and caches external shader-source lookups.
pub struct MdlResolver {
    assets: Arc<dyn AssetResolver>,
    /// Environment-asset query results keyed by asset identifier.
    env_cache: Mutex<HashMap<String, Option<String>>>,
    verbose: bool,
}

impl MdlResolver {
    pub fn new(assets: Arc<dyn AssetResolver>, verbose: bool) -> Self {
        Self {
            assets,
            env_cache: Mutex::new(HashMap::new()),
            verbose,
        }
    }

    /// The asset reference declared by `shader`, if any.
    pub fn source_asset(shader: &Prim) -> Option<(String, Option<String>)> {
        let (path, base) = shader.value("info:mdl:sourceAsset")?.as_asset()?;
        Some((path.to_string(), base.map(str::to_string)))
    }

    /// Resolve the external definition for `shader`.
    ///
    /// `material_asset` is the identifier of the asset the enclosing material
    /// came from, used for relative resolution of the module path.
    pub fn resolve_external(
        &self,
        shader: &Prim,
        material_asset: Option<&str>,
    ) -> ExternalModelResult {
        let Some((asset_path, base)) = Self::source_asset(shader) else {
            return ExternalModelResult::Builtin;
        };
        if is_builtin_module(&asset_path) {
            return ExternalModelResult::Builtin;
        }

        let from = base.as_deref().or(material_asset);
        let Some(url) = self.assets.resolve_url(&asset_path, from) else {
            if self.verbose {
                eprintln!("[mdl] unresolvable module path: {asset_path}");
            }
            return ExternalModelResult::Builtin;
        };
        let source = match self.assets.fetch(&url) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                if self.verbose {
                    eprintln!("[mdl] fetch failed for {url}: {err:#}");
                }
                return ExternalModelResult::Builtin;
            }
        };

        ExternalModelResult::Parsed(parse_mdl_source(&source, &url))
    }

    /// Recover an environment/background image candidate from the shader's
    /// MDL module. Narrow query for the scene-level environment layer;
    /// independently cached by asset identifier.
    pub fn environment_asset(&self, shader: &Prim) -> Option<String> {
        let (asset_path, base) = Self::source_asset(shader)?;
        if let Ok(cache) = self.env_cache.lock() {
            if let Some(hit) = cache.get(&asset_path) {
                return hit.clone();
            }
        }

        let result = (|| {
            let url = self.assets.resolve_url(&asset_path, base.as_deref())?;
            let bytes = self.assets.fetch(&url).ok()?;
            let source = String::from_utf8_lossy(&bytes).into_owned();
            environment_candidate(&source, &url)
        })();

        if let Ok(mut cache) = self.env_cache.lock() {
            cache.insert(asset_path, result.clone());
        }
        result
    }
}

/// A builtin reference is a known module name, or a bare filename with no
/// path separators.
pub fn is_builtin_module(asset_path: &str) -> bool {
    if BUILTIN_MODULES.contains(&asset_path) {
        return true;
    }
    !asset_path.contains('/') && !asset_path.contains('\\')
}

// ---------------------------------------------------------------------------
// Source-text scanning
// ---------------------------------------------------------------------------

fn texture_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // e.g. `diffuse_texture: texture_2d("./textures/wood_albedo.png" ...`
        Regex::new(r#"(\w+)\s*[:=]\s*texture_2d\s*\(\s*"([^"]+)""#).unwrap()
    })
}

fn quoted_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"\s]+\.(?i:png|jpg|jpeg|tga|bmp|webp|exr|hdr))""#).unwrap()
    })
}

fn color_constant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:diffuse_color_constant|base_color_constant)\s*[:=]\s*color\s*\(\s*([0-9.]+)f?\s*,\s*([0-9.]+)f?\s*,\s*([0-9.]+)f?",
        )
        .unwrap()
    })
}

fn scalar_constant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(reflection_roughness_constant|roughness_constant|metallic_constant)\s*[:=]\s*([0-9.]+)f?",
        )
        .unwrap()
    })
}

/// Scan MDL source text for texture declarations and constant literals.
///
/// Paths are resolved relative to the module's own directory (`module_url`),
/// not the consuming shader's.
pub fn parse_mdl_source(source: &str, module_url: &str) -> ParsedMdl {
    let mut parsed = ParsedMdl::default();

    // Keyed declarations first: explicit parameter names classify reliably.
    let mut candidates: Vec<(Option<String>, String)> = Vec::new();
    for cap in texture_decl_re().captures_iter(source) {
        candidates.push((Some(cap[1].to_string()), cap[2].to_string()));
    }
    // Broader fallback: any quoted string ending in a known image extension.
    for cap in quoted_image_re().captures_iter(source) {
        let path = cap[1].to_string();
        if !candidates.iter().any(|(_, p)| *p == path) {
            candidates.push((None, path));
        }
    }

    for (key, path) in candidates {
        let role = key
            .as_deref()
            .and_then(classify_key)
            .or_else(|| classify_filename(&path));
        let Some(role) = role else { continue };
        let resolved = join_relative(module_url, &path);
        match parsed.textures.get(&role) {
            // Heuristic tie-break: the longer (more specific) path wins.
            Some(existing) if existing.len() >= resolved.len() => {}
            _ => {
                parsed.textures.insert(role, resolved);
            }
        }
    }

    if let Some(cap) = color_constant_re().captures(source) {
        let parse = |s: &str| s.parse::<f32>().unwrap_or(0.0);
        parsed.base_color = Some([parse(&cap[1]), parse(&cap[2]), parse(&cap[3])]);
    }
    for cap in scalar_constant_re().captures_iter(source) {
        let value = cap[2].parse::<f32>().ok();
        match &cap[1] {
            "metallic_constant" => parsed.metalness = parsed.metalness.or(value),
            _ => parsed.roughness = parsed.roughness.or(value),
        }
    }

    parsed
}

/// Classify a declaration key into a texture role.
fn classify_key(key: &str) -> Option<TextureRole> {
    let key = key.to_ascii_lowercase();
    // "normal" before "orm": "normalmap" contains the letters o-r-m.
    if key.contains("normal") {
        return Some(TextureRole::Normal);
    }
    if key.contains("orm") {
        return Some(TextureRole::OcclusionRoughnessMetal);
    }
    if key.contains("diffuse") || key.contains("albedo") || key.contains("basecolor") || key.contains("base_color") {
        return Some(TextureRole::BaseColor);
    }
    if key.contains("emissive") || key.contains("emission") {
        return Some(TextureRole::Emissive);
    }
    if key.contains("opacity") {
        return Some(TextureRole::Opacity);
    }
    if key.contains("rough") {
        return Some(TextureRole::Roughness);
    }
    if key.contains("metal") {
        return Some(TextureRole::Metal);
    }
    if key.contains("occlusion") || key == "ao_texture" || key.contains("_ao") {
        return Some(TextureRole::Occlusion);
    }
    None
}

/// Filename-keyword heuristic for keyless candidates. Conflicting keywords
/// are excluded (a packed ORM map must not classify as roughness).
fn classify_filename(path: &str) -> Option<TextureRole> {
    let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
    let has = |kw: &str| name.contains(kw);

    if has("normal") || has("_nrm") || has("_nor") {
        return Some(TextureRole::Normal);
    }
    if has("orm") || (has("occlusion") && has("rough")) {
        return Some(TextureRole::OcclusionRoughnessMetal);
    }
    if has("emissive") || has("emission") || has("_emit") {
        return Some(TextureRole::Emissive);
    }
    if has("opacity") || has("_alpha") {
        return Some(TextureRole::Opacity);
    }
    if has("rough") && !has("metal") {
        return Some(TextureRole::Roughness);
    }
    if has("metal") && !has("rough") {
        return Some(TextureRole::Metal);
    }
    if has("occlusion") || has("_ao") {
        return Some(TextureRole::Occlusion);
    }
    if has("albedo") || has("basecolor") || has("diffuse") || has("_col") {
        return Some(TextureRole::BaseColor);
    }
    None
}

/// Environment/background image candidate from module source.
fn environment_candidate(source: &str, module_url: &str) -> Option<String> {
    // Explicit environment keys first.
    for cap in texture_decl_re().captures_iter(source) {
        let key = cap[1].to_ascii_lowercase();
        if key.contains("domelight") || key.contains("environment") || key.contains("skybox") {
            return Some(join_relative(module_url, &cap[2]));
        }
    }
    // Otherwise any latlong-format image is a plausible dome source.
    for cap in quoted_image_re().captures_iter(source) {
        let path = &cap[1];
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".hdr") || lower.ends_with(".exr") {
            return Some(join_relative(module_url, path));
        }
    }
    None
}
