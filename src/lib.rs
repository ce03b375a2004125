//! Shading-graph resolution and adaptive texture sampling for USD-like
//! scene descriptions.
//!
//! The pipeline runs in stages: [`binding`] finds the material bound to a
//! renderable prim, [`network`] walks surface outputs to the terminal shader,
//! [`adapters`] lowers the shading model's inputs into canonical parameters,
//! and [`material`] generates the WGSL fragment module the host pipeline
//! compiles. [`texture`] decodes and dedups image assets, and [`udim`]
//! rewrites generated shaders for tiled texture sets. [`engine`] ties the
//! stages together behind one façade.

pub mod adapters;
pub mod assets;
pub mod binding;
pub mod config;
pub mod engine;
pub mod material;
pub mod mdl;
pub mod network;
pub mod params;
pub mod scene;
pub mod texture;
pub mod udim;

pub use assets::{AssetResolver, MemoryAssets};
pub use config::EngineConfig;
pub use engine::{ShadeEngine, SharedMaterial};
pub use material::{AlphaMode, GpuMaterial, MaterialUniform};
pub use params::{ResolvedMaterialParameters, TextureChannel, TextureRef, TextureRole};
pub use scene::{Prim, SceneTree, load_scene_from_path, load_scene_from_str};
pub use texture::{DecodedImage, TextureCache, TextureInstance};
