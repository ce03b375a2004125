//! Texture decode and caching.
//!
//! Decoded pixel data is deduplicated by URL and shared; per-slot settings
//! (wrap mode, color space, filtering) live on independently configurable
//! instances over the shared pixels. Decode concurrency is bounded by a fixed
//! slot count with FIFO ordering, and applying results to live materials is
//! deferred into per-tick batches so a burst of resolutions cannot mutate
//! many materials in one frame.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Condvar, Mutex};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use image::ImageDecoder;

use crate::assets::AssetResolver;
use crate::config::EngineConfig;
use crate::params::{SourceColorSpace, WrapMode};

/// Decoded pixels ready for upload.
#[derive(Debug, Clone)]
pub enum PixelData {
    Rgba8(Vec<u8>),
    RgbaF16(Vec<half::f16>),
    RgbaF32(Vec<f32>),
}

/// A decoded base texture, shared between every instance of one URL.
#[derive(Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: PixelData,
}

/// One slot's view of a decoded texture: shared pixels, independent settings.
#[derive(Debug, Clone)]
pub struct TextureInstance {
    pub base: Arc<DecodedImage>,
    pub url: String,
    pub wrap_mode: WrapMode,
    pub color_space: SourceColorSpace,
    pub linear_filter: bool,
}

impl TextureInstance {
    fn new(base: Arc<DecodedImage>, url: String) -> Self {
        Self {
            base,
            url,
            wrap_mode: WrapMode::default(),
            color_space: SourceColorSpace::default(),
            linear_filter: true,
        }
    }

    /// Identity of the underlying pixel data (same URL => same allocation).
    pub fn shares_pixels_with(&self, other: &TextureInstance) -> bool {
        Arc::ptr_eq(&self.base, &other.base)
    }
}

enum Entry {
    InFlight,
    Ready(Arc<DecodedImage>),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    decode_count: u64,
}

/// FIFO slot gate for decode concurrency.
#[derive(Default)]
struct SlotState {
    active: usize,
    next_ticket: u64,
    next_served: u64,
}

type ApplyFn = Box<dyn FnOnce() + Send>;

struct DecodeJob {
    url: String,
    bytes: Vec<u8>,
    reply: Sender<Result<DecodedImage>>,
}

/// Process-wide URL -> decoded-texture cache.
pub struct TextureCache {
    assets: Arc<dyn AssetResolver>,
    state: Mutex<CacheState>,
    state_cond: Condvar,
    slots: Mutex<SlotState>,
    slots_cond: Condvar,
    applies: Mutex<VecDeque<ApplyFn>>,
    decode_slots: usize,
    applies_per_tick: usize,
    worker: Option<Sender<DecodeJob>>,
    verbose: bool,
}

impl TextureCache {
    pub fn new(assets: Arc<dyn AssetResolver>, config: &EngineConfig) -> Self {
        let worker = if config.background_decode {
            Some(spawn_decode_worker())
        } else {
            None
        };
        Self {
            assets,
            state: Mutex::new(CacheState::default()),
            state_cond: Condvar::new(),
            slots: Mutex::new(SlotState::default()),
            slots_cond: Condvar::new(),
            applies: Mutex::new(VecDeque::new()),
            decode_slots: config.decode_slots.max(1),
            applies_per_tick: config.applies_per_tick.max(1),
            worker,
            verbose: config.verbose,
        }
    }

    /// Number of actual decode operations performed (observable for tests).
    pub fn decode_count(&self) -> u64 {
        self.state.lock().map(|s| s.decode_count).unwrap_or(0)
    }

    /// Fetch + decode the base texture for `url`, deduplicated.
    ///
    /// Concurrent identical requests share one in-flight operation. A decode
    /// failure evicts the entry so a later request can retry, and is returned
    /// to this caller only.
    pub fn get_or_load(&self, url: &str) -> Result<Arc<DecodedImage>> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow!("texture cache poisoned"))?;
            loop {
                match state.entries.get(url) {
                    Some(Entry::Ready(image)) => return Ok(image.clone()),
                    Some(Entry::InFlight) => {
                        state = self
                            .state_cond
                            .wait(state)
                            .map_err(|_| anyhow!("texture cache poisoned"))?;
                    }
                    None => {
                        state.entries.insert(url.to_string(), Entry::InFlight);
                        break;
                    }
                }
            }
        }

        let result = self.fetch_and_decode(url);

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("texture cache poisoned"))?;
        match result {
            Ok(image) => {
                let image = Arc::new(image);
                state.decode_count += 1;
                state
                    .entries
                    .insert(url.to_string(), Entry::Ready(image.clone()));
                self.state_cond.notify_all();
                Ok(image)
            }
            Err(err) => {
                // Evict so a future request can retry.
                state.entries.remove(url);
                self.state_cond.notify_all();
                if self.verbose {
                    eprintln!("[texture] decode failed for {url}: {err:#}");
                }
                Err(err)
            }
        }
    }

    /// An independently configurable instance over the shared base texture.
    pub fn get_or_load_clone(
        &self,
        url: &str,
        configure: impl FnOnce(&mut TextureInstance),
    ) -> Result<TextureInstance> {
        let base = self.get_or_load(url)?;
        let mut instance = TextureInstance::new(base, url.to_string());
        configure(&mut instance);
        Ok(instance)
    }

    /// Queue a material-mutation callback for the next apply batches.
    ///
    /// All material mutation funnels through here so concurrent decode
    /// completions cannot race on the same material object.
    pub fn queue_apply(&self, apply: ApplyFn) {
        if let Ok(mut queue) = self.applies.lock() {
            queue.push_back(apply);
        }
    }

    /// Run up to `applies_per_tick` queued callbacks; call once per rendering
    /// tick. Returns how many ran (remaining work stays queued).
    pub fn pump_applies(&self) -> usize {
        let mut ran = 0;
        while ran < self.applies_per_tick {
            let Some(apply) = self.applies.lock().ok().and_then(|mut q| q.pop_front()) else {
                break;
            };
            apply();
            ran += 1;
        }
        ran
    }

    pub fn pending_applies(&self) -> usize {
        self.applies.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn fetch_and_decode(&self, url: &str) -> Result<DecodedImage> {
        let bytes = self
            .assets
            .fetch(url)
            .with_context(|| format!("failed to fetch texture '{url}'"))?;

        self.acquire_slot();
        let result = self.decode_maybe_on_worker(url, bytes);
        self.release_slot();
        result
    }

    fn decode_maybe_on_worker(&self, url: &str, bytes: Vec<u8>) -> Result<DecodedImage> {
        if let Some(worker) = &self.worker {
            let (reply_tx, reply_rx) = bounded(1);
            let job = DecodeJob {
                url: url.to_string(),
                bytes: bytes.clone(),
                reply: reply_tx,
            };
            if worker.send(job).is_ok() {
                if let Ok(result) = reply_rx.recv() {
                    return result;
                }
            }
            // Worker gone: silently decode on this thread instead.
        }
        decode_image(url, &bytes)
    }

    fn acquire_slot(&self) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        let ticket = slots.next_ticket;
        slots.next_ticket += 1;
        while slots.active >= self.decode_slots || ticket != slots.next_served {
            match self.slots_cond.wait(slots) {
                Ok(guard) => slots = guard,
                Err(_) => return,
            }
        }
        slots.next_served += 1;
        slots.active += 1;
    }

    fn release_slot(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.active = slots.active.saturating_sub(1);
        }
        self.slots_cond.notify_all();
    }
}

fn spawn_decode_worker() -> Sender<DecodeJob> {
    let (tx, rx): (Sender<DecodeJob>, Receiver<DecodeJob>) = unbounded();
    std::thread::spawn(move || {
        while let Ok(job) = rx.recv() {
            let result = decode_image(&job.url, &job.bytes);
            // Receiver may have given up; nothing to do then.
            let _ = job.reply.send(result);
        }
    });
    tx
}

/// Decode raw bytes into upload-ready pixels.
///
/// Radiance `.hdr` bypasses the common decode path entirely: its dedicated
/// parser yields an f32 buffer directly. EXR decodes through the common path
/// but is kept at half precision for upload.
pub fn decode_image(url: &str, bytes: &[u8]) -> Result<DecodedImage> {
    let lower = url.to_ascii_lowercase();

    if lower.ends_with(".hdr") {
        return decode_hdr(url, bytes);
    }

    let dynamic = image::load_from_memory(bytes)
        .with_context(|| format!("failed to decode image '{url}'"))?;

    if lower.ends_with(".exr") {
        let f32_img = dynamic.to_rgba32f();
        let (width, height) = (f32_img.width(), f32_img.height());
        let pixels: Vec<half::f16> = f32_img
            .into_raw()
            .into_iter()
            .map(half::f16::from_f32)
            .collect();
        return Ok(DecodedImage {
            width,
            height,
            pixels: PixelData::RgbaF16(pixels),
        });
    }

    let rgba = dynamic.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    Ok(DecodedImage {
        width,
        height,
        pixels: PixelData::Rgba8(rgba.into_raw()),
    })
}

fn decode_hdr(url: &str, bytes: &[u8]) -> Result<DecodedImage> {
    let decoder = image::codecs::hdr::HdrDecoder::new(Cursor::new(bytes))
        .with_context(|| format!("failed to parse radiance header for '{url}'"))?;
    let (width, height) = decoder.dimensions();
    let dynamic = image::DynamicImage::from_decoder(decoder)
        .with_context(|| format!("failed to decode radiance image '{url}'"))?;
    let pixels = dynamic.to_rgba32f().into_raw();
    Ok(DecodedImage {
        width,
        height,
        pixels: PixelData::RgbaF32(pixels),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Flat (non-RLE) 2x1 radiance file.
    fn hdr_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 1 +X 2\n");
        bytes.extend_from_slice(&[128, 128, 128, 129]); // mid gray-ish
        bytes.extend_from_slice(&[255, 0, 0, 128]); // red-ish
        bytes
    }

    fn cache_with(url: &str, bytes: Vec<u8>) -> (TextureCache, MemoryAssets) {
        let assets = MemoryAssets::new();
        assets.insert(url, bytes);
        let cache = TextureCache::new(Arc::new(assets.clone()), &EngineConfig::deterministic());
        (cache, assets)
    }

    #[test]
    fn clones_share_pixels_but_not_settings() {
        let (cache, _assets) = cache_with("tex.png", png_bytes(2, 2));

        let a = cache
            .get_or_load_clone("tex.png", |t| t.wrap_mode = WrapMode::Clamp)
            .unwrap();
        let b = cache
            .get_or_load_clone("tex.png", |t| {
                t.wrap_mode = WrapMode::Mirror;
                t.color_space = SourceColorSpace::Srgb;
            })
            .unwrap();

        assert!(a.shares_pixels_with(&b));
        assert_eq!(a.wrap_mode, WrapMode::Clamp);
        assert_eq!(b.wrap_mode, WrapMode::Mirror);
        assert_eq!(cache.decode_count(), 1);
    }

    #[test]
    fn concurrent_requests_perform_one_decode() {
        let (cache, _assets) = cache_with("tex.png", png_bytes(4, 4));
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get_or_load("tex.png").unwrap().width)
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 4);
        }
        assert_eq!(cache.decode_count(), 1);
    }

    #[test]
    fn decode_failure_evicts_and_allows_retry() {
        let (cache, assets) = cache_with("tex.png", b"not an image".to_vec());

        assert!(cache.get_or_load("tex.png").is_err());

        // Fixed bytes: the evicted entry must be retryable.
        assets.insert("tex.png", png_bytes(1, 1));
        let image = cache.get_or_load("tex.png").unwrap();
        assert_eq!((image.width, image.height), (1, 1));
    }

    #[test]
    fn hdr_uses_dedicated_float_path() {
        let (cache, _assets) = cache_with("env.hdr", hdr_bytes());
        let image = cache.get_or_load("env.hdr").unwrap();
        assert_eq!((image.width, image.height), (2, 1));
        assert!(matches!(image.pixels, PixelData::RgbaF32(_)));
    }

    #[test]
    fn applies_are_batched_per_tick() {
        let (cache, _assets) = cache_with("tex.png", png_bytes(1, 1));
        let counter = Arc::new(Mutex::new(0usize));
        for _ in 0..10 {
            let counter = counter.clone();
            cache.queue_apply(Box::new(move || {
                *counter.lock().unwrap() += 1;
            }));
        }

        assert_eq!(cache.pump_applies(), 6);
        assert_eq!(*counter.lock().unwrap(), 6);
        assert_eq!(cache.pending_applies(), 4);
        assert_eq!(cache.pump_applies(), 4);
        assert_eq!(*counter.lock().unwrap(), 10);
    }

    #[test]
    fn background_worker_produces_same_result() {
        let assets = MemoryAssets::new();
        assets.insert("tex.png", png_bytes(3, 3));
        let config = EngineConfig {
            background_decode: true,
            ..EngineConfig::deterministic()
        };
        let cache = TextureCache::new(Arc::new(assets), &config);
        let image = cache.get_or_load("tex.png").unwrap();
        assert_eq!((image.width, image.height), (3, 3));
    }
}
