//! Bounded FIFO cache of viewport-sized preview bitmaps.
//!
//! Every cached bitmap was resampled for one particular viewport size, so a
//! change of viewport invalidates the whole cache at once. Eviction is strict
//! insertion order: a hit never refreshes an entry.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbaImage;

use stackfuse_common::error::FocusResult;

/// Number of bitmaps a single preview surface keeps.
pub const PREVIEW_CACHE_CAPACITY: usize = 5;

/// Size of the surface previews are rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Preview pixels per source pixel for a `width` x `height` source.
    ///
    /// Never above 1.0 since previews are only ever downscaled.
    pub fn fit_scale(&self, width: u32, height: u32) -> f64 {
        if width == 0 || height == 0 {
            return 1.0;
        }
        let sx = self.width as f64 / width as f64;
        let sy = self.height as f64 / height as f64;
        sx.min(sy).min(1.0)
    }
}

/// Fixed-capacity ring of `(key, bitmap)` slots.
#[derive(Debug)]
pub struct PreviewCache<K, B> {
    slots: Vec<Option<(K, B)>>,
    head: usize,
    last_viewport: Option<ViewportSize>,
}

impl<K: PartialEq, B> Default for PreviewCache<K, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq, B> PreviewCache<K, B> {
    pub fn new() -> Self {
        Self {
            slots: (0..PREVIEW_CACHE_CAPACITY).map(|_| None).collect(),
            head: 0,
            last_viewport: None,
        }
    }

    /// Look up `key` for the given viewport.
    ///
    /// A viewport different from the last one seen clears every slot first,
    /// so the lookup misses.
    pub fn lookup(&mut self, key: &K, viewport: ViewportSize) -> Option<&B> {
        let slot = self.find(key, viewport)?;
        self.slots[slot].as_ref().map(|(_, bitmap)| bitmap)
    }

    /// Store a bitmap at the head slot and advance the head.
    ///
    /// An entry already cached under `key` is replaced where it sits.
    pub fn insert(&mut self, key: K, bitmap: B) {
        self.insert_at_head(key, bitmap);
    }

    /// Return the cached bitmap or produce, store, and return it.
    pub fn get_or_insert_with<E>(
        &mut self,
        key: K,
        viewport: ViewportSize,
        load: impl FnOnce() -> Result<B, E>,
    ) -> Result<&B, E> {
        let slot = match self.find(&key, viewport) {
            Some(slot) => slot,
            None => {
                let bitmap = load()?;
                self.insert_at_head(key, bitmap)
            }
        };
        Ok(self.slots[slot]
            .as_ref()
            .map(|(_, bitmap)| bitmap)
            .unwrap_or_else(|| unreachable!("slot {slot} was just filled")))
    }

    /// Drop every entry. The recorded viewport is kept.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached, without touching the viewport state.
    pub fn contains(&self, key: &K) -> bool {
        self.position(key).is_some()
    }

    /// Viewport recorded by the most recent lookup.
    pub fn viewport(&self) -> Option<ViewportSize> {
        self.last_viewport
    }

    fn find(&mut self, key: &K, viewport: ViewportSize) -> Option<usize> {
        if self.last_viewport != Some(viewport) {
            if self.last_viewport.is_some() {
                tracing::debug!(
                    width = viewport.width,
                    height = viewport.height,
                    "Viewport changed, clearing preview cache"
                );
            }
            self.clear();
            self.last_viewport = Some(viewport);
            return None;
        }
        self.position(key)
    }

    fn position(&self, key: &K) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some((k, _)) if k == key))
    }

    fn insert_at_head(&mut self, key: K, bitmap: B) -> usize {
        if let Some(slot) = self.position(&key) {
            self.slots[slot] = Some((key, bitmap));
            return slot;
        }
        let slot = self.head;
        self.slots[slot] = Some((key, bitmap));
        self.head = (self.head + 1) % PREVIEW_CACHE_CAPACITY;
        slot
    }
}

/// Downscale `image` to fit inside `viewport`, keeping its aspect ratio.
///
/// Images that already fit are returned unchanged.
pub fn fit_to_viewport(image: &RgbaImage, viewport: ViewportSize) -> RgbaImage {
    let (w, h) = image.dimensions();
    let scale = viewport.fit_scale(w, h);
    if scale >= 1.0 {
        return image.clone();
    }
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(image, nw, nh, FilterType::Lanczos3)
}

/// Decode `path` at full resolution and fit it to `viewport`.
pub fn load_preview(path: &Path, viewport: ViewportSize) -> FocusResult<RgbaImage> {
    let decoded = image::open(path)?.to_rgba8();
    Ok(fit_to_viewport(&decoded, viewport))
}

/// The preview panes of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSurface {
    /// Source image as loaded.
    Input,
    /// Aligned or masked intermediate.
    Aligned,
    /// Fused result.
    Stacked,
}

/// One independent cache per preview pane.
#[derive(Debug, Default)]
pub struct PreviewSurfaces {
    input: PreviewCache<PathBuf, RgbaImage>,
    aligned: PreviewCache<PathBuf, RgbaImage>,
    stacked: PreviewCache<PathBuf, RgbaImage>,
}

impl PreviewSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_mut(&mut self, surface: PreviewSurface) -> &mut PreviewCache<PathBuf, RgbaImage> {
        match surface {
            PreviewSurface::Input => &mut self.input,
            PreviewSurface::Aligned => &mut self.aligned,
            PreviewSurface::Stacked => &mut self.stacked,
        }
    }

    /// Cached preview of `path` on `surface`, decoding it on a miss.
    pub fn preview(
        &mut self,
        surface: PreviewSurface,
        path: &Path,
        viewport: ViewportSize,
    ) -> FocusResult<&RgbaImage> {
        self.cache_mut(surface)
            .get_or_insert_with(path.to_path_buf(), viewport, || {
                tracing::debug!(path = %path.display(), ?surface, "Preview cache miss");
                load_preview(path, viewport)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEW: ViewportSize = ViewportSize {
        width: 640,
        height: 480,
    };

    fn filled(keys: std::ops::Range<u32>) -> PreviewCache<u32, String> {
        let mut cache = PreviewCache::new();
        assert!(cache.lookup(&u32::MAX, VIEW).is_none());
        for k in keys {
            cache.insert(k, format!("bitmap-{k}"));
        }
        cache
    }

    #[test]
    fn sixth_insert_evicts_the_first() {
        let mut cache = filled(1..7);
        assert_eq!(cache.len(), PREVIEW_CACHE_CAPACITY);
        assert!(cache.lookup(&1, VIEW).is_none());
        for k in 2..7 {
            assert_eq!(cache.lookup(&k, VIEW), Some(&format!("bitmap-{k}")));
        }
    }

    #[test]
    fn hits_do_not_refresh_entries() {
        let mut cache = filled(1..6);
        assert!(cache.lookup(&1, VIEW).is_some());
        cache.insert(6, "bitmap-6".to_string());
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
    }

    #[test]
    fn viewport_change_clears_everything() {
        let mut cache = filled(1..6);
        let wider = ViewportSize::new(1024, 480);
        for k in 1..6 {
            assert!(cache.lookup(&k, wider).is_none());
        }
        assert!(cache.is_empty());

        cache.insert(1, "again".to_string());
        assert!(cache.lookup(&1, VIEW).is_none());
        assert!(cache.lookup(&1, wider).is_none());
    }

    #[test]
    fn reinserting_a_key_replaces_in_place() {
        let mut cache = filled(1..4);
        cache.insert(2, "fresh".to_string());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.lookup(&2, VIEW).map(String::as_str), Some("fresh"));
    }

    #[test]
    fn get_or_insert_with_loads_once() {
        let mut cache: PreviewCache<&str, u32> = PreviewCache::new();
        let mut loads = 0;
        for _ in 0..3 {
            let value = cache
                .get_or_insert_with("a", VIEW, || {
                    loads += 1;
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn load_errors_leave_cache_untouched() {
        let mut cache: PreviewCache<&str, u32> = PreviewCache::new();
        let result = cache.get_or_insert_with("a", VIEW, || Err("decode failed"));
        assert_eq!(result, Err("decode failed"));
        assert!(cache.is_empty());
    }

    #[test]
    fn fit_preserves_aspect_and_never_upscales() {
        let big = RgbaImage::new(1600, 800);
        let fitted = fit_to_viewport(&big, VIEW);
        assert_eq!(fitted.dimensions(), (640, 320));

        let small = RgbaImage::new(100, 50);
        assert_eq!(fit_to_viewport(&small, VIEW).dimensions(), (100, 50));
    }

    #[test]
    fn surfaces_are_independent() {
        let mut surfaces = PreviewSurfaces::new();
        surfaces
            .cache_mut(PreviewSurface::Input)
            .get_or_insert_with(PathBuf::from("a.png"), VIEW, || {
                Ok::<_, ()>(RgbaImage::new(1, 1))
            })
            .unwrap();
        assert!(surfaces
            .cache_mut(PreviewSurface::Input)
            .contains(&PathBuf::from("a.png")));
        assert!(surfaces.cache_mut(PreviewSurface::Stacked).is_empty());
    }
}
