use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use image::RgbaImage;
use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    HeatmapError,
    geo::HeatPoint,
    render::{self, CancelToken, RenderParams},
    tile::Tile,
};

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Everything a rendered bitmap depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RenderKey {
    tile: Tile,
    points: Vec<HeatPoint>,
    params: RenderParams,
}

/// Renders heat tiles and keeps the most recent ones in a bounded LRU cache.
///
/// Renders run outside the cache lock, so independent tiles can be drawn
/// from several threads at once.
pub struct HeatmapTileEngine {
    cache: Mutex<LruCache<RenderKey, Arc<RgbaImage>>>,
    renders: AtomicUsize,
}

impl Default for HeatmapTileEngine {
    fn default() -> Self {
        HeatmapTileEngine::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl HeatmapTileEngine {
    pub fn new(capacity: usize) -> HeatmapTileEngine {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        HeatmapTileEngine {
            cache: Mutex::new(LruCache::new(capacity)),
            renders: AtomicUsize::new(0),
        }
    }

    pub fn render(
        &self,
        tile: &Tile,
        points: &[HeatPoint],
        params: &RenderParams,
    ) -> Result<Arc<RgbaImage>, HeatmapError> {
        self.render_cancellable(tile, points, params, &CancelToken::new())
    }

    /// A cancelled render leaves the cache untouched.
    pub fn render_cancellable(
        &self,
        tile: &Tile,
        points: &[HeatPoint],
        params: &RenderParams,
        cancel: &CancelToken,
    ) -> Result<Arc<RgbaImage>, HeatmapError> {
        let key = RenderKey {
            tile: *tile,
            points: points.to_vec(),
            params: *params,
        };
        if let Some(image) = self.cache.lock().get(&key) {
            return Ok(image.clone());
        }

        self.renders.fetch_add(1, Ordering::Relaxed);
        let image = Arc::new(render::render_cancellable(tile, points, params, cancel)?);
        if cancel.is_cancelled() {
            debug!("Dropping render of {tile:?}, cancelled");
            return Err(HeatmapError::Cancelled);
        }
        self.cache.lock().put(key, image.clone());
        Ok(image)
    }

    /// Renders every tile in parallel, results in input order.
    pub fn render_all(
        &self,
        tiles: &[Tile],
        points: &[HeatPoint],
        params: &RenderParams,
    ) -> Vec<(Tile, Result<Arc<RgbaImage>, HeatmapError>)> {
        tiles
            .par_iter()
            .map(|tile| (*tile, self.render(tile, points, params)))
            .collect()
    }

    /// Number of full rasterizations performed so far.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
