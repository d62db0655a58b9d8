use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use image::RgbaImage;
use rayon::prelude::*;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::{
    HeatmapError, TILE_SIZE_METERS,
    engine::HeatmapTileEngine,
    geo::HeatPoint,
    render::{self, CancelToken, RenderParams},
    tile::{Tile, build_tiles, sort_tiles},
};

struct RenderedTile {
    fingerprint: u64,
    image: Arc<RgbaImage>,
}

/// Fingerprint of the points that can reach a tile, so a tile is only redrawn
/// when its own neighbourhood changed.
fn fingerprint(points: &[HeatPoint]) -> u64 {
    let mut bytes = Vec::with_capacity(points.len() * 24);
    for point in points {
        bytes.extend_from_slice(&point.lat.to_le_bytes());
        bytes.extend_from_slice(&point.lng.to_le_bytes());
        bytes.extend_from_slice(&point.radius_m.to_le_bytes());
    }
    xxh3_64(&bytes)
}

/// Tracks what the map shows and keeps the bitmaps of visible heat tiles
/// current.
pub struct MapViewportController {
    engine: Arc<HeatmapTileEngine>,
    tile_size_m: f64,
    params: RenderParams,
    points: Vec<HeatPoint>,
    tiles: HashSet<Tile>,
    viewport: Option<Tile>,
    rendered: HashMap<Tile, RenderedTile>,
}

impl MapViewportController {
    pub fn new(
        engine: Arc<HeatmapTileEngine>,
        tile_size_m: f64,
        params: RenderParams,
    ) -> MapViewportController {
        MapViewportController {
            engine,
            tile_size_m,
            params,
            points: vec![],
            tiles: HashSet::new(),
            viewport: None,
            rendered: HashMap::new(),
        }
    }

    pub fn with_defaults(engine: Arc<HeatmapTileEngine>) -> MapViewportController {
        MapViewportController::new(engine, TILE_SIZE_METERS, RenderParams::default())
    }

    /// Replaces the point set and recomputes the tile grid. Bitmaps of tiles
    /// that no longer exist are dropped.
    pub fn set_points(&mut self, points: Vec<HeatPoint>) -> Result<(), HeatmapError> {
        self.tiles = build_tiles(&points, self.tile_size_m, self.params.padding_m)?;
        self.points = points;
        let tiles = &self.tiles;
        self.rendered.retain(|tile, _| tiles.contains(tile));
        debug!(
            "Heatmap has {} point(s) over {} tile(s)",
            self.points.len(),
            self.tiles.len()
        );
        Ok(())
    }

    pub fn set_viewport(&mut self, viewport: Tile) {
        self.viewport = Some(viewport);
    }

    pub fn tiles(&self) -> &HashSet<Tile> {
        &self.tiles
    }

    /// Tiles touching the viewport, top row first.
    pub fn visible_tiles(&self) -> Vec<Tile> {
        let Some(viewport) = self.viewport else {
            return vec![];
        };
        let mut visible: Vec<Tile> = self
            .tiles
            .iter()
            .filter(|tile| tile.intersects(&viewport))
            .copied()
            .collect();
        sort_tiles(&mut visible);
        visible
    }

    pub fn refresh(&mut self) -> Result<Vec<Tile>, HeatmapError> {
        self.refresh_cancellable(&CancelToken::new())
    }

    /// Re-renders visible tiles whose points changed since their last render
    /// and returns them. Nothing is updated if `cancel` fires midway.
    pub fn refresh_cancellable(&mut self, cancel: &CancelToken) -> Result<Vec<Tile>, HeatmapError> {
        let mut stale = vec![];
        for tile in self.visible_tiles() {
            let points = render::relevant_points(&tile, &self.points, &self.params)?;
            let fingerprint = fingerprint(&points);
            let current = self
                .rendered
                .get(&tile)
                .is_some_and(|rendered| rendered.fingerprint == fingerprint);
            if !current {
                stale.push((tile, points, fingerprint));
            }
        }
        if stale.is_empty() {
            return Ok(vec![]);
        }

        let engine = &self.engine;
        let params = &self.params;
        let results: Vec<(Tile, u64, Result<Arc<RgbaImage>, HeatmapError>)> = stale
            .into_par_iter()
            .map(|(tile, points, fingerprint)| {
                let image = engine.render_cancellable(&tile, &points, params, cancel);
                (tile, fingerprint, image)
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(HeatmapError::Cancelled);
        }
        let mut updated = Vec::with_capacity(results.len());
        for (tile, fingerprint, image) in results {
            match image {
                Ok(image) => {
                    self.rendered.insert(tile, RenderedTile { fingerprint, image });
                    updated.push(tile);
                }
                Err(e) => {
                    warn!("Could not render heat tile {tile:?}: {e}");
                    return Err(e);
                }
            }
        }
        sort_tiles(&mut updated);
        Ok(updated)
    }

    pub fn image(&self, tile: &Tile) -> Option<Arc<RgbaImage>> {
        self.rendered.get(tile).map(|rendered| rendered.image.clone())
    }
}
