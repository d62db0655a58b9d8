use std::{
    collections::HashSet,
    hash::{Hash, Hasher},
};

use crate::{
    HeatmapError,
    geo::{GeoPoint, HeatPoint, Projected, scale_at},
};

/// Rectangle in projected metres. `top > bottom` and `right > left`.
#[derive(Debug, Clone, Copy)]
pub struct Tile {
    left: f64,
    bottom: f64,
    right: f64,
    top: f64,
}

impl Tile {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Result<Tile, HeatmapError> {
        if ![left, bottom, right, top].iter().all(|v| v.is_finite()) {
            return Err(HeatmapError::InvalidParameters(
                "tile bounds must be finite".to_string(),
            ));
        }
        if right <= left || top <= bottom {
            return Err(HeatmapError::InvalidParameters(format!(
                "tile is not well-formed: left {left}, bottom {bottom}, right {right}, top {top}"
            )));
        }
        Ok(Tile {
            left,
            bottom,
            right,
            top,
        })
    }

    /// Tile between two geographic corners, as the map reports its viewport.
    pub fn from_corners(top_left: GeoPoint, bottom_right: GeoPoint) -> Result<Tile, HeatmapError> {
        let top_left = top_left.project();
        let bottom_right = bottom_right.project();
        Tile::new(top_left.x, bottom_right.y, bottom_right.x, top_left.y)
    }

    /// Cell `(ix, iy)` of the global grid with side `size`.
    pub fn grid(ix: i64, iy: i64, size: f64) -> Tile {
        Tile {
            left: ix as f64 * size,
            bottom: iy as f64 * size,
            right: (ix + 1) as f64 * size,
            top: (iy + 1) as f64 * size,
        }
    }

    pub fn left(&self) -> f64 {
        self.left
    }

    pub fn bottom(&self) -> f64 {
        self.bottom
    }

    pub fn right(&self) -> f64 {
        self.right
    }

    pub fn top(&self) -> f64 {
        self.top
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn top_left(&self) -> GeoPoint {
        Projected {
            x: self.left,
            y: self.top,
        }
        .unproject()
    }

    pub fn bottom_right(&self) -> GeoPoint {
        Projected {
            x: self.right,
            y: self.bottom,
        }
        .unproject()
    }

    pub fn padded(&self, padding: f64) -> Tile {
        Tile {
            left: self.left - padding,
            bottom: self.bottom - padding,
            right: self.right + padding,
            top: self.top + padding,
        }
    }

    /// Edges count as inside.
    pub fn contains(&self, point: Projected, padding: f64) -> bool {
        point.x >= self.left - padding
            && point.x <= self.right + padding
            && point.y >= self.bottom - padding
            && point.y <= self.top + padding
    }

    pub fn contains_point(&self, point: &HeatPoint, padding: f64) -> bool {
        self.contains(point.projected(), padding)
    }

    /// Touching tiles intersect.
    pub fn intersects(&self, other: &Tile) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.bottom <= other.top
            && other.bottom <= self.top
    }

    fn bits(&self) -> [u64; 4] {
        [
            self.left.to_bits(),
            self.bottom.to_bits(),
            self.right.to_bits(),
            self.top.to_bits(),
        ]
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Tile {}

impl Hash for Tile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Top row first, then west to east.
pub fn sort_tiles(tiles: &mut [Tile]) {
    tiles.sort_by(|a, b| b.top.total_cmp(&a.top).then(a.left.total_cmp(&b.left)));
}

/// Projected distance a point's drawing can reach: its blob or `padding_m`
/// ground metres, whichever is larger, scaled for the point's latitude.
fn reach(point: &HeatPoint, padding_m: f64) -> f64 {
    point.radius_m.max(padding_m) * scale_at(point.lat)
}

/// Grid tiles covering every point together with its padded surroundings.
/// A point close to an edge or corner also yields the neighbouring tiles its
/// padding reaches into. Padding is in ground metres, so away from the
/// equator it reaches further in projected metres.
pub fn build_tiles(
    points: &[HeatPoint],
    tile_size_m: f64,
    padding_m: f64,
) -> Result<HashSet<Tile>, HeatmapError> {
    if !(tile_size_m.is_finite() && tile_size_m > 0.0) {
        return Err(HeatmapError::InvalidParameters(format!(
            "tile size must be positive, got {tile_size_m}"
        )));
    }
    if !(padding_m.is_finite() && padding_m >= 0.0) {
        return Err(HeatmapError::InvalidParameters(format!(
            "padding must not be negative, got {padding_m}"
        )));
    }

    let mut tiles = HashSet::new();
    for point in points {
        let p = point.projected();
        let r = reach(point, padding_m);
        let first_x = ((p.x - r) / tile_size_m).floor() as i64;
        let last_x = ((p.x + r) / tile_size_m).floor() as i64;
        let first_y = ((p.y - r) / tile_size_m).floor() as i64;
        let last_y = ((p.y + r) / tile_size_m).floor() as i64;
        for ix in first_x..=last_x {
            for iy in first_y..=last_y {
                tiles.insert(Tile::grid(ix, iy, tile_size_m));
            }
        }
    }
    Ok(tiles)
}

/// Smallest tile holding every point's padded surroundings, or `None` for no
/// points.
pub fn bounding_tile(points: &[HeatPoint], padding_m: f64) -> Option<Tile> {
    let padding_m = padding_m.max(f64::EPSILON);
    let mut extents = points.iter().map(|point| {
        let p = point.projected();
        let r = reach(point, padding_m);
        (p.x - r, p.y - r, p.x + r, p.y + r)
    });
    let (mut left, mut bottom, mut right, mut top) = extents.next()?;
    for (l, b, r, t) in extents {
        left = left.min(l);
        bottom = bottom.min(b);
        right = right.max(r);
        top = top.max(t);
    }
    Tile::new(left, bottom, right, top).ok()
}

#[cfg(test)]
mod test {
    use crate::{
        geo::{GeoPoint, HeatPoint, Projected, scale_at},
        render::{RenderParams, render},
    };

    use super::{Tile, bounding_tile, build_tiles, sort_tiles};

    #[test]
    fn malformed_tiles_are_rejected() {
        assert!(Tile::new(0.0, 10.0, 10.0, 0.0).is_err());
        assert!(Tile::new(10.0, 0.0, 0.0, 10.0).is_err());
        assert!(Tile::new(0.0, 0.0, f64::NAN, 10.0).is_err());
        assert!(Tile::from_corners(GeoPoint::new(10.0, 0.0), GeoPoint::new(20.0, 1.0)).is_err());
    }

    #[test]
    fn corners_round_trip() {
        let tile = Tile::from_corners(GeoPoint::new(52.6, 13.3), GeoPoint::new(52.4, 13.5)).unwrap();
        assert!((tile.top_left().lat - 52.6).abs() < 1e-9);
        assert!((tile.bottom_right().lng - 13.5).abs() < 1e-9);
    }

    #[test]
    fn touching_tiles_intersect() {
        let a = Tile::grid(0, 0, 300.0);
        assert!(a.intersects(&Tile::grid(1, 0, 300.0)));
        assert!(a.intersects(&Tile::grid(1, 1, 300.0)));
        assert!(a.intersects(&a));
        assert!(!a.intersects(&Tile::grid(2, 0, 300.0)));
    }

    #[test]
    fn contains_includes_edges_and_padding() {
        let tile = Tile::grid(0, 0, 300.0);
        assert!(tile.contains(Projected { x: 300.0, y: 0.0 }, 0.0));
        assert!(!tile.contains(Projected { x: 320.0, y: 10.0 }, 0.0));
        assert!(tile.contains(Projected { x: 320.0, y: 10.0 }, 50.0));
    }

    #[test]
    fn every_padded_extent_is_covered() {
        let points: Vec<HeatPoint> = (0..40)
            .map(|i| HeatPoint::at(52.5 + i as f64 * 0.0007, 13.4 + i as f64 * 0.0013))
            .collect();
        let padding = 50.0;
        let tiles = build_tiles(&points, 300.0, padding).unwrap();

        for point in &points {
            let p = point.projected();
            let reach = padding * scale_at(point.lat);
            for (dx, dy) in [(-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0), (1.0, 1.0), (0.0, 0.0)] {
                let corner = Projected {
                    x: p.x + dx * reach,
                    y: p.y + dy * reach,
                };
                assert!(tiles.iter().any(|t| t.contains(corner, 0.0)));
            }
        }
    }

    #[test]
    fn point_near_corner_pulls_in_neighbours() {
        let size = 300.0;
        let near_corner = Projected { x: 3.0 * size - 10.0, y: 5.0 * size - 10.0 }.unproject();
        let point = HeatPoint::at(near_corner.lat, near_corner.lng);

        let tiles = build_tiles(&[point], size, 50.0).unwrap();
        assert_eq!(tiles.len(), 4);
        assert!(tiles.contains(&Tile::grid(3, 5, size)));

        let centred = Projected { x: 2.5 * size, y: 4.5 * size }.unproject();
        let tiles = build_tiles(&[HeatPoint::at(centred.lat, centred.lng)], size, 50.0).unwrap();
        assert_eq!(tiles.len(), 1);
    }

    #[test]
    fn blobs_only_light_emitted_tiles() {
        let size = 300.0;
        // lat ~47.4, 60 projected metres west of the tile edge
        let near_edge = Projected { x: 3_000_240.0, y: 6_000_150.0 }.unproject();
        let point = HeatPoint::at(near_edge.lat, near_edge.lng);
        assert!(point.projected_radius() > 60.0);

        let tiles = build_tiles(&[point], size, 50.0).unwrap();
        assert!(tiles.contains(&Tile::grid(10_000, 20_000, size)));
        assert!(tiles.contains(&Tile::grid(10_001, 20_000, size)));

        let params = RenderParams::default();
        for ix in 9_999..=10_002 {
            for iy in 19_999..=20_001 {
                let tile = Tile::grid(ix, iy, size);
                let lit = render(&tile, &[point], &params)
                    .unwrap()
                    .pixels()
                    .filter(|px| px[3] > 0)
                    .count();
                if tiles.contains(&tile) {
                    assert!(lit > 0, "{tile:?} emitted but blank");
                } else {
                    assert_eq!(lit, 0, "{tile:?} lit but not emitted");
                }
            }
        }
    }

    #[test]
    fn invalid_grid_parameters() {
        assert!(build_tiles(&[], 0.0, 50.0).is_err());
        assert!(build_tiles(&[], 300.0, -1.0).is_err());
        assert!(build_tiles(&[], 300.0, 0.0).unwrap().is_empty());
    }

    #[test]
    fn bounding_tile_holds_all_points() {
        let points = vec![HeatPoint::at(52.5, 13.4), HeatPoint::at(52.51, 13.42)];
        let tile = bounding_tile(&points, 50.0).unwrap();
        for point in &points {
            assert!(tile.contains_point(point, 0.0));
            assert!(tile.contains(point.projected(), -50.0 * scale_at(point.lat) + 1e-6));
        }
        assert!(bounding_tile(&[], 50.0).is_none());
    }

    #[test]
    fn sorted_top_to_bottom_west_to_east() {
        let mut tiles = vec![Tile::grid(1, 0, 1.0), Tile::grid(0, 1, 1.0), Tile::grid(0, 0, 1.0)];
        sort_tiles(&mut tiles);
        assert_eq!(tiles, vec![Tile::grid(0, 1, 1.0), Tile::grid(0, 0, 1.0), Tile::grid(1, 0, 1.0)]);
    }
}
