pub mod engine;
pub mod error;
pub mod geo;
pub mod render;
pub mod tile;
pub mod viewport;

pub use error::HeatmapError;

/// Side of one grid tile, in projected metres.
pub const TILE_SIZE_METERS: f64 = 300.0;
/// Bleed around each tile so blobs crossing an edge render identically on both sides.
pub const PADDING_METERS: f64 = 50.0;
/// Output width of one rendered tile.
pub const WIDTH_PX_CORE: u32 = 300;
