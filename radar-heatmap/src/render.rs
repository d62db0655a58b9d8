use std::{
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use image::{Rgba, RgbaImage, imageops};
use tracing::trace;

use crate::{HeatmapError, PADDING_METERS, WIDTH_PX_CORE, geo::HeatPoint, tile::Tile};

/// Intensity multiplier applied before colorizing so a lone point still reads as hot.
pub const HEAT_BOOST: f32 = 2.5;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const DEBUG_BORDER: Rgba<u8> = Rgba([0, 0, 255, 255]);

#[derive(Debug, Clone, Copy)]
pub struct RenderParams {
    /// Output width; height follows the tile's aspect ratio.
    pub width_px: u32,
    pub padding_m: f64,
    /// Output pixels per raster cell along each axis.
    pub downsample: u32,
    /// Gaussian sigma in raster cells. Zero disables the blur.
    pub blur_sigma: f64,
    pub debug_border: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        RenderParams {
            width_px: WIDTH_PX_CORE,
            padding_m: PADDING_METERS,
            downsample: 4,
            blur_sigma: 1.5,
            debug_border: false,
        }
    }
}

impl RenderParams {
    pub fn validate(&self) -> Result<(), HeatmapError> {
        if self.width_px == 0 {
            return Err(HeatmapError::InvalidParameters(
                "width_px must be positive".to_string(),
            ));
        }
        if self.downsample == 0 {
            return Err(HeatmapError::InvalidParameters(
                "downsample must be positive".to_string(),
            ));
        }
        if !(self.padding_m.is_finite() && self.padding_m >= 0.0) {
            return Err(HeatmapError::InvalidParameters(format!(
                "padding_m must not be negative, got {}",
                self.padding_m
            )));
        }
        if !self.blur_sigma.is_finite() {
            return Err(HeatmapError::InvalidParameters(format!(
                "blur_sigma must be finite, got {}",
                self.blur_sigma
            )));
        }
        Ok(())
    }

    fn bits(&self) -> (u32, u64, u32, u64, bool) {
        (
            self.width_px,
            self.padding_m.to_bits(),
            self.downsample,
            self.blur_sigma.to_bits(),
            self.debug_border,
        )
    }
}

impl PartialEq for RenderParams {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for RenderParams {}

impl Hash for RenderParams {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Shared flag a caller flips to abandon an in-flight render.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<(), HeatmapError> {
        if self.is_cancelled() {
            Err(HeatmapError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Raster grid of one render. Cells are aligned to a global lattice of side
/// `cell` metres, so the same cell gets the same value whichever tile draws it.
#[derive(Debug)]
struct Layout {
    cell: f64,
    downsample: u32,
    width_px: u32,
    height_px: u32,
    /// Cells of padding on each side of the core.
    pad: i64,
    /// Global column of the first padded cell, counted eastwards.
    first_col: i64,
    /// Global row of the first padded cell, counted southwards from y = 0.
    first_row: i64,
    cols: usize,
    rows: usize,
}

impl Layout {
    fn new(tile: &Tile, params: &RenderParams) -> Result<Layout, HeatmapError> {
        params.validate()?;
        let metres_per_px = tile.width() / params.width_px as f64;
        let cell = round_micro(metres_per_px * params.downsample as f64);
        if !(cell.is_finite() && cell > 0.0) {
            return Err(HeatmapError::InvalidParameters(format!(
                "tile {tile:?} yields an empty raster"
            )));
        }
        let height_px = ((tile.height() / metres_per_px).round() as u32).max(1);

        let core_cols = params.width_px.div_ceil(params.downsample) as i64;
        let core_rows = height_px.div_ceil(params.downsample) as i64;
        let pad = ((params.padding_m / cell).ceil() as i64)
            .max(gaussian_radius(params.blur_sigma) as i64 + 1);

        Ok(Layout {
            cell,
            downsample: params.downsample,
            width_px: params.width_px,
            height_px,
            pad,
            first_col: (tile.left() / cell).round() as i64 - pad,
            first_row: (-tile.top() / cell).round() as i64 - pad,
            cols: (core_cols + 2 * pad) as usize,
            rows: (core_rows + 2 * pad) as usize,
        })
    }

    fn centre_x(&self, col: i64) -> f64 {
        (col as f64 + 0.5) * self.cell
    }

    fn centre_y(&self, row: i64) -> f64 {
        -(row as f64 + 0.5) * self.cell
    }

    /// Projected extent covered by the padded grid: (left, bottom, right, top).
    fn extent(&self) -> (f64, f64, f64, f64) {
        let last_col = self.first_col + self.cols as i64;
        let last_row = self.first_row + self.rows as i64;
        (
            self.first_col as f64 * self.cell,
            -(last_row as f64) * self.cell,
            last_col as f64 * self.cell,
            -(self.first_row as f64) * self.cell,
        )
    }

    fn touches(&self, point: &HeatPoint) -> bool {
        let p = point.projected();
        let r = self.radius(point);
        let (left, bottom, right, top) = self.extent();
        p.x + r >= left && p.x - r <= right && p.y + r >= bottom && p.y - r <= top
    }

    /// Blobs never shrink below one cell so isolated points stay visible.
    fn radius(&self, point: &HeatPoint) -> f64 {
        point.projected_radius().max(self.cell)
    }
}

fn round_micro(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn gaussian_radius(sigma: f64) -> usize {
    if sigma <= 0.0 {
        0
    } else {
        (3.0 * sigma).ceil() as usize
    }
}

/// Points whose blob reaches the padded render area of `tile`.
pub fn relevant_points(
    tile: &Tile,
    points: &[HeatPoint],
    params: &RenderParams,
) -> Result<Vec<HeatPoint>, HeatmapError> {
    let layout = Layout::new(tile, params)?;
    Ok(points
        .iter()
        .filter(|point| layout.touches(point))
        .copied()
        .collect())
}

/// Renders `tile` at `params.width_px` wide.
pub fn render(
    tile: &Tile,
    points: &[HeatPoint],
    params: &RenderParams,
) -> Result<RgbaImage, HeatmapError> {
    render_cancellable(tile, points, params, &CancelToken::new())
}

/// Like [render], but gives up with [HeatmapError::Cancelled] between stages
/// once `cancel` is set.
pub fn render_cancellable(
    tile: &Tile,
    points: &[HeatPoint],
    params: &RenderParams,
    cancel: &CancelToken,
) -> Result<RgbaImage, HeatmapError> {
    let layout = Layout::new(tile, params)?;
    let points: Vec<&HeatPoint> = points.iter().filter(|p| layout.touches(p)).collect();
    trace!(
        "Rendering {}x{} tile from {} point(s) on a {}x{} grid",
        layout.width_px,
        layout.height_px,
        points.len(),
        layout.cols,
        layout.rows
    );

    if points.is_empty() {
        let mut image = RgbaImage::from_pixel(layout.width_px, layout.height_px, TRANSPARENT);
        if params.debug_border {
            draw_border(&mut image);
        }
        return Ok(image);
    }

    let mut grid = rasterize(&layout, &points);
    cancel.check()?;
    blur(&mut grid, layout.cols, layout.rows, params.blur_sigma);
    cancel.check()?;
    let padded = upsample(&layout, &grid);
    cancel.check()?;

    let offset = (layout.pad as u32) * layout.downsample;
    let mut image =
        imageops::crop_imm(&padded, offset, offset, layout.width_px, layout.height_px).to_image();
    if params.debug_border {
        draw_border(&mut image);
    }
    Ok(image)
}

/// Radial falloff `(1 - t²)²` per point, combined by maximum.
fn rasterize(layout: &Layout, points: &[&HeatPoint]) -> Vec<f32> {
    let mut grid = vec![0.0f32; layout.cols * layout.rows];
    let last_col = layout.first_col + layout.cols as i64 - 1;
    let last_row = layout.first_row + layout.rows as i64 - 1;

    for point in points {
        let p = point.projected();
        let r = layout.radius(point);
        let col_from = (((p.x - r) / layout.cell - 0.5).ceil() as i64).max(layout.first_col);
        let col_to = (((p.x + r) / layout.cell - 0.5).floor() as i64).min(last_col);
        let row_from = ((-(p.y + r) / layout.cell - 0.5).ceil() as i64).max(layout.first_row);
        let row_to = ((-(p.y - r) / layout.cell - 0.5).floor() as i64).min(last_row);

        for row in row_from..=row_to {
            let dy = layout.centre_y(row) - p.y;
            for col in col_from..=col_to {
                let dx = layout.centre_x(col) - p.x;
                let t2 = (dx * dx + dy * dy) / (r * r);
                if t2 >= 1.0 {
                    continue;
                }
                let falloff = (1.0 - t2) * (1.0 - t2);
                let index = (row - layout.first_row) as usize * layout.cols
                    + (col - layout.first_col) as usize;
                grid[index] = grid[index].max(falloff as f32);
            }
        }
    }
    grid
}

fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    let radius = gaussian_radius(sigma) as i64;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|k| (-((k * k) as f64) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| (w / sum) as f32).collect()
}

/// Separable gaussian. Taps falling outside the grid contribute nothing.
fn blur(grid: &mut [f32], cols: usize, rows: usize, sigma: f64) {
    if gaussian_radius(sigma) == 0 {
        return;
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let mut scratch = vec![0.0f32; grid.len()];

    for row in 0..rows {
        for col in 0..cols {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let c = col as i64 + k as i64 - radius;
                if c >= 0 && (c as usize) < cols {
                    acc += weight * grid[row * cols + c as usize];
                }
            }
            scratch[row * cols + col] = acc;
        }
    }
    for row in 0..rows {
        for col in 0..cols {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let r = row as i64 + k as i64 - radius;
                if r >= 0 && (r as usize) < rows {
                    acc += weight * scratch[r as usize * cols + col];
                }
            }
            grid[row * cols + col] = acc;
        }
    }
}

/// Splits a global pixel index into the cell left of its centre and the
/// fractional distance to the next one, measured on the global lattice.
fn sample_position(global_px: i64, downsample: u32) -> (i64, f32) {
    let u = (global_px as f64 + 0.5) / downsample as f64 - 0.5;
    let base = u.floor();
    (base as i64, (u - base) as f32)
}

/// Bilinear upsample of the whole padded grid, colorized.
fn upsample(layout: &Layout, grid: &[f32]) -> RgbaImage {
    let d = layout.downsample;
    let width = layout.cols as u32 * d;
    let height = layout.rows as u32 * d;
    let first_px_x = layout.first_col * d as i64;
    let first_px_y = layout.first_row * d as i64;
    let clamp_col = |c: i64| (c - layout.first_col).clamp(0, layout.cols as i64 - 1) as usize;
    let clamp_row = |r: i64| (r - layout.first_row).clamp(0, layout.rows as i64 - 1) as usize;

    let columns: Vec<(usize, usize, f32)> = (0..width as i64)
        .map(|i| {
            let (c, fx) = sample_position(first_px_x + i, d);
            (clamp_col(c), clamp_col(c + 1), fx)
        })
        .collect();

    let mut image = RgbaImage::new(width, height);
    for j in 0..height {
        let (r, fy) = sample_position(first_px_y + j as i64, d);
        let (r0, r1) = (clamp_row(r), clamp_row(r + 1));
        for (i, &(c0, c1, fx)) in columns.iter().enumerate() {
            let top = lerp(grid[r0 * layout.cols + c0], grid[r0 * layout.cols + c1], fx);
            let bottom = lerp(grid[r1 * layout.cols + c0], grid[r1 * layout.cols + c1], fx);
            image.put_pixel(i as u32, j, colorize(lerp(top, bottom, fy)));
        }
    }
    image
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Green at the faint edge through red at full heat, alpha following intensity.
pub fn colorize(value: f32) -> Rgba<u8> {
    if value <= 0.0 {
        return TRANSPARENT;
    }
    let heat = (value * HEAT_BOOST).clamp(0.0, 1.0);
    let channel = |v: f32| (v * 255.0).round() as u8;
    Rgba([channel(heat), channel(1.0 - heat), 0, channel(heat)])
}

fn draw_border(image: &mut RgbaImage) {
    let (width, height) = image.dimensions();
    for x in 0..width {
        image.put_pixel(x, 0, DEBUG_BORDER);
        image.put_pixel(x, height - 1, DEBUG_BORDER);
    }
    for y in 0..height {
        image.put_pixel(0, y, DEBUG_BORDER);
        image.put_pixel(width - 1, y, DEBUG_BORDER);
    }
}
