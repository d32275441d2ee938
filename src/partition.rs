// src/partition.rs

//! Geometry of a render: the coordinate domain, its split into strips and
//! chunks, and the dimensions of every pyramid level.

use crate::config::RenderConfig;
use anyhow::{bail, Result};
use std::ops::Range;

/// The coordinate rectangle being rendered and its pixel resolution.
///
/// Field row 0 sits at `y_min`; the image is therefore computed bottom-up
/// and flipped when strips are cut into tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub width: usize,
    pub height: usize,
}

impl Domain {
    /// Builds the domain for an integer scale factor. Resolution grows
    /// linearly with the scale along both axes.
    pub fn from_scale(render: &RenderConfig, scale: u32) -> Result<Self> {
        if scale == 0 {
            bail!("Scale factor must be positive");
        }
        Ok(Domain {
            x_min: render.x_min,
            x_max: render.x_max,
            y_min: render.y_min,
            y_max: render.y_max,
            width: render.base_width * scale as usize,
            height: render.base_height * scale as usize,
        })
    }

    /// Coordinate of pixel column `col`; both bounds are sampled.
    pub fn x_at(&self, col: usize) -> f64 {
        lerp_inclusive(self.x_min, self.x_max, col, self.width)
    }

    /// Coordinate of field row `row`; both bounds are sampled.
    pub fn y_at(&self, row: usize) -> f64 {
        lerp_inclusive(self.y_min, self.y_max, row, self.height)
    }

    pub fn x_axis(&self, cols: Range<usize>) -> Vec<f64> {
        cols.map(|c| self.x_at(c)).collect()
    }

    pub fn y_axis(&self, rows: Range<usize>) -> Vec<f64> {
        rows.map(|r| self.y_at(r)).collect()
    }

    pub fn levels(&self) -> LevelGeometry {
        LevelGeometry::new(self.width, self.height)
    }
}

fn lerp_inclusive(lo: f64, hi: f64, index: usize, count: usize) -> f64 {
    if count <= 1 {
        return lo;
    }
    lo + (hi - lo) * (index as f64) / ((count - 1) as f64)
}

/// A horizontal band of field rows, the unit of checkpointing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strip {
    pub index: usize,
    pub rows: Range<usize>,
}

impl Strip {
    pub fn height(&self) -> usize {
        self.rows.len()
    }
}

/// Splits the vertical extent into strips of `tile_size` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripGrid {
    height: usize,
    tile_size: usize,
}

impl StripGrid {
    pub fn new(height: usize, tile_size: usize) -> Self {
        assert!(tile_size > 0, "tile size must be positive");
        StripGrid { height, tile_size }
    }

    pub fn count(&self) -> usize {
        self.height.div_ceil(self.tile_size)
    }

    pub fn strip(&self, index: usize) -> Strip {
        let start = (index * self.tile_size).min(self.height);
        let end = ((index + 1) * self.tile_size).min(self.height);
        Strip {
            index,
            rows: start..end,
        }
    }

    pub fn strips(&self) -> impl Iterator<Item = Strip> + '_ {
        (0..self.count()).map(move |i| self.strip(i))
    }

    /// Tile row a strip lands on once flipped: strip 0 is the bottom row.
    pub fn tile_row(&self, strip_index: usize) -> usize {
        self.count() - 1 - strip_index
    }
}

/// Splits the full width into column bands reused by every strip.
///
/// Bands are `ceil(width / requested)` wide; when that leaves trailing bands
/// empty the grid shrinks to the bands that actually hold columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGrid {
    width: usize,
    band: usize,
    count: usize,
}

impl ChunkGrid {
    pub fn new(width: usize, requested: usize) -> Self {
        assert!(requested > 0, "chunk count must be positive");
        let band = width.div_ceil(requested).max(1);
        let count = width.div_ceil(band);
        ChunkGrid { width, band, count }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn columns(&self, index: usize) -> Range<usize> {
        let start = (index * self.band).min(self.width);
        let end = ((index + 1) * self.band).min(self.width);
        start..end
    }

    pub fn chunks(&self) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        (0..self.count).map(move |i| (i, self.columns(i)))
    }
}

/// Dimensions of every level of the tile pyramid. Level `max_level` is full
/// resolution, level 0 the coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelGeometry {
    width: usize,
    height: usize,
    max_level: u32,
}

impl LevelGeometry {
    pub fn new(width: usize, height: usize) -> Self {
        let largest = width.max(height).max(1);
        // Smallest L with 2^L >= largest.
        let max_level = largest.next_power_of_two().trailing_zeros();
        LevelGeometry {
            width,
            height,
            max_level,
        }
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn dimensions(&self, level: u32) -> (usize, usize) {
        let shift = self.max_level.saturating_sub(level);
        let scale = 1usize << shift;
        (
            self.width.div_ceil(scale).max(1),
            self.height.div_ceil(scale).max(1),
        )
    }

    /// Tile columns and rows needed to cover a level.
    pub fn tile_grid(&self, level: u32, tile_size: usize) -> (usize, usize) {
        let (w, h) = self.dimensions(level);
        (w.div_ceil(tile_size), h.div_ceil(tile_size))
    }

    /// Pixel extent of one tile, narrower than `tile_size` on the right and
    /// bottom edges.
    pub fn tile_extent(&self, level: u32, tile_size: usize, col: usize, row: usize) -> (usize, usize) {
        let (w, h) = self.dimensions(level);
        (
            w.saturating_sub(col * tile_size).min(tile_size),
            h.saturating_sub(row * tile_size).min(tile_size),
        )
    }
}
