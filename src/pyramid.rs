// src/pyramid.rs

//! Builds the coarser pyramid levels from the base level, one level at a
//! time, each tile from the 2×2 block of tiles below it.

use crate::control::{ControlState, Gate};
use crate::kernel::DownsampleKernel;
use crate::partition::LevelGeometry;
use crate::tiles::{TileCoord, TileStore};
use anyhow::{anyhow, ensure, Context, Result};
use image::{imageops, RgbImage};
use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidOutcome {
    Completed,
    /// Stopped on request; levels above `next_level` are complete.
    Saved { next_level: u32 },
}

pub struct PyramidBuilder {
    store: TileStore,
    levels: LevelGeometry,
    tile_size: usize,
    downsample: Arc<dyn DownsampleKernel>,
    control: Arc<ControlState>,
    pool: rayon::ThreadPool,
}

impl PyramidBuilder {
    pub fn new(
        store: TileStore,
        levels: LevelGeometry,
        tile_size: usize,
        downsample: Arc<dyn DownsampleKernel>,
        control: Arc<ControlState>,
        threads: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pyramid-{}", i))
            .build()
            .map_err(|e| anyhow!("Failed to build pyramid thread pool: {}", e))?;
        Ok(PyramidBuilder {
            store,
            levels,
            tile_size,
            downsample,
            control,
            pool,
        })
    }

    /// Builds levels `from_level` down to 0. `on_level_done` runs after each
    /// level is fully on disk.
    ///
    /// A save request lets the level in progress finish, then stops.
    pub fn build<F>(&self, from_level: u32, mut on_level_done: F) -> Result<PyramidOutcome>
    where
        F: FnMut(u32) -> Result<()>,
    {
        let max_level = self.levels.max_level();
        if max_level == 0 {
            return Ok(PyramidOutcome::Completed);
        }
        ensure!(
            from_level < max_level,
            "Pyramid level {} is not below the base level {}",
            from_level,
            max_level
        );
        info!("Building pyramid levels {}..=0", from_level);

        for level in (0..=from_level).rev() {
            let started = Instant::now();
            let tiles = self.build_level(level)?;
            on_level_done(level)?;
            info!(
                "Level {} done: {} tiles in {:.1}s",
                level,
                tiles,
                started.elapsed().as_secs_f64()
            );
            if level == 0 {
                break;
            }
            let save = self.control.save_requested() || self.control.wait_while_paused() == Gate::Save;
            if save {
                self.control.take_save_request();
                info!("Progress saved before pyramid level {}", level - 1);
                return Ok(PyramidOutcome::Saved { next_level: level - 1 });
            }
        }
        Ok(PyramidOutcome::Completed)
    }

    fn build_level(&self, level: u32) -> Result<usize> {
        let (cols, rows) = self.levels.tile_grid(level, self.tile_size);
        let (width, height) = self.levels.dimensions(level);
        debug!(
            "Building level {}: {}x{} ({}x{} tiles)",
            level, width, height, cols, rows
        );
        self.store.ensure_level(level)?;

        let coords: Vec<TileCoord> = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| TileCoord::new(level, col, row)))
            .collect();
        self.pool.install(|| {
            coords.par_iter().try_for_each(|&coord| {
                // Tiles keep going on a save request so the level completes.
                self.control.wait_while_paused();
                self.build_tile(coord)
            })
        })?;
        Ok(coords.len())
    }

    /// Composes the 2×2 source block (missing sources stay black),
    /// downsamples it and crops edge tiles to the level's extent.
    fn build_tile(&self, coord: TileCoord) -> Result<()> {
        let t = self.tile_size as u32;
        let mut block = RgbImage::new(2 * t, 2 * t);
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let source = TileCoord::new(coord.level + 1, 2 * coord.col + dx, 2 * coord.row + dy);
            if let Some(tile) = self.store.load(source)? {
                imageops::replace(&mut block, &tile, (dx as u32 * t) as i64, (dy as u32 * t) as i64);
            }
        }

        let reduced = self
            .downsample
            .downsample(&block)
            .with_context(|| format!("Downsample failed for tile {:?}", coord))?;
        ensure!(
            reduced.dimensions() == (t, t),
            "Downsample produced {}x{} for tile {:?}, expected {}x{}",
            reduced.width(),
            reduced.height(),
            coord,
            t,
            t
        );

        let (w, h) = self.levels.tile_extent(coord.level, self.tile_size, coord.col, coord.row);
        let tile = if (w as u32, h as u32) == (t, t) {
            reduced
        } else {
            imageops::crop_imm(&reduced, 0, 0, w as u32, h as u32).to_image()
        };
        self.store.save(coord, &tile)
    }
}
