// src/pipeline/assembler.rs

use super::ColoredChunk;
use crate::partition::{ChunkGrid, Strip};
use crate::tiles::{ChunkSpool, TileCoord, TileStore};
use anyhow::{bail, ensure, Context, Result};
use image::{imageops, RgbImage};
use log::{debug, warn};

/// Collects the chunks of one strip, in any arrival order, and turns them
/// into base-level tiles.
///
/// Chunks are spooled to disk as they arrive so only the finished strip is
/// ever held in memory as a whole.
pub struct StripAssembler {
    grid: ChunkGrid,
    spool: ChunkSpool,
    strip: Strip,
    received: Vec<bool>,
    remaining: usize,
}

impl StripAssembler {
    pub fn begin(grid: ChunkGrid, spool: ChunkSpool, strip: Strip) -> Self {
        StripAssembler {
            grid,
            spool,
            strip,
            received: vec![false; grid.count()],
            remaining: grid.count(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    pub fn accept(&mut self, chunk: ColoredChunk) -> Result<()> {
        let Some(seen) = self.received.get_mut(chunk.index) else {
            bail!(
                "Chunk index {} out of range for {} chunks",
                chunk.index,
                self.grid.count()
            );
        };
        if *seen {
            bail!("Chunk {} of strip {} delivered twice", chunk.index, self.strip.index);
        }
        let columns = self.grid.columns(chunk.index);
        ensure!(
            chunk.width == columns.len()
                && chunk.height == self.strip.height()
                && chunk.rgb.len() == chunk.width * chunk.height * 3,
            "Chunk {} is {}x{} ({} bytes), expected {}x{}",
            chunk.index,
            chunk.width,
            chunk.height,
            chunk.rgb.len(),
            columns.len(),
            self.strip.height()
        );
        self.spool.write(chunk.index, &chunk.rgb)?;
        *seen = true;
        self.remaining -= 1;
        Ok(())
    }

    /// Rebuilds the full-width strip from the spool and flips it so row 0 is
    /// the top of the image.
    pub fn assemble(&self) -> Result<RgbImage> {
        ensure!(
            self.is_complete(),
            "Strip {} still misses {} chunks",
            self.strip.index,
            self.remaining
        );
        let height = self.strip.height() as u32;
        let mut strip = RgbImage::new(self.grid.width() as u32, height);
        for (index, columns) in self.grid.chunks() {
            let width = columns.len() as u32;
            let rgb = self.spool.read(index, columns.len() * self.strip.height() * 3)?;
            let chunk = RgbImage::from_raw(width, height, rgb)
                .with_context(|| format!("Chunk {} does not fit {}x{}", index, width, height))?;
            imageops::replace(&mut strip, &chunk, columns.start as i64, 0);
        }
        imageops::flip_vertical_in_place(&mut strip);
        Ok(strip)
    }

    /// Slices the assembled strip into tiles on `tile_row` of `level` and
    /// persists them, then drops the strip's spooled chunks.
    pub fn persist(self, store: &TileStore, level: u32, tile_row: usize, tile_size: usize) -> Result<usize> {
        let strip = self.assemble()?;
        let tile_size = tile_size as u32;
        let mut written = 0;
        let mut x = 0u32;
        while x < strip.width() {
            let width = tile_size.min(strip.width() - x);
            let tile = imageops::crop_imm(&strip, x, 0, width, strip.height()).to_image();
            let col = (x / tile_size) as usize;
            store.save(TileCoord::new(level, col, tile_row), &tile)?;
            written += 1;
            x += tile_size;
        }
        debug!(
            "Strip {} written as {} tiles on row {} of level {}",
            self.strip.index, written, tile_row, level
        );
        self.discard();
        Ok(written)
    }

    /// Removes every spooled chunk of this strip.
    pub fn discard(self) {
        for index in 0..self.grid.count() {
            if let Err(e) = self.spool.remove(index) {
                warn!("{:#}", e);
            }
        }
    }
}
