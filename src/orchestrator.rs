// src/orchestrator.rs
//! Orchestrates a complete render: start or resume semantics, the strip
//! phase, the pyramid phase and the final manifest.
//!
//! The numeric kernels and the control state are injected so the whole flow
//! can be driven from tests without a terminal or the real field kernel.

use crate::{
    checkpoint::{Checkpoint, CheckpointStore, RunParameters},
    color::ColorTable,
    config::Config,
    control::ControlState,
    kernel::{DownsampleKernel, FieldKernel},
    manifest::DeepZoomManifest,
    partition::{ChunkGrid, Domain, StripGrid},
    pipeline::{FieldJob, StripOutcome, StripPipeline},
    pyramid::{PyramidBuilder, PyramidOutcome},
    tiles::{ChunkSpool, TileStore},
};
use anyhow::{ensure, Result};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a run begins.
#[derive(Debug, Clone, PartialEq)]
pub enum StartPoint {
    /// Discard any previous progress and tiles.
    Fresh,
    /// Continue from a loaded checkpoint, keeping the tiles on disk.
    Resume(Checkpoint),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The pyramid and its manifest are complete; the checkpoint is gone.
    Completed { manifest: PathBuf },
    /// Stopped on a save request; `checkpoint` is what was persisted.
    Saved { checkpoint: Checkpoint },
}

pub struct RenderOrchestrator {
    config: Config,
    scale: u32,
    domain: Arc<Domain>,
    field: Arc<dyn FieldKernel>,
    downsample: Arc<dyn DownsampleKernel>,
    colors: Arc<ColorTable>,
    control: Arc<ControlState>,
    store: TileStore,
    checkpoints: CheckpointStore,
}

impl RenderOrchestrator {
    pub fn new(
        config: Config,
        scale: u32,
        field: Arc<dyn FieldKernel>,
        downsample: Arc<dyn DownsampleKernel>,
        control: Arc<ControlState>,
    ) -> Result<Self> {
        config.validate()?;
        let domain = Domain::from_scale(&config.render, scale)?;
        let colors = ColorTable::from_gradient(&config.render.gradient)?;
        let store = TileStore::new(config.output.tiles_dir());
        let checkpoints = CheckpointStore::new(config.output.checkpoint_path());
        Ok(RenderOrchestrator {
            config,
            scale,
            domain: Arc::new(domain),
            field,
            downsample,
            colors: Arc::new(colors),
            control,
            store,
            checkpoints,
        })
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn tiles(&self) -> &TileStore {
        &self.store
    }

    pub fn parameters(&self) -> RunParameters {
        RunParameters::new(self.scale, &self.config.render, self.config.tiling.tile_size)
    }

    pub fn run(&self, start: StartPoint) -> Result<RunOutcome> {
        let tile_size = self.config.tiling.tile_size;
        let levels = self.domain.levels();
        let max_level = levels.max_level();
        let strips = StripGrid::new(self.domain.height, tile_size);
        let total = strips.count();
        let params = self.parameters();
        let spool = ChunkSpool::new(self.config.output.spool_dir());
        info!(
            "Image {}x{}: {} strips, pyramid has {} levels",
            self.domain.width,
            self.domain.height,
            total,
            max_level + 1
        );

        let (start_strip, pyramid_from) = match start {
            StartPoint::Fresh => {
                self.checkpoints.clear()?;
                self.store.reset()?;
                (0, None)
            }
            StartPoint::Resume(checkpoint) => {
                let differences = checkpoint.parameters().differences(&params);
                ensure!(
                    differences.is_empty(),
                    "Checkpoint does not match this run ({}); pass --fresh to start over",
                    differences.join(", ")
                );
                ensure!(
                    checkpoint.total_strips == total,
                    "Checkpoint expects {} strips, this geometry has {}",
                    checkpoint.total_strips,
                    total
                );
                self.store.ensure_root()?;
                let stale = spool.purge()?;
                if stale > 0 {
                    info!("Discarded {} chunks of an interrupted strip", stale);
                }
                info!(
                    "Resuming from strip {}/{} ({:.1}% complete)",
                    checkpoint.current_strip,
                    total,
                    checkpoint.percent_complete()
                );
                (checkpoint.current_strip, checkpoint.pyramid_level)
            }
        };

        info!("Phase 1: Rendering base level {}", max_level);
        let pipeline = StripPipeline {
            strips,
            chunks: ChunkGrid::new(self.domain.width, self.config.tiling.chunk_count),
            tile_size,
            base_level: max_level,
            store: self.store.clone(),
            spool,
            checkpoints: self.checkpoints.clone(),
            params,
            control: Arc::clone(&self.control),
            job: Arc::new(FieldJob {
                domain: Arc::clone(&self.domain),
                kernel: Arc::clone(&self.field),
                colors: Arc::clone(&self.colors),
                color_reference: self.config.render.color_reference,
            }),
            workers: self.config.pipeline.worker_count(),
            queue_depth: self.config.pipeline.queue_capacity(),
            join_timeout: self.config.pipeline.join_timeout(),
        };
        if let StripOutcome::Saved { next_strip } = pipeline.run(start_strip)? {
            return Ok(RunOutcome::Saved {
                checkpoint: Checkpoint::at_strip(params, next_strip, total),
            });
        }

        if max_level > 0 {
            info!("Phase 2: Building pyramid levels");
            let builder = PyramidBuilder::new(
                self.store.clone(),
                levels,
                tile_size,
                Arc::clone(&self.downsample),
                Arc::clone(&self.control),
                self.config.pipeline.pyramid_worker_count(),
            )?;
            let from = pyramid_from.unwrap_or(max_level - 1);
            let outcome = builder.build(from, |level| match level {
                0 => Ok(()),
                _ => self
                    .checkpoints
                    .save(&Checkpoint::at_pyramid_level(params, total, level - 1)),
            })?;
            if let PyramidOutcome::Saved { next_level } = outcome {
                return Ok(RunOutcome::Saved {
                    checkpoint: Checkpoint::at_pyramid_level(params, total, next_level),
                });
            }
        }

        let manifest_path = self.config.output.manifest_path();
        DeepZoomManifest::new(
            &self.config.tiling.format,
            tile_size,
            self.domain.width,
            self.domain.height,
        )
        .write(&manifest_path)?;
        self.checkpoints.clear()?;
        Ok(RunOutcome::Completed {
            manifest: manifest_path,
        })
    }
}

#[cfg(test)]
mod tests;
