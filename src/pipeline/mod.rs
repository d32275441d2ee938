// src/pipeline/mod.rs

//! The strip phase: computes the base level one horizontal strip at a time.
//!
//! For every strip a producer thread feeds chunk descriptors into a bounded
//! work queue, a persistent pool of workers turns each chunk into colored
//! pixels, and the calling thread collects the results, assembles the strip
//! and cuts it into base-level tiles. A checkpoint is written after every
//! strip.

mod assembler;
mod producer;
mod worker_pool;

pub use assembler::StripAssembler;
pub use producer::ChunkProducer;
pub use worker_pool::{FieldJob, WorkerPool};

use crate::checkpoint::{Checkpoint, CheckpointStore, RunParameters};
use crate::control::{ControlState, Gate};
use crate::partition::{ChunkGrid, Strip, StripGrid};
use crate::tiles::{ChunkSpool, TileStore};
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::ops::Range;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One unit of work: a column band of one strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTask {
    pub index: usize,
    pub columns: Range<usize>,
    pub rows: Range<usize>,
}

/// Packed RGB pixels of a computed chunk, row-major in field order.
#[derive(Debug, Clone)]
pub struct ColoredChunk {
    pub index: usize,
    pub width: usize,
    pub height: usize,
    pub rgb: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripOutcome {
    Completed,
    /// Stopped on request; every strip before `next_strip` is on disk.
    Saved { next_strip: usize },
}

/// Everything the strip phase needs. Built by the orchestrator.
pub struct StripPipeline {
    pub strips: StripGrid,
    pub chunks: ChunkGrid,
    pub tile_size: usize,
    pub base_level: u32,
    pub store: TileStore,
    pub spool: ChunkSpool,
    pub checkpoints: CheckpointStore,
    pub params: RunParameters,
    pub control: Arc<ControlState>,
    pub job: Arc<FieldJob>,
    pub workers: usize,
    pub queue_depth: usize,
    pub join_timeout: Duration,
}

impl StripPipeline {
    /// Renders strips `start..` and writes a checkpoint after each one.
    pub fn run(&self, start: usize) -> Result<StripOutcome> {
        let total = self.strips.count();
        if start >= total {
            debug!("All {} strips already rendered", total);
            return Ok(StripOutcome::Completed);
        }
        self.store.ensure_level(self.base_level)?;
        self.spool.open()?;

        let (task_tx, task_rx) = mpsc::sync_channel(self.queue_depth);
        let (result_tx, result_rx) = mpsc::sync_channel(self.queue_depth);
        let pool = WorkerPool::spawn(self.workers, task_rx, result_tx, Arc::clone(&self.job))?;
        info!(
            "Rendering strips {}..{} with {} workers, {} chunks per strip",
            start + 1,
            total,
            pool.worker_count(),
            self.chunks.count()
        );

        let outcome = self.run_strips(start, &task_tx, &result_rx);

        // Closing both queues unblocks every worker and any producer still
        // waiting on a full queue.
        drop(task_tx);
        drop(result_rx);
        pool.join(self.join_timeout);
        if outcome.is_ok() {
            self.spool.close();
        }
        outcome
    }

    fn run_strips(
        &self,
        start: usize,
        tasks: &SyncSender<ChunkTask>,
        results: &Receiver<Result<ColoredChunk>>,
    ) -> Result<StripOutcome> {
        let total = self.strips.count();
        let phase_started = Instant::now();
        for index in start..total {
            let strip = self.strips.strip(index);
            let started = Instant::now();
            let mut save = self.render_strip(&strip, tasks, results)?;

            let next = index + 1;
            let checkpoint = Checkpoint::at_strip(self.params, next, total);
            self.checkpoints.save(&checkpoint)?;

            let done = next - start;
            let per_strip = phase_started.elapsed().as_secs_f64() / done as f64;
            info!(
                "Strip {}/{} done in {:.1}s ({:.1}% complete, ~{:.0}s remaining)",
                next,
                total,
                started.elapsed().as_secs_f64(),
                checkpoint.percent_complete(),
                per_strip * (total - next) as f64
            );

            if !save && next < total {
                save = self.control.wait_while_paused() == Gate::Save;
            }
            if save {
                self.control.take_save_request();
                info!(
                    "Progress saved at strip {}/{}! Generation will continue from here next time.",
                    next, total
                );
                return Ok(StripOutcome::Saved { next_strip: next });
            }
        }
        Ok(StripOutcome::Completed)
    }

    /// Renders one strip into base-level tiles. Returns true when a save was
    /// requested while it was in flight; the strip is still completed first.
    fn render_strip(
        &self,
        strip: &Strip,
        tasks: &SyncSender<ChunkTask>,
        results: &Receiver<Result<ColoredChunk>>,
    ) -> Result<bool> {
        debug!("Strip {}: rows {:?}", strip.index, strip.rows);
        let mut assembler = StripAssembler::begin(self.chunks, self.spool.clone(), strip.clone());
        let producer = ChunkProducer::spawn(self.chunks, strip.clone(), tasks.clone())?;

        let mut finalizing = false;
        while !assembler.is_complete() {
            let accepted = match results.recv() {
                Ok(received) => received.and_then(|chunk| assembler.accept(chunk)),
                Err(_) => Err(anyhow!("Worker pool stopped with {} chunks outstanding", assembler.remaining())),
            };
            if let Err(e) = accepted {
                // The producer is left detached; it stops once the workers
                // have dropped the work queue.
                assembler.discard();
                return Err(e.context(format!("Strip {} failed", strip.index)));
            }
            if !finalizing && self.control.wait_while_paused() == Gate::Save {
                info!("Save requested, finishing strip {} first", strip.index + 1);
                finalizing = true;
            }
        }
        producer.join(self.join_timeout);

        let tile_row = self.strips.tile_row(strip.index);
        assembler.persist(&self.store, self.base_level, tile_row, self.tile_size)?;
        Ok(finalizing)
    }
}

/// Joins `handle` unless `deadline` passes first, in which case the thread
/// is left to finish on its own.
pub(crate) fn join_with_deadline(handle: JoinHandle<()>, deadline: Instant, what: &str) {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Timed out waiting for {} thread to exit", what);
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        warn!("{} thread panicked", what);
    }
}
