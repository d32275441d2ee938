// src/pipeline/producer.rs

use super::{join_with_deadline, ChunkTask};
use crate::partition::{ChunkGrid, Strip};
use anyhow::Result;
use log::{debug, trace};
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Feeds one strip's chunk descriptors into the bounded work queue. The
/// thread blocks whenever the queue is full.
pub struct ChunkProducer {
    join_handle: JoinHandle<()>,
}

impl ChunkProducer {
    pub fn spawn(grid: ChunkGrid, strip: Strip, tasks: SyncSender<ChunkTask>) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name(format!("chunk-producer-{}", strip.index))
            .spawn(move || {
                for (index, columns) in grid.chunks() {
                    let task = ChunkTask {
                        index,
                        columns,
                        rows: strip.rows.clone(),
                    };
                    trace!("Queueing chunk {} of strip {}", index, strip.index);
                    if tasks.send(task).is_err() {
                        debug!("Work queue closed, producer for strip {} stopping", strip.index);
                        return;
                    }
                }
                debug!("Producer for strip {} queued {} chunks", strip.index, grid.count());
            })?;
        Ok(ChunkProducer {
            join_handle: handle,
        })
    }

    /// Waits for the producer to finish. Exceeding `timeout` is not an error.
    pub fn join(self, timeout: Duration) {
        join_with_deadline(self.join_handle, Instant::now() + timeout, "chunk producer");
    }
}
