// src/pipeline/worker_pool.rs

use super::{join_with_deadline, ChunkTask, ColoredChunk};
use crate::color::ColorTable;
use crate::kernel::FieldKernel;
use crate::partition::Domain;
use anyhow::{ensure, Context, Result};
use log::{debug, trace, warn};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Everything a worker needs to turn a chunk descriptor into colored pixels.
/// Shared read-only by all workers.
pub struct FieldJob {
    pub domain: Arc<Domain>,
    pub kernel: Arc<dyn FieldKernel>,
    pub colors: Arc<ColorTable>,
    pub color_reference: f64,
}

impl FieldJob {
    pub fn run(&self, task: &ChunkTask) -> Result<ColoredChunk> {
        let xs = self.domain.x_axis(task.columns.clone());
        let ys = self.domain.y_axis(task.rows.clone());
        let field = self
            .kernel
            .compute(&xs, &ys)
            .with_context(|| format!("Field kernel failed on chunk {}", task.index))?;
        ensure!(
            field.len() == xs.len() * ys.len(),
            "Field kernel returned {} values for a {}x{} chunk",
            field.len(),
            xs.len(),
            ys.len()
        );
        let rgb = self.colors.colorize(&field, self.color_reference);
        Ok(ColoredChunk {
            index: task.index,
            width: xs.len(),
            height: ys.len(),
            rgb,
        })
    }
}

/// Fixed set of threads pulling from the shared work queue. Workers exit
/// when the queue is closed (every sender dropped) or when the result queue
/// has no receiver left.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        tasks: Receiver<ChunkTask>,
        results: SyncSender<Result<ColoredChunk>>,
        job: Arc<FieldJob>,
    ) -> Result<Self> {
        let tasks = Arc::new(Mutex::new(tasks));
        let mut workers = Vec::with_capacity(count);
        for worker_id in 0..count {
            let tasks = Arc::clone(&tasks);
            let results = results.clone();
            let job = Arc::clone(&job);
            let handle = std::thread::Builder::new()
                .name(format!("field-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, &tasks, &results, &job))
                .context("Failed to spawn field worker")?;
            workers.push(handle);
        }
        debug!("Worker pool started with {} workers", count);
        Ok(WorkerPool { workers })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Joins every worker, giving up on stragglers after `timeout`.
    pub fn join(self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for handle in self.workers {
            join_with_deadline(handle, deadline, "field worker");
        }
    }
}

fn worker_loop(
    worker_id: usize,
    tasks: &Mutex<Receiver<ChunkTask>>,
    results: &SyncSender<Result<ColoredChunk>>,
    job: &FieldJob,
) {
    loop {
        let task = match tasks.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => {
                warn!("Worker {}: work queue lock poisoned", worker_id);
                return;
            }
        };
        let Ok(task) = task else {
            trace!("Worker {}: work queue closed", worker_id);
            return;
        };
        let result = job.run(&task);
        if results.send(result).is_err() {
            trace!("Worker {}: result queue closed", worker_id);
            return;
        }
    }
}
