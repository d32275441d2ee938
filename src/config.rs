// src/config.rs

//! Defines the configuration structures for the deep-zoom renderer.
//!
//! The configuration is a tree of sections that can be deserialized from a
//! JSON file. Every section carries `#[serde(default)]`, so a file only needs
//! to mention the values it wants to change. Command line flags are applied
//! on top of the loaded tree in `main`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// --- Top-Level Configuration Structure ---

/// Represents the complete configuration of a render run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The coordinate domain and the field/color parameters.
    pub render: RenderConfig,
    /// Tile and chunk geometry.
    pub tiling: TilingConfig,
    /// Worker counts, queue depths and polling intervals.
    pub pipeline: PipelineConfig,
    /// Interactive control surface settings.
    pub control: ControlConfig,
    /// Where tiles, manifest and checkpoint are written.
    pub output: OutputConfig,
}

impl Config {
    /// Loads a configuration from a JSON file, or returns the defaults when
    /// no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };
        Ok(config)
    }

    /// Rejects configurations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        let r = &self.render;
        if !(r.x_min < r.x_max) || !(r.y_min < r.y_max) {
            bail!(
                "Invalid domain bounds: x [{}, {}], y [{}, {}]",
                r.x_min,
                r.x_max,
                r.y_min,
                r.y_max
            );
        }
        if r.base_width == 0 || r.base_height == 0 {
            bail!("Base resolution must be non-zero");
        }
        if r.max_iterations == 0 {
            bail!("max_iterations must be positive");
        }
        if !(r.color_reference > 0.0) {
            bail!("color_reference must be positive, got {}", r.color_reference);
        }
        if r.gradient.len() < 2 {
            bail!("A color gradient needs at least two stops");
        }

        let t = &self.tiling;
        if t.tile_size == 0 {
            bail!("tile_size must be positive");
        }
        if t.chunk_count == 0 {
            bail!("chunk_count must be positive");
        }
        // Strips are flipped into tile rows; a short strip would land on the
        // top tile row instead of the bottom one.
        if r.base_height % t.tile_size != 0 {
            bail!(
                "base_height ({}) must be a multiple of tile_size ({})",
                r.base_height,
                t.tile_size
            );
        }
        if t.format != "png" {
            bail!("Unsupported tile format '{}'", t.format);
        }
        Ok(())
    }
}

// --- Render Configuration ---

/// The coordinate domain and the parameters that shape the field and its
/// colors. `max_iterations` and `color_reference` are recorded in the
/// checkpoint so a resumed run matches the strips already on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    /// Horizontal resolution at scale 1.
    pub base_width: usize,
    /// Vertical resolution at scale 1.
    pub base_height: usize,
    pub max_iterations: u32,
    /// Squared escape radius handed to the escape-time kernel.
    pub escape_radius_sq: f64,
    /// Field value that maps to the top of the color table.
    pub color_reference: f64,
    /// Hex color stops, evenly spaced from 0 to 1.
    pub gradient: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            x_min: -2.5,
            x_max: 1.0,
            y_min: -1.0,
            y_max: 1.0,
            base_width: 10240,
            base_height: 7680,
            max_iterations: 750,
            escape_radius_sq: (1u64 << 18) as f64,
            color_reference: 100.0,
            gradient: [
                "#10001F", "#1A0E36", "#001E71", "#007D7D", "#006C7F", "#00B129", "#F2FF00",
                "#FF6600", "#D60000", "#757575FF",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// --- Tiling Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TilingConfig {
    /// Edge length of a square tile, also the strip height.
    pub tile_size: usize,
    /// Number of column bands a strip is split into for parallel work.
    pub chunk_count: usize,
    /// Tile image format. Only "png" is written.
    pub format: String,
}

impl Default for TilingConfig {
    fn default() -> Self {
        TilingConfig {
            tile_size: 256,
            chunk_count: 160,
            format: "png".to_string(),
        }
    }
}

// --- Pipeline Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Field workers. `None` means one per available core.
    pub workers: Option<usize>,
    /// Capacity of the work and result queues. `None` means twice the
    /// worker count.
    pub queue_depth: Option<usize>,
    /// Threads used while building coarser pyramid levels. `None` means twice
    /// the available cores.
    pub pyramid_workers: Option<usize>,
    /// How often a paused loop re-checks the control state.
    pub pause_poll_ms: u64,
    /// Upper bound on waiting for producer/worker threads to exit.
    pub join_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: None,
            queue_depth: None,
            pyramid_workers: None,
            pause_poll_ms: 100,
            join_timeout_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(available_cores).max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_depth
            .unwrap_or_else(|| self.worker_count() * 2)
            .max(1)
    }

    pub fn pyramid_worker_count(&self) -> usize {
        self.pyramid_workers
            .unwrap_or_else(|| available_cores() * 2)
            .max(1)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// --- Control Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Listen for single-key commands on the controlling terminal.
    pub enabled: bool,
    /// A second exit key must arrive within this window to force quit.
    pub exit_confirm_window_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            enabled: true,
            exit_confirm_window_ms: 3000,
        }
    }
}

impl ControlConfig {
    pub fn exit_confirm_window(&self) -> Duration {
        Duration::from_millis(self.exit_confirm_window_ms)
    }
}

// --- Output Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Base name of the manifest (`<name>.dzi`) and tile tree (`<name>_files`).
    pub name: String,
    /// Checkpoint record, relative to `directory` unless absolute.
    pub checkpoint_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: PathBuf::from("."),
            name: "mandelbrot_deepzoom".to_string(),
            checkpoint_file: PathBuf::from("mandelbrot_progress.json"),
        }
    }
}

impl OutputConfig {
    pub fn tiles_dir(&self) -> PathBuf {
        self.directory.join(format!("{}_files", self.name))
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.directory.join(format!("{}_spool", self.name))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(format!("{}.dzi", self.name))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.directory.join(&self.checkpoint_file)
    }
}
