// src/checkpoint.rs

//! Persists the minimal state needed to resume a run at a strip (or pyramid
//! level) boundary.
//!
//! The record is JSON, rewritten by writing a sibling temporary file and
//! renaming it over the old one. A record that is missing, unreadable or
//! inconsistent is reported as "no checkpoint" and never aborts the run.

use crate::config::RenderConfig;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Parameters that must match between the run that wrote a checkpoint and
/// the run that resumes it. Tiles already on disk were computed with them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub scale: u32,
    pub max_iterations: u32,
    pub color_reference: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub base_width: usize,
    pub base_height: usize,
    pub tile_size: usize,
}

impl RunParameters {
    pub fn new(scale: u32, render: &RenderConfig, tile_size: usize) -> Self {
        RunParameters {
            scale,
            max_iterations: render.max_iterations,
            color_reference: render.color_reference,
            x_min: render.x_min,
            x_max: render.x_max,
            y_min: render.y_min,
            y_max: render.y_max,
            base_width: render.base_width,
            base_height: render.base_height,
            tile_size,
        }
    }

    /// Describes every field of `self` that differs from `other`.
    pub fn differences(&self, other: &RunParameters) -> Vec<String> {
        let mut out = Vec::new();
        let mut check = |name: &str, ours: String, theirs: String| {
            if ours != theirs {
                out.push(format!("{}: checkpoint {} vs run {}", name, ours, theirs));
            }
        };
        check("scale", self.scale.to_string(), other.scale.to_string());
        check("max_iterations", self.max_iterations.to_string(), other.max_iterations.to_string());
        check("color_reference", self.color_reference.to_string(), other.color_reference.to_string());
        check("x_min", self.x_min.to_string(), other.x_min.to_string());
        check("x_max", self.x_max.to_string(), other.x_max.to_string());
        check("y_min", self.y_min.to_string(), other.y_min.to_string());
        check("y_max", self.y_max.to_string(), other.y_max.to_string());
        check("base_width", self.base_width.to_string(), other.base_width.to_string());
        check("base_height", self.base_height.to_string(), other.base_height.to_string());
        check("tile_size", self.tile_size.to_string(), other.tile_size.to_string());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(flatten)]
    pub run: RunParameters,
    /// Next strip to process; equal to `total_strips` once every strip is on disk.
    pub current_strip: usize,
    pub total_strips: usize,
    /// Next pyramid level still to build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pyramid_level: Option<u32>,
}

impl Checkpoint {
    pub fn at_strip(run: RunParameters, next_strip: usize, total_strips: usize) -> Self {
        Checkpoint {
            run,
            current_strip: next_strip,
            total_strips,
            pyramid_level: None,
        }
    }

    pub fn at_pyramid_level(run: RunParameters, total_strips: usize, next_level: u32) -> Self {
        Checkpoint {
            pyramid_level: Some(next_level),
            ..Self::at_strip(run, total_strips, total_strips)
        }
    }

    pub fn parameters(&self) -> RunParameters {
        self.run
    }

    pub fn scale(&self) -> u32 {
        self.run.scale
    }

    pub fn strips_complete(&self) -> bool {
        self.current_strip >= self.total_strips
    }

    pub fn percent_complete(&self) -> f64 {
        self.current_strip as f64 * 100.0 / self.total_strips.max(1) as f64
    }

    /// Describes every field parameter that differs from `render`. These are
    /// the ones a resume adopts from the checkpoint.
    pub fn mismatches(&self, render: &RenderConfig) -> Vec<String> {
        let mut out = Vec::new();
        if self.run.max_iterations != render.max_iterations {
            out.push(format!(
                "max_iterations: checkpoint {} vs configured {}",
                self.run.max_iterations, render.max_iterations
            ));
        }
        if self.run.color_reference != render.color_reference {
            out.push(format!(
                "color_reference: checkpoint {} vs configured {}",
                self.run.color_reference, render.color_reference
            ));
        }
        out
    }

    /// Adopts the checkpoint's field parameters so resumed strips match the
    /// ones already written. Geometry is never adopted; a resume with a
    /// different geometry is rejected instead.
    pub fn apply_to(&self, render: &mut RenderConfig) {
        render.max_iterations = self.run.max_iterations;
        render.color_reference = self.run.color_reference;
    }

    fn is_consistent(&self) -> bool {
        self.run.scale > 0
            && self.run.tile_size > 0
            && self.total_strips > 0
            && self.current_strip <= self.total_strips
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CheckpointStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Atomically replaces the record.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(checkpoint).context("Failed to encode checkpoint")?;
        let tmp = self.temp_path();
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to move {} over {}", tmp.display(), self.path.display())
        })?;
        debug!(
            "Checkpoint saved: strip {}/{}, pyramid level {:?}",
            checkpoint.current_strip, checkpoint.total_strips, checkpoint.pyramid_level
        );
        Ok(())
    }

    /// Returns the record if present and valid.
    pub fn load(&self) -> Option<Checkpoint> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<Checkpoint>(&text) {
            Ok(cp) if cp.is_consistent() => Some(cp),
            Ok(cp) => {
                warn!("Ignoring inconsistent checkpoint {}: {:?}", self.path.display(), cp);
                None
            }
            Err(e) => {
                warn!("Ignoring malformed checkpoint {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed checkpoint {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}
