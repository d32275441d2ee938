// src/kernel.rs

//! Interfaces to the numeric kernels the pipeline drives, plus the default
//! implementations the binary ships with.
//!
//! The pipeline only ever sees the traits: the field kernel maps a coordinate
//! grid to one scalar per point, the downsample kernel maps a 2T×2T RGB block
//! to a T×T tile. Either can be swapped or mocked without touching the
//! strip or pyramid logic.

use anyhow::{ensure, Result};
use image::RgbImage;

/// Computes a scalar field over the grid `xs × ys`.
///
/// The result is row-major: `ys.len()` rows of `xs.len()` values, row `j`
/// holding the values at `ys[j]`.
pub trait FieldKernel: Send + Sync {
    fn compute(&self, xs: &[f64], ys: &[f64]) -> Result<Vec<f64>>;
}

/// Reduces a square block of twice the tile edge into one tile.
pub trait DownsampleKernel: Send + Sync {
    fn downsample(&self, block: &RgbImage) -> Result<RgbImage>;
}

/// Smooth escape-time iteration count of `z ← z² + c`.
#[derive(Debug, Clone, Copy)]
pub struct EscapeTimeKernel {
    pub max_iterations: u32,
    pub escape_radius_sq: f64,
}

impl EscapeTimeKernel {
    pub fn new(max_iterations: u32, escape_radius_sq: f64) -> Self {
        EscapeTimeKernel {
            max_iterations,
            escape_radius_sq,
        }
    }

    /// Interior points return 0.
    pub fn value_at(&self, cx: f64, cy: f64) -> f64 {
        let (mut zx, mut zy) = (0.0f64, 0.0f64);
        for n in 0..self.max_iterations {
            let zx2 = zx * zx;
            let zy2 = zy * zy;
            let r2 = zx2 + zy2;
            if r2 > self.escape_radius_sq {
                let log_modulus = 0.5 * r2.ln();
                let smooth = n as f64 + 1.0 - log_modulus.log2();
                return smooth.max(0.0);
            }
            zy = 2.0 * zx * zy + cy;
            zx = zx2 - zy2 + cx;
        }
        0.0
    }
}

impl FieldKernel for EscapeTimeKernel {
    fn compute(&self, xs: &[f64], ys: &[f64]) -> Result<Vec<f64>> {
        let mut field = Vec::with_capacity(xs.len() * ys.len());
        for &cy in ys {
            for &cx in xs {
                field.push(self.value_at(cx, cy));
            }
        }
        Ok(field)
    }
}

/// Averages every 2×2 pixel block.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxDownsampler;

impl DownsampleKernel for BoxDownsampler {
    fn downsample(&self, block: &RgbImage) -> Result<RgbImage> {
        let (w, h) = block.dimensions();
        ensure!(
            w % 2 == 0 && h % 2 == 0,
            "Downsample block must have even dimensions, got {}x{}",
            w,
            h
        );
        let out = RgbImage::from_fn(w / 2, h / 2, |x, y| {
            let mut sum = [0u32; 3];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let p = block.get_pixel(2 * x + dx, 2 * y + dy);
                for c in 0..3 {
                    sum[c] += p.0[c] as u32;
                }
            }
            image::Rgb([
                ((sum[0] + 2) / 4) as u8,
                ((sum[1] + 2) / 4) as u8,
                ((sum[2] + 2) / 4) as u8,
            ])
        });
        Ok(out)
    }
}
