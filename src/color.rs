// src/color.rs

//! The 256-entry RGB lookup table and the normalization that maps raw field
//! values onto it.

use anyhow::{bail, Context, Result};
use log::warn;

/// Number of entries in a color table.
pub const TABLE_SIZE: usize = 256;

/// A 256×3 RGB lookup table, read-only once built and shared by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorTable {
    entries: [[u8; 3]; TABLE_SIZE],
}

impl ColorTable {
    pub fn from_entries(entries: [[u8; 3]; TABLE_SIZE]) -> Self {
        ColorTable { entries }
    }

    /// Builds a table by linear interpolation between evenly spaced hex
    /// stops (`#RRGGBB`, a trailing alpha byte is ignored).
    pub fn from_gradient<S: AsRef<str>>(stops: &[S]) -> Result<Self> {
        if stops.len() < 2 {
            bail!("A gradient needs at least two stops, got {}", stops.len());
        }
        let colors = stops
            .iter()
            .map(|s| parse_hex_color(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let segments = (colors.len() - 1) as f64;
        let mut entries = [[0u8; 3]; TABLE_SIZE];
        for (i, entry) in entries.iter_mut().enumerate() {
            let t = i as f64 / (TABLE_SIZE - 1) as f64;
            let pos = t * segments;
            let lo = (pos.floor() as usize).min(colors.len() - 2);
            let frac = pos - lo as f64;
            for (c, channel) in entry.iter_mut().enumerate() {
                let a = colors[lo][c];
                let b = colors[lo + 1][c];
                let v = a + (b - a) * frac;
                *channel = (v * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        Ok(ColorTable { entries })
    }

    pub fn entry(&self, index: u8) -> [u8; 3] {
        self.entries[index as usize]
    }

    /// Maps a field value to a table index: `clamp(value / reference, 0, 1)
    /// × 255`, truncated. NaN maps to 0.
    pub fn index_for(value: f64, reference: f64) -> u8 {
        let scaled = (value / reference).clamp(0.0, 1.0) * 255.0;
        if scaled.is_nan() {
            return 0;
        }
        scaled as u8
    }

    /// Colorizes a row-major field into packed RGB bytes.
    pub fn colorize(&self, field: &[f64], reference: f64) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(field.len() * 3);
        for &value in field {
            rgb.extend_from_slice(&self.entry(Self::index_for(value, reference)));
        }
        rgb
    }
}

/// Parses `#RRGGBB` or `#RRGGBBAA` into channel values in `0..=1`.
fn parse_hex_color(text: &str) -> Result<[f64; 3]> {
    let hex = text.trim().trim_start_matches('#');
    if hex.len() != 6 && hex.len() != 8 {
        bail!("Color '{}' is not #RRGGBB or #RRGGBBAA", text);
    }
    if hex.len() == 8 {
        warn!("Ignoring alpha channel of gradient stop '{}'", text);
    }
    let mut rgb = [0.0; 3];
    for (c, slot) in rgb.iter_mut().enumerate() {
        let byte = u8::from_str_radix(&hex[c * 2..c * 2 + 2], 16)
            .with_context(|| format!("Invalid hex digits in color '{}'", text))?;
        *slot = byte as f64 / 255.0;
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_endpoints_match_stops() {
        let table = ColorTable::from_gradient(&["#000000", "#FF8000"]).unwrap();
        assert_eq!(table.entry(0), [0, 0, 0]);
        assert_eq!(table.entry(255), [255, 128, 0]);
        let mid = table.entry(128);
        assert!(mid[0] > 120 && mid[0] < 135);
    }

    #[test]
    fn alpha_suffix_is_ignored() {
        let table = ColorTable::from_gradient(&["#10001F", "#757575FF"]).unwrap();
        assert_eq!(table.entry(255), [0x75, 0x75, 0x75]);
    }

    #[test]
    fn rejects_malformed_stops() {
        assert!(ColorTable::from_gradient(&["#123"]).is_err());
        assert!(ColorTable::from_gradient(&["#000000", "#12345"]).is_err());
        assert!(ColorTable::from_gradient(&["#000000", "#GG0000"]).is_err());
    }

    #[test]
    fn normalization_clamps_to_table_range() {
        assert_eq!(ColorTable::index_for(-5.0, 100.0), 0);
        assert_eq!(ColorTable::index_for(50.0, 100.0), 127);
        assert_eq!(ColorTable::index_for(100.0, 100.0), 255);
        assert_eq!(ColorTable::index_for(1e9, 100.0), 255);
        assert_eq!(ColorTable::index_for(f64::NAN, 100.0), 0);
    }

    #[test]
    fn colorize_packs_rgb_per_value() {
        let mut entries = [[0u8; 3]; TABLE_SIZE];
        entries[255] = [1, 2, 3];
        entries[0] = [9, 9, 9];
        let table = ColorTable::from_entries(entries);
        let rgb = table.colorize(&[0.0, 500.0], 100.0);
        assert_eq!(rgb, vec![9, 9, 9, 1, 2, 3]);
    }
}
