// src/estimate.rs

//! Empirical run-time and disk usage estimates for a scale factor, fitted
//! from timed runs of the reference configuration.

const TIME_COEFFICIENT: f64 = 12.977;
const TIME_EXPONENT: f64 = 1.804;
const PEAK_GB_PER_SCALE: f64 = 0.075;
const FINAL_MB_COEFFICIENT: f64 = 9.58017;
const FINAL_MB_EXPONENT: f64 = 1.69713;

pub fn estimated_seconds(scale: u32) -> f64 {
    TIME_COEFFICIENT * f64::from(scale).powf(TIME_EXPONENT)
}

/// Human readable duration: seconds, minutes or hours.
pub fn time_estimate(scale: u32) -> String {
    let seconds = estimated_seconds(scale);
    let minutes = seconds / 60.0;
    if minutes < 1.0 {
        format!("{:.0} seconds", seconds)
    } else if minutes < 60.0 {
        format!("{:.1} minutes", minutes)
    } else {
        format!("{:.1} hours", minutes / 60.0)
    }
}

/// Peak temporary storage and final pyramid size.
pub fn storage_estimate(scale: u32) -> (String, String) {
    let peak_gb = PEAK_GB_PER_SCALE * f64::from(scale);
    let final_mb = FINAL_MB_COEFFICIENT * f64::from(scale).powf(FINAL_MB_EXPONENT);

    let peak = if peak_gb < 1.0 {
        format!("{:.0} MB", peak_gb * 1024.0)
    } else {
        format!("{:.1} GB", peak_gb)
    };
    let total = if final_mb < 1024.0 {
        format!("{:.0} MB", final_mb)
    } else {
        format!("{:.1} GB", final_mb / 1024.0)
    };
    (peak, total)
}
