// src/lib.rs

//! Strip-by-strip renderer for deep-zoom tile pyramids.
//!
//! The base level is computed one horizontal strip at a time by a pool of
//! worker threads, checkpointed after every strip, and then reduced into
//! the coarser levels. A keyboard control channel can pause the run, save
//! and exit at the next boundary, or force quit.

pub mod checkpoint;
pub mod color;
pub mod config;
pub mod control;
pub mod estimate;
pub mod kernel;
pub mod manifest;
pub mod orchestrator;
pub mod partition;
pub mod pipeline;
pub mod pyramid;
pub mod tiles;
