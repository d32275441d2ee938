// src/orchestrator/tests.rs

use super::*;
use crate::config::{OutputConfig, PipelineConfig, RenderConfig, TilingConfig};
use crate::control::ControlCommand;
use crate::kernel::BoxDownsampler;
use crate::tiles::TileCoord;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const REFERENCE: f64 = 200.0;

/// Grows with the row coordinate, with a step at x = 32.
struct RampKernel;

impl FieldKernel for RampKernel {
    fn compute(&self, xs: &[f64], ys: &[f64]) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(xs.len() * ys.len());
        for &y in ys {
            for &x in xs {
                out.push(4.0 * y + 0.5 + if x >= 32.0 { 2.0 } else { 0.0 });
            }
        }
        Ok(out)
    }
}

struct BrokenKernel {
    calls: AtomicUsize,
}

impl FieldKernel for BrokenKernel {
    fn compute(&self, _xs: &[f64], _ys: &[f64]) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("kernel unavailable")
    }
}

struct BrokenDownsampler;

impl DownsampleKernel for BrokenDownsampler {
    fn downsample(&self, _block: &image::RgbImage) -> Result<image::RgbImage> {
        anyhow::bail!("filter crashed")
    }
}

/// 64×48 domain sampled at integer coordinates, 16-pixel tiles.
fn test_config(dir: &Path) -> Config {
    Config {
        render: RenderConfig {
            x_min: 0.0,
            x_max: 63.0,
            y_min: 0.0,
            y_max: 47.0,
            base_width: 64,
            base_height: 48,
            color_reference: REFERENCE,
            gradient: vec!["#000000".to_string(), "#FFFFFF".to_string()],
            ..RenderConfig::default()
        },
        tiling: TilingConfig {
            tile_size: 16,
            chunk_count: 5,
            ..TilingConfig::default()
        },
        pipeline: PipelineConfig {
            workers: Some(2),
            queue_depth: Some(3),
            pyramid_workers: Some(2),
            pause_poll_ms: 1,
            ..PipelineConfig::default()
        },
        output: OutputConfig {
            directory: dir.to_path_buf(),
            ..OutputConfig::default()
        },
        ..Config::default()
    }
}

fn control() -> Arc<ControlState> {
    Arc::new(ControlState::new(Duration::from_secs(3), Duration::from_millis(1)))
}

fn save_requested() -> Arc<ControlState> {
    let control = control();
    let now = Instant::now();
    control.apply(ControlCommand::TogglePause, now);
    control.apply(ControlCommand::Save, now);
    control
}

fn orchestrator(dir: &Path, field: Arc<dyn FieldKernel>, control: Arc<ControlState>) -> RenderOrchestrator {
    RenderOrchestrator::new(test_config(dir), 1, field, Arc::new(BoxDownsampler), control).unwrap()
}

fn gray(value: f64) -> [u8; 3] {
    let v = ColorTable::index_for(value, REFERENCE);
    [v, v, v]
}

fn assert_same_tiles(a: &TileStore, b: &TileStore, max_level: u32) {
    for level in 0..=max_level {
        let mut names: Vec<_> = std::fs::read_dir(a.level_dir(level))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        names.sort();
        assert!(!names.is_empty());
        for name in names {
            let left = image::open(a.level_dir(level).join(&name)).unwrap().into_rgb8();
            let right = image::open(b.level_dir(level).join(&name)).unwrap().into_rgb8();
            assert_eq!(left, right, "tile {}/{:?} differs", level, name);
        }
    }
}

#[test_log::test]
fn full_run_writes_every_level_and_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), Arc::new(RampKernel), control());
    let outcome = orch.run(StartPoint::Fresh).unwrap();

    let manifest = dir.path().join("mandelbrot_deepzoom.dzi");
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            manifest: manifest.clone()
        }
    );
    assert!(std::fs::read_to_string(&manifest)
        .unwrap()
        .contains("<Size Height=\"48\" Width=\"64\"/>"));
    for level in 0..=6 {
        assert!(orch.tiles().level_dir(level).is_dir(), "level {} missing", level);
    }
    let apex = orch.tiles().load(TileCoord::new(0, 0, 0)).unwrap().unwrap();
    assert_eq!(apex.dimensions(), (1, 1));
    assert!(orch.checkpoints().load().is_none());
    assert!(!dir.path().join("mandelbrot_deepzoom_spool").exists());
}

#[test_log::test]
fn base_tiles_are_flipped_so_the_top_row_holds_y_max() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), Arc::new(RampKernel), control());
    orch.run(StartPoint::Fresh).unwrap();

    let bottom_left = orch.tiles().load(TileCoord::new(6, 0, 2)).unwrap().unwrap();
    assert_eq!(bottom_left.get_pixel(0, 15).0, gray(0.5));
    let top_left = orch.tiles().load(TileCoord::new(6, 0, 0)).unwrap().unwrap();
    assert_eq!(top_left.get_pixel(0, 0).0, gray(4.0 * 47.0 + 0.5));
    let top_right = orch.tiles().load(TileCoord::new(6, 2, 0)).unwrap().unwrap();
    assert_eq!(top_right.get_pixel(0, 0).0, gray(4.0 * 47.0 + 2.5));
}

#[test_log::test]
fn saved_then_resumed_run_matches_an_uninterrupted_one() {
    let reference = tempfile::tempdir().unwrap();
    let straight = orchestrator(reference.path(), Arc::new(RampKernel), control());
    straight.run(StartPoint::Fresh).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let first = orchestrator(dir.path(), Arc::new(RampKernel), save_requested());
    let checkpoint = match first.run(StartPoint::Fresh).unwrap() {
        RunOutcome::Saved { checkpoint } => checkpoint,
        other => panic!("expected a save, got {:?}", other),
    };
    assert_eq!((checkpoint.current_strip, checkpoint.total_strips), (1, 3));
    assert_eq!(first.checkpoints().load(), Some(checkpoint.clone()));

    let second = orchestrator(dir.path(), Arc::new(RampKernel), control());
    let outcome = second.run(StartPoint::Resume(checkpoint)).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(second.checkpoints().load().is_none());
    assert_same_tiles(straight.tiles(), second.tiles(), 6);
}

#[test_log::test]
fn completed_strips_are_not_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    orchestrator(dir.path(), Arc::new(RampKernel), control())
        .run(StartPoint::Fresh)
        .unwrap();

    let broken = Arc::new(BrokenKernel {
        calls: AtomicUsize::new(0),
    });
    let orch = orchestrator(dir.path(), broken.clone(), control());
    let checkpoint = Checkpoint::at_strip(orch.parameters(), 3, 3);
    let outcome = orch.run(StartPoint::Resume(checkpoint)).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert_eq!(broken.calls.load(Ordering::SeqCst), 0);
}

#[test_log::test]
fn pyramid_phase_can_be_saved_and_resumed() {
    let dir = tempfile::tempdir().unwrap();
    orchestrator(dir.path(), Arc::new(RampKernel), control())
        .run(StartPoint::Fresh)
        .unwrap();
    let orch = orchestrator(dir.path(), Arc::new(RampKernel), save_requested());
    std::fs::remove_dir_all(orch.tiles().level_dir(0)).unwrap();

    let resume = Checkpoint::at_strip(orch.parameters(), 3, 3);
    let checkpoint = match orch.run(StartPoint::Resume(resume)).unwrap() {
        RunOutcome::Saved { checkpoint } => checkpoint,
        other => panic!("expected a save, got {:?}", other),
    };
    assert_eq!(checkpoint.pyramid_level, Some(4));
    assert_eq!(orch.checkpoints().load(), Some(checkpoint.clone()));

    let again = orchestrator(dir.path(), Arc::new(RampKernel), control());
    again.run(StartPoint::Resume(checkpoint)).unwrap();
    assert!(again.tiles().tile_path(TileCoord::new(0, 0, 0)).exists());
}

#[test_log::test]
fn kernel_failure_aborts_without_progress() {
    let dir = tempfile::tempdir().unwrap();
    let broken = Arc::new(BrokenKernel {
        calls: AtomicUsize::new(0),
    });
    let orch = orchestrator(dir.path(), broken, control());
    let err = orch.run(StartPoint::Fresh).unwrap_err();
    assert!(format!("{:#}", err).contains("kernel unavailable"));
    assert!(orch.checkpoints().load().is_none());
    assert!(!dir.path().join("mandelbrot_deepzoom.dzi").exists());
}

#[test_log::test]
fn downsample_failure_keeps_the_strip_checkpoint_and_writes_no_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let orch = RenderOrchestrator::new(
        test_config(dir.path()),
        1,
        Arc::new(RampKernel),
        Arc::new(BrokenDownsampler),
        control(),
    )
    .unwrap();
    let err = orch.run(StartPoint::Fresh).unwrap_err();
    assert!(format!("{:#}", err).contains("filter crashed"));

    let checkpoint = orch.checkpoints().load().unwrap();
    assert_eq!((checkpoint.current_strip, checkpoint.pyramid_level), (3, None));
    assert!(!orch.tiles().level_dir(4).exists());
    assert!(!dir.path().join("mandelbrot_deepzoom.dzi").exists());
}

#[test]
fn mismatched_checkpoints_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), Arc::new(RampKernel), control());

    let mut other_scale = Checkpoint::at_strip(orch.parameters(), 1, 3);
    other_scale.run.scale = 2;
    assert!(orch.run(StartPoint::Resume(other_scale)).is_err());

    let other_geometry = Checkpoint::at_strip(orch.parameters(), 1, 7);
    assert!(orch.run(StartPoint::Resume(other_geometry)).is_err());

    let mut other_params = Checkpoint::at_strip(orch.parameters(), 1, 3);
    other_params.run.max_iterations += 1;
    assert!(orch.run(StartPoint::Resume(other_params)).is_err());
}

#[test_log::test]
fn checkpoints_from_another_geometry_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let first = orchestrator(dir.path(), Arc::new(RampKernel), save_requested());
    let checkpoint = match first.run(StartPoint::Fresh).unwrap() {
        RunOutcome::Saved { checkpoint } => checkpoint,
        other => panic!("expected a save, got {:?}", other),
    };

    // Same strip count, different window and width.
    let mut config = test_config(dir.path());
    config.render.x_max = 630.0;
    config.render.base_width = 80;
    let widened = RenderOrchestrator::new(config, 1, Arc::new(RampKernel), Arc::new(BoxDownsampler), control()).unwrap();
    assert_eq!(widened.parameters().differences(&checkpoint.run).len(), 2);
    let err = widened.run(StartPoint::Resume(checkpoint.clone())).unwrap_err();
    assert!(format!("{:#}", err).contains("x_max"));

    let mut config = test_config(dir.path());
    config.tiling.tile_size = 8;
    let retiled = RenderOrchestrator::new(config, 1, Arc::new(RampKernel), Arc::new(BoxDownsampler), control()).unwrap();
    assert!(retiled.run(StartPoint::Resume(checkpoint.clone())).is_err());

    // The rejected resumes left the saved run alone.
    assert_eq!(first.checkpoints().load(), Some(checkpoint));
}

#[test]
fn invalid_configuration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.render.base_height = 40;
    let result = RenderOrchestrator::new(config, 1, Arc::new(RampKernel), Arc::new(BoxDownsampler), control());
    assert!(result.is_err());
}
