// src/tiles.rs

//! On-disk storage: the tile tree (`<level>/<col>_<row>.png`) and the spool
//! that holds colored chunks of the strip in flight.

use anyhow::{ensure, Context, Result};
use image::RgbImage;
use log::{debug, trace, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Identifies one tile of the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub level: u32,
    pub col: usize,
    pub row: usize,
}

impl TileCoord {
    pub fn new(level: u32, col: usize, row: usize) -> Self {
        TileCoord { level, col, row }
    }
}

/// Tile tree rooted at `<name>_files`, one directory per level.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
}

impl TileStore {
    pub const EXTENSION: &'static str = "png";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        TileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn level_dir(&self, level: u32) -> PathBuf {
        self.root.join(level.to_string())
    }

    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.level_dir(coord.level)
            .join(format!("{}_{}.{}", coord.col, coord.row, Self::EXTENSION))
    }

    /// Removes any previous tree and starts an empty one.
    pub fn reset(&self) -> Result<()> {
        if self.root.exists() {
            debug!("Removing existing tile tree {}", self.root.display());
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("Failed to remove {}", self.root.display()))?;
        }
        self.ensure_root()
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))
    }

    pub fn ensure_level(&self, level: u32) -> Result<()> {
        let dir = self.level_dir(level);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))
    }

    pub fn save(&self, coord: TileCoord, tile: &RgbImage) -> Result<()> {
        self.ensure_level(coord.level)?;
        let path = self.tile_path(coord);
        tile.save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to write tile {}", path.display()))?;
        trace!("Saved tile {:?} ({}x{})", coord, tile.width(), tile.height());
        Ok(())
    }

    /// Loads a tile. A tile that was never written is `Ok(None)`.
    pub fn load(&self, coord: TileCoord) -> Result<Option<RgbImage>> {
        let path = self.tile_path(coord);
        if !path.exists() {
            return Ok(None);
        }
        let tile = image::open(&path)
            .with_context(|| format!("Failed to read tile {}", path.display()))?
            .into_rgb8();
        Ok(Some(tile))
    }
}

/// Transient per-chunk storage for the strip being assembled. Each chunk is
/// stored as raw packed RGB, its shape is known from the chunk grid.
#[derive(Debug, Clone)]
pub struct ChunkSpool {
    dir: PathBuf,
}

impl ChunkSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ChunkSpool { dir: dir.into() }
    }

    pub fn open(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create spool {}", self.dir.display()))
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("chunk_{:04}.rgb", index))
    }

    pub fn write(&self, index: usize, rgb: &[u8]) -> Result<()> {
        let path = self.chunk_path(index);
        fs::write(&path, rgb).with_context(|| format!("Failed to spool chunk {}", path.display()))
    }

    pub fn read(&self, index: usize, expected_len: usize) -> Result<Vec<u8>> {
        let path = self.chunk_path(index);
        let rgb = fs::read(&path)
            .with_context(|| format!("Failed to read spooled chunk {}", path.display()))?;
        ensure!(
            rgb.len() == expected_len,
            "Spooled chunk {} holds {} bytes, expected {}",
            index,
            rgb.len(),
            expected_len
        );
        Ok(rgb)
    }

    pub fn remove(&self, index: usize) -> Result<()> {
        let path = self.chunk_path(index);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Deletes every spooled chunk, including leftovers of an interrupted run.
    pub fn purge(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()))
            }
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "rgb") {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove stale chunk {}: {}", path.display(), e);
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Removes the spool directory once it is empty.
    pub fn close(&self) {
        if let Err(e) = fs::remove_dir(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!("Spool {} not removed: {}", self.dir.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_paths_follow_level_col_row_layout() {
        let store = TileStore::new("/out/img_files");
        assert_eq!(
            store.tile_path(TileCoord::new(12, 3, 7)),
            PathBuf::from("/out/img_files/12/3_7.png")
        );
    }

    #[test]
    fn saved_tiles_load_back_and_missing_tiles_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = TileStore::new(dir.path().join("t_files"));
        store.reset().unwrap();
        let tile = RgbImage::from_fn(5, 3, |x, y| image::Rgb([x as u8, y as u8, 7]));
        store.save(TileCoord::new(4, 1, 0), &tile).unwrap();

        assert_eq!(store.load(TileCoord::new(4, 1, 0)).unwrap(), Some(tile));
        assert_eq!(store.load(TileCoord::new(4, 2, 0)).unwrap(), None);
    }

    #[test]
    fn reset_clears_previous_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = TileStore::new(dir.path().join("t_files"));
        store.save(TileCoord::new(0, 0, 0), &RgbImage::new(1, 1)).unwrap();
        store.reset().unwrap();
        assert!(store.root().exists());
        assert!(!store.level_dir(0).exists());
    }

    #[test]
    fn spool_round_trip_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let spool = ChunkSpool::new(dir.path().join("spool"));
        spool.open().unwrap();
        spool.write(3, &[1, 2, 3, 4, 5, 6]).unwrap();
        spool.write(9, &[0; 3]).unwrap();

        assert_eq!(spool.read(3, 6).unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert!(spool.read(3, 9).is_err());

        spool.remove(3).unwrap();
        spool.remove(3).unwrap();
        assert_eq!(spool.purge().unwrap(), 1);
        spool.close();
        assert!(!dir.path().join("spool").exists());
    }
}
