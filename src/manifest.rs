// src/manifest.rs

//! Deep Zoom (`.dzi`) descriptor for the finished pyramid.

use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

const DZI_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2008";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepZoomManifest {
    pub format: String,
    pub tile_size: usize,
    pub overlap: usize,
    pub width: usize,
    pub height: usize,
}

impl DeepZoomManifest {
    pub fn new(format: &str, tile_size: usize, width: usize, height: usize) -> Self {
        DeepZoomManifest {
            format: format.to_string(),
            tile_size,
            overlap: 0,
            width,
            height,
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<Image xmlns="{ns}"
       Format="{format}"
       Overlap="{overlap}"
       TileSize="{tile_size}">
    <Size Height="{height}" Width="{width}"/>
</Image>"#,
            ns = DZI_NAMESPACE,
            format = self.format,
            overlap = self.overlap,
            tile_size = self.tile_size,
            height = self.height,
            width = self.width,
        )
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_xml())
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        info!("Created .dzi file: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_declares_geometry() {
        let xml = DeepZoomManifest::new("png", 256, 40960, 30720).to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("Format=\"png\""));
        assert!(xml.contains("Overlap=\"0\""));
        assert!(xml.contains("TileSize=\"256\""));
        assert!(xml.contains("<Size Height=\"30720\" Width=\"40960\"/>"));
    }

    #[test]
    fn write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dzi");
        let manifest = DeepZoomManifest::new("png", 16, 64, 48);
        manifest.write(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), manifest.to_xml());
    }
}
