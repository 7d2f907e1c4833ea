//! Overlay catalog: marker id -> overlay image.
//!
//! Built once before the pipeline starts and shared read-only (`Arc`) with the
//! processing stage. Ids whose image is missing or unreadable are left out;
//! the compositor then skips those markers on every frame.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;

/// Placeholder substituted with the marker id in file name patterns.
pub const ID_PLACEHOLDER: &str = "{id}";

pub const DEFAULT_PATTERN: &str = "mapa_{id}.png";

/// Immutable overlay lookup table.
#[derive(Clone, Debug, Default)]
pub struct OverlayCatalog {
    entries: BTreeMap<u32, RgbImage>,
}

impl OverlayCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from in-memory images. A repeated id keeps the last image.
    pub fn from_images(images: impl IntoIterator<Item = (u32, RgbImage)>) -> Self {
        let mut entries = BTreeMap::new();
        for (id, image) in images {
            if image.width() == 0 || image.height() == 0 {
                log::warn!("overlay for marker {} is empty; skipping", id);
                continue;
            }
            entries.insert(id, image);
        }
        Self { entries }
    }

    /// Load one image per id from `dir`, naming files by `pattern` with `{id}` substituted.
    ///
    /// Images that fail to load are logged and left out. Only a bad pattern is an error.
    pub fn load_dir(dir: &Path, pattern: &str, ids: RangeInclusive<u32>) -> Result<Self> {
        if !pattern.contains(ID_PLACEHOLDER) {
            return Err(anyhow!(
                "overlay file pattern '{}' must contain {}",
                pattern,
                ID_PLACEHOLDER
            ));
        }
        let mut entries = BTreeMap::new();
        for id in ids {
            let path = dir.join(pattern.replace(ID_PLACEHOLDER, &id.to_string()));
            match load_overlay(&path) {
                Ok(image) => {
                    log::debug!(
                        "overlay {} loaded from {} ({}x{})",
                        id,
                        path.display(),
                        image.width(),
                        image.height()
                    );
                    entries.insert(id, image);
                }
                Err(e) => log::error!("overlay {} unavailable: {:#}", id, e),
            }
        }
        log::info!(
            "overlay catalog: {} images from {}",
            entries.len(),
            dir.display()
        );
        Ok(Self { entries })
    }

    pub fn get(&self, marker_id: u32) -> Option<&RgbImage> {
        self.entries.get(&marker_id)
    }

    pub fn contains(&self, marker_id: u32) -> bool {
        self.entries.contains_key(&marker_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn load_overlay(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("read {}", path.display()))?;
    let image = image.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("{} has no pixels", path.display()));
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn load_dir_skips_missing_and_corrupt_images() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::from_pixel(4, 3, Rgb([255, 0, 0])).save(dir.path().join("mapa_1.png"))?;
        RgbImage::from_pixel(2, 2, Rgb([0, 255, 0])).save(dir.path().join("mapa_3.png"))?;
        std::fs::write(dir.path().join("mapa_2.png"), b"not a png")?;

        let catalog = OverlayCatalog::load_dir(dir.path(), DEFAULT_PATTERN, 1..=4)?;

        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(catalog.get(1).map(|i| i.dimensions()), Some((4, 3)));
        assert!(!catalog.contains(2));
        assert!(!catalog.contains(4));
        Ok(())
    }

    #[test]
    fn pattern_without_placeholder_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OverlayCatalog::load_dir(dir.path(), "overlay.png", 1..=2).is_err());
    }

    #[test]
    fn from_images_drops_empty_overlays() {
        let catalog = OverlayCatalog::from_images([
            (1, RgbImage::new(0, 0)),
            (2, RgbImage::from_pixel(1, 1, Rgb([1, 1, 1]))),
        ]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(2));
    }
}
