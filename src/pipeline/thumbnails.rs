use anyhow::{Context, Result};
use chrono::NaiveDate;
use image::{DynamicImage, ImageFormat};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::placeholder::Placeholder;
use super::write_atomic;
use crate::archive::{format_date, ArchiveIndex, SiteId};
use crate::config::ThumbnailConfig;

/// What one thumbnail run did, per site.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThumbnailReport {
    pub thumbnail_made: Vec<SiteId>,
    pub no_photo_yet: Vec<SiteId>,
    /// Stems of thumbnails deleted because their site is gone.
    pub removed: Vec<String>,
    pub failed: Vec<(SiteId, String)>,
}

impl ThumbnailReport {
    pub fn summary(&self) -> String {
        format!(
            "{} made, {} without photo, {} removed, {} failed",
            self.thumbnail_made.len(),
            self.no_photo_yet.len(),
            self.removed.len(),
            self.failed.len()
        )
    }
}

enum ThumbnailOutcome {
    Made,
    NoPhotoYet,
    Failed(String),
}

/// Keeps one preview image per live site in the thumbnail directory.
pub struct ThumbnailDeriver {
    index: Arc<ArchiveIndex>,
    dir: PathBuf,
    width: u32,
    height: u32,
    placeholder: Placeholder,
    pool: rayon::ThreadPool,
}

impl ThumbnailDeriver {
    pub fn new(
        index: Arc<ArchiveIndex>,
        config: &ThumbnailConfig,
        placeholder: Placeholder,
        workers: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("thumbnail-{}", i))
            .build()
            .context("Failed to build thumbnail worker pool")?;

        Ok(Self {
            index,
            dir: config.dir.clone(),
            width: config.width,
            height: config.height,
            placeholder,
            pool,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn thumbnail_path(&self, site: &SiteId) -> PathBuf {
        thumbnail_path(&self.dir, site)
    }

    /// Refresh every live site's thumbnail for `today`, then drop thumbnails
    /// of sites that no longer exist.
    ///
    /// Fails only when the archive or the thumbnail directory is unusable;
    /// a bad photo lands in [`ThumbnailReport::failed`].
    pub fn run(&self, today: NaiveDate) -> Result<ThumbnailReport> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create thumbnail directory {}", self.dir.display())
        })?;

        let sites = self.index.configured_sites()?;

        let outcomes: Vec<(SiteId, ThumbnailOutcome)> = self.pool.install(|| {
            sites
                .par_iter()
                .map(|site| (site.clone(), self.derive_site(site, today)))
                .collect()
        });

        let mut report = ThumbnailReport::default();
        for (site, outcome) in outcomes {
            match outcome {
                ThumbnailOutcome::Made => report.thumbnail_made.push(site),
                ThumbnailOutcome::NoPhotoYet => report.no_photo_yet.push(site),
                ThumbnailOutcome::Failed(reason) => {
                    warn!("Thumbnail for {} failed: {}", site, reason);
                    report.failed.push((site, reason));
                }
            }
        }

        report.removed = self.prune(&sites)?;

        info!("Thumbnail run for {}: {}", format_date(today), report.summary());
        Ok(report)
    }

    fn derive_site(&self, site: &SiteId, today: NaiveDate) -> ThumbnailOutcome {
        let target = self.thumbnail_path(site);

        let latest = match self.index.latest_photo(site, today) {
            Ok(name) => name,
            Err(e) if e.is_not_found() => {
                debug!("No photo for {} on {} yet", site, format_date(today));
                return match write_atomic(&target, self.placeholder.bytes()) {
                    Ok(()) => ThumbnailOutcome::NoPhotoYet,
                    Err(e) => ThumbnailOutcome::Failed(format!("writing placeholder: {}", e)),
                };
            }
            Err(e) => return ThumbnailOutcome::Failed(e.to_string()),
        };

        let source = match self.index.photo_path(site, today, &latest) {
            Ok(path) => path,
            Err(e) => return ThumbnailOutcome::Failed(e.to_string()),
        };

        match self.render(&source) {
            Ok(jpeg) => match write_atomic(&target, &jpeg) {
                Ok(()) => ThumbnailOutcome::Made,
                Err(e) => ThumbnailOutcome::Failed(format!("writing thumbnail: {}", e)),
            },
            Err(e) => ThumbnailOutcome::Failed(format!("{}: {:#}", latest, e)),
        }
    }

    fn render(&self, source: &Path) -> Result<Vec<u8>> {
        let img = image::open(source).context("decode failed")?;
        let thumbnail = img.thumbnail(self.width, self.height);
        Ok(encode_jpeg(&thumbnail)?)
    }

    /// Delete thumbnails whose site is not in `live`.
    fn prune(&self, live: &BTreeSet<SiteId>) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("jpg") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if live.contains(stem) {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed thumbnail of vanished site {}", stem);
                    removed.push(stem.to_string());
                }
                Err(e) => warn!("Failed to remove stale thumbnail {:?}: {}", path, e),
            }
        }

        removed.sort();
        Ok(removed)
    }
}

pub fn thumbnail_path(dir: &Path, site: &SiteId) -> PathBuf {
    dir.join(format!("{}.jpg", site))
}

/// Sites that currently have a thumbnail. A missing directory has none.
pub fn thumbnail_sites(dir: &Path) -> std::io::Result<BTreeSet<SiteId>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e),
    };

    let mut sites = BTreeSet::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("jpg") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str());
        if let Some(site) = stem.and_then(|s| SiteId::new(s).ok()) {
            sites.insert(site);
        }
    }
    Ok(sites)
}

/// Encode as baseline JPEG. Alpha is dropped since JPEG has none.
pub fn encode_jpeg(image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::parse_date;
    use crate::config::ArchiveConfig;
    use image::{Rgb, RgbImage};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        thumbs: PathBuf,
        deriver: ThumbnailDeriver,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().join("archive");
        let thumbs = dir.path().join("thumbs");
        fs::create_dir_all(&root).unwrap();

        let index = Arc::new(ArchiveIndex::new(&ArchiveConfig {
            root: root.clone(),
            ..ArchiveConfig::default()
        }));
        let config = ThumbnailConfig {
            dir: thumbs.clone(),
            ..ThumbnailConfig::default()
        };
        let placeholder = Placeholder::from_config(&config).unwrap();
        let deriver = ThumbnailDeriver::new(index, &config, placeholder, 2).unwrap();

        Fixture {
            _dir: dir,
            root,
            thumbs,
            deriver,
        }
    }

    fn add_site(root: &Path, name: &str) {
        fs::create_dir_all(root.join(name).join("setting")).unwrap();
    }

    fn add_photo(root: &Path, site: &str, date: &str, name: &str, size: (u32, u32)) {
        let dir = root.join(site).join(date);
        fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(size.0, size.1, Rgb([10, 200, 30]))
            .save(dir.join(name))
            .unwrap();
    }

    fn thumbnail_stems(dir: &Path) -> Vec<String> {
        let mut stems: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jpg"))
            .map(|p| p.file_stem().unwrap().to_string_lossy().to_string())
            .collect();
        stems.sort();
        stems
    }

    fn today() -> NaiveDate {
        parse_date("2024-06-01").unwrap()
    }

    #[test]
    fn test_run_makes_resized_thumbnails_and_placeholders() {
        let fx = fixture();
        add_site(&fx.root, "alpha");
        add_site(&fx.root, "beta");
        add_photo(&fx.root, "alpha", "2024-06-01", "0900.jpg", (64, 48));
        add_photo(&fx.root, "alpha", "2024-06-01", "0930.jpg", (1200, 600));
        // Yesterday's photo must not be used for today's thumbnail.
        add_photo(&fx.root, "beta", "2024-05-31", "1700.jpg", (64, 48));
        // Not configured yet: skipped.
        fs::create_dir_all(fx.root.join("gamma/2024-06-01")).unwrap();

        let report = fx.deriver.run(today()).unwrap();

        assert_eq!(report.thumbnail_made, vec![SiteId::new("alpha").unwrap()]);
        assert_eq!(report.no_photo_yet, vec![SiteId::new("beta").unwrap()]);
        assert!(report.failed.is_empty());
        assert!(report.removed.is_empty());

        let alpha = image::open(fx.thumbs.join("alpha.jpg")).unwrap();
        assert_eq!((alpha.width(), alpha.height()), (300, 150));

        let beta = fs::read(fx.thumbs.join("beta.jpg")).unwrap();
        assert_eq!(beta, fx.deriver.placeholder.bytes());

        assert_eq!(thumbnail_stems(&fx.thumbs), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_vanished_sites_are_pruned() {
        let fx = fixture();
        add_site(&fx.root, "alpha");
        add_site(&fx.root, "beta");
        add_site(&fx.root, "gamma");

        fx.deriver.run(today()).unwrap();
        assert_eq!(thumbnail_stems(&fx.thumbs), vec!["alpha", "beta", "gamma"]);

        fs::remove_dir_all(fx.root.join("beta")).unwrap();
        fs::remove_dir_all(fx.root.join("gamma/setting")).unwrap();

        let report = fx.deriver.run(today()).unwrap();
        assert_eq!(report.removed, vec!["beta", "gamma"]);
        assert_eq!(thumbnail_stems(&fx.thumbs), vec!["alpha"]);
    }

    #[test]
    fn test_corrupt_photo_does_not_stop_other_sites() {
        let fx = fixture();
        add_site(&fx.root, "alpha");
        add_site(&fx.root, "broken");
        add_photo(&fx.root, "alpha", "2024-06-01", "0900.jpg", (64, 48));
        let day = fx.root.join("broken/2024-06-01");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("0900.jpg"), b"definitely not a jpeg").unwrap();

        let report = fx.deriver.run(today()).unwrap();

        assert_eq!(report.thumbnail_made, vec![SiteId::new("alpha").unwrap()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "broken");
        assert!(fx.thumbs.join("alpha.jpg").exists());
    }

    #[test]
    fn test_unreachable_archive_fails_run() {
        let fx = fixture();
        fs::remove_dir_all(&fx.root).unwrap();
        assert!(fx.deriver.run(today()).is_err());
    }
}
