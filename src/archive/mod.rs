//! Read-only view over the camera archive.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/<site>/setting/settings.txt
//! <root>/<site>/<YYYY-MM-DD>/<photo>
//! <root>/<site>/daily/<video>
//! ```
//!
//! Photo filenames are produced by the cameras with a fixed-width timestamp
//! prefix, so lexicographic order within a date folder is capture order.
//! "Latest" everywhere in this crate means "lexicographically greatest"; the
//! index does not look at file timestamps.

pub mod settings;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ArchiveConfig;

pub use settings::{ClockTime, SettingsError, SiteSettings, SETTINGS_DIR, SETTINGS_FILE};

/// Sub-directory holding the daily recap videos.
pub const DAILY_DIR: &str = "daily";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive root {} is unreachable: {source}", .path.display())]
    Unreachable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid name {0:?}")]
    InvalidName(String),
}

impl ArchiveError {
    /// True for errors that mean "nothing there", as opposed to a broken archive.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound(_) | ArchiveError::InvalidName(_))
    }
}

/// Name of a site directory. Always a single, non-hidden path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId(String);

impl SiteId {
    pub fn new(name: impl Into<String>) -> Result<Self, ArchiveError> {
        let name = name.into();
        validate_component(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SiteId {
    type Error = ArchiveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SiteId::new(value)
    }
}

impl From<SiteId> for String {
    fn from(site: SiteId) -> Self {
        site.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SiteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SiteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Reject anything that could escape the directory it is joined onto.
pub fn validate_component(name: &str) -> Result<(), ArchiveError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).components().count() != 1;
    if bad {
        return Err(ArchiveError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn parse_date(name: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(name, DATE_FORMAT).ok()?;
    // chrono accepts unpadded fields; folder names are always zero-padded.
    (date.format(DATE_FORMAT).to_string() == name).then_some(date)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone)]
pub struct ArchiveIndex {
    root: PathBuf,
    photo_extensions: Vec<String>,
    video_extensions: Vec<String>,
}

impl ArchiveIndex {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            root: config.root.clone(),
            photo_extensions: lowercase_all(&config.photo_extensions),
            video_extensions: lowercase_all(&config.video_extensions),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All site directories under the archive root.
    pub fn list_sites(&self) -> Result<BTreeSet<SiteId>, ArchiveError> {
        if let Err(source) = std::fs::read_dir(&self.root) {
            return Err(ArchiveError::Unreachable {
                path: self.root.clone(),
                source,
            });
        }

        Ok(children(&self.root)
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| entry_name(&e))
            .filter_map(|name| SiteId::new(name).ok())
            .collect())
    }

    /// Sites that have a settings directory. These are the live sites the
    /// pipeline derives artifacts for.
    pub fn configured_sites(&self) -> Result<BTreeSet<SiteId>, ArchiveError> {
        let mut sites = self.list_sites()?;
        sites.retain(|site| self.has_settings(site));
        Ok(sites)
    }

    pub fn has_settings(&self, site: &SiteId) -> bool {
        self.site_dir(site).join(SETTINGS_DIR).is_dir()
    }

    pub fn settings_path(&self, site: &SiteId) -> PathBuf {
        self.site_dir(site).join(SETTINGS_DIR).join(SETTINGS_FILE)
    }

    /// Date folders of a site in ascending order.
    pub fn list_dates(&self, site: &SiteId) -> Result<Vec<NaiveDate>, ArchiveError> {
        let dir = self.existing_site_dir(site)?;

        let mut dates: Vec<NaiveDate> = children(&dir)
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| entry_name(&e))
            .filter_map(|name| parse_date(&name))
            .collect();
        dates.sort();

        Ok(dates)
    }

    pub fn has_date(&self, site: &SiteId, date: NaiveDate) -> bool {
        self.date_dir(site, date).is_dir()
    }

    /// Photo filenames of one date folder in ascending (capture) order.
    pub fn list_photos(&self, site: &SiteId, date: NaiveDate) -> Result<Vec<String>, ArchiveError> {
        let dir = self.date_dir(site, date);
        if !dir.is_dir() {
            return Err(ArchiveError::NotFound(format!("{}/{}", site, format_date(date))));
        }
        Ok(self.files_with_extension(&dir, &self.photo_extensions))
    }

    pub fn latest_date(&self, site: &SiteId) -> Result<NaiveDate, ArchiveError> {
        self.list_dates(site)?
            .pop()
            .ok_or_else(|| ArchiveError::NotFound(format!("dates for {}", site)))
    }

    pub fn latest_photo(&self, site: &SiteId, date: NaiveDate) -> Result<String, ArchiveError> {
        let photos = self.list_photos(site, date)?;
        warn_on_mixed_widths(site, date, &photos);
        photos
            .into_iter()
            .next_back()
            .ok_or_else(|| {
                ArchiveError::NotFound(format!("photos for {}/{}", site, format_date(date)))
            })
    }

    pub fn photo_path(
        &self,
        site: &SiteId,
        date: NaiveDate,
        name: &str,
    ) -> Result<PathBuf, ArchiveError> {
        validate_component(name)?;
        if !has_extension(Path::new(name), &self.photo_extensions) {
            return Err(ArchiveError::NotFound(name.to_string()));
        }
        let path = self.date_dir(site, date).join(name);
        if !path.is_file() {
            return Err(ArchiveError::NotFound(format!("{}/{}/{}", site, format_date(date), name)));
        }
        Ok(path)
    }

    /// Daily recap videos of a site. A site without a `daily` folder simply
    /// has none yet.
    pub fn list_videos(&self, site: &SiteId) -> Result<Vec<String>, ArchiveError> {
        let dir = self.existing_site_dir(site)?.join(DAILY_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(self.files_with_extension(&dir, &self.video_extensions))
    }

    pub fn video_path(&self, site: &SiteId, name: &str) -> Result<PathBuf, ArchiveError> {
        validate_component(name)?;
        if !has_extension(Path::new(name), &self.video_extensions) {
            return Err(ArchiveError::NotFound(name.to_string()));
        }
        let path = self.site_dir(site).join(DAILY_DIR).join(name);
        if !path.is_file() {
            return Err(ArchiveError::NotFound(format!("{}/{}/{}", site, DAILY_DIR, name)));
        }
        Ok(path)
    }

    fn site_dir(&self, site: &SiteId) -> PathBuf {
        self.root.join(site.as_str())
    }

    fn existing_site_dir(&self, site: &SiteId) -> Result<PathBuf, ArchiveError> {
        let dir = self.site_dir(site);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(ArchiveError::NotFound(format!("site {}", site)))
        }
    }

    fn date_dir(&self, site: &SiteId, date: NaiveDate) -> PathBuf {
        self.site_dir(site).join(format_date(date))
    }

    fn files_with_extension(&self, dir: &Path, extensions: &[String]) -> Vec<String> {
        let mut names: Vec<String> = children(dir)
            .filter(|e| e.file_type().is_file())
            .filter(|e| has_extension(e.path(), extensions))
            .filter_map(|e| entry_name(&e))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

/// Direct children of a directory. Unreadable entries are logged and skipped.
fn children(dir: &Path) -> impl Iterator<Item = DirEntry> + '_ {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("Skipping unreadable entry in {:?}: {}", dir, e);
                None
            }
        })
}

fn entry_name(entry: &DirEntry) -> Option<String> {
    entry.file_name().to_str().map(str::to_string)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| *e == ext))
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim_start_matches('.').to_lowercase()).collect()
}

/// Lexicographic order only matches capture order while names share a width.
fn warn_on_mixed_widths(site: &SiteId, date: NaiveDate, photos: &[String]) {
    let mut widths = photos.iter().map(|p| p.len());
    if let Some(first) = widths.next() {
        if widths.any(|w| w != first) {
            warn!(
                "Photo names under {}/{} differ in length; \
                 latest-photo selection may not follow capture order",
                site,
                format_date(date)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn index_at(root: &Path) -> ArchiveIndex {
        ArchiveIndex::new(&ArchiveConfig {
            root: root.to_path_buf(),
            ..ArchiveConfig::default()
        })
    }

    fn site(name: &str) -> SiteId {
        SiteId::new(name).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_site_id_rejects_traversal() {
        assert!(SiteId::new("cam-01").is_ok());
        assert!(SiteId::new("..").is_err());
        assert!(SiteId::new(".hidden").is_err());
        assert!(SiteId::new("a/b").is_err());
        assert!(SiteId::new("a\\b").is_err());
        assert!(SiteId::new("").is_err());
    }

    #[test]
    fn test_parse_date_requires_padding() {
        assert_eq!(parse_date("2024-03-07"), NaiveDate::from_ymd_opt(2024, 3, 7));
        assert_eq!(parse_date("2024-3-7"), None);
        assert_eq!(parse_date("setting"), None);
    }

    #[test]
    fn test_list_sites_and_dates() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("alpha/setting")).unwrap();
        fs::create_dir_all(root.join("alpha/2024-05-02")).unwrap();
        fs::create_dir_all(root.join("alpha/2024-05-01")).unwrap();
        fs::create_dir_all(root.join("alpha/daily")).unwrap();
        File::create(root.join("alpha/2024-05-03")).unwrap();
        fs::create_dir_all(root.join("beta")).unwrap();
        fs::create_dir_all(root.join(".trash")).unwrap();
        File::create(root.join("notes.txt")).unwrap();

        let index = index_at(root);

        let sites: Vec<String> =
            index.list_sites().unwrap().into_iter().map(String::from).collect();
        assert_eq!(sites, vec!["alpha", "beta"]);

        let configured: Vec<SiteId> = index.configured_sites().unwrap().into_iter().collect();
        assert_eq!(configured, vec![site("alpha")]);

        let dates = index.list_dates(&site("alpha")).unwrap();
        assert_eq!(dates, vec![date("2024-05-01"), date("2024-05-02")]);
        assert_eq!(index.latest_date(&site("alpha")).unwrap(), date("2024-05-02"));

        assert!(index.list_dates(&site("beta")).unwrap().is_empty());
        assert!(index.latest_date(&site("beta")).unwrap_err().is_not_found());
        assert!(index.list_dates(&site("gamma")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_unreachable_root() {
        let dir = tempdir().unwrap();
        let index = index_at(&dir.path().join("missing"));
        assert!(matches!(index.list_sites(), Err(ArchiveError::Unreachable { .. })));
    }

    #[test]
    fn test_list_photos_filters_and_orders() {
        let dir = tempdir().unwrap();
        let day = dir.path().join("alpha/2024-05-01");
        fs::create_dir_all(&day).unwrap();
        for name in ["20240501_0930.jpg", "20240501_0900.JPG", "20240501_1000.jpg", "readme.txt"] {
            File::create(day.join(name)).unwrap();
        }

        let index = index_at(dir.path());
        let photos = index.list_photos(&site("alpha"), date("2024-05-01")).unwrap();
        assert_eq!(photos, vec!["20240501_0900.JPG", "20240501_0930.jpg", "20240501_1000.jpg"]);

        let latest = index.latest_photo(&site("alpha"), date("2024-05-01")).unwrap();
        assert_eq!(latest, "20240501_1000.jpg");

        assert!(index
            .list_photos(&site("alpha"), date("2024-05-02"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_latest_photo_in_empty_folder_is_not_found() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("alpha/2024-05-01")).unwrap();

        let index = index_at(dir.path());
        let err = index.latest_photo(&site("alpha"), date("2024-05-01")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_photo_and_video_paths() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("alpha/2024-05-01")).unwrap();
        fs::create_dir_all(root.join("alpha/daily")).unwrap();
        File::create(root.join("alpha/2024-05-01/a.jpg")).unwrap();
        File::create(root.join("alpha/daily/2024-05-01.mp4")).unwrap();

        let index = index_at(root);
        let alpha = site("alpha");

        assert!(index.photo_path(&alpha, date("2024-05-01"), "a.jpg").is_ok());
        assert!(index.photo_path(&alpha, date("2024-05-01"), "b.jpg").is_err());
        assert!(index.photo_path(&alpha, date("2024-05-01"), "../daily/2024-05-01.mp4").is_err());

        assert_eq!(index.list_videos(&alpha).unwrap(), vec!["2024-05-01.mp4"]);
        assert!(index.video_path(&alpha, "2024-05-01.mp4").is_ok());
        assert!(index.video_path(&alpha, "a.jpg").is_err());

        fs::create_dir_all(root.join("beta")).unwrap();
        assert!(index.list_videos(&site("beta")).unwrap().is_empty());
    }
}
