use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory holding one sub-directory per camera site.
    #[serde(default = "default_archive_root")]
    pub root: PathBuf,

    #[serde(default = "default_photo_extensions")]
    pub photo_extensions: Vec<String>,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("/srv/sitewatch/archive")
}

fn default_photo_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

fn default_video_extensions() -> Vec<String> {
    vec!["mp4".to_string(), "webm".to_string(), "mov".to_string()]
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: default_archive_root(),
            photo_extensions: default_photo_extensions(),
            video_extensions: default_video_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_thumb_width")]
    pub width: u32,

    #[serde(default = "default_thumb_height")]
    pub height: u32,

    /// Image shown when a site has no photo yet today, or when a caller asks
    /// for an image they may not see. A flat grey frame is generated if unset.
    #[serde(default)]
    pub placeholder: Option<PathBuf>,
}

fn default_thumb_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("sitewatch/thumbnails")
}

fn default_thumb_width() -> u32 {
    300
}

fn default_thumb_height() -> u32 {
    200
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            dir: default_thumb_dir(),
            width: default_thumb_width(),
            height: default_thumb_height(),
            placeholder: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,
}

fn default_snapshot_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("sitewatch/snapshot.json")
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Start hour of the active window (0-23).
    #[serde(default)]
    pub hours_start: Option<u8>,

    /// End hour of the active window (0-23). May be lower than the start hour
    /// for overnight windows.
    #[serde(default)]
    pub hours_end: Option<u8>,

    /// Upper bound on threads decoding and resizing photos.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

fn default_interval_minutes() -> u64 {
    10
}

fn default_workers() -> usize {
    4
}

fn default_run_on_start() -> bool {
    true
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            hours_start: None,
            hours_end: None,
            workers: default_workers(),
            run_on_start: default_run_on_start(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Command run on the remote host; prints one live device number per line.
    #[serde(default = "default_remote_command")]
    pub command: String,

    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_command() -> String {
    "list-live-devices".to_string()
}

fn default_remote_timeout() -> u64 {
    10
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            user: None,
            port: None,
            identity_file: None,
            command: default_remote_command(),
            timeout_secs: default_remote_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_users_file")]
    pub users_file: PathBuf,
}

fn default_users_file() -> PathBuf {
    Config::config_dir().join("users.toml")
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            users_file: default_users_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive: ArchiveConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            snapshot: SnapshotConfig::default(),
            schedule: ScheduleConfig::default(),
            remote: RemoteConfig::default(),
            server: ServerConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl Config {
    /// Load from `SITEWATCH_CONFIG` or the default location, writing a default
    /// file on first start.
    pub fn load() -> Result<Self> {
        Self::load_or_create(&Self::config_path())
    }

    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Load `path` if it exists, otherwise run on defaults without writing
    /// anything.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SITEWATCH_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sitewatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [archive]
            root = "/data/cams"

            [schedule]
            interval_minutes = 5
            hours_start = 6
            hours_end = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.archive.root, PathBuf::from("/data/cams"));
        assert_eq!(config.archive.photo_extensions, default_photo_extensions());
        assert_eq!(config.schedule.interval(), Duration::from_secs(300));
        assert_eq!(config.schedule.hours_start, Some(6));
        assert_eq!(config.thumbnails.width, 300);
        assert_eq!(config.thumbnails.height, 200);
        assert!(!config.remote.enabled);
        assert_eq!(config.remote.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:8080".parse().unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.bind, config.server.bind);
    }
}
