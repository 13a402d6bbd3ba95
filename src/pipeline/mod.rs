//! Scan-derive-reconcile pipeline.
//!
//! Two jobs read the archive and write disjoint artifacts:
//!
//! - `thumbnails` keeps one preview per live site in the thumbnail directory
//!   and deletes previews of sites that vanished.
//! - `statistics` computes per-site shooting counts, optionally merges remote
//!   device liveness, and replaces the snapshot document.
//!
//! Neither touches the photos themselves.

pub mod placeholder;
pub mod snapshot;
pub mod stats;
pub mod thumbnails;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::archive::ArchiveIndex;
use crate::config::Config;
use crate::jobs::Job;
use crate::remote::SshStatusBridge;

pub use placeholder::Placeholder;
pub use snapshot::{SiteSnapshot, Snapshot, SnapshotStore, NO_PHOTOS_YET};
pub use stats::{Liveness, SiteOutcome, StatsAggregator, StatsReport};
pub use thumbnails::{thumbnail_path, thumbnail_sites, ThumbnailDeriver, ThumbnailReport};

/// Write `bytes` to a temp file next to `path`, sync it, then rename over
/// `path`. Readers never observe a half-written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// The deriving half of the system, wired from configuration.
pub struct Pipeline {
    pub thumbnails: Arc<ThumbnailDeriver>,
    pub statistics: Arc<StatsAggregator>,
}

impl Pipeline {
    pub fn from_config(
        config: &Config,
        index: Arc<ArchiveIndex>,
        placeholder: Placeholder,
    ) -> Result<Self> {
        let thumbnails = ThumbnailDeriver::new(
            Arc::clone(&index),
            &config.thumbnails,
            placeholder,
            config.schedule.workers,
        )?;

        let mut statistics = StatsAggregator::new(index, SnapshotStore::new(&config.snapshot.path));
        if let Some(bridge) = SshStatusBridge::from_config(&config.remote) {
            // Leave the bridge room to report its own timeout first.
            let cap = config.remote.timeout() + Duration::from_secs(1);
            statistics = statistics.with_bridge(Arc::new(bridge), cap);
        }

        Ok(Self {
            thumbnails: Arc::new(thumbnails),
            statistics: Arc::new(statistics),
        })
    }

    pub fn jobs(&self) -> Vec<Arc<dyn Job>> {
        vec![
            Arc::new(ThumbnailJob {
                deriver: Arc::clone(&self.thumbnails),
            }),
            Arc::new(StatisticsJob {
                aggregator: Arc::clone(&self.statistics),
            }),
        ]
    }
}

struct ThumbnailJob {
    deriver: Arc<ThumbnailDeriver>,
}

#[async_trait]
impl Job for ThumbnailJob {
    fn name(&self) -> &'static str {
        "thumbnails"
    }

    async fn run(&self) -> Result<String> {
        let deriver = Arc::clone(&self.deriver);
        let today = Local::now().date_naive();
        let report = tokio::task::spawn_blocking(move || deriver.run(today)).await??;
        Ok(report.summary())
    }
}

struct StatisticsJob {
    aggregator: Arc<StatsAggregator>,
}

#[async_trait]
impl Job for StatisticsJob {
    fn name(&self) -> &'static str {
        "statistics"
    }

    async fn run(&self) -> Result<String> {
        let report = self.aggregator.run(Local::now().naive_local()).await?;
        Ok(report.summary())
    }
}
