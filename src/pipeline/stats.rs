use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::snapshot::{SiteSnapshot, Snapshot, SnapshotStore};
use crate::archive::{format_date, ArchiveIndex, ClockTime, SettingsError, SiteId, SiteSettings};
use crate::remote::LiveDeviceSource;

/// Result of looking at one site. Sites never abort the run for others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteOutcome {
    Ready(SiteSnapshot),
    SettingsMissing(SettingsError),
}

/// What happened to the liveness annotation in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Liveness {
    #[default]
    Disabled,
    Applied { live_devices: usize },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsReport {
    pub ready: Vec<SiteId>,
    pub setting_missing: Vec<(SiteId, String)>,
    pub liveness: Liveness,
}

impl StatsReport {
    pub fn summary(&self) -> String {
        let liveness = match &self.liveness {
            Liveness::Disabled => "liveness disabled".to_string(),
            Liveness::Applied { live_devices } => format!("{} live devices", live_devices),
            Liveness::Unavailable { .. } => "liveness unavailable".to_string(),
        };
        format!(
            "{} sites, {} with missing settings, {}",
            self.ready.len(),
            self.setting_missing.len(),
            liveness
        )
    }
}

/// Statistics for a single configured site on `today` as of `now`.
pub fn site_outcome(
    index: &ArchiveIndex,
    site: &SiteId,
    today: NaiveDate,
    now: ClockTime,
) -> SiteOutcome {
    let settings = match SiteSettings::read(&index.settings_path(site)) {
        Ok(settings) => settings,
        Err(e) => return SiteOutcome::SettingsMissing(e),
    };

    // Only files with a photo extension count: cameras and uploaders leave
    // partial uploads and sidecar files in the date folder too.
    let (photos_count_today, most_recent_photo_name) = match index.list_photos(site, today) {
        Ok(photos) => (photos.len(), photos.last().cloned()),
        Err(_) => (0, None),
    };

    SiteOutcome::Ready(SiteSnapshot {
        expected_shot_count: settings.expected_shot_count(),
        shots_so_far: settings.shots_so_far(now),
        device_number: settings.device_number,
        time_start: settings.time_start,
        time_end: settings.time_end,
        time_interval: settings.time_interval,
        photos_count_today,
        most_recent_photo_name,
        live_status: None,
    })
}

/// Fold every configured site into a snapshot plus report. Only an
/// unreadable archive root is an error.
pub fn aggregate(
    index: &ArchiveIndex,
    today: NaiveDate,
    now: ClockTime,
) -> Result<(Snapshot, StatsReport)> {
    let mut snapshot = Snapshot::new();
    let mut report = StatsReport::default();

    for site in index.configured_sites()? {
        match site_outcome(index, &site, today, now) {
            SiteOutcome::Ready(entry) => {
                snapshot.insert(site.clone(), entry);
                report.ready.push(site);
            }
            SiteOutcome::SettingsMissing(reason) => {
                warn!("Excluding {} from snapshot: {}", site, reason);
                report.setting_missing.push((site, reason.to_string()));
            }
        }
    }

    Ok((snapshot, report))
}

/// Builds and publishes the snapshot document.
pub struct StatsAggregator {
    index: Arc<ArchiveIndex>,
    store: SnapshotStore,
    bridge: Option<Arc<dyn LiveDeviceSource>>,
    bridge_timeout: Duration,
}

impl StatsAggregator {
    pub fn new(index: Arc<ArchiveIndex>, store: SnapshotStore) -> Self {
        Self {
            index,
            store,
            bridge: None,
            bridge_timeout: Duration::from_secs(10),
        }
    }

    /// Annotate snapshots with device liveness from `bridge`. `timeout` caps
    /// the whole query regardless of what the bridge does internally.
    pub fn with_bridge(mut self, bridge: Arc<dyn LiveDeviceSource>, timeout: Duration) -> Self {
        self.bridge = Some(bridge);
        self.bridge_timeout = timeout;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn run(&self, now: NaiveDateTime) -> Result<StatsReport> {
        let index = Arc::clone(&self.index);
        let today = now.date();
        let clock = ClockTime::from(now.time());

        let (mut snapshot, mut report) =
            tokio::task::spawn_blocking(move || aggregate(&index, today, clock)).await??;

        report.liveness = self.annotate(&mut snapshot).await;

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.persist(&snapshot)).await??;

        info!("Statistics run for {}: {}", format_date(today), report.summary());
        Ok(report)
    }

    async fn annotate(&self, snapshot: &mut Snapshot) -> Liveness {
        let Some(bridge) = &self.bridge else {
            return Liveness::Disabled;
        };

        match tokio::time::timeout(self.bridge_timeout, bridge.fetch_live_devices()).await {
            Ok(Ok(live)) => {
                snapshot.annotate_liveness(&live);
                Liveness::Applied {
                    live_devices: live.len(),
                }
            }
            Ok(Err(e)) => {
                warn!("Remote status unavailable, publishing without liveness: {}", e);
                Liveness::Unavailable { reason: e.to_string() }
            }
            Err(_) => {
                warn!(
                    "Remote status query exceeded {:?}, publishing without liveness",
                    self.bridge_timeout
                );
                Liveness::Unavailable {
                    reason: format!("timed out after {:?}", self.bridge_timeout),
                }
            }
        }
    }
}
