//! The consolidated per-site statistics document.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::write_atomic;
use crate::archive::{ClockTime, SiteId};

/// Written in place of a filename when today's folder has no photo yet.
pub const NO_PHOTOS_YET: &str = "no photos yet";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSnapshot {
    pub device_number: String,
    pub time_start: ClockTime,
    pub time_end: ClockTime,
    pub time_interval: u32,
    pub expected_shot_count: u32,
    pub shots_so_far: u32,
    pub photos_count_today: usize,
    #[serde(with = "most_recent_photo")]
    pub most_recent_photo_name: Option<String>,
    /// Whether the device answered the last remote inventory query. Absent
    /// when the query was disabled or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_status: Option<bool>,
}

mod most_recent_photo {
    use super::NO_PHOTOS_YET;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_deref().unwrap_or(NO_PHOTOS_YET))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok((value != NO_PHOTOS_YET).then_some(value))
    }
}

/// Site id to statistics. Serialized as a bare JSON object keyed by site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    sites: BTreeMap<SiteId, SiteSnapshot>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, site: SiteId, entry: SiteSnapshot) {
        self.sites.insert(site, entry);
    }

    pub fn get(&self, site: &str) -> Option<&SiteSnapshot> {
        self.sites.get(site)
    }

    pub fn contains(&self, site: &str) -> bool {
        self.sites.contains_key(site)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, SiteId, SiteSnapshot> {
        self.sites.iter()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&SiteId) -> bool) {
        self.sites.retain(|site, _| keep(site));
    }

    /// Mark each site live or not according to the set of devices that
    /// answered the remote inventory.
    pub fn annotate_liveness(&mut self, live_devices: &BTreeSet<String>) {
        for entry in self.sites.values_mut() {
            entry.live_status = Some(live_devices.contains(&entry.device_number));
        }
    }
}

impl FromIterator<(SiteId, SiteSnapshot)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (SiteId, SiteSnapshot)>>(iter: I) -> Self {
        Self {
            sites: iter.into_iter().collect(),
        }
    }
}

/// Location of the persisted snapshot. Single writer (the statistics job),
/// any number of readers.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current document. Before the first run there is none, which
    /// reads as an empty snapshot.
    pub fn load(&self) -> Result<Snapshot> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {:?} yet", self.path);
                return Ok(Snapshot::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read snapshot {}", self.path.display()))
            }
        };
        serde_json::from_slice(&content)
            .with_context(|| format!("Failed to parse snapshot {}", self.path.display()))
    }

    /// Replace the document. Readers see either the previous or the new
    /// version, never a partial write.
    pub fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let content = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &content)
            .with_context(|| format!("Failed to write snapshot {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn entry(device: &str, latest: Option<&str>) -> SiteSnapshot {
        SiteSnapshot {
            device_number: device.to_string(),
            time_start: ClockTime::parse_hhmm("0900").unwrap(),
            time_end: ClockTime::parse_hhmm("1700").unwrap(),
            time_interval: 30,
            expected_shot_count: 17,
            shots_so_far: 3,
            photos_count_today: latest.map_or(0, |_| 3),
            most_recent_photo_name: latest.map(str::to_string),
            live_status: None,
        }
    }

    fn site(name: &str) -> SiteId {
        SiteId::new(name).unwrap()
    }

    #[test]
    fn test_json_shape() {
        let snapshot: Snapshot = [
            (site("alpha"), entry("1", Some("0930.jpg"))),
            (site("beta"), entry("2", None)),
        ]
        .into_iter()
        .collect();

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["alpha"]["most_recent_photo_name"], "0930.jpg");
        assert_eq!(value["alpha"]["time_start"], "0900");
        assert_eq!(value["beta"]["most_recent_photo_name"], NO_PHOTOS_YET);
        assert_eq!(value["beta"]["photos_count_today"], 0);
        assert!(value["alpha"].get("live_status").is_none());

        let back: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_annotate_liveness() {
        let mut snapshot: Snapshot =
            [(site("alpha"), entry("1", None)), (site("beta"), entry("2", None))]
                .into_iter()
                .collect();

        let live: BTreeSet<String> = ["2".to_string()].into_iter().collect();
        snapshot.annotate_liveness(&live);

        assert_eq!(snapshot.get("alpha").unwrap().live_status, Some(false));
        assert_eq!(snapshot.get("beta").unwrap().live_status, Some(true));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_persist_replaces_whole_document() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state/snapshot.json"));

        let first: Snapshot = [(site("alpha"), entry("1", None)), (site("beta"), entry("2", None))]
            .into_iter()
            .collect();
        store.persist(&first).unwrap();
        assert_eq!(store.load().unwrap(), first);

        let second: Snapshot = [(site("gamma"), entry("3", Some("a.jpg")))].into_iter().collect();
        store.persist(&second).unwrap();
        assert_eq!(store.load().unwrap(), second);

        // Only the document itself is left behind, no temp files.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("state")).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    fn large(prefix: &str, sites: usize) -> Snapshot {
        (0..sites)
            .map(|i| {
                let latest = format!("{}-{:04}.jpg", prefix, i);
                (site(&format!("{}-{:04}", prefix, i)), entry(prefix, Some(&latest)))
            })
            .collect()
    }

    #[test]
    fn test_concurrent_reads_see_whole_documents() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json"));

        let old = large("old", 400);
        let new = large("new", 700);
        store.persist(&old).unwrap();

        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..100 {
                    let next = if round % 2 == 0 { &new } else { &old };
                    store.persist(next).unwrap();
                }
                done.store(true, Ordering::Release);
            });

            let mut reads = 0;
            while !done.load(Ordering::Acquire) || reads == 0 {
                let loaded = store.load().unwrap();
                assert!(
                    loaded == old || loaded == new,
                    "read a mixed snapshot of {} sites",
                    loaded.len()
                );
                reads += 1;
            }
        });
    }
}
