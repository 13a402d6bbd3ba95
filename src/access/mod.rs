//! Who may see which sites.
//!
//! Every read the server performs goes through a [`Grant`]. Filtering is
//! pure: it takes a view and returns the narrowed view, never erroring.

pub mod users;

use std::collections::BTreeSet;

use crate::archive::SiteId;
use crate::pipeline::Snapshot;

pub use users::{token_digest, IdentityError, Role, UserDirectory, UserRecord};

/// Per-user site visibility.
pub trait IdentityStore: Send + Sync {
    /// Sites the user may see. Empty for unknown or inactive users.
    fn sites_for(&self, username: &str) -> BTreeSet<SiteId>;

    fn is_admin(&self, username: &str) -> bool;
}

/// Maps a bearer token to the username it was issued for.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    All,
    Sites(BTreeSet<SiteId>),
}

impl Grant {
    pub fn for_user(store: &dyn IdentityStore, username: &str) -> Self {
        if store.is_admin(username) {
            Grant::All
        } else {
            Grant::Sites(store.sites_for(username))
        }
    }

    pub fn permits(&self, site: &str) -> bool {
        match self {
            Grant::All => true,
            Grant::Sites(sites) => sites.contains(site),
        }
    }

    pub fn filter_snapshot(&self, mut snapshot: Snapshot) -> Snapshot {
        if let Grant::Sites(sites) = self {
            snapshot.retain(|site| sites.contains(site));
        }
        snapshot
    }

    pub fn filter_sites<I>(&self, sites: I) -> Vec<SiteId>
    where
        I: IntoIterator<Item = SiteId>,
    {
        sites.into_iter().filter(|site| self.permits(site.as_str())).collect()
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub username: String,
    pub grant: Grant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ClockTime;
    use crate::pipeline::SiteSnapshot;

    fn site(name: &str) -> SiteId {
        SiteId::new(name).unwrap()
    }

    fn entry() -> SiteSnapshot {
        SiteSnapshot {
            device_number: "1".to_string(),
            time_start: ClockTime::new(9, 0).unwrap(),
            time_end: ClockTime::new(17, 0).unwrap(),
            time_interval: 30,
            expected_shot_count: 17,
            shots_so_far: 0,
            photos_count_today: 0,
            most_recent_photo_name: None,
            live_status: None,
        }
    }

    fn snapshot_of(names: &[&str]) -> Snapshot {
        names.iter().map(|n| (site(n), entry())).collect()
    }

    fn grant_of(names: &[&str]) -> Grant {
        Grant::Sites(names.iter().map(|n| site(n)).collect())
    }

    #[test]
    fn test_grant_narrows_snapshot() {
        let filtered = grant_of(&["A", "B"]).filter_snapshot(snapshot_of(&["A", "B", "C"]));
        let keys: Vec<&str> = filtered.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn test_admin_sees_everything() {
        let filtered = Grant::All.filter_snapshot(snapshot_of(&["A", "B", "C"]));
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_empty_grant_sees_nothing() {
        let grant = grant_of(&[]);
        assert!(grant.filter_snapshot(snapshot_of(&["A"])).is_empty());
        assert!(grant.filter_sites(vec![site("A")]).is_empty());
        assert!(!grant.permits("A"));
    }

    #[test]
    fn test_filter_sites_ignores_unknown_grants() {
        let grant = grant_of(&["B", "Z"]);
        assert_eq!(grant.filter_sites(vec![site("A"), site("B")]), vec![site("B")]);
    }
}
