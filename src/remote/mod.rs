//! Remote device inventory.
//!
//! The statistics job asks a remote host which camera devices are currently
//! reachable and marks each site live or not. The query crosses
//! infrastructure we do not control, so every failure collapses into
//! [`BridgeError`] and the caller carries on without the annotation.

pub mod ssh;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

pub use ssh::SshStatusBridge;

/// Device numbers as written in each site's settings file.
pub type DeviceId = String;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start remote query: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("remote query timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote query failed ({status}): {stderr}")]
    Exit { status: String, stderr: String },

    #[error("unparsable remote output at line {line}: {text:?}")]
    Unparsable { line: usize, text: String },
}

#[async_trait]
pub trait LiveDeviceSource: Send + Sync {
    async fn fetch_live_devices(&self) -> Result<BTreeSet<DeviceId>, BridgeError>;
}

/// Parse inventory output: one device per non-empty line, first
/// whitespace-separated token; `#` starts a comment line.
pub fn parse_live_devices(output: &str) -> Result<BTreeSet<DeviceId>, BridgeError> {
    let mut devices = BTreeSet::new();

    for (index, raw) in output.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let token = line.split_whitespace().next().unwrap_or_default();
        let valid = token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(BridgeError::Unparsable {
                line: index + 1,
                text: line.to_string(),
            });
        }
        devices.insert(token.to_string());
    }

    Ok(devices)
}
