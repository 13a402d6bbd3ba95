use async_trait::async_trait;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{parse_live_devices, BridgeError, DeviceId, LiveDeviceSource};
use crate::config::RemoteConfig;

/// Runs the inventory command on a remote host through the system `ssh`
/// client. Authentication is key-based only (`BatchMode=yes`).
#[derive(Debug, Clone)]
pub struct SshStatusBridge {
    program: String,
    config: RemoteConfig,
}

impl SshStatusBridge {
    /// `None` when the bridge is disabled or has no host to talk to.
    pub fn from_config(config: &RemoteConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        if config.host.trim().is_empty() {
            warn!("Remote status enabled but no host configured, skipping liveness");
            return None;
        }
        Some(Self {
            program: "ssh".to_string(),
            config: config.clone(),
        })
    }

    /// Use another client binary (tests, or an ssh wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeout().as_secs()),
        ];
        if let Some(port) = self.config.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        let destination = match &self.config.user {
            Some(user) => format!("{}@{}", user, self.config.host),
            None => self.config.host.clone(),
        };
        args.push(destination);
        args.push(self.config.command.clone());
        args
    }
}

#[async_trait]
impl LiveDeviceSource for SshStatusBridge {
    async fn fetch_live_devices(&self) -> Result<BTreeSet<DeviceId>, BridgeError> {
        let args = self.args();
        debug!("Querying remote status: {} {}", self.program, args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(BridgeError::Spawn)?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout(), child.wait_with_output())
            .await
            .map_err(|_| BridgeError::Timeout(self.timeout()))?
            .map_err(BridgeError::Spawn)?;

        if !output.status.success() {
            return Err(BridgeError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_live_devices(&String::from_utf8_lossy(&output.stdout))
    }
}
