//! Persisted record of the daemons started by the last `start`
//!
//! Lets `stop` and a repeated `start` terminate exactly the processes we
//! launched instead of anything whose name happens to match.

use crate::error::{HotspotError, HotspotResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const STATE_FILE: &str = "state.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub wlan_interface: String,
    pub hostapd_pid: Option<u32>,
    pub dnsmasq_pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

impl RuntimeState {
    pub fn new(wlan_interface: &str) -> Self {
        Self {
            wlan_interface: wlan_interface.to_string(),
            hostapd_pid: None,
            dnsmasq_pid: None,
            started_at: Utc::now(),
        }
    }
}

/// State file under the runtime directory
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(state_dir: &Path) -> Self {
        Self { path: state_dir.join(STATE_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded state; `None` when absent or unreadable
    pub async fn load(&self) -> Option<RuntimeState> {
        let content = fs::read_to_string(&self.path).await.ok()?;
        match toml::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                debug!("ignoring unreadable state file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub async fn save(&self, state: &RuntimeState) -> HotspotResult<()> {
        let content = toml::to_string_pretty(state)
            .map_err(|e| HotspotError::ConfigError(format!("Failed to serialize state: {}", e)))?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&self.path, content).await?;
        Ok(())
    }

    pub async fn clear(&self) -> HotspotResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// PID written by a daemon to its pid file
pub async fn read_pid_file(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).await.ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}
