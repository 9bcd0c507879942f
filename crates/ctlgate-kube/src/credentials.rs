//! Crate-cluster credential store and kubeconfig file watcher
//!
//! The store holds the current crate-cluster profile behind a watch channel:
//! one writer (the watcher task) and any number of readers. Readers get a clone,
//! never a reference into the shared value, and see `None` until a valid
//! profile has been published once.
//!
//! The watcher polls the kubeconfig file and compares content digests, so
//! atomic-rename updates (as done by projected volumes) are picked up the same
//! way as in-place writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::profile::ConnectionProfile;

/// Default kubeconfig poll period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Shared holder of the crate-cluster connection profile
#[derive(Clone)]
pub struct CredentialStore {
    sender: Arc<watch::Sender<Option<ConnectionProfile>>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Create an empty (not ready) store
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create a store that already holds `profile`
    pub fn with_profile(profile: ConnectionProfile) -> Self {
        let store = Self::new();
        store.publish(profile);
        store
    }

    /// Copy of the current profile, or `None` before the first load
    pub fn current(&self) -> Option<ConnectionProfile> {
        self.sender.borrow().clone()
    }

    /// Whether a profile has been loaded
    pub fn is_ready(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Replace the current profile
    pub fn publish(&self, profile: ConnectionProfile) {
        self.sender.send_replace(Some(profile));
    }

    /// Receiver notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionProfile>> {
        self.sender.subscribe()
    }
}

/// Read and validate a kubeconfig file
pub async fn load_profile_file(path: &Path) -> Result<ConnectionProfile> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::InvalidProfile(format!("failed to read {}: {}", path.display(), e))
    })?;
    ConnectionProfile::parse_validated(&content)
}

/// Polls a kubeconfig file and republishes it when its content changes
pub struct KubeconfigWatcher {
    path: PathBuf,
    store: CredentialStore,
    last_digest: Option<String>,
}

impl KubeconfigWatcher {
    /// Create a watcher for `path` feeding `store`
    pub fn new(path: impl Into<PathBuf>, store: CredentialStore) -> Self {
        Self {
            path: path.into(),
            store,
            last_digest: None,
        }
    }

    /// Path being watched
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file and publish it; any failure is returned
    ///
    /// Used once at startup, where an unreadable or invalid file is fatal.
    pub async fn load_initial(&mut self) -> Result<()> {
        let content = self.read().await?;
        let profile = ConnectionProfile::parse_validated(&content)?;
        self.last_digest = Some(digest(&content));
        self.store.publish(profile);
        info!(path = %self.path.display(), "Loaded crate kubeconfig");
        Ok(())
    }

    /// Reload the file if its content changed since the last successful load
    ///
    /// Returns whether a new profile was published. Read and parse failures
    /// are logged and leave the current profile in place.
    pub async fn check_and_reload(&mut self) -> bool {
        let content = match self.read().await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Failed to read crate kubeconfig, keeping previous profile");
                return false;
            }
        };

        let current = digest(&content);
        if self.last_digest.as_deref() == Some(current.as_str()) {
            return false;
        }

        match ConnectionProfile::parse_validated(&content) {
            Ok(profile) => {
                self.last_digest = Some(current);
                self.store.publish(profile);
                info!(path = %self.path.display(), "Reloaded crate kubeconfig");
                true
            }
            Err(e) => {
                warn!(error = %e, "Invalid crate kubeconfig, keeping previous profile");
                false
            }
        }
    }

    async fn read(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::InvalidProfile(format!("failed to read {}: {}", self.path.display(), e))
        })
    }
}

fn digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Poll the kubeconfig every `period` until the task is aborted
pub fn spawn_kubeconfig_watcher(mut watcher: KubeconfigWatcher, period: Duration) -> JoinHandle<()> {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tokio::spawn(async move {
        debug!(path = %watcher.path().display(), ?period, "Watching crate kubeconfig");

        loop {
            ticker.tick().await;
            watcher.check_and_reload().await;
        }
    })
}
