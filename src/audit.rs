//! Audit trail of store mutations
//!
//! Writes JSON lines to `~/.local/state/depot/audit.log`. Enabled by
//! default; `general.audit_log = false` turns it off.

use crate::artifact::ArtifactDescriptor;
use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Artifact written into the store from a local file
pub const ARTIFACT_ADDED: &str = "artifact.added";
/// Artifact removed from the store
pub const ARTIFACT_REMOVED: &str = "artifact.removed";
/// Artifact mirrored from a remote
pub const ARTIFACT_MIRRORED: &str = "artifact.mirrored";
/// Mirror attempt that failed on unusable remote data
pub const ARTIFACT_MIRROR_FAILED: &str = "artifact.mirror_failed";

/// File-based audit logger that appends JSON lines
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self::with_path(config.general.audit_log, ConfigManager::audit_log_path())
    }

    pub fn with_path(enabled: bool, path: PathBuf) -> Self {
        Self { enabled, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log an audit event as a JSON line
    ///
    /// Failures are logged and dropped; auditing never fails a command.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log: {}", e);
        }
    }

    /// Log an event about one descriptor
    pub async fn log_descriptor(&self, event: &str, descriptor: &ArtifactDescriptor) {
        self.log(
            event,
            &serde_json::json!({
                "key": descriptor.key.to_string(),
                "format": descriptor.format.as_str(),
            }),
        )
        .await;
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
