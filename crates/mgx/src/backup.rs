//! 📼 backup.rs — the preflight gate that refuses to gamble with your data.
//!
//! 🎰 "We don't need a backup, the migration is safe" — words spoken before
//! every incident that has a postmortem doc with more than forty comments.
//!
//! The deal: ask the external backup daemon for a full backup, then poll until
//! it's confirmed **valid**. No valid backup, no migration. The daemon owns
//! the backup itself; we only ever read status — `BackupRecord` is a window,
//! not a steering wheel.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::app_config::{BackupDaemonConfig, Timeouts};

/// 🧾 What the daemon says about one backup when asked politely.
#[derive(Debug, Clone, Deserialize)]
pub struct BackupRecord {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub exit_code: Option<i64>,
    /// the daemon reports this as whatever type it feels like today
    #[serde(default)]
    pub spent_time: Option<serde_json::Value>,
}

/// 📼 The gate. Holds its own HTTP client because the daemon lives at a
/// different address (and possibly a different level of TLS hygiene) than the cluster.
pub struct BackupGate {
    http: reqwest::Client,
    base: String,
    username: Option<String>,
    password: Option<String>,
    deadline: Duration,
    interval: Duration,
}

impl BackupGate {
    pub fn new(config: &BackupDaemonConfig, timeouts: &Timeouts) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            // -- in-cluster daemon, self-signed everything. we've accepted who we are.
            .danger_accept_invalid_certs(true)
            .build()
            .context("💀 Failed to build the backup daemon HTTP client")?;
        Ok(Self {
            http,
            base: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            deadline: timeouts.backup(),
            interval: timeouts.backup_interval(),
        })
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.username, &self.password) {
            (Some(user), pass) => builder.basic_auth(user, pass.as_ref()),
            _ => builder,
        }
    }

    /// 🚀 Request a backup and block until it is confirmed valid.
    /// Returns the backup id for the summary; errors close the gate.
    pub async fn run(&self) -> Result<String> {
        info!("📼 Requesting a full backup before touching anything...");
        let url = format!("{}/backup", self.base);
        let response = self
            .with_auth(self.http.post(&url))
            .send()
            .await
            .context("💀 Backup daemon did not answer the phone")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("💀 Backup request rejected: HTTP {status}: {body}");
        }

        // the id comes back as plain text, old-school
        let backup_id = response
            .text()
            .await
            .context("💀 Backup daemon's reply was unreadable")?
            .trim()
            .to_string();
        if backup_id.is_empty() {
            bail!("💀 Backup daemon returned an empty backup id — a backup with no name cannot be verified");
        }

        info!("📼 Backup started, id: {backup_id} — waiting up to {:?} for validity", self.deadline);
        self.await_valid(&backup_id).await?;
        Ok(backup_id)
    }

    /// ⏳ Poll `/listbackups/{id}` until valid, failed, or out of patience.
    /// Status-probe errors are tolerated and retried — the daemon gets moody
    /// mid-backup and that's between it and its therapist.
    async fn await_valid(&self, backup_id: &str) -> Result<()> {
        let url = format!("{}/listbackups/{backup_id}", self.base);
        let deadline = tokio::time::Instant::now() + self.deadline;
        let mut check = 0u32;

        loop {
            check += 1;
            match self.fetch_record(&url).await {
                Ok(record) => {
                    info!(
                        "📼 Backup {backup_id} status (check #{check}): valid={}, failed={}, exit_code={:?}",
                        record.valid, record.failed, record.exit_code
                    );
                    if record.failed {
                        bail!("💀 Backup {backup_id} reported failure: exit_code={:?}", record.exit_code);
                    }
                    if record.valid {
                        info!("✅ Backup {backup_id} is valid — the gate opens");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("📼 could not read backup status (check #{check}): {e}");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                bail!("💀 Timed out after {:?} waiting for backup {backup_id} to become valid", self.deadline);
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn fetch_record(&self, url: &str) -> Result<BackupRecord> {
        let response = self
            .with_auth(self.http.get(url))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("status endpoint answered HTTP {status}");
        }
        Ok(response.json().await?)
    }
}
