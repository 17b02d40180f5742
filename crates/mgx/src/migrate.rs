//! 🎢 migrate.rs — the per-index state machine. The main event. The big one.
//!
//! 🎬 *[trailer voice]* In a cluster where old indices refuse to die... one
//! orchestrator must copy, delete, recreate, and copy back. Without losing a
//! single document. **This summer: REINDEX.**
//!
//! The dance, per index:
//! ```text
//! original ──reindex──▶ original-migration     (staging copy)
//! original ──delete──▶ 💨                       (point of no return)
//! original ◀──create── metadata snapshot        (fresh, current-format)
//! original ◀──reindex── original-migration
//! original-migration ──delete──▶ 💨            (cleanup)
//! ```
//!
//! # Invariants
//! - The original is never deleted until the staging copy passed a document
//!   count check. The point of no return is earned, not assumed.
//! - A leftover `-migration` index from a crashed run is stale state, not data:
//!   it is deleted and the index migrates from scratch. Re-running is safe.
//! - Failure *after* the point of no return triggers recovery: user indices
//!   get restored from staging; system (dot-prefixed) indices get deleted
//!   outright so their owning subsystem can regrow them in the new format.
//! - Both original and staging missing → we say the C-word (CRITICAL) and stop
//!   pretending automation can fix it.

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::cluster::{ClusterClient, IndexDescriptor};
use crate::errors::{CriticalDataLossError, MigrationStepError};

/// 🏷️ Suffix for the temporary staging copy. Doubles as the re-run marker:
/// an index *ending* in this suffix is somebody's staging area, never a candidate.
pub const MIGRATION_SUFFIX: &str = "-migration";

/// 🧾 Settings worth carrying into the recreated index. Everything else
/// (version stamps, uuids, creation dates, provided names) is the old index's
/// baggage and stays behind.
const SETTINGS_WHITELIST: &[&str] = &["number_of_shards", "number_of_replicas", "refresh_interval"];

pub fn staging_name(index: &str) -> String {
    format!("{index}{MIGRATION_SUFFIX}")
}

/// 📍 Where in the dance we are (or were, when the music stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Start,
    SnapshotMetadata,
    CreateStaging,
    ReindexToStaging,
    DeleteOriginal,
    RecreateOriginal,
    ReindexBack,
    DeleteStaging,
    Success,
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MigrationPhase::Start => "start",
            MigrationPhase::SnapshotMetadata => "snapshot-metadata",
            MigrationPhase::CreateStaging => "create-staging",
            MigrationPhase::ReindexToStaging => "reindex-to-staging",
            MigrationPhase::DeleteOriginal => "delete-original",
            MigrationPhase::RecreateOriginal => "recreate-original",
            MigrationPhase::ReindexBack => "reindex-back",
            MigrationPhase::DeleteStaging => "delete-staging",
            MigrationPhase::Success => "success",
        };
        f.write_str(label)
    }
}

/// 🏁 How one index's migration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Full success: reindexed out, recreated, reindexed back, staging gone.
    Migrated,
    /// Something failed but the original (and its data) is intact.
    Restored,
    /// System index: deleted on failure so the owning subsystem regrows it.
    DeletedForRecreation,
    /// Recovery itself failed. A human with backups takes it from here.
    Unrecoverable,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MigrationStatus::Migrated => "migrated",
            MigrationStatus::Restored => "restored",
            MigrationStatus::DeletedForRecreation => "deleted-for-recreation",
            MigrationStatus::Unrecoverable => "unrecoverable",
        };
        f.write_str(label)
    }
}

/// 🧾 The receipt for one index: what happened, how far it got.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    pub index: String,
    pub phase_reached: MigrationPhase,
    pub original_deleted: bool,
    pub status: MigrationStatus,
}

/// 💥 A migration that did not end in `Migrated`. Carries the outcome (so the
/// summary table can still report what state the index landed in) plus the
/// underlying cause.
#[derive(Debug)]
pub struct MigrationFailure {
    pub outcome: MigrationOutcome,
    pub source: anyhow::Error,
}

impl std::fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "migration of '{}' failed at phase '{}' (final state: {}): {}",
            self.outcome.index, self.outcome.phase_reached, self.outcome.status, self.source
        )
    }
}

impl std::error::Error for MigrationFailure {}

/// 🎟️ Where the attempt stopped, with everything recovery needs to know.
struct Halt {
    phase: MigrationPhase,
    original_deleted: bool,
    /// present once metadata was snapshotted — recovery may need it to recreate
    snapshot: Option<Value>,
    source: anyhow::Error,
}

/// 🧹 Strip engine-stamped version markers out of a `_meta` block while keeping
/// whatever the index's owners put there themselves. Pure so it's testable
/// without a cluster in the room.
pub fn scrub_mappings(mut mappings: Value) -> Value {
    if let Some(meta) = mappings.get_mut("_meta").and_then(|m| m.as_object_mut()) {
        for stamp in ["version", "created", "created_by"] {
            meta.remove(stamp);
        }
        let now_empty = meta.is_empty();
        if now_empty {
            if let Some(obj) = mappings.as_object_mut() {
                obj.remove("_meta");
            }
        }
    }
    mappings
}

/// 🧾 Pick only the whitelisted settings. Also pure, also testable, also boring.
pub fn whitelist_settings(settings: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    SETTINGS_WHITELIST
        .iter()
        .filter_map(|key| settings.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

/// 🎢 The orchestrator. Borrows the client, migrates one index at a time,
/// and always hands back a receipt — even (especially) for the bad endings.
pub struct IndexMigrationOrchestrator<'a> {
    client: &'a ClusterClient,
}

impl<'a> IndexMigrationOrchestrator<'a> {
    pub fn new(client: &'a ClusterClient) -> Self {
        Self { client }
    }

    /// 🚀 Migrate one index end to end.
    ///
    /// `Ok` covers the two acceptable endings: `Migrated`, or (for system
    /// indices that failed late) `DeletedForRecreation`. `Err` carries the
    /// outcome *and* the cause, so callers can both abort and report.
    pub async fn migrate(&self, desc: &IndexDescriptor) -> Result<MigrationOutcome, MigrationFailure> {
        let staging = staging_name(&desc.name);
        info!("🎢 Migrating index '{}' (staging: '{staging}')...", desc.name);

        match self.attempt(desc, &staging).await {
            Ok(()) => {
                info!("✅ Index '{}' migrated", desc.name);
                Ok(MigrationOutcome {
                    index: desc.name.clone(),
                    phase_reached: MigrationPhase::Success,
                    original_deleted: true,
                    status: MigrationStatus::Migrated,
                })
            }
            Err(halt) => self.recover(desc, &staging, halt).await,
        }
    }

    /// 🎯 The happy path, with a phase tag on every way it can stop being happy.
    async fn attempt(&self, desc: &IndexDescriptor, staging: &str) -> Result<(), Halt> {
        let halt = |phase, original_deleted, snapshot, source| Halt {
            phase,
            original_deleted,
            snapshot,
            source,
        };

        // stale staging from a previous crashed run is not data, it's debris
        if self.client.exists(staging).await {
            warn!("🧹 Stale staging index '{staging}' found — deleting and starting over");
            self.client
                .delete_index(staging)
                .await
                .map_err(|e| halt(MigrationPhase::Start, false, None, e))?;
        }

        let snapshot = self
            .snapshot_metadata(&desc.name)
            .await
            .map_err(|e| halt(MigrationPhase::SnapshotMetadata, false, None, e))?;

        self.client
            .create_index(staging, &snapshot)
            .await
            .map_err(|e| halt(MigrationPhase::CreateStaging, false, Some(snapshot.clone()), e))?;

        self.verified_reindex(&desc.name, staging)
            .await
            .map_err(|e| halt(MigrationPhase::ReindexToStaging, false, Some(snapshot.clone()), e))?;

        // ⚠️ point of no return
        self.client
            .delete_index(&desc.name)
            .await
            .map_err(|e| halt(MigrationPhase::DeleteOriginal, false, Some(snapshot.clone()), e))?;

        self.client
            .create_index(&desc.name, &snapshot)
            .await
            .map_err(|e| halt(MigrationPhase::RecreateOriginal, true, Some(snapshot.clone()), e))?;

        self.verified_reindex(staging, &desc.name)
            .await
            .map_err(|e| halt(MigrationPhase::ReindexBack, true, Some(snapshot.clone()), e))?;

        self.client
            .delete_index(staging)
            .await
            .map_err(|e| halt(MigrationPhase::DeleteStaging, true, Some(snapshot.clone()), e))?;

        Ok(())
    }

    /// 📸 Settings (whitelisted) + mappings (scrubbed) → a `PUT /{index}` body.
    async fn snapshot_metadata(&self, index: &str) -> Result<Value> {
        let settings = self.client.index_settings(index).await?;
        let mappings = self.client.mappings(index).await?;
        Ok(json!({
            "settings": { "index": whitelist_settings(&settings) },
            "mappings": scrub_mappings(mappings),
        }))
    }

    /// 🔢 Reindex, refresh the destination, then count both sides. A reindex
    /// that "succeeds" while dropping documents is caught right here, not in
    /// next quarter's incident review.
    async fn verified_reindex(&self, source: &str, dest: &str) -> Result<()> {
        self.client.reindex(source, dest).await?;
        self.client.refresh(dest).await?;
        let expected = self.client.count(source).await?;
        let actual = self.client.count(dest).await?;
        if actual != expected {
            bail!(
                "document count mismatch after reindex '{source}' → '{dest}': \
                 source has {expected}, destination has {actual}"
            );
        }
        info!("🔢 Count check passed for '{dest}': {actual} documents");
        Ok(())
    }

    /// 🚑 The recovery branch. Which one runs depends on two questions:
    /// did we already delete the original, and is this a system index?
    async fn recover(
        &self,
        desc: &IndexDescriptor,
        staging: &str,
        halt: Halt,
    ) -> Result<MigrationOutcome, MigrationFailure> {
        error!(
            "💥 Migration of '{}' failed at phase '{}': {:#}",
            desc.name, halt.phase, halt.source
        );
        let step_error = MigrationStepError {
            index: desc.name.clone(),
            phase: halt.phase,
            source: halt.source,
        };
        let outcome = |status| MigrationOutcome {
            index: desc.name.clone(),
            phase_reached: halt.phase,
            original_deleted: halt.original_deleted,
            status,
        };

        // before the point of no return: original untouched, just sweep up
        if !halt.original_deleted {
            if self.client.exists(staging).await {
                if let Err(e) = self.client.delete_index(staging).await {
                    warn!("🧹 Could not clean up staging index '{staging}': {e:#}");
                }
            }
            return Err(MigrationFailure {
                outcome: outcome(MigrationStatus::Restored),
                source: step_error.into(),
            });
        }

        let original_exists = self.client.exists(&desc.name).await;
        let staging_exists = self.client.exists(staging).await;

        if !original_exists && !staging_exists {
            let loss = CriticalDataLossError {
                original: desc.name.clone(),
                staging: staging.to_string(),
            };
            error!("🚨 {loss}");
            return Err(MigrationFailure {
                outcome: outcome(MigrationStatus::Unrecoverable),
                source: anyhow::Error::new(loss).context(step_error.to_string()),
            });
        }

        if desc.is_system() {
            // system index: the owning subsystem recreates it in the current
            // format on its next initialization, so deletion IS the recovery
            match self.discard_for_recreation(desc, staging, original_exists, staging_exists).await {
                Ok(()) => {
                    warn!(
                        "🕳️ System index '{}' deleted after failed migration — its subsystem will recreate it",
                        desc.name
                    );
                    Ok(outcome(MigrationStatus::DeletedForRecreation))
                }
                Err(e) => Err(MigrationFailure {
                    outcome: outcome(MigrationStatus::Unrecoverable),
                    source: e.context(step_error.to_string()),
                }),
            }
        } else {
            match self.restore_original(desc, staging, original_exists, halt.snapshot.as_ref()).await {
                Ok(()) => {
                    warn!("🚑 Index '{}' restored from staging after failed migration", desc.name);
                    Err(MigrationFailure {
                        outcome: outcome(MigrationStatus::Restored),
                        source: step_error.into(),
                    })
                }
                Err(e) => Err(MigrationFailure {
                    outcome: outcome(MigrationStatus::Unrecoverable),
                    source: e.context(step_error.to_string()),
                }),
            }
        }
    }

    /// 🕳️ System-index recovery: remove every trace and let the subsystem regrow it.
    async fn discard_for_recreation(
        &self,
        desc: &IndexDescriptor,
        staging: &str,
        original_exists: bool,
        staging_exists: bool,
    ) -> Result<()> {
        if staging_exists {
            self.client
                .delete_index(staging)
                .await
                .with_context(|| format!("failed to delete staging '{staging}' during system-index recovery"))?;
        }
        if original_exists {
            // a half-recreated index can be sitting there closed; open first
            if let Err(e) = self.client.open_index(&desc.name).await {
                warn!("🔓 Could not open '{}' before deletion (continuing): {e:#}", desc.name);
            }
            self.client
                .delete_index(&desc.name)
                .await
                .with_context(|| format!("failed to delete '{}' during system-index recovery", desc.name))?;
        }
        Ok(())
    }

    /// 🚑 User-index recovery: make sure the original exists (recreating it
    /// from the snapshot if needed), refill it from staging, then drop staging.
    async fn restore_original(
        &self,
        desc: &IndexDescriptor,
        staging: &str,
        original_exists: bool,
        snapshot: Option<&Value>,
    ) -> Result<()> {
        if !original_exists {
            let snapshot = snapshot
                .ok_or_else(|| anyhow!("no metadata snapshot available to recreate '{}'", desc.name))?;
            self.client
                .create_index(&desc.name, snapshot)
                .await
                .with_context(|| format!("failed to recreate '{}' during restore", desc.name))?;
        }
        self.verified_reindex(staging, &desc.name)
            .await
            .with_context(|| format!("failed to refill '{}' from staging during restore", desc.name))?;
        self.client
            .delete_index(staging)
            .await
            .with_context(|| format!("failed to delete staging '{staging}' after restore"))?;
        Ok(())
    }
}
