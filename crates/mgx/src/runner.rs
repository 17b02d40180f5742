//! 🎬 runner.rs — the conductor. Detection, gates, migrations, surgery,
//! aftercare, and one summary table to show for it.
//!
//! The order of operations is the whole design:
//! ```text
//! detect → (pre-deploy-check verdict | dry-run report)
//!        → backup gate → disk-space gate
//!        → migrate, one index at a time
//!        → security reinit (if the security index was legacy, or anything moved)
//!        → credential restore (only after a completed reinit)
//!        → summary table + exit code
//! ```
//!
//! # Exit codes
//! The process talks to deployment automation through its exit code, so the
//! mapping is contractual, not decorative:
//! - `0` — nothing to do, or everything done
//! - `1` — a migration (or anything unclassified) failed
//! - `2` — a preflight gate closed: backup invalid or not enough disk
//! - `3` — pre-deploy check found legacy indices that block the upgrade
//! - `4` — the *mandatory* security reinitialization failed

use anyhow::{Context, Result};
use comfy_table::{Cell, ContentArrangement, Table, presets::NOTHING};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::admin::KubectlAdmin;
use crate::app_config::{AppConfig, MigrationMode};
use crate::backup::BackupGate;
use crate::cluster::{ClusterClient, IndexDescriptor};
use crate::credentials::CredentialRestorer;
use crate::migrate::{
    IndexMigrationOrchestrator, MIGRATION_SUFFIX, MigrationOutcome, MigrationStatus,
};
use crate::planner::{DiskSpacePlanner, human_bytes};
use crate::security::SecurityReinitializer;
use crate::version;

/// 🚪 The five ways out of this process. See the module docs for the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Failure,
    PreflightGate,
    UpgradeBlocked,
    SecurityReinitFailed,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::PreflightGate => 2,
            ExitCode::UpgradeBlocked => 3,
            ExitCode::SecurityReinitFailed => 4,
        }
    }
}

/// 🔍 What detection found: migration candidates (legacy, non-security) and
/// the security index's own verdict, kept separate because it never migrates —
/// it gets reborn via the reinit flow instead.
struct Detection {
    candidates: Vec<IndexDescriptor>,
    security_legacy: bool,
}

/// 🧾 Pull the `version.created` stamp out of an index's settings. The API
/// hands it back as a string most days and as a bare number on the weird ones.
fn created_stamp(settings: &serde_json::Map<String, Value>) -> Option<String> {
    match settings.get("version")?.get("created")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 🔍 Pre-deploy verdict, as a pure function of what we found.
/// Blocking is reserved for clusters already running major ≥ 3, where legacy
/// indices aren't a warning, they're a wall.
fn pre_deploy_verdict(cluster_major: u32, legacy_count: usize, security_legacy: bool) -> ExitCode {
    let total = legacy_count + usize::from(security_legacy);
    if total == 0 {
        info!("✅ Pre-deploy check: no legacy indices — upgrade path is clear");
        return ExitCode::Success;
    }
    if cluster_major >= 3 {
        error!(
            "⛔ Pre-deploy check: {total} legacy index(es) on a {cluster_major}.x cluster — upgrade blocked"
        );
        return ExitCode::UpgradeBlocked;
    }
    warn!("⚠️ Pre-deploy check: {total} legacy index(es) found — run the migration before upgrading past 2.x");
    ExitCode::Success
}

/// 📋 Everything worth reporting at the end, accumulated as the run goes.
#[derive(Default)]
struct RunReport {
    backup_id: Option<String>,
    outcomes: Vec<MigrationOutcome>,
    /// `None` — reinit never attempted; `Some(ok)` — attempted, and how it went
    reinit: Option<bool>,
}

impl RunReport {
    /// 🍽️ One table, rendered at the end no matter how the run went. The
    /// operator reading this at 3am gets the whole story in one place.
    fn render(&self, candidates: &[IndexDescriptor]) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new("INDEX"),
            Cell::new("VERSION"),
            Cell::new("SIZE"),
            Cell::new("RESULT"),
            Cell::new("PHASE REACHED"),
        ]);
        for outcome in &self.outcomes {
            let desc = candidates.iter().find(|c| c.name == outcome.index);
            table.add_row(vec![
                Cell::new(&outcome.index),
                Cell::new(desc.map_or_else(|| "?".to_string(), |d| d.version.to_string())),
                Cell::new(desc.map_or_else(|| "?".to_string(), |d| human_bytes(d.size_bytes))),
                Cell::new(outcome.status.to_string()),
                Cell::new(outcome.phase_reached.to_string()),
            ]);
        }

        info!("📋 Migration summary:\n{table}");
        match &self.backup_id {
            Some(id) => info!("📋 Preflight backup: {id}"),
            None => info!("📋 Preflight backup: skipped / not configured"),
        }
        match self.reinit {
            Some(true) => info!("📋 Security reinitialization: completed"),
            Some(false) => info!("📋 Security reinitialization: FAILED"),
            None => info!("📋 Security reinitialization: not performed"),
        }
    }
}

/// 🔍 Walk `_cat/indices`, decode every birth certificate, sort the population
/// into candidates / security / bystanders. Staging leftovers (`-migration`
/// suffix) are never candidates — they belong to some index's state machine.
async fn detect(client: &ClusterClient, security_index: &str) -> Result<Detection> {
    let rows = client.list_indices().await.context("💀 Could not list indices for detection")?;
    info!("🔍 Inspecting {} index(es) for legacy-format survivors...", rows.len());

    let mut candidates = Vec::new();
    let mut security_legacy = false;

    for row in rows {
        if row.index.ends_with(MIGRATION_SUFFIX) {
            warn!("🧹 '{}' looks like a staging leftover — its owner's migration will deal with it", row.index);
            continue;
        }

        let settings = client
            .index_settings(&row.index)
            .await
            .with_context(|| format!("💀 Could not read settings for '{}'", row.index))?;
        let decoded = version::decode_str(created_stamp(&settings).as_deref());
        let desc = IndexDescriptor {
            name: row.index.clone(),
            size_bytes: row.size_bytes(),
            is_legacy: decoded.is_legacy(),
            version: decoded,
        };
        info!(
            "🔍 '{}' — created by {}, {}{}",
            desc.name,
            desc.version,
            if desc.is_legacy { "LEGACY" } else { "current" },
            if desc.is_system() { " (system)" } else { "" }
        );

        if desc.name == security_index {
            // the security index never goes through the reindex dance
            security_legacy = desc.is_legacy;
            continue;
        }
        if desc.is_legacy {
            candidates.push(desc);
        }
    }

    info!(
        "🔍 Detection done: {} migration candidate(s), security index legacy: {}",
        candidates.len(),
        security_legacy
    );
    Ok(Detection { candidates, security_legacy })
}

/// 🎬 The whole show. Returns the exit code; only genuinely unexpected
/// breakage (config, transport during detection) comes back as `Err`.
pub async fn run(config: &AppConfig) -> Result<ExitCode> {
    let client = ClusterClient::new(&config.cluster, &config.timeouts)?;

    let cluster = client.root().await.context("💀 Cluster is unreachable — nothing begins until it isn't")?;
    info!(
        "📡 Connected to cluster '{}', engine version {} (major {})",
        cluster.cluster_name,
        cluster.version.number,
        cluster.major()
    );

    let detection = detect(&client, &config.security.security_index).await?;

    if config.run.mode == MigrationMode::PreDeployCheck {
        for c in &detection.candidates {
            warn!("🔍 would block / need migration: '{}' (created by {})", c.name, c.version);
        }
        return Ok(pre_deploy_verdict(
            cluster.major(),
            detection.candidates.len(),
            detection.security_legacy,
        ));
    }

    if detection.candidates.is_empty() && !detection.security_legacy {
        info!("✅ No legacy indices anywhere. Go enjoy the rest of your day.");
        return Ok(ExitCode::Success);
    }

    if config.run.dry_run {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![Cell::new("INDEX"), Cell::new("VERSION"), Cell::new("SIZE"), Cell::new("PLAN")]);
        for c in &detection.candidates {
            table.add_row(vec![
                Cell::new(&c.name),
                Cell::new(c.version.to_string()),
                Cell::new(human_bytes(c.size_bytes)),
                Cell::new("would migrate"),
            ]);
        }
        if detection.security_legacy {
            table.add_row(vec![
                Cell::new(&config.security.security_index),
                Cell::new("legacy"),
                Cell::new("-"),
                Cell::new("would reinitialize security"),
            ]);
        }
        info!("👻 Dry run — the plan, and nothing but the plan:\n{table}");
        return Ok(ExitCode::Success);
    }

    let mut report = RunReport::default();

    // 📼 gate one: a valid backup, unless skipped or unconfigured
    if config.run.skip_backup {
        warn!("📼 Backup gate SKIPPED by flag. May your confidence be justified.");
    } else if let Some(backup_cfg) = &config.backup {
        let gate = BackupGate::new(backup_cfg, &config.timeouts)?;
        match gate.run().await {
            Ok(id) => report.backup_id = Some(id),
            Err(e) => {
                error!("📼 Backup gate closed: {e:#}");
                return Ok(ExitCode::PreflightGate);
            }
        }
    } else {
        warn!("📼 No backup daemon configured — proceeding without the gate");
    }

    // 📦 gate two: enough disk for the 2× working set
    if config.run.skip_space_check {
        warn!("📦 Disk-space check SKIPPED by flag.");
    } else {
        let plan = DiskSpacePlanner::new(&client).plan(&detection.candidates).await?;
        if let Err(gate) = plan.check() {
            error!("📦 Disk-space gate closed: {gate}");
            return Ok(ExitCode::PreflightGate);
        }
    }

    // 🎢 the migrations — strictly one at a time; the disk math depends on it
    let orchestrator = IndexMigrationOrchestrator::new(&client);
    let mut run_failed = false;
    for desc in &detection.candidates {
        match orchestrator.migrate(desc).await {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(failure) => {
                error!("💥 {failure}");
                report.outcomes.push(failure.outcome.clone());
                // one failed index stops the parade — the rest keep their data untouched
                run_failed = true;
                break;
            }
        }
    }

    if run_failed {
        report.render(&detection.candidates);
        return Ok(ExitCode::Failure);
    }

    // 🔐 reinit if the security index itself was legacy (mandatory) or if any
    // index actually moved (the fresh indices need a fresh auth view)
    let anything_moved = report
        .outcomes
        .iter()
        .any(|o| matches!(o.status, MigrationStatus::Migrated | MigrationStatus::DeletedForRecreation));
    let reinit_mandatory = detection.security_legacy;
    let reinit_wanted = reinit_mandatory || anything_moved;

    if config.run.skip_security_reinit {
        if reinit_wanted {
            warn!("🔐 Security reinitialization SKIPPED by flag — the security index keeps its legacy format");
        }
    } else if reinit_wanted {
        // a broken admin setup is part of the reinit verdict, not a separate crash
        let attempt: Result<()> = match KubectlAdmin::from_config(&config.security) {
            Ok(admin) => {
                let reinit =
                    SecurityReinitializer::new(&admin, &client, &config.security, &config.timeouts);
                reinit.reinitialize().await.map_err(anyhow::Error::new)
            }
            Err(e) => Err(e),
        };
        match attempt {
            Ok(()) => report.reinit = Some(true),
            Err(e) if reinit_mandatory => {
                error!("🔐 Mandatory security reinitialization failed: {e}");
                report.reinit = Some(false);
                report.render(&detection.candidates);
                return Ok(ExitCode::SecurityReinitFailed);
            }
            Err(e) => {
                warn!("🔐 Optional security reinitialization failed (continuing): {e}");
                report.reinit = Some(false);
            }
        }
    }

    // 🔑 aftercare: restoration runs whenever an adapter is configured, not
    // just after a clean reinit — a reinit that died halfway may already have
    // wiped the managed users, and skipping now would strand them
    if config.run.skip_credential_restore {
        warn!("🔑 Credential restoration SKIPPED by flag — managed users may need manual resets");
    } else if let Some(cred_cfg) = &config.credentials {
        let restorer = CredentialRestorer::new(cred_cfg, &config.timeouts)?;
        if let Err(e) = restorer.restore().await {
            warn!("🔑 Credential restoration failed: {e:#} — managed users may need manual resets");
        }
    } else if report.reinit.is_some() {
        warn!("🔑 No credential adapter configured — managed users may need manual resets");
    }

    report.render(&detection.candidates);
    info!("🏁 Run complete");
    Ok(ExitCode::Success)
}
