//! 🦀 mgx — the legacy-index migration job.
//!
//! 🎬 *[trailer voice]* In a cluster about to be upgraded, indices created by
//! a 1.x engine are sitting on disk in a format the 3.x engine will refuse to
//! open. Someone has to copy every one of them into a fresh, current-format
//! index *before* the upgrade lands. That someone is this crate. 🦆
//!
//! Module map, in dependency order (leaves first):
//! - [`app_config`] — figment-powered config: env vars + optional TOML
//! - [`errors`] — the typed failures the exit-code mapping depends on
//! - [`version`] — decoding the `version.created` birth certificate
//! - [`cluster`] — the authenticated HTTP façade over the engine's admin API
//! - [`planner`] — the 2×-largest-index disk-space preflight
//! - [`admin`] — the `ClusterAdmin` capability (kubectl + in-memory double)
//! - [`migrate`] — the per-index reindex / delete / recreate state machine
//! - [`security`] — the seven-step security-subsystem reinitialization
//! - [`backup`] — the valid-backup preflight gate
//! - [`credentials`] — post-reinit managed-credential restoration
//! - [`runner`] — the conductor that wires it all together

pub mod admin;
pub mod app_config;
pub mod backup;
pub mod cluster;
pub mod credentials;
pub mod errors;
pub mod migrate;
pub mod planner;
pub mod runner;
pub mod security;
pub mod version;

use anyhow::Result;

pub use runner::ExitCode;

/// 🚀 Run the whole job against a loaded config. The CLI calls this, maps the
/// returned [`ExitCode`] onto the process exit status, and goes home.
pub async fn run(config: app_config::AppConfig) -> Result<ExitCode> {
    runner::run(&config).await
}
