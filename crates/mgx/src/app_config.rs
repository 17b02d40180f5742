//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 📐 DESIGN NOTE: this is the *only* place ambient environment state is read.
//! Everything downstream receives an immutable `&AppConfig` and likes it.
//! No component gets to sneak an `env::var` behind our backs. We've seen how
//! that movie ends (it ends in a job that behaves differently per namespace).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
///
/// Built once at startup, passed by reference into every component constructor.
/// Immutable for the process lifetime, like a tattoo or a production incident.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the cluster lives and how to say hello politely.
    pub cluster: ClusterEndpoint,
    /// 🔐 Everything the security reinitializer needs to perform open-heart surgery.
    #[serde(default)]
    pub security: SecurityConfig,
    /// 📼 Backup daemon — optional. No daemon configured, no gate.
    #[serde(default)]
    pub backup: Option<BackupDaemonConfig>,
    /// 🔑 Credential-restoration adapter — optional, same deal.
    #[serde(default)]
    pub credentials: Option<CredentialAdapterConfig>,
    /// 🎛️ Run mode and skip switches. The CLI may override these after load.
    #[serde(default)]
    pub run: RunConfig,
    /// ⏱️ Every deadline and poll interval in one place, so nobody hardcodes 600
    /// in four files and changes three of them.
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// 📡 Base URL, credential pair, TLS-verification flag. The whole handshake kit.
#[derive(Debug, Deserialize, Clone)]
pub struct ClusterEndpoint {
    /// Scheme + host + port. Yes, all of it. No, `localhost` alone is not enough.
    pub url: String,
    pub username: String,
    /// 🔒 If this is in plaintext in your config file, I've already filed a
    /// complaint with the Department of Security Choices.
    pub password: String,
    /// ⚠️ Defaults to false because these clusters live behind self-signed certs
    /// and we have made peace with that. Set true if your PKI has its life together.
    #[serde(default)]
    pub verify_tls: bool,
}

/// 🔐 Knobs for the security-subsystem reinitialization.
///
/// `statefulset_names` / `deployment_names` are comma-separated strings, not
/// lists — they arrive from env vars and env vars don't do arrays without a
/// séance. Use [`SecurityConfig::workloads`] to get them split and labeled.
#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    /// ☸️ The namespace the cluster workloads live in.
    #[serde(default)]
    pub namespace: Option<String>,
    /// 🔐 Name of the secret-like object holding the engine config blob.
    #[serde(default)]
    pub config_secret_name: Option<String>,
    /// 📄 Key inside that secret holding the actual config file.
    #[serde(default = "default_config_key")]
    pub config_key: String,
    /// 🏗️ Comma-separated statefulset names composing the cluster.
    #[serde(default)]
    pub statefulset_names: String,
    /// 🏗️ Comma-separated deployment names, ditto.
    #[serde(default)]
    pub deployment_names: String,
    /// 🕳️ The authentication subsystem's internal index. Never reindexed, only reborn.
    #[serde(default = "default_security_index")]
    pub security_index: String,
}

fn default_config_key() -> String {
    "opensearch.yml".to_string()
}

fn default_security_index() -> String {
    ".opendistro_security".to_string()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            config_secret_name: None,
            config_key: default_config_key(),
            statefulset_names: String::new(),
            deployment_names: String::new(),
            security_index: default_security_index(),
        }
    }
}

impl SecurityConfig {
    /// 🧾 Split the CSV fields into labeled workloads, empty entries discarded.
    /// "a, b,," → [statefulset/a, statefulset/b]. Whitespace forgiven. Sins remembered.
    pub fn workloads(&self) -> Vec<crate::admin::Workload> {
        let mut out = Vec::new();
        for name in self.statefulset_names.split(',') {
            let name = name.trim();
            if !name.is_empty() {
                out.push(crate::admin::Workload::StatefulSet(name.to_string()));
            }
        }
        for name in self.deployment_names.split(',') {
            let name = name.trim();
            if !name.is_empty() {
                out.push(crate::admin::Workload::Deployment(name.to_string()));
            }
        }
        out
    }
}

/// 📼 Where the backup daemon answers the phone.
#[derive(Debug, Deserialize, Clone)]
pub struct BackupDaemonConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// 🔑 Where the credential-restoration adapter answers the phone.
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialAdapterConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// 🎛️ Mode + skip switches. Defaults are "do everything, carefully".
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub mode: MigrationMode,
    /// 👻 Report what would happen; mutate nothing. Zero. Not even a little.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub skip_backup: bool,
    #[serde(default)]
    pub skip_space_check: bool,
    #[serde(default)]
    pub skip_security_reinit: bool,
    #[serde(default)]
    pub skip_credential_restore: bool,
}

/// 🎬 The three moods of the runner.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    /// 🧑‍🔧 An operator typed this on purpose. Probably.
    #[default]
    Manual,
    /// 🤖 Triggered by deployment automation.
    Migration,
    /// 🔍 Look, report, touch nothing, and exit 3 if an upgrade would be blocked.
    PreDeployCheck,
}

impl FromStr for MigrationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "migration" => Ok(Self::Migration),
            "pre-deploy-check" => Ok(Self::PreDeployCheck),
            other => anyhow::bail!(
                "💀 unknown mode '{other}' — pick one of: manual, migration, pre-deploy-check"
            ),
        }
    }
}

/// ⏱️ All the deadlines. Units are seconds because operators think in seconds,
/// not in `Duration::from_nanos` flexes.
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// 🐘 Reindex can chew on an unbounded number of documents. One hour, then we call it.
    #[serde(default = "default_reindex_secs")]
    pub reindex_secs: u64,
    /// 📡 Everything that isn't a reindex gets a short leash.
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
    /// 🚦 How long we wait for green + reachable after a rolling restart.
    #[serde(default = "default_cluster_ready_secs")]
    pub cluster_ready_secs: u64,
    #[serde(default = "default_cluster_ready_interval_secs")]
    pub cluster_ready_interval_secs: u64,
    /// 📼 Backup daemon gets half an hour. It has never once needed less.
    #[serde(default = "default_backup_secs")]
    pub backup_secs: u64,
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    #[serde(default = "default_credentials_secs")]
    pub credentials_secs: u64,
    #[serde(default = "default_credentials_interval_secs")]
    pub credentials_interval_secs: u64,
}

fn default_reindex_secs() -> u64 {
    3600
}
fn default_request_secs() -> u64 {
    30
}
fn default_cluster_ready_secs() -> u64 {
    600
}
fn default_cluster_ready_interval_secs() -> u64 {
    15
}
fn default_backup_secs() -> u64 {
    1800
}
fn default_backup_interval_secs() -> u64 {
    10
}
fn default_credentials_secs() -> u64 {
    240
}
fn default_credentials_interval_secs() -> u64 {
    10
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            reindex_secs: default_reindex_secs(),
            request_secs: default_request_secs(),
            cluster_ready_secs: default_cluster_ready_secs(),
            cluster_ready_interval_secs: default_cluster_ready_interval_secs(),
            backup_secs: default_backup_secs(),
            backup_interval_secs: default_backup_interval_secs(),
            credentials_secs: default_credentials_secs(),
            credentials_interval_secs: default_credentials_interval_secs(),
        }
    }
}

impl Timeouts {
    pub fn reindex(&self) -> Duration {
        Duration::from_secs(self.reindex_secs)
    }
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
    pub fn cluster_ready(&self) -> Duration {
        Duration::from_secs(self.cluster_ready_secs)
    }
    pub fn cluster_ready_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_ready_interval_secs)
    }
    pub fn backup(&self) -> Duration {
        Duration::from_secs(self.backup_secs)
    }
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }
    pub fn credentials(&self) -> Duration {
        Duration::from_secs(self.credentials_secs)
    }
    pub fn credentials_interval(&self) -> Duration {
        Duration::from_secs(self.credentials_interval_secs)
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (MGX_*, double-underscore for nesting, e.g.
/// `MGX_CLUSTER__URL`) with an optional TOML file. TOML wins on conflicts.
///
/// 📐 DESIGN NOTE (no cap, this is tribal knowledge):
///   - If `config_file_name` is None  → env vars only. No file. No assumptions.
///   - If `config_file_name` is Some  → env vars + TOML file, merged.
///
/// 💀 Returns an error if config is unparseable. Which it will be. Check the
/// error message though — it's contextual, informative, and written with love.
/// Or despair. Hard to tell at 3am.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ Start with env vars as the base layer — like a good sourdough starter.
    let config = Figment::new().merge(Env::prefixed("MGX_").split("__"));

    // 🎯 Conditionally layer in TOML only if a file was actually provided.
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (MGX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (MGX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
