//! ☸️ admin.rs — the `ClusterAdmin` capability: config-blob surgery and
//! rolling restarts, abstracted behind a trait so tests don't need a real
//! Kubernetes cluster (nobody's CI budget survives that).
//!
//! 🎭 Two faces:
//! - [`KubectlAdmin`] — the live one. Shells out to `kubectl` with
//!   `tokio::process`, base64-juggles the secret payload, and trusts the
//!   operator's kubeconfig to be pointed at the right cluster. (It is pointed
//!   at the right cluster, right? ...right?)
//! - [`InMemoryAdmin`] — the stunt double. Holds the blob in a mutex and
//!   writes restart requests into a ledger that tests can interrogate.
//!
//! ⚠️ `rolling_restart` only *triggers* the rollout. It does not wait. Nothing
//! here waits. Readiness is the security module's polling problem.

use std::process::Stdio;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::process::Command;
use tracing::{debug, info};

use crate::app_config::SecurityConfig;

/// 🏗️ A restartable workload, labeled the way the cluster tooling labels it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    StatefulSet(String),
    Deployment(String),
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::StatefulSet(name) => write!(f, "statefulset/{name}"),
            Workload::Deployment(name) => write!(f, "deployment/{name}"),
        }
    }
}

/// ☸️ The capability interface. Three verbs, zero opinions about who's behind them.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// 📄 Fetch the engine config file as one decoded string. Whole-blob
    /// read-modify-write is the contract — no partial patches of the file's innards.
    async fn read_config_blob(&self) -> Result<String>;

    /// 📝 Write the (entire) config file back.
    async fn write_config_blob(&self, content: &str) -> Result<()>;

    /// 🔄 Trigger a rolling restart of one workload. Fire-and-forget; poll
    /// health elsewhere if you care whether it came back (you care).
    async fn rolling_restart(&self, workload: &Workload) -> Result<()>;
}

/// ☸️ The live implementation: `kubectl get secret` / `kubectl patch secret` /
/// `kubectl rollout restart`, namespace-pinned at construction.
#[derive(Debug)]
pub struct KubectlAdmin {
    namespace: String,
    secret_name: String,
    config_key: String,
}

impl KubectlAdmin {
    /// 🚀 Build from the security config; fails fast if the namespace or
    /// secret name is missing, because discovering that mid-reinit would be
    /// a much worse Tuesday.
    pub fn from_config(security: &SecurityConfig) -> Result<Self> {
        let namespace = security
            .namespace
            .clone()
            .context("💀 security.namespace is required for reinitialization — we can't patch a secret in a namespace we can't name")?;
        let secret_name = security
            .config_secret_name
            .clone()
            .context("💀 security.config_secret_name is required for reinitialization")?;
        Ok(Self {
            namespace,
            secret_name,
            config_key: security.config_key.clone(),
        })
    }

    /// 🔧 Run one kubectl invocation, capture stdout, convert unhappiness
    /// (spawn failure or non-zero exit) into an error with the stderr attached.
    async fn kubectl(&self, args: &[&str]) -> Result<String> {
        debug!("☸️ kubectl -n {} {}", self.namespace, args.join(" "));
        let output = Command::new("kubectl")
            .arg("-n")
            .arg(&self.namespace)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .context("💀 Failed to spawn kubectl. Is it installed? Is it on PATH? Is it hiding?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "💀 kubectl {} exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ClusterAdmin for KubectlAdmin {
    async fn read_config_blob(&self) -> Result<String> {
        // -- dots in the key must be escaped or jsonpath treats them as path separators
        let jsonpath = format!("jsonpath={{.data.{}}}", self.config_key.replace('.', r"\."));
        let encoded = self
            .kubectl(&["get", "secret", &self.secret_name, "-o", &jsonpath])
            .await?;
        let encoded = encoded.trim();
        if encoded.is_empty() {
            bail!(
                "💀 Secret '{}' has no '{}' key — nothing to read, nothing to patch, nothing but questions",
                self.secret_name,
                self.config_key
            );
        }
        let bytes = BASE64
            .decode(encoded)
            .context("💀 Secret payload is not valid base64. Someone has been hand-editing secrets again.")?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_config_blob(&self, content: &str) -> Result<()> {
        let patch = serde_json::json!({
            "data": { &self.config_key: BASE64.encode(content) }
        })
        .to_string();
        self.kubectl(&["patch", "secret", &self.secret_name, "--type", "merge", "-p", &patch])
            .await?;
        info!("📝 Patched secret '{}' ({} bytes of config)", self.secret_name, content.len());
        Ok(())
    }

    async fn rolling_restart(&self, workload: &Workload) -> Result<()> {
        let target = workload.to_string();
        self.kubectl(&["rollout", "restart", &target]).await?;
        info!("🔄 rollout restart triggered for {target}");
        Ok(())
    }
}

/// 🧪 The stunt double. Config blob in a mutex, restarts in a ledger,
/// optional scripted failure for testing the unhappy path.
#[derive(Debug, Default)]
pub struct InMemoryAdmin {
    blob: Mutex<String>,
    restarts: Mutex<Vec<String>>,
    fail_restarts: bool,
}

impl InMemoryAdmin {
    pub fn new(initial_blob: &str) -> Self {
        Self {
            blob: Mutex::new(initial_blob.to_string()),
            restarts: Mutex::new(Vec::new()),
            fail_restarts: false,
        }
    }

    /// 💣 A double whose restarts always fail — for rehearsing the bad ending.
    pub fn with_failing_restarts(initial_blob: &str) -> Self {
        Self {
            blob: Mutex::new(initial_blob.to_string()),
            restarts: Mutex::new(Vec::new()),
            fail_restarts: true,
        }
    }

    /// 🔍 Current blob contents, for assertions.
    pub fn blob(&self) -> String {
        self.blob.lock().expect("blob mutex poisoned").clone()
    }

    /// 🔍 Every restart that was requested, in order, for assertions.
    pub fn restart_log(&self) -> Vec<String> {
        self.restarts.lock().expect("restart mutex poisoned").clone()
    }
}

#[async_trait]
impl ClusterAdmin for InMemoryAdmin {
    async fn read_config_blob(&self) -> Result<String> {
        Ok(self.blob())
    }

    async fn write_config_blob(&self, content: &str) -> Result<()> {
        *self.blob.lock().expect("blob mutex poisoned") = content.to_string();
        Ok(())
    }

    async fn rolling_restart(&self, workload: &Workload) -> Result<()> {
        if self.fail_restarts {
            bail!("💥 scripted restart failure for {workload} (you asked for this)");
        }
        self.restarts
            .lock()
            .expect("restart mutex poisoned")
            .push(workload.to_string());
        Ok(())
    }
}
