//! 📡 cluster.rs — the authenticated HTTP façade over the engine's admin API.
//!
//! 🎬 *[dial-up noises]* "Hello, cluster? It's us again. About those indices..."
//!
//! 🔌 This is the leaf dependency everything else leans on: settings, mappings,
//! reindex, open/close/delete, health, node disk stats. One client, no retries —
//! retry policy belongs to callers who actually know what a failure *means* at
//! their step of the dance. We just report the bad news with full forensics.
//!
//! # Contract
//! - Every non-2xx response or transport hiccup becomes a [`ClusterRequestError`]
//!   carrying method, path, status, and body. Write operations never swallow it.
//! - `exists` is the one softie: absence is a normal signal, so it degrades to
//!   a bool instead of propagating. (House rule: probes may shrug, mutations
//!   may not.)
//! - `reindex` waits synchronously with a bounded (default one hour) timeout and
//!   refuses to call "0 of N documents copied" a success.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app_config::{ClusterEndpoint, Timeouts};
use crate::errors::{ClusterRequestError, ReindexIntegrityError};

/// 📇 What the cluster tells us about itself at `GET /`.
#[derive(Debug, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub version: ClusterVersionInfo,
}

#[derive(Debug, Deserialize, Default)]
pub struct ClusterVersionInfo {
    #[serde(default)]
    pub number: String,
}

impl ClusterInfo {
    /// 🔢 The running engine's major version, or 0 if the cluster is being coy.
    pub fn major(&self) -> u32 {
        self.version
            .number
            .split('.')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

/// 🗂️ One row of `_cat/indices` — name plus primary-store size in raw bytes.
///
/// Primary-only on purpose: replicas are rebuilt incrementally after a reindex
/// and must not inflate the disk-space requirement.
#[derive(Debug, Deserialize, Clone)]
pub struct CatIndexRow {
    pub index: String,
    #[serde(rename = "pri.store.size", default)]
    pub pri_store_size: Option<String>,
}

impl CatIndexRow {
    pub fn size_bytes(&self) -> u64 {
        self.pri_store_size
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// 🔄 What came back from a synchronous `_reindex`.
#[derive(Debug, Deserialize, Default)]
pub struct ReindexReport {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub failures: Vec<Value>,
}

/// 📋 Everything the run needs to know about one index, assembled from
/// `_cat/indices` plus its settings. Lives for the duration of the run and
/// not a millisecond longer — never persisted anywhere.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    /// primary-store bytes (replicas excluded — they rebuild themselves)
    pub size_bytes: u64,
    pub version: crate::version::IndexVersion,
    /// derived once at detection time so nobody re-derives it differently later
    pub is_legacy: bool,
}

impl IndexDescriptor {
    /// 🕳️ System indices start with the reserved dot. They get the
    /// "delete and let the owning subsystem regrow it" failure policy.
    pub fn is_system(&self) -> bool {
        self.name.starts_with('.')
    }
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

// -- _nodes/stats/fs: we only care about one deeply nested number per node
#[derive(Debug, Deserialize)]
struct NodesFsStats {
    #[serde(default)]
    nodes: std::collections::HashMap<String, NodeFs>,
}

#[derive(Debug, Deserialize)]
struct NodeFs {
    #[serde(default)]
    fs: FsSection,
}

#[derive(Debug, Deserialize, Default)]
struct FsSection {
    #[serde(default)]
    total: FsTotals,
}

#[derive(Debug, Deserialize, Default)]
struct FsTotals {
    #[serde(default)]
    available_in_bytes: u64,
}

/// 📡 The façade itself. Holds one pooled `reqwest::Client` and the credential
/// pair; auth is attached per request so the security flow can also speak
/// *unauthenticated* while the auth subsystem is down for surgery.
#[derive(Debug)]
pub struct ClusterClient {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
    reindex_timeout: Duration,
}

impl ClusterClient {
    /// 🚀 Stand up the client: sane timeouts, optional TLS-verification bypass.
    ///
    /// 10s to connect — if the cluster can't handshake in 10 seconds it is not
    /// having a good time and neither are we. Per-request read timeouts vary
    /// (health waits, reindex waits a lot) so they're set at the call sites.
    pub fn new(endpoint: &ClusterEndpoint, timeouts: &Timeouts) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeouts.request())
            .danger_accept_invalid_certs(!endpoint.verify_tls)
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing TLS cert or a cursed system OpenSSL. Either way: tragic.")?;

        Ok(Self {
            http,
            base: endpoint.url.trim_end_matches('/').to_string(),
            username: endpoint.username.clone(),
            password: endpoint.password.clone(),
            reindex_timeout: timeouts.reindex(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str, use_auth: bool) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        if use_auth {
            builder.basic_auth(&self.username, Some(&self.password))
        } else {
            builder
        }
    }

    /// 🔧 Fire a request, translate anything unhappy into a `ClusterRequestError`.
    /// The one choke point every call goes through, so forensics are uniform.
    async fn execute(
        &self,
        method: &str,
        path: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ClusterRequestError::new(method, path, None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterRequestError::new(method, path, Some(status.as_u16()), body).into());
        }
        Ok(response)
    }

    /// 📇 `GET /` — cluster name and version. The handshake before the heist.
    pub async fn root(&self) -> Result<ClusterInfo> {
        let resp = self
            .execute("GET", "/", self.request(Method::GET, "/", true))
            .await?;
        Ok(resp.json().await.context("💀 Cluster root answered with something that isn't JSON. Concerning.")?)
    }

    /// 👂 Can anyone hear us? Root-endpoint reachability probe, degrades to bool.
    pub async fn root_reachable(&self, use_auth: bool) -> bool {
        match self.request(Method::GET, "/", use_auth).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("👂 root endpoint not reachable yet: {e}");
                false
            }
        }
    }

    /// 🗂️ `_cat/indices` with names and primary-store bytes.
    pub async fn list_indices(&self) -> Result<Vec<CatIndexRow>> {
        let path = "_cat/indices?format=json&h=index,pri.store.size&bytes=b";
        let resp = self
            .execute("GET", path, self.request(Method::GET, path, true))
            .await?;
        Ok(resp.json().await.context("💀 _cat/indices returned un-JSON. The cat knocked something off the shelf.")?)
    }

    /// 🔧 The `settings.index` object for one index, or an empty map if the
    /// response shape surprises us. (It has surprised us.)
    pub async fn index_settings(&self, index: &str) -> Result<serde_json::Map<String, Value>> {
        let path = format!("{index}/_settings");
        let resp = self
            .execute("GET", &path, self.request(Method::GET, &path, true))
            .await?;
        let body: Value = resp.json().await.context("💀 _settings returned un-JSON")?;
        Ok(body
            .get(index)
            .and_then(|v| v.get("settings"))
            .and_then(|v| v.get("index"))
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default())
    }

    /// 🗺️ The `mappings` document for one index. Opaque `Value` — we ferry it,
    /// we never interpret it. (Document content is Somebody Else's Problem™.)
    pub async fn mappings(&self, index: &str) -> Result<Value> {
        let path = format!("{index}/_mappings");
        let resp = self
            .execute("GET", &path, self.request(Method::GET, &path, true))
            .await?;
        let body: Value = resp.json().await.context("💀 _mappings returned un-JSON")?;
        Ok(body
            .get(index)
            .and_then(|v| v.get("mappings"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())))
    }

    /// 🏗️ `PUT /{index}` with a prebuilt `{settings, mappings}` body.
    pub async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        info!("🏗️ Creating index '{index}'...");
        self.execute(
            "PUT",
            index,
            self.request(Method::PUT, index, true).json(body),
        )
        .await?;
        info!("✅ Index '{index}' created");
        Ok(())
    }

    /// 🔄 Synchronous reindex `source → dest`, bounded by the configured (≈1h) timeout.
    ///
    /// 💀 A report of `created == 0` while `total > 0` is a failed step, not a
    /// quiet success — that is the exact shape of "we deleted your data politely".
    pub async fn reindex(&self, source: &str, dest: &str) -> Result<ReindexReport> {
        info!("🔄 Reindexing '{source}' → '{dest}' (bounded wait {:?})...", self.reindex_timeout);
        let path = "_reindex?wait_for_completion=true";
        let body = serde_json::json!({
            "source": { "index": source },
            "dest": { "index": dest },
        });
        let builder = self
            .request(Method::POST, path, true)
            .timeout(self.reindex_timeout)
            .json(&body);
        let resp = self.execute("POST", path, builder).await?;
        let report: ReindexReport = resp.json().await.context("💀 _reindex returned un-JSON")?;

        info!(
            "🔄 Reindex finished: {}/{} documents transferred, {} failures",
            report.created,
            report.total,
            report.failures.len()
        );
        for failure in report.failures.iter().take(5) {
            warn!("⚠️ reindex failure detail: {failure}");
        }

        if report.created == 0 && report.total > 0 {
            return Err(ReindexIntegrityError {
                source_index: source.to_string(),
                dest_index: dest.to_string(),
                total: report.total,
                created: report.created,
            }
            .into());
        }
        Ok(report)
    }

    /// 🔓 `POST /{index}/_open` — wake it up before deleting it. Yes, really.
    pub async fn open_index(&self, index: &str) -> Result<()> {
        let path = format!("{index}/_open");
        self.execute("POST", &path, self.request(Method::POST, &path, true))
            .await?;
        Ok(())
    }

    /// 🔒 `POST /{index}/_close`.
    pub async fn close_index(&self, index: &str) -> Result<()> {
        let path = format!("{index}/_close");
        self.execute("POST", &path, self.request(Method::POST, &path, true))
            .await?;
        Ok(())
    }

    /// 🗑️ `DELETE /{index}` — authenticated, propagates on any failure.
    pub async fn delete_index(&self, index: &str) -> Result<()> {
        info!("🗑️ Deleting index '{index}'...");
        self.execute("DELETE", index, self.request(Method::DELETE, index, true))
            .await?;
        info!("✅ Index '{index}' deleted");
        Ok(())
    }

    /// 🗑️ Unauthenticated delete, used while the security plugin is disabled.
    /// Both "deleted" (200) and "already absent" (404) count as success —
    /// either way the index is gone, which was the entire point.
    pub async fn delete_index_no_auth(&self, index: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, index, false)
            .send()
            .await
            .map_err(|e| ClusterRequestError::new("DELETE", index, None, e.to_string()))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            info!("✅ Index '{index}' deleted (HTTP {status})");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClusterRequestError::new("DELETE", index, Some(status.as_u16()), body).into())
    }

    /// 👻 Does the index exist? `HEAD /{index}` — 404 means no, errors mean
    /// "probably no, but we'll say so in the logs". Probes degrade, mutations don't.
    pub async fn exists(&self, index: &str) -> bool {
        match self.request(Method::HEAD, index, true).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("👻 existence probe for '{index}' failed, treating as absent: {e}");
                false
            }
        }
    }

    /// 🔢 `GET /{index}/_count` — how many documents actually live there.
    pub async fn count(&self, index: &str) -> Result<u64> {
        let path = format!("{index}/_count");
        let resp = self
            .execute("GET", &path, self.request(Method::GET, &path, true))
            .await?;
        let counted: CountResponse = resp.json().await.context("💀 _count returned un-JSON")?;
        Ok(counted.count)
    }

    /// 🔃 `POST /{index}/_refresh` — make recent writes visible before counting them.
    pub async fn refresh(&self, index: &str) -> Result<()> {
        let path = format!("{index}/_refresh");
        self.execute("POST", &path, self.request(Method::POST, &path, true))
            .await?;
        Ok(())
    }

    /// 📦 Minimum available filesystem bytes across all nodes. The binding
    /// constraint is the most space-starved node — any node could end up
    /// hosting the migration's shards.
    pub async fn min_available_bytes(&self) -> Result<u64> {
        let path = "_nodes/stats/fs";
        let resp = self
            .execute("GET", path, self.request(Method::GET, path, true))
            .await?;
        let stats: NodesFsStats = resp.json().await.context("💀 _nodes/stats/fs returned un-JSON")?;
        stats
            .nodes
            .values()
            .map(|n| n.fs.total.available_in_bytes)
            .min()
            .context("💀 Node stats contained zero nodes. Is this cluster... a mirage?")
    }

    /// 🚦 `GET _cluster/health?wait_for_status=green&timeout=5s` — with a short
    /// server-side wait hint so our polling loop isn't a woodpecker.
    /// Returns the reported status string ("green", "yellow", "red", or worse).
    pub async fn health(&self, use_auth: bool) -> Result<String> {
        let path = "_cluster/health?wait_for_status=green&timeout=5s";
        let builder = self
            .request(Method::GET, path, use_auth)
            .timeout(Duration::from_secs(15));
        let resp = self.execute("GET", path, builder).await?;
        let health: HealthResponse = resp.json().await.context("💀 _cluster/health returned un-JSON")?;
        Ok(health.status)
    }
}
