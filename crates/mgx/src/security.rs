//! 🔐 security.rs — reinitializing the auth subsystem without its own tooling.
//!
//! 🎬 *[heist briefing voice]* "The security plugin guards the cluster. To
//! replace its index, we must first convince the cluster there is no security
//! plugin. Then we walk in, delete the index, and put security back before
//! anyone notices. Seven steps. No TLS material required. Don't touch the lasers."
//!
//! The play, in order:
//!   1. disable       — append the kill-switch directive to the config blob
//!   2. restart       — rolling-restart every workload (auth is now off)
//!   3. await green   — poll health + root API, no credentials
//!   4. delete index  — unauthenticated DELETE of the security index
//!   5. re-enable     — remove the directive
//!   6. restart       — roll everything again (auth back under enforcement)
//!   7. await green   — poll health + root API, *with* credentials
//!
//! Any step failing aborts the whole act and reports which phase died. The
//! caller decides how sad to be about it (fatal if the security index was
//! independently known to be legacy, a warning otherwise).
//!
//! 📐 DESIGN NOTE: the blob edits are pure string transforms
//! ([`add_directive`] / [`remove_directive`]) kept away from the I/O, so the
//! text-mangling can be unit-tested without summoning a Kubernetes.

use std::time::Duration;

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{info, warn};

use crate::admin::{ClusterAdmin, Workload};
use crate::app_config::{SecurityConfig, Timeouts};
use crate::cluster::ClusterClient;

/// 🔌 The kill switch. One line of YAML between the cluster and anarchy.
pub const SECURITY_DISABLED_DIRECTIVE: &str = "plugins.security.disabled: true";

/// ➕ Append `directive` as its own line, idempotently. If it's already in
/// there (whitespace-trimmed match), the blob comes back unchanged — safe to
/// re-run after a crashed attempt.
pub fn add_directive(blob: &str, directive: &str) -> String {
    if blob.lines().any(|line| line.trim() == directive) {
        return blob.to_string();
    }
    format!("{}\n{directive}\n", blob.trim_end_matches('\n'))
}

/// ➖ Remove every line that is exactly `directive` (trimmed). Everything else
/// survives byte-for-byte, because this file also contains settings people cried over.
pub fn remove_directive(blob: &str, directive: &str) -> String {
    let kept: Vec<&str> = blob
        .lines()
        .filter(|line| line.trim() != directive)
        .collect();
    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// 🎭 The seven phases (plus curtain call) of the reinitialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitPhase {
    Disabling,
    RestartingNoAuth,
    AwaitingGreenNoAuth,
    DeletingSecurityIndex,
    Reenabling,
    RestartingAuth,
    AwaitingGreenAuth,
    Done,
}

impl std::fmt::Display for ReinitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReinitPhase::Disabling => "disabling",
            ReinitPhase::RestartingNoAuth => "restarting-no-auth",
            ReinitPhase::AwaitingGreenNoAuth => "awaiting-green-no-auth",
            ReinitPhase::DeletingSecurityIndex => "deleting-security-index",
            ReinitPhase::Reenabling => "re-enabling",
            ReinitPhase::RestartingAuth => "restarting-auth",
            ReinitPhase::AwaitingGreenAuth => "awaiting-green-auth",
            ReinitPhase::Done => "done",
        };
        write!(f, "{label}")
    }
}

/// 💥 The act failed, and here's exactly which scene it died in.
#[derive(Debug, Error)]
#[error("security reinitialization failed at phase '{phase}': {source}")]
pub struct ReinitError {
    pub phase: ReinitPhase,
    pub source: anyhow::Error,
}

/// 🔐 The reinitializer. Borrows the admin capability and the cluster client;
/// owns nothing but the plan.
pub struct SecurityReinitializer<'a> {
    admin: &'a dyn ClusterAdmin,
    client: &'a ClusterClient,
    workloads: Vec<Workload>,
    security_index: String,
    ready_timeout: Duration,
    ready_interval: Duration,
}

impl<'a> SecurityReinitializer<'a> {
    pub fn new(
        admin: &'a dyn ClusterAdmin,
        client: &'a ClusterClient,
        security: &SecurityConfig,
        timeouts: &Timeouts,
    ) -> Self {
        Self {
            admin,
            client,
            workloads: security.workloads(),
            security_index: security.security_index.clone(),
            ready_timeout: timeouts.cluster_ready(),
            ready_interval: timeouts.cluster_ready_interval(),
        }
    }

    /// 🎬 Run the whole seven-step act.
    ///
    /// 🛑 Zero configured workloads is a hard configuration error, checked
    /// *before* any config mutation — we will not disable security on a
    /// cluster we cannot restart. That's not a migration, that's sabotage.
    pub async fn reinitialize(&self) -> Result<(), ReinitError> {
        if self.workloads.is_empty() {
            return Err(ReinitError {
                phase: ReinitPhase::RestartingNoAuth,
                source: anyhow::anyhow!(
                    "no statefulset or deployment names configured — cannot restart what we cannot name"
                ),
            });
        }

        info!("🔐 Starting security reinitialization ({} workloads in play)", self.workloads.len());

        info!("🔐 [1/7] Adding '{SECURITY_DISABLED_DIRECTIVE}' to the config blob");
        self.step(ReinitPhase::Disabling, self.disable()).await?;

        info!("🔐 [2/7] Rolling-restarting workloads (security disabled)");
        self.step(ReinitPhase::RestartingNoAuth, self.restart_all()).await?;

        info!("🔐 [3/7] Waiting for green + reachable API (no auth)");
        self.step(ReinitPhase::AwaitingGreenNoAuth, self.await_ready(false)).await?;

        info!("🔐 [4/7] Deleting security index '{}'", self.security_index);
        self.step(
            ReinitPhase::DeletingSecurityIndex,
            self.client.delete_index_no_auth(&self.security_index),
        )
        .await?;

        info!("🔐 [5/7] Removing '{SECURITY_DISABLED_DIRECTIVE}' from the config blob");
        self.step(ReinitPhase::Reenabling, self.reenable()).await?;

        info!("🔐 [6/7] Rolling-restarting workloads (security re-enabled)");
        self.step(ReinitPhase::RestartingAuth, self.restart_all()).await?;

        info!("🔐 [7/7] Waiting for green + reachable API (with auth)");
        self.step(ReinitPhase::AwaitingGreenAuth, self.await_ready(true)).await?;

        info!("✅ Security reinitialization completed — fresh index, enforcement back on");
        Ok(())
    }

    /// 🔧 Tag a step's failure with its phase. The phase *is* the diagnosis.
    async fn step<F, T>(&self, phase: ReinitPhase, fut: F) -> Result<T, ReinitError>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        fut.await.map_err(|source| ReinitError { phase, source })
    }

    /// ➕ Read-modify-write the kill switch in. No-op if already present.
    async fn disable(&self) -> Result<()> {
        let blob = self.admin.read_config_blob().await?;
        let patched = add_directive(&blob, SECURITY_DISABLED_DIRECTIVE);
        if patched == blob {
            info!("🔐 directive already present — nothing to add, carrying on");
            return Ok(());
        }
        self.admin.write_config_blob(&patched).await
    }

    /// ➖ Read-modify-write the kill switch back out.
    async fn reenable(&self) -> Result<()> {
        let blob = self.admin.read_config_blob().await?;
        let patched = remove_directive(&blob, SECURITY_DISABLED_DIRECTIVE);
        if patched == blob {
            warn!("🔐 directive was already absent — someone beat us to it, continuing");
            return Ok(());
        }
        self.admin.write_config_blob(&patched).await
    }

    /// 🔄 Restart every configured workload. ALL of them must accept the
    /// trigger; partial restarts leave the cluster half-convinced about auth.
    async fn restart_all(&self) -> Result<()> {
        let mut failed: Vec<String> = Vec::new();
        for workload in &self.workloads {
            if let Err(e) = self.admin.rolling_restart(workload).await {
                warn!("💥 failed to restart {workload}: {e}");
                failed.push(workload.to_string());
            }
        }
        if !failed.is_empty() {
            bail!("failed to restart workload(s): {}", failed.join(", "));
        }
        Ok(())
    }

    /// 🚦 Poll until the cluster reports green AND the root endpoint answers,
    /// or the deadline laughs at us. Each probe carries a short server-side
    /// wait hint so we're not hammering the poor thing between naps.
    async fn await_ready(&self, use_auth: bool) -> Result<()> {
        let auth_label = if use_auth { "with auth" } else { "no auth" };
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.client.health(use_auth).await {
                Ok(status) if status == "green" => {
                    if self.client.root_reachable(use_auth).await {
                        info!("✅ Cluster is green and reachable ({auth_label}, attempt {attempt})");
                        return Ok(());
                    }
                    info!("🚦 green but root API not answering yet ({auth_label}, attempt {attempt})");
                }
                Ok(status) => {
                    info!("🚦 cluster status '{status}' ({auth_label}, attempt {attempt}) — not green yet");
                }
                Err(e) => {
                    info!("🚦 health probe failed ({auth_label}, attempt {attempt}): {e}");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "timed out after {:?} waiting for cluster green + reachable API ({auth_label})",
                    self.ready_timeout
                );
            }
            tokio::time::sleep(self.ready_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::InMemoryAdmin;
    use crate::app_config::ClusterEndpoint;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BLOB: &str = "cluster.name: test\nnetwork.host: 0.0.0.0\n";

    #[test]
    fn the_one_where_the_kill_switch_is_added_exactly_once() {
        let once = add_directive(BLOB, SECURITY_DISABLED_DIRECTIVE);
        assert!(once.ends_with(&format!("{SECURITY_DISABLED_DIRECTIVE}\n")));
        assert!(once.contains("cluster.name: test"), "existing lines survive");

        // -- idempotence: running it again changes nothing
        let twice = add_directive(&once, SECURITY_DISABLED_DIRECTIVE);
        assert_eq!(once, twice);
        assert_eq!(
            twice.matches(SECURITY_DISABLED_DIRECTIVE).count(),
            1,
            "one kill switch is plenty"
        );
    }

    #[test]
    fn the_one_where_the_kill_switch_is_removed_and_nothing_else_is() {
        let armed = add_directive(BLOB, SECURITY_DISABLED_DIRECTIVE);
        let disarmed = remove_directive(&armed, SECURITY_DISABLED_DIRECTIVE);
        assert_eq!(disarmed, BLOB);

        // removing from a blob that never had it is also fine
        assert_eq!(remove_directive(BLOB, SECURITY_DISABLED_DIRECTIVE), BLOB);

        // indented copies are removed too — trimmed match, not exact match
        let sneaky = format!("{BLOB}   {SECURITY_DISABLED_DIRECTIVE}\n");
        assert_eq!(remove_directive(&sneaky, SECURITY_DISABLED_DIRECTIVE), BLOB);
    }

    fn test_timeouts() -> Timeouts {
        Timeouts {
            cluster_ready_secs: 2,
            cluster_ready_interval_secs: 0,
            ..Timeouts::default()
        }
    }

    fn endpoint(url: &str) -> ClusterEndpoint {
        ClusterEndpoint {
            url: url.to_string(),
            username: "admin".into(),
            password: "admin".into(),
            verify_tls: false,
        }
    }

    #[tokio::test]
    async fn the_one_where_zero_workloads_fails_before_touching_anything() {
        let admin = InMemoryAdmin::new(BLOB);
        let timeouts = test_timeouts();
        let client = ClusterClient::new(&endpoint("http://127.0.0.1:9"), &timeouts).unwrap();
        let security = SecurityConfig::default(); // no workloads configured

        let reinit = SecurityReinitializer::new(&admin, &client, &security, &timeouts);
        let err = reinit.reinitialize().await.expect_err("must fail immediately");

        assert_eq!(err.phase, ReinitPhase::RestartingNoAuth);
        // the config blob was never patched — no rollback dance required
        assert_eq!(admin.blob(), BLOB);
        assert!(admin.restart_log().is_empty());
    }

    #[tokio::test]
    async fn the_one_where_all_seven_steps_land() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "green"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"cluster_name": "t"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/.opendistro_security"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let admin = InMemoryAdmin::new(BLOB);
        let timeouts = test_timeouts();
        let client = ClusterClient::new(&endpoint(&server.uri()), &timeouts).unwrap();
        let security = SecurityConfig {
            statefulset_names: "master,data".into(),
            deployment_names: "client".into(),
            ..SecurityConfig::default()
        };

        let reinit = SecurityReinitializer::new(&admin, &client, &security, &timeouts);
        reinit.reinitialize().await.expect("the heist should succeed");

        // directive added then removed — blob back to its original self
        assert_eq!(admin.blob(), BLOB);
        // every workload restarted twice: once disabled, once re-enabled
        assert_eq!(admin.restart_log().len(), 6);
        assert_eq!(admin.restart_log()[0], "statefulset/master");
    }

    #[tokio::test]
    async fn the_one_where_a_failed_restart_names_the_phase() {
        let admin = InMemoryAdmin::with_failing_restarts(BLOB);
        let timeouts = test_timeouts();
        let client = ClusterClient::new(&endpoint("http://127.0.0.1:9"), &timeouts).unwrap();
        let security = SecurityConfig {
            statefulset_names: "master".into(),
            ..SecurityConfig::default()
        };

        let reinit = SecurityReinitializer::new(&admin, &client, &security, &timeouts);
        let err = reinit.reinitialize().await.expect_err("restarts are scripted to fail");
        assert_eq!(err.phase, ReinitPhase::RestartingNoAuth);
        // step 1 did run: the kill switch is in the blob (and stays — rollback is the operator's call)
        assert!(admin.blob().contains(SECURITY_DISABLED_DIRECTIVE));
    }

    #[tokio::test]
    async fn the_one_where_a_404_on_the_security_index_is_still_a_win() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "green"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        // the index is already gone — somebody else's crash, our gain
        Mock::given(method("DELETE"))
            .and(path("/.opendistro_security"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let admin = InMemoryAdmin::new(BLOB);
        let timeouts = test_timeouts();
        let client = ClusterClient::new(&endpoint(&server.uri()), &timeouts).unwrap();
        let security = SecurityConfig {
            statefulset_names: "master".into(),
            ..SecurityConfig::default()
        };

        SecurityReinitializer::new(&admin, &client, &security, &timeouts)
            .reinitialize()
            .await
            .expect("already-absent counts as deleted");
    }
}
