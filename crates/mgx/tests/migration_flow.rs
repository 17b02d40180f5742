//! 🎢 End-to-end rehearsals of the per-index state machine against a mock
//! cluster. Every ending gets a dress rehearsal: the triumphant one, the
//! restored one, the system-index one, and the one we hope never airs.

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mgx::app_config::{ClusterEndpoint, Timeouts};
use mgx::cluster::{ClusterClient, IndexDescriptor};
use mgx::errors::{CriticalDataLossError, ReindexIntegrityError};
use mgx::migrate::{IndexMigrationOrchestrator, MigrationPhase, MigrationStatus};
use mgx::version;

fn client_for(server: &MockServer) -> ClusterClient {
    let endpoint = ClusterEndpoint {
        url: server.uri(),
        username: "admin".into(),
        password: "admin".into(),
        verify_tls: false,
    };
    ClusterClient::new(&endpoint, &Timeouts::default()).expect("client builds")
}

fn legacy_descriptor(name: &str) -> IndexDescriptor {
    let v = version::decode(135_249_527); // 1.3.17
    IndexDescriptor {
        name: name.into(),
        size_bytes: 4096,
        is_legacy: v.is_legacy(),
        version: v,
    }
}

/// Mount the metadata endpoints every migration starts with.
async fn mount_metadata(server: &MockServer, index: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{index}/_settings")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            index: {"settings": {"index": {
                "number_of_shards": "2",
                "number_of_replicas": "1",
                "uuid": "doomed-uuid",
                "version": {"created": "135249527"}
            }}}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{index}/_mappings")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            index: {"mappings": {"properties": {"ts": {"type": "date"}}}}
        })))
        .mount(server)
        .await;
}

/// Mount a successful synchronous reindex for one direction.
async fn mount_reindex(server: &MockServer, source: &str, dest: &str, docs: u64) {
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .and(body_json(json!({
            "source": {"index": source},
            "dest": {"index": dest},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": docs, "created": docs, "failures": []
        })))
        .mount(server)
        .await;
}

async fn mount_count(server: &MockServer, index: &str, count: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/{index}/_count")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": count})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/{index}/_refresh")))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

fn ok_mock(m: &str, p: &str) -> wiremock::MockBuilder {
    Mock::given(method(m)).and(path(p.to_string()))
}

#[tokio::test]
async fn the_one_where_an_index_goes_all_the_way() {
    let server = MockServer::start().await;
    mount_metadata(&server, "orders").await;

    // unmatched HEAD /orders-migration → 404 → no stale staging. perfect.
    ok_mock("PUT", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_reindex(&server, "orders", "orders-migration", 250).await;
    mount_reindex(&server, "orders-migration", "orders", 250).await;
    mount_count(&server, "orders", 250).await;
    mount_count(&server, "orders-migration", 250).await;
    ok_mock("DELETE", "/orders")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    ok_mock("PUT", "/orders")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    ok_mock("DELETE", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let orchestrator = IndexMigrationOrchestrator::new(&client);
    let outcome = orchestrator
        .migrate(&legacy_descriptor("orders"))
        .await
        .expect("the happy path should be happy");

    assert_eq!(outcome.status, MigrationStatus::Migrated);
    assert_eq!(outcome.phase_reached, MigrationPhase::Success);
    assert!(outcome.original_deleted);

    // the recreated index must carry the whitelist, not the old stamps
    let put_bodies: Vec<serde_json::Value> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT" && r.url.path() == "/orders")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(put_bodies.len(), 1);
    let settings = &put_bodies[0]["settings"]["index"];
    assert_eq!(settings["number_of_shards"], "2");
    assert!(settings.get("uuid").is_none(), "the uuid stays with the corpse");
    assert!(settings.get("version").is_none(), "no legacy stamp on the newborn");
}

#[tokio::test]
async fn the_one_where_stale_staging_gets_swept_before_the_show() {
    let server = MockServer::start().await;
    mount_metadata(&server, "orders").await;

    // a crashed previous run left staging behind: first probe says "exists"
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // its deletion must happen before anything else mutates
    ok_mock("DELETE", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    ok_mock("PUT", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_reindex(&server, "orders", "orders-migration", 10).await;
    mount_reindex(&server, "orders-migration", "orders", 10).await;
    mount_count(&server, "orders", 10).await;
    mount_count(&server, "orders-migration", 10).await;
    ok_mock("DELETE", "/orders").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    ok_mock("PUT", "/orders").respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let client = client_for(&server);
    let outcome = IndexMigrationOrchestrator::new(&client)
        .migrate(&legacy_descriptor("orders"))
        .await
        .expect("a stale staging copy must not stop a re-run");
    assert_eq!(outcome.status, MigrationStatus::Migrated);

    // re-run safety: the stale delete came before the staging create
    let requests = server.received_requests().await.unwrap();
    let first_delete = requests
        .iter()
        .position(|r| r.method.as_str() == "DELETE" && r.url.path() == "/orders-migration")
        .expect("stale staging was deleted");
    let staging_create = requests
        .iter()
        .position(|r| r.method.as_str() == "PUT" && r.url.path() == "/orders-migration")
        .expect("staging was created");
    assert!(first_delete < staging_create, "sweep first, build second");
}

#[tokio::test]
async fn the_one_where_a_user_index_is_restored_after_the_point_of_no_return() {
    let server = MockServer::start().await;
    mount_metadata(&server, "orders").await;

    // staging: absent at the start, present during recovery
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    // original exists again once recreated
    ok_mock("HEAD", "/orders")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    ok_mock("PUT", "/orders-migration").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    mount_reindex(&server, "orders", "orders-migration", 99).await;
    mount_count(&server, "orders", 99).await;
    mount_count(&server, "orders-migration", 99).await;
    ok_mock("DELETE", "/orders").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    ok_mock("PUT", "/orders").respond_with(ResponseTemplate::new(200)).mount(&server).await;

    // the reindex back blows up once, then recovery retries it and succeeds
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .and(body_json(json!({
            "source": {"index": "orders-migration"},
            "dest": {"index": "orders"},
        })))
        .respond_with(ResponseTemplate::new(503).set_body_string("shard tantrum"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_reindex(&server, "orders-migration", "orders", 99).await;
    ok_mock("DELETE", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let failure = IndexMigrationOrchestrator::new(&client)
        .migrate(&legacy_descriptor("orders"))
        .await
        .expect_err("a failed step is a failed migration, restored or not");

    assert_eq!(failure.outcome.status, MigrationStatus::Restored);
    assert_eq!(failure.outcome.phase_reached, MigrationPhase::ReindexBack);
    assert!(failure.outcome.original_deleted);
}

#[tokio::test]
async fn the_one_where_a_system_index_is_deleted_for_recreation() {
    let server = MockServer::start().await;
    mount_metadata(&server, ".watchlist").await;

    // staging: absent at start, present during recovery
    ok_mock("HEAD", "/.watchlist-migration")
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    ok_mock("HEAD", "/.watchlist-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    // original: gone (delete succeeded, recreate failed) → HEAD falls through to 404

    ok_mock("PUT", "/.watchlist-migration").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    mount_reindex(&server, ".watchlist", ".watchlist-migration", 7).await;
    mount_count(&server, ".watchlist", 7).await;
    mount_count(&server, ".watchlist-migration", 7).await;
    ok_mock("DELETE", "/.watchlist").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    // the recreate fails — now the original is simply gone
    ok_mock("PUT", "/.watchlist")
        .respond_with(ResponseTemplate::new(500).set_body_string("no room at the inn"))
        .mount(&server)
        .await;
    ok_mock("DELETE", "/.watchlist-migration")
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = IndexMigrationOrchestrator::new(&client)
        .migrate(&legacy_descriptor(".watchlist"))
        .await
        .expect("deleted-for-recreation is an acceptable ending for a system index");

    assert_eq!(outcome.status, MigrationStatus::DeletedForRecreation);
    assert_eq!(outcome.phase_reached, MigrationPhase::RecreateOriginal);
}

#[tokio::test]
async fn the_one_where_both_copies_vanish_and_we_say_the_c_word() {
    let server = MockServer::start().await;
    mount_metadata(&server, "orders").await;

    ok_mock("PUT", "/orders-migration").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    mount_reindex(&server, "orders", "orders-migration", 12).await;
    mount_count(&server, "orders", 12).await;
    mount_count(&server, "orders-migration", 12).await;
    ok_mock("DELETE", "/orders").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    // recreate fails AND, by the time recovery looks, staging has vanished too
    // (HEAD probes fall through to wiremock's default 404 for both names)
    ok_mock("PUT", "/orders")
        .respond_with(ResponseTemplate::new(500).set_body_string("gremlins"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let failure = IndexMigrationOrchestrator::new(&client)
        .migrate(&legacy_descriptor("orders"))
        .await
        .expect_err("this is the bad ending");

    assert_eq!(failure.outcome.status, MigrationStatus::Unrecoverable);
    assert!(
        failure.source.downcast_ref::<CriticalDataLossError>().is_some(),
        "the typed critical-data-loss error must survive the context wrapping"
    );
    assert!(failure.source.to_string().contains("CRITICAL") || format!("{:#}", failure.source).contains("CRITICAL"));
}

#[tokio::test]
async fn the_one_where_a_reindex_that_copied_nothing_is_not_a_success() {
    let server = MockServer::start().await;
    mount_metadata(&server, "orders").await;

    ok_mock("PUT", "/orders-migration").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    // the cluster reports "done!" while having transferred exactly nothing
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .and(body_json(json!({
            "source": {"index": "orders"},
            "dest": {"index": "orders-migration"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 42, "created": 0, "failures": []
        })))
        .mount(&server)
        .await;
    // cleanup of the empty staging copy
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    ok_mock("DELETE", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let failure = IndexMigrationOrchestrator::new(&client)
        .migrate(&legacy_descriptor("orders"))
        .await
        .expect_err("zero documents copied is a cluster gaslighting us, not a success");

    assert_eq!(failure.outcome.phase_reached, MigrationPhase::ReindexToStaging);
    assert!(!failure.outcome.original_deleted);
    // the typed integrity error survives the step wrapping
    assert!(
        failure
            .source
            .chain()
            .any(|cause| cause.downcast_ref::<ReindexIntegrityError>().is_some()),
        "expected a ReindexIntegrityError in the chain, got: {:#}",
        failure.source
    );

    // and the original index was never deleted — the gate held
    let deletes: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!deletes.contains(&"/orders".to_string()), "DELETE /orders must not appear: {deletes:?}");
}

#[tokio::test]
async fn the_one_where_a_count_mismatch_stops_everything_before_the_delete() {
    let server = MockServer::start().await;
    mount_metadata(&server, "orders").await;

    ok_mock("PUT", "/orders-migration").respond_with(ResponseTemplate::new(200)).mount(&server).await;
    mount_reindex(&server, "orders", "orders-migration", 100).await;
    // source says 100, staging says 97 — three documents went missing
    mount_count(&server, "orders", 100).await;
    mount_count(&server, "orders-migration", 97).await;
    // cleanup of the bad staging copy
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    ok_mock("HEAD", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    ok_mock("DELETE", "/orders-migration")
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let failure = IndexMigrationOrchestrator::new(&client)
        .migrate(&legacy_descriptor("orders"))
        .await
        .expect_err("a lossy copy must never earn the point of no return");

    assert_eq!(failure.outcome.phase_reached, MigrationPhase::ReindexToStaging);
    assert_eq!(failure.outcome.status, MigrationStatus::Restored);
    assert!(!failure.outcome.original_deleted, "the original was never touched");

    // and the original index was, in fact, never deleted
    let deletes: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!deletes.contains(&"/orders".to_string()), "DELETE /orders must not appear: {deletes:?}");
}
