//! Integration tests for butterfly-wayfinder sync and routing
//!
//! A local mock server stands in for the published manifest and graph, so
//! these tests exercise the real HTTP client, the on-disk store and the
//! engine thread together.

use std::process::Command;

use butterfly_wayfinder::{
    spawn_engine, Bundle, BundleStore, CacheStorage, Config, FileStore, HttpFetcher, Manifest,
    RouteMode, RouteQuery, RouteResult, Session, Status, SyncConfig, SyncGate, SyncOutcome,
    BUNDLE_KEY,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MANIFEST_PATH: &str = "/route/assets/tn.manifest.json";

fn manifest_json(sha: &str) -> String {
    format!(r#"{{"sha":"{sha}","graph_url":"tn.graph.v1.{sha}.json","bbox":[0,0,9,9]}}"#)
}

/// Central - Market - Harbour triangle plus an isolated Depot, optionally linked
fn graph_json(with_depot_link: bool) -> String {
    named_graph_json(["Central", "Market", "Harbour", "Depot"], with_depot_link)
}

/// Same layout as [`graph_json`] with the four nodes renamed
fn named_graph_json(names: [&str; 4], with_depot_link: bool) -> String {
    let [n0, n1, n2, n3] = names;
    let mut edges = String::from(r#"{"a":0,"b":1,"w":3},{"a":1,"b":2,"w":4},{"a":0,"b":2,"w":6}"#);
    if with_depot_link {
        edges.push_str(r#",{"a":2,"b":3,"w":2}"#);
    }
    format!(
        r#"{{"nodes":[
            {{"id":0,"name":"{n0}","x":0,"y":0}},
            {{"id":1,"name":"{n1}","x":3,"y":0}},
            {{"id":2,"name":"{n2}","x":3,"y":4}},
            {{"id":3,"name":"{n3}","x":9,"y":9}}
        ],"edges":[{edges}]}}"#
    )
}

async fn publish(server: &MockServer, sha: &str, graph: String) {
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest_json(sha)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/route/assets/tn.graph.v1.{sha}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_string(graph))
        .mount(server)
        .await;
}

fn manifest_url(server: &MockServer) -> String {
    format!("{}{MANIFEST_PATH}", server.uri())
}

fn query(start: &str, end: &str, mode: RouteMode) -> RouteQuery {
    RouteQuery {
        start_name: start.to_string(),
        end_name: end.to_string(),
        mode,
    }
}

fn config_for(server_url: String, data: &TempDir) -> Config {
    Config {
        manifest_url: server_url,
        data_dir: data.path().to_path_buf(),
        retry_base_delay_ms: 10,
        ..Config::default()
    }
}

async fn open_gate(url: &str, data: &TempDir) -> SyncGate<FileStore, HttpFetcher> {
    let engine = spawn_engine().unwrap();
    SyncGate::open(
        SyncConfig::new(url.parse().unwrap()),
        FileStore::new(data.path()),
        HttpFetcher::with_retry_delay(10),
        engine,
    )
    .await
}

#[tokio::test]
async fn test_cold_boot_downloads_and_routes() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();

    let mut gate = open_gate(&manifest_url(&server), &data).await;
    assert_eq!(gate.boot().await.unwrap(), SyncOutcome::Updated { sha: "v1".into() });

    let result = gate_route(&gate, query("central", "HARBOUR", RouteMode::Shortest)).await;
    assert_eq!(result.path, vec![0, 2]);
    assert_eq!(result.hops, 1);
    assert!((result.distance - 5.0).abs() < 1e-9);
}

/// Route through a fresh engine loaded from the gate's store
async fn gate_route(gate: &SyncGate<FileStore, HttpFetcher>, query: RouteQuery) -> RouteResult {
    let bundle = gate.store().get(BUNDLE_KEY).await.unwrap();
    let engine = spawn_engine().unwrap();
    engine.load(bundle).await.unwrap();
    engine.route(query).await.unwrap()
}

#[tokio::test]
async fn test_same_sha_skips_graph_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest_json("v1")))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/route/assets/tn.graph.v1.v1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(graph_json(false)))
        .expect(1)
        .mount(&server)
        .await;
    let data = TempDir::new().unwrap();

    let mut gate = open_gate(&manifest_url(&server), &data).await;
    assert_eq!(gate.boot().await.unwrap(), SyncOutcome::Updated { sha: "v1".into() });
    assert_eq!(gate.refresh(true).await, SyncOutcome::UpToDate { sha: "v1".into() });
}

#[tokio::test]
async fn test_recent_check_is_throttled_across_restarts() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();

    let mut first = open_gate(&manifest_url(&server), &data).await;
    first.boot().await.unwrap();
    drop(first);

    let mut second = open_gate(&manifest_url(&server), &data).await;
    assert_eq!(second.boot().await.unwrap(), SyncOutcome::Throttled);
    assert_eq!(second.cached_sha(), Some("v1"));

    let requests = server.received_requests().await.unwrap();
    let manifest_hits = requests.iter().filter(|r| r.url.path() == MANIFEST_PATH).count();
    assert_eq!(manifest_hits, 1);
}

#[tokio::test]
async fn test_new_sha_replaces_bundle() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();

    let mut gate = open_gate(&manifest_url(&server), &data).await;
    gate.boot().await.unwrap();
    let before = gate_route(&gate, query("Central", "Depot", RouteMode::Shortest)).await;
    assert!(before.is_empty());

    server.reset().await;
    publish(&server, "v2", graph_json(true)).await;
    assert_eq!(gate.refresh(true).await, SyncOutcome::Updated { sha: "v2".into() });

    let after = gate_route(&gate, query("Central", "Depot", RouteMode::FewestHops)).await;
    assert_eq!(after.path, vec![0, 2, 3]);
    assert_eq!(after.hops, 2);
}

#[tokio::test]
async fn test_stored_bundle_serves_after_network_loss() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let url = manifest_url(&server);
    let data = TempDir::new().unwrap();

    let assembled = Bundle::assemble(
        &Manifest::from_slice(manifest_json("v1").as_bytes()).unwrap(),
        serde_json::from_str(&graph_json(false)).unwrap(),
    );
    let fresh = spawn_engine().unwrap();
    fresh.load(assembled).await.unwrap();

    let mut gate = open_gate(&url, &data).await;
    gate.boot().await.unwrap();
    drop(gate);
    // Nothing mounted: every request now fails
    server.reset().await;

    let mut gate = open_gate(&url, &data).await;
    assert_eq!(gate.warm_start().await.unwrap().as_deref(), Some("v1"));
    assert!(matches!(gate.refresh(true).await, SyncOutcome::Failed { .. }));
    assert_eq!(gate.cached_sha(), Some("v1"));
    drop(gate);

    let reopened = FileStore::new(data.path()).get(BUNDLE_KEY).await.unwrap();
    assert_eq!(reopened.sha(), "v1");
    let stored = spawn_engine().unwrap();
    stored.load(reopened).await.unwrap();

    let queries = [
        query("Central", "Harbour", RouteMode::Shortest),
        query("Central", "Harbour", RouteMode::FewestHops),
        query("market", "HARBOUR", RouteMode::Shortest),
        query("Harbour", "Central", RouteMode::Shortest),
        query("Central", "Depot", RouteMode::Shortest),
        query("Central", "Nowhere", RouteMode::FewestHops),
    ];
    for q in queries {
        let expected = fresh.route_labelled(q.clone()).await.unwrap();
        assert_eq!(stored.route_labelled(q).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_library_route_and_sync() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = config_for(manifest_url(&server), &data);

    let result = butterfly_wayfinder::route(&config, "Central", "Harbour", "shortest")
        .await
        .unwrap();
    assert_eq!(result.path, vec![0, 2]);

    let missing = butterfly_wayfinder::route(&config, "Central", "Nowhere", "shortest")
        .await
        .unwrap();
    assert!(missing.is_empty());

    assert_eq!(
        butterfly_wayfinder::sync(&config, false).await.unwrap(),
        SyncOutcome::Throttled
    );
    assert_eq!(
        butterfly_wayfinder::sync(&config, true).await.unwrap(),
        SyncOutcome::UpToDate { sha: "v1".into() }
    );
}

#[tokio::test]
async fn test_session_routes_while_refreshing() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = Config {
        gate_interval_hours: 0,
        ..config_for(manifest_url(&server), &data)
    };

    let mut session = Session::open(&config).await.unwrap();
    let (_, outcome) = session
        .route(query("Central", "Harbour", RouteMode::Shortest))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated { sha: "v1".into() });
    session.close().await;

    server.reset().await;
    publish(&server, "v2", graph_json(true)).await;

    // Warm start answers from v1 while the gate moves to v2
    let mut session = Session::open(&config).await.unwrap();
    let (route, outcome) = session
        .route(query("Central", "Depot", RouteMode::Shortest))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated { sha: "v2".into() });
    assert!(route.result.is_empty());

    let (route, _) = session
        .route(query("Central", "Depot", RouteMode::Shortest))
        .await
        .unwrap();
    assert_eq!(route.result.path, vec![0, 2, 3]);
    session.close().await;

    let status = Status::read(&config).await;
    assert_eq!(status.sha.as_deref(), Some("v2"));
    assert_eq!(status.nodes, 4);
    assert_eq!(status.edges, 4);
    assert!(status.last_checked.is_some());
}

#[tokio::test]
async fn test_repeated_routes_load_each_version_once() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = Config {
        gate_interval_hours: 0,
        ..config_for(manifest_url(&server), &data)
    };

    let mut session = Session::open(&config).await.unwrap();
    for _ in 0..3 {
        let (route, _) = session
            .route(query("Central", "Harbour", RouteMode::Shortest))
            .await
            .unwrap();
        assert_eq!(route.result.path, vec![0, 2]);
    }
    assert_eq!(session.engine().loads(), 1);

    server.reset().await;
    publish(&server, "v2", graph_json(true)).await;
    for _ in 0..3 {
        session
            .route(query("Central", "Depot", RouteMode::Shortest))
            .await
            .unwrap();
    }
    assert_eq!(session.engine().loads(), 2);
    session.close().await;
}

#[tokio::test]
async fn test_warm_route_is_labelled_by_the_version_that_answered() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = Config {
        gate_interval_hours: 0,
        ..config_for(manifest_url(&server), &data)
    };
    butterfly_wayfinder::sync(&config, true).await.unwrap();

    // v2 swaps the names of nodes 0 and 2
    server.reset().await;
    publish(&server, "v2", named_graph_json(["Harbour", "Market", "Central", "Depot"], false)).await;

    let mut session = Session::open(&config).await.unwrap();
    let (route, outcome) = session
        .route(query("Central", "Harbour", RouteMode::Shortest))
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated { sha: "v2".into() });
    assert_eq!(route.sha.as_deref(), Some("v1"));
    assert_eq!(route.result.path, vec![0, 2]);
    assert_eq!(route.names, vec!["Central", "Harbour"]);

    let (route, _) = session
        .route(query("Central", "Harbour", RouteMode::Shortest))
        .await
        .unwrap();
    assert_eq!(route.sha.as_deref(), Some("v2"));
    assert_eq!(route.result.path, vec![2, 0]);
    assert_eq!(route.names, vec!["Central", "Harbour"]);
    session.close().await;
}

#[tokio::test]
async fn test_offline_cache_collects_stale_versions() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = Config {
        offline_cache: true,
        ..config_for(manifest_url(&server), &data)
    };

    assert_eq!(
        butterfly_wayfinder::sync(&config, true).await.unwrap(),
        SyncOutcome::Updated { sha: "v1".into() }
    );
    let storage = CacheStorage::new(config.cache_dir());
    let keys = storage.keys().await.unwrap();
    assert!(keys.contains(&"route-cache-v1-v1".to_string()));
    assert!(keys.contains(&"manifest-cache".to_string()));

    server.reset().await;
    publish(&server, "v2", graph_json(true)).await;

    // The first check after publishing still reads the cached manifest
    assert_eq!(
        butterfly_wayfinder::sync(&config, true).await.unwrap(),
        SyncOutcome::UpToDate { sha: "v1".into() }
    );
    assert_eq!(
        butterfly_wayfinder::sync(&config, true).await.unwrap(),
        SyncOutcome::Updated { sha: "v2".into() }
    );
    assert_eq!(
        storage.keys().await.unwrap(),
        vec!["manifest-cache".to_string(), "route-cache-v1-v2".to_string()]
    );
    assert_eq!(storage.marker().await.unwrap().sha, "v2");
}

#[tokio::test]
async fn test_activated_cache_is_not_reinstalled() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = Config {
        offline_cache: true,
        ..config_for(manifest_url(&server), &data)
    };

    butterfly_wayfinder::sync(&config, true).await.unwrap();
    let storage = CacheStorage::new(config.cache_dir());
    assert_eq!(storage.marker().await.unwrap().sha, "v1");
    let before = server.received_requests().await.unwrap().len();

    for _ in 0..3 {
        Session::open(&config).await.unwrap().close().await;
    }
    assert_eq!(Status::read(&config).await.sha.as_deref(), Some("v1"));
    let mut session = Session::open(&config).await.unwrap();
    assert_eq!(session.sync(false).await.unwrap(), SyncOutcome::Throttled);
    session.close().await;

    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_offline_cache_answers_without_network() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    let config = Config {
        offline_cache: true,
        ..config_for(manifest_url(&server), &data)
    };

    butterfly_wayfinder::sync(&config, true).await.unwrap();
    server.reset().await;

    let mut session = Session::open(&config).await.unwrap();
    assert_eq!(session.sync(true).await.unwrap(), SyncOutcome::UpToDate { sha: "v1".into() });
    let (route, _) = session
        .route(query("Central", "Harbour", RouteMode::Shortest))
        .await
        .unwrap();
    assert_eq!(route.result.path, vec![0, 2]);
    session.close().await;

    let storage = CacheStorage::new(config.cache_dir());
    assert!(storage.keys().await.unwrap().contains(&"route-cache-v1-v1".to_string()));
}

#[test]
#[cfg(not(feature = "ci-tests-disabled"))]
fn test_binary_status_without_data() {
    let data = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_butterfly-wayfinder"))
        .arg("status")
        .arg("--data-dir")
        .arg(data.path())
        .output()
        .expect("Failed to run butterfly-wayfinder");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("none cached"), "unexpected output: {stdout}");
    assert!(stdout.contains("Last checked: never"));
}

#[tokio::test]
#[cfg(not(feature = "ci-tests-disabled"))]
async fn test_binary_reports_failed_sync_without_verbose() {
    let server = MockServer::start().await;
    publish(&server, "v1", graph_json(false)).await;
    let data = TempDir::new().unwrap();
    butterfly_wayfinder::sync(&config_for(manifest_url(&server), &data), true)
        .await
        .unwrap();

    // Nothing listens on the discard port, so the check fails
    let config_path = data.path().join("wayfinder.toml");
    std::fs::write(
        &config_path,
        "manifest_url = \"http://127.0.0.1:9/route/assets/tn.manifest.json\"\n\
         gate_interval_hours = 0\n\
         retry_base_delay_ms = 10\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_butterfly-wayfinder"))
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&config_path)
        .arg("--data-dir")
        .arg(data.path())
        .args(["route", "Central", "Harbour"])
        .output()
        .expect("Failed to run butterfly-wayfinder");

    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Using cached graph; sync failed"), "unexpected stderr: {stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Distance: 5.0"), "unexpected output: {stdout}");
    assert!(stdout.contains("Central → Harbour"));
}

#[test]
#[cfg(not(feature = "ci-tests-disabled"))]
fn test_binary_rejects_partial_link() {
    let output = Command::new(env!("CARGO_BIN_EXE_butterfly-wayfinder"))
        .args(["route", "--link", "https://example.org/route/?start=Central"])
        .output()
        .expect("Failed to run butterfly-wayfinder");

    assert!(!output.status.success());
}
