//! End-to-end install tests against a mock catalog
//!
//! A wiremock server plays both the catalog host and the code CDN.

mod common;

use common::*;
use quire_engine::orchestrator::Orchestrator;
use quire_engine::registry::PluginRegistry;
use quire_engine::runtime::{LoadState, RuntimeClass, RuntimeLoader};
use quire_plugins::registry::{RegistryClient, RegistryClientConfig};
use quire_plugins::verifier::compute_hash;
use sdk::errors::{SourceError, StrategyKind};
use sdk::source::ContentSource;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

struct Harness {
    server: MockServer,
    orchestrator: Orchestrator,
    _scratch: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        let scratch = tempfile::tempdir().unwrap();

        let http = reqwest::Client::new();
        let client = RegistryClient::with_http(
            http.clone(),
            RegistryClientConfig {
                manifest_url: format!("{}/manifest.json", server.uri()),
                fallback_url: format!("{}/fallback.json", server.uri()),
                cache_duration: Duration::from_secs(60),
                request_timeout: Duration::from_secs(2),
            },
        );
        let loader = RuntimeLoader::new(
            RuntimeClass::Server,
            host_env(),
            scratch.path().to_path_buf(),
        );
        let orchestrator = Orchestrator::new(
            client,
            http,
            loader,
            Arc::new(PluginRegistry::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        Self {
            server,
            orchestrator,
            _scratch: scratch,
        }
    }

    fn code_url(&self, id: &str) -> String {
        format!("{}/code/{}.rhai", self.server.uri(), id)
    }

    async fn serve_manifest(&self, entries: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(manifest(entries)))
            .mount(&self.server)
            .await;
    }

    async fn serve_code(&self, id: &str, code: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/code/{}.rhai", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(code))
            .mount(&self.server)
            .await;
    }

    /// Publish `code` under `id` with a matching digest
    async fn publish(&self, id: &str, code: &str) {
        self.serve_manifest(vec![manifest_entry(
            id,
            "1.0.0",
            &self.code_url(id),
            &compute_hash(code.as_bytes()),
        )])
        .await;
        self.serve_code(id, code).await;
    }
}

fn expect_failure(result: Result<Arc<dyn ContentSource>, SourceError>) -> SourceError {
    match result {
        Ok(source) => panic!("expected install to fail, loaded '{}'", source.id()),
        Err(e) => e,
    }
}

#[tokio::test]
async fn test_install_reports_progress_and_registers() {
    let h = Harness::start().await;
    h.publish("demo", DEMO_PLUGIN).await;

    let progress = Mutex::new(Vec::new());
    let source = h
        .orchestrator
        .install("demo", |percent, _status| progress.lock().unwrap().push(percent))
        .await
        .unwrap();

    assert_eq!(*progress.lock().unwrap(), vec![0, 20, 50, 70, 80, 90, 100]);
    assert_eq!(source.id(), "demo");
    assert!(h.orchestrator.registry().has("demo"));
    assert_eq!(h.orchestrator.load_state("demo"), Some(LoadState::Registered));

    let installed = h.orchestrator.installed();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].version, "1.0.0");
    assert_eq!(installed[0].sha256, compute_hash(DEMO_PLUGIN.as_bytes()));
    assert_eq!(installed[0].strategy, StrategyKind::SyntheticModule);

    let item = source.fetch_item_details("1").await.unwrap();
    assert_eq!(item.title, "Item 1");
}

#[tokio::test]
async fn test_integrity_mismatch_blocks_registration() {
    let h = Harness::start().await;
    h.serve_manifest(vec![manifest_entry(
        "demo",
        "1.0.0",
        &h.code_url("demo"),
        &compute_hash(b"something else entirely"),
    )])
    .await;
    h.serve_code("demo", DEMO_PLUGIN).await;

    let progress = Mutex::new(Vec::new());
    let err = expect_failure(
        h.orchestrator
            .install("demo", |percent, _| progress.lock().unwrap().push(percent))
            .await,
    );

    assert!(matches!(err, SourceError::Integrity { ref id, .. } if id == "demo"));
    assert_eq!(*progress.lock().unwrap(), vec![0, 20]);
    assert!(!h.orchestrator.registry().has("demo"));
    assert_eq!(h.orchestrator.load_state("demo"), Some(LoadState::Failed));
    assert!(h.orchestrator.installed().is_empty());

    // The catalog entry itself is still resolvable
    assert_eq!(h.orchestrator.resolve("demo").await.unwrap().id, "demo");
}

#[tokio::test]
async fn test_digest_covers_exact_downloaded_bytes() {
    let h = Harness::start().await;
    let mut body = vec![0xEF, 0xBB, 0xBF];
    body.extend_from_slice(DEMO_PLUGIN.as_bytes());

    h.serve_manifest(vec![manifest_entry(
        "demo",
        "1.0.0",
        &h.code_url("demo"),
        &compute_hash(&body),
    )])
    .await;
    Mock::given(method("GET"))
        .and(path("/code/demo.rhai"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "text/plain"))
        .mount(&h.server)
        .await;

    let source = h.orchestrator.install("demo", |_, _| {}).await.unwrap();

    assert_eq!(source.id(), "demo");
    assert_eq!(h.orchestrator.installed()[0].sha256, compute_hash(&body));
}

#[tokio::test]
async fn test_double_install_keeps_one_entry() {
    let h = Harness::start().await;
    h.publish("demo", DEMO_PLUGIN).await;

    h.orchestrator.install("demo", |_, _| {}).await.unwrap();
    h.orchestrator.install("demo", |_, _| {}).await.unwrap();

    assert_eq!(h.orchestrator.registry().len(), 1);
    assert_eq!(h.orchestrator.installed().len(), 1);
    // Both installs were served from one manifest fetch
    assert_eq!(h.orchestrator.registry_client().network_fetches(), 1);
}

#[tokio::test]
async fn test_capability_query_after_install() {
    let h = Harness::start().await;
    h.publish("demo", DEMO_PLUGIN).await;
    h.orchestrator.install("demo", |_, _| {}).await.unwrap();

    let searchable: Vec<String> = h
        .orchestrator
        .registry()
        .by_capability("search")
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    assert_eq!(searchable, vec!["demo"]);
    assert!(h.orchestrator.registry().by_capability("trending").is_empty());

    let results = h.orchestrator.registry().get("demo").unwrap().search("sun").await.unwrap();
    assert_eq!(results[0].title, "Result for sun");
}

#[tokio::test]
async fn test_unknown_source_is_not_found() {
    let h = Harness::start().await;
    h.publish("demo", DEMO_PLUGIN).await;

    let err = expect_failure(h.orchestrator.install("nope", |_, _| {}).await);
    assert!(matches!(err, SourceError::NotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn test_incompatible_core_fails_before_download() {
    let h = Harness::start().await;
    let mut entry = manifest_entry(
        "future",
        "1.0.0",
        &h.code_url("future"),
        &compute_hash(DEMO_PLUGIN.as_bytes()),
    );
    entry["metadata"]["minCoreVersion"] = json!("99.0.0");
    h.serve_manifest(vec![entry]).await;

    Mock::given(method("GET"))
        .and(path("/code/future.rhai"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DEMO_PLUGIN))
        .expect(0)
        .mount(&h.server)
        .await;

    let err = expect_failure(h.orchestrator.install("future", |_, _| {}).await);
    assert!(
        matches!(err, SourceError::Incompatible { ref requirement, .. } if requirement.contains("99.0.0"))
    );
}

#[tokio::test]
async fn test_forbidden_pattern_never_executes() {
    let h = Harness::start().await;
    let code = format!("{}\nfn sneaky() {{ eval(\"1 + 1\") }}\n", DEMO_PLUGIN);
    h.publish("demo", &code).await;

    let err = expect_failure(h.orchestrator.install("demo", |_, _| {}).await);
    assert!(matches!(err, SourceError::Security { ref pattern } if pattern == "eval("));
    assert!(!h.orchestrator.registry().has("demo"));
    assert_eq!(h.orchestrator.load_state("demo"), Some(LoadState::Failed));
}

#[tokio::test]
async fn test_code_without_base_construct_is_structural_error() {
    let h = Harness::start().await;
    let code = "fn create() { #{ id: \"demo\" } }\nexport const plugin = Fn(\"create\");\n";
    h.publish("demo", code).await;

    let err = expect_failure(h.orchestrator.install("demo", |_, _| {}).await);
    assert!(matches!(err, SourceError::Structural(_)));
}

#[tokio::test]
async fn test_html_payload_is_rejected() {
    let h = Harness::start().await;
    let page = "<!DOCTYPE html><html><body>Not found</body></html>";
    h.publish("demo", page).await;

    let err = expect_failure(h.orchestrator.install("demo", |_, _| {}).await);
    assert!(matches!(err, SourceError::Network(_)));
    assert_eq!(h.orchestrator.load_state("demo"), Some(LoadState::Failed));
}

#[tokio::test]
async fn test_instance_id_must_match_entry() {
    let h = Harness::start().await;
    h.publish("impostor", DEMO_PLUGIN).await;

    let err = expect_failure(h.orchestrator.install("impostor", |_, _| {}).await);
    assert!(matches!(err, SourceError::InstanceShape { ref member } if member == "id"));
    assert!(!h.orchestrator.registry().has("impostor"));
    assert!(!h.orchestrator.registry().has("demo"));
}

#[tokio::test]
async fn test_check_updates_flags_breaking_release() {
    let h = Harness::start().await;
    h.publish("demo", DEMO_PLUGIN).await;
    h.orchestrator.install("demo", |_, _| {}).await.unwrap();
    assert!(h.orchestrator.check_updates().await.unwrap().is_empty());

    h.server.reset().await;
    let mut entry = manifest_entry(
        "demo",
        "1.1.0",
        &h.code_url("demo"),
        &compute_hash(DEMO_PLUGIN.as_bytes()),
    );
    entry["changelog"] = json!([
        { "version": "1.1.0", "changes": ["New item layout"], "breaking": true },
        { "version": "1.0.0", "changes": ["Initial release"] }
    ]);
    h.serve_manifest(vec![entry]).await;
    h.orchestrator.registry_client().clear_cache().await;

    let updates = h.orchestrator.check_updates().await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].installed, "1.0.0");
    assert_eq!(updates[0].available, "1.1.0");
    assert!(updates[0].breaking);
}

#[tokio::test]
async fn test_uninstall_update_and_shutdown() {
    let h = Harness::start().await;
    h.publish("demo", DEMO_PLUGIN).await;
    h.orchestrator.install("demo", |_, _| {}).await.unwrap();

    assert!(h.orchestrator.uninstall("demo"));
    assert!(!h.orchestrator.uninstall("demo"));
    assert!(!h.orchestrator.registry().has("demo"));
    assert_eq!(h.orchestrator.load_state("demo"), None);

    let progress = Mutex::new(Vec::new());
    h.orchestrator
        .update("demo", |percent, _| progress.lock().unwrap().push(percent))
        .await
        .unwrap();
    assert_eq!(progress.lock().unwrap().last(), Some(&100));
    assert!(h.orchestrator.registry().has("demo"));

    h.orchestrator.shutdown();
    assert!(h.orchestrator.registry().is_empty());
    assert!(h.orchestrator.installed().is_empty());
    assert_eq!(h.orchestrator.load_state("demo"), None);
}
