//! Integration tests for the RuntimeLoader
//!
//! Covers every materialization strategy against every accepted export
//! form, aggregated failures, instance shape checks and member calls.

mod common;

use common::*;
use quire_engine::runtime::strategy::strategy_for;
use quire_engine::runtime::{RuntimeClass, RuntimeLoader, ScriptLimits};
use sdk::errors::{SourceError, StrategyKind};
use sdk::source::ContentSource;
use sdk::types::Capability;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const ALL_STRATEGIES: [StrategyKind; 3] = [
    StrategyKind::SyntheticModule,
    StrategyKind::InlineModule,
    StrategyKind::Sandboxed,
];

fn single_strategy_loader(kind: StrategyKind, scratch: &std::path::Path) -> RuntimeLoader {
    RuntimeLoader::with_strategies(
        RuntimeClass::Server,
        host_env(),
        vec![strategy_for(kind, scratch.to_path_buf())],
    )
}

#[test]
fn test_strategy_order_per_runtime_class() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = RuntimeLoader::new(RuntimeClass::Server, host_env(), scratch.path().to_path_buf());
    assert_eq!(loader.strategy_kinds(), ALL_STRATEGIES.to_vec());

    let loader = RuntimeLoader::new(RuntimeClass::Client, host_env(), scratch.path().to_path_buf());
    assert_eq!(
        loader.strategy_kinds(),
        vec![StrategyKind::InlineModule, StrategyKind::Sandboxed]
    );

    let loader = RuntimeLoader::new(RuntimeClass::Embedded, host_env(), scratch.path().to_path_buf());
    assert_eq!(loader.strategy_kinds(), vec![StrategyKind::Sandboxed]);
}

#[test]
fn test_every_strategy_loads_every_export_form() {
    let scratch = tempfile::tempdir().unwrap();
    let forms = [
        (DEMO_PLUGIN, "demo"),
        (ALIAS_PLUGIN, "alias"),
        (EXPORTS_OBJECT_PLUGIN, "object"),
        (CLOSURE_PLUGIN, "closure"),
    ];

    for kind in ALL_STRATEGIES {
        let loader = single_strategy_loader(kind, scratch.path());
        for (source, id) in forms {
            let loaded = loader
                .load(&validated(source))
                .unwrap_or_else(|e| panic!("{} failed to load '{}': {}", kind, id, e));
            assert_eq!(loaded.id(), id);
            assert_eq!(loaded.strategy(), kind);
        }
    }
}

#[test]
fn test_first_successful_strategy_wins() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = RuntimeLoader::new(RuntimeClass::Client, host_env(), scratch.path().to_path_buf());

    let loaded = loader.load(&validated(DEMO_PLUGIN)).unwrap();
    assert_eq!(loaded.strategy(), StrategyKind::InlineModule);
    assert_eq!(loaded.name(), "Demo Source");
    assert_eq!(loaded.base_url(), "https://demo.example");
}

#[test]
fn test_all_strategies_failing_lists_each_reason() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = RuntimeLoader::new(RuntimeClass::Server, host_env(), scratch.path().to_path_buf());

    let err = loader.load(&validated(NOT_A_CONSTRUCTOR)).unwrap_err();
    let SourceError::Load(failures) = err else {
        panic!("expected a load error, got {:?}", err);
    };

    let kinds: Vec<_> = failures.iter().map(|f| f.strategy).collect();
    assert_eq!(kinds, ALL_STRATEGIES.to_vec());
    assert!(failures.iter().all(|f| f.reason.contains("not a function")));
}

#[test]
fn test_eval_is_unavailable_under_every_strategy() {
    let scratch = tempfile::tempdir().unwrap();
    let code = validated(COMMENTED_EVAL_PLUGIN);

    for kind in ALL_STRATEGIES {
        let loader = single_strategy_loader(kind, scratch.path());
        let err = loader.load(&code).unwrap_err();
        let SourceError::Load(failures) = err else {
            panic!("{}: expected a load error, got {:?}", kind, err);
        };
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.contains("eval"), "{}: {}", kind, failures[0].reason);
    }
}

#[test]
fn test_imports_do_not_resolve_from_disk() {
    let scratch = tempfile::tempdir().unwrap();
    std::fs::write(scratch.path().join("shared.rhai"), "fn helper() { 1 }").unwrap();
    let code = validated(RELATIVE_IMPORT_PLUGIN);

    for kind in ALL_STRATEGIES {
        let loader = single_strategy_loader(kind, scratch.path());
        let err = loader.load(&code).unwrap_err();
        assert!(matches!(err, SourceError::Load(_)), "{}: {:?}", kind, err);
    }
}

#[test]
fn test_synthetic_module_leaves_no_files_behind() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::SyntheticModule, scratch.path());

    loader.load(&validated(DEMO_PLUGIN)).unwrap();
    let _ = loader.load(&validated(NOT_A_CONSTRUCTOR)).unwrap_err();

    let leftovers: Vec<_> = std::fs::read_dir(scratch.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "staged modules left behind: {:?}", leftovers);
}

#[test]
fn test_constructor_failure_is_load_error() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::Sandboxed, scratch.path());

    let err = loader.load(&validated(THROWING_CONSTRUCTOR)).unwrap_err();
    let SourceError::Load(failures) = err else {
        panic!("expected a load error, got {:?}", err);
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].reason.contains("constructor failed"));
    assert!(failures[0].reason.contains("constructor exploded"));
}

#[test]
fn test_missing_required_member_is_shape_error() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::InlineModule, scratch.path());

    let err = loader.load(&validated(MISSING_MEMBER)).unwrap_err();
    assert!(
        matches!(err, SourceError::InstanceShape { ref member } if member == "list_sub_item_contents"),
        "unexpected error: {:?}",
        err
    );
}

#[tokio::test]
async fn test_member_calls_bind_instance_and_keep_state() {
    let scratch = tempfile::tempdir().unwrap();
    for kind in ALL_STRATEGIES {
        let loader = single_strategy_loader(kind, scratch.path());
        let source = loader.load(&validated(DEMO_PLUGIN)).unwrap();

        let first = source.fetch_item_details("42").await.unwrap();
        assert_eq!(first.title, "Item 42");
        assert_eq!(first.url, "https://demo.example/item/42");
        assert_eq!(first.authors, vec!["Someone"]);
        assert_eq!(first.status.as_deref(), Some("call 1"));

        let second = source.fetch_item_details("42").await.unwrap();
        assert_eq!(second.status.as_deref(), Some("call 2"));
    }
}

#[tokio::test]
async fn test_script_values_decode_into_content_types() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::Sandboxed, scratch.path());
    let source = loader.load(&validated(DEMO_PLUGIN)).unwrap();

    let subs = source.list_sub_items("x").await.unwrap();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].number, Some(1.0));
    assert_eq!(subs[1].number, Some(2.5));
    assert_eq!(subs[1].item_id, "x");

    let contents = source.list_sub_item_contents("x-1").await.unwrap();
    assert_eq!(contents[0].url.as_deref(), Some("https://cdn.demo.example/x-1/0.jpg"));
    assert_eq!(contents[1].index, 1);
    assert_eq!(contents[1].text.as_deref(), Some("closing note"));

    let found = source.search("moon").await.unwrap();
    assert_eq!(found[0].id, "q-moon");
}

#[tokio::test]
async fn test_absent_optional_member_is_unsupported() {
    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::InlineModule, scratch.path());
    let source = loader.load(&validated(DEMO_PLUGIN)).unwrap();

    assert!(source.supports(Capability::Search));
    assert!(!source.supports(Capability::Trending));
    assert_eq!(source.optional_capabilities(), vec![Capability::Search]);

    let err = source.trending(1).await.unwrap_err();
    assert!(matches!(err, SourceError::Unsupported(ref m) if m == "get_trending"));
}

#[tokio::test]
async fn test_runaway_member_call_is_cut_off() {
    let scratch = tempfile::tempdir().unwrap();
    let limits = ScriptLimits {
        max_operations: 0,
        call_timeout: Duration::from_millis(200),
        ..ScriptLimits::default()
    };
    let loader = RuntimeLoader::with_strategies(
        RuntimeClass::Server,
        host_env_with(limits),
        vec![strategy_for(StrategyKind::Sandboxed, scratch.path().to_path_buf())],
    );
    let source = loader.load(&validated(SPINNING_PLUGIN)).unwrap();

    let err = source.search("anything").await.unwrap_err();
    assert!(matches!(err, SourceError::Plugin(_)), "unexpected error: {:?}", err);

    // The instance stays usable after a timed-out call
    let item = source.fetch_item_details("7").await.unwrap();
    assert_eq!(item.id, "7");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_host_fetch_json_reaches_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "title": "Fetched title",
            "genres": ["drama", "mystery"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::Sandboxed, scratch.path());
    let source = loader.load(&validated(&fetching_plugin(&server.uri()))).unwrap();

    let item = source.fetch_item_details("9").await.unwrap();
    assert_eq!(item.title, "Fetched title");
    assert_eq!(item.genres, vec!["drama", "mystery"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_host_fetch_json_error_status_is_plugin_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let loader = single_strategy_loader(StrategyKind::InlineModule, scratch.path());
    let source = loader.load(&validated(&fetching_plugin(&server.uri()))).unwrap();

    let err = source.fetch_item_details("missing").await.unwrap_err();
    assert!(matches!(err, SourceError::Plugin(ref msg) if msg.contains("404")));
}
