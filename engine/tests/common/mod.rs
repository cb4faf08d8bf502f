//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use quire_plugins::code::{DownloadedCode, ValidatedCode};
use quire_plugins::validator::CodeValidator;
use quire_plugins::verifier::{compute_hash, verify_code};
use quire_engine::runtime::{HostEnv, ScriptLimits};
use sdk::manifest::Integrity;
use serde_json::json;

/// A complete source exposing every required member plus `search`
pub const DEMO_PLUGIN: &str = r#"
fn create() {
    let s = BaseSource("demo", "Demo Source", "1.0.0", "https://demo.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("sub_items");
    s.list_sub_item_contents = Fn("contents");
    s.search = Fn("find");
    s.calls = 0;
    s
}

fn details(id) {
    this.calls += 1;
    #{
        id: id,
        title: "Item " + id,
        url: this.base_url + "/item/" + id,
        authors: ["Someone"],
        status: "call " + this.calls
    }
}

fn sub_items(id) {
    [
        #{ id: id + "-1", item_id: id, title: "One", number: 1 },
        #{ id: id + "-2", item_id: id, title: "Two", number: 2.5 }
    ]
}

fn contents(id) {
    [
        #{ index: 0, url: "https://cdn.demo.example/" + id + "/0.jpg" },
        #{ index: 1, text: "closing note" }
    ]
}

fn find(query) {
    [#{ id: "q-" + query, title: "Result for " + query }]
}

export const plugin = Fn("create");
"#;

/// The same source declared through an export alias
pub const ALIAS_PLUGIN: &str = r#"
fn create() {
    let s = BaseSource("alias", "Alias Source", "1.0.0", "https://alias.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s
}
fn details(id) { #{ id: id, title: this.name } }
fn none(id) { [] }

let Source = Fn("create");
export Source as plugin;
"#;

/// Constructor exported inside an `exports` object
pub const EXPORTS_OBJECT_PLUGIN: &str = r#"
fn create() {
    let s = BaseSource("object", "Object Source", "1.0.0", "https://object.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s
}
fn details(id) { #{ id: id } }
fn none(id) { [] }

export const exports = #{ plugin: Fn("create") };
"#;

/// Constructor written as a closure
pub const CLOSURE_PLUGIN: &str = r#"
fn details(id) { #{ id: id, title: "closure" } }
fn none(id) { [] }

export const plugin = || {
    let s = BaseSource("closure", "Closure Source", "1.0.0", "https://closure.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s
};
"#;

/// Calls `eval` with a comment between the name and the parenthesis
pub const COMMENTED_EVAL_PLUGIN: &str = r#"
fn create() {
    let s = BaseSource("sneaky", "Sneaky", "1.0.0", "https://sneaky.example");
    s.answer = eval /**/ ("40 + 2");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s
}
fn details(id) { #{ id: id } }
fn none(id) { [] }
export const plugin = Fn("create");
"#;

/// Imports a script from the directory above wherever it is staged
pub const RELATIVE_IMPORT_PLUGIN: &str = r#"
import "../shared" as shared;
fn create() {
    let s = BaseSource("importer", "Importer", "1.0.0", "https://importer.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s
}
fn details(id) { #{ id: id } }
fn none(id) { [] }
export const plugin = Fn("create");
"#;

/// Passes validation but exports something that is not a constructor
pub const NOT_A_CONSTRUCTOR: &str = r#"
fn create() { let s = BaseSource("bad", "Bad", "1.0.0", "https://bad.example"); s }
export const plugin = 42;
"#;

/// Constructor that throws
pub const THROWING_CONSTRUCTOR: &str = r#"
fn create() {
    let s = BaseSource("thrower", "Thrower", "1.0.0", "https://thrower.example");
    throw "constructor exploded";
}
export const plugin = Fn("create");
"#;

/// Lacks `list_sub_item_contents`
pub const MISSING_MEMBER: &str = r#"
fn create() {
    let s = BaseSource("partial", "Partial", "1.0.0", "https://partial.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("details");
    s
}
fn details(id) { #{ id: id } }
export const plugin = Fn("create");
"#;

/// Required members plus a `search` that never returns
pub const SPINNING_PLUGIN: &str = r#"
fn create() {
    let s = BaseSource("spin", "Spin", "1.0.0", "https://spin.example");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s.search = Fn("spin");
    s
}
fn details(id) { #{ id: id } }
fn none(id) { [] }
fn spin(query) { loop { } }
export const plugin = Fn("create");
"#;

/// A source whose details come from `fetch_json` against `base_url`
pub fn fetching_plugin(base_url: &str) -> String {
    format!(
        r#"
fn create() {{
    let s = BaseSource("remote", "Remote", "1.0.0", "{base_url}");
    s.fetch_item_details = Fn("details");
    s.list_sub_items = Fn("none");
    s.list_sub_item_contents = Fn("none");
    s
}}
fn details(id) {{
    let data = fetch_json(this.base_url + "/api/items/" + id);
    #{{ id: id, title: data.title, genres: data.genres }}
}}
fn none(id) {{ [] }}
export const plugin = Fn("create");
"#
    )
}

/// Run `source` through integrity verification and validation
pub fn validated(source: &str) -> ValidatedCode {
    let integrity = Integrity {
        sha256: compute_hash(source.as_bytes()),
        sha512: None,
    };
    let verified = verify_code(
        "fixture",
        DownloadedCode::new(source, "memory://fixture.rhai"),
        &integrity,
    )
    .unwrap();
    CodeValidator::new().unwrap().validate(verified).unwrap()
}

pub fn host_env() -> HostEnv {
    HostEnv::new(ScriptLimits::default(), reqwest::Client::new())
}

pub fn host_env_with(limits: ScriptLimits) -> HostEnv {
    HostEnv::new(limits, reqwest::Client::new())
}

/// A catalog entry for `id` served from `download_url`
pub fn manifest_entry(id: &str, version: &str, download_url: &str, sha256: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("{} source", id),
        "version": version,
        "baseUrl": format!("https://{}.example", id),
        "description": "Fixture source",
        "downloads": { "stable": download_url },
        "integrity": { "sha256": sha256 },
        "metadata": { "tags": ["manga"], "minCoreVersion": "0.1.0" }
    })
}

/// A catalog document listing `entries`
pub fn manifest(entries: Vec<serde_json::Value>) -> serde_json::Value {
    json!({
        "version": "1.0.0",
        "metadata": { "lastUpdated": "2024-01-15T10:30:00Z", "maintainer": "tests" },
        "sources": entries,
    })
}
