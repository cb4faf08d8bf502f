//! Script engines and the host allowlist
//!
//! Every engine that touches source code is built here. Scripts see exactly
//! these host functions on top of the pure standard package:
//!
//! - `BaseSource(id, name, version, base_url)`: the base construct
//! - `fetch(url)`: `#{ status, body }`
//! - `fetch_json(url)`: the decoded JSON body
//! - `sleep(ms)`: capped by [`ScriptLimits::sleep_cap`]
//!
//! `print` and `debug` go to `tracing`. Operation, depth and size limits
//! apply to every engine, and a [`Deadline`] aborts scripts that run past
//! their time budget.

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, Map, INT};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Host function name of the base construct
pub const BASE_CONSTRUCT: &str = "BaseSource";

/// Resource limits applied to every script engine
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub sleep_cap: Duration,
    /// Wall-clock budget for one materialization or one member call
    pub call_timeout: Duration,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_string_size: 4 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 10_000,
            sleep_cap: Duration::from_secs(5),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Wall-clock cut-off checked by the engine between operations
#[derive(Debug, Clone, Default)]
pub struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    pub fn arm(&self, budget: Duration) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + budget);
    }

    pub fn disarm(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn expired(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|at| Instant::now() >= at)
    }
}

/// Everything host functions need, shared by all engines of one loader
#[derive(Clone)]
pub struct HostEnv {
    pub limits: ScriptLimits,
    pub http: reqwest::Client,
}

impl HostEnv {
    pub fn new(limits: ScriptLimits, http: reqwest::Client) -> Self {
        Self { limits, http }
    }
}

/// Which kind of engine to build
///
/// Neither flavor resolves imports or accepts `eval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFlavor {
    /// Full engine evaluating code as a module
    Module,
    /// Raw engine with only the pure standard package
    Sandbox,
}

/// Build a script engine of `flavor` wired to `env`, checking `deadline`
pub fn build_engine(env: &HostEnv, flavor: EngineFlavor, deadline: &Deadline) -> Engine {
    let mut engine = match flavor {
        EngineFlavor::Module => Engine::new(),
        EngineFlavor::Sandbox => {
            let mut engine = Engine::new_raw();
            engine.register_global_module(StandardPackage::new().as_shared_module());
            engine
        }
    };
    engine.disable_symbol("eval");
    engine.set_module_resolver(DummyModuleResolver::new());

    let limits = &env.limits;
    engine
        .set_max_operations(limits.max_operations)
        .set_max_call_levels(limits.max_call_levels)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_array_size)
        .set_max_map_size(limits.max_map_size);

    engine.on_print(|text| tracing::info!(target: "quire::script", "{}", text));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(
            target: "quire::script",
            source = source.unwrap_or("<inline>"),
            position = %pos,
            "{}",
            text
        )
    });

    let deadline = deadline.clone();
    engine.on_progress(move |_ops| {
        if deadline.expired() {
            Some(Dynamic::from("deadline exceeded".to_string()))
        } else {
            None
        }
    });

    register_host_functions(&mut engine, env);
    engine
}

fn register_host_functions(engine: &mut Engine, env: &HostEnv) {
    engine.register_fn(
        BASE_CONSTRUCT,
        |id: &str, name: &str, version: &str, base_url: &str| -> Map {
            let mut source = Map::new();
            source.insert("id".into(), Dynamic::from(id.to_string()));
            source.insert("name".into(), Dynamic::from(name.to_string()));
            source.insert("version".into(), Dynamic::from(version.to_string()));
            source.insert("base_url".into(), Dynamic::from(base_url.to_string()));
            source
        },
    );

    let http = env.http.clone();
    let timeout = env.limits.call_timeout;
    engine.register_fn(
        "fetch",
        move |url: &str| -> Result<Map, Box<EvalAltResult>> {
            let (status, body) = blocking_get(&http, url, timeout)?;
            let mut response = Map::new();
            response.insert("status".into(), Dynamic::from(status as INT));
            response.insert("body".into(), Dynamic::from(body));
            Ok(response)
        },
    );

    let http = env.http.clone();
    engine.register_fn(
        "fetch_json",
        move |url: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let (status, body) = blocking_get(&http, url, timeout)?;
            if !(200..300).contains(&status) {
                return Err(format!("fetch_json: {} returned status {}", url, status).into());
            }
            let value: serde_json::Value = serde_json::from_str(&body)
                .map_err(|e| format!("fetch_json: invalid JSON from {}: {}", url, e))?;
            rhai::serde::to_dynamic(value)
        },
    );

    let cap = env.limits.sleep_cap;
    engine.register_fn("sleep", move |ms: INT| {
        let requested = Duration::from_millis(ms.max(0) as u64);
        std::thread::sleep(requested.min(cap));
    });
}

/// GET `url` from inside a script call
///
/// Script calls run on blocking worker threads, so the request is driven on
/// the surrounding tokio runtime.
fn blocking_get(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<(u16, String), Box<EvalAltResult>> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| format!("fetch: no async runtime available for {}", url))?;

    let request = async {
        let response = http.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };

    match handle.block_on(tokio::time::timeout(timeout, request)) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(format!("fetch: {} failed: {}", url, e).into()),
        Err(_) => Err(format!("fetch: {} timed out", url).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(limits: ScriptLimits) -> HostEnv {
        HostEnv::new(limits, reqwest::Client::new())
    }

    #[test]
    fn test_base_construct_carries_metadata() {
        let engine = build_engine(
            &env_with(ScriptLimits::default()),
            EngineFlavor::Sandbox,
            &Deadline::default(),
        );
        let source: Map = engine
            .eval(r#"BaseSource("demo", "Demo", "1.0.0", "https://demo.example")"#)
            .unwrap();

        assert_eq!(source["id"].clone().into_string().unwrap(), "demo");
        assert_eq!(
            source["base_url"].clone().into_string().unwrap(),
            "https://demo.example"
        );
    }

    #[test]
    fn test_operation_limit_stops_runaway_loop() {
        let limits = ScriptLimits {
            max_operations: 10_000,
            ..ScriptLimits::default()
        };
        let engine = build_engine(&env_with(limits), EngineFlavor::Sandbox, &Deadline::default());

        let err = engine.run("loop { }").unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorTooManyOperations(_)));
    }

    #[test]
    fn test_deadline_terminates_script() {
        let deadline = Deadline::default();
        let engine = build_engine(
            &env_with(ScriptLimits {
                max_operations: 0,
                ..ScriptLimits::default()
            }),
            EngineFlavor::Sandbox,
            &deadline,
        );

        deadline.arm(Duration::from_millis(20));
        let err = engine.run("loop { }").unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorTerminated(..)));

        deadline.disarm();
        assert!(!deadline.expired());
    }

    #[test]
    fn test_sandbox_disables_eval_and_imports() {
        let engine = build_engine(
            &env_with(ScriptLimits::default()),
            EngineFlavor::Sandbox,
            &Deadline::default(),
        );

        assert!(engine.compile(r#"eval("1 + 1")"#).is_err());
        assert!(engine.run(r#"import "anything" as m;"#).is_err());
    }

    #[test]
    fn test_sleep_is_capped() {
        let engine = build_engine(
            &env_with(ScriptLimits {
                sleep_cap: Duration::from_millis(10),
                ..ScriptLimits::default()
            }),
            EngineFlavor::Sandbox,
            &Deadline::default(),
        );

        let started = Instant::now();
        engine.run("sleep(60000);").unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_fetch_without_runtime_is_script_error() {
        let engine = build_engine(
            &env_with(ScriptLimits::default()),
            EngineFlavor::Sandbox,
            &Deadline::default(),
        );
        assert!(engine.eval::<Map>(r#"fetch("http://127.0.0.1:9/")"#).is_err());
    }
}
