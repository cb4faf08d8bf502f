//! Script-backed content source
//!
//! Wraps an instantiated script object behind [`ContentSource`]. Member
//! calls run on blocking worker threads with `this` bound to the instance;
//! calls on one instance are serialized, and changes a call makes to
//! `this` are kept for the next one.

use async_trait::async_trait;
use rhai::{CallFnOptions, Dynamic, Engine, FnPtr, Map, Scope, AST, INT};
use sdk::errors::{SourceError, StrategyKind};
use sdk::source::ContentSource;
use sdk::types::{Capability, Content, Item, SubItem};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::host::Deadline;
use super::shape::{is_member_callable, probe_optional, SourceDescriptor};

struct ScriptRuntime {
    id: String,
    engine: Engine,
    ast: AST,
    functions: HashSet<String>,
    instance: RwLock<Dynamic>,
    call_gate: Mutex<()>,
    deadline: Deadline,
    call_timeout: Duration,
}

impl ScriptRuntime {
    fn member(&self, name: &str) -> Option<FnPtr> {
        let instance = self.instance.read().unwrap_or_else(PoisonError::into_inner);
        let map = instance.read_lock::<Map>()?;
        if !is_member_callable(&map, &self.functions, name) {
            return None;
        }
        map.get(name).and_then(|v| v.clone().try_cast::<FnPtr>())
    }

    fn is_callable(&self, name: &str) -> bool {
        let instance = self.instance.read().unwrap_or_else(PoisonError::into_inner);
        instance
            .read_lock::<Map>()
            .is_some_and(|map| is_member_callable(&map, &self.functions, name))
    }

    /// Call `name` on the instance, blocking the current thread
    fn call_member(&self, name: &str, args: Vec<Dynamic>) -> Result<Dynamic, SourceError> {
        let _gate = self.call_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let fn_ptr = self
            .member(name)
            .ok_or_else(|| SourceError::Unsupported(name.to_string()))?;

        let mut this = self
            .instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut call_args: Vec<Dynamic> = fn_ptr.curry().to_vec();
        call_args.extend(args);

        let mut scope = Scope::new();
        self.deadline.arm(self.call_timeout);
        let result = self.engine.call_fn_with_options::<Dynamic>(
            CallFnOptions::new()
                .eval_ast(false)
                .rewind_scope(true)
                .bind_this_ptr(&mut this),
            &mut scope,
            &self.ast,
            fn_ptr.fn_name(),
            call_args,
        );
        self.deadline.disarm();

        *self.instance.write().unwrap_or_else(PoisonError::into_inner) = this;

        result.map_err(|e| {
            tracing::debug!(source_id = %self.id, member = name, error = %e, "Script call failed");
            SourceError::Plugin(format!("{}.{}: {}", self.id, name, e))
        })
    }
}

/// A loaded script exposed through the capability contract
pub struct ScriptSource {
    descriptor: SourceDescriptor,
    strategy: StrategyKind,
    runtime: Arc<ScriptRuntime>,
}

impl ScriptSource {
    pub(crate) fn new(
        descriptor: SourceDescriptor,
        strategy: StrategyKind,
        engine: Engine,
        ast: AST,
        instance: Dynamic,
        deadline: Deadline,
        call_timeout: Duration,
    ) -> Self {
        let functions = script_functions(&ast);
        Self {
            runtime: Arc::new(ScriptRuntime {
                id: descriptor.id.clone(),
                engine,
                ast,
                functions,
                instance: RwLock::new(instance),
                call_gate: Mutex::new(()),
                deadline,
                call_timeout,
            }),
            descriptor,
            strategy,
        }
    }

    /// The strategy that materialized this source
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Optional capabilities currently callable
    pub fn optional_capabilities(&self) -> Vec<Capability> {
        let instance = self
            .runtime
            .instance
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        instance
            .read_lock::<Map>()
            .map(|map| probe_optional(&map, &self.runtime.functions))
            .unwrap_or_default()
    }

    async fn invoke<T>(&self, capability: Capability, args: Vec<Dynamic>) -> Result<T, SourceError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let runtime = Arc::clone(&self.runtime);
        let member = capability.member_name();

        let value = tokio::task::spawn_blocking(move || runtime.call_member(member, args))
            .await
            .map_err(|e| SourceError::Plugin(format!("script worker failed: {}", e)))??;

        decode(&self.descriptor.id, member, &value)
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptSource")
            .field("id", &self.descriptor.id)
            .field("version", &self.descriptor.version)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Names of every function defined in `ast`
pub(crate) fn script_functions(ast: &AST) -> HashSet<String> {
    ast.iter_functions().map(|f| f.name.to_string()).collect()
}

/// Convert a script value into a typed result
///
/// Goes through JSON so script integers are accepted where floats are
/// expected.
fn decode<T: DeserializeOwned>(id: &str, member: &str, value: &Dynamic) -> Result<T, SourceError> {
    let json: serde_json::Value = rhai::serde::from_dynamic(value)
        .map_err(|e| SourceError::Plugin(format!("{}.{} returned an unusable value: {}", id, member, e)))?;
    serde_json::from_value(json)
        .map_err(|e| SourceError::Plugin(format!("{}.{} returned an unexpected shape: {}", id, member, e)))
}

fn text(value: &str) -> Dynamic {
    Dynamic::from(value.to_string())
}

fn page(value: u32) -> Dynamic {
    Dynamic::from(value as INT)
}

#[async_trait]
impl ContentSource for ScriptSource {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn version(&self) -> &str {
        &self.descriptor.version
    }

    fn base_url(&self) -> &str {
        &self.descriptor.base_url
    }

    fn is_callable(&self, member: &str) -> bool {
        self.runtime.is_callable(member)
    }

    async fn fetch_item_details(&self, item_id: &str) -> Result<Item, SourceError> {
        self.invoke(Capability::FetchItemDetails, vec![text(item_id)])
            .await
    }

    async fn list_sub_items(&self, item_id: &str) -> Result<Vec<SubItem>, SourceError> {
        self.invoke(Capability::ListSubItems, vec![text(item_id)])
            .await
    }

    async fn list_sub_item_contents(&self, sub_item_id: &str) -> Result<Vec<Content>, SourceError> {
        self.invoke(Capability::ListSubItemContents, vec![text(sub_item_id)])
            .await
    }

    async fn search(&self, query: &str) -> Result<Vec<Item>, SourceError> {
        self.invoke(Capability::Search, vec![text(query)]).await
    }

    async fn list_genres(&self) -> Result<Vec<String>, SourceError> {
        self.invoke(Capability::ListGenres, Vec::new()).await
    }

    async fn trending(&self, page_no: u32) -> Result<Vec<Item>, SourceError> {
        self.invoke(Capability::Trending, vec![page(page_no)]).await
    }

    async fn latest(&self, page_no: u32) -> Result<Vec<Item>, SourceError> {
        self.invoke(Capability::Latest, vec![page(page_no)]).await
    }

    async fn popular(&self, page_no: u32) -> Result<Vec<Item>, SourceError> {
        self.invoke(Capability::Popular, vec![page(page_no)]).await
    }

    async fn by_page(&self, page_no: u32) -> Result<Vec<Item>, SourceError> {
        self.invoke(Capability::ByPage, vec![page(page_no)]).await
    }
}
