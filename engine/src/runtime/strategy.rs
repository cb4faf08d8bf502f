//! Materialization strategies: turning validated source text into a
//! constructor
//!
//! Each strategy produces the same [`Materialized`] bundle: the engine that
//! compiled the code, the compiled AST and the exported `plugin`
//! constructor. The loader tries them in the order dictated by the runtime
//! class and keeps the first success.

use base64::Engine as _;
use quire_plugins::code::ValidatedCode;
use regex::Regex;
use rhai::{Dynamic, Engine, FnPtr, Map, Module, Scope, AST};
use sdk::errors::StrategyKind;
use std::path::PathBuf;
use std::sync::OnceLock;

use super::host::{build_engine, Deadline, EngineFlavor, HostEnv};

/// Name every plugin exports its constructor under
pub const EXPORT_NAME: &str = "plugin";

/// Name of the optional export object carrying `plugin`
pub const EXPORTS_OBJECT: &str = "exports";

/// Scheme and media type of inline module specifiers
pub const INLINE_PREFIX: &str = "data:text/x-rhai;base64,";

/// A compiled source and its exported constructor
pub struct Materialized {
    pub strategy: StrategyKind,
    pub engine: Engine,
    pub ast: AST,
    pub constructor: FnPtr,
    pub deadline: Deadline,
}

/// One way of turning source text into a constructor
pub trait MaterializationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Compile and evaluate `code`, returning its exported constructor
    ///
    /// Failures are reported as plain reasons; the loader aggregates them.
    fn materialize(
        &self,
        code: &ValidatedCode,
        env: &HostEnv,
        deadline: &Deadline,
    ) -> Result<Materialized, String>;
}

/// Build the strategy for `kind`
pub fn strategy_for(kind: StrategyKind, scratch_root: PathBuf) -> Box<dyn MaterializationStrategy> {
    match kind {
        StrategyKind::SyntheticModule => Box::new(SyntheticModule::new(scratch_root)),
        StrategyKind::InlineModule => Box::new(InlineModule),
        StrategyKind::Sandboxed => Box::new(Sandboxed),
    }
}

/// Stage the code as a module file at a throwaway location and import it
///
/// The file lives in a fresh temporary directory under `scratch_root`,
/// which is removed when the attempt ends, whether it succeeded or not.
pub struct SyntheticModule {
    scratch_root: PathBuf,
}

impl SyntheticModule {
    pub fn new(scratch_root: PathBuf) -> Self {
        Self { scratch_root }
    }
}

impl MaterializationStrategy for SyntheticModule {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SyntheticModule
    }

    fn materialize(
        &self,
        code: &ValidatedCode,
        env: &HostEnv,
        deadline: &Deadline,
    ) -> Result<Materialized, String> {
        std::fs::create_dir_all(&self.scratch_root)
            .map_err(|e| format!("scratch directory unavailable: {}", e))?;

        let staging = tempfile::Builder::new()
            .prefix("quire-module-")
            .tempdir_in(&self.scratch_root)
            .map_err(|e| format!("cannot create module location: {}", e))?;

        let path = staging
            .path()
            .join(format!("{}.rhai", uuid::Uuid::new_v4()));
        std::fs::write(&path, code.source())
            .map_err(|e| format!("cannot write module file: {}", e))?;

        tracing::debug!(path = %path.display(), "Staged synthetic module");

        let engine = build_engine(env, EngineFlavor::Module, deadline);
        let ast = engine
            .compile_file(path)
            .map_err(|e| format!("compile failed: {}", e))?;
        let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine)
            .map_err(|e| format!("module evaluation failed: {}", e))?;
        let constructor = module_export(&module)?;

        drop(staging);
        Ok(Materialized {
            strategy: self.kind(),
            engine,
            ast,
            constructor,
            deadline: deadline.clone(),
        })
    }
}

/// Encode the code into an inline module specifier and import that
pub struct InlineModule;

/// Encode `source` as an inline module specifier
pub fn encode_inline(source: &str) -> String {
    format!(
        "{}{}",
        INLINE_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(source)
    )
}

/// Resolve an inline module specifier back into source text
pub fn resolve_inline(specifier: &str) -> Result<String, String> {
    let payload = specifier
        .strip_prefix(INLINE_PREFIX)
        .ok_or_else(|| "not an inline module specifier".to_string())?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| format!("invalid inline module encoding: {}", e))?;
    String::from_utf8(bytes).map_err(|e| format!("inline module is not UTF-8: {}", e))
}

impl MaterializationStrategy for InlineModule {
    fn kind(&self) -> StrategyKind {
        StrategyKind::InlineModule
    }

    fn materialize(
        &self,
        code: &ValidatedCode,
        env: &HostEnv,
        deadline: &Deadline,
    ) -> Result<Materialized, String> {
        let specifier = encode_inline(code.source());
        let source = resolve_inline(&specifier)?;

        let engine = build_engine(env, EngineFlavor::Module, deadline);
        let mut ast = engine
            .compile(&source)
            .map_err(|e| format!("compile failed: {}", e))?;
        ast.set_source(code.origin());

        let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine)
            .map_err(|e| format!("module evaluation failed: {}", e))?;
        let constructor = module_export(&module)?;

        Ok(Materialized {
            strategy: self.kind(),
            engine,
            ast,
            constructor,
            deadline: deadline.clone(),
        })
    }
}

/// Rewrite exports into plain bindings and run the code in a raw engine
/// that exposes nothing beyond the host allowlist
pub struct Sandboxed;

struct ExportRewrite {
    pattern: Regex,
    replacement: &'static str,
}

fn export_rewrites() -> &'static [ExportRewrite] {
    static REWRITES: OnceLock<Vec<ExportRewrite>> = OnceLock::new();
    REWRITES.get_or_init(|| {
        [
            // export const NAME = ... / export let NAME = ...
            (r"\bexport\s+(let|const)\b", "$1"),
            // export NAME as ALIAS;
            (
                r"\bexport\s+([A-Za-z_]\w*)\s+as\s+([A-Za-z_]\w*)\s*;",
                "let ${2} = ${1};",
            ),
            // export NAME;
            (r"\bexport\s+[A-Za-z_]\w*\s*;", ""),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|pattern| ExportRewrite {
                pattern,
                replacement,
            })
        })
        .collect()
    })
}

/// Transform export syntax into the equivalent assignment form
pub fn rewrite_exports(source: &str) -> String {
    export_rewrites()
        .iter()
        .fold(source.to_string(), |code, rewrite| {
            rewrite
                .pattern
                .replace_all(&code, rewrite.replacement)
                .into_owned()
        })
}

impl MaterializationStrategy for Sandboxed {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sandboxed
    }

    fn materialize(
        &self,
        code: &ValidatedCode,
        env: &HostEnv,
        deadline: &Deadline,
    ) -> Result<Materialized, String> {
        let rewritten = rewrite_exports(code.source());

        let engine = build_engine(env, EngineFlavor::Sandbox, deadline);
        let mut ast = engine
            .compile(&rewritten)
            .map_err(|e| format!("compile failed: {}", e))?;
        ast.set_source(code.origin());

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| format!("evaluation failed: {}", e))?;

        let export = scope
            .get_value::<Dynamic>(EXPORT_NAME)
            .or_else(|| {
                scope
                    .get_value::<Map>(EXPORTS_OBJECT)
                    .and_then(|exports| exports.get(EXPORT_NAME).cloned())
            })
            .ok_or_else(|| format!("no '{}' binding after evaluation", EXPORT_NAME))?;
        let constructor = as_constructor(export)?;

        Ok(Materialized {
            strategy: self.kind(),
            engine,
            ast,
            constructor,
            deadline: deadline.clone(),
        })
    }
}

/// The exported constructor of an evaluated module
fn module_export(module: &Module) -> Result<FnPtr, String> {
    let export = module
        .get_var_value::<Dynamic>(EXPORT_NAME)
        .or_else(|| {
            module
                .get_var_value::<Map>(EXPORTS_OBJECT)
                .and_then(|exports| exports.get(EXPORT_NAME).cloned())
        })
        .ok_or_else(|| format!("module does not export '{}'", EXPORT_NAME))?;
    as_constructor(export)
}

fn as_constructor(export: Dynamic) -> Result<FnPtr, String> {
    let type_name = export.type_name();
    export
        .try_cast::<FnPtr>()
        .ok_or_else(|| format!("exported '{}' is a {}, not a function", EXPORT_NAME, type_name))
}
