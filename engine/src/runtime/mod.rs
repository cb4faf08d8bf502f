//! Runtime module for materializing and instantiating content sources
//!
//! The [`RuntimeLoader`] turns [`ValidatedCode`] into a live
//! [`ScriptSource`]. It never sees unverified code: the only way to obtain
//! a `ValidatedCode` is through integrity verification followed by
//! structural and security validation.
//!
//! # Materialization
//!
//! The host's [`RuntimeClass`] is detected once per process and fixes an
//! ordered list of strategies:
//!
//! 1. **Synthetic module**: stage the code as a throwaway module file and
//!    import it (server hosts only)
//! 2. **Inline module**: encode the code into an inline module specifier
//! 3. **Sandboxed**: rewrite exports into bindings and run the code in a
//!    raw engine exposing only the host allowlist
//!
//! The first strategy that yields a constructor wins. When all of them
//! fail, the error lists every strategy's reason.
//!
//! # Instantiation
//!
//! The constructor is called exactly once. The returned object must pass
//! [`shape::assert_plugin_shape`] before anything else sees it.
//!
//! # Examples
//!
//! ```no_run
//! use quire_engine::runtime::{HostEnv, RuntimeClass, RuntimeLoader, ScriptLimits};
//! # fn example(code: quire_plugins::ValidatedCode) -> Result<(), Box<dyn std::error::Error>> {
//! let env = HostEnv::new(ScriptLimits::default(), reqwest::Client::new());
//! let loader = RuntimeLoader::new(RuntimeClass::Embedded, env, std::env::temp_dir());
//!
//! let source = loader.load(&code)?;
//! println!("Loaded via {}", source.strategy());
//! # Ok(())
//! # }
//! ```

pub mod detect;
pub mod host;
pub mod script_source;
pub mod shape;
pub mod state;
pub mod strategy;

pub use detect::{detect_runtime_class, RuntimeClass};
pub use host::{HostEnv, ScriptLimits};
pub use script_source::ScriptSource;
pub use state::{LoadState, LoadTracker};
pub use strategy::{Materialized, MaterializationStrategy};

use quire_plugins::code::ValidatedCode;
use rhai::Dynamic;
use sdk::errors::{SourceError, StrategyFailure, StrategyKind};
use std::path::PathBuf;

use host::Deadline;

/// Materializes validated code and instantiates it
pub struct RuntimeLoader {
    class: RuntimeClass,
    env: HostEnv,
    strategies: Vec<Box<dyn MaterializationStrategy>>,
}

impl RuntimeLoader {
    /// Create a loader with the strategy order of `class`
    ///
    /// `scratch_root` is where synthetic module files are staged.
    pub fn new(class: RuntimeClass, env: HostEnv, scratch_root: PathBuf) -> Self {
        let strategies = class
            .strategy_order()
            .iter()
            .map(|kind| strategy::strategy_for(*kind, scratch_root.clone()))
            .collect();
        Self::with_strategies(class, env, strategies)
    }

    /// Create a loader with an explicit strategy list
    pub fn with_strategies(
        class: RuntimeClass,
        env: HostEnv,
        strategies: Vec<Box<dyn MaterializationStrategy>>,
    ) -> Self {
        tracing::info!(
            runtime_class = %class,
            strategies = ?strategies.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            "Initializing RuntimeLoader"
        );
        Self {
            class,
            env,
            strategies,
        }
    }

    pub fn class(&self) -> RuntimeClass {
        self.class
    }

    /// Strategies in the order they are attempted
    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Try each strategy in order until one yields a constructor
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Load`] carrying one reason per strategy when
    /// every strategy fails.
    pub fn materialize(&self, code: &ValidatedCode) -> Result<Materialized, SourceError> {
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let deadline = Deadline::default();
            deadline.arm(self.env.limits.call_timeout);
            let attempt = strategy.materialize(code, &self.env, &deadline);
            deadline.disarm();

            match attempt {
                Ok(materialized) => {
                    tracing::info!(
                        origin = %code.origin(),
                        strategy = %strategy.kind(),
                        "Materialized source"
                    );
                    return Ok(materialized);
                }
                Err(reason) => {
                    tracing::warn!(
                        origin = %code.origin(),
                        strategy = %strategy.kind(),
                        reason = %reason,
                        "Materialization strategy failed"
                    );
                    failures.push(StrategyFailure {
                        strategy: strategy.kind(),
                        reason,
                    });
                }
            }
        }

        Err(SourceError::Load(failures))
    }

    /// Call the constructor once and validate the resulting instance
    ///
    /// # Errors
    ///
    /// - [`SourceError::Load`] when the constructor itself fails
    /// - [`SourceError::InstanceShape`] when the instance lacks a required member
    pub fn instantiate(&self, materialized: Materialized) -> Result<ScriptSource, SourceError> {
        let Materialized {
            strategy,
            engine,
            ast,
            constructor,
            deadline,
        } = materialized;

        deadline.arm(self.env.limits.call_timeout);
        let result = constructor.call::<Dynamic>(&engine, &ast, ());
        deadline.disarm();

        let instance = result.map_err(|e| {
            SourceError::Load(vec![StrategyFailure {
                strategy,
                reason: format!("constructor failed: {}", e),
            }])
        })?;

        let functions = script_source::script_functions(&ast);
        let descriptor = shape::assert_plugin_shape(&instance, &functions)?;

        tracing::debug!(source_id = %descriptor.id, strategy = %strategy, "Instantiated source");

        Ok(ScriptSource::new(
            descriptor,
            strategy,
            engine,
            ast,
            instance,
            deadline,
            self.env.limits.call_timeout,
        ))
    }

    /// Materialize and instantiate in one step
    pub fn load(&self, code: &ValidatedCode) -> Result<ScriptSource, SourceError> {
        let materialized = self.materialize(code)?;
        self.instantiate(materialized)
    }
}
