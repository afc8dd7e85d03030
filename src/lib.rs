#![forbid(unsafe_code)]
//! fieldgate: query planning and upstream execution for a GraphQL gateway.
//!
//! The workspace crates are re-exported here; [`Gateway`] wires a loaded
//! configuration to an executor with its engine manager.

use std::sync::Arc;

pub use fieldgate_core as core;
pub use fieldgate_exec as exec;
pub use fieldgate_planner as planner;

use fieldgate_core::ast::{Operation, Schema};
use fieldgate_core::config::GatewayConfig;
use fieldgate_exec::{EngineManager, Executor, FetchOutcome, Metrics, ProcessLauncher};
use fieldgate_planner::{CompiledPlan, EngineConfiguration, Loader, PlanError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Settings(#[from] fieldgate_core::Error),
    #[error(transparent)]
    Config(#[from] fieldgate_planner::ConfigError),
    #[error(transparent)]
    Fetch(#[from] fieldgate_exec::FetchError),
}

/// Results of one operation: a fetch outcome per planned fetch and an error
/// per root field that could not be planned.
#[derive(Debug)]
pub struct Execution {
    pub outcomes: Vec<FetchOutcome>,
    pub errors: Vec<PlanError>,
}

impl Execution {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.outcomes.iter().all(FetchOutcome::is_ok)
    }

    /// The planning error for the root field at `path`.
    pub fn error_for_path(&self, path: &[&str]) -> Option<&PlanError> {
        self.errors
            .iter()
            .find(|e| e.path.len() == path.len() && e.path.iter().zip(path).all(|(a, b)| a == b))
    }
}

pub struct Gateway {
    executor: Arc<Executor>,
    engines: EngineManager,
}

impl Gateway {
    /// Load `config` against `schema` and prepare every upstream source.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        gateway: GatewayConfig,
        config: &EngineConfiguration,
        schema: Schema,
    ) -> Result<Self, GatewayError> {
        gateway.validate()?;
        let plan = Loader::with_defaults()?
            .load(config, schema, &gateway.server_url)?
            .with_cache_capacity(gateway.plan_cache_capacity);
        let client = fieldgate_exec::transport::engine_client()?;
        let launcher = ProcessLauncher::new(gateway.clone(), client);
        let engines = EngineManager::new(Arc::new(launcher), Arc::new(Metrics::new()));
        let executor = Executor::new(Arc::new(plan), gateway, &engines)?;
        Ok(Self {
            executor: Arc::new(executor),
            engines,
        })
    }

    pub fn plan(&self) -> &Arc<CompiledPlan> {
        self.executor.plan()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.executor.metrics()
    }

    /// Plan `operation` and run its fetches.
    ///
    /// Root fields that fail to plan do not stop the others; they are
    /// reported in [`Execution::errors`].
    pub async fn execute(
        &self,
        operation: &Operation,
        variables: serde_json::Value,
    ) -> Result<Execution, GatewayError> {
        let planned = self.plan().plan_operation(operation);
        for error in &planned.errors {
            tracing::warn!(
                path = %error.path.join("."),
                error = %error.error,
                "root field not planned"
            );
        }
        let errors = planned.errors.clone();
        let outcomes = self.executor.execute(planned, variables).await?;
        Ok(Execution { outcomes, errors })
    }

    /// Stop every engine process.
    pub async fn shutdown(&self) {
        self.engines.shutdown().await;
    }
}
