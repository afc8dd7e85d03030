//! Runs planned fetches against their upstream sources.
//!
//! Root fetches start concurrently. A nested fetch starts once its parent has
//! answered and runs once for every parent object found along its path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;

use fieldgate_core::binding::RequestContext;
use fieldgate_core::config::GatewayConfig;
use fieldgate_core::id::FetchId;
use fieldgate_planner::datasource::{DataSourceKind, DatabaseConfiguration, RestConfiguration};
use fieldgate_planner::loader::DEFAULT_CLOSE_TIMEOUT_SECONDS;
use fieldgate_planner::plan::{CompiledPlan, OperationPlan, PlannedFetch};

use crate::engine::EngineManager;
use crate::error::{FetchError, Result};
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::source::{DatabaseSource, HttpSource, Source, StaticSource};
use crate::transport;

/// Responses of one planned fetch, one per parent object.
#[derive(Debug)]
pub struct FetchOutcome {
    pub id: FetchId,
    pub path: Vec<String>,
    pub responses: Vec<Result<Bytes>>,
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        self.responses.iter().all(|r| r.is_ok())
    }
}

pub struct Executor {
    plan: Arc<CompiledPlan>,
    sources: Vec<Arc<dyn Source>>,
    config: GatewayConfig,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("sources", &self.sources.len())
            .field("fetch_deadline_ms", &self.config.fetch_deadline_ms)
            .finish()
    }
}

impl Executor {
    /// Build one source per data source of `plan`.
    ///
    /// Database sources get an engine from `engines`; this spawns the engine
    /// idle timers, so it must run inside a Tokio runtime.
    pub fn new(
        plan: Arc<CompiledPlan>,
        config: GatewayConfig,
        engines: &EngineManager,
    ) -> Result<Self> {
        let shared = transport::default_client(&config)?;
        let retry = RetryPolicy::from_config(&config);
        let metrics = Arc::clone(engines.metrics());

        let mut sources: Vec<Arc<dyn Source>> = Vec::with_capacity(plan.data_sources().len());
        for planned in plan.data_sources() {
            let ds = &planned.config;
            let source: Arc<dyn Source> = match ds.kind {
                DataSourceKind::Graphql => {
                    Arc::new(HttpSource::graphql(transport::client_for(&config, ds, &shared)?))
                }
                DataSourceKind::Rest => {
                    let rest: RestConfiguration = ds
                        .custom_config()
                        .map_err(|e| FetchError::InvalidInput(e.to_string()))?;
                    Arc::new(HttpSource::rest(transport::client_for(&config, ds, &shared)?, rest))
                }
                DataSourceKind::Static => Arc::new(StaticSource),
                kind if kind.is_database() => {
                    let db: DatabaseConfiguration = ds
                        .custom_config()
                        .map_err(|e| FetchError::InvalidInput(e.to_string()))?;
                    let idle = match db.close_timeout_seconds {
                        0 => DEFAULT_CLOSE_TIMEOUT_SECONDS,
                        secs => secs,
                    };
                    let engine = engines.engine(&db.prisma_schema, Duration::from_secs(idle));
                    Arc::new(DatabaseSource::new(engine, retry, Arc::clone(&metrics)))
                }
                _ => return Err(FetchError::UnknownSource(ds.id.clone())),
            };
            sources.push(source);
        }
        tracing::info!(sources = sources.len(), engines = engines.len(), "executor ready");
        Ok(Self {
            plan,
            sources,
            config,
            metrics,
        })
    }

    /// Use explicit sources, indexed like the plan's data sources.
    pub fn with_sources(
        plan: Arc<CompiledPlan>,
        sources: Vec<Arc<dyn Source>>,
        config: GatewayConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            plan,
            sources,
            config,
            metrics,
        }
    }

    pub fn plan(&self) -> &Arc<CompiledPlan> {
        &self.plan
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Render and load one fetch.
    pub async fn execute_fetch(&self, fetch: &PlannedFetch, ctx: &RequestContext) -> Result<Bytes> {
        let source = self
            .sources
            .get(fetch.data_source.index())
            .ok_or_else(|| FetchError::UnknownSource(fetch.data_source.to_string()))?;
        let input = fetch.fetch.template.render(ctx)?;
        let deadline = Instant::now() + Duration::from_millis(self.config.fetch_deadline_ms);
        self.metrics.fetch();
        let result = source.load(input.as_bytes(), deadline).await;
        if let Err(e) = &result {
            self.metrics.failure();
            tracing::warn!(
                fetch = %fetch.id,
                path = %fetch.path.join("."),
                error = %e,
                "fetch failed"
            );
        }
        result
    }

    /// Run every fetch of `operation`, parents before their children.
    pub async fn execute(
        self: &Arc<Self>,
        operation: Arc<OperationPlan>,
        variables: Value,
    ) -> Result<Vec<FetchOutcome>> {
        let variables = Arc::new(variables);
        let mut running = JoinSet::new();
        for root in operation.root_fetches() {
            self.spawn_fetch(&mut running, &operation, &variables, root.id, vec![Value::Null]);
        }

        let mut outcomes = Vec::with_capacity(operation.fetches.len());
        while let Some(joined) = running.join_next().await {
            let (id, responses) =
                joined.map_err(|e| FetchError::InvalidResponse(format!("fetch task failed: {e}")))?;
            let parent = operation
                .fetch(id)
                .ok_or_else(|| FetchError::InvalidResponse(format!("unknown fetch {id}")))?;

            for child in operation.children(id) {
                let mut objects = Vec::new();
                for body in responses.iter().filter_map(|r| r.as_ref().ok()) {
                    objects.extend(self.parent_objects(parent, child, body));
                }
                if objects.is_empty() {
                    tracing::debug!(fetch = %child.id, "no parent objects; nested fetch skipped");
                }
                self.spawn_fetch(&mut running, &operation, &variables, child.id, objects);
            }
            outcomes.push(FetchOutcome {
                id,
                path: parent.path.clone(),
                responses,
            });
        }
        outcomes.sort_by_key(|o| o.id);
        Ok(outcomes)
    }

    fn spawn_fetch(
        self: &Arc<Self>,
        running: &mut JoinSet<(FetchId, Vec<Result<Bytes>>)>,
        operation: &Arc<OperationPlan>,
        variables: &Arc<Value>,
        id: FetchId,
        objects: Vec<Value>,
    ) {
        let this = Arc::clone(self);
        let operation = Arc::clone(operation);
        let variables = Arc::clone(variables);
        running.spawn(async move {
            let Some(fetch) = operation.fetch(id) else {
                return (id, Vec::new());
            };
            let mut responses = Vec::with_capacity(objects.len());
            for object in objects {
                let ctx = RequestContext {
                    variables: (*variables).clone(),
                    object,
                };
                responses.push(this.execute_fetch(fetch, &ctx).await);
            }
            (id, responses)
        });
    }

    /// Objects `child` is resolved for, taken from one `parent` response.
    fn parent_objects(
        &self,
        parent: &PlannedFetch,
        child: &PlannedFetch,
        body: &Bytes,
    ) -> Vec<Value> {
        let response: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(fetch = %parent.id, error = %e, "parent response is not json");
                return Vec::new();
            }
        };
        let enveloped = self
            .plan
            .data_source(parent.data_source)
            .is_some_and(|ds| {
                ds.config.kind == DataSourceKind::Graphql || ds.config.kind.is_database()
            });
        let root = if enveloped {
            let data = &response["data"];
            let key = parent.path.last().map(String::as_str).unwrap_or_default();
            match data.get(key) {
                Some(v) => v.clone(),
                None => data.get(&parent.fetch.root_field).cloned().unwrap_or(Value::Null),
            }
        } else {
            response
        };

        // Segments between the parent's field and the child's own field.
        let inner = child
            .path
            .get(parent.path.len()..child.path.len().saturating_sub(1))
            .unwrap_or_default();
        let mut current = vec![root];
        for segment in inner {
            current = current
                .into_iter()
                .flat_map(flatten_lists)
                .filter_map(|v| v.get(segment).cloned())
                .collect();
        }
        current
            .into_iter()
            .flat_map(flatten_lists)
            .filter(|v| v.is_object())
            .collect()
    }
}

fn flatten_lists(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().flat_map(flatten_lists).collect(),
        other => vec![other],
    }
}
