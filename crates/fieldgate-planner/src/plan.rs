//! Compiled plan and operation planning.
//!
//! A [`CompiledPlan`] is built once per configuration. It answers
//! `plan_operation` for every client operation: each root field becomes a
//! [`PlannedFetch`] compiled by the data source that owns it, and fields that
//! another data source resolves below it become child fetches.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

use fieldgate_core::ast::{Field, Operation, Schema, Selection};
use fieldgate_core::hash::{hash_serde, Hash256};
use fieldgate_core::id::{FetchId, SourceIndex};

use crate::compiler::{CompiledFetch, Compiler};
use crate::datasource::{DataSourceConfiguration, FieldConfigurations};
use crate::error::{CompileError, ConfigError, Result};
use crate::registry::PlannerFactory;
use crate::walk::{Boundary, Ownership, WalkContext};

/// A resolved data source with the factory that builds its compilers.
#[derive(Debug, Clone)]
pub struct PlannedDataSource {
    pub config: DataSourceConfiguration,
    pub factory: PlannerFactory,
}

/// One upstream request of an operation plan.
#[derive(Debug, Clone)]
pub struct PlannedFetch {
    pub id: FetchId,
    pub data_source: SourceIndex,
    /// Response path of the field this fetch resolves (list indices omitted).
    pub path: Vec<String>,
    pub is_nested: bool,
    pub parent: Option<FetchId>,
    pub fetch: CompiledFetch,
}

/// A root field (or nested hand-off) that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanError {
    pub path: Vec<String>,
    pub error: CompileError,
}

#[derive(Debug, Clone, Default)]
pub struct OperationPlan {
    pub fetches: Vec<PlannedFetch>,
    pub errors: Vec<PlanError>,
}

impl OperationPlan {
    pub fn fetch(&self, id: FetchId) -> Option<&PlannedFetch> {
        self.fetches.get(id.index())
    }

    /// The fetch resolving the field at `path`.
    pub fn fetch_for_path(&self, path: &[&str]) -> Option<&PlannedFetch> {
        self.fetches
            .iter()
            .find(|f| f.path.len() == path.len() && f.path.iter().zip(path).all(|(a, b)| a == b))
    }

    pub fn root_fetches(&self) -> impl Iterator<Item = &PlannedFetch> {
        self.fetches.iter().filter(|f| f.parent.is_none())
    }

    pub fn children(&self, id: FetchId) -> impl Iterator<Item = &PlannedFetch> {
        self.fetches.iter().filter(move |f| f.parent == Some(id))
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Operation plans kept by default before the least recently used is evicted.
pub const DEFAULT_PLAN_CACHE_CAPACITY: usize = 1024;

pub struct CompiledPlan {
    field_owners: HashMap<(String, String), SourceIndex>,
    data_sources: Vec<PlannedDataSource>,
    fields: FieldConfigurations,
    default_flush_interval: i64,
    schema: Schema,
    pools: Vec<Mutex<Vec<Compiler>>>,
    cache: Mutex<LruCache<Hash256, Arc<OperationPlan>>>,
}

impl std::fmt::Debug for CompiledPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPlan")
            .field("data_sources", &self.data_sources.len())
            .field("root_fields", &self.field_owners.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn cache_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl CompiledPlan {
    /// Validate root field ownership and build one compiler per data source.
    ///
    /// Building the first compiler eagerly surfaces bad custom settings at
    /// load time rather than on the first request.
    pub fn new(
        data_sources: Vec<PlannedDataSource>,
        fields: FieldConfigurations,
        default_flush_interval: i64,
        schema: Schema,
    ) -> Result<Self> {
        let mut field_owners: HashMap<(String, String), SourceIndex> = HashMap::new();
        let mut pools = Vec::with_capacity(data_sources.len());

        for (i, ds) in data_sources.iter().enumerate() {
            let index = SourceIndex::new(i as u64);
            for node in &ds.config.root_nodes {
                for field_name in &node.field_names {
                    let key = (node.type_name.clone(), field_name.clone());
                    if let Some(first) = field_owners.get(&key) {
                        return Err(ConfigError::DuplicateRootField {
                            type_name: node.type_name.clone(),
                            field_name: field_name.clone(),
                            first: data_sources[first.index()].config.id.clone(),
                            second: ds.config.id.clone(),
                        });
                    }
                    field_owners.insert(key, index);
                }
            }
            let compiler = ds.factory.create(&ds.config)?;
            pools.push(Mutex::new(vec![compiler]));
        }

        Ok(Self {
            field_owners,
            data_sources,
            fields,
            default_flush_interval,
            schema,
            pools,
            cache: Mutex::new(LruCache::new(cache_capacity(DEFAULT_PLAN_CACHE_CAPACITY))),
        })
    }

    /// Bound the operation plan cache to `capacity` plans (at least one).
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        lock(&self.cache).resize(cache_capacity(capacity));
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn data_sources(&self) -> &[PlannedDataSource] {
        &self.data_sources
    }

    pub fn data_source(&self, index: SourceIndex) -> Option<&PlannedDataSource> {
        self.data_sources.get(index.index())
    }

    pub fn fields(&self) -> &FieldConfigurations {
        &self.fields
    }

    pub fn default_flush_interval(&self) -> i64 {
        self.default_flush_interval
    }

    /// The data source declaring `type_name.field_name` as a root node.
    pub fn owner(&self, type_name: &str, field_name: &str) -> Option<SourceIndex> {
        self.field_owners
            .get(&(type_name.to_string(), field_name.to_string()))
            .copied()
    }

    pub fn cached_plans(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Plan `operation`, reusing the cached plan for an identical operation.
    pub fn plan_operation(&self, operation: &Operation) -> Arc<OperationPlan> {
        let key = match hash_serde(operation) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(error = %err, "operation not hashable; planning without cache");
                None
            }
        };
        if let Some(key) = key {
            if let Some(plan) = lock(&self.cache).get(&key) {
                tracing::debug!(key = %key.to_hex(), "operation plan cache hit");
                return Arc::clone(plan);
            }
        }

        let plan = Arc::new(self.build_plan(operation));
        tracing::debug!(
            fetches = plan.fetches.len(),
            errors = plan.errors.len(),
            "planned operation"
        );
        if let Some(key) = key {
            if let Some((evicted, _)) = lock(&self.cache).push(key, Arc::clone(&plan)) {
                if evicted != key {
                    tracing::debug!(key = %evicted.to_hex(), "operation plan evicted");
                }
            }
        }
        plan
    }

    fn build_plan(&self, operation: &Operation) -> OperationPlan {
        let mut plan = OperationPlan::default();
        let Some(root_type) = self.schema.root_type(operation.kind) else {
            plan.errors.push(PlanError {
                path: Vec::new(),
                error: CompileError::MissingRootType {
                    kind: operation.kind.to_string(),
                },
            });
            return plan;
        };
        self.plan_root_selections(operation, &operation.selection_set, root_type, &mut plan);
        plan
    }

    fn plan_root_selections(
        &self,
        operation: &Operation,
        selections: &[Selection],
        root_type: &str,
        plan: &mut OperationPlan,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) if field.name == "__typename" => {}
                Selection::Field(field) => match self.owner(root_type, &field.name) {
                    Some(source) => {
                        self.plan_fetch(operation, source, field, root_type, &[], None, plan)
                    }
                    None => plan.errors.push(PlanError {
                        path: vec![field.response_key().to_string()],
                        error: CompileError::UnownedField {
                            type_name: root_type.to_string(),
                            field_name: field.name.clone(),
                        },
                    }),
                },
                Selection::InlineFragment(fragment) => {
                    let matches = fragment
                        .type_condition
                        .as_deref()
                        .map_or(true, |t| t == root_type);
                    if matches {
                        let selections = &fragment.selection_set;
                        self.plan_root_selections(operation, selections, root_type, plan);
                    }
                }
            }
        }
    }

    fn checkout(&self, source: SourceIndex) -> std::result::Result<Compiler, CompileError> {
        let pooled = self.pools.get(source.index()).and_then(|p| lock(p).pop());
        if let Some(compiler) = pooled {
            return Ok(compiler);
        }
        let ds = self
            .data_source(source)
            .ok_or_else(|| CompileError::Internal(format!("unknown data source {source}")))?;
        ds.factory
            .create(&ds.config)
            .map_err(|e| CompileError::Internal(e.to_string()))
    }

    fn checkin(&self, source: SourceIndex, mut compiler: Compiler) {
        compiler.reset();
        if let Some(pool) = self.pools.get(source.index()) {
            lock(pool).push(compiler);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_fetch(
        &self,
        operation: &Operation,
        source: SourceIndex,
        field: &Field,
        enclosing_type: &str,
        base_path: &[String],
        parent: Option<FetchId>,
        plan: &mut OperationPlan,
    ) {
        let mut path = base_path.to_vec();
        path.push(field.response_key().to_string());

        let is_nested = !self.schema.is_root_type(enclosing_type);
        let cx = WalkContext {
            operation,
            schema: &self.schema,
            fields: &self.fields,
            is_nested,
        };
        let boundary = SourceBoundary {
            plan: self,
            current: source,
        };

        let compiled = self.checkout(source).and_then(|mut compiler| {
            let result = compiler.compile(cx, field, enclosing_type, base_path, &boundary);
            self.checkin(source, compiler);
            result
        });

        match compiled {
            Ok((fetch, nested)) => {
                let id = FetchId::new(plan.fetches.len() as u64);
                tracing::debug!(
                    fetch = %id,
                    data_source = %source,
                    path = %path.join("."),
                    nested = nested.len(),
                    "compiled fetch"
                );
                plan.fetches.push(PlannedFetch {
                    id,
                    data_source: source,
                    path,
                    is_nested,
                    parent,
                    fetch,
                });
                for child in nested {
                    let child_base = &child.path[..child.path.len().saturating_sub(1)];
                    self.plan_fetch(
                        operation,
                        child.source,
                        child.field,
                        &child.enclosing_type,
                        child_base,
                        Some(id),
                        plan,
                    );
                }
            }
            Err(error) => {
                tracing::warn!(
                    data_source = %source,
                    path = %path.join("."),
                    error = %error,
                    "field failed to compile"
                );
                plan.errors.push(PlanError { path, error });
            }
        }
    }
}

/// Ownership as seen from the data source currently compiling.
struct SourceBoundary<'p> {
    plan: &'p CompiledPlan,
    current: SourceIndex,
}

impl Boundary for SourceBoundary<'_> {
    fn classify(&self, type_name: &str, field_name: &str) -> Ownership {
        let serves = self
            .plan
            .data_source(self.current)
            .is_some_and(|ds| ds.config.serves(type_name, field_name));
        if serves {
            return Ownership::Local;
        }
        match self.plan.owner(type_name, field_name) {
            Some(other) => Ownership::Foreign(other),
            None => Ownership::Unowned,
        }
    }
}
