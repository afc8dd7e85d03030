#![forbid(unsafe_code)]
//! fieldgate-planner: declarative configuration → compiled plan → per-field
//! upstream fetches.
//!
//! Design:
//! - `loader` resolves environment values and interned strings into
//!   `DataSourceConfiguration`s and picks a compiler factory for each
//!   (`registry`).
//! - `plan` owns root field ownership, pooled compiler instances and the
//!   operation plan cache.
//! - `walk` drives a depth-first traversal of one root field; the compilers in
//!   `compiler` only react to its events and emit a `RequestTemplate` plus its
//!   `VariableTable`.
//!
//! NOTE: No I/O beyond reading a config file; execution lives in fieldgate-exec.

pub mod compiler;
pub mod datasource;
pub mod error;
pub mod loader;
pub mod plan;
pub mod registry;
pub mod walk;

pub use compiler::{CompiledFetch, Compiler};
pub use datasource::{DataSourceConfiguration, DataSourceKind, FieldConfiguration};
pub use error::{CompileError, ConfigError};
pub use loader::{EngineConfiguration, Loader};
pub use plan::{CompiledPlan, OperationPlan, PlanError, PlannedFetch};
pub use registry::{DefaultFactoryResolver, FactoryResolver, PlannerFactory};
