#![forbid(unsafe_code)]
//! fieldgate-exec: runs compiled fetches against their upstreams.
//!
//! Database fetches go through lazily started engine processes that stop
//! when idle. HTTP fetches use shared or per data source clients. Every
//! attempt is bounded by a deadline and retried according to [`RetryPolicy`].

pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod retry;
pub mod source;
pub mod transport;

pub use engine::{Engine, EngineLauncher, EngineManager, LazyEngine, ProcessLauncher};
pub use error::{EngineError, FetchError, Result};
pub use executor::{Executor, FetchOutcome};
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::RetryPolicy;
pub use source::{DatabaseSource, HttpSource, Source, StaticSource};
