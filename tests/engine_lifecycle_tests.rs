//! Engine lifecycle and database fetch execution against a scripted engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fieldgate_core::ast::{leaf, Field, FieldDefinition, Operation, Schema, TypeRef, Value};
use fieldgate_core::config::{GatewayConfig, RetryMode};
use fieldgate_exec::{
    Engine, EngineError, EngineLauncher, EngineManager, Executor, FetchError, Metrics,
};
use fieldgate_planner::{EngineConfiguration, Loader};
use serde_json::{json, Value as Json};
use tokio::time::{sleep, Instant};

/// Launches engines that fail readiness `failures` times, then succeed.
#[derive(Default)]
struct Script {
    failures: usize,
    launches: AtomicUsize,
    closes: AtomicUsize,
    requests: Mutex<Vec<Json>>,
}

struct ScriptedEngine {
    script: Arc<Script>,
    ready: bool,
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn wait_until_ready(&self, _deadline: Instant) -> Result<(), EngineError> {
        if self.ready {
            Ok(())
        } else {
            Err(EngineError::Unavailable("connection refused".into()))
        }
    }

    async fn execute(&self, request: &[u8]) -> Result<Bytes, EngineError> {
        let parsed: Json = serde_json::from_slice(request).map_err(|e| EngineError::Protocol(e.to_string()))?;
        self.script.requests.lock().unwrap().push(parsed);
        Ok(Bytes::from_static(br#"{"data":{"findManyusers":[{"id":1},{"id":2}]}}"#))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedLauncher(Arc<Script>);

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    async fn launch(&self, _schema: &str) -> Result<Box<dyn Engine>, EngineError> {
        let n = self.0.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            script: Arc::clone(&self.0),
            ready: n >= self.0.failures,
        }))
    }
}

const DOCUMENT: &str = r#"
string_storage:
  s: "model users { id Int @id }"
  g: "type Query { findManyusers: [users] }"
datasource_configurations:
  - id: users
    kind: SQLITE
    root_nodes: [ { type_name: Query, field_names: [findManyusers] } ]
    child_nodes: [ { type_name: users, field_names: [id] } ]
    custom_database:
      database_url: "file:./dev.db"
      prisma_schema: { key: s }
      graphql_schema: { key: g }
      close_timeout_seconds: 10
"#;

fn schema() -> Schema {
    Schema::default()
        .with_type(
            "Query",
            vec![FieldDefinition::new("findManyusers", TypeRef::list(TypeRef::named("users")))
                .arg("where", TypeRef::named("usersWhereInput"))
                .arg("take", TypeRef::named("Int"))],
        )
        .with_type("users", vec![FieldDefinition::new("id", TypeRef::named("Int"))])
}

fn operation() -> Operation {
    Operation::query(vec![Field::new("findManyusers")
        .arg("where", Value::Null)
        .arg("take", Value::variable("take"))
        .select(vec![leaf("id")])
        .into()])
    .variable("take", TypeRef::named("Int"))
}

fn setup(script: &Arc<Script>, config: GatewayConfig) -> (Arc<Executor>, EngineManager) {
    let plan = Loader::with_defaults()
        .unwrap()
        .load(&EngineConfiguration::from_yaml_str(DOCUMENT).unwrap(), schema(), "")
        .unwrap();
    let manager = EngineManager::new(Arc::new(ScriptedLauncher(Arc::clone(script))), Arc::new(Metrics::new()));
    let executor = Executor::new(Arc::new(plan), config, &manager).unwrap();
    (Arc::new(executor), manager)
}

#[tokio::test(start_paused = true)]
async fn database_requests_are_normalized_before_execution() {
    let script = Arc::new(Script::default());
    let (executor, manager) = setup(&script, GatewayConfig::default());
    assert_eq!(manager.len(), 1);

    let planned = executor.plan().plan_operation(&operation());
    let outcomes = executor.execute(planned, json!({"take": 2})).await.unwrap();
    assert!(outcomes[0].is_ok());

    let requests = script.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["variables"], json!({}));
    assert_eq!(requests[0]["query"], "{findManyusers( take: 2){id}}");

    manager.shutdown().await;
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn engine_stops_when_idle_and_restarts_on_demand() {
    let script = Arc::new(Script::default());
    let (executor, manager) = setup(&script, GatewayConfig::default());
    let planned = executor.plan().plan_operation(&operation());

    executor.execute(Arc::clone(&planned), json!({"take": 1})).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    executor.execute(Arc::clone(&planned), json!({"take": 1})).await.unwrap();
    assert_eq!(script.launches.load(Ordering::SeqCst), 1);

    // Idle timeout is 10s after the last request.
    sleep(Duration::from_secs(11)).await;
    assert_eq!(script.closes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.metrics().snapshot().idle_stops, 1);

    executor.execute(planned, json!({"take": 1})).await.unwrap();
    assert_eq!(script.launches.load(Ordering::SeqCst), 2);

    manager.shutdown().await;
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_startup_failures_are_retried_after_backoff() {
    let script = Arc::new(Script {
        failures: 2,
        ..Script::default()
    });
    let (executor, manager) = setup(&script, GatewayConfig::default());
    let planned = executor.plan().plan_operation(&operation());

    let start = Instant::now();
    let outcomes = executor.execute(planned, json!({"take": 1})).await.unwrap();
    assert!(outcomes[0].is_ok());
    assert_eq!(Instant::now() - start, Duration::from_millis(1000));
    assert_eq!(script.launches.load(Ordering::SeqCst), 3);
    // Each half-started engine is closed again.
    assert_eq!(script.closes.load(Ordering::SeqCst), 2);
    assert_eq!(manager.metrics().snapshot().retries, 2);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn persistent_failures_end_at_the_deadline() {
    let script = Arc::new(Script {
        failures: usize::MAX,
        ..Script::default()
    });
    let (executor, manager) = setup(&script, GatewayConfig::default());
    let planned = executor.plan().plan_operation(&operation());

    let start = Instant::now();
    let outcomes = executor.execute(planned, json!({"take": 1})).await.unwrap();
    let err = outcomes[0].responses[0].as_ref().unwrap_err();
    assert!(matches!(err, FetchError::DeadlineExceeded { attempts: 10 }), "{err:?}");
    assert_eq!(Instant::now() - start, Duration::from_secs(5));
    assert_eq!(manager.metrics().snapshot().failures, 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn never_mode_returns_the_first_error() {
    let script = Arc::new(Script {
        failures: 1,
        ..Script::default()
    });
    let config = GatewayConfig {
        retry_mode: RetryMode::Never,
        ..GatewayConfig::default()
    };
    let (executor, manager) = setup(&script, config);
    let planned = executor.plan().plan_operation(&operation());

    let outcomes = executor.execute(planned, json!({"take": 1})).await.unwrap();
    let err = outcomes[0].responses[0].as_ref().unwrap_err();
    assert!(matches!(err, FetchError::Engine(EngineError::Unavailable(_))), "{err:?}");
    assert_eq!(script.launches.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closed_engines_fail_fast_without_starting() {
    let script = Arc::new(Script::default());
    let (executor, manager) = setup(&script, GatewayConfig::default());
    manager.shutdown().await;

    let start = Instant::now();
    let planned = executor.plan().plan_operation(&operation());
    let outcomes = executor.execute(planned, json!({"take": 1})).await.unwrap();
    let err = outcomes[0].responses[0].as_ref().unwrap_err();
    assert!(matches!(err, FetchError::Engine(EngineError::Closed)), "{err:?}");
    assert!(Instant::now() - start < Duration::from_millis(500));
    assert_eq!(script.launches.load(Ordering::SeqCst), 0);
    assert_eq!(manager.metrics().snapshot().retries, 0);

    // Shutting down again is harmless at the manager level.
    manager.shutdown().await;
}
