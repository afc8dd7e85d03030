//! Out-of-process query engines and their lazy lifecycle.
//!
//! Database data sources talk to an external engine process compiled from a
//! schema string. [`EngineManager`] keeps one [`LazyEngine`] per distinct
//! schema. A lazy engine starts its process on the first request, stops it
//! after an idle period, and starts it again on demand. Shutdown closes every
//! live process and leaves the engines permanently closed.

use std::collections::HashMap;
use std::io::Write as _;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use fieldgate_core::config::{EngineMode, GatewayConfig};

use crate::error::EngineError;
use crate::metrics::Metrics;

/// Schemas at least this long are passed through a file instead of the
/// environment (ARG_MAX minus a safety buffer).
pub const SCHEMA_ENV_LIMIT: usize = 1_048_576 - 2048;

/// A running engine process.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn wait_until_ready(&self, deadline: Instant) -> Result<(), EngineError>;

    /// One request/response round trip.
    async fn execute(&self, request: &[u8]) -> Result<Bytes, EngineError>;

    /// Stop the process. A second call fails with [`EngineError::DoubleClose`].
    async fn close(&self) -> Result<(), EngineError>;

    /// False once the process can no longer serve requests and needs a restart.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Starts engine processes for a schema.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, schema: &str) -> Result<Box<dyn Engine>, EngineError>;
}

fn free_port() -> Result<u16, EngineError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Hand the schema to the process; the returned file must outlive it.
fn attach_schema(cmd: &mut Command, schema: &str) -> Result<Option<NamedTempFile>, EngineError> {
    if schema.len() < SCHEMA_ENV_LIMIT {
        cmd.env("PRISMA_DML", schema);
        return Ok(None);
    }
    let mut file = tempfile::Builder::new()
        .prefix("t")
        .suffix(".prisma")
        .tempfile()?;
    file.write_all(schema.as_bytes())?;
    file.flush()?;
    cmd.env("PRISMA_DML_PATH", file.path());
    tracing::debug!(
        bytes = schema.len(),
        path = %file.path().display(),
        "schema passed through file"
    );
    Ok(Some(file))
}

fn base_command(cfg: &GatewayConfig) -> Command {
    let mut cmd = Command::new(&cfg.engine_path);
    if !cfg.working_dir.is_empty() {
        cmd.current_dir(&cfg.working_dir);
    }
    cmd.kill_on_drop(true);
    cmd
}

fn spawn(cmd: &mut Command, cfg: &GatewayConfig) -> Result<Child, EngineError> {
    cmd.spawn().map_err(|e| EngineError::Launch {
        path: cfg.engine_path.clone(),
        reason: e.to_string(),
    })
}

async fn stop_process(mut child: Child, exit_timeout: Duration) -> Result<(), EngineError> {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "engine process already gone");
        return Ok(());
    }
    match timeout(exit_timeout, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(%status, "engine process exited");
            Ok(())
        }
        Ok(Err(e)) => Err(EngineError::Io(e)),
        Err(_) => {
            tracing::warn!(
                timeout_ms = exit_timeout.as_millis() as u64,
                "engine did not exit in time"
            );
            Ok(())
        }
    }
}

/// Engine listening on a local port.
pub struct HttpEngine {
    url: String,
    client: reqwest::Client,
    child: Mutex<Option<Child>>,
    poll: Duration,
    exit_timeout: Duration,
    _schema_file: Option<NamedTempFile>,
}

impl HttpEngine {
    pub fn start(
        cfg: &GatewayConfig,
        schema: &str,
        client: reqwest::Client,
    ) -> Result<Self, EngineError> {
        let port = free_port()?;
        let mut cmd = base_command(cfg);
        cmd.arg("-p")
            .arg(port.to_string())
            .arg("--enable-raw-queries")
            .stdin(Stdio::null());
        let schema_file = attach_schema(&mut cmd, schema)?;
        let child = spawn(&mut cmd, cfg)?;
        tracing::info!(port, pid = child.id(), "started http query engine");
        Ok(Self {
            url: format!("http://localhost:{port}"),
            client,
            child: Mutex::new(Some(child)),
            poll: Duration::from_millis(cfg.engine_ready_poll_ms.max(1)),
            exit_timeout: Duration::from_millis(cfg.engine_exit_timeout_ms),
            _schema_file: schema_file,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Engine for HttpEngine {
    async fn wait_until_ready(&self, deadline: Instant) -> Result<(), EngineError> {
        loop {
            if let Ok(Ok(_)) = timeout_at(deadline, self.client.get(&self.url).send()).await {
                return Ok(());
            }
            if Instant::now() + self.poll >= deadline {
                return Err(EngineError::NotReady);
            }
            sleep(self.poll).await;
        }
    }

    async fn execute(&self, request: &[u8]) -> Result<Bytes, EngineError> {
        let res = self
            .client
            .post(format!("{}/", self.url))
            .header(CONTENT_TYPE, "application/json")
            .body(request.to_vec())
            .send()
            .await?;
        let status = res.status();
        if status != reqwest::StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.bytes().await?)
    }

    async fn close(&self) -> Result<(), EngineError> {
        let child = self.child.lock().await.take();
        match child {
            Some(child) => stop_process(child, self.exit_timeout).await,
            None => Err(EngineError::DoubleClose),
        }
    }
}

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Marks the pipes out of sync unless the exchange runs to completion.
struct Exchange<'a> {
    poisoned: &'a AtomicBool,
    complete: bool,
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.complete {
            tracing::warn!("stdio exchange abandoned, engine needs a restart");
            self.poisoned.store(true, Ordering::Release);
        }
    }
}

/// Engine speaking line-delimited JSON over stdin/stdout.
pub struct StdioEngine {
    pipes: Mutex<Option<StdioPipes>>,
    poisoned: AtomicBool,
    child: Mutex<Option<Child>>,
    exit_timeout: Duration,
    _schema_file: Option<NamedTempFile>,
}

impl StdioEngine {
    pub fn start(cfg: &GatewayConfig, schema: &str) -> Result<Self, EngineError> {
        let mut cmd = base_command(cfg);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        let schema_file = attach_schema(&mut cmd, schema)?;
        let mut child = spawn(&mut cmd, cfg)?;

        let missing = |pipe: &str| EngineError::Launch {
            path: cfg.engine_path.clone(),
            reason: format!("failed to capture {pipe}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        tracing::info!(pid = child.id(), "started stdio query engine");

        Ok(Self {
            pipes: Mutex::new(Some(StdioPipes {
                stdin,
                stdout: BufReader::new(stdout),
            })),
            poisoned: AtomicBool::new(false),
            child: Mutex::new(Some(child)),
            exit_timeout: Duration::from_millis(cfg.engine_exit_timeout_ms),
            _schema_file: schema_file,
        })
    }
}

#[async_trait]
impl Engine for StdioEngine {
    async fn wait_until_ready(&self, _deadline: Instant) -> Result<(), EngineError> {
        let mut child = self.child.lock().await;
        let child = child.as_mut().ok_or(EngineError::Closed)?;
        match child.try_wait()? {
            None => Ok(()),
            Some(status) => Err(EngineError::Unavailable(format!(
                "engine exited during startup ({status})"
            ))),
        }
    }

    async fn execute(&self, request: &[u8]) -> Result<Bytes, EngineError> {
        let mut pipes = self.pipes.lock().await;
        let pipes = pipes.as_mut().ok_or(EngineError::Closed)?;
        // A half-read response would be handed to the next caller.
        if self.poisoned.load(Ordering::Acquire) {
            return Err(EngineError::Unavailable("engine pipes out of sync".into()));
        }
        let mut exchange = Exchange {
            poisoned: &self.poisoned,
            complete: false,
        };
        pipes.stdin.write_all(request).await?;
        if !request.ends_with(b"\n") {
            pipes.stdin.write_all(b"\n").await?;
        }
        pipes.stdin.flush().await?;

        let mut line = String::new();
        if pipes.stdout.read_line(&mut line).await? == 0 {
            return Err(EngineError::Unavailable("engine closed its output".into()));
        }
        exchange.complete = true;
        let len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(len);
        Ok(Bytes::from(line))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pipes.lock().await.take();
        let child = self.child.lock().await.take();
        match child {
            Some(child) => stop_process(child, self.exit_timeout).await,
            None => Err(EngineError::DoubleClose),
        }
    }

    fn is_healthy(&self) -> bool {
        !self.poisoned.load(Ordering::Acquire)
    }
}

/// Launches the configured engine binary in the configured mode.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl ProcessLauncher {
    pub fn new(config: GatewayConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, schema: &str) -> Result<Box<dyn Engine>, EngineError> {
        Ok(match self.config.engine_mode {
            EngineMode::Http => {
                Box::new(HttpEngine::start(&self.config, schema, self.client.clone())?)
            }
            EngineMode::Stdio => Box::new(StdioEngine::start(&self.config, schema)?),
        })
    }
}

struct Slot {
    engine: Option<Box<dyn Engine>>,
    closed: bool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.engine.is_some() {
            tracing::error!("engine slot dropped while its process is still running");
            if !std::thread::panicking() {
                debug_assert!(self.engine.is_none(), "engine must be closed before it is dropped");
            }
        }
    }
}

struct Shared {
    schema: String,
    launcher: Arc<dyn EngineLauncher>,
    slot: RwLock<Slot>,
    in_flight: AtomicUsize,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl Shared {
    async fn close_engine(&self, slot: &mut Slot, reason: &'static str) -> bool {
        let Some(engine) = slot.engine.take() else {
            return false;
        };
        if let Err(e) = engine.close().await {
            tracing::warn!(error = %e, reason, "closing engine failed");
        }
        tracing::info!(reason, "engine stopped");
        true
    }
}

/// Returns whether any event was pending.
fn drain(rx: &mut mpsc::UnboundedReceiver<()>) -> bool {
    let mut any = false;
    while rx.try_recv().is_ok() {
        any = true;
    }
    any
}

async fn idle_timer(
    shared: Arc<Shared>,
    mut processed: mpsc::UnboundedReceiver<()>,
    idle: Duration,
) {
    let mut expires_at: Option<Instant> = None;
    loop {
        let expiry = async move {
            match expires_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                let mut slot = shared.slot.write().await;
                shared.close_engine(&mut slot, "shutdown").await;
                slot.closed = true;
                return;
            }
            event = processed.recv() => {
                if event.is_none() {
                    // Every handle is gone.
                    let mut slot = shared.slot.write().await;
                    shared.close_engine(&mut slot, "dropped").await;
                    slot.closed = true;
                    return;
                }
                expires_at = Some(Instant::now() + idle);
            }
            _ = expiry => {
                if drain(&mut processed) {
                    expires_at = Some(Instant::now() + idle);
                    continue;
                }
                let mut slot = shared.slot.write().await;
                // Requests that held the read lock may have finished meanwhile.
                if drain(&mut processed) || shared.in_flight.load(Ordering::Acquire) > 0 {
                    expires_at = Some(Instant::now() + idle);
                    continue;
                }
                if shared.close_engine(&mut slot, "idle").await {
                    shared.metrics.engine_idle_stopped();
                }
                expires_at = None;
            }
        }
    }
}

/// Counts one request as in flight until dropped, even when its future is.
struct InFlight<'a> {
    engine: &'a LazyEngine,
}

impl<'a> InFlight<'a> {
    fn enter(engine: &'a LazyEngine) -> Self {
        engine.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { engine }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.engine.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        // The timer only stops while this channel is alive.
        let _ = self.engine.processed.send(());
    }
}

/// An engine for one schema, started on demand and stopped when idle.
///
/// Dropping the last handle stops the process and ends the idle timer.
pub struct LazyEngine {
    shared: Arc<Shared>,
    processed: mpsc::UnboundedSender<()>,
}

impl std::fmt::Debug for LazyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEngine")
            .field("schema_len", &self.shared.schema.len())
            .field("in_flight", &self.shared.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl LazyEngine {
    /// Must be called within a Tokio runtime; spawns the idle timer task.
    pub fn new(
        schema: &str,
        idle_timeout: Duration,
        launcher: Arc<dyn EngineLauncher>,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            schema: schema.to_string(),
            launcher,
            slot: RwLock::new(Slot {
                engine: None,
                closed: cancel.is_cancelled(),
            }),
            in_flight: AtomicUsize::new(0),
            cancel,
            metrics,
        });
        tokio::spawn(idle_timer(Arc::clone(&shared), rx, idle_timeout));
        Self {
            shared,
            processed: tx,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shared.slot.read().await.engine.is_some()
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.slot.read().await.closed
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Execute `request`, starting the engine first if it is not running.
    ///
    /// Startup is bounded by `deadline`; a failed start leaves the engine
    /// stopped so the next request tries again. An unhealthy engine is
    /// replaced before the request runs.
    pub async fn execute(&self, request: &[u8], deadline: Instant) -> Result<Bytes, EngineError> {
        {
            let slot = self.shared.slot.read().await;
            if slot.closed {
                return Err(EngineError::Closed);
            }
            if let Some(engine) = slot.engine.as_deref() {
                if engine.is_healthy() {
                    return self.run(engine, request).await;
                }
            }
        }

        let mut slot = self.shared.slot.write().await;
        if slot.closed {
            return Err(EngineError::Closed);
        }
        if slot.engine.as_deref().is_some_and(|engine| !engine.is_healthy()) {
            self.shared.close_engine(&mut slot, "unhealthy").await;
        }
        if slot.engine.is_none() {
            slot.engine = Some(self.start(deadline).await?);
        }
        let slot = slot.downgrade();
        match slot.engine.as_deref() {
            Some(engine) => self.run(engine, request).await,
            None => Err(EngineError::Closed),
        }
    }

    async fn start(&self, deadline: Instant) -> Result<Box<dyn Engine>, EngineError> {
        tracing::debug!(schema_len = self.shared.schema.len(), "starting engine");
        let launch = self.shared.launcher.launch(&self.shared.schema);
        let engine = match timeout_at(deadline, launch).await {
            Ok(launched) => launched?,
            Err(_) => return Err(EngineError::NotReady),
        };
        let ready = match timeout_at(deadline, engine.wait_until_ready(deadline)).await {
            Ok(ready) => ready,
            Err(_) => Err(EngineError::NotReady),
        };
        if let Err(e) = ready {
            tracing::warn!(error = %e, "engine failed to become ready");
            if let Err(close) = engine.close().await {
                tracing::debug!(error = %close, "closing half-started engine failed");
            }
            return Err(e);
        }
        self.shared.metrics.engine_started();
        tracing::info!("engine ready");
        Ok(engine)
    }

    async fn run(&self, engine: &dyn Engine, request: &[u8]) -> Result<Bytes, EngineError> {
        let _in_flight = InFlight::enter(self);
        tracing::debug!(bytes = request.len(), "engine request");
        let result = engine.execute(request).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "engine request failed");
        }
        result
    }

    /// Stop the engine for good. A second call fails with
    /// [`EngineError::DoubleClose`].
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let mut slot = self.shared.slot.write().await;
        if slot.closed {
            tracing::warn!("engine shut down twice");
            return Err(EngineError::DoubleClose);
        }
        slot.closed = true;
        self.shared.close_engine(&mut slot, "shutdown").await;
        drop(slot);
        self.shared.cancel.cancel();
        Ok(())
    }
}

/// Owns every lazy engine, keyed by schema.
pub struct EngineManager {
    launcher: Arc<dyn EngineLauncher>,
    engines: StdMutex<HashMap<String, Arc<LazyEngine>>>,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl EngineManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>, metrics: Arc<Metrics>) -> Self {
        Self {
            launcher,
            engines: StdMutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            metrics,
        }
    }

    fn engines(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<LazyEngine>>> {
        self.engines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The engine for `schema`, created on first use.
    pub fn engine(&self, schema: &str, idle_timeout: Duration) -> Arc<LazyEngine> {
        let mut engines = self.engines();
        if let Some(engine) = engines.get(schema) {
            return Arc::clone(engine);
        }
        let engine = Arc::new(LazyEngine::new(
            schema,
            idle_timeout,
            Arc::clone(&self.launcher),
            self.cancel.child_token(),
            Arc::clone(&self.metrics),
        ));
        engines.insert(schema.to_string(), Arc::clone(&engine));
        engine
    }

    pub fn len(&self) -> usize {
        self.engines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines().is_empty()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Close every engine regardless of idle state.
    pub async fn shutdown(&self) {
        let engines: Vec<Arc<LazyEngine>> = self.engines().values().cloned().collect();
        for engine in engines {
            match engine.shutdown().await {
                Ok(()) | Err(EngineError::DoubleClose) => {}
                Err(e) => tracing::warn!(error = %e, "engine shutdown failed"),
            }
        }
        self.cancel.cancel();
        tracing::info!("engine manager shut down");
    }
}
