//! Sync orchestrator.
//!
//! # Data Flow
//! ```text
//! request handlers (concurrent, hot path):
//!     add_request / add_server_error / add_validation_error
//!     add_or_update_consumer / log_request      → in-memory state only
//!
//! background sync cycle (10s for the first hour, then 60s):
//!     startup send (until acknowledged)
//!     aggregator drain → payload queue → POST /sync
//!     log file rotation → completed files → POST /log
//! ```
//!
//! # Design Decisions
//! - One explicitly owned client handle, cheap to clone, no global state
//! - Transient hub failures requeue in order and end the tick early
//! - An invalid client id disables the whole pipeline permanently

pub mod payload;
pub mod transport;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{ClientConfig, ConfigError};
use crate::introspection::{AppIntrospection, PathInfo};
use crate::metrics::{
    Consumer, ConsumerRegistry, ConsumerSource, ErrorInfo, RequestCounter, ServerErrorCounter,
    ValidationErrorCounter,
};
use crate::request_log::record::{unix_timestamp, LoggedRequest, LoggedResponse};
use crate::request_log::RequestLogger;
use crate::shutdown::Shutdown;
use payload::{StartupPayload, SyncPayload};
use transport::{HubStatus, HubTransport};

const SYNC_INTERVAL: Duration = Duration::from_secs(60);
const INITIAL_SYNC_INTERVAL: Duration = Duration::from_secs(10);
const INITIAL_SYNC_PERIOD: Duration = Duration::from_secs(3600);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
const LOG_SUSPEND_DURATION: Duration = Duration::from_secs(3600);
/// Queued payloads older than this are dropped unsent.
const MAX_QUEUE_TIME: Duration = Duration::from_secs(3600);
const MAX_QUEUE_SIZE: usize = 400;
const MAX_FILE_UPLOADS_PER_TICK: usize = 10;

#[derive(Default)]
struct StartupState {
    payload: Option<StartupPayload>,
    sent: bool,
}

struct ClientInner {
    config: ClientConfig,
    instance_uuid: String,
    enabled: AtomicBool,
    started: AtomicBool,
    transport: HubTransport,
    requests: RequestCounter,
    server_errors: ServerErrorCounter,
    validation_errors: ValidationErrorCounter,
    consumers: ConsumerRegistry,
    request_logger: RequestLogger,
    startup: Mutex<StartupState>,
    queue: Mutex<VecDeque<SyncPayload>>,
    shutdown: Shutdown,
}

/// Telemetry client: owns the aggregators, the request logger and the
/// background sync cycle. Cheap to clone; all clones share one pipeline.
///
/// Lifecycle: [`Client::new`] → [`Client::start`] → [`Client::shutdown`].
/// Framework adapters hold a clone and feed events in; no method here ever
/// blocks on network or disk.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Validate the configuration and build a client. Nothing is started
    /// and nothing is sent until [`Client::start`].
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let transport = HubTransport::new(
            &config.client_id,
            &config.env,
            config.hub_base_url.as_deref(),
        );
        let request_logger = RequestLogger::new(config.request_logging.clone());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                instance_uuid: Uuid::new_v4().to_string(),
                enabled: AtomicBool::new(true),
                started: AtomicBool::new(false),
                transport,
                requests: RequestCounter::new(),
                server_errors: ServerErrorCounter::new(),
                validation_errors: ValidationErrorCounter::new(),
                consumers: ConsumerRegistry::new(),
                request_logger,
                startup: Mutex::new(StartupState::default()),
                queue: Mutex::new(VecDeque::new()),
                shutdown: Shutdown::new(),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn request_logger(&self) -> &RequestLogger {
        &self.inner.request_logger
    }

    /// Spawn the background sync cycle and, if logging is enabled, the
    /// logger maintenance task. Idempotent; a no-op once the shutdown
    /// signal has fired, since later subscribers would never observe it.
    pub fn start(&self) {
        if self.inner.shutdown.is_triggered() {
            return;
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(env = %self.inner.config.env, "starting telemetry sync");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = inner.shutdown.subscribe();
            inner.sync().await;

            let mut ticker = tokio::time::interval(INITIAL_SYNC_INTERVAL);
            ticker.tick().await;
            let interval_switch = tokio::time::sleep(INITIAL_SYNC_PERIOD);
            tokio::pin!(interval_switch);
            let mut switched = false;

            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.sync().await,
                    _ = &mut interval_switch, if !switched => {
                        switched = true;
                        ticker = tokio::time::interval_at(
                            tokio::time::Instant::now() + SYNC_INTERVAL,
                            SYNC_INTERVAL,
                        );
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::debug!("sync cycle stopped");
        });

        if self.inner.request_logger.is_enabled() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let mut shutdown_rx = inner.shutdown.subscribe();
                let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => inner.request_logger.maintain(),
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }
    }

    /// Stop the background cycle, drain metrics and logs one final time,
    /// and purge all buffered log state. Pooled hub connections close once
    /// their idle timeout elapses; the transport itself is released when
    /// the last clone drops.
    pub async fn shutdown(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        self.inner.shutdown.trigger();

        self.inner.send_sync_data().await;
        self.inner.send_log_data().await;
        self.inner.request_logger.close();
        tracing::info!("telemetry client shut down");
    }

    /// Run one sync cycle immediately, outside the regular cadence.
    pub async fn sync_now(&self) {
        self.inner.sync().await;
    }

    /// Record one handled request. Sizes are in bytes; negative means
    /// unknown.
    #[allow(clippy::too_many_arguments)]
    pub fn add_request(
        &self,
        consumer: Option<&str>,
        method: &str,
        path: &str,
        status_code: u16,
        response_time_ms: f64,
        request_size: i64,
        response_size: i64,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.inner.requests.add_request(
            consumer,
            method,
            path,
            status_code,
            response_time_ms,
            request_size,
            response_size,
        );
    }

    pub fn add_server_error(
        &self,
        consumer: Option<&str>,
        method: &str,
        path: &str,
        error: &ErrorInfo,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.inner
            .server_errors
            .add_server_error(consumer, method, path, error);
    }

    pub fn add_validation_error(
        &self,
        consumer: Option<&str>,
        method: &str,
        path: &str,
        loc: &str,
        msg: &str,
        kind: &str,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.inner
            .validation_errors
            .add_validation_error(consumer, method, path, loc, msg, kind);
    }

    /// Register or update a consumer. Accepts a bare identifier or a full
    /// record; returns the canonical identifier to use for metric calls,
    /// or `None` for an anonymous (empty) consumer.
    pub fn add_or_update_consumer(&self, source: impl Into<ConsumerSource>) -> Option<String> {
        let consumer: Consumer = source.into().canonicalize()?;
        let identifier = consumer.identifier.clone();
        if self.is_enabled() {
            self.inner.consumers.add_or_update(consumer);
        }
        Some(identifier)
    }

    /// Record one request/response pair in the request log. `spans` and
    /// `trace_id` are opaque pass-through from a span-capture collaborator.
    pub fn log_request(
        &self,
        request: LoggedRequest,
        response: LoggedResponse,
        error: Option<&ErrorInfo>,
        spans: Vec<Value>,
        trace_id: Option<String>,
    ) {
        if !self.is_enabled() {
            return;
        }
        self.inner
            .request_logger
            .log_request(request, response, error, spans, trace_id);
    }

    /// Capture the startup descriptor. Resent every cycle until the hub
    /// acknowledges it.
    pub fn set_startup_data(
        &self,
        paths: Vec<PathInfo>,
        mut versions: HashMap<String, String>,
        client_label: &str,
    ) {
        if let Some(app_version) = &self.inner.config.app_version {
            versions
                .entry("app".to_string())
                .or_insert_with(|| app_version.clone());
        }

        let mut startup = self.inner.startup.lock().expect("startup mutex poisoned");
        startup.payload = Some(StartupPayload {
            instance_uuid: self.inner.instance_uuid.clone(),
            message_uuid: Uuid::new_v4().to_string(),
            paths,
            versions,
            client: client_label.to_string(),
        });
        startup.sent = false;
    }

    /// Capture the startup descriptor from a framework's introspection
    /// capability.
    pub fn set_startup_data_from(&self, app: &dyn AppIntrospection, client_label: &str) {
        self.set_startup_data(app.list_routes(), app.runtime_versions(), client_label);
    }
}

impl ClientInner {
    /// One cycle: the three concerns run concurrently, all best-effort.
    async fn sync(&self) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        tokio::join!(
            self.send_startup_data(),
            self.send_sync_data(),
            self.send_log_data(),
        );
    }

    async fn send_startup_data(&self) {
        let payload = {
            let startup = self.startup.lock().expect("startup mutex poisoned");
            if startup.sent {
                return;
            }
            match &startup.payload {
                Some(payload) => payload.clone(),
                None => return,
            }
        };

        tracing::debug!("sending startup data to hub");
        match self.transport.send_startup(&payload).await {
            HubStatus::Ok => {
                let mut startup = self.startup.lock().expect("startup mutex poisoned");
                startup.sent = true;
                startup.payload = None;
            }
            HubStatus::InvalidClientId => self.disable(),
            _ => {}
        }
    }

    async fn send_sync_data(&self) {
        let payload = SyncPayload {
            timestamp: unix_timestamp(),
            instance_uuid: self.instance_uuid.clone(),
            message_uuid: Uuid::new_v4().to_string(),
            requests: self.requests.drain_and_reset(),
            validation_errors: self.validation_errors.drain_and_reset(),
            server_errors: self.server_errors.drain_and_reset(),
            consumers: self.consumers.drain_and_reset(),
        };

        {
            let mut queue = self.queue.lock().expect("sync queue mutex poisoned");
            if queue.len() >= MAX_QUEUE_SIZE {
                tracing::warn!("sync payload queue is full, dropping payload");
            } else {
                queue.push_back(payload);
            }
        }

        let mut sends = 0;
        loop {
            let payload = {
                let mut queue = self.queue.lock().expect("sync queue mutex poisoned");
                match queue.pop_front() {
                    Some(payload) => payload,
                    None => break,
                }
            };

            // Stale payloads are dropped unsent.
            if unix_timestamp() - payload.timestamp > MAX_QUEUE_TIME.as_secs_f64() {
                continue;
            }

            if sends > 0 {
                random_send_delay().await;
            }
            sends += 1;

            tracing::debug!("synchronizing metrics with hub");
            match self.transport.send_sync(&payload).await {
                HubStatus::InvalidClientId => {
                    self.disable();
                    return;
                }
                HubStatus::Retryable => {
                    // Preserve creation order: back to the front, and stop
                    // hammering a failing endpoint this tick.
                    let mut queue = self.queue.lock().expect("sync queue mutex poisoned");
                    if queue.len() >= MAX_QUEUE_SIZE {
                        tracing::warn!("sync payload queue is full, dropping failed payload");
                    } else {
                        queue.push_front(payload);
                    }
                    break;
                }
                _ => {}
            }
        }
    }

    async fn send_log_data(&self) {
        if let Err(error) = self.request_logger.rotate_file() {
            tracing::warn!(%error, "failed to rotate request log file");
            return;
        }

        for upload in 0..MAX_FILE_UPLOADS_PER_TICK {
            let Some(mut file) = self.request_logger.take_file() else {
                break;
            };

            if upload > 0 {
                random_send_delay().await;
            }

            tracing::debug!(file = file.uuid(), "uploading request log file to hub");
            let content = match file.read_content() {
                Ok(content) => content,
                Err(error) => {
                    tracing::warn!(%error, "failed to read request log file");
                    let _ = file.delete();
                    continue;
                }
            };

            match self.transport.send_log(file.uuid(), content).await {
                HubStatus::Retryable => {
                    self.request_logger.retry_file_later(file);
                    break;
                }
                HubStatus::PaymentRequired => {
                    let _ = file.delete();
                    self.request_logger.suspend_for(LOG_SUSPEND_DURATION);
                    break;
                }
                HubStatus::InvalidClientId => {
                    let _ = file.delete();
                    self.disable();
                    return;
                }
                _ => {
                    let _ = file.delete();
                }
            }
        }
    }

    /// Permanent disable on an invalid credential: no further attempts.
    fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            tracing::error!(
                client_id = %self.config.client_id,
                "invalid client id, disabling telemetry permanently"
            );
            self.shutdown.trigger();
        }
    }
}

/// Space out consecutive hub sends within one tick to avoid bursting.
async fn random_send_delay() {
    let delay = rand::thread_rng().gen_range(100..500);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
