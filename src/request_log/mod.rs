//! Request log capture pipeline.
//!
//! # Data Flow
//! ```text
//! log_request (hot path, no I/O):
//!     filter (exclusions) → mask (headers, query, bodies) → serialize
//!         → bounded pending queue (drop-oldest on overflow)
//!
//! maintenance tick (1s, background task):
//!     pending queue → active gzip batch file → rotate at size threshold
//!         → completed-file FIFO (pruned beyond cap) → orchestrator upload
//! ```
//!
//! # Design Decisions
//! - Redaction is applied before serialization and is irreversible
//! - The hot path only touches in-memory queues, never disk or network
//! - Suspension purges all buffered state and rejects records until expiry

pub mod batch;
pub mod masking;
pub mod record;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::config::RequestLoggingConfig;
use crate::metrics::server_errors::{truncate_message, truncate_stack_trace};
use crate::metrics::ErrorInfo;
use batch::BatchFile;
use masking::BodyMask;
use record::{ExceptionInfo, LogRecord, LoggedRequest, LoggedResponse};

/// Rotation threshold for the active batch file (uncompressed bytes).
const MAX_FILE_SIZE: u64 = 1_000_000;
/// Cap on completed files awaiting upload; oldest are deleted beyond this.
const MAX_FILES: usize = 50;
/// Cap on masked records awaiting the next maintenance tick.
const MAX_PENDING_WRITES: usize = 100;

#[derive(Default)]
struct FileState {
    current: Option<BatchFile>,
    completed: VecDeque<BatchFile>,
}

/// Filters, redacts, serializes and batches request/response records.
pub struct RequestLogger {
    config: RequestLoggingConfig,
    enabled: AtomicBool,
    suspend_until: Mutex<Option<Instant>>,
    pending: Mutex<VecDeque<String>>,
    files: Mutex<FileState>,
}

impl RequestLogger {
    pub fn new(config: RequestLoggingConfig) -> Self {
        let enabled = config.enabled;
        Self {
            config,
            enabled: AtomicBool::new(enabled),
            suspend_until: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            files: Mutex::new(FileState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn is_suspended(&self) -> bool {
        let suspend_until = self.suspend_until.lock().expect("suspend mutex poisoned");
        suspend_until.is_some_and(|until| Instant::now() < until)
    }

    /// Suspend collection for `duration`, purging everything buffered so far.
    /// Collection resumes automatically once the window expires.
    pub fn suspend_for(&self, duration: Duration) {
        {
            let mut suspend_until = self.suspend_until.lock().expect("suspend mutex poisoned");
            *suspend_until = Some(Instant::now() + duration);
        }
        tracing::warn!(
            seconds = duration.as_secs(),
            "request logging suspended, purging buffered records"
        );
        if let Err(error) = self.clear() {
            tracing::warn!(%error, "failed to purge request log state on suspension");
        }
    }

    /// Record one request/response pair. Non-blocking; all file I/O happens
    /// later in the maintenance tick.
    pub fn log_request(
        &self,
        mut request: LoggedRequest,
        mut response: LoggedResponse,
        error: Option<&ErrorInfo>,
        spans: Vec<Value>,
        trace_id: Option<String>,
    ) {
        if !self.is_enabled() || self.is_suspended() {
            return;
        }

        let Ok(mut parsed_url) = Url::parse(&request.url) else {
            return;
        };

        let path = request
            .path
            .clone()
            .unwrap_or_else(|| parsed_url.path().to_string());
        if masking::should_exclude_path(&path, &self.config.exclude_paths) {
            return;
        }

        let user_agent = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.as_str())
            .unwrap_or_default();
        if masking::should_exclude_user_agent(user_agent) {
            return;
        }

        if let Some(exclude) = &self.config.exclude {
            if exclude(&request, &response) {
                return;
            }
        }

        // Query parameters: masked, or stripped entirely when disabled.
        if self.config.log_query_params {
            if let Some(query) = parsed_url.query() {
                let masked = masking::mask_query_params(query, &self.config.mask_query_params);
                parsed_url.set_query(if masked.is_empty() {
                    None
                } else {
                    Some(&masked)
                });
            }
        } else {
            parsed_url.set_query(None);
        }
        request.url = parsed_url.to_string();

        // Request body: user callback first, then the oversize sentinel,
        // then key-based masking of JSON bodies.
        if !self.config.log_request_body || !masking::has_supported_content_type(&request.headers) {
            request.body = None;
        } else if request.body.is_some() {
            if let Some(callback) = &self.config.mask_request_body {
                match callback(&request) {
                    BodyMask::Unchanged => {}
                    BodyMask::Replace(body) => request.body = Some(body),
                    BodyMask::Redact => request.body = Some(masking::BODY_MASKED.to_vec()),
                }
            }
            let is_json = masking::is_json_content_type(&request.headers);
            if let Some(body) = request.body.take() {
                request.body = Some(self.finish_body(body, is_json));
            }
        }

        // Response body, same pipeline.
        if !self.config.log_response_body
            || !masking::has_supported_content_type(&response.headers)
        {
            response.body = None;
        } else if response.body.is_some() {
            if let Some(callback) = &self.config.mask_response_body {
                match callback(&request, &response) {
                    BodyMask::Unchanged => {}
                    BodyMask::Replace(body) => response.body = Some(body),
                    BodyMask::Redact => response.body = Some(masking::BODY_MASKED.to_vec()),
                }
            }
            let is_json = masking::is_json_content_type(&response.headers);
            if let Some(body) = response.body.take() {
                response.body = Some(self.finish_body(body, is_json));
            }
        }

        // Headers: dropped entirely when disabled, masked otherwise.
        if self.config.log_request_headers {
            request.headers = masking::mask_headers(request.headers, &self.config.mask_headers);
        } else {
            request.headers = Vec::new();
        }
        if self.config.log_response_headers {
            response.headers = masking::mask_headers(response.headers, &self.config.mask_headers);
        } else {
            response.headers = Vec::new();
        }

        let exception = match error {
            Some(info) if self.config.log_exception => Some(ExceptionInfo {
                type_name: info.type_name.clone(),
                message: truncate_message(&info.message),
                stack_trace: truncate_stack_trace(&info.stack_trace),
            }),
            _ => None,
        };

        let item = LogRecord {
            uuid: Uuid::new_v4().to_string(),
            request,
            response,
            exception,
            trace_id,
            spans,
        };

        let Ok(line) = serde_json::to_string(&item) else {
            return;
        };

        let mut pending = self.pending.lock().expect("pending queue mutex poisoned");
        if pending.len() >= MAX_PENDING_WRITES {
            // Bounded loss favoring recency: evict the oldest record.
            pending.pop_front();
        }
        pending.push_back(line);
    }

    fn finish_body(&self, body: Vec<u8>, is_json: bool) -> Vec<u8> {
        if body.len() > masking::MAX_BODY_SIZE {
            return masking::BODY_TOO_LARGE.to_vec();
        }
        if is_json {
            if let Some(masked) = masking::mask_json_body(&body, &self.config.mask_body_fields) {
                return masked;
            }
        }
        body
    }

    /// One maintenance cycle: drain pending records to the active file,
    /// rotate it when oversized, prune excess completed files, and lift
    /// expired suspensions.
    pub fn maintain(&self) {
        if let Err(error) = self.write_pending() {
            tracing::warn!(%error, "failed to write request log records to batch file");
        }

        let oversized = {
            let files = self.files.lock().expect("file state mutex poisoned");
            files
                .current
                .as_ref()
                .is_some_and(|file| file.size() > MAX_FILE_SIZE)
        };
        if oversized {
            if let Err(error) = self.rotate_file() {
                tracing::warn!(%error, "failed to rotate request log batch file");
            }
        }

        self.prune_completed();

        let mut suspend_until = self.suspend_until.lock().expect("suspend mutex poisoned");
        if suspend_until.is_some_and(|until| Instant::now() >= until) {
            *suspend_until = None;
            tracing::info!("request logging suspension expired, resuming");
        }
    }

    fn write_pending(&self) -> io::Result<()> {
        let drained: Vec<String> = {
            let mut pending = self.pending.lock().expect("pending queue mutex poisoned");
            pending.drain(..).collect()
        };
        if drained.is_empty() {
            return Ok(());
        }

        let mut files = self.files.lock().expect("file state mutex poisoned");
        if files.current.is_none() {
            files.current = Some(BatchFile::create()?);
        }
        if let Some(current) = files.current.as_mut() {
            for line in &drained {
                current.write_line(line.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Close the active file and queue it for upload.
    pub fn rotate_file(&self) -> io::Result<()> {
        let mut files = self.files.lock().expect("file state mutex poisoned");
        if let Some(mut current) = files.current.take() {
            current.close()?;
            if files.completed.len() >= MAX_FILES {
                if let Some(oldest) = files.completed.pop_front() {
                    let _ = oldest.delete();
                }
            }
            files.completed.push_back(current);
        }
        Ok(())
    }

    fn prune_completed(&self) {
        let mut files = self.files.lock().expect("file state mutex poisoned");
        while files.completed.len() > MAX_FILES {
            if let Some(oldest) = files.completed.pop_front() {
                let _ = oldest.delete();
            }
        }
    }

    /// Hand out the oldest completed file for upload. The caller owns it
    /// exclusively until it is deleted or returned via `retry_file_later`.
    pub fn take_file(&self) -> Option<BatchFile> {
        let mut files = self.files.lock().expect("file state mutex poisoned");
        files.completed.pop_front()
    }

    /// Return a file whose upload failed; it is retried on a later cycle,
    /// or deleted if the retry queue is full.
    pub fn retry_file_later(&self, file: BatchFile) {
        let mut files = self.files.lock().expect("file state mutex poisoned");
        if files.completed.len() >= MAX_FILES {
            let _ = file.delete();
        } else {
            files.completed.push_back(file);
        }
    }

    /// Drop all pending records and delete every batch file.
    pub fn clear(&self) -> io::Result<()> {
        {
            let mut pending = self.pending.lock().expect("pending queue mutex poisoned");
            pending.clear();
        }
        self.rotate_file()?;
        let mut files = self.files.lock().expect("file state mutex poisoned");
        while let Some(file) = files.completed.pop_front() {
            file.delete()?;
        }
        Ok(())
    }

    /// Disable the logger and purge all state. Called once on shutdown.
    pub fn close(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        if let Err(error) = self.clear() {
            tracing::warn!(%error, "failed to clear request log state on close");
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending queue mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::Arc;

    fn logging_config() -> RequestLoggingConfig {
        RequestLoggingConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn request_to(url: &str) -> LoggedRequest {
        LoggedRequest::new("GET", url)
    }

    fn read_records(file: &mut BatchFile) -> Vec<serde_json::Value> {
        let compressed = file.read_content().unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut content = String::new();
        decoder.read_to_string(&mut content).unwrap();
        content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn health_check_requests_are_filtered_out() {
        let logger = RequestLogger::new(logging_config());
        logger.log_request(
            request_to("http://test/healthz"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        assert_eq!(logger.pending_count(), 0);

        logger.log_request(
            request_to("http://test/items"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        assert_eq!(logger.pending_count(), 1);
        logger.close();
    }

    #[test]
    fn probe_user_agents_are_filtered_out() {
        let logger = RequestLogger::new(logging_config());
        let mut request = request_to("http://test/items");
        request.headers = vec![("User-Agent".to_string(), "kube-probe/1.27".to_string())];
        logger.log_request(request, LoggedResponse::new(200, 0.001), None, Vec::new(), None);
        assert_eq!(logger.pending_count(), 0);
        logger.close();
    }

    #[test]
    fn disabled_logger_discards_everything() {
        let logger = RequestLogger::new(RequestLoggingConfig::default());
        logger.log_request(
            request_to("http://test/items"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        assert_eq!(logger.pending_count(), 0);
    }

    #[test]
    fn query_params_are_masked_in_logged_url() {
        let logger = RequestLogger::new(logging_config());
        logger.log_request(
            request_to("http://test/items?page=2&api_key=abc"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        logger.maintain();
        logger.rotate_file().unwrap();
        let mut file = logger.take_file().unwrap();
        let records = read_records(&mut file);
        let url = records[0]["request"]["url"].as_str().unwrap();
        assert!(url.contains("page=2"));
        assert!(!url.contains("abc"));
        file.delete().unwrap();
        logger.close();
    }

    #[test]
    fn redact_callback_replaces_body_with_sentinel() {
        let mut config = logging_config();
        config.log_request_body = true;
        config.mask_request_body = Some(Arc::new(|_request| BodyMask::Redact));
        let logger = RequestLogger::new(config);

        let mut request = request_to("http://test/items");
        request.headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        request.body = Some(br#"{"secret_sauce": "yes"}"#.to_vec());
        logger.log_request(request, LoggedResponse::new(200, 0.001), None, Vec::new(), None);

        logger.maintain();
        logger.rotate_file().unwrap();
        let mut file = logger.take_file().unwrap();
        let records = read_records(&mut file);
        assert_eq!(records[0]["request"]["body"], "<masked>");
        file.delete().unwrap();
        logger.close();
    }

    #[test]
    fn oversized_bodies_become_sentinel() {
        let mut config = logging_config();
        config.log_response_body = true;
        let logger = RequestLogger::new(config);

        let mut response = LoggedResponse::new(200, 0.001);
        response.headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        response.body = Some(vec![b'x'; masking::MAX_BODY_SIZE + 1]);
        logger.log_request(request_to("http://test/items"), response, None, Vec::new(), None);

        logger.maintain();
        logger.rotate_file().unwrap();
        let mut file = logger.take_file().unwrap();
        let records = read_records(&mut file);
        assert_eq!(records[0]["response"]["body"], "<body too large>");
        file.delete().unwrap();
        logger.close();
    }

    #[test]
    fn pending_overflow_drops_oldest() {
        let logger = RequestLogger::new(logging_config());
        for i in 0..(MAX_PENDING_WRITES + 10) {
            logger.log_request(
                request_to(&format!("http://test/items/{i}")),
                LoggedResponse::new(200, 0.001),
                None,
                Vec::new(),
                None,
            );
        }
        assert_eq!(logger.pending_count(), MAX_PENDING_WRITES);

        logger.maintain();
        logger.rotate_file().unwrap();
        let mut file = logger.take_file().unwrap();
        let records = read_records(&mut file);
        // The newest record survived the overflow.
        let last_url = records.last().unwrap()["request"]["url"].as_str().unwrap();
        assert!(last_url.ends_with(&format!("/items/{}", MAX_PENDING_WRITES + 9)));
        file.delete().unwrap();
        logger.close();
    }

    #[test]
    fn completed_files_beyond_cap_are_deleted_oldest_first() {
        let logger = RequestLogger::new(logging_config());
        let mut paths = Vec::new();
        for i in 0..(MAX_FILES + 5) {
            logger.log_request(
                request_to(&format!("http://test/items/{i}")),
                LoggedResponse::new(200, 0.001),
                None,
                Vec::new(),
                None,
            );
            logger.maintain();
            logger.rotate_file().unwrap();
            let files = logger.files.lock().unwrap();
            paths.push(files.completed.back().unwrap().path().to_path_buf());
        }

        {
            let files = logger.files.lock().unwrap();
            assert_eq!(files.completed.len(), MAX_FILES);
        }
        // The five oldest were evicted from disk; the rest survive.
        for path in &paths[..5] {
            assert!(!path.exists());
        }
        for path in &paths[5..] {
            assert!(path.exists());
        }
        logger.close();
        assert!(!paths[5].exists());
    }

    #[test]
    fn failed_upload_is_deleted_when_retry_queue_is_full() {
        let logger = RequestLogger::new(logging_config());
        let produce = |i: usize| {
            logger.log_request(
                request_to(&format!("http://test/items/{i}")),
                LoggedResponse::new(200, 0.001),
                None,
                Vec::new(),
                None,
            );
            logger.maintain();
            logger.rotate_file().unwrap();
        };

        for i in 0..MAX_FILES {
            produce(i);
        }
        let taken = logger.take_file().unwrap();
        let taken_path = taken.path().to_path_buf();

        // Queue has room again: the failed upload goes to the back.
        logger.retry_file_later(taken);
        {
            let files = logger.files.lock().unwrap();
            assert_eq!(files.completed.len(), MAX_FILES);
            assert_eq!(files.completed.back().unwrap().path(), taken_path);
        }

        // Fill the slot the retry would need; now the file is dropped.
        let taken = logger.take_file().unwrap();
        let taken_path = taken.path().to_path_buf();
        produce(MAX_FILES);
        logger.retry_file_later(taken);
        assert!(!taken_path.exists());
        {
            let files = logger.files.lock().unwrap();
            assert_eq!(files.completed.len(), MAX_FILES);
        }
        logger.close();
    }

    #[test]
    fn suspension_purges_and_rejects_until_expiry() {
        let logger = RequestLogger::new(logging_config());
        logger.log_request(
            request_to("http://test/items"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        logger.suspend_for(Duration::from_secs(3600));
        assert!(logger.is_suspended());
        assert_eq!(logger.pending_count(), 0);
        assert!(logger.take_file().is_none());

        logger.log_request(
            request_to("http://test/items"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        assert_eq!(logger.pending_count(), 0);
        logger.close();
    }

    #[test]
    fn suspension_expires_automatically() {
        let logger = RequestLogger::new(logging_config());
        logger.suspend_for(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert!(!logger.is_suspended());
        logger.maintain();
        logger.log_request(
            request_to("http://test/items"),
            LoggedResponse::new(200, 0.001),
            None,
            Vec::new(),
            None,
        );
        assert_eq!(logger.pending_count(), 1);
        logger.close();
    }

    #[test]
    fn exception_details_are_attached_and_truncated() {
        let logger = RequestLogger::new(logging_config());
        let error = ErrorInfo::new("app::DbError", "y".repeat(5000), "at main");
        logger.log_request(
            request_to("http://test/items"),
            LoggedResponse::new(500, 0.010),
            Some(&error),
            Vec::new(),
            Some("trace-1".to_string()),
        );
        logger.maintain();
        logger.rotate_file().unwrap();
        let mut file = logger.take_file().unwrap();
        let records = read_records(&mut file);
        assert_eq!(records[0]["exception"]["type"], "app::DbError");
        let message = records[0]["exception"]["message"].as_str().unwrap();
        assert!(message.ends_with("... (truncated)"));
        assert_eq!(records[0]["trace_id"], "trace-1");
        file.delete().unwrap();
        logger.close();
    }
}
