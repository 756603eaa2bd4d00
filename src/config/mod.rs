//! Client configuration and construction-time validation.
//!
//! Semantic validation (client id format, env label) runs once in
//! `Client::new` and is the only place the SDK reports errors to the
//! caller. Everything after construction is absorbed internally.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::request_log::masking::BodyMask;
use crate::request_log::record::{LoggedRequest, LoggedResponse};

static ENV_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]{1,32}$").expect("invalid env label regex"));

/// Error raised when a [`ClientConfig`] fails validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid client id '{0}' (expecting hexadecimal UUID format)")]
    InvalidClientId(String),

    #[error("invalid env '{0}' (expecting 1-32 lowercase alphanumeric characters and hyphens)")]
    InvalidEnv(String),
}

/// Root configuration for the telemetry client.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Hub credential, a hexadecimal UUID issued per application.
    pub client_id: String,

    /// Deployment environment label (e.g. "prod", "staging").
    pub env: String,

    /// Application version reported with the startup descriptor.
    pub app_version: Option<String>,

    /// Hub base URL override, e.g. for a self-hosted hub. Defaults to the
    /// `APIMETER_HUB_BASE_URL` environment variable, then the public hub.
    pub hub_base_url: Option<String>,

    /// Request log capture settings.
    pub request_logging: RequestLoggingConfig,
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            env: env.into(),
            ..Default::default()
        }
    }

    /// Semantic validation, run before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Uuid::parse_str(&self.client_id).is_err() {
            return Err(ConfigError::InvalidClientId(self.client_id.clone()));
        }
        if !ENV_LABEL.is_match(&self.env) {
            return Err(ConfigError::InvalidEnv(self.env.clone()));
        }
        Ok(())
    }
}

/// Callback that may replace or fully redact a request body.
pub type MaskRequestBodyFn = Arc<dyn Fn(&LoggedRequest) -> BodyMask + Send + Sync>;

/// Callback that may replace or fully redact a response body.
pub type MaskResponseBodyFn =
    Arc<dyn Fn(&LoggedRequest, &LoggedResponse) -> BodyMask + Send + Sync>;

/// Predicate excluding a request/response pair from logging entirely.
pub type ExcludeFn = Arc<dyn Fn(&LoggedRequest, &LoggedResponse) -> bool + Send + Sync>;

/// Request log capture settings.
///
/// All capture is opt-in: with `enabled = false` the logger discards every
/// record before filtering. User-supplied regex lists extend (never replace)
/// the built-in redaction patterns.
#[derive(Clone)]
pub struct RequestLoggingConfig {
    pub enabled: bool,
    pub log_query_params: bool,
    pub log_request_headers: bool,
    pub log_request_body: bool,
    pub log_response_headers: bool,
    pub log_response_body: bool,
    pub log_exception: bool,

    /// Additional query parameter names to mask.
    pub mask_query_params: Vec<Regex>,

    /// Additional header names to mask.
    pub mask_headers: Vec<Regex>,

    /// Additional JSON body field names to mask.
    pub mask_body_fields: Vec<Regex>,

    /// Additional request paths to exclude from logging.
    pub exclude_paths: Vec<Regex>,

    pub mask_request_body: Option<MaskRequestBodyFn>,
    pub mask_response_body: Option<MaskResponseBodyFn>,
    pub exclude: Option<ExcludeFn>,
}

impl Default for RequestLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_query_params: true,
            log_request_headers: false,
            log_request_body: false,
            log_response_headers: false,
            log_response_body: false,
            log_exception: true,
            mask_query_params: Vec::new(),
            mask_headers: Vec::new(),
            mask_body_fields: Vec::new(),
            exclude_paths: Vec::new(),
            mask_request_body: None,
            mask_response_body: None,
            exclude: None,
        }
    }
}

impl std::fmt::Debug for RequestLoggingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLoggingConfig")
            .field("enabled", &self.enabled)
            .field("log_query_params", &self.log_query_params)
            .field("log_request_headers", &self.log_request_headers)
            .field("log_request_body", &self.log_request_body)
            .field("log_response_headers", &self.log_response_headers)
            .field("log_response_body", &self.log_response_body)
            .field("log_exception", &self.log_exception)
            .finish_non_exhaustive()
    }
}
