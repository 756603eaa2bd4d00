//! Hub wire payloads.

use std::collections::HashMap;

use serde::Serialize;

use crate::introspection::PathInfo;
use crate::metrics::{Consumer, RequestsItem, ServerErrorsItem, ValidationErrorsItem};

/// One drain snapshot, queued until the hub accepts it or it goes stale.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload {
    /// Unix timestamp (seconds) when the snapshot was taken.
    pub timestamp: f64,
    pub instance_uuid: String,
    pub message_uuid: String,
    pub requests: Vec<RequestsItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationErrorsItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_errors: Vec<ServerErrorsItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<Consumer>,
}

/// Startup descriptor, resent every cycle until the hub acknowledges it.
#[derive(Debug, Clone, Serialize)]
pub struct StartupPayload {
    pub instance_uuid: String,
    pub message_uuid: String,
    pub paths: Vec<PathInfo>,
    pub versions: HashMap<String, String>,
    /// Adapter label, e.g. "rs:axum".
    pub client: String,
}
