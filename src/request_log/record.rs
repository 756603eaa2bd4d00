//! Log record wire types.
//!
//! One [`LogRecord`] per logged request/response pair, written as a single
//! JSON line into the active batch file. Bodies are restricted to textual
//! content types upstream, so they serialize as lossy UTF-8 strings.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use serde_json::Value;

/// The HTTP request side of a log record, as captured by an adapter.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedRequest {
    /// Unix timestamp (seconds) when the request was received.
    pub timestamp: f64,
    pub method: String,
    /// Route template, e.g. `/items/{id}`, if the framework exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Full request URL including scheme, host and query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(
        serialize_with = "serialize_body",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<u8>>,
}

impl LoggedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            timestamp: unix_timestamp(),
            method: method.into(),
            path: None,
            url: url.into(),
            headers: Vec::new(),
            size: None,
            consumer: None,
            body: None,
        }
    }
}

/// The HTTP response side of a log record.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedResponse {
    pub status_code: u16,
    /// Handler time in seconds.
    pub response_time: f64,
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(
        serialize_with = "serialize_body",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<Vec<u8>>,
}

impl LoggedResponse {
    pub fn new(status_code: u16, response_time: f64) -> Self {
        Self {
            status_code,
            response_time,
            headers: Vec::new(),
            size: None,
            body: None,
        }
    }
}

/// Exception details attached to a log record when the handler failed.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "message")]
    pub message: String,
    #[serde(rename = "stacktrace")]
    pub stack_trace: String,
}

/// One logged request/response pair; never mutated after serialization.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub uuid: String,
    pub request: LoggedRequest,
    pub response: LoggedResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    /// Opaque pass-through from an external span-capture collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Value>,
}

pub(crate) fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn serialize_body<S: Serializer>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match body {
        Some(bytes) => serializer.serialize_str(&String::from_utf8_lossy(bytes)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_wire_format() {
        let mut request = LoggedRequest::new("GET", "http://test/items?page=2");
        request.headers = vec![("Accept".to_string(), "application/json".to_string())];
        request.body = Some(b"{}".to_vec());

        let record = LogRecord {
            uuid: "abc".to_string(),
            request,
            response: LoggedResponse::new(200, 0.045),
            exception: None,
            trace_id: None,
            spans: Vec::new(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(json["request"]["method"], "GET");
        assert_eq!(json["request"]["headers"][0][0], "Accept");
        assert_eq!(json["request"]["body"], "{}");
        assert_eq!(json["response"]["status_code"], 200);
        assert!(json.get("exception").is_none());
        assert!(json.get("spans").is_none());
    }
}
