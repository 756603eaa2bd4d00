//! Server error aggregation with signature-based dedup.
//!
//! Errors are keyed by an md5 hash over consumer, method, path, error type,
//! message and a normalized stack trace, so otherwise-identical errors from
//! different invocations collapse into one bucket. Truncation is applied
//! before anything is stored and is irreversible.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const MAX_MSG_LENGTH: usize = 2048;
const MAX_STACKTRACE_LENGTH: usize = 65536;

static HEX_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("invalid hex address regex"));
static THREAD_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ThreadId\(\d+\)").expect("invalid thread id regex"));

/// Error details extracted by a framework adapter at its capture boundary.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub type_name: String,
    pub message: String,
    pub stack_trace: String,
}

impl ErrorInfo {
    pub fn new(
        type_name: impl Into<String>,
        message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: stack_trace.into(),
        }
    }

    /// Build from any error value, using its concrete type name.
    pub fn from_error<E: std::error::Error>(error: &E, stack_trace: impl Into<String>) -> Self {
        Self::new(
            std::any::type_name::<E>(),
            error.to_string(),
            stack_trace,
        )
    }
}

/// One drained, deduplicated server error, in hub wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ServerErrorsItem {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub consumer: String,
    pub method: String,
    pub path: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(rename = "traceback")]
    pub stack_trace: String,
    pub sentry_event_id: Option<String>,
    pub error_count: u64,
}

struct ErrorEntry {
    count: u64,
    item: ServerErrorsItem,
}

/// Aggregates server errors, one entry per unique signature.
#[derive(Default)]
pub struct ServerErrorCounter {
    errors: Mutex<HashMap<String, ErrorEntry>>,
}

impl ServerErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server_error(
        &self,
        consumer: Option<&str>,
        method: &str,
        path: &str,
        error: &ErrorInfo,
    ) {
        let consumer = consumer.unwrap_or_default();
        let hash_input = format!(
            "{}|{}|{}|{}|{}|{}",
            consumer,
            method.to_uppercase(),
            path,
            error.type_name,
            error.message,
            normalize_stack_for_hashing(&error.stack_trace),
        );
        let key = format!("{:x}", md5::compute(hash_input.as_bytes()));

        let mut errors = self.errors.lock().expect("server error mutex poisoned");
        let entry = errors.entry(key).or_insert_with(|| ErrorEntry {
            count: 0,
            item: ServerErrorsItem {
                consumer: consumer.to_string(),
                method: method.to_string(),
                path: path.to_string(),
                type_name: error.type_name.clone(),
                message: truncate_message(&error.message),
                stack_trace: truncate_stack_trace(&error.stack_trace),
                sentry_event_id: None,
                error_count: 0,
            },
        });
        entry.count += 1;
    }

    /// Snapshot all error entries and atomically clear state.
    pub fn drain_and_reset(&self) -> Vec<ServerErrorsItem> {
        let mut errors = self.errors.lock().expect("server error mutex poisoned");
        errors
            .drain()
            .map(|(_, entry)| {
                let mut item = entry.item;
                item.error_count = entry.count;
                item
            })
            .collect()
    }
}

/// Hard cut at 2048 chars with a trailing marker.
pub(crate) fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MSG_LENGTH {
        return message.to_string();
    }
    const SUFFIX: &str = "... (truncated)";
    let mut cutoff = MAX_MSG_LENGTH - SUFFIX.len();
    while !message.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    format!("{}{}", &message[..cutoff], SUFFIX)
}

/// Line-oriented accumulation up to 65536 chars; stops with a marker rather
/// than cutting mid-line. Leading frames from this crate's own capture layer
/// are dropped first.
pub(crate) fn truncate_stack_trace(stack_trace: &str) -> String {
    const SUFFIX: &str = "... (truncated) ...";
    let cutoff = MAX_STACKTRACE_LENGTH - SUFFIX.len();

    let mut result: Vec<&str> = Vec::new();
    let mut length = 0;
    for line in relevant_stack_lines(stack_trace) {
        if length + line.len() + 1 > cutoff {
            result.push(SUFFIX);
            break;
        }
        length += line.len() + 1;
        result.push(line);
    }
    result.join("\n")
}

/// Keeps the panic/error header, then skips the frames that belong to the
/// SDK's own capture boundary before the application frames start.
fn relevant_stack_lines(stack_trace: &str) -> impl Iterator<Item = &str> {
    let mut past_capture_frames = false;
    stack_trace
        .trim()
        .lines()
        .enumerate()
        .filter(move |(i, line)| {
            if *i == 0 {
                return true;
            }
            if !past_capture_frames && line.contains("apimeter::") {
                return false;
            }
            past_capture_frames = true;
            true
        })
        .map(|(_, line)| line)
}

/// Replaces memory addresses and thread id tokens with fixed placeholders so
/// hashing collapses repeats of the same logical error.
fn normalize_stack_for_hashing(stack_trace: &str) -> String {
    let stack_trace = HEX_ADDRESS.replace_all(stack_trace, "0x0");
    THREAD_ID.replace_all(&stack_trace, "ThreadId(0)").into_owned()
}
