//! Field validation error aggregation.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

/// One drained, deduplicated validation failure, in hub wire format.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationErrorsItem {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub consumer: String,
    pub method: String,
    pub path: String,
    /// Field location as ordered segments, e.g. `["body", "address", "zip"]`.
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub error_count: u64,
}

struct ValidationErrorEntry {
    count: u64,
    item: ValidationErrorsItem,
}

/// Aggregates validation failures, one entry per unique signature.
#[derive(Default)]
pub struct ValidationErrorCounter {
    errors: Mutex<HashMap<String, ValidationErrorEntry>>,
}

impl ValidationErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `loc` is a dot-separated field path, e.g. `"body.address.zip"`.
    pub fn add_validation_error(
        &self,
        consumer: Option<&str>,
        method: &str,
        path: &str,
        loc: &str,
        msg: &str,
        kind: &str,
    ) {
        let consumer = consumer.unwrap_or_default();
        let hash_input = format!(
            "{}|{}|{}|{}|{}|{}",
            consumer,
            method.to_uppercase(),
            path,
            loc,
            msg.trim(),
            kind,
        );
        let key = format!("{:x}", md5::compute(hash_input.as_bytes()));

        let mut errors = self.errors.lock().expect("validation error mutex poisoned");
        let entry = errors.entry(key).or_insert_with(|| ValidationErrorEntry {
            count: 0,
            item: ValidationErrorsItem {
                consumer: consumer.to_string(),
                method: method.to_string(),
                path: path.to_string(),
                loc: loc.split('.').map(str::to_string).collect(),
                msg: msg.to_string(),
                kind: kind.to_string(),
                error_count: 0,
            },
        });
        entry.count += 1;
    }

    /// Snapshot all entries and atomically clear state.
    pub fn drain_and_reset(&self) -> Vec<ValidationErrorsItem> {
        let mut errors = self.errors.lock().expect("validation error mutex poisoned");
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
