//! Request traffic aggregation.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

/// Dimension tuple identifying one traffic bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    consumer: String,
    method: String,
    path: String,
    status_code: u16,
}

#[derive(Debug, Default)]
struct RequestStats {
    count: u64,
    request_size_sum: i64,
    response_size_sum: i64,
    response_times: HashMap<i64, u64>,
    request_sizes: HashMap<i64, u64>,
    response_sizes: HashMap<i64, u64>,
}

/// One drained traffic bucket, in hub wire format.
#[derive(Debug, Clone, Serialize)]
pub struct RequestsItem {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub consumer: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub request_count: u64,
    pub request_size_sum: i64,
    pub response_size_sum: i64,
    /// Response times binned to 10 ms, bin start -> count.
    pub response_times: HashMap<i64, u64>,
    /// Request sizes binned to 1 KB, bin index -> count.
    pub request_sizes: HashMap<i64, u64>,
    /// Response sizes binned to 1 KB, bin index -> count.
    pub response_sizes: HashMap<i64, u64>,
}

/// Aggregates per-request traffic metrics with bounded memory.
#[derive(Debug, Default)]
pub struct RequestCounter {
    buckets: Mutex<HashMap<RequestKey, RequestStats>>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled request. Negative sizes mean unknown and are
    /// excluded from sums and histograms; the count still increments.
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
        let key = RequestKey {
            consumer: consumer.unwrap_or_default().to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status_code,
        };

        let mut buckets = self.buckets.lock().expect("request counter mutex poisoned");
        let stats = buckets.entry(key).or_default();
        stats.count += 1;

        let time_bin = (response_time_ms / 10.0).floor() as i64 * 10;
        *stats.response_times.entry(time_bin).or_default() += 1;

        if request_size >= 0 {
            stats.request_size_sum += request_size;
            *stats.request_sizes.entry(request_size / 1000).or_default() += 1;
        }
        if response_size >= 0 {
            stats.response_size_sum += response_size;
            *stats.response_sizes.entry(response_size / 1000).or_default() += 1;
        }
    }

    /// Snapshot all buckets and atomically clear state.
    pub fn drain_and_reset(&self) -> Vec<RequestsItem> {
        let mut buckets = self.buckets.lock().expect("request counter mutex poisoned");
        buckets
            .drain()
            .map(|(key, stats)| RequestsItem {
                consumer: key.consumer,
                method: key.method,
                path: key.path,
                status_code: key.status_code,
                request_count: stats.count,
                request_size_sum: stats.request_size_sum,
                response_size_sum: stats.response_size_sum,
                response_times: stats.response_times,
                request_sizes: stats.request_sizes,
                response_sizes: stats.response_sizes,
            })
            .collect()
    }
}
