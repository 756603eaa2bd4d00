//! API telemetry SDK for Rust web services.
//!
//! Captures request metrics, deduplicated errors, consumer identities and
//! (optionally) redacted request/response logs in-process, and ships them
//! to the hub on a background sync cycle. Framework adapters feed events
//! into a [`Client`]; nothing here ever blocks a request handler on disk
//! or network.

pub mod client;
pub mod config;
pub mod introspection;
pub mod metrics;
pub mod request_log;
pub mod shutdown;

pub use client::transport::HubStatus;
pub use client::Client;
pub use config::{ClientConfig, ConfigError, RequestLoggingConfig};
pub use introspection::{AppIntrospection, PathInfo};
pub use metrics::{Consumer, ConsumerSource, ErrorInfo};
pub use request_log::masking::BodyMask;
pub use request_log::record::{LoggedRequest, LoggedResponse};
pub use shutdown::Shutdown;
