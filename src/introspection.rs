//! Application introspection for the startup descriptor.
//!
//! Framework adapters implement [`AppIntrospection`] so the client can
//! report the application's routes and runtime versions to the hub once
//! at startup.

use std::collections::HashMap;

use serde::Serialize;

/// One registered route, in hub wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathInfo {
    pub method: String,
    pub path: String,
}

impl PathInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

/// Capability a framework adapter exposes to describe the running app.
pub trait AppIntrospection {
    /// All registered routes, one entry per method/path pair.
    fn list_routes(&self) -> Vec<PathInfo>;

    /// Runtime and library versions, e.g. `{"rust": "1.79.0"}`.
    fn runtime_versions(&self) -> HashMap<String, String>;
}
