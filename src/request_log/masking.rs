//! Privacy filtering: exclusion patterns and irreversible masking.
//!
//! Masking happens before a record is serialized, so nothing sensitive ever
//! reaches disk or the network. User-supplied patterns extend the built-in
//! lists, they never replace them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Replacement for masked header, query parameter and body field values.
pub const MASKED: &str = "******";

/// Sentinel stored in place of a body over [`MAX_BODY_SIZE`].
pub const BODY_TOO_LARGE: &[u8] = b"<body too large>";

/// Sentinel stored when a mask callback redacts the whole body.
pub const BODY_MASKED: &[u8] = b"<masked>";

/// Maximum uncompressed body size that will be logged, in bytes.
pub const MAX_BODY_SIZE: usize = 50_000;

const ALLOWED_CONTENT_TYPES: [&str; 2] = ["application/json", "text/plain"];

/// Outcome of a user body-mask callback.
///
/// `Redact` is explicit so an intentionally empty replacement body cannot be
/// confused with "remove the body entirely".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyMask {
    Unchanged,
    Replace(Vec<u8>),
    Redact,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("invalid built-in pattern"))
        .collect()
}

static EXCLUDE_PATH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)/_?healthz?$",
        r"(?i)/_?health[_-]?checks?$",
        r"(?i)/_?heart[_-]?beats?$",
        r"(?i)/ping$",
        r"(?i)/ready$",
        r"(?i)/live$",
    ])
});

static EXCLUDE_USER_AGENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)health[-_ ]?check",
        r"(?i)microsoft-azure-application-lb",
        r"(?i)googlehc",
        r"(?i)kube-probe",
    ])
});

static MASK_QUERY_PARAM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)auth",
        r"(?i)api-?key",
        r"(?i)secret",
        r"(?i)token",
        r"(?i)password",
        r"(?i)pwd",
    ])
});

static MASK_HEADER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)auth",
        r"(?i)api-?key",
        r"(?i)secret",
        r"(?i)token",
        r"(?i)cookie",
    ])
});

static MASK_BODY_FIELD_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)password",
        r"(?i)pwd",
        r"(?i)token",
        r"(?i)secret",
        r"(?i)auth",
        r"(?i)card[-_ ]?number",
        r"(?i)ccv",
        r"(?i)ssn",
    ])
});

fn matches_any(value: &str, built_in: &[Regex], user: &[Regex]) -> bool {
    built_in
        .iter()
        .chain(user.iter())
        .any(|pattern| pattern.is_match(value))
}

pub fn should_exclude_path(path: &str, user_patterns: &[Regex]) -> bool {
    matches_any(path, &EXCLUDE_PATH_PATTERNS, user_patterns)
}

pub fn should_exclude_user_agent(user_agent: &str) -> bool {
    !user_agent.is_empty() && matches_any(user_agent, &EXCLUDE_USER_AGENT_PATTERNS, &[])
}

pub fn mask_headers(
    headers: Vec<(String, String)>,
    user_patterns: &[Regex],
) -> Vec<(String, String)> {
    headers
        .into_iter()
        .map(|(name, value)| {
            if matches_any(&name, &MASK_HEADER_PATTERNS, user_patterns) {
                (name, MASKED.to_string())
            } else {
                (name, value)
            }
        })
        .collect()
}

pub fn mask_query_params(query: &str, user_patterns: &[Regex]) -> String {
    let mut masked = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if matches_any(&name, &MASK_QUERY_PARAM_PATTERNS, user_patterns) {
            masked.append_pair(&name, MASKED);
        } else {
            masked.append_pair(&name, &value);
        }
    }
    masked.finish()
}

/// Recursively mask string leaves under matching keys in a JSON body.
/// Returns `None` when the body is not parseable JSON, leaving it untouched.
pub fn mask_json_body(body: &[u8], user_patterns: &[Regex]) -> Option<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(body).ok()?;
    mask_json_value(&mut value, user_patterns);
    serde_json::to_vec(&value).ok()
}

fn mask_json_value(value: &mut Value, user_patterns: &[Regex]) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if child.is_string() && matches_any(key, &MASK_BODY_FIELD_PATTERNS, user_patterns) {
                    *child = Value::String(MASKED.to_string());
                } else {
                    mask_json_value(child, user_patterns);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mask_json_value(item, user_patterns);
            }
        }
        _ => {}
    }
}

/// Find the Content-Type header value, case-insensitively.
pub fn content_type<'a>(headers: &'a [(String, String)]) -> Option<&'a str> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.as_str())
}

pub fn is_supported_content_type(value: &str) -> bool {
    ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| value.starts_with(allowed))
}

pub fn has_supported_content_type(headers: &[(String, String)]) -> bool {
    content_type(headers).is_some_and(is_supported_content_type)
}

pub fn is_json_content_type(headers: &[(String, String)]) -> bool {
    content_type(headers).is_some_and(|value| value.starts_with("application/json"))
}
