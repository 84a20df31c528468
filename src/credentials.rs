use crate::models::Gallery;
use std::collections::HashSet;
use std::path::Path;

/// Supplies the opaque request headers (cookies, tokens) a gallery needs.
pub trait HeaderSupplier {
    fn headers_for(&self, gallery: &Gallery) -> Vec<(String, String)>;
}

/// Sends no extra headers.
pub struct NoHeaders;

impl HeaderSupplier for NoHeaders {
    fn headers_for(&self, _gallery: &Gallery) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Fixed header set, typically a `Cookie` header exported from a browser.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: Vec<(String, String)>,
}

impl StaticHeaders {
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }

    /// Builds a `Cookie` header from a raw cookie string, a JSON cookie export,
    /// or a path to a file holding either.
    pub fn from_cookie(raw: Option<&str>) -> Self {
        let headers = normalize_cookie(raw)
            .map(|cookie| vec![("Cookie".to_string(), cookie)])
            .unwrap_or_default();
        Self { headers }
    }
}

impl HeaderSupplier for StaticHeaders {
    fn headers_for(&self, _gallery: &Gallery) -> Vec<(String, String)> {
        self.headers.clone()
    }
}

pub fn normalize_cookie(value: Option<&str>) -> Option<String> {
    let raw = value.unwrap_or("").trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(from_json) = cookie_json_to_header(raw) {
        return Some(from_json);
    }

    let path = Path::new(raw);
    if path.is_file() {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Some(from_json) = cookie_json_to_header(&contents) {
                return Some(from_json);
            }

            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    Some(raw.to_string())
}

fn cookie_json_to_header(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let mut pairs: Vec<(String, String)> = Vec::new();

    fn push_pair(pairs: &mut Vec<(String, String)>, name: &str, value: &str) {
        let name = name.trim();
        if name.is_empty() || name.contains(';') || name.contains('=') {
            return;
        }
        pairs.push((name.to_string(), value.trim().to_string()));
    }

    fn collect_from_value(value: &serde_json::Value, pairs: &mut Vec<(String, String)>) {
        match value {
            serde_json::Value::Array(values) => {
                for item in values {
                    collect_from_value(item, pairs);
                }
            }
            serde_json::Value::Object(map) => {
                if let (Some(name), Some(value)) = (map.get("name"), map.get("value")) {
                    if let (Some(name), Some(value)) = (name.as_str(), value.as_str()) {
                        push_pair(pairs, name, value);
                    }
                    return;
                }

                if let Some(cookies) = map.get("cookies") {
                    collect_from_value(cookies, pairs);
                    return;
                }

                for (key, value) in map {
                    if let Some(value) = value.as_str() {
                        push_pair(pairs, key, value);
                    }
                }
            }
            serde_json::Value::String(cookie) => {
                if let Some((name, value)) = cookie.trim().split_once('=') {
                    push_pair(pairs, name, value);
                }
            }
            _ => {}
        }
    }

    collect_from_value(&value, &mut pairs);
    if pairs.is_empty() {
        return None;
    }

    // Latest value wins for duplicate names.
    let mut seen = HashSet::new();
    let mut out: Vec<(String, String)> = Vec::new();
    for (name, value) in pairs.into_iter().rev() {
        if seen.insert(name.clone()) {
            out.push((name, value));
        }
    }
    out.reverse();

    Some(
        out.into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
