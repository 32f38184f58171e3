//! Transport-neutral request model used by the resolution pipeline.

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Request;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Request that could not be turned into an [`HttpRequest`].
///
/// Carries whatever could be read before the failure so the caller can log it.
#[derive(Debug, thiserror::Error)]
#[error("could not parse request {method} {path}: {reason}")]
pub struct RequestParseError {
    pub method: String,
    pub path: String,
    pub reason: String,
}

/// An incoming HTTP request, decoded once at the transport edge.
///
/// Header names are stored lowercase. The body is decoded as JSON when the
/// content type says so, as a string otherwise, and `Null` when empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    /// Decoded query, used for matching
    pub query: BTreeMap<String, String>,
    /// Query string as received, forwarded unchanged on pass-through
    pub raw_query: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    /// Raw body bytes, relayed verbatim on pass-through
    pub raw_body: Bytes,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        if !self.raw_query.is_empty() {
            self.raw_query.push('&');
        }
        self.raw_query.push_str(&format!(
            "{}={}",
            urlencoding::encode(key),
            urlencoding::encode(value)
        ));
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_json_body(mut self, body: Value) -> Self {
        self.raw_body = Bytes::from(body.to_string());
        self.body = body;
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self
    }

    /// Collect a hyper request into an `HttpRequest`.
    pub async fn from_hyper(req: Request<Incoming>) -> Result<Self, RequestParseError> {
        let (parts, body) = req.into_parts();
        let method = parts.method.as_str().to_ascii_uppercase();
        let path = parts.uri.path().to_string();

        let mut headers = BTreeMap::new();
        for (name, value) in &parts.headers {
            let value = value.to_str().map_err(|_| RequestParseError {
                method: method.clone(),
                path: path.clone(),
                reason: format!("header '{}' is not valid text", name.as_str()),
            })?;
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }

        let raw_body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| RequestParseError {
                method: method.clone(),
                path: path.clone(),
                reason: format!("failed to read request body: {e}"),
            })?;

        Self::from_parts(
            &method,
            &path,
            parts.uri.query().unwrap_or(""),
            headers,
            raw_body,
        )
    }

    /// Build a request from already-separated parts, decoding query and body.
    pub fn from_parts(
        method: &str,
        path: &str,
        query: &str,
        headers: BTreeMap<String, String>,
        raw_body: Bytes,
    ) -> Result<Self, RequestParseError> {
        let body = decode_body(&headers, &raw_body).map_err(|reason| RequestParseError {
            method: method.to_string(),
            path: path.to_string(),
            reason,
        })?;

        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: parse_query_string(query),
            raw_query: query.to_string(),
            headers,
            body,
            raw_body,
        })
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Path split into non-empty segments
    pub fn path_segments(&self) -> Vec<&str> {
        split_path(&self.path)
    }

    /// Document form used by hooks and the request log.
    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("method".into(), json!(self.method));
        doc.insert("path".into(), json!(self.path));
        if !self.query.is_empty() {
            doc.insert("query".into(), json!(self.query));
        }
        if !self.headers.is_empty() {
            doc.insert("headers".into(), json!(self.headers));
        }
        if !self.body.is_null() {
            doc.insert("body".into(), self.body.clone());
        }
        Value::Object(doc)
    }

    /// Rebuild a request from a hook's replacement document.
    ///
    /// Fields absent from the document keep their current values.
    pub fn merge_json(&self, doc: &Value) -> Result<Self, String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| "http-request must be a JSON object".to_string())?;
        let mut updated = self.clone();

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            updated.method = method.to_ascii_uppercase();
        }
        if let Some(path) = obj.get("path").and_then(Value::as_str) {
            updated.path = path.to_string();
        }
        if let Some(query) = obj.get("query") {
            updated.query = text_map(query).ok_or("query must be an object")?;
            updated.raw_query = encode_query(&updated.query);
        }
        if let Some(headers) = obj.get("headers") {
            updated.headers = text_map(headers)
                .ok_or("headers must be an object")?
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect();
        }
        if let Some(body) = obj.get("body") {
            updated.raw_body = match body {
                Value::String(s) => Bytes::from(s.clone()),
                Value::Null => Bytes::new(),
                other => Bytes::from(other.to_string()),
            };
            updated.body = body.clone();
        }
        Ok(updated)
    }
}

fn text_map(value: &Value) -> Option<BTreeMap<String, String>> {
    value.as_object().map(|obj| {
        obj.iter()
            .map(|(k, v)| (k.clone(), value_as_text(v)))
            .collect()
    })
}

/// Render a JSON scalar the way it would appear in a URL or header.
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parse query string, URL-decoding both keys and values
pub fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((
                urlencoding::decode(&key.replace('+', " "))
                    .map(|k| k.into_owned())
                    .unwrap_or_else(|_| key.to_string()),
                urlencoding::decode(&value.replace('+', " "))
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string()),
            ))
        })
        .collect()
}

/// Encode a decoded query back into `k=v&...` form
pub fn encode_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_body(headers: &BTreeMap<String, String>, raw: &Bytes) -> Result<Value, String> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }

    let text = std::str::from_utf8(raw).map_err(|_| "request body is not valid UTF-8")?;
    let is_json = headers
        .get("content-type")
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(text).map_err(|e| format!("request body is not valid JSON: {e}"))
    } else {
        Ok(Value::String(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_decodes() {
        let parsed = parse_query_string("name=alice%20smith&tag=a+b&flag");
        assert_eq!(parsed.get("name"), Some(&"alice smith".to_string()));
        assert_eq!(parsed.get("tag"), Some(&"a b".to_string()));
        assert_eq!(parsed.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_from_parts_decodes_json_body() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let req = HttpRequest::from_parts(
            "post",
            "/items",
            "a=1",
            headers,
            Bytes::from(r#"{"name":"pen"}"#),
        )
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, json!({"name": "pen"}));
        assert_eq!(req.query.get("a"), Some(&"1".to_string()));
    }

    #[test]
    fn test_raw_query_kept_as_received() {
        let req =
            HttpRequest::from_parts("GET", "/items", "b=2&a=1&a=3", BTreeMap::new(), Bytes::new())
                .unwrap();
        assert_eq!(req.raw_query, "b=2&a=1&a=3");
        assert_eq!(req.query.get("a"), Some(&"3".to_string()));

        let merged = req.merge_json(&json!({"query": {"z": "a b"}})).unwrap();
        assert_eq!(merged.raw_query, "z=a%20b");
    }

    #[test]
    fn test_from_parts_rejects_malformed_json() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let err = HttpRequest::from_parts("POST", "/items", "", headers, Bytes::from("{oops"))
            .unwrap_err();
        assert_eq!(err.path, "/items");
        assert!(err.reason.contains("not valid JSON"));
    }

    #[test]
    fn test_plain_body_kept_as_string() {
        let req =
            HttpRequest::from_parts("PUT", "/x", "", BTreeMap::new(), Bytes::from("hello"))
                .unwrap();
        assert_eq!(req.body, json!("hello"));
    }

    #[test]
    fn test_merge_json_keeps_missing_fields() {
        let req = HttpRequest::new("GET", "/a").with_header("X-Trace", "1");
        let merged = req.merge_json(&json!({"path": "/b"})).unwrap();
        assert_eq!(merged.path, "/b");
        assert_eq!(merged.method, "GET");
        assert_eq!(merged.header("x-trace"), Some("1"));
    }

    #[test]
    fn test_split_path_ignores_empty_segments() {
        assert_eq!(split_path("/items//1/"), vec!["items", "1"]);
        assert!(split_path("/").is_empty());
    }
}
