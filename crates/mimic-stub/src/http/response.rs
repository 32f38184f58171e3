//! Response model and helpers for building hyper responses.

use super::request::value_as_text;
use crate::events::{ServerEvent, Subscription};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::map::Entry;
use serde_json::{json, Map, Value};
use std::convert::Infallible;

/// Body type handed to hyper; streams for event subscriptions, full otherwise.
pub type ResponseBodyBox = UnsyncBoxBody<Bytes, Infallible>;

pub const CONTENT_TYPE: &str = "content-type";

/// Response body
#[derive(Debug)]
pub enum ResponseBody {
    Bytes(Bytes),
    /// Open `text/event-stream` subscription, written until it closes
    Events(Subscription<ServerEvent>),
}

/// Response produced by the resolution pipeline
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// Lowercase names in insertion order; a name may repeat (`set-cookie`)
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Bytes(body.into()),
        }
    }

    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
        Self::new(status, json).with_header(CONTENT_TYPE, "application/json")
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, body.into()).with_header(CONTENT_TYPE, "text/plain")
    }

    /// Mountebank-style error document: `{"errors": [{"code", "message"}]}`
    pub fn error(status: u16, message: &str) -> Self {
        let code = StatusCode::from_u16(status)
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|_| status.to_string());
        Self::json(
            status,
            &ErrorResponse {
                errors: vec![ErrorDetail {
                    code,
                    message: message.to_string(),
                }],
            },
        )
    }

    pub fn events(subscription: Subscription<ServerEvent>) -> Self {
        Self {
            status: 200,
            headers: vec![
                (CONTENT_TYPE.to_string(), "text/event-stream".to_string()),
                ("cache-control".to_string(), "no-cache".to_string()),
            ],
            body: ResponseBody::Events(subscription),
        }
    }

    /// Set a header, replacing every existing value
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| *k != name);
        self.headers.push((name, value.to_string()));
        self
    }

    /// Add a header value, keeping values already present under the name
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).into_iter().next()
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Headers as a JSON object; a repeated header becomes an array.
    pub fn headers_json(&self) -> Value {
        let mut obj = Map::new();
        for (name, value) in &self.headers {
            let value = Value::String(value.clone());
            match obj.entry(name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(mut slot) => match slot.get_mut() {
                    Value::Array(values) => values.push(value),
                    existing => {
                        let first = existing.take();
                        *existing = Value::Array(vec![first, value]);
                    }
                },
            }
        }
        Value::Object(obj)
    }

    /// Body bytes, or `None` for a streaming body
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Some(bytes),
            ResponseBody::Events(_) => None,
        }
    }

    /// Body decoded as JSON when possible, as a string otherwise.
    pub fn body_value(&self) -> Value {
        match self.body_bytes() {
            Some(bytes) if bytes.is_empty() => Value::Null,
            Some(bytes) => serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
            None => Value::Null,
        }
    }

    /// Document form used by hooks and the request log.
    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status,
            "headers": self.headers_json(),
            "body": self.body_value(),
        })
    }

    /// Apply a hook's replacement document; absent fields keep current values.
    ///
    /// The document is validated before anything changes, so on error the
    /// response is untouched.
    pub fn merge_json(&mut self, doc: &Value) -> Result<(), String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| "http-response must be a JSON object".to_string())?;

        let status = match obj.get("status") {
            Some(status) => Some(
                status
                    .as_u64()
                    .and_then(|s| u16::try_from(s).ok())
                    .ok_or("status must be a number")?,
            ),
            None => None,
        };
        let headers = match obj.get("headers") {
            Some(headers) => {
                let mut list = Vec::new();
                for (k, v) in headers.as_object().ok_or("headers must be an object")? {
                    let name = k.to_ascii_lowercase();
                    match v {
                        Value::Array(values) => list.extend(
                            values.iter().map(|v| (name.clone(), value_as_text(v))),
                        ),
                        v => list.push((name, value_as_text(v))),
                    }
                }
                Some(list)
            }
            None => None,
        };

        if let Some(status) = status {
            self.status = status;
        }
        if let Some(headers) = headers {
            self.headers = headers;
        }
        if let Some(body) = obj.get("body") {
            self.body = ResponseBody::Bytes(body_to_bytes(body));
        }
        Ok(())
    }

    /// Convert into a hyper response at the transport edge.
    pub fn into_hyper(self) -> Response<ResponseBodyBox> {
        let mut builder = Response::builder().status(self.status);
        for (k, v) in &self.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        let body = match self.body {
            ResponseBody::Bytes(bytes) => Full::new(bytes).boxed_unsync(),
            ResponseBody::Events(subscription) => {
                let frames = subscription
                    .into_stream()
                    .map(|event| Ok::<_, Infallible>(Frame::data(Bytes::from(event.to_sse()))));
                StreamBody::new(frames).boxed_unsync()
            }
        };

        builder.body(body).unwrap_or_else(|_| {
            // Only reachable with an invalid header; answer with a bare 500
            let mut fallback = Response::new(
                Full::new(Bytes::from("Internal Server Error")).boxed_unsync(),
            );
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }
}

/// Serialize a JSON body the way it is sent on the wire: strings raw, the rest as JSON.
pub fn body_to_bytes(body: &Value) -> Bytes {
    match body {
        Value::Null => Bytes::new(),
        Value::String(s) => Bytes::from(s.clone()),
        other => Bytes::from(other.to_string()),
    }
}

/// Error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub errors: Vec<ErrorDetail>,
}

/// Individual error detail
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_format() {
        let resp = HttpResponse::error(400, "Test error");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        let body = resp.body_value();
        assert_eq!(body["errors"][0]["code"], "400");
        assert_eq!(body["errors"][0]["message"], "Test error");
    }

    #[test]
    fn test_body_value_falls_back_to_text() {
        let resp = HttpResponse::text(200, "plain words");
        assert_eq!(resp.body_value(), json!("plain words"));
    }

    #[test]
    fn test_merge_json_replaces_status_and_body() {
        let mut resp = HttpResponse::json(200, &json!({"a": 1}));
        resp.merge_json(&json!({"status": 201, "body": {"b": 2}}))
            .unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body_value(), json!({"b": 2}));
        assert_eq!(resp.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_merge_json_rejects_bad_status_without_changes() {
        let mut resp = HttpResponse::text(200, "kept");
        let err = resp
            .merge_json(&json!({"status": "nope", "body": "replaced"}))
            .unwrap_err();
        assert!(err.contains("status"));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body_value(), json!("kept"));
    }

    #[test]
    fn test_repeated_headers_survive_json_and_hyper() {
        let mut resp = HttpResponse::text(200, "ok");
        resp.append_header("Set-Cookie", "a=1");
        resp.append_header("set-cookie", "b=2");
        assert_eq!(resp.header_values("set-cookie"), vec!["a=1", "b=2"]);
        assert_eq!(resp.to_json()["headers"]["set-cookie"], json!(["a=1", "b=2"]));

        let mut copy = HttpResponse::new(200, "");
        copy.merge_json(&resp.to_json()).unwrap();
        assert_eq!(copy.header_values("set-cookie"), vec!["a=1", "b=2"]);

        let hyper = resp.with_header("content-type", "text/csv").into_hyper();
        let cookies: Vec<_> = hyper.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(hyper.headers().get_all("content-type").iter().count(), 1);
    }

    #[test]
    fn test_into_hyper_copies_headers() {
        let resp = HttpResponse::text(202, "ok").into_hyper();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/plain");
    }
}
