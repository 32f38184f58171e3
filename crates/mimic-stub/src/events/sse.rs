//! Server-sent events: wire encoding and the subscription endpoint.

use super::buffer::EventBuffer;
use crate::http::{HttpRequest, HttpResponse};
use crate::pipeline::RequestHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error(transparent)]
    Document(#[from] serde_json::Error),
    #[error("{0} must be a single line")]
    LineBreak(&'static str),
}

/// `POST /sse-expectations` body
#[derive(Debug, Deserialize)]
struct EventDocument {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    event: Option<String>,
    data: Value,
}

impl ServerEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Parse `{"id"?, "event"?, "data"}`; non-string data is sent as JSON text.
    ///
    /// `id` and `event` may not contain line breaks; only `data` spans lines.
    pub fn from_document(doc: Value) -> Result<Self, EventError> {
        let doc: EventDocument = serde_json::from_value(doc)?;
        let id = doc.id.as_ref().map(crate::http::value_as_text);
        if id.as_deref().is_some_and(has_line_break) {
            return Err(EventError::LineBreak("id"));
        }
        if doc.event.as_deref().is_some_and(has_line_break) {
            return Err(EventError::LineBreak("event"));
        }
        Ok(Self {
            id,
            event: doc.event,
            data: match doc.data {
                Value::String(s) => s,
                other => other.to_string(),
            },
        })
    }

    /// One `text/event-stream` block, blank-line terminated.
    pub fn to_sse(&self) -> String {
        let mut out = String::new();
        // A field value never ends its line early
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.extend(id.chars().filter(|c| !matches!(c, '\r' | '\n')));
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.extend(event.chars().filter(|c| !matches!(c, '\r' | '\n')));
            out.push('\n');
        }
        // CRLF, CR and LF all end an SSE line
        for line in self.data.replace("\r\n", "\n").split(['\r', '\n']) {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// Serves `GET <path>` as a live event stream
#[derive(Debug)]
pub struct EventStreamHandler {
    path: String,
    buffer: EventBuffer<ServerEvent>,
}

impl EventStreamHandler {
    pub fn new(path: impl Into<String>, buffer: EventBuffer<ServerEvent>) -> Self {
        Self {
            path: path.into(),
            buffer,
        }
    }
}

#[async_trait]
impl RequestHandler for EventStreamHandler {
    fn name(&self) -> &str {
        "event-stream"
    }

    async fn handle(&self, request: &HttpRequest) -> Option<HttpResponse> {
        if request.method != "GET" || request.path != self.path {
            return None;
        }
        let subscription = self.buffer.subscribe();
        info!(
            subscribers = self.buffer.subscriber_count(),
            "Event stream subscriber connected"
        );
        Some(HttpResponse::events(subscription))
    }
}
