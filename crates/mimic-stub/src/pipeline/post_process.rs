//! Ordered post-processing applied to every traffic response.

use crate::hooks::HookStage;
use crate::http::{HttpRequest, HttpResponse, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStep {
    ResponseHook,
    DefaultContentType,
    Delay,
}

pub const POST_PROCESS_CHAIN: [PostStep; 3] = [
    PostStep::ResponseHook,
    PostStep::DefaultContentType,
    PostStep::Delay,
];

/// What the chain needs to know about the request being answered
pub(crate) struct PostProcess<'a> {
    pub request: &'a HttpRequest,
    pub response_hook: Option<&'a HookStage>,
    /// Per-expectation and global delay, summed
    pub delay: Duration,
}

impl PostProcess<'_> {
    pub async fn run(&self, mut response: HttpResponse) -> HttpResponse {
        for step in POST_PROCESS_CHAIN {
            response = self.apply(step, response).await;
        }
        response
    }

    async fn apply(&self, step: PostStep, response: HttpResponse) -> HttpResponse {
        match step {
            PostStep::ResponseHook => match self.response_hook {
                Some(stage) => match stage.apply_response(self.request, response).await {
                    Ok(response) => response,
                    Err(e) => {
                        error!(error = %e, "Response hook failed");
                        e.to_response()
                    }
                },
                None => response,
            },
            PostStep::DefaultContentType => apply_default_content_type(response),
            PostStep::Delay => {
                if !self.delay.is_zero() {
                    debug!(delay_ms = self.delay.as_millis() as u64, "Delaying response");
                    tokio::time::sleep(self.delay).await;
                }
                response
            }
        }
    }
}

/// Add a `Content-Type` to a non-empty body that lacks one.
pub fn apply_default_content_type(response: HttpResponse) -> HttpResponse {
    if response.header(CONTENT_TYPE).is_some() {
        return response;
    }
    let content_type = match response.body_bytes() {
        None => return response,
        Some(bytes) if bytes.is_empty() => return response,
        Some(bytes) => match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) if value.is_object() || value.is_array() => "application/json",
            _ => "text/plain",
        },
    };
    response.with_header(CONTENT_TYPE, content_type)
}
