//! Out-of-process hooks that rewrite requests and responses.
//!
//! A hook receives a JSON document and returns a replacement:
//!
//! - request hook: `{"http-request": {...}}` in, `{"http-request": {...}}` out
//! - response hook: `{"http-request", "http-response"}` in, `{"http-response"}` out
//!
//! Failures are handled per stage: fail-open keeps the original, fail-closed
//! returns the error to the caller.

mod process;

pub use process::ProcessHook;

use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub const REQUEST_KEY: &str = "http-request";
pub const RESPONSE_KEY: &str = "http-response";

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to run hook '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("hook '{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    #[error("hook '{command}' exited with code {code:?}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("hook '{command}' returned malformed output: {reason}")]
    MalformedOutput {
        command: String,
        reason: String,
        stdout: String,
    },
}

impl HookError {
    /// Error document returned to the client when a hook fails closed
    pub fn to_response(&self) -> HttpResponse {
        let mut detail = json!({
            "errors": [{"code": "500", "message": self.to_string()}],
        });
        match self {
            HookError::NonZeroExit {
                code,
                stdout,
                stderr,
                ..
            } => {
                detail["exitCode"] = json!(code);
                detail["stdout"] = json!(stdout);
                detail["stderr"] = json!(stderr);
            }
            HookError::MalformedOutput { stdout, .. } => {
                detail["stdout"] = json!(stdout);
            }
            HookError::Spawn { .. } | HookError::Timeout { .. } => {}
        }
        HttpResponse::json(500, &detail)
    }
}

/// A single document-rewriting capability
#[async_trait]
pub trait Hook: Send + Sync {
    async fn invoke(&self, doc: Value) -> Result<Value, HookError>;

    /// Identifies the hook in logs and errors
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Log the failure and keep the original document
    #[default]
    Open,
    /// Surface the failure
    Closed,
}

/// A hook plus its failure policy
#[derive(Clone)]
pub struct HookStage {
    hook: Arc<dyn Hook>,
    fail_mode: FailMode,
}

impl std::fmt::Debug for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookStage")
            .field("hook", &self.hook.describe())
            .field("fail_mode", &self.fail_mode)
            .finish()
    }
}

impl HookStage {
    pub fn new(hook: Arc<dyn Hook>, fail_mode: FailMode) -> Self {
        Self { hook, fail_mode }
    }

    /// Run the request hook.
    pub async fn apply_request(&self, request: HttpRequest) -> Result<HttpRequest, HookError> {
        let doc = json!({ REQUEST_KEY: request.to_json() });
        let result = self
            .invoke_for(doc, REQUEST_KEY)
            .await
            .and_then(|replacement| {
                request
                    .merge_json(&replacement)
                    .map_err(|reason| self.malformed(reason, &replacement))
            });

        match result {
            Ok(updated) => Ok(updated),
            Err(e) => self.recover(e).map(|()| request),
        }
    }

    /// Run the response hook. Streaming responses pass through untouched.
    pub async fn apply_response(
        &self,
        request: &HttpRequest,
        mut response: HttpResponse,
    ) -> Result<HttpResponse, HookError> {
        if response.body_bytes().is_none() {
            return Ok(response);
        }

        let doc = json!({
            REQUEST_KEY: request.to_json(),
            RESPONSE_KEY: response.to_json(),
        });
        let result = match self.invoke_for(doc, RESPONSE_KEY).await {
            Ok(replacement) => response
                .merge_json(&replacement)
                .map_err(|reason| self.malformed(reason, &replacement)),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(response),
            Err(e) => self.recover(e).map(|()| response),
        }
    }

    async fn invoke_for(&self, doc: Value, key: &str) -> Result<Value, HookError> {
        let output = self.hook.invoke(doc).await?;
        output
            .get(key)
            .cloned()
            .ok_or_else(|| self.malformed(format!("output has no \"{key}\" field"), &output))
    }

    fn malformed(&self, reason: String, output: &Value) -> HookError {
        HookError::MalformedOutput {
            command: self.hook.describe(),
            reason,
            stdout: output.to_string(),
        }
    }

    fn recover(&self, error: HookError) -> Result<(), HookError> {
        match self.fail_mode {
            FailMode::Open => {
                warn!(error = %error, "Hook failed, keeping original");
                Ok(())
            }
            FailMode::Closed => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-process hook for exercising stage policies
    struct FnHook<F>(F);

    #[async_trait]
    impl<F> Hook for FnHook<F>
    where
        F: Fn(Value) -> Result<Value, HookError> + Send + Sync,
    {
        async fn invoke(&self, doc: Value) -> Result<Value, HookError> {
            (self.0)(doc)
        }

        fn describe(&self) -> String {
            "fn".to_string()
        }
    }

    fn failing() -> Arc<dyn Hook> {
        Arc::new(FnHook(|_: Value| -> Result<Value, HookError> {
            Err(HookError::NonZeroExit {
                command: "fn".into(),
                code: Some(3),
                stdout: "out".into(),
                stderr: "boom".into(),
            })
        }))
    }

    #[tokio::test]
    async fn test_request_hook_rewrites_path() {
        let hook = Arc::new(FnHook(|doc: Value| -> Result<Value, HookError> {
            let mut req = doc[REQUEST_KEY].clone();
            req["path"] = json!("/rewritten");
            Ok(json!({ REQUEST_KEY: req }))
        }));
        let stage = HookStage::new(hook, FailMode::Closed);
        let updated = stage
            .apply_request(HttpRequest::new("GET", "/original"))
            .await
            .unwrap();
        assert_eq!(updated.path, "/rewritten");
    }

    #[tokio::test]
    async fn test_fail_open_keeps_original() {
        let stage = HookStage::new(failing(), FailMode::Open);
        let req = stage
            .apply_request(HttpRequest::new("GET", "/original"))
            .await
            .unwrap();
        assert_eq!(req.path, "/original");

        let resp = stage
            .apply_response(&req, HttpResponse::text(200, "body"))
            .await
            .unwrap();
        assert_eq!(resp.body_value(), json!("body"));
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_exit_details() {
        let stage = HookStage::new(failing(), FailMode::Closed);
        let err = stage
            .apply_request(HttpRequest::new("GET", "/x"))
            .await
            .unwrap_err();
        let response = err.to_response();
        assert_eq!(response.status, 500);
        let body = response.body_value();
        assert_eq!(body["exitCode"], json!(3));
        assert_eq!(body["stderr"], json!("boom"));
    }

    #[tokio::test]
    async fn test_missing_key_is_malformed() {
        let hook = FnHook(|_: Value| -> Result<Value, HookError> { Ok(json!({})) });
        let stage = HookStage::new(Arc::new(hook), FailMode::Closed);
        let err = stage
            .apply_response(&HttpRequest::new("GET", "/"), HttpResponse::text(200, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::MalformedOutput { .. }));
    }
}
