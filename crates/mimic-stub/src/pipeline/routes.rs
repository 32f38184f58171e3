use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;

/// A pluggable route tried after introspection and before admin mutations.
///
/// Returning `None` passes the request on to the next route.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, request: &HttpRequest) -> Option<HttpResponse>;
}
