//! Request resolution pipeline.
//!
//! Every request walks an ordered list of routes; the first one that answers
//! wins:
//!
//! 1. introspection endpoints under the admin prefix
//! 2. pluggable [`RequestHandler`]s (the event stream is one)
//! 3. admin mutations
//! 4. the expectation store
//! 5. pass-through, strict rejection or the contract fallback

mod facts;
mod fallback;
mod handler;
mod passthrough;
mod post_process;
mod routes;

pub use facts::{Facts, FactsGuard};
pub use fallback::{embed_in_first_string, generate_fallback, GENERATED_HEADER};
pub use handler::handle_request;
pub use passthrough::{PassThrough, PassThroughError, PROXIED_HEADER};
pub use post_process::{apply_default_content_type, PostStep, POST_PROCESS_CHAIN};
pub use routes::RequestHandler;

#[cfg(test)]
mod tests;
