//! Out-of-band event broadcasting.

mod buffer;
mod sse;

pub use buffer::{EventBuffer, Subscription};
pub use sse::{EventError, EventStreamHandler, ServerEvent};
