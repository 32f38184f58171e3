//! HTTP request/response model shared by the pipeline, hooks and the server.

pub mod request;
pub mod response;

pub use request::{encode_query, parse_query_string, split_path, value_as_text, HttpRequest, RequestParseError};
pub use response::{body_to_bytes, HttpResponse, ResponseBody, ResponseBodyBox, CONTENT_TYPE};
