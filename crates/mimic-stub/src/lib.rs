// Library exports for the binary, integration tests and benchmarks

pub mod admin_api;
pub mod config;
pub mod contract;
pub mod engine;
pub mod events;
pub mod expectation;
pub mod hooks;
pub mod http;
pub mod log;
pub mod pattern;
pub mod pipeline;
pub mod server;

pub use config::MimicConfig;
pub use engine::StubEngine;
pub use server::StubServer;
