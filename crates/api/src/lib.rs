//! HTTP API: router, handlers, and request/response mapping over the engine services.

pub mod app;
pub mod middleware;
