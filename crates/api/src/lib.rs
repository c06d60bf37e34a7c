//! HTTP API: router, request handling and service wiring.

pub mod app;
pub mod context;
pub mod middleware;
