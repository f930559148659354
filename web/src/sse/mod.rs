//! Streaming HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the streaming endpoint.
//! Sessions, fan-out and subscriptions live in the `sse` crate.

pub mod handler;
