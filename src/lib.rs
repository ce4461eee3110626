//! Floodgate - In-Memory Rate Limiting
//!
//! This crate implements fixed-window rate limiting for HTTP APIs. Counters
//! live in process memory, keyed by rule and client identity, so a
//! deployment of several instances enforces each limit per instance.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
