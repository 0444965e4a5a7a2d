//! Middleware

pub mod metrics;
