//! Abuse guards applied before a connection reaches the session layer.

pub mod rate_limit;

pub use rate_limit::ConnectionRateLimiter;
