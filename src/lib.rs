//! Convergence waiting for eventually-consistent cloud infrastructure state
//!
//! Cloud infrastructure converges asynchronously: a Service exposed through a
//! cloud load balancer gets its external address seconds or minutes after the
//! object is accepted, and the API serving that state may fail transiently
//! along the way. This crate provides the polling primitive for detecting
//! such convergence, plus the Service-level wait operations built on it.
//!
//! # Modules
//!
//! - [`poll`] - Fixed-interval condition polling with a deadline
//! - [`service`] - Load-balancer exposure and deletion waits for Services
//! - [`source`] - Narrow seam over the remote Service API
//! - [`error`] - Error types and transient-vs-fatal classification

#![deny(missing_docs)]

pub mod error;
pub mod poll;
pub mod service;
pub mod source;

pub use error::Error;
pub use poll::{poll_immediate, PollConfig, Probe};
pub use source::{KubeServices, ServiceSource};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
