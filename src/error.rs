//! Error types for convergence waiting
//!
//! A polling session distinguishes the collaborator's failures from its own:
//! remote API errors are either transient (safe to wait out) or fatal, and
//! running out the deadline is a separate terminal outcome that keeps the
//! last diagnostic observed before time expired.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while waiting for remote state to converge
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error surfaced by the remote collaborator
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The polling deadline elapsed before the condition was met
    #[error("timed out after {timeout:?} waiting for {condition}: {}", .last_reason.as_deref().unwrap_or("condition never reported a reason"))]
    DeadlineExceeded {
        /// Description of the condition that was awaited
        condition: String,
        /// The deadline that elapsed
        timeout: Duration,
        /// The most recent "not yet" diagnostic observed before expiry
        last_reason: Option<String>,
    },

    /// Client construction error (kubeconfig loading, connection setup)
    #[error("client error: {message}")]
    Client {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a deadline-exceeded error for the given condition
    pub fn deadline_exceeded(
        condition: impl Into<String>,
        timeout: Duration,
        last_reason: Option<String>,
    ) -> Self {
        Self::DeadlineExceeded {
            condition: condition.into(),
            timeout,
            last_reason,
        }
    }

    /// Create a client construction error with the given message
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Remote API errors are classified with [`is_retryable_api_error`].
    /// Deadline expiry and client construction failures are terminal: waiting
    /// longer cannot fix them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => is_retryable_api_error(source),
            Error::DeadlineExceeded { .. } => false,
            Error::Client { .. } => false,
        }
    }

    /// Check if this error is the API's not-found answer
    ///
    /// Not-found is the expected terminal state when waiting out a deletion,
    /// so callers need to tell it apart from other fatal responses.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(resp)
            } if resp.code == 404
        )
    }
}

/// Classify a raw Kubernetes API error as transient or fatal.
///
/// Server-side throttling (429) and 5xx responses resolve on their own, as do
/// transport-level failures that never produced an HTTP status (connection
/// refused, read timeout). Every other 4xx response means the request itself
/// is wrong and repeating it verbatim cannot succeed.
pub fn is_retryable_api_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => resp.code == 429 || resp.code >= 500,
        _ => true,
    }
}
