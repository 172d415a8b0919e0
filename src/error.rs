//! Error taxonomy of the negotiation engine.
//!
//! [`ConfigurationError`] is raised only while building a [`NegotiationController`](crate::NegotiationController).
//! [`LoginFailure`] and [`NegotiationFailure`] are terminal for a single attempt and surface together as
//! [`AuthenticationError`]. A continuation is not an error and has no variant here.
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::ContextState;

/// Fatal startup error. A controller is never built when one of these occurs.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("keytab file is not available at {}", path.display())]
    KeytabNotFound { path: PathBuf },

    #[error("multiple {collaborator} instances registered")]
    DuplicateRegistration { collaborator: &'static str },

    #[error("credential backend rejected the configuration: {0}")]
    Backend(String),
}

/// Acquiring the service credential failed.
#[derive(Debug, Error)]
pub enum LoginFailure {
    #[error("login for {principal} rejected: {reason}")]
    Rejected { principal: String, reason: String },

    #[error("no service subject available for {principal}")]
    NoSubject { principal: String },

    #[error("login not supported: {0}")]
    Unsupported(String),
}

/// The token exchange could not produce an identity.
#[derive(Debug, Error)]
pub enum NegotiationFailure {
    #[error("negotiation token is not valid base64")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("service name {name} is invalid: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("mechanism rejected the token: {0}")]
    Rejected(String),

    #[error("established context has no source name")]
    MissingSourceName,

    #[error("context is not established but no continuation token was produced")]
    NoContinuationToken,

    #[error("context is already {0} and accepts no further tokens")]
    ContextTerminated(ContextState),

    #[error("negotiation worker failed: {0}")]
    Worker(String),
}

/// Why an attempt could not complete authentication.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error(transparent)]
    Login(#[from] LoginFailure),

    #[error(transparent)]
    Negotiation(#[from] NegotiationFailure),
}
