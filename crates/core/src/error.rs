//! Structured error taxonomy shared by every server component.
//!
//! Internal plumbing (store access, filesystem calls) is free to use
//! `anyhow`; at module boundaries — Indexer, Write engine, Webhook engine,
//! façade — errors are converted into one of these variants so nothing below
//! the façade leaks a raw `rusqlite::Error` or `std::io::Error` outward.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VibeError {
    #[error("{0}")]
    InputInvalid(String),

    #[error("{0}")]
    AuthorizationDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    IoTransient(String),

    #[error("{0}")]
    DeliveryFailed(String),

    #[error("{0}")]
    FatalInit(String),
}

impl VibeError {
    pub fn input_invalid(msg: impl Into<String>) -> Self {
        Self::InputInvalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn authorization_denied(msg: impl Into<String>) -> Self {
        Self::AuthorizationDenied(msg.into())
    }

    /// Machine-readable discriminant for callers that need to branch on kind
    /// without matching the full enum (e.g. the façade's result records).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputInvalid(_) => "input_invalid",
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::IoTransient(_) => "io_transient",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::FatalInit(_) => "fatal_init",
        }
    }
}

pub type VibeResult<T> = Result<T, VibeError>;
