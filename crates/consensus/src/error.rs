//! Fatal error taxonomy for the agreement engine
//!
//! Per-peer send failures, per-message verification failures and timeouts
//! are absorbed where they occur; only conditions that make the protocol
//! impossible to run surface here.

use thiserror::Error;

use crate::types::GeneralId;

/// Errors that abort a general before or during a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("private key for general {id} unavailable: {reason}")]
    KeyUnavailable { id: GeneralId, reason: String },

    #[error("certificate for general {id} unavailable: {reason}")]
    CertUnavailable { id: GeneralId, reason: String },

    #[error("failed to bind UDP socket on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
