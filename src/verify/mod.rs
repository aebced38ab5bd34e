//! Handwriting verification
//!
//! A remote service judges whether a drawing matches the target glyph.
//! `VerificationPolicy` turns the raw outcome into a verdict, including
//! what to do when the service can't give an answer.

mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub use client::HttpVerifier;

/// The service's answer for one drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Judgment {
    pub is_match: bool,
}

/// Errors from the verification service
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("verification request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("verification service returned status {0}")]
    Status(u16),

    #[error("malformed verification response: {0}")]
    Malformed(String),

    #[error("verification response carries no match indicator")]
    Ambiguous,
}

/// Remote judgment of a drawn glyph
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HandwritingVerifier: Send + Sync {
    /// Judge whether `png` shows `glyph`
    async fn verify(&self, glyph: char, png: Vec<u8>) -> Result<Judgment, VerifyError>;
}

/// Final decision on a drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
}

/// How verification outcomes become verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    /// Accept the drawing when the service fails to answer, so the learner
    /// is never blocked by backend trouble
    pub fail_open: bool,
}

impl VerificationPolicy {
    pub fn resolve(&self, outcome: Result<Judgment, VerifyError>) -> Verdict {
        match outcome {
            Ok(Judgment { is_match: true }) => Verdict::Accepted,
            Ok(Judgment { is_match: false }) => Verdict::Rejected,
            Err(e) if self.fail_open => {
                warn!(error = %e, "verification unavailable, failing open");
                Verdict::Accepted
            }
            Err(e) => {
                info!(error = %e, "verification unavailable, rejecting drawing");
                Verdict::Rejected
            }
        }
    }
}
