//! HTTP client for the verification service
//!
//! `POST <endpoint>` with a multipart body: `text` is the target glyph,
//! `image` is the PNG drawing. A 2xx answer is JSON with an `is_match`
//! boolean.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::VerificationConfig;

use super::{HandwritingVerifier, Judgment, VerifyError};

/// Literal negative answer the service's model is prompted to produce
const NEGATIVE_ANSWER: &str = "لا";

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    is_match: Option<bool>,
    #[serde(default)]
    result: Option<String>,
}

/// Verifier backed by the remote HTTP service
pub struct HttpVerifier {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(config: &VerificationConfig) -> Result<Self, VerifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            http_client,
        })
    }

    fn judge(body: &[u8]) -> Result<Judgment, VerifyError> {
        let response: VerifyResponse =
            serde_json::from_slice(body).map_err(|e| VerifyError::Malformed(e.to_string()))?;

        let is_match = response.is_match.ok_or(VerifyError::Ambiguous)?;

        if !is_match && response.result.as_deref() == Some(NEGATIVE_ANSWER) {
            // `is_match` is authoritative; the literal answer is never a pass
            warn!(result = NEGATIVE_ANSWER, "negative literal answer treated as mismatch");
        }

        Ok(Judgment { is_match })
    }
}

#[async_trait]
impl HandwritingVerifier for HttpVerifier {
    async fn verify(&self, glyph: char, png: Vec<u8>) -> Result<Judgment, VerifyError> {
        info!(%glyph, bytes = png.len(), endpoint = %self.endpoint, "verifying drawing");

        let image_part = reqwest::multipart::Part::bytes(png)
            .file_name("drawing.png")
            .mime_str("image/png")?;

        let form = reqwest::multipart::Form::new()
            .text("text", glyph.to_string())
            .part("image", image_part);

        let response = self
            .http_client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let judgment = Self::judge(&body)?;
        debug!(is_match = judgment.is_match, "verification answered");
        Ok(judgment)
    }
}
