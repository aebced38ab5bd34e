//! Voice module: speech synthesis and recognition boundaries
//!
//! The tutor never produces or captures audio itself. It talks to two
//! capabilities through traits:
//! - `SpeechSynthesizer`: speak an utterance, resolve when playback finishes
//! - `SpeechRecognizer`: capture a single utterance, return the best transcript
//!
//! `VoicePrompter` chains prompts so they never overlap, and `ClientRelay`
//! implements both traits by delegating to the connected front end.

pub mod messages;
mod prompter;
mod relay;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use prompter::{PromptStep, VoicePrompter};
pub use relay::{ClientRelay, ListenerGuard};

/// External capabilities the tutor depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SpeechSynthesis,
    SpeechRecognition,
}

/// A single thing to say
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// BCP 47 tag, e.g. `ar-MA`
    pub locale: String,
    /// Playback rate, 1.0 is normal speed
    pub rate: f32,
}

impl Utterance {
    pub fn new(text: impl Into<String>, locale: impl Into<String>, rate: f32) -> Self {
        Self {
            text: text.into(),
            locale: locale.into(),
            rate,
        }
    }
}

/// Outcome of one recognition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// Best transcript for the utterance
    Transcript(String),
    /// Something was heard but nothing was recognized
    NoMatch,
}

/// Errors at the speech boundaries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    #[error("speech capability unavailable")]
    Unavailable,

    #[error("speech cancelled")]
    Cancelled,

    #[error("speech failed: {0}")]
    Failed(String),
}

/// Text-to-speech playback
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak and resolve once playback has finished
    async fn speak(&self, utterance: Utterance) -> Result<(), SpeechError>;

    /// Cancel any playback in flight
    fn stop(&self);
}

/// Speech-to-text capture of a single utterance
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, locale: &str) -> Result<Recognition, SpeechError>;
}
