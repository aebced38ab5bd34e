//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::TutorEvent;
use crate::state::{LearnerAction, LearningStage};
use crate::voice::{Recognition, SpeechError};

/// Requests from the front end to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request the current lesson status
    GetStatus,

    /// Subscribe to tutor events and take over the speech capabilities
    Subscribe,

    /// Forward a learner action to the stage controller
    Action { action: LearnerAction },

    /// Speech request `id` finished playing
    SpeechFinished { id: u64 },

    /// Speech request `id` could not be played
    SpeechFailed {
        id: u64,
        #[serde(default)]
        unavailable: bool,
    },

    /// Capture request `id` produced a result; `None` means nothing was recognized
    RecognitionResult { id: u64, transcript: Option<String> },

    /// Capture request `id` failed
    RecognitionFailed {
        id: u64,
        #[serde(default)]
        unavailable: bool,
    },

    /// Stop all audio in flight
    StopAudio,
}

/// Responses from the daemon to the front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current lesson status
    Status(TutorStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Request was queued or applied
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to front end (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Tutor event occurred
    Event { event: TutorEvent },
}

/// Snapshot of the lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorStatus {
    /// Daemon version
    pub version: String,

    /// Index of the letter being learned
    pub letter_index: usize,

    /// Letters in the curriculum
    pub total_letters: usize,

    /// Glyph of the letter being learned
    pub glyph: char,

    /// Current stage
    pub stage: LearningStage,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl TutorStatus {
    pub fn new(total_letters: usize, glyph: char) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            letter_index: 0,
            total_letters,
            glyph,
            stage: LearningStage::default(),
            uptime_secs: 0,
        }
    }
}

/// Map a failure report to the speech error the controller sees
pub(crate) fn speech_failure(unavailable: bool, what: &str) -> SpeechError {
    if unavailable {
        SpeechError::Unavailable
    } else {
        SpeechError::Failed(format!("front end reported {what} failure"))
    }
}

pub(crate) fn recognition_outcome(transcript: Option<String>) -> Recognition {
    match transcript {
        Some(text) if !text.trim().is_empty() => Recognition::Transcript(text),
        _ => Recognition::NoMatch,
    }
}
