//! Events module for the learning flow
//!
//! Everything the front end needs to render the lesson, and every request
//! the daemon makes of the front end's speech capabilities, is published
//! as a `TutorEvent` on a broadcast channel.

use serde::{Deserialize, Serialize};

use crate::state::LearningStage;
use crate::verify::Verdict;
use crate::voice::Capability;

/// Events emitted by the stage controller and its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TutorEvent {
    /// A stage was entered for the given letter
    StageEntered {
        letter_index: usize,
        glyph: char,
        stage: LearningStage,
    },

    /// Shuffled options for the recognition stage
    ChoicesPresented { options: Vec<char> },

    /// Front end should speak `text` and report back with `id`
    SpeakRequested {
        id: u64,
        text: String,
        locale: String,
        rate: f32,
    },

    /// All in-flight speech was cancelled
    AudioStopped,

    /// Front end should capture one utterance and report back with `id`
    CaptureRequested { id: u64, locale: String },

    /// Microphone is live
    CaptureStarted,

    /// Microphone released
    CaptureStopped,

    /// A transcript was captured and validated
    TranscriptCaptured { transcript: String, matched: bool },

    /// Pointer shown at viewport coordinates over `target`
    CueShown { target: String, x: f32, y: f32 },

    /// Pointer hidden after its display window
    CueHidden,

    /// Drawing surface was wiped
    CanvasCleared,

    /// A drawing was submitted for verification
    VerificationRequested { glyph: char },

    /// Verification finished (after policy was applied)
    VerificationSettled { verdict: Verdict },

    /// A speech capability is missing; sent once per capability
    CapabilityUnavailable { capability: Capability },
}

impl std::fmt::Display for TutorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TutorEvent::StageEntered {
                letter_index,
                stage,
                ..
            } => write!(f, "STAGE_ENTERED ({} #{})", stage, letter_index),
            TutorEvent::ChoicesPresented { options } => {
                write!(f, "CHOICES_PRESENTED ({} options)", options.len())
            }
            TutorEvent::SpeakRequested { id, locale, .. } => {
                write!(f, "SPEAK_REQUESTED (#{} {})", id, locale)
            }
            TutorEvent::AudioStopped => write!(f, "AUDIO_STOPPED"),
            TutorEvent::CaptureRequested { id, locale } => {
                write!(f, "CAPTURE_REQUESTED (#{} {})", id, locale)
            }
            TutorEvent::CaptureStarted => write!(f, "CAPTURE_STARTED"),
            TutorEvent::CaptureStopped => write!(f, "CAPTURE_STOPPED"),
            TutorEvent::TranscriptCaptured { matched, .. } => {
                write!(f, "TRANSCRIPT_CAPTURED (matched={})", matched)
            }
            TutorEvent::CueShown { target, .. } => write!(f, "CUE_SHOWN ({})", target),
            TutorEvent::CueHidden => write!(f, "CUE_HIDDEN"),
            TutorEvent::CanvasCleared => write!(f, "CANVAS_CLEARED"),
            TutorEvent::VerificationRequested { .. } => write!(f, "VERIFICATION_REQUESTED"),
            TutorEvent::VerificationSettled { verdict } => {
                write!(f, "VERIFICATION_SETTLED ({:?})", verdict)
            }
            TutorEvent::CapabilityUnavailable { capability } => {
                write!(f, "CAPABILITY_UNAVAILABLE ({:?})", capability)
            }
        }
    }
}
