//! Session state and learner inputs

use serde::{Deserialize, Serialize};

use crate::guidance::Layout;

/// The five stages of learning one letter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningStage {
    /// Hear the letter
    #[default]
    Listen,
    /// Say the letter into the microphone
    Repeat,
    /// Pick the letter out of a set of glyphs
    Recognize,
    /// Draw the letter
    Write,
    /// Letter learned, waiting for reset or advance
    Completed,
}

impl std::fmt::Display for LearningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LearningStage::Listen => write!(f, "Listen"),
            LearningStage::Repeat => write!(f, "Repeat"),
            LearningStage::Recognize => write!(f, "Recognize"),
            LearningStage::Write => write!(f, "Write"),
            LearningStage::Completed => write!(f, "Completed"),
        }
    }
}

/// Mutable state of the current lesson
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Index into the curriculum, always in bounds
    pub letter_index: usize,
    pub stage: LearningStage,
    /// Last captured transcript, cleared when a new capture starts
    pub transcript: Option<String>,
    /// Microphone is live
    pub capturing: bool,
    /// Options shown in the current Recognize stage
    pub choices: Vec<char>,
}

/// Inputs from the learner (or the page hosting the lesson)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LearnerAction {
    /// Lesson page shown: restart the current letter from Listen
    Open,
    /// Listen control pressed
    PlayLetter,
    /// Microphone control pressed
    StartCapture,
    /// A recognition option was picked
    SelectGlyph { glyph: char },
    PenDown { x: f32, y: f32 },
    PenMove { x: f32, y: f32 },
    PenUp,
    ClearCanvas,
    /// Learn the same letter again
    ResetLetter,
    /// Move on to the next letter
    Advance,
    /// Positions of the rendered controls changed
    Layout { regions: Layout },
}
