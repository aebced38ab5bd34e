//! State machine module for the letter learning flow
//!
//! Provides an explicit state machine with five stages per letter:
//! - Listen: hear the letter's reference pronunciation
//! - Repeat: say it back, validated by speech recognition
//! - Recognize: pick it out of four shuffled glyphs
//! - Write: draw it, judged by the verification service
//! - Completed: reset the letter or advance to the next one

mod machine;
mod session;

pub use machine::{Services, StageController};
pub use session::{LearnerAction, LearningStage};
