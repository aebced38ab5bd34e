//! Sequential voice prompt queue
//!
//! A prompt sequence is a list of steps played strictly in order: each
//! utterance must report playback-finished before the next step starts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::VoiceConfig;

use super::{SpeechError, SpeechSynthesizer, Utterance};

/// One unit of work in a prompt sequence
#[derive(Debug, Clone, PartialEq)]
pub enum PromptStep {
    /// Guidance in the conversational locale
    Say(String),
    /// Isolated letter sound in the reference locale
    Pronounce(char),
    /// Silence between prompts
    Pause(Duration),
}

/// Plays prompt sequences through a speech synthesizer
#[derive(Clone)]
pub struct VoicePrompter {
    synth: Arc<dyn SpeechSynthesizer>,
    voice: VoiceConfig,
}

impl VoicePrompter {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, voice: VoiceConfig) -> Self {
        Self { synth, voice }
    }

    /// Play every step in order
    ///
    /// Stops at the first failing step; the remaining steps are dropped.
    pub async fn play(&self, steps: &[PromptStep]) -> Result<(), SpeechError> {
        for step in steps {
            let result = match step {
                PromptStep::Say(text) => {
                    debug!(%text, "guide prompt");
                    self.synth
                        .speak(Utterance::new(
                            text.as_str(),
                            &self.voice.guide_locale,
                            self.voice.guide_rate,
                        ))
                        .await
                }
                PromptStep::Pronounce(glyph) => {
                    debug!(%glyph, "letter sound");
                    self.synth
                        .speak(Utterance::new(
                            glyph.to_string(),
                            &self.voice.letter_locale,
                            self.voice.letter_rate,
                        ))
                        .await
                }
                PromptStep::Pause(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                }
            };

            if let Err(e) = result {
                warn!(?e, ?step, "prompt sequence interrupted");
                return Err(e);
            }
        }

        Ok(())
    }
}
