//! Letter definitions and the built-in Arabic alphabet catalog

use serde::Serialize;

/// A single curriculum entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Letter {
    /// Canonical isolated glyph
    pub glyph: char,
    /// Spoken name of the letter
    pub name: &'static str,
    /// Latin phonetic hint (documentation only)
    pub sound: &'static str,
    /// Substring the speech recognizer is expected to return
    pub transcript: &'static str,
}

impl Letter {
    const fn new(
        glyph: char,
        name: &'static str,
        sound: &'static str,
        transcript: &'static str,
    ) -> Self {
        Self {
            glyph,
            name,
            sound,
            transcript,
        }
    }

    /// Check whether a recognized utterance contains this letter's transcript
    ///
    /// Plain containment: recognizers tend to pick up filler words around
    /// the target sound.
    pub fn matches_transcript(&self, heard: &str) -> bool {
        heard.contains(self.transcript)
    }
}

/// The 28 letters in alphabetical order
pub const ARABIC_ALPHABET: [Letter; 28] = [
    Letter::new('أ', "ألف", "alif", "الف"),
    Letter::new('ب', "باء", "ba", "باء"),
    Letter::new('ت', "تاء", "ta", "تاء"),
    Letter::new('ث', "ثاء", "tha", "ثاء"),
    Letter::new('ج', "جيم", "jim", "جيم"),
    Letter::new('ح', "حاء", "ha", "حاء"),
    Letter::new('خ', "خاء", "kha", "خاء"),
    Letter::new('د', "دال", "dal", "دال"),
    Letter::new('ذ', "ذال", "dhal", "ذال"),
    Letter::new('ر', "راء", "ra", "راء"),
    Letter::new('ز', "زاي", "zay", "زاي"),
    Letter::new('س', "سين", "sin", "سين"),
    Letter::new('ش', "شين", "shin", "شين"),
    Letter::new('ص', "صاد", "sad", "صاد"),
    Letter::new('ض', "ضاد", "dad", "ضاد"),
    Letter::new('ط', "طاء", "ta", "طاء"),
    Letter::new('ظ', "ظاء", "tha", "ظاء"),
    Letter::new('ع', "عين", "ain", "عين"),
    Letter::new('غ', "غين", "ghain", "غين"),
    Letter::new('ف', "فاء", "fa", "فاء"),
    Letter::new('ق', "قاف", "qaf", "قاف"),
    Letter::new('ك', "كاف", "kaf", "كاف"),
    Letter::new('ل', "لام", "lam", "لام"),
    Letter::new('م', "ميم", "meem", "ميم"),
    Letter::new('ن', "نون", "noon", "نون"),
    Letter::new('ه', "هاء", "ha", "هاء"),
    Letter::new('و', "واو", "wa", "واو"),
    Letter::new('ي', "ياء", "ya", "ياء"),
];
