//! Curriculum module
//!
//! Ordered letter catalog plus the distractor selection used by the
//! recognition stage. A letter's index in the catalog is its only identity.

mod letters;

use rand::seq::SliceRandom;
use rand::Rng;

pub use letters::{Letter, ARABIC_ALPHABET};

/// Number of options presented in the recognition stage
pub const CHOICE_COUNT: usize = 4;

/// Immutable, ordered catalog of letters
#[derive(Debug, Clone)]
pub struct Curriculum {
    letters: Vec<Letter>,
}

impl Curriculum {
    /// Build a curriculum from an ordered list of letters
    ///
    /// Returns `None` for an empty list, since every session needs at
    /// least one letter to point at.
    #[cfg(test)]
    pub fn new(letters: Vec<Letter>) -> Option<Self> {
        if letters.is_empty() {
            None
        } else {
            Some(Self { letters })
        }
    }

    /// The full Arabic alphabet
    pub fn arabic() -> Self {
        Self {
            letters: ARABIC_ALPHABET.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.letters.len()
    }

    pub fn last_index(&self) -> usize {
        self.letters.len() - 1
    }

    /// Get the letter at `index`, if in bounds
    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&Letter> {
        self.letters.get(index)
    }

    /// Letter at `index`
    ///
    /// Panics when `index` is out of bounds; callers keep their cursor
    /// within `0..len()`.
    pub fn letter(&self, index: usize) -> Letter {
        self.letters[index]
    }

    /// Whether a letter exists after `index`
    pub fn has_next(&self, index: usize) -> bool {
        index < self.last_index()
    }

    /// Pick the recognition options for the letter at `index`
    ///
    /// Takes the letter itself and the following three in catalog order,
    /// wrapping past the end, then shuffles them. Catalogs shorter than
    /// four letters necessarily repeat glyphs.
    pub fn choices<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Vec<char> {
        let len = self.letters.len();
        let mut options: Vec<char> = (0..CHOICE_COUNT)
            .map(|offset| self.letters[(index + offset) % len].glyph)
            .collect();
        options.shuffle(rng);
        options
    }
}
