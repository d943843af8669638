//! Trigram shingle similarity.
//!
//! Jaccard similarity over sets of overlapping length-3 character shingles,
//! computed on aggressively normalized text. Normalization folds the
//! differences that routinely survive a text mutation pipeline: casing,
//! whitespace runs, quote and dash variants, soft hyphens, and line-break
//! hyphenation.

// Allow cast precision loss for set-size ratios; shingle sets stay far below
// the f32 mantissa range.
#![allow(clippy::cast_precision_loss)]

use std::collections::HashSet;

/// Shingle length in characters.
const SHINGLE_LEN: usize = 3;

/// Normalizes text for fuzzy comparison.
///
/// Lowercases, collapses whitespace runs to single spaces, folds quote
/// variants to `'` and dash variants to `-`, strips soft hyphens, and joins
/// words split by line-break hyphenation (`sug-\ngests` becomes `suggests`).
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for raw in text.chars() {
        let folded = match raw {
            '\u{00AD}' => continue,
            '"' | '`' | '\u{00B4}' | '\u{2018}'..='\u{201F}' => '\'',
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            c if c.is_whitespace() => {
                // A hyphen directly before whitespace is line-break
                // hyphenation: drop both and join the halves.
                if out.ends_with('-') {
                    out.pop();
                    pending_space = false;
                } else if !out.is_empty() {
                    pending_space = true;
                }
                continue;
            },
            c => c,
        };

        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in folded.to_lowercase() {
            out.push(lower);
        }
    }

    out
}

/// A precomputed shingle set, reusable across many comparisons.
#[derive(Debug, Clone)]
pub struct ShingleSet {
    shingles: HashSet<[char; SHINGLE_LEN]>,
}

impl ShingleSet {
    /// Builds the shingle set of the normalized form of `text`.
    #[must_use]
    pub fn new(text: &str) -> Self {
        let normalized = normalize(text);
        let chars: Vec<char> = normalized.chars().collect();
        let mut shingles = HashSet::with_capacity(chars.len().saturating_sub(SHINGLE_LEN - 1));
        for window in chars.windows(SHINGLE_LEN) {
            shingles.insert([window[0], window[1], window[2]]);
        }
        Self { shingles }
    }

    /// Returns true if the text was too short to produce any shingle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shingles.is_empty()
    }

    /// Jaccard similarity between two shingle sets, in `[0, 1]`.
    ///
    /// Returns 0.0 when either side is empty.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        if self.shingles.is_empty() || other.shingles.is_empty() {
            return 0.0;
        }
        let intersection = self.shingles.intersection(&other.shingles).count();
        let union = self.shingles.len() + other.shingles.len() - intersection;
        intersection as f32 / union as f32
    }
}

/// Jaccard similarity of the trigram shingle sets of two strings.
///
/// Convenience wrapper over [`ShingleSet`]; prefer the set type when one
/// side is compared repeatedly.
#[must_use]
pub fn shingle_similarity(a: &str, b: &str) -> f32 {
    ShingleSet::new(a).similarity(&ShingleSet::new(b))
}
