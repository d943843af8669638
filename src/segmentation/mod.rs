//! Segmentation collaborator.
//!
//! Turning mutated text into structural unit spans is an external concern;
//! this module defines the contract plus a default paragraph-boundary
//! implementation so the CLI and tests are self-contained.

use crate::Result;
use crate::embedding::Embedder;
use crate::models::UnitSpec;
use std::sync::Arc;

/// Trait for segmentation collaborators.
///
/// Implementations return unit spans in document order with byte offsets
/// into the given text. Span validation happens downstream when units are
/// built against the staged generation.
pub trait Segmenter: Send + Sync {
    /// Segments the text into ordered unit specs.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator fails (e.g. its embedding
    /// backend is unavailable).
    fn segment(&self, text: &str) -> Result<Vec<UnitSpec>>;
}

/// Default paragraph-boundary segmenter.
///
/// Splits on blank lines, embeds each paragraph through the configured
/// [`Embedder`], and derives importance from relative paragraph length.
/// Produces at least one unit for any text with non-whitespace content.
pub struct ParagraphSegmenter<E: Embedder> {
    embedder: Arc<E>,
    domain_label: String,
}

impl<E: Embedder> ParagraphSegmenter<E> {
    /// Creates a segmenter over the given embedder.
    #[must_use]
    pub fn new(embedder: Arc<E>) -> Self {
        Self {
            embedder,
            domain_label: String::new(),
        }
    }

    /// Sets the domain label applied to every produced unit.
    #[must_use]
    pub fn with_domain_label(mut self, label: impl Into<String>) -> Self {
        self.domain_label = label.into();
        self
    }

    /// Finds paragraph spans as byte ranges, excluding blank separator
    /// lines.
    fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut paragraph_start: Option<usize> = None;
        let mut offset = 0usize;
        let mut last_content_end = 0usize;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                if let Some(start) = paragraph_start.take() {
                    spans.push((start, last_content_end));
                }
            } else {
                if paragraph_start.is_none() {
                    let leading = line.len() - line.trim_start().len();
                    paragraph_start = Some(offset + leading);
                }
                last_content_end = offset + line.len() - trailing_ws_len(line);
            }
            offset += line.len();
        }
        if let Some(start) = paragraph_start {
            spans.push((start, last_content_end));
        }
        spans
    }
}

/// Length of the trailing whitespace of a line, in bytes.
fn trailing_ws_len(line: &str) -> usize {
    line.len() - line.trim_end().len()
}

impl<E: Embedder> Segmenter for ParagraphSegmenter<E> {
    #[allow(clippy::cast_precision_loss)]
    fn segment(&self, text: &str) -> Result<Vec<UnitSpec>> {
        let spans = Self::paragraph_spans(text);
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let max_len = spans
            .iter()
            .map(|(start, end)| end - start)
            .max()
            .unwrap_or(1)
            .max(1);

        let mut specs = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            let paragraph = &text[start..end];
            let importance = ((end - start) as f32 / max_len as f32).clamp(0.05, 1.0);
            let embedding = self.embedder.embed(paragraph)?;
            specs.push(
                UnitSpec::new(start, end)
                    .with_embedding(embedding)
                    .with_domain_label(self.domain_label.clone())
                    .with_importance(importance),
            );
        }
        Ok(specs)
    }
}
