//! CLI command implementations.
//!
//! The binary exercises the exposed surface over plain files: a baseline
//! text, a revised text, and a JSON list of anchors. Commands return
//! structured results; serialization and exit codes live in the binary.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reprocess` | Stage revised text, recover anchors, commit or abort |
//! | `detect` | Detect relationships within (and across) documents |

use crate::config::PalimpsestConfig;
use crate::detection::{
    BridgeEngine, ContradictionEngine, DetectionOrchestrator, SimilarityEngine,
};
use crate::embedding::HashEmbedder;
use crate::judge::{BridgeJudge, HttpJudge, RetryingJudge, StaticJudge};
use crate::models::{Anchor, AnchorId, DocumentId, Relationship};
use crate::reprocessing::{ReprocessReport, ReprocessingService};
use crate::segmentation::ParagraphSegmenter;
use crate::storage::{AnchorStore, InMemoryStore};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One anchor as read from the anchors JSON file.
#[derive(Debug, Deserialize)]
pub struct AnchorSpec {
    /// Optional stable identifier; generated when absent.
    pub id: Option<String>,
    /// The anchored text.
    pub original_text: String,
    /// Byte offset in the baseline text (inclusive).
    pub start_offset: usize,
    /// Byte offset in the baseline text (exclusive).
    pub end_offset: usize,
    /// Text immediately before the span.
    #[serde(default)]
    pub context_before: String,
    /// Text immediately after the span.
    #[serde(default)]
    pub context_after: String,
    /// Index of the unit the span fell in.
    pub source_unit_index: Option<usize>,
}

impl AnchorSpec {
    fn into_anchor(self, document_id: DocumentId) -> Anchor {
        let mut anchor = Anchor::new(
            document_id,
            self.original_text,
            self.start_offset,
            self.end_offset,
        )
        .with_context(self.context_before, self.context_after);
        if let Some(id) = self.id {
            anchor = anchor.with_id(AnchorId::new(id));
        }
        if let Some(index) = self.source_unit_index {
            anchor = anchor.with_source_unit_index(index);
        }
        anchor
    }
}

/// Arguments for the `reprocess` command.
#[derive(Debug)]
pub struct ReprocessArgs {
    /// Path to the baseline text.
    pub baseline: PathBuf,
    /// Path to the revised text.
    pub revised: PathBuf,
    /// Path to the anchors JSON file.
    pub anchors: Option<PathBuf>,
    /// Recovery floor override.
    pub floor: Option<f32>,
    /// Fail with an error instead of reporting an aborted attempt.
    pub strict: bool,
    /// Path to a TOML config file.
    pub config: Option<PathBuf>,
}

/// Arguments for the `detect` command.
#[derive(Debug)]
pub struct DetectArgs {
    /// Path to the document text.
    pub document: PathBuf,
    /// Optional second document for cross-document detection.
    pub cross: Option<PathBuf>,
    /// Domain label for the first document.
    pub domain: Option<String>,
    /// Domain label for the second document.
    pub cross_domain: Option<String>,
    /// Path to a TOML config file.
    pub config: Option<PathBuf>,
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("cannot read {}: {e}", path.display())))
}

fn read_anchors(path: &Path, document_id: &DocumentId) -> Result<Vec<Anchor>> {
    let contents = read_file(path)?;
    let specs: Vec<AnchorSpec> = serde_json::from_str(&contents)
        .map_err(|e| Error::InvalidInput(format!("cannot parse {}: {e}", path.display())))?;
    Ok(specs
        .into_iter()
        .map(|spec| spec.into_anchor(document_id.clone()))
        .collect())
}

fn document_id_for(path: &Path) -> DocumentId {
    let stem = path
        .file_stem()
        .map_or_else(|| "document".to_string(), |s| s.to_string_lossy().into_owned());
    DocumentId::new(stem)
}

/// Runs a reprocessing attempt over two text files.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unreadable inputs, or — with
/// `strict` — [`Error::RecoveryFloorNotMet`] when the attempt aborts.
pub fn cmd_reprocess(args: &ReprocessArgs) -> Result<ReprocessReport> {
    let mut config = PalimpsestConfig::load(args.config.as_deref())?;
    if let Some(floor) = args.floor {
        config.reprocessing.recovery_floor = floor.clamp(0.0, 1.0);
    }

    let baseline = read_file(&args.baseline)?;
    let revised = read_file(&args.revised)?;
    let document_id = document_id_for(&args.baseline);

    let store = Arc::new(InMemoryStore::new());
    let segmenter = Arc::new(ParagraphSegmenter::new(Arc::new(HashEmbedder::new())));
    let service = ReprocessingService::new(Arc::clone(&store), segmenter, &config);

    service.ingest(document_id.clone(), &baseline)?;
    if let Some(anchors_path) = &args.anchors {
        for anchor in read_anchors(anchors_path, &document_id)? {
            store.put_anchor(&anchor)?;
        }
    }

    if args.strict {
        service.reprocess_strict(&document_id, &revised)
    } else {
        service.reprocess(&document_id, &revised)
    }
}

/// Builds the engine set for detection, wiring the HTTP judge only when an
/// endpoint is configured.
fn build_orchestrator(config: &PalimpsestConfig) -> Result<DetectionOrchestrator> {
    let judge: Arc<dyn BridgeJudge> = match &config.judge.endpoint {
        Some(_) => Arc::new(RetryingJudge::from_config(
            HttpJudge::from_config(&config.judge)?,
            &config.judge,
        )),
        None => Arc::new(StaticJudge::disconnected()),
    };

    Ok(DetectionOrchestrator::new(config.detection.clone())
        .with_engine(Arc::new(SimilarityEngine::new()))
        .with_engine(Arc::new(ContradictionEngine::new()))
        .with_engine(Arc::new(BridgeEngine::new(judge, config.bridge.clone()))))
}

/// Runs relationship detection over one or two text files.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unreadable inputs or empty
/// documents.
pub fn cmd_detect(args: &DetectArgs) -> Result<Vec<Relationship>> {
    let config = PalimpsestConfig::load(args.config.as_deref())?;

    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(HashEmbedder::new());
    let document_id = document_id_for(&args.document);

    let segmenter = Arc::new(
        ParagraphSegmenter::new(Arc::clone(&embedder))
            .with_domain_label(args.domain.clone().unwrap_or_default()),
    );
    let service = ReprocessingService::new(Arc::clone(&store), segmenter, &config);
    service.ingest(document_id.clone(), &read_file(&args.document)?)?;

    let orchestrator = build_orchestrator(&config)?;
    let mut edges = orchestrator.detect_relationships(store.as_ref(), &document_id)?;

    if let Some(cross_path) = &args.cross {
        let cross_id = document_id_for(cross_path);
        let cross_segmenter = Arc::new(
            ParagraphSegmenter::new(embedder)
                .with_domain_label(args.cross_domain.clone().unwrap_or_default()),
        );
        let cross_service =
            ReprocessingService::new(Arc::clone(&store), cross_segmenter, &config);
        cross_service.ingest(cross_id.clone(), &read_file(cross_path)?)?;
        edges.extend(orchestrator.detect_cross_document(
            store.as_ref(),
            &document_id,
            &cross_id,
        )?);
    }

    Ok(edges)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_reprocess_command_end_to_end() {
        let baseline = write_temp("A paragraph holding the key phrase in place.");
        let revised = write_temp("A paragraph still holding the key phrase in place.");
        let anchors = write_temp(
            r#"[{"id": "a-1", "original_text": "the key phrase", "start_offset": 20, "end_offset": 34}]"#,
        );

        let report = cmd_reprocess(&ReprocessArgs {
            baseline: baseline.path().to_path_buf(),
            revised: revised.path().to_path_buf(),
            anchors: Some(anchors.path().to_path_buf()),
            floor: None,
            strict: false,
            config: None,
        })
        .unwrap();

        assert!(report.committed);
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.outcomes[0].is_recovered());
    }

    #[test]
    fn test_reprocess_strict_fails_below_floor() {
        let baseline = write_temp("The original phrasing to anchor.");
        let revised = write_temp("Totally different content without any overlap whatsoever.");
        let anchors = write_temp(
            r#"[{"original_text": "original phrasing to anchor", "start_offset": 4, "end_offset": 31}]"#,
        );

        let result = cmd_reprocess(&ReprocessArgs {
            baseline: baseline.path().to_path_buf(),
            revised: revised.path().to_path_buf(),
            anchors: Some(anchors.path().to_path_buf()),
            floor: Some(0.9),
            strict: true,
            config: None,
        });

        assert!(matches!(result, Err(Error::RecoveryFloorNotMet { .. })));
    }

    #[test]
    fn test_detect_command_runs_offline() {
        // Same token set in both paragraphs, so the hash embedder scores
        // them identical regardless of bucket collisions.
        let document = write_temp(
            "Gradient descent converges quickly on convex losses.\n\n\
             On convex losses, gradient descent converges quickly.",
        );

        let edges = cmd_detect(&DetectArgs {
            document: document.path().to_path_buf(),
            cross: None,
            domain: Some("ml".to_string()),
            cross_domain: None,
            config: None,
        })
        .unwrap();

        // The two near-identical paragraphs should at least be similar.
        assert!(!edges.is_empty());
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let result = cmd_reprocess(&ReprocessArgs {
            baseline: PathBuf::from("/nonexistent/baseline.txt"),
            revised: PathBuf::from("/nonexistent/revised.txt"),
            anchors: None,
            floor: None,
            strict: false,
            config: None,
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
