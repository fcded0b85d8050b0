//! Post-results processing.
//!
//! Handles auto-save and exports once a batch reaches the results stage.

use super::controller::BatchResults;
use crate::storage;
use std::path::{Path, PathBuf};

/// Result of post-results processing, ready for presentation layers.
#[derive(Debug, Default)]
pub(crate) struct ProcessedBatch {
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

/// Auto-save and export finished results. Failures become messages, never errors.
pub(crate) fn process_batch_results(
    results: &BatchResults,
    export_json: Option<&Path>,
    auto_save: bool,
) -> ProcessedBatch {
    let mut export_messages = Vec::new();

    let auto_saved_path = if auto_save {
        match storage::save_results(results) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!("auto-save failed: {e:#}");
                export_messages.push(format!("Save failed: {e:#}"));
                None
            }
        }
    } else {
        None
    };

    if let Some(export_path) = export_json {
        match storage::export_json(export_path, results) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedBatch {
        export_messages,
        auto_saved_path,
    }
}
