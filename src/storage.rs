//! Results persistence.
//!
//! Finished batches are written as pretty JSON under `<data_dir>/bulkrun/batches`.

use crate::orchestrator::BatchResults;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// On-disk record: the results plus when they were written.
#[derive(Serialize)]
struct SavedBatch<'a> {
    saved_at: String,
    #[serde(flatten)]
    results: &'a BatchResults,
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".into())
}

pub fn batches_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no user data directory on this platform")?;
    Ok(base.join("bulkrun").join("batches"))
}

fn file_name(results: &BatchResults, saved_at: &str) -> String {
    let stamp = saved_at.replace(':', "-");
    let id: String = results
        .batch_id
        .as_deref()
        .unwrap_or("unsubmitted")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("batch-{stamp}-{id}.json")
}

/// Save results to the default location and return the written path.
pub fn save_results(results: &BatchResults) -> Result<PathBuf> {
    save_results_in(&batches_dir()?, results)
}

pub fn save_results_in(dir: &Path, results: &BatchResults) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let saved_at = now_rfc3339();
    let path = dir.join(file_name(results, &saved_at));
    write_json(&path, &SavedBatch { saved_at, results })?;
    Ok(path)
}

/// Write results as JSON to an explicit path.
pub fn export_json(path: &Path, results: &BatchResults) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_json(path, results)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value).context("serialize results")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::BatchOutcome;

    fn results(batch_id: Option<&str>) -> BatchResults {
        BatchResults {
            batch_id: batch_id.map(str::to_string),
            outcome: BatchOutcome::Completed,
            repository: "acme/app".into(),
            submitted: 1,
            successful: vec![],
            failed: vec![],
            statistics: None,
            runs: vec![],
            error: None,
        }
    }

    #[test]
    fn saved_file_carries_timestamp_and_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_results_in(dir.path(), &results(Some("b/1"))).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("batch-"));
        assert!(name.ends_with("-b_1.json"));

        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["batch_id"], "b/1");
        assert_eq!(v["outcome"], "completed");
        assert!(v["saved_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn export_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        export_json(&path, &results(None)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(v["batch_id"].is_null());
        assert_eq!(v["repository"], "acme/app");
    }
}
