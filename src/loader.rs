//! Bulk config loading.
//!
//! Supports JSON and YAML documents holding a full `BulkConfig`, JSONL files with one run
//! per line, and Markdown files whose YAML frontmatter holds the batch fields and whose body
//! becomes the prompt of a single run. Several files merge into one config in path order.

use crate::error::PipelineError;
use crate::model::{BulkConfig, RunSpec};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Jsonl,
    Yaml,
    Markdown,
}

fn detect_format(path: &Path) -> Result<Format, PipelineError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => Ok(Format::Json),
        "jsonl" | "ndjson" => Ok(Format::Jsonl),
        "yaml" | "yml" => Ok(Format::Yaml),
        "md" | "markdown" => Ok(Format::Markdown),
        _ => Err(PipelineError::ConfigLoad(format!(
            "{}: unsupported file type (expected .json, .jsonl, .yaml, .yml or .md)",
            path.display()
        ))),
    }
}

/// Load and merge bulk configs from `paths`.
pub fn load_bulk_config(paths: &[PathBuf]) -> Result<BulkConfig, PipelineError> {
    if paths.is_empty() {
        return Err(PipelineError::ConfigLoad("no config files given".into()));
    }

    let mut merged = BulkConfig::default();
    for path in paths {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigLoad(format!("{}: {e}", path.display()))
        })?;
        let part = parse_config(path, &text)?;
        merge_into(&mut merged, part, path)?;
    }

    validate(&merged)?;
    tracing::debug!(
        files = paths.len(),
        runs = merged.runs.len(),
        repository = %merged.repository,
        "loaded bulk config"
    );
    Ok(merged)
}

fn parse_config(path: &Path, text: &str) -> Result<BulkConfig, PipelineError> {
    let err = |e: String| PipelineError::ConfigLoad(format!("{}: {e}", path.display()));
    match detect_format(path)? {
        Format::Json => serde_json::from_str(text).map_err(|e| err(e.to_string())),
        Format::Yaml => serde_yaml::from_str(text).map_err(|e| err(e.to_string())),
        Format::Jsonl => {
            let mut runs = Vec::new();
            for (n, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let spec: RunSpec = serde_json::from_str(line)
                    .map_err(|e| err(format!("line {}: {e}", n + 1)))?;
                runs.push(spec);
            }
            Ok(BulkConfig {
                runs,
                ..Default::default()
            })
        }
        Format::Markdown => parse_markdown(text).map_err(err),
    }
}

fn parse_markdown(text: &str) -> Result<BulkConfig, String> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
        .ok_or_else(|| "missing YAML frontmatter".to_string())?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| "unterminated YAML frontmatter".to_string())?;
    let (front, body) = rest.split_at(end);
    let body = body
        .trim_start_matches("\n---")
        .trim_start_matches(['\r', '\n'])
        .trim();

    let mut cfg: BulkConfig = serde_yaml::from_str(front).map_err(|e| e.to_string())?;
    if cfg.runs.is_empty() && !body.is_empty() {
        cfg.runs.push(RunSpec {
            prompt: body.to_string(),
            ..Default::default()
        });
    }
    Ok(cfg)
}

fn merge_into(merged: &mut BulkConfig, part: BulkConfig, path: &Path) -> Result<(), PipelineError> {
    if !part.repository.trim().is_empty() {
        if merged.repository.is_empty() {
            merged.repository = part.repository.trim().to_string();
        } else if merged.repository != part.repository.trim() {
            return Err(PipelineError::ConfigLoad(format!(
                "{}: repository '{}' conflicts with '{}'",
                path.display(),
                part.repository,
                merged.repository
            )));
        }
    }
    if merged.repo_id.is_none() {
        merged.repo_id = part.repo_id;
    }
    if merged.source.is_none() {
        merged.source = part.source;
    }
    if merged.batch_title.is_none() {
        merged.batch_title = part.batch_title;
    }
    merged.run_type = part.run_type;
    merged.force |= part.force;
    merged.runs.extend(part.runs);
    Ok(())
}

fn validate(cfg: &BulkConfig) -> Result<(), PipelineError> {
    if cfg.repository.trim().is_empty() {
        return Err(PipelineError::ConfigLoad("repository is required".into()));
    }
    if cfg.runs.is_empty() {
        return Err(PipelineError::ConfigLoad("no runs defined".into()));
    }
    if let Some(n) = cfg.runs.iter().position(|r| r.prompt.trim().is_empty()) {
        return Err(PipelineError::ConfigLoad(format!(
            "run {} is missing a prompt",
            n + 1
        )));
    }
    Ok(())
}
