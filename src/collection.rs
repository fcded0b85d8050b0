//! Ordered run collection with selection flags, plus the content fingerprint used for
//! duplicate detection.

use crate::error::PipelineError;
use crate::model::{RunDefinition, RunStatus};
use sha2::{Digest, Sha256};

/// Replacement values for an edited run. Blank optional fields clear the value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunDraft {
    pub prompt: String,
    pub title: String,
    pub target: String,
    pub context: String,
}

impl RunDraft {
    pub fn from_run(run: &RunDefinition) -> Self {
        Self {
            prompt: run.prompt.clone(),
            title: run.title.clone().unwrap_or_default(),
            target: run.target.clone().unwrap_or_default(),
            context: run.context.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCollection {
    runs: Vec<RunDefinition>,
}

impl RunCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_runs(runs: Vec<RunDefinition>) -> Self {
        Self { runs }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RunDefinition> {
        self.runs.get(index)
    }

    pub fn runs(&self) -> &[RunDefinition] {
        &self.runs
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunDefinition> {
        self.runs.iter()
    }

    pub fn add(&mut self, run: RunDefinition) {
        self.runs.push(run);
    }

    /// Remove the run at `index`. Removing the only remaining run is rejected.
    pub fn remove(&mut self, index: usize) -> Result<RunDefinition, PipelineError> {
        if index >= self.runs.len() {
            return Err(PipelineError::Validation(format!(
                "no run at position {}",
                index + 1
            )));
        }
        if self.runs.len() == 1 {
            return Err(PipelineError::Validation(
                "cannot remove the last run".into(),
            ));
        }
        Ok(self.runs.remove(index))
    }

    /// Flip the selection of one run and return its new state.
    pub fn toggle_selection(&mut self, index: usize) -> Option<bool> {
        let run = self.runs.get_mut(index)?;
        run.selected = !run.selected;
        Some(run.selected)
    }

    /// Deselect everything when all runs are selected, otherwise select everything.
    pub fn toggle_select_all(&mut self) {
        let select = !self.all_selected();
        for run in &mut self.runs {
            run.selected = select;
        }
    }

    pub fn all_selected(&self) -> bool {
        self.runs.iter().all(|r| r.selected)
    }

    pub fn selected_count(&self) -> usize {
        self.runs.iter().filter(|r| r.selected).count()
    }

    /// Selected runs with their position in the full collection, in collection order.
    pub fn selected(&self) -> impl Iterator<Item = (usize, &RunDefinition)> {
        self.runs.iter().enumerate().filter(|(_, r)| r.selected)
    }

    pub fn edit(&mut self, index: usize, draft: &RunDraft) -> Result<(), PipelineError> {
        let prompt = draft.prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::Validation("prompt is required".into()));
        }
        let run = self.runs.get_mut(index).ok_or_else(|| {
            PipelineError::Validation(format!("no run at position {}", index + 1))
        })?;
        run.prompt = prompt.to_string();
        run.title = optional(&draft.title);
        run.target = optional(&draft.target);
        run.context = optional(&draft.context);
        run.content_hash = None;
        Ok(())
    }

    pub fn set_status(&mut self, index: usize, status: RunStatus) {
        if let Some(run) = self.runs.get_mut(index) {
            run.status = status;
        }
    }

    pub fn set_content_hash(&mut self, index: usize, hash: String) {
        if let Some(run) = self.runs.get_mut(index) {
            run.content_hash = Some(hash);
        }
    }
}

fn optional(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// Deterministic fingerprint of a run's content and its ordinal within the submitted batch.
///
/// Fields are length-prefixed so that moving text between fields changes the digest.
pub fn content_hash(repository: &str, run: &RunDefinition, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    let fields = [
        repository,
        run.prompt.as_str(),
        run.target.as_deref().unwrap_or(""),
        run.context.as_deref().unwrap_or(""),
    ];
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update((ordinal as u64).to_le_bytes());

    let out = hasher.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}
