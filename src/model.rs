use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle status of a single run, as tracked locally and reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    /// Any status string this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Queued => "queued",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    #[default]
    Run,
    Plan,
}

impl RunType {
    pub fn as_str(self) -> &'static str {
        match self {
            RunType::Run => "run",
            RunType::Plan => "plan",
        }
    }
}

/// One run as the user sees and edits it before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDefinition {
    pub prompt: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    pub selected: bool,
    #[serde(default)]
    pub status: RunStatus,
    /// Filled in when the run is part of a prepared batch.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl RunDefinition {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            title: None,
            target: None,
            context: None,
            selected: true,
            status: RunStatus::Pending,
            content_hash: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Title if present, otherwise the first line of the prompt.
    pub fn display_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => self.prompt.lines().next().unwrap_or("").trim().to_string(),
        }
    }
}

impl From<RunSpec> for RunDefinition {
    fn from(spec: RunSpec) -> Self {
        Self {
            prompt: spec.prompt,
            title: non_blank(spec.title),
            target: non_blank(spec.target),
            context: non_blank(spec.context),
            selected: true,
            status: RunStatus::Pending,
            content_hash: None,
        }
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A run entry as written in a bulk config file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSpec {
    pub prompt: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
}

/// Result of loading one or more bulk config files.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfig {
    #[serde(default)]
    pub repository: String,
    #[serde(default, alias = "repo_id")]
    pub repo_id: Option<u64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, alias = "run_type")]
    pub run_type: RunType,
    #[serde(default, alias = "batch_title")]
    pub batch_title: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub runs: Vec<RunSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunItem {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub file_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub parallel: u32,
}

/// Body of the bulk submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub repository_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<u64>,
    pub run_type: RunType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_title: Option<String>,
    pub force: bool,
    pub runs: Vec<RunItem>,
    pub options: BatchOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCreated {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub request_index: usize,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub existing_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub batch_id: String,
    #[serde(default)]
    pub successful: Vec<RunCreated>,
    #[serde(default)]
    pub failed: Vec<RunFailure>,
}

/// Server-reported batch discriminator. Only the server decides when a batch is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Failed | BatchState::Cancelled
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            BatchState::Queued => "queued",
            BatchState::Processing => "processing",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
            BatchState::Cancelled => "cancelled",
            BatchState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Statistics {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub queued: u32,
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub cancelled: u32,
}

impl Statistics {
    pub fn finished(&self) -> u32 {
        self.completed + self.failed + self.cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub status: BatchState,
    #[serde(default)]
    pub statistics: Statistics,
    #[serde(default)]
    pub runs: Vec<RunStatusItem>,
}

// The service has been seen returning numeric IDs; normalise everything to strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_request_uses_camel_case_wire_names() {
        let req = BatchRequest {
            repository_name: "acme/app".into(),
            repo_id: Some(7),
            run_type: RunType::Run,
            source_branch: Some("main".into()),
            batch_title: None,
            force: false,
            runs: vec![RunItem {
                prompt: "fix it".into(),
                title: None,
                target: Some("fix/branch".into()),
                context: None,
                file_hash: "abc".into(),
            }],
            options: BatchOptions { parallel: 5 },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["repositoryName"], "acme/app");
        assert_eq!(v["repoId"], 7);
        assert_eq!(v["runType"], "run");
        assert_eq!(v["sourceBranch"], "main");
        assert!(v.get("batchTitle").is_none());
        assert_eq!(v["runs"][0]["fileHash"], "abc");
        assert!(v["runs"][0].get("title").is_none());
        assert_eq!(v["options"]["parallel"], 5);
    }

    #[test]
    fn batch_response_accepts_numeric_ids() {
        let resp: BatchResponse = serde_json::from_value(json!({
            "batchId": 42,
            "successful": [{"id": 9, "title": "a", "status": "queued"}],
            "failed": [{"requestIndex": 1, "prompt": "p", "message": "duplicate", "existingRunId": 3}]
        }))
        .unwrap();
        assert_eq!(resp.batch_id, "42");
        assert_eq!(resp.successful[0].id, "9");
        assert_eq!(resp.failed[0].existing_run_id.as_deref(), Some("3"));
    }

    #[test]
    fn unknown_statuses_stay_non_terminal() {
        let st: BatchStatus = serde_json::from_value(json!({
            "status": "paused",
            "statistics": {"total": 1},
            "runs": [{"id": "r1", "status": "waiting"}]
        }))
        .unwrap();
        assert_eq!(st.status, BatchState::Unknown);
        assert!(!st.status.is_terminal());
        assert_eq!(st.runs[0].status, RunStatus::Unknown);
        assert_eq!(st.statistics.total, 1);
        assert_eq!(st.statistics.queued, 0);
    }

    #[test]
    fn display_title_falls_back_to_first_prompt_line() {
        let run = RunDefinition::new("Refactor the parser\nmore detail");
        assert_eq!(run.display_title(), "Refactor the parser");
        let run = run.with_title("  ");
        assert_eq!(run.display_title(), "Refactor the parser");
        let run = RunDefinition::new("x").with_title("Named");
        assert_eq!(run.display_title(), "Named");
    }
}
