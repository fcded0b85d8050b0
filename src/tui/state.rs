use crate::collection::RunDraft;
use crate::orchestrator::{BatchResults, Command, Stage, WorkflowSnapshot};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Fields of the run edit form, in tab order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Prompt,
    Title,
    Target,
    Context,
}

impl EditField {
    pub const ALL: [EditField; 4] = [
        EditField::Prompt,
        EditField::Title,
        EditField::Target,
        EditField::Context,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EditField::Prompt => "Prompt",
            EditField::Title => "Title",
            EditField::Target => "Target",
            EditField::Context => "Context",
        }
    }

    fn next(self) -> Self {
        match self {
            EditField::Prompt => EditField::Title,
            EditField::Title => EditField::Target,
            EditField::Target => EditField::Context,
            EditField::Context => EditField::Prompt,
        }
    }

    fn prev(self) -> Self {
        match self {
            EditField::Prompt => EditField::Context,
            EditField::Title => EditField::Prompt,
            EditField::Target => EditField::Title,
            EditField::Context => EditField::Target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditForm {
    pub draft: RunDraft,
    pub field: EditField,
}

impl EditForm {
    pub fn value(&self, field: EditField) -> &str {
        match field {
            EditField::Prompt => &self.draft.prompt,
            EditField::Title => &self.draft.title,
            EditField::Target => &self.draft.target,
            EditField::Context => &self.draft.context,
        }
    }

    fn value_mut(&mut self) -> &mut String {
        match self.field {
            EditField::Prompt => &mut self.draft.prompt,
            EditField::Title => &mut self.draft.title,
            EditField::Target => &mut self.draft.target,
            EditField::Context => &mut self.draft.context,
        }
    }
}

/// What a key press asks the UI loop to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Nothing,
    Send(Command),
    Quit,
    CopyBatchId,
    SaveResults,
    ExportResults,
}

/// UI-thread state. The workflow itself lives in the controller; this only holds the last
/// snapshot plus cursor and text-entry state.
pub struct UiState {
    pub snapshot: Option<WorkflowSnapshot>,
    pub cursor: usize,
    pub path_input: String,
    pub edit: Option<EditForm>,
    pub show_help: bool,
    pub info: String,
    pub auto_save: bool,
    pub last_results: Option<BatchResults>,
    last_notice: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            snapshot: None,
            cursor: 0,
            path_input: String::new(),
            edit: None,
            show_help: false,
            info: String::new(),
            auto_save: true,
            last_results: None,
            last_notice: None,
        }
    }
}

/// Split the file input into paths. Paths are separated by whitespace.
pub fn parse_paths(input: &str) -> Vec<std::path::PathBuf> {
    input.split_whitespace().map(Into::into).collect()
}

impl UiState {
    /// Start with the file input prefilled from paths given on the command line.
    pub fn new(auto_save: bool, files: &[std::path::PathBuf]) -> Self {
        Self {
            auto_save,
            path_input: files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" "),
            ..Default::default()
        }
    }

    pub fn stage(&self) -> Stage {
        self.snapshot
            .as_ref()
            .map(|s| s.stage)
            .unwrap_or(Stage::Instructions)
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.snapshot.as_ref().and_then(|s| s.batch_id.as_deref())
    }

    fn row_count(&self) -> usize {
        let Some(s) = self.snapshot.as_ref() else {
            return 0;
        };
        match s.stage {
            Stage::Results => s
                .results
                .as_ref()
                .map(|r| r.successful.len() + r.failed.len())
                .unwrap_or(0),
            _ => s.runs.len(),
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: WorkflowSnapshot) {
        let previous = self.stage();
        if snapshot.stage == Stage::RunEdit && previous != Stage::RunEdit {
            self.edit = snapshot.draft.clone().map(|draft| EditForm {
                draft,
                field: EditField::Prompt,
            });
        }
        if snapshot.stage != Stage::RunEdit {
            self.edit = None;
        }
        if snapshot.stage != previous && matches!(snapshot.stage, Stage::Results | Stage::RunReview) {
            self.cursor = 0;
        }
        if snapshot.notice != self.last_notice {
            match snapshot.notice.as_deref() {
                Some(n) => self.info = n.to_string(),
                // Drop a cleared notice, but keep messages that arrived since.
                None if self.last_notice.as_deref() == Some(self.info.as_str()) => {
                    self.info.clear()
                }
                None => {}
            }
            self.last_notice = snapshot.notice.clone();
        }
        self.snapshot = Some(snapshot);
        let rows = self.row_count();
        if rows == 0 {
            self.cursor = 0;
        } else if self.cursor >= rows {
            self.cursor = rows - 1;
        }
    }

    fn move_cursor(&mut self, down: bool) {
        let rows = self.row_count();
        if rows == 0 {
            return;
        }
        if down {
            self.cursor = (self.cursor + 1).min(rows - 1);
        } else {
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    fn confirm_pending(&self) -> bool {
        self.snapshot
            .as_ref()
            .map(|s| s.confirm_submit)
            .unwrap_or(false)
    }

    /// Route one key press for the current stage.
    pub fn handle_key(&mut self, key: KeyEvent) -> KeyAction {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return KeyAction::Quit;
        }
        if key.code == KeyCode::Home {
            return KeyAction::Send(Command::Home);
        }

        match self.stage() {
            Stage::FileSelection => return self.file_selection_key(key),
            Stage::RunEdit => return self.edit_key(key),
            _ => {}
        }

        if self.show_help {
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc) {
                self.show_help = false;
            }
            return KeyAction::Nothing;
        }

        match key.code {
            KeyCode::Char('q') => return KeyAction::Quit,
            KeyCode::Char('?') => {
                self.show_help = true;
                return KeyAction::Nothing;
            }
            _ => {}
        }

        match self.stage() {
            Stage::Instructions => match key.code {
                KeyCode::Enter | KeyCode::Char('o') => KeyAction::Send(Command::SelectFiles),
                _ => KeyAction::Nothing,
            },
            Stage::RunReview if self.confirm_pending() => match key.code {
                KeyCode::Char('y') | KeyCode::Enter => KeyAction::Send(Command::ConfirmSubmit),
                KeyCode::Char('n') | KeyCode::Esc => KeyAction::Send(Command::DismissSubmit),
                _ => KeyAction::Nothing,
            },
            Stage::RunReview => match key.code {
                KeyCode::Up | KeyCode::Char('k') => {
                    self.move_cursor(false);
                    KeyAction::Nothing
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.move_cursor(true);
                    KeyAction::Nothing
                }
                KeyCode::Char(' ') => KeyAction::Send(Command::ToggleRun(self.cursor)),
                KeyCode::Char('a') => KeyAction::Send(Command::ToggleAll),
                KeyCode::Char('d') | KeyCode::Delete => KeyAction::Send(Command::RemoveRun(self.cursor)),
                KeyCode::Char('e') | KeyCode::Enter => KeyAction::Send(Command::BeginEdit(self.cursor)),
                KeyCode::Char('s') => KeyAction::Send(Command::RequestSubmit),
                KeyCode::Esc => KeyAction::Send(Command::Back),
                _ => KeyAction::Nothing,
            },
            Stage::Submitting => KeyAction::Nothing,
            Stage::Monitoring => match key.code {
                KeyCode::Char('c') => KeyAction::Send(Command::CancelBatch),
                KeyCode::Char('y') => KeyAction::CopyBatchId,
                KeyCode::Esc | KeyCode::Char('b') => KeyAction::Send(Command::Back),
                _ => KeyAction::Nothing,
            },
            Stage::Results => match key.code {
                KeyCode::Up | KeyCode::Char('k') => {
                    self.move_cursor(false);
                    KeyAction::Nothing
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.move_cursor(true);
                    KeyAction::Nothing
                }
                KeyCode::Char('n') => KeyAction::Send(Command::StartNew),
                KeyCode::Char('r') => KeyAction::Send(Command::BackToReview),
                KeyCode::Char('s') => KeyAction::SaveResults,
                KeyCode::Char('x') => KeyAction::ExportResults,
                KeyCode::Char('y') => KeyAction::CopyBatchId,
                KeyCode::Esc => KeyAction::Send(Command::Back),
                _ => KeyAction::Nothing,
            },
            Stage::FileSelection | Stage::RunEdit => KeyAction::Nothing,
        }
    }

    fn file_selection_key(&mut self, key: KeyEvent) -> KeyAction {
        let loading = self.snapshot.as_ref().map(|s| s.loading).unwrap_or(false);
        match key.code {
            KeyCode::Esc => KeyAction::Send(Command::Back),
            _ if loading => KeyAction::Nothing,
            KeyCode::Enter => {
                let paths = parse_paths(&self.path_input);
                if paths.is_empty() {
                    self.info = "Enter one or more config file paths".into();
                    KeyAction::Nothing
                } else {
                    KeyAction::Send(Command::LoadFiles(paths))
                }
            }
            KeyCode::Backspace => {
                self.path_input.pop();
                KeyAction::Nothing
            }
            KeyCode::Char(c) => {
                self.path_input.push(c);
                KeyAction::Nothing
            }
            _ => KeyAction::Nothing,
        }
    }

    fn edit_key(&mut self, key: KeyEvent) -> KeyAction {
        let Some(form) = self.edit.as_mut() else {
            return KeyAction::Send(Command::CancelEdit);
        };
        match key.code {
            KeyCode::Esc => KeyAction::Send(Command::CancelEdit),
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                KeyAction::Send(Command::SaveEdit(form.draft.clone()))
            }
            KeyCode::Tab => {
                form.field = form.field.next();
                KeyAction::Nothing
            }
            KeyCode::BackTab => {
                form.field = form.field.prev();
                KeyAction::Nothing
            }
            KeyCode::Enter => {
                // Only the prompt and context take multiple lines.
                if matches!(form.field, EditField::Prompt | EditField::Context) {
                    form.value_mut().push('\n');
                } else {
                    form.field = form.field.next();
                }
                KeyAction::Nothing
            }
            KeyCode::Backspace => {
                form.value_mut().pop();
                KeyAction::Nothing
            }
            KeyCode::Char(c) => {
                form.value_mut().push(c);
                KeyAction::Nothing
            }
            _ => KeyAction::Nothing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunDefinition;
    use pretty_assertions::assert_eq;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn new_prefills_paths_from_the_command_line() {
        let state = UiState::new(false, &["a.json".into(), "dir/b.yaml".into()]);
        assert_eq!(state.path_input, "a.json dir/b.yaml");
        assert!(!state.auto_save);
        assert_eq!(state.stage(), Stage::Instructions);
        assert_eq!(parse_paths(&state.path_input).len(), 2);
    }

    fn snapshot(stage: Stage, runs: usize) -> WorkflowSnapshot {
        WorkflowSnapshot {
            stage,
            runs: (0..runs)
                .map(|i| RunDefinition::new(format!("prompt {i}")))
                .collect(),
            context: None,
            config_paths: vec![],
            loading: false,
            confirm_submit: false,
            editing: None,
            draft: None,
            batch_id: None,
            statistics: None,
            cancel_requested: false,
            results: None,
            notice: None,
        }
    }

    #[test]
    fn review_keys_target_cursor_row() {
        let mut ui = UiState::default();
        ui.apply_snapshot(snapshot(Stage::RunReview, 3));
        ui.handle_key(key(KeyCode::Down));
        ui.handle_key(key(KeyCode::Down));
        ui.handle_key(key(KeyCode::Down));
        assert_eq!(ui.cursor, 2);
        assert_eq!(
            ui.handle_key(key(KeyCode::Char(' '))),
            KeyAction::Send(Command::ToggleRun(2))
        );
        assert_eq!(
            ui.handle_key(key(KeyCode::Char('s'))),
            KeyAction::Send(Command::RequestSubmit)
        );

        // Removing a row clamps the cursor.
        ui.apply_snapshot(snapshot(Stage::RunReview, 2));
        assert_eq!(ui.cursor, 1);
    }

    #[test]
    fn confirm_prompt_captures_y_and_n() {
        let mut ui = UiState::default();
        let mut s = snapshot(Stage::RunReview, 1);
        s.confirm_submit = true;
        ui.apply_snapshot(s);
        assert_eq!(
            ui.handle_key(key(KeyCode::Char('y'))),
            KeyAction::Send(Command::ConfirmSubmit)
        );
        assert_eq!(
            ui.handle_key(key(KeyCode::Char('n'))),
            KeyAction::Send(Command::DismissSubmit)
        );
    }

    #[test]
    fn file_selection_collects_typed_paths() {
        let mut ui = UiState::default();
        ui.apply_snapshot(snapshot(Stage::FileSelection, 0));
        for c in "a.json  b.yaml".chars() {
            ui.handle_key(key(KeyCode::Char(c)));
        }
        // 'q' is text here, not quit.
        ui.handle_key(key(KeyCode::Char('q')));
        ui.handle_key(key(KeyCode::Backspace));
        assert_eq!(
            ui.handle_key(key(KeyCode::Enter)),
            KeyAction::Send(Command::LoadFiles(vec!["a.json".into(), "b.yaml".into()]))
        );
    }

    #[test]
    fn edit_form_is_seeded_from_snapshot_and_saved_with_ctrl_s() {
        let mut ui = UiState::default();
        ui.apply_snapshot(snapshot(Stage::RunReview, 1));
        let mut s = snapshot(Stage::RunEdit, 1);
        s.editing = Some(0);
        s.draft = Some(RunDraft {
            prompt: "old".into(),
            ..Default::default()
        });
        ui.apply_snapshot(s);

        ui.handle_key(key(KeyCode::Tab));
        for c in "New".chars() {
            ui.handle_key(key(KeyCode::Char(c)));
        }
        let action = ui.handle_key(KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL));
        assert_eq!(
            action,
            KeyAction::Send(Command::SaveEdit(RunDraft {
                prompt: "old".into(),
                title: "New".into(),
                ..Default::default()
            }))
        );
    }

    #[test]
    fn monitoring_keys() {
        let mut ui = UiState::default();
        ui.apply_snapshot(snapshot(Stage::Monitoring, 1));
        assert_eq!(
            ui.handle_key(key(KeyCode::Char('c'))),
            KeyAction::Send(Command::CancelBatch)
        );
        assert_eq!(ui.handle_key(key(KeyCode::Char('y'))), KeyAction::CopyBatchId);
        assert_eq!(
            ui.handle_key(key(KeyCode::Esc)),
            KeyAction::Send(Command::Back)
        );
        assert_eq!(ui.handle_key(key(KeyCode::Char('q'))), KeyAction::Quit);
    }

    #[test]
    fn notice_updates_info_only_when_it_changes() {
        let mut ui = UiState::default();
        let mut s = snapshot(Stage::RunReview, 1);
        s.notice = Some("no runs selected".into());
        ui.apply_snapshot(s.clone());
        assert_eq!(ui.info, "no runs selected");
        ui.info = "Copied".into();
        ui.apply_snapshot(s);
        assert_eq!(ui.info, "Copied");
    }

    #[test]
    fn cleared_notice_clears_info() {
        let mut ui = UiState::default();
        let mut s = snapshot(Stage::Monitoring, 1);
        s.notice = Some("cancel failed: HTTP 409".into());
        ui.apply_snapshot(s.clone());
        s.notice = None;
        ui.apply_snapshot(s.clone());
        assert_eq!(ui.info, "");

        s.notice = Some("Cancelling…".into());
        ui.apply_snapshot(s.clone());
        ui.info = "Still cancelling…".into();
        s.notice = None;
        ui.apply_snapshot(s);
        assert_eq!(ui.info, "Still cancelling…");
    }
}
