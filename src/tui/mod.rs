mod export;
mod help;
mod state;

use crate::api::HttpBatchApi;
use crate::orchestrator::{
    self, BatchOutcome, BatchResults, Command, Stage, UiCommand, WorkflowController, WorkflowEvent,
};
use crate::settings::SessionConfig;
use crate::text_summary::{outcome_label, statistics_line};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use export::{copy_to_clipboard, export_results_json, save_and_show_path};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{EditField, KeyAction, UiState};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(cfg: SessionConfig) -> Result<()> {
    let api = Arc::new(HttpBatchApi::new(&cfg.api_config()).context("build API client")?);
    // Unbounded channels keep the UI thread from ever blocking on the runtime.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // Files given on the command line skip the file prompt.
    if !cfg.files.is_empty() {
        let _ = cmd_tx.send(UiCommand::Workflow(Command::SelectFiles));
        let _ = cmd_tx.send(UiCommand::Workflow(Command::LoadFiles(cfg.files.clone())));
    }

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_cfg = cfg.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_cfg, event_rx, cmd_tx));

    let controller = WorkflowController::new(cfg.workflow_settings());
    let res = orchestrator::run_workflow(api, controller, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    cfg: SessionConfig,
    mut event_rx: UnboundedReceiver<WorkflowEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(cfg.auto_save, &cfg.files);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                WorkflowEvent::Snapshot(s) => state.apply_snapshot(*s),
                WorkflowEvent::Finished(results) => handle_finished(&cfg, &mut state, *results),
                WorkflowEvent::Message(m) => state.info = m,
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match state.handle_key(k) {
                    KeyAction::Nothing => {}
                    KeyAction::Send(cmd) => {
                        let _ = cmd_tx.send(UiCommand::Workflow(cmd));
                    }
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    KeyAction::CopyBatchId => match state.batch_id().map(str::to_string) {
                        Some(id) => match copy_to_clipboard(&id) {
                            Ok(()) => state.info = format!("✓ Copied to clipboard: {id}"),
                            Err(e) => state.info = format!("Clipboard failed: {e:#}"),
                        },
                        None => state.info = "No batch ID yet.".into(),
                    },
                    KeyAction::SaveResults => match state.last_results.clone() {
                        Some(r) => save_and_show_path(&r, &mut state),
                        None => state.info = "No results to save yet.".into(),
                    },
                    KeyAction::ExportResults => match state.last_results.as_ref() {
                        Some(r) => match export_results_json(r) {
                            Ok(p) => state.info = format!("Exported JSON: {}", p.display()),
                            Err(e) => state.info = format!("JSON export failed: {e:#}"),
                        },
                        None => state.info = "No results to export yet.".into(),
                    },
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    res
}

fn handle_finished(cfg: &SessionConfig, state: &mut UiState, results: BatchResults) {
    let processed =
        orchestrator::process_batch_results(&results, cfg.export_json.as_deref(), state.auto_save);

    state.info = format!("Batch {}", outcome_label(results.outcome));
    if let Some(path) = processed.auto_saved_path.as_ref() {
        state.info = format!("Saved: {}", path.display());
    }
    if !processed.export_messages.is_empty() {
        state.info = processed.export_messages.join("; ");
    }
    state.last_results = Some(results);
}

const STAGE_TABS: [(Stage, &str); 6] = [
    (Stage::Instructions, "Start"),
    (Stage::FileSelection, "Files"),
    (Stage::RunReview, "Review"),
    (Stage::Submitting, "Submit"),
    (Stage::Monitoring, "Monitor"),
    (Stage::Results, "Results"),
];

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let stage = state.stage();
    let selected = STAGE_TABS
        .iter()
        .position(|(s, _)| *s == stage)
        // Editing is part of review.
        .unwrap_or(2);
    let tabs = Tabs::new(STAGE_TABS.iter().map(|(_, name)| Line::from(*name)).collect::<Vec<_>>())
        .select(selected)
        .block(Block::default().borders(Borders::ALL).title("bulkrun"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    if state.show_help {
        draw_help(chunks[1], f);
    } else {
        match stage {
            Stage::Instructions => draw_instructions(chunks[1], f),
            Stage::FileSelection => draw_file_selection(chunks[1], f, state),
            Stage::RunReview => draw_review(chunks[1], f, state),
            Stage::RunEdit => draw_edit(chunks[1], f, state),
            Stage::Submitting => draw_submitting(chunks[1], f, state),
            Stage::Monitoring => draw_monitoring(chunks[1], f, state),
            Stage::Results => draw_results(chunks[1], f, state),
        }
    }

    let status = Paragraph::new(Line::from(vec![
        Span::styled(state.info.clone(), Style::default().fg(Color::Gray)),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status  (? for help)"));
    f.render_widget(status, chunks[2]);
}

fn draw_instructions(area: Rect, f: &mut ratatui::Frame) {
    let p = Paragraph::new(vec![
        Line::from("Submit many runs against one repository in a single batch."),
        Line::from(""),
        Line::from("1. Pick one or more bulk config files (JSON, JSONL, YAML or Markdown)."),
        Line::from("2. Review the runs: toggle, edit or remove them."),
        Line::from("3. Submit and watch the batch until it finishes."),
        Line::from(""),
        Line::from(vec![
            Span::raw("Press "),
            Span::styled("Enter", Style::default().fg(Color::Magenta)),
            Span::raw(" to choose files, "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" to quit."),
        ]),
    ])
    .wrap(Wrap { trim: false })
    .block(Block::default().borders(Borders::ALL).title("Instructions"));
    f.render_widget(p, area);
}

fn draw_file_selection(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let loading = state.snapshot.as_ref().map(|s| s.loading).unwrap_or(false);
    let mut lines = vec![
        Line::from("Config file paths (space separated), Enter to load:"),
        Line::from(""),
        Line::from(vec![
            Span::styled("> ", Style::default().fg(Color::Magenta)),
            Span::raw(state.path_input.clone()),
            Span::styled(
                if loading { "" } else { "█" },
                Style::default().fg(Color::Gray),
            ),
        ]),
    ];
    if loading {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Loading…",
            Style::default().fg(Color::Yellow),
        )));
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Files"));
    f.render_widget(p, area);
}

fn status_color(status: crate::model::RunStatus) -> Color {
    use crate::model::RunStatus;
    match status {
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Cancelled => Color::DarkGray,
        RunStatus::Processing => Color::Yellow,
        RunStatus::Queued => Color::Cyan,
        RunStatus::Pending | RunStatus::Unknown => Color::Gray,
    }
}

fn draw_review(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(snap) = state.snapshot.as_ref() else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)].as_ref())
        .split(area);

    let mut header = Vec::new();
    if let Some(ctx) = snap.context.as_ref() {
        let mut line = vec![
            Span::styled("Repository: ", Style::default().fg(Color::Gray)),
            Span::raw(ctx.repository.clone()),
            Span::raw(format!("   type: {}", ctx.run_type.as_str())),
        ];
        if let Some(branch) = ctx.source_branch.as_deref() {
            line.push(Span::raw(format!("   source: {branch}")));
        }
        if ctx.force {
            line.push(Span::styled("   force", Style::default().fg(Color::Yellow)));
        }
        header.push(Line::from(line));
    }
    let selected = snap.runs.iter().filter(|r| r.selected).count();
    header.push(Line::from(format!(
        "{selected} of {} run(s) selected",
        snap.runs.len()
    )));
    f.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title("Batch")),
        chunks[0],
    );

    let items: Vec<ListItem> = snap
        .runs
        .iter()
        .map(|run| {
            let mark = if run.selected { "[x]" } else { "[ ]" };
            let mut spans = vec![
                Span::raw(format!("{mark} ")),
                Span::raw(run.display_title()),
            ];
            if let Some(target) = run.target.as_deref() {
                spans.push(Span::styled(
                    format!("  → {target}"),
                    Style::default().fg(Color::Gray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let title = if snap.confirm_submit {
        format!("Submit {selected} run(s)? y/n")
    } else {
        "Runs".to_string()
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut list_state = ListState::default();
    list_state.select(Some(state.cursor));
    f.render_stateful_widget(list, chunks[1], &mut list_state);
}

fn draw_edit(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(form) = state.edit.as_ref() else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(6),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(3),
            ]
            .as_ref(),
        )
        .split(area);

    for (field, chunk) in EditField::ALL.iter().zip(chunks.iter()) {
        let focused = *field == form.field;
        let border = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let p = Paragraph::new(form.value(*field).to_string())
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border)
                    .title(field.label()),
            );
        f.render_widget(p, *chunk);
    }
}

fn draw_submitting(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let count = state
        .snapshot
        .as_ref()
        .map(|s| s.runs.iter().filter(|r| r.selected).count())
        .unwrap_or(0);
    let p = Paragraph::new(format!("Submitting {count} run(s)…"))
        .block(Block::default().borders(Borders::ALL).title("Submitting"));
    f.render_widget(p, area);
}

fn draw_monitoring(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(snap) = state.snapshot.as_ref() else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let mut lines = vec![Line::from(vec![
        Span::styled("Batch: ", Style::default().fg(Color::Gray)),
        Span::raw(snap.batch_id.clone().unwrap_or_default()),
        Span::styled("  (y to copy)", Style::default().fg(Color::DarkGray)),
    ])];
    match snap.statistics.as_ref() {
        Some(stats) => lines.push(Line::from(statistics_line(stats))),
        None => lines.push(Line::from("Waiting for first status…")),
    }
    if snap.cancel_requested {
        lines.push(Line::from(Span::styled(
            "Cancelling…",
            Style::default().fg(Color::Yellow),
        )));
    }
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Monitoring")),
        chunks[0],
    );

    let ratio = snap
        .statistics
        .as_ref()
        .filter(|s| s.total > 0)
        .map(|s| (s.finished() as f64 / s.total as f64).clamp(0.0, 1.0))
        .unwrap_or(0.0);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio);
    f.render_widget(gauge, chunks[1]);

    let items: Vec<ListItem> = snap
        .runs
        .iter()
        .filter(|r| r.selected)
        .map(|run| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<11}", run.status.label()),
                    Style::default().fg(status_color(run.status)),
                ),
                Span::raw(run.display_title()),
            ]))
        })
        .collect();
    f.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Runs")),
        chunks[2],
    );
}

fn draw_results(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(results) = state.snapshot.as_ref().and_then(|s| s.results.as_ref()) else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0)].as_ref())
        .split(area);

    let outcome_color = match results.outcome {
        BatchOutcome::Completed => Color::Green,
        BatchOutcome::Cancelled => Color::Yellow,
        _ => Color::Red,
    };
    let mut lines = vec![Line::from(vec![
        Span::styled("Outcome: ", Style::default().fg(Color::Gray)),
        Span::styled(outcome_label(results.outcome), Style::default().fg(outcome_color)),
        Span::raw(format!(
            "   batch: {}",
            results.batch_id.as_deref().unwrap_or("-")
        )),
    ])];
    if let Some(err) = results.error.as_deref() {
        lines.push(Line::from(Span::styled(
            err.to_string(),
            Style::default().fg(Color::Red),
        )));
    } else {
        lines.push(Line::from(format!(
            "Accepted {} / rejected {} of {} submitted",
            results.successful.len(),
            results.failed.len(),
            results.submitted
        )));
    }
    if let Some(stats) = results.statistics.as_ref() {
        lines.push(Line::from(statistics_line(stats)));
    }
    f.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Results")),
        chunks[0],
    );

    let mut items: Vec<ListItem> = results
        .successful
        .iter()
        .map(|run| {
            let status = results
                .runs
                .iter()
                .find(|r| r.id == run.id)
                .map(|r| r.status)
                .unwrap_or(run.status);
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<11}", status.label()),
                    Style::default().fg(status_color(status)),
                ),
                Span::raw(format!("{}  ", run.title)),
                Span::styled(run.id.clone(), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    items.extend(results.failed.iter().map(|run| {
        let mut spans = vec![
            Span::styled("rejected   ", Style::default().fg(Color::Red)),
            Span::raw(format!("{}: {}", run.title, run.message)),
        ];
        if let Some(existing) = run.existing_run_id.as_deref() {
            spans.push(Span::styled(
                format!("  existing run {existing}"),
                Style::default().fg(Color::Yellow),
            ));
        }
        ListItem::new(Line::from(spans))
    }));

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Runs  (n new · s save · x export · y copy ID)"),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut list_state = ListState::default();
    list_state.select(Some(state.cursor));
    f.render_stateful_widget(list, chunks[1], &mut list_state);
}
