use crate::api::HttpBatchApi;
use crate::orchestrator::{
    self, BatchOutcome, BatchResults, Command, Stage, UiCommand, WorkflowController, WorkflowEvent,
};
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::settings::{self, FileSettings, SessionConfig};
use crate::submitter::DEFAULT_PARALLELISM;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_POLL_RETRIES: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Output line routing for stdout/stderr writer.
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "bulkrun",
    version,
    about = "Submit a batch of runs and monitor it to completion, with an optional TUI"
)]
pub struct Cli {
    /// Bulk config files (JSON, JSONL, YAML or Markdown with frontmatter)
    pub files: Vec<PathBuf>,

    /// Base URL of the runs API
    #[arg(long, env = "BULKRUN_API_URL")]
    pub base_url: Option<String>,

    /// API key sent as a bearer token
    #[arg(long, env = "BULKRUN_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Delay between batch status polls [default: 2s]
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Consecutive failed polls tolerated before monitoring halts [default: 3]
    #[arg(long)]
    pub poll_retries: Option<u32>,

    /// Runs the server may execute in parallel [default: 5]
    #[arg(long)]
    pub parallel: Option<u32>,

    /// Timeout for each API request [default: 30s]
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Submit even when matching runs already exist
    #[arg(long)]
    pub force: bool,

    /// Batch title, overriding the config files
    #[arg(long)]
    pub title: Option<String>,

    /// Print final results as JSON and exit (no TUI)
    #[arg(long, conflicts_with = "text")]
    pub json: bool,

    /// Print a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override [default: true]
    #[arg(long, action = clap::ArgAction::Set)]
    pub auto_save: Option<bool>,

    /// Settings file [default: <config dir>/bulkrun/settings.json]
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Log file used in TUI mode [default: <cache dir>/bulkrun/bulkrun.log]
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn is_headless(&self) -> bool {
        self.json || self.text || !cfg!(feature = "tui")
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.is_headless() {
        crate::logging::init_stderr();
    } else {
        let path = args
            .log_file
            .clone()
            .or_else(crate::logging::default_log_path)
            .context("no cache directory for the log file; pass --log-file")?;
        crate::logging::init_file(&path)?;
    }

    let file_settings = match args.settings.clone().or_else(settings::default_settings_path) {
        Some(path) => settings::load_settings(&path)?,
        None => FileSettings::default(),
    };
    let cfg = build_config(&args, &file_settings)?;
    tracing::debug!(
        base_url = %cfg.base_url,
        files = cfg.files.len(),
        poll_interval = ?cfg.poll_interval,
        "session configured"
    );

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(cfg).await;
        }
    }

    run_headless(cfg, args.json).await
}

/// Resolve flags, environment and the settings file into a `SessionConfig`.
pub fn build_config(args: &Cli, file: &FileSettings) -> Result<SessionConfig> {
    let base_url = args
        .base_url
        .clone()
        .or_else(|| file.base_url.clone())
        .filter(|u| !u.trim().is_empty())
        .context("no API base URL: pass --base-url, set BULKRUN_API_URL, or add base_url to the settings file")?;

    let poll_interval = args
        .poll_interval
        .map(Duration::from)
        .or(file.poll_interval)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    if poll_interval.is_zero() {
        bail!("--poll-interval must be greater than zero");
    }

    let parallel = args.parallel.or(file.parallel).unwrap_or(DEFAULT_PARALLELISM);
    if parallel == 0 {
        bail!("--parallel must be at least 1");
    }

    Ok(SessionConfig {
        base_url,
        api_key: args.api_key.clone().or_else(|| file.api_key.clone()),
        poll_interval,
        poll_retries: args
            .poll_retries
            .or(file.poll_retries)
            .unwrap_or(DEFAULT_POLL_RETRIES),
        parallel,
        request_timeout: args
            .request_timeout
            .map(Duration::from)
            .or(file.request_timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        force: args.force,
        batch_title: args.title.clone().filter(|t| !t.trim().is_empty()),
        auto_save: args.auto_save.or(file.auto_save).unwrap_or(true),
        export_json: args.export_json.clone(),
        files: args.files.clone(),
        user_agent: format!("bulkrun-cli/{}", env!("CARGO_PKG_VERSION")),
    })
}

/// Load, submit everything selected, and monitor to the end without a UI.
async fn run_headless(cfg: SessionConfig, json: bool) -> Result<()> {
    if cfg.files.is_empty() {
        bail!("no config files given");
    }
    let api = Arc::new(HttpBatchApi::new(&cfg.api_config()).context("build API client")?);
    let (out_tx, out_handle) = spawn_output_writer();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<WorkflowEvent>();

    let controller = WorkflowController::new(cfg.workflow_settings());
    let workflow = tokio::spawn(orchestrator::run_workflow(api, controller, evt_tx, cmd_rx));

    let outcome = drive_headless(&cfg.files, &cmd_tx, evt_rx, &out_tx, !json).await;
    let _ = cmd_tx.send(UiCommand::Quit);
    workflow.await.context("workflow task failed")??;
    let results = outcome?;

    let processed =
        orchestrator::process_batch_results(&results, cfg.export_json.as_deref(), cfg.auto_save);

    if json {
        let out = serde_json::to_string_pretty(&results)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&results).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    if let Some(p) = processed.auto_saved_path.as_ref() {
        let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
    }
    for msg in processed.export_messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }

    drop(out_tx);
    let _ = out_handle.await;

    match results.outcome {
        BatchOutcome::SubmissionFailed | BatchOutcome::MonitoringHalted => Err(anyhow::anyhow!(
            "{}",
            results
                .error
                .unwrap_or_else(|| crate::text_summary::outcome_label(results.outcome).into())
        )),
        _ => Ok(()),
    }
}

/// Feed the workflow the headless command sequence and wait for results.
///
/// Progress goes to stderr when `progress` is set. Ctrl-C while monitoring cancels the batch.
pub(crate) async fn drive_headless(
    files: &[PathBuf],
    cmd_tx: &mpsc::UnboundedSender<UiCommand>,
    mut evt_rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    progress: bool,
) -> Result<BatchResults> {
    let send = |cmd: Command| {
        cmd_tx
            .send(UiCommand::Workflow(cmd))
            .map_err(|_| anyhow::anyhow!("workflow stopped"))
    };
    let note = |msg: String| {
        if progress {
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
    };

    send(Command::SelectFiles)?;
    send(Command::LoadFiles(files.to_vec()))?;

    let mut load_started = false;
    let mut submit_sent = false;
    let mut stage = Stage::Instructions;
    let mut last_stats = None;

    loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else {
                    bail!("workflow stopped before producing results");
                };
                match ev {
                    WorkflowEvent::Snapshot(snap) => {
                        let changed = snap.stage != stage;
                        stage = snap.stage;
                        match snap.stage {
                            Stage::FileSelection if snap.loading => load_started = true,
                            Stage::Instructions if load_started => {
                                bail!(snap.notice.unwrap_or_else(|| "failed to load config".into()));
                            }
                            Stage::RunReview if !submit_sent => {
                                let repo = snap.context.as_ref().map(|c| c.repository.as_str()).unwrap_or("-");
                                note(format!("Loaded {} run(s) for {repo}", snap.runs.len()));
                                submit_sent = true;
                                send(Command::Submit)?;
                            }
                            Stage::RunReview => {
                                bail!(snap.notice.unwrap_or_else(|| "submission rejected".into()));
                            }
                            Stage::Submitting if changed => note("Submitting…".into()),
                            Stage::Monitoring => {
                                if changed {
                                    note(format!("Batch {}", snap.batch_id.as_deref().unwrap_or("-")));
                                }
                                if snap.statistics.is_some() && snap.statistics != last_stats {
                                    last_stats = snap.statistics;
                                    if let Some(stats) = last_stats.as_ref() {
                                        note(crate::text_summary::statistics_line(stats));
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    WorkflowEvent::Finished(results) => return Ok(*results),
                    WorkflowEvent::Message(m) => note(m),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if stage != Stage::Monitoring {
                    bail!("interrupted");
                }
                note("Cancelling…".into());
                send(Command::CancelBatch)?;
            }
        }
    }
}
