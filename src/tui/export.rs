use crate::orchestrator::BatchResults;
use anyhow::{Context, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Save results to the default location and report the path in the status line.
pub fn save_and_show_path(r: &BatchResults, state: &mut UiState) {
    match crate::storage::save_results(r) {
        Ok(path) => state.info = format!("Saved: {}", path.display()),
        Err(e) => state.info = format!("Save failed: {e:#}"),
    }
}

/// Export results JSON into the current directory. Returns the absolute path written.
pub fn export_results_json(r: &BatchResults) -> Result<std::path::PathBuf> {
    let default_name = format!(
        "bulkrun-{}.json",
        r.batch_id.as_deref().unwrap_or("unsubmitted")
    );
    let current_dir = std::env::current_dir().context("get current directory")?;
    let path = current_dir.join(default_name);
    crate::storage::export_json(&path, r)?;
    Ok(path)
}

/// Initialize the clipboard manager thread if not already initialized.
/// Each clipboard instance is held for a while so clipboard managers on Linux can read it.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue text for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}
