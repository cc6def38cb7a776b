use crate::model::{CharacterSheet, HistoryEntry};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use super::state::UiState;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

#[derive(Serialize)]
struct SavedTranscript<'a> {
    saved_at: String,
    base_url: &'a str,
    entries: &'a [HistoryEntry],
    #[serde(skip_serializing_if = "Option::is_none")]
    character: Option<&'a CharacterSheet>,
}

/// Default location for saved transcripts.
pub fn transcripts_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no data directory on this platform")?;
    Ok(base.join("adventure-cli").join("transcripts"))
}

/// Write the transcript as pretty JSON into `dir`, named after `now`.
pub fn write_transcript(
    dir: &Path,
    base_url: &str,
    state: &UiState,
    now: OffsetDateTime,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let stamp = now
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("format file timestamp")?;
    let path = dir.join(format!("transcript-{stamp}.json"));

    let doc = SavedTranscript {
        saved_at: now.format(&Rfc3339).context("format timestamp")?,
        base_url,
        entries: &state.transcript,
        character: state.character.as_ref(),
    };
    let json = serde_json::to_string_pretty(&doc).context("encode transcript")?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Save the transcript to the default location and report the path in `state.info`.
pub fn save_and_show_path(base_url: &str, state: &mut UiState) {
    if state.transcript.is_empty() {
        state.info = "Nothing to save yet.".into();
        return;
    }
    let res = transcripts_dir()
        .and_then(|dir| write_transcript(&dir, base_url, state, OffsetDateTime::now_utc()));
    match res {
        Ok(path) => {
            tracing::info!(path = %path.display(), "transcript saved");
            state.info = format!("Saved: {}", path.display());
        }
        Err(e) => {
            state.info = format!("Save failed: {e:#}");
        }
    }
}

/// Initialize the clipboard manager thread if not already initialized.
/// This creates a background thread that processes clipboard operations sequentially,
/// keeping each clipboard instance alive for a sufficient duration.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        // Linux clipboard managers read lazily from the owning instance.
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

/// Copy text to clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryKind;
    use time::macros::datetime;

    #[test]
    fn transcript_file_is_named_by_time_and_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let state = UiState {
            transcript: vec![
                HistoryEntry::new(EntryKind::System, "Welcome"),
                HistoryEntry::new(EntryKind::Narrative, "A dark room."),
            ],
            ..Default::default()
        };

        let path = write_transcript(
            dir.path(),
            "http://127.0.0.1:5000",
            &state,
            datetime!(2026-03-01 12:34:56 UTC),
        )
        .unwrap();

        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("transcript-20260301-123456.json")
        );
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["saved_at"], "2026-03-01T12:34:56Z");
        assert_eq!(saved["entries"][1]["type"], "narrative");
        assert_eq!(saved["entries"][1]["content"], "A dark room.");
        assert!(saved.get("character").is_none());
    }

    #[test]
    fn nested_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let state = UiState::default();
        let path = write_transcript(&nested, "x", &state, datetime!(2026-01-01 00:00:00 UTC))
            .unwrap();
        assert!(path.exists());
    }
}
