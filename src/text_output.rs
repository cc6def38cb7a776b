//! Line rendering for text mode.
//!
//! Turns controller events into stdout/stderr lines. Transcript entries go to stdout (plain
//! or JSON lines); status chatter goes to stderr so stdout stays pipeable.

use crate::model::{CharacterSheet, EntryKind, HistoryEntry, SessionEvent, Severity, StatusMessage};
use anyhow::{Context, Result};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Output line routing for stdout/stderr writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

#[derive(Serialize)]
struct JsonLine<'a> {
    time: String,
    #[serde(rename = "type")]
    kind: &'a str,
    content: &'a str,
}

pub(crate) struct TextRenderer {
    json: bool,
    last_status: Option<StatusMessage>,
}

impl TextRenderer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last_status: None,
        }
    }

    pub fn render(&mut self, ev: &SessionEvent, now: OffsetDateTime) -> Result<Vec<OutputLine>> {
        let mut out = Vec::new();
        match ev {
            SessionEvent::TranscriptAppended { entries, .. } => {
                for entry in entries {
                    out.push(if self.json {
                        OutputLine::Stdout(json_line(entry_kind(entry.kind), &entry.text, now)?)
                    } else {
                        OutputLine::Stdout(format_entry(entry))
                    });
                }
            }
            SessionEvent::Status(status) => {
                // Errors already reach stdout as transcript entries.
                let changed = self.last_status.as_ref() != Some(status);
                if changed && status.severity == Severity::Processing {
                    out.push(OutputLine::Stderr(format!("... {}", status.text)));
                }
                self.last_status = Some(status.clone());
            }
            SessionEvent::InputEnabled(_) => {}
            SessionEvent::Character(sheet) => {
                out.push(OutputLine::Stderr(format_character(sheet)));
            }
            SessionEvent::Ended { message } => {
                out.push(if self.json {
                    OutputLine::Stdout(json_line("ended", message, now)?)
                } else {
                    OutputLine::Stdout(format!("*** {message} ***"))
                });
            }
        }
        Ok(out)
    }
}

fn entry_kind(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Player => "player",
        EntryKind::System => "system",
        EntryKind::Narrative => "narrative",
        EntryKind::Error => "error",
        EntryKind::Other => "other",
    }
}

fn json_line(kind: &str, content: &str, now: OffsetDateTime) -> Result<String> {
    let time = now.format(&Rfc3339).context("failed to format timestamp")?;
    serde_json::to_string(&JsonLine {
        time,
        kind,
        content,
    })
    .context("failed to encode transcript line")
}

pub(crate) fn format_entry(entry: &HistoryEntry) -> String {
    match entry.kind {
        EntryKind::Player => format!("> {}", entry.text),
        EntryKind::System => format!("[{}]", entry.text),
        EntryKind::Error => format!("! {}", entry.text),
        EntryKind::Narrative | EntryKind::Other => entry.text.clone(),
    }
}

pub(crate) fn format_character(sheet: &CharacterSheet) -> String {
    let mut parts = Vec::new();
    if let Some(name) = sheet.name.as_deref() {
        parts.push(name.to_string());
    }
    let lineage: Vec<&str> = [sheet.race.as_deref(), sheet.class.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !lineage.is_empty() {
        parts.push(lineage.join(" "));
    }
    if let Some(level) = sheet.level {
        parts.push(format!("level {level}"));
    }
    match (sheet.hp_current, sheet.hp_max) {
        (Some(cur), Some(max)) => parts.push(format!("HP {cur}/{max}")),
        (None, Some(max)) => parts.push(format!("HP ?/{max}")),
        _ => {}
    }
    if parts.is_empty() {
        "Character: (unknown)".to_string()
    } else {
        format!("Character: {}", parts.join(", "))
    }
}
