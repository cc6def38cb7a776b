use crate::model::{
    CharacterSheet, EntryKind, HistoryEntry, SessionEvent, Severity, StatusMessage,
};
use crate::orchestrator::{status, START_PROMPT};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};

pub struct UiState {
    pub tab: usize,
    pub info: String,

    // Mirror of the controller's transcript, fed by events only.
    pub transcript: Vec<HistoryEntry>,
    pub placeholder: Option<String>,
    pub status: StatusMessage,
    pub input_enabled: bool,
    pub ended: bool,

    pub input: String,
    pub last_submitted: Option<String>, // Echoed while the command is in flight
    pub scroll_from_bottom: usize,

    pub character: Option<CharacterSheet>,
    pub suggestions: Vec<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            info: String::new(),
            transcript: Vec::new(),
            placeholder: Some(START_PROMPT.to_string()),
            status: StatusMessage::new(status::NOT_STARTED, Severity::Ready),
            input_enabled: false,
            ended: false,
            input: String::new(),
            last_submitted: None,
            scroll_from_bottom: 0,
            character: None,
            suggestions: Vec::new(),
        }
    }
}

impl UiState {
    pub fn apply_event(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::TranscriptAppended {
                entries,
                placeholder_cleared,
            } => {
                if placeholder_cleared {
                    self.placeholder = None;
                }
                self.transcript.extend(entries);
                // New text snaps the view back to the latest entry.
                self.scroll_from_bottom = 0;
            }
            SessionEvent::Status(s) => self.status = s,
            SessionEvent::InputEnabled(enabled) => {
                self.input_enabled = enabled;
                if enabled {
                    self.last_submitted = None;
                }
            }
            SessionEvent::Character(sheet) => self.character = Some(*sheet),
            SessionEvent::Ended { message } => {
                self.ended = true;
                self.last_submitted = None;
                self.info = message;
            }
        }
    }

    /// Take the typed command for submission. Leaves the buffer untouched while input is
    /// locked so nothing the player typed is lost.
    pub fn take_input(&mut self) -> Option<String> {
        if !self.input_enabled {
            return None;
        }
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.input.clear();
        self.last_submitted = Some(text.clone());
        Some(text)
    }

    /// Quick command for F1..F4, gated like typed input.
    pub fn take_suggestion(&mut self, idx: usize) -> Option<String> {
        if !self.input_enabled {
            return None;
        }
        let text = self.suggestions.get(idx)?.clone();
        self.last_submitted = Some(text.clone());
        Some(text)
    }

    pub fn last_narrative(&self) -> Option<&HistoryEntry> {
        self.transcript
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Narrative)
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(lines);
    }
}

pub fn severity_color(s: Severity) -> Color {
    match s {
        Severity::Ready => Color::Green,
        Severity::Processing => Color::Yellow,
        Severity::Error => Color::Red,
        Severity::Ended => Color::Magenta,
    }
}

pub fn entry_style(kind: EntryKind) -> Style {
    match kind {
        EntryKind::Player => Style::default().fg(Color::Cyan),
        EntryKind::System => Style::default().fg(Color::Gray),
        EntryKind::Narrative | EntryKind::Other => Style::default(),
        EntryKind::Error => Style::default().fg(Color::Red),
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}
