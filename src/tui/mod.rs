mod export;
mod help;
mod state;

use crate::cli::{build_config, Cli};
use crate::engine::{GameBackend, HttpBackend};
use crate::model::{fold_name, CharacterSheet, ClientConfig, SessionEvent, Severity};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{entry_style, push_wrapped_status_kv, severity_color, UiState};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const SCROLL_STEP: usize = 5;

// Ability scores always shown on the sheet, under the names the reference backend uses.
const CANONICAL_ATTRIBUTES: [&str; 6] = [
    "Força",
    "Destreza",
    "Constituição",
    "Inteligência",
    "Sabedoria",
    "Carisma",
];

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let backend: Arc<dyn GameBackend> = Arc::new(HttpBackend::new(&cfg)?);

    // Unbounded channels: the controller never waits on the UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_cfg = cfg.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_cfg, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&cfg, backend, event_tx, cmd_rx).await;

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
    cfg: ClientConfig,
    mut event_rx: UnboundedReceiver<SessionEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; it mirrors controller events.
    let mut state = UiState {
        suggestions: cfg.suggestions.clone(),
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
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
                match (k.modifiers, k.code) {
                    (_, KeyCode::Esc) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (KeyModifiers::CONTROL, KeyCode::Char('s')) => {
                        export::save_and_show_path(&cfg.base_url, &mut state);
                    }
                    (KeyModifiers::CONTROL, KeyCode::Char('y')) => {
                        let text = state.last_narrative().map(|e| e.text.clone());
                        state.info = match text {
                            Some(text) => match export::copy_to_clipboard(&text) {
                                Ok(()) => "✓ Copied the last narration to the clipboard".into(),
                                Err(e) => format!("Clipboard copy failed: {e:#}"),
                            },
                            None => "No narration to copy yet.".into(),
                        };
                    }
                    (KeyModifiers::CONTROL, KeyCode::Char('r')) => {
                        let _ = cmd_tx.send(UiCommand::RefreshCharacter);
                        state.info = "Refreshing character sheet…".into();
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 3;
                    }
                    (_, KeyCode::Enter) => {
                        if state.ended {
                            state.info = "The session has ended. Press Esc to quit.".into();
                        } else if let Some(text) = state.take_input() {
                            let _ = cmd_tx.send(UiCommand::Submit(text));
                        } else if !state.input_enabled {
                            // The controller ignores this while a session is live or starting.
                            let _ = cmd_tx.send(UiCommand::Start);
                        }
                    }
                    (_, KeyCode::F(n @ 1..=4)) => {
                        if let Some(text) = state.take_suggestion(usize::from(n - 1)) {
                            let _ = cmd_tx.send(UiCommand::Submit(text));
                        }
                    }
                    (_, KeyCode::PageUp) => state.scroll_up(SCROLL_STEP),
                    (_, KeyCode::PageDown) => state.scroll_down(SCROLL_STEP),
                    (_, KeyCode::Backspace) => {
                        if state.tab == 0 {
                            state.input.pop();
                        }
                    }
                    (m, KeyCode::Char(c)) if !m.contains(KeyModifiers::CONTROL) => {
                        if state.tab == 0 && !state.ended {
                            state.input.push(c);
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Adventure"),
        Line::from("Character"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("adventure-cli"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_adventure(chunks[1], f, state),
        1 => draw_character(chunks[1], f, state.character.as_ref()),
        _ => help::draw_help(chunks[1], f, &state.suggestions),
    }
}

fn draw_adventure(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    // Narrow terminal: transcript only; the sheet stays on its own tab.
    let (main_area, side_area) = if area.width >= 100 {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(36)].as_ref())
            .split(area);
        (cols[0], Some(cols[1]))
    } else {
        (area, None)
    };

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(0),    // Transcript
                Constraint::Length(3), // Command input
                Constraint::Length(3), // Status line
            ]
            .as_ref(),
        )
        .split(main_area);

    draw_transcript(rows[0], f, state);
    draw_input(rows[1], f, state);
    draw_status(rows[2], f, state);

    if let Some(side) = side_area {
        draw_character(side, f, state.character.as_ref());
    }
}

fn transcript_lines(state: &UiState) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(p) = state.placeholder.as_deref() {
        lines.push(Line::from(Span::styled(
            p.to_string(),
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        )));
    }
    for entry in &state.transcript {
        lines.push(Line::from(Span::styled(
            crate::text_output::format_entry(entry),
            entry_style(entry.kind),
        )));
        lines.push(Line::from(""));
    }
    if !state.input_enabled {
        if let Some(cmd) = state.last_submitted.as_deref() {
            lines.push(Line::from(vec![
                Span::styled(format!("> {cmd}"), Style::default().fg(Color::Cyan)),
                Span::styled(" …", Style::default().fg(Color::DarkGray)),
            ]));
        }
    }
    lines
}

/// Rows a set of lines occupies once wrapped to `width` columns.
fn wrapped_height(lines: &[Line<'_>], width: u16) -> usize {
    let width = usize::from(width.max(1));
    lines
        .iter()
        .map(|l| l.width().max(1).div_ceil(width))
        .sum()
}

fn draw_transcript(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let lines = transcript_lines(state);
    let inner_width = area.width.saturating_sub(2);
    let inner_height = usize::from(area.height.saturating_sub(2));
    let total = wrapped_height(&lines, inner_width);
    let max_scroll = total.saturating_sub(inner_height);
    let top = max_scroll.saturating_sub(state.scroll_from_bottom);

    let title = if state.scroll_from_bottom > 0 && top > 0 {
        format!("Transcript (scrolled, {} entries)", state.transcript.len())
    } else {
        format!("Transcript ({} entries)", state.transcript.len())
    };
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((u16::try_from(top).unwrap_or(u16::MAX), 0))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_input(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (title, line) = if state.ended {
        (
            "Command (session ended)",
            Line::from(Span::styled(
                "Press Esc to quit.",
                Style::default().fg(Color::DarkGray),
            )),
        )
    } else if state.input_enabled {
        (
            "Command",
            Line::from(vec![
                Span::raw("> "),
                Span::raw(state.input.clone()),
                Span::styled("▏", Style::default().fg(Color::Yellow)),
            ]),
        )
    } else {
        (
            "Command (locked)",
            Line::from(vec![
                Span::styled("> ", Style::default().fg(Color::DarkGray)),
                Span::styled(state.input.clone(), Style::default().fg(Color::DarkGray)),
            ]),
        )
    };
    let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut spans = vec![Span::styled(
        state.status.text.clone(),
        Style::default().fg(severity_color(state.status.severity)),
    )];
    if !state.info.is_empty() && state.status.severity != Severity::Ended {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            state.info.clone(),
            Style::default().fg(Color::Gray),
        ));
    }
    let p = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}

fn attribute_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical ability scores first (`N/A` when missing), then anything else the backend sent.
fn attribute_rows(sheet: &CharacterSheet) -> Vec<(String, String)> {
    let mut rows: Vec<(String, String)> = CANONICAL_ATTRIBUTES
        .iter()
        .map(|name| {
            let value = sheet
                .attribute(name)
                .map(attribute_text)
                .unwrap_or_else(|| "N/A".to_string());
            (name.to_string(), value)
        })
        .collect();
    let canonical: Vec<String> = CANONICAL_ATTRIBUTES.iter().map(|n| fold_name(n)).collect();
    for (name, value) in &sheet.attributes {
        if !canonical.contains(&fold_name(name)) {
            rows.push((name.clone(), attribute_text(value)));
        }
    }
    rows
}

fn draw_character(area: Rect, f: &mut ratatui::Frame, sheet: Option<&CharacterSheet>) {
    let title = sheet
        .and_then(|s| s.name.clone())
        .unwrap_or_else(|| "Character".to_string());
    let Some(sheet) = sheet else {
        let p = Paragraph::new("No character sheet yet.")
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(p, area);
        return;
    };

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let ratio = sheet.hp_ratio().unwrap_or(0.0);
    let hp_color = if ratio > 0.5 {
        Color::Green
    } else if ratio > 0.25 {
        Color::Yellow
    } else {
        Color::Red
    };
    let hp_label = match (sheet.hp_current, sheet.hp_max) {
        (Some(cur), Some(max)) => format!("{cur}/{max}"),
        (None, Some(max)) => format!("?/{max}"),
        _ => "unknown".to_string(),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("HP"))
        .gauge_style(Style::default().fg(hp_color))
        .ratio(ratio)
        .label(hp_label);
    f.render_widget(gauge, rows[0]);

    let width = rows[1].width;
    let mut lines: Vec<Line<'static>> = Vec::new();
    push_wrapped_status_kv(&mut lines, "Class", sheet.class.as_deref().unwrap_or(""), width);
    push_wrapped_status_kv(&mut lines, "Race", sheet.race.as_deref().unwrap_or(""), width);
    if let Some(level) = sheet.level {
        push_wrapped_status_kv(&mut lines, "Level", &level.to_string(), width);
    }
    lines.push(Line::from(""));
    for (name, value) in attribute_rows(sheet) {
        push_wrapped_status_kv(&mut lines, &name, &value, width);
    }
    if !sheet.spells.is_empty() {
        lines.push(Line::from(""));
        push_wrapped_status_kv(&mut lines, "Spells", &sheet.spells.join(", "), width);
    }
    if !sheet.equipment.is_empty() {
        lines.push(Line::from(""));
        push_wrapped_status_kv(&mut lines, "Equipment", &sheet.equipment.join(", "), width);
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, rows[1]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryKind, HistoryEntry};

    #[test]
    fn wrapped_height_counts_wrapped_rows() {
        let lines = vec![
            Line::from("x".repeat(25)),
            Line::from(""),
            Line::from("short"),
        ];
        assert_eq!(wrapped_height(&lines, 10), 3 + 1 + 1);
    }

    #[test]
    fn sheet_lists_canonical_attributes_then_extras() {
        let sheet: CharacterSheet = serde_json::from_str(
            r#"{"atributos":{"forca":8,"INTELIGÊNCIA":"17","Sorte":3}}"#,
        )
        .unwrap();
        let rows = attribute_rows(&sheet);
        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Força", "8"),
                ("Destreza", "N/A"),
                ("Constituição", "N/A"),
                ("Inteligência", "17"),
                ("Sabedoria", "N/A"),
                ("Carisma", "N/A"),
                ("Sorte", "3"),
            ]
        );
    }

    #[test]
    fn pending_command_is_shown_only_while_locked() {
        let mut state = UiState {
            transcript: vec![HistoryEntry::new(EntryKind::System, "Welcome")],
            placeholder: None,
            last_submitted: Some("look".into()),
            ..Default::default()
        };
        let locked = transcript_lines(&state);
        assert_eq!(locked.len(), 3);

        state.input_enabled = true;
        assert_eq!(transcript_lines(&state).len(), 2);
    }
}
