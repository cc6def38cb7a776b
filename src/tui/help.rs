use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn keybind(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame, suggestions: &[String]) {
    let mut lines = vec![
        Line::from("Keybinds:"),
        keybind("Enter", 9, "Start the adventure / send the typed command"),
        keybind("Esc", 11, "Quit"),
        keybind("Ctrl-C", 8, "Quit"),
        keybind("F1..F4", 8, "Send a quick command"),
        keybind("Ctrl-S", 8, "Save transcript as JSON"),
        keybind("Ctrl-Y", 8, "Copy the last narration to the clipboard"),
        keybind("Ctrl-R", 8, "Refresh character sheet"),
        keybind("PgUp/PgDn", 5, "Scroll the transcript"),
        keybind("Tab", 11, "Switch tabs"),
        Line::from(""),
        Line::from("Quick commands:"),
    ];
    for (i, s) in suggestions.iter().take(4).enumerate() {
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("F{}", i + 1), Style::default().fg(Color::Magenta)),
            Span::raw("  "),
            Span::raw(s.clone()),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Commands are processed by the narrator in the background; input unlocks once the reply arrives.",
        Style::default().fg(Color::Gray),
    )));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
