use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

fn key_line(key: &str, pad: usize, what: &str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key.to_string(), Style::default().fg(Color::Magenta)),
        Span::raw(format!("{:pad$}{what}", "")),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (a running batch keeps running server-side)"),
        ]),
        key_line("Home", 8, "Back to start"),
        key_line("Esc", 9, "Back"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Files:"),
        key_line("Enter", 7, "Load the typed paths (separate with spaces)"),
        Line::from(""),
        Line::from("Review:"),
        key_line("↑/↓", 9, "Navigate (or j/k)"),
        key_line("space", 7, "Toggle run"),
        key_line("a", 11, "Toggle all"),
        key_line("e", 11, "Edit run"),
        key_line("d", 11, "Remove run"),
        key_line("s", 11, "Submit selected runs"),
        Line::from(""),
        Line::from("Edit:"),
        key_line("Tab", 9, "Next field"),
        key_line("Ctrl-S", 6, "Save"),
        key_line("Esc", 9, "Discard changes"),
        Line::from(""),
        Line::from("Monitoring:"),
        key_line("c", 11, "Cancel batch"),
        key_line("b", 11, "Stop watching (batch keeps running)"),
        key_line("y", 11, "Copy batch ID to clipboard"),
        Line::from(""),
        Line::from("Results:"),
        key_line("n", 11, "Start a new batch"),
        key_line("r", 11, "Back to review (failed submissions)"),
        key_line("s", 11, "Save results JSON"),
        key_line("x", 11, "Export results JSON to the current directory"),
        key_line("y", 11, "Copy batch ID to clipboard"),
    ])
    .wrap(Wrap { trim: false })
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
