use anyhow::Result;
use chrono::Utc;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use gold_calculator::{format_inr, CalculationOutcome, Calculator, Provenance, PurityTier};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Longest weight string the input box accepts
const MAX_INPUT_LEN: usize = 12;

/// Work a key press asks for that needs the calculator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    Calculate,
    Refresh,
    Delete(String),
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Warning,
    Error,
}

pub struct App {
    pub calculator: Calculator,
    pub tier: PurityTier,
    pub input: String,
    pub last_outcome: Option<CalculationOutcome>,
    pub status: Option<(StatusKind, String)>,
    pub history_state: TableState,
    pub confirm_clear: bool,
    pub refresh_interval: chrono::Duration,
}

impl App {
    pub fn new(mut calculator: Calculator, refresh_interval: chrono::Duration) -> Self {
        let status = calculator
            .take_warnings()
            .into_iter()
            .next()
            .map(|w| (StatusKind::Warning, w));

        let mut history_state = TableState::default();
        if !calculator.history().is_empty() {
            history_state.select(Some(0));
        }

        Self {
            calculator,
            tier: PurityTier::default(),
            input: String::new(),
            last_outcome: None,
            status,
            history_state,
            confirm_clear: false,
            refresh_interval,
        }
    }

    /// Update input state for a key and report what else it asks for.
    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if self.confirm_clear {
            self.confirm_clear = false;
            return match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => Action::Clear,
                _ => {
                    self.set_status(StatusKind::Info, "Clear cancelled");
                    Action::None
                }
            };
        }

        match key.code {
            KeyCode::Esc => Action::Quit,
            KeyCode::Char('q') if self.input.is_empty() => Action::Quit,
            KeyCode::Left | KeyCode::BackTab => {
                self.tier = self.tier.previous();
                Action::None
            }
            KeyCode::Right | KeyCode::Tab => {
                self.tier = self.tier.next();
                Action::None
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                if self.input.len() < MAX_INPUT_LEN {
                    self.input.push(c);
                }
                Action::None
            }
            KeyCode::Backspace => {
                self.input.pop();
                Action::None
            }
            KeyCode::Enter => Action::Calculate,
            KeyCode::Down => {
                self.next();
                Action::None
            }
            KeyCode::Up => {
                self.previous();
                Action::None
            }
            KeyCode::Delete | KeyCode::Char('x') => match self.selected_id() {
                Some(id) => Action::Delete(id),
                None => Action::None,
            },
            KeyCode::Char('c') => {
                if self.calculator.history().is_empty() {
                    self.set_status(StatusKind::Info, "History is already empty");
                } else {
                    self.confirm_clear = true;
                }
                Action::None
            }
            KeyCode::Char('r') => Action::Refresh,
            _ => Action::None,
        }
    }

    /// Run an action against the calculator. Returns false on quit.
    pub fn apply(&mut self, runtime: &Runtime, action: Action) -> bool {
        match action {
            Action::None => {}
            Action::Quit => return false,
            Action::Calculate => {
                match runtime.block_on(self.calculator.calculate(self.tier, &self.input)) {
                    Ok(outcome) => {
                        match &outcome.warning {
                            Some(w) => self.set_status(StatusKind::Warning, w.clone()),
                            None => self.set_status(StatusKind::Info, "Saved to history"),
                        }
                        self.last_outcome = Some(outcome);
                        self.sync_selection();
                    }
                    Err(e) => self.set_status(StatusKind::Error, e.to_string()),
                }
            }
            Action::Refresh => {
                let provenance = runtime.block_on(self.calculator.refresh_rates()).provenance;
                self.set_status(StatusKind::Info, format!("Rates refreshed ({})", provenance));
            }
            Action::Delete(id) => match runtime.block_on(self.calculator.delete_entry(&id)) {
                Ok(()) => {
                    self.set_status(StatusKind::Info, "Entry deleted");
                    self.sync_selection();
                }
                Err(e) => self.set_status(StatusKind::Error, e.to_string()),
            },
            Action::Clear => match runtime.block_on(self.calculator.clear_history()) {
                Ok(()) => {
                    self.set_status(StatusKind::Info, "History cleared");
                    self.sync_selection();
                }
                Err(e) => self.set_status(StatusKind::Error, e.to_string()),
            },
        }
        true
    }

    pub fn tick(&mut self, runtime: &Runtime) {
        if self.calculator.refresh_due(Utc::now(), self.refresh_interval) {
            runtime.block_on(self.calculator.refresh_rates());
        }
    }

    pub fn selected_id(&self) -> Option<String> {
        self.history_state
            .selected()
            .and_then(|i| self.calculator.history().get(i))
            .map(|entry| entry.id.clone())
    }

    pub fn next(&mut self) {
        let len = self.calculator.history().len();
        if len == 0 {
            return;
        }
        let i = match self.history_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.history_state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.calculator.history().len();
        if len == 0 {
            return;
        }
        let i = match self.history_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.history_state.select(Some(i));
    }

    fn sync_selection(&mut self) {
        let len = self.calculator.history().len();
        if len == 0 {
            self.history_state.select(None);
        } else {
            let i = self.history_state.selected().unwrap_or(0).min(len - 1);
            self.history_state.select(Some(i));
        }
    }

    fn set_status(&mut self, kind: StatusKind, message: impl Into<String>) {
        self.status = Some((kind, message.into()));
    }
}

pub fn run_ui(runtime: &Runtime, app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, runtime, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    runtime: &Runtime,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(500))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                let action = app.handle_key(key);
                if !app.apply(runtime, action) {
                    return Ok(());
                }
            }
        } else {
            app.tick(runtime);
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(5), // Tier cards
            Constraint::Length(9), // Input + result
            Constraint::Min(0),    // History
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);
    render_rates(f, chunks[1], app);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[2]);
    render_input(f, middle[0], app);
    render_result(f, middle[1], app);

    render_history(f, chunks[3], app);
    render_status_bar(f, chunks[4], app);
}

fn provenance_color(provenance: Provenance) -> Color {
    match provenance {
        Provenance::Live => Color::Green,
        Provenance::Cached => Color::Yellow,
        Provenance::Fixed => Color::DarkGray,
    }
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let rates = app.calculator.rates();
    let as_of = rates
        .as_of
        .map(|t| t.with_timezone(&chrono::Local).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "built-in table".to_string());

    let spans = vec![
        Span::styled(
            "🪙 Gold Price Calculator",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Rates: {}", rates.provenance),
            Style::default().fg(provenance_color(rates.provenance)),
        ),
        Span::raw(format!(" ({})", as_of)),
        Span::raw("  |  "),
        Span::styled(
            format!("History: {}", app.calculator.store_name()),
            Style::default().fg(Color::White),
        ),
    ];

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_rates(f: &mut Frame, area: Rect, app: &App) {
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);

    for (i, tier) in PurityTier::ALL.iter().enumerate() {
        let selected = *tier == app.tier;
        let rate = app
            .calculator
            .rates()
            .table
            .rate(*tier)
            .map(|r| format!("₹{}/g", format_inr(r)))
            .unwrap_or_else(|| "n/a".to_string());

        let border = if selected {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let card = Paragraph::new(vec![
            Line::from(Span::styled(
                format!(" {} ", tier),
                if selected {
                    Style::default().fg(Color::Black).bg(Color::Yellow)
                } else {
                    Style::default().fg(Color::White)
                },
            )),
            Line::from(format!(" {}", rate)),
        ])
        .block(Block::default().borders(Borders::ALL).border_style(border));

        f.render_widget(card, cards[i]);
    }
}

fn render_input(f: &mut Frame, area: Rect, app: &App) {
    let content = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  Weight: ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw(app.input.clone()),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
            Span::raw(" g"),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled("  Tier: ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw(app.tier.as_str()),
        ]),
    ];

    let input = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Calculate "),
    );
    f.render_widget(input, area);
}

fn render_result(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(" Price Breakdown ");

    let outcome = match &app.last_outcome {
        Some(o) => o,
        None => {
            let empty = Paragraph::new("  Enter a weight and press Enter").block(block);
            f.render_widget(empty, area);
            return;
        }
    };

    let shown = outcome.breakdown.rounded();
    let label = Style::default().fg(Color::Cyan);
    let line = |name: &str, amount| {
        Line::from(vec![
            Span::styled(format!("  {:<16}", name), label),
            Span::raw(format!("₹{:>16}", format_inr(amount))),
        ])
    };

    let content = vec![
        Line::from(vec![
            Span::raw(format!(
                "  {} × {}g @ ₹{}/g ",
                outcome.entry.tier,
                outcome.entry.grams,
                format_inr(outcome.entry.rate)
            )),
            Span::styled(
                outcome.entry.provenance.as_str(),
                Style::default().fg(provenance_color(outcome.entry.provenance)),
            ),
        ]),
        line("Base price", shown.base),
        line("GST (3%)", shown.tax),
        line("Making (10%)", shown.fee),
        Line::from(vec![
            Span::styled(
                format!("  {:<16}", "Final price"),
                label.add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("₹{:>16}", format_inr(shown.total)),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
    ];

    f.render_widget(Paragraph::new(content).block(block), area);
}

fn render_history(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Date", "Tier", "Grams", "Rate/g", "Final Price", "Source"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.calculator.history().entries().iter().map(|entry| {
        let cells = vec![
            Cell::from(
                entry
                    .timestamp
                    .with_timezone(&chrono::Local)
                    .format("%d/%m/%Y, %I:%M %p")
                    .to_string(),
            ),
            Cell::from(entry.tier.as_str()),
            Cell::from(format!("{}g", entry.grams)),
            Cell::from(format!("₹{}", format_inr(entry.rate))),
            Cell::from(format!("₹{}", format_inr(entry.total)))
                .style(Style::default().fg(Color::Green)),
            Cell::from(entry.provenance.as_str())
                .style(Style::default().fg(provenance_color(entry.provenance))),
        ];

        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(22),
            Constraint::Length(5),
            Constraint::Length(12),
            Constraint::Length(14),
            Constraint::Length(18),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Recent Calculations "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.history_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = Style::default().fg(Color::Yellow);

    let mut status_spans = if app.confirm_clear {
        vec![
            Span::styled(" Clear all history? ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled("y", key),
            Span::raw(" confirm | any other key cancels"),
        ]
    } else {
        vec![
            Span::styled(" ←/→", key),
            Span::raw(" Tier | "),
            Span::styled("Enter", key),
            Span::raw(" Calc | "),
            Span::styled("↑/↓", key),
            Span::raw(" Nav | "),
            Span::styled("x", key),
            Span::raw(" Delete | "),
            Span::styled("c", key),
            Span::raw(" Clear | "),
            Span::styled("r", key),
            Span::raw(" Refresh | "),
            Span::styled("q", key),
            Span::raw(" Quit"),
        ]
    };

    if let Some((kind, message)) = &app.status {
        let color = match kind {
            StatusKind::Info => Color::Green,
            StatusKind::Warning => Color::Yellow,
            StatusKind::Error => Color::Red,
        };
        status_spans.push(Span::raw("  ·  "));
        status_spans.push(Span::styled(message.clone(), Style::default().fg(color)));
    }

    let status = Paragraph::new(Line::from(status_spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));
    f.render_widget(status, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use gold_calculator::{LocalStore, PriceSourceAdapter};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn test_app(runtime: &Runtime) -> App {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let calculator =
            runtime.block_on(Calculator::open(PriceSourceAdapter::fixed_only(), store));
        App::new(calculator, chrono::Duration::minutes(30))
    }

    fn type_grams(app: &mut App, text: &str) {
        for c in text.chars() {
            assert_eq!(app.handle_key(press(KeyCode::Char(c))), Action::None);
        }
    }

    #[test]
    fn test_tier_cycles_with_arrows() {
        let runtime = Runtime::new().unwrap();
        let mut app = test_app(&runtime);

        assert_eq!(app.tier, PurityTier::Karat24);
        app.handle_key(press(KeyCode::Right));
        assert_eq!(app.tier, PurityTier::Karat22);
        app.handle_key(press(KeyCode::Left));
        app.handle_key(press(KeyCode::Left));
        assert_eq!(app.tier, PurityTier::Karat18);
    }

    #[test]
    fn test_input_editing() {
        let runtime = Runtime::new().unwrap();
        let mut app = test_app(&runtime);

        type_grams(&mut app, "12.5a");
        assert_eq!(app.input, "12.5");
        app.handle_key(press(KeyCode::Backspace));
        assert_eq!(app.input, "12.");

        // 'q' only quits with an empty input box
        assert_eq!(app.handle_key(press(KeyCode::Char('q'))), Action::None);
        assert_eq!(app.handle_key(press(KeyCode::Esc)), Action::Quit);
    }

    #[test]
    fn test_calculate_then_delete() {
        let runtime = Runtime::new().unwrap();
        let mut app = test_app(&runtime);

        type_grams(&mut app, "10");
        let action = app.handle_key(press(KeyCode::Enter));
        assert!(app.apply(&runtime, action));

        let outcome = app.last_outcome.as_ref().unwrap();
        assert_eq!(outcome.breakdown.rounded().total, dec!(131252.21));
        assert_eq!(app.history_state.selected(), Some(0));

        let action = app.handle_key(press(KeyCode::Char('x')));
        assert!(matches!(action, Action::Delete(_)));
        app.apply(&runtime, action);
        assert!(app.calculator.history().is_empty());
        assert_eq!(app.history_state.selected(), None);
    }

    #[test]
    fn test_invalid_input_sets_error_status() {
        let runtime = Runtime::new().unwrap();
        let mut app = test_app(&runtime);

        let action = app.handle_key(press(KeyCode::Enter));
        app.apply(&runtime, action);

        assert!(app.last_outcome.is_none());
        assert!(matches!(app.status, Some((StatusKind::Error, _))));
        assert!(app.calculator.history().is_empty());
    }

    #[test]
    fn test_clear_needs_confirmation() {
        let runtime = Runtime::new().unwrap();
        let mut app = test_app(&runtime);
        type_grams(&mut app, "1");
        let action = app.handle_key(press(KeyCode::Enter));
        app.apply(&runtime, action);

        assert_eq!(app.handle_key(press(KeyCode::Char('c'))), Action::None);
        assert!(app.confirm_clear);
        assert_eq!(app.handle_key(press(KeyCode::Char('n'))), Action::None);
        assert_eq!(app.calculator.history().len(), 1);

        app.handle_key(press(KeyCode::Char('c')));
        let action = app.handle_key(press(KeyCode::Char('y')));
        assert_eq!(action, Action::Clear);
        app.apply(&runtime, action);
        assert!(app.calculator.history().is_empty());
    }
}
