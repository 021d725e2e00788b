mod app;

use std::io;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame, Terminal,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

use app::{AppState, FetchStatus};
use coingecko_history::config::{load_dotenv, Config, DEFAULT_WINDOW};
use coingecko_history::fetcher::CoinGeckoClient;
use coingecko_history::types::Days;

#[derive(Parser, Debug)]
#[command(author, version, about = "Price, moving average and cumulative return in the terminal")]
struct Args {
    coin_id: String,
    #[arg(long = "vs", default_value = "usd")]
    vs_currency: String,
    #[arg(long, default_value = "365")]
    days: Days,
    #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
    window: i64,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();

    load_dotenv();
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    // Logs go to stderr so they don't tear the alternate screen.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(io::stderr)
        .init();

    let client = match CoinGeckoClient::new(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
    };

    let mut app = AppState::new(args.coin_id, args.vs_currency, args.days, args.window);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &CoinGeckoClient,
) -> io::Result<()> {
    let poll_interval = Duration::from_millis(250);

    loop {
        terminal.draw(|f| render(f, app))?;

        if event::poll(poll_interval)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.status = FetchStatus::Loading;
                            terminal.draw(|f| render(f, app))?;
                            app.refresh(client).await;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState) {
    let area = f.area();

    // header | price + SMA | cumulative return | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(60),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_price_chart(f, app, chunks[1]);
    render_return_chart(f, app, chunks[2]);
    render_footer(f, chunks[3]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        FetchStatus::Ready => (format!("● {} rows", app.rows), Color::Green),
        FetchStatus::Loading => ("◌ loading".to_string(), Color::Yellow),
        FetchStatus::Error(e) => (format!("✗ {}", truncate(e, 60)), Color::Red),
    };

    let spans = vec![
        Span::styled(
            format!(" {} / {}  ", app.coin_id, app.vs_currency.to_uppercase()),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(format!("days: {}", app.days), Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(format!("window: {}", app.window), Style::default().fg(Color::White)),
    ];

    let paragraph = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(paragraph, area);
}

fn x_axis(app: &AppState) -> Axis<'static> {
    Axis::default()
        .style(Style::default().fg(Color::DarkGray))
        .bounds(app.data.x_bounds())
        .labels(vec![
            Span::raw(app.data.first_label.clone()),
            Span::raw(app.data.last_label.clone()),
        ])
}

fn y_labels(bounds: [f64; 2], suffix: &str) -> Vec<Span<'static>> {
    let mid = (bounds[0] + bounds[1]) / 2.0;
    [bounds[0], mid, bounds[1]]
        .iter()
        .map(|v| Span::raw(format!("{v:.1}{suffix}")))
        .collect()
}

fn titled_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            title,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
}

fn render_price_chart(f: &mut Frame, app: &AppState, area: Rect) {
    let datasets = vec![
        Dataset::default()
            .name("price")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&app.data.price),
        Dataset::default()
            .name(format!("{}-row SMA", app.window))
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Yellow))
            .data(&app.data.sma),
    ];

    let y_bounds = app.data.price_bounds();
    let chart = Chart::new(datasets)
        .block(titled_block(" PRICE ● SMA "))
        .x_axis(x_axis(app))
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds(y_bounds)
                .labels(y_labels(y_bounds, "")),
        );
    f.render_widget(chart, area);
}

fn render_return_chart(f: &mut Frame, app: &AppState, area: Rect) {
    let [x_lo, x_hi] = app.data.x_bounds();
    let zero_line = [(x_lo, 0.0), (x_hi, 0.0)];

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::DarkGray))
            .data(&zero_line),
        Dataset::default()
            .name("cumulative return")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Green))
            .data(&app.data.cumulative),
    ];

    let y_bounds = app.data.cumulative_bounds();
    let chart = Chart::new(datasets)
        .block(titled_block(" CUMULATIVE RETURN (%) "))
        .x_axis(x_axis(app))
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::DarkGray))
                .bounds(y_bounds)
                .labels(y_labels(y_bounds, "%")),
        );
    f.render_widget(chart, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refetch"),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
