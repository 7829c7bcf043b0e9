use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use std::io;
use subreddit_follow::{FollowedSubreddit, PostSummary, CAPACITY};

const PAGE_SIZE: usize = 10;

pub struct App {
    pub posts: Vec<PostSummary>,
    pub followed: Vec<FollowedSubreddit>,
    pub state: TableState,
    pub show_detail: bool,
}

impl App {
    pub fn new(posts: Vec<PostSummary>, followed: Vec<FollowedSubreddit>) -> Self {
        let mut state = TableState::default();
        if !posts.is_empty() {
            state.select(Some(0));
        }

        Self {
            posts,
            followed,
            state,
            show_detail: false,
        }
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_post(&self) -> Option<&PostSummary> {
        self.state.selected().and_then(|i| self.posts.get(i))
    }

    pub fn next(&mut self) {
        let len = self.posts.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.posts.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.posts.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map_or(0, |i| (i + PAGE_SIZE).min(len - 1));
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.posts.is_empty() {
            return;
        }
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(PAGE_SIZE));
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => {
                    if !app.posts.is_empty() {
                        app.state.select(Some(0));
                    }
                }
                KeyCode::End => {
                    if !app.posts.is_empty() {
                        app.state.select(Some(app.posts.len() - 1));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Feed
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![
        Span::styled(
            "Top Posts",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Following {}/{}", app.followed.len(), CAPACITY),
            Style::default().fg(Color::White),
        ),
        Span::raw(":"),
    ];

    for record in &app.followed {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            format!("r/{}", record.name),
            Style::default().fg(Color::Cyan),
        ));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["#", "Score", "Subreddit", "Title", "Posted"]
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

    let rows = app.posts.iter().enumerate().map(|(rank, post)| {
        if post.is_empty() {
            return Row::new(vec![
                Cell::from(format!("{}", rank + 1)),
                Cell::from("-"),
                Cell::from(""),
                Cell::from("(no data)").style(Style::default().fg(Color::DarkGray)),
                Cell::from(""),
            ]);
        }

        let score = post.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        Row::new(vec![
            Cell::from(format!("{}", rank + 1)),
            Cell::from(score).style(Style::default().fg(Color::Green)),
            Cell::from(format!("r/{}", truncate(&post.subreddit, 20))),
            Cell::from(truncate(&post.title, 60)),
            Cell::from(post.created_at.clone()),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Length(8),
            Constraint::Length(24),
            Constraint::Min(20),
            Constraint::Length(24),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Feed "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let status_spans = vec![
        Span::styled(
            format!(" Post: {}/{} ", selected, app.posts.len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(" Details | "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" Fast | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(Line::from(status_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Post Details ");

    let post = match app.selected_post() {
        Some(p) if !p.is_empty() => p,
        _ => {
            f.render_widget(Paragraph::new("No post data").block(block), area);
            return;
        }
    };

    let label = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let score = post.score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());

    let content = vec![
        Line::from(""),
        Line::from(vec![Span::styled("  Subreddit: ", label), Span::raw(format!("r/{}", post.subreddit))]),
        Line::from(""),
        Line::from(vec![Span::styled("  Score: ", label), Span::styled(score, Style::default().fg(Color::Green))]),
        Line::from(""),
        Line::from(vec![Span::styled("  Posted: ", label), Span::raw(post.created_at.as_str())]),
        Line::from(""),
        Line::from(vec![Span::styled("  Title: ", label), Span::raw(post.title.as_str())]),
        Line::from(""),
        Line::from(vec![
            Span::styled("  URL: ", label),
            Span::styled(post.url.as_str(), Style::default().fg(Color::Blue).add_modifier(Modifier::UNDERLINED)),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "  Press Enter to close",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )),
    ];

    let detail_panel = Paragraph::new(content)
        .block(block)
        .wrap(Wrap { trim: false });

    f.render_widget(detail_panel, area);
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
