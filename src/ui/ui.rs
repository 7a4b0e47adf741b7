use image::DynamicImage;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::backend::prefetch::{ComicStore, ResolutionState};
use crate::backend::prefs::{Preferences, Theme};
use crate::backend::window::{ComicId, Window, select_window};
use crate::backend::xkcd::Comic;

const LIST_PANEL_WIDTH: u16 = 42;
const TOAST_TTL: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    Ready,
    Error,
}

/// What the last primary fetch asked for, kept so the error screen can
/// retry it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    Latest,
    Id(ComicId),
}

pub struct App {
    pub state: AppState,
    pub loading_message: String,
    pub error_message: String,
    pub last_fetch: FetchTarget,
    pub fetching: bool,
    pub current: Option<Comic>,
    pub latest_id: Option<ComicId>,
    pub store: ComicStore,
    pub prefs: Preferences,
    pub list_open: bool,
    pub list_state: ListState,
    pub jump_input: Option<String>,
    pub show_details: bool,
    pub toast: Option<(String, Instant)>,
    pub picker: Option<Picker>,
    pub image_states: HashMap<ComicId, StatefulProtocol>,
}

impl Default for App {
    fn default() -> Self {
        Self::with_picker(Preferences::default(), None)
    }
}

impl App {
    pub fn new(prefs: Preferences) -> Self {
        let picker = Picker::from_query_stdio().ok();
        Self::with_picker(prefs, picker)
    }

    pub fn with_picker(prefs: Preferences, picker: Option<Picker>) -> Self {
        Self {
            state: AppState::Loading,
            loading_message: "Initializing...".to_string(),
            error_message: String::new(),
            last_fetch: FetchTarget::Latest,
            fetching: false,
            current: None,
            latest_id: None,
            store: ComicStore::new(),
            prefs,
            list_open: false,
            list_state: ListState::default(),
            jump_input: None,
            show_details: false,
            toast: None,
            picker,
            image_states: HashMap::new(),
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.loading_message = message.to_string();
    }

    pub fn set_ready(&mut self) {
        self.state = AppState::Ready;
    }

    pub fn set_error(&mut self, message: String) {
        self.state = AppState::Error;
        self.error_message = message;
        self.fetching = false;
    }

    pub fn show_toast(&mut self, message: &str) {
        self.toast = Some((message.to_string(), Instant::now()));
    }

    pub fn expire_toast(&mut self) {
        if let Some((_, shown)) = &self.toast {
            if shown.elapsed() >= TOAST_TTL {
                self.toast = None;
            }
        }
    }

    pub fn add_comic_image(&mut self, id: ComicId, image: DynamicImage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(image);
            self.image_states.insert(id, protocol);
        }
    }

    /// The id window the list displays, derived from the current position.
    pub fn list_window(&self) -> Option<Window> {
        let latest = self.latest_id?;
        let current = self.current.as_ref()?.id;
        Some(select_window(latest, current))
    }

    pub fn selected_list_id(&self) -> Option<ComicId> {
        let window = self.list_window()?;
        let idx = self.list_state.selected()? as u32;
        let id = window.start + idx;
        window.contains(id).then_some(id)
    }

    /// The comic the main pane previews: the list selection once its
    /// metadata has resolved, otherwise the current comic.
    pub fn preview_comic(&self) -> Option<Comic> {
        if self.list_open {
            if let Some(comic) = self.selected_list_id().and_then(|id| self.store.get(id)) {
                return Some(comic.clone());
            }
        }
        self.current.clone()
    }

    /// Puts the list selection on the current comic.
    pub fn center_list_selection(&mut self) {
        if let (Some(window), Some(comic)) = (self.list_window(), self.current.as_ref()) {
            if window.contains(comic.id) {
                self.list_state
                    .select(Some((comic.id - window.start) as usize));
            }
        }
    }
}

/// Colors derived from the persisted theme preference.
struct Palette {
    fg: Color,
    dim: Color,
    accent: Color,
    border: Color,
    highlight: Color,
}

fn palette(theme: Theme) -> Palette {
    match theme {
        Theme::Light => Palette {
            fg: Color::Black,
            dim: Color::DarkGray,
            accent: Color::Blue,
            border: Color::Gray,
            highlight: Color::Yellow,
        },
        Theme::Dark => Palette {
            fg: Color::White,
            dim: Color::DarkGray,
            accent: Color::Cyan,
            border: Color::Gray,
            highlight: Color::Yellow,
        },
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    match app.state {
        AppState::Loading => draw_loading_screen(f, app),
        AppState::Error => draw_error_screen(f, app),
        AppState::Ready => draw_main_ui(f, app),
    }

    draw_toast(f, app);
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let pal = palette(app.prefs.theme);
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("xkcd")
        .border_style(Style::default().fg(pal.accent));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let frame_idx = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        / 100) as usize
        % spinner_frames.len();

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner_frames[frame_idx]),
            Style::default()
                .fg(pal.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default().fg(pal.fg).add_modifier(Modifier::BOLD),
        ),
    ]);

    let loading_paragraph = Paragraph::new(loading_text).alignment(Alignment::Center);
    f.render_widget(loading_paragraph, center_layout[1]);

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(pal.dim))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_error_screen(f: &mut Frame, app: &App) {
    let pal = palette(app.prefs.theme);
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("xkcd — error")
        .border_style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(1),
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let title = Paragraph::new("Failed to load comic")
        .style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center);
    f.render_widget(title, layout[1]);

    let message = Paragraph::new(&*app.error_message)
        .style(Style::default().fg(pal.dim))
        .alignment(Alignment::Center);
    f.render_widget(message, layout[2]);

    let hint = Paragraph::new("r: retry   G: latest   q: quit")
        .style(Style::default().fg(pal.accent))
        .alignment(Alignment::Center);
    f.render_widget(hint, layout[3]);
}

fn draw_main_ui(f: &mut Frame, app: &mut App) {
    let pal = palette(app.prefs.theme);
    let area = f.area();

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(10),   // content
            Constraint::Length(3), // footer
        ])
        .split(area);

    draw_header(f, root[0], app, &pal);

    if app.list_open {
        let content = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(LIST_PANEL_WIDTH), Constraint::Min(20)])
            .split(root[1]);

        draw_list_panel(f, content[0], app, &pal);
        let preview = app.preview_comic();
        draw_comic(f, content[1], app, &pal, preview);
    } else {
        let current = app.current.clone();
        draw_comic(f, root[1], app, &pal, current);
    }

    draw_footer(f, root[2], app, &pal);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App, pal: &Palette) {
    let mut spans = vec![Span::styled(
        "xkcd",
        Style::default().fg(pal.fg).add_modifier(Modifier::BOLD),
    )];

    if let Some(comic) = &app.current {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("#{}", comic.id),
            Style::default().fg(pal.accent),
        ));
        spans.push(Span::raw("  "));
        spans.push(Span::styled(&*comic.title, Style::default().fg(pal.fg)));
        if let Some(latest) = app.latest_id {
            spans.push(Span::styled(
                format!("  (of {latest})"),
                Style::default().fg(pal.dim),
            ));
        }
    }

    if app.fetching {
        spans.push(Span::styled("  fetching...", Style::default().fg(pal.dim)));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(pal.border)),
    );
    f.render_widget(header, area);
}

fn draw_comic(f: &mut Frame, area: Rect, app: &mut App, pal: &Palette, comic: Option<Comic>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(pal.border));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(comic) = comic else {
        let placeholder = Paragraph::new("No comic loaded")
            .alignment(Alignment::Center)
            .style(Style::default().fg(pal.dim));
        f.render_widget(placeholder, inner);
        return;
    };

    let meta_line = Line::from(vec![
        Span::styled(
            format!("Published {}", comic.published()),
            Style::default().fg(pal.dim),
        ),
        Span::raw("   "),
        Span::styled(
            format!("♥ {}", app.prefs.likes_for(comic.id)),
            Style::default().fg(Color::Red),
        ),
    ]);

    let alt_height = 4;
    let details_height = if app.show_details {
        (inner.height / 3).max(6)
    } else {
        0
    };

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // meta
            Constraint::Min(6),    // image
            Constraint::Length(alt_height),
            Constraint::Length(details_height),
        ])
        .split(inner);

    f.render_widget(Paragraph::new(meta_line), layout[0]);

    if let Some(state) = app.image_states.get_mut(&comic.id) {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, layout[1], state);
    } else {
        let placeholder = if app.picker.is_none() {
            "terminal has no image support — press w to open in browser"
        } else {
            "loading image..."
        };
        let image_placeholder = Paragraph::new(placeholder)
            .alignment(Alignment::Center)
            .style(Style::default().fg(pal.dim));
        f.render_widget(image_placeholder, layout[1]);
    }

    let alt_width = inner.width.saturating_sub(2) as usize;
    let alt_lines = wrap_text(&comic.alt_text, alt_width.max(1), alt_height as usize);
    let alt = Paragraph::new(alt_lines.join("\n"))
        .style(Style::default().fg(pal.dim).add_modifier(Modifier::ITALIC));
    f.render_widget(alt, layout[2]);

    if app.show_details {
        draw_details(f, layout[3], &comic, pal);
    }
}

fn draw_details(f: &mut Frame, area: Rect, comic: &Comic, pal: &Palette) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Details")
        .border_style(Style::default().fg(pal.border));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let transcript = if comic.transcript.is_empty() {
        "No transcript available"
    } else {
        &comic.transcript
    };
    let news = if comic.news.is_empty() {
        "No news available"
    } else {
        &comic.news
    };

    let width = inner.width.saturating_sub(1) as usize;
    let avail = inner.height as usize;
    let mut lines: Vec<Line> = vec![Line::from(Span::styled(
        "Transcript",
        Style::default().fg(pal.accent).add_modifier(Modifier::BOLD),
    ))];
    for l in wrap_text(transcript, width.max(1), avail.saturating_sub(3).max(1)) {
        lines.push(Line::from(l));
    }
    lines.push(Line::from(Span::styled(
        "News",
        Style::default().fg(pal.accent).add_modifier(Modifier::BOLD),
    )));
    for l in wrap_text(news, width.max(1), 2) {
        lines.push(Line::from(l));
    }

    f.render_widget(Paragraph::new(lines), inner);
}

fn draw_list_panel(f: &mut Frame, area: Rect, app: &mut App, pal: &Palette) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Comics")
        .border_style(
            Style::default()
                .fg(pal.highlight)
                .add_modifier(Modifier::BOLD),
        );

    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(window) = app.list_window() else {
        let placeholder = Paragraph::new("Waiting for latest comic...")
            .alignment(Alignment::Center)
            .style(Style::default().fg(pal.dim));
        f.render_widget(placeholder, inner);
        return;
    };

    let current_id = app.current.as_ref().map(|c| c.id);
    let width = inner.width.saturating_sub(3) as usize;

    let items: Vec<ListItem> = window
        .ids()
        .map(|id| {
            let label = match (app.store.get(id), app.store.state(id)) {
                (Some(comic), _) => truncate_text(&format!("#{id}  {}", comic.title), width.max(4)),
                (None, Some(ResolutionState::Failed)) => format!("#{id}  unavailable"),
                (None, Some(ResolutionState::InFlight)) => format!("#{id}  ..."),
                _ => format!("#{id}"),
            };

            let style = if Some(id) == current_id {
                Style::default()
                    .fg(pal.highlight)
                    .add_modifier(Modifier::BOLD)
            } else if app.store.state(id) == Some(ResolutionState::Failed) {
                Style::default().fg(pal.dim)
            } else {
                Style::default().fg(pal.fg)
            };

            ListItem::new(Line::from(Span::styled(label, style)))
        })
        .collect();

    let list = List::new(items)
        .highlight_style(
            Style::default()
                .fg(pal.accent)
                .add_modifier(Modifier::REVERSED),
        )
        .highlight_symbol("> ");

    f.render_stateful_widget(list, inner, &mut app.list_state);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App, pal: &Palette) {
    let text = if let Some(input) = &app.jump_input {
        Line::from(vec![
            Span::styled("Jump to #: ", Style::default().fg(pal.accent)),
            Span::styled(
                input.clone(),
                Style::default().fg(pal.fg).add_modifier(Modifier::BOLD),
            ),
            Span::styled("  (Enter: go, Esc: cancel)", Style::default().fg(pal.dim)),
        ])
    } else if app.list_open {
        key_hints(
            pal,
            &[
                ("↑/↓", "select"),
                ("Enter", "open"),
                ("r", "retry failed"),
                ("Esc/Tab", "close list"),
                ("q", "quit"),
            ],
        )
    } else {
        key_hints(
            pal,
            &[
                ("←/→", "prev/next"),
                ("g/G", "first/latest"),
                ("j", "jump"),
                ("Tab", "list"),
                ("Space", "like"),
                ("x", "details"),
                ("t", "theme"),
                ("w", "browser"),
                ("q", "quit"),
            ],
        )
    };

    let p = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.border)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

fn key_hints(pal: &Palette, hints: &[(&str, &str)]) -> Line<'static> {
    let mut spans = Vec::new();
    for (i, (key, action)) in hints.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::styled(
            key.to_string(),
            Style::default().fg(pal.highlight),
        ));
        spans.push(Span::raw(format!(": {action}")));
    }
    Line::from(spans)
}

fn draw_toast(f: &mut Frame, app: &App) {
    let Some((message, _)) = &app.toast else {
        return;
    };

    let area = f.area();
    let width = (message.chars().count() as u16 + 4).min(area.width);
    let toast_area = Rect::new(
        area.x + (area.width.saturating_sub(width)) / 2,
        area.y + area.height.saturating_sub(4),
        width,
        3,
    );

    let pal = palette(app.prefs.theme);
    let toast = Paragraph::new(&**message)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(pal.accent)),
        );

    f.render_widget(Clear, toast_area);
    f.render_widget(toast, toast_area);
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn wrap_text(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    if width == 0 || max_lines == 0 {
        return vec![];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.chars().count() + 1 + word.chars().count() <= width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            if lines.len() >= max_lines {
                if let Some(last) = lines.last_mut() {
                    let char_count = last.chars().count();
                    if char_count > 3 {
                        *last = last.chars().take(char_count - 3).collect::<String>() + "...";
                    }
                }
                return lines;
            }
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() && lines.len() < max_lines {
        lines.push(current_line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comic(id: ComicId) -> Comic {
        Comic {
            id,
            title: format!("Comic {id}"),
            image_url: String::new(),
            alt_text: String::new(),
            day: "1".into(),
            month: "1".into(),
            year: "2020".into(),
            transcript: String::new(),
            news: String::new(),
        }
    }

    fn app_at(latest: ComicId, current: ComicId) -> App {
        let mut app = App::default();
        app.latest_id = Some(latest);
        app.current = Some(comic(current));
        app
    }

    #[test]
    fn list_selection_maps_back_to_ids() {
        let mut app = app_at(250, 125);

        app.center_list_selection();
        assert_eq!(app.selected_list_id(), Some(125));

        let window = app.list_window().unwrap();
        app.list_state.select(Some(0));
        assert_eq!(app.selected_list_id(), Some(window.start));
    }

    #[test]
    fn selection_out_of_window_yields_none() {
        let mut app = app_at(50, 10);
        app.list_state.select(Some(200));
        assert_eq!(app.selected_list_id(), None);
    }

    #[test]
    fn preview_shows_the_selected_comic_once_resolved() {
        let mut app = app_at(250, 125);
        app.list_open = true;
        app.store.insert(comic(120));

        let window = app.list_window().unwrap();
        app.list_state.select(Some((120 - window.start) as usize));
        assert_eq!(app.preview_comic().map(|c| c.id), Some(120));

        // An unresolved selection falls back to the current comic, as does
        // a closed panel.
        app.list_state.select(Some(0));
        assert_eq!(app.preview_comic().map(|c| c.id), Some(125));
        app.list_open = false;
        assert_eq!(app.preview_comic().map(|c| c.id), Some(125));
    }

    #[test]
    fn toast_expires_after_ttl() {
        let mut app = App::default();
        app.show_toast("Back to first comic");
        app.expire_toast();
        assert!(app.toast.is_some());

        app.toast = Some(("old".into(), Instant::now() - TOAST_TTL));
        app.expire_toast();
        assert!(app.toast.is_none());
    }

    #[test]
    fn wrap_text_stops_at_max_lines() {
        let lines = wrap_text("one two three four five six seven", 9, 2);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("..."));
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a rather long title", 10), "a rathe...");
    }
}
