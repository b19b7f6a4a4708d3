use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use arboard::Clipboard;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{debug, info};

use crate::auth::Session;
use crate::carousel::Carousel;
use crate::error::FeedError;
use crate::feed::{Feed, FeedState};
use crate::interactions::{Interactions, SaveState, SaveWatch};
use crate::model::{NotFoundMode, Post};
use crate::player::{PlayIcon, PlaybackStatus, PlayerState};
use crate::scheduler::MonotonicClock;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SCRUB_STEP: Duration = Duration::from_secs(5);
const PROGRESS_WIDTH: usize = 40;

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub fn format_timestamp(value: Duration) -> String {
    let total = value.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

pub fn format_distance(km: Option<f64>) -> String {
    match km {
        None => String::new(),
        Some(km) if km < 1.0 => format!("{:.0} m", km * 1000.0),
        Some(km) => format!("{km:.1} km"),
    }
}

/// Played and buffered portions of `width` cells.
pub fn progress_bar(current: Duration, buffered: Duration, duration: Option<Duration>, width: usize) -> String {
    let total = match duration {
        Some(total) if !total.is_zero() => total.as_secs_f64(),
        _ => return "─".repeat(width),
    };
    let cells = |at: Duration| ((at.as_secs_f64() / total).clamp(0.0, 1.0) * width as f64).round() as usize;
    let played = cells(current);
    let buffered = cells(buffered).max(played);
    let mut bar = String::with_capacity(width * 3);
    bar.push_str(&"█".repeat(played));
    bar.push_str(&"▒".repeat(buffered - played));
    bar.push_str(&"─".repeat(width - buffered));
    bar
}

/// Text shown in place of the card list, if the feed has nothing to show.
pub fn empty_message(state: &FeedState, has_posts: bool) -> Option<String> {
    if has_posts {
        return None;
    }
    let message = match state {
        FeedState::Initializing => "Waiting for your location…".to_string(),
        FeedState::Loading | FeedState::LoadingMore => "Finding videos near you…".to_string(),
        FeedState::Empty(NotFoundMode::Filter) => {
            "No videos match these filters. Press f to widen the distance or u to retry.".to_string()
        }
        FeedState::Empty(NotFoundMode::Page) => {
            "No videos around here yet. Press f to search further away.".to_string()
        }
        FeedState::Failed(reason) => format!("Couldn't load the feed: {reason}\nPress u to retry."),
        FeedState::Populated => return None,
    };
    Some(message)
}

/// User-facing wording for a failed action.
pub fn describe_error(action: &str, err: &FeedError) -> String {
    match err {
        FeedError::GuestAction => format!("Sign in to {action}."),
        FeedError::PermissionDenied(what) => format!("Permission denied: {what}."),
        other => format!("Couldn't {action}: {other}"),
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Modal {
    ReportPrompt { post_id: String },
    ReportDone { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scrub {
    origin: Duration,
    position: Duration,
}

pub struct Options {
    pub feed: Feed,
    pub carousel: Carousel,
    pub interactions: Interactions,
    pub session: Arc<Session>,
    pub status_message: String,
}

pub struct Model {
    feed: Feed,
    carousel: Carousel,
    interactions: Interactions,
    session: Arc<Session>,
    clock: MonotonicClock,
    status_message: String,
    spinner: Spinner,
    needs_redraw: bool,
    modal: Option<Modal>,
    scrub: Option<Scrub>,
    saves: Option<SaveWatch>,
    list_state: ListState,
}

impl Model {
    pub fn new(options: Options) -> Self {
        Self {
            feed: options.feed,
            carousel: options.carousel,
            interactions: options.interactions,
            session: options.session,
            clock: MonotonicClock::default(),
            status_message: options.status_message,
            spinner: Spinner::new(),
            needs_redraw: true,
            modal: None,
            scrub: None,
            saves: None,
            list_state: ListState::default(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        self.saves = None;
        self.carousel.release_all(self.clock.now());
        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let mut timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if let Some(due) = self.carousel.next_due() {
                timeout = timeout.min(due.saturating_sub(self.clock.now()));
            }

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                }
            }

            if self.poll_async() {
                self.mark_dirty();
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.feed.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
                // Playback position moves on its own.
                if self.carousel.playing_count() > 0 {
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Applies finished pages, scroll settles and player timers, then
    /// brings the mounted players in line with the window.
    fn poll_async(&mut self) -> bool {
        let now = self.clock.now();
        let mut changed = self.feed.poll();
        changed |= self.feed.tick(now);
        if let Some(notice) = self.feed.take_notice() {
            self.status_message = notice;
            changed = true;
        }
        let before = self.carousel.active_id().map(str::to_string);
        self.carousel.sync(self.feed.window(), now);
        self.carousel.tick(now);
        if self.carousel.active_id() != before.as_deref() {
            self.scrub = None;
            changed = true;
        }
        changed |= self.watch_current_saves();
        changed
    }

    /// Keeps one save listener on the current post.
    fn watch_current_saves(&mut self) -> bool {
        let current = self.feed.current_post().map(|post| post.id.clone());
        if let Some(watch) = self.saves.as_mut() {
            if Some(watch.post_id()) == current.as_deref() {
                return watch.poll();
            }
        }
        let had_watch = self.saves.take().is_some();
        let Some(post_id) = current else {
            return had_watch;
        };
        match self.interactions.watch_saves(&post_id) {
            Ok(watch) => self.saves = Some(watch),
            Err(err) => debug!(post_id = %post_id, error = %err, "save listener unavailable"),
        }
        true
    }

    fn current_saves(&self, post_id: &str) -> SaveState {
        self.saves
            .as_ref()
            .filter(|watch| watch.post_id() == post_id)
            .map(SaveWatch::state)
            .unwrap_or_default()
    }

    fn current_post(&self) -> Option<Post> {
        self.feed.current_post().cloned()
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if let Some(modal) = self.modal.clone() {
            self.handle_modal_key(modal, code)?;
            self.mark_dirty();
            return Ok(false);
        }
        if self.scrub.is_some() && self.handle_scrub_key(code) {
            self.mark_dirty();
            return Ok(false);
        }

        let now = self.clock.now();
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => {
                if self.feed.next() {
                    self.status_message.clear();
                } else if self.feed.is_loading() {
                    self.status_message = "Loading more videos…".to_string();
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.feed.previous() {
                    self.status_message.clear();
                }
            }
            KeyCode::Char(' ') => self.carousel.toggle_play(now),
            KeyCode::Char('m') => {
                self.carousel.toggle_mute();
                self.status_message = if self.carousel.is_muted() {
                    "Muted.".to_string()
                } else {
                    "Sound on.".to_string()
                };
            }
            KeyCode::Char('s') => self.toggle_save(),
            KeyCode::Char('c') => self.share()?,
            KeyCode::Char('r') => self.open_report_prompt(),
            KeyCode::Char('[') => self.scrub_by(-1),
            KeyCode::Char(']') => self.scrub_by(1),
            KeyCode::Char('f') => {
                let mut criteria = self.feed.criteria().clone();
                criteria.distance = criteria.distance.next();
                self.status_message = format!("Distance: {}", criteria.distance.label());
                self.feed.set_filter(criteria);
            }
            KeyCode::Char('u') => {
                self.status_message = "Refreshing…".to_string();
                self.feed.refresh();
            }
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn toggle_save(&mut self) {
        let Some(post) = self.current_post() else {
            return;
        };
        self.status_message = match self.interactions.toggle_save(&post.id) {
            Ok(true) => format!("Saved {}.", post.location_name),
            Ok(false) => format!("Removed {} from saved.", post.location_name),
            Err(err) => describe_error("save posts", &err),
        };
    }

    fn share(&mut self) -> Result<()> {
        let Some(post) = self.current_post() else {
            return Ok(());
        };
        let link = match self.interactions.share(&post) {
            Ok(link) => link,
            Err(err) => {
                self.status_message = describe_error("share this post", &err);
                return Ok(());
            }
        };
        self.status_message = match copy_to_clipboard(&link) {
            Ok(()) => format!("Link copied: {link}"),
            Err(err) => {
                debug!(error = %err, "clipboard unavailable");
                format!("Share link: {link}")
            }
        };
        Ok(())
    }

    fn open_report_prompt(&mut self) {
        let Some(post) = self.current_post() else {
            return;
        };
        if self.session.is_guest() {
            self.status_message = describe_error("report posts", &FeedError::GuestAction);
            return;
        }
        self.modal = Some(Modal::ReportPrompt { post_id: post.id });
    }

    fn handle_modal_key(&mut self, modal: Modal, code: KeyCode) -> Result<()> {
        match modal {
            Modal::ReportDone { .. } => self.modal = None,
            Modal::ReportPrompt { post_id } => match code {
                KeyCode::Char('y') => self.submit_report(&post_id, false),
                KeyCode::Char('h') => self.submit_report(&post_id, true),
                KeyCode::Char('n') | KeyCode::Esc => self.modal = None,
                _ => {}
            },
        }
        Ok(())
    }

    fn submit_report(&mut self, post_id: &str, hide: bool) {
        match self.interactions.report(post_id, hide) {
            Ok(outcome) => {
                info!(post_id, blacklisted = outcome.blacklisted, "report submitted");
                if outcome.blacklisted {
                    self.feed.apply_blacklist(self.interactions.blacklisted_ids());
                }
                let message = match (&outcome.hide_failure, outcome.blacklisted) {
                    (Some(reason), _) => format!(
                        "Thanks for reporting. We'll review this post, but it couldn't be hidden: {reason}"
                    ),
                    (None, true) => "Thanks for reporting. You won't see this post again.".to_string(),
                    (None, false) => "Thanks for reporting. We'll review this post.".to_string(),
                };
                self.modal = Some(Modal::ReportDone { message });
            }
            Err(err) => {
                self.modal = None;
                self.status_message = describe_error("report this post", &err);
            }
        }
    }

    fn scrub_by(&mut self, direction: i64) {
        let Some(status) = self.carousel.active_status() else {
            return;
        };
        if status.has_error {
            return;
        }
        let mut scrub = match self.scrub {
            Some(scrub) => scrub,
            None => {
                self.carousel.begin_seek();
                Scrub {
                    origin: status.current_time,
                    position: status.current_time,
                }
            }
        };
        scrub.position = if direction < 0 {
            scrub.position.saturating_sub(SCRUB_STEP)
        } else {
            let forward = scrub.position + SCRUB_STEP;
            status.duration.map_or(forward, |total| forward.min(total))
        };
        self.carousel.request_preview(scrub.position);
        self.scrub = Some(scrub);
        self.status_message = format!(
            "Seek to {} (Enter to jump, Esc to cancel)",
            format_timestamp(scrub.position)
        );
    }

    /// Keys that only mean something mid-scrub. Returns false for the rest.
    fn handle_scrub_key(&mut self, code: KeyCode) -> bool {
        let Some(scrub) = self.scrub else {
            return false;
        };
        match code {
            KeyCode::Enter => {
                self.carousel.end_seek(scrub.position);
                self.status_message = format!("Jumped to {}", format_timestamp(scrub.position));
            }
            KeyCode::Esc => {
                self.carousel.end_seek(scrub.origin);
                self.status_message.clear();
            }
            _ => return false,
        }
        self.scrub = None;
        true
    }

    fn footer_text(&self) -> String {
        match (&self.modal, &self.scrub) {
            (Some(Modal::ReportPrompt { .. }), _) => {
                "y report · h report and hide · n cancel".to_string()
            }
            (Some(Modal::ReportDone { .. }), _) => "Press any key to continue".to_string(),
            (None, Some(_)) => "[ ] scrub · Enter jump · Esc cancel".to_string(),
            (None, None) => {
                "j/k next/prev · space play · m mute · [ ] scrub · s save · c share · r report · f distance · u refresh · q quit"
                    .to_string()
            }
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.feed.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        match empty_message(self.feed.state(), !self.feed.window().is_empty()) {
            Some(message) => self.draw_empty(frame, layout[1], message),
            None => {
                let columns = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
                    .split(layout[1]);
                self.draw_posts(frame, columns[0]);
                self.draw_card(frame, columns[1]);
            }
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if let Some(modal) = &self.modal {
            draw_modal(frame, layout[1], modal);
        }
    }

    fn draw_empty(&self, frame: &mut Frame<'_>, area: Rect, message: String) {
        let color = match self.feed.state() {
            FeedState::Failed(_) => COLOR_ERROR,
            _ => COLOR_TEXT_SECONDARY,
        };
        let body = Paragraph::new(message)
            .style(Style::default().fg(color).bg(COLOR_BG))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(body, centered_rect(70, 30, area));
    }

    fn draw_posts(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let window = self.feed.window();
        let items: Vec<ListItem> = window
            .posts()
            .map(|post| {
                let marker = if self.carousel.active_id() == Some(post.id.as_str()) {
                    "▶ "
                } else if self.carousel.is_mounted(&post.id) {
                    "· "
                } else {
                    "  "
                };
                let mut spans = vec![
                    Span::styled(marker, Style::default().fg(COLOR_ACCENT)),
                    Span::styled(
                        display_name(post),
                        Style::default().fg(COLOR_TEXT_PRIMARY),
                    ),
                ];
                let distance = format_distance(post.distance);
                if !distance.is_empty() {
                    spans.push(Span::styled(
                        format!("  {distance}"),
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let mut title = format!("{} · {}", self.feed.source_name(), self.feed.criteria().distance.label());
        if matches!(self.feed.state(), FeedState::LoadingMore) {
            title.push_str(" · loading more");
        }
        let list = List::new(items)
            .block(
                Block::default()
                    .title(title)
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_BORDER_IDLE))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .highlight_style(
                Style::default()
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD),
            );
        self.list_state.select(Some(window.current_index()));
        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn draw_card(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .padding(Padding::horizontal(1))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let Some(post) = self.feed.current_post() else {
            frame.render_widget(block, area);
            return;
        };
        let status = self.carousel.status(&post.id);
        let saves = self.current_saves(&post.id);

        let mut lines = vec![
            Line::from(Span::styled(
                display_name(post),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                post.address.clone(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        let mut meta = Vec::new();
        if !post.username.is_empty() {
            meta.push(format!("@{}", post.username));
        }
        let distance = format_distance(post.distance);
        if !distance.is_empty() {
            meta.push(distance);
        }
        if let Some(rating) = post.metadata.rating {
            meta.push(format!("★ {rating:.1}"));
        }
        meta.push(match (saves.saves, saves.saved) {
            (1, true) => "♥ 1 save (yours)".to_string(),
            (count, true) => format!("♥ {count} saves (yours)"),
            (1, false) => "♡ 1 save".to_string(),
            (count, false) => format!("♡ {count} saves"),
        });
        lines.push(Line::from(Span::styled(
            meta.join(" · "),
            Style::default().fg(COLOR_ACCENT),
        )));
        let tags = self.feed.tag_names(post);
        if !tags.is_empty() {
            lines.push(Line::from(Span::styled(
                tags.iter().map(|tag| format!("#{tag}")).collect::<Vec<_>>().join(" "),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        lines.push(Line::default());
        lines.extend(self.playback_lines(&post.id, status.as_ref()));

        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: false });
        frame.render_widget(paragraph, area);
    }

    fn playback_lines(&self, post_id: &str, status: Option<&PlaybackStatus>) -> Vec<Line<'static>> {
        let Some(status) = status else {
            return vec![Line::from(Span::styled(
                "Not loaded",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))];
        };
        if status.has_error {
            return vec![Line::from(Span::styled(
                "Video failed to load. Scroll away and back to retry.",
                Style::default().fg(COLOR_ERROR),
            ))];
        }

        let state = match (status.state, status.icon) {
            (_, Some(PlayIcon::Play)) => "▶",
            (_, Some(PlayIcon::Pause)) => "⏸",
            (PlayerState::Playing, None) => "▶ playing",
            (PlayerState::Paused, None) => "⏸ paused",
            (PlayerState::Loading, None) | (PlayerState::Idle, None) => "… loading",
            (PlayerState::Ready, None) => "ready",
            (PlayerState::Error, None) => "error",
        };
        let sound = if status.muted { "🔇" } else { "🔊" };
        let mut lines = vec![Line::from(vec![
            Span::styled(state.to_string(), Style::default().fg(COLOR_SUCCESS)),
            Span::raw("  "),
            Span::raw(sound.to_string()),
            Span::styled(
                if status.loading { "  buffering" } else { "" }.to_string(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ])];

        let shown = self.scrub.map_or(status.current_time, |scrub| scrub.position);
        lines.push(Line::from(Span::styled(
            progress_bar(shown, status.buffered_end, status.duration, PROGRESS_WIDTH),
            Style::default().fg(COLOR_ACCENT),
        )));
        let total = status
            .duration
            .map(format_timestamp)
            .unwrap_or_else(|| "--:--".to_string());
        lines.push(Line::from(Span::styled(
            format!("{} / {}", format_timestamp(shown), total),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));

        if self.scrub.is_some() {
            if let Some(preview) = self.carousel.preview(post_id) {
                let label = match &preview.image {
                    Some(path) => format!("Preview at {}s: {}", preview.second, path.display()),
                    None => format!("Preview at {}s", preview.second),
                };
                lines.push(Line::from(Span::styled(
                    label,
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )));
            }
        }
        lines
    }
}

fn display_name(post: &Post) -> String {
    if post.location_name.trim().is_empty() {
        post.id.clone()
    } else {
        post.location_name.clone()
    }
}

fn draw_modal(frame: &mut Frame<'_>, area: Rect, modal: &Modal) {
    let (title, body) = match modal {
        Modal::ReportPrompt { .. } => (
            "Report post",
            "Report this post as inappropriate?\n\ny  report\nh  report and hide it from my feed\nn  cancel".to_string(),
        ),
        Modal::ReportDone { message } => ("Reported", message.clone()),
    };
    let popup = centered_rect(50, 30, area);
    frame.render_widget(Clear, popup);
    let paragraph = Paragraph::new(body)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
                .padding(Padding::uniform(1))
                .style(Style::default().bg(COLOR_PANEL_FOCUSED_BG)),
        )
        .style(Style::default().fg(COLOR_TEXT_PRIMARY))
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, popup);
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = Clipboard::new().map_err(|err| anyhow!("open clipboard: {}", err))?;
    clipboard
        .set_text(text.to_string())
        .map_err(|err| anyhow!("copy to clipboard: {}", err))?;
    Ok(())
}
