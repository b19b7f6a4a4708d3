//! Feed orchestration: page requests, loading/empty/populated states and
//! the scroll-driven pagination trigger.
//!
//! Every request carries an id and a [`CancellationToken`]. Responses for a
//! superseded or cancelled request are dropped without touching state.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{FeedError, FeedResult};
use crate::fetch::{Page, PageRequest, PostSource};
use crate::model::{Coordinates, FilterCriteria, NotFoundMode, Post, Tag};
use crate::snap::{even_snaps, ScrollSample, SnapOutcome, SnapSynchronizer, DEFAULT_SCROLL_DEBOUNCE};
use crate::window::{PostWindow, DEFAULT_OVERSCAN};

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    /// Waiting for a location or an explicit start.
    Initializing,
    Loading,
    Populated,
    LoadingMore,
    Empty(NotFoundMode),
    Failed(String),
}

/// Where page fetches run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    #[default]
    Background,
    /// Runs the fetch on the calling thread. The response is still only
    /// applied by [`Feed::poll`].
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub overscan: usize,
    pub page_size: usize,
    pub scroll_debounce: Duration,
    pub execution: Execution,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            overscan: DEFAULT_OVERSCAN,
            page_size: DEFAULT_PAGE_SIZE,
            scroll_debounce: DEFAULT_SCROLL_DEBOUNCE,
            execution: Execution::Background,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    Replace,
    Append,
}

struct PendingPage {
    request_id: u64,
    token: CancellationToken,
    mode: LoadMode,
}

struct PageResponse {
    request_id: u64,
    result: FeedResult<Page>,
}

pub struct Feed {
    source: Arc<dyn PostSource>,
    settings: FeedSettings,
    window: PostWindow,
    snap: SnapSynchronizer,
    state: FeedState,
    criteria: FilterCriteria,
    center: Option<Coordinates>,
    next_offset: usize,
    has_more: bool,
    tags: HashMap<String, Tag>,
    pending: Option<PendingPage>,
    next_request_id: u64,
    response_tx: Sender<PageResponse>,
    response_rx: Receiver<PageResponse>,
    notice: Option<String>,
}

impl Feed {
    pub fn new(source: Arc<dyn PostSource>, settings: FeedSettings) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            source,
            window: PostWindow::new(settings.overscan),
            snap: SnapSynchronizer::new(settings.scroll_debounce),
            settings,
            state: FeedState::Initializing,
            criteria: FilterCriteria::default(),
            center: None,
            next_offset: 0,
            has_more: true,
            tags: HashMap::new(),
            pending: None,
            next_request_id: 1,
            response_tx,
            response_rx,
            notice: None,
        }
    }

    /// Starting criteria, applied by the first request.
    pub fn with_criteria(mut self, criteria: FilterCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn window(&self) -> &PostWindow {
        &self.window
    }

    pub fn current_index(&self) -> usize {
        self.window.current_index()
    }

    pub fn current_post(&self) -> Option<&Post> {
        self.window.current_post()
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn center(&self) -> Option<Coordinates> {
        self.center
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn tag_names(&self, post: &Post) -> Vec<String> {
        post.tags
            .iter()
            .filter_map(|id| self.tags.get(id))
            .map(|tag| tag.name.clone())
            .collect()
    }

    /// Non-fatal problem worth showing once, such as a failed next page.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Sets the query centre and reloads from the first page.
    pub fn set_location(&mut self, center: Coordinates) {
        self.center = Some(center);
        self.request(LoadMode::Replace);
    }

    /// Reloads with new criteria. Unchanged criteria only reload from
    /// `Empty` or `Failed`.
    pub fn set_filter(&mut self, criteria: FilterCriteria) {
        if criteria == self.criteria
            && !matches!(self.state, FeedState::Empty(_) | FeedState::Failed(_))
        {
            return;
        }
        self.criteria = criteria;
        self.request(LoadMode::Replace);
    }

    pub fn refresh(&mut self) {
        self.request(LoadMode::Replace);
    }

    /// Requests the next page. Dropped while any page is in flight, after
    /// the source is exhausted, or when there is nothing loaded yet.
    pub fn load_more(&mut self) -> bool {
        if self.pending.is_some() {
            debug!("load_more coalesced with in-flight page");
            return false;
        }
        if !self.has_more || self.state != FeedState::Populated {
            return false;
        }
        self.request(LoadMode::Append);
        true
    }

    /// Abandons the in-flight request, if any.
    pub fn cancel(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        pending.token.cancel();
        debug!(request_id = pending.request_id, "page request cancelled");
        let next = match &self.state {
            FeedState::LoadingMore => FeedState::Populated,
            FeedState::Loading if self.window.is_empty() => FeedState::Initializing,
            FeedState::Loading => FeedState::Populated,
            other => other.clone(),
        };
        self.state = next;
    }

    fn request(&mut self, mode: LoadMode) {
        if let Some(previous) = self.pending.take() {
            previous.token.cancel();
        }
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let token = CancellationToken::new();
        let offset = match mode {
            LoadMode::Replace => 0,
            LoadMode::Append => self.next_offset,
        };
        let request = PageRequest {
            offset,
            page_size: self.settings.page_size,
            criteria: self.criteria.clone(),
            center: self.center,
        };
        if mode == LoadMode::Replace {
            self.state = FeedState::Loading;
            self.snap.reset();
        } else if self.state == FeedState::Populated {
            self.state = FeedState::LoadingMore;
        }
        self.pending = Some(PendingPage {
            request_id,
            token: token.clone(),
            mode,
        });
        debug!(request_id, offset, ?mode, source = self.source.name(), "requesting page");

        let source = Arc::clone(&self.source);
        let tx = self.response_tx.clone();
        let run = move || {
            let result = source.fetch_page(&request, &token);
            let _ = tx.send(PageResponse { request_id, result });
        };
        match self.settings.execution {
            Execution::Background => {
                thread::spawn(run);
            }
            Execution::Inline => run(),
        }
    }

    /// Applies finished responses. Returns true when anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(response) = self.response_rx.try_recv() {
            changed |= self.handle_response(response);
        }
        changed
    }

    /// Blocks until the in-flight request settles or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if self.pending.is_none() {
            return false;
        }
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => {
                let changed = self.handle_response(response);
                self.poll() || changed
            }
            Err(_) => false,
        }
    }

    fn handle_response(&mut self, response: PageResponse) -> bool {
        let Some(pending) = &self.pending else {
            return false;
        };
        if pending.token.is_cancelled() || pending.request_id != response.request_id {
            debug!(request_id = response.request_id, "dropping stale page");
            return false;
        }
        let mode = pending.mode;
        self.pending = None;

        match response.result {
            Ok(page) => self.apply_page(mode, page),
            Err(FeedError::Cancelled) => {
                self.state = if self.window.is_empty() {
                    FeedState::Initializing
                } else {
                    FeedState::Populated
                };
            }
            Err(err) => {
                if mode == LoadMode::Append && !self.window.is_empty() {
                    warn!(error = %err, "next page failed");
                    self.notice = Some(format!("Failed to load more posts: {err}"));
                    self.state = FeedState::Populated;
                } else {
                    warn!(error = %err, "feed failed to load");
                    self.state = FeedState::Failed(err.to_string());
                }
            }
        }
        true
    }

    fn apply_page(&mut self, mode: LoadMode, page: Page) {
        let fetched = page.posts.len();
        let accepted = match mode {
            LoadMode::Replace => {
                self.tags.clear();
                self.window.replace_posts(page.posts)
            }
            LoadMode::Append => self.window.append_posts(page.posts),
        };
        self.tags.extend(page.tags);
        self.next_offset = page.next_offset;
        self.has_more = page.has_more;
        self.snap.set_snaps(even_snaps(self.window.len()));
        self.snap.sync_index(self.window.current_index());
        info!(
            fetched,
            accepted,
            total = self.window.len(),
            has_more = self.has_more,
            "page applied"
        );

        if !self.window.is_empty() {
            self.state = FeedState::Populated;
            return;
        }
        if self.has_more {
            // Pages can filter down to nothing; keep going until one doesn't.
            self.state = FeedState::Loading;
            self.request(LoadMode::Append);
            return;
        }
        self.state = FeedState::Empty(self.not_found_mode());
    }

    fn not_found_mode(&self) -> NotFoundMode {
        if self.criteria.is_active() {
            NotFoundMode::Filter
        } else {
            NotFoundMode::Page
        }
    }

    /// Hides posts and keeps the current post current when possible.
    pub fn apply_blacklist<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.window.apply_blacklist(ids);
        self.snap.set_snaps(even_snaps(self.window.len()));
        self.snap.sync_index(self.window.current_index());
        if !self.window.is_empty() {
            return;
        }
        match self.state {
            FeedState::Populated if self.has_more => {
                self.state = FeedState::Loading;
                self.request(LoadMode::Append);
            }
            FeedState::Populated => self.state = FeedState::Empty(self.not_found_mode()),
            FeedState::LoadingMore => self.state = FeedState::Loading,
            _ => {}
        }
    }

    fn apply_outcome(&mut self, outcome: SnapOutcome) -> bool {
        let mut changed = false;
        if let Some(index) = outcome.index {
            changed = self.window.set_current_index(index);
        }
        if outcome.paginate {
            self.load_more();
        }
        changed
    }

    /// Continuous scroll; applied by [`Feed::tick`] once it settles.
    pub fn on_scroll(&mut self, now: Duration, sample: ScrollSample) {
        self.snap.on_scroll(now, sample);
    }

    pub fn on_settle(&mut self, sample: ScrollSample) -> bool {
        let outcome = self
            .snap
            .on_settle(sample, self.window.len(), self.window.len());
        self.apply_outcome(outcome)
    }

    /// Runs a debounced scroll sample if one is due.
    pub fn tick(&mut self, now: Duration) -> bool {
        match self.snap.poll(now, self.window.len(), self.window.len()) {
            Some(outcome) => self.apply_outcome(outcome),
            None => false,
        }
    }

    /// Jumps to `index` as a select event would.
    pub fn select(&mut self, index: usize) -> bool {
        let len = self.window.len();
        if len == 0 {
            return false;
        }
        let index = index.min(len - 1);
        let progress = self.snap.snaps().get(index).copied().unwrap_or(0.0);
        self.on_settle(ScrollSample {
            progress,
            can_scroll_next: index + 1 < len,
        })
    }

    pub fn next(&mut self) -> bool {
        self.select(self.window.current_index() + 1)
    }

    pub fn previous(&mut self) -> bool {
        self.select(self.window.current_index().saturating_sub(1))
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Label, MediaSrc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PagedSource {
        posts: Vec<Post>,
        calls: AtomicUsize,
        failure: Mutex<Option<FeedError>>,
    }

    impl PagedSource {
        fn new(count: usize) -> Arc<Self> {
            Arc::new(Self {
                posts: (0..count).map(|i| post(&format!("p{i}"))).collect(),
                calls: AtomicUsize::new(0),
                failure: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PostSource for PagedSource {
        fn fetch_page(&self, request: &PageRequest, token: &CancellationToken) -> FeedResult<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            token.check()?;
            if let Some(err) = self.failure.lock().clone() {
                return Err(err);
            }
            let end = (request.offset + request.page_size).min(self.posts.len());
            let posts = self.posts.get(request.offset..end).unwrap_or(&[]).to_vec();
            let posts = posts
                .into_iter()
                .filter(|post| request.criteria.matches(&post.metadata.labels, &[]))
                .collect();
            Ok(Page {
                posts,
                tags: HashMap::new(),
                next_offset: end,
                has_more: end < self.posts.len(),
            })
        }

        fn name(&self) -> &'static str {
            "paged"
        }
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.into(),
            src: MediaSrc {
                thumb_url: String::new(),
                video_url: format!("https://cdn.test/{id}.mp4"),
            },
            ..Post::default()
        }
    }

    fn feed(source: Arc<PagedSource>, page_size: usize) -> Feed {
        Feed::new(
            source,
            FeedSettings {
                page_size,
                execution: Execution::Inline,
                ..FeedSettings::default()
            },
        )
    }

    fn at_end() -> ScrollSample {
        ScrollSample {
            progress: 1.0,
            can_scroll_next: false,
        }
    }

    #[test]
    fn starts_initializing_then_populates() {
        let source = PagedSource::new(3);
        let mut feed = feed(source, 10);
        assert_eq!(feed.state(), &FeedState::Initializing);
        feed.refresh();
        assert_eq!(feed.state(), &FeedState::Loading);
        assert!(feed.poll());
        assert_eq!(feed.state(), &FeedState::Populated);
        assert_eq!(feed.window().len(), 3);
        assert!(!feed.has_more());
    }

    #[test]
    fn empty_source_yields_empty_state() {
        let mut feed = feed(PagedSource::new(0), 10);
        feed.refresh();
        feed.poll();
        assert_eq!(feed.state(), &FeedState::Empty(NotFoundMode::Page));
    }

    #[test]
    fn empty_after_filtering_reports_filter_mode_and_recovers() {
        let mut feed = feed(PagedSource::new(4), 10);
        feed.set_filter(FilterCriteria {
            labels: vec![Label::Brunch],
            ..FilterCriteria::default()
        });
        feed.poll();
        assert_eq!(feed.state(), &FeedState::Empty(NotFoundMode::Filter));

        feed.set_filter(FilterCriteria::default());
        assert_eq!(feed.state(), &FeedState::Loading);
        feed.poll();
        assert_eq!(feed.state(), &FeedState::Populated);
    }

    #[test]
    fn pagination_fires_once_while_in_flight() {
        let source = PagedSource::new(5);
        let mut feed = feed(source.clone(), 2);
        feed.refresh();
        feed.poll();
        assert_eq!(source.calls(), 1);

        feed.on_settle(at_end());
        assert_eq!(feed.state(), &FeedState::LoadingMore);
        feed.on_settle(at_end());
        feed.on_settle(at_end());
        assert_eq!(source.calls(), 2);

        feed.poll();
        assert_eq!(feed.window().len(), 4);
        assert_eq!(feed.state(), &FeedState::Populated);
    }

    #[test]
    fn exhausted_source_ignores_triggers() {
        let source = PagedSource::new(2);
        let mut feed = feed(source.clone(), 2);
        feed.refresh();
        feed.poll();
        assert!(!feed.has_more());
        assert!(!feed.load_more());
        feed.on_settle(at_end());
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn superseded_response_does_not_mutate_state() {
        let source = PagedSource::new(6);
        let mut feed = feed(source.clone(), 2);
        feed.refresh();
        feed.poll();
        assert!(feed.load_more());
        feed.refresh();
        feed.poll();
        assert_eq!(feed.window().len(), 2);
        assert_eq!(feed.window().get(1).unwrap().id, "p1");
        assert_eq!(feed.state(), &FeedState::Populated);
    }

    #[test]
    fn cancelled_request_is_ignored() {
        let source = PagedSource::new(4);
        let mut feed = feed(source, 2);
        feed.refresh();
        feed.poll();
        assert!(feed.load_more());
        feed.cancel();
        assert_eq!(feed.state(), &FeedState::Populated);
        assert!(!feed.poll());
        assert_eq!(feed.window().len(), 2);
    }

    #[test]
    fn first_page_failure_enters_failed_and_refresh_retries() {
        let source = PagedSource::new(3);
        *source.failure.lock() = Some(FeedError::Backend("offline".into()));
        let mut feed = feed(source.clone(), 10);
        feed.refresh();
        feed.poll();
        assert!(matches!(feed.state(), FeedState::Failed(msg) if msg.contains("offline")));

        *source.failure.lock() = None;
        feed.refresh();
        feed.poll();
        assert_eq!(feed.state(), &FeedState::Populated);
    }

    #[test]
    fn next_page_failure_keeps_posts_and_leaves_a_notice() {
        let source = PagedSource::new(4);
        let mut feed = feed(source.clone(), 2);
        feed.refresh();
        feed.poll();
        *source.failure.lock() = Some(FeedError::Backend("timeout".into()));
        feed.load_more();
        feed.poll();
        assert_eq!(feed.state(), &FeedState::Populated);
        assert_eq!(feed.window().len(), 2);
        assert!(feed.take_notice().unwrap().contains("timeout"));
        assert!(feed.take_notice().is_none());
    }

    #[test]
    fn selection_moves_through_the_synchronizer() {
        let mut feed = feed(PagedSource::new(5), 10);
        feed.refresh();
        feed.poll();
        assert!(feed.next());
        assert!(feed.next());
        assert_eq!(feed.current_index(), 2);
        assert!(feed.previous());
        assert_eq!(feed.current_index(), 1);
        assert!(!feed.select(1));
    }

    #[test]
    fn debounced_scroll_applies_after_delay() {
        let mut feed = feed(PagedSource::new(5), 10);
        feed.refresh();
        feed.poll();
        let sample = ScrollSample {
            progress: 0.74,
            can_scroll_next: true,
        };
        feed.on_scroll(Duration::from_millis(0), sample);
        assert!(!feed.tick(Duration::from_millis(4)));
        assert!(feed.tick(Duration::from_millis(9)));
        assert_eq!(feed.current_index(), 3);
    }

    #[test]
    fn blacklist_follows_current_post() {
        let mut feed = feed(PagedSource::new(3), 10);
        feed.refresh();
        feed.poll();
        feed.select(2);
        feed.apply_blacklist(["p1"]);
        assert_eq!(feed.window().len(), 2);
        assert_eq!(feed.current_post().unwrap().id, "p2");
        assert_eq!(feed.current_index(), 1);
    }

    #[test]
    fn pagination_reaches_the_end_after_blacklisting() {
        let source = PagedSource::new(6);
        let mut feed = feed(source.clone(), 3);
        feed.refresh();
        feed.poll();
        feed.apply_blacklist(["p1"]);
        assert_eq!(feed.window().len(), 2);

        assert!(feed.next());
        assert_eq!(feed.current_index(), 1);
        assert_eq!(source.calls(), 2);
        assert_eq!(feed.state(), &FeedState::LoadingMore);

        feed.poll();
        assert_eq!(feed.window().len(), 5);
        assert_eq!(feed.state(), &FeedState::Populated);
    }

    #[test]
    fn hiding_every_loaded_post_fetches_the_next_page() {
        let source = PagedSource::new(4);
        let mut feed = feed(source.clone(), 2);
        feed.refresh();
        feed.poll();
        feed.apply_blacklist(["p0", "p1"]);
        assert_eq!(feed.state(), &FeedState::Loading);
        assert_eq!(source.calls(), 2);

        feed.poll();
        assert_eq!(feed.state(), &FeedState::Populated);
        assert_eq!(feed.current_post().unwrap().id, "p2");
    }

    #[test]
    fn hiding_every_post_of_an_exhausted_feed_is_empty() {
        let mut feed = feed(PagedSource::new(2), 2);
        feed.refresh();
        feed.poll();
        feed.apply_blacklist(["p0", "p1"]);
        assert_eq!(feed.state(), &FeedState::Empty(NotFoundMode::Page));
    }

    #[test]
    fn background_fetch_is_delivered_through_wait() {
        let source = PagedSource::new(3);
        let mut feed = Feed::new(source, FeedSettings::default());
        feed.refresh();
        assert!(feed.wait(Duration::from_secs(5)));
        assert_eq!(feed.state(), &FeedState::Populated);
    }
}
