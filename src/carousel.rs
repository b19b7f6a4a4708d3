//! Mounts one player per post in the visible window and keeps exactly one
//! of them active.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::model::Post;
use crate::player::{apply_effects, Effect, PlaybackStatus, PlayerController, PlayerSettings};
use crate::telemetry::TelemetrySink;
use crate::video::{MediaResource, PreviewFrame, SimulatedResource};
use crate::window::PostWindow;

/// Creates media resources for newly mounted cards.
pub trait ResourceFactory: Send {
    fn create(&mut self, post: &Post) -> Result<Box<dyn MediaResource>>;

    /// Hidden muted resource for scrubber previews. `None` means previews
    /// are taken from the main resource.
    fn create_shadow(&mut self, _post: &Post) -> Result<Option<Box<dyn MediaResource>>> {
        Ok(None)
    }
}

/// Simulated media of a fixed length, used headless and in tests.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedFactory {
    pub duration: Duration,
    pub with_shadow: bool,
}

impl Default for SimulatedFactory {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
            with_shadow: false,
        }
    }
}

impl ResourceFactory for SimulatedFactory {
    fn create(&mut self, _post: &Post) -> Result<Box<dyn MediaResource>> {
        Ok(Box::new(SimulatedResource::new(self.duration)))
    }

    fn create_shadow(&mut self, _post: &Post) -> Result<Option<Box<dyn MediaResource>>> {
        if !self.with_shadow {
            return Ok(None);
        }
        Ok(Some(Box::new(SimulatedResource::new(self.duration))))
    }
}

#[cfg(unix)]
pub use mpv_factory::MpvFactory;

#[cfg(unix)]
mod mpv_factory {
    use std::path::PathBuf;

    use anyhow::Result;

    use super::ResourceFactory;
    use crate::model::Post;
    use crate::video::{LaunchOptions, MediaResource, MpvResource};

    /// Spawns an mpv process per card, plus a shadow for previews when a
    /// preview directory is configured.
    #[derive(Debug, Clone)]
    pub struct MpvFactory {
        pub mpv_path: String,
        pub video_output: String,
        pub extra_args: Vec<String>,
        pub preview_dir: Option<PathBuf>,
    }

    impl ResourceFactory for MpvFactory {
        fn create(&mut self, _post: &Post) -> Result<Box<dyn MediaResource>> {
            let resource = MpvResource::spawn(LaunchOptions {
                mpv_path: &self.mpv_path,
                video_output: &self.video_output,
                extra_args: &self.extra_args,
                shadow: false,
                preview_dir: None,
            })?;
            Ok(Box::new(resource))
        }

        fn create_shadow(&mut self, _post: &Post) -> Result<Option<Box<dyn MediaResource>>> {
            let Some(dir) = self.preview_dir.clone() else {
                return Ok(None);
            };
            let resource = MpvResource::spawn(LaunchOptions {
                mpv_path: &self.mpv_path,
                video_output: &self.video_output,
                extra_args: &self.extra_args,
                shadow: true,
                preview_dir: Some(dir),
            })?;
            Ok(Some(Box::new(resource)))
        }
    }
}

struct MountedPlayer {
    controller: PlayerController,
    resource: Box<dyn MediaResource>,
    shadow: Option<Box<dyn MediaResource>>,
    preview: Option<PreviewFrame>,
}

impl MountedPlayer {
    fn apply(&mut self, effects: Vec<Effect>, telemetry: &dyn TelemetrySink) {
        if effects.is_empty() {
            return;
        }
        let applied = apply_effects(
            &mut self.controller,
            self.resource.as_mut(),
            self.shadow.as_deref_mut(),
            effects,
        );
        for event in applied.telemetry {
            telemetry.record(event);
        }
        if applied.preview.is_some() {
            self.preview = applied.preview;
        }
    }
}

pub struct Carousel {
    factory: Box<dyn ResourceFactory>,
    telemetry: Arc<dyn TelemetrySink>,
    settings: PlayerSettings,
    players: HashMap<String, MountedPlayer>,
    active: Option<String>,
    muted: bool,
    last_tick: Option<Duration>,
}

impl Carousel {
    pub fn new(
        factory: Box<dyn ResourceFactory>,
        telemetry: Arc<dyn TelemetrySink>,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            factory,
            telemetry,
            muted: settings.start_muted,
            settings,
            players: HashMap::new(),
            active: None,
            last_tick: None,
        }
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_mounted(&self, post_id: &str) -> bool {
        self.players.contains_key(post_id)
    }

    pub fn mounted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.players.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn status(&self, post_id: &str) -> Option<PlaybackStatus> {
        self.players.get(post_id).map(|p| p.controller.status())
    }

    pub fn active_status(&self) -> Option<PlaybackStatus> {
        self.status(self.active.as_deref()?)
    }

    pub fn preview(&self, post_id: &str) -> Option<&PreviewFrame> {
        self.players.get(post_id)?.preview.as_ref()
    }

    pub fn playing_count(&self) -> usize {
        self.players
            .values()
            .filter(|p| p.controller.is_playing())
            .count()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Mounts players for the visible window, releases the rest, then makes
    /// the window's current post the active one.
    pub fn sync(&mut self, window: &PostWindow, now: Duration) {
        let visible: Vec<&Post> = window
            .visible_window()
            .into_iter()
            .filter_map(|index| window.get(index))
            .collect();

        let keep: Vec<&str> = visible.iter().map(|post| post.id.as_str()).collect();
        let gone: Vec<String> = self
            .players
            .keys()
            .filter(|id| !keep.contains(&id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            self.unmount(&id, now);
        }

        for post in visible {
            if !self.players.contains_key(&post.id) {
                self.mount(post);
            }
        }

        let current = window.current_post().map(|post| post.id.clone());
        self.set_active(current.as_deref(), now);
    }

    fn mount(&mut self, post: &Post) {
        let resource = match self.factory.create(post) {
            Ok(resource) => resource,
            Err(err) => {
                warn!(post_id = %post.id, error = %err, "failed to create media resource");
                return;
            }
        };
        let mut shadow = match self.factory.create_shadow(post) {
            Ok(shadow) => shadow,
            Err(err) => {
                debug!(post_id = %post.id, error = %err, "preview resource unavailable");
                None
            }
        };
        if let Some(shadow) = shadow.as_mut() {
            let loaded = shadow
                .set_muted(true)
                .and_then(|_| shadow.load(&post.src.video_url));
            if let Err(err) = loaded {
                debug!(post_id = %post.id, error = %err, "preview source failed to load");
            }
        }

        let settings = PlayerSettings {
            start_muted: self.muted,
            ..self.settings
        };
        let mut player = MountedPlayer {
            controller: PlayerController::new(post.id.clone(), post.src.video_url.clone(), settings),
            resource,
            shadow,
            preview: None,
        };
        let effects = player.controller.load();
        player.apply(effects, self.telemetry.as_ref());
        debug!(post_id = %post.id, "mounted player");
        self.players.insert(post.id.clone(), player);
    }

    fn unmount(&mut self, post_id: &str, now: Duration) {
        let Some(mut player) = self.players.remove(post_id) else {
            return;
        };
        let effects = player.controller.release(now);
        player.apply(effects, self.telemetry.as_ref());
        if self.active.as_deref() == Some(post_id) {
            self.active = None;
        }
        debug!(post_id, "unmounted player");
    }

    /// The single place the active card changes: the previous one is
    /// stopped before the next one is played.
    pub fn set_active(&mut self, post_id: Option<&str>, now: Duration) {
        if self.active.as_deref() == post_id {
            return;
        }
        if let Some(previous) = self.active.take() {
            if let Some(player) = self.players.get_mut(&previous) {
                let effects = player.controller.deactivate(now);
                player.apply(effects, self.telemetry.as_ref());
            }
        }
        let Some(next) = post_id else {
            return;
        };
        if let Some(player) = self.players.get_mut(next) {
            let effects = player.controller.activate(now);
            player.apply(effects, self.telemetry.as_ref());
            self.active = Some(next.to_string());
        }
    }

    /// Advances media clocks, routes resource events and fires timers.
    pub fn tick(&mut self, now: Duration) {
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_sub(last))
            .unwrap_or_default();
        self.last_tick = Some(now);

        let telemetry = self.telemetry.clone();
        for player in self.players.values_mut() {
            player.resource.tick(elapsed);
            if let Some(shadow) = player.shadow.as_mut() {
                shadow.poll_events();
            }
            for event in player.resource.poll_events() {
                let effects = player.controller.on_event(event, now);
                player.apply(effects, telemetry.as_ref());
            }
            let effects = player.controller.fire_timers(now);
            player.apply(effects, telemetry.as_ref());
        }
    }

    fn with_active(&mut self, f: impl FnOnce(&mut PlayerController) -> Vec<Effect>) {
        let Some(id) = self.active.as_deref() else {
            return;
        };
        if let Some(player) = self.players.get_mut(id) {
            let effects = f(&mut player.controller);
            player.apply(effects, self.telemetry.as_ref());
        }
    }

    pub fn toggle_play(&mut self, now: Duration) {
        self.with_active(|controller| controller.toggle_play(now));
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
        let muted = self.muted;
        self.with_active(|controller| controller.set_muted(muted));
    }

    /// Seeks the active card by `delta`, clamped to the media bounds.
    pub fn seek_by(&mut self, delta: i64) {
        self.with_active(|controller| {
            let current = controller.current_time().as_millis() as i64;
            let target = (current + delta).max(0) as u64;
            controller.seek_to(Duration::from_millis(target))
        });
    }

    pub fn begin_seek(&mut self) {
        self.with_active(|controller| {
            controller.begin_seek();
            Vec::new()
        });
    }

    pub fn end_seek(&mut self, position: Duration) {
        self.with_active(|controller| controller.end_seek(position));
    }

    pub fn request_preview(&mut self, position: Duration) {
        self.with_active(|controller| controller.preview_frame(position));
    }

    /// Earliest pending player timer, for the event loop's wait.
    pub fn next_due(&self) -> Option<Duration> {
        self.players
            .values()
            .filter_map(|p| p.controller.next_due())
            .min()
    }

    pub fn release_all(&mut self, now: Duration) {
        let ids: Vec<String> = self.players.keys().cloned().collect();
        for id in ids {
            self.unmount(&id, now);
        }
        self.active = None;
    }
}

impl Drop for Carousel {
    fn drop(&mut self) {
        let now = self.last_tick.unwrap_or_default();
        self.release_all(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaSrc;
    use crate::player::PlayerState;
    use crate::telemetry::RecordingSink;

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

    fn window(count: usize) -> PostWindow {
        let mut window = PostWindow::new(1);
        window.append_posts((0..count).map(|i| post(&format!("p{i}"))));
        window
    }

    fn carousel(sink: Arc<RecordingSink>, with_shadow: bool) -> Carousel {
        Carousel::new(
            Box::new(SimulatedFactory {
                duration: Duration::from_secs(30),
                with_shadow,
            }),
            sink,
            PlayerSettings::default(),
        )
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn mounts_only_the_visible_window() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink, false);
        let mut window = window(6);
        carousel.sync(&window, ms(0));
        assert_eq!(carousel.mounted_ids(), vec!["p0", "p1"]);
        assert_eq!(carousel.active_id(), Some("p0"));

        window.set_current_index(3);
        carousel.sync(&window, ms(10));
        assert_eq!(carousel.mounted_ids(), vec!["p2", "p3", "p4"]);
        assert_eq!(carousel.active_id(), Some("p3"));
    }

    #[test]
    fn at_most_one_player_is_playing() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink, false);
        let mut window = window(4);
        carousel.sync(&window, ms(0));
        carousel.tick(ms(0));
        assert_eq!(carousel.playing_count(), 1);

        for (step, index) in [1usize, 2, 1, 0, 3].into_iter().enumerate() {
            let now = ms(100 * (step as u64 + 1));
            window.set_current_index(index);
            carousel.sync(&window, now);
            carousel.tick(now);
            assert!(carousel.playing_count() <= 1);
            let active = carousel.active_status().unwrap();
            assert!(active.playing);
        }
    }

    #[test]
    fn demoted_player_rewinds_after_grace() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink, false);
        let mut window = window(3);
        carousel.sync(&window, ms(0));
        carousel.tick(ms(0));
        carousel.tick(ms(800));

        window.set_current_index(1);
        carousel.sync(&window, ms(1000));
        carousel.tick(ms(1000));
        let p0 = carousel.status("p0").unwrap();
        assert!(!p0.playing);
        assert_eq!(p0.current_time, ms(800));

        carousel.tick(ms(2000));
        let p0 = carousel.status("p0").unwrap();
        assert_eq!(p0.current_time, Duration::ZERO);
        assert_ne!(p0.state, PlayerState::Playing);
    }

    #[test]
    fn quick_return_keeps_position() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink, false);
        let mut window = window(3);
        carousel.sync(&window, ms(0));
        carousel.tick(ms(0));
        carousel.tick(ms(800));

        window.set_current_index(1);
        carousel.sync(&window, ms(900));
        carousel.tick(ms(900));
        window.set_current_index(0);
        carousel.sync(&window, ms(1200));
        carousel.tick(ms(1200));
        carousel.tick(ms(2500));

        let p0 = carousel.status("p0").unwrap();
        assert!(p0.playing);
        assert!(p0.current_time >= ms(800));
    }

    #[test]
    fn unmount_releases_and_reports_watch_time() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink.clone(), false);
        let mut window = window(5);
        carousel.sync(&window, ms(0));
        carousel.tick(ms(0));
        window.set_current_index(3);
        carousel.sync(&window, ms(2000));
        assert!(!carousel.is_mounted("p0"));
        assert_eq!(sink.count("watch_duration"), 1);
    }

    #[test]
    fn mute_preference_carries_to_new_players() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink, false);
        let mut window = window(5);
        carousel.sync(&window, ms(0));
        assert!(carousel.active_status().unwrap().muted);
        carousel.toggle_mute();
        assert!(!carousel.active_status().unwrap().muted);

        window.set_current_index(3);
        carousel.sync(&window, ms(100));
        assert!(!carousel.status("p4").unwrap().muted);
    }

    #[test]
    fn previews_use_the_shadow_resource() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink, true);
        let window = window(2);
        carousel.sync(&window, ms(0));
        carousel.request_preview(ms(7400));
        assert_eq!(carousel.preview("p0").map(|frame| frame.second), Some(7));
    }

    #[test]
    fn viewed_is_recorded_once_after_threshold() {
        let sink = Arc::new(RecordingSink::new());
        let mut carousel = carousel(sink.clone(), false);
        let window = window(1);
        carousel.sync(&window, ms(0));
        for step in 0..=14 {
            carousel.tick(ms(step * 500));
        }
        assert_eq!(sink.count("viewed"), 1);
    }
}
