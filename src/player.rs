//! Lifecycle of a single playback resource as an explicit state machine.
//!
//! Every command and every resource event returns the [`Effect`]s the
//! resource should perform. [`apply_effects`] performs them and turns
//! resource failures back into controller state, so nothing here returns an
//! error to the caller.

use std::time::Duration;

use tracing::{debug, warn};

use crate::scheduler::{Scheduler, TimerToken};
use crate::telemetry::TelemetryEvent;
use crate::video::{MediaEvent, MediaResource, PreviewFrame};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(1000);
pub const DEFAULT_VIEW_THRESHOLD: Duration = Duration::from_secs(5);
pub const DEFAULT_ICON_DURATION: Duration = Duration::from_millis(1000);

/// Larger time jumps are seeks, not playback, and are not counted as watched.
const MAX_COUNTED_STEP: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Load { url: String },
    Play,
    Pause,
    Seek { position: Duration },
    SetMuted(bool),
    ResetAndReload,
    ClearSource,
    Preview { second: u64 },
    Telemetry(TelemetryEvent),
}

/// Transient play/pause indicator shown after a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayIcon {
    Play,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    StopGrace,
    HideIcon,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSettings {
    pub stop_grace: Duration,
    pub view_threshold: Duration,
    pub icon_duration: Duration,
    pub start_muted: bool,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
            view_threshold: DEFAULT_VIEW_THRESHOLD,
            icon_duration: DEFAULT_ICON_DURATION,
            start_muted: true,
        }
    }
}

/// Read-only view of a controller for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    pub playing: bool,
    pub muted: bool,
    pub current_time: Duration,
    pub buffered_end: Duration,
    pub duration: Option<Duration>,
    pub has_error: bool,
    pub loading: bool,
    pub icon: Option<PlayIcon>,
}

#[derive(Debug)]
pub struct PlayerController {
    post_id: String,
    url: String,
    settings: PlayerSettings,
    state: PlayerState,
    muted: bool,
    current_time: Duration,
    buffered_end: Duration,
    duration: Option<Duration>,
    ended: bool,
    has_error: bool,
    error_message: Option<String>,
    loading: bool,
    seeking: bool,
    active: bool,
    released: bool,
    viewed_sent: bool,
    watched: Duration,
    play_started_at: Option<Duration>,
    icon: Option<PlayIcon>,
    stop_timer: Option<TimerToken>,
    icon_timer: Option<TimerToken>,
    timers: Scheduler<Timer>,
}

impl PlayerController {
    pub fn new(post_id: impl Into<String>, url: impl Into<String>, settings: PlayerSettings) -> Self {
        Self {
            post_id: post_id.into(),
            url: url.into(),
            muted: settings.start_muted,
            settings,
            state: PlayerState::Idle,
            current_time: Duration::ZERO,
            buffered_end: Duration::ZERO,
            duration: None,
            ended: false,
            has_error: false,
            error_message: None,
            loading: false,
            seeking: false,
            active: false,
            released: false,
            viewed_sent: false,
            watched: Duration::ZERO,
            play_started_at: None,
            icon: None,
            stop_timer: None,
            icon_timer: None,
            timers: Scheduler::new(),
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn stop_pending(&self) -> bool {
        self.stop_timer
            .map(|token| self.timers.is_pending(token))
            .unwrap_or(false)
    }

    pub fn next_due(&self) -> Option<Duration> {
        self.timers.next_due()
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.state,
            playing: self.is_playing(),
            muted: self.muted,
            current_time: self.current_time,
            buffered_end: self.buffered_end,
            duration: self.duration,
            has_error: self.has_error,
            loading: self.loading,
            icon: self.icon,
        }
    }

    /// Starts buffering. Neighbours of the active card are loaded but not
    /// played.
    pub fn load(&mut self) -> Vec<Effect> {
        if self.released || self.state != PlayerState::Idle {
            return Vec::new();
        }
        self.state = PlayerState::Loading;
        self.loading = true;
        vec![
            Effect::SetMuted(self.muted),
            Effect::Load {
                url: self.url.clone(),
            },
        ]
    }

    /// Promotes this card to the active one: cancels a pending stop, retries
    /// after an error, then plays.
    pub fn activate(&mut self, now: Duration) -> Vec<Effect> {
        if self.released {
            return Vec::new();
        }
        self.active = true;
        if let Some(token) = self.stop_timer.take() {
            self.timers.cancel(token);
        }
        let mut effects = Vec::new();
        if self.state == PlayerState::Error {
            debug!(post_id = %self.post_id, "retrying after error");
            self.has_error = false;
            self.error_message = None;
            self.state = PlayerState::Idle;
        }
        effects.extend(self.load());
        effects.extend(self.play(now));
        effects
    }

    /// Demotes this card. Same as [`PlayerController::stop`].
    pub fn deactivate(&mut self, now: Duration) -> Vec<Effect> {
        self.active = false;
        self.stop(now)
    }

    /// Already-playing media is left alone. In `Error` nothing happens until
    /// the card is activated again.
    pub fn play(&mut self, now: Duration) -> Vec<Effect> {
        if self.released || self.state == PlayerState::Error {
            return Vec::new();
        }
        if self.is_effectively_playing() {
            return Vec::new();
        }
        if self.ended {
            self.ended = false;
            self.current_time = Duration::ZERO;
            self.play_started_at = Some(now);
            return vec![
                Effect::Seek {
                    position: Duration::ZERO,
                },
                Effect::Play,
            ];
        }
        self.play_started_at.get_or_insert(now);
        vec![Effect::Play]
    }

    fn is_effectively_playing(&self) -> bool {
        self.state == PlayerState::Playing
            && self.current_time > Duration::ZERO
            && !self.ended
            && self.buffered_end > self.current_time
    }

    /// Reported by [`apply_effects`] when the resource refused to play.
    pub fn play_failed(&mut self, message: &str) -> Vec<Effect> {
        warn!(post_id = %self.post_id, error = message, "play failed, reloading");
        self.has_error = true;
        self.error_message = Some(message.to_string());
        self.reload()
    }

    pub fn pause(&mut self, now: Duration) -> Vec<Effect> {
        if self.released {
            return Vec::new();
        }
        let mut effects = vec![Effect::Pause];
        effects.extend(self.finish_watch(now));
        effects
    }

    pub fn pause_failed(&mut self, message: &str) -> Vec<Effect> {
        warn!(post_id = %self.post_id, error = message, "pause failed, reloading");
        self.reload()
    }

    /// Pauses now and rewinds after the grace period unless the card is
    /// re-activated first.
    pub fn stop(&mut self, now: Duration) -> Vec<Effect> {
        if self.released {
            return Vec::new();
        }
        let effects = self.pause(now);
        if let Some(token) = self.stop_timer.take() {
            self.timers.cancel(token);
        }
        self.stop_timer = Some(
            self.timers
                .schedule(now, self.settings.stop_grace, Timer::StopGrace),
        );
        effects
    }

    /// Play when paused, pause when playing; flashes the matching icon.
    pub fn toggle_play(&mut self, now: Duration) -> Vec<Effect> {
        let (effects, icon) = if self.is_playing() {
            (self.pause(now), PlayIcon::Pause)
        } else {
            (self.play(now), PlayIcon::Play)
        };
        self.icon = Some(icon);
        if let Some(token) = self.icon_timer.take() {
            self.timers.cancel(token);
        }
        self.icon_timer = Some(
            self.timers
                .schedule(now, self.settings.icon_duration, Timer::HideIcon),
        );
        effects
    }

    pub fn toggle_mute(&mut self) -> Vec<Effect> {
        self.set_muted(!self.muted)
    }

    pub fn set_muted(&mut self, muted: bool) -> Vec<Effect> {
        self.muted = muted;
        vec![Effect::SetMuted(muted)]
    }

    pub fn seek_to(&mut self, position: Duration) -> Vec<Effect> {
        if self.released {
            return Vec::new();
        }
        let position = match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        };
        self.current_time = position;
        self.ended = false;
        vec![Effect::Seek { position }]
    }

    /// Time updates are ignored until [`PlayerController::end_seek`].
    pub fn begin_seek(&mut self) {
        self.seeking = true;
    }

    pub fn end_seek(&mut self, position: Duration) -> Vec<Effect> {
        self.seeking = false;
        self.seek_to(position)
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    /// Thumbnail request for the scrubber, rounded down to whole seconds.
    pub fn preview_frame(&self, position: Duration) -> Vec<Effect> {
        vec![Effect::Preview {
            second: position.as_secs(),
        }]
    }

    /// Synchronous teardown for unmount. Pending timers never fire.
    pub fn release(&mut self, now: Duration) -> Vec<Effect> {
        if self.released {
            return Vec::new();
        }
        let mut effects = vec![Effect::Pause];
        effects.extend(self.finish_watch(now));
        effects.push(Effect::ClearSource);
        self.timers.clear();
        self.stop_timer = None;
        self.icon_timer = None;
        self.icon = None;
        self.active = false;
        self.released = true;
        self.state = PlayerState::Idle;
        self.loading = false;
        effects
    }

    pub fn fire_timers(&mut self, now: Duration) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (token, timer) in self.timers.advance(now) {
            match timer {
                Timer::StopGrace => {
                    if self.stop_timer != Some(token) {
                        continue;
                    }
                    self.stop_timer = None;
                    self.current_time = Duration::ZERO;
                    self.ended = false;
                    if self.state != PlayerState::Error {
                        self.state = PlayerState::Idle;
                        effects.push(Effect::ResetAndReload);
                    }
                }
                Timer::HideIcon => {
                    if self.icon_timer == Some(token) {
                        self.icon_timer = None;
                        self.icon = None;
                    }
                }
            }
        }
        effects
    }

    pub fn on_event(&mut self, event: MediaEvent, now: Duration) -> Vec<Effect> {
        if self.released {
            return Vec::new();
        }
        if self.state == PlayerState::Error {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match event {
            MediaEvent::LoadStart => {
                self.loading = true;
                if self.state == PlayerState::Idle {
                    self.state = PlayerState::Loading;
                }
            }
            MediaEvent::DataLoaded { duration } => {
                self.duration = Some(duration);
            }
            MediaEvent::CanPlayThrough => {
                self.loading = false;
                self.has_error = false;
                self.error_message = None;
                if matches!(self.state, PlayerState::Idle | PlayerState::Loading) {
                    self.state = PlayerState::Ready;
                }
            }
            MediaEvent::Playing => {
                self.loading = false;
                self.ended = false;
                self.state = PlayerState::Playing;
                self.play_started_at.get_or_insert(now);
            }
            MediaEvent::Paused => {
                if self.state == PlayerState::Playing {
                    self.state = PlayerState::Paused;
                }
            }
            MediaEvent::Ended => {
                self.ended = true;
                self.state = PlayerState::Paused;
                effects.extend(self.finish_watch(now));
            }
            MediaEvent::TimeUpdate { time } => {
                if !self.seeking {
                    if self.state == PlayerState::Playing && time > self.current_time {
                        let step = time - self.current_time;
                        if step <= MAX_COUNTED_STEP {
                            self.watched += step;
                        }
                    }
                    self.current_time = time;
                }
                if !self.viewed_sent && self.watched >= self.settings.view_threshold {
                    self.viewed_sent = true;
                    effects.push(Effect::Telemetry(TelemetryEvent::Viewed {
                        post_id: self.post_id.clone(),
                    }));
                }
            }
            MediaEvent::Progress { buffered_end } => {
                self.buffered_end = buffered_end;
            }
            MediaEvent::Error { message } => {
                warn!(post_id = %self.post_id, error = %message, "media error");
                self.state = PlayerState::Error;
                self.has_error = true;
                self.loading = false;
                self.error_message = Some(message);
                effects.extend(self.finish_watch(now));
            }
        }
        effects
    }

    fn reload(&mut self) -> Vec<Effect> {
        self.state = PlayerState::Loading;
        self.loading = true;
        vec![Effect::Load {
            url: self.url.clone(),
        }]
    }

    fn finish_watch(&mut self, now: Duration) -> Option<Effect> {
        let started = self.play_started_at.take()?;
        let seconds = now.saturating_sub(started).as_secs_f64();
        Some(Effect::Telemetry(TelemetryEvent::WatchDuration {
            post_id: self.post_id.clone(),
            seconds,
        }))
    }
}

/// What applying effects produced besides resource calls.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Applied {
    pub telemetry: Vec<TelemetryEvent>,
    pub preview: Option<PreviewFrame>,
}

/// Performs `effects` on `resource`. Preview requests go to `shadow`, the
/// hidden muted resource, when there is one. Resource failures are fed
/// back into `controller` and their follow-up effects applied once.
pub fn apply_effects(
    controller: &mut PlayerController,
    resource: &mut dyn MediaResource,
    mut shadow: Option<&mut (dyn MediaResource + 'static)>,
    effects: Vec<Effect>,
) -> Applied {
    let mut applied = Applied::default();
    let mut queue = effects;
    let mut retried = false;
    while !queue.is_empty() {
        let mut follow_up = Vec::new();
        for effect in queue {
            let result = match effect {
                Effect::Load { url } => resource.load(&url),
                Effect::Play => match resource.play() {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        follow_up.extend(controller.play_failed(&err.to_string()));
                        Ok(())
                    }
                },
                Effect::Pause => match resource.pause() {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        follow_up.extend(controller.pause_failed(&err.to_string()));
                        Ok(())
                    }
                },
                Effect::Seek { position } => resource.seek(position),
                Effect::SetMuted(muted) => resource.set_muted(muted),
                Effect::ResetAndReload => resource.reset(),
                Effect::ClearSource => {
                    resource.clear();
                    if let Some(shadow) = shadow.as_deref_mut() {
                        shadow.clear();
                    }
                    Ok(())
                }
                Effect::Preview { second } => {
                    let target: &mut dyn MediaResource = match shadow.as_deref_mut() {
                        Some(shadow) => shadow,
                        None => &mut *resource,
                    };
                    match target.preview(second) {
                        Ok(frame) => {
                            applied.preview = Some(frame);
                            Ok(())
                        }
                        Err(err) => {
                            debug!(error = %err, "preview unavailable");
                            Ok(())
                        }
                    }
                }
                Effect::Telemetry(event) => {
                    applied.telemetry.push(event);
                    Ok(())
                }
            };
            if let Err(err) = result {
                debug!(post_id = controller.post_id(), error = %err, "media command failed");
            }
        }
        if retried {
            break;
        }
        retried = true;
        queue = follow_up;
    }
    applied
}
