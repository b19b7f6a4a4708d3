use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::auth::Session;
use crate::backend::{Backend, SignInProvider};
use crate::carousel::{Carousel, ResourceFactory, SimulatedFactory};
use crate::config::{self, Config, FeedSource, PlayerConfig};
use crate::error::FeedError;
use crate::feed::{Feed, FeedSettings, FeedState};
use crate::fetch::{NearbyPostSource, PostSource, RecommendedPostSource, SqliteUrlCache, VideoUrlCache};
use crate::interactions::Interactions;
use crate::location::{ConfiguredPosition, LocationResolver};
use crate::model::{FilterCriteria, PostKind};
use crate::player::{PlayerSettings, DEFAULT_ICON_DURATION};
use crate::storage::{self, Store};
use crate::telemetry::{BackgroundSink, LogSink, TelemetrySink};
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Print the first page instead of opening the terminal UI.
    pub headless: bool,
    pub config_file: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    run_with(RunOptions::default())
}

pub fn run_with(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        ..config::LoadOptions::default()
    })
    .context("load config")?;
    init_tracing(&cfg, options.headless);
    info!(version = crate::VERSION, headless = options.headless, "starting reelfeed");

    let store = Arc::new(
        Store::open(storage::Options {
            path: cfg.fetch.state_path.clone(),
        })
        .context("open storage")?,
    );
    match store.purge_expired_video_urls(Utc::now()) {
        Ok(0) => {}
        Ok(purged) => info!(purged, "dropped expired video urls"),
        Err(err) => warn!(error = %err, "video url purge failed"),
    }

    let backend = Backend::connect(&cfg.backend)?;
    let session = Arc::new(Session::new(backend.auth.clone()));
    let mut status = sign_in(&cfg, &session, &backend);

    let telemetry: Arc<dyn TelemetrySink> = if backend.kind() == "memory" {
        Arc::new(LogSink)
    } else {
        Arc::new(BackgroundSink::spawn(
            backend.documents.clone(),
            session.user_id(),
        ))
    };

    let cache: Arc<dyn VideoUrlCache> =
        Arc::new(SqliteUrlCache::new(store.clone(), cfg.fetch.video_url_ttl));
    let source: Arc<dyn PostSource> = match cfg.feed.source {
        FeedSource::Nearby => Arc::new(NearbyPostSource::new(
            backend.clone(),
            Some(cache),
            PostKind::Restaurant,
        )),
        FeedSource::Recommended => Arc::new(RecommendedPostSource::new(
            backend.clone(),
            Some(cache),
            session.user_id(),
        )),
    };
    let settings = FeedSettings {
        overscan: cfg.feed.overscan,
        page_size: cfg.feed.page_size,
        scroll_debounce: cfg.feed.scroll_debounce,
        ..FeedSettings::default()
    };
    let mut feed = Feed::new(source, settings).with_criteria(FilterCriteria {
        distance: cfg.feed.distance,
        ..FilterCriteria::default()
    });

    let interactions = Interactions::new(
        backend.documents.clone(),
        session.clone(),
        telemetry.clone(),
        Some(store.clone()),
    );
    feed.apply_blacklist(interactions.blacklisted_ids());

    if let Some(message) = start_feed(&cfg, &mut feed, &store) {
        status = message;
    }

    let result = if options.headless {
        let mut stdout = io::stdout().lock();
        wait_for_page(&mut feed, cfg.backend.request_timeout * 4);
        print_page(&feed, &mut stdout)
    } else {
        let carousel = Carousel::new(
            resource_factory(&cfg.player),
            telemetry,
            PlayerSettings {
                stop_grace: cfg.feed.stop_grace,
                view_threshold: cfg.feed.view_threshold,
                icon_duration: DEFAULT_ICON_DURATION,
                start_muted: true,
            },
        );
        let mut model = ui::Model::new(ui::Options {
            feed,
            carousel,
            interactions,
            session,
            status_message: status,
        });
        model.run()
    };

    backend.shutdown();
    result
}

fn init_tracing(cfg: &Config, headless: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    if headless {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
        return;
    }

    // The terminal belongs to the UI; logs go to a file or nowhere.
    let Some(path) = log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            eprintln!("failed to create log dir {}: {err}", parent.display());
            return;
        }
    }
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", path.display());
            return;
        }
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_target(true)
            .with_file(true)
            .with_line_number(true),
    );
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub fn log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("reelfeed").join("reelfeed.log"))
}

/// Signs in with the configured account. Returns the status line to show.
fn sign_in(cfg: &Config, session: &Session, backend: &Backend) -> String {
    if cfg.auth.email.trim().is_empty() {
        return "Browsing as guest.".to_string();
    }
    let signed_in = session.sign_in(SignInProvider::Password {
        email: cfg.auth.email.trim().to_string(),
        password: cfg.auth.password.clone(),
    });
    match signed_in {
        Ok(user) => {
            if let Err(err) = session.reload(backend.documents.as_ref()) {
                warn!(error = %err, "profile reload failed");
            }
            let name = if user.username.is_empty() {
                user.id
            } else {
                user.username
            };
            format!("Signed in as {name}.")
        }
        Err(err) => {
            warn!(error = %err, "sign-in failed");
            format!("Sign-in failed ({err}). Browsing as guest.")
        }
    }
}

/// Resolves a position and starts the first page. Returns a status line
/// when something needs the user's attention.
fn start_feed(cfg: &Config, feed: &mut Feed, store: &Arc<Store>) -> Option<String> {
    let provider = Arc::new(ConfiguredPosition::new(
        cfg.location.fixed(),
        Some(store.clone()),
    ));
    let resolver = LocationResolver::new(provider, cfg.location.timeout, cfg.location.fallback());
    match resolver.resolve() {
        Ok(fix) => {
            let center = fix.coordinates();
            if !fix.is_fallback() {
                if let Err(err) = store.save_last_location(center) {
                    warn!(error = %err, "failed to store last location");
                }
            }
            info!(lat = center.lat, lng = center.lng, fallback = fix.is_fallback(), "location resolved");
            feed.set_location(center);
            fix.is_fallback()
                .then(|| "Location unavailable. Showing videos near a default spot.".to_string())
        }
        Err(err) => {
            warn!(error = %err, "location refused");
            if cfg.feed.source == FeedSource::Recommended {
                feed.refresh();
            }
            Some(match err {
                FeedError::PermissionDenied(_) => {
                    "Location access is off. Enable it to see videos nearby.".to_string()
                }
                other => format!("Location unavailable: {other}"),
            })
        }
    }
}

fn wait_for_page(feed: &mut Feed, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while feed.is_loading() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(?timeout, "gave up waiting for the first page");
            feed.cancel();
            return;
        }
        feed.wait(remaining);
    }
}

/// Writes the loaded posts, one per line. A failed feed is an error.
pub fn print_page(feed: &Feed, out: &mut impl Write) -> Result<()> {
    if let FeedState::Failed(reason) = feed.state() {
        bail!("feed failed to load: {reason}");
    }
    let window = feed.window();
    if let Some(message) = ui::empty_message(feed.state(), !window.is_empty()) {
        writeln!(out, "{message}")?;
        return Ok(());
    }
    for (index, post) in window.posts().enumerate() {
        let name = if post.location_name.is_empty() {
            post.id.as_str()
        } else {
            post.location_name.as_str()
        };
        let mut line = format!("{:>3}. {name}", index + 1);
        let distance = ui::format_distance(post.distance);
        if !distance.is_empty() {
            line.push_str(&format!(" ({distance})"));
        }
        let tags = feed.tag_names(post);
        if !tags.is_empty() {
            line.push_str(&format!(" [{}]", tags.join(", ")));
        }
        writeln!(out, "{line}")?;
        writeln!(out, "     {}", post.src.video_url)?;
    }
    if feed.has_more() {
        writeln!(out, "… more available")?;
    }
    Ok(())
}

#[cfg(unix)]
fn resource_factory(cfg: &PlayerConfig) -> Box<dyn ResourceFactory> {
    if !cfg.enabled {
        return Box::new(SimulatedFactory::default());
    }
    let preview_dir = cfg
        .previews
        .then(|| dirs::cache_dir().map(|dir| dir.join("reelfeed").join("previews")))
        .flatten();
    Box::new(crate::carousel::MpvFactory {
        mpv_path: cfg.mpv_path.clone(),
        video_output: cfg.video_output.clone(),
        extra_args: cfg.extra_args.clone(),
        preview_dir,
    })
}

#[cfg(not(unix))]
fn resource_factory(_cfg: &PlayerConfig) -> Box<dyn ResourceFactory> {
    Box::new(SimulatedFactory::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::error::FeedResult;
    use crate::feed::Execution;
    use crate::fetch::{Page, PageRequest};
    use crate::model::{MediaSrc, Post};

    struct OnePage(FeedResult<Vec<Post>>);

    impl PostSource for OnePage {
        fn fetch_page(&self, _request: &PageRequest, _token: &CancellationToken) -> FeedResult<Page> {
            let posts = self.0.clone()?;
            Ok(Page {
                next_offset: posts.len(),
                posts,
                ..Page::default()
            })
        }

        fn name(&self) -> &'static str {
            "one-page"
        }
    }

    fn loaded(result: FeedResult<Vec<Post>>) -> Feed {
        let mut feed = Feed::new(
            Arc::new(OnePage(result)),
            FeedSettings {
                execution: Execution::Inline,
                ..FeedSettings::default()
            },
        );
        feed.refresh();
        feed.poll();
        feed
    }

    #[test]
    fn print_page_lists_posts() {
        let post = Post {
            id: "p1".into(),
            location_name: "Bite Club".into(),
            distance: Some(1.26),
            src: MediaSrc {
                video_url: "https://cdn.example/p1.mp4".into(),
                ..MediaSrc::default()
            },
            ..Post::default()
        };
        let feed = loaded(Ok(vec![post]));
        let mut out = Vec::new();
        print_page(&feed, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  1. Bite Club (1.3 km)"), "{text}");
        assert!(text.contains("https://cdn.example/p1.mp4"));
    }

    #[test]
    fn print_page_reports_empty_and_failed_feeds() {
        let mut out = Vec::new();
        print_page(&loaded(Ok(Vec::new())), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("No videos around here"));

        let failed = loaded(Err(FeedError::Backend("offline".into())));
        assert!(print_page(&failed, &mut Vec::new()).is_err());
    }
}
