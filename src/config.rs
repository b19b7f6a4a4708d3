use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{Coordinates, DistanceFilter};

const DEFAULT_ENV_PREFIX: &str = "REELFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            feed: FeedConfig::default(),
            fetch: FetchConfig::default(),
            location: LocationConfig::default(),
            player: PlayerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// Remote backend. An empty `base_url` selects the in-process store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub storage_bucket: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            storage_bucket: String::new(),
            api_key: String::new(),
            auth_token: String::new(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

/// Email sign-in on startup. Left empty, the session starts as a guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    #[default]
    Nearby,
    Recommended,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default)]
    pub source: FeedSource,
    #[serde(default = "default_overscan")]
    pub overscan: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub distance: DistanceFilter,
    #[serde(default = "default_scroll_debounce", with = "humantime_serde")]
    pub scroll_debounce: Duration,
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
    #[serde(default = "default_view_threshold", with = "humantime_serde")]
    pub view_threshold: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: FeedSource::default(),
            overscan: default_overscan(),
            page_size: default_page_size(),
            distance: DistanceFilter::default(),
            scroll_debounce: default_scroll_debounce(),
            stop_grace: default_stop_grace(),
            view_threshold: default_view_threshold(),
        }
    }
}

fn default_overscan() -> usize {
    crate::window::DEFAULT_OVERSCAN
}

fn default_page_size() -> usize {
    10
}

fn default_scroll_debounce() -> Duration {
    crate::snap::DEFAULT_SCROLL_DEBOUNCE
}

fn default_stop_grace() -> Duration {
    crate::player::DEFAULT_STOP_GRACE
}

fn default_view_threshold() -> Duration {
    crate::player::DEFAULT_VIEW_THRESHOLD
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    #[serde(default = "default_video_url_ttl", with = "humantime_serde")]
    pub video_url_ttl: Duration,
    #[serde(default = "default_state_path")]
    pub state_path: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            video_url_ttl: default_video_url_ttl(),
            state_path: default_state_path(),
        }
    }
}

fn default_video_url_ttl() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_state_path() -> Option<PathBuf> {
    crate::storage::default_path()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationConfig {
    #[serde(default = "default_location_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Position reported by the device. Unset means no fix is available.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_fallback_latitude")]
    pub fallback_latitude: f64,
    #[serde(default = "default_fallback_longitude")]
    pub fallback_longitude: f64,
}

impl LocationConfig {
    pub fn fixed(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.latitude?, self.longitude?))
    }

    pub fn fallback(&self) -> Coordinates {
        Coordinates::new(self.fallback_latitude, self.fallback_longitude)
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            timeout: default_location_timeout(),
            latitude: None,
            longitude: None,
            fallback_latitude: default_fallback_latitude(),
            fallback_longitude: default_fallback_longitude(),
        }
    }
}

fn default_location_timeout() -> Duration {
    crate::location::DEFAULT_TIMEOUT
}

fn default_fallback_latitude() -> f64 {
    crate::location::FALLBACK_COORDINATES.lat
}

fn default_fallback_longitude() -> f64 {
    crate::location::FALLBACK_COORDINATES.lng
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerConfig {
    #[serde(default = "default_player_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default = "default_video_output")]
    pub video_output: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub previews: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            enabled: default_player_enabled(),
            mpv_path: default_mpv_path(),
            video_output: default_video_output(),
            extra_args: Vec::new(),
            previews: false,
        }
    }
}

fn default_player_enabled() -> bool {
    true
}

fn default_mpv_path() -> String {
    "mpv".into()
}

fn default_video_output() -> String {
    "gpu".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    let path = options.config_file.clone().or_else(default_config_path);
    if let Some(path) = path {
        if path.exists() {
            cfg = read_config_file(&path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    for (key, value) in env_overrides(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn env_overrides(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            let stripped = key.strip_prefix(&upper_prefix)?;
            Some((stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

fn parse_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value.trim()).ok()
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "backend.base_url" => cfg.backend.base_url = value,
        "backend.storage_bucket" => cfg.backend.storage_bucket = value,
        "backend.api_key" => cfg.backend.api_key = value,
        "backend.auth_token" => cfg.backend.auth_token = value,
        "backend.poll_interval" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.backend.poll_interval = parsed;
            }
        }
        "backend.request_timeout" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.backend.request_timeout = parsed;
            }
        }
        "auth.email" => cfg.auth.email = value,
        "auth.password" => cfg.auth.password = value,
        "feed.source" => match value.trim() {
            "nearby" => cfg.feed.source = FeedSource::Nearby,
            "recommended" => cfg.feed.source = FeedSource::Recommended,
            _ => {}
        },
        "feed.overscan" => {
            if let Ok(parsed) = value.trim().parse() {
                cfg.feed.overscan = parsed;
            }
        }
        "feed.page_size" => {
            if let Ok(parsed) = value.trim().parse() {
                cfg.feed.page_size = parsed;
            }
        }
        "feed.scroll_debounce" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.feed.scroll_debounce = parsed;
            }
        }
        "feed.stop_grace" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.feed.stop_grace = parsed;
            }
        }
        "feed.view_threshold" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.feed.view_threshold = parsed;
            }
        }
        "fetch.video_url_ttl" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.fetch.video_url_ttl = parsed;
            }
        }
        "fetch.state_path" => cfg.fetch.state_path = Some(PathBuf::from(value)),
        "location.timeout" => {
            if let Some(parsed) = parse_duration(&value) {
                cfg.location.timeout = parsed;
            }
        }
        "location.latitude" => cfg.location.latitude = value.trim().parse().ok(),
        "location.longitude" => cfg.location.longitude = value.trim().parse().ok(),
        "player.enabled" => cfg.player.enabled = parse_bool(value.trim()),
        "player.mpv_path" => cfg.player.mpv_path = value,
        "player.video_output" => cfg.player.video_output = value,
        "player.previews" => cfg.player.previews = parse_bool(value.trim()),
        "player.extra_args" => {
            cfg.player.extra_args = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "log_level" => cfg.log_level = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reelfeed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str, dir: &Path) -> LoadOptions {
        LoadOptions {
            config_file: Some(dir.join("missing.yaml")),
            env_prefix: Some(prefix.into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated("REELFEED_TEST_DEFAULTS", dir.path())).unwrap();
        assert_eq!(cfg.feed.overscan, 1);
        assert_eq!(cfg.feed.scroll_debounce, Duration::from_millis(8));
        assert_eq!(cfg.feed.stop_grace, Duration::from_secs(1));
        assert_eq!(cfg.location.timeout, Duration::from_secs(10));
        assert_eq!(cfg.location.fallback(), Coordinates::new(53.324319, -6.253127));
        assert!(cfg.location.fixed().is_none());
        assert!(cfg.backend.base_url.is_empty());
    }

    #[test]
    fn reads_yaml_with_humantime_durations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "backend:\n  base_url: https://db.test\n  poll_interval: 30s\nfeed:\n  source: recommended\n  page_size: 4\n  distance: Close by\nlocation:\n  latitude: 51.5\n  longitude: -0.12\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("REELFEED_TEST_YAML".into()),
        })
        .unwrap();
        assert_eq!(cfg.backend.base_url, "https://db.test");
        assert_eq!(cfg.backend.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.backend.request_timeout, Duration::from_secs(15));
        assert_eq!(cfg.feed.source, FeedSource::Recommended);
        assert_eq!(cfg.feed.page_size, 4);
        assert_eq!(cfg.feed.distance, DistanceFilter::CloseBy);
        assert_eq!(cfg.location.fixed(), Some(Coordinates::new(51.5, -0.12)));
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("REELFEED_TEST_ENV_FEED__STOP_GRACE", "250ms");
        env::set_var("REELFEED_TEST_ENV_PLAYER__ENABLED", "false");
        env::set_var("REELFEED_TEST_ENV_LOG_LEVEL", "debug");
        let cfg = load(isolated("REELFEED_TEST_ENV", dir.path())).unwrap();
        assert_eq!(cfg.feed.stop_grace, Duration::from_millis(250));
        assert!(!cfg.player.enabled);
        assert_eq!(cfg.log_level, "debug");
        env::remove_var("REELFEED_TEST_ENV_FEED__STOP_GRACE");
        env::remove_var("REELFEED_TEST_ENV_PLAYER__ENABLED");
        env::remove_var("REELFEED_TEST_ENV_LOG_LEVEL");
    }
}
