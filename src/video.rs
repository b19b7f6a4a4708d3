//! Playback resources driven by [`crate::player::PlayerController`] effects:
//! an mpv process controlled over its JSON IPC socket, and a deterministic
//! simulated resource.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

#[cfg(unix)]
pub use mpv::MpvResource;

/// Events a resource reports back to its controller.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadStart,
    DataLoaded { duration: Duration },
    CanPlayThrough,
    Playing,
    Paused,
    Ended,
    TimeUpdate { time: Duration },
    Progress { buffered_end: Duration },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFrame {
    /// Whole seconds into the video.
    pub second: u64,
    pub image: Option<PathBuf>,
}

pub trait MediaResource: Send {
    fn load(&mut self, url: &str) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn set_muted(&mut self, muted: bool) -> Result<()>;
    /// Rewinds to the start and reloads the current source.
    fn reset(&mut self) -> Result<()>;
    /// Detaches the source so the decoder can release its buffers.
    fn clear(&mut self);
    fn preview(&mut self, second: u64) -> Result<PreviewFrame>;
    fn poll_events(&mut self) -> Vec<MediaEvent>;
    /// Lets clock-driven resources advance playback.
    fn tick(&mut self, _elapsed: Duration) {}
}

/// In-process resource that plays back a fixed-length clip on `tick`.
#[derive(Debug, Clone)]
pub struct SimulatedResource {
    url: Option<String>,
    duration: Duration,
    position: Duration,
    playing: bool,
    muted: bool,
    fail_play: bool,
    fail_load: bool,
    pending: Vec<MediaEvent>,
    commands: Vec<String>,
}

impl Default for SimulatedResource {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl SimulatedResource {
    pub fn new(duration: Duration) -> Self {
        Self {
            url: None,
            duration,
            position: Duration::ZERO,
            playing: false,
            muted: true,
            fail_play: false,
            fail_load: false,
            pending: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Makes `play` fail, the way a blocked autoplay would.
    pub fn fail_play(&mut self, fail: bool) {
        self.fail_play = fail;
    }

    pub fn fail_load(&mut self, fail: bool) {
        self.fail_load = fail;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn source(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Every command applied so far, e.g. `"load"`, `"play"`, `"seek 3000"`.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Reports an error the way a broken stream would.
    pub fn inject_error(&mut self, message: &str) {
        self.playing = false;
        self.pending.push(MediaEvent::Error {
            message: message.to_string(),
        });
    }
}

impl MediaResource for SimulatedResource {
    fn load(&mut self, url: &str) -> Result<()> {
        self.commands.push("load".into());
        if self.fail_load {
            self.pending.push(MediaEvent::Error {
                message: format!("failed to load {url}"),
            });
            return Err(anyhow!("failed to load {url}"));
        }
        self.url = Some(url.to_string());
        self.position = Duration::ZERO;
        self.playing = false;
        self.pending.extend([
            MediaEvent::LoadStart,
            MediaEvent::DataLoaded {
                duration: self.duration,
            },
            MediaEvent::Progress {
                buffered_end: self.duration,
            },
            MediaEvent::CanPlayThrough,
        ]);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.commands.push("play".into());
        if self.fail_play {
            return Err(anyhow!("play request was interrupted"));
        }
        if self.url.is_none() {
            return Err(anyhow!("no source loaded"));
        }
        if !self.playing {
            self.playing = true;
            self.pending.push(MediaEvent::Playing);
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.commands.push("pause".into());
        if self.playing {
            self.playing = false;
            self.pending.push(MediaEvent::Paused);
        }
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.commands.push(format!("seek {}", position.as_millis()));
        self.position = position.min(self.duration);
        self.pending.push(MediaEvent::TimeUpdate {
            time: self.position,
        });
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.commands.push(format!("mute {muted}"));
        self.muted = muted;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.commands.push("reset".into());
        let url = self
            .url
            .clone()
            .ok_or_else(|| anyhow!("no source to reload"))?;
        self.load(&url)
    }

    fn clear(&mut self) {
        self.commands.push("clear".into());
        self.url = None;
        self.playing = false;
        self.position = Duration::ZERO;
        self.pending.clear();
    }

    fn preview(&mut self, second: u64) -> Result<PreviewFrame> {
        self.commands.push(format!("preview {second}"));
        if self.url.is_none() {
            return Err(anyhow!("no source for preview"));
        }
        self.position = Duration::from_secs(second).min(self.duration);
        Ok(PreviewFrame {
            second,
            image: None,
        })
    }

    fn poll_events(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.pending)
    }

    fn tick(&mut self, elapsed: Duration) {
        if !self.playing {
            return;
        }
        self.position = (self.position + elapsed).min(self.duration);
        self.pending.push(MediaEvent::TimeUpdate {
            time: self.position,
        });
        if self.position >= self.duration {
            self.playing = false;
            self.pending.push(MediaEvent::Ended);
        }
    }
}

#[cfg(unix)]
mod mpv {
    use std::fs;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;
    use std::path::{Path, PathBuf};
    use std::process::{Child, Command, Stdio};
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::{Context, Result};
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use rand::{distributions::Alphanumeric, Rng};
    use serde_json::{json, Value};
    use tracing::{debug, warn};

    use super::{MediaEvent, MediaResource, PreviewFrame};

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
    const CONNECT_RETRY: Duration = Duration::from_millis(25);

    const OBSERVED: [(u64, &str); 4] = [
        (1, "time-pos"),
        (2, "duration"),
        (3, "pause"),
        (4, "demuxer-cache-time"),
    ];

    pub struct LaunchOptions<'a> {
        pub mpv_path: &'a str,
        pub video_output: &'a str,
        pub extra_args: &'a [String],
        /// Hidden, muted instance used only for scrubber previews.
        pub shadow: bool,
        pub preview_dir: Option<PathBuf>,
    }

    /// One mpv process per mounted card. Commands go through a writer
    /// thread so the caller never waits for the IPC socket to appear.
    pub struct MpvResource {
        child: Child,
        command_tx: Sender<Value>,
        events_rx: Receiver<MediaEvent>,
        ipc_path: String,
        preview_dir: Option<PathBuf>,
        loaded: bool,
    }

    impl MpvResource {
        pub fn spawn(opts: LaunchOptions<'_>) -> Result<Self> {
            let ipc_path = unique_ipc_path();
            if let Err(err) = fs::remove_file(&ipc_path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %ipc_path, error = %err, "failed to remove stale mpv ipc path");
                }
            }

            let mut args = vec![
                "--idle=yes".to_string(),
                "--pause=yes".to_string(),
                "--mute=yes".to_string(),
                "--keep-open=yes".to_string(),
                "--really-quiet".to_string(),
                "--terminal=no".to_string(),
                "--input-terminal=no".to_string(),
                "--no-config".to_string(),
                "--ytdl=no".to_string(),
                "--osc=no".to_string(),
                format!("--input-ipc-server={ipc_path}"),
            ];
            if opts.shadow {
                args.push("--vo=null".to_string());
                args.push("--ao=null".to_string());
                args.push("--force-window=no".to_string());
            } else {
                args.push(format!("--vo={}", opts.video_output));
                args.push("--force-window=no".to_string());
                args.push("--loop-file=inf".to_string());
            }
            args.extend(opts.extra_args.iter().cloned());
            debug!(?args, "spawning mpv");

            let child = Command::new(opts.mpv_path)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("launch {}", opts.mpv_path))?;

            let (command_tx, command_rx) = unbounded::<Value>();
            let (events_tx, events_rx) = unbounded::<MediaEvent>();
            let socket_path = ipc_path.clone();
            thread::spawn(move || run_ipc(&socket_path, command_rx, events_tx));

            let resource = Self {
                child,
                command_tx,
                events_rx,
                ipc_path,
                preview_dir: opts.preview_dir,
                loaded: false,
            };
            for (id, name) in OBSERVED {
                resource.send(json!(["observe_property", id, name]))?;
            }
            Ok(resource)
        }

        fn send(&self, command: Value) -> Result<()> {
            self.command_tx
                .send(json!({ "command": command }))
                .context("mpv ipc writer stopped")
        }
    }

    impl MediaResource for MpvResource {
        fn load(&mut self, url: &str) -> Result<()> {
            self.loaded = true;
            self.send(json!(["loadfile", url, "replace"]))
        }

        fn play(&mut self) -> Result<()> {
            self.send(json!(["set_property", "pause", false]))
        }

        fn pause(&mut self) -> Result<()> {
            self.send(json!(["set_property", "pause", true]))
        }

        fn seek(&mut self, position: Duration) -> Result<()> {
            self.send(json!(["seek", position.as_secs_f64(), "absolute+exact"]))
        }

        fn set_muted(&mut self, muted: bool) -> Result<()> {
            self.send(json!(["set_property", "mute", muted]))
        }

        fn reset(&mut self) -> Result<()> {
            self.send(json!(["seek", 0, "absolute"]))?;
            self.send(json!(["playlist-play-index", "current"]))
        }

        fn clear(&mut self) {
            if self.loaded {
                let _ = self.send(json!(["stop"]));
                self.loaded = false;
            }
        }

        fn preview(&mut self, second: u64) -> Result<PreviewFrame> {
            self.send(json!(["seek", second, "absolute+keyframes"]))?;
            let image = match &self.preview_dir {
                Some(dir) => {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("create preview dir {}", dir.display()))?;
                    let path = dir.join(format!("preview-{second}.jpg"));
                    self.send(json!([
                        "screenshot-to-file",
                        path.to_string_lossy(),
                        "video"
                    ]))?;
                    Some(path)
                }
                None => None,
            };
            Ok(PreviewFrame { second, image })
        }

        fn poll_events(&mut self) -> Vec<MediaEvent> {
            self.events_rx.try_iter().collect()
        }
    }

    impl Drop for MpvResource {
        fn drop(&mut self) {
            let _ = self.send(json!(["quit"]));
            let _ = self.child.kill();
            let _ = self.child.wait();
            cleanup_ipc_path(&self.ipc_path);
        }
    }

    fn run_ipc(path: &str, commands: Receiver<Value>, events: Sender<MediaEvent>) {
        let Some(mut stream) = connect(path) else {
            let _ = events.send(MediaEvent::Error {
                message: format!("mpv ipc socket {path} never appeared"),
            });
            return;
        };
        match stream.try_clone() {
            Ok(reader) => {
                let events = events.clone();
                thread::spawn(move || read_events(reader, events));
            }
            Err(err) => warn!(error = %err, "failed to clone mpv ipc stream"),
        }
        for command in commands.iter() {
            let Ok(serialized) = serde_json::to_string(&command) else {
                continue;
            };
            if let Err(err) = stream
                .write_all(serialized.as_bytes())
                .and_then(|_| stream.write_all(b"\n"))
            {
                debug!(error = %err, "mpv ipc write failed");
                return;
            }
        }
    }

    fn connect(path: &str) -> Option<UnixStream> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(stream) = UnixStream::connect(path) {
                return Some(stream);
            }
            thread::sleep(CONNECT_RETRY);
        }
        None
    }

    fn read_events(stream: UnixStream, events: Sender<MediaEvent>) {
        let reader = BufReader::new(stream);
        for line in reader.lines().map_while(Result::ok) {
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if let Some(event) = translate_event(&message) {
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    }

    /// Maps an mpv IPC message onto a media event.
    pub(super) fn translate_event(message: &Value) -> Option<MediaEvent> {
        let seconds = |value: &Value| value.as_f64().map(|s| Duration::from_secs_f64(s.max(0.0)));
        match message.get("event")?.as_str()? {
            "start-file" => Some(MediaEvent::LoadStart),
            "file-loaded" => Some(MediaEvent::CanPlayThrough),
            "end-file" => match message.get("reason").and_then(Value::as_str) {
                Some("error") => Some(MediaEvent::Error {
                    message: message
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("playback failed")
                        .to_string(),
                }),
                Some("eof") => Some(MediaEvent::Ended),
                _ => None,
            },
            "property-change" => {
                let data = message.get("data")?;
                match message.get("name")?.as_str()? {
                    "time-pos" => seconds(data).map(|time| MediaEvent::TimeUpdate { time }),
                    "duration" => seconds(data).map(|duration| MediaEvent::DataLoaded { duration }),
                    "demuxer-cache-time" => {
                        seconds(data).map(|buffered_end| MediaEvent::Progress { buffered_end })
                    }
                    "pause" => data.as_bool().map(|paused| {
                        if paused {
                            MediaEvent::Paused
                        } else {
                            MediaEvent::Playing
                        }
                    }),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn unique_ipc_path() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        let mut path = std::env::temp_dir();
        path.push(format!("reelfeed-mpv-{}-{suffix}.sock", std::process::id()));
        path.to_string_lossy().to_string()
    }

    fn cleanup_ipc_path(path: &str) {
        if let Err(err) = fs::remove_file(Path::new(path)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path, error = %err, "failed to remove mpv ipc path");
            }
        }
    }
}

#[cfg(unix)]
pub use mpv::LaunchOptions;
