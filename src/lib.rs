//! Snipsync Playback Engine
//!
//! Plays clipped segments ("snippets") of embedded videos back to back as if
//! they were one continuous mix. Each segment lives inside an independently
//! loaded third-party embed that only exposes a coarse polling API, so the
//! engine drives it through a bounded, auto-advancing, auto-recovering
//! sequence of start/stop windows.
//!
//! # Features
//!
//! - **Window playback**: seek, settle, play, verify; redundant end-of-window
//!   watchers behind a one-shot latch
//! - **Mobile recovery**: a stricter supervisor and retry cadence for touch
//!   devices, selected once at construction time
//! - **Sniplist sequencing**: debounced advancing, a backup timer, manual
//!   navigation, completion
//! - **Pluggable surfaces**: the embed runtime, device class, network status
//!   and notifications are traits under [`platform`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use snipsync::data::{MemoryStore, SnippetRecord};
//! use snipsync::platform::SimulatedPlatform;
//!
//! # async fn run() -> snipsync::Result<()> {
//! let store = MemoryStore::new();
//! store.insert("mix", vec![
//!     SnippetRecord::new("s1", "v1", 0.0, 20.0, 0),
//!     SnippetRecord::new("s2", "v2", 5.0, 25.0, 1),
//! ]);
//!
//! let platform = SimulatedPlatform::new();
//! let player = snipsync::new_player(&platform, Arc::new(store))?;
//! player.start("mix").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{EmbedErrorKind, Error, Result};

// Capability surfaces the core drives (embed runtime, device, network, toasts)
pub mod platform;

// One-time readiness of the embed runtime, shared by every consumer
pub mod probe;

// Defensive wrapper around one embed player instance
pub mod session;

// Window playback controller and its recovery strategies
pub mod playback;

// Sniplist sequencing (advance, backup timer, completion)
pub mod playlist;

// Speculative warm-up of the next window (desktop only)
pub mod preload;

// Data-access and metadata collaborators
pub mod data;

pub use platform::device::DeviceClass;
pub use playback::{EndSource, WindowController, WindowEnd};
pub use playlist::{PlaylistController, PlaylistPhase};
pub use probe::CapabilityProbe;
pub use session::PlayerSession;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One clipped segment of a video: the unit the engine plays.
///
/// Windows are immutable once playback begins. Construct them with
/// [`Window::new`], which enforces `0 <= start < end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WindowFields")]
pub struct Window {
    /// Provider video id
    pub video_id: String,
    /// Window start in seconds
    pub start: f64,
    /// Window end in seconds
    pub end: f64,
    /// Human readable title shown while the window plays
    pub display_title: String,
}

impl Window {
    /// Create a validated window. An empty title falls back to
    /// [`fallback_title`].
    pub fn new(video_id: &str, start: f64, end: f64, display_title: &str) -> Result<Self> {
        if video_id.trim().is_empty() {
            return Err(Error::InvalidWindow("empty video id".to_string()));
        }
        if !start.is_finite() || !end.is_finite() {
            return Err(Error::InvalidWindow(format!(
                "non-finite bounds {}..{}",
                start, end
            )));
        }
        if start < 0.0 {
            return Err(Error::InvalidWindow(format!("negative start {}", start)));
        }
        if end <= start {
            return Err(Error::InvalidWindow(format!(
                "end {} is not after start {}",
                end, start
            )));
        }
        let display_title = if display_title.trim().is_empty() {
            fallback_title(video_id, start)
        } else {
            display_title.to_string()
        };
        Ok(Self {
            video_id: video_id.to_string(),
            start,
            end,
            display_title,
        })
    }

    /// Window length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Window length as a timer delay; zero for a window built by hand with `end <= start`
    pub fn length(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration()).unwrap_or(Duration::ZERO)
    }

    /// Whether two windows describe the same (video, start, end) tuple
    pub fn same_tuple(&self, other: &Window) -> bool {
        self.video_id == other.video_id && self.start == other.start && self.end == other.end
    }
}

// Deserialized windows go through `Window::new` like every other window
#[derive(Deserialize)]
struct WindowFields {
    video_id: String,
    start: f64,
    end: f64,
    #[serde(default)]
    display_title: String,
}

impl TryFrom<WindowFields> for Window {
    type Error = Error;

    fn try_from(f: WindowFields) -> Result<Self> {
        Window::new(&f.video_id, f.start, f.end, &f.display_title)
    }
}

/// Title used when neither the snippet nor the metadata lookup provides one,
/// e.g. `dQw4w9WgXcQ @ 1:05`.
pub fn fallback_title(video_id: &str, start: f64) -> String {
    let total = start.max(0.0).floor() as u64;
    format!("{} @ {}:{:02}", video_id, total / 60, total % 60)
}

/// Why a window stopped being playable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackError {
    /// The embed runtime reported an error
    Embed(EmbedErrorKind),
    /// Every play attempt failed
    RetriesExhausted { attempts: u32 },
    /// Recovery from a stall was attempted too many times
    Stalled,
}

/// Normalized state of the active window, read-only to the UI.
///
/// `is_playing` is the intent, `is_actually_playing` what the embed last
/// reported. The two diverge while the controller works on closing the gap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_buffering: bool,
    pub is_actually_playing: bool,
    pub ready: bool,
    pub error: Option<PlaybackError>,
    /// Last observed position in seconds
    pub position: f64,
}

/// Retry schedule for failed play attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt
    pub factor: f64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            factor: 2.0,
            max_delay_ms: 3000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `failed`-th failed attempt (1-based).
    pub fn delay_for(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(64) as i32;
        let ms = (self.base_delay_ms as f64) * self.factor.powi(exp);
        let capped = ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}

/// Stage delays and polling cadence for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between seek and play; play right after a seek is dropped by some runtimes
    pub settle_delay_ms: u64,
    /// Wait after play before checking that playback actually started
    pub verify_delay_ms: u64,
    /// End-of-window and stall polling interval
    pub poll_interval_ms: u64,
    /// Tolerance when comparing the current time to the window end
    pub end_epsilon_secs: f64,
    /// Upper bound for runtime readiness plus player creation
    pub ready_timeout_ms: u64,
    /// Consecutive non-playing polls (while intending to play) that count as a stall
    pub stall_ticks: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 150,
            verify_delay_ms: 600,
            poll_interval_ms: 100,
            end_epsilon_secs: 0.15,
            ready_timeout_ms: 15000,
            stall_ticks: 2,
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Stall recovery parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Interval of the mobile supervisor loop
    pub monitor_interval_ms: u64,
    /// Time after a play request before a position still at the start counts as stuck
    pub stuck_after_ms: u64,
    /// Distance from the window start that still counts as "at the start"
    pub stuck_window_secs: f64,
    /// Distance from the window start beyond which recovery re-seeks
    pub far_seek_secs: f64,
    /// Pause between the recovery seek and the recovery play
    pub reseek_delay_ms: u64,
    /// Sustained buffering while intending to play counts as a stall after this long
    pub buffering_grace_ms: u64,
    /// Recovery attempts per window before giving up
    pub max_recoveries: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 250,
            stuck_after_ms: 3000,
            stuck_window_secs: 0.5,
            far_seek_secs: 5.0,
            reseek_delay_ms: 200,
            buffering_grace_ms: 1000,
            max_recoveries: 3,
        }
    }
}

impl RecoveryConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_millis(self.stuck_after_ms)
    }

    pub fn reseek_delay(&self) -> Duration {
        Duration::from_millis(self.reseek_delay_ms)
    }

    pub fn buffering_grace(&self) -> Duration {
        Duration::from_millis(self.buffering_grace_ms)
    }
}

/// Sniplist sequencing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    /// End signals for the same index within this span are duplicates
    pub debounce_ms: u64,
    /// Slack added to the window duration before the backup timer forces an advance
    pub backup_buffer_ms: u64,
    /// Whether the next window is warmed in a second, muted player
    pub preload_enabled: bool,
    /// How long before the current window ends the next one is warmed
    pub preload_lead_ms: u64,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            backup_buffer_ms: 1500,
            preload_enabled: true,
            preload_lead_ms: 5000,
        }
    }
}

impl PlaylistConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn backup_buffer(&self) -> Duration {
        Duration::from_millis(self.backup_buffer_ms)
    }

    pub fn preload_lead(&self) -> Duration {
        Duration::from_millis(self.preload_lead_ms)
    }
}

/// Configuration for the playback engine
///
/// The defaults are the desktop preset; use [`PlaybackConfig::for_device`]
/// to get the mobile one. Every field has a default, so a partial JSON file
/// deserializes into a complete configuration.
///
/// # Examples
///
/// ```
/// let cfg = snipsync::PlaybackConfig::default();
/// assert_eq!(cfg.retry.max_attempts, 3);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Container id the main player is mounted into
    pub container_id: String,
    /// Container id for the muted preload player
    pub preload_container_id: String,
    pub retry: RetryPolicy,
    pub timing: TimingConfig,
    pub recovery: RecoveryConfig,
    pub playlist: PlaylistConfig,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            container_id: "snipsync-player".to_string(),
            preload_container_id: "snipsync-preload".to_string(),
            retry: RetryPolicy::default(),
            timing: TimingConfig::default(),
            recovery: RecoveryConfig::default(),
            playlist: PlaylistConfig::default(),
        }
    }
}

impl PlaybackConfig {
    /// Preset tuned for the given device class.
    pub fn for_device(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Desktop => Self::default(),
            DeviceClass::Mobile => Self {
                retry: RetryPolicy {
                    max_attempts: 8,
                    base_delay_ms: 200,
                    factor: 1.5,
                    max_delay_ms: 8000,
                },
                timing: TimingConfig {
                    settle_delay_ms: 300,
                    verify_delay_ms: 800,
                    poll_interval_ms: 250,
                    end_epsilon_secs: 0.2,
                    ..TimingConfig::default()
                },
                recovery: RecoveryConfig {
                    max_recoveries: 5,
                    buffering_grace_ms: 3000,
                    ..RecoveryConfig::default()
                },
                playlist: PlaylistConfig {
                    backup_buffer_ms: 3000,
                    preload_enabled: false,
                    ..PlaylistConfig::default()
                },
                ..Self::default()
            },
        }
    }

    /// Load a (possibly partial) configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: PlaybackConfig =
            serde_json::from_str(text).map_err(|e| Error::ConfigError(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the engine spin or never retry.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::ConfigError("retry.max_attempts must be at least 1".into()));
        }
        if !(self.retry.factor >= 1.0) {
            return Err(Error::ConfigError("retry.factor must be >= 1".into()));
        }
        if self.timing.poll_interval_ms == 0 || self.recovery.monitor_interval_ms == 0 {
            return Err(Error::ConfigError("polling intervals must be non-zero".into()));
        }
        if !(self.timing.end_epsilon_secs >= 0.0) || self.timing.end_epsilon_secs > 1.0 {
            return Err(Error::ConfigError(
                "timing.end_epsilon_secs must be within 0..=1".into(),
            ));
        }
        if self.timing.stall_ticks == 0 {
            return Err(Error::ConfigError("timing.stall_ticks must be at least 1".into()));
        }
        if self.recovery.buffering_grace_ms < self.timing.poll_interval_ms {
            return Err(Error::ConfigError(
                "recovery.buffering_grace_ms must cover at least one poll".into(),
            ));
        }
        if self.container_id == self.preload_container_id {
            return Err(Error::ConfigError(
                "main and preload players need distinct containers".into(),
            ));
        }
        Ok(())
    }
}

/// Create a sniplist player wired to the given platform.
///
/// The configuration preset follows the platform's device class.
pub fn new_player(
    platform: &dyn platform::PlatformApi,
    store: std::sync::Arc<dyn data::SnippetStore>,
) -> Result<PlaylistController> {
    let config = PlaybackConfig::for_device(platform.device_class());
    PlaylistController::new(platform, store, config)
}
