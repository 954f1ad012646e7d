//! Embed runtime capability surface, plus a deterministic simulated runtime
//! whose clock is `tokio::time` (pause the clock in tests to drive it).
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::lock;

/// Player state as reported by the embed runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbedState {
    Unstarted,
    Buffering,
    Playing,
    Paused,
    Ended,
}

impl EmbedState {
    /// Map the provider's numeric state. "Cued" (5) behaves like paused.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => EmbedState::Ended,
            1 => EmbedState::Playing,
            2 | 5 => EmbedState::Paused,
            3 => EmbedState::Buffering,
            _ => EmbedState::Unstarted,
        }
    }

    /// Playing, or on its way there
    pub fn is_progressing(&self) -> bool {
        matches!(self, EmbedState::Playing | EmbedState::Buffering)
    }
}

/// Lifecycle events delivered by a player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Ready,
    StateChanged(EmbedState),
    Error(i32),
}

/// Where a player delivers its events
pub type PlayerEventSink = mpsc::UnboundedSender<PlayerEvent>;

/// A call into the runtime threw
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("embed call failed: {0}")]
pub struct EmbedCallError(pub String);

/// Parameters for creating a player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    pub video_id: String,
    pub start_seconds: f64,
    /// Runtime-side end of playback; reaching it makes the runtime report `Ended`
    pub end_seconds: Option<f64>,
    pub autoplay: bool,
    pub muted: bool,
}

impl PlayerOptions {
    pub fn new(video_id: &str, start_seconds: f64) -> Self {
        Self {
            video_id: video_id.to_string(),
            start_seconds,
            end_seconds: None,
            autoplay: false,
            muted: false,
        }
    }
}

/// One embed player instance. Every call may throw.
pub trait EmbedPlayer: Send + Sync {
    fn play(&self) -> Result<(), EmbedCallError>;
    fn pause(&self) -> Result<(), EmbedCallError>;
    fn seek(&self, seconds: f64) -> Result<(), EmbedCallError>;
    fn mute(&self) -> Result<(), EmbedCallError>;
    fn current_time(&self) -> Result<f64, EmbedCallError>;
    fn state(&self) -> Result<EmbedState, EmbedCallError>;
    fn destroy(&self) -> Result<(), EmbedCallError>;
}

/// The page-global embed runtime
pub trait EmbedRuntime: Send + Sync {
    /// Start loading the runtime script. Calling it again is harmless.
    fn inject(&self);

    /// Whether the global runtime object is callable yet
    fn is_callable(&self) -> bool;

    /// Mount a player into `container`. Events arrive on `events`.
    fn create_player(
        &self,
        container: &str,
        options: PlayerOptions,
        events: PlayerEventSink,
    ) -> Result<Box<dyn EmbedPlayer>, EmbedCallError>;
}

/// Knobs for the simulated runtime. Counters are consumed as calls happen.
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// Time between `inject` and the runtime becoming callable
    pub load_delay: Duration,
    /// The runtime script never loads
    pub never_loads: bool,
    /// Time between player creation and `Ready`
    pub ready_delay: Duration,
    /// Length of every simulated video in seconds
    pub video_duration: f64,
    /// The next N `play` calls throw
    pub fail_plays: u32,
    /// The next N `play` calls are silently dropped
    pub ignore_plays: u32,
    /// `play` within this long of a `seek` is silently dropped
    pub ignore_play_after_seek: Duration,
    /// The next N effective plays report `Playing` while the clock stays frozen (until a seek)
    pub stuck_plays: u32,
    /// The next N `seek` calls throw
    pub fail_seeks: u32,
    /// Time spent in `Buffering` before `Playing`
    pub buffering: Duration,
    /// Error code reported right after `Ready`, per video id
    pub error_codes: HashMap<String, i32>,
    /// Honor `end_seconds` by reporting `Ended` when it is reached
    pub native_end: bool,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            load_delay: Duration::from_millis(50),
            never_loads: false,
            ready_delay: Duration::from_millis(100),
            video_duration: 600.0,
            fail_plays: 0,
            ignore_plays: 0,
            ignore_play_after_seek: Duration::ZERO,
            stuck_plays: 0,
            fail_seeks: 0,
            buffering: Duration::ZERO,
            error_codes: HashMap::new(),
            native_end: true,
        }
    }
}

/// A call observed by a simulated player, for assertions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmbedCall {
    Play,
    Pause,
    Seek(f64),
    Mute,
    Destroy,
}

/// In-process embed runtime backed by `tokio::time`
#[derive(Clone)]
pub struct SimulatedRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    behavior: Arc<Mutex<SimBehavior>>,
    injected_at: Mutex<Option<Instant>>,
    inject_calls: Mutex<u32>,
    players: Mutex<Vec<Arc<SimPlayerShared>>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::with_behavior(SimBehavior::default())
    }

    pub fn with_behavior(behavior: SimBehavior) -> Self {
        SimulatedRuntime {
            inner: Arc::new(RuntimeInner {
                behavior: Arc::new(Mutex::new(behavior)),
                injected_at: Mutex::new(None),
                inject_calls: Mutex::new(0),
                players: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Adjust the behavior knobs; affects existing players too.
    pub fn update<F: FnOnce(&mut SimBehavior)>(&self, f: F) {
        f(&mut lock(&self.inner.behavior));
    }

    /// How many times the runtime script was injected
    pub fn inject_calls(&self) -> u32 {
        *lock(&self.inner.inject_calls)
    }

    /// Every player created so far, oldest first
    pub fn players(&self) -> Vec<SimulatedPlayerHandle> {
        lock(&self.inner.players)
            .iter()
            .map(|p| SimulatedPlayerHandle { shared: p.clone() })
            .collect()
    }

    /// Players mounted into `container`, oldest first
    pub fn players_in(&self, container: &str) -> Vec<SimulatedPlayerHandle> {
        self.players()
            .into_iter()
            .filter(|p| p.container() == container)
            .collect()
    }

    /// The most recent player for `video_id` in any container
    pub fn latest_player(&self, video_id: &str) -> Option<SimulatedPlayerHandle> {
        self.players()
            .into_iter()
            .rev()
            .find(|p| p.video_id() == video_id)
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbedRuntime for SimulatedRuntime {
    fn inject(&self) {
        *lock(&self.inner.inject_calls) += 1;
        let mut at = lock(&self.inner.injected_at);
        if at.is_none() {
            *at = Some(Instant::now());
        }
    }

    fn is_callable(&self) -> bool {
        let behavior = lock(&self.inner.behavior);
        if behavior.never_loads {
            return false;
        }
        match *lock(&self.inner.injected_at) {
            Some(at) => at.elapsed() >= behavior.load_delay,
            None => false,
        }
    }

    fn create_player(
        &self,
        container: &str,
        options: PlayerOptions,
        events: PlayerEventSink,
    ) -> Result<Box<dyn EmbedPlayer>, EmbedCallError> {
        if !self.is_callable() {
            return Err(EmbedCallError("runtime is not loaded".to_string()));
        }
        let (ready_delay, duration, error_code) = {
            let b = lock(&self.inner.behavior);
            (
                b.ready_delay,
                b.video_duration,
                b.error_codes.get(&options.video_id).copied(),
            )
        };
        let id = lock(&self.inner.players).len() as u64 + 1;
        let shared = Arc::new(SimPlayerShared {
            id,
            container: container.to_string(),
            video_id: options.video_id.clone(),
            behavior: self.inner.behavior.clone(),
            events,
            calls: Mutex::new(Vec::new()),
            inner: Mutex::new(SimPlayerInner {
                state: EmbedState::Unstarted,
                base: options.start_seconds.clamp(0.0, duration),
                playing_since: None,
                frozen: false,
                last_seek: None,
                end_seconds: options.end_seconds,
                duration,
                muted: options.muted,
                destroyed: false,
                timers: Vec::new(),
                ready_task: None,
            }),
        });

        let player = shared.clone();
        let autoplay = options.autoplay;
        let ready = tokio::spawn(async move {
            tokio::time::sleep(ready_delay).await;
            player.emit(PlayerEvent::Ready);
            if let Some(code) = error_code {
                player.emit(PlayerEvent::Error(code));
            } else if autoplay {
                let _ = player.do_play();
            }
        });
        lock(&shared.inner).ready_task = Some(ready);
        lock(&self.inner.players).push(shared.clone());
        Ok(Box::new(SimulatedPlayer { shared }))
    }
}

struct SimPlayerShared {
    id: u64,
    container: String,
    video_id: String,
    behavior: Arc<Mutex<SimBehavior>>,
    events: PlayerEventSink,
    calls: Mutex<Vec<EmbedCall>>,
    inner: Mutex<SimPlayerInner>,
}

struct SimPlayerInner {
    state: EmbedState,
    base: f64,
    playing_since: Option<Instant>,
    frozen: bool,
    last_seek: Option<Instant>,
    end_seconds: Option<f64>,
    duration: f64,
    muted: bool,
    destroyed: bool,
    timers: Vec<JoinHandle<()>>,
    ready_task: Option<JoinHandle<()>>,
}

impl SimPlayerInner {
    // Where playback stops on its own: the configured end while before it, else the video end
    fn limit(&self, native_end: bool) -> f64 {
        match self.end_seconds {
            Some(end) if native_end && self.base < end => end.min(self.duration),
            _ => self.duration,
        }
    }

    fn position(&self, native_end: bool) -> f64 {
        match self.playing_since {
            Some(since) if !self.frozen => {
                (self.base + since.elapsed().as_secs_f64()).min(self.limit(native_end))
            }
            _ => self.base,
        }
    }

    fn settle(&mut self, native_end: bool) {
        self.base = self.position(native_end);
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn cancel_timers(&mut self) {
        for t in self.timers.drain(..) {
            t.abort();
        }
    }
}

impl SimPlayerShared {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: EmbedCall) {
        lock(&self.calls).push(call);
    }

    fn native_end(&self) -> bool {
        lock(&self.behavior).native_end
    }

    fn do_play(self: &Arc<Self>) -> Result<(), EmbedCallError> {
        let native_end = self.native_end();
        let (buffering, stuck) = {
            let mut b = lock(&self.behavior);
            if b.fail_plays > 0 {
                b.fail_plays -= 1;
                return Err(EmbedCallError("playVideo threw".to_string()));
            }
            if b.ignore_plays > 0 {
                b.ignore_plays -= 1;
                return Ok(());
            }
            let mut inner = lock(&self.inner);
            if let Some(at) = inner.last_seek {
                if at.elapsed() < b.ignore_play_after_seek {
                    return Ok(());
                }
            }
            if inner.state.is_progressing() {
                return Ok(());
            }
            if inner.state == EmbedState::Ended {
                inner.base = 0.0;
            }
            let stuck = b.stuck_plays > 0;
            if stuck {
                b.stuck_plays -= 1;
            }
            inner.frozen = stuck;
            (b.buffering, stuck)
        };

        if buffering > Duration::ZERO {
            {
                let mut inner = lock(&self.inner);
                inner.cancel_timers();
                inner.state = EmbedState::Buffering;
            }
            self.emit(PlayerEvent::StateChanged(EmbedState::Buffering));
            let me = self.clone();
            let t = tokio::spawn(async move {
                tokio::time::sleep(buffering).await;
                me.start_playing(native_end, stuck);
            });
            lock(&self.inner).timers.push(t);
        } else {
            self.start_playing(native_end, stuck);
        }
        Ok(())
    }

    fn start_playing(self: &Arc<Self>, native_end: bool, frozen: bool) {
        {
            let mut inner = lock(&self.inner);
            if inner.destroyed {
                return;
            }
            inner.cancel_timers();
            inner.state = EmbedState::Playing;
            inner.frozen = frozen;
            inner.playing_since = Some(Instant::now());
        }
        self.emit(PlayerEvent::StateChanged(EmbedState::Playing));
        self.schedule_end(native_end);
    }

    fn schedule_end(self: &Arc<Self>, native_end: bool) {
        let mut inner = lock(&self.inner);
        if inner.frozen || inner.playing_since.is_none() {
            return;
        }
        let remaining = (inner.limit(native_end) - inner.base).max(0.0);
        let me = self.clone();
        let t = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
            {
                let mut inner = lock(&me.inner);
                if inner.destroyed || inner.playing_since.is_none() {
                    return;
                }
                inner.base = inner.limit(native_end);
                inner.playing_since = None;
                inner.state = EmbedState::Ended;
            }
            me.emit(PlayerEvent::StateChanged(EmbedState::Ended));
        });
        inner.timers.push(t);
    }
}

/// The boxed player handed to the engine
struct SimulatedPlayer {
    shared: Arc<SimPlayerShared>,
}

impl SimulatedPlayer {
    fn check_alive(&self) -> Result<(), EmbedCallError> {
        if lock(&self.shared.inner).destroyed {
            return Err(EmbedCallError("player was destroyed".to_string()));
        }
        Ok(())
    }
}

impl EmbedPlayer for SimulatedPlayer {
    fn play(&self) -> Result<(), EmbedCallError> {
        self.shared.record(EmbedCall::Play);
        self.check_alive()?;
        self.shared.do_play()
    }

    fn pause(&self) -> Result<(), EmbedCallError> {
        self.shared.record(EmbedCall::Pause);
        self.check_alive()?;
        let native_end = self.shared.native_end();
        let changed = {
            let mut inner = lock(&self.shared.inner);
            inner.settle(native_end);
            inner.playing_since = None;
            inner.cancel_timers();
            let changed = inner.state != EmbedState::Paused;
            inner.state = EmbedState::Paused;
            changed
        };
        if changed {
            self.shared.emit(PlayerEvent::StateChanged(EmbedState::Paused));
        }
        Ok(())
    }

    fn seek(&self, seconds: f64) -> Result<(), EmbedCallError> {
        self.shared.record(EmbedCall::Seek(seconds));
        self.check_alive()?;
        {
            let mut b = lock(&self.shared.behavior);
            if b.fail_seeks > 0 {
                b.fail_seeks -= 1;
                return Err(EmbedCallError("seekTo threw".to_string()));
            }
        }
        let native_end = self.shared.native_end();
        let (was_ended, was_buffering) = {
            let mut inner = lock(&self.shared.inner);
            inner.cancel_timers();
            inner.base = seconds.clamp(0.0, inner.duration);
            inner.frozen = false;
            inner.last_seek = Some(Instant::now());
            let was_ended = inner.state == EmbedState::Ended;
            if was_ended {
                inner.state = EmbedState::Paused;
            }
            if inner.state == EmbedState::Playing {
                inner.playing_since = Some(Instant::now());
            }
            (was_ended, inner.state == EmbedState::Buffering)
        };
        if was_ended {
            self.shared.emit(PlayerEvent::StateChanged(EmbedState::Paused));
        }
        if was_buffering {
            // the pending buffer timer was cancelled; finish buffering at the new spot
            self.shared.start_playing(native_end, false);
        } else {
            self.shared.schedule_end(native_end);
        }
        Ok(())
    }

    fn mute(&self) -> Result<(), EmbedCallError> {
        self.shared.record(EmbedCall::Mute);
        self.check_alive()?;
        lock(&self.shared.inner).muted = true;
        Ok(())
    }

    fn current_time(&self) -> Result<f64, EmbedCallError> {
        self.check_alive()?;
        let native_end = self.shared.native_end();
        Ok(lock(&self.shared.inner).position(native_end))
    }

    fn state(&self) -> Result<EmbedState, EmbedCallError> {
        self.check_alive()?;
        Ok(lock(&self.shared.inner).state)
    }

    fn destroy(&self) -> Result<(), EmbedCallError> {
        self.shared.record(EmbedCall::Destroy);
        let mut inner = lock(&self.shared.inner);
        if inner.destroyed {
            return Err(EmbedCallError("player was already destroyed".to_string()));
        }
        inner.destroyed = true;
        inner.playing_since = None;
        inner.cancel_timers();
        if let Some(ready) = inner.ready_task.take() {
            ready.abort();
        }
        Ok(())
    }
}

/// Read-only view of a simulated player, for tests and the CLI
#[derive(Clone)]
pub struct SimulatedPlayerHandle {
    shared: Arc<SimPlayerShared>,
}

impl SimulatedPlayerHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn container(&self) -> &str {
        &self.shared.container
    }

    pub fn video_id(&self) -> &str {
        &self.shared.video_id
    }

    pub fn calls(&self) -> Vec<EmbedCall> {
        lock(&self.shared.calls).clone()
    }

    /// Seek targets in call order
    pub fn seeks(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EmbedCall::Seek(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn play_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == EmbedCall::Play).count()
    }

    pub fn state(&self) -> EmbedState {
        lock(&self.shared.inner).state
    }

    pub fn position(&self) -> f64 {
        let native_end = self.shared.native_end();
        lock(&self.shared.inner).position(native_end)
    }

    pub fn is_muted(&self) -> bool {
        lock(&self.shared.inner).muted
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.shared.inner).destroyed
    }

    /// Pause on the provider's side (ad break, lost audio focus) without a
    /// call from the engine.
    pub fn interrupt(&self) {
        let native_end = self.shared.native_end();
        {
            let mut inner = lock(&self.shared.inner);
            if inner.destroyed {
                return;
            }
            inner.settle(native_end);
            inner.playing_since = None;
            inner.cancel_timers();
            inner.state = EmbedState::Paused;
        }
        self.shared.emit(PlayerEvent::StateChanged(EmbedState::Paused));
    }
}
