//! Window Playback Controller
//!
//! Drives one [`PlayerSession`] so that a [`Window`] plays from its start and
//! stops at its end. Three watchers can notice the end (the runtime's own
//! `Ended`, the position poller, and on mobile the supervisor); all of them
//! funnel into one latch per window instance, so `on_ended` fires once.
//!
//! Every task a window spawns is owned by the controller's slot and aborted
//! in the same call that changes or tears down the window.

pub mod context;
pub mod mobile;
pub mod monitor;
pub mod retry;
pub mod sequence;
pub mod strategy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout_at, Instant};

pub use context::{EndSource, OnEndedHandler, WindowContext, WindowEnd};
pub use mobile::{assess, MobileRecovery, Verdict};
pub use monitor::{end_check, EndCheck, StallTracker};
pub use retry::Backoff;
pub use sequence::PlayStage;
pub use strategy::{strategy_for, DesktopStrategy, RecoveryStrategy};

use crate::lock;
use crate::platform::{
    DeviceClass, EmbedRuntime, EmbedState, Notifier, PlatformApi, PlayerEvent, PlayerOptions,
};
use crate::probe::CapabilityProbe;
use crate::session::{PlayerSession, SessionEvents};
use crate::{EmbedErrorKind, Error, PlaybackConfig, PlaybackError, PlaybackState, Result, Window};

/// Plays one window at a time in one player container.
pub struct WindowController {
    shared: Arc<Shared>,
}

struct Shared {
    runtime: Arc<dyn EmbedRuntime>,
    probe: CapabilityProbe,
    notifier: Arc<dyn Notifier>,
    config: Arc<PlaybackConfig>,
    strategy: Arc<dyn RecoveryStrategy>,
    state: Arc<watch::Sender<PlaybackState>>,
    on_ended: Arc<Mutex<Option<OnEndedHandler>>>,
    slot: Mutex<Slot>,
    load_lock: tokio::sync::Mutex<()>,
    next_instance: AtomicU64,
}

#[derive(Default)]
struct Slot {
    context: Option<Arc<WindowContext>>,
    session: Option<Arc<PlayerSession>>,
    session_ready: Option<watch::Receiver<bool>>,
    event_task: Option<JoinHandle<()>>,
    play_task: Option<AbortHandle>,
    window_tasks: Vec<JoinHandle<()>>,
}

impl Slot {
    // Cancel everything owned by the current window instance
    fn retire_window(&mut self) {
        if let Some(ctx) = self.context.take() {
            ctx.retire();
            debug!("window {} retired", ctx.instance());
        }
        self.abort_activity();
    }

    fn abort_activity(&mut self) {
        if let Some(task) = self.play_task.take() {
            task.abort();
        }
        for task in self.window_tasks.drain(..) {
            task.abort();
        }
    }

    fn drop_session(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.session_ready = None;
        if let Some(session) = self.session.take() {
            session.destroy();
        }
    }
}

impl WindowController {
    /// Controller for the platform's runtime, device class and notifier.
    pub fn new(platform: &dyn PlatformApi, config: PlaybackConfig) -> Self {
        Self::with_parts(
            platform.capability_probe(),
            platform.notifier(),
            platform.device_class(),
            config,
        )
    }

    pub fn with_parts(
        probe: CapabilityProbe,
        notifier: Arc<dyn Notifier>,
        class: DeviceClass,
        config: PlaybackConfig,
    ) -> Self {
        let strategy = strategy_for(class);
        info!("window controller using {} strategy", strategy.name());
        let (state, _) = watch::channel(PlaybackState::default());
        WindowController {
            shared: Arc::new(Shared {
                runtime: probe.runtime(),
                probe,
                notifier,
                config: Arc::new(config),
                strategy,
                state: Arc::new(state),
                on_ended: Arc::new(Mutex::new(None)),
                slot: Mutex::new(Slot::default()),
                load_lock: tokio::sync::Mutex::new(()),
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.shared.config
    }

    /// Name of the recovery strategy in use
    pub fn strategy_name(&self) -> &'static str {
        self.shared.strategy.name()
    }

    /// Register the end-of-window handler, replacing any previous one
    pub fn on_ended<F>(&self, handler: F)
    where
        F: Fn(&WindowEnd) + Send + Sync + 'static,
    {
        *lock(&self.shared.on_ended) = Some(Arc::new(handler));
    }

    pub fn clear_on_ended(&self) {
        *lock(&self.shared.on_ended) = None;
    }

    /// Current normalized state
    pub fn state(&self) -> PlaybackState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    pub fn window(&self) -> Option<Window> {
        lock(&self.shared.slot)
            .context
            .as_ref()
            .map(|c| c.window().clone())
    }

    /// Instance id of the loaded window
    pub fn instance(&self) -> Option<u64> {
        lock(&self.shared.slot).context.as_ref().map(|c| c.instance())
    }

    /// Position reported by the player right now
    pub fn position(&self) -> Option<f64> {
        let session = lock(&self.shared.slot).session.clone();
        session.and_then(|s| s.current_time())
    }

    /// Make `window` the active window and return its instance id.
    ///
    /// Whatever the previous window had in flight is cancelled first. The
    /// player is reused when the video stays the same and recreated otherwise.
    pub async fn load(&self, window: Window) -> Result<u64> {
        let _serial = self.shared.load_lock.lock().await;
        let reuse = {
            let mut slot = lock(&self.shared.slot);
            slot.retire_window();
            let same_video = slot
                .session
                .as_ref()
                .is_some_and(|s| s.video_id() == window.video_id && !s.is_destroyed());
            if !same_video {
                slot.drop_session();
            }
            match (&slot.session, &slot.session_ready) {
                (Some(s), Some(r)) if same_video => Some((s.clone(), r.clone())),
                _ => None,
            }
        };
        self.shared.state.send_replace(PlaybackState {
            position: window.start,
            ..PlaybackState::default()
        });

        let session = match reuse {
            Some((session, ready)) => {
                debug!("reusing session {} for {}", session.id(), window.video_id);
                session.pause();
                self.wait_ready(ready, Instant::now() + self.shared.config.timing.ready_timeout())
                    .await?;
                session
            }
            None => self.mount(&window).await?,
        };

        let instance = self.shared.next_instance.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(self.shared.context(instance, window, session.clone()));
        {
            let mut slot = lock(&self.shared.slot);
            slot.retire_window();
            slot.context = Some(ctx.clone());
        }
        ctx.update_state(|s| s.ready = true);
        if let Some(kind) = session.fault() {
            ctx.abandon(PlaybackError::Embed(kind));
        }
        info!(
            "window {} loaded: {} {:.2}-{:.2} \"{}\"",
            instance,
            ctx.window().video_id,
            ctx.window().start,
            ctx.window().end,
            ctx.window().display_title
        );
        Ok(instance)
    }

    async fn mount(&self, window: &Window) -> Result<Arc<PlayerSession>> {
        let timing = &self.shared.config.timing;
        let deadline = Instant::now() + timing.ready_timeout();
        timeout_at(deadline, self.shared.probe.ready())
            .await
            .map_err(|_| Error::Timeout(timing.ready_timeout_ms))?;

        let options = PlayerOptions::new(&window.video_id, window.start);
        let (session, events) =
            PlayerSession::create(&*self.shared.runtime, &self.shared.config.container_id, options)?;
        let (ready_tx, ready_rx) = watch::channel(false);
        let pump = tokio::spawn(pump_events(
            Arc::downgrade(&self.shared),
            session.clone(),
            events,
            ready_tx,
        ));
        {
            let mut slot = lock(&self.shared.slot);
            slot.session = Some(session.clone());
            slot.session_ready = Some(ready_rx.clone());
            slot.event_task = Some(pump);
        }

        if let Err(e) = self.wait_ready(ready_rx, deadline).await {
            warn!("player for {} never became ready: {}", window.video_id, e);
            lock(&self.shared.slot).drop_session();
            return Err(e);
        }
        Ok(session)
    }

    async fn wait_ready(&self, mut ready: watch::Receiver<bool>, deadline: Instant) -> Result<()> {
        match timeout_at(deadline, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => Err(Error::Timeout(self.shared.config.timing.ready_timeout_ms)),
        }
    }

    /// Play the loaded window and wait until playback is confirmed, has
    /// failed for good, or was superseded.
    pub async fn play(&self) -> Result<()> {
        let handle = self.spawn_play()?;
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => Err(Error::Other(format!("play task failed: {}", e))),
        }
    }

    /// Start playing without waiting for the outcome.
    pub fn request_play(&self) -> Result<()> {
        self.spawn_play().map(|_| ())
    }

    fn spawn_play(&self) -> Result<JoinHandle<Result<()>>> {
        let mut slot = lock(&self.shared.slot);
        let mut ctx = slot
            .context
            .clone()
            .ok_or_else(|| Error::InvalidState("no window loaded".to_string()))?;
        if let Some(kind) = ctx.session().fault() {
            return Err(Error::Embed(kind));
        }
        if ctx.intent_playing() && !slot.window_tasks.is_empty() {
            return Ok(tokio::spawn(async { Ok(()) }));
        }
        if ctx.is_ended() {
            // a finished window plays again as a fresh instance with a fresh latch
            let instance = self.shared.next_instance.fetch_add(1, Ordering::Relaxed);
            let fresh = Arc::new(self.shared.context(
                instance,
                ctx.window().clone(),
                ctx.session().clone(),
            ));
            slot.retire_window();
            slot.context = Some(fresh.clone());
            fresh.update_state(|s| s.ready = true);
            debug!("window {} re-armed as {}", ctx.instance(), instance);
            ctx = fresh;
        }
        slot.abort_activity();
        ctx.set_intent(true);

        let shared = Arc::downgrade(&self.shared);
        let strategy = self.shared.strategy.clone();
        let task = tokio::spawn(async move {
            let result = strategy.play(&ctx).await;
            if result.is_ok() {
                if let Some(shared) = shared.upgrade() {
                    shared.start_monitoring(&ctx);
                }
            }
            result
        });
        slot.play_task = Some(task.abort_handle());
        Ok(task)
    }

    /// Pause, remembering where to pick up. Safe in any state.
    pub fn pause(&self) {
        let mut slot = lock(&self.shared.slot);
        slot.abort_activity();
        if let Some(ctx) = &slot.context {
            if !ctx.is_ended() {
                self.shared.strategy.pause(ctx);
            }
            ctx.set_intent(false);
        }
    }

    /// Pause, rewind to the window start and cancel every watcher.
    pub fn stop(&self) {
        let mut slot = lock(&self.shared.slot);
        slot.abort_activity();
        if let Some(ctx) = &slot.context {
            ctx.set_intent(false);
            self.shared.strategy.stop(ctx);
        }
    }

    /// Run one recovery attempt on the active window
    pub async fn recover(&self, forced: bool) {
        let ctx = lock(&self.shared.slot).context.clone();
        if let Some(ctx) = ctx {
            self.shared.strategy.recover(&ctx, forced).await;
        }
    }

    /// Tear down the window and the player. Safe to call more than once.
    pub fn destroy(&self) {
        let mut slot = lock(&self.shared.slot);
        let had_session = slot.session.is_some();
        slot.retire_window();
        slot.drop_session();
        if had_session {
            debug!("window controller destroyed");
        }
    }
}

impl Drop for WindowController {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl Shared {
    fn context(&self, instance: u64, window: Window, session: Arc<PlayerSession>) -> WindowContext {
        WindowContext::new(
            instance,
            window,
            session,
            self.config.clone(),
            self.notifier.clone(),
            self.state.clone(),
            self.on_ended.clone(),
        )
    }

    // Spawn the watchers of a window that just started playing
    fn start_monitoring(&self, ctx: &Arc<WindowContext>) {
        let mut slot = lock(&self.slot);
        let current = slot.context.as_ref().is_some_and(|c| Arc::ptr_eq(c, ctx));
        if !current || ctx.is_finished() {
            return;
        }
        for task in slot.window_tasks.drain(..) {
            task.abort();
        }
        slot.window_tasks.push(tokio::spawn(monitor::watch_window(
            ctx.clone(),
            self.strategy.clone(),
        )));
        if let Some(supervisor) = self.strategy.clone().supervise(ctx.clone()) {
            slot.window_tasks.push(tokio::spawn(supervisor));
        }
        debug!(
            "window {}: {} watcher(s) running",
            ctx.instance(),
            slot.window_tasks.len()
        );
    }

    fn context_for(&self, session_id: u64) -> Option<Arc<WindowContext>> {
        lock(&self.slot)
            .context
            .clone()
            .filter(|c| c.session().id() == session_id)
    }

    fn on_embed_error(&self, session: &PlayerSession, code: i32) {
        let kind = EmbedErrorKind::from_code(code);
        let ctx = self.context_for(session.id());
        if kind.is_transient() {
            warn!(
                "session {} reported error {} ({}), leaving it to recovery",
                session.id(),
                code,
                kind
            );
            return;
        }
        warn!(
            "session {} reported error {} ({}), not retrying",
            session.id(),
            code,
            kind
        );
        if session.record_fault(kind) {
            self.notifier.error(kind.user_message());
        }
        if let Some(ctx) = ctx {
            session.pause();
            ctx.abandon(PlaybackError::Embed(kind));
        }
    }
}

async fn pump_events(
    shared: Weak<Shared>,
    session: Arc<PlayerSession>,
    mut events: SessionEvents,
    ready: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            PlayerEvent::Ready => {
                debug!("session {} ready", session.id());
                ready.send_replace(true);
            }
            PlayerEvent::StateChanged(state) => {
                debug!("session {} state {:?}", session.id(), state);
                if let Some(ctx) = shared.context_for(session.id()) {
                    ctx.observe(None, Some(state));
                    if state == EmbedState::Ended {
                        ctx.report_end(EndSource::Native);
                    }
                }
            }
            PlayerEvent::Error(code) => {
                shared.on_embed_error(&session, code);
                // an error before ready still has to unblock the loader
                ready.send_replace(true);
            }
        }
    }
}
