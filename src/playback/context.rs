//! Per-window-instance state shared by the controller, its watchers and the
//! recovery strategy.
//!
//! A fresh [`WindowContext`] is built every time a window is loaded, so the
//! one-shot end latch, the recovery counter and the failure notification flag
//! all reset exactly when the window changes. Teardown marks the context
//! retired; a retired context ignores every further report.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::lock;
use crate::platform::{EmbedState, Notifier};
use crate::session::PlayerSession;
use crate::{PlaybackConfig, PlaybackError, PlaybackState, Window};

/// Which watcher noticed the end of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndSource {
    /// The runtime's own `Ended` state change
    Native,
    /// The controller's position poll
    Polling,
    /// The mobile supervisor loop
    Supervisor,
}

/// Reported once per window instance
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEnd {
    /// Instance id returned by `WindowController::load`
    pub instance: u64,
    pub window: Window,
    pub source: EndSource,
    /// Position at which playback was stopped, when the runtime answered
    pub position: Option<f64>,
}

pub type OnEndedHandler = Arc<dyn Fn(&WindowEnd) + Send + Sync>;

pub struct WindowContext {
    instance: u64,
    window: Window,
    session: Arc<PlayerSession>,
    config: Arc<PlaybackConfig>,
    notifier: Arc<dyn Notifier>,
    state: Arc<watch::Sender<PlaybackState>>,
    on_ended: Arc<Mutex<Option<OnEndedHandler>>>,
    intent: AtomicBool,
    ended: AtomicBool,
    retired: AtomicBool,
    failure_notified: AtomicBool,
    recovering: AtomicBool,
    recoveries: AtomicU32,
    play_requested_at: Mutex<Option<Instant>>,
    resume_from: Mutex<Option<f64>>,
}

impl WindowContext {
    pub(crate) fn new(
        instance: u64,
        window: Window,
        session: Arc<PlayerSession>,
        config: Arc<PlaybackConfig>,
        notifier: Arc<dyn Notifier>,
        state: Arc<watch::Sender<PlaybackState>>,
        on_ended: Arc<Mutex<Option<OnEndedHandler>>>,
    ) -> Self {
        WindowContext {
            instance,
            window,
            session,
            config,
            notifier,
            state,
            on_ended,
            intent: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            failure_notified: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            recoveries: AtomicU32::new(0),
            play_requested_at: Mutex::new(None),
            resume_from: Mutex::new(None),
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn session(&self) -> &Arc<PlayerSession> {
        &self.session
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn intent_playing(&self) -> bool {
        self.intent.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Ended or torn down: watchers should exit
    pub fn is_finished(&self) -> bool {
        self.is_ended() || self.is_retired()
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.intent.store(false, Ordering::Release);
    }

    pub(crate) fn update_state<F: FnOnce(&mut PlaybackState)>(&self, f: F) {
        if self.is_retired() {
            return;
        }
        self.state.send_modify(f);
    }

    pub(crate) fn set_intent(&self, playing: bool) {
        self.intent.store(playing, Ordering::Release);
        self.update_state(|s| {
            s.is_playing = playing;
            if playing {
                s.error = None;
            }
        });
    }

    /// Record that play was just issued; the stuck-at-start check measures from here.
    pub fn mark_play_requested(&self) {
        *lock(&self.play_requested_at) = Some(Instant::now());
    }

    pub fn since_play_request(&self) -> Option<Duration> {
        lock(&self.play_requested_at).map(|at| at.elapsed())
    }

    /// Remember where a paused window should pick up again
    pub(crate) fn remember_resume_point(&self, position: Option<f64>) {
        let eps = self.config.timing.end_epsilon_secs;
        let point = position.filter(|p| *p > self.window.start && *p < self.window.end - eps);
        *lock(&self.resume_from) = point;
    }

    pub(crate) fn clear_resume_point(&self) {
        *lock(&self.resume_from) = None;
    }

    /// Where a play attempt seeks to: the resume point if any, else the window start
    pub fn seek_target(&self) -> f64 {
        lock(&self.resume_from).unwrap_or(self.window.start)
    }

    /// Fold one poll observation into the published state.
    pub fn observe(&self, position: Option<f64>, state: Option<EmbedState>) {
        self.update_state(|s| {
            if let Some(p) = position {
                s.position = p;
            }
            if let Some(st) = state {
                s.is_actually_playing = st == EmbedState::Playing;
                s.is_buffering = st == EmbedState::Buffering;
            }
        });
    }

    /// The single idempotent end-of-window report. Returns true for the call
    /// that actually ended the window.
    pub fn report_end(&self, source: EndSource) -> bool {
        if self.is_retired() {
            return false;
        }
        if self.ended.swap(true, Ordering::AcqRel) {
            debug!(
                "window {} end from {:?} ignored, already handled",
                self.instance, source
            );
            return false;
        }
        self.intent.store(false, Ordering::Release);
        let position = self.session.current_time();
        self.session.pause();
        self.update_state(|s| {
            s.is_playing = false;
            s.is_actually_playing = false;
            s.is_buffering = false;
            if let Some(p) = position {
                s.position = p;
            }
        });
        info!(
            "window {} ({} {:.2}-{:.2}) ended via {:?} at {:?}",
            self.instance, self.window.video_id, self.window.start, self.window.end, source, position
        );

        let handler = lock(&self.on_ended).clone();
        if let Some(handler) = handler {
            handler(&WindowEnd {
                instance: self.instance,
                window: self.window.clone(),
                source,
                position,
            });
        }
        true
    }

    /// Leave the window paused in a failed state, with at most one toast per window.
    pub fn give_up(&self, error: PlaybackError, message: &str) {
        if self.is_retired() {
            return;
        }
        self.intent.store(false, Ordering::Release);
        self.session.pause();
        self.update_state(|s| {
            s.is_playing = false;
            s.error = Some(error);
        });
        warn!("window {} gave up: {:?}", self.instance, error);
        if !self.failure_notified.swap(true, Ordering::AcqRel) {
            self.notifier.error(message);
        }
    }

    /// A non-transient runtime error: stop intending to play, no toast (the
    /// controller already sent one for the session).
    pub(crate) fn abandon(&self, error: PlaybackError) {
        self.intent.store(false, Ordering::Release);
        self.failure_notified.store(true, Ordering::Release);
        self.update_state(|s| {
            s.is_playing = false;
            s.error = Some(error);
        });
    }

    /// Enter recovery unless another watcher already is recovering.
    pub fn begin_recovery(&self) -> Option<RecoveryGuard<'_>> {
        if self.recovering.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(RecoveryGuard {
            flag: &self.recovering,
        })
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    /// Count one recovery attempt; returns the 1-based attempt number.
    pub fn next_recovery(&self) -> u32 {
        self.recoveries.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn recoveries(&self) -> u32 {
        self.recoveries.load(Ordering::Acquire)
    }
}

/// Clears the recovering flag when dropped, including when the task is aborted.
pub struct RecoveryGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PlayerOptions, RecordingNotifier, SimBehavior, SimulatedRuntime};

    fn context(notifier: Arc<RecordingNotifier>) -> (WindowContext, watch::Receiver<PlaybackState>) {
        let rt = SimulatedRuntime::with_behavior(SimBehavior {
            load_delay: Duration::ZERO,
            ..SimBehavior::default()
        });
        crate::platform::EmbedRuntime::inject(&rt);
        let (session, _events) =
            PlayerSession::create(&rt, "main", PlayerOptions::new("v1", 0.0)).unwrap();
        let (tx, rx) = watch::channel(PlaybackState::default());
        let ctx = WindowContext::new(
            7,
            Window::new("v1", 0.0, 10.0, "").unwrap(),
            session,
            Arc::new(PlaybackConfig::default()),
            notifier,
            Arc::new(tx),
            Arc::new(Mutex::new(None)),
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn end_is_reported_once() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (ctx, _rx) = context(notifier);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        *lock(&ctx.on_ended) = Some(Arc::new(move |end: &WindowEnd| {
            lock(&sink).push(end.source);
        }));

        ctx.set_intent(true);
        assert!(ctx.report_end(EndSource::Polling));
        assert!(!ctx.report_end(EndSource::Native));
        assert!(!ctx.report_end(EndSource::Supervisor));
        assert_eq!(*lock(&seen), vec![EndSource::Polling]);
        assert!(!ctx.intent_playing());
    }

    #[tokio::test]
    async fn retired_context_is_inert() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (ctx, mut rx) = context(notifier.clone());
        rx.borrow_and_update();
        ctx.retire();

        assert!(!ctx.report_end(EndSource::Native));
        ctx.give_up(PlaybackError::Stalled, "stalled");
        ctx.observe(Some(3.0), Some(EmbedState::Playing));
        assert!(!rx.has_changed().unwrap());
        assert!(notifier.toasts().is_empty());
    }

    #[tokio::test]
    async fn give_up_notifies_once() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (ctx, rx) = context(notifier.clone());
        ctx.set_intent(true);
        ctx.give_up(PlaybackError::RetriesExhausted { attempts: 3 }, "try again");
        ctx.give_up(PlaybackError::Stalled, "tap play again");
        assert_eq!(notifier.toasts().len(), 1);
        assert_eq!(rx.borrow().error, Some(PlaybackError::Stalled));
        assert!(!rx.borrow().is_playing);
    }

    #[tokio::test]
    async fn recovery_guard_is_exclusive() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (ctx, _rx) = context(notifier);
        let guard = ctx.begin_recovery();
        assert!(guard.is_some());
        assert!(ctx.begin_recovery().is_none());
        drop(guard);
        assert!(ctx.begin_recovery().is_some());
    }

    #[tokio::test]
    async fn resume_point_stays_inside_window() {
        let notifier = Arc::new(RecordingNotifier::new());
        let (ctx, _rx) = context(notifier);
        ctx.remember_resume_point(Some(4.0));
        assert_eq!(ctx.seek_target(), 4.0);
        ctx.remember_resume_point(Some(9.95));
        assert_eq!(ctx.seek_target(), 0.0);
        ctx.remember_resume_point(None);
        assert_eq!(ctx.seek_target(), 0.0);
    }
}
