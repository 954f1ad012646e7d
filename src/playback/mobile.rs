//! Touch-device recovery.
//!
//! Autoplay restrictions and late seeks make the embed on phones report
//! states that do not match what it is doing. Besides the shared poller, the
//! mobile strategy runs its own supervisor that checks, every tick, whether
//! the window ended, whether playback stalled, and whether the player claims
//! to play while sitting at the start.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use tokio::time::{interval, MissedTickBehavior};

use super::context::{EndSource, WindowContext};
use super::sequence::run_play_sequence;
use super::strategy::{bounded_recover, RecoveryStrategy, RETRY_EXHAUSTED_MESSAGE};
use crate::platform::EmbedState;
use crate::{RecoveryConfig, Result, Window};

const STALLED_MESSAGE: &str = "Playback stalled. Tap play again.";

/// What one supervisor tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    WindowEnded,
    /// Intending to play, but neither playing nor buffering
    Stalled,
    /// Reports playing, yet has not left the start long after play was issued
    StuckAtStart,
    Healthy,
}

/// Classify one observation.
pub fn assess(
    window: &Window,
    recovery: &RecoveryConfig,
    intent: bool,
    position: Option<f64>,
    state: Option<EmbedState>,
    since_play: Option<Duration>,
) -> Verdict {
    if matches!(position, Some(p) if p >= window.end) {
        return Verdict::WindowEnded;
    }
    if !intent {
        return Verdict::Healthy;
    }
    match state {
        Some(EmbedState::Playing) => {
            let waited = since_play.is_some_and(|d| d >= recovery.stuck_after());
            let at_start =
                matches!(position, Some(p) if (p - window.start).abs() <= recovery.stuck_window_secs);
            if waited && at_start {
                Verdict::StuckAtStart
            } else {
                Verdict::Healthy
            }
        }
        Some(EmbedState::Buffering) => Verdict::Healthy,
        _ => Verdict::Stalled,
    }
}

pub struct MobileRecovery;

impl RecoveryStrategy for MobileRecovery {
    fn name(&self) -> &'static str {
        "mobile"
    }

    fn play<'a>(&'a self, ctx: &'a WindowContext) -> BoxFuture<'a, Result<()>> {
        run_play_sequence(ctx, RETRY_EXHAUSTED_MESSAGE).boxed()
    }

    fn recover<'a>(&'a self, ctx: &'a WindowContext, forced: bool) -> BoxFuture<'a, ()> {
        bounded_recover(ctx, forced, STALLED_MESSAGE).boxed()
    }

    fn supervise(self: Arc<Self>, ctx: Arc<WindowContext>) -> Option<BoxFuture<'static, ()>> {
        Some(supervise(self, ctx).boxed())
    }
}

async fn supervise(strategy: Arc<MobileRecovery>, ctx: Arc<WindowContext>) {
    let recovery = ctx.config().recovery.clone();
    let mut ticker = interval(recovery.monitor_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if ctx.is_finished() || !ctx.intent_playing() {
            break;
        }
        if ctx.is_recovering() {
            continue;
        }
        let session = ctx.session();
        let position = session.current_time();
        let state = session.state();
        let verdict = assess(
            ctx.window(),
            &recovery,
            ctx.intent_playing(),
            position,
            state,
            ctx.since_play_request(),
        );
        match verdict {
            Verdict::WindowEnded => {
                ctx.report_end(EndSource::Supervisor);
                break;
            }
            Verdict::Stalled => {
                warn!(
                    "window {}: supervisor saw {:?} at {:?}",
                    ctx.instance(),
                    state,
                    position
                );
                strategy.recover(&ctx, false).await;
            }
            Verdict::StuckAtStart => {
                warn!(
                    "window {}: stuck at start ({:?}) since play",
                    ctx.instance(),
                    position
                );
                strategy.recover(&ctx, true).await;
            }
            Verdict::Healthy => {}
        }
    }
    debug!("window {}: supervisor stopped", ctx.instance());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> Window {
        Window::new("v1", 10.0, 30.0, "").unwrap()
    }

    #[test]
    fn end_wins_over_everything() {
        let r = RecoveryConfig::default();
        let v = assess(&window(), &r, false, Some(30.0), Some(EmbedState::Paused), None);
        assert_eq!(v, Verdict::WindowEnded);
    }

    #[test]
    fn idle_while_intending_is_a_stall() {
        let r = RecoveryConfig::default();
        let w = window();
        assert_eq!(
            assess(&w, &r, true, Some(12.0), Some(EmbedState::Paused), None),
            Verdict::Stalled
        );
        assert_eq!(
            assess(&w, &r, true, Some(12.0), Some(EmbedState::Buffering), None),
            Verdict::Healthy
        );
        assert_eq!(
            assess(&w, &r, false, Some(12.0), Some(EmbedState::Paused), None),
            Verdict::Healthy
        );
    }

    #[test]
    fn stuck_at_start_needs_time_and_position() {
        let r = RecoveryConfig::default();
        let w = window();
        let early = Some(Duration::from_secs(1));
        let late = Some(Duration::from_secs(4));
        let playing = Some(EmbedState::Playing);

        assert_eq!(assess(&w, &r, true, Some(10.2), playing, early), Verdict::Healthy);
        assert_eq!(assess(&w, &r, true, Some(10.2), playing, late), Verdict::StuckAtStart);
        assert_eq!(assess(&w, &r, true, Some(14.0), playing, late), Verdict::Healthy);
    }
}
