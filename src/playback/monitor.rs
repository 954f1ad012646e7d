//! Polling end-of-window detector and stall tracker.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

use super::context::{EndSource, WindowContext};
use super::strategy::RecoveryStrategy;
use crate::platform::EmbedState;

/// Result of comparing a polled position to the window end
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EndCheck {
    /// At or past the end
    Reached,
    /// Within epsilon of the end; stop after the remaining time
    Imminent(Duration),
    Pending,
}

pub fn end_check(position: f64, end: f64, epsilon: f64) -> EndCheck {
    if position >= end {
        EndCheck::Reached
    } else if position >= end - epsilon {
        EndCheck::Imminent(Duration::from_secs_f64(end - position))
    } else {
        EndCheck::Pending
    }
}

/// Tracks how long playback has been intended but not observed.
///
/// A paused, unstarted or ended player counts as stalled after `idle_after`;
/// buffering is tolerated up to `buffering_after`.
#[derive(Debug)]
pub struct StallTracker {
    idle_after: Duration,
    buffering_after: Duration,
    since: Option<(Instant, bool)>,
}

impl StallTracker {
    pub fn new(idle_after: Duration, buffering_after: Duration) -> Self {
        StallTracker {
            idle_after,
            buffering_after,
            since: None,
        }
    }

    pub fn reset(&mut self) {
        self.since = None;
    }

    /// Feed one observation; true when the stall threshold was crossed.
    pub fn observe(&mut self, intent: bool, state: Option<EmbedState>) -> bool {
        let buffering = match state {
            _ if !intent => {
                self.since = None;
                return false;
            }
            Some(EmbedState::Playing) => {
                self.since = None;
                return false;
            }
            Some(EmbedState::Buffering) => true,
            _ => false,
        };
        let now = Instant::now();
        let started = match self.since {
            // switching between buffering and idle restarts the clock
            Some((at, was_buffering)) if was_buffering == buffering => at,
            _ => {
                self.since = Some((now, buffering));
                now
            }
        };
        let limit = if buffering {
            self.buffering_after
        } else {
            self.idle_after
        };
        now.duration_since(started) >= limit
    }
}

/// Poll the window until it ends, is torn down, or stops intending to play.
pub(crate) async fn watch_window(ctx: Arc<WindowContext>, strategy: Arc<dyn RecoveryStrategy>) {
    let timing = ctx.config().timing.clone();
    let end = ctx.window().end;
    let mut stalls = StallTracker::new(
        timing.poll_interval() * timing.stall_ticks,
        ctx.config().recovery.buffering_grace(),
    );
    let mut ticker = interval(timing.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if ctx.is_finished() || !ctx.intent_playing() {
            break;
        }
        let session = ctx.session();
        let position = session.current_time();
        let state = session.state();
        ctx.observe(position, state);

        if let Some(pos) = position {
            match end_check(pos, end, timing.end_epsilon_secs) {
                EndCheck::Reached => {
                    ctx.report_end(EndSource::Polling);
                    break;
                }
                EndCheck::Imminent(rest) => {
                    debug!("window {}: end in {:?}", ctx.instance(), rest);
                    sleep(rest).await;
                    ctx.report_end(EndSource::Polling);
                    break;
                }
                EndCheck::Pending => {}
            }
        }

        if ctx.is_recovering() {
            stalls.reset();
            continue;
        }
        if stalls.observe(ctx.intent_playing(), state) {
            warn!(
                "window {}: stalled in {:?} at {:?}",
                ctx.instance(),
                state,
                position
            );
            strategy.recover(&ctx, false).await;
            stalls.reset();
        }
    }
    debug!("window {}: poller stopped", ctx.instance());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_check_boundaries() {
        assert_eq!(end_check(19.0, 20.0, 0.15), EndCheck::Pending);
        assert_eq!(end_check(20.0, 20.0, 0.15), EndCheck::Reached);
        assert_eq!(end_check(20.1, 20.0, 0.15), EndCheck::Reached);
        match end_check(19.9, 20.0, 0.15) {
            EndCheck::Imminent(d) => assert!((d.as_secs_f64() - 0.1).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn stall_needs_sustained_idle() {
        tokio::time::pause();
        let mut t = StallTracker::new(Duration::from_millis(200), Duration::from_secs(3));
        assert!(!t.observe(true, Some(EmbedState::Paused)));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!t.observe(true, Some(EmbedState::Paused)));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(t.observe(true, Some(EmbedState::Paused)));

        t.reset();
        assert!(!t.observe(true, Some(EmbedState::Paused)));
        assert!(!t.observe(true, Some(EmbedState::Playing)));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!t.observe(true, Some(EmbedState::Paused)));
    }

    #[tokio::test]
    async fn buffering_gets_longer_grace() {
        tokio::time::pause();
        let mut t = StallTracker::new(Duration::from_millis(200), Duration::from_secs(3));
        assert!(!t.observe(true, Some(EmbedState::Buffering)));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!t.observe(true, Some(EmbedState::Buffering)));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(t.observe(true, Some(EmbedState::Buffering)));
    }

    #[tokio::test]
    async fn no_intent_means_no_stall() {
        tokio::time::pause();
        let mut t = StallTracker::new(Duration::ZERO, Duration::ZERO);
        assert!(!t.observe(false, Some(EmbedState::Paused)));
        assert!(t.observe(true, None));
    }
}
