//! Device-specific playback recovery strategies.
//!
//! The controller never branches on the device class. It asks the strategy
//! picked at construction time to play, pause, stop and recover, and to
//! optionally run an extra supervisor next to the shared poller.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use log::{info, warn};

use super::context::WindowContext;
use super::mobile::MobileRecovery;
use super::sequence::{recover_window, run_play_sequence};
use crate::platform::DeviceClass;
use crate::{PlaybackError, Result};

pub(crate) const RETRY_EXHAUSTED_MESSAGE: &str = "Couldn't play this clip. Try again.";

pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Seek, settle, play and verify, with retries
    fn play<'a>(&'a self, ctx: &'a WindowContext) -> BoxFuture<'a, Result<()>>;

    fn pause(&self, ctx: &WindowContext) {
        ctx.remember_resume_point(ctx.session().current_time());
        ctx.session().pause();
    }

    /// Pause and rewind to the window start
    fn stop(&self, ctx: &WindowContext) {
        ctx.clear_resume_point();
        ctx.session().pause();
        ctx.session().seek(ctx.window().start);
    }

    /// One bounded recovery attempt. `forced` always re-seeks to the start.
    fn recover<'a>(&'a self, ctx: &'a WindowContext, forced: bool) -> BoxFuture<'a, ()>;

    /// Extra watcher run alongside the poller while the window plays
    fn supervise(self: Arc<Self>, _ctx: Arc<WindowContext>) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

/// Pick the strategy for a device class. Called once per controller.
pub fn strategy_for(class: DeviceClass) -> Arc<dyn RecoveryStrategy> {
    match class {
        DeviceClass::Desktop => Arc::new(DesktopStrategy),
        DeviceClass::Mobile => Arc::new(MobileRecovery),
    }
}

/// Counted, exclusive recovery shared by both strategies.
pub(crate) async fn bounded_recover(ctx: &WindowContext, forced: bool, give_up_message: &str) {
    if ctx.is_finished() || !ctx.intent_playing() {
        return;
    }
    let Some(_guard) = ctx.begin_recovery() else {
        return;
    };
    let attempt = ctx.next_recovery();
    let cap = ctx.config().recovery.max_recoveries;
    if attempt > cap {
        warn!(
            "window {}: {} recoveries failed, giving up",
            ctx.instance(),
            cap
        );
        ctx.give_up(PlaybackError::Stalled, give_up_message);
        return;
    }
    info!(
        "window {}: recovery {}/{}{}",
        ctx.instance(),
        attempt,
        cap,
        if forced { " (forced)" } else { "" }
    );
    if !recover_window(ctx, forced).await {
        warn!("window {}: recovery {} did not issue play", ctx.instance(), attempt);
    }
}

/// Desktop cadence: the shared poller is the only stall detector.
pub struct DesktopStrategy;

impl RecoveryStrategy for DesktopStrategy {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn play<'a>(&'a self, ctx: &'a WindowContext) -> BoxFuture<'a, Result<()>> {
        run_play_sequence(ctx, RETRY_EXHAUSTED_MESSAGE).boxed()
    }

    fn recover<'a>(&'a self, ctx: &'a WindowContext, forced: bool) -> BoxFuture<'a, ()> {
        bounded_recover(ctx, forced, "Playback stalled. Press play to try again.").boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_follows_device_class() {
        assert_eq!(strategy_for(DeviceClass::Desktop).name(), "desktop");
        assert_eq!(strategy_for(DeviceClass::Mobile).name(), "mobile");
    }
}
