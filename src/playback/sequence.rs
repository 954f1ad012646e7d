//! The seek, settle, play, verify workflow and the lighter re-seek/re-play
//! recovery, written as straight-line async code with one tunable per stage.

use std::fmt;

use log::{debug, error, info, warn};
use tokio::time::sleep;

use super::context::WindowContext;
use super::retry::Backoff;
use crate::{Error, PlaybackError, Result};

/// Named suspension points of one play attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStage {
    Seek,
    Settle,
    Play,
    Verify,
}

impl fmt::Display for PlayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayStage::Seek => "seek",
            PlayStage::Settle => "settle",
            PlayStage::Play => "play",
            PlayStage::Verify => "verify",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Playing,
    Failed(PlayStage),
    Aborted,
}

fn interrupted(ctx: &WindowContext) -> bool {
    ctx.is_finished() || !ctx.intent_playing()
}

async fn attempt(ctx: &WindowContext) -> Attempt {
    let timing = &ctx.config().timing;
    let session = ctx.session();

    let target = ctx.seek_target();
    debug!("window {}: {} to {:.2}", ctx.instance(), PlayStage::Seek, target);
    if !session.seek(target) {
        return Attempt::Failed(PlayStage::Seek);
    }

    debug!("window {}: {} {:?}", ctx.instance(), PlayStage::Settle, timing.settle_delay());
    sleep(timing.settle_delay()).await;
    if interrupted(ctx) {
        return Attempt::Aborted;
    }

    debug!("window {}: {}", ctx.instance(), PlayStage::Play);
    ctx.mark_play_requested();
    if !session.play() {
        return Attempt::Failed(PlayStage::Play);
    }

    sleep(timing.verify_delay()).await;
    if interrupted(ctx) {
        return Attempt::Aborted;
    }
    let state = session.state();
    debug!("window {}: {} saw {:?}", ctx.instance(), PlayStage::Verify, state);
    match state {
        Some(s) if s.is_progressing() => Attempt::Playing,
        _ => Attempt::Failed(PlayStage::Verify),
    }
}

/// Drive the window into playback, retrying with backoff. On exhaustion the
/// window is left paused and `exhausted_message` is shown once.
pub async fn run_play_sequence(ctx: &WindowContext, exhausted_message: &str) -> Result<()> {
    let mut backoff = Backoff::new(ctx.config().retry.clone());
    loop {
        if let Some(kind) = ctx.session().fault() {
            return Err(Error::Embed(kind));
        }
        match attempt(ctx).await {
            Attempt::Playing => {
                ctx.clear_resume_point();
                info!(
                    "window {} playing {} from {:.2} (attempt {})",
                    ctx.instance(),
                    ctx.window().video_id,
                    ctx.window().start,
                    backoff.attempts() + 1
                );
                return Ok(());
            }
            Attempt::Aborted => {
                return match ctx.session().fault() {
                    Some(kind) => Err(Error::Embed(kind)),
                    None => Err(Error::Cancelled),
                };
            }
            Attempt::Failed(stage) => {
                if let Some(kind) = ctx.session().fault() {
                    return Err(Error::Embed(kind));
                }
                match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            "window {}: attempt {} failed at {}, retrying in {:?}",
                            ctx.instance(),
                            backoff.attempts(),
                            stage,
                            delay
                        );
                        sleep(delay).await;
                        if interrupted(ctx) {
                            return Err(Error::Cancelled);
                        }
                    }
                    None => {
                        let attempts = backoff.attempts();
                        error!(
                            "window {}: giving up after {} attempts (last failure at {})",
                            ctx.instance(),
                            attempts,
                            stage
                        );
                        ctx.give_up(PlaybackError::RetriesExhausted { attempts }, exhausted_message);
                        return Err(Error::PlaybackFailed { attempts });
                    }
                }
            }
        }
    }
}

/// Where a recovery should seek to, if anywhere.
///
/// Forced recoveries always go back to the window start. Otherwise a position
/// close to the start only needs a fresh play; a far one is re-seeked, to the
/// observed position when it is still inside the window.
pub fn recovery_target(ctx: &WindowContext, position: Option<f64>, forced: bool) -> Option<f64> {
    let window = ctx.window();
    if forced {
        return Some(window.start);
    }
    let far = ctx.config().recovery.far_seek_secs;
    match position {
        Some(p) if (p - window.start).abs() <= far => None,
        Some(p) if p > window.start && p < window.end => Some(p),
        _ => Some(window.start),
    }
}

/// Re-seek (when needed) and re-play. Returns false if the window went away
/// or the runtime refused the play call.
pub async fn recover_window(ctx: &WindowContext, forced: bool) -> bool {
    let session = ctx.session();
    let position = session.current_time();
    if let Some(target) = recovery_target(ctx, position, forced) {
        debug!(
            "window {}: recovery seek {:?} -> {:.2}{}",
            ctx.instance(),
            position,
            target,
            if forced { " (forced)" } else { "" }
        );
        session.seek(target);
        sleep(ctx.config().recovery.reseek_delay()).await;
        if interrupted(ctx) {
            return false;
        }
    }
    ctx.mark_play_requested();
    session.play()
}
