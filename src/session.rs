//! Player session: exclusive owner of one embed player instance.
//!
//! Every call into the runtime is wrapped. A thrown call is logged and comes
//! back as `false`/`None`; nothing escapes to callers as an error. The
//! session relays lifecycle events without interpreting them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::lock;
use crate::platform::{
    EmbedCallError, EmbedPlayer, EmbedRuntime, EmbedState, PlayerEvent, PlayerOptions,
};
use crate::{EmbedErrorKind, Error, Result};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub struct PlayerSession {
    id: u64,
    video_id: String,
    container: String,
    player: Mutex<Option<Box<dyn EmbedPlayer>>>,
    destroyed: Arc<AtomicBool>,
    fault: Mutex<Option<EmbedErrorKind>>,
}

/// Lifecycle events of one session. Yields `None` once the session is destroyed.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<PlayerEvent>,
    destroyed: Arc<AtomicBool>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }
        Some(event)
    }
}

impl PlayerSession {
    /// Mount a new player. Fails only when the runtime refuses to create one.
    pub fn create(
        runtime: &dyn EmbedRuntime,
        container: &str,
        options: PlayerOptions,
    ) -> Result<(Arc<Self>, SessionEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let video_id = options.video_id.clone();
        let player = runtime.create_player(container, options, tx).map_err(|e| {
            Error::InitializationError(format!("Failed to create player for {}: {}", video_id, e))
        })?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("session {} created for {} in #{}", id, video_id, container);

        let destroyed = Arc::new(AtomicBool::new(false));
        let session = Arc::new(PlayerSession {
            id,
            video_id,
            container: container.to_string(),
            player: Mutex::new(Some(player)),
            destroyed: destroyed.clone(),
            fault: Mutex::new(None),
        });
        Ok((session, SessionEvents { rx, destroyed }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    // Run one runtime call; a throw or a torn-down player yields None
    fn call<T>(
        &self,
        what: &str,
        f: impl FnOnce(&dyn EmbedPlayer) -> std::result::Result<T, EmbedCallError>,
    ) -> Option<T> {
        let guard = lock(&self.player);
        let Some(player) = guard.as_deref() else {
            debug!("session {}: {} skipped, player destroyed", self.id, what);
            return None;
        };
        match f(player) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("session {}: {} failed: {}", self.id, what, e);
                None
            }
        }
    }

    pub fn seek(&self, seconds: f64) -> bool {
        self.call("seek", |p| p.seek(seconds)).is_some()
    }

    pub fn play(&self) -> bool {
        self.call("play", |p| p.play()).is_some()
    }

    pub fn pause(&self) -> bool {
        self.call("pause", |p| p.pause()).is_some()
    }

    pub fn mute(&self) -> bool {
        self.call("mute", |p| p.mute()).is_some()
    }

    pub fn current_time(&self) -> Option<f64> {
        self.call("current_time", |p| p.current_time())
    }

    pub fn state(&self) -> Option<EmbedState> {
        self.call("state", |p| p.state())
    }

    /// Remember a non-transient error. Returns true the first time, so the
    /// caller can notify exactly once.
    pub fn record_fault(&self, kind: EmbedErrorKind) -> bool {
        let mut fault = lock(&self.fault);
        if fault.is_some() {
            return false;
        }
        *fault = Some(kind);
        true
    }

    pub fn fault(&self) -> Option<EmbedErrorKind> {
        *lock(&self.fault)
    }

    /// Tear the player down. Safe to call any number of times.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let player = lock(&self.player).take();
        if let Some(player) = player {
            if let Err(e) = player.destroy() {
                warn!("session {}: destroy failed: {}", self.id, e);
            }
        }
        debug!("session {} destroyed", self.id);
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
