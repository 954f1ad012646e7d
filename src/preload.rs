//! Speculative warm-up of the next window.
//!
//! A second, muted player is mounted in its own container shortly before the
//! current window ends, seeked to the next window's start and paused. It is
//! never promoted: the main player still goes through the normal seek and
//! play sequence, the warm player only primes the provider's caches.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::lock;
use crate::platform::{EmbedRuntime, PlayerEvent, PlayerOptions};
use crate::probe::CapabilityProbe;
use crate::session::PlayerSession;
use crate::Window;

// How long a warm player may take to report ready before the warm-up is dropped
const WARM_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Preloader {
    runtime: Arc<dyn EmbedRuntime>,
    probe: CapabilityProbe,
    container: String,
    slot: Arc<Mutex<PreloadSlot>>,
}

#[derive(Default)]
struct PreloadSlot {
    task: Option<JoinHandle<()>>,
    target: Option<Window>,
    session: Option<Arc<PlayerSession>>,
    warmed: bool,
}

impl PreloadSlot {
    fn clear(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(session) = self.session.take() {
            session.destroy();
        }
        self.target = None;
        self.warmed = false;
    }
}

impl Preloader {
    pub fn new(probe: CapabilityProbe, container: &str) -> Self {
        Preloader {
            runtime: probe.runtime(),
            probe,
            container: container.to_string(),
            slot: Arc::new(Mutex::new(PreloadSlot::default())),
        }
    }

    /// Warm `next` after `delay`, replacing any earlier warm-up.
    pub fn schedule(&self, next: Window, delay: Duration) {
        let mut slot = lock(&self.slot);
        if slot.target.as_ref().is_some_and(|w| w.same_tuple(&next)) {
            return;
        }
        slot.clear();
        slot.target = Some(next.clone());

        let runtime = self.runtime.clone();
        let probe = self.probe.clone();
        let container = self.container.clone();
        let shared = self.slot.clone();
        debug!("preload of {} in {:?}", next.video_id, delay);
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tokio::time::timeout(WARM_TIMEOUT, probe.ready()).await.is_err() {
                warn!("preload skipped, embed runtime not ready");
                return;
            }
            let mut options = PlayerOptions::new(&next.video_id, next.start);
            options.muted = true;
            let (session, mut events) = match PlayerSession::create(&*runtime, &container, options) {
                Ok(created) => created,
                Err(e) => {
                    warn!("preload of {} failed: {}", next.video_id, e);
                    return;
                }
            };
            lock(&shared).session = Some(session.clone());

            let ready = tokio::time::timeout(WARM_TIMEOUT, async {
                while let Some(event) = events.recv().await {
                    match event {
                        PlayerEvent::Ready => return true,
                        PlayerEvent::Error(code) => {
                            debug!("preload player reported error {}", code);
                            return false;
                        }
                        PlayerEvent::StateChanged(_) => {}
                    }
                }
                false
            })
            .await;
            if !matches!(ready, Ok(true)) {
                warn!("preload of {} never became ready", next.video_id);
                return;
            }
            session.mute();
            session.seek(next.start);
            session.pause();
            lock(&shared).warmed = true;
            info!("preloaded {} at {:.2}", next.video_id, next.start);
        }));
    }

    /// The window whose player is warm
    pub fn warmed(&self) -> Option<Window> {
        let slot = lock(&self.slot);
        if slot.warmed {
            slot.target.clone()
        } else {
            None
        }
    }

    /// The window currently scheduled or warm
    pub fn target(&self) -> Option<Window> {
        lock(&self.slot).target.clone()
    }

    /// Drop the pending warm-up and the warm player
    pub fn cancel(&self) {
        lock(&self.slot).clear();
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.cancel();
    }
}
