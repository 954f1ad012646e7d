//! Playlist Advance Controller
//!
//! Sequences the windows of one sniplist. All playlist state is owned by a
//! single worker task fed through a command channel: user requests from
//! [`PlaylistController`], end-of-window reports from the window controller,
//! backup timer expiries and network transitions all arrive as commands, so
//! they are handled strictly one after another.
//!
//! Any end signal for the active index advances (or completes) once; signals
//! that belong to a superseded window, or repeat within the debounce span,
//! are dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::data::{windows_from_records, SnippetStore, TitleResolver};
use crate::platform::{NetworkMonitor, Notifier, PlatformApi};
use crate::playback::{EndSource, WindowController, WindowEnd};
use crate::preload::Preloader;
use crate::{fallback_title, Error, PlaybackConfig, PlaybackState, Result, Window};

const COMPLETE_MESSAGE: &str = "Sniplist complete";
const OFFLINE_MESSAGE: &str = "You're offline. Playback paused.";
const ONLINE_MESSAGE: &str = "Back online. Press play to resume.";
const LOAD_FAILED_MESSAGE: &str = "Couldn't load this clip. Skipping ahead shortly.";

/// Why a sniplist cannot be played
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaylistError {
    /// The sniplist exists but has no playable snippets
    EmptyPlaylist,
    /// The data-access collaborator failed
    DataAccess(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaylistPhase {
    #[default]
    Idle,
    LoadingPlaylist,
    Playing(usize),
    Advancing,
    /// Terminal until `restart` or a new `start`
    Complete,
    Error(PlaylistError),
}

/// Point-in-time view of the playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub phase: PlaylistPhase,
    /// Index of the active window, if any
    pub index: Option<usize>,
    pub len: usize,
    /// Automatic advances so far (manual navigation not included)
    pub advances: u32,
    /// Window changes so far, manual or automatic
    pub generation: u64,
    pub paused: bool,
    /// The active window with its current display title
    pub window: Option<Window>,
}

enum Command {
    Start(String, oneshot::Sender<Result<usize>>),
    Next(oneshot::Sender<bool>),
    Previous(oneshot::Sender<bool>),
    Select(usize, oneshot::Sender<Result<()>>),
    Restart(oneshot::Sender<Result<()>>),
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<PlaylistSnapshot>),
    Close(Option<oneshot::Sender<()>>),

    WindowEnded { instance: u64, source: EndSource },
    Loaded { generation: u64, result: Result<u64> },
    BackupElapsed { generation: u64 },
    Network(bool),
    TitleResolved { video_id: String, title: String },
}

/// Async handle to one sniplist player.
///
/// Dropping the handle closes the player: every timer is cancelled and both
/// player instances are destroyed.
pub struct PlaylistController {
    cmd_tx: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<PlaylistPhase>,
    playback: watch::Receiver<PlaybackState>,
}

impl PlaylistController {
    /// Build a player on `platform`. Must be called inside a tokio runtime.
    pub fn new(
        platform: &dyn PlatformApi,
        store: Arc<dyn SnippetStore>,
        config: PlaybackConfig,
    ) -> Result<Self> {
        Self::build(platform, store, None, config)
    }

    /// Like [`PlaylistController::new`], enriching untitled snippets through `titles`.
    pub fn with_titles(
        platform: &dyn PlatformApi,
        store: Arc<dyn SnippetStore>,
        titles: Arc<dyn TitleResolver>,
        config: PlaybackConfig,
    ) -> Result<Self> {
        Self::build(platform, store, Some(titles), config)
    }

    fn build(
        platform: &dyn PlatformApi,
        store: Arc<dyn SnippetStore>,
        titles: Option<Arc<dyn TitleResolver>>,
        config: PlaybackConfig,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::InitializationError(format!("sniplist player needs a tokio runtime: {}", e))
        })?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(WindowController::new(platform, config.clone()));
        let ended_tx = cmd_tx.clone();
        controller.on_ended(move |end: &WindowEnd| {
            let _ = ended_tx.send(Command::WindowEnded {
                instance: end.instance,
                source: end.source,
            });
        });

        // warming a second player only pays off where autoplay is unrestricted
        let preloader = (config.playlist.preload_enabled && !platform.device_class().is_mobile())
            .then(|| Preloader::new(platform.capability_probe(), &config.preload_container_id));

        let monitor = platform.network();
        let mut network = monitor.subscribe();
        let network_tx = cmd_tx.clone();
        let network_task = runtime.spawn(async move {
            while network.changed().await.is_ok() {
                let online = *network.borrow_and_update();
                if network_tx.send(Command::Network(online)).is_err() {
                    break;
                }
            }
        });

        let (phase_tx, phase) = watch::channel(PlaylistPhase::Idle);
        let playback = controller.subscribe();
        let worker = Worker {
            controller,
            store,
            titles,
            notifier: platform.notifier(),
            network: monitor,
            preloader,
            config,
            tx: cmd_tx.clone(),
            phase: phase_tx,
            windows: Vec::new(),
            index: 0,
            generation: 0,
            instance: None,
            backup: None,
            backup_deadline: None,
            backup_remaining: None,
            transition: None,
            last_advance: None,
            advances: 0,
            paused: false,
            paused_by_network: false,
            completion_notified: false,
            network_task: Some(network_task),
            enrich_task: None,
        };
        runtime.spawn(worker.run(cmd_rx));

        Ok(PlaylistController {
            cmd_tx,
            phase,
            playback,
        })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| Error::InvalidState("sniplist player is closed".to_string()))?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Load `sniplist_id` and start playing its first window. Returns the
    /// number of playable windows.
    pub async fn start(&self, sniplist_id: &str) -> Result<usize> {
        let id = sniplist_id.to_string();
        self.request(|tx| Command::Start(id, tx)).await?
    }

    /// Skip to the next window. Returns false (and changes nothing) on the last one.
    pub async fn next(&self) -> Result<bool> {
        self.request(Command::Next).await
    }

    /// Back to the previous window. Returns false (and changes nothing) on the first one.
    pub async fn previous(&self) -> Result<bool> {
        self.request(Command::Previous).await
    }

    pub async fn select(&self, index: usize) -> Result<()> {
        self.request(|tx| Command::Select(index, tx)).await?
    }

    /// Play again from the first window, also after completion
    pub async fn restart(&self) -> Result<()> {
        self.request(Command::Restart).await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    /// Explicitly resume after a pause or a network loss
    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await?
    }

    pub async fn snapshot(&self) -> Result<PlaylistSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// The active window with its display title
    pub async fn now_playing(&self) -> Result<Option<Window>> {
        Ok(self.snapshot().await?.window)
    }

    pub fn phase(&self) -> PlaylistPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaylistPhase> {
        self.phase.clone()
    }

    /// Playback state of the active window
    pub fn playback_state(&self) -> PlaybackState {
        self.playback.borrow().clone()
    }

    pub fn subscribe_playback(&self) -> watch::Receiver<PlaybackState> {
        self.playback.clone()
    }

    /// Tear everything down and wait for the worker to finish.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(Some(tx)));
        rx.await.map_err(|_| Error::Cancelled)
    }
}

impl Drop for PlaylistController {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Close(None));
    }
}

struct Worker {
    controller: Arc<WindowController>,
    store: Arc<dyn SnippetStore>,
    titles: Option<Arc<dyn TitleResolver>>,
    notifier: Arc<dyn Notifier>,
    network: NetworkMonitor,
    preloader: Option<Preloader>,
    config: PlaybackConfig,
    tx: mpsc::UnboundedSender<Command>,
    phase: watch::Sender<PlaylistPhase>,

    windows: Vec<Window>,
    index: usize,
    generation: u64,
    /// Window controller instance of the active window, once loaded
    instance: Option<u64>,
    backup: Option<JoinHandle<()>>,
    backup_deadline: Option<Instant>,
    backup_remaining: Option<Duration>,
    transition: Option<JoinHandle<()>>,
    last_advance: Option<(usize, Instant)>,
    advances: u32,
    paused: bool,
    paused_by_network: bool,
    completion_notified: bool,
    network_task: Option<JoinHandle<()>>,
    enrich_task: Option<JoinHandle<()>>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Start(id, reply) => {
                    let res = self.start(&id).await;
                    let _ = reply.send(res);
                }
                Command::Next(reply) => {
                    let _ = reply.send(self.step(1));
                }
                Command::Previous(reply) => {
                    let _ = reply.send(self.step(-1));
                }
                Command::Select(index, reply) => {
                    let _ = reply.send(self.select(index));
                }
                Command::Restart(reply) => {
                    let _ = reply.send(self.restart());
                }
                Command::Pause(reply) => {
                    self.pause(false);
                    let _ = reply.send(());
                }
                Command::Resume(reply) => {
                    let _ = reply.send(self.resume());
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::WindowEnded { instance, source } => {
                    if self.instance != Some(instance) {
                        debug!("end of stale window {} ({:?}) ignored", instance, source);
                        continue;
                    }
                    debug!("window {} ended via {:?}", instance, source);
                    self.advance();
                }
                Command::Loaded { generation, result } => self.loaded(generation, result),
                Command::BackupElapsed { generation } => {
                    if generation != self.generation {
                        continue;
                    }
                    warn!(
                        "backup timer fired for index {}, forcing advance",
                        self.index
                    );
                    self.backup = None;
                    self.advance();
                }
                Command::Network(online) => self.network(online),
                Command::TitleResolved { video_id, title } => self.retitle(&video_id, &title),
                Command::Close(reply) => {
                    self.shutdown();
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
            }
        }
        self.shutdown();
    }

    fn set_phase(&self, phase: PlaylistPhase) {
        info!("sniplist phase {:?}", phase);
        self.phase.send_replace(phase);
    }

    fn current_phase(&self) -> PlaylistPhase {
        self.phase.borrow().clone()
    }

    fn cancel_window_timers(&mut self) {
        if let Some(t) = self.backup.take() {
            t.abort();
        }
        if let Some(t) = self.transition.take() {
            t.abort();
        }
        self.backup_deadline = None;
        self.backup_remaining = None;
    }

    async fn start(&mut self, sniplist_id: &str) -> Result<usize> {
        self.cancel_window_timers();
        if let Some(t) = self.enrich_task.take() {
            t.abort();
        }
        self.controller.stop();
        self.windows.clear();
        self.instance = None;
        self.last_advance = None;
        self.advances = 0;
        self.paused = false;
        self.paused_by_network = false;
        self.completion_notified = false;
        self.set_phase(PlaylistPhase::LoadingPlaylist);

        let records = match self.store.windows(sniplist_id).await {
            Ok(records) => records,
            Err(e) => {
                error!("loading sniplist {} failed: {}", sniplist_id, e);
                let message = match &e {
                    Error::DataAccess(m) => m.clone(),
                    other => other.to_string(),
                };
                self.set_phase(PlaylistPhase::Error(PlaylistError::DataAccess(message.clone())));
                return Err(Error::DataAccess(message));
            }
        };
        let windows = windows_from_records(records);
        if windows.is_empty() {
            info!("sniplist {} has no playable snippets", sniplist_id);
            self.set_phase(PlaylistPhase::Error(PlaylistError::EmptyPlaylist));
            return Err(Error::EmptyPlaylist);
        }
        info!("sniplist {} loaded with {} windows", sniplist_id, windows.len());
        self.windows = windows;
        self.enrich_titles();
        self.go_to(0);
        Ok(self.windows.len())
    }

    fn enrich_titles(&mut self) {
        let Some(resolver) = self.titles.clone() else {
            return;
        };
        let mut videos: Vec<String> = self
            .windows
            .iter()
            .filter(|w| w.display_title == fallback_title(&w.video_id, w.start))
            .map(|w| w.video_id.clone())
            .collect();
        videos.sort();
        videos.dedup();
        if videos.is_empty() {
            return;
        }
        let tx = self.tx.clone();
        self.enrich_task = Some(tokio::spawn(async move {
            let lookups = videos.into_iter().map(|video_id| {
                let resolver = resolver.clone();
                async move {
                    let result = resolver.title_for(&video_id).await;
                    (video_id, result)
                }
            });
            for (video_id, result) in join_all(lookups).await {
                match result {
                    Ok(meta) => {
                        let _ = tx.send(Command::TitleResolved {
                            video_id,
                            title: meta.title,
                        });
                    }
                    Err(e) => debug!("no title for {}: {}", video_id, e),
                }
            }
        }));
    }

    fn retitle(&mut self, video_id: &str, title: &str) {
        for w in self.windows.iter_mut().filter(|w| w.video_id == video_id) {
            if w.display_title == fallback_title(&w.video_id, w.start) {
                w.display_title = title.to_string();
            }
        }
    }

    // Make `index` the active window: cancel the old window's timers and load it.
    // Playback starts from `loaded`, unless a pause arrived in between.
    fn go_to(&mut self, index: usize) {
        let Some(window) = self.windows.get(index).cloned() else {
            return;
        };
        self.cancel_window_timers();
        self.generation += 1;
        self.index = index;
        self.instance = None;
        let offline = !self.network.is_online();
        if offline {
            info!("offline, window {} loads paused", index);
        }
        self.paused = offline;
        self.paused_by_network = offline;
        self.set_phase(PlaylistPhase::Playing(index));

        let generation = self.generation;
        let controller = self.controller.clone();
        let tx = self.tx.clone();
        self.transition = Some(tokio::spawn(async move {
            let result = controller.load(window).await;
            let _ = tx.send(Command::Loaded { generation, result });
        }));
    }

    fn loaded(&mut self, generation: u64, result: Result<u64>) {
        if generation != self.generation {
            return;
        }
        let Some(window) = self.windows.get(self.index).cloned() else {
            return;
        };
        let duration = window.length();
        match result {
            Ok(instance) => {
                self.instance = Some(instance);
                if let (Some(preloader), Some(next)) = (&self.preloader, self.windows.get(self.index + 1)) {
                    let delay = duration.saturating_sub(self.config.playlist.preload_lead());
                    preloader.schedule(next.clone(), delay);
                }
            }
            Err(e) => {
                warn!("window {} failed to load: {}", self.index, e);
                self.notifier.error(LOAD_FAILED_MESSAGE);
            }
        }
        if self.paused {
            debug!("window {} loaded while paused", self.index);
            return;
        }
        if self.instance.is_some() {
            if let Err(e) = self.controller.request_play() {
                debug!("play of window {} refused: {}", self.index, e);
            }
        }
        self.arm_backup(duration + self.config.playlist.backup_buffer());
    }

    fn arm_backup(&mut self, delay: Duration) {
        if let Some(t) = self.backup.take() {
            t.abort();
        }
        let generation = self.generation;
        let tx = self.tx.clone();
        self.backup_deadline = Some(Instant::now() + delay);
        self.backup_remaining = None;
        debug!("backup timer armed for {:?}", delay);
        self.backup = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Command::BackupElapsed { generation });
        }));
    }

    fn advance(&mut self) {
        let PlaylistPhase::Playing(index) = self.current_phase() else {
            debug!("end signal outside of playback ignored");
            return;
        };
        if let Some((last, at)) = self.last_advance {
            if last == index && at.elapsed() < self.config.playlist.debounce() {
                debug!("duplicate end signal for index {} ignored", index);
                return;
            }
        }
        self.last_advance = Some((index, Instant::now()));

        if index + 1 >= self.windows.len() {
            self.complete();
            return;
        }
        self.set_phase(PlaylistPhase::Advancing);
        self.advances += 1;
        self.go_to(index + 1);
    }

    fn complete(&mut self) {
        self.cancel_window_timers();
        if let Some(preloader) = &self.preloader {
            preloader.cancel();
        }
        // a window cut short by the backup timer may still be playing
        self.controller.pause();
        self.instance = None;
        self.set_phase(PlaylistPhase::Complete);
        if !self.completion_notified {
            self.completion_notified = true;
            self.notifier.success(COMPLETE_MESSAGE);
        }
    }

    fn step(&mut self, delta: isize) -> bool {
        let PlaylistPhase::Playing(index) = self.current_phase() else {
            return false;
        };
        let Some(target) = index.checked_add_signed(delta) else {
            return false;
        };
        if target >= self.windows.len() {
            return false;
        }
        self.go_to(target);
        true
    }

    fn select(&mut self, index: usize) -> Result<()> {
        if !matches!(
            self.current_phase(),
            PlaylistPhase::Playing(_) | PlaylistPhase::Advancing
        ) {
            return Err(Error::InvalidState("no sniplist is playing".to_string()));
        }
        if index >= self.windows.len() {
            return Err(Error::InvalidState(format!(
                "index {} out of range for {} windows",
                index,
                self.windows.len()
            )));
        }
        self.go_to(index);
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        if self.windows.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        self.last_advance = None;
        self.completion_notified = false;
        self.go_to(0);
        Ok(())
    }

    fn pause(&mut self, by_network: bool) -> bool {
        if !matches!(self.current_phase(), PlaylistPhase::Playing(_)) || self.paused {
            return false;
        }
        self.controller.pause();
        self.paused = true;
        self.paused_by_network = by_network;
        if let Some(t) = self.backup.take() {
            t.abort();
        }
        self.backup_remaining = self
            .backup_deadline
            .take()
            .map(|d| d.saturating_duration_since(Instant::now()));
        info!("sniplist paused at index {}", self.index);
        true
    }

    fn resume(&mut self) -> Result<()> {
        if !matches!(self.current_phase(), PlaylistPhase::Playing(_)) {
            return Err(Error::InvalidState("no sniplist is playing".to_string()));
        }
        if !self.paused {
            return Ok(());
        }
        if self.instance.is_some() {
            self.controller.request_play()?;
        }
        self.paused = false;
        self.paused_by_network = false;
        if self.instance.is_some() {
            let rest = match self.backup_remaining.take() {
                Some(rest) => rest,
                None => self.full_backup_delay(),
            };
            self.arm_backup(rest);
        }
        info!("sniplist resumed at index {}", self.index);
        Ok(())
    }

    fn full_backup_delay(&self) -> Duration {
        let window = &self.windows[self.index];
        window.length() + self.config.playlist.backup_buffer()
    }

    fn network(&mut self, online: bool) {
        if online {
            if self.paused_by_network {
                self.notifier.info(ONLINE_MESSAGE);
            }
            return;
        }
        self.pause(true);
        self.notifier.warning(OFFLINE_MESSAGE);
    }

    fn snapshot(&self) -> PlaylistSnapshot {
        let phase = self.current_phase();
        let active = matches!(phase, PlaylistPhase::Playing(_) | PlaylistPhase::Advancing);
        PlaylistSnapshot {
            index: active.then_some(self.index),
            window: if active {
                self.windows.get(self.index).cloned()
            } else {
                None
            },
            phase,
            len: self.windows.len(),
            advances: self.advances,
            generation: self.generation,
            paused: self.paused,
        }
    }

    fn shutdown(&mut self) {
        self.cancel_window_timers();
        for task in [self.network_task.take(), self.enrich_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        if let Some(preloader) = &self.preloader {
            preloader.cancel();
        }
        self.controller.clear_on_ended();
        self.controller.destroy();
        self.instance = None;
        if self.current_phase() != PlaylistPhase::Idle {
            self.set_phase(PlaylistPhase::Idle);
        }
    }
}
