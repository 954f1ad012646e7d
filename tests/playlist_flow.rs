use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use snipsync::data::{MemoryStore, SnippetRecord, StaticTitles};
use snipsync::platform::{
    EmbedState, SimBehavior, SimulatedPlatform, SimulatedRuntime, StaticDevice, ToastLevel,
};
use snipsync::playlist::PlaylistError;
use snipsync::{DeviceClass, Error, PlaybackConfig, PlaylistController, PlaylistPhase};

fn two_clip_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(
        "mix",
        vec![
            SnippetRecord::new("b", "v2", 5.0, 25.0, 1),
            SnippetRecord::new("a", "v1", 0.0, 20.0, 0),
        ],
    );
    store
}

fn clips(n: u32, secs: f64) -> Vec<SnippetRecord> {
    (0..n)
        .map(|i| {
            let video = format!("v{}", i);
            SnippetRecord::new(&format!("s{}", i), &video, 0.0, secs, i)
        })
        .collect()
}

fn player(platform: &SimulatedPlatform, store: &MemoryStore) -> PlaylistController {
    let config = PlaybackConfig::for_device(platform_class(platform));
    PlaylistController::new(platform, Arc::new(store.clone()), config).unwrap()
}

fn platform_class(platform: &SimulatedPlatform) -> DeviceClass {
    snipsync::platform::PlatformApi::device_class(platform)
}

async fn wait_for(rx: &mut watch::Receiver<PlaylistPhase>, want: PlaylistPhase, within: Duration) {
    let reached = tokio::time::timeout(within, rx.wait_for(|p| *p == want)).await;
    assert!(reached.is_ok(), "phase {:?} not reached within {:?}", want, within);
}

#[tokio::test]
async fn two_clips_play_in_order_then_complete() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    assert_eq!(player.start("mix").await.unwrap(), 2);
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
    assert_eq!(player.now_playing().await.unwrap().unwrap().video_id, "v1");

    wait_for(&mut phases, PlaylistPhase::Playing(1), Duration::from_secs(30)).await;
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(30)).await;

    let players = platform.runtime().players_in("snipsync-player");
    assert_eq!(players.len(), 2);
    assert_eq!(players[0].video_id(), "v1");
    assert!(players[0].is_destroyed());
    assert_eq!(players[1].video_id(), "v2");
    assert_eq!(players[1].seeks()[0], 5.0);
    let stopped_at = players[1].position();
    assert!((24.99..=25.2).contains(&stopped_at), "stopped at {}", stopped_at);
    assert_eq!(players[1].state(), EmbedState::Paused);

    let snapshot = player.snapshot().await.unwrap();
    assert_eq!(snapshot.advances, 1);
    assert_eq!(snapshot.index, None);

    // nothing left running keeps advancing or toasting
    tokio::time::sleep(Duration::from_secs(60)).await;
    let toasts = platform.recorder().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, ToastLevel::Success);
    assert_eq!(toasts[0].message, "Sniplist complete");
    assert_eq!(player.phase(), PlaylistPhase::Complete);
}

#[tokio::test]
async fn every_window_plays_once_in_position_order() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = MemoryStore::new();
    store.insert("long", clips(5, 3.0));
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("long").await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(60)).await;

    let videos: Vec<String> = platform
        .runtime()
        .players_in("snipsync-player")
        .iter()
        .map(|p| p.video_id().to_string())
        .collect();
    assert_eq!(videos, vec!["v0", "v1", "v2", "v3", "v4"]);
    assert_eq!(player.snapshot().await.unwrap().advances, 4);
    assert_eq!(platform.recorder().count(ToastLevel::Success), 1);
}

#[tokio::test]
async fn navigation_at_the_bounds_is_a_no_op() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);

    player.start("mix").await.unwrap();
    let before = player.snapshot().await.unwrap().generation;
    assert!(!player.previous().await.unwrap());
    assert_eq!(player.snapshot().await.unwrap().generation, before);

    assert!(player.next().await.unwrap());
    assert_eq!(player.phase(), PlaylistPhase::Playing(1));
    let at_last = player.snapshot().await.unwrap().generation;
    assert!(!player.next().await.unwrap());
    assert_eq!(player.snapshot().await.unwrap().generation, at_last);

    assert!(player.previous().await.unwrap());
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
    // manual navigation is not an automatic advance
    assert_eq!(player.snapshot().await.unwrap().advances, 0);
}

#[tokio::test]
async fn select_jumps_and_rejects_out_of_range() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = MemoryStore::new();
    store.insert("long", clips(4, 10.0));
    let player = player(&platform, &store);

    assert!(matches!(player.select(1).await, Err(Error::InvalidState(_))));
    player.start("long").await.unwrap();
    player.select(2).await.unwrap();
    assert_eq!(player.phase(), PlaylistPhase::Playing(2));
    assert!(matches!(player.select(4).await, Err(Error::InvalidState(_))));
    assert_eq!(player.phase(), PlaylistPhase::Playing(2));

    tokio::time::sleep(Duration::from_secs(5)).await;
    let last = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_eq!(last.video_id(), "v2");
    assert_eq!(last.state(), EmbedState::Playing);
}

#[tokio::test]
async fn going_offline_pauses_without_auto_resume() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let mut phases = player.subscribe();
    player.start("mix").await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    platform.network_monitor().set_online(false);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = player.snapshot().await.unwrap();
    assert!(snapshot.paused);
    assert_eq!(snapshot.phase, PlaylistPhase::Playing(0));
    let main = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_eq!(main.state(), EmbedState::Paused);
    assert_eq!(platform.recorder().count(ToastLevel::Warning), 1);

    // neither the poller nor the backup timer moves a paused sniplist
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));

    platform.network_monitor().set_online(true);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(platform.recorder().count(ToastLevel::Info), 1);
    assert!(player.snapshot().await.unwrap().paused);
    assert_eq!(main.state(), EmbedState::Paused);

    player.resume().await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(60)).await;
    assert_eq!(player.snapshot().await.unwrap().advances, 1);
}

#[tokio::test]
async fn going_offline_while_the_first_window_loads_keeps_it_paused() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("mix").await.unwrap();
    platform.network_monitor().set_online(false);
    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = player.snapshot().await.unwrap();
    assert!(snapshot.paused);
    assert_eq!(snapshot.phase, PlaylistPhase::Playing(0));
    let main = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_ne!(main.state(), EmbedState::Playing);
    assert_eq!(main.position(), 0.0);
    assert!(!player.playback_state().is_playing);
    assert_eq!(platform.recorder().count(ToastLevel::Warning), 1);

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
    assert_ne!(main.state(), EmbedState::Playing);

    platform.network_monitor().set_online(true);
    player.resume().await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Playing(1), Duration::from_secs(30)).await;
}

#[tokio::test]
async fn pausing_while_the_first_window_loads_keeps_it_paused() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("mix").await.unwrap();
    player.pause().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
    assert!(player.snapshot().await.unwrap().paused);
    let main = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_ne!(main.state(), EmbedState::Playing);
    assert_eq!(main.play_calls(), 0);

    player.resume().await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Playing(1), Duration::from_secs(30)).await;
    assert!(platform.recorder().toasts().is_empty());
}

#[tokio::test]
async fn starting_while_offline_waits_for_an_explicit_resume() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    platform.network_monitor().set_online(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    player.start("mix").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let snapshot = player.snapshot().await.unwrap();
    assert!(snapshot.paused);
    assert_eq!(snapshot.phase, PlaylistPhase::Playing(0));
    let main = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_eq!(main.play_calls(), 0);
    assert_eq!(platform.recorder().count(ToastLevel::Warning), 1);

    platform.network_monitor().set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(platform.recorder().count(ToastLevel::Info), 1);
    assert!(player.snapshot().await.unwrap().paused);

    player.resume().await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Playing(1), Duration::from_secs(30)).await;
}

#[tokio::test]
async fn offline_platform_at_construction_loads_paused() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    platform.network_monitor().set_online(false);
    let store = two_clip_store();
    let player = player(&platform, &store);

    player.start("mix").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(player.snapshot().await.unwrap().paused);
    let main = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_eq!(main.play_calls(), 0);
    // no transition was observed, so no warning either
    assert_eq!(platform.recorder().count(ToastLevel::Warning), 0);
}

#[tokio::test]
async fn each_offline_transition_warns_once() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    player.start("mix").await.unwrap();

    let network = platform.network_monitor();
    network.set_online(false);
    network.set_online(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    network.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    network.set_online(false);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(platform.recorder().count(ToastLevel::Warning), 2);
}

#[tokio::test]
async fn empty_sniplist_is_an_error_phase() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = MemoryStore::new();
    store.insert("empty", Vec::new());
    store.insert(
        "broken",
        vec![SnippetRecord::new("x", "v1", 9.0, 3.0, 0)],
    );
    let player = player(&platform, &store);

    assert!(matches!(player.start("empty").await, Err(Error::EmptyPlaylist)));
    assert_eq!(
        player.phase(),
        PlaylistPhase::Error(PlaylistError::EmptyPlaylist)
    );
    assert!(matches!(player.start("broken").await, Err(Error::EmptyPlaylist)));
    assert!(platform.runtime().players().is_empty());
    assert!(platform.recorder().toasts().is_empty());
}

#[tokio::test]
async fn data_access_failure_is_an_error_phase() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    store.set_failure(Some("backend down"));
    let player = player(&platform, &store);

    assert!(matches!(player.start("mix").await, Err(Error::DataAccess(_))));
    assert_eq!(
        player.phase(),
        PlaylistPhase::Error(PlaylistError::DataAccess("backend down".to_string()))
    );

    store.set_failure(None);
    assert_eq!(player.start("mix").await.unwrap(), 2);
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
}

#[tokio::test]
async fn backup_timer_skips_a_stuck_window() {
    tokio::time::pause();
    let runtime = SimulatedRuntime::with_behavior(SimBehavior {
        stuck_plays: 1,
        ..SimBehavior::default()
    });
    let platform = SimulatedPlatform::with_parts(runtime, StaticDevice::new());
    let store = MemoryStore::new();
    store.insert("stuck", clips(2, 10.0));
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("stuck").await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));

    // window length plus the desktop backup buffer
    wait_for(&mut phases, PlaylistPhase::Playing(1), Duration::from_secs(3)).await;
    let first = &platform.runtime().players_in("snipsync-player")[0];
    assert_eq!(first.position(), 0.0);
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(30)).await;
    assert_eq!(player.snapshot().await.unwrap().advances, 1);
}

#[tokio::test]
async fn backup_completion_stops_the_last_window() {
    tokio::time::pause();
    let runtime = SimulatedRuntime::with_behavior(SimBehavior {
        stuck_plays: 1,
        ..SimBehavior::default()
    });
    let platform = SimulatedPlatform::with_parts(runtime, StaticDevice::new());
    let store = MemoryStore::new();
    store.insert("one", clips(1, 5.0));
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("one").await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(30)).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!player.playback_state().is_playing);
    let main = platform.runtime().players_in("snipsync-player").pop().unwrap();
    assert_ne!(main.state(), EmbedState::Playing);
    assert_eq!(player.phase(), PlaylistPhase::Complete);
    assert_eq!(platform.recorder().count(ToastLevel::Success), 1);
}

#[tokio::test]
async fn unavailable_video_is_skipped() {
    tokio::time::pause();
    let mut codes = HashMap::new();
    codes.insert("v1".to_string(), 100);
    let runtime = SimulatedRuntime::with_behavior(SimBehavior {
        error_codes: codes,
        ..SimBehavior::default()
    });
    let platform = SimulatedPlatform::with_parts(runtime, StaticDevice::new());
    let store = MemoryStore::new();
    store.insert("mix", clips(3, 4.0));
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("mix").await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(60)).await;

    let toasts = platform.recorder().toasts();
    assert_eq!(platform.recorder().count(ToastLevel::Error), 1);
    assert!(toasts.iter().any(|t| t.message == "This video is unavailable."));
    assert_eq!(platform.recorder().count(ToastLevel::Success), 1);
    assert_eq!(player.snapshot().await.unwrap().advances, 2);
}

#[tokio::test]
async fn restart_plays_again_after_completion() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = MemoryStore::new();
    store.insert("short", clips(2, 2.0));
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("short").await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(30)).await;
    assert!(!player.next().await.unwrap());
    assert!(player.select(0).await.is_err());

    player.restart().await.unwrap();
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(30)).await;
    assert_eq!(platform.recorder().count(ToastLevel::Success), 2);
}

#[tokio::test]
async fn pause_holds_the_backup_timer() {
    tokio::time::pause();
    let runtime = SimulatedRuntime::with_behavior(SimBehavior {
        stuck_plays: 2,
        ..SimBehavior::default()
    });
    let platform = SimulatedPlatform::with_parts(runtime, StaticDevice::new());
    let store = MemoryStore::new();
    store.insert("stuck", clips(2, 10.0));
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("stuck").await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    player.pause().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));

    // about 5.5s of backup time were left when pausing
    player.resume().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(player.phase(), PlaylistPhase::Playing(0));
    wait_for(&mut phases, PlaylistPhase::Playing(1), Duration::from_secs(3)).await;
}

#[tokio::test]
async fn desktop_warms_the_next_window() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    player.start("mix").await.unwrap();

    tokio::time::sleep(Duration::from_secs(17)).await;
    let warm = platform.runtime().players_in("snipsync-preload");
    assert_eq!(warm.len(), 1);
    assert_eq!(warm[0].video_id(), "v2");
    assert!(warm[0].is_muted());
    assert_eq!(warm[0].seeks(), vec![5.0]);
    assert_eq!(warm[0].play_calls(), 0);
}

#[tokio::test]
async fn phones_skip_the_warm_player() {
    tokio::time::pause();
    let platform = SimulatedPlatform::mobile();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let mut phases = player.subscribe();

    player.start("mix").await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(60)).await;
    assert!(platform.runtime().players_in("snipsync-preload").is_empty());
}

#[tokio::test]
async fn resolved_titles_replace_fallbacks() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = MemoryStore::new();
    store.insert(
        "mix",
        vec![
            SnippetRecord::new("a", "v1", 65.0, 80.0, 0),
            SnippetRecord::new("b", "v2", 0.0, 10.0, 1).with_title("Chorus"),
        ],
    );
    let titles = StaticTitles::new().with("v1", "Song").with("v2", "Other");
    let player = PlaylistController::with_titles(
        &platform,
        Arc::new(store),
        Arc::new(titles),
        PlaybackConfig::default(),
    )
    .unwrap();

    player.start("mix").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(player.now_playing().await.unwrap().unwrap().display_title, "Song");
    player.next().await.unwrap();
    assert_eq!(player.now_playing().await.unwrap().unwrap().display_title, "Chorus");
}

#[tokio::test]
async fn close_tears_everything_down() {
    tokio::time::pause();
    let platform = SimulatedPlatform::new();
    let store = two_clip_store();
    let player = player(&platform, &store);
    let phases = player.subscribe();
    player.start("mix").await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    player.close().await.unwrap();
    assert_eq!(*phases.borrow(), PlaylistPhase::Idle);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(platform.runtime().players().iter().all(|p| p.is_destroyed()));
    assert!(platform.recorder().toasts().is_empty());
}

#[tokio::test]
async fn end_signals_racing_the_backup_timer_advance_once() {
    tokio::time::pause();
    let runtime = SimulatedRuntime::with_behavior(SimBehavior {
        video_duration: 8.0,
        ..SimBehavior::default()
    });
    let platform = SimulatedPlatform::with_parts(runtime, StaticDevice::new());
    let store = MemoryStore::new();
    store.insert("race", clips(2, 8.0));
    let mut config = PlaybackConfig::default();
    // backup, native end and the poller all land within a second of each other
    config.playlist.backup_buffer_ms = 800;
    let player = PlaylistController::new(&platform, Arc::new(store), config).unwrap();
    let mut phases = player.subscribe();

    player.start("race").await.unwrap();
    wait_for(&mut phases, PlaylistPhase::Complete, Duration::from_secs(30)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(player.snapshot().await.unwrap().advances, 1);
    assert_eq!(platform.runtime().players_in("snipsync-player").len(), 2);
    assert_eq!(platform.recorder().count(ToastLevel::Success), 1);
}
