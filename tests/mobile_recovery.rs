use std::sync::{Arc, Mutex};
use std::time::Duration;

use snipsync::platform::{
    EmbedState, SimBehavior, SimulatedPlatform, SimulatedPlayerHandle, SimulatedRuntime,
    StaticDevice,
};
use snipsync::{DeviceClass, PlaybackConfig, PlaybackError, Window, WindowController, WindowEnd};

fn phone(behavior: SimBehavior) -> (SimulatedPlatform, WindowController) {
    let platform = SimulatedPlatform::with_parts(
        SimulatedRuntime::with_behavior(behavior),
        StaticDevice::phone(),
    );
    let ctrl = WindowController::new(&platform, PlaybackConfig::for_device(DeviceClass::Mobile));
    (platform, ctrl)
}

fn player(platform: &SimulatedPlatform) -> SimulatedPlayerHandle {
    platform
        .runtime()
        .players_in("snipsync-player")
        .pop()
        .expect("a player was mounted")
}

fn record_ends(ctrl: &WindowController) -> Arc<Mutex<Vec<WindowEnd>>> {
    let ends = Arc::new(Mutex::new(Vec::new()));
    let sink = ends.clone();
    ctrl.on_ended(move |end: &WindowEnd| sink.lock().unwrap().push(end.clone()));
    ends
}

#[tokio::test]
async fn phones_get_the_mobile_strategy() {
    let (_platform, ctrl) = phone(SimBehavior::default());
    assert_eq!(ctrl.strategy_name(), "mobile");
    assert_eq!(ctrl.config().retry.max_attempts, 8);
}

#[tokio::test]
async fn stuck_at_start_is_forced_back_to_the_window_start() {
    tokio::time::pause();
    let (platform, ctrl) = phone(SimBehavior {
        stuck_plays: 1,
        ..SimBehavior::default()
    });
    let ends = record_ends(&ctrl);
    ctrl.load(Window::new("v1", 10.0, 40.0, "").unwrap()).await.unwrap();
    ctrl.play().await.unwrap();

    let p = player(&platform);
    assert_eq!(p.state(), EmbedState::Playing);
    assert_eq!(p.position(), 10.0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let seeks = p.seeks();
    assert!(seeks.len() >= 2, "seeks: {:?}", seeks);
    assert!(seeks.iter().all(|s| *s == 10.0));
    assert!(p.position() > 10.5, "still stuck at {}", p.position());
    assert!(platform.recorder().toasts().is_empty());

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(ends.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn longer_retry_budget_on_phones() {
    tokio::time::pause();
    let (platform, ctrl) = phone(SimBehavior {
        fail_plays: 5,
        ..SimBehavior::default()
    });
    ctrl.load(Window::new("v1", 0.0, 30.0, "").unwrap()).await.unwrap();
    ctrl.play().await.unwrap();

    assert_eq!(player(&platform).play_calls(), 6);
    assert!(platform.recorder().toasts().is_empty());
}

#[tokio::test]
async fn repeated_stalls_end_with_a_tap_to_play_toast() {
    tokio::time::pause();
    let (platform, ctrl) = phone(SimBehavior::default());
    let ends = record_ends(&ctrl);
    ctrl.load(Window::new("v1", 10.0, 70.0, "").unwrap()).await.unwrap();
    ctrl.play().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    platform.runtime().update(|b| b.ignore_plays = 100);
    player(&platform).interrupt();
    tokio::time::sleep(Duration::from_secs(15)).await;

    let state = ctrl.state();
    assert_eq!(state.error, Some(PlaybackError::Stalled));
    assert!(!state.is_playing);
    let toasts = platform.recorder().toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].message, "Playback stalled. Tap play again.");
    // the sequence's play plus the five recoveries
    assert_eq!(player(&platform).play_calls(), 6);
    assert!(ends.lock().unwrap().is_empty());
}

#[tokio::test]
async fn buffering_is_not_mistaken_for_a_stall() {
    tokio::time::pause();
    let (platform, ctrl) = phone(SimBehavior {
        buffering: Duration::from_secs(2),
        ..SimBehavior::default()
    });
    let ends = record_ends(&ctrl);
    ctrl.load(Window::new("v1", 0.0, 20.0, "").unwrap()).await.unwrap();
    ctrl.play().await.unwrap();
    assert!(ctrl.state().is_buffering);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(player(&platform).play_calls(), 1);
    assert_eq!(ends.lock().unwrap().len(), 1);
    assert!(platform.recorder().toasts().is_empty());
}
