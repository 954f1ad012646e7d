use std::sync::Arc;
use std::time::Duration;

use snipsync::platform::{
    DeviceEmulation, DeviceMetrics, EmbedRuntime, PlatformApi, PlayerEvent, PlayerOptions,
    SimulatedPlatform, ToastLevel,
};
use snipsync::{CapabilityProbe, DeviceClass, PlayerSession};

#[test]
fn platform_simulated_smoke() {
    let p = SimulatedPlatform::new();
    assert_eq!(p.device_class(), DeviceClass::Desktop);

    // device
    let d = p.device_emulation();
    assert_eq!(d.metrics().width, 1280);
    d.set_metrics(DeviceMetrics {
        width: 360,
        height: 640,
        dpr: 3.0,
        touch: true,
    });
    assert_eq!(p.device_class(), DeviceClass::Mobile);

    // toasts
    p.notifier().warning("careful");
    assert_eq!(p.recorder().count(ToastLevel::Warning), 1);

    // network
    let net = p.network();
    assert!(net.is_online());
    assert!(net.set_online(false));
    assert!(!p.network_monitor().is_online());
}

#[test]
fn phone_platform_is_mobile() {
    assert_eq!(SimulatedPlatform::mobile().device_class(), DeviceClass::Mobile);
}

#[tokio::test]
async fn probe_then_session_over_the_simulated_runtime() {
    tokio::time::pause();
    let p = SimulatedPlatform::new();
    let probe: CapabilityProbe = p.capability_probe();
    assert!(!probe.is_ready());

    tokio::time::timeout(Duration::from_secs(1), probe.ready())
        .await
        .expect("runtime loads");
    assert!(probe.is_ready());
    assert_eq!(p.runtime().inject_calls(), 1);

    let runtime: Arc<dyn EmbedRuntime> = p.embed_runtime();
    let (session, mut events) =
        PlayerSession::create(&*runtime, "box", PlayerOptions::new("v1", 3.0)).unwrap();
    assert_eq!(events.recv().await, Some(PlayerEvent::Ready));
    assert_eq!(session.current_time(), Some(3.0));
    assert!(session.play());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let t = session.current_time().unwrap();
    assert!(t >= 5.0 && t < 5.1, "at {}", t);

    session.destroy();
    assert!(session.is_destroyed());
    assert_eq!(session.current_time(), None);
}
