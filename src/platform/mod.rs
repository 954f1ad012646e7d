//! Platform surface: embed runtime, device class, network status, notifications
//!
//! The playback core drives these traits and never implements them itself.
//! [`SimulatedPlatform`] bundles deterministic in-process implementations used
//! by the tests and the CLI.

pub mod device;
pub mod media;
pub mod network;
pub mod notify;

use std::sync::Arc;

pub use device::{DeviceClass, DeviceEmulation, DeviceMetrics, StaticDevice};
pub use media::{
    EmbedCall, EmbedCallError, EmbedPlayer, EmbedRuntime, EmbedState, PlayerEvent,
    PlayerEventSink, PlayerOptions, SimBehavior, SimulatedPlayerHandle, SimulatedRuntime,
};
pub use network::NetworkMonitor;
pub use notify::{LogNotifier, Notifier, RecordingNotifier, Toast, ToastLevel};

use crate::probe::CapabilityProbe;

/// Everything a sniplist player needs from its host page.
pub trait PlatformApi: Send + Sync {
    fn embed_runtime(&self) -> Arc<dyn EmbedRuntime>;

    /// Readiness of `embed_runtime`, shared by every consumer on the page
    fn capability_probe(&self) -> CapabilityProbe;

    fn device_emulation(&self) -> Arc<dyn DeviceEmulation>;

    fn network(&self) -> NetworkMonitor;

    fn notifier(&self) -> Arc<dyn Notifier>;

    fn device_class(&self) -> DeviceClass {
        self.device_emulation().device_class()
    }
}

/// In-process platform backed by [`SimulatedRuntime`].
pub struct SimulatedPlatform {
    runtime: SimulatedRuntime,
    probe: CapabilityProbe,
    device: Arc<StaticDevice>,
    network: NetworkMonitor,
    recorder: Arc<RecordingNotifier>,
    notifier: Arc<dyn Notifier>,
}

impl SimulatedPlatform {
    /// Desktop platform with default simulated behavior
    pub fn new() -> Self {
        Self::with_parts(SimulatedRuntime::new(), StaticDevice::new())
    }

    /// Phone platform with default simulated behavior
    pub fn mobile() -> Self {
        Self::with_parts(SimulatedRuntime::new(), StaticDevice::phone())
    }

    pub fn with_parts(runtime: SimulatedRuntime, device: StaticDevice) -> Self {
        let shared: Arc<dyn EmbedRuntime> = Arc::new(runtime.clone());
        let recorder = Arc::new(RecordingNotifier::new());
        SimulatedPlatform {
            probe: CapabilityProbe::new(shared),
            runtime,
            device: Arc::new(device),
            network: NetworkMonitor::new(),
            notifier: recorder.clone(),
            recorder,
        }
    }

    /// Route toasts somewhere other than the in-memory recorder
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn runtime(&self) -> &SimulatedRuntime {
        &self.runtime
    }

    /// Toasts recorded so far (empty when a custom notifier is installed)
    pub fn recorder(&self) -> &RecordingNotifier {
        &self.recorder
    }

    pub fn network_monitor(&self) -> &NetworkMonitor {
        &self.network
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformApi for SimulatedPlatform {
    fn embed_runtime(&self) -> Arc<dyn EmbedRuntime> {
        Arc::new(self.runtime.clone())
    }

    fn capability_probe(&self) -> CapabilityProbe {
        self.probe.clone()
    }

    fn device_emulation(&self) -> Arc<dyn DeviceEmulation> {
        self.device.clone()
    }

    fn network(&self) -> NetworkMonitor {
        self.network.clone()
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_platform_provides_surfaces() {
        let p = SimulatedPlatform::new();
        assert_eq!(p.device_class(), DeviceClass::Desktop);
        assert!(p.network().is_online());
        assert!(!p.capability_probe().is_ready());

        p.notifier().info("hello");
        assert_eq!(p.recorder().count(ToastLevel::Info), 1);

        let m = SimulatedPlatform::mobile();
        assert_eq!(m.device_class(), DeviceClass::Mobile);
    }
}
