//! Capability probe: resolves once the embed runtime is callable.
//!
//! One probe per page session. The first `ready()` injects the runtime script
//! and starts polling; every later caller awaits the same shared future. The
//! probe polls instead of trusting the provider's ready callback because that
//! callback is dropped silently when another consumer registered one first.
//!
//! If the script never loads, `ready()` never resolves. Callers that need a
//! hard failure wrap it in their own timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};

use crate::platform::EmbedRuntime;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SLOW_LOAD_WARNING: Duration = Duration::from_secs(10);

static GLOBAL_PROBE: OnceLock<CapabilityProbe> = OnceLock::new();

type ReadyFuture = Shared<BoxFuture<'static, ()>>;

/// Cloneable handle to one runtime's readiness
#[derive(Clone)]
pub struct CapabilityProbe {
    inner: Arc<ProbeInner>,
}

struct ProbeInner {
    runtime: Arc<dyn EmbedRuntime>,
    poll_interval: Duration,
    ready: OnceLock<ReadyFuture>,
    resolved: Arc<AtomicBool>,
}

impl CapabilityProbe {
    pub fn new(runtime: Arc<dyn EmbedRuntime>) -> Self {
        Self::with_poll_interval(runtime, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(runtime: Arc<dyn EmbedRuntime>, poll_interval: Duration) -> Self {
        CapabilityProbe {
            inner: Arc::new(ProbeInner {
                runtime,
                poll_interval,
                ready: OnceLock::new(),
                resolved: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Process-wide probe. The first caller's runtime wins; later callers get
    /// the same probe whatever runtime they pass.
    pub fn global(runtime: Arc<dyn EmbedRuntime>) -> Self {
        GLOBAL_PROBE
            .get_or_init(|| CapabilityProbe::new(runtime))
            .clone()
    }

    /// The runtime this probe watches
    pub fn runtime(&self) -> Arc<dyn EmbedRuntime> {
        self.inner.runtime.clone()
    }

    /// Whether `ready()` has resolved
    pub fn is_ready(&self) -> bool {
        self.inner.resolved.load(Ordering::Acquire)
    }

    /// Resolves once the runtime is callable.
    pub fn ready(&self) -> ReadyFuture {
        self.inner
            .ready
            .get_or_init(|| {
                let runtime = self.inner.runtime.clone();
                let resolved = self.inner.resolved.clone();
                let poll = self.inner.poll_interval;
                debug!("injecting embed runtime");
                runtime.inject();
                async move {
                    let started = tokio::time::Instant::now();
                    let mut warned = false;
                    while !runtime.is_callable() {
                        if !warned && started.elapsed() >= SLOW_LOAD_WARNING {
                            warn!(
                                "embed runtime still not callable after {:?}",
                                SLOW_LOAD_WARNING
                            );
                            warned = true;
                        }
                        tokio::time::sleep(poll).await;
                    }
                    resolved.store(true, Ordering::Release);
                    info!("embed runtime ready after {:?}", started.elapsed());
                }
                .boxed()
                .shared()
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{SimBehavior, SimulatedRuntime};

    #[tokio::test]
    async fn concurrent_consumers_share_one_load() {
        tokio::time::pause();
        let rt = SimulatedRuntime::with_behavior(SimBehavior {
            load_delay: Duration::from_millis(350),
            ..SimBehavior::default()
        });
        let probe = CapabilityProbe::new(Arc::new(rt.clone()));

        let a = tokio::spawn(probe.ready());
        let b = tokio::spawn(probe.ready());
        let c = probe.clone();
        let d = tokio::spawn(async move { c.ready().await });

        a.await.unwrap();
        b.await.unwrap();
        d.await.unwrap();

        assert!(probe.is_ready());
        assert_eq!(rt.inject_calls(), 1);
    }

    #[tokio::test]
    async fn global_probe_is_shared_and_keeps_the_first_runtime() {
        tokio::time::pause();
        let first = SimulatedRuntime::new();
        let second = SimulatedRuntime::new();

        let a = CapabilityProbe::global(Arc::new(first.clone()));
        let b = CapabilityProbe::global(Arc::new(second.clone()));
        assert!(Arc::ptr_eq(&a.inner, &b.inner));

        b.ready().await;
        assert!(a.is_ready());
        assert_eq!(first.inject_calls(), 1);
        assert_eq!(second.inject_calls(), 0);
    }

    #[tokio::test]
    async fn never_loading_runtime_stays_pending() {
        tokio::time::pause();
        let rt = SimulatedRuntime::with_behavior(SimBehavior {
            never_loads: true,
            ..SimBehavior::default()
        });
        let probe = CapabilityProbe::new(Arc::new(rt));

        let res = tokio::time::timeout(Duration::from_secs(30), probe.ready()).await;
        assert!(res.is_err());
        assert!(!probe.is_ready());
    }

    #[tokio::test]
    async fn ready_after_resolution_is_immediate() {
        tokio::time::pause();
        let rt = SimulatedRuntime::new();
        let probe = CapabilityProbe::new(Arc::new(rt));
        probe.ready().await;

        let before = tokio::time::Instant::now();
        probe.ready().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
