//! Device form factor detection. Picks the playback strategy once, at construction time.
use serde::{Deserialize, Serialize};

use crate::lock;

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMetrics {
    pub width: u32,
    pub height: u32,
    pub dpr: f32,
    pub touch: bool,
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        DeviceMetrics {
            width: 1280,
            height: 720,
            dpr: 1.0,
            touch: false,
        }
    }
}

/// Broad device class the playback engine tunes itself for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

// User agent fragments of handsets and tablets whose embeds restrict autoplay
const MOBILE_UA_TOKENS: &[&str] = &["Mobi", "Android", "iPhone", "iPad", "iPod"];

// Touch screens at most this wide are treated as handheld
const HANDHELD_MAX_WIDTH: u32 = 1024;

impl DeviceClass {
    /// Classify from viewport metrics and, when known, the user agent.
    pub fn detect(metrics: &DeviceMetrics, user_agent: Option<&str>) -> Self {
        if let Some(ua) = user_agent {
            if MOBILE_UA_TOKENS.iter().any(|t| ua.contains(t)) {
                return DeviceClass::Mobile;
            }
        }
        if metrics.touch && metrics.width.min(metrics.height) <= HANDHELD_MAX_WIDTH {
            return DeviceClass::Mobile;
        }
        DeviceClass::Desktop
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, DeviceClass::Mobile)
    }
}

pub trait DeviceEmulation: Send + Sync {
    fn set_metrics(&self, m: DeviceMetrics);
    fn metrics(&self) -> DeviceMetrics;

    fn user_agent(&self) -> Option<String> {
        None
    }

    fn device_class(&self) -> DeviceClass {
        DeviceClass::detect(&self.metrics(), self.user_agent().as_deref())
    }
}

/// Fixed metrics kept in memory; what the simulated platform reports
pub struct StaticDevice {
    metrics: std::sync::Mutex<DeviceMetrics>,
    user_agent: Option<String>,
}

impl StaticDevice {
    pub fn new() -> Self {
        StaticDevice {
            metrics: std::sync::Mutex::new(DeviceMetrics::default()),
            user_agent: None,
        }
    }

    /// A phone-sized touch screen
    pub fn phone() -> Self {
        StaticDevice {
            metrics: std::sync::Mutex::new(DeviceMetrics {
                width: 390,
                height: 844,
                dpr: 3.0,
                touch: true,
            }),
            user_agent: Some(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148".to_string(),
            ),
        }
    }

    pub fn with_user_agent(mut self, ua: &str) -> Self {
        self.user_agent = Some(ua.to_string());
        self
    }
}

impl Default for StaticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEmulation for StaticDevice {
    fn set_metrics(&self, m: DeviceMetrics) {
        *lock(&self.metrics) = m;
    }

    fn metrics(&self) -> DeviceMetrics {
        lock(&self.metrics).clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }
}
