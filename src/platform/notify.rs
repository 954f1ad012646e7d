//! User-facing toast channel

use serde::{Deserialize, Serialize};

use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToastLevel {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    pub fn new(level: ToastLevel, message: &str) -> Self {
        Toast {
            level,
            message: message.to_string(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);

    fn success(&self, message: &str) {
        self.notify(Toast::new(ToastLevel::Success, message));
    }

    fn info(&self, message: &str) {
        self.notify(Toast::new(ToastLevel::Info, message));
    }

    fn warning(&self, message: &str) {
        self.notify(Toast::new(ToastLevel::Warning, message));
    }

    fn error(&self, message: &str) {
        self.notify(Toast::new(ToastLevel::Error, message));
    }
}

/// Writes toasts to the log
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        LogNotifier
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, toast: Toast) {
        match toast.level {
            ToastLevel::Error => log::error!("[toast] {}", toast.message),
            ToastLevel::Warning => log::warn!("[toast] {}", toast.message),
            _ => log::info!("[toast] {}", toast.message),
        }
    }
}

/// Keeps every toast in memory
#[derive(Default)]
pub struct RecordingNotifier {
    toasts: std::sync::Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        lock(&self.toasts).clone()
    }

    pub fn count(&self, level: ToastLevel) -> usize {
        lock(&self.toasts).iter().filter(|t| t.level == level).count()
    }

    pub fn clear(&self) {
        lock(&self.toasts).clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, toast: Toast) {
        log::debug!("recorded toast {:?}: {}", toast.level, toast.message);
        lock(&self.toasts).push(toast);
    }
}
