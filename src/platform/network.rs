//! Online/offline relay. Observers get one notification per transition.
use tokio::sync::watch;

#[derive(Clone)]
pub struct NetworkMonitor {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// A monitor that starts online
    pub fn new() -> Self {
        Self::with_status(true)
    }

    pub fn with_status(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        NetworkMonitor {
            tx: std::sync::Arc::new(tx),
        }
    }

    /// Report the current connectivity. Repeating the current value is not a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            log::info!("network is now {}", if online { "online" } else { "offline" });
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_transitions_are_relayed() {
        let monitor = NetworkMonitor::new();
        let mut rx = monitor.subscribe();
        assert!(monitor.is_online());

        assert!(!monitor.set_online(true));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_online(false));
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());

        assert!(!monitor.set_online(false));
        assert!(!rx.has_changed().unwrap());
    }
}
