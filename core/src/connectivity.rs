use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Current online/offline signal. Cloning shares the same signal.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report the runtime's network status. Returns `true` only when this is
    /// a transition; repeated reports of the same status are ignored.
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
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Receiver that wakes on every transition.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_only() {
        let conn = Connectivity::new(true);
        let mut rx = conn.watch();
        assert!(conn.is_online());

        assert!(!conn.set_online(true));
        assert!(!rx.has_changed().unwrap());

        assert!(conn.set_online(false));
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!conn.clone().is_online());
    }
}
