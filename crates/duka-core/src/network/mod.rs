//! Connectivity observation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::remote::RemoteApi;

/// Shared online/offline flag fed by the host's connectivity callbacks or by a probe.
///
/// Clones observe the same flag. Subscribers are only woken on transitions.
#[derive(Clone)]
pub struct NetworkMonitor {
    online: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self {
            online: Arc::new(online),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record a connectivity change; returns `true` if this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Network connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Poll `remote.ping()` every `interval` and feed the result into the monitor.
    ///
    /// The probe runs until the returned handle is aborted.
    pub fn spawn_probe<R: RemoteApi>(&self, remote: Arc<R>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = match tokio::time::timeout(interval, remote.ping()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(error)) => {
                        tracing::debug!("Reachability probe failed: {error}");
                        false
                    }
                    Err(_) => false,
                };
                monitor.set_online(reachable);
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;

    #[test]
    fn set_online_reports_transitions_only() {
        let monitor = NetworkMonitor::new(false);
        assert!(!monitor.is_online());
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_see_transitions() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();
        monitor.clone().set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_tracks_remote_reachability() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_reachable(false);
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();

        let probe = monitor.spawn_probe(Arc::clone(&remote), Duration::from_millis(10));
        rx.changed().await.unwrap();
        assert!(!monitor.is_online());

        remote.set_reachable(true);
        rx.changed().await.unwrap();
        assert!(monitor.is_online());
        probe.abort();
    }
}
