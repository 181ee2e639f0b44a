// src/core/connectivity.rs
//! Backend reachability signal shared by every component that talks to the API

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::info;

use super::observable::{Observable, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Reachable => "reachable",
            ConnectionStatus::Unreachable => "unreachable",
        };
        f.write_str(label)
    }
}

/// Owned by whoever builds the client tree and cloned into the parts that need it.
/// Each instance is independent; nothing here is process-global.
#[derive(Clone)]
pub struct ConnectivitySignal {
    status: Observable<ConnectionStatus>,
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivitySignal {
    pub fn new() -> Self {
        Self {
            status: Observable::new(ConnectionStatus::Unknown),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.watch()
    }

    pub(crate) fn mark_reachable(&self) {
        if self.status.set(ConnectionStatus::Reachable) {
            info!("Backend reachable");
        }
    }

    pub(crate) fn mark_unreachable(&self) {
        if self.status.set(ConnectionStatus::Unreachable) {
            info!("Backend unreachable");
        }
    }
}

/// Text for the dismissible offline banner, or `None` when nothing should show.
pub fn banner_message(status: ConnectionStatus) -> Option<&'static str> {
    match status {
        ConnectionStatus::Unreachable => {
            Some("Backend not connected. Some features may be unavailable.")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_starts_unknown() {
        let signal = ConnectivitySignal::new();
        assert_eq!(signal.status(), ConnectionStatus::Unknown);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = ConnectivitySignal::new();
        let b = ConnectivitySignal::new();
        a.mark_unreachable();
        assert_eq!(a.status(), ConnectionStatus::Unreachable);
        assert_eq!(b.status(), ConnectionStatus::Unknown);
    }

    #[test]
    fn test_subscribers_see_transitions_once() {
        let signal = ConnectivitySignal::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = signal.subscribe(move |s| sink.lock().unwrap().push(*s));

        signal.mark_reachable();
        signal.mark_reachable();
        signal.mark_unreachable();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Unknown,
                ConnectionStatus::Reachable,
                ConnectionStatus::Unreachable
            ]
        );
    }

    #[test]
    fn test_banner_only_when_unreachable() {
        assert!(banner_message(ConnectionStatus::Unreachable).is_some());
        assert!(banner_message(ConnectionStatus::Reachable).is_none());
        assert!(banner_message(ConnectionStatus::Unknown).is_none());
    }
}
