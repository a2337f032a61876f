// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Online/offline state fed by platform connectivity events.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A platform notification about network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityEvent {
    /// The network became reachable.
    Online,
    /// The network became unreachable.
    Offline,
}

/// The current reachability as seen by a [`ConnectivityMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionState {
    is_online: bool,
}

impl ConnectionState {
    /// Whether the network is reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.is_online
    }
}

/// Tracks whether the data source is reachable.
///
/// The state only changes through [`apply`](Self::apply) or an event stream handed to
/// [`listen`](Self::listen). Cloning is cheap and clones observe the same state.
///
/// # Examples
///
/// ```
/// use steadfast::{ConnectivityEvent, ConnectivityMonitor};
///
/// let monitor = ConnectivityMonitor::new();
/// assert!(monitor.is_online());
///
/// monitor.apply(ConnectivityEvent::Offline);
/// assert!(!monitor.is_online());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor that starts online.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(true)
    }

    /// Creates a monitor with the given initial reachability.
    #[must_use]
    pub fn with_state(is_online: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState { is_online });
        Self { state: Arc::new(state) }
    }

    /// Whether the network is currently reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    /// Records a platform event. Subscribers are only woken when the state changes.
    pub fn apply(&self, event: ConnectivityEvent) {
        let is_online = event == ConnectivityEvent::Online;

        let changed = self.state.send_if_modified(|state| {
            if state.is_online == is_online {
                return false;
            }
            state.is_online = is_online;
            true
        });

        if changed {
            if is_online {
                tracing::info!(connectivity.online = true, "connectivity restored");
            } else {
                tracing::warn!(connectivity.online = false, "connectivity lost");
            }
        }
    }

    /// Spawns a task applying every event from `events` until the stream ends.
    pub fn listen<S>(&self, events: S) -> JoinHandle<()>
    where
        S: Stream<Item = ConnectivityEvent> + Send + 'static,
    {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                monitor.apply(event);
            }
        })
    }

    /// A receiver observing every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once the network is reachable.
    pub async fn wait_until_online(&self) {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = receiver.wait_for(ConnectionState::is_online).await;
    }
}
