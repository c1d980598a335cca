//! Debounced online/offline tracking.
//!
//! Raw reachability signals arrive by push ([`ConnectivityMonitor::report`])
//! or from a periodic [`ReachabilityProbe`]. A signal that differs from
//! the committed state must hold for `min_dwell` before it is committed;
//! shorter flaps are ignored. Committed changes are published on a
//! `watch` channel, so each subscriber sees every edge once.

use crate::config::ConnectivityConfig;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Committed reachability of the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connectivity {
    /// The remote service is reachable.
    Online,
    /// The remote service is not reachable.
    Offline,
}

impl Connectivity {
    /// Maps a raw reachability signal.
    #[must_use]
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    /// Returns true when online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self == Connectivity::Online
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

/// Active check of whether the remote system can be reached.
pub trait ReachabilityProbe: Send + Sync + 'static {
    /// Returns true if the remote system answered.
    fn probe(&self) -> impl Future<Output = bool> + Send;
}

/// Stand-in for monitors without a probe.
struct NoProbe;

impl ReachabilityProbe for NoProbe {
    async fn probe(&self) -> bool {
        false
    }
}

/// Tracks connectivity and publishes debounced transitions.
///
/// Must be created inside a tokio runtime; the debounce loop runs as a
/// spawned task until [`ConnectivityMonitor::shutdown`] or drop.
pub struct ConnectivityMonitor {
    signals: mpsc::UnboundedSender<bool>,
    state: watch::Receiver<Connectivity>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// Starts a monitor fed only by [`Self::report`].
    pub fn spawn(initial: Connectivity, config: ConnectivityConfig) -> Arc<Self> {
        Self::start(initial, config, Arc::new(NoProbe), false)
    }

    /// Starts a monitor that also polls `probe` every
    /// `config.probe_interval`, starting immediately.
    pub fn spawn_with_probe<P: ReachabilityProbe>(
        initial: Connectivity,
        config: ConnectivityConfig,
        probe: Arc<P>,
    ) -> Arc<Self> {
        Self::start(initial, config, probe, true)
    }

    fn start<P: ReachabilityProbe>(
        initial: Connectivity,
        config: ConnectivityConfig,
        probe: Arc<P>,
        probing: bool,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let task = tokio::spawn(debounce_loop(signal_rx, state_tx, config, probe, probing));

        Arc::new(Self {
            signals: signal_tx,
            state: state_rx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Feeds a raw reachability observation.
    pub fn report(&self, reachable: bool) {
        let _ = self.signals.send(reachable);
    }

    /// Returns the committed state.
    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// Returns true if the committed state is online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Returns a receiver of committed states.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.clone()
    }

    /// Stops the debounce loop. The committed state stays readable.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn debounce_loop<P: ReachabilityProbe>(
    mut signals: mpsc::UnboundedReceiver<bool>,
    state: watch::Sender<Connectivity>,
    config: ConnectivityConfig,
    probe: Arc<P>,
    probing: bool,
) {
    let period = config
        .probe_interval
        .max(ConnectivityConfig::MIN_PROBE_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // A differing observation and when it was first seen.
    let mut candidate: Option<(Connectivity, Instant)> = None;

    loop {
        let deadline = candidate.map(|(_, since)| since + config.min_dwell);

        let observed = tokio::select! {
            signal = signals.recv() => match signal {
                Some(reachable) => Connectivity::from_reachable(reachable),
                None => break,
            },
            _ = ticker.tick(), if probing => {
                Connectivity::from_reachable(probe.probe().await)
            },
            _ = sleep_until(deadline), if deadline.is_some() => {
                if let Some((next, _)) = candidate.take() {
                    state.send_replace(next);
                    tracing::info!(state = %next, "connectivity changed");
                }
                continue;
            },
        };

        if observed == *state.borrow() {
            if candidate.take().is_some() {
                tracing::debug!(state = %observed, "connectivity flap ignored");
            }
        } else if candidate.map(|(c, _)| c) != Some(observed) {
            candidate = Some((observed, Instant::now()));
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn config() -> ConnectivityConfig {
        ConnectivityConfig::default().with_min_dwell(Duration::from_secs(2))
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn change_commits_after_dwell() {
        let monitor = ConnectivityMonitor::spawn(Connectivity::Offline, config());
        let mut rx = monitor.subscribe();

        monitor.report(true);
        settle().await;
        tokio::time::advance(Duration::from_millis(1_900)).await;
        settle().await;
        assert_eq!(monitor.current(), Connectivity::Offline);

        tokio::time::advance(Duration::from_millis(200)).await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn short_flap_is_ignored() {
        let monitor = ConnectivityMonitor::spawn(Connectivity::Online, config());
        let rx = monitor.subscribe();

        monitor.report(false);
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        monitor.report(true);
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(monitor.current(), Connectivity::Online);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signal_does_not_restart_dwell() {
        let monitor = ConnectivityMonitor::spawn(Connectivity::Online, config());

        monitor.report(false);
        settle().await;
        tokio::time::advance(Duration::from_millis(1_500)).await;
        monitor.report(false);
        settle().await;
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;

        assert_eq!(monitor.current(), Connectivity::Offline);
    }

    struct FlagProbe(AtomicBool);

    impl ReachabilityProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_drives_state() {
        let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
        let config = config().with_probe_interval(Duration::from_secs(20));
        let monitor =
            ConnectivityMonitor::spawn_with_probe(Connectivity::Offline, config, probe.clone());
        let mut rx = monitor.subscribe();

        // First probe runs at once; the change commits after the dwell.
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);

        probe.0.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_keeps_last_state() {
        let monitor = ConnectivityMonitor::spawn(Connectivity::Online, config());
        monitor.shutdown();
        monitor.report(false);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(monitor.current(), Connectivity::Online);
    }
}
