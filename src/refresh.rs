//! Coalescing of change-feed bursts into single reconciling fetches, and the
//! blocking-spinner state for user-initiated loads.

use crate::bus::{Bus, SyncEvent};
use crate::logging;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(15);

/// Trailing-edge debouncer: every `schedule` call restarts the window, and
/// the most recent fetch runs once the window passes without another call.
///
/// A fetch that already started is never cancelled by a later `schedule`;
/// that call simply opens a new window.
#[derive(Clone)]
pub struct RefreshScheduler {
    delay: Duration,
    state: Arc<Mutex<Pending>>,
}

#[derive(Default)]
struct Pending {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl RefreshScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule<F, Fut>(&self, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + self.delay;
        let mut pending = lock(&self.state);
        pending.generation += 1;
        let generation = pending.generation;
        if let Some(previous) = pending.handle.take() {
            previous.abort();
        }

        let state = Arc::clone(&self.state);
        pending.handle = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut pending = lock(&state);
                if pending.generation != generation {
                    return;
                }
                // Fired: from here on a new schedule must not abort us.
                pending.handle = None;
            }
            fetch().await;
        }));
    }

    /// Drop the pending window, if any. A fetch already running is unaffected.
    pub fn cancel(&self) {
        let mut pending = lock(&self.state);
        pending.generation += 1;
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).handle.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// User-initiated; shows the blocking spinner, bounded by the watchdog
    Foreground,
    /// Triggered by events or after a write; never touches the spinner
    Background,
}

/// Blocking-spinner state. Overlapping foreground loads keep it on until the
/// last one finishes or is abandoned by the watchdog.
#[derive(Clone)]
pub struct LoadingGate {
    watchdog: Duration,
    active: Arc<Mutex<usize>>,
    tx: Arc<watch::Sender<bool>>,
    bus: Bus,
}

impl LoadingGate {
    pub fn new(watchdog: Duration, bus: Bus) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            watchdog,
            active: Arc::new(Mutex::new(0)),
            tx: Arc::new(tx),
            bus,
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Run `fut` in the given mode. In foreground mode the future is
    /// abandoned after the watchdog delay and `None` is returned.
    pub async fn run<T, Fut>(&self, mode: RefreshMode, label: &str, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = T>,
    {
        match mode {
            RefreshMode::Background => Some(fut.await),
            RefreshMode::Foreground => {
                let _guard = SpinnerGuard::enter(self);
                match tokio::time::timeout(self.watchdog, fut).await {
                    Ok(value) => Some(value),
                    Err(_) => {
                        logging::warn(&format!(
                            "{} still running after {}ms; releasing spinner",
                            label,
                            self.watchdog.as_millis()
                        ));
                        None
                    }
                }
            }
        }
    }

    fn adjust(&self, delta: isize) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = active.saturating_add_signed(delta);
        let loading = *active > 0;
        if *self.tx.borrow() != loading {
            self.tx.send_replace(loading);
            self.bus.publish(SyncEvent::Loading(loading));
        }
    }
}

/// Turns the spinner off even if the foreground future is dropped early.
struct SpinnerGuard<'a> {
    gate: &'a LoadingGate,
}

impl<'a> SpinnerGuard<'a> {
    fn enter(gate: &'a LoadingGate) -> Self {
        gate.adjust(1);
        Self { gate }
    }
}

impl Drop for SpinnerGuard<'_> {
    fn drop(&mut self) {
        self.gate.adjust(-1);
    }
}
