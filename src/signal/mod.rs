//! `SignalBus`: a process-wide, priority-ordered OS signal dispatcher.
//!
//! A single background thread blocks on [`signal_hook::iterator::Signals`]
//! (which owns the actual async-signal-safe self-pipe handler) and only
//! records receipt statistics and enqueues the signal id — it never runs
//! user code on the signal stack. A small pool of dedicated OS threads
//! (not tokio tasks, so delivery keeps working even if the reactor stalls)
//! drains the queue and invokes handlers in priority order.

mod manager;
mod stats;

pub use stats::SignalStats;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use signal_hook::consts::signal::{
    SIGABRT, SIGBUS, SIGFPE, SIGHUP, SIGILL, SIGINT, SIGQUIT, SIGSEGV, SIGTERM, SIGUSR1, SIGUSR2,
};
use signal_hook::iterator::Signals;
use tracing::{debug, warn};

use manager::SafeManager;
use stats::StatsInner;

pub type HandlerId = u64;
pub type SignalCallback = Arc<dyn Fn(i32) + Send + Sync>;

/// Signals the dispatcher thread listens for. Registering a signal outside
/// this set is a no-op: it will never be delivered.
const WATCHED_SIGNALS: &[i32] = &[
    SIGHUP, SIGINT, SIGQUIT, SIGILL, SIGABRT, SIGFPE, SIGSEGV, SIGBUS, SIGTERM, SIGUSR1, SIGUSR2,
];

/// The platform's standard crash set (POSIX).
pub const CRASH_SIGNALS: &[i32] = &[SIGABRT, SIGILL, SIGFPE, SIGSEGV, SIGBUS, SIGQUIT];

#[derive(Clone)]
struct HandlerEntry {
    id: HandlerId,
    priority: i32,
    #[allow(dead_code)]
    name: String,
    callback: SignalCallback,
}

pub(crate) struct Inner {
    next_id: AtomicU64,
    handlers: DashMap<i32, RwLock<Vec<HandlerEntry>>>,
    stats: DashMap<i32, Arc<StatsInner>>,
    handler_timeout: RwLock<Option<Duration>>,
}

impl Inner {
    fn stats_for(&self, sig: i32) -> Arc<StatsInner> {
        self.stats.entry(sig).or_insert_with(|| Arc::new(StatsInner::default())).clone()
    }

    /// Runs every registered handler for `sig` in priority order. Invoked
    /// only from a `SafeManager` worker thread, never from signal context.
    pub(crate) fn dispatch_one(&self, sig: i32) {
        let stats = self.stats_for(sig);
        let entries: Vec<HandlerEntry> = self
            .handlers
            .get(&sig)
            .map(|list| list.read().clone())
            .unwrap_or_default();
        let timeout = *self.handler_timeout.read();

        for entry in entries {
            let ok = match timeout {
                Some(d) => run_with_timeout(&entry.callback, sig, d),
                None => {
                    run_catching(&entry.callback, sig)
                }
            };
            if ok {
                stats.touch_processed();
            } else {
                stats.touch_handler_error();
            }
        }
    }
}

fn run_catching(callback: &SignalCallback, sig: i32) -> bool {
    let callback = callback.clone();
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(sig))).is_ok()
}

/// Runs `callback` on a helper thread so a stuck handler can't hold up the
/// worker. A timeout counts as a handler error; the design doesn't attempt
/// to interrupt the handler thread, so its side effects are not rolled back.
fn run_with_timeout(callback: &SignalCallback, sig: i32, timeout: Duration) -> bool {
    let (tx, rx) = std::sync::mpsc::channel();
    let callback = callback.clone();
    let _ = std::thread::Builder::new()
        .name("signalbus-handler".into())
        .spawn(move || {
            let ok = run_catching(&callback, sig);
            let _ = tx.send(ok);
        });
    rx.recv_timeout(timeout).unwrap_or(false)
}

/// A process-wide, priority-ordered signal dispatcher.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<Inner>,
    manager: Arc<SafeManager>,
}

impl SignalBus {
    /// Builds an independent bus (mainly for tests). Production code should
    /// use [`SignalBus::global`].
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let inner = Arc::new(Inner {
            next_id: AtomicU64::new(0),
            handlers: DashMap::new(),
            stats: DashMap::new(),
            handler_timeout: RwLock::new(None),
        });
        let manager = Arc::new(SafeManager::new(inner.clone(), worker_count, queue_capacity));
        spawn_dispatcher(inner.clone(), manager.clone());
        Self { inner, manager }
    }

    /// The process-wide singleton, installed lazily on first access.
    pub fn global() -> SignalBus {
        static INSTANCE: OnceLock<SignalBus> = OnceLock::new();
        INSTANCE.get_or_init(|| SignalBus::new(1, 1000)).clone()
    }

    pub fn register(&self, signal: i32, callback: SignalCallback, priority: i32, name: &str) -> HandlerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = HandlerEntry {
            id,
            priority,
            name: name.to_string(),
            callback,
        };
        let list_lock = self
            .inner
            .handlers
            .entry(signal)
            .or_insert_with(|| RwLock::new(Vec::new()));
        let mut list = list_lock.write();
        let pos = list.iter().position(|h| h.priority < priority).unwrap_or(list.len());
        list.insert(pos, entry);
        id
    }

    pub fn register_crash_signals(&self, callback: SignalCallback, priority: i32, name: &str) -> Vec<HandlerId> {
        CRASH_SIGNALS
            .iter()
            .map(|&sig| self.register(sig, callback.clone(), priority, name))
            .collect()
    }

    pub fn unregister(&self, id: HandlerId) -> bool {
        for entry in self.inner.handlers.iter() {
            let mut list = entry.value().write();
            if let Some(pos) = list.iter().position(|h| h.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn unregister_by_value(&self, signal: i32, callback: &SignalCallback) -> bool {
        let Some(list_lock) = self.inner.handlers.get(&signal) else {
            return false;
        };
        let mut list = list_lock.write();
        if let Some(pos) = list.iter().position(|h| Arc::ptr_eq(&h.callback, callback)) {
            list.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn set_handler_timeout(&self, timeout: Option<Duration>) {
        *self.inner.handler_timeout.write() = timeout;
    }

    pub fn stats(&self, signal: i32) -> SignalStats {
        self.inner.stats_for(signal).snapshot()
    }

    pub fn clear_queue(&self) -> usize {
        self.manager.clear()
    }

    /// Injects a signal id as if it had just arrived, without raising an
    /// actual OS signal. Exercises the same receive/enqueue/dispatch path
    /// the real dispatcher thread uses.
    pub fn simulate(&self, signal: i32) -> bool {
        self.inner.stats_for(signal).touch_received();
        let accepted = self.manager.enqueue(signal);
        if !accepted {
            self.inner.stats_for(signal).touch_dropped();
        }
        accepted
    }
}

fn spawn_dispatcher(inner: Arc<Inner>, manager: Arc<SafeManager>) {
    let mut signals = match Signals::new(WATCHED_SIGNALS) {
        Ok(s) => s,
        Err(e) => {
            warn!("signalbus: failed to install OS signal handlers: {}", e);
            return;
        }
    };
    std::thread::Builder::new()
        .name("signalbus-dispatcher".into())
        .spawn(move || {
            for sig in signals.forever() {
                let stats = inner.stats_for(sig);
                stats.touch_received();
                if !manager.enqueue(sig) {
                    stats.touch_dropped();
                }
                debug!("signalbus: received signal {}", sig);
            }
        })
        .expect("failed to spawn signalbus dispatcher thread");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition never became true");
    }

    #[test]
    fn dispatches_in_priority_order() {
        let bus = SignalBus::new(1, 16);
        let order: Arc<parking_lot::Mutex<Vec<i32>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.register(SIGUSR1, Arc::new(move |_| o1.lock().push(1)), 1, "low");
        let o2 = order.clone();
        bus.register(SIGUSR1, Arc::new(move |_| o2.lock().push(2)), 10, "high");

        bus.simulate(SIGUSR1);
        wait_until(|| order.lock().len() == 2);
        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn unregister_removes_handler() {
        let bus = SignalBus::new(1, 16);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = bus.register(SIGUSR2, Arc::new(move |_| { c.fetch_add(1, Ordering::Relaxed); }), 0, "h");
        assert!(bus.unregister(id));

        bus.simulate(SIGUSR2);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn full_queue_counts_as_dropped() {
        let bus = SignalBus::new(0, 1);
        // zero workers: nothing drains the queue, so the second arrival overflows it.
        assert!(bus.simulate(SIGHUP));
        assert!(!bus.simulate(SIGHUP));
        assert_eq!(bus.stats(SIGHUP).dropped, 1);
    }

    #[test]
    fn handler_timeout_counts_as_error_without_blocking() {
        let bus = SignalBus::new(1, 16);
        bus.set_handler_timeout(Some(Duration::from_millis(20)));
        bus.register(
            SIGUSR1,
            Arc::new(|_| std::thread::sleep(Duration::from_secs(5))),
            0,
            "slow",
        );
        bus.simulate(SIGUSR1);
        wait_until(|| bus.stats(SIGUSR1).handler_errors >= 1);
    }
}
