//! # Window Coordinator
//!
//! Drives window closure for every iteration of a run from a single repeating
//! timer.
//!
//! ## Lifecycle
//!
//! ```text
//!   Stopped ──start()──▶ Running ──stop()──▶ Stopped
//!                          │  ▲
//!                          └──┘ timer tick / trigger_window()
//! ```
//!
//! - **start()** arms a Tokio interval timer. Calling it while running does
//!   nothing.
//! - **Each tick** bumps the window sequence number and calls every subscriber
//!   with a [`WindowClosed`] event.
//! - **stop()** disarms the timer, delivers exactly one more window (with
//!   [`WindowTrigger::Stop`]) so collectors can flush, notifies subscribers
//!   that the coordinator stopped, then releases all subscriptions. No window
//!   is delivered after `stop()` returns.
//!
//! ## Failure Isolation
//!
//! A subscriber that returns an error or panics is logged and skipped; the
//! timer keeps running and the other subscribers still receive the window.
//!
//! ## Concurrency
//!
//! The subscriber list sits behind its own lock. Delivery copies the list
//! first and calls subscribers without holding that lock, so a subscriber may
//! unsubscribe itself (or others) from inside its callback. Deliveries are
//! serialized by a separate lock, which means a subscriber must not call
//! [`WindowCoordinator::stop`] or [`WindowCoordinator::trigger_window`] from
//! inside its own callback.

use crate::error::WindowError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant as TokioInstant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Handle returned by [`WindowCoordinator::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What caused a window to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowTrigger {
    /// The repeating timer fired
    Timer,
    /// A caller forced the window closed with `trigger_window()`
    Manual,
    /// The coordinator is stopping; this is the last window
    Stop,
}

/// Event delivered to subscribers when a window closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClosed {
    pub sequence: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub trigger: WindowTrigger,
}

/// Receiver of window-closed events
pub trait WindowSubscriber: Send + Sync {
    /// Handle one closed window. Errors are logged and discarded.
    fn on_window_closed(&self, window: &WindowClosed) -> anyhow::Result<()>;

    /// Called once after the final window when the coordinator stops, just
    /// before the subscription is released.
    fn on_coordinator_stopped(&self) {}
}

struct FnSubscriber<F>(F);

impl<F> WindowSubscriber for FnSubscriber<F>
where
    F: Fn(&WindowClosed) -> anyhow::Result<()> + Send + Sync,
{
    fn on_window_closed(&self, window: &WindowClosed) -> anyhow::Result<()> {
        (self.0)(window)
    }
}

struct Timer {
    cancel: CancellationToken,
    // Detached on stop; the task exits on its own once cancelled.
    _handle: JoinHandle<()>,
}

type SubscriberList = Vec<(SubscriptionId, Arc<dyn WindowSubscriber>)>;

struct CoordinatorInner {
    interval: Duration,
    sequence: AtomicU64,
    running: AtomicBool,
    next_subscription: AtomicU64,
    subscribers: RwLock<SubscriberList>,
    window_start: Mutex<DateTime<Utc>>,
    delivery: Mutex<()>,
    timer: Mutex<Option<Timer>>,
}

impl CoordinatorInner {
    /// Close the current window and deliver it. Returns false when the
    /// coordinator is not running (the stop window is always delivered).
    fn close_window(&self, trigger: WindowTrigger) -> bool {
        let _delivery = self.delivery.lock();
        if trigger != WindowTrigger::Stop && !self.running.load(Ordering::SeqCst) {
            return false;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let window_end = Utc::now();
        let window_start = std::mem::replace(&mut *self.window_start.lock(), window_end);
        let event = WindowClosed {
            sequence,
            window_start,
            window_end,
            trigger,
        };

        let subscribers: SubscriberList = self
            .subscribers
            .read()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect();

        trace!(
            "Closing window {} ({:?}) for {} subscribers",
            sequence,
            trigger,
            subscribers.len()
        );

        for (id, subscriber) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_window_closed(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        "Window subscriber {:?} failed on window {}: {:#}",
                        id, sequence, e
                    );
                }
                Err(_) => {
                    warn!(
                        "Window subscriber {:?} panicked on window {}",
                        id, sequence
                    );
                }
            }
        }

        true
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

async fn run_timer(inner: Weak<CoordinatorInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(TokioInstant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.close_window(WindowTrigger::Timer);
            }
        }
    }
}

/// Shared timer that closes windows for all live iteration collectors
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct WindowCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl WindowCoordinator {
    /// Create a stopped coordinator with the given window length
    pub fn new(interval: Duration) -> Result<Self, WindowError> {
        if interval.is_zero() {
            return Err(WindowError::InvalidConfig(
                "window interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                interval,
                sequence: AtomicU64::new(0),
                running: AtomicBool::new(false),
                next_subscription: AtomicU64::new(1),
                subscribers: RwLock::new(Vec::new()),
                window_start: Mutex::new(Utc::now()),
                delivery: Mutex::new(()),
                timer: Mutex::new(None),
            }),
        })
    }

    /// Window length
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Sequence number of the most recently closed window (0 before the first)
    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    /// True between `start()` and `stop()`
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Arm the repeating timer. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<(), WindowError> {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WindowError::NoRuntime)?;

        *self.inner.window_start.lock() = Utc::now();
        self.inner.running.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.interval,
            cancel.clone(),
        ));
        *timer = Some(Timer {
            cancel,
            _handle: handle,
        });

        debug!(
            "Window coordinator started with a {:?} interval",
            self.inner.interval
        );
        Ok(())
    }

    /// Disarm the timer, deliver the final window and release all
    /// subscriptions. Returns false if the coordinator was not running.
    pub fn stop(&self) -> bool {
        let Some(timer) = self.inner.timer.lock().take() else {
            return false;
        };

        self.inner.running.store(false, Ordering::SeqCst);
        timer.cancel.cancel();

        self.inner.close_window(WindowTrigger::Stop);

        let released = std::mem::take(&mut *self.inner.subscribers.write());
        for (id, subscriber) in &released {
            if catch_unwind(AssertUnwindSafe(|| subscriber.on_coordinator_stopped())).is_err() {
                warn!("Window subscriber {:?} panicked while stopping", id);
            }
        }

        debug!(
            "Window coordinator stopped after {} windows, released {} subscribers",
            self.sequence(),
            released.len()
        );
        true
    }

    /// Close the current window immediately. Returns false when not running.
    pub fn trigger_window(&self) -> bool {
        self.inner.close_window(WindowTrigger::Manual)
    }

    /// Register a subscriber for every following window
    ///
    /// ## Returns
    ///
    /// The id to pass to [`WindowCoordinator::unsubscribe`].
    pub fn subscribe(&self, subscriber: Arc<dyn WindowSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push((id, subscriber));
        id
    }

    /// Subscribe a closure
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&WindowClosed) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnSubscriber(f)))
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }
}

impl std::fmt::Debug for WindowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowCoordinator")
            .field("interval", &self.inner.interval)
            .field("sequence", &self.sequence())
            .field("running", &self.is_running())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
