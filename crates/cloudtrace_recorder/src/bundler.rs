//! Bundler - weighted batching with count, weight and delay thresholds
//!
//! Items are appended to a pending bundle. The whole bundle is handed to the
//! handler as soon as one of these holds:
//!
//! - pending weight reaches `bundle_weight_threshold`
//! - pending count reaches `bundle_count_threshold`
//! - `delay_threshold` has passed since the first pending item arrived
//!
//! An item never spans two bundles: if it would push the pending bundle over
//! `bundle_weight_limit`, the pending bundle is flushed first.
//!
//! # Concurrency
//!
//! All bundle state lives behind one `std::sync::Mutex`. `add()` and the
//! delay timer task both take that lock before touching the bundle, and a
//! flush swaps the bundle out while holding it, so a given set of items is
//! handed over exactly once. The handler itself runs on a spawned tokio task,
//! outside the lock; `add()` never waits for it.
//!
//! ```text
//!  add() ──┐                         ┌─► spawn(handler(bundle)) ─► release weight
//!          ├─► Mutex<State> ── take ─┤
//!  timer ──┘                         └─► spawn(handler(bundle)) ─► release weight
//! ```
//!
//! Buffered weight covers both the pending bundle and bundles whose handler
//! has not finished yet. Once it would exceed `buffered_weight_limit`,
//! `add()` returns the item in [`EnqueueError::Overflow`].

use crate::config::BundlerConfig;
use crate::error::{ConfigError, EnqueueError};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::Instant;

type BoxedHandler<T> = Arc<dyn Fn(Vec<T>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Why a bundle was handed to the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Count,
    Weight,
    /// The next item would have exceeded the bundle weight limit
    WeightLimit,
    Delay,
    Explicit,
    Drop,
}

struct State<T> {
    pending: Vec<T>,
    pending_weight: usize,
    /// Pending weight plus weight of bundles still in the handler
    buffered_weight: usize,
    /// When the current pending bundle must be flushed
    deadline: Option<Instant>,
    in_flight: usize,
}

struct Ready<T> {
    items: Vec<T>,
    weight: usize,
    trigger: FlushTrigger,
}

impl<T> State<T> {
    /// Swaps out the pending bundle. Called with the lock held.
    fn take(&mut self, trigger: FlushTrigger) -> Option<Ready<T>> {
        if self.pending.is_empty() {
            return None;
        }
        let items = std::mem::take(&mut self.pending);
        let weight = std::mem::replace(&mut self.pending_weight, 0);
        self.deadline = None;
        self.in_flight += 1;
        Some(Ready {
            items,
            weight,
            trigger,
        })
    }
}

struct Shared<T> {
    config: BundlerConfig,
    state: Mutex<State<T>>,
    handler: BoxedHandler<T>,
    runtime: Handle,
    /// Wakes the timer task when a bundle gets a deadline
    timer_notify: Notify,
    /// Signalled when the last in-flight bundle completes
    idle_notify: Notify,
}

impl<T: Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(self: &Arc<Self>, ready: Ready<T>) {
        tracing::debug!(
            target: "cloudtrace_recorder",
            items = ready.items.len(),
            weight = ready.weight,
            trigger = ?ready.trigger,
            "flushing bundle"
        );

        let Ready { items, weight, .. } = ready;
        let release = Release {
            shared: Arc::clone(self),
            weight,
        };
        self.runtime.spawn(async move {
            (release.shared.handler)(items).await;
        });
    }

    fn release(&self, weight: usize) {
        let idle = {
            let mut state = self.lock();
            state.buffered_weight -= weight;
            state.in_flight -= 1;
            state.in_flight == 0
        };
        if idle {
            self.idle_notify.notify_waiters();
        }
    }

    /// Background task flushing bundles whose deadline has passed.
    async fn run_timer(self: Arc<Self>) {
        loop {
            let deadline = self.lock().deadline;
            match deadline {
                None => self.timer_notify.notified().await,
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {
                            let ready = {
                                let mut state = self.lock();
                                match state.deadline {
                                    // The bundle this sleep was armed for may already be
                                    // gone (size flush); only a due deadline is acted on.
                                    Some(due) if due <= Instant::now() => {
                                        state.take(FlushTrigger::Delay)
                                    }
                                    _ => None,
                                }
                            };
                            if let Some(ready) = ready {
                                self.dispatch(ready);
                            }
                        }
                        () = self.timer_notify.notified() => {}
                    }
                }
            }
        }
    }
}

/// Returns a dispatched bundle's weight when dropped, so a panicking handler
/// or a task cancelled at runtime shutdown still frees its share of the buffer.
struct Release<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    weight: usize,
}

impl<T: Send + 'static> Drop for Release<T> {
    fn drop(&mut self) {
        self.shared.release(self.weight);
    }
}

/// Weighted bundler that hands complete bundles to an async handler.
pub struct Bundler<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    timer: AbortHandle,
}

impl<T: Send + 'static> Bundler<T> {
    /// Creates a bundler and starts its delay timer on the current tokio runtime.
    ///
    /// Fails if `config` is inconsistent or if called outside a runtime.
    pub fn new<F, Fut>(config: BundlerConfig, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let handler: BoxedHandler<T> = Arc::new(
            move |items: Vec<T>| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                Box::pin(handler(items))
            },
        );
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(State {
                pending: Vec::new(),
                pending_weight: 0,
                buffered_weight: 0,
                deadline: None,
                in_flight: 0,
            }),
            handler,
            runtime,
            timer_notify: Notify::new(),
            idle_notify: Notify::new(),
        });

        let timer = shared
            .runtime
            .spawn(Arc::clone(&shared).run_timer())
            .abort_handle();

        Ok(Self { shared, timer })
    }

    /// Adds an item with the given weight.
    ///
    /// Never blocks on the handler. On rejection the item is returned inside
    /// the error.
    pub fn add(&self, item: T, weight: usize) -> Result<(), EnqueueError<T>> {
        let config = &self.shared.config;
        if weight > config.bundle_weight_limit {
            return Err(EnqueueError::Oversized(item));
        }

        let (before, after, armed) = {
            let mut state = self.shared.lock();
            if state.buffered_weight + weight > config.buffered_weight_limit {
                return Err(EnqueueError::Overflow(item));
            }

            let before = if state.pending_weight + weight > config.bundle_weight_limit {
                state.take(FlushTrigger::WeightLimit)
            } else {
                None
            };

            let armed = state.pending.is_empty();
            if armed {
                state.deadline = Some(Instant::now() + config.delay_threshold);
            }

            state.pending.push(item);
            state.pending_weight += weight;
            state.buffered_weight += weight;

            let after = if state.pending_weight >= config.bundle_weight_threshold {
                state.take(FlushTrigger::Weight)
            } else if state.pending.len() >= config.bundle_count_threshold {
                state.take(FlushTrigger::Count)
            } else {
                None
            };

            (before, after, armed)
        };

        if armed {
            self.shared.timer_notify.notify_one();
        }
        for ready in [before, after].into_iter().flatten() {
            self.shared.dispatch(ready);
        }
        Ok(())
    }

    /// Flushes the pending bundle and waits for every in-flight bundle to finish.
    pub async fn flush(&self) {
        let ready = self.shared.lock().take(FlushTrigger::Explicit);
        if let Some(ready) = ready {
            self.shared.dispatch(ready);
        }

        loop {
            let idle = self.shared.idle_notify.notified();
            if self.shared.lock().in_flight == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stops the delay timer and drains everything.
    pub async fn shutdown(self) {
        self.timer.abort();
        self.flush().await;
    }

    /// Number of items in the pending bundle
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Weight of the pending bundle
    pub fn pending_weight(&self) -> usize {
        self.shared.lock().pending_weight
    }

    /// Pending weight plus weight of bundles still being handled
    pub fn buffered_weight(&self) -> usize {
        self.shared.lock().buffered_weight
    }

    /// Bundles handed to the handler that have not completed yet
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.shared.config
    }
}

impl<T: Send + 'static> Drop for Bundler<T> {
    fn drop(&mut self) {
        self.timer.abort();
        let ready = self.shared.lock().take(FlushTrigger::Drop);
        if let Some(ready) = ready {
            self.shared.dispatch(ready);
        }
    }
}
