//! Incoming-order intake: popup state machine, countdown, and event stream.
//!
//! One popup at a time. A candidate order (from the fallback poll loop or a
//! pushed change notification) pops from `Idle`, runs a 20 second countdown,
//! and resolves exactly once - user accept, user reject, or timeout reject.
//! The countdown recomputes remaining time from the stored deadline on every
//! tick, so a stalled runtime never stretches the window.
//!
//! Consumers receive `IntakeEvent`s over an mpsc channel and render them;
//! the `Popped` event is where a UI fires its haptic warning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orders::{self, Order, OrderStatus};
use crate::Client;

/// How long the store owner has to decide.
pub const ORDER_TIMEOUT: Duration = Duration::from_secs(20);
/// Countdown re-evaluation cadence.
pub const COUNTDOWN_TICK: Duration = Duration::from_millis(500);
/// Fallback poll cadence when no push channel feeds the intake.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Intake timings, overridable for embedders (and short-fuse tests).
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub order_timeout: Duration,
    pub countdown_tick: Duration,
    pub poll_interval: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            order_timeout: ORDER_TIMEOUT,
            countdown_tick: COUNTDOWN_TICK,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// How a popup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Accepted,
    Rejected,
    TimedOut,
}

impl Resolution {
    fn is_accept(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Events emitted to the embedding UI.
#[derive(Debug, Clone)]
pub enum IntakeEvent {
    /// A new order popup opened. Fire the haptic warning on this one.
    Popped { order: Order },
    /// Countdown update, whole seconds remaining (ceiling).
    CountdownTick { order_id: String, remaining_secs: u64 },
    /// The popup resolved and the backend call succeeded.
    Resolved { order_id: String, resolution: Resolution },
    /// The popup resolved but the backend call failed (after the single
    /// transport retry). The popup is closed either way.
    ResolveFailed {
        order_id: String,
        resolution: Resolution,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// State machine (synchronous core)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum State {
    Idle,
    Popped { order: Order, deadline: Instant },
    Resolving,
}

/// The popup state machine proper. All transitions are synchronous; the
/// async shell owns the clock, the timers, and the network.
#[derive(Debug)]
struct Machine {
    state: State,
}

impl Machine {
    fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Offer a candidate order. Pops only from `Idle` and only for orders
    /// still awaiting this store's decision. Re-offering the order already
    /// on screen is a no-op (idempotent re-entry guard); a different order
    /// waits for the current popup to resolve.
    fn offer(&mut self, order: Order, deadline: Instant) -> bool {
        if order.status != OrderStatus::PendingStore {
            return false;
        }
        match &self.state {
            State::Idle => {
                self.state = State::Popped { order, deadline };
                true
            }
            // Covers the re-entry guard (the popped order polled again) and
            // any other candidate arriving while a decision is in flight.
            State::Popped { .. } | State::Resolving => false,
        }
    }

    /// Remaining decision time, `None` unless a popup is showing.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            State::Popped { deadline, .. } => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Claim the popup for resolution. Returns the order exactly once;
    /// every later claim gets `None`.
    fn begin_resolve(&mut self) -> Option<Order> {
        match std::mem::replace(&mut self.state, State::Resolving) {
            State::Popped { order, .. } => Some(order),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Resolution finished (either way); ready for the next order.
    fn finish_resolve(&mut self) {
        self.state = State::Idle;
    }

    fn reset(&mut self) {
        self.state = State::Idle;
    }
}

// ---------------------------------------------------------------------------
// Async shell
// ---------------------------------------------------------------------------

struct Inner {
    client: Client,
    token: String,
    store_id: String,
    config: IntakeConfig,
    machine: Mutex<Machine>,
    events: mpsc::UnboundedSender<IntakeEvent>,
    countdown_cancel: Mutex<Option<CancellationToken>>,
    poll_running: AtomicBool,
}

/// Order intake handle. Create once per signed-in store; clones share the
/// same machine and event stream.
#[derive(Clone)]
pub struct OrderIntake {
    inner: Arc<Inner>,
}

impl OrderIntake {
    /// Build the intake and the event receiver the UI drains.
    pub fn new(
        client: Client,
        token: &str,
        store_id: &str,
        config: IntakeConfig,
    ) -> (Self, mpsc::UnboundedReceiver<IntakeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            client,
            token: token.to_string(),
            store_id: store_id.to_string(),
            config,
            machine: Mutex::new(Machine::new()),
            events: tx,
            countdown_cancel: Mutex::new(None),
            poll_running: AtomicBool::new(false),
        });
        (Self { inner }, rx)
    }

    /// Offer a candidate order (push path). Returns `true` when a popup
    /// opened. The poll loop funnels through here too.
    pub fn offer_order(&self, order: Order) -> bool {
        Inner::offer_order(&self.inner, order)
    }

    /// User accepted the popped order.
    pub async fn accept(&self) -> Result<(), String> {
        self.inner.resolve(Resolution::Accepted).await
    }

    /// User rejected the popped order.
    pub async fn reject(&self) -> Result<(), String> {
        self.inner.resolve(Resolution::Rejected).await
    }

    /// Start the fallback poll loop. Candidate orders found in each response
    /// are offered to the machine; responses apply in the order they arrive.
    pub fn start_poll_loop(&self) {
        Inner::start_poll_loop(&self.inner);
    }

    /// Stop polling and drop any open popup without resolving it
    /// (shutdown/logout path).
    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl Inner {
    fn offer_order(this: &Arc<Self>, order: Order) -> bool {
        let order_id = order.id.clone();
        let deadline = Instant::now() + this.config.order_timeout;
        let popped = {
            let mut machine = this.machine.lock().unwrap();
            machine.offer(order.clone(), deadline)
        };
        if !popped {
            debug!(order_id = %order_id, "order offer ignored (popup busy or not pending)");
            return false;
        }

        info!(order_id = %order_id, "incoming order popped");
        let _ = this.events.send(IntakeEvent::Popped { order });

        let cancel = CancellationToken::new();
        {
            let mut slot = this.countdown_cancel.lock().unwrap();
            // Idle -> Popped is the only way here, so no token should exist
            if let Some(stale) = slot.replace(cancel.clone()) {
                stale.cancel();
            }
        }
        Self::spawn_countdown(this, order_id, cancel);
        true
    }

    fn spawn_countdown(this: &Arc<Self>, order_id: String, cancel: CancellationToken) {
        let inner = Arc::clone(this);
        let tick = this.config.countdown_tick;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {}
                }

                let remaining = {
                    let machine = inner.machine.lock().unwrap();
                    machine.remaining(Instant::now())
                };
                let Some(remaining) = remaining else {
                    // Resolved from elsewhere between ticks
                    break;
                };

                let remaining_secs = remaining.as_millis().div_ceil(1000) as u64;
                let _ = inner.events.send(IntakeEvent::CountdownTick {
                    order_id: order_id.clone(),
                    remaining_secs,
                });

                if remaining == Duration::ZERO {
                    info!(order_id = %order_id, "decision window elapsed, auto-rejecting");
                    let _ = inner.resolve(Resolution::TimedOut).await;
                    break;
                }
            }
        });
    }

    async fn resolve(&self, resolution: Resolution) -> Result<(), String> {
        // Clear the countdown before anything else; the timer must never
        // fire into a popup that is already resolving.
        if let Some(cancel) = self.countdown_cancel.lock().unwrap().take() {
            cancel.cancel();
        }

        let order = {
            let mut machine = self.machine.lock().unwrap();
            machine.begin_resolve()
        };
        let Some(order) = order else {
            return Err("No pending order popup".to_string());
        };

        let result = if resolution.is_accept() {
            orders::accept_order(&self.client, &self.token, &order.id).await
        } else {
            orders::reject_order(&self.client, &self.token, &order.id).await
        };

        // The popup closes regardless of the backend outcome; the failure
        // travels on the event stream for the UI to surface.
        self.machine.lock().unwrap().finish_resolve();

        match result {
            Ok(()) => {
                let _ = self.events.send(IntakeEvent::Resolved {
                    order_id: order.id,
                    resolution,
                });
                Ok(())
            }
            Err(error) => {
                warn!(order_id = %order.id, ?resolution, error = %error, "order resolution failed");
                let _ = self.events.send(IntakeEvent::ResolveFailed {
                    order_id: order.id,
                    resolution,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn start_poll_loop(this: &Arc<Self>) {
        if this.poll_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(this);
        let interval = this.config.poll_interval;

        tokio::spawn(async move {
            info!(store_id = %inner.store_id, interval_secs = interval.as_secs(), "order poll loop started");
            loop {
                tokio::time::sleep(interval).await;
                if !inner.poll_running.load(Ordering::SeqCst) {
                    info!(store_id = %inner.store_id, "order poll loop stopped");
                    break;
                }

                match orders::fetch_store_orders(&inner.client, &inner.token, &inner.store_id)
                    .await
                {
                    Ok(batch) => {
                        if let Some(pending) = batch
                            .into_iter()
                            .find(|o| o.status == OrderStatus::PendingStore)
                        {
                            Self::offer_order(&inner, pending);
                        }
                    }
                    Err(e) => debug!(store_id = %inner.store_id, error = %e, "order poll failed"),
                }
            }
        });
    }

    fn stop(&self) {
        self.poll_running.store(false, Ordering::SeqCst);
        if let Some(cancel) = self.countdown_cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        self.machine.lock().unwrap().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Backend;
    use crate::db;

    fn pending_order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            order_code: format!("CODE-{id}"),
            status: OrderStatus::PendingStore,
            order_items: Vec::new(),
            delivery_address: None,
            total_amount: 0.0,
            placed_at: None,
        }
    }

    fn offline_client() -> Client {
        Client {
            backend: Backend::new("http://127.0.0.1:9"),
            supabase: None,
            db: Arc::new(db::test_db()),
        }
    }

    fn fast_config() -> IntakeConfig {
        IntakeConfig {
            order_timeout: Duration::from_millis(80),
            countdown_tick: Duration::from_millis(10),
            poll_interval: Duration::from_secs(60),
        }
    }

    // -- Machine ------------------------------------------------------------

    #[test]
    fn pending_order_pops_from_idle_only() {
        let mut machine = Machine::new();
        let deadline = Instant::now() + Duration::from_secs(20);

        assert!(machine.offer(pending_order("O1"), deadline));
        // Same id polled again: no duplicate popup
        assert!(!machine.offer(pending_order("O1"), deadline));
        // A different order waits for the current popup
        assert!(!machine.offer(pending_order("O2"), deadline));
    }

    #[test]
    fn non_pending_orders_never_pop() {
        let mut machine = Machine::new();
        let deadline = Instant::now() + Duration::from_secs(20);
        let mut delivered = pending_order("O1");
        delivered.status = OrderStatus::Delivered;

        assert!(!machine.offer(delivered, deadline));
        assert!(machine.remaining(Instant::now()).is_none());
    }

    #[test]
    fn resolution_is_claimed_exactly_once() {
        let mut machine = Machine::new();
        let deadline = Instant::now() + Duration::from_secs(20);
        machine.offer(pending_order("O1"), deadline);

        let first = machine.begin_resolve();
        assert_eq!(first.map(|o| o.id), Some("O1".to_string()));
        assert!(machine.begin_resolve().is_none());

        machine.finish_resolve();
        // Back to Idle: the next order can pop
        assert!(machine.offer(pending_order("O2"), deadline));
    }

    #[test]
    fn remaining_is_computed_from_the_deadline() {
        let mut machine = Machine::new();
        let start = Instant::now();
        machine.offer(pending_order("O1"), start + Duration::from_secs(20));

        let remaining = machine.remaining(start + Duration::from_secs(5)).unwrap();
        assert_eq!(remaining, Duration::from_secs(15));

        // Past the deadline the remaining time saturates at zero
        let remaining = machine.remaining(start + Duration::from_secs(25)).unwrap();
        assert_eq!(remaining, Duration::ZERO);
    }

    // -- Async shell --------------------------------------------------------

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<IntakeEvent>) -> Option<IntakeEvent> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn timeout_auto_rejects_and_returns_to_idle() {
        let (intake, mut rx) = OrderIntake::new(offline_client(), "jwt", "store-1", fast_config());

        assert!(intake.offer_order(pending_order("O1")));

        let mut saw_popped = false;
        let mut saw_tick = false;
        let timeout_outcome = loop {
            match next_event(&mut rx).await.expect("event stream went quiet") {
                IntakeEvent::Popped { order } => {
                    assert_eq!(order.id, "O1");
                    saw_popped = true;
                }
                IntakeEvent::CountdownTick { order_id, .. } => {
                    assert_eq!(order_id, "O1");
                    saw_tick = true;
                }
                // Backend is unreachable, so the auto-reject surfaces as a
                // failed resolution - the popup still closes.
                IntakeEvent::ResolveFailed {
                    order_id,
                    resolution,
                    ..
                } => break (order_id, resolution),
                IntakeEvent::Resolved { .. } => panic!("dead backend cannot resolve cleanly"),
            }
        };

        assert!(saw_popped && saw_tick);
        assert_eq!(timeout_outcome.0, "O1");
        assert_eq!(timeout_outcome.1, Resolution::TimedOut);

        // State returned to Idle: a new order pops again
        assert!(intake.offer_order(pending_order("O2")));
    }

    #[tokio::test]
    async fn duplicate_offers_raise_one_popup() {
        let (intake, mut rx) = OrderIntake::new(offline_client(), "jwt", "store-1", fast_config());

        assert!(intake.offer_order(pending_order("O1")));
        assert!(!intake.offer_order(pending_order("O1")));
        assert!(!intake.offer_order(pending_order("O2")));

        let mut popped = 0;
        while let Some(event) = next_event(&mut rx).await {
            match event {
                IntakeEvent::Popped { .. } => popped += 1,
                IntakeEvent::ResolveFailed { .. } => break,
                _ => {}
            }
        }
        assert_eq!(popped, 1);
    }

    #[tokio::test]
    async fn manual_resolution_cancels_countdown_and_is_exactly_once() {
        let config = IntakeConfig {
            order_timeout: Duration::from_secs(20),
            ..fast_config()
        };
        let (intake, mut rx) = OrderIntake::new(offline_client(), "jwt", "store-1", config);

        assert!(intake.offer_order(pending_order("O1")));
        // Dead backend: accept fails but still consumes the popup
        let err = intake.accept().await.expect_err("backend unreachable");
        assert!(!err.is_empty());

        // Second resolution attempt finds no popup
        let err = intake.reject().await.expect_err("already resolved");
        assert_eq!(err, "No pending order popup");

        let mut resolve_failures = 0;
        while let Some(event) = next_event(&mut rx).await {
            if let IntakeEvent::ResolveFailed { resolution, .. } = event {
                assert_eq!(resolution, Resolution::Accepted);
                resolve_failures += 1;
                break;
            }
        }
        assert_eq!(resolve_failures, 1);

        // Countdown was cancelled; the stream stays quiet afterwards
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
