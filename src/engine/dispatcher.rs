//! Routes every captured event to the live correlation queues and callbacks
//! whose filter accepts it.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

use crate::engine::event::{CapturedEvent, EventFilter};
use crate::engine::queue::CorrelationQueue;

/// Callback invoked from the receive path; must not block.
pub type EventCallback = Arc<dyn Fn(&CapturedEvent) + Send + Sync>;

enum Route {
    Queue(Arc<CorrelationQueue>),
    Callback {
        filter: EventFilter,
        callback: EventCallback,
    },
}

#[derive(Default)]
struct Routes {
    next_id: u64,
    entries: Vec<(u64, Route)>,
}

/// Fan-out point between the receive pump and the subscribers.
#[derive(Default)]
pub struct Dispatcher {
    routes: Mutex<Routes>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `queue`, open it, and return the guard that detaches it.
    pub fn attach(self: &Arc<Self>, queue: Arc<CorrelationQueue>) -> Subscription {
        queue.open();
        let id = self.insert(Route::Queue(Arc::clone(&queue)));
        Subscription {
            id,
            dispatcher: Arc::downgrade(self),
            queue: Some(queue),
        }
    }

    /// Register a callback for events matching `filter`.
    pub fn attach_callback(
        self: &Arc<Self>,
        filter: EventFilter,
        callback: EventCallback,
    ) -> Subscription {
        let id = self.insert(Route::Callback { filter, callback });
        Subscription {
            id,
            dispatcher: Arc::downgrade(self),
            queue: None,
        }
    }

    /// Deliver `event` to every matching route; returns how many accepted it.
    pub fn dispatch(&self, event: &CapturedEvent) -> usize {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let mut callbacks = Vec::new();
        let mut delivered = 0;
        {
            let routes = self.lock();
            for (_, route) in &routes.entries {
                match route {
                    Route::Queue(queue) => {
                        if queue.push(event.clone()) {
                            delivered += 1;
                        }
                    }
                    Route::Callback { filter, callback } if filter.matches(event) => {
                        callbacks.push(Arc::clone(callback));
                    }
                    Route::Callback { .. } => {}
                }
            }
        }
        for callback in &callbacks {
            callback(event);
        }
        delivered += callbacks.len();
        trace!(pgn = event.pgn, source = event.source, delivered, "event dispatched");
        delivered
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn insert(&self, route: Route) -> u64 {
        let mut routes = self.lock();
        let id = routes.next_id;
        routes.next_id += 1;
        routes.entries.push((id, route));
        id
    }

    fn detach(&self, id: u64) {
        self.lock().entries.retain(|(entry, _)| *entry != id);
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        // A panicking callback must not take the receive path down with it.
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Guard of a dispatcher registration; dropping it unsubscribes.
///
/// A queue subscription is also closed on drop, so events arriving after
/// teardown are discarded instead of leaking into the next scenario.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    dispatcher: Weak<Dispatcher>,
    queue: Option<Arc<CorrelationQueue>>,
}

impl Subscription {
    /// Unsubscribe explicitly.
    pub fn cancel(self) {
        drop(self);
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.detach(self.id);
        }
        if let Some(queue) = self.queue.take() {
            queue.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    fn event(pgn: u32, source: u8) -> CapturedEvent {
        CapturedEvent {
            priority: 6,
            pgn,
            source,
            destination: None,
            timestamp: Instant::now(),
            name: None,
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_routes_by_filter() {
        let dispatcher = Dispatcher::new();
        let claims = Arc::new(CorrelationQueue::new(EventFilter::address_claims()));
        let traffic = Arc::new(CorrelationQueue::new(EventFilter::pgn(0xC000)));
        let _claims_sub = dispatcher.attach(Arc::clone(&claims));
        let _traffic_sub = dispatcher.attach(Arc::clone(&traffic));

        assert_eq!(dispatcher.dispatch(&event(0xEE00, 1)), 1);
        assert_eq!(dispatcher.dispatch(&event(0xC000, 2)), 1);
        assert_eq!(dispatcher.dispatch(&event(0xF004, 3)), 0);

        let t = Duration::from_millis(10);
        assert_eq!(claims.pop(t).await.unwrap().source, 1);
        assert_eq!(traffic.pop(t).await.unwrap().source, 2);
    }

    #[tokio::test]
    async fn test_dropping_subscription_detaches_and_closes() {
        let dispatcher = Dispatcher::new();
        let queue = Arc::new(CorrelationQueue::new(EventFilter::any()));
        let subscription = dispatcher.attach(Arc::clone(&queue));
        assert!(queue.is_live());
        assert_eq!(dispatcher.route_count(), 1);

        dispatcher.dispatch(&event(0xEE00, 1));
        subscription.cancel();

        assert!(!queue.is_live());
        assert_eq!(dispatcher.route_count(), 0);
        assert_eq!(dispatcher.dispatch(&event(0xEE00, 2)), 0);
    }

    #[test]
    fn test_callback_route() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let _sub = dispatcher.attach_callback(
            EventFilter::address_claims(),
            Arc::new(move |_: &CapturedEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&event(0xEE00, 1));
        dispatcher.dispatch(&event(0xC000, 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
