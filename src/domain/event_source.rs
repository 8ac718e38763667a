//! Named-event subscription and synchronous emission.
//!
//! [`EventSource`] keeps an ordered list of `(event name, handler)`
//! listeners. Emission is synchronous and runs handlers in registration
//! order. Handler identity is the `Arc` allocation, so the same
//! [`Handler`] value must be passed to [`EventSource::off`] to remove it.
//!
//! # Failure policy
//!
//! If at least one listener is registered under [`ERROR`], every handler
//! failure during an emission is caught and re-emitted as an [`ERROR`]
//! event. Without such a listener the first failure aborts the emission
//! and is returned to the caller. Nested error emissions are bounded by
//! [`MAX_ERROR_DEPTH`]; deeper ones are dropped.
//! The depth travels with each emission, so concurrent emissions on the
//! same source never count against each other's bound.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::ListenerError;

/// Reserved event name receiving handler failures.
pub const ERROR: &str = "error";

/// Event name emitted by services after a state change.
pub const CHANGE: &str = "change";

/// Maximum nesting of `"error"` re-emissions before failures are dropped.
pub const MAX_ERROR_DEPTH: usize = 4;

/// Shared event handler.
pub type Handler<A = EventArg> = Arc<dyn Fn(&A) -> Result<(), ListenerError> + Send + Sync>;

/// Wraps a closure into a [`Handler`].
///
/// Keep the returned value around if the handler must be removed later.
pub fn handler<A, F>(f: F) -> Handler<A>
where
    F: Fn(&A) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Default event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventArg {
    /// No payload.
    Empty,
    /// Raw event data.
    Data(Vec<u8>),
    /// A handler failure, delivered to [`ERROR`] listeners.
    Failure(ListenerError),
}

impl From<ListenerError> for EventArg {
    fn from(err: ListenerError) -> Self {
        Self::Failure(err)
    }
}

struct EventListener<A> {
    key: String,
    handler: Handler<A>,
}

impl<A> EventListener<A> {
    fn matches(&self, key: &str, handler: &Handler<A>) -> bool {
        self.key == key && same_handler(&self.handler, handler)
    }
}

type Listeners<A> = Mutex<Vec<EventListener<A>>>;

fn same_handler<A>(a: &Handler<A>, b: &Handler<A>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn remove_listener<A>(listeners: &Listeners<A>, key: &str, handler: &Handler<A>) {
    let mut listeners = listeners.lock();
    if let Some(pos) = listeners.iter().position(|l| l.matches(key, handler)) {
        listeners.remove(pos);
    }
}

/// Ordered listener registry with synchronous emission.
pub struct EventSource<A = EventArg> {
    listeners: Arc<Listeners<A>>,
}

impl<A> EventSource<A> {
    /// Creates a source with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers `handler` for `event`.
    ///
    /// No-op when `event` is empty or the exact pair is already registered.
    pub fn on(&self, event: &str, handler: Handler<A>) -> &Self {
        if event.is_empty() {
            return self;
        }
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| l.matches(event, &handler)) {
            listeners.push(EventListener {
                key: event.to_string(),
                handler,
            });
        }
        self
    }

    /// Removes the listener registered with exactly this pair, if any.
    pub fn off(&self, event: &str, handler: &Handler<A>) -> &Self {
        if !event.is_empty() {
            remove_listener(&self.listeners, event, handler);
        }
        self
    }

    /// Registers `handler` and returns a handle that removes it again.
    pub fn subscribe(&self, event: &str, handler: Handler<A>) -> Subscription<A> {
        self.on(event, Arc::clone(&handler));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            key: event.to_string(),
            handler: Some(handler),
        }
    }

    /// Returns `true` if any listener is registered for `event`.
    #[must_use]
    pub fn has_listener(&self, event: &str) -> bool {
        !event.is_empty() && self.listeners.lock().iter().any(|l| l.key == event)
    }

    /// Returns the number of listeners registered for `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        if event.is_empty() {
            return 0;
        }
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.key == event)
            .count()
    }
}

impl<A: From<ListenerError>> EventSource<A> {
    /// Invokes every listener registered for `event`, in registration order.
    ///
    /// Returns `Ok(false)` without scanning when `event` is empty and
    /// `Ok(true)` otherwise, whether or not a listener matched. Listeners
    /// added or removed by a handler take effect on the next emission.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure when no [`ERROR`] listener is
    /// registered. With an [`ERROR`] listener, failures are re-emitted
    /// instead and only an error handler failing past
    /// [`MAX_ERROR_DEPTH`] levels is silently dropped.
    pub fn emit(&self, event: &str, arg: &A) -> Result<bool, ListenerError> {
        self.emit_nested(event, arg, 0)
    }

    fn emit_nested(&self, event: &str, arg: &A, depth: usize) -> Result<bool, ListenerError> {
        if event.is_empty() {
            return Ok(false);
        }

        let (handlers, guarded) = {
            let listeners = self.listeners.lock();
            let guarded = listeners.iter().any(|l| l.key == ERROR);
            let handlers: Vec<Handler<A>> = listeners
                .iter()
                .filter(|l| l.key == event)
                .map(|l| Arc::clone(&l.handler))
                .collect();
            (handlers, guarded)
        };

        for handler in handlers {
            match handler(arg) {
                Ok(()) => {}
                Err(err) if guarded => self.emit_failure(err, depth)?,
                Err(err) => return Err(err),
            }
        }

        Ok(true)
    }

    fn emit_failure(&self, err: ListenerError, depth: usize) -> Result<(), ListenerError> {
        if depth >= MAX_ERROR_DEPTH {
            tracing::warn!(depth, error = %err, "dropping nested error emission");
            return Ok(());
        }
        self.emit_nested(ERROR, &A::from(err), depth + 1).map(|_| ())
    }
}

impl<A> Default for EventSource<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventSource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.listeners.lock().iter().map(|l| l.key.clone()).collect();
        f.debug_struct("EventSource")
            .field("listeners", &keys)
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`EventSource::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`Subscription::unsubscribe`]. Calls after the first are no-ops.
pub struct Subscription<A = EventArg> {
    listeners: Weak<Listeners<A>>,
    key: String,
    handler: Option<Handler<A>>,
}

impl<A> Subscription<A> {
    /// Removes the subscribed listener.
    pub fn unsubscribe(&mut self) {
        if let Some(handler) = self.handler.take()
            && let Some(listeners) = self.listeners.upgrade()
        {
            remove_listener(&listeners, &self.key, &handler);
        }
    }

    /// Returns `true` until [`Self::unsubscribe`] has been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handler.is_some()
    }
}

impl<A> fmt::Debug for Subscription<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let h = handler(move |_: &EventArg| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, h)
    }

    fn failing(message: &'static str) -> Handler {
        handler(move |_: &EventArg| Err(ListenerError::new(message)))
    }

    #[test]
    fn on_deduplicates_identical_pairs() {
        let source = EventSource::new();
        let (_, h) = counter();
        source.on("x", Arc::clone(&h)).on("x", Arc::clone(&h));
        assert_eq!(source.listener_count("x"), 1);

        let (_, other) = counter();
        source.on("x", other);
        assert_eq!(source.listener_count("x"), 2);
    }

    #[test]
    fn on_ignores_empty_event_name() {
        let source = EventSource::new();
        let (_, h) = counter();
        source.on("", h);
        assert_eq!(source.listener_count(""), 0);
        assert!(!source.has_listener(""));
    }

    #[test]
    fn same_handler_under_two_events_is_two_listeners() {
        let source = EventSource::new();
        let (count, h) = counter();
        source.on("a", Arc::clone(&h)).on("b", Arc::clone(&h));
        assert!(source.emit("a", &EventArg::Empty).unwrap_or(false));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        source.off("a", &h);
        assert!(!source.has_listener("a"));
        assert!(source.has_listener("b"));
    }

    #[test]
    fn off_twice_is_noop() {
        let source = EventSource::new();
        let (_, h) = counter();
        source.on("x", Arc::clone(&h));
        source.off("x", &h);
        source.off("x", &h);
        assert_eq!(source.listener_count("x"), 0);
    }

    #[test]
    fn emit_with_empty_name_returns_false() {
        let source = EventSource::new();
        let (count, h) = counter();
        source.on("x", h);
        assert_eq!(source.emit("", &EventArg::Empty), Ok(false));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_without_listeners_returns_true() {
        let source: EventSource = EventSource::new();
        assert_eq!(source.emit("nobody", &EventArg::Empty), Ok(true));
    }

    #[test]
    fn emit_runs_in_registration_order() {
        let source = EventSource::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3u8 {
            let order = Arc::clone(&order);
            source.on(
                "x",
                handler(move |_: &EventArg| {
                    order.lock().push(id);
                    Ok(())
                }),
            );
        }
        let (_, unrelated) = counter();
        source.on("y", unrelated);

        assert_eq!(source.emit("x", &EventArg::Empty), Ok(true));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn emit_passes_argument() {
        let source = EventSource::new();
        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        source.on(
            "data",
            handler(move |arg: &EventArg| {
                *sink.lock() = Some(arg.clone());
                Ok(())
            }),
        );
        let _ = source.emit("data", &EventArg::Data(vec![1, 2]));
        assert_eq!(*got.lock(), Some(EventArg::Data(vec![1, 2])));
    }

    #[test]
    fn failure_propagates_without_error_listener() {
        let source = EventSource::new();
        let (after, h) = counter();
        source.on("x", failing("boom")).on("x", h);

        let result = source.emit("x", &EventArg::Empty);
        assert_eq!(result, Err(ListenerError::new("boom")));
        // fail-fast: later listeners do not run
        assert_eq!(after.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failure_is_reemitted_once_per_failing_handler() {
        let source = EventSource::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        source.on(
            ERROR,
            handler(move |arg: &EventArg| {
                sink.lock().push(arg.clone());
                Ok(())
            }),
        );
        let (after, h) = counter();
        source
            .on("x", failing("first"))
            .on("x", failing("second"))
            .on("x", h);

        assert_eq!(source.emit("x", &EventArg::Empty), Ok(true));
        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(
            *errors.lock(),
            vec![
                EventArg::Failure(ListenerError::new("first")),
                EventArg::Failure(ListenerError::new("second")),
            ]
        );
    }

    #[test]
    fn failing_error_handler_recursion_is_bounded() {
        let source = EventSource::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        source.on(
            ERROR,
            handler(move |_: &EventArg| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(ListenerError::new("again"))
            }),
        );
        source.on("x", failing("boom"));

        assert_eq!(source.emit("x", &EventArg::Empty), Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ERROR_DEPTH);
    }

    #[test]
    fn concurrent_emission_has_its_own_error_depth() {
        let source = Arc::new(EventSource::new());
        let weak = Arc::downgrade(&source);
        let outer_calls = Arc::new(AtomicUsize::new(0));
        let inner_seen = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&outer_calls);
        let seen = Arc::clone(&inner_seen);
        source.on(
            ERROR,
            handler(move |arg: &EventArg| {
                let EventArg::Failure(err) = arg else {
                    return Ok(());
                };
                if err.message() == "inner" {
                    seen.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                // deepest outer level: emit from another thread
                if calls.fetch_add(1, Ordering::SeqCst) + 1 == MAX_ERROR_DEPTH {
                    if let Some(source) = weak.upgrade() {
                        let other =
                            std::thread::spawn(move || source.emit("inner", &EventArg::Empty));
                        assert_eq!(other.join().ok(), Some(Ok(true)));
                    }
                }
                Err(ListenerError::new("outer"))
            }),
        );
        source.on("x", failing("outer")).on("inner", failing("inner"));

        assert_eq!(source.emit("x", &EventArg::Empty), Ok(true));
        assert_eq!(outer_calls.load(Ordering::SeqCst), MAX_ERROR_DEPTH);
        assert_eq!(inner_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_returns_working_unsubscribe() {
        let source = EventSource::new();
        let (count, h) = counter();
        let mut sub = source.subscribe("x", h);
        assert!(sub.is_active());
        let _ = source.emit("x", &EventArg::Empty);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        let _ = source.emit("x", &EventArg::Empty);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(source.listener_count("x"), 0);
    }

    #[test]
    fn unsubscribe_after_source_dropped_is_noop() {
        let source = EventSource::new();
        let (_, h) = counter();
        let mut sub = source.subscribe("x", h);
        drop(source);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }

    #[test]
    fn handler_may_register_during_emission() {
        let source = Arc::new(EventSource::new());
        let inner = Arc::clone(&source);
        let (count, late) = counter();
        source.on(
            "x",
            handler(move |_: &EventArg| {
                inner.on("x", Arc::clone(&late));
                Ok(())
            }),
        );
        let _ = source.emit("x", &EventArg::Empty);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        let _ = source.emit("x", &EventArg::Empty);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
