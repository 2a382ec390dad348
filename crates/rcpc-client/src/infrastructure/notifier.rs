//! Publish/subscribe registry for network events.
//!
//! The session never knows who is interested in its events.  Screens and
//! feature modules register an [`NetworkEventListener`] with the
//! [`EventNotifier`] while they are alive and unregister when they go away.
//!
//! # Delivery rules
//!
//! - Fan-out is synchronous: `publish` returns after every listener ran.
//! - Listeners must not assume an order relative to each other.
//! - A listener added while a publish is in flight may or may not see that event.
//! - Once [`EventNotifier::unsubscribe`] returns, the listener is never called
//!   again.  If its callback is running on another thread, `unsubscribe` waits
//!   for it to finish.
//! - Called from inside any callback, `unsubscribe` does not wait.  A listener
//!   may remove itself or another listener there; a removed listener that is
//!   mid-callback on another thread finishes that call, and no new call starts.
//! - A panicking listener is logged and skipped.  The publisher and the other
//!   listeners carry on.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::infrastructure::network::NetworkEvent;

thread_local! {
    /// Listener callbacks currently running on this thread, over all notifiers.
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Receives every event published on the notifier it is registered with.
///
/// Match on [`NetworkEvent::kind`] and ignore the cases you do not care about.
pub trait NetworkEventListener: Send + Sync {
    fn on_event(&self, event: &NetworkEvent);
}

impl<F> NetworkEventListener for F
where
    F: Fn(&NetworkEvent) + Send + Sync,
{
    fn on_event(&self, event: &NetworkEvent) {
        self(event)
    }
}

/// Handle returned by [`EventNotifier::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Slot {
    id: ListenerId,
    listener: Arc<dyn NetworkEventListener>,
    active: AtomicBool,
    /// Held for the duration of each callback.
    dispatch: Mutex<()>,
}

/// Thread-safe fan-out of [`NetworkEvent`]s to any number of listeners.
#[derive(Default)]
pub struct EventNotifier {
    slots: Mutex<Vec<Arc<Slot>>>,
    next_id: AtomicU64,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` and returns the handle used to remove it.
    pub fn subscribe(&self, listener: Arc<dyn NetworkEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot {
            id,
            listener,
            active: AtomicBool::new(true),
            dispatch: Mutex::new(()),
        });
        self.slots.lock().expect("lock poisoned").push(slot);
        id
    }

    /// Registers a closure as a listener.
    pub fn subscribe_fn<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Removes a listener.  Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let slot = {
            let mut slots = self.slots.lock().expect("lock poisoned");
            match slots.iter().position(|s| s.id == id) {
                Some(index) => slots.swap_remove(index),
                None => return false,
            }
        };

        slot.active.store(false, Ordering::Release);

        // Waiting from inside a callback could close a cycle of dispatch locks.
        if !in_callback() {
            drop(slot.dispatch.lock().expect("lock poisoned"));
        }
        true
    }

    /// Delivers `event` to every registered listener.
    pub fn publish(&self, event: &NetworkEvent) {
        let snapshot: Vec<Arc<Slot>> = self.slots.lock().expect("lock poisoned").clone();

        for slot in snapshot {
            let _dispatch = slot.dispatch.lock().expect("lock poisoned");
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }

            DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| slot.listener.on_event(event)));
            DISPATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));

            if outcome.is_err() {
                warn!(
                    attempt = %event.attempt,
                    "listener {:?} panicked while handling {:?}",
                    slot.id,
                    event.kind
                );
            }
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.slots.lock().expect("lock poisoned").len()
    }
}

fn in_callback() -> bool {
    DISPATCH_DEPTH.with(|depth| depth.get() > 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
