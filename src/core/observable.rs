// src/core/observable.rs
//! Shared value cell with synchronous subscribers and an async watch channel

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

struct Shared<T> {
    value: watch::Sender<T>,
    listeners: Mutex<Listeners<T>>,
}

/// Cloning shares the underlying cell.
pub struct Observable<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                value,
                listeners: Mutex::new(Listeners {
                    next_id: 0,
                    entries: Vec::new(),
                }),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.shared.value.borrow().clone()
    }

    /// Store `next` and notify subscribers if it differs from the current value.
    /// Returns whether a change happened.
    pub fn set(&self, next: T) -> bool {
        self.set_when(next, |_, _| true)
    }

    /// Like `set`, but `accept(current, next)` decides atomically whether `next` replaces
    /// the current value. Lets concurrent writers drop updates older than what is stored.
    pub fn set_when<P>(&self, next: T, accept: P) -> bool
    where
        P: FnOnce(&T, &T) -> bool,
    {
        let changed = self.shared.value.send_if_modified(|current| {
            if *current == next || !accept(current, &next) {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if changed {
            self.notify();
        }
        changed
    }

    /// Apply `f` to the current value in place and publish the result.
    /// The read-modify-write happens under the channel lock, so concurrent
    /// updates never overwrite each other.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let changed = self.shared.value.send_if_modified(|current| {
            let before = current.clone();
            f(current);
            *current != before
        });
        if changed {
            self.notify();
        }
        changed
    }

    /// The callback runs once right away with the current value, then on every change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let id = {
            let mut listeners = lock(&self.shared.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::clone(&callback)));
            id
        };
        callback(&self.get());

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    lock(&shared.listeners)
                        .entries
                        .retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub fn watch(&self) -> watch::Receiver<T> {
        self.shared.value.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.listeners).entries.len()
    }

    fn notify(&self) {
        // Callbacks run outside the lock so they may read or subscribe freely.
        // They receive the value current at delivery time, so the last delivery
        // always matches what `get` returns even when writers race.
        let callbacks: Vec<Callback<T>> = lock(&self.shared.listeners)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        let value = self.get();
        for callback in callbacks {
            callback(&value);
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.run_cancel();
    }

    /// Keep the callback registered for the lifetime of the observable.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
