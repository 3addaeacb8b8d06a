use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by every `subscribe*`/`on_*` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Synchronous callback fan-out, run on the caller's thread in registration
/// order. Each emit works on a snapshot, so a callback may subscribe,
/// unsubscribe or emit again on the same list.
pub struct Subscribers<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Callback<T>)>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Subscribers {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the id was never registered here or was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Invoke every callback registered at the time of the call.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_in_registration_order() {
        let subs: Subscribers<i32> = Subscribers::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let log = log.clone();
            subs.subscribe(move |v: &i32| log.lock().push(format!("{}{}", tag, v)));
        }

        subs.emit(&7);
        assert_eq!(*log.lock(), vec!["a7", "b7", "c7"]);
    }

    #[test]
    fn test_unsubscribe() {
        let subs: Subscribers<()> = Subscribers::new();
        let hits = Arc::new(AtomicU64::new(0));

        let h = hits.clone();
        let id = subs.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        subs.emit(&());
        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        subs.emit(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_reentrant_subscribe_does_not_join_current_dispatch() {
        let subs: Arc<Subscribers<()>> = Arc::new(Subscribers::new());
        let hits = Arc::new(AtomicU64::new(0));

        let inner_subs = subs.clone();
        let inner_hits = hits.clone();
        subs.subscribe(move |_| {
            let h = inner_hits.clone();
            inner_subs.subscribe(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        });

        subs.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(subs.len(), 2);

        subs.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
