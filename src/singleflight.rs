//! In-flight de-duplication of concurrent identical work.
//!
//! When several tasks ask for the same key at once, the first one (the
//! leader) runs the work and every other task (the waiters) receives a clone
//! of the leader's result instead of repeating it.
//!
//! Used by the block cache, the source resolver, archive handle opens, the
//! parsed-style memo and render pool creation.
//!
//! # Cancellation
//!
//! If the leader's future is dropped before it finishes, the key is released
//! and one of the waiters takes over as the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// State of one in-flight call.
enum CallState<V> {
    Pending,
    Done(V),
    Abandoned,
}

struct Call<V> {
    notify: Notify,
    state: Mutex<CallState<V>>,
}

impl<V: Clone> Call<V> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            state: Mutex::new(CallState::Pending),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallState<V>> {
        // The critical sections never panic, so poisoning cannot carry a
        // half-written state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for the leader. `None` means the leader gave up.
    async fn wait(&self) -> Option<V> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the state so a completion between the
            // check and the await is not lost.
            notified.as_mut().enable();

            let settled = match &*self.lock() {
                CallState::Done(value) => Some(Some(value.clone())),
                CallState::Abandoned => Some(None),
                CallState::Pending => None,
            };
            if let Some(result) = settled {
                return result;
            }

            notified.await;
        }
    }

    fn finish(&self, state: CallState<V>) {
        *self.lock() = state;
        self.notify.notify_waiters();
    }
}

/// Coalesces concurrent calls that share a key.
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<K, Arc<Call<V>>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `work` for `key`, or join a run already in progress.
    ///
    /// Results are not retained: once the leader finishes, the next call for
    /// the same key starts fresh. Callers that want memoization put the result
    /// in their own cache before returning from `work`.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let call = loop {
            let existing = {
                let mut calls = self.calls();
                match calls.get(&key) {
                    Some(call) => call.clone(),
                    None => {
                        let call = Arc::new(Call::new());
                        calls.insert(key.clone(), call.clone());
                        break call;
                    }
                }
            };

            if let Some(value) = existing.wait().await {
                return value;
            }
        };

        let mut guard = LeaderGuard {
            flight: self,
            key: &key,
            call: &call,
            finished: false,
        };

        let value = work().await;

        guard.complete(value.clone());
        value
    }

    /// Number of keys currently being worked on.
    pub fn in_flight(&self) -> usize {
        self.calls().len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the key if the leader is dropped mid-flight.
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    flight: &'a SingleFlight<K, V>,
    key: &'a K,
    call: &'a Arc<Call<V>>,
    finished: bool,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn complete(&mut self, value: V) {
        self.flight.calls().remove(self.key);
        self.call.finish(CallState::Done(value));
        self.finished = true;
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        if !self.finished {
            self.flight.calls().remove(self.key);
            self.call.finish(CallState::Abandoned);
        }
    }
}
