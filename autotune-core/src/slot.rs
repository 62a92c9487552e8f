//! Single-value publish/subscribe cell shared between threads.
//!
//! A [`Slot`] holds at most one value plus a version counter that increases on
//! every publication. Readers either take a snapshot or block on the condition
//! variable until a value they accept shows up or a timeout passes. An empty
//! slot means "nothing available yet", never an error.
//!
//! The motor reader publishes acknowledgement lines into one slot and the
//! command waiter consumes them; the audio cycle publishes cents readings into
//! another and the tuning controller waits on it.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A value together with the publication that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug)]
struct SlotState<T> {
    value: Option<T>,
    version: u64,
}

#[derive(Debug)]
pub struct Slot<T> {
    state: Mutex<SlotState<T>>,
    changed: Condvar,
}

impl<T: Clone> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Slot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                version: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Stores a value, bumps the version and wakes all waiters.
    pub fn publish(&self, value: T) -> u64 {
        let mut state = self.lock();
        state.value = Some(value);
        state.version += 1;
        let version = state.version;
        drop(state);
        self.changed.notify_all();
        version
    }

    /// Empties the slot. The version is left alone.
    pub fn clear(&self) {
        self.lock().value = None;
    }

    pub fn get(&self) -> Option<T> {
        self.lock().value.clone()
    }

    pub fn snapshot(&self) -> Option<Stamped<T>> {
        let state = self.lock();
        state.value.clone().map(|value| Stamped {
            value,
            version: state.version,
        })
    }

    /// Version of the latest publication; 0 if nothing was ever published.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    /// Blocks until the slot holds a value accepted by `ready` or `timeout`
    /// passes. `ready` sees the value and its version.
    pub fn wait_for<F>(&self, timeout: Duration, mut ready: F) -> Option<Stamped<T>>
    where
        F: FnMut(&T, u64) -> bool,
    {
        let guard = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| {
                !state
                    .value
                    .as_ref()
                    .is_some_and(|value| ready(value, state.version))
            })
            .unwrap_or_else(PoisonError::into_inner);

        match state.value.as_ref() {
            Some(value) if ready(value, state.version) => Some(Stamped {
                value: value.clone(),
                version: state.version,
            }),
            _ => None,
        }
    }

    /// Waits for any publication newer than `after`.
    pub fn wait_newer(&self, after: u64, timeout: Duration) -> Option<Stamped<T>> {
        self.wait_for(timeout, |_, version| version > after)
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn publish_and_clear() {
        let slot = Slot::new();
        assert_eq!(slot.get(), None);
        assert_eq!(slot.version(), 0);

        assert_eq!(slot.publish(1.5_f32), 1);
        assert_eq!(slot.snapshot(), Some(Stamped { value: 1.5, version: 1 }));

        slot.clear();
        assert_eq!(slot.get(), None);
        assert_eq!(slot.version(), 1);
    }

    #[test]
    fn wait_times_out_without_publication() {
        let slot: Slot<String> = Slot::new();
        let start = Instant::now();
        assert!(slot.wait_newer(0, Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn stale_value_does_not_satisfy_newer_wait() {
        let slot = Slot::new();
        let seen = slot.publish(3.0_f32);
        assert!(slot.wait_newer(seen, Duration::from_millis(20)).is_none());
        assert!(slot.wait_newer(seen - 1, Duration::from_millis(20)).is_some());
    }

    #[test]
    fn waiter_wakes_on_publication() {
        let slot = Arc::new(Slot::new());
        let publisher = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            publisher.publish("BUSY".to_string());
            thread::sleep(Duration::from_millis(30));
            publisher.publish("DONE 30".to_string());
        });

        let got = slot.wait_for(Duration::from_secs(5), |line, _| line.contains("DONE"));
        assert_eq!(got.map(|s| s.value), Some("DONE 30".to_string()));
        handle.join().unwrap();
    }
}
