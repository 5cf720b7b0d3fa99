use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Single-slot hand-off buffer with overwrite-newest semantics.
///
/// Producers replace whatever is in the slot and bump a generation counter.
/// Consumers remember the last generation they saw and wait for a larger one,
/// so a slow consumer skips straight to the newest value instead of draining
/// a backlog.
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    generation: u64,
    closed: bool,
}

/// Outcome of a bounded wait on the slot.
#[derive(Debug)]
pub enum SlotRead<T> {
    Value { generation: u64, value: T },
    Timeout,
    Closed,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                generation: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the slot contents. Returns the new generation.
    pub fn publish(&self, value: T) -> u64 {
        let mut state = self.lock();
        state.value = Some(value);
        state.generation += 1;
        let generation = state.generation;
        drop(state);
        self.ready.notify_all();
        generation
    }

    /// Wake every waiter and refuse further waits once the slot is empty.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Move the current value out, waiting up to `timeout` for one to arrive.
    pub fn take(&self, timeout: Duration) -> SlotRead<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(value) = state.value.take() {
                return SlotRead::Value {
                    generation: state.generation,
                    value,
                };
            }
            if state.closed {
                return SlotRead::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotRead::Timeout;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T: Clone> LatestSlot<T> {
    pub fn latest(&self) -> Option<(u64, T)> {
        let state = self.lock();
        state
            .value
            .as_ref()
            .map(|value| (state.generation, value.clone()))
    }

    /// Wait for a value newer than generation `seen`.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> SlotRead<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.generation > seen {
                if let Some(value) = state.value.as_ref() {
                    return SlotRead::Value {
                        generation: state.generation,
                        value: value.clone(),
                    };
                }
            }
            if state.closed {
                return SlotRead::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotRead::Timeout;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn publish_overwrites_older_value() {
        let slot = LatestSlot::new();
        slot.publish(1);
        slot.publish(2);
        assert_eq!(slot.latest(), Some((2, 2)));
    }

    #[test]
    fn take_moves_value_out() {
        let slot = LatestSlot::new();
        slot.publish("frame".to_string());
        match slot.take(Duration::from_millis(10)) {
            SlotRead::Value { generation, value } => {
                assert_eq!(generation, 1);
                assert_eq!(value, "frame");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            slot.take(Duration::from_millis(10)),
            SlotRead::Timeout
        ));
    }

    #[test]
    fn wait_newer_skips_seen_generation() {
        let slot = Arc::new(LatestSlot::new());
        slot.publish(10u32);
        assert!(matches!(
            slot.wait_newer(1, Duration::from_millis(20)),
            SlotRead::Timeout
        ));

        let producer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.publish(11);
        });
        match slot.wait_newer(1, Duration::from_secs(2)) {
            SlotRead::Value { generation, value } => {
                assert_eq!(generation, 2);
                assert_eq!(value, 11);
            }
            other => panic!("unexpected {other:?}"),
        }
        handle.join().expect("producer");
    }

    #[test]
    fn close_wakes_waiters() {
        let slot: Arc<LatestSlot<u8>> = Arc::new(LatestSlot::new());
        let closer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        assert!(matches!(
            slot.wait_newer(0, Duration::from_secs(5)),
            SlotRead::Closed
        ));
        handle.join().expect("closer");
    }
}
