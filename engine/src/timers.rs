//! Timer tier: callbacks ordered by `(deadline, registration order)`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use pledge_core::Task;
use pledge_types::TimerId;

/// Cancelled timers are removed from `callbacks` immediately and skipped
/// lazily when they reach the top of `order`.
pub(crate) struct TimerQueue {
    order: BinaryHeap<Reverse<(Duration, u64)>>,
    callbacks: HashMap<u64, Task>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            order: BinaryHeap::new(),
            callbacks: HashMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn insert(&mut self, deadline: Duration, task: Task) -> TimerId {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.order.push(Reverse((deadline, seq)));
        self.callbacks.insert(seq, task);
        TimerId::new(seq)
    }

    /// Returns false if the timer already fired or was already cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.callbacks.remove(&id.value()).is_some()
    }

    pub(crate) fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.order.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<(TimerId, Task)> {
        self.discard_cancelled();
        let Reverse((deadline, seq)) = *self.order.peek()?;
        if deadline > now {
            return None;
        }
        self.order.pop();
        let task = self.callbacks.remove(&seq)?;
        Some((TimerId::new(seq), task))
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, seq))) = self.order.peek() {
            if self.callbacks.contains_key(seq) {
                break;
            }
            self.order.pop();
        }
    }
}
