//! Bounded word-pool queues shared between the reader and its consumers
//! (§4.8, §9 Design Notes: "prefer a channel or mutex+condvar over rolling
//! your own lock-free queue").

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// One batch of tokenized sentences, or a `None` "finish" marker signalling
/// end of input to a consumer.
pub type Pool = Option<Vec<Vec<u32>>>;

struct Inner {
    queue: VecDeque<Pool>,
    capacity: usize,
}

/// A bounded blocking queue: producers push onto the "full" side after
/// filling a pool, consumers push back an emptied pool onto the "empty"
/// side for reuse. Two `PoolQueue`s (empty/full) together form the word
/// pool described in §4.8.
pub struct PoolQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl PoolQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { queue: VecDeque::with_capacity(capacity), capacity }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Pre-fills the queue with `n` empty (`Some(Vec::new())`) pools, used
    /// to seed the reader's "empty" queue with reusable scratch buffers.
    pub fn seed_empty(&self, n: usize) {
        let mut g = self.inner.lock();
        for _ in 0..n {
            g.queue.push_back(Some(Vec::new()));
        }
        self.not_empty.notify_all();
    }

    /// Blocks until a slot is available, then pushes `pool`.
    pub fn push(&self, pool: Pool) {
        let mut g = self.inner.lock();
        while g.queue.len() >= g.capacity {
            self.not_full.wait(&mut g);
        }
        g.queue.push_back(pool);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available, then pops it.
    pub fn pop(&self) -> Pool {
        let mut g = self.inner.lock();
        while g.queue.is_empty() {
            self.not_empty.wait(&mut g);
        }
        let item = g.queue.pop_front().expect("queue was just observed nonempty");
        self.not_full.notify_one();
        item
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_round_trips_a_pool() {
        let q = PoolQueue::new(2);
        q.push(Some(vec![vec![1, 2, 3]]));
        let popped = q.pop();
        assert_eq!(popped, Some(vec![vec![1, 2, 3]]));
    }

    #[test]
    fn finish_marker_round_trips_as_none() {
        let q = PoolQueue::new(2);
        q.push(None);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pop_blocks_until_a_concurrent_push() {
        let q = Arc::new(PoolQueue::new(1));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(std::time::Duration::from_millis(20));
        q.push(Some(vec![vec![42]]));
        assert_eq!(handle.join().unwrap(), Some(vec![vec![42]]));
    }
}
