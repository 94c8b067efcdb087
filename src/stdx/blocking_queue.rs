//! Blocking, Closable FIFO Queue
//!
//! # Purpose
//!
//! The ready queue of the scheduler: producers (`add_process`, quantum
//! expiry, allocation retries) push to the tail; the dispatch thread waits
//! for a non-empty queue and then takes the head while holding the core
//! table, so a pid is never in flight between the two.
//!
//! # Correctness Invariants
//!
//! - **FIFO**: `pop()` and `try_pop()` return items in push order.
//!   `push_front()` is the only way to jump the line and is reserved for
//!   shutdown hand-back.
//! - **No lost wakeups**: the `closed` flag lives under the same mutex as the
//!   items, so a `close()` racing with a blocked wait is always observed.
//! - **Clean shutdown**: once closed, blocked and future `pop()` and
//!   `wait_nonempty()` calls return `None`/`false` immediately, even if items
//!   remain. Items stay in
//!   the queue so a later `reopen()` resumes where the previous run stopped.
//!
//! # Performance Characteristics
//!
//! | Operation       | Cost                     |
//! |-----------------|--------------------------|
//! | push()          | Lock + push + notify_one |
//! | pop()           | Lock + condvar wait      |
//! | wait_nonempty() | Lock + condvar wait      |
//! | try_pop()       | Lock + pop_front         |
//! | snapshot()      | Lock + clone             |
//!
//! Mutex + Condvar is the right tool here: the queue sees one operation per
//! scheduling slice, not per instruction.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Multi-producer FIFO with a blocking non-empty wait and shutdown.
///
/// # Thread Safety
///
/// Safe to share across threads via `Arc<BlockingQueue<T>>`.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Create an open, empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Lock state with poison recovery.
    ///
    /// A worker that panicked mid-slice must not wedge the rest of the
    /// scheduler; the queue contents are still structurally valid.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Append `item` to the tail and wake one waiter.
    ///
    /// Pushing into a closed queue is allowed: the item is retained for the
    /// next `reopen()`.
    pub fn push(&self, item: T) {
        let mut st = self.lock();
        st.items.push_back(item);
        drop(st);
        self.cv.notify_one();
    }

    /// Put `item` back at the head.
    ///
    /// Used on shutdown so an item taken off a consumer keeps its place
    /// ahead of everything still waiting.
    pub fn push_front(&self, item: T) {
        let mut st = self.lock();
        st.items.push_front(item);
        drop(st);
        self.cv.notify_one();
    }

    /// Lock and wait until the queue holds an item. `None` once closed.
    fn wait_ready(&self) -> Option<MutexGuard<'_, State<T>>> {
        let mut st = self.lock();
        loop {
            if st.closed {
                return None;
            }
            if !st.items.is_empty() {
                return Some(st);
            }
            st = match self.cv.wait(st) {
                Ok(guard) => guard,
                Err(poison) => poison.into_inner(),
            };
        }
    }

    /// Block until an item arrives, then remove and return the head.
    ///
    /// Returns `None` once the queue has been closed, even if items remain.
    pub fn pop(&self) -> Option<T> {
        self.wait_ready().and_then(|mut st| st.items.pop_front())
    }

    /// Block until the queue holds an item or is closed.
    ///
    /// Returns `false` once the queue has been closed. Nothing is removed:
    /// the caller takes the head with [`try_pop`](Self::try_pop) under
    /// whatever lock makes the hand-off atomic.
    pub fn wait_nonempty(&self) -> bool {
        self.wait_ready().is_some()
    }

    /// Non-blocking pop. Ignores the closed flag.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Close the queue and wake every blocked consumer.
    pub fn close(&self) {
        let mut st = self.lock();
        st.closed = true;
        drop(st);
        self.cv.notify_all();
    }

    /// Re-open a closed queue. Retained items become poppable again.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    /// Snapshot: number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Snapshot: whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<T: Clone> BlockingQueue<T> {
    /// Point-in-time copy of the queue contents, head first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = BlockingQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.snapshot(), vec![0, 1, 2, 3, 4]);
        assert_eq!(q.try_pop(), Some(0));
        assert_eq!(q.try_pop(), Some(1));
        q.push(9);
        assert_eq!(q.snapshot(), vec![2, 3, 4, 9]);
        assert_eq!(q.len(), 4);
        assert!(!q.is_empty());
    }

    #[test]
    fn push_front_jumps_the_line() {
        let q = BlockingQueue::new();
        q.push(1);
        q.push(2);
        q.push_front(0);
        assert_eq!(q.snapshot(), vec![0, 1, 2]);
    }

    #[test]
    fn wait_nonempty_blocks_until_push_and_keeps_the_item() {
        let q = Arc::new(BlockingQueue::new());
        let woke = Arc::new(AtomicBool::new(false));

        let waiter = {
            let q = Arc::clone(&q);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                let ready = q.wait_nonempty();
                woke.store(true, Ordering::SeqCst);
                ready
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!woke.load(Ordering::SeqCst), "must block on empty queue");

        q.push(7u32);
        assert!(waiter.join().unwrap());
        assert_eq!(q.snapshot(), vec![7]);
        assert!(q.wait_nonempty(), "returns at once while items remain");
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(BlockingQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!consumer.is_finished(), "must block on empty queue");
        q.push(5u32);
        assert_eq!(consumer.join().unwrap(), Some(5));
        assert!(q.is_empty());
    }

    #[test]
    fn close_wakes_all_waiters() {
        let q: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.wait_nonempty())
            })
            .collect();
        let popper = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };

        thread::sleep(Duration::from_millis(30));
        q.close();

        for w in waiters {
            assert!(!w.join().unwrap());
        }
        assert_eq!(popper.join().unwrap(), None);
    }

    #[test]
    fn closed_queue_retains_items_for_reopen() {
        let q = BlockingQueue::new();
        q.push(1);
        q.close();
        assert!(!q.wait_nonempty());
        assert_eq!(q.pop(), None, "closed queue yields the stop sentinel");
        assert_eq!(q.len(), 1);

        q.push(2);
        q.reopen();
        assert!(q.wait_nonempty());
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let q = Arc::new(BlockingQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push(p * 1000 + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let seen: Vec<_> = (0..1000).map(|_| q.pop().unwrap()).collect();
        assert!(q.is_empty());

        // Per-producer order is preserved.
        for p in 0..4 {
            let mine: Vec<_> = seen.iter().filter(|v| **v / 1000 == p).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
