use crate::ratelimit::RateLimiter;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct State<T> {
    queue: VecDeque<T>,
    /// Items that need processing: queued, or re-added while processing.
    dirty: HashSet<T>,
    processing: HashSet<T>,
    /// Items scheduled by `add_after`, with the instant they become ready.
    waiting: Vec<(Instant, T)>,
    shutting_down: bool,
}

/// Deduplicating work queue with delayed and rate-limited re-adds.
///
/// An item is never queued twice, and never handed to a second consumer while
/// it is being processed; adding it during processing marks it for one more
/// round once `done` is called. After `shut_down`, `get` returns `None` and
/// adds are ignored.
pub struct RateLimitingQueue<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T: Clone + Eq + Hash + Send> RateLimitingQueue<T> {
    pub fn new(limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: Vec::new(),
                shutting_down: false,
            }),
            cond: Condvar::new(),
            limiter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // A panicking holder cannot leave the sets half-updated in a way that
        // breaks later callers, so recover the guard.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn insert(state: &mut State<T>, item: T) -> bool {
        if state.shutting_down || state.dirty.contains(&item) {
            return false;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return false;
        }
        state.queue.push_back(item);
        true
    }

    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if Self::insert(&mut state, item) {
            self.cond.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed. An item already waiting keeps the
    /// earlier of the two deadlines.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let ready_at = Instant::now() + delay;
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        match state.waiting.iter_mut().find(|(_, waiting)| *waiting == item) {
            Some((at, _)) => *at = (*at).min(ready_at),
            None => state.waiting.push((ready_at, item)),
        }
        self.cond.notify_all();
    }

    /// Re-add `item` after the delay the rate limiter assigns to it.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.limiter.when(&item);
        tracing::debug!("requeue in {delay:?}");
        self.add_after(item, delay);
    }

    /// Reset the item's backoff.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// Block until an item is ready, or return `None` once shut down.
    pub fn get(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if state.shutting_down {
                return None;
            }

            let now = Instant::now();
            let mut i = 0;
            while i < state.waiting.len() {
                if state.waiting[i].0 <= now {
                    let (_, item) = state.waiting.swap_remove(i);
                    Self::insert(&mut state, item);
                } else {
                    i += 1;
                }
            }

            if let Some(item) = state.queue.pop_front() {
                state.dirty.remove(&item);
                state.processing.insert(item.clone());
                return Some(item);
            }

            let next_ready = state.waiting.iter().map(|(at, _)| *at).min();
            state = match next_ready {
                Some(at) => {
                    let timeout = at.saturating_duration_since(now);
                    match self.cond.wait_timeout(state, timeout) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .cond
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
            };
        }
    }

    /// Mark `item` as processed; if it was re-added meanwhile, queue it again.
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            self.cond.notify_one();
        }
    }

    pub fn shut_down(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        self.cond.notify_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Items ready for processing (delayed items excluded).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
