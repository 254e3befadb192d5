use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Decides how long an item waits before it is retried.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay before `item` may be processed again. Counts as one retry.
    fn when(&self, item: &T) -> Duration;

    /// Stop tracking `item` (it succeeded).
    fn forget(&self, item: &T);

    fn num_requeues(&self, item: &T) -> u32;
}

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<T> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<T, u32>>,
}

impl<T> ItemExponentialFailureRateLimiter<T> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Eq + Hash + Clone + Send> RateLimiter<T> for ItemExponentialFailureRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        let Ok(mut failures) = self.failures.lock() else {
            return self.max;
        };
        let count = failures.entry(item.clone()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);
        self.base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max)
    }

    fn forget(&self, item: &T) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.failures
            .lock()
            .map(|f| f.get(item).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Global token bucket shared by all items: `qps` refill rate, `burst`
/// capacity. Each `when` reserves one token; when the bucket is empty the
/// reservation is granted in the future instead of refused.
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    pub fn new(qps: u32, burst: u32) -> Self {
        Self {
            qps: f64::from(qps.max(1)),
            burst: f64::from(burst.max(1)),
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst.max(1)),
                last: Instant::now(),
            }),
        }
    }

    fn reserve(&self) -> Duration {
        let Ok(mut bucket) = self.bucket.lock() else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }
}

impl<T> RateLimiter<T> for BucketRateLimiter {
    fn when(&self, _item: &T) -> Duration {
        self.reserve()
    }

    fn forget(&self, _item: &T) {}

    fn num_requeues(&self, _item: &T) -> u32 {
        0
    }
}

/// Combines limiters by taking the longest delay.
pub struct MaxOfRateLimiter<T> {
    limiters: Vec<Box<dyn RateLimiter<T>>>,
}

impl<T> MaxOfRateLimiter<T> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<T>>>) -> Self {
        Self { limiters }
    }
}

impl<T: Eq + Hash + Clone + Send + 'static> MaxOfRateLimiter<T> {
    /// Per-item exponential backoff bounded below by a global token bucket.
    pub fn controller_default(base: Duration, max: Duration, qps: u32, burst: u32) -> Self {
        Self::new(vec![
            Box::new(ItemExponentialFailureRateLimiter::new(base, max)),
            Box::new(BucketRateLimiter::new(qps, burst)),
        ])
    }
}

impl<T> RateLimiter<T> for MaxOfRateLimiter<T> {
    fn when(&self, item: &T) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(item))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, item: &T) {
        for limiter in &self.limiters {
            limiter.forget(item);
        }
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(item))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_per_item_and_caps() {
        let limiter = ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_millis(30),
        );
        let a = "node-a".to_owned();
        let b = "node-b".to_owned();
        assert_eq!(limiter.when(&a), Duration::from_millis(5));
        assert_eq!(limiter.when(&a), Duration::from_millis(10));
        assert_eq!(limiter.when(&a), Duration::from_millis(20));
        assert_eq!(limiter.when(&a), Duration::from_millis(30));
        assert_eq!(limiter.when(&b), Duration::from_millis(5));
        assert_eq!(limiter.num_requeues(&a), 4);

        limiter.forget(&a);
        assert_eq!(limiter.num_requeues(&a), 0);
        assert_eq!(limiter.when(&a), Duration::from_millis(5));
    }

    #[test]
    fn exponential_does_not_overflow() {
        let limiter = ItemExponentialFailureRateLimiter::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        );
        let mut last = Duration::ZERO;
        for _ in 0..200 {
            last = limiter.when(&1u8);
        }
        assert_eq!(last, Duration::from_secs(1000));
    }

    #[test]
    fn bucket_allows_burst_then_spaces_out() {
        let limiter = BucketRateLimiter::new(10, 3);
        for _ in 0..3 {
            assert_eq!(RateLimiter::<u8>::when(&limiter, &0), Duration::ZERO);
        }
        let delay = RateLimiter::<u8>::when(&limiter, &0);
        assert!(delay > Duration::from_millis(50), "{delay:?}");
        assert!(delay <= Duration::from_millis(100), "{delay:?}");
    }

    #[test]
    fn max_of_takes_longest_delay() {
        let limiter: MaxOfRateLimiter<String> = MaxOfRateLimiter::controller_default(
            Duration::from_millis(5),
            Duration::from_secs(1000),
            50,
            300,
        );
        let key = "node-1".to_owned();
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues(&key), 2);
        limiter.forget(&key);
        assert_eq!(limiter.num_requeues(&key), 0);
    }
}
