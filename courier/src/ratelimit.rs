//! Per-channel concurrency and rate limiting for the outbound Sender.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use tokio::sync::Semaphore;
use uuid::Uuid;

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The two knobs each configured channel gets independently: how many sends
/// may be in flight at once, and how many per second may start.
pub struct ChannelLimiter {
    pub concurrency: Arc<Semaphore>,
    pub rate: Arc<GovernorLimiter>,
}

impl ChannelLimiter {
    fn new(max_concurrency: usize, max_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(max_per_second.max(1)).unwrap());
        Self {
            concurrency: Arc::new(Semaphore::new(max_concurrency.max(1))),
            rate: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

/// Sharded per-channel limiter table. `dashmap` avoids a single global lock
/// across every channel's send path; each channel only contends with itself.
pub struct LimiterRegistry {
    limiters: DashMap<Uuid, Arc<ChannelLimiter>>,
    default_concurrency: usize,
    default_rate_per_second: u32,
}

impl LimiterRegistry {
    pub fn new(default_concurrency: usize, default_rate_per_second: u32) -> Self {
        Self {
            limiters: DashMap::new(),
            default_concurrency,
            default_rate_per_second,
        }
    }

    pub fn get_or_insert(&self, channel_uuid: Uuid) -> Arc<ChannelLimiter> {
        self.limiters
            .entry(channel_uuid)
            .or_insert_with(|| Arc::new(ChannelLimiter::new(self.default_concurrency, self.default_rate_per_second)))
            .clone()
    }

    pub fn get_or_insert_with(&self, channel_uuid: Uuid, max_concurrency: usize, max_per_second: u32) -> Arc<ChannelLimiter> {
        self.limiters
            .entry(channel_uuid)
            .or_insert_with(|| Arc::new(ChannelLimiter::new(max_concurrency, max_per_second)))
            .clone()
    }

    pub fn default_concurrency(&self) -> usize {
        self.default_concurrency
    }

    pub fn default_rate_per_second(&self) -> u32 {
        self.default_rate_per_second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn distinct_channels_get_distinct_limiters() {
        let registry = LimiterRegistry::new(2, 10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let limiter_a = registry.get_or_insert(a);
        let limiter_b = registry.get_or_insert(b);
        assert_eq!(limiter_a.concurrency.available_permits(), 2);
        assert_eq!(limiter_b.concurrency.available_permits(), 2);
        assert!(!Arc::ptr_eq(&limiter_a.concurrency, &limiter_b.concurrency));
    }

    #[tokio::test]
    async fn same_channel_reuses_limiter() {
        let registry = LimiterRegistry::new(2, 10);
        let a = Uuid::new_v4();
        let first = registry.get_or_insert(a);
        let second = registry.get_or_insert(a);
        assert!(Arc::ptr_eq(&first.concurrency, &second.concurrency));
    }

    /// A channel declaring its own concurrency cap (e.g. a low-volume
    /// aggregator limited to one in-flight send) gets that cap instead of
    /// the process-wide default, and the override sticks on reuse.
    #[tokio::test]
    async fn per_channel_override_replaces_the_default() {
        let registry = LimiterRegistry::new(3, 10);
        let channel_uuid = Uuid::new_v4();
        let limiter = registry.get_or_insert_with(channel_uuid, 1, 80);
        assert_eq!(limiter.concurrency.available_permits(), 1);

        let reused = registry.get_or_insert_with(channel_uuid, 1, 80);
        assert!(Arc::ptr_eq(&limiter.concurrency, &reused.concurrency));
    }
}
