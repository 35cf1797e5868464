// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Launch monitor: turns the factory's `PairCreated` feed into a filtered,
//! deduplicated stream of [`TokenLaunchEvent`]s.

use super::pair_feed::{decode_pair_created, PairCreatedLog, PairEventSource, RawPairLog};
use crate::cache::BoundedCache;
use crate::error::FeedError;
use crate::task::{next_backoff, LoopHandle, Shutdown};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default number of launches kept in memory.
pub const DEFAULT_LAUNCH_CACHE: usize = 100;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub factory: Address,
    /// Wrapped native token every accepted pair must include.
    pub base_token: Address,
    pub cache_size: usize,
    pub blacklist: Vec<Address>,
    pub whitelist: Vec<Address>,
    /// Upper bound on a single observer call.
    pub observer_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub stop_grace: Duration,
}

impl MonitorConfig {
    pub fn new(factory: Address, base_token: Address) -> Self {
        Self {
            factory,
            base_token,
            cache_size: DEFAULT_LAUNCH_CACHE,
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            observer_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// A newly created pair that trades a fresh token against the base token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLaunchEvent {
    pub token: Address,
    pub paired_with: Address,
    pub token0: Address,
    pub token1: Address,
    pub pair: Address,
    /// `allPairsLength` reported by the factory.
    pub index: u64,
    pub block_number: Option<u64>,
    pub tx_hash: Option<B256>,
    pub observed_at: DateTime<Utc>,
}

/// Receives every accepted launch.
#[async_trait]
pub trait LaunchObserver: Send + Sync {
    fn name(&self) -> &str {
        "observer"
    }

    async fn notify(&self, event: &TokenLaunchEvent) -> anyhow::Result<()>;
}

/// Why a pair was not turned into a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    NoBaseToken,
    BothBase,
    Blacklisted,
    NotWhitelisted,
}

/// Pick the new token out of a pair, applying the base-token rule and lists.
pub fn classify_pair(
    log: &PairCreatedLog,
    base: Address,
    blacklist: &HashSet<Address>,
    whitelist: &HashSet<Address>,
) -> Result<Address, FilterReason> {
    let token = match (log.token0 == base, log.token1 == base) {
        (true, true) => return Err(FilterReason::BothBase),
        (false, false) => return Err(FilterReason::NoBaseToken),
        (true, false) => log.token1,
        (false, true) => log.token0,
    };
    if blacklist.contains(&token) {
        return Err(FilterReason::Blacklisted);
    }
    if !whitelist.is_empty() && !whitelist.contains(&token) {
        return Err(FilterReason::NotWhitelisted);
    }
    Ok(token)
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub factory: Address,
    pub base_token: Address,
    pub cached_launches: usize,
    pub cache_capacity: usize,
    pub observers: usize,
    pub blacklist_size: usize,
    pub whitelist_size: usize,
    pub accepted: u64,
    pub duplicates: u64,
    pub filtered: u64,
    pub decode_errors: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    filtered: AtomicU64,
    decode_errors: AtomicU64,
}

struct Inner {
    config: MonitorConfig,
    source: Arc<dyn PairEventSource>,
    launches: BoundedCache<TokenLaunchEvent>,
    observers: RwLock<Vec<Arc<dyn LaunchObserver>>>,
    blacklist: RwLock<HashSet<Address>>,
    whitelist: RwLock<HashSet<Address>>,
    counters: Counters,
}

pub struct LaunchMonitor {
    inner: Arc<Inner>,
    task: LoopHandle,
}

impl LaunchMonitor {
    pub fn new(config: MonitorConfig, source: Arc<dyn PairEventSource>) -> Self {
        let blacklist = config.blacklist.iter().copied().collect();
        let whitelist = config.whitelist.iter().copied().collect();
        Self {
            inner: Arc::new(Inner {
                launches: BoundedCache::new(config.cache_size),
                config,
                source,
                observers: RwLock::new(Vec::new()),
                blacklist: RwLock::new(blacklist),
                whitelist: RwLock::new(whitelist),
                counters: Counters::default(),
            }),
            task: LoopHandle::new("launch monitor"),
        }
    }

    /// Begin consuming the factory feed. No-op if already running.
    pub fn start(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.task.start(move |shutdown| run(inner, shutdown))
    }

    pub async fn stop(&self) -> bool {
        self.task.stop(self.inner.config.stop_grace).await
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn on_launch(&self, observer: Arc<dyn LaunchObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Unregister by identity. Returns `false` if it was not registered.
    pub fn remove_launch(&self, observer: &Arc<dyn LaunchObserver>) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    /// The last `limit` launches, newest last.
    pub fn recent_launches(&self, limit: usize) -> Vec<TokenLaunchEvent> {
        self.inner.launches.recent(limit)
    }

    pub fn launch_by_token(&self, token: Address) -> Option<TokenLaunchEvent> {
        self.inner.launches.find(|e| e.token == token)
    }

    pub fn add_blacklist(&self, token: Address) -> bool {
        self.inner.blacklist.write().insert(token)
    }

    pub fn remove_blacklist(&self, token: Address) -> bool {
        self.inner.blacklist.write().remove(&token)
    }

    pub fn add_whitelist(&self, token: Address) -> bool {
        self.inner.whitelist.write().insert(token)
    }

    pub fn remove_whitelist(&self, token: Address) -> bool {
        self.inner.whitelist.write().remove(&token)
    }

    pub fn clear_cache(&self) {
        self.inner.launches.clear();
        info!("🧹 Launch cache cleared");
    }

    /// Feed a raw log through the same path as the live subscription.
    pub async fn ingest(&self, raw: RawPairLog) -> Option<TokenLaunchEvent> {
        self.inner.process(raw).await
    }

    pub fn status(&self) -> MonitorStatus {
        let inner = &self.inner;
        MonitorStatus {
            running: self.is_running(),
            factory: inner.config.factory,
            base_token: inner.config.base_token,
            cached_launches: inner.launches.len(),
            cache_capacity: inner.launches.capacity(),
            observers: inner.observers.read().len(),
            blacklist_size: inner.blacklist.read().len(),
            whitelist_size: inner.whitelist.read().len(),
            accepted: inner.counters.accepted.load(Ordering::Relaxed),
            duplicates: inner.counters.duplicates.load(Ordering::Relaxed),
            filtered: inner.counters.filtered.load(Ordering::Relaxed),
            decode_errors: inner.counters.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    async fn process(&self, raw: RawPairLog) -> Option<TokenLaunchEvent> {
        let log = match decode_pair_created(&raw) {
            Ok(log) => log,
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping undecodable log: {}", e);
                return None;
            }
        };

        let verdict = {
            let blacklist = self.blacklist.read();
            let whitelist = self.whitelist.read();
            classify_pair(&log, self.config.base_token, &blacklist, &whitelist)
        };
        let token = match verdict {
            Ok(token) => token,
            Err(reason) => {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring pair {}: {:?}", log.pair, reason);
                return None;
            }
        };

        let event = TokenLaunchEvent {
            token,
            paired_with: self.config.base_token,
            token0: log.token0,
            token1: log.token1,
            pair: log.pair,
            index: log.index,
            block_number: log.block_number,
            tx_hash: log.transaction_hash,
            observed_at: Utc::now(),
        };

        let pair = event.pair;
        if !self.launches.push_unique(event.clone(), |e| e.pair == pair) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!("Duplicate PairCreated for {}", pair);
            return None;
        }
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        info!(
            "🆕 New launch: token {} pair {} (#{})",
            event.token, event.pair, event.index
        );

        self.notify_all(&event).await;
        Some(event)
    }

    async fn notify_all(&self, event: &TokenLaunchEvent) {
        let observers: Vec<_> = self.observers.read().clone();
        let timeout = self.config.observer_timeout;
        let calls = observers.iter().map(|observer| async move {
            let call = AssertUnwindSafe(observer.notify(event)).catch_unwind();
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("Observer {} failed: {:#}", observer.name(), e),
                Ok(Err(_)) => error!("Observer {} panicked", observer.name()),
                Err(_) => warn!("Observer {} timed out after {:?}", observer.name(), timeout),
            }
        });
        futures_util::future::join_all(calls).await;
    }
}

async fn run(inner: Arc<Inner>, mut shutdown: Shutdown) {
    let factory = inner.config.factory;
    let mut backoff = inner.config.backoff_initial;

    while !shutdown.is_triggered() {
        let mut stream = match shutdown.race(inner.source.subscribe(factory)).await {
            None => break,
            Some(Ok(stream)) => {
                backoff = inner.config.backoff_initial;
                stream
            }
            Some(Err(e)) => {
                warn!("Subscribe failed: {}, retrying in {:?}", e, backoff);
                if !shutdown.sleep(backoff).await {
                    break;
                }
                backoff = next_backoff(backoff, inner.config.backoff_max);
                continue;
            }
        };

        loop {
            match shutdown.race(stream.next()).await {
                None => return,
                Some(Some(Ok(raw))) => {
                    inner.process(raw).await;
                }
                Some(Some(Err(FeedError::Decode(e)))) => {
                    inner.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping undecodable message: {}", e);
                }
                Some(Some(Err(e))) => {
                    warn!("Subscription dropped: {}, reconnecting in {:?}", e, backoff);
                    break;
                }
                Some(None) => {
                    warn!("Subscription ended, reconnecting in {:?}", backoff);
                    break;
                }
            }
        }

        if !shutdown.sleep(backoff).await {
            break;
        }
        backoff = next_backoff(backoff, inner.config.backoff_max);
    }
    debug!("Launch monitor loop exited");
}

#[cfg(test)]
mod tests {
    use super::super::pair_feed::testing::{pair_log, ChannelSource};
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn base() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn factory() -> Address {
        Address::repeat_byte(0xfa)
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            cache_size: 3,
            observer_timeout: Duration::from_millis(50),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
            stop_grace: Duration::from_secs(1),
            ..MonitorConfig::new(factory(), base())
        }
    }

    fn launch(n: u8) -> RawPairLog {
        pair_log(
            factory(),
            Address::repeat_byte(n),
            base(),
            Address::repeat_byte(0x80 + n),
            n as u64,
        )
    }

    fn monitor() -> LaunchMonitor {
        LaunchMonitor::new(test_config(), Arc::new(ChannelSource::new()))
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl LaunchObserver for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn notify(&self, _event: &TokenLaunchEvent) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl LaunchObserver for Failing {
        async fn notify(&self, _event: &TokenLaunchEvent) -> anyhow::Result<()> {
            anyhow::bail!("downstream unavailable")
        }
    }

    struct Panicking;

    #[async_trait]
    impl LaunchObserver for Panicking {
        async fn notify(&self, _event: &TokenLaunchEvent) -> anyhow::Result<()> {
            panic!("observer bug")
        }
    }

    struct Hanging;

    #[async_trait]
    impl LaunchObserver for Hanging {
        async fn notify(&self, _event: &TokenLaunchEvent) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_pair_is_recorded_once() {
        let monitor = monitor();
        assert!(monitor.ingest(launch(1)).await.is_some());
        assert!(monitor.ingest(launch(1)).await.is_none());

        let recent = monitor.recent_launches(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].token, Address::repeat_byte(1));
        assert_eq!(monitor.status().duplicates, 1);
    }

    #[tokio::test]
    async fn new_token_is_the_non_base_side() {
        let monitor = monitor();
        let raw = pair_log(
            factory(),
            base(),
            Address::repeat_byte(7),
            Address::repeat_byte(0x77),
            9,
        );
        let event = monitor.ingest(raw).await.unwrap();
        assert_eq!(event.token, Address::repeat_byte(7));
        assert_eq!(event.paired_with, base());
        assert_eq!(event.index, 9);
        assert_eq!(monitor.launch_by_token(Address::repeat_byte(7)), Some(event));
    }

    #[tokio::test]
    async fn pairs_without_exactly_one_base_side_are_ignored() {
        let monitor = monitor();
        let none = pair_log(
            factory(),
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Address::repeat_byte(3),
            1,
        );
        let both = pair_log(factory(), base(), base(), Address::repeat_byte(4), 2);
        assert!(monitor.ingest(none).await.is_none());
        assert!(monitor.ingest(both).await.is_none());
        assert!(monitor.recent_launches(10).is_empty());
        assert_eq!(monitor.status().filtered, 2);
    }

    #[tokio::test]
    async fn black_and_white_lists_apply() {
        let monitor = monitor();
        monitor.add_blacklist(Address::repeat_byte(1));
        assert!(monitor.ingest(launch(1)).await.is_none());

        monitor.add_whitelist(Address::repeat_byte(3));
        assert!(monitor.ingest(launch(2)).await.is_none());
        assert!(monitor.ingest(launch(3)).await.is_some());

        monitor.remove_whitelist(Address::repeat_byte(3));
        monitor.remove_blacklist(Address::repeat_byte(1));
        assert!(monitor.ingest(launch(1)).await.is_some());
        assert!(monitor.ingest(launch(2)).await.is_some());
    }

    #[tokio::test]
    async fn cache_keeps_newest_launches() {
        let monitor = monitor();
        for n in 1..=5 {
            monitor.ingest(launch(n)).await;
        }
        let tokens: Vec<_> = monitor.recent_launches(10).iter().map(|e| e.token).collect();
        assert_eq!(
            tokens,
            vec![
                Address::repeat_byte(3),
                Address::repeat_byte(4),
                Address::repeat_byte(5)
            ]
        );
        assert_eq!(monitor.recent_launches(1)[0].token, Address::repeat_byte(5));

        monitor.clear_cache();
        assert!(monitor.recent_launches(10).is_empty());
    }

    #[tokio::test]
    async fn misbehaving_observers_do_not_affect_others() {
        let monitor = monitor();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        monitor.on_launch(Arc::new(Failing));
        monitor.on_launch(Arc::new(Panicking));
        monitor.on_launch(Arc::new(Hanging));
        monitor.on_launch(counting.clone());

        assert!(monitor.ingest(launch(1)).await.is_some());
        assert!(monitor.ingest(launch(2)).await.is_some());
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn removed_observer_is_not_called() {
        let monitor = monitor();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let as_observer: Arc<dyn LaunchObserver> = counting.clone();
        monitor.on_launch(Arc::clone(&as_observer));

        monitor.ingest(launch(1)).await;
        assert!(monitor.remove_launch(&as_observer));
        assert!(!monitor.remove_launch(&as_observer));
        monitor.ingest(launch(2)).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loop_resubscribes_after_transport_error() {
        let source = Arc::new(ChannelSource::new());
        let first = source.add_subscription();
        let second = source.add_subscription();
        let monitor = LaunchMonitor::new(test_config(), source.clone());

        assert!(monitor.start());
        assert!(!monitor.start());

        first.send(Ok(launch(1))).unwrap();
        first.send(Err(FeedError::Decode("garbage".into()))).unwrap();
        first.send(Ok(launch(2))).unwrap();
        first.send(Err(FeedError::Transport("socket reset".into()))).unwrap();
        second.send(Ok(launch(3))).unwrap();
        second.send(Ok(launch(3))).unwrap();

        let mut waited = Duration::ZERO;
        while monitor.recent_launches(10).len() < 3 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        let tokens: Vec<_> = monitor.recent_launches(10).iter().map(|e| e.token).collect();
        assert_eq!(
            tokens,
            vec![
                Address::repeat_byte(1),
                Address::repeat_byte(2),
                Address::repeat_byte(3)
            ]
        );
        assert_eq!(source.subscriptions.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.status().decode_errors, 1);

        assert!(monitor.stop().await);
        assert!(!monitor.is_running());
        assert!(!monitor.stop().await);
    }

    #[tokio::test]
    async fn loop_keeps_retrying_failed_subscriptions() {
        let source = Arc::new(ChannelSource::new());
        let monitor = LaunchMonitor::new(test_config(), source.clone());
        monitor.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(monitor.is_running());
        assert!(source.subscriptions.load(Ordering::SeqCst) >= 3);

        let late = source.add_subscription();
        late.send(Ok(launch(4))).unwrap();
        let mut waited = Duration::ZERO;
        while monitor.recent_launches(1).is_empty() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert_eq!(monitor.recent_launches(1)[0].token, Address::repeat_byte(4));
        monitor.stop().await;
    }
}
