//! Refresh pipeline
//!
//! One cycle fetches every published metric from the chain, runs the staking
//! computation, and atomically replaces the published snapshot. Cycles run
//! once at startup and then on a fixed interval; a cycle that outlives the
//! interval causes later ticks to be dropped, never queued. A watchdog
//! terminates the process when no cycle has completed within the staleness
//! threshold, leaving recovery to the supervisor.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};

use crate::chain::ChainReader;
use crate::config::Config;
use crate::constants;
use crate::staking::{self, StakingRewards, StakingRewardsSuf};
use crate::store::SnapshotStore;

/// Both output projections of one staking computation
#[derive(Debug, Clone)]
pub struct StakingPair {
    pub whole: StakingRewards,
    pub suf: StakingRewardsSuf,
}

/// Latest computed snapshot of every published metric. Replaced as a whole
/// each cycle; readers never see it half-updated. Supply figures are whole
/// tokens; `staking` is `None` until a staking cycle has succeeded, and is
/// cleared again whenever one fails.
#[derive(Debug, Clone, Default)]
pub struct PublishedState {
    pub circulating: f64,
    pub minted: f64,
    pub locked: f64,
    pub bp_rewards: f64,
    pub bp_bucket_pool: f64,
    pub staking: Option<StakingPair>,
    pub refreshed: Option<DateTime<Utc>>,
}

/// Drives the fetch-and-compute cycle and owns the only write side of the
/// published state
#[derive(Clone)]
pub struct RefreshScheduler {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn SnapshotStore>,
    config: Arc<Config>,
    publisher: watch::Sender<Arc<PublishedState>>,
    in_flight: Arc<AtomicBool>,
    last_refreshed: Arc<AtomicI64>,
}

impl RefreshScheduler {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn SnapshotStore>,
        config: Arc<Config>,
        publisher: watch::Sender<Arc<PublishedState>>,
    ) -> Self {
        Self {
            chain,
            store,
            config,
            publisher,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_refreshed: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Unix timestamp of the last completed cycle, shared with the watchdog.
    /// Zero until the first cycle completes.
    pub fn last_refreshed(&self) -> Arc<AtomicI64> {
        self.last_refreshed.clone()
    }

    /// Run one cycle immediately, then keep ticking until `shutdown` fires.
    /// A tick that arrives while a cycle is still in flight is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!("refresh loop starting");
        if let Err(e) = self.run_cycle().await {
            log::error!("initial refresh failed: {e:#}");
        }

        let mut tick = interval_at(
            Instant::now() + self.config.refresh_interval,
            self.config.refresh_interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.in_flight.swap(true, Ordering::SeqCst) {
                        log::warn!(
                            "refresh has been running for more than {}s, dropping tick",
                            self.config.refresh_interval.as_secs()
                        );
                        continue;
                    }
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = scheduler.run_cycle().await {
                            log::error!("refresh cycle failed: {e:#}");
                        }
                        scheduler.in_flight.store(false, Ordering::SeqCst);
                    });
                }
                _ = shutdown.changed() => {
                    log::info!("refresh loop stopping");
                    return;
                }
            }
        }
    }

    /// One fetch-and-compute cycle. Supply and reward-bucket failures abort
    /// the cycle and leave the previously published state untouched; the
    /// block-producer reward fetch and the staking update degrade on their
    /// own terms.
    pub async fn run_cycle(&self) -> Result<()> {
        let previous = self.publisher.borrow().clone();

        let supply = self.chain.get_supply().await.context("supply fetch failed")?;
        let bucket = self
            .chain
            .get_locked_reward_bucket()
            .await
            .context("locked reward bucket fetch failed")?;

        let suf_scale = constants::SUFS_PER_TOKEN as f64;
        let mut next = PublishedState {
            circulating: supply.circulating as f64 / suf_scale,
            minted: supply.minted as f64 / suf_scale,
            locked: supply.locked as f64 / suf_scale,
            bp_bucket_pool: bucket as f64 / suf_scale,
            bp_rewards: previous.bp_rewards,
            staking: None,
            refreshed: None,
        };

        // metric-local deadline; the losing future is dropped with the race
        let reward_fetch = self.chain.get_table_reward(
            constants::TREASURY_CODE,
            constants::TREASURY_SCOPE,
            constants::BP_REWARDS_TABLE,
        );
        match timeout(self.config.bp_reward_deadline, reward_fetch).await {
            Ok(Ok(rewards)) if rewards > 0 => {
                next.bp_rewards = rewards as f64 / suf_scale;
            }
            Ok(Ok(_)) => log::warn!("BP reward pool came back zero, keeping previous value"),
            Ok(Err(e)) => log::warn!("BP reward fetch failed, keeping previous value: {e:#}"),
            Err(_) => log::warn!(
                "timeout waiting for BP reward fetch after {}s, keeping previous value",
                self.config.bp_reward_deadline.as_secs()
            ),
        }

        match staking::update(self.chain.as_ref(), self.store.as_ref(), Utc::now()).await {
            Ok((whole, suf)) => next.staking = Some(StakingPair { whole, suf }),
            Err(e) => log::error!("staking update failed, publishing empty payload: {e}"),
        }

        log::info!(
            "refreshed: minted {:.2} circulating {:.2} locked {:.2} bucket {:.2} rewards {:.2}",
            next.minted,
            next.circulating,
            next.locked,
            next.bp_bucket_pool,
            next.bp_rewards
        );

        let now = Utc::now();
        next.refreshed = Some(now);
        self.last_refreshed.store(now.timestamp(), Ordering::SeqCst);
        self.publisher.send_replace(Arc::new(next));
        Ok(())
    }
}

/// Terminate the process when the last refresh is older than the staleness
/// threshold. A wedged pipeline has no safe in-process recovery; the
/// supervisor is expected to restart the service. The hook is injectable so
/// tests can observe the trigger.
pub async fn watchdog<F>(
    last_refreshed: Arc<AtomicI64>,
    poll: std::time::Duration,
    threshold: std::time::Duration,
    fatal: F,
) where
    F: Fn() + Send + 'static,
{
    let mut tick = interval_at(Instant::now() + poll, poll);
    loop {
        tick.tick().await;
        let last = last_refreshed.load(Ordering::SeqCst);
        let age = Utc::now().timestamp().saturating_sub(last);
        if age > threshold.as_secs() as i64 {
            log::error!(
                "last refresh was {age}s ago, more than the {}s staleness threshold. giving up.",
                threshold.as_secs()
            );
            fatal();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Supply;
    use crate::staking::StakingRow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::time::Duration;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            chain_url: "http://chain.test".to_string(),
            port: 0,
            data_dir: PathBuf::from("."),
            refresh_interval: Duration::from_secs(126),
            staleness_threshold: Duration::from_secs(3600),
            watchdog_poll: Duration::from_secs(60),
            bp_reward_deadline: Duration::from_secs(2),
            store_op_deadline: Duration::from_secs(10),
        })
    }

    /// Configurable chain fake for exercising the cycle's failure policies
    #[derive(Default)]
    struct FakeChain {
        supply: Supply,
        supply_calls: AtomicUsize,
        supply_delay: Option<Duration>,
        fail_supply: AtomicBool,
        bucket: u64,
        reward_pool: AtomicU64,
        hang_reward_pool: AtomicBool,
        rows: Mutex<Vec<StakingRow>>,
    }

    #[async_trait]
    impl ChainReader for FakeChain {
        async fn get_supply(&self) -> anyhow::Result<Supply> {
            self.supply_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.supply_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_supply.load(Ordering::SeqCst) {
                anyhow::bail!("chain unreachable");
            }
            Ok(self.supply)
        }

        async fn get_locked_reward_bucket(&self) -> anyhow::Result<u64> {
            Ok(self.bucket)
        }

        async fn get_table_reward(&self, _: &str, _: &str, _: &str) -> anyhow::Result<u64> {
            if self.hang_reward_pool.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(self.reward_pool.load(Ordering::SeqCst))
        }

        async fn get_staking_rows(&self, _: u32) -> anyhow::Result<Vec<StakingRow>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn get_chain_id(&self) -> anyhow::Result<String> {
            Ok("testchain".to_string())
        }
    }

    #[derive(Default)]
    struct MemStore(Mutex<HashMap<String, Vec<u8>>>);

    #[async_trait]
    impl SnapshotStore for MemStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
            self.0.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }
    }

    fn staking_row() -> StakingRow {
        StakingRow {
            staked_token_pool: 100_000_000_000,
            global_srp_count: 200_000_000_000,
            rewards_token_pool: 4_000_000_000,
            combined_token_pool: 104_000_000_000,
            ..Default::default()
        }
    }

    fn healthy_chain() -> FakeChain {
        FakeChain {
            supply: Supply {
                circulating: 250_000_500_000_000,
                minted: 1_000_000_000_000_000,
                locked: 300_000_000_000,
            },
            bucket: 12_250_000_000,
            reward_pool: AtomicU64::new(55_500_000_000),
            rows: Mutex::new(vec![staking_row()]),
            ..Default::default()
        }
    }

    fn scheduler(
        chain: Arc<FakeChain>,
        store: Arc<MemStore>,
    ) -> (RefreshScheduler, watch::Receiver<Arc<PublishedState>>) {
        let (tx, rx) = watch::channel(Arc::new(PublishedState::default()));
        (
            RefreshScheduler::new(chain, store, test_config(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_cycle_publishes_all_metrics() {
        let chain = Arc::new(healthy_chain());
        let (sched, rx) = scheduler(chain, Arc::new(MemStore::default()));

        sched.run_cycle().await.unwrap();

        let state = rx.borrow().clone();
        assert!((state.circulating - 250_000.5).abs() < 1e-9);
        assert!((state.minted - 1_000_000.0).abs() < 1e-9);
        assert!((state.locked - 300.0).abs() < 1e-9);
        assert!((state.bp_bucket_pool - 12.25).abs() < 1e-9);
        assert!((state.bp_rewards - 55.5).abs() < 1e-9);
        assert!(state.staking.is_some());
        assert!(state.refreshed.is_some());
    }

    #[tokio::test]
    async fn test_supply_failure_aborts_and_retains_previous_state() {
        let chain = Arc::new(healthy_chain());
        let (sched, rx) = scheduler(chain.clone(), Arc::new(MemStore::default()));

        sched.run_cycle().await.unwrap();
        let published = rx.borrow().clone();

        chain.fail_supply.store(true, Ordering::SeqCst);
        assert!(sched.run_cycle().await.is_err());

        // nothing was republished, readers still see the last good snapshot
        assert!(Arc::ptr_eq(&published, &rx.borrow().clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reward_pool_timeout_keeps_previous_metric() {
        let chain = Arc::new(healthy_chain());
        let (sched, rx) = scheduler(chain.clone(), Arc::new(MemStore::default()));

        sched.run_cycle().await.unwrap();
        chain.hang_reward_pool.store(true, Ordering::SeqCst);
        sched.run_cycle().await.unwrap();

        let state = rx.borrow().clone();
        assert!((state.bp_rewards - 55.5).abs() < 1e-9);
        // the rest of the cycle still went through
        assert!(state.staking.is_some());
    }

    #[tokio::test]
    async fn test_zero_reward_pool_keeps_previous_metric() {
        let chain = Arc::new(healthy_chain());
        let (sched, rx) = scheduler(chain.clone(), Arc::new(MemStore::default()));

        sched.run_cycle().await.unwrap();
        chain.reward_pool.store(0, Ordering::SeqCst);
        sched.run_cycle().await.unwrap();

        assert!((rx.borrow().bp_rewards - 55.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_staking_failure_publishes_empty_marker() {
        let chain = Arc::new(healthy_chain());
        let (sched, rx) = scheduler(chain.clone(), Arc::new(MemStore::default()));

        sched.run_cycle().await.unwrap();
        assert!(rx.borrow().staking.is_some());

        // fail closed: the previous staking payload is not retained
        chain.rows.lock().unwrap().clear();
        sched.run_cycle().await.unwrap();
        let state = rx.borrow().clone();
        assert!(state.staking.is_none());
        assert!(state.refreshed.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_dropped_not_queued() {
        let chain = Arc::new(FakeChain {
            supply_delay: Some(Duration::from_secs(300)),
            ..healthy_chain()
        });
        let (sched, _rx) = scheduler(chain.clone(), Arc::new(MemStore::default()));

        let (stop_tx, stop_rx) = watch::channel(false);
        let runner = sched.clone();
        tokio::spawn(async move { runner.run(stop_rx).await });

        // each 300s cycle spans several 126s ticks; the spanned ticks must be
        // dropped, so far fewer cycles start than ticks elapse
        tokio::time::sleep(Duration::from_secs(700)).await;
        assert_eq!(chain.supply_calls.load(Ordering::SeqCst), 2);

        let _ = stop_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_when_stale() {
        let last = Arc::new(AtomicI64::new(Utc::now().timestamp() - 7200));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(watchdog(
            last,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            move || {
                let _ = tx.send(());
            },
        ));

        // must trigger within one poll interval
        let fired = tokio::time::timeout(Duration::from_secs(61), rx.recv()).await;
        assert!(fired.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_quiet_while_fresh() {
        let last = Arc::new(AtomicI64::new(Utc::now().timestamp()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(watchdog(
            last,
            Duration::from_secs(60),
            Duration::from_secs(3600),
            move || {
                let _ = tx.send(());
            },
        ));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
        handle.abort();
    }
}
