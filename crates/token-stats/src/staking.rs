//! Staking yield computation
//!
//! ROE is the ratio of the combined token pool to the global SRP count.
//! Both counters are minimal-unit integers that can exceed the range a
//! 64-bit float represents exactly, so all ratio math runs on `BigDecimal`
//! and collapses to `f64` only at the output boundary.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::{ChainReader, u64_flexible};
use crate::constants;
use crate::store::SnapshotStore;

/// Failure modes that discard the whole staking payload for a cycle
#[derive(Debug, Error)]
pub enum StakingError {
    #[error("chain query failed: {0:#}")]
    Chain(anyhow::Error),
    #[error("no staking rows returned")]
    NoRows,
    #[error("cannot compute ROE: global SRP count is zero")]
    ZeroSrps,
}

// =============================================================================
// Data Model
// =============================================================================

/// One staking-pool record as reported by the chain, minimal units.
/// Large values arrive as decimal strings, hence the flexible decoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StakingRow {
    #[serde(deserialize_with = "u64_flexible", default)]
    pub staked_token_pool: u64,
    #[serde(deserialize_with = "u64_flexible", default)]
    pub global_srp_count: u64,
    #[serde(deserialize_with = "u64_flexible", default)]
    pub rewards_token_pool: u64,
    #[serde(deserialize_with = "u64_flexible", default)]
    pub combined_token_pool: u64,
    #[serde(deserialize_with = "u64_flexible", default)]
    pub last_combined_token_pool: u64,
    #[serde(deserialize_with = "u64_flexible", default)]
    pub staking_rewards_reserves_minted: u64,
}

/// Trailing yield figures; each window is independently present
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalApr {
    #[serde(rename = "1day", skip_serializing_if = "Option::is_none")]
    pub one_day: Option<f64>,
    #[serde(rename = "7day", skip_serializing_if = "Option::is_none")]
    pub seven_day: Option<f64>,
    #[serde(rename = "30day", skip_serializing_if = "Option::is_none")]
    pub thirty_day: Option<f64>,
}

/// Raw ("suffix") staking snapshot in minimal units; this is the form
/// persisted to the history store. `global_srp_count` and
/// `last_combined_token_pool` are fetch bookkeeping, zeroed before the
/// snapshot is published or persisted so serialization omits them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakingRewardsSuf {
    pub staked_token_pool: u64,
    pub outstanding_srps: u64,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub global_srp_count: u64,
    pub rewards_token_pool: u64,
    pub combined_token_pool: u64,
    #[serde(skip_serializing_if = "is_zero", default)]
    pub last_combined_token_pool: u64,
    pub staking_rewards_reserves_minted: u64,
    pub roe: f64,
    pub active: bool,
    #[serde(default)]
    pub historical_apr: HistoricalApr,
}

/// Whole-token staking snapshot for human consumption; never feeds back
/// into computation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakingRewards {
    pub staked_token_pool: f64,
    pub outstanding_srps: f64,
    pub rewards_token_pool: f64,
    pub combined_token_pool: f64,
    pub staking_rewards_reserves_minted: f64,
    pub roe: f64,
    pub active: bool,
    pub historical_apr: HistoricalApr,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

// =============================================================================
// Computation
// =============================================================================

/// History store key for a calendar date, UTC
pub fn date_key(at: DateTime<Utc>) -> String {
    at.format(constants::DATE_KEY_FORMAT).to_string()
}

fn roe_decimal(combined_token_pool: u64, srp_count: u64) -> Result<BigDecimal, StakingError> {
    if srp_count == 0 {
        return Err(StakingError::ZeroSrps);
    }
    Ok(BigDecimal::from(combined_token_pool) / BigDecimal::from(srp_count))
}

fn suf_to_whole(value: u64) -> f64 {
    (BigDecimal::from(value) / BigDecimal::from(constants::SUFS_PER_TOKEN))
        .to_f64()
        .unwrap_or_default()
}

/// Whether staking rewards have activated on this chain. The production
/// network additionally gates activation on a launch date.
fn staking_active(chain_id: &str, combined_token_pool: u64, now: DateTime<Utc>) -> bool {
    let over_threshold = combined_token_pool > constants::ACTIVATION_POOL_THRESHOLD;
    if chain_id == constants::MAINNET_CHAIN_ID {
        let activates_at = DateTime::parse_from_rfc3339(constants::MAINNET_ACTIVATION_DATE)
            .unwrap()
            .with_timezone(&Utc);
        over_threshold && now >= activates_at
    } else {
        over_threshold
    }
}

/// APR over one trailing window: (today / past − 1) × (365 / days) × 100.
/// Any miss (absent entry, store failure, undecodable or unusable snapshot)
/// omits this window only.
async fn window_apr(
    store: &dyn SnapshotStore,
    today_roe: &BigDecimal,
    now: DateTime<Utc>,
    days: i64,
) -> Option<f64> {
    let key = date_key(now - Duration::days(days));
    let bytes = match store.get(&key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            log::warn!("no historic ROE information found for {key}");
            return None;
        }
        Err(e) => {
            log::warn!("{days} day ROE lookup failed: {e:#}");
            return None;
        }
    };

    let past: StakingRewardsSuf = match serde_json::from_slice(&bytes) {
        Ok(past) => past,
        Err(e) => {
            log::warn!("undecodable snapshot for {key}: {e}");
            return None;
        }
    };

    // the stored form carries the SRP count in outstanding_srps
    let past_roe = match roe_decimal(past.combined_token_pool, past.outstanding_srps) {
        Ok(roe) if !roe.is_zero() => roe,
        _ => {
            log::warn!("snapshot for {key} has no usable ROE");
            return None;
        }
    };

    let ratio = today_roe / &past_roe;
    let diff = (ratio - BigDecimal::from(1)).to_f64()?;
    Some(diff * (365.0 / days as f64) * 100.0)
}

async fn historical_apr(
    store: &dyn SnapshotStore,
    today_roe: &BigDecimal,
    now: DateTime<Utc>,
) -> HistoricalApr {
    HistoricalApr {
        one_day: window_apr(store, today_roe, now, 1).await,
        seven_day: window_apr(store, today_roe, now, 7).await,
        thirty_day: window_apr(store, today_roe, now, 30).await,
    }
}

/// Project the raw snapshot into whole tokens; ROE, activation and the APR
/// windows carry through unchanged
pub fn to_whole(suf: &StakingRewardsSuf) -> StakingRewards {
    StakingRewards {
        staked_token_pool: suf_to_whole(suf.staked_token_pool),
        outstanding_srps: suf_to_whole(suf.outstanding_srps),
        rewards_token_pool: suf_to_whole(suf.rewards_token_pool),
        combined_token_pool: suf_to_whole(suf.combined_token_pool),
        staking_rewards_reserves_minted: suf_to_whole(suf.staking_rewards_reserves_minted),
        roe: suf.roe,
        active: suf.active,
        historical_apr: suf.historical_apr,
    }
}

/// Fetch the latest staking row, derive ROE, the trailing APR windows and
/// the activation flag, persist today's raw snapshot, and shape both output
/// projections.
pub async fn update(
    chain: &dyn ChainReader,
    store: &dyn SnapshotStore,
    now: DateTime<Utc>,
) -> Result<(StakingRewards, StakingRewardsSuf), StakingError> {
    let rows = chain
        .get_staking_rows(constants::STAKING_FETCH_LIMIT)
        .await
        .map_err(StakingError::Chain)?;
    let row = rows.into_iter().next().ok_or(StakingError::NoRows)?;

    let today_roe = roe_decimal(row.combined_token_pool, row.global_srp_count)?;

    let mut suf = StakingRewardsSuf {
        staked_token_pool: row.staked_token_pool,
        outstanding_srps: 0,
        global_srp_count: row.global_srp_count,
        rewards_token_pool: row.rewards_token_pool,
        combined_token_pool: row.combined_token_pool,
        last_combined_token_pool: row.last_combined_token_pool,
        staking_rewards_reserves_minted: row.staking_rewards_reserves_minted,
        roe: today_roe.to_f64().unwrap_or_default(),
        active: false,
        historical_apr: HistoricalApr::default(),
    };

    // copy the SRP count to its public field, then zero the bookkeeping
    // fields so the persisted and published forms omit them
    suf.outstanding_srps = suf.global_srp_count;
    suf.global_srp_count = 0;
    suf.last_combined_token_pool = 0;

    suf.historical_apr = historical_apr(store, &today_roe, now).await;

    let chain_id = chain.get_chain_id().await.map_err(StakingError::Chain)?;
    suf.active = staking_active(&chain_id, suf.combined_token_pool, now);

    let whole = to_whole(&suf);

    // best-effort: the published output does not depend on the write landing
    match serde_json::to_vec(&suf) {
        Ok(payload) => {
            if let Err(e) = store.set(&date_key(now), &payload).await {
                log::warn!("failed to persist staking snapshot: {e:#}");
            }
        }
        Err(e) => log::warn!("failed to serialize staking snapshot: {e}"),
    }

    Ok((whole, suf))
}
