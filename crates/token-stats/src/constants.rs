//! Centralized constants for the stats service
//!
//! This module contains all magic numbers, endpoints, and default
//! configuration values to make them easy to find and update.

// =============================================================================
// Chain API Endpoints
// =============================================================================

/// Combined supply counters endpoint
pub const SUPPLY_ENDPOINT: &str = "/v1/chain/get_supply";

/// Generic table row lookup endpoint
pub const TABLE_ROWS_ENDPOINT: &str = "/v1/chain/get_table_rows";

/// Chain info endpoint (chain identity)
pub const CHAIN_INFO_ENDPOINT: &str = "/v1/chain/get_info";

// =============================================================================
// On-chain Table Locations
// =============================================================================

/// Treasury contract account
pub const TREASURY_CODE: &str = "fio.treasury";

/// Treasury table scope
pub const TREASURY_SCOPE: &str = "fio.treasury";

/// Block-producer reward pool table
pub const BP_REWARDS_TABLE: &str = "bprewards";

/// Locked block-producer reward bucket table
pub const BP_BUCKET_TABLE: &str = "bpbucketpool";

/// Staking contract account
pub const STAKING_CODE: &str = "fio.staking";

/// Staking table scope
pub const STAKING_SCOPE: &str = "fio.staking";

/// Staking pool table
pub const STAKING_TABLE: &str = "staking";

/// Row limit for the staking table fetch (only the first row is used)
pub const STAKING_FETCH_LIMIT: u32 = 25;

// =============================================================================
// Refresh Scheduling
// =============================================================================

/// Seconds between refresh cycles
pub const REFRESH_INTERVAL_SECS: u64 = 126;

/// Maximum age of the last refresh before the watchdog gives up
pub const STALENESS_THRESHOLD_SECS: u64 = 3600;

/// Seconds between watchdog staleness checks
pub const WATCHDOG_POLL_SECS: u64 = 60;

/// Hard deadline for the block-producer reward table fetch
pub const BP_REWARD_DEADLINE_SECS: u64 = 2;

/// Deadline for each snapshot store get/set
pub const STORE_OP_DEADLINE_SECS: u64 = 10;

// =============================================================================
// Token Math
// =============================================================================

/// Minimal units (SUFs) per whole token
pub const SUFS_PER_TOKEN: u64 = 1_000_000_000;

// =============================================================================
// Staking Activation
// =============================================================================

/// Combined token pool must exceed this for staking to be active (SUFs)
pub const ACTIVATION_POOL_THRESHOLD: u64 = 1_000_000_000_000_000;

/// Production network chain id, which additionally gates activation on a date
pub const MAINNET_CHAIN_ID: &str =
    "21dcae42c0182200e93f954a074011f9048a7624c6fe81d3c9541a614a88bd1c";

/// Earliest instant staking can be active on the production network
pub const MAINNET_ACTIVATION_DATE: &str = "2022-02-22T00:00:00Z";

// =============================================================================
// Snapshot Storage
// =============================================================================

/// History store key format, one entry per UTC calendar date
pub const DATE_KEY_FORMAT: &str = "%Y%m%d";

/// Snapshot database filename
pub const SNAPSHOT_DB_FILENAME: &str = "snapshots.sqlite";

// =============================================================================
// Read Surface
// =============================================================================

/// Default HTTP listen port
pub const DEFAULT_PORT: u16 = 8080;
