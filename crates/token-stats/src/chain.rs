//! Chain API client
//!
//! Thin reqwest wrapper over the node's HTTP endpoints. Everything the
//! service learns from the chain flows through the [`ChainReader`] trait so
//! the refresh pipeline can be exercised against fakes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants;
use crate::staking::StakingRow;

/// Raw supply counters in minimal units (SUFs)
#[derive(Debug, Clone, Copy, Default)]
pub struct Supply {
    pub circulating: u64,
    pub minted: u64,
    pub locked: u64,
}

/// Read-side boundary to the blockchain node
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Circulating, minted and locked supply in one combined call
    async fn get_supply(&self) -> Result<Supply>;

    /// Locked block-producer reward bucket pool
    async fn get_locked_reward_bucket(&self) -> Result<u64>;

    /// First row's `rewards` field from a keyed table lookup
    async fn get_table_reward(&self, code: &str, scope: &str, table: &str) -> Result<u64>;

    /// Most recent staking rows, newest first
    async fn get_staking_rows(&self, limit: u32) -> Result<Vec<StakingRow>>;

    /// Opaque chain identity string
    async fn get_chain_id(&self) -> Result<String>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

/// ChainReader over the node's JSON HTTP API
pub struct HttpChainReader {
    client: reqwest::Client,
    base_url: String,
}

/// Generic table row lookup request
#[derive(Debug, Serialize)]
struct TableRowsRequest<'a> {
    code: &'a str,
    scope: &'a str,
    table: &'a str,
    json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index_position: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reverse: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TableRowsResponse<T> {
    rows: Vec<T>,
}

/// Treasury tables carry the pool amount in a single `rewards` field
#[derive(Debug, Deserialize)]
struct RewardsRow {
    #[serde(deserialize_with = "u64_flexible")]
    rewards: u64,
}

#[derive(Debug, Deserialize)]
struct SupplyResponse {
    #[serde(deserialize_with = "u64_flexible")]
    circulating_supply: u64,
    #[serde(deserialize_with = "u64_flexible")]
    total_supply: u64,
    #[serde(deserialize_with = "u64_flexible")]
    locked_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    chain_id: String,
}

impl HttpChainReader {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        if !response.status().is_success() {
            anyhow::bail!("chain API {} returned status: {}", path, response.status());
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))
    }
}

#[async_trait]
impl ChainReader for HttpChainReader {
    async fn get_supply(&self) -> Result<Supply> {
        let response: SupplyResponse = self
            .post(constants::SUPPLY_ENDPOINT, &serde_json::json!({}))
            .await?;
        Ok(Supply {
            circulating: response.circulating_supply,
            minted: response.total_supply,
            locked: response.locked_tokens,
        })
    }

    async fn get_locked_reward_bucket(&self) -> Result<u64> {
        self.get_table_reward(
            constants::TREASURY_CODE,
            constants::TREASURY_SCOPE,
            constants::BP_BUCKET_TABLE,
        )
        .await
    }

    async fn get_table_reward(&self, code: &str, scope: &str, table: &str) -> Result<u64> {
        let request = TableRowsRequest {
            code,
            scope,
            table,
            json: true,
            limit: None,
            key_type: None,
            index_position: None,
            reverse: None,
        };
        let response: TableRowsResponse<RewardsRow> =
            self.post(constants::TABLE_ROWS_ENDPOINT, &request).await?;
        let row = response
            .rows
            .into_iter()
            .next()
            .with_context(|| format!("no rows returned for table {table}"))?;
        Ok(row.rewards)
    }

    async fn get_staking_rows(&self, limit: u32) -> Result<Vec<StakingRow>> {
        let request = TableRowsRequest {
            code: constants::STAKING_CODE,
            scope: constants::STAKING_SCOPE,
            table: constants::STAKING_TABLE,
            json: true,
            limit: Some(limit),
            key_type: Some("i64"),
            index_position: Some("1"),
            reverse: Some(true),
        };
        let response: TableRowsResponse<StakingRow> =
            self.post(constants::TABLE_ROWS_ENDPOINT, &request).await?;
        Ok(response.rows)
    }

    async fn get_chain_id(&self) -> Result<String> {
        let response: InfoResponse = self
            .post(constants::CHAIN_INFO_ENDPOINT, &serde_json::json!({}))
            .await?;
        Ok(response.chain_id)
    }
}

// =============================================================================
// Flexible integer decoding
// =============================================================================

/// Decode a u64 that the chain may deliver as a JSON number or as a decimal
/// string (values past 2^53 are serialized as strings to survive JavaScript
/// clients). A field that parses as neither is a numeric-conversion failure.
pub(crate) fn u64_flexible<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct FlexVisitor;

    impl serde::de::Visitor<'_> for FlexVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E>(self, v: i64) -> Result<u64, E>
        where
            E: serde::de::Error,
        {
            u64::try_from(v).map_err(|_| E::custom(format!("negative amount: {v}")))
        }

        fn visit_str<E>(self, v: &str) -> Result<u64, E>
        where
            E: serde::de::Error,
        {
            v.parse()
                .map_err(|_| E::custom(format!("invalid integer string: {v:?}")))
        }
    }

    deserializer.deserialize_any(FlexVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows_request_shape() {
        let request = TableRowsRequest {
            code: "fio.staking",
            scope: "fio.staking",
            table: "staking",
            json: true,
            limit: Some(25),
            key_type: Some("i64"),
            index_position: Some("1"),
            reverse: Some(true),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"code":"fio.staking","scope":"fio.staking","table":"staking","json":true,"limit":25,"key_type":"i64","index_position":"1","reverse":true}"#
        );
    }

    #[test]
    fn test_keyed_request_omits_ordering_fields() {
        let request = TableRowsRequest {
            code: "fio.treasury",
            scope: "fio.treasury",
            table: "bprewards",
            json: true,
            limit: None,
            key_type: None,
            index_position: None,
            reverse: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("limit"));
        assert!(!json.contains("reverse"));
    }

    #[test]
    fn test_rewards_row_parses_number_and_string() {
        let response: TableRowsResponse<RewardsRow> =
            serde_json::from_str(r#"{"rows":[{"rewards":55500000000}],"more":false}"#).unwrap();
        assert_eq!(response.rows[0].rewards, 55_500_000_000);

        let response: TableRowsResponse<RewardsRow> =
            serde_json::from_str(r#"{"rows":[{"rewards":"18446744073709551615"}]}"#).unwrap();
        assert_eq!(response.rows[0].rewards, u64::MAX);
    }

    #[test]
    fn test_supply_response_parses() {
        let response: SupplyResponse = serde_json::from_str(
            r#"{
                "circulating_supply": "250000500000000",
                "total_supply": 1000000000000000,
                "locked_tokens": 300000000000
            }"#,
        )
        .unwrap();
        assert_eq!(response.circulating_supply, 250_000_500_000_000);
        assert_eq!(response.total_supply, 1_000_000_000_000_000);
        assert_eq!(response.locked_tokens, 300_000_000_000);
    }

    #[test]
    fn test_malformed_amount_is_an_error() {
        let result: Result<TableRowsResponse<RewardsRow>, _> =
            serde_json::from_str(r#"{"rows":[{"rewards":"not-a-number"}]}"#);
        assert!(result.is_err());

        let result: Result<TableRowsResponse<RewardsRow>, _> =
            serde_json::from_str(r#"{"rows":[{"rewards":-5}]}"#);
        assert!(result.is_err());
    }
}
