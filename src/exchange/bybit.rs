//! Bybit v5 REST client for USDT-perpetual (linear) futures.
//!
//! Market data uses the public endpoints; order placement signs requests
//! with HMAC-SHA256 per the v5 authentication scheme.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::engine::EngineError;

use super::types::{
    Candle, OrderBookLevel, OrderBookSnapshot, OrderFill, OrderSide, Ticker, Timeframe,
};
use super::Exchange;

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.bybit.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";

/// Bybit v5 REST client. API credentials are only required for order
/// placement; market data works without them.
pub struct BybitClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::Deserialize<'de>"))]
struct ApiResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    // [startTime, open, high, low, close, volume, turnover], newest first
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OrderBookResult {
    a: Vec<(String, String)>,
    b: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[derive(Debug, Deserialize)]
struct TickerResult {
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    #[serde(rename = "orderId")]
    order_id: String,
}

impl BybitClient {
    /// Public-data-only client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            api_key: None,
            api_secret: None,
        })
    }

    /// Client with trading credentials from `BYBIT_API_KEY` /
    /// `BYBIT_API_SECRET`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BYBIT_API_KEY").context("BYBIT_API_KEY not set")?;
        let api_secret = std::env::var("BYBIT_API_SECRET").context("BYBIT_API_SECRET not set")?;

        let mut client = Self::new()?;
        client.api_key = Some(api_key);
        client.api_secret = Some(api_secret);
        Ok(client)
    }

    /// Custom base URL (for testing).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn get_public<T: DeserializeOwned>(&self, url: &str) -> Result<T, EngineError> {
        debug!(url, "exchange GET");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::DataUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::DataUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("bad response body: {e}")))?;

        if body.ret_code != 0 {
            return Err(EngineError::DataUnavailable(format!(
                "retCode {}: {}",
                body.ret_code, body.ret_msg
            )));
        }

        body.result
            .ok_or_else(|| EngineError::DataUnavailable("empty result".to_string()))
    }

    fn sign(&self, secret: &str, timestamp: &str, api_key: &str, body: &str) -> Result<String, EngineError> {
        let payload = format!("{timestamp}{api_key}{RECV_WINDOW}{body}");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| EngineError::OrderRejected("invalid API secret".to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn parse_decimal(s: &str, what: &str) -> Result<Decimal, EngineError> {
        s.parse()
            .map_err(|_| EngineError::DataUnavailable(format!("unparsable {what}: {s}")))
    }
}

#[async_trait]
impl Exchange for BybitClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError> {
        let url = format!(
            "{}/v5/market/kline?category={}&symbol={}&interval={}&limit={}",
            self.base_url,
            CATEGORY,
            symbol,
            timeframe.interval(),
            limit
        );

        let result: KlineResult = self.get_public(&url).await?;

        let mut candles = Vec::with_capacity(result.list.len());
        for row in &result.list {
            if row.len() < 6 {
                return Err(EngineError::DataUnavailable(format!(
                    "short kline row: {} fields",
                    row.len()
                )));
            }
            let ts_ms: i64 = row[0]
                .parse()
                .map_err(|_| EngineError::DataUnavailable(format!("bad timestamp: {}", row[0])))?;
            let timestamp = chrono::DateTime::from_timestamp_millis(ts_ms)
                .ok_or_else(|| EngineError::DataUnavailable(format!("bad timestamp: {ts_ms}")))?;

            candles.push(Candle {
                timestamp,
                open: Self::parse_decimal(&row[1], "open")?,
                high: Self::parse_decimal(&row[2], "high")?,
                low: Self::parse_decimal(&row[3], "low")?,
                close: Self::parse_decimal(&row[4], "close")?,
                volume: Self::parse_decimal(&row[5], "volume")?,
            });
        }

        // the API returns newest first; the engine wants oldest first
        candles.reverse();
        Ok(candles)
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, EngineError> {
        let url = format!(
            "{}/v5/market/orderbook?category={}&symbol={}&limit=50",
            self.base_url, CATEGORY, symbol
        );

        let result: OrderBookResult = self.get_public(&url).await?;

        let parse_side = |levels: &[(String, String)]| -> Result<Vec<OrderBookLevel>, EngineError> {
            levels
                .iter()
                .map(|(price, size)| {
                    Ok(OrderBookLevel {
                        price: Self::parse_decimal(price, "level price")?,
                        size: Self::parse_decimal(size, "level size")?,
                    })
                })
                .collect()
        };

        Ok(OrderBookSnapshot {
            asks: parse_side(&result.a)?,
            bids: parse_side(&result.b)?,
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, EngineError> {
        let url = format!(
            "{}/v5/market/tickers?category={}&symbol={}",
            self.base_url, CATEGORY, symbol
        );

        let result: TickerResult = self.get_public(&url).await?;
        let entry = result
            .list
            .first()
            .ok_or_else(|| EngineError::DataUnavailable(format!("no ticker for {symbol}")))?;

        Ok(Ticker {
            last: Self::parse_decimal(&entry.last_price, "last price")?,
        })
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<OrderFill, EngineError> {
        let (api_key, api_secret) = match (&self.api_key, &self.api_secret) {
            (Some(k), Some(s)) => (k, s),
            _ => {
                return Err(EngineError::OrderRejected(
                    "API credentials not configured".to_string(),
                ))
            }
        };

        let body = serde_json::json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side.as_str(),
            "orderType": "Market",
            "qty": qty.to_string(),
        })
        .to_string();

        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(api_secret, &timestamp, api_key, &body)?;

        let url = format!("{}/v5/order/create", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::DataUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::DataUnavailable(format!(
                "HTTP {} placing order",
                response.status()
            )));
        }

        let parsed: ApiResponse<OrderResult> = response
            .json()
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("bad order response: {e}")))?;

        if parsed.ret_code != 0 {
            return Err(EngineError::OrderRejected(format!(
                "retCode {}: {}",
                parsed.ret_code, parsed.ret_msg
            )));
        }

        let order = parsed
            .result
            .ok_or_else(|| EngineError::OrderRejected("empty order result".to_string()))?;

        // the create endpoint returns no fill price; report the current
        // last trade as the fill estimate
        let ticker = self.fetch_ticker(symbol).await?;

        Ok(OrderFill {
            order_id: order.order_id,
            fill_price: ticker.last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_rows_parse_and_reverse() {
        let raw = r#"{
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "list": [
                    ["1670610000000","17055","17073","17027","17052","300","5"],
                    ["1670609700000","17071","17073","17027","17055","268","4"]
                ]
            }
        }"#;
        let parsed: ApiResponse<KlineResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.ret_code, 0);
        let list = parsed.result.unwrap().list;
        assert_eq!(list.len(), 2);
        // newest first on the wire
        assert_eq!(list[0][0], "1670610000000");
    }

    #[test]
    fn error_envelope_carries_ret_code() {
        let raw = r#"{"retCode": 10001, "retMsg": "params error", "result": null}"#;
        let parsed: ApiResponse<KlineResult> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.ret_code, 10001);
        assert!(parsed.result.is_none());
    }

    #[test]
    fn signature_is_stable_hex() {
        let client = BybitClient::new().unwrap();
        let sig = client
            .sign("secret", "1700000000000", "key", r#"{"qty":"1"}"#)
            .unwrap();
        // HMAC-SHA256 output is 32 bytes -> 64 hex chars, deterministic
        assert_eq!(sig.len(), 64);
        assert_eq!(
            sig,
            client
                .sign("secret", "1700000000000", "key", r#"{"qty":"1"}"#)
                .unwrap()
        );
    }
}
