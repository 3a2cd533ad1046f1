//! KuCoin REST venue adapter.
//!
//! Signing follows the KuCoin v2 scheme: HMAC-SHA256 over
//! `timestamp + method + endpoint + body`, base64-encoded, sent in the
//! `KC-API-*` headers with a separately signed passphrase. Public market
//! data endpoints are unsigned.

use crate::config::KucoinConfig;
use crate::venue::traits::VenueAdapter;
use crate::venue::types::*;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.kucoin.com";
const SANDBOX_URL: &str = "https://openapi-sandbox.kucoin.com";

/// KuCoin API client implementing the venue adapter contract.
pub struct KucoinAdapter {
    name: String,
    http: Client,
    api_key: String,
    api_secret: String,
    api_passphrase: String,
    base_url: String,
}

/// KuCoin wraps every response in `{code, data}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Level1 {
    best_bid: String,
    best_ask: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderCreated {
    order_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetail {
    id: String,
    is_active: bool,
    #[serde(default)]
    deal_size: String,
    #[serde(default)]
    deal_funds: String,
}

#[derive(Debug, Deserialize)]
struct ActiveOrders {
    items: Vec<ActiveOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveOrder {
    id: String,
    symbol: String,
    side: String,
    size: String,
    #[serde(default)]
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    currency: String,
    balance: String,
    available: String,
}

impl KucoinAdapter {
    /// Create a new adapter from configuration.
    pub fn new(name: impl Into<String>, config: &KucoinConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if config.sandbox {
            SANDBOX_URL.to_string()
        } else {
            BASE_URL.to_string()
        };

        Ok(Self {
            name: name.into(),
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            api_passphrase: config.api_passphrase.clone(),
            base_url,
        })
    }

    /// Generate the request signature over `timestamp + method + endpoint + body`.
    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// The passphrase is itself signed with the API secret (key version 2).
    fn signed_passphrase(&self) -> Result<String> {
        self.sign(&self.api_passphrase)
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    /// Issue an authenticated request. `endpoint` must include the query
    /// string since it is part of the signed payload.
    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let timestamp = Self::timestamp_ms().to_string();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let payload = format!("{}{}{}{}", timestamp, method.as_str(), endpoint, body_str);
        let signature = self.sign(&payload)?;

        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self
            .http
            .request(method, &url)
            .header("KC-API-KEY", &self.api_key)
            .header("KC-API-SIGN", signature)
            .header("KC-API-TIMESTAMP", &timestamp)
            .header("KC-API-PASSPHRASE", self.signed_passphrase()?)
            .header("KC-API-KEY-VERSION", "2")
            .header("Content-Type", "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        let envelope: Envelope<T> = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", endpoint))?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint))?;

        Self::unwrap_envelope(envelope, endpoint)
    }

    /// Issue an unauthenticated request to a public endpoint.
    async fn public_request<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let envelope: Envelope<T> = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", endpoint))?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", endpoint))?;

        Self::unwrap_envelope(envelope, endpoint)
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>, endpoint: &str) -> Result<T> {
        if envelope.code != "200000" {
            return Err(anyhow!("KuCoin error {} on {}", envelope.code, endpoint));
        }
        envelope
            .data
            .ok_or_else(|| anyhow!("Empty response body on {}", endpoint))
    }

    fn parse_decimal(value: &str, what: &str) -> Result<Decimal> {
        Decimal::from_str(value).with_context(|| format!("Invalid {} value: {}", what, value))
    }

    fn parse_levels(raw: &[(String, String)], what: &str) -> Result<Vec<BookLevel>> {
        raw.iter()
            .map(|(price, size)| {
                Ok(BookLevel::new(
                    Self::parse_decimal(price, what)?,
                    Self::parse_decimal(size, what)?,
                ))
            })
            .collect()
    }

    fn order_status(detail: &OrderDetail) -> OrderStatus {
        let filled = Decimal::from_str(&detail.deal_size).unwrap_or(Decimal::ZERO);
        if detail.is_active {
            if filled > Decimal::ZERO {
                OrderStatus::Partial
            } else {
                OrderStatus::Pending
            }
        } else if filled > Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::Cancelled
        }
    }
}

#[async_trait]
impl VenueAdapter for KucoinAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self))]
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<BookLevels> {
        // KuCoin offers aggregated part books at 20 or 100 levels
        let levels = if depth <= 20 { 20 } else { 100 };
        let endpoint = format!(
            "/api/v1/market/orderbook/level2_{}?symbol={}",
            levels,
            urlencoding::encode(symbol)
        );
        let raw: RawBook = self.public_request(&endpoint).await?;

        let mut bids = Self::parse_levels(&raw.bids, "bid")?;
        let mut asks = Self::parse_levels(&raw.asks, "ask")?;
        bids.truncate(depth);
        asks.truncate(depth);

        Ok(BookLevels { bids, asks })
    }

    #[instrument(skip(self))]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let endpoint = format!(
            "/api/v1/market/orderbook/level1?symbol={}",
            urlencoding::encode(symbol)
        );
        let level1: Level1 = self.public_request(&endpoint).await?;

        Ok(Ticker {
            bid: Self::parse_decimal(&level1.best_bid, "bid")?,
            ask: Self::parse_decimal(&level1.best_ask, "ask")?,
            last: Self::parse_decimal(&level1.price, "last")?,
        })
    }

    #[instrument(skip(self, request), fields(symbol = %request.symbol, side = %request.side))]
    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueOrderAck> {
        let client_oid = request
            .client_order_id
            .clone()
            .unwrap_or_else(|| Self::timestamp_ms().to_string());

        let mut body = json!({
            "clientOid": client_oid,
            "side": request.side.to_string(),
            "symbol": request.symbol,
            "size": request.quantity.to_string(),
        });

        match request.order_type {
            OrderType::Market => {
                body["type"] = json!("market");
            }
            OrderType::Limit | OrderType::Ioc => {
                let price = request
                    .price
                    .ok_or_else(|| anyhow!("Limit order requires a price"))?;
                body["type"] = json!("limit");
                body["price"] = json!(price.to_string());
                let tif = match (request.order_type, request.time_in_force) {
                    (OrderType::Ioc, _) => "IOC",
                    (_, Some(TimeInForce::Ioc)) => "IOC",
                    (_, Some(TimeInForce::Fok)) => "FOK",
                    _ => "GTC",
                };
                body["timeInForce"] = json!(tif);
            }
        }

        let created: OrderCreated = self
            .signed_request(reqwest::Method::POST, "/api/v1/orders", Some(body))
            .await?;

        // Fetch the final state; IOC orders settle immediately
        let endpoint = format!("/api/v1/orders/{}", created.order_id);
        let detail: OrderDetail = self
            .signed_request(reqwest::Method::GET, &endpoint, None)
            .await?;

        let filled = Decimal::from_str(&detail.deal_size).unwrap_or(Decimal::ZERO);
        let funds = Decimal::from_str(&detail.deal_funds).unwrap_or(Decimal::ZERO);
        let average_fill_price = if filled > Decimal::ZERO {
            funds / filled
        } else {
            Decimal::ZERO
        };

        debug!(
            order_id = %detail.id,
            filled = %filled,
            avg_price = %average_fill_price,
            "KuCoin order placed"
        );

        Ok(VenueOrderAck {
            order_id: detail.id.clone(),
            status: Self::order_status(&detail),
            filled_quantity: filled,
            average_fill_price,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        let endpoint = format!("/api/v1/orders/{}", order_id);
        let _: serde_json::Value = self
            .signed_request(reqwest::Method::DELETE, &endpoint, None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
        let endpoint = match symbol {
            Some(s) => format!(
                "/api/v1/orders?status=active&symbol={}",
                urlencoding::encode(s)
            ),
            None => "/api/v1/orders?status=active".to_string(),
        };
        let active: ActiveOrders = self
            .signed_request(reqwest::Method::GET, &endpoint, None)
            .await?;

        active
            .items
            .into_iter()
            .map(|o| {
                let side = match o.side.as_str() {
                    "buy" => OrderSide::Buy,
                    _ => OrderSide::Sell,
                };
                Ok(OpenOrder {
                    order_id: o.id,
                    symbol: o.symbol,
                    side,
                    quantity: Self::parse_decimal(&o.size, "size")?,
                    price: if o.price.is_empty() {
                        None
                    } else {
                        Some(Self::parse_decimal(&o.price, "price")?)
                    },
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn fetch_balance(&self, currency: &str) -> Result<Balance> {
        let endpoint = format!(
            "/api/v1/accounts?currency={}&type=trade",
            urlencoding::encode(currency)
        );
        let accounts: Vec<AccountEntry> = self
            .signed_request(reqwest::Method::GET, &endpoint, None)
            .await?;

        let entry = accounts
            .iter()
            .find(|a| a.currency == currency)
            .ok_or_else(|| anyhow!("No {} trade account", currency))?;

        Ok(Balance {
            currency: currency.to_string(),
            available: Self::parse_decimal(&entry.available, "available")?,
            total: Self::parse_decimal(&entry.balance, "balance")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> KucoinAdapter {
        let config = KucoinConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            api_passphrase: "passphrase".to_string(),
            sandbox: false,
        };
        KucoinAdapter::new("kucoin", &config).unwrap()
    }

    #[test]
    fn test_signature_is_deterministic_base64() {
        let adapter = test_adapter();
        let sig = adapter.sign("1700000000000GET/api/v1/accounts").unwrap();
        assert_eq!(sig, adapter.sign("1700000000000GET/api/v1/accounts").unwrap());
        assert!(BASE64.decode(&sig).is_ok());
    }

    #[test]
    fn test_passphrase_signed_separately() {
        let adapter = test_adapter();
        let signed = adapter.signed_passphrase().unwrap();
        assert_ne!(signed, "passphrase");
        assert!(BASE64.decode(&signed).is_ok());
    }

    #[test]
    fn test_order_status_mapping() {
        let active = OrderDetail {
            id: "1".to_string(),
            is_active: true,
            deal_size: "0".to_string(),
            deal_funds: "0".to_string(),
        };
        assert_eq!(KucoinAdapter::order_status(&active), OrderStatus::Pending);

        let partial = OrderDetail {
            is_active: true,
            deal_size: "0.5".to_string(),
            ..active.clone()
        };
        assert_eq!(KucoinAdapter::order_status(&partial), OrderStatus::Partial);

        let filled = OrderDetail {
            is_active: false,
            deal_size: "1.0".to_string(),
            deal_funds: "50000".to_string(),
            id: "1".to_string(),
        };
        assert_eq!(KucoinAdapter::order_status(&filled), OrderStatus::Filled);

        let cancelled = OrderDetail {
            is_active: false,
            deal_size: "0".to_string(),
            deal_funds: "0".to_string(),
            id: "1".to_string(),
        };
        assert_eq!(
            KucoinAdapter::order_status(&cancelled),
            OrderStatus::Cancelled
        );
    }
}
