//! Phemex REST adapter
//! Signs requests with HMAC-SHA256 and classifies raw venue errors into the
//! typed taxonomy consumed by the risk engines

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::debug;

use crate::api::{
    AssetBalance, ExchangeError, ExchangeGateway, Market, Order, OrderParams, OrderType, Position,
    PositionSide, Side,
};
use crate::utils::rate_limiter::RateLimiter;
use crate::utils::retry::{retry_with_backoff, RetryConfig};

const PHEMEX_API_URL: &str = "https://api.phemex.com";
const PRODUCTS_PATH: &str = "/public/products";
const ACCOUNT_POSITIONS_PATH: &str = "/g-accounts/accountPositions";
const ACTIVE_ORDERS_PATH: &str = "/g-orders/activeList";
const CANCEL_ORDER_PATH: &str = "/g-orders/cancel";
const CREATE_ORDER_PATH: &str = "/g-orders/create";

/// Signature validity window in seconds.
const REQUEST_EXPIRY_SECS: i64 = 60;

type HmacSha256 = Hmac<Sha256>;

/// REST client for the Phemex USDT-margined swap account.
pub struct PhemexClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    rate_limiter: RateLimiter,
}

impl PhemexClient {
    /// Create a client against the production endpoint.
    pub fn new(api_key: &str, api_secret: &str, rate_limit_ms: u64) -> Self {
        Self::with_base_url(api_key, api_secret, PHEMEX_API_URL, rate_limit_ms)
    }

    /// Create a client against a custom endpoint (testnet, mock server).
    pub fn with_base_url(api_key: &str, api_secret: &str, base_url: &str, rate_limit_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            rate_limiter: RateLimiter::new(rate_limit_ms),
        }
    }

    /// HMAC-SHA256 over path + query + expiry + body.
    fn sign(&self, path: &str, query: &str, expiry: i64, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(format!("{path}{query}{expiry}{body}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Send a signed request and unwrap the `{code, msg, data}` envelope.
    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ExchangeError> {
        self.rate_limiter.wait().await;

        let query = Self::build_query(params);
        let expiry = chrono::Utc::now().timestamp() + REQUEST_EXPIRY_SECS;
        let signature = self.sign(path, &query, expiry, "");

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        debug!("{} {}", method, path);

        let response = self
            .http
            .request(method, &url)
            .header("x-phemex-access-token", &self.api_key)
            .header("x-phemex-request-expiry", expiry.to_string())
            .header("x-phemex-request-signature", signature)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16() as i64, message));
        }

        let mut envelope: serde_json::Value = response.json().await?;
        let code = envelope.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        if code != 0 {
            let message = envelope
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string();
            return Err(classify_api_error(code, message));
        }

        Ok(envelope
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Account + positions for the USDT swap account, shared by
    /// `fetch_positions` and `fetch_balance`.
    async fn account_positions(&self) -> Result<AccountData, ExchangeError> {
        let params = [("currency", "USDT".to_string())];
        let data = retry_with_backoff("accountPositions", RetryConfig::new(2, 250), || {
            self.send(Method::GET, ACCOUNT_POSITIONS_PATH, &params)
        })
        .await?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Classify a raw venue error into the gateway taxonomy.
pub(crate) fn classify_api_error(code: i64, message: String) -> ExchangeError {
    if message.contains("TE_ERR_INCONSISTENT_POS_MODE") {
        ExchangeError::PositionMode
    } else if message.contains("Pilot contract is not allowed") {
        ExchangeError::PilotContract(message)
    } else {
        ExchangeError::Api { code, message }
    }
}

/// "BTC/USDT:USDT" -> "BTCUSDT"
fn to_exchange_symbol(unified: &str) -> Result<String, ExchangeError> {
    let (base, rest) = unified
        .split_once('/')
        .ok_or_else(|| ExchangeError::UnknownSymbol(unified.to_string()))?;
    let quote = rest.split(':').next().unwrap_or(rest);
    Ok(format!("{base}{quote}"))
}

/// "BTCUSDT" -> "BTC/USDT:USDT"; only USDT-settled contracts are mapped.
fn to_unified_symbol(exchange: &str) -> Option<String> {
    let base = exchange.strip_suffix("USDT")?;
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}/USDT:USDT"))
}

fn parse_num(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductsData {
    #[serde(default)]
    perp_products_v2: Vec<ProductRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductRow {
    symbol: String,
    #[serde(default)]
    settle_currency: String,
    #[serde(default)]
    tick_size: String,
    #[serde(default)]
    qty_step_size: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    account: AccountRow,
    #[serde(default)]
    positions: Vec<PositionRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRow {
    #[serde(default)]
    currency: String,
    #[serde(default)]
    account_balance_rv: String,
    #[serde(default)]
    total_used_balance_rv: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRow {
    symbol: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    size_rq: String,
    #[serde(default)]
    avg_entry_price_rp: String,
    #[serde(default)]
    mark_price_rp: String,
    #[serde(default)]
    liquidation_price_rp: String,
    #[serde(default)]
    leverage_rr: String,
    #[serde(default)]
    value_rv: String,
    #[serde(default)]
    cur_term_realised_pnl_rv: String,
}

#[derive(Debug, Deserialize)]
struct OrdersData {
    #[serde(default)]
    rows: Vec<OrderRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRow {
    #[serde(rename = "orderID")]
    order_id: String,
    #[serde(default)]
    ord_type: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    price_rp: String,
    #[serde(default)]
    order_qty_rq: String,
}

#[derive(Debug, Deserialize)]
struct CreatedData {
    #[serde(rename = "orderID")]
    order_id: String,
}

impl OrderRow {
    fn into_order(self) -> Option<Order> {
        let order_type = match self.ord_type.as_str() {
            "Limit" => OrderType::Limit,
            "Stop" | "StopLimit" => OrderType::Stop,
            _ => return None,
        };
        let side = match self.side.as_str() {
            "Buy" => Side::Buy,
            "Sell" => Side::Sell,
            _ => return None,
        };
        Some(Order {
            id: self.order_id,
            order_type,
            side,
            price: parse_num(&self.price_rp),
            amount: parse_num(&self.order_qty_rq),
        })
    }
}

impl PositionRow {
    fn into_position(self, unified: String) -> Position {
        let side = match self.pos_side.as_str() {
            "Long" => Some(PositionSide::Long),
            "Short" => Some(PositionSide::Short),
            _ => None,
        };
        let leverage = parse_num(&self.leverage_rr);
        Position {
            symbol: unified,
            side,
            entry_price: parse_num(&self.avg_entry_price_rp),
            mark_price: parse_num(&self.mark_price_rp),
            liquidation_price: parse_num(&self.liquidation_price_rp),
            contracts: parse_num(&self.size_rq),
            leverage: if leverage > 0.0 { leverage } else { 1.0 },
            notional: parse_num(&self.value_rv),
            realized_pnl: parse_num(&self.cur_term_realised_pnl_rv),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PhemexClient {
    async fn load_markets(&self) -> Result<HashMap<String, Market>, ExchangeError> {
        let data = retry_with_backoff("loadMarkets", RetryConfig::new(2, 250), || {
            self.send(Method::GET, PRODUCTS_PATH, &[])
        })
        .await?;
        let products: ProductsData = serde_json::from_value(data)?;

        let mut markets = HashMap::new();
        for row in products.perp_products_v2 {
            if row.settle_currency != "USDT" || row.status != "Listed" {
                continue;
            }
            let Some(unified) = to_unified_symbol(&row.symbol) else {
                continue;
            };
            markets.insert(
                unified,
                Market {
                    price_precision: parse_num(&row.tick_size),
                    amount_precision: parse_num(&row.qty_step_size),
                },
            );
        }
        Ok(markets)
    }

    async fn fetch_positions(&self, symbols: &[String]) -> Result<Vec<Position>, ExchangeError> {
        let wanted: std::collections::HashSet<&str> = symbols.iter().map(|s| s.as_str()).collect();
        let data = self.account_positions().await?;
        Ok(data
            .positions
            .into_iter()
            .filter_map(|row| {
                let unified = to_unified_symbol(&row.symbol)?;
                if !wanted.is_empty() && !wanted.contains(unified.as_str()) {
                    return None;
                }
                Some(row.into_position(unified))
            })
            .collect())
    }

    async fn fetch_balance(
        &self,
        _margin_type: &str,
    ) -> Result<HashMap<String, AssetBalance>, ExchangeError> {
        // Only the USDT swap account exists on this venue.
        let data = self.account_positions().await?;
        let total = parse_num(&data.account.account_balance_rv);
        let used = parse_num(&data.account.total_used_balance_rv);
        let currency = if data.account.currency.is_empty() {
            "USDT".to_string()
        } else {
            data.account.currency
        };
        Ok(HashMap::from([(
            currency,
            AssetBalance {
                free: total - used,
                total,
            },
        )]))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        let params = [("symbol", to_exchange_symbol(symbol)?)];
        let data = self.send(Method::GET, ACTIVE_ORDERS_PATH, &params).await?;
        if data.is_null() {
            return Ok(vec![]);
        }
        let orders: OrdersData = serde_json::from_value(data)?;
        Ok(orders
            .rows
            .into_iter()
            .filter_map(OrderRow::into_order)
            .collect())
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        params: Option<OrderParams>,
    ) -> Result<(), ExchangeError> {
        let mut query = vec![
            ("symbol", to_exchange_symbol(symbol)?),
            ("orderID", order_id.to_string()),
        ];
        if let Some(pos_side) = params.and_then(|p| p.pos_side) {
            query.push(("posSide", pos_side.pos_side_param().to_string()));
        }
        self.send(Method::DELETE, CANCEL_ORDER_PATH, &query).await?;
        Ok(())
    }

    async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: f64,
        price: Option<f64>,
        params: OrderParams,
    ) -> Result<Order, ExchangeError> {
        let mut query = vec![
            ("clOrdID", uuid::Uuid::new_v4().to_string()),
            ("symbol", to_exchange_symbol(symbol)?),
            ("side", side.exchange_name().to_string()),
            (
                "ordType",
                match order_type {
                    OrderType::Limit => "Limit".to_string(),
                    OrderType::Stop => "Stop".to_string(),
                },
            ),
            ("orderQtyRq", amount.to_string()),
            ("reduceOnly", params.reduce_only.to_string()),
        ];
        if let Some(price) = price {
            query.push(("priceRp", price.to_string()));
        }
        if let Some(stop_px) = params.stop_px {
            query.push(("stopPxRp", stop_px.to_string()));
            query.push(("triggerType", "ByLastPrice".to_string()));
        }
        if let Some(direction) = params.trigger_direction {
            query.push(("triggerDirection", direction.to_string()));
        }
        if let Some(pos_side) = params.pos_side {
            query.push(("posSide", pos_side.pos_side_param().to_string()));
        }
        if params.close_on_trigger {
            query.push(("closeOnTrigger", "true".to_string()));
        }
        if let Some(tif) = params.time_in_force {
            query.push(("timeInForce", tif.to_string()));
        }

        let data = self.send(Method::PUT, CREATE_ORDER_PATH, &query).await?;
        let created: CreatedData = serde_json::from_value(data)?;
        Ok(Order {
            id: created.order_id,
            order_type,
            side,
            price: price.or(params.stop_px).unwrap_or(0.0),
            amount,
        })
    }
}
