//! Bitget REST API client (v2 mix endpoints).

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use super::traits::ExchangeApi;
use super::types::*;
use crate::config::ExchangeConfig;

const BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";
const SUCCESS_CODE: &str = "00000";

/// Per-symbol precision data from the contracts endpoint.
#[derive(Debug, Clone, Copy)]
struct ContractSpec {
    volume_place: u32,
}

/// Response envelope shared by every Bitget endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker {
    symbol: String,
    last_pr: String,
    #[serde(default)]
    change24h: Option<String>,
    #[serde(default)]
    usdt_volume: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    margin_coin: String,
    account_equity: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    hold_side: String,
    open_price_avg: String,
    mark_price: String,
    total: String,
    margin_size: String,
    leverage: String,
    unrealized_pl: String,
    #[serde(default)]
    liquidation_price: Option<String>,
    #[serde(default)]
    take_profit: Option<String>,
    #[serde(default)]
    stop_loss: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFundingRate {
    #[allow(dead_code)]
    symbol: String,
    funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    open_interest_list: Vec<RawOpenInterestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterestEntry {
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContract {
    symbol: String,
    volume_place: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlanOrders {
    #[serde(default)]
    entrusted_list: Option<Vec<RawPlanOrder>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlanOrder {
    plan_type: String,
    trigger_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderAck {
    order_id: String,
}

fn dec(value: &str, field: &'static str) -> ExchangeResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| ExchangeError::Decode(format!("{field}: {value:?}: {e}")))
}

fn dec_opt(value: &Option<String>) -> Option<Decimal> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| Decimal::from_str(s).ok())
        .filter(|d| !d.is_zero())
}

/// Map common timeframe spellings onto Bitget granularity codes.
fn granularity(timeframe: &str) -> String {
    match timeframe {
        "1h" => "1H".to_string(),
        "4h" => "4H".to_string(),
        "1d" => "1D".to_string(),
        other => other.to_string(),
    }
}

/// Signed REST client for Bitget USDT perpetual futures.
pub struct BitgetClient {
    http: Client,
    api_key: String,
    api_secret: String,
    passphrase: String,
    demo: bool,
    leverage: u32,
    contracts: RwLock<HashMap<String, ContractSpec>>,
    api_counter: AtomicU64,
}

impl BitgetClient {
    /// Create a new client from configuration.
    pub fn new(config: &ExchangeConfig, leverage: u32) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            passphrase: config.passphrase.clone(),
            demo: config.demo,
            leverage,
            contracts: RwLock::new(HashMap::new()),
            api_counter: AtomicU64::new(0),
        })
    }

    /// Generate the request signature:
    /// base64(HMAC-SHA256(secret, timestamp + METHOD + path(+?query) + body)).
    fn sign(&self, timestamp: &str, method: &str, path_and_query: &str, body: &str) -> String {
        let payload = format!("{timestamp}{method}{path_and_query}{body}");
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>) -> ExchangeResult<T> {
        if envelope.code != SUCCESS_CODE {
            return Err(ExchangeError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        envelope
            .data
            .ok_or(ExchangeError::MissingData("empty data field in response"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &str) -> ExchangeResult<T> {
        self.request::<T>("GET", path, query, None).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> ExchangeResult<T> {
        self.request::<T>("POST", path, "", Some(body)).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: Option<serde_json::Value>,
    ) -> ExchangeResult<T> {
        self.api_counter.fetch_add(1, Ordering::Relaxed);

        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let url = format!("{BASE_URL}{path_and_query}");
        let body_text = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();

        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, method, &path_and_query, &body_text);

        let mut request = match method {
            "POST" => self.http.post(&url).body(body_text),
            _ => self.http.get(&url),
        };

        request = request
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGN", signature)
            .header("ACCESS-TIMESTAMP", timestamp)
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .header("Content-Type", "application/json");

        if self.demo {
            request = request.header("paptrading", "1");
        }

        let envelope = request.send().await?.json::<Envelope<T>>().await?;
        Self::unwrap_envelope(envelope)
    }

    /// Set leverage for a symbol. Failures are logged, not fatal — the
    /// exchange keeps whatever was configured last.
    async fn set_leverage(&self, symbol: &str) {
        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "leverage": self.leverage.to_string(),
        });
        if let Err(e) = self
            .post::<serde_json::Value>("/api/v2/mix/account/set-leverage", body)
            .await
        {
            warn!(symbol, error = %e, "could not set leverage");
        }
    }

    async fn volume_place(&self, symbol: &str) -> u32 {
        self.contracts
            .read()
            .await
            .get(symbol)
            .map(|spec| spec.volume_place)
            .unwrap_or(4)
    }

    /// Place a market short, optionally with a preset stop-loss trigger.
    #[instrument(skip(self))]
    async fn place_short(
        &self,
        symbol: &str,
        margin: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder> {
        self.set_leverage(symbol).await;

        let ticker = self.get_ticker(symbol).await?;
        let entry_price = ticker.last;
        if entry_price <= Decimal::ZERO {
            return Err(ExchangeError::MissingData("ticker price is zero"));
        }

        // margin is collateral; notional = margin * leverage
        let notional = margin * Decimal::from(self.leverage);
        let volume_place = self.volume_place(symbol).await;
        let amount = (notional / entry_price).trunc_with_scale(volume_place);
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::MissingData("order amount rounded to zero"));
        }

        let mut body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "size": amount.to_string(),
            "side": "sell",
            "orderType": "market",
            "presetStopSurplusPrice": take_profit.to_string(),
        });
        if let Some(sl) = stop_loss {
            body["presetStopLossPrice"] = json!(sl.to_string());
        }

        let ack: RawOrderAck = self.post("/api/v2/mix/order/place-order", body).await?;

        debug!(symbol, order_id = %ack.order_id, %amount, %entry_price, "short order placed");

        Ok(PlacedOrder {
            order_id: ack.order_id,
            symbol: symbol.to_string(),
            entry_price,
            amount,
            margin,
            leverage: self.leverage,
            stop_loss,
            take_profit,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ExchangeApi for BitgetClient {
    async fn load_markets(&self) -> ExchangeResult<()> {
        let query = format!("productType={PRODUCT_TYPE}");
        let raw: Vec<RawContract> = self.get("/api/v2/mix/market/contracts", &query).await?;

        let specs: HashMap<String, ContractSpec> = raw
            .into_iter()
            .map(|c| {
                let volume_place = c.volume_place.parse().unwrap_or(4);
                (c.symbol, ContractSpec { volume_place })
            })
            .collect();

        debug!(contracts = specs.len(), "market metadata loaded");
        *self.contracts.write().await = specs;
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let query = format!("productType={PRODUCT_TYPE}");
        let accounts: Vec<RawAccount> = self.get("/api/v2/mix/account/accounts", &query).await?;

        match accounts.iter().find(|a| a.margin_coin == MARGIN_COIN) {
            Some(account) => dec(&account.account_equity, "accountEquity"),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn get_open_positions(&self) -> ExchangeResult<Vec<OpenPosition>> {
        let query = format!("productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}");
        let raw: Vec<RawPosition> = self.get("/api/v2/mix/position/all-position", &query).await?;

        let mut positions = Vec::with_capacity(raw.len());
        for pos in raw {
            let contracts = dec(&pos.total, "total")?;
            if contracts <= Decimal::ZERO {
                continue;
            }

            let side = match pos.hold_side.as_str() {
                "short" => PositionSide::Short,
                _ => PositionSide::Long,
            };
            let margin = dec(&pos.margin_size, "marginSize")?;
            let unrealized_pnl = dec(&pos.unrealized_pl, "unrealizedPL")?;
            let percentage = if margin.is_zero() {
                Decimal::ZERO
            } else {
                unrealized_pnl / margin * Decimal::ONE_HUNDRED
            };

            positions.push(OpenPosition {
                symbol: pos.symbol,
                side,
                entry_price: dec(&pos.open_price_avg, "openPriceAvg")?,
                mark_price: dec(&pos.mark_price, "markPrice")?,
                contracts,
                margin,
                leverage: dec(&pos.leverage, "leverage")?.to_u32().unwrap_or(0),
                unrealized_pnl,
                percentage,
                take_profit: dec_opt(&pos.take_profit),
                stop_loss: dec_opt(&pos.stop_loss),
                liquidation_price: dec_opt(&pos.liquidation_price),
            });
        }

        Ok(positions)
    }

    async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        let query = format!(
            "symbol={symbol}&productType={PRODUCT_TYPE}&granularity={}&limit={limit}",
            granularity(timeframe)
        );
        let raw: Vec<Vec<String>> = self.get("/api/v2/mix/market/candles", &query).await?;

        let mut candles = Vec::with_capacity(raw.len());
        for row in raw {
            if row.len() < 6 {
                return Err(ExchangeError::Decode(format!(
                    "candle row has {} fields, expected 6+",
                    row.len()
                )));
            }
            candles.push(Candle {
                timestamp: row[0]
                    .parse()
                    .map_err(|e| ExchangeError::Decode(format!("candle timestamp: {e}")))?,
                open: dec(&row[1], "open")?,
                high: dec(&row[2], "high")?,
                low: dec(&row[3], "low")?,
                close: dec(&row[4], "close")?,
                volume: dec(&row[5], "volume")?,
            });
        }

        // Oldest first; the exchange already returns ascending order, but the
        // signal engine depends on it, so make it explicit.
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let query = format!("symbol={symbol}&productType={PRODUCT_TYPE}");
        let raw: Vec<RawTicker> = self.get("/api/v2/mix/market/ticker", &query).await?;
        let ticker = raw
            .into_iter()
            .next()
            .ok_or(ExchangeError::MissingData("ticker list is empty"))?;

        // change24h arrives as a fraction (0.025 = +2.5%)
        let change = match &ticker.change24h {
            Some(c) if !c.is_empty() => dec(c, "change24h")? * Decimal::ONE_HUNDRED,
            _ => Decimal::ZERO,
        };

        Ok(Ticker {
            symbol: ticker.symbol,
            last: dec(&ticker.last_pr, "lastPr")?,
            change_24h_pct: change,
        })
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Option<Decimal>> {
        let query = format!("symbol={symbol}&productType={PRODUCT_TYPE}");
        let result: ExchangeResult<Vec<RawFundingRate>> =
            self.get("/api/v2/mix/market/current-fund-rate", &query).await;

        match result {
            Ok(rates) => Ok(rates
                .first()
                .and_then(|r| Decimal::from_str(&r.funding_rate).ok())),
            Err(e) => {
                debug!(symbol, error = %e, "funding rate unavailable");
                Ok(None)
            }
        }
    }

    async fn get_open_interest(&self, symbol: &str) -> ExchangeResult<Option<Decimal>> {
        let query = format!("symbol={symbol}&productType={PRODUCT_TYPE}");
        let result: ExchangeResult<RawOpenInterest> =
            self.get("/api/v2/mix/market/open-interest", &query).await;

        match result {
            Ok(oi) => Ok(oi
                .open_interest_list
                .first()
                .and_then(|e| Decimal::from_str(&e.size).ok())),
            Err(e) => {
                debug!(symbol, error = %e, "open interest unavailable");
                Ok(None)
            }
        }
    }

    async fn get_tickers(&self) -> ExchangeResult<Vec<TickerVolume>> {
        let query = format!("productType={PRODUCT_TYPE}");
        let raw: Vec<RawTicker> = self.get("/api/v2/mix/market/tickers", &query).await?;

        Ok(raw
            .into_iter()
            .filter_map(|t| {
                let volume = t
                    .usdt_volume
                    .as_deref()
                    .and_then(|v| Decimal::from_str(v).ok())?;
                Some(TickerVolume {
                    symbol: t.symbol,
                    quote_volume_24h: volume,
                })
            })
            .collect())
    }

    async fn open_short(
        &self,
        symbol: &str,
        margin: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder> {
        self.place_short(symbol, margin, Some(stop_loss), take_profit)
            .await
    }

    async fn open_short_tp_only(
        &self,
        symbol: &str,
        margin: Decimal,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder> {
        self.place_short(symbol, margin, None, take_profit).await
    }

    async fn update_stop_loss(&self, symbol: &str, new_price: Decimal) -> ExchangeResult<bool> {
        // Position-level stop plan: placing a new pos_loss replaces the
        // previous trigger for the held side.
        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "planType": "pos_loss",
            "triggerPrice": new_price.to_string(),
            "triggerType": "mark_price",
            "holdSide": "short",
        });

        match self
            .post::<serde_json::Value>("/api/v2/mix/order/place-tpsl-order", body)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(symbol, %new_price, error = %e, "stop-loss update rejected");
                Ok(false)
            }
        }
    }

    async fn get_tp_sl_for_symbol(&self, symbol: &str) -> ExchangeResult<TriggerPrices> {
        let query =
            format!("symbol={symbol}&productType={PRODUCT_TYPE}&planType=profit_loss");
        let raw: RawPlanOrders = self
            .get("/api/v2/mix/order/orders-plan-pending", &query)
            .await?;

        let mut prices = TriggerPrices::default();
        for order in raw.entrusted_list.unwrap_or_default() {
            let trigger = Decimal::from_str(&order.trigger_price).ok();
            if order.plan_type.contains("profit") {
                prices.take_profit = prices.take_profit.or(trigger);
            } else if order.plan_type.contains("loss") {
                prices.stop_loss = prices.stop_loss.or(trigger);
            }
        }

        Ok(prices)
    }

    fn api_calls(&self) -> u64 {
        self.api_counter.load(Ordering::Relaxed)
    }

    fn reset_api_calls(&self) {
        self.api_counter.store(0, Ordering::Relaxed);
    }
}
