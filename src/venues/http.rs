//! HTTP venue adapter
//!
//! Speaks a small REST convention: `GET {base_url}/quote?base=SOL&quote=USDC`
//! returning either a mid-price payload or a top-of-book payload depending
//! on the venue's configured schema. Response parsing and validation are
//! pure functions so they can be tested without a server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::VenueConfig;
use crate::errors::{VenueError, VenueResult};
use crate::types::{InstrumentPair, VenueId, VenueQuote};

use super::{QuoteSchema, VenueAdapter};

/// Mid-price payload: one price, one liquidity figure in base units.
#[derive(Debug, Deserialize)]
struct MidPricePayload {
    price: Decimal,
    #[serde(default)]
    liquidity: Decimal,
    #[serde(default)]
    timestamp_ms: Option<i64>,
}

/// Top-of-book payload.
#[derive(Debug, Deserialize)]
struct BookTopPayload {
    bid: Decimal,
    ask: Decimal,
    #[serde(default)]
    bid_size: Decimal,
    #[serde(default)]
    ask_size: Decimal,
    #[serde(default)]
    timestamp_ms: Option<i64>,
}

pub struct HttpVenueAdapter {
    venue: VenueId,
    client: reqwest::Client,
    base_url: String,
    schema: QuoteSchema,
    fee: Decimal,
    half_spread: Decimal,
    max_retries: u32,
    retry_backoff: Duration,
    query_timeout: Duration,
}

impl HttpVenueAdapter {
    pub fn new(config: &VenueConfig, default_timeout: Duration) -> anyhow::Result<Self> {
        let query_timeout = config
            .query_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(default_timeout);

        let client = reqwest::Client::builder()
            .timeout(query_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            venue: config.venue_id(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            schema: config.schema,
            fee: config.fee(),
            half_spread: config.half_spread(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            query_timeout,
        })
    }

    /// One attempt, no retry.
    async fn fetch_once(&self, pair: &InstrumentPair) -> VenueResult<VenueQuote> {
        let url = format!("{}/quote", self.base_url);
        let params = [("base", pair.base.as_str()), ("quote", pair.quote.as_str())];

        let resp = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(VenueError::RateLimited(format!("{} returned 429", self.venue)));
        }
        if status.is_server_error() {
            return Err(VenueError::Unavailable(format!(
                "{} returned {status}",
                self.venue
            )));
        }
        if !status.is_success() {
            return Err(VenueError::Malformed(format!(
                "{} returned unexpected {status} for {pair}",
                self.venue
            )));
        }

        match self.schema {
            QuoteSchema::MidPrice => {
                let payload: MidPricePayload = resp
                    .json()
                    .await
                    .map_err(|e| VenueError::Malformed(format!("{}: {e}", self.venue)))?;
                quote_from_mid(&self.venue, pair, payload, self.half_spread, self.fee)
            }
            QuoteSchema::BookTop => {
                let payload: BookTopPayload = resp
                    .json()
                    .await
                    .map_err(|e| VenueError::Malformed(format!("{}: {e}", self.venue)))?;
                quote_from_book(&self.venue, pair, payload, self.fee)
            }
        }
    }

    fn classify_transport(&self, err: reqwest::Error) -> VenueError {
        if err.is_timeout() {
            VenueError::Unavailable(format!(
                "{} timed out after {}ms",
                self.venue,
                self.query_timeout.as_millis()
            ))
        } else {
            VenueError::Unavailable(format!("{}: {err}", self.venue))
        }
    }
}

#[async_trait]
impl VenueAdapter for HttpVenueAdapter {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn fee(&self) -> Decimal {
        self.fee
    }

    async fn fetch_quote(&self, pair: &InstrumentPair) -> VenueResult<VenueQuote> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome =
                tokio::time::timeout(self.query_timeout, self.fetch_once(pair)).await;
            let err = match outcome {
                Ok(Ok(quote)) => return Ok(quote),
                Ok(Err(e)) => e,
                Err(_) => VenueError::Unavailable(format!(
                    "{} timed out after {}ms",
                    self.venue,
                    self.query_timeout.as_millis()
                )),
            };

            if !err.is_transient() || attempt > self.max_retries {
                return Err(err);
            }

            // Escalate: base, then 2x, 4x, ...
            let backoff = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
            debug!(
                venue = %self.venue,
                %pair,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Transient venue failure, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

fn resolve_timestamp(timestamp_ms: Option<i64>) -> DateTime<Utc> {
    timestamp_ms
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Build a quote from a mid-price payload, synthesizing bid/ask from the
/// configured half-spread.
fn quote_from_mid(
    venue: &VenueId,
    pair: &InstrumentPair,
    payload: MidPricePayload,
    half_spread: Decimal,
    fee: Decimal,
) -> VenueResult<VenueQuote> {
    if payload.price <= Decimal::ZERO {
        return Err(VenueError::Malformed(format!(
            "{venue} quoted non-positive price {} for {pair}",
            payload.price
        )));
    }
    if payload.liquidity < Decimal::ZERO {
        return Err(VenueError::Malformed(format!(
            "{venue} quoted negative liquidity for {pair}"
        )));
    }

    let bid = payload.price * (Decimal::ONE - half_spread);
    let ask = payload.price * (Decimal::ONE + half_spread);

    Ok(VenueQuote {
        venue: venue.clone(),
        pair: pair.clone(),
        bid,
        ask,
        mid: payload.price,
        depth: payload.liquidity,
        fee,
        fetched_at: resolve_timestamp(payload.timestamp_ms),
    })
}

/// Build a quote from a top-of-book payload. Depth is the smaller of the
/// two top sizes so it bounds a swap in either direction.
fn quote_from_book(
    venue: &VenueId,
    pair: &InstrumentPair,
    payload: BookTopPayload,
    fee: Decimal,
) -> VenueResult<VenueQuote> {
    if payload.bid <= Decimal::ZERO || payload.ask <= Decimal::ZERO {
        return Err(VenueError::Malformed(format!(
            "{venue} quoted non-positive book for {pair}"
        )));
    }
    if payload.bid > payload.ask {
        return Err(VenueError::Malformed(format!(
            "{venue} quoted crossed book for {pair}: bid {} > ask {}",
            payload.bid, payload.ask
        )));
    }
    if payload.bid_size < Decimal::ZERO || payload.ask_size < Decimal::ZERO {
        return Err(VenueError::Malformed(format!(
            "{venue} quoted negative size for {pair}"
        )));
    }

    let depth = payload.bid_size.min(payload.ask_size);
    let mid = (payload.bid + payload.ask) / Decimal::TWO;

    Ok(VenueQuote {
        venue: venue.clone(),
        pair: pair.clone(),
        bid: payload.bid,
        ask: payload.ask,
        mid,
        depth,
        fee,
        fetched_at: resolve_timestamp(payload.timestamp_ms),
    })
}
