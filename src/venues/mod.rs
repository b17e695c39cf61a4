//! Venue adapters
//!
//! A venue is any liquidity source that can answer "what does SOL/USDC
//! trade at right now". Adapters normalize each venue's answer into a
//! `VenueQuote` and absorb transport flakiness (timeouts, rate limits)
//! behind a retry policy so the aggregator only ever sees a clean
//! quote-or-error result.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::errors::VenueResult;
use crate::types::{InstrumentPair, VenueId, VenueQuote};

pub mod http;

pub use http::HttpVenueAdapter;

/// Response shape a venue speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSchema {
    /// Single mid price plus liquidity; bid/ask are synthesized from a
    /// configured half-spread.
    MidPrice,
    /// Top-of-book bid/ask with sizes.
    BookTop,
}

/// Quote source for one venue.
///
/// Implementations must be safe to query concurrently; the aggregator
/// fans out one call per (venue, instrument) pair.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Venue identity, used as the quote's provenance tag.
    fn venue(&self) -> &VenueId;

    /// Taker fee fraction applied to swaps at this venue.
    fn fee(&self) -> Decimal;

    /// Fetch the current quote for one instrument.
    ///
    /// Transient failures (timeouts, 5xx, rate limits) are retried
    /// internally with escalating backoff; a malformed response fails
    /// immediately. Errors out of this method are final for the cycle.
    async fn fetch_quote(&self, pair: &InstrumentPair) -> VenueResult<VenueQuote>;
}

/// Build one HTTP adapter per configured venue.
pub fn build_adapters(config: &EngineConfig) -> anyhow::Result<Vec<Arc<dyn VenueAdapter>>> {
    let default_timeout = Duration::from_millis(config.snapshot.query_timeout_ms);
    let mut adapters: Vec<Arc<dyn VenueAdapter>> = Vec::with_capacity(config.venues.len());
    for venue_cfg in &config.venues {
        let adapter = HttpVenueAdapter::new(venue_cfg, default_timeout)?;
        adapters.push(Arc::new(adapter));
    }
    Ok(adapters)
}
