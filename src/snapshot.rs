//! Snapshot aggregator
//!
//! Fans out one quote query per (venue, instrument), waits at most the
//! configured pass deadline, then assembles whatever came back into an
//! immutable `MarketSnapshot`. Stale quotes are dropped first; instruments
//! that end up below the venue quorum are excluded so a thin or one-sided
//! view never reaches the optimizer.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::errors::{SnapshotError, SnapshotResult, VenueResult};
use crate::types::{InstrumentPair, MarketSnapshot, VenueQuote};
use crate::venues::VenueAdapter;

pub struct SnapshotAggregator {
    adapters: Vec<Arc<dyn VenueAdapter>>,
    min_quorum: usize,
    staleness: chrono::Duration,
    pass_deadline: Duration,
}

impl SnapshotAggregator {
    pub fn new(adapters: Vec<Arc<dyn VenueAdapter>>, config: &SnapshotConfig) -> Self {
        Self {
            adapters,
            min_quorum: config.min_quorum,
            staleness: chrono::Duration::milliseconds(config.staleness_ms as i64),
            pass_deadline: Duration::from_millis(config.deadline_ms),
        }
    }

    pub fn venue_count(&self) -> usize {
        self.adapters.len()
    }

    /// Run one aggregation pass over the instrument universe.
    ///
    /// Individual venue failures and quorum misses degrade the snapshot;
    /// only an entirely unusable pass returns an error.
    pub async fn aggregate(
        &self,
        instruments: &[InstrumentPair],
    ) -> SnapshotResult<MarketSnapshot> {
        let started = Instant::now();
        let deadline = started + self.pass_deadline;

        let mut tasks: JoinSet<(InstrumentPair, VenueResult<VenueQuote>)> = JoinSet::new();
        for adapter in &self.adapters {
            // One query in flight per venue at a time, so a pass never
            // runs more concurrent queries than there are venues.
            let gate = Arc::new(Semaphore::new(1));
            for pair in instruments {
                let adapter = Arc::clone(adapter);
                let gate = Arc::clone(&gate);
                let pair = pair.clone();
                tasks.spawn(async move {
                    let _permit = gate.acquire().await;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let result = match tokio::time::timeout(
                        remaining,
                        adapter.fetch_quote(&pair),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(crate::errors::VenueError::Unavailable(format!(
                            "{} missed the snapshot deadline",
                            adapter.venue()
                        ))),
                    };
                    (pair, result)
                });
            }
        }

        let mut fetched: HashMap<InstrumentPair, Vec<VenueQuote>> = HashMap::new();
        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((pair, Ok(quote))) => fetched.entry(pair).or_default().push(quote),
                Ok((pair, Err(e))) => {
                    failures += 1;
                    debug!(%pair, error = %e, "Venue query failed");
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, "Snapshot task panicked");
                }
            }
        }

        let now = Utc::now();
        let mut quotes: HashMap<InstrumentPair, Vec<VenueQuote>> = HashMap::new();
        let mut skipped = Vec::new();
        let mut stale_dropped = 0usize;

        for pair in instruments {
            let mut pair_quotes = fetched.remove(pair).unwrap_or_default();
            let before = pair_quotes.len();
            pair_quotes.retain(|q| q.is_fresh(now, self.staleness));
            stale_dropped += before - pair_quotes.len();

            if pair_quotes.len() >= self.min_quorum {
                quotes.insert(pair.clone(), pair_quotes);
            } else {
                warn!(
                    error = %SnapshotError::QuorumNotMet {
                        pair: pair.clone(),
                        responders: pair_quotes.len(),
                        required: self.min_quorum,
                    },
                    "Instrument excluded from snapshot"
                );
                skipped.push(pair.clone());
            }
        }

        if quotes.is_empty() {
            return Err(SnapshotError::NoUsableInstruments {
                required: self.min_quorum,
            });
        }

        let snapshot = MarketSnapshot {
            taken_at: now,
            quotes,
            instruments_scanned: instruments.len(),
            instruments_skipped: skipped,
        };

        info!(
            instruments = snapshot.instrument_count(),
            skipped = snapshot.instruments_skipped.len(),
            quotes = snapshot.quote_count(),
            failures,
            stale_dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "📸 Snapshot assembled"
        );

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VenueError;
    use crate::types::{Asset, VenueId};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Scripted venue: maps each instrument to a canned response, with an
    /// optional response delay.
    struct MockVenue {
        venue: VenueId,
        responses: HashMap<InstrumentPair, VenueResult<VenueQuote>>,
        delay: Option<Duration>,
    }

    impl MockVenue {
        fn new(name: &str) -> Self {
            Self {
                venue: VenueId::from(name),
                responses: HashMap::new(),
                delay: None,
            }
        }

        fn with_quote(mut self, pair: &InstrumentPair, mid: Decimal) -> Self {
            self.responses
                .insert(pair.clone(), Ok(mk_quote(&self.venue, pair, mid, 0)));
            self
        }

        fn with_stale_quote(mut self, pair: &InstrumentPair, mid: Decimal, age_secs: i64) -> Self {
            self.responses
                .insert(pair.clone(), Ok(mk_quote(&self.venue, pair, mid, age_secs)));
            self
        }

        fn with_error(mut self, pair: &InstrumentPair, err: VenueError) -> Self {
            self.responses.insert(pair.clone(), Err(err));
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl VenueAdapter for MockVenue {
        fn venue(&self) -> &VenueId {
            &self.venue
        }

        fn fee(&self) -> Decimal {
            dec!(0.003)
        }

        async fn fetch_quote(&self, pair: &InstrumentPair) -> VenueResult<VenueQuote> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .get(pair)
                .cloned()
                .unwrap_or_else(|| Err(VenueError::Unavailable("no script".into())))
        }
    }

    fn mk_quote(venue: &VenueId, pair: &InstrumentPair, mid: Decimal, age_secs: i64) -> VenueQuote {
        VenueQuote {
            venue: venue.clone(),
            pair: pair.clone(),
            bid: mid * dec!(0.999),
            ask: mid * dec!(1.001),
            mid,
            depth: dec!(10000),
            fee: dec!(0.003),
            fetched_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    fn config() -> SnapshotConfig {
        SnapshotConfig {
            min_quorum: 2,
            staleness_ms: 10_000,
            query_timeout_ms: 500,
            deadline_ms: 1_000,
        }
    }

    fn pairs() -> (InstrumentPair, InstrumentPair) {
        (
            InstrumentPair::new(Asset::from("SOL"), Asset::from("USDC")),
            InstrumentPair::new(Asset::from("ETH"), Asset::from("USDC")),
        )
    }

    #[tokio::test]
    async fn test_full_snapshot_when_all_venues_answer() {
        let (sol, eth) = pairs();
        let adapters: Vec<Arc<dyn VenueAdapter>> = vec![
            Arc::new(
                MockVenue::new("orca")
                    .with_quote(&sol, dec!(100))
                    .with_quote(&eth, dec!(2500)),
            ),
            Arc::new(
                MockVenue::new("raydium")
                    .with_quote(&sol, dec!(101))
                    .with_quote(&eth, dec!(2498)),
            ),
        ];

        let aggregator = SnapshotAggregator::new(adapters, &config());
        let snapshot = aggregator.aggregate(&[sol, eth]).await.unwrap();

        assert_eq!(snapshot.instrument_count(), 2);
        assert_eq!(snapshot.quote_count(), 4);
        assert!(snapshot.instruments_skipped.is_empty());
        assert_eq!(snapshot.instruments_scanned, 2);
    }

    #[tokio::test]
    async fn test_instrument_below_quorum_is_excluded() {
        let (sol, eth) = pairs();
        // ETH/USDC only gets one responder, below the quorum of two.
        let adapters: Vec<Arc<dyn VenueAdapter>> = vec![
            Arc::new(
                MockVenue::new("orca")
                    .with_quote(&sol, dec!(100))
                    .with_quote(&eth, dec!(2500)),
            ),
            Arc::new(
                MockVenue::new("raydium")
                    .with_quote(&sol, dec!(101))
                    .with_error(&eth, VenueError::Unavailable("down".into())),
            ),
        ];

        let aggregator = SnapshotAggregator::new(adapters, &config());
        let snapshot = aggregator.aggregate(&[sol.clone(), eth.clone()]).await.unwrap();

        assert_eq!(snapshot.instrument_count(), 1);
        assert!(snapshot.quotes.contains_key(&sol));
        assert_eq!(snapshot.instruments_skipped, vec![eth]);
    }

    #[tokio::test]
    async fn test_no_usable_instruments_is_an_error() {
        let (sol, _) = pairs();
        let adapters: Vec<Arc<dyn VenueAdapter>> = vec![
            Arc::new(MockVenue::new("orca").with_error(&sol, VenueError::Unavailable("down".into()))),
            Arc::new(MockVenue::new("raydium").with_error(&sol, VenueError::RateLimited("429".into()))),
        ];

        let aggregator = SnapshotAggregator::new(adapters, &config());
        let err = aggregator.aggregate(&[sol]).await.unwrap_err();

        assert_eq!(err, SnapshotError::NoUsableInstruments { required: 2 });
    }

    #[tokio::test]
    async fn test_stale_quotes_do_not_count_toward_quorum() {
        let (sol, _) = pairs();
        let adapters: Vec<Arc<dyn VenueAdapter>> = vec![
            Arc::new(MockVenue::new("orca").with_quote(&sol, dec!(100))),
            // 60s old against a 10s staleness bound
            Arc::new(MockVenue::new("raydium").with_stale_quote(&sol, dec!(101), 60)),
        ];

        let aggregator = SnapshotAggregator::new(adapters, &config());
        let err = aggregator.aggregate(&[sol]).await.unwrap_err();

        assert_eq!(err, SnapshotError::NoUsableInstruments { required: 2 });
    }

    #[tokio::test]
    async fn test_hung_venue_cannot_stall_the_pass() {
        let (sol, _) = pairs();
        let adapters: Vec<Arc<dyn VenueAdapter>> = vec![
            Arc::new(MockVenue::new("orca").with_quote(&sol, dec!(100))),
            Arc::new(MockVenue::new("fastdex").with_quote(&sol, dec!(101))),
            Arc::new(
                MockVenue::new("slowdex")
                    .with_quote(&sol, dec!(102))
                    .with_delay(Duration::from_secs(30)),
            ),
        ];

        let started = Instant::now();
        let aggregator = SnapshotAggregator::new(adapters, &config());
        let snapshot = aggregator.aggregate(&[sol.clone()]).await.unwrap();

        // Deadline is 1s; the hung venue is cut off, the rest are kept.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(snapshot.quotes_for(&sol).len(), 2);
    }
}
