use crate::api::{AssetSymbol, FeedId, Price};
use crate::clock::Clock;
use crate::error::TruesightError;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceReading {
    pub feed_id: FeedId,
    pub price: i64,
    pub exponent: i32,
    pub confidence: u64,
    pub published_at: DateTime<Utc>,
}
impl PriceReading {
    pub fn price(&self) -> Price {
        Price::new(self.price, self.exponent)
    }
}

#[async_trait]
pub trait PriceSource {
    async fn read_price(&self, feed: &FeedId) -> Result<PriceReading>;
}

/// Feed ids are hex strings, sometimes with and sometimes without `0x`.
pub fn same_feed(a: &str, b: &str) -> bool {
    let strip = |id: &str| id.trim_start_matches("0x").to_ascii_lowercase();
    strip(a) == strip(b)
}

#[derive(Debug, Default)]
pub struct TestPriceSource {
    readings: Arc<Mutex<HashMap<FeedId, PriceReading>>>,
}
impl TestPriceSource {
    pub fn set_reading(&self, reading: PriceReading) {
        self.readings
            .lock()
            .unwrap()
            .insert(reading.feed_id.clone(), reading);
    }
    pub fn set_price(&self, feed: &str, price: i64, exponent: i32, published_at: DateTime<Utc>) {
        self.set_reading(PriceReading {
            feed_id: feed.to_string(),
            price,
            exponent,
            confidence: 1,
            published_at,
        })
    }
}
#[async_trait]
impl PriceSource for TestPriceSource {
    async fn read_price(&self, feed: &FeedId) -> Result<PriceReading> {
        let readings = self.readings.lock().unwrap();
        if let Some(reading) = readings.get(feed) {
            Ok(reading.clone())
        } else {
            bail!("Feed {} doesn't exist", feed)
        }
    }
}

/// Resolves assets to feeds and refuses readings that can't be trusted.
pub struct PriceReader {
    source: Arc<dyn PriceSource + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
    feeds: HashMap<AssetSymbol, FeedId>,
    max_staleness: Duration,
}
impl PriceReader {
    pub fn new(
        source: Arc<dyn PriceSource + Send + Sync>,
        clock: Arc<dyn Clock + Send + Sync>,
        feeds: HashMap<AssetSymbol, FeedId>,
        max_staleness: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            feeds,
            max_staleness,
        }
    }
    pub fn feed_for(&self, asset: &str) -> Result<&FeedId, TruesightError> {
        self.feeds.get(asset).ok_or_else(|| {
            TruesightError::OracleUnavailable(format!("no price feed configured for {}", asset))
        })
    }
    /// Reads the current price of `feed`, which must be the feed of `asset`.
    pub async fn read(&self, asset: &str, feed: &FeedId) -> Result<PriceReading, TruesightError> {
        let expected = self.feed_for(asset)?;
        if !same_feed(expected, feed) {
            return Err(TruesightError::OracleUnavailable(format!(
                "feed {} is not the feed of {} ({})",
                feed, asset, expected
            )));
        }
        let reading = self.source.read_price(feed).await.map_err(|e| {
            debug!("Reading feed {} failed: {:#}", feed, e);
            TruesightError::OracleUnavailable(format!("{:#}", e))
        })?;
        trace!("Read {:?} for {}", reading, asset);
        if !same_feed(&reading.feed_id, feed) {
            return Err(TruesightError::OracleUnavailable(format!(
                "asked for feed {} but got {}",
                feed, reading.feed_id
            )));
        }
        let age = self.clock.now() - reading.published_at;
        if age > self.max_staleness {
            return Err(TruesightError::OracleUnavailable(format!(
                "price of {} is {}s old, the limit is {}s",
                asset,
                age.num_seconds(),
                self.max_staleness.num_seconds()
            )));
        }
        if reading.price <= 0 {
            return Err(TruesightError::OracleUnavailable(format!(
                "feed {} reported a non-positive price {}",
                feed, reading.price
            )));
        }
        Ok(reading)
    }
}
