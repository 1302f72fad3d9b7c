//! OHLCV candles and a time-indexed chart

use crate::error::CoreError;
use crate::sorted_map::SortedMap;
use crate::trade::Trade;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, inclusive
    pub from: DateTime<Utc>,
    /// Bucket end, exclusive
    pub to: DateTime<Utc>,
    /// First trade price in the bucket
    pub open: Decimal,
    /// Last trade price in the bucket
    pub close: Decimal,
    /// Highest trade price
    pub high: Decimal,
    /// Lowest trade price
    pub low: Decimal,
    /// Total traded size
    pub volume: Decimal,
    /// Number of trades folded in
    pub trades_count: u64,
}

impl Candle {
    /// Bucket width.
    #[must_use]
    pub fn timeframe(&self) -> Duration {
        self.to - self.from
    }

    /// Candle seeded from a single trade.
    #[must_use]
    pub fn of_trade(trade: &Trade, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let price = trade.transaction.price;
        Self {
            from,
            to,
            open: price,
            close: price,
            high: price,
            low: price,
            volume: trade.transaction.size,
            trades_count: 1,
        }
    }

    /// Fold a later trade of the same bucket into this candle.
    pub fn apply_trade(&mut self, trade: &Trade) {
        let price = trade.transaction.price;
        self.close = price;
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.volume += trade.transaction.size;
        self.trades_count += 1;
    }

    fn validate(&self, timeframe: Duration) -> Result<(), CoreError> {
        if self.from >= self.to || self.to - self.from != timeframe {
            return Err(CoreError::invalid_params(format!(
                "candle bounds {} .. {} do not span the chart timeframe",
                self.from, self.to
            )));
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || self.high < body_high || self.volume < Decimal::ZERO {
            return Err(CoreError::invalid_params(format!(
                "candle at {} violates ohlc ordering",
                self.from
            )));
        }
        Ok(())
    }
}

/// Candles of one timeframe keyed by bucket start, oldest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandleChart {
    timeframe_ms: i64,
    candles: SortedMap<i64, Candle>,
}

impl CandleChart {
    /// Empty chart with a positive timeframe.
    pub fn new(timeframe: Duration) -> Result<Self, CoreError> {
        let timeframe_ms = timeframe.num_milliseconds();
        if timeframe_ms <= 0 {
            return Err(CoreError::invalid_params("timeframe must be positive"));
        }
        Ok(Self {
            timeframe_ms,
            candles: SortedMap::ascending(),
        })
    }

    /// Chart timeframe.
    #[must_use]
    pub fn timeframe(&self) -> Duration {
        Duration::milliseconds(self.timeframe_ms)
    }

    /// Number of candles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Whether the chart is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn bucket_start(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp_millis().div_euclid(self.timeframe_ms) * self.timeframe_ms
    }

    fn bounds(&self, bucket: i64) -> Result<(DateTime<Utc>, DateTime<Utc>), CoreError> {
        let from = DateTime::<Utc>::from_timestamp_millis(bucket);
        let to = DateTime::<Utc>::from_timestamp_millis(bucket + self.timeframe_ms);
        match (from, to) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ => Err(CoreError::invalid_params(format!(
                "bucket {bucket} out of representable time range"
            ))),
        }
    }

    /// Fold a trade into its bucket, creating the candle if needed.
    pub fn ingest_trade(&mut self, trade: &Trade) -> Result<(), CoreError> {
        let bucket = self.bucket_start(trade.at);
        if let Some(candle) = self.candles.get_mut(&bucket) {
            candle.apply_trade(trade);
        } else {
            let (from, to) = self.bounds(bucket)?;
            self.candles.insert(bucket, Candle::of_trade(trade, from, to));
        }
        Ok(())
    }

    /// Insert or replace a whole candle, e.g. from a venue kline delta.
    pub fn upsert(&mut self, candle: Candle) -> Result<(), CoreError> {
        candle.validate(self.timeframe())?;
        self.candles.insert(candle.from.timestamp_millis(), candle);
        Ok(())
    }

    /// Most recent candle.
    #[must_use]
    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last().map(|(_, c)| c)
    }

    /// Up to `n` most recent candles, oldest first.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<&Candle> {
        self.candles.tail(n).into_iter().map(|(_, c)| c).collect()
    }

    /// Up to `n` candles ending at the bucket containing `at`, oldest first.
    #[must_use]
    pub fn tail_until(&self, at: DateTime<Utc>, n: usize) -> Vec<&Candle> {
        let bucket = self.bucket_start(at);
        self.candles
            .tail_until(&bucket, n)
            .into_iter()
            .map(|(_, c)| c)
            .collect()
    }
}
