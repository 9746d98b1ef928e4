//! Event normalization.
//!
//! [`normalize`] is total over the two raw kline shapes the exchange
//! multiplexes onto one connection: spot klines (`e == "kline"`) and
//! continuous-contract klines (`e == "continuous_kline"`). Anything else is an
//! error for the caller to log and skip; one malformed message must never take
//! down a session.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use super::bars::{BarData, CanonicalBar, KlineInterval, MarketSegment};
use crate::exchanges::{ContinuousKlineEvent, RawKline, SpotKlineEvent};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unknown event type `{0}`")]
    UnknownEventType(String),
    #[error("event has no type discriminator")]
    MissingEventType,
    #[error("unknown contract type `{0}`")]
    UnknownContractType(String),
    #[error("unknown kline interval `{0}`")]
    UnknownInterval(String),
    #[error("timestamp {0}ms is outside the representable range")]
    InvalidTimestamp(i64),
    #[error("bar window is not ordered: start {start}ms, end {end}ms")]
    InvalidWindow { start: i64, end: i64 },
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Normalizes one raw kline event into a [`CanonicalBar`].
///
/// Decimal fields are copied as the exact strings the exchange sent.
/// Millisecond epoch timestamps become UTC instants by straight division by
/// 1000, fraction preserved.
pub fn normalize(event: &Value) -> Result<CanonicalBar, NormalizeError> {
    let event_type = event
        .get("e")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingEventType)?;

    match event_type {
        "kline" => {
            let event: SpotKlineEvent = serde_json::from_value(event.clone())?;
            from_spot(event)
        }
        "continuous_kline" => {
            let event: ContinuousKlineEvent = serde_json::from_value(event.clone())?;
            from_continuous(event)
        }
        other => Err(NormalizeError::UnknownEventType(other.to_string())),
    }
}

fn from_spot(event: SpotKlineEvent) -> Result<CanonicalBar, NormalizeError> {
    let interval = parse_interval(&event.kline.interval)?;
    Ok(CanonicalBar {
        pair: event.symbol.to_lowercase(),
        segment: MarketSegment::Spot,
        interval,
        event_time: utc_from_millis(event.event_time)?,
        bar: bar_data(event.kline)?,
    })
}

fn from_continuous(event: ContinuousKlineEvent) -> Result<CanonicalBar, NormalizeError> {
    let segment = MarketSegment::from_contract_type(&event.contract_type)
        .ok_or_else(|| NormalizeError::UnknownContractType(event.contract_type.clone()))?;
    let interval = parse_interval(&event.kline.interval)?;
    Ok(CanonicalBar {
        pair: event.pair.to_lowercase(),
        segment,
        interval,
        event_time: utc_from_millis(event.event_time)?,
        bar: bar_data(event.kline)?,
    })
}

fn bar_data(kline: RawKline) -> Result<BarData, NormalizeError> {
    if kline.start_time >= kline.close_time {
        return Err(NormalizeError::InvalidWindow {
            start: kline.start_time,
            end: kline.close_time,
        });
    }
    Ok(BarData {
        start_time: utc_from_millis(kline.start_time)?,
        end_time: utc_from_millis(kline.close_time)?,
        open: kline.open,
        high: kline.high,
        low: kline.low,
        close: kline.close,
        base_volume: kline.volume,
        quote_volume: kline.quote_volume,
        trade_count: kline.trade_count,
        is_closed: kline.is_closed,
    })
}

fn parse_interval(token: &str) -> Result<KlineInterval, NormalizeError> {
    KlineInterval::from_token(token).ok_or_else(|| NormalizeError::UnknownInterval(token.to_string()))
}

fn utc_from_millis(millis: i64) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::from_timestamp_millis(millis).ok_or(NormalizeError::InvalidTimestamp(millis))
}
