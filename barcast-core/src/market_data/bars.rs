//! Canonical bar model.
//!
//! Every raw kline event the relay receives is normalized into exactly one
//! [`CanonicalBar`] before it is serialized and published. The wire shape is a
//! compatibility contract: consumers already parse the legacy field names
//! (`expiry`, `time`, `trades`), so [`BarMessage`] keeps them while the
//! in-memory model uses the descriptive names.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Market segment a bar belongs to: spot, or one of the three futures
/// contract-expiry classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketSegment {
    #[serde(rename = "spot")]
    Spot,
    #[serde(rename = "perpetual")]
    Perpetual,
    #[serde(rename = "current_quarter")]
    CurrentQuarter,
    #[serde(rename = "next_quarter")]
    NextQuarter,
}

impl MarketSegment {
    /// The three futures segments, in the order the exchange enumerates
    /// continuous contracts.
    pub const FUTURES: [MarketSegment; 3] = [
        MarketSegment::Perpetual,
        MarketSegment::CurrentQuarter,
        MarketSegment::NextQuarter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Perpetual => "perpetual",
            Self::CurrentQuarter => "current_quarter",
            Self::NextQuarter => "next_quarter",
        }
    }

    /// Maps an exchange contract-type tag (`PERPETUAL`, `CURRENT_QUARTER`,
    /// `NEXT_QUARTER`, any casing) to a futures segment. `None` for anything
    /// else; in particular `spot` is not a contract type.
    pub fn from_contract_type(tag: &str) -> Option<MarketSegment> {
        Self::FUTURES
            .into_iter()
            .find(|segment| segment.as_str().eq_ignore_ascii_case(tag))
    }
}

impl fmt::Display for MarketSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Width of one kline bucket. The token set is closed; the exchange rejects
/// anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "2h")]
    TwoHours,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "8h")]
    EightHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1M")]
    OneMonth,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 15] = [
        KlineInterval::OneMinute,
        KlineInterval::ThreeMinutes,
        KlineInterval::FiveMinutes,
        KlineInterval::FifteenMinutes,
        KlineInterval::ThirtyMinutes,
        KlineInterval::OneHour,
        KlineInterval::TwoHours,
        KlineInterval::FourHours,
        KlineInterval::SixHours,
        KlineInterval::EightHours,
        KlineInterval::TwelveHours,
        KlineInterval::OneDay,
        KlineInterval::ThreeDays,
        KlineInterval::OneWeek,
        KlineInterval::OneMonth,
    ];

    /// Token used in exchange stream identifiers and kline payloads, e.g.
    /// the `1m` in `btcusdt@kline_1m`. The monthly token is upper-case `1M`
    /// per the exchange convention.
    pub fn exchange_token(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }

    /// Lower-case token used in channel names. The monthly bar maps to `1mo`:
    /// channels are all lower-case, and folding `1M` to `1m` would collide
    /// with the one-minute token.
    pub fn channel_token(&self) -> &'static str {
        match self {
            Self::OneMonth => "1mo",
            other => other.exchange_token(),
        }
    }

    /// Parses an exchange token (`1m`, `1h`, `1M`, ...). Case-sensitive,
    /// matching the exchange's own naming.
    pub fn from_token(token: &str) -> Option<KlineInterval> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.exchange_token() == token)
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.exchange_token())
    }
}

/// One aggregated price bucket. Price and volume fields stay the exact
/// strings the exchange sent; parsing them into floats would silently lose
/// precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarData {
    /// Inclusive start of the bar window.
    pub start_time: DateTime<Utc>,
    /// Exclusive end of the bar window (`[start, end)`).
    pub end_time: DateTime<Utc>,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub base_volume: String,
    pub quote_volume: String,
    #[serde(rename = "trades")]
    pub trade_count: u64,
    /// True only once the bar's window has fully elapsed. Passed through from
    /// the exchange; the relay never recomputes closure itself.
    pub is_closed: bool,
}

/// The normalized record the relay produces, one per raw kline event.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalBar {
    /// Lower-cased symbol, unique per exchange but not across segments.
    pub pair: String,
    pub segment: MarketSegment,
    pub interval: KlineInterval,
    /// When the exchange emitted the event.
    pub event_time: DateTime<Utc>,
    pub bar: BarData,
}

impl CanonicalBar {
    /// The wire representation published to the bus.
    pub fn to_message(&self) -> BarMessage {
        BarMessage {
            kind: "bar".to_string(),
            time: self.event_time,
            pair: self.pair.clone(),
            expiry: self.segment,
            bar: self.bar.clone(),
        }
    }
}

/// Published payload. Field names and nesting are a byte-level compatibility
/// contract with existing consumers: the segment is published as `expiry` and
/// the event time as `time`. The bar interval is not repeated in the payload;
/// it lives in the channel name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub time: DateTime<Utc>,
    pub pair: String,
    pub expiry: MarketSegment,
    pub bar: BarData,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn sample_bar() -> CanonicalBar {
        CanonicalBar {
            pair: "btcusdt".to_string(),
            segment: MarketSegment::CurrentQuarter,
            interval: KlineInterval::OneHour,
            event_time: DateTime::from_timestamp_millis(1_672_515_782_136).unwrap(),
            bar: BarData {
                start_time: DateTime::from_timestamp_millis(1_672_512_000_000).unwrap(),
                end_time: DateTime::from_timestamp_millis(1_672_515_599_999).unwrap(),
                open: "16541.23000000".to_string(),
                high: "16543.00000000".to_string(),
                low: "16540.00000000".to_string(),
                close: "16542.76000000".to_string(),
                base_volume: "1054.21000000".to_string(),
                quote_volume: "17438112.05000000".to_string(),
                trade_count: 485,
                is_closed: true,
            },
        }
    }

    #[test]
    fn test_segment_tokens_are_lower_case() {
        for segment in [
            MarketSegment::Spot,
            MarketSegment::Perpetual,
            MarketSegment::CurrentQuarter,
            MarketSegment::NextQuarter,
        ] {
            assert_eq!(segment.as_str(), segment.as_str().to_lowercase());
        }
    }

    #[test]
    fn test_contract_type_parsing_is_case_insensitive() {
        assert_eq!(
            MarketSegment::from_contract_type("PERPETUAL"),
            Some(MarketSegment::Perpetual)
        );
        assert_eq!(
            MarketSegment::from_contract_type("current_quarter"),
            Some(MarketSegment::CurrentQuarter)
        );
        assert_eq!(
            MarketSegment::from_contract_type("Next_Quarter"),
            Some(MarketSegment::NextQuarter)
        );
        assert_eq!(MarketSegment::from_contract_type("spot"), None);
        assert_eq!(MarketSegment::from_contract_type("WEEKLY"), None);
    }

    #[test]
    fn test_interval_tokens_round_trip() {
        for interval in KlineInterval::ALL {
            assert_eq!(KlineInterval::from_token(interval.exchange_token()), Some(interval));

            // serde names and exchange tokens must agree so config files use
            // the exchange's own spelling
            let quoted = format!("\"{}\"", interval.exchange_token());
            let parsed: KlineInterval = serde_json::from_str(&quoted).unwrap();
            assert_eq!(parsed, interval);
        }
        assert_eq!(KlineInterval::from_token("2s"), None);
        assert_eq!(KlineInterval::from_token("1mo"), None);
    }

    #[test]
    fn test_channel_tokens_are_lower_case_and_distinct() {
        let tokens: HashSet<&str> = KlineInterval::ALL
            .iter()
            .map(|interval| interval.channel_token())
            .collect();
        assert_eq!(tokens.len(), KlineInterval::ALL.len());
        for token in tokens {
            assert_eq!(token, token.to_lowercase());
        }
        assert_eq!(KlineInterval::OneMonth.channel_token(), "1mo");
        assert_eq!(KlineInterval::OneMinute.channel_token(), "1m");
    }

    #[test]
    fn test_wire_message_keeps_legacy_field_names() {
        let message = sample_bar().to_message();
        let value = serde_json::to_value(&message).unwrap();

        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["bar", "expiry", "pair", "time", "type"]);

        let mut bar_keys: Vec<&str> =
            value["bar"].as_object().unwrap().keys().map(String::as_str).collect();
        bar_keys.sort_unstable();
        assert_eq!(
            bar_keys,
            [
                "base_volume",
                "close",
                "end_time",
                "high",
                "is_closed",
                "low",
                "open",
                "quote_volume",
                "start_time",
                "trades"
            ]
        );

        assert_eq!(value["type"], "bar");
        assert_eq!(value["expiry"], "current_quarter");
        assert_eq!(value["pair"], "btcusdt");
        assert_eq!(value["bar"]["trades"], 485);
        assert_eq!(value["bar"]["open"], "16541.23000000");
        assert_eq!(value["bar"]["is_closed"], true);

        let time: DateTime<Utc> = value["time"].as_str().unwrap().parse().unwrap();
        assert_eq!(time, message.time);
    }

    #[test]
    fn test_wire_message_round_trips() {
        let message = sample_bar().to_message();
        let text = serde_json::to_string(&message).unwrap();
        let parsed: BarMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, message);
    }
}
