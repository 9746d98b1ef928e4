//! Binance kline streams.
//!
//! Raw event shapes, stream-identifier builders, and the websocket connector.
//! Subscriptions ride in the combined-stream URL (`/stream?streams=a/b/c`), so
//! the connection exchanges no subscribe frames in-band and everything the
//! server sends is either a wrapped event or transport housekeeping.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::streams::{FuturesMarket, RawStream, StreamConnector, StreamError};
use crate::market_data::{KlineInterval, MarketSegment};

const SPOT_WS_BASE: &str = "wss://stream.binance.com:9443";
const USD_FUTURES_WS_BASE: &str = "wss://fstream.binance.com";
const COIN_FUTURES_WS_BASE: &str = "wss://dstream.binance.com";

/// Combined-stream envelope wrapping every multiplexed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: Value,
}

/// Spot kline event, discriminated by `e == "kline"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotKlineEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: RawKline,
}

/// Continuous-contract kline event, discriminated by `e == "continuous_kline"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuousKlineEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "ps")]
    pub pair: String,
    #[serde(rename = "ct")]
    pub contract_type: String,
    #[serde(rename = "k")]
    pub kline: RawKline,
}

/// The `k` payload shared by both kline event shapes. Decimal fields stay
/// strings end to end. Unlisted exchange fields are ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawKline {
    #[serde(rename = "t")]
    pub start_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

/// Stream id for one spot kline subscription, e.g. `btcusdt@kline_1m`.
pub fn spot_stream(pair: &str, interval: KlineInterval) -> String {
    format!("{}@kline_{}", pair.to_lowercase(), interval.exchange_token())
}

/// Stream id for one continuous-contract kline subscription, e.g.
/// `btcusdt_perpetual@continuousKline_1h`.
pub fn continuous_stream(pair: &str, segment: MarketSegment, interval: KlineInterval) -> String {
    format!(
        "{}_{}@continuousKline_{}",
        pair.to_lowercase(),
        segment.as_str(),
        interval.exchange_token()
    )
}

/// Raw stream identifiers for the full (pairs x segments x intervals)
/// product, in request order. No deduplication: callers own that, and the
/// exchange treats duplicate ids as duplicate subscriptions.
pub fn build_stream_ids(
    pairs: &[String],
    intervals: &[KlineInterval],
    segments: &[MarketSegment],
) -> Vec<String> {
    let mut streams = Vec::with_capacity(pairs.len() * segments.len() * intervals.len());
    for pair in pairs {
        for segment in segments {
            for interval in intervals {
                streams.push(match segment {
                    MarketSegment::Spot => spot_stream(pair, *interval),
                    futures => continuous_stream(pair, *futures, *interval),
                });
            }
        }
    }
    streams
}

/// Combined-stream endpoint carrying every requested stream id.
pub fn combined_stream_url(base: &str, streams: &[String]) -> String {
    format!("{}/stream?streams={}", base, streams.join("/"))
}

/// Opens multiplexed kline connections against the public Binance endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceConnector;

impl BinanceConnector {
    pub fn new() -> Self {
        Self
    }

    async fn open(&self, base: &str, streams: &[String]) -> Result<BinanceStream, StreamError> {
        let url = Url::parse(&combined_stream_url(base, streams))?;
        debug!(url = %url, streams = streams.len(), "opening combined websocket stream");
        let (ws, _response) = connect_async(url).await?;
        Ok(BinanceStream { ws })
    }
}

#[async_trait]
impl StreamConnector for BinanceConnector {
    type Stream = BinanceStream;

    async fn open_spot_multiplex(&self, streams: &[String]) -> Result<Self::Stream, StreamError> {
        self.open(SPOT_WS_BASE, streams).await
    }

    async fn open_futures_multiplex(
        &self,
        market: FuturesMarket,
        streams: &[String],
    ) -> Result<Self::Stream, StreamError> {
        let base = match market {
            FuturesMarket::UsdMargined => USD_FUTURES_WS_BASE,
            FuturesMarket::CoinMargined => COIN_FUTURES_WS_BASE,
        };
        self.open(base, streams).await
    }
}

/// A live combined-stream websocket. Unwraps the `{stream, data}` envelope and
/// answers pings; everything else surfaces through [`RawStream::recv`].
pub struct BinanceStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl RawStream for BinanceStream {
    async fn recv(&mut self) -> Result<Option<Value>, StreamError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(StreamEnvelope { data, .. }) = serde_json::from_str(&text) {
                        return Ok(Some(data));
                    }
                    // direct (non-combined) connections deliver bare events
                    match serde_json::from_str::<Value>(&text) {
                        Ok(value) => return Ok(Some(value)),
                        Err(err) => {
                            warn!("dropping non-JSON text frame: {}", err);
                            debug!(frame = %text, "undecodable frame");
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.ws.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the stream");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(StreamError::Transport(err)),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        match self.ws.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(StreamError::Transport(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_stream_ids_use_exchange_naming() {
        assert_eq!(
            spot_stream("BTCUSDT", KlineInterval::OneMinute),
            "btcusdt@kline_1m"
        );
        // monthly keeps the exchange's upper-case token in stream ids
        assert_eq!(
            spot_stream("ethusdt", KlineInterval::OneMonth),
            "ethusdt@kline_1M"
        );
    }

    #[test]
    fn test_continuous_stream_ids_carry_the_contract_kind() {
        assert_eq!(
            continuous_stream("btcusdt", MarketSegment::Perpetual, KlineInterval::OneHour),
            "btcusdt_perpetual@continuousKline_1h"
        );
        assert_eq!(
            continuous_stream(
                "BTCUSD",
                MarketSegment::CurrentQuarter,
                KlineInterval::OneMinute
            ),
            "btcusd_current_quarter@continuousKline_1m"
        );
    }

    #[test]
    fn test_stream_ids_cover_the_cartesian_product_in_order() {
        let pairs = vec!["btcusdt".to_string(), "ethusdt".to_string()];
        let intervals = [KlineInterval::OneMinute, KlineInterval::OneHour];

        let spot = build_stream_ids(&pairs, &intervals, &[MarketSegment::Spot]);
        assert_eq!(
            spot,
            [
                "btcusdt@kline_1m",
                "btcusdt@kline_1h",
                "ethusdt@kline_1m",
                "ethusdt@kline_1h"
            ]
        );

        let futures = build_stream_ids(
            &pairs[..1],
            &intervals[..1],
            &MarketSegment::FUTURES,
        );
        assert_eq!(
            futures,
            [
                "btcusdt_perpetual@continuousKline_1m",
                "btcusdt_current_quarter@continuousKline_1m",
                "btcusdt_next_quarter@continuousKline_1m"
            ]
        );
    }

    #[test]
    fn test_stream_ids_are_not_deduplicated() {
        let pairs = vec!["btcusdt".to_string(), "btcusdt".to_string()];
        let ids = build_stream_ids(&pairs, &[KlineInterval::OneMinute], &[MarketSegment::Spot]);
        assert_eq!(ids, ["btcusdt@kline_1m", "btcusdt@kline_1m"]);
    }

    #[test]
    fn test_combined_url_joins_streams_with_slashes() {
        let streams = vec!["btcusdt@kline_1m".to_string(), "ethusdt@kline_1m".to_string()];
        assert_eq!(
            combined_stream_url(SPOT_WS_BASE, &streams),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@kline_1m/ethusdt@kline_1m"
        );
    }

    #[test]
    fn test_envelope_carries_the_event_under_data() {
        let text = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","E":1607443058651}}"#;
        let envelope: StreamEnvelope = serde_json::from_str(text).unwrap();
        assert_eq!(envelope.stream, "btcusdt@kline_1m");
        assert_eq!(envelope.data["e"], "kline");
    }

    #[test]
    fn test_raw_kline_decodes_from_exchange_payload() {
        let text = r#"{
            "t": 1607443020000, "T": 1607443079999, "i": "1m",
            "f": 116467658886, "L": 116468012423,
            "o": "18787.00", "c": "18804.04", "h": "18804.04", "l": "18786.54",
            "v": "197.664", "n": 543, "x": false, "q": "3715253.19494"
        }"#;
        let kline: RawKline = serde_json::from_str(text).unwrap();
        assert_eq!(kline.start_time, 1_607_443_020_000);
        assert_eq!(kline.interval, "1m");
        assert_eq!(kline.open, "18787.00");
        assert_eq!(kline.trade_count, 543);
        assert!(!kline.is_closed);
    }
}
