//! Stream abstractions.
//!
//! A relay loop owns exactly one [`RawStream`]: a multiplexed connection
//! delivering decoded JSON events for a fixed set of subscribed stream names.
//! [`StreamConnector`] opens those connections; the exchange exposes separate
//! multiplex entry points for spot and futures, so the trait does too.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::market_data::MarketSegment;

/// Which margin asset a futures connection settles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuturesMarket {
    UsdMargined,
    CoinMargined,
}

impl FuturesMarket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsdMargined => "usd_m",
            Self::CoinMargined => "coin_m",
        }
    }
}

impl fmt::Display for FuturesMarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One multiplexed connection's worth of streams. Each group maps to its own
/// connection and its own relay loop; groups never share a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentGroup {
    Spot,
    Futures(FuturesMarket),
}

impl SegmentGroup {
    /// The market segments this group subscribes to. A futures connection
    /// carries all three continuous contract kinds.
    pub fn segments(&self) -> &'static [MarketSegment] {
        match self {
            Self::Spot => &[MarketSegment::Spot],
            Self::Futures(_) => &MarketSegment::FUTURES,
        }
    }

    /// Human wording for session log lines.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Spot => "spot prices",
            Self::Futures(FuturesMarket::UsdMargined) => "USD-margined futures",
            Self::Futures(FuturesMarket::CoinMargined) => "coin-margined futures",
        }
    }
}

impl fmt::Display for SegmentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::Futures(market) => write!(f, "{}", market),
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid stream endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("stream closed by server")]
    Closed,
}

/// A live multiplexed raw-message connection.
#[async_trait]
pub trait RawStream: Send {
    /// Receives the next decoded event. `Ok(None)` means the server closed
    /// the stream in an orderly way; the connection is gone either way.
    async fn recv(&mut self) -> Result<Option<Value>, StreamError>;

    /// Releases the underlying connection. Called exactly once per stream, on
    /// every relay exit path.
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Opens multiplexed connections. Spot and futures use distinct entry points,
/// mirroring the exchange's own API surface.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    type Stream: RawStream + 'static;

    async fn open_spot_multiplex(&self, streams: &[String]) -> Result<Self::Stream, StreamError>;

    async fn open_futures_multiplex(
        &self,
        market: FuturesMarket,
        streams: &[String],
    ) -> Result<Self::Stream, StreamError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_group_covers_only_spot() {
        assert_eq!(SegmentGroup::Spot.segments(), &[MarketSegment::Spot]);
    }

    #[test]
    fn test_futures_groups_cover_all_contract_kinds() {
        for market in [FuturesMarket::UsdMargined, FuturesMarket::CoinMargined] {
            let segments = SegmentGroup::Futures(market).segments();
            assert_eq!(
                segments,
                &[
                    MarketSegment::Perpetual,
                    MarketSegment::CurrentQuarter,
                    MarketSegment::NextQuarter
                ]
            );
        }
    }

    #[test]
    fn test_group_labels() {
        assert_eq!(SegmentGroup::Spot.to_string(), "spot");
        assert_eq!(
            SegmentGroup::Futures(FuturesMarket::UsdMargined).to_string(),
            "usd_m"
        );
        assert_eq!(
            SegmentGroup::Futures(FuturesMarket::CoinMargined).describe(),
            "coin-margined futures"
        );
    }
}
