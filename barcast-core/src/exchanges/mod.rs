//! Exchange connectivity: raw event shapes, stream naming, and the
//! multiplexed websocket transport.

pub mod binance;
pub mod streams;

pub use binance::{
    build_stream_ids, combined_stream_url, continuous_stream, spot_stream, BinanceConnector,
    BinanceStream, ContinuousKlineEvent, RawKline, SpotKlineEvent, StreamEnvelope,
};
pub use streams::{FuturesMarket, RawStream, SegmentGroup, StreamConnector, StreamError};
