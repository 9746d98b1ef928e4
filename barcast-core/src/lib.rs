//! Barcast Market Data Relay Library
//!
//! Streams candlestick ("kline") events from an exchange's multiplexed
//! websocket feeds and normalizes them into one canonical bar shape. Every
//! bar is republished onto a redis pub/sub channel named
//! `{platform}/{pair}/{segment}/{interval}`. Can be used as a library or
//! through the `barcast` binary.

pub mod broker;
pub mod config;
pub mod exchanges;
pub mod market_data;
pub mod session;

// Re-export the main types for easy access
pub use broker::{BarBus, BusError, BusEvent, MemoryBus, RedisBus, Subscription};
pub use config::{Config, ConfigError, PlatformConfig, PlatformName, PlatformOptions};
pub use exchanges::{
    BinanceConnector, FuturesMarket, RawStream, SegmentGroup, StreamConnector, StreamError,
};
pub use market_data::{
    channel_name, channel_names, normalize, platform_pattern, BarData, BarMessage, CanonicalBar,
    KlineInterval, MarketSegment, NormalizeError,
};
pub use session::{
    RelayCounters, RelayError, RelayHandle, RelayLoop, RelayOutcome, RelayState, SegmentOutcome,
    SegmentResult, SessionParams, SessionReport, SessionSupervisor,
};
