//! Canonical market data types and the normalizers that produce them.

pub mod bars;
pub mod channel;
pub mod normalize;

pub use bars::{BarData, BarMessage, CanonicalBar, KlineInterval, MarketSegment};
pub use channel::{channel_name, channel_names, platform_pattern};
pub use normalize::{normalize, NormalizeError};
