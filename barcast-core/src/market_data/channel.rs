//! Channel naming.
//!
//! Channels are derived, never stored: `{platform}/{pair}/{segment}/{interval}`,
//! all lower-case. The mapping must be injective so no two bars from distinct
//! (pair, segment, interval) triples land on the same channel; that is why the
//! monthly interval uses the dedicated `1mo` channel token.

use super::bars::{CanonicalBar, KlineInterval, MarketSegment};

/// The channel a bar is published on. Pure and deterministic; inputs are
/// lower-cased so the function stays total over raw exchange symbols.
pub fn channel_name(
    platform: &str,
    pair: &str,
    segment: MarketSegment,
    interval: KlineInterval,
) -> String {
    format!(
        "{}/{}/{}/{}",
        platform.to_lowercase(),
        pair.to_lowercase(),
        segment.as_str(),
        interval.channel_token()
    )
}

/// Wildcard pattern matching every channel a platform publishes, for
/// pattern-subscribing consumers.
pub fn platform_pattern(platform: &str) -> String {
    format!("{}/*", platform.to_lowercase())
}

/// Every channel for the requested (pairs x segments x intervals), in request
/// order. Consumers subscribe with exactly these names, so the list must
/// mirror what the relay publishes.
pub fn channel_names(
    platform: &str,
    pairs: &[String],
    segments: &[MarketSegment],
    intervals: &[KlineInterval],
) -> Vec<String> {
    let mut channels = Vec::with_capacity(pairs.len() * segments.len() * intervals.len());
    for pair in pairs {
        for segment in segments {
            for interval in intervals {
                channels.push(channel_name(platform, pair, *segment, *interval));
            }
        }
    }
    channels
}

impl CanonicalBar {
    /// Channel this bar is published on for the given platform.
    pub fn channel(&self, platform: &str) -> String {
        channel_name(platform, &self.pair, self.segment, self.interval)
    }
}
