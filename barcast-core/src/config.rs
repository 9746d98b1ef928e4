//! Configuration schema, loading, and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::exchanges::{FuturesMarket, SegmentGroup};
use crate::market_data::KlineInterval;

const CONFIG_DIR: &str = ".barcast";
const CONFIG_FILE: &str = "barcast.yaml";

/// Configuration written by `barcast config generate`.
pub const DEFAULT_CONFIG: &str = "\
# barcast configuration.
#
# broker_url:  redis instance bars are published to.
# pairs:       pairs every platform streams; a platform's own `pairs`
#              list is appended to these.
# platforms:   one entry per exchange session. Recognized options:
#              intervals, spot, usd_m, coin_m, lifetime,
#              publish_failure_limit.
broker_url: redis://127.0.0.1:6379
pairs:
  - btcusdt
  - ethusdt
platforms:
  - name: binance
";

/// Custom result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("configuration is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("broker_url {url} is not usable: {message}")]
    BrokerUrl { url: String, message: String },

    #[error("platform {platform} has no pairs to stream")]
    NoPairs { platform: String },

    #[error("platform {platform} has an empty intervals list")]
    NoIntervals { platform: String },

    #[error("platform {platform} disables every market segment")]
    NoSegments { platform: String },

    #[error("platform {platform} sets lifetime: 0; omit it to stream unbounded")]
    ZeroLifetime { platform: String },

    #[error("could not determine a home directory for the configuration file")]
    NoHome,
}

/// Platforms the relay can stream from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformName {
    #[serde(rename = "binance")]
    Binance,
}

impl PlatformName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformName::Binance => "binance",
        }
    }
}

impl std::fmt::Display for PlatformName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker the normalized bars are published to
    pub broker_url: String,
    /// Pairs shared by every platform entry
    #[serde(default)]
    pub pairs: Vec<String>,
    /// Platform sessions to run
    pub platforms: Vec<PlatformConfig>,
}

/// One platform entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub name: PlatformName,
    /// Extra pairs streamed on this platform only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairs: Option<Vec<String>>,
    #[serde(default)]
    pub options: PlatformOptions,
}

impl PlatformConfig {
    /// Pairs this platform streams: the global list plus its own, lower-cased,
    /// first occurrence wins.
    pub fn effective_pairs(&self, global: &[String]) -> Vec<String> {
        let mut pairs: Vec<String> = Vec::new();
        for pair in global.iter().chain(self.pairs.iter().flatten()) {
            let pair = pair.to_lowercase();
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        pairs
    }
}

/// Per-platform tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformOptions {
    /// Bar intervals to subscribe
    pub intervals: Vec<KlineInterval>,
    /// Stream the spot segment
    pub spot: bool,
    /// Stream USD-margined futures (perpetual and both quarterly contracts)
    pub usd_m: bool,
    /// Stream coin-margined futures
    pub coin_m: bool,
    /// Wall-clock seconds after which each relay loop closes; unset streams
    /// until interrupted
    pub lifetime: Option<u64>,
    /// Consecutive publish failures tolerated before a relay loop gives up;
    /// unset keeps relaying through broker outages
    pub publish_failure_limit: Option<u32>,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            intervals: vec![KlineInterval::OneMinute],
            spot: true,
            usd_m: true,
            coin_m: false,
            lifetime: None,
            publish_failure_limit: None,
        }
    }
}

impl PlatformOptions {
    /// Enabled segment groups, one relay loop each.
    pub fn segment_groups(&self) -> Vec<SegmentGroup> {
        let mut groups = Vec::new();
        if self.spot {
            groups.push(SegmentGroup::Spot);
        }
        if self.usd_m {
            groups.push(SegmentGroup::Futures(FuturesMarket::UsdMargined));
        }
        if self.coin_m {
            groups.push(SegmentGroup::Futures(FuturesMarket::CoinMargined));
        }
        groups
    }

    pub fn lifetime_duration(&self) -> Option<Duration> {
        self.lifetime.map(Duration::from_secs)
    }
}

impl Config {
    /// Reads, parses, and validates the file at `path`.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything the YAML schema cannot express. First failure wins.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = Url::parse(&self.broker_url).map_err(|e| ConfigError::BrokerUrl {
            url: self.broker_url.clone(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(ConfigError::BrokerUrl {
                url: self.broker_url.clone(),
                message: format!("unsupported scheme {}", url.scheme()),
            });
        }
        for platform in &self.platforms {
            let name = platform.name.to_string();
            if platform.effective_pairs(&self.pairs).is_empty() {
                return Err(ConfigError::NoPairs { platform: name });
            }
            if platform.options.intervals.is_empty() {
                return Err(ConfigError::NoIntervals { platform: name });
            }
            if platform.options.segment_groups().is_empty() {
                return Err(ConfigError::NoSegments { platform: name });
            }
            if platform.options.lifetime == Some(0) {
                return Err(ConfigError::ZeroLifetime { platform: name });
            }
        }
        Ok(())
    }

    /// `~/.barcast/barcast.yaml`
    pub fn default_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
        Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
