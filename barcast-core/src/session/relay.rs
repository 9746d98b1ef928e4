//! The relay loop: one multiplexed exchange connection, pumped until the
//! lifetime elapses or a shutdown arrives. A lost connection also ends the
//! loop, as an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{BarBus, BusError};
use crate::config::PlatformName;
use crate::exchanges::{build_stream_ids, RawStream, SegmentGroup, StreamConnector, StreamError};
use crate::market_data::{normalize, KlineInterval};

/// Where a relay loop is in its life.
///
/// `Connecting -> Streaming -> Draining -> Closed`, with `Streaming` and
/// `Draining` skipped when the connection never opens. `Closed` is terminal
/// and reached on every exit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Connecting,
    Streaming,
    Draining,
    Closed,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Connecting => "connecting",
            RelayState::Streaming => "streaming",
            RelayState::Draining => "draining",
            RelayState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable parameters shared by every relay loop of one platform session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub pairs: Vec<String>,
    pub intervals: Vec<KlineInterval>,
    /// Wall-clock bound on the loop; `None` streams until cancelled.
    pub lifetime: Option<Duration>,
    /// Consecutive publish failures tolerated before the loop gives up;
    /// `None` keeps relaying through broker outages.
    pub publish_failure_limit: Option<u32>,
}

/// Monotonic per-loop counters, readable through [`RelayHandle`].
#[derive(Debug, Default)]
pub struct RelayCounters {
    received: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    publish_failures: AtomicU64,
}

impl RelayCounters {
    /// Raw events taken off the stream.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Bars published to the bus.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events dropped by normalization.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Publish attempts the bus rejected.
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

/// Shared view onto a running relay loop.
#[derive(Clone)]
pub struct RelayHandle {
    state: Arc<RwLock<RelayState>>,
    counters: Arc<RelayCounters>,
}

impl RelayHandle {
    pub fn state(&self) -> RelayState {
        *self.state.read()
    }

    pub fn counters(&self) -> &RelayCounters {
        &self.counters
    }
}

/// How a relay loop finished when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The configured lifetime elapsed.
    LifetimeElapsed,
    /// A shutdown signal arrived.
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("could not open stream: {0}")]
    Connect(StreamError),

    #[error("connection lost: {0}")]
    ConnectionLost(StreamError),

    #[error("broker unavailable, {failures} consecutive publish failures, last: {last}")]
    BrokerUnavailable { failures: u32, last: BusError },

    #[error("relay task interrupted: {message}")]
    Interrupted { message: String },
}

/// One relay loop. Opens the multiplexed connection for its segment group
/// and republishes every normalized bar until the loop ends. Does not
/// reconnect; a lost connection is reported upward.
pub struct RelayLoop<C: StreamConnector> {
    platform: PlatformName,
    group: SegmentGroup,
    params: SessionParams,
    connector: Arc<C>,
    bus: Arc<dyn BarBus>,
    state: Arc<RwLock<RelayState>>,
    counters: Arc<RelayCounters>,
}

impl<C: StreamConnector> RelayLoop<C> {
    pub fn new(
        platform: PlatformName,
        group: SegmentGroup,
        params: SessionParams,
        connector: Arc<C>,
        bus: Arc<dyn BarBus>,
    ) -> Self {
        Self {
            platform,
            group,
            params,
            connector,
            bus,
            state: Arc::new(RwLock::new(RelayState::Connecting)),
            counters: Arc::new(RelayCounters::default()),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Runs the loop to completion. The connection is released on every exit
    /// path before this returns.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<RelayOutcome, RelayError> {
        let streams = build_stream_ids(
            &self.params.pairs,
            &self.params.intervals,
            self.group.segments(),
        );
        match self.params.lifetime {
            Some(lifetime) => info!(
                "Opening a {}s websocket to {}, for candlesticks on {} {}.",
                lifetime.as_secs(),
                self.platform,
                self.params.pairs.join(", "),
                self.group.describe(),
            ),
            None => info!(
                "Opening a websocket to {}, for candlesticks on {} {}.",
                self.platform,
                self.params.pairs.join(", "),
                self.group.describe(),
            ),
        }

        self.set_state(RelayState::Connecting);
        let mut stream = match self.open(&streams).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(RelayState::Closed);
                return Err(RelayError::Connect(e));
            }
        };

        self.set_state(RelayState::Streaming);
        let result = self.pump(&mut stream, &mut shutdown).await;

        self.set_state(RelayState::Draining);
        if let Err(e) = stream.close().await {
            debug!("{} {} stream close reported: {}", self.platform, self.group, e);
        }
        self.set_state(RelayState::Closed);
        result
    }

    async fn open(&self, streams: &[String]) -> Result<C::Stream, StreamError> {
        match self.group {
            SegmentGroup::Spot => self.connector.open_spot_multiplex(streams).await,
            SegmentGroup::Futures(market) => {
                self.connector.open_futures_multiplex(market, streams).await
            }
        }
    }

    async fn pump(
        &self,
        stream: &mut C::Stream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<RelayOutcome, RelayError> {
        let deadline = self.params.lifetime.map(|lifetime| Instant::now() + lifetime);
        let mut consecutive_failures: u32 = 0;
        loop {
            // wall-clock bound, re-checked every time a receive completes
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("{} {} relay reached its lifetime bound", self.platform, self.group);
                    return Ok(RelayOutcome::LifetimeElapsed);
                }
            }
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("{} {} relay cancelled", self.platform, self.group);
                    return Ok(RelayOutcome::Cancelled);
                }
                received = stream.recv() => match received {
                    Ok(Some(event)) => self.process(&event, &mut consecutive_failures).await?,
                    Ok(None) => return Err(RelayError::ConnectionLost(StreamError::Closed)),
                    Err(e) => return Err(RelayError::ConnectionLost(e)),
                },
            }
        }
    }

    async fn process(
        &self,
        event: &Value,
        consecutive_failures: &mut u32,
    ) -> Result<(), RelayError> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let bar = match normalize(event) {
            Ok(bar) => bar,
            Err(e) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                warn!("{} {} event skipped: {}", self.platform, self.group, e);
                return Ok(());
            }
        };
        let channel = bar.channel(self.platform.as_str());
        let payload = match serde_json::to_vec(&bar.to_message()) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                warn!("{} bar not serializable: {}", channel, e);
                return Ok(());
            }
        };
        debug!("{} <-- {}", channel, String::from_utf8_lossy(&payload));

        match self.bus.publish(&channel, &payload).await {
            Ok(()) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                *consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                *consecutive_failures += 1;
                warn!(
                    "{} publish failed ({} consecutive): {}",
                    channel, consecutive_failures, e
                );
                match self.params.publish_failure_limit {
                    Some(limit) if *consecutive_failures >= limit => {
                        Err(RelayError::BrokerUnavailable {
                            failures: *consecutive_failures,
                            last: e,
                        })
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    fn set_state(&self, next: RelayState) {
        *self.state.write() = next;
        debug!("{} {} relay state: {}", self.platform, self.group, next);
    }
}
