//! Runs one platform's relay loops concurrently and aggregates what became
//! of each.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::broker::BarBus;
use crate::config::{PlatformConfig, PlatformName};
use crate::exchanges::{SegmentGroup, StreamConnector};

use super::relay::{RelayError, RelayLoop, RelayOutcome, SessionParams};

/// What became of one segment's relay loop.
#[derive(Debug)]
pub enum SegmentOutcome {
    /// Lifetime elapsed and the loop closed on its own.
    Completed,
    Cancelled,
    Failed(RelayError),
}

impl fmt::Display for SegmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentOutcome::Completed => f.write_str("completed"),
            SegmentOutcome::Cancelled => f.write_str("cancelled"),
            SegmentOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct SegmentResult {
    pub group: SegmentGroup,
    pub outcome: SegmentOutcome,
}

/// Aggregate of one platform session, one entry per segment group.
#[derive(Debug)]
pub struct SessionReport {
    pub platform: PlatformName,
    pub results: Vec<SegmentResult>,
}

impl SessionReport {
    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, SegmentOutcome::Failed(_)))
            .count()
    }
}

/// Fans one platform session out into concurrent relay loops, one per
/// enabled segment group, and waits for all of them.
///
/// Segments are independent failure domains: one loop failing does not
/// cancel its siblings, the report simply carries every outcome.
pub struct SessionSupervisor<C: StreamConnector> {
    platform: PlatformName,
    groups: Vec<SegmentGroup>,
    params: SessionParams,
    connector: Arc<C>,
    bus: Arc<dyn BarBus>,
}

impl<C: StreamConnector + 'static> SessionSupervisor<C> {
    pub fn new(
        platform: PlatformName,
        groups: Vec<SegmentGroup>,
        params: SessionParams,
        connector: Arc<C>,
        bus: Arc<dyn BarBus>,
    ) -> Self {
        Self {
            platform,
            groups,
            params,
            connector,
            bus,
        }
    }

    /// Builds the supervisor for one validated platform entry.
    pub fn from_config(
        platform: &PlatformConfig,
        global_pairs: &[String],
        connector: Arc<C>,
        bus: Arc<dyn BarBus>,
    ) -> Self {
        let params = SessionParams {
            pairs: platform.effective_pairs(global_pairs),
            intervals: platform.options.intervals.clone(),
            lifetime: platform.options.lifetime_duration(),
            publish_failure_limit: platform.options.publish_failure_limit,
        };
        Self::new(
            platform.name,
            platform.options.segment_groups(),
            params,
            connector,
            bus,
        )
    }

    /// Runs every relay loop to completion and reports per-segment outcomes.
    /// Each loop gets its own subscription to the shutdown channel, taken
    /// when this is called rather than when the returned future is first
    /// polled; a shutdown sent in between is still observed.
    pub fn run(self, shutdown: broadcast::Sender<()>) -> impl Future<Output = SessionReport> {
        let receivers: Vec<_> = self.groups.iter().map(|_| shutdown.subscribe()).collect();
        async move {
            let _shutdown = shutdown; // hold the channel open while the loops run
            let mut groups = Vec::with_capacity(self.groups.len());
            let mut tasks = Vec::with_capacity(self.groups.len());
            for (group, receiver) in self.groups.into_iter().zip(receivers) {
                let relay = RelayLoop::new(
                    self.platform,
                    group,
                    self.params.clone(),
                    Arc::clone(&self.connector),
                    Arc::clone(&self.bus),
                );
                groups.push(group);
                tasks.push(tokio::spawn(relay.run(receiver)));
            }

            let joined = join_all(tasks).await;
            let results: Vec<SegmentResult> = groups
                .into_iter()
                .zip(joined)
                .map(|(group, joined)| {
                    let outcome = match joined {
                        Ok(Ok(RelayOutcome::LifetimeElapsed)) => SegmentOutcome::Completed,
                        Ok(Ok(RelayOutcome::Cancelled)) => SegmentOutcome::Cancelled,
                        Ok(Err(e)) => SegmentOutcome::Failed(e),
                        Err(e) => SegmentOutcome::Failed(RelayError::Interrupted {
                            message: e.to_string(),
                        }),
                    };
                    SegmentResult { group, outcome }
                })
                .collect();

            let report = SessionReport {
                platform: self.platform,
                results,
            };
            for result in &report.results {
                match &result.outcome {
                    SegmentOutcome::Failed(e) => {
                        warn!("{} {} session failed: {}", report.platform, result.group, e)
                    }
                    outcome => info!("{} {} session {}", report.platform, result.group, outcome),
                }
            }
            report
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::MemoryBus;
    use crate::exchanges::streams::testing::{ScriptedConnector, ScriptedStream, Tail};
    use crate::exchanges::FuturesMarket;
    use crate::market_data::KlineInterval;

    fn params(lifetime: Option<Duration>) -> SessionParams {
        SessionParams {
            pairs: vec!["btcusdt".to_string()],
            intervals: vec![KlineInterval::OneMinute],
            lifetime,
            publish_failure_limit: None,
        }
    }

    #[tokio::test]
    async fn test_sibling_failure_does_not_cancel_other_segments() {
        let connector = Arc::new(ScriptedConnector::default());
        // spot receives a steady stream and completes its lifetime; nothing
        // is prepared for usd-m futures, so that loop fails at connect
        let (stream, spot_closes) =
            ScriptedStream::new(vec![serde_json::json!({"e": "ignored"})], Tail::Block);
        connector.insert(SegmentGroup::Spot, stream.repeating());

        let supervisor = SessionSupervisor::new(
            PlatformName::Binance,
            vec![
                SegmentGroup::Spot,
                SegmentGroup::Futures(FuturesMarket::UsdMargined),
            ],
            params(Some(Duration::from_millis(200))),
            connector,
            Arc::new(MemoryBus::new()),
        );
        let (shutdown, _receiver) = broadcast::channel(1);

        let report = supervisor.run(shutdown).await;

        assert_eq!(report.platform, PlatformName::Binance);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].group, SegmentGroup::Spot);
        assert!(matches!(report.results[0].outcome, SegmentOutcome::Completed));
        assert_eq!(
            report.results[1].group,
            SegmentGroup::Futures(FuturesMarket::UsdMargined)
        );
        assert!(matches!(
            report.results[1].outcome,
            SegmentOutcome::Failed(RelayError::Connect(_))
        ));
        assert_eq!(report.failures(), 1);
        assert_eq!(spot_closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_every_segment() {
        let connector = Arc::new(ScriptedConnector::default());
        let (spot, _spot_closes) = ScriptedStream::new(vec![], Tail::Block);
        let (futures, _futures_closes) = ScriptedStream::new(vec![], Tail::Block);
        connector.insert(SegmentGroup::Spot, spot);
        connector.insert(SegmentGroup::Futures(FuturesMarket::UsdMargined), futures);

        let supervisor = SessionSupervisor::new(
            PlatformName::Binance,
            vec![
                SegmentGroup::Spot,
                SegmentGroup::Futures(FuturesMarket::UsdMargined),
            ],
            params(None),
            connector,
            Arc::new(MemoryBus::new()),
        );
        let (shutdown, _receiver) = broadcast::channel(4);

        let task = tokio::spawn(supervisor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(()).unwrap();

        let report = task.await.unwrap();
        assert_eq!(report.results.len(), 2);
        for result in &report.results {
            assert!(matches!(result.outcome, SegmentOutcome::Cancelled));
        }
        assert_eq!(report.failures(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_sent_before_first_poll_still_cancels() {
        let connector = Arc::new(ScriptedConnector::default());
        let (stream, _closes) = ScriptedStream::new(vec![], Tail::Block);
        connector.insert(SegmentGroup::Spot, stream);

        let supervisor = SessionSupervisor::new(
            PlatformName::Binance,
            vec![SegmentGroup::Spot],
            params(None),
            connector,
            Arc::new(MemoryBus::new()),
        );
        let (shutdown, _receiver) = broadcast::channel(1);

        // run subscribes at call time; this send precedes the first poll
        let session = supervisor.run(shutdown.clone());
        shutdown.send(()).unwrap();

        let report = session.await;
        assert_eq!(report.results.len(), 1);
        assert!(matches!(report.results[0].outcome, SegmentOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_from_config_derives_groups_and_params() {
        let yaml = r#"
name: binance
pairs: [SOLUSDT]
options:
  intervals: ["1h"]
  coin_m: true
  lifetime: 60
"#;
        let platform: PlatformConfig = serde_yaml::from_str(yaml).unwrap();
        let supervisor = SessionSupervisor::from_config(
            &platform,
            &["BTCUSDT".to_string()],
            Arc::new(ScriptedConnector::default()),
            Arc::new(MemoryBus::new()),
        );

        assert_eq!(
            supervisor.groups,
            vec![
                SegmentGroup::Spot,
                SegmentGroup::Futures(FuturesMarket::UsdMargined),
                SegmentGroup::Futures(FuturesMarket::CoinMargined),
            ]
        );
        assert_eq!(supervisor.params.pairs, vec!["btcusdt", "solusdt"]);
        assert_eq!(supervisor.params.intervals, vec![KlineInterval::OneHour]);
        assert_eq!(supervisor.params.lifetime, Some(Duration::from_secs(60)));
        assert_eq!(supervisor.params.publish_failure_limit, None);
    }
}
