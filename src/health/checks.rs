use super::cache::ResultCache;
use super::models::{AggregateResult, CheckOutcome, HealthError};
use super::probes::Probe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The four probes that make up stamp health.
pub struct StampProbes {
    pub storage: Arc<dyn Probe>,
    pub producer: Arc<dyn Probe>,
    pub database: Arc<dyn Probe>,
    pub telemetry: Arc<dyn Probe>,
}

/// Runs every probe through the shared result cache and folds the verdicts
/// into one [`AggregateResult`].
pub struct HealthChecker {
    cache: ResultCache,
    probes: StampProbes,
}

impl HealthChecker {
    pub fn new(cache: ResultCache, probes: StampProbes) -> Self {
        Self { cache, probes }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Checks all dependencies concurrently, serving cached verdicts where
    /// they are still fresh.
    ///
    /// Waits for every check even when one already failed, so the detail map
    /// is always complete. Returns [`HealthError::Cancelled`] once `cancel`
    /// fires, whether or not some probes already finished.
    pub async fn check_health(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AggregateResult, HealthError> {
        let (storage, producer, database, telemetry) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HealthError::Cancelled),
            results = async {
                tokio::join!(
                    self.cached_probe(self.probes.storage.as_ref(), cancel),
                    self.cached_probe(self.probes.producer.as_ref(), cancel),
                    self.cached_probe(self.probes.database.as_ref(), cancel),
                    self.cached_probe(self.probes.telemetry.as_ref(), cancel),
                )
            } => results,
        };

        let checks = [
            (self.probes.storage.as_ref(), storage?),
            (self.probes.producer.as_ref(), producer?),
            (self.probes.database.as_ref(), database?),
            (self.probes.telemetry.as_ref(), telemetry?),
        ]
        .into_iter()
        .map(|(probe, healthy)| CheckOutcome {
            identity: probe.identity(),
            healthy,
        })
        .collect();

        let result = AggregateResult::from_outcomes(checks);
        if !result.is_healthy() {
            tracing::warn!("Stamp reported UNHEALTHY: {:?}", result.checks());
        }

        Ok(result)
    }

    async fn cached_probe(
        &self,
        probe: &dyn Probe,
        cancel: &CancellationToken,
    ) -> Result<bool, HealthError> {
        self.cache
            .get_or_refresh(probe.identity(), || async move {
                let healthy = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(HealthError::Cancelled),
                    healthy = probe.probe(cancel) => healthy,
                };

                // A probe interrupted by cancellation reports false; that
                // verdict must not be cached.
                if cancel.is_cancelled() {
                    return Err(HealthError::Cancelled);
                }

                Ok(healthy)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::cache::ManualClock;
    use crate::health::models::ProbeIdentity;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubProbe {
        identity: ProbeIdentity,
        healthy: AtomicBool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StubProbe {
        fn slow(identity: ProbeIdentity, healthy: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                identity,
                healthy: AtomicBool::new(healthy),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for StubProbe {
        fn identity(&self) -> ProbeIdentity {
            self.identity
        }

        async fn probe(&self, _cancel: &CancellationToken) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.healthy.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        stubs: [Arc<StubProbe>; 4],
        clock: Arc<ManualClock>,
        checker: Arc<HealthChecker>,
    }

    fn fixture(verdicts: [bool; 4], delay: Duration, ttl_seconds: u64) -> Fixture {
        let stubs = [
            StubProbe::slow(ProbeIdentity::Storage, verdicts[0], delay),
            StubProbe::slow(ProbeIdentity::Producer, verdicts[1], delay),
            StubProbe::slow(ProbeIdentity::Database, verdicts[2], delay),
            StubProbe::slow(ProbeIdentity::Telemetry, verdicts[3], delay),
        ];
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let probes = StampProbes {
            storage: stubs[0].clone(),
            producer: stubs[1].clone(),
            database: stubs[2].clone(),
            telemetry: stubs[3].clone(),
        };
        let checker = Arc::new(HealthChecker::new(
            ResultCache::new(ttl_seconds, clock.clone()),
            probes,
        ));

        Fixture {
            stubs,
            clock,
            checker,
        }
    }

    #[tokio::test]
    async fn test_overall_status_is_and_of_all_combinations() {
        for mask in 0u8..16 {
            let verdicts = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0, mask & 8 != 0];
            let fx = fixture(verdicts, Duration::ZERO, 30);

            let result = fx.checker.check_health(&CancellationToken::new()).await.unwrap();

            assert_eq!(result.is_healthy(), verdicts.iter().all(|v| *v), "{:?}", verdicts);
            for (identity, expected) in ProbeIdentity::ALL.iter().zip(verdicts) {
                assert_eq!(result.outcome(*identity), Some(expected));
            }
        }
    }

    #[tokio::test]
    async fn test_failed_check_does_not_stop_the_others() {
        let fx = fixture([true, false, true, true], Duration::ZERO, 30);

        let result = fx.checker.check_health(&CancellationToken::new()).await.unwrap();

        assert!(!result.is_healthy());
        assert_eq!(result.checks().len(), 4);
        for stub in &fx.stubs {
            assert_eq!(stub.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_verdicts_are_cached_for_ttl() {
        let fx = fixture([true; 4], Duration::ZERO, 10);
        let cancel = CancellationToken::new();

        fx.checker.check_health(&cancel).await.unwrap();
        fx.clock.advance(Duration::from_secs(5));
        fx.checker.check_health(&cancel).await.unwrap();
        assert!(fx.stubs.iter().all(|stub| stub.calls() == 1));

        fx.clock.advance(Duration::from_secs(6));
        fx.checker.check_health(&cancel).await.unwrap();
        assert!(fx.stubs.iter().all(|stub| stub.calls() == 2));
    }

    #[tokio::test]
    async fn test_cached_verdict_outlives_a_state_change() {
        let fx = fixture([true; 4], Duration::ZERO, 10);
        let cancel = CancellationToken::new();

        assert!(fx.checker.check_health(&cancel).await.unwrap().is_healthy());
        fx.stubs[2].healthy.store(false, Ordering::SeqCst);
        assert!(fx.checker.check_health(&cancel).await.unwrap().is_healthy());

        fx.clock.advance(Duration::from_secs(10));
        let result = fx.checker.check_health(&cancel).await.unwrap();
        assert_eq!(result.outcome(ProbeIdentity::Database), Some(false));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_on_cold_cache_probe_once() {
        let fx = fixture([true; 4], Duration::from_millis(50), 30);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let checker = fx.checker.clone();
                tokio::spawn(async move { checker.check_health(&CancellationToken::new()).await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_healthy());
        }
        for stub in &fx.stubs {
            assert_eq!(stub.calls(), 1, "{:?} probed more than once", stub.identity);
        }
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_instead_of_unhealthy() {
        let fx = fixture([true; 4], Duration::from_secs(30), 30);
        let cancel = CancellationToken::new();

        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let result = fx.checker.check_health(&cancel).await;
        trigger.await.unwrap();

        assert_eq!(result, Err(HealthError::Cancelled));
        for identity in ProbeIdentity::ALL {
            assert!(fx.checker.cache().entry(identity).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_already_cancelled_token_runs_no_probe() {
        let fx = fixture([true; 4], Duration::ZERO, 30);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(fx.checker.check_health(&cancel).await, Err(HealthError::Cancelled));
        assert!(fx.stubs.iter().all(|stub| stub.calls() == 0));
    }
    #[tokio::test]
    async fn test_unreachable_dependency_is_reported_unhealthy() {
        use crate::configuration::EmptyWindowPolicy;
        use crate::connectors::mock::{Answer, MockConnector};
        use crate::health::probes::{DatabaseProbe, ProducerProbe, StorageProbe, TelemetryScoreProbe};
        use crate::health::HealthScoreSample;

        let blob_store = Arc::new(MockConnector::<bool>::new(Answer::Unreachable));
        let scores = Arc::new(MockConnector::new(Answer::Value(vec![HealthScoreSample {
            time_generated: Utc::now(),
            health_score: 0.9,
        }])));
        let probes = StampProbes {
            storage: Arc::new(StorageProbe::new(
                blob_store.clone(),
                "health".to_string(),
                "stamp.healthy".to_string(),
            )),
            producer: Arc::new(ProducerProbe::new(Arc::new(MockConnector::new(Answer::Value(true))))),
            database: Arc::new(DatabaseProbe::new(Arc::new(MockConnector::new(Answer::Value(true))))),
            telemetry: Arc::new(TelemetryScoreProbe::new(
                scores.clone(),
                "ws-1".to_string(),
                EmptyWindowPolicy::FailClosed,
            )),
        };
        let checker = HealthChecker::new(ResultCache::with_system_clock(30), probes);

        let result = checker.check_health(&CancellationToken::new()).await.unwrap();

        assert!(!result.is_healthy());
        assert_eq!(result.outcome(ProbeIdentity::Storage), Some(false));
        assert_eq!(result.outcome(ProbeIdentity::Producer), Some(true));
        assert_eq!(result.outcome(ProbeIdentity::Database), Some(true));
        assert_eq!(result.outcome(ProbeIdentity::Telemetry), Some(true));
        assert_eq!(blob_store.calls(), 1);
        assert_eq!(scores.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_connector_call_is_not_cached() {
        use crate::connectors::mock::{Answer, MockConnector};
        use crate::health::probes::DatabaseProbe;

        let fx = fixture([true; 4], Duration::ZERO, 30);
        let hanging = Arc::new(MockConnector::<bool>::new(Answer::Hang));
        let checker = HealthChecker::new(
            ResultCache::with_system_clock(30),
            StampProbes {
                storage: fx.stubs[0].clone(),
                producer: fx.stubs[1].clone(),
                database: Arc::new(DatabaseProbe::new(hanging.clone())),
                telemetry: fx.stubs[3].clone(),
            },
        );
        let cancel = CancellationToken::new();
        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        assert_eq!(checker.check_health(&cancel).await, Err(HealthError::Cancelled));
        trigger.await.unwrap();

        assert_eq!(hanging.calls(), 1);
        assert!(checker.cache().entry(ProbeIdentity::Database).await.is_none());
    }
}
