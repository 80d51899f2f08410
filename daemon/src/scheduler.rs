//! Probe scheduling
//!
//! Drives probe cycles on a fixed interval. Each cycle resets the error
//! counters, probes every profile in configured order with a pause between
//! consecutive profiles, folds the outcomes into the aggregator and hands a
//! snapshot to the publisher.
//!
//! Profiles are probed strictly one after another, so at most one backend
//! call from this process is in flight at any time.

use crate::{
    collector::LatencyAggregator,
    config::Profile,
    executor::ProbeExecutor,
    exporter::MetricsPublisher,
    types::{BucketKey, MetricsSnapshot, ProfileReport, ScrapeStats},
};
use chrono::Utc;
use log::{debug, error, info};
use std::{sync::Arc, time::Duration};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed, loop not started
    Idle,
    /// Waiting for the next tick
    Waiting,
    /// Zeroing error counters
    ResettingCounters,
    /// Probing the profile at this index
    ProbingProfile(usize),
    /// Handing the snapshot to the publisher
    Publishing,
}

/// Timing settings of the loop
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Interval between cycle starts
    pub interval: Duration,
    /// Pause between two consecutive profiles
    pub delay: Duration,
}

/// Summary of one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Per-profile reports, in probe order
    pub reports: Vec<ProfileReport>,
    /// Sum of per-profile probe times, in seconds (delays excluded)
    pub total_duration: f64,
    /// Snapshot handed to the publisher
    pub snapshot: MetricsSnapshot,
    /// Whether the publisher accepted the snapshot
    pub published: bool,
}

/// Tick-driven probe loop
pub struct ProbeScheduler {
    settings: SchedulerSettings,
    profiles: Vec<Profile>,
    executor: ProbeExecutor,
    aggregator: LatencyAggregator,
    publisher: Arc<dyn MetricsPublisher>,
    scrape: ScrapeStats,
    state: SchedulerState,
}

impl ProbeScheduler {
    /// Create a new scheduler
    ///
    /// # Arguments
    ///
    /// * `settings` - Interval and inter-profile delay
    /// * `profiles` - Probe targets, probed in this order
    /// * `executor` - Runs a single profile probe
    /// * `aggregator` - Latency and error tables, owned by the scheduler
    /// * `publisher` - Receives a snapshot after every cycle
    pub fn new(
        settings: SchedulerSettings,
        profiles: Vec<Profile>,
        executor: ProbeExecutor,
        aggregator: LatencyAggregator,
        publisher: Arc<dyn MetricsPublisher>,
    ) -> Self {
        Self {
            settings,
            profiles,
            executor,
            aggregator,
            publisher,
            scrape: ScrapeStats::default(),
            state: SchedulerState::Idle,
        }
    }

    /// Run cycles forever
    ///
    /// The first cycle starts one interval after the call. A cycle that
    /// overruns the interval delays the following ticks instead of bursting.
    pub async fn run(&mut self) {
        info!(
            "Probing {} profile(s) every {:?} (delay {:?})",
            self.profiles.len(),
            self.settings.interval,
            self.settings.delay
        );

        let mut ticker = interval_at(Instant::now() + self.settings.interval, self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.transition(SchedulerState::Waiting);
            ticker.tick().await;
            debug!("Tick");
            self.run_cycle().await;
        }
    }

    /// Run a single cycle
    ///
    /// Probe and publish failures are counted and logged; they never
    /// abort the cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.scrape.total_scrapes += 1;
        self.scrape.last_scrape_time = Some(Utc::now());

        self.transition(SchedulerState::ResettingCounters);
        self.aggregator.reset_errors();

        let mut reports = Vec::with_capacity(self.profiles.len());
        let mut total_duration = 0.0;

        for index in 0..self.profiles.len() {
            if index > 0 && !self.settings.delay.is_zero() {
                sleep(self.settings.delay).await;
            }

            self.transition(SchedulerState::ProbingProfile(index));
            let report = self.executor.run_profile(&self.profiles[index]).await;
            self.absorb(&report);

            total_duration += report.elapsed;
            reports.push(report);
        }

        self.scrape.last_scrape_duration_seconds = total_duration;
        self.aggregator.observe(&BucketKey::total(), total_duration);

        for key in self.aggregator.keys() {
            if let Some(buckets) = self.aggregator.histogram(key) {
                debug!("Counters {}: {:?}", key, buckets.counts);
            }
        }

        self.transition(SchedulerState::Publishing);
        let snapshot = self.aggregator.snapshot(self.scrape.clone());
        let published = match self.publisher.publish(&snapshot).await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not push metrics: {}", e);
                false
            }
        };

        self.transition(SchedulerState::Waiting);

        CycleReport {
            reports,
            total_duration,
            snapshot,
            published,
        }
    }

    /// Fold one profile's outcomes into the aggregator
    fn absorb(&mut self, report: &ProfileReport) {
        for outcome in &report.outcomes {
            let key = outcome.key();
            self.aggregator.observe(&key, outcome.duration);
            if !outcome.success {
                self.aggregator.record_error(&key);
            }
        }
        if report.has_failure() {
            self.aggregator.record_error(&BucketKey::total());
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            debug!("Scheduler {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Scrape bookkeeping
    pub fn scrape(&self) -> &ScrapeStats {
        &self.scrape
    }

    /// Aggregated tables
    pub fn aggregator(&self) -> &LatencyAggregator {
        &self.aggregator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exporter::testing::RecordingPublisher,
        session::testing::{Script, ScriptedFactory},
        types::{BucketKind, CountingRule},
    };
    use reliability_common::DEFAULT_LATENCY_THRESHOLDS;

    fn profile(name: &str, revoke: bool) -> Profile {
        Profile {
            name: name.to_string(),
            auth_token: "t".to_string(),
            secret_path: format!("secret/{}", name),
            revoke_token: revoke,
            ..Profile::default()
        }
    }

    fn scheduler(
        profiles: Vec<Profile>,
        factory: &ScriptedFactory,
        publisher: &RecordingPublisher,
        delay: Duration,
    ) -> ProbeScheduler {
        let aggregator = LatencyAggregator::for_profiles(
            &DEFAULT_LATENCY_THRESHOLDS,
            CountingRule::AtLeast,
            profiles.iter().map(|p| p.name.as_str()),
            profiles.iter().any(|p| p.revoke_token),
        )
        .unwrap();
        ProbeScheduler::new(
            SchedulerSettings {
                interval: Duration::from_secs(10),
                delay,
            },
            profiles,
            ProbeExecutor::new(Arc::new(factory.clone())),
            aggregator,
            Arc::new(publisher.clone()),
        )
    }

    fn count(report: &CycleReport, bucket: BucketKind, success: bool) -> usize {
        report
            .reports
            .iter()
            .flat_map(|r| r.outcomes_for(bucket))
            .filter(|o| o.success == success)
            .count()
    }

    fn key(kind: BucketKind, profile: &str) -> BucketKey {
        BucketKey::new(kind, profile)
    }

    #[tokio::test]
    async fn test_failing_revoke_scenario() {
        let mut script = Script::default();
        script.fail_revoke.insert("b".to_string());
        let factory = ScriptedFactory::new(script);
        let publisher = RecordingPublisher::default();
        let mut scheduler = scheduler(
            vec![profile("a", false), profile("b", true)],
            &factory,
            &publisher,
            Duration::ZERO,
        );

        let report = scheduler.run_cycle().await;

        assert_eq!(count(&report, BucketKind::Auth, true), 2);
        assert_eq!(count(&report, BucketKind::Write, true), 2);
        assert_eq!(count(&report, BucketKind::Read, true), 2);
        assert_eq!(count(&report, BucketKind::Revoke, false), 1);
        assert_eq!(count(&report, BucketKind::Revoke, true), 0);

        let snapshot = &report.snapshot;
        assert_eq!(snapshot.error_count(&BucketKey::total()), Some(1));
        assert_eq!(snapshot.error_count(&key(BucketKind::Revoke, "b")), Some(1));
        assert_eq!(snapshot.error_count(&key(BucketKind::Revoke, "a")), Some(0));
        assert_eq!(snapshot.error_count(&key(BucketKind::Auth, "a")), Some(0));
        assert!(report.published);
        assert_eq!(publisher.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_total_error_counted_once_per_failing_profile() {
        let mut script = Script::default();
        script.fail_read.insert("a".to_string());
        script.fail_revoke.insert("a".to_string());
        script.fail_auth.insert("b".to_string());
        let factory = ScriptedFactory::new(script);
        let publisher = RecordingPublisher::default();
        let mut scheduler = scheduler(
            vec![profile("a", true), profile("b", true), profile("c", true)],
            &factory,
            &publisher,
            Duration::ZERO,
        );

        let snapshot = scheduler.run_cycle().await.snapshot;

        assert_eq!(snapshot.error_count(&BucketKey::total()), Some(2));
        assert_eq!(snapshot.error_count(&key(BucketKind::Read, "a")), Some(1));
        assert_eq!(snapshot.error_count(&key(BucketKind::Revoke, "a")), Some(1));
        assert_eq!(snapshot.error_count(&key(BucketKind::Auth, "b")), Some(1));
        assert_eq!(snapshot.error_count(&key(BucketKind::Auth, "c")), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_counters_reset_every_cycle() {
        let mut script = Script {
            latency: Duration::from_millis(10),
            ..Script::default()
        };
        script.fail_auth.insert("a".to_string());
        let factory = ScriptedFactory::new(script);
        let publisher = RecordingPublisher::default();
        let mut scheduler = scheduler(
            vec![profile("a", false), profile("b", false)],
            &factory,
            &publisher,
            Duration::ZERO,
        );

        let first = scheduler.run_cycle().await.snapshot;
        assert_eq!(first.error_count(&key(BucketKind::Auth, "a")), Some(1));
        assert_eq!(first.error_count(&BucketKey::total()), Some(1));

        factory.update(|s| s.fail_auth.clear());
        let second = scheduler.run_cycle().await.snapshot;

        assert!(second.errors.iter().all(|e| e.count == 0), "{:?}", second.errors);
        // Histograms keep accumulating across cycles, failed steps included.
        let auth_a = second.histogram(&key(BucketKind::Auth, "a")).unwrap();
        assert_eq!(auth_a.count_at(0.01), Some(2));
        assert_eq!(auth_a.count_at(0.025), Some(0));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_cycles() {
        let mut script = Script::default();
        script.fail_write.insert("a".to_string());
        let factory = ScriptedFactory::new(script);
        let publisher = RecordingPublisher::failing();
        let mut scheduler = scheduler(vec![profile("a", false)], &factory, &publisher, Duration::ZERO);

        let first = scheduler.run_cycle().await;
        assert!(!first.published);
        assert_eq!(scheduler.state(), SchedulerState::Waiting);

        factory.update(|s| s.fail_write.clear());
        let second = scheduler.run_cycle().await;

        assert!(!second.published);
        assert_eq!(second.snapshot.error_count(&key(BucketKind::Write, "a")), Some(0));
        assert_eq!(publisher.snapshots().len(), 2);
        assert_eq!(scheduler.scrape().total_scrapes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profiles_probed_in_order_with_delay_between() {
        let factory = ScriptedFactory::new(Script {
            latency: Duration::from_millis(100),
            ..Script::default()
        });
        let publisher = RecordingPublisher::default();
        let mut scheduler = scheduler(
            vec![profile("c", false), profile("a", false), profile("b", false)],
            &factory,
            &publisher,
            Duration::from_secs(1),
        );

        let started = Instant::now();
        let report = scheduler.run_cycle().await;
        let wall = started.elapsed();

        let auth_order: Vec<String> = factory
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("auth"))
            .collect();
        assert_eq!(auth_order, vec!["auth c", "auth a", "auth b"]);

        // 3 steps of 100ms per profile, 2 delays between 3 profiles.
        assert!((report.total_duration - 0.9).abs() < 1e-3, "{}", report.total_duration);
        assert!(wall >= Duration::from_millis(2_900), "{:?}", wall);
        assert!(wall < Duration::from_millis(2_950), "{:?}", wall);
        assert!((scheduler.scrape().last_scrape_duration_seconds - 0.9).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_duration_observed() {
        let factory = ScriptedFactory::new(Script {
            latency: Duration::from_millis(100),
            ..Script::default()
        });
        let publisher = RecordingPublisher::default();
        let mut scheduler = scheduler(
            vec![profile("a", false), profile("b", false)],
            &factory,
            &publisher,
            Duration::ZERO,
        );

        scheduler.run_cycle().await;

        // Two profiles of 300ms each: 0.6s counts for every threshold <= 0.6.
        let total = scheduler.aggregator().histogram(&BucketKey::total()).unwrap();
        assert_eq!(total.count_at(0.5), Some(1));
        assert_eq!(total.count_at(1.0), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval() {
        let factory = ScriptedFactory::new(Script::default());
        let publisher = RecordingPublisher::default();
        let mut scheduler = scheduler(vec![profile("a", false)], &factory, &publisher, Duration::ZERO);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        // Ticks at 10s, 20s and 30s.
        let stopped = tokio::time::timeout(Duration::from_secs(35), scheduler.run()).await;

        assert!(stopped.is_err());
        assert_eq!(scheduler.scrape().total_scrapes, 3);
        assert_eq!(publisher.snapshots().len(), 3);
        assert_eq!(scheduler.state(), SchedulerState::Waiting);
        let totals: Vec<u64> = publisher
            .snapshots()
            .iter()
            .map(|s| s.scrape.total_scrapes)
            .collect();
        assert_eq!(totals, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_publish_failures() {
        let mut script = Script {
            latency: Duration::from_millis(10),
            ..Script::default()
        };
        script.fail_auth.insert("a".to_string());
        let factory = ScriptedFactory::new(script);
        let publisher = RecordingPublisher::failing();
        let mut scheduler = scheduler(
            vec![profile("a", false), profile("b", false)],
            &factory,
            &publisher,
            Duration::ZERO,
        );

        let stopped = tokio::time::timeout(Duration::from_secs(35), scheduler.run()).await;

        assert!(stopped.is_err());
        let snapshots = publisher.snapshots();
        assert_eq!(snapshots.len(), 3);
        for snapshot in &snapshots {
            // Counted afresh each cycle, never carried over from a failed publish.
            assert_eq!(snapshot.error_count(&key(BucketKind::Auth, "a")), Some(1));
            assert_eq!(snapshot.error_count(&BucketKey::total()), Some(1));
            assert_eq!(snapshot.error_count(&key(BucketKind::Auth, "b")), Some(0));
        }
        let auth_a = scheduler
            .aggregator()
            .histogram(&key(BucketKind::Auth, "a"))
            .unwrap();
        assert_eq!(auth_a.count_at(0.01), Some(3));
        assert_eq!(auth_a.count_at(0.025), Some(0));
        assert_eq!(scheduler.scrape().total_scrapes, 3);
        assert_eq!(scheduler.state(), SchedulerState::Waiting);
    }
}
