//! The scrape orchestrator.
//!
//! One [`ScrapeOrchestrator::run`] call is one scrape: every target is
//! handled by its own task, and inside a reachable target every collector
//! runs as an independent future on the shared connection. No failure in a
//! target or collector stops the others. The call returns once every branch
//! has settled and the metric space holds the new values.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use pgsight_common::Target;

use crate::catalogue::{CollectorDefinition, SharedCatalogue};
use crate::connector::{Connection, TargetConnector};
use crate::space::SharedSpace;

/// What happened to one collector on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorStatus {
    /// Rows were mapped and this many values were written.
    Recorded(usize),
    /// The query returned no rows.
    Empty,
    QueryFailed,
    MappingFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorOutcome {
    pub collector: String,
    pub status: CollectorStatus,
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub target: String,
    pub up: bool,
    /// Empty when the target was unreachable.
    pub collectors: Vec<CollectorOutcome>,
}

impl TargetOutcome {
    fn down(target: &Target) -> Self {
        Self {
            target: target.identity().to_string(),
            up: false,
            collectors: Vec::new(),
        }
    }

    fn count(&self, matches: impl Fn(&CollectorStatus) -> bool) -> usize {
        self.collectors.iter().filter(|c| matches(&c.status)).count()
    }
}

/// Result of one scrape, in configured target order.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub targets: Vec<TargetOutcome>,
    #[serde(skip)]
    pub duration: Duration,
}

impl ScrapeSummary {
    pub fn target(&self, identity: &str) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.target == identity)
    }

    pub fn targets_up(&self) -> usize {
        self.targets.iter().filter(|t| t.up).count()
    }

    pub fn targets_down(&self) -> usize {
        self.targets.len() - self.targets_up()
    }

    pub fn recorded(&self) -> usize {
        self.sum(|s| matches!(s, CollectorStatus::Recorded(_)))
    }

    pub fn empty(&self) -> usize {
        self.sum(|s| *s == CollectorStatus::Empty)
    }

    pub fn query_failures(&self) -> usize {
        self.sum(|s| *s == CollectorStatus::QueryFailed)
    }

    pub fn mapping_failures(&self) -> usize {
        self.sum(|s| *s == CollectorStatus::MappingFailed)
    }

    fn sum(&self, matches: impl Fn(&CollectorStatus) -> bool + Copy) -> usize {
        self.targets.iter().map(|t| t.count(matches)).sum()
    }
}

/// Running totals across all scrapes since startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeStats {
    pub scrapes: u64,
    /// Scrapes the HTTP handler stopped waiting for.
    pub scrapes_timed_out: u64,
    pub target_connect_failures: u64,
    pub query_failures: u64,
    pub mapping_failures: u64,
    pub empty_results: u64,
    pub last_scrape_duration_secs: f64,
    pub last_targets_up: usize,
    pub last_targets_down: usize,
}

impl ScrapeStats {
    fn record(&mut self, summary: &ScrapeSummary) {
        self.scrapes += 1;
        self.target_connect_failures += summary.targets_down() as u64;
        self.query_failures += summary.query_failures() as u64;
        self.mapping_failures += summary.mapping_failures() as u64;
        self.empty_results += summary.empty() as u64;
        self.last_scrape_duration_secs = summary.duration.as_secs_f64();
        self.last_targets_up = summary.targets_up();
        self.last_targets_down = summary.targets_down();
    }
}

/// Runs scrapes of every configured target against the catalogue.
pub struct ScrapeOrchestrator {
    targets: Vec<Arc<Target>>,
    catalogue: SharedCatalogue,
    connector: Arc<dyn TargetConnector>,
    space: SharedSpace,
    stats: RwLock<ScrapeStats>,
}

/// Shareable orchestrator handle.
pub type SharedOrchestrator = Arc<ScrapeOrchestrator>;

impl ScrapeOrchestrator {
    pub fn new(
        targets: Vec<Target>,
        catalogue: SharedCatalogue,
        connector: Arc<dyn TargetConnector>,
        space: SharedSpace,
    ) -> Self {
        Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            catalogue,
            connector,
            space,
            stats: RwLock::new(ScrapeStats::default()),
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().map(|t| t.as_ref())
    }

    pub fn catalogue(&self) -> &SharedCatalogue {
        &self.catalogue
    }

    pub fn space(&self) -> &SharedSpace {
        &self.space
    }

    pub fn stats(&self) -> ScrapeStats {
        self.stats.read().clone()
    }

    /// Count a scrape whose caller gave up waiting for it.
    pub fn record_deadline_exceeded(&self) {
        self.stats.write().scrapes_timed_out += 1;
    }

    /// Run one scrape of every target.
    ///
    /// Never fails: unreachable targets get `up = 0`, and failed collectors
    /// leave their gauges untouched.
    pub async fn run(&self) -> ScrapeSummary {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for target in &self.targets {
            tasks.spawn(scrape_target(
                target.clone(),
                self.catalogue.clone(),
                self.connector.clone(),
            ));
        }

        let mut settled = Vec::with_capacity(self.targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => settled.push(outcome),
                Err(e) => error!(error = %e, "Target task failed"),
            }
        }

        // Report in configured order; a target whose task died counts as down.
        let targets = self
            .targets
            .iter()
            .map(|target| {
                match settled.iter().position(|o| o.target == target.identity()) {
                    Some(i) => settled.swap_remove(i),
                    None => {
                        self.catalogue.availability().record(target, false);
                        TargetOutcome::down(target)
                    }
                }
            })
            .collect();

        let summary = ScrapeSummary {
            targets,
            duration: started.elapsed(),
        };

        self.stats.write().record(&summary);

        info!(
            targets_up = summary.targets_up(),
            targets_down = summary.targets_down(),
            recorded = summary.recorded(),
            empty = summary.empty(),
            query_failures = summary.query_failures(),
            mapping_failures = summary.mapping_failures(),
            duration_ms = summary.duration.as_millis() as u64,
            "Scrape complete"
        );

        summary
    }
}

async fn scrape_target(
    target: Arc<Target>,
    catalogue: SharedCatalogue,
    connector: Arc<dyn TargetConnector>,
) -> TargetOutcome {
    let connection = match connector.open(&target).await {
        Ok(connection) => connection,
        Err(e) => {
            catalogue.availability().record(&target, false);
            warn!(target = %target.identity(), error = %e, "Target unreachable");
            return TargetOutcome::down(&target);
        }
    };

    catalogue.availability().record(&target, true);

    let runs = catalogue
        .collectors()
        .iter()
        .map(|collector| run_collector(connection.as_ref(), collector, &target));
    let collectors = join_all(runs).await;

    connection.close().await;

    TargetOutcome {
        target: target.identity().to_string(),
        up: true,
        collectors,
    }
}

async fn run_collector(
    connection: &dyn Connection,
    collector: &CollectorDefinition,
    target: &Target,
) -> CollectorOutcome {
    let status = match connection.query(collector.query()).await {
        Err(e) => {
            warn!(
                target = %target.identity(),
                collector = %collector.name(),
                error = %e,
                "Query failed"
            );
            CollectorStatus::QueryFailed
        }
        Ok(rows) if rows.is_empty() => {
            debug!(
                target = %target.identity(),
                collector = %collector.name(),
                "No data"
            );
            CollectorStatus::Empty
        }
        Ok(rows) => match collector.apply(&rows, target) {
            Ok(written) => {
                trace!(
                    target = %target.identity(),
                    collector = %collector.name(),
                    rows = rows.len(),
                    written,
                    "Collector recorded"
                );
                CollectorStatus::Recorded(written)
            }
            Err(e) => {
                warn!(
                    target = %target.identity(),
                    collector = %collector.name(),
                    error = %e,
                    "Mapping failed"
                );
                CollectorStatus::MappingFailed
            }
        },
    };

    CollectorOutcome {
        collector: collector.name().to_string(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{Catalogue, CollectorFilter, CollectorSpec, InstrumentSpec, Observations};
    use crate::error::{ConnectError, MappingError, QueryError};
    use crate::space::MetricSpace;
    use async_trait::async_trait;
    use pgsight_common::{RowSet, row};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn map_value(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
        obs.record("value", &[], rows.first()?.f64(0)?)
    }

    const SPECS: &[CollectorSpec] = &[
        CollectorSpec {
            name: "ok",
            query: "ok",
            instruments: &[InstrumentSpec {
                key: "value",
                name: "ok",
                help: "",
                labels: &[],
            }],
            map: map_value,
        },
        CollectorSpec {
            name: "empty",
            query: "empty",
            instruments: &[InstrumentSpec {
                key: "value",
                name: "empty",
                help: "",
                labels: &[],
            }],
            map: map_value,
        },
        CollectorSpec {
            name: "broken",
            query: "broken",
            instruments: &[InstrumentSpec {
                key: "value",
                name: "broken",
                help: "",
                labels: &[],
            }],
            map: map_value,
        },
        CollectorSpec {
            name: "garbage",
            query: "garbage",
            instruments: &[InstrumentSpec {
                key: "value",
                name: "garbage",
                help: "",
                labels: &[],
            }],
            map: map_value,
        },
    ];

    struct StubConnection {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for StubConnection {
        async fn query(&self, sql: &str) -> Result<RowSet, QueryError> {
            match sql {
                "ok" => Ok(RowSet::from_rows(vec![row![7i64]])),
                "empty" => Ok(RowSet::empty()),
                "garbage" => Ok(RowSet::from_rows(vec![row!["seven"]])),
                _ => Err(QueryError::Failed("relation does not exist".to_string())),
            }
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Reaches every host except "down", and panics on "boom".
    struct StubConnector {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TargetConnector for StubConnector {
        async fn open(&self, target: &Target) -> Result<Box<dyn Connection>, ConnectError> {
            match target.host.as_str() {
                "down" => Err(ConnectError::Failed {
                    address: target.address(),
                    message: "connection refused".to_string(),
                }),
                "boom" => panic!("connector bug"),
                _ => Ok(Box::new(StubConnection {
                    closes: self.closes.clone(),
                })),
            }
        }
    }

    fn orchestrator(hosts: &[&str]) -> (ScrapeOrchestrator, Arc<AtomicUsize>) {
        let space = Arc::new(MetricSpace::new());
        let catalogue =
            Catalogue::from_specs(&space, "", SPECS, &CollectorFilter::default()).unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        let connector = StubConnector {
            closes: closes.clone(),
        };

        let orchestrator = ScrapeOrchestrator::new(
            hosts.iter().map(|h| Target::new(*h)).collect(),
            Arc::new(catalogue),
            Arc::new(connector),
            space,
        );
        (orchestrator, closes)
    }

    #[tokio::test]
    async fn test_collector_outcomes_are_isolated() {
        let (orchestrator, closes) = orchestrator(&["a"]);

        let summary = orchestrator.run().await;
        let a = summary.target("a").unwrap();

        assert!(a.up);
        let statuses: Vec<_> = a.collectors.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                CollectorStatus::Recorded(1),
                CollectorStatus::Empty,
                CollectorStatus::QueryFailed,
                CollectorStatus::MappingFailed,
            ]
        );
        assert_eq!(orchestrator.space().get("ok", &[("host", "a")]), Some(7.0));
        assert_eq!(orchestrator.space().get("up", &[("host", "a")]), Some(1.0));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_and_panicking_targets_are_down() {
        let (orchestrator, closes) = orchestrator(&["a", "down", "boom"]);

        let summary = orchestrator.run().await;

        let hosts: Vec<&str> = summary.targets.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(hosts, vec!["a", "down", "boom"]);
        assert_eq!(summary.targets_up(), 1);
        assert_eq!(summary.targets_down(), 2);

        let space = orchestrator.space();
        assert_eq!(space.get("up", &[("host", "down")]), Some(0.0));
        assert_eq!(space.get("up", &[("host", "boom")]), Some(0.0));
        assert_eq!(space.get("ok", &[("host", "down")]), None);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let (orchestrator, _) = orchestrator(&["a", "down"]);

        orchestrator.run().await;
        orchestrator.run().await;
        orchestrator.record_deadline_exceeded();

        let stats = orchestrator.stats();
        assert_eq!(stats.scrapes, 2);
        assert_eq!(stats.scrapes_timed_out, 1);
        assert_eq!(stats.target_connect_failures, 2);
        assert_eq!(stats.query_failures, 2);
        assert_eq!(stats.mapping_failures, 2);
        assert_eq!(stats.empty_results, 2);
        assert_eq!(stats.last_targets_up, 1);
        assert_eq!(stats.last_targets_down, 1);
    }
}
