//! Collector definitions: which queries run against every target and how
//! their rows become gauge values.
//!
//! The catalogue is assembled once at startup from static [`CollectorSpec`]
//! tables (see [`postgres`]) and never changes afterwards. The orchestrator
//! only sees the reserved [`Availability`] gauge and an ordered list of
//! [`CollectorDefinition`]s.

pub mod postgres;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use pgsight_common::{RowSet, Target};
use tracing::{debug, error};

use crate::config::FilterConfig;
use crate::error::{DefinitionError, MappingError};
use crate::naming::build_metric_name;
use crate::space::{Gauge, MetricSpace};

/// Label carrying the target identity on every series.
pub const HOST_LABEL: &str = "host";

/// Local name of the reserved availability gauge.
pub const AVAILABILITY_METRIC: &str = "up";

/// Turns one query's rows into observations.
///
/// Must be a pure in-memory transform: it may be called concurrently for
/// different targets against the same instruments.
pub type MapFn = fn(&RowSet, &mut Observations<'_>) -> Result<(), MappingError>;

/// Static description of one gauge used by a collector.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentSpec {
    /// Key the mapping function refers to the gauge by.
    pub key: &'static str,
    /// Metric name without the namespace.
    pub name: &'static str,
    pub help: &'static str,
    /// Label names besides `host`.
    pub labels: &'static [&'static str],
}

/// Static description of one collector.
#[derive(Debug, Clone, Copy)]
pub struct CollectorSpec {
    pub name: &'static str,
    pub query: &'static str,
    pub instruments: &'static [InstrumentSpec],
    pub map: MapFn,
}

/// The gauges a collector writes, addressed by key.
#[derive(Debug, Clone, Default)]
pub struct InstrumentSet {
    entries: Vec<(String, Arc<Gauge>)>,
}

impl InstrumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gauge under `key`.
    pub fn with(mut self, key: impl Into<String>, gauge: Arc<Gauge>) -> Self {
        self.entries.push((key.into(), gauge));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Gauge>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, g)| g)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn gauges(&self) -> impl Iterator<Item = &Arc<Gauge>> {
        self.entries.iter().map(|(_, g)| g)
    }
}

/// Observations staged by a mapping function for one target.
///
/// Nothing reaches the metric space until the mapping function has returned
/// `Ok`, so a failure halfway through a result set leaves every gauge of the
/// collector untouched.
pub struct Observations<'a> {
    instruments: &'a InstrumentSet,
    host: &'a str,
    staged: Vec<(Arc<Gauge>, Vec<String>, f64)>,
}

impl<'a> Observations<'a> {
    fn new(instruments: &'a InstrumentSet, host: &'a str) -> Self {
        Self {
            instruments,
            host,
            staged: Vec::new(),
        }
    }

    /// Identity of the target being mapped.
    pub fn host(&self) -> &str {
        self.host
    }

    /// Stage a value for the gauge registered under `key`.
    ///
    /// The `host` label is added automatically; `labels` must supply every
    /// other declared label.
    pub fn record(
        &mut self,
        key: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), MappingError> {
        let gauge = self
            .instruments
            .get(key)
            .ok_or_else(|| MappingError::UnknownInstrument(key.to_string()))?;

        let mut full = Vec::with_capacity(labels.len() + 1);
        full.push((HOST_LABEL, self.host));
        full.extend_from_slice(labels);

        let label_key = gauge.label_key(&full)?;
        self.staged.push((gauge.clone(), label_key, value));
        Ok(())
    }

    /// Number of staged values.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    fn commit(self) -> usize {
        let count = self.staged.len();
        for (gauge, key, value) in self.staged {
            gauge.set_key(key, value);
        }
        count
    }
}

/// One query paired with its gauges and mapping function.
#[derive(Debug, Clone)]
pub struct CollectorDefinition {
    name: String,
    query: String,
    instruments: InstrumentSet,
    map: MapFn,
}

impl CollectorDefinition {
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        instruments: InstrumentSet,
        map: MapFn,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            instruments,
            map,
        }
    }

    /// Register the collector's gauges in `space` and build the definition.
    pub fn from_spec(
        spec: &CollectorSpec,
        space: &MetricSpace,
        namespace: &str,
    ) -> Result<Self, DefinitionError> {
        let mut instruments = InstrumentSet::new();

        for instrument in spec.instruments {
            let mut labels = Vec::with_capacity(instrument.labels.len() + 1);
            labels.push(HOST_LABEL);
            labels.extend_from_slice(instrument.labels);

            let gauge = space.get_or_create(
                &build_metric_name(namespace, instrument.name)?,
                instrument.help,
                &labels,
            )?;
            instruments = instruments.with(instrument.key, gauge);
        }

        Ok(Self::new(spec.name, spec.query, instruments, spec.map))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn instruments(&self) -> &InstrumentSet {
        &self.instruments
    }

    /// Map `rows` for `target` and commit the result.
    ///
    /// Returns the number of values written. On error, including a panic in
    /// the mapping function, nothing is written.
    pub fn apply(&self, rows: &RowSet, target: &Target) -> Result<usize, MappingError> {
        let mut observations = Observations::new(&self.instruments, target.identity());

        let outcome = catch_unwind(AssertUnwindSafe(|| (self.map)(rows, &mut observations)));

        match outcome {
            Ok(Ok(())) => Ok(observations.commit()),
            Ok(Err(e)) => Err(e),
            Err(payload) => Err(MappingError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The reserved `up` gauge, recorded for every target on every scrape.
#[derive(Debug, Clone)]
pub struct Availability {
    gauge: Arc<Gauge>,
}

impl Availability {
    /// Register the availability gauge in `space`.
    pub fn register(space: &MetricSpace, namespace: &str) -> Result<Self, DefinitionError> {
        let gauge = space.get_or_create(
            &build_metric_name(namespace, AVAILABILITY_METRIC)?,
            "Whether the last connection attempt to the target succeeded (1) or failed (0).",
            &[HOST_LABEL],
        )?;
        Ok(Self { gauge })
    }

    pub fn gauge(&self) -> &Arc<Gauge> {
        &self.gauge
    }

    pub fn name(&self) -> &str {
        self.gauge.name()
    }

    /// Record whether `target` could be reached.
    pub fn record(&self, target: &Target, up: bool) {
        let value = if up { 1.0 } else { 0.0 };
        if let Err(e) = self.gauge.set(&[(HOST_LABEL, target.identity())], value) {
            error!(target = %target.identity(), error = %e, "Failed to record availability");
        }
    }
}

/// Glob filter selecting which collectors are built.
pub struct CollectorFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl CollectorFilter {
    /// Create a new filter from configuration.
    ///
    /// Invalid patterns are skipped.
    pub fn new(config: &FilterConfig) -> Self {
        let include = config
            .include_collectors
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        let exclude = config
            .exclude_collectors
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        Self { include, exclude }
    }

    /// Check if a collector should be built.
    pub fn should_include(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(name)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(name))
    }
}

impl Default for CollectorFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// The full, immutable set of collectors run against every target.
#[derive(Debug, Clone)]
pub struct Catalogue {
    availability: Availability,
    collectors: Vec<CollectorDefinition>,
}

/// Shareable catalogue handle.
pub type SharedCatalogue = Arc<Catalogue>;

impl Catalogue {
    /// Assemble a catalogue, rejecting duplicate collector names.
    pub fn new(
        availability: Availability,
        collectors: Vec<CollectorDefinition>,
    ) -> Result<Self, DefinitionError> {
        for (i, collector) in collectors.iter().enumerate() {
            if collectors[..i].iter().any(|c| c.name == collector.name) {
                return Err(DefinitionError::DuplicateCollector(collector.name.clone()));
            }
        }

        Ok(Self {
            availability,
            collectors,
        })
    }

    /// Build the PostgreSQL catalogue.
    pub fn build(
        space: &MetricSpace,
        namespace: &str,
        filter: &CollectorFilter,
    ) -> Result<Self, DefinitionError> {
        Self::from_specs(space, namespace, postgres::COLLECTORS, filter)
    }

    /// Build a catalogue from static collector tables.
    pub fn from_specs(
        space: &MetricSpace,
        namespace: &str,
        specs: &[CollectorSpec],
        filter: &CollectorFilter,
    ) -> Result<Self, DefinitionError> {
        let availability = Availability::register(space, namespace)?;

        let mut collectors = Vec::with_capacity(specs.len());
        for spec in specs {
            if !filter.should_include(spec.name) {
                debug!(collector = spec.name, "Collector disabled by filter");
                continue;
            }
            collectors.push(CollectorDefinition::from_spec(spec, space, namespace)?);
        }

        Self::new(availability, collectors)
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn collectors(&self) -> &[CollectorDefinition] {
        &self.collectors
    }

    pub fn names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
