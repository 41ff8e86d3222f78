//! The metric space: every gauge the exporter knows about and its latest values.
//!
//! A [`MetricSpace`] is created once at startup and shared (as
//! [`SharedSpace`]) by the orchestrator, which writes into it, and the HTTP
//! handler, which renders [`Snapshot`]s of it. Each gauge guards its own
//! value table, so writes to different gauges never contend and every
//! [`Gauge::set`] is atomic for its label tuple.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{DefinitionError, LabelError};
use crate::naming::{is_valid_label_name, is_valid_metric_name};

/// A labeled gauge holding the last observed value per label tuple.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    help: String,
    label_names: Vec<String>,
    /// Label values in declaration order -> value.
    values: RwLock<BTreeMap<Vec<String>, f64>>,
}

impl Gauge {
    fn new(name: String, help: String, label_names: Vec<String>) -> Self {
        Self {
            name,
            help,
            label_names,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Set the value for a label tuple, replacing any previous value.
    ///
    /// `labels` must name every declared label exactly once, in any order.
    pub fn set(&self, labels: &[(&str, &str)], value: f64) -> Result<(), LabelError> {
        let key = self.label_key(labels)?;
        self.set_key(key, value);
        Ok(())
    }

    /// Set a value for a key already in declaration order.
    pub(crate) fn set_key(&self, key: Vec<String>, value: f64) {
        self.values.write().insert(key, value);
    }

    /// Current value for a label tuple.
    pub fn get(&self, labels: &[(&str, &str)]) -> Option<f64> {
        let key = self.label_key(labels).ok()?;
        self.values.read().get(&key).copied()
    }

    /// Number of label tuples with a value.
    pub fn series_count(&self) -> usize {
        self.values.read().len()
    }

    /// Order label values by the declared schema.
    pub(crate) fn label_key(&self, labels: &[(&str, &str)]) -> Result<Vec<String>, LabelError> {
        if labels.len() != self.label_names.len() {
            return Err(self.mismatch(labels));
        }

        // Declared names are unique, so equal length plus every declared name
        // present means the two sets are identical.
        let mut key = Vec::with_capacity(self.label_names.len());
        for name in &self.label_names {
            match labels.iter().find(|(k, _)| *k == name.as_str()) {
                Some((_, v)) => key.push((*v).to_string()),
                None => return Err(self.mismatch(labels)),
            }
        }
        Ok(key)
    }

    fn mismatch(&self, labels: &[(&str, &str)]) -> LabelError {
        LabelError {
            metric: self.name.clone(),
            expected: self.label_names.clone(),
            got: labels.iter().map(|(k, _)| (*k).to_string()).collect(),
        }
    }

    fn snapshot(&self) -> FamilySnapshot {
        let samples = self
            .values
            .read()
            .iter()
            .map(|(key, value)| Sample {
                label_values: key.clone(),
                value: *value,
            })
            .collect();

        FamilySnapshot {
            name: self.name.clone(),
            help: self.help.clone(),
            label_names: self.label_names.clone(),
            samples,
        }
    }
}

/// Process-wide registry of gauges, keyed by metric name.
#[derive(Debug, Default)]
pub struct MetricSpace {
    instruments: RwLock<BTreeMap<String, Arc<Gauge>>>,
}

/// Shareable metric space handle.
pub type SharedSpace = Arc<MetricSpace>;

impl MetricSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gauge, or return the one already registered under `name`.
    ///
    /// Registering the same name twice with the same label names (in any
    /// order) returns the same gauge. A different label schema is a
    /// [`DefinitionError::Conflict`].
    pub fn get_or_create(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<Arc<Gauge>, DefinitionError> {
        if !is_valid_metric_name(name) {
            return Err(DefinitionError::InvalidName(name.to_string()));
        }

        for (i, label) in label_names.iter().enumerate() {
            if !is_valid_label_name(label) || label_names[..i].contains(label) {
                return Err(DefinitionError::InvalidLabel {
                    metric: name.to_string(),
                    label: (*label).to_string(),
                });
            }
        }

        let mut instruments = self.instruments.write();

        if let Some(existing) = instruments.get(name) {
            let mut have: Vec<&str> = existing.label_names.iter().map(String::as_str).collect();
            let mut want: Vec<&str> = label_names.to_vec();
            have.sort_unstable();
            want.sort_unstable();

            if have != want {
                return Err(DefinitionError::Conflict {
                    name: name.to_string(),
                    existing: existing.label_names.clone(),
                    requested: label_names.iter().map(|l| (*l).to_string()).collect(),
                });
            }
            return Ok(existing.clone());
        }

        let gauge = Arc::new(Gauge::new(
            name.to_string(),
            help.to_string(),
            label_names.iter().map(|l| (*l).to_string()).collect(),
        ));
        instruments.insert(name.to_string(), gauge.clone());
        debug!(metric = %name, labels = ?label_names, "Registered gauge");

        Ok(gauge)
    }

    /// Look up a registered gauge.
    pub fn instrument(&self, name: &str) -> Option<Arc<Gauge>> {
        self.instruments.read().get(name).cloned()
    }

    /// Current value of one series.
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.instrument(name)?.get(labels)
    }

    /// Number of registered gauges.
    pub fn instrument_count(&self) -> usize {
        self.instruments.read().len()
    }

    /// Total number of series across all gauges.
    pub fn series_count(&self) -> usize {
        self.instruments
            .read()
            .values()
            .map(|g| g.series_count())
            .sum()
    }

    /// Copy out every series, ordered by metric name then label values.
    ///
    /// Each gauge is copied under its own read lock, so a snapshot never
    /// contains a half-applied write.
    pub fn snapshot(&self) -> Snapshot {
        let gauges: Vec<Arc<Gauge>> = self.instruments.read().values().cloned().collect();

        Snapshot {
            families: gauges.iter().map(|g| g.snapshot()).collect(),
        }
    }
}

/// One series value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Values in the family's label order.
    pub label_values: Vec<String>,
    pub value: f64,
}

/// All series of one gauge at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    pub samples: Vec<Sample>,
}

impl FamilySnapshot {
    /// Label pairs for one sample.
    pub fn labels<'a>(&'a self, sample: &'a Sample) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.label_names
            .iter()
            .map(String::as_str)
            .zip(sample.label_values.iter().map(String::as_str))
    }
}

/// A point-in-time copy of the metric space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub families: Vec<FamilySnapshot>,
}

impl Snapshot {
    /// Flatten into `(name, labels, value)` tuples.
    pub fn samples(&self) -> Vec<(String, Vec<(String, String)>, f64)> {
        self.families
            .iter()
            .flat_map(|family| {
                family.samples.iter().map(move |sample| {
                    let labels = family
                        .labels(sample)
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    (family.name.clone(), labels, sample.value)
                })
            })
            .collect()
    }

    /// Value of one series, if present.
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let family = self.families.iter().find(|f| f.name == name)?;
        family
            .samples
            .iter()
            .find(|sample| {
                sample.label_values.len() == labels.len()
                    && family
                        .labels(sample)
                        .all(|(k, v)| labels.iter().any(|(lk, lv)| *lk == k && *lv == v))
            })
            .map(|s| s.value)
    }

    pub fn series_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }
}
