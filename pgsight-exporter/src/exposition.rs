//! Prometheus text exposition.

use std::collections::HashMap;
use std::fmt::Write;

use crate::naming::{escape_help, escape_label_value, format_value, qualify};
use crate::scrape::ScrapeStats;
use crate::space::{FamilySnapshot, Snapshot};

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serializes metric space snapshots.
#[derive(Debug, Clone)]
pub struct Renderer {
    namespace: String,
    /// Sorted by label name.
    default_labels: Vec<(String, String)>,
}

impl Renderer {
    pub fn new(namespace: impl Into<String>, default_labels: &HashMap<String, String>) -> Self {
        let mut default_labels: Vec<(String, String)> = default_labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        default_labels.sort();

        Self {
            namespace: namespace.into(),
            default_labels,
        }
    }

    /// Render the snapshot followed by the exporter's own statistics.
    pub fn render(&self, snapshot: &Snapshot, stats: &ScrapeStats) -> String {
        let mut output = self.render_snapshot(snapshot);
        self.render_stats(&mut output, snapshot, stats);
        output
    }

    /// Render only the snapshot. Equal snapshots render to equal bytes.
    pub fn render_snapshot(&self, snapshot: &Snapshot) -> String {
        let mut output = String::with_capacity(snapshot.series_count() * 80);

        for family in &snapshot.families {
            // A gauge nobody has written to yet has nothing to say
            if family.samples.is_empty() {
                continue;
            }

            if !family.help.is_empty() {
                writeln!(output, "# HELP {} {}", family.name, escape_help(&family.help)).ok();
            }
            writeln!(output, "# TYPE {} gauge", family.name).ok();

            for sample in &family.samples {
                let labels = self.sample_labels(family, family.labels(sample));
                writeln!(
                    output,
                    "{}{} {}",
                    family.name,
                    format_labels(&labels),
                    format_value(sample.value)
                )
                .ok();
            }
        }

        output
    }

    /// Own labels plus every default label the family doesn't declare,
    /// sorted by name.
    fn sample_labels<'a>(
        &'a self,
        family: &FamilySnapshot,
        own: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Vec<(&'a str, &'a str)> {
        let mut labels: Vec<(&str, &str)> = own.collect();
        for (name, value) in &self.default_labels {
            if !family.label_names.iter().any(|l| l == name) {
                labels.push((name.as_str(), value.as_str()));
            }
        }
        labels.sort_by(|a, b| a.0.cmp(b.0));
        labels
    }

    fn render_stats(&self, output: &mut String, snapshot: &Snapshot, stats: &ScrapeStats) {
        let series: [(&str, &str, &str, String); 10] = [
            (
                "exporter_scrapes_total",
                "counter",
                "Scrapes run since startup.",
                stats.scrapes.to_string(),
            ),
            (
                "exporter_scrape_timeouts_total",
                "counter",
                "Scrapes that outlived the request deadline.",
                stats.scrapes_timed_out.to_string(),
            ),
            (
                "exporter_target_connect_failures_total",
                "counter",
                "Failed connection attempts to targets.",
                stats.target_connect_failures.to_string(),
            ),
            (
                "exporter_query_failures_total",
                "counter",
                "Collector queries that failed.",
                stats.query_failures.to_string(),
            ),
            (
                "exporter_mapping_failures_total",
                "counter",
                "Collector results that could not be mapped.",
                stats.mapping_failures.to_string(),
            ),
            (
                "exporter_empty_results_total",
                "counter",
                "Collector queries that returned no rows.",
                stats.empty_results.to_string(),
            ),
            (
                "exporter_last_scrape_duration_seconds",
                "gauge",
                "Duration of the last completed scrape.",
                format_value(stats.last_scrape_duration_secs),
            ),
            (
                "exporter_last_targets_up",
                "gauge",
                "Targets reachable during the last completed scrape.",
                stats.last_targets_up.to_string(),
            ),
            (
                "exporter_last_targets_down",
                "gauge",
                "Targets unreachable during the last completed scrape.",
                stats.last_targets_down.to_string(),
            ),
            (
                "exporter_series",
                "gauge",
                "Series held in the metric space.",
                snapshot.series_count().to_string(),
            ),
        ];

        if !output.is_empty() {
            writeln!(output).ok();
        }
        for (name, kind, help, value) in series {
            let name = qualify(&self.namespace, name);
            writeln!(output, "# HELP {} {}", name, help).ok();
            writeln!(output, "# TYPE {} {}", name, kind).ok();
            writeln!(output, "{} {}", name, value).ok();
        }
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
