//! Prometheus exporter for PostgreSQL servers.
//!
//! Every request to the metrics endpoint triggers one scrape: the exporter
//! connects to each configured server, runs the collector catalogue, writes
//! the results into a shared metric space, and renders that space in the
//! Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ HTTP Server │────>│ ScrapeOrchestrator│────>│  Connector  │────>│ PostgreSQL  │
//! │ (/metrics)  │     │ (targets × coll.) │     │   (sqlx)    │     │  targets    │
//! └─────────────┘     └──────────────────┘     └─────────────┘     └─────────────┘
//!        │                     │
//!        │                     v
//!        │              ┌─────────────┐
//!        └─────────────>│ MetricSpace │ ──> Renderer
//!                       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! pgsight-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod catalogue;
pub mod config;
pub mod connector;
pub mod error;
pub mod exposition;
pub mod http;
pub mod naming;
pub mod scrape;
pub mod space;

pub use catalogue::{Catalogue, CollectorDefinition, CollectorFilter, SharedCatalogue};
pub use config::ExporterConfig;
pub use connector::{Connection, PgConnector, TargetConnector};
pub use exposition::Renderer;
pub use http::HttpServer;
pub use scrape::{ScrapeOrchestrator, ScrapeStats, ScrapeSummary, SharedOrchestrator};
pub use space::{MetricSpace, SharedSpace};
