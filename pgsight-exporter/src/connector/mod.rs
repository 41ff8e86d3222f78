//! Connections to scrape targets.
//!
//! The orchestrator only talks to [`TargetConnector`] and [`Connection`], so
//! nothing outside [`postgres`] knows which wire protocol is in use.

pub mod postgres;

use async_trait::async_trait;
use pgsight_common::{RowSet, Target};

use crate::error::{ConnectError, QueryError};

pub use postgres::PgConnector;

/// Opens connections to configured targets.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Open one connection to `target`.
    async fn open(&self, target: &Target) -> Result<Box<dyn Connection>, ConnectError>;
}

/// An open connection to one target.
///
/// Several collectors may hold `&self` at once; implementations decide
/// whether queries run in parallel or one after another.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a query and return its rows as positional typed cells.
    async fn query(&self, sql: &str) -> Result<RowSet, QueryError>;

    /// Close the connection. Idempotent and never fails; errors are only logged.
    async fn close(&self);
}
