//! PostgreSQL connector built on `sqlx`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::Connection as SqlxConnection;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use pgsight_common::{Cell, Row, RowSet, SslMode, Target};

use super::{Connection, TargetConnector};
use crate::error::{ConnectError, QueryError};

/// Opens one `PgConnection` per target per scrape.
#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
    query_timeout: Option<Duration>,
}

impl PgConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            query_timeout: None,
        }
    }

    /// Abort queries that run longer than `timeout`.
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Translate a target into `sqlx` connect options.
pub fn connect_options(target: &Target) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(&target.host)
        .port(target.port)
        .username(&target.user)
        .database(&target.database)
        .application_name(&target.application_name)
        .ssl_mode(ssl_mode(target.ssl_mode));

    if let Some(password) = &target.password {
        options = options.password(password);
    }

    options
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

#[async_trait]
impl TargetConnector for PgConnector {
    async fn open(&self, target: &Target) -> Result<Box<dyn Connection>, ConnectError> {
        let address = target.address();
        let options = connect_options(target);

        debug!(target = %target.identity(), address = %address, "Connecting");

        let conn = match tokio::time::timeout(
            self.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(ConnectError::Failed {
                    address,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    address,
                    timeout_ms: self.connect_timeout.as_millis() as u64,
                });
            }
        };

        Ok(Box::new(PgTargetConnection {
            identity: target.identity().to_string(),
            conn: Mutex::new(Some(conn)),
            query_timeout: self.query_timeout,
        }))
    }
}

/// One wire connection; queries are serialised through the mutex.
struct PgTargetConnection {
    identity: String,
    conn: Mutex<Option<PgConnection>>,
    query_timeout: Option<Duration>,
}

#[async_trait]
impl Connection for PgTargetConnection {
    async fn query(&self, sql: &str) -> Result<RowSet, QueryError> {
        let mut guard = self.conn.lock().await;

        let result = {
            let conn = guard.as_mut().ok_or(QueryError::Closed)?;
            let fetch = sqlx::query(sql).fetch_all(conn);
            match self.query_timeout {
                Some(timeout) => tokio::time::timeout(timeout, fetch)
                    .await
                    .map_err(|_| timeout),
                None => Ok(fetch.await),
            }
        };

        let rows = match result {
            Ok(rows) => rows.map_err(|e| QueryError::Failed(e.to_string()))?,
            Err(timeout) => {
                // The protocol state is unknown after an abandoned query.
                *guard = None;
                return Err(QueryError::Timeout(timeout.as_millis() as u64));
            }
        };
        convert_rows(&rows)
    }

    async fn close(&self) {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn
            && let Err(e) = conn.close().await
        {
            warn!(target = %self.identity, error = %e, "Error closing connection");
        }
    }
}

fn convert_rows(rows: &[PgRow]) -> Result<RowSet, QueryError> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let converted = rows
        .iter()
        .map(convert_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RowSet::new(columns, converted))
}

fn convert_row(row: &PgRow) -> Result<Row, QueryError> {
    (0..row.len())
        .map(|i| decode_cell(row, i))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn decode_cell(row: &PgRow, index: usize) -> Result<Cell, QueryError> {
    let column = &row.columns()[index];
    let failed = |e: sqlx::Error| QueryError::Failed(format!("column '{}': {}", column.name(), e));

    if row.try_get_raw(index).map_err(failed)?.is_null() {
        return Ok(Cell::Null);
    }

    let cell = match column.type_info().name() {
        "BOOL" => Cell::Bool(row.try_get(index).map_err(failed)?),
        "INT2" => Cell::Int(row.try_get::<i16, _>(index).map_err(failed)?.into()),
        "INT4" => Cell::Int(row.try_get::<i32, _>(index).map_err(failed)?.into()),
        "INT8" => Cell::Int(row.try_get(index).map_err(failed)?),
        "OID" => Cell::Int(row.try_get::<Oid, _>(index).map_err(failed)?.0.into()),
        "FLOAT4" => Cell::Float(row.try_get::<f32, _>(index).map_err(failed)?.into()),
        "FLOAT8" => Cell::Float(row.try_get(index).map_err(failed)?),
        "NUMERIC" => Cell::Decimal(row.try_get(index).map_err(failed)?),
        "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => Cell::Text(row.try_get(index).map_err(failed)?),
        other => {
            return Err(QueryError::UnsupportedType {
                column: column.name().to_string(),
                type_name: other.to_string(),
            });
        }
    };

    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_target() {
        let mut target = Target::new("db1.internal").with_name("primary");
        target.port = 6432;
        target.user = "exporter".to_string();
        target.database = "app".to_string();
        target.ssl_mode = SslMode::VerifyFull;

        let options = connect_options(&target);

        assert_eq!(options.get_host(), "db1.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_username(), "exporter");
        assert_eq!(options.get_database(), Some("app"));
        assert_eq!(options.get_application_name(), Some("pgsight"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_ssl_mode_mapping_is_total() {
        assert!(matches!(ssl_mode(SslMode::Disable), PgSslMode::Disable));
        assert!(matches!(ssl_mode(SslMode::Prefer), PgSslMode::Prefer));
        assert!(matches!(ssl_mode(SslMode::VerifyCa), PgSslMode::VerifyCa));
    }

    #[tokio::test]
    async fn test_unreachable_target_times_out_or_fails() {
        // Reserved TEST-NET-1 address; nothing answers there.
        let mut target = Target::new("192.0.2.1");
        target.ssl_mode = SslMode::Disable;
        let connector = PgConnector::new(Duration::from_millis(200));

        let err = match connector.open(&target).await {
            Ok(_) => panic!("connection to a blackhole address succeeded"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            ConnectError::Timeout { .. } | ConnectError::Failed { .. }
        ));
    }
}
