//! PostgreSQL diagnostic queries.
//!
//! Every query is read-only and works on PostgreSQL 10 and later. Numeric
//! expressions are cast explicitly so each column arrives as a known cell type.

use pgsight_common::RowSet;

use super::{CollectorSpec, InstrumentSpec, Observations};
use crate::error::MappingError;

/// All PostgreSQL collectors, in the order they are listed in `/status`.
pub const COLLECTORS: &[CollectorSpec] = &[
    VERSION,
    UPTIME,
    CONNECTIONS,
    MAX_CONNECTIONS,
    DATABASE_SIZE,
    DATABASE_STATS,
    LOCKS,
    REPLICATION,
    CACHE_HIT_RATIO,
    LONG_RUNNING_TRANSACTIONS,
];

pub const VERSION: CollectorSpec = CollectorSpec {
    name: "version",
    query: "SELECT current_setting('server_version_num')::bigint AS version_num, \
            current_setting('server_version') AS version",
    instruments: &[
        InstrumentSpec {
            key: "num",
            name: "server_version_num",
            help: "Server version as an integer (server_version_num).",
            labels: &[],
        },
        InstrumentSpec {
            key: "info",
            name: "server_info",
            help: "Server version string, always 1.",
            labels: &["version"],
        },
    ],
    map: map_version,
};

fn map_version(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    let row = rows.first()?;
    obs.record("num", &[], row.i64(0)? as f64)?;
    obs.record("info", &[("version", row.text(1)?)], 1.0)
}

pub const UPTIME: CollectorSpec = CollectorSpec {
    name: "uptime",
    query: "SELECT EXTRACT(EPOCH FROM (now() - pg_postmaster_start_time()))::float8 AS uptime, \
            EXTRACT(EPOCH FROM pg_postmaster_start_time())::float8 AS start_time",
    instruments: &[
        InstrumentSpec {
            key: "uptime",
            name: "uptime_seconds",
            help: "Seconds since the postmaster started.",
            labels: &[],
        },
        InstrumentSpec {
            key: "start",
            name: "start_time_seconds",
            help: "Postmaster start time as a Unix timestamp.",
            labels: &[],
        },
    ],
    map: map_uptime,
};

fn map_uptime(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    let row = rows.first()?;
    obs.record("uptime", &[], row.f64(0)?)?;
    obs.record("start", &[], row.f64(1)?)
}

pub const CONNECTIONS: CollectorSpec = CollectorSpec {
    name: "connections",
    query: "SELECT COALESCE(state, 'unknown') AS state, count(*) AS connections \
            FROM pg_stat_activity WHERE backend_type = 'client backend' GROUP BY 1",
    instruments: &[InstrumentSpec {
        key: "connections",
        name: "connections",
        help: "Client connections by state.",
        labels: &["state"],
    }],
    map: map_connections,
};

fn map_connections(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    for row in rows {
        obs.record("connections", &[("state", row.text(0)?)], row.f64(1)?)?;
    }
    Ok(())
}

pub const MAX_CONNECTIONS: CollectorSpec = CollectorSpec {
    name: "max_connections",
    query: "SELECT current_setting('max_connections')::bigint AS max_connections, \
            current_setting('superuser_reserved_connections')::bigint AS reserved",
    instruments: &[
        InstrumentSpec {
            key: "max",
            name: "max_connections",
            help: "Configured max_connections.",
            labels: &[],
        },
        InstrumentSpec {
            key: "reserved",
            name: "superuser_reserved_connections",
            help: "Configured superuser_reserved_connections.",
            labels: &[],
        },
    ],
    map: map_max_connections,
};

fn map_max_connections(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    let row = rows.first()?;
    obs.record("max", &[], row.f64(0)?)?;
    obs.record("reserved", &[], row.f64(1)?)
}

pub const DATABASE_SIZE: CollectorSpec = CollectorSpec {
    name: "database_size",
    query: "SELECT datname, pg_database_size(datname) AS size_bytes \
            FROM pg_database WHERE datallowconn AND NOT datistemplate",
    instruments: &[InstrumentSpec {
        key: "size",
        name: "database_size_bytes",
        help: "Disk space used by each database.",
        labels: &["database"],
    }],
    map: map_database_size,
};

fn map_database_size(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    for row in rows {
        obs.record("size", &[("database", row.text(0)?)], row.f64(1)?)?;
    }
    Ok(())
}

/// `pg_stat_database` columns exported by [`DATABASE_STATS`], in query order
/// after `datname`.
const STAT_DATABASE_COLUMNS: [&str; 10] = [
    "numbackends",
    "xact_commit",
    "xact_rollback",
    "blks_read",
    "blks_hit",
    "tup_inserted",
    "tup_updated",
    "tup_deleted",
    "temp_bytes",
    "deadlocks",
];

pub const DATABASE_STATS: CollectorSpec = CollectorSpec {
    name: "database_stats",
    query: "SELECT datname, numbackends, xact_commit, xact_rollback, blks_read, blks_hit, \
            tup_inserted, tup_updated, tup_deleted, temp_bytes, deadlocks \
            FROM pg_stat_database WHERE datname IS NOT NULL",
    instruments: &[
        InstrumentSpec {
            key: "numbackends",
            name: "stat_database_numbackends",
            help: "Backends currently connected to the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "xact_commit",
            name: "stat_database_xact_commit",
            help: "Transactions committed in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "xact_rollback",
            name: "stat_database_xact_rollback",
            help: "Transactions rolled back in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "blks_read",
            name: "stat_database_blks_read",
            help: "Disk blocks read in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "blks_hit",
            name: "stat_database_blks_hit",
            help: "Buffer cache hits in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "tup_inserted",
            name: "stat_database_tup_inserted",
            help: "Rows inserted in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "tup_updated",
            name: "stat_database_tup_updated",
            help: "Rows updated in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "tup_deleted",
            name: "stat_database_tup_deleted",
            help: "Rows deleted in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "temp_bytes",
            name: "stat_database_temp_bytes",
            help: "Bytes written to temporary files by queries in the database.",
            labels: &["database"],
        },
        InstrumentSpec {
            key: "deadlocks",
            name: "stat_database_deadlocks",
            help: "Deadlocks detected in the database.",
            labels: &["database"],
        },
    ],
    map: map_database_stats,
};

fn map_database_stats(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    for row in rows {
        let database = row.text(0)?;
        for (i, column) in STAT_DATABASE_COLUMNS.iter().enumerate() {
            obs.record(column, &[("database", database)], row.f64(i + 1)?)?;
        }
    }
    Ok(())
}

pub const LOCKS: CollectorSpec = CollectorSpec {
    name: "locks",
    query: "SELECT m.mode, count(l.mode) AS locks FROM (VALUES \
            ('AccessShareLock'), ('RowShareLock'), ('RowExclusiveLock'), \
            ('ShareUpdateExclusiveLock'), ('ShareLock'), ('ShareRowExclusiveLock'), \
            ('ExclusiveLock'), ('AccessExclusiveLock')) AS m(mode) \
            LEFT JOIN pg_locks l ON l.mode = m.mode GROUP BY m.mode",
    instruments: &[InstrumentSpec {
        key: "locks",
        name: "locks",
        help: "Locks held or awaited, by lock mode.",
        labels: &["mode"],
    }],
    map: map_locks,
};

fn map_locks(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    for row in rows {
        obs.record("locks", &[("mode", row.text(0)?)], row.f64(1)?)?;
    }
    Ok(())
}

pub const REPLICATION: CollectorSpec = CollectorSpec {
    name: "replication",
    query: "SELECT pg_is_in_recovery() AS in_recovery, \
            CASE WHEN pg_is_in_recovery() \
                 THEN COALESCE(EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp())), 0) \
                 ELSE 0 END::float8 AS lag_seconds, \
            (SELECT count(*) FROM pg_stat_replication) AS replicas",
    instruments: &[
        InstrumentSpec {
            key: "in_recovery",
            name: "in_recovery",
            help: "Whether the server is a standby in recovery (1) or a primary (0).",
            labels: &[],
        },
        InstrumentSpec {
            key: "lag",
            name: "replication_lag_seconds",
            help: "Seconds since the last replayed transaction on a standby, 0 on a primary.",
            labels: &[],
        },
        InstrumentSpec {
            key: "replicas",
            name: "replication_connected_replicas",
            help: "Standbys currently streaming from this server.",
            labels: &[],
        },
    ],
    map: map_replication,
};

fn map_replication(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    let row = rows.first()?;
    let in_recovery = if row.bool(0)? { 1.0 } else { 0.0 };
    obs.record("in_recovery", &[], in_recovery)?;
    obs.record("lag", &[], row.f64(1)?)?;
    obs.record("replicas", &[], row.f64(2)?)
}

pub const CACHE_HIT_RATIO: CollectorSpec = CollectorSpec {
    name: "cache_hit_ratio",
    query: "SELECT COALESCE(sum(blks_hit) / NULLIF(sum(blks_hit) + sum(blks_read), 0), 0) AS ratio \
            FROM pg_stat_database",
    instruments: &[InstrumentSpec {
        key: "ratio",
        name: "cache_hit_ratio",
        help: "Buffer cache hit ratio across all databases.",
        labels: &[],
    }],
    map: map_cache_hit_ratio,
};

fn map_cache_hit_ratio(rows: &RowSet, obs: &mut Observations<'_>) -> Result<(), MappingError> {
    let ratio = rows.first()?.f64(0)?;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(MappingError::unexpected(format!(
            "cache hit ratio {} outside [0, 1]",
            ratio
        )));
    }
    obs.record("ratio", &[], ratio)
}

pub const LONG_RUNNING_TRANSACTIONS: CollectorSpec = CollectorSpec {
    name: "long_running_transactions",
    query: "SELECT count(*) AS transactions, \
            COALESCE(max(EXTRACT(EPOCH FROM (now() - xact_start))), 0)::float8 AS max_age \
            FROM pg_stat_activity \
            WHERE state <> 'idle' AND xact_start IS NOT NULL \
            AND now() - xact_start > interval '1 minute'",
    instruments: &[
        InstrumentSpec {
            key: "count",
            name: "long_running_transactions",
            help: "Transactions open for more than one minute.",
            labels: &[],
        },
        InstrumentSpec {
            key: "max_age",
            name: "long_running_transactions_max_age_seconds",
            help: "Age of the oldest transaction open for more than one minute.",
            labels: &[],
        },
    ],
    map: map_long_running_transactions,
};

fn map_long_running_transactions(
    rows: &RowSet,
    obs: &mut Observations<'_>,
) -> Result<(), MappingError> {
    let row = rows.first()?;
    obs.record("count", &[], row.f64(0)?)?;
    obs.record("max_age", &[], row.f64(1)?)
}
