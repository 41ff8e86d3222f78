//! Scripted in-memory targets for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pgsight_common::{RowSet, Target};
use pgsight_exporter::MetricSpace;
use pgsight_exporter::connector::{Connection, TargetConnector};
use pgsight_exporter::error::{ConnectError, QueryError};

/// What a query returns.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows(RowSet),
    Fail(String),
}

/// Scripted behaviour of one host.
#[derive(Debug, Clone, Default)]
pub struct HostScript {
    pub reachable: bool,
    pub replies: HashMap<String, Reply>,
    /// Delay before every query answers.
    pub latency: Duration,
}

impl HostScript {
    pub fn up() -> Self {
        Self {
            reachable: true,
            ..Default::default()
        }
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn reply(mut self, query: &str, rows: RowSet) -> Self {
        self.replies.insert(query.to_string(), Reply::Rows(rows));
        self
    }

    pub fn fail(mut self, query: &str, message: &str) -> Self {
        self.replies
            .insert(query.to_string(), Reply::Fail(message.to_string()));
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// A connector whose hosts answer from scripts that tests can swap between scrapes.
#[derive(Default)]
pub struct ScriptedConnector {
    hosts: Mutex<HashMap<String, HostScript>>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host: &str, script: HostScript) -> Self {
        self.set_host(host, script);
        self
    }

    pub fn set_host(&self, host: &str, script: HostScript) {
        self.hosts.lock().insert(host.to_string(), script);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetConnector for ScriptedConnector {
    async fn open(&self, target: &Target) -> Result<Box<dyn Connection>, ConnectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        let script = self.hosts.lock().get(&target.host).cloned();
        match script {
            Some(script) if script.reachable => Ok(Box::new(ScriptedConnection {
                script,
                closed: AtomicUsize::new(0),
                closes: self.closes.clone(),
            })),
            _ => Err(ConnectError::Failed {
                address: target.address(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

struct ScriptedConnection {
    script: HostScript,
    closed: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn query(&self, sql: &str) -> Result<RowSet, QueryError> {
        if !self.script.latency.is_zero() {
            tokio::time::sleep(self.script.latency).await;
        }
        if self.closed.load(Ordering::SeqCst) > 0 {
            return Err(QueryError::Closed);
        }

        match self.script.replies.get(sql) {
            Some(Reply::Rows(rows)) => Ok(rows.clone()),
            Some(Reply::Fail(message)) => Err(QueryError::Failed(message.clone())),
            None => Err(QueryError::Failed(format!("no script for '{}'", sql))),
        }
    }

    async fn close(&self) {
        if self.closed.fetch_add(1, Ordering::SeqCst) == 0 {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A connector that notes, on every query, the value `up` held for the
/// target at that moment. Every query answers with a single `1`.
pub struct UpWatchingConnector {
    space: Arc<MetricSpace>,
    seen: Arc<Mutex<Vec<Option<f64>>>>,
}

impl UpWatchingConnector {
    pub fn new(space: Arc<MetricSpace>) -> Self {
        Self {
            space,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Values of `up` observed by each query, in arrival order.
    pub fn seen(&self) -> Vec<Option<f64>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TargetConnector for UpWatchingConnector {
    async fn open(&self, target: &Target) -> Result<Box<dyn Connection>, ConnectError> {
        Ok(Box::new(UpWatchingConnection {
            host: target.identity().to_string(),
            space: self.space.clone(),
            seen: self.seen.clone(),
        }))
    }
}

struct UpWatchingConnection {
    host: String,
    space: Arc<MetricSpace>,
    seen: Arc<Mutex<Vec<Option<f64>>>>,
}

#[async_trait]
impl Connection for UpWatchingConnection {
    async fn query(&self, _sql: &str) -> Result<RowSet, QueryError> {
        let up = self.space.get("up", &[("host", self.host.as_str())]);
        self.seen.lock().push(up);
        Ok(RowSet::from_rows(vec![pgsight_common::row![1i64]]))
    }

    async fn close(&self) {}
}
