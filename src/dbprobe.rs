// src/dbprobe.rs

//! A thin typed facade over the database probe (spec.md §6): opening a
//! fresh connection per call and reading back a single textual WAL
//! position. Callers are responsible for validating the returned text
//! against the `<hex>/<hex>` grammar — the two call sites (HealthProbe,
//! Elector) react to a malformed result differently, so the parsing
//! decision is deliberately left to them rather than made here.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection};

use crate::cluster::Endpoint;
use crate::error::SentinelError;

/// The hard per-attempt deadline for connect + query + read, per spec.md §4.1.
pub const PROBE_DEADLINE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait DbProbe: Send + Sync {
    /// Reads the primary's current WAL write position.
    async fn current_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, SentinelError>;

    /// Reads the standby's last-received WAL position.
    async fn last_received_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, SentinelError>;
}

/// A real Postgres-speaking probe, built on `sqlx`.
pub struct SqlxDbProbe;

impl SqlxDbProbe {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, endpoint: &Endpoint, dbname: &str) -> Result<PgConnection, SentinelError> {
        let options = PgConnectOptions::new()
            .host(&endpoint.ip)
            .port(endpoint.port)
            .database(dbname);
        PgConnection::connect_with(&options)
            .await
            .map_err(|e| SentinelError::DbProbe(e.to_string()))
    }

    async fn query_wal(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
        query: &str,
    ) -> Result<String, SentinelError> {
        let fut = async {
            let mut conn = self.connect(endpoint, dbname).await?;
            sqlx::query_scalar::<_, String>(query)
                .fetch_one(&mut conn)
                .await
                .map_err(|e| SentinelError::DbProbe(e.to_string()))
        };
        tokio::time::timeout(PROBE_DEADLINE, fut)
            .await
            .map_err(|_| SentinelError::Timeout(PROBE_DEADLINE))?
    }
}

impl Default for SqlxDbProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DbProbe for SqlxDbProbe {
    async fn current_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, SentinelError> {
        self.query_wal(endpoint, dbname, "SELECT pg_current_wal_lsn()::text")
            .await
    }

    async fn last_received_wal_location(
        &self,
        endpoint: &Endpoint,
        dbname: &str,
    ) -> Result<String, SentinelError> {
        self.query_wal(endpoint, dbname, "SELECT pg_last_wal_receive_lsn()::text")
            .await
    }
}

/// A scripted `DbProbe` double for tests. Each call pops the next queued
/// response for that role; an empty queue is a probe failure, matching
/// "the instance is unreachable" rather than panicking the test.
#[derive(Default)]
pub struct FakeDbProbe {
    primary_responses: Mutex<VecDeque<Result<String, String>>>,
    standby_responses: Mutex<VecDeque<Result<String, String>>>,
}

impl FakeDbProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_primary_ok(&self, wal: impl Into<String>) {
        self.primary_responses.lock().push_back(Ok(wal.into()));
    }

    pub fn push_primary_err(&self, reason: impl Into<String>) {
        self.primary_responses.lock().push_back(Err(reason.into()));
    }

    pub fn push_standby_ok(&self, wal: impl Into<String>) {
        self.standby_responses.lock().push_back(Ok(wal.into()));
    }

    pub fn push_standby_err(&self, reason: impl Into<String>) {
        self.standby_responses.lock().push_back(Err(reason.into()));
    }
}

#[async_trait]
impl DbProbe for FakeDbProbe {
    async fn current_wal_location(
        &self,
        _endpoint: &Endpoint,
        _dbname: &str,
    ) -> Result<String, SentinelError> {
        match self.primary_responses.lock().pop_front() {
            Some(Ok(wal)) => Ok(wal),
            Some(Err(reason)) => Err(SentinelError::DbProbe(reason)),
            None => Err(SentinelError::DbProbe("no response scripted".into())),
        }
    }

    async fn last_received_wal_location(
        &self,
        _endpoint: &Endpoint,
        _dbname: &str,
    ) -> Result<String, SentinelError> {
        match self.standby_responses.lock().pop_front() {
            Some(Ok(wal)) => Ok(wal),
            Some(Err(reason)) => Err(SentinelError::DbProbe(reason)),
            None => Err(SentinelError::DbProbe("no response scripted".into())),
        }
    }
}
