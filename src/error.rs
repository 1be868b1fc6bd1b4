// src/error.rs

//! The primary error type for the sentinel daemon.
//!
//! Each variant carries the exit-code semantics of §6 in the design: a
//! `SentinelError` that reaches a component's outermost loop decides
//! whether that component's task exits fatally and, if so, with which
//! code the process should ultimately terminate.

use thiserror::Error;

use crate::wal::ParseWalPositionError;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("KV store error: {0}")]
    Kv(String),

    #[error("pub/sub bus error: {0}")]
    Bus(String),

    #[error("database probe error: {0}")]
    DbProbe(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed WAL position: {0}")]
    MalformedWalPosition(#[from] ParseWalPositionError),

    #[error("SDOWN reached without ever observing a valid WAL position")]
    SdownWithoutBaseline,

    #[error("primary and standby endpoints resolve to the same IP: {0}")]
    CoincidentEndpoints(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A supervised child task (HealthProbe/Elector) exited prematurely for
    /// a reason other than the two dedicated safety exits (4, 5). Assigned
    /// by `supervisor::run` when classifying a child's failure, not raised
    /// directly by the child itself.
    #[error("child task exited prematurely: {0}")]
    ChildTaskExited(String),

    #[error("{0}")]
    Internal(String),
}

impl SentinelError {
    /// The process exit code this error implies, per the daemon's external
    /// contract (spec.md §6). Only meaningful for errors that are fatal to
    /// the whole process; callers decide separately whether a given error
    /// is fatal.
    pub fn exit_code(&self) -> i32 {
        match self {
            SentinelError::Config(_) | SentinelError::CoincidentEndpoints(_) => 1,
            SentinelError::ChildTaskExited(_) => 3,
            SentinelError::SdownWithoutBaseline => 4,
            SentinelError::MalformedWalPosition(_) => 5,
            SentinelError::Kv(_)
            | SentinelError::Bus(_)
            | SentinelError::DbProbe(_)
            | SentinelError::Timeout(_)
            | SentinelError::Io(_)
            | SentinelError::Internal(_) => 1,
        }
    }
}
