//! Transaction logger capability: append/read interface with two backends.

pub(crate) mod escape;
pub mod file;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cloudkv_core::{Event, LoggerKind};
use tokio::sync::mpsc;

/// Capacity of the in-memory queue of events awaiting persistence.
pub const INTAKE_CAPACITY: usize = 16;
/// Capacity of the background writer's error channel. Kept at 1 so the
/// writer never blocks on publishing an error: a queued error that isn't
/// drained yet causes a later one to be silently dropped, which is fine
/// since the writer is terminating anyway.
pub const ERROR_CAPACITY: usize = 1;

/// Errors a logger backend can report.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("input parse error: {0}")]
    Parse(String),
    #[error("sequence number error: {last} >= {got}")]
    NonMonotonicSequence { last: u64, got: u64 },
    #[error("logger is closed")]
    Closed,
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} backend not compiled in (build with --features {0})")]
    UnsupportedBackend(&'static str),
    #[error("unknown logger kind: {0}")]
    UnknownKind(String),
}

/// Connection parameters for the relational-table backend. Defined
/// unconditionally (not behind `postgres`) so the CLI surface can accept
/// and validate these flags regardless of which backends were compiled
/// in.
#[derive(Debug, Clone)]
pub struct PostgresParams {
    pub host: String,
    pub user: String,
    pub password: String,
    pub db_name: String,
}

/// A pending mutation, queued before the logger assigns it a sequence
/// number. Sequence assignment happens at persistence time, not enqueue
/// time — see `spec.md` §3 ("sequence is assigned exclusively by the
/// logger on append").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

/// Abstract append/read interface, implemented by the file and
/// relational-table backends.
///
/// Lifecycle: a logger is created open. [`TransactionLogger::read_events`]
/// must be called before [`TransactionLogger::run`] so historical replay
/// completes before the background writer can interleave new events ahead
/// of it. [`TransactionLogger::close`] releases the underlying resource;
/// after close, `log_put`/`log_delete` return [`LoggerError::Closed`].
#[async_trait]
pub trait TransactionLogger: Send + Sync {
    /// Enqueues a `Put` event for asynchronous persistence. Returns once
    /// the event is queued, not once it is durable.
    async fn log_put(&self, key: &str, value: &str) -> Result<(), LoggerError>;

    /// Symmetric to `log_put`, `Delete` kind.
    async fn log_delete(&self, key: &str) -> Result<(), LoggerError>;

    /// Historical replay: yields every event recorded in this log in
    /// sequence order on the returned receiver, and any fatal read error on
    /// the second. Must be called before [`TransactionLogger::run`].
    async fn read_events(
        &self,
    ) -> Result<(mpsc::Receiver<Event>, mpsc::Receiver<LoggerError>), LoggerError>;

    /// Starts the background writer. Idempotent: a second call is a no-op.
    fn run(&self);

    /// Takes ownership of the background writer's error stream. Returns
    /// `None` if `run` has not been called yet, or if a caller already took
    /// it. The channel closes when the writer exits (on error, or on
    /// `close`).
    fn take_errors(&self) -> Option<mpsc::Receiver<LoggerError>>;

    /// Releases the resource. After this, further operations fail with
    /// [`LoggerError::Closed`].
    async fn close(&self) -> Result<(), LoggerError>;
}

/// Builds the logger backend named by `kind`. `LoggerKind::Unknown` fails
/// fast, matching spec.md §6's "unknown string values... cause logger/
/// frontend construction to fail fast".
pub async fn build(
    kind: &LoggerKind,
    config_dir: &Path,
    postgres_params: PostgresParams,
) -> Result<Arc<dyn TransactionLogger>, LoggerError> {
    match kind {
        LoggerKind::File => {
            let logger = file::FileTransactionLogger::open(config_dir.join("data"))?;
            Ok(Arc::new(logger))
        }
        LoggerKind::Psql => {
            #[cfg(feature = "postgres")]
            {
                let logger = postgres::PostgresTransactionLogger::connect(postgres_params).await?;
                Ok(Arc::new(logger))
            }
            #[cfg(not(feature = "postgres"))]
            {
                let _ = postgres_params;
                Err(LoggerError::UnsupportedBackend("postgres"))
            }
        }
        LoggerKind::Unknown(s) => Err(LoggerError::UnknownKind(s.clone())),
    }
}
