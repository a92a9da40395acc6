//! Relational-table backend: a single `transactions` table, `sequence`
//! assigned server-side by `SERIAL`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cloudkv_core::{Event, EventKind};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    LoggerError, PendingEvent, PostgresParams, TransactionLogger, ERROR_CAPACITY, INTAKE_CAPACITY,
};

const TABLE: &str = "transactions";

impl PostgresParams {
    fn connection_string(&self) -> String {
        format!(
            "postgres://{user}:{password}@{host}/{db_name}",
            user = self.user,
            password = self.password,
            host = self.host,
            db_name = self.db_name,
        )
    }
}

/// Transaction logger backed by a Postgres `transactions` table.
pub struct PostgresTransactionLogger {
    pool: PgPool,
    #[allow(dead_code)] // tracked for parity with the file backend; unused on write, see module docs
    last_sequence: Arc<AtomicU64>,
    closed: AtomicBool,
    intake_tx: mpsc::Sender<PendingEvent>,
    intake_rx: Mutex<Option<mpsc::Receiver<PendingEvent>>>,
    errors_tx: mpsc::Sender<LoggerError>,
    errors_rx: Mutex<Option<mpsc::Receiver<LoggerError>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl PostgresTransactionLogger {
    /// Connects, then verifies (and if necessary creates) the
    /// `transactions` table.
    pub async fn connect(params: PostgresParams) -> Result<Self, LoggerError> {
        let pool = PgPoolOptions::new()
            .connect(&params.connection_string())
            .await?;

        if !verify_table_exists(&pool, TABLE).await? {
            create_tx_table(&pool).await?;
        }

        let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CAPACITY);

        Ok(Self {
            pool,
            last_sequence: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            writer_task: Mutex::new(None),
        })
    }
}

/// Unlike the source this was distilled from — whose `verifyTableExists`
/// never consumes the queried row and so always returns `false` — this
/// actually reads the `SELECT EXISTS(...)` boolean, so the `CREATE TABLE`
/// below only runs when the table is genuinely missing.
async fn verify_table_exists(pool: &PgPool, table: &str) -> Result<bool, LoggerError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

async fn create_tx_table(pool: &PgPool) -> Result<(), LoggerError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transactions (
            sequence SERIAL PRIMARY KEY,
            event_type INT,
            key TEXT,
            value TEXT
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl TransactionLogger for PostgresTransactionLogger {
    async fn log_put(&self, key: &str, value: &str) -> Result<(), LoggerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LoggerError::Closed);
        }
        self.intake_tx
            .send(PendingEvent::Put {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await
            .map_err(|_| LoggerError::Closed)
    }

    async fn log_delete(&self, key: &str) -> Result<(), LoggerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LoggerError::Closed);
        }
        self.intake_tx
            .send(PendingEvent::Delete {
                key: key.to_string(),
            })
            .await
            .map_err(|_| LoggerError::Closed)
    }

    async fn read_events(
        &self,
    ) -> Result<(mpsc::Receiver<Event>, mpsc::Receiver<LoggerError>), LoggerError> {
        let (out_tx, out_rx) = mpsc::channel(INTAKE_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel(1);
        let pool = self.pool.clone();
        let last_sequence = Arc::clone(&self.last_sequence);

        tokio::spawn(async move {
            let rows = match sqlx::query(
                "SELECT sequence, event_type, key, value FROM transactions ORDER BY sequence",
            )
            .fetch_all(&pool)
            .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = err_tx.send(LoggerError::Database(e)).await;
                    return;
                }
            };

            for row in rows {
                let sequence: i32 = row.get("sequence");
                let sequence = sequence as u64;
                let event_type: i32 = row.get("event_type");
                let Some(kind) = EventKind::from_code(event_type as u8) else {
                    let _ = err_tx
                        .send(LoggerError::Parse(format!("unknown event kind {event_type}")))
                        .await;
                    return;
                };
                let key: String = row.get("key");
                let value: String = row.get("value");

                let last = last_sequence.load(Ordering::Acquire);
                if last >= sequence {
                    let _ = err_tx
                        .send(LoggerError::NonMonotonicSequence { last, got: sequence })
                        .await;
                    return;
                }
                last_sequence.store(sequence, Ordering::Release);

                let event = Event {
                    sequence,
                    kind,
                    key,
                    value,
                };
                if out_tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok((out_rx, err_rx))
    }

    fn run(&self) {
        let mut writer_task = self.writer_task.lock().unwrap();
        if writer_task.is_some() {
            return;
        }
        let Some(mut intake_rx) = self.intake_rx.lock().unwrap().take() else {
            return;
        };
        let pool = self.pool.clone();
        let errors_tx = self.errors_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(pending) = intake_rx.recv().await {
                let (event_type, key, value) = match pending {
                    PendingEvent::Put { key, value } => (EventKind::Put.code() as i32, key, value),
                    PendingEvent::Delete { key } => {
                        (EventKind::Delete.code() as i32, key, String::new())
                    }
                };

                let result = sqlx::query(
                    "INSERT INTO transactions (event_type, key, value) VALUES ($1, $2, $3)",
                )
                .bind(event_type)
                .bind(&key)
                .bind(&value)
                .execute(&pool)
                .await;

                if let Err(e) = result {
                    let _ = errors_tx.try_send(LoggerError::Database(e));
                    return;
                }
            }
        });

        *writer_task = Some(handle);
    }

    fn take_errors(&self) -> Option<mpsc::Receiver<LoggerError>> {
        self.errors_rx.lock().unwrap().take()
    }

    async fn close(&self) -> Result<(), LoggerError> {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.writer_task.lock().unwrap().take() {
            handle.abort();
        }
        self.pool.close().await;
        Ok(())
    }
}
