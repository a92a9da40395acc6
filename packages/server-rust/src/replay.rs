//! Rebuilds store state from a logger's historical event stream.

use cloudkv_core::{EventKind, KvStore};

use crate::logger::{LoggerError, TransactionLogger};

/// Errors during replay are always fatal: the supervisor must not `run()`
/// the logger or start the frontend if this returns `Err`.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    Logger(#[from] LoggerError),
}

/// Consumes `logger`'s `read_events()` streams to completion and applies
/// every event to a freshly constructed store. Must run to completion
/// before `logger.run()` is invoked — otherwise the writer could
/// interleave new events ahead of historical ones.
///
/// Event kinds outside `{Put, Delete}` can't reach this function: decoding
/// an unrecognized kind code already fails at the logger's parse boundary
/// (`LoggerError::Parse`), so there is no separate "unknown kind" case to
/// ignore here — the type system absorbs it upstream.
///
/// `events` closing is not by itself proof that replay succeeded: a
/// backend that hits a read error sends on `errors` and then drops its
/// `events` sender in the same breath, so both channels can be
/// simultaneously ready by the time this function first polls them.
/// `events` reaching `None` only stops this function from applying any
/// more events; it does not return until `errors` has also been drained
/// to `None`, so a buffered error is never raced against and lost.
pub async fn replay(logger: &dyn TransactionLogger) -> Result<KvStore, ReplayError> {
    let (mut events, mut errors) = logger.read_events().await?;
    let store = KvStore::new();
    let mut events_done = false;
    let mut errors_done = false;

    while !(events_done && errors_done) {
        tokio::select! {
            event = events.recv(), if !events_done => {
                match event {
                    Some(event) => {
                        match event.kind {
                            EventKind::Put => {
                                let _ = store.put(&event.key, &event.value);
                            }
                            EventKind::Delete => {
                                let _ = store.delete(&event.key);
                            }
                        }
                    }
                    None => events_done = true,
                }
            }
            err = errors.recv(), if !errors_done => {
                match err {
                    Some(err) => return Err(ReplayError::Logger(err)),
                    None => errors_done = true,
                }
            }
        }
    }

    Ok(store)
}
