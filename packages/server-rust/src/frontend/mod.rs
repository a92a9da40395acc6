//! Frontend capability: binds a port, serves Get/Put/Delete, and requests
//! durable logging after each store mutation.

pub mod rest;
pub mod rpc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cloudkv_core::{FrontendKind, KvStore};
use tokio::sync::mpsc;

use crate::logger::TransactionLogger;

/// Errors a frontend can report once serving has begun.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unknown frontend kind: {0}")]
    UnknownKind(String),
}

/// A wire-protocol server that translates client requests into
/// store+logger calls.
///
/// Lifecycle: `start(store)` begins serving and returns a stream of fatal
/// errors (bind/accept/transport failures); `close(deadline)` stops
/// accepting new connections, waits for in-flight handlers up to
/// `deadline`, then force-terminates.
#[async_trait]
pub trait Frontend: Send + Sync {
    async fn start(
        &self,
        store: Arc<KvStore>,
    ) -> Result<mpsc::Receiver<FrontendError>, FrontendError>;

    async fn close(&self, deadline: Duration) -> Result<(), FrontendError>;
}

/// Builds the frontend named by `kind`, bound to `port` and using `logger`
/// for durable logging. `FrontendKind::Unknown` fails fast, matching
/// spec.md §6.
pub fn build(
    kind: &FrontendKind,
    logger: Arc<dyn TransactionLogger>,
    port: u16,
) -> Result<Arc<dyn Frontend>, FrontendError> {
    match kind {
        FrontendKind::Rest => Ok(Arc::new(rest::RestFrontend::new(logger, port))),
        FrontendKind::Grpc => Ok(Arc::new(rpc::RpcFrontend::new(logger, port))),
        FrontendKind::Unknown(s) => Err(FrontendError::UnknownKind(s.clone())),
    }
}
