//! RPC frontend: three unary operations over gRPC (tonic + prost), the
//! "typed binary RPC over TCP" spec.md describes. `tonic::Status` is the
//! native status channel error propagation uses.

mod proto {
    tonic::include_proto!("cloudkv.v1");
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cloudkv_core::KvStore;
use proto::key_value_server::{KeyValue, KeyValueServer};
use proto::{DeleteRequest, DeleteResponse, GetRequest, GetResponse, PutRequest, PutResponse};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tonic::{Request, Response, Status};

use super::{Frontend, FrontendError};
use crate::logger::TransactionLogger;

struct Service {
    store: Arc<KvStore>,
    logger: Arc<dyn TransactionLogger>,
}

#[tonic::async_trait]
impl KeyValue for Service {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let key = request.into_inner().key;
        if key.is_empty() {
            return Err(Status::invalid_argument("invalid key"));
        }
        match self.store.get(&key) {
            Ok(value) => Ok(Response::new(GetResponse { value })),
            Err(_) => Err(Status::not_found("unable to get key")),
        }
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let PutRequest { key, value } = request.into_inner();
        if key.is_empty() {
            return Err(Status::invalid_argument("invalid key"));
        }
        if value.is_empty() {
            return Err(Status::invalid_argument("invalid value"));
        }
        if self.store.put(&key, &value).is_err() {
            return Err(Status::internal("unable to set key"));
        }
        self.logger
            .log_put(&key, &value)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(PutResponse { key, value }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let key = request.into_inner().key;
        if key.is_empty() {
            return Err(Status::invalid_argument("invalid key"));
        }
        if self.store.delete(&key).is_err() {
            return Err(Status::internal("unable to delete key"));
        }
        self.logger
            .log_delete(&key)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(DeleteResponse { key }))
    }
}

/// RPC frontend bound to a single TCP port, serving the `KeyValue` gRPC
/// service.
pub struct RpcFrontend {
    logger: Arc<dyn TransactionLogger>,
    port: u16,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcFrontend {
    #[must_use]
    pub fn new(logger: Arc<dyn TransactionLogger>, port: u16) -> Self {
        Self {
            logger,
            port,
            shutdown_tx: Mutex::new(None),
            server_task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Frontend for RpcFrontend {
    async fn start(
        &self,
        store: Arc<KvStore>,
    ) -> Result<mpsc::Receiver<FrontendError>, FrontendError> {
        let addr = ([0, 0, 0, 0], self.port).into();
        let service = Service {
            store,
            logger: Arc::clone(&self.logger),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);
        let (err_tx, err_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let serve = tonic::transport::Server::builder()
                .add_service(KeyValueServer::new(service))
                .serve_with_shutdown(addr, async {
                    let _ = shutdown_rx.await;
                });
            if let Err(e) = serve.await {
                let _ = err_tx.try_send(FrontendError::Transport(e.to_string()));
            }
        });
        *self.server_task.lock().unwrap() = Some(handle);

        Ok(err_rx)
    }

    async fn close(&self, deadline: Duration) -> Result<(), FrontendError> {
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.server_task.lock().unwrap().take() {
            tokio::select! {
                res = &mut handle => { let _ = res; }
                () = tokio::time::sleep(deadline) => { handle.abort(); }
            }
        }
        Ok(())
    }
}
