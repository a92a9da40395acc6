//! REST frontend: `GET/PUT/DELETE /{key}` over HTTP, served with axum.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use cloudkv_core::KvStore;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Frontend, FrontendError};
use crate::logger::TransactionLogger;

#[derive(Clone)]
struct AppState {
    store: Arc<KvStore>,
    logger: Arc<dyn TransactionLogger>,
}

#[derive(Deserialize)]
struct PutForm {
    #[serde(default)]
    value: String,
}

/// REST frontend bound to a single TCP port.
pub struct RestFrontend {
    logger: Arc<dyn TransactionLogger>,
    port: u16,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl RestFrontend {
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

fn router(state: AppState) -> Router {
    Router::new()
        .route("/{key}", get(get_key).put(put_key).delete(delete_key))
        .with_state(state)
}

async fn get_key(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid key".to_string());
    }
    match state.store.get(&key) {
        Ok(value) => (StatusCode::OK, value),
        Err(_) => (StatusCode::BAD_REQUEST, "unable to get key".to_string()),
    }
}

async fn put_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Form(form): Form<PutForm>,
) -> impl IntoResponse {
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid key".to_string());
    }
    if form.value.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid value".to_string());
    }
    if state.store.put(&key, &form.value).is_err() {
        return (StatusCode::BAD_REQUEST, "unable to set key".to_string());
    }
    match state.logger.log_put(&key, &form.value).await {
        Ok(()) => (StatusCode::OK, key),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn delete_key(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    if key.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid key".to_string());
    }
    if state.store.delete(&key).is_err() {
        return (StatusCode::BAD_REQUEST, "unable to delete key".to_string());
    }
    match state.logger.log_delete(&key).await {
        Ok(()) => (StatusCode::OK, key),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[async_trait::async_trait]
impl Frontend for RestFrontend {
    async fn start(
        &self,
        store: Arc<KvStore>,
    ) -> Result<mpsc::Receiver<FrontendError>, FrontendError> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(FrontendError::Bind)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let state = AppState {
            store,
            logger: Arc::clone(&self.logger),
        };
        let app = router(state);
        let (err_tx, err_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::file::FileTransactionLogger;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let logger = FileTransactionLogger::open(dir.path().join("log")).unwrap();
        logger.run();
        AppState {
            store: Arc::new(KvStore::new()),
            logger: Arc::new(logger),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let put = Request::put("/foo")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("value=bar"))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let get = Request::get("/foo").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"bar");
    }

    #[tokio::test]
    async fn get_missing_key_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));
        let get = Request::get("/missing").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"unable to get key");
    }

    #[tokio::test]
    async fn delete_then_get_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let put = Request::put("/foo")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("value=bar"))
            .unwrap();
        app.clone().oneshot(put).await.unwrap();

        let delete = Request::delete("/foo").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let get = Request::get("/foo").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_put_value_is_400_and_does_not_mutate_store() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let store = Arc::clone(&state.store);
        let app = router(state);

        let put = Request::put("/foo")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("value="))
            .unwrap();
        let response = app.oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    async fn put(app: &Router, key: &str, value: &str) -> StatusCode {
        let request = Request::put(format!("/{key}"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(format!("value={value}")))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    async fn get(app: &Router, key: &str) -> (StatusCode, String) {
        let request = Request::get(format!("/{key}")).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// Restart-across-replay scenarios build a fresh router against the
    /// same log file, the way a real restart rebuilds the store from
    /// `replay` before serving any request.
    async fn restarted_router(dir: &tempfile::TempDir) -> Router {
        let logger = FileTransactionLogger::open(dir.path().join("log")).unwrap();
        let store = crate::replay::replay(&logger).await.unwrap();
        logger.run();
        router(AppState {
            store: Arc::new(store),
            logger: Arc::new(logger),
        })
    }

    #[tokio::test]
    async fn multiple_keys_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let app = restarted_router(&dir).await;
            assert_eq!(put(&app, "a", "1").await, StatusCode::OK);
            assert_eq!(put(&app, "b", "2").await, StatusCode::OK);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let app = restarted_router(&dir).await;
        assert_eq!(get(&app, "a").await, (StatusCode::OK, "1".to_string()));
        assert_eq!(get(&app, "b").await, (StatusCode::OK, "2".to_string()));
    }

    #[tokio::test]
    async fn overwrite_survives_a_restart_with_the_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        {
            let app = restarted_router(&dir).await;
            assert_eq!(put(&app, "a", "1").await, StatusCode::OK);
            assert_eq!(put(&app, "a", "2").await, StatusCode::OK);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let app = restarted_router(&dir).await;
        assert_eq!(get(&app, "a").await, (StatusCode::OK, "2".to_string()));
    }

    #[tokio::test]
    async fn corrupt_log_fails_replay_before_any_router_is_built() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        tokio::fs::write(&path, "5\t2\tk\tv\n1\t2\tk\tv\n")
            .await
            .unwrap();

        let logger = FileTransactionLogger::open(&path).unwrap();
        assert!(crate::replay::replay(&logger).await.is_err());
    }
}
