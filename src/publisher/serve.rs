use crate::encoder::PROMETHEUS_CONTENT_TYPE;
use crate::error::PublishError;
use crate::publisher::Publisher;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;

/// What the endpoint currently has to offer
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactState {
    /// No cycle has finished yet
    Pending,
    /// Encoded text from the last successful cycle
    Ready(Arc<str>),
    /// The last cycle failed; holds the reason
    Failed(Arc<str>),
}

/// Shared slot holding the most recent artifact
///
/// Single writer (the scheduler thread), many readers (request handlers).
/// Readers hold the lock only long enough to clone an `Arc`.
#[derive(Debug, Clone)]
pub struct LatestArtifact {
    inner: Arc<RwLock<ArtifactState>>,
}

impl Default for LatestArtifact {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestArtifact {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ArtifactState::Pending)),
        }
    }

    pub fn current(&self) -> ArtifactState {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace(&self, state: ArtifactState) {
        let mut slot = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = state;
    }
}

/// Publisher that hands artifacts to the HTTP endpoint
#[derive(Debug, Clone)]
pub struct ServePublisher {
    latest: LatestArtifact,
    addr: SocketAddr,
}

impl ServePublisher {
    pub fn new(latest: LatestArtifact, addr: SocketAddr) -> Self {
        Self { latest, addr }
    }
}

impl Publisher for ServePublisher {
    fn publish(&self, artifact: &str) -> Result<(), PublishError> {
        self.latest.replace(ArtifactState::Ready(Arc::from(artifact)));
        Ok(())
    }

    fn cycle_failed(&self, reason: &str) {
        self.latest.replace(ArtifactState::Failed(Arc::from(reason)));
    }

    fn destination(&self) -> String {
        format!("http://{}/metrics", self.addr)
    }
}

/// Router exposing `GET /metrics`; every other path is a 404
pub fn router(latest: LatestArtifact) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .with_state(latest)
}

/// Serve `latest` on `listener` until `shutdown` resolves
///
/// In-flight responses are allowed to finish before this returns.
pub async fn serve<F>(listener: TcpListener, latest: LatestArtifact, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(latest))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn metrics(State(latest): State<LatestArtifact>) -> Response {
    match latest.current() {
        ArtifactState::Ready(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            body.to_string(),
        )
            .into_response(),
        ArtifactState::Pending => {
            server_error("Error: no metrics have been collected yet".to_string())
        }
        ArtifactState::Failed(reason) => server_error(format!("Error: {}", reason)),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn server_error(body: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let latest = LatestArtifact::new();
        let publisher = ServePublisher::new(latest.clone(), "127.0.0.1:9445".parse().unwrap());
        assert_eq!(latest.current(), ArtifactState::Pending);

        publisher.publish("a 1\n").unwrap();
        assert_eq!(latest.current(), ArtifactState::Ready(Arc::from("a 1\n")));

        publisher.cycle_failed("nvidia-smi timed out after 10s");
        assert_eq!(
            latest.current(),
            ArtifactState::Failed(Arc::from("nvidia-smi timed out after 10s"))
        );
        assert_eq!(publisher.destination(), "http://127.0.0.1:9445/metrics");
    }

    async fn spawn_server(latest: LatestArtifact) -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(serve(listener, latest, async {
            let _ = rx.await;
        }));
        (addr, tx)
    }

    #[tokio::test]
    async fn test_pending_returns_server_error() {
        let (addr, _stop) = spawn_server(LatestArtifact::new()).await;

        let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().await.unwrap().contains("no metrics"));
    }

    #[tokio::test]
    async fn test_ready_returns_artifact_with_content_type() {
        let latest = LatestArtifact::new();
        ServePublisher::new(latest.clone(), "127.0.0.1:0".parse().unwrap())
            .publish("# HELP a A\n# TYPE a gauge\na 1\n")
            .unwrap();
        let (addr, _stop) = spawn_server(latest).await;

        let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );
        assert_eq!(
            response.text().await.unwrap(),
            "# HELP a A\n# TYPE a gauge\na 1\n"
        );
    }

    #[tokio::test]
    async fn test_failed_cycle_returns_diagnostic() {
        let latest = LatestArtifact::new();
        let publisher = ServePublisher::new(latest.clone(), "127.0.0.1:0".parse().unwrap());
        publisher.publish("a 1\n").unwrap();
        publisher.cycle_failed("cycle panicked: boom");
        let (addr, _stop) = spawn_server(latest).await;

        let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text().await.unwrap(), "Error: cycle panicked: boom");
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        let (addr, _stop) = spawn_server(LatestArtifact::new()).await;

        let response = reqwest::get(format!("http://{}/", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let response = reqwest::get(format!("http://{}/metrics/extra", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_stops_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, LatestArtifact::new(), async {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not shut down");
        assert!(result.unwrap().is_ok());
    }
}
