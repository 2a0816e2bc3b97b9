/*!
Afficheur de télémétrie simulé

Serveur HTTP local qui se comporte comme l'afficheur:
- `GET /` renvoie une page contenant la signature (utilisée par la découverte)
- `POST /update` enregistre le JSON reçu et répond avec le statut configuré
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct SinkState {
    signature: String,
    status: StatusCode,
    received: Arc<Mutex<Vec<Value>>>,
}

/// Afficheur simulé écoutant sur 127.0.0.1, arrêté au drop
pub struct MockSink {
    port: u16,
    received: Arc<Mutex<Vec<Value>>>,
    server: JoinHandle<()>,
}

impl MockSink {
    /// Démarre un afficheur qui accepte toutes les mises à jour
    pub async fn start(signature: &str) -> Result<Self> {
        Self::start_with_status(signature, 200).await
    }

    /// Démarre un afficheur qui répond `status` à chaque `POST /update`
    pub async fn start_with_status(signature: &str, status: u16) -> Result<Self> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = SinkState {
            signature: signature.to_string(),
            status: StatusCode::from_u16(status)?,
            received: Arc::clone(&received),
        };

        let app = Router::new()
            .route("/", get(index))
            .route("/update", post(update))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [MOCK SINK] Server stopped: {}", e);
            }
        });

        log::info!("🖥️ [MOCK SINK] Listening on 127.0.0.1:{} ({})", port, signature);
        Ok(Self {
            port,
            received,
            server,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Copie des payloads reçus, dans l'ordre d'arrivée
    pub fn received(&self) -> Vec<Value> {
        self.received
            .lock()
            .map(|payloads| payloads.clone())
            .unwrap_or_default()
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn index(State(state): State<SinkState>) -> Html<String> {
    Html(format!(
        "<html><head><title>{0}</title></head><body><h1>{0}</h1></body></html>",
        state.signature
    ))
}

async fn update(State(state): State<SinkState>, Json(payload): Json<Value>) -> (StatusCode, &'static str) {
    log::info!("📥 [MOCK SINK] Update: {}", payload);
    if let Ok(mut received) = state.received.lock() {
        received.push(payload);
    }

    if state.status.is_success() {
        (state.status, "OK")
    } else {
        (state.status, "Display error")
    }
}
