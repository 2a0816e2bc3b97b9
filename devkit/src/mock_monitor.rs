/*!
Moniteur matériel simulé

Sert un arbre de capteurs fixe sur `GET /data.json`, comme le serveur web
distant du moniteur matériel.
*/

use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct MockMonitor {
    port: u16,
    server: JoinHandle<()>,
}

impl MockMonitor {
    pub async fn start(tree: Value) -> Result<Self> {
        let app = Router::new()
            .route("/data.json", get(data))
            .with_state(Arc::new(tree));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [MOCK MONITOR] Server stopped: {}", e);
            }
        });

        Ok(Self { port, server })
    }

    /// URL complète de l'arbre (`http://127.0.0.1:<port>/data.json`)
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/data.json", self.port)
    }
}

impl Drop for MockMonitor {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn data(State(tree): State<Arc<Value>>) -> Json<Value> {
    Json(tree.as_ref().clone())
}
