pub mod handlers;
pub mod hls;
pub mod logs;
pub mod routes;
pub mod state;
pub mod whatson;

use std::net::SocketAddr;

use serde::Serialize;

use crate::db::models::Event;

pub use state::AppState;

/// Server error types for proper error handling
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Server runtime error: {0}")]
    RuntimeError(String),
}

/// JSON projection of an event row for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct EventJson {
    pub id: String,
    pub pvid: Option<String>,
    pub title: String,
    pub synopsis: Option<String>,
    pub channel_name: Option<String>,
    pub start_utc: String,
    pub end_utc: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub is_free: bool,
    pub is_premium: bool,
    pub hero_image_url: Option<String>,
    pub genres_json: Option<String>,
    pub classification_json: Option<String>,
    pub airing_type: Option<String>,
    pub last_seen_utc: String,
}

impl From<&Event> for EventJson {
    fn from(e: &Event) -> Self {
        Self {
            id: e.id.clone(),
            pvid: e.pvid.clone(),
            title: e.title.clone(),
            synopsis: e.synopsis.clone(),
            channel_name: e.channel_name.clone(),
            start_utc: e.start_utc.clone(),
            end_utc: e.end_utc.clone(),
            start_ms: e.start_ms,
            end_ms: e.end_ms,
            is_free: e.is_free == 1,
            is_premium: e.is_premium == 1,
            hero_image_url: e.hero_image_url.clone(),
            genres_json: e.genres_json.clone(),
            classification_json: e.classification_json.clone(),
            airing_type: e.airing_type.clone(),
            last_seen_utc: e.last_seen_utc.clone(),
        }
    }
}

/// Start the HTTP server with the configured bind address.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let host = state.config().server_host.clone();
    let port = state.config().server_port;
    let app = routes::create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| ServerError::RuntimeError(format!("bad bind address: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::RuntimeError(e.to_string()))?;

    Ok(())
}
