//! HTTP surface of the stream bridge: the streaming endpoint, a health
//! check, static assets and, in production, TLS enforcement.

use events::Channel;
use log::*;
use service::config::Config;
use ::sse::Manager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

mod controller;
pub mod error;
mod middleware;
pub mod router;
mod sse;

pub use error::{Error, ErrorKind};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub manager: Arc<Manager>,
    stream_channel: Channel,
}

impl AppState {
    pub fn new(config: Config, manager: Arc<Manager>, stream_channel: Channel) -> Self {
        Self {
            config,
            manager,
            stream_channel,
        }
    }

    /// The channel served by `GET /stream/messages`.
    pub fn stream_channel(&self) -> &Channel {
        &self.stream_channel
    }
}

/// Serves until `shutdown` is cancelled, then stops accepting connections
/// and waits for open streams to end.
pub async fn init_server(app_state: AppState, shutdown: CancellationToken) -> error::Result<()> {
    let interface = app_state.config.interface.as_deref().unwrap_or("127.0.0.1");
    let server_url = format!("{interface}:{}", app_state.config.port);
    let listener = TcpListener::bind(&server_url).await.map_err(Error::bind)?;

    info!(
        "Server starting... listening for connections on http://{server_url} (stream channel: {})",
        app_state.stream_channel()
    );

    let router = router::define_routes(app_state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(Error::serve)?;

    info!("Server stopped");
    Ok(())
}
