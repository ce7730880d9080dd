//! WebSocket listener holding the active Host connection.

use std::{
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    response::IntoResponse,
};
use remote_ctx_transport::{Endpoint, RpcClient};
use tokio::{net::TcpListener, sync::OnceCell};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::RemoteError;

/// The most recent Host connection, if any.
#[derive(Default)]
pub(crate) struct ConnectionSlot {
    current: RwLock<Option<(Uuid, RpcClient)>>,
}

impl ConnectionSlot {
    fn replace(&self, id: Uuid, client: RpcClient) {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((id, client));
        if let Some((old, _)) = previous {
            info!(connection = %id, replaced = %old, "Host connection replaced");
        } else {
            info!(connection = %id, "Host connected");
        }
    }

    /// Clear the slot only if it still holds connection `id`.
    fn clear_if(&self, id: Uuid) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|(held, _)| *held == id) {
            *current = None;
            info!(connection = %id, "Host disconnected");
        }
    }

    pub(crate) fn client(&self) -> Option<RpcClient> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, client)| client.clone())
    }
}

/// Listener state owned by the background runtime.
#[derive(Default)]
pub(crate) struct Worker {
    slot: Arc<ConnectionSlot>,
    port: OnceCell<u16>,
}

impl Worker {
    /// Bind and start serving. Later calls return the first bound port.
    pub(crate) async fn listen(&self, addr: SocketAddr) -> Result<u16, RemoteError> {
        self.port
            .get_or_try_init(|| async {
                let listener = TcpListener::bind(addr).await.map_err(RemoteError::Listen)?;
                let port = listener.local_addr().map_err(RemoteError::Listen)?.port();
                info!("Listening on {}:{port}", addr.ip());

                let app = Router::new()
                    .fallback(ws_handler)
                    .layer(TraceLayer::new_for_http())
                    .with_state(Arc::clone(&self.slot));
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        error!("Listener stopped: {e}");
                    }
                });
                Ok::<_, RemoteError>(port)
            })
            .await
            .copied()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.slot.client().is_some()
    }

    /// The active connection.
    pub(crate) fn client(&self) -> Result<RpcClient, RemoteError> {
        self.slot.client().ok_or(RemoteError::NoHostConnected)
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(slot): State<Arc<ConnectionSlot>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, slot))
}

async fn handle_socket(socket: WebSocket, slot: Arc<ConnectionSlot>) {
    let endpoint = Endpoint::attach(socket);
    let id = endpoint.id();
    slot.replace(id, RpcClient::wrap(endpoint.clone()));

    endpoint.closed().await;
    debug!(connection = %id, "Socket closed");
    slot.clear_if(id);
}
