//! Outbound connection to the Work side.
//!
//! The Host dials the Work listener, serves a [`HostService`] on the socket,
//! and dials again after a fixed delay whenever the attempt fails or the
//! socket closes. It never gives up while the handle is alive.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use remote_ctx_transport::{Endpoint, rpc};
use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    HostError,
    object::{HostObject, ObjectRef},
    service::HostService,
};

const fn default_reconnect_delay_ms() -> u64 {
    2000
}

/// Host connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOptions {
    /// Work listener URL. `http(s)://` is accepted and rewritten to `ws(s)://`.
    pub url: String,
    /// Pause between a failed or closed connection and the next attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl HostOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Rewrite a leading `http://` or `https://` scheme to `ws://` or `wss://`.
/// Anything else is returned unchanged.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        url.to_owned()
    }
}

type CurrentEndpoint = Arc<Mutex<Option<Endpoint>>>;

/// Host handle: owns the root object and the reconnect loop.
///
/// Dropping the handle stops reconnecting and closes any live socket.
pub struct RemoteCtxHost {
    service: Arc<HostService>,
    url: String,
    current: CurrentEndpoint,
    task: JoinHandle<()>,
}

impl RemoteCtxHost {
    /// Start connecting with an empty root object.
    ///
    /// # Errors
    /// Returns `NoRuntime` when called outside a tokio runtime.
    pub fn new(options: HostOptions) -> Result<Self, HostError> {
        Self::with_root(options, Arc::new(HostObject::new()))
    }

    /// Start connecting, serving `root`.
    ///
    /// # Errors
    /// Returns `NoRuntime` when called outside a tokio runtime.
    pub fn with_root(options: HostOptions, root: ObjectRef) -> Result<Self, HostError> {
        let handle = Handle::try_current().map_err(|_| HostError::NoRuntime)?;
        let url = normalize_url(&options.url);
        let service = Arc::new(HostService::new(root));
        let current = CurrentEndpoint::default();

        let task = handle.spawn(connect_loop(
            url.clone(),
            options.reconnect_delay(),
            Arc::clone(&service),
            Arc::clone(&current),
        ));

        Ok(Self {
            service,
            url,
            current,
            task,
        })
    }

    /// Publish the own properties of `source` on the root object.
    pub fn expose(&self, source: &HostObject) {
        self.service.expose(source);
    }

    #[must_use]
    pub fn service(&self) -> &Arc<HostService> {
        &self.service
    }

    /// Normalized URL being dialed.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|endpoint| !endpoint.is_closed())
    }

    /// Stop reconnecting and close the live socket, if any.
    pub fn shutdown(&self) {
        self.task.abort();
        if let Some(endpoint) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            endpoint.close();
        }
    }
}

impl Drop for RemoteCtxHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RemoteCtxHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCtxHost")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

async fn connect_loop(
    url: String,
    delay: Duration,
    service: Arc<HostService>,
    current: CurrentEndpoint,
) {
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                let endpoint = Endpoint::attach(socket);
                info!(connection = %endpoint.id(), "Connected to {url}");
                rpc::expose(Arc::clone(&service), &endpoint);
                *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(endpoint.clone());

                endpoint.closed().await;
                debug!(connection = %endpoint.id(), "Connection closed");
                current.lock().unwrap_or_else(PoisonError::into_inner).take();
            }
            Err(e) => {
                debug!("Connect to {url} failed: {e}");
            }
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("http://localhost:8080"), "ws://localhost:8080");
        assert_eq!(normalize_url("https://example.com/x"), "wss://example.com/x");
        assert_eq!(normalize_url("ws://localhost:1"), "ws://localhost:1");
        assert_eq!(normalize_url("localhost:1"), "localhost:1");
    }

    #[test]
    fn test_options_default_delay() {
        let options: HostOptions = serde_json::from_str(r#"{ "url": "ws://x" }"#).unwrap();
        assert_eq!(options.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(options, HostOptions::new("ws://x"));
    }

    #[test]
    fn test_requires_runtime() {
        let err = RemoteCtxHost::new(HostOptions::new("ws://127.0.0.1:1")).unwrap_err();
        assert_eq!(err, HostError::NoRuntime);
    }

    #[tokio::test]
    async fn test_unreachable_work_side_keeps_retrying() {
        let mut options = HostOptions::new("http://127.0.0.1:9");
        options.reconnect_delay_ms = 10;
        let host = RemoteCtxHost::new(options).unwrap();
        assert_eq!(host.url(), "ws://127.0.0.1:9");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!host.is_connected());
        assert!(!host.task.is_finished());
        host.shutdown();
    }
}
