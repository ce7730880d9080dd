//! Request/response RPC on top of an [`Endpoint`].
//!
//! The Work side wraps an endpoint in an [`RpcClient`]; the Host side serves
//! a [`RemoteService`] with [`expose`]. Requests and responses share one
//! socket and are told apart by shape: each side ignores messages it cannot
//! parse as its own kind.
//!
//! ```text
//! -> { "id": 7, "call": { "type": "get", "path": ["nested", "flag"] } }
//! <- { "id": 7, "result": true }
//! <- { "id": 8, "result": null, "error": { "message": "..." } }
//! ```

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use remote_ctx_core::{Descriptor, Path};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::wire::{Endpoint, WireError};

/// Operation requested of the Host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCall {
    /// Read and sanitize the value at `path`.
    Get { path: Path },
    /// Assign `value` to the property at `path`.
    Set { path: Path, value: Value },
    /// Call the function at `path`.
    Apply { path: Path, args: Vec<Value> },
    /// Read the raw value at `path`, without sanitizing.
    Serialize { path: Path },
}

/// Request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub call: HostCall,
}

/// Response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Error carried in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub message: String,
}

impl RpcResponse {
    /// Create a success response.
    #[must_use]
    pub const fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(RpcErrorBody {
                message: message.into(),
            }),
        }
    }
}

/// RPC error.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The service reported an error.
    #[error("{0}")]
    Remote(String),
    #[error("Connection closed before a reply arrived")]
    Disconnected,
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
    #[error("Malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Operations a Host exposes to the Work side.
#[async_trait]
pub trait RemoteService: Send + Sync + 'static {
    type Error: Display + Send;

    /// Resolve `path` and return its descriptor tree.
    async fn get(&self, path: Path) -> Result<Descriptor, Self::Error>;

    /// Assign `value` at `path`.
    async fn set(&self, path: Path, value: Value) -> Result<(), Self::Error>;

    /// Call the function at `path` and return the sanitized result.
    async fn apply(&self, path: Path, args: Vec<Value>) -> Result<Descriptor, Self::Error>;

    /// Resolve `path` and return the raw value.
    async fn serialize(&self, path: Path) -> Result<Value, Self::Error>;
}

/// Serve `service` on `endpoint`.
///
/// Each request runs in its own task; overlapping requests are not ordered.
/// A handler that panics still answers, with an error response.
pub fn expose<S: RemoteService>(service: Arc<S>, endpoint: &Endpoint) {
    let responder = endpoint.clone();
    endpoint.add_event_listener(move |event| {
        let Ok(request) = serde_json::from_value::<RpcRequest>(event.data) else {
            return;
        };
        let service = Arc::clone(&service);
        let responder = responder.clone();
        tokio::spawn(async move {
            let call = request.call;
            let handler = tokio::spawn(async move { handle_call(&*service, call).await });
            let response = match handler.await {
                Ok(Ok(result)) => RpcResponse::success(request.id, result),
                Ok(Err(message)) => RpcResponse::error(request.id, message),
                Err(e) => {
                    tracing::error!(connection = %responder.id(), "Handler for {} failed: {e}", request.id);
                    RpcResponse::error(request.id, format!("Host handler failed: {e}"))
                }
            };
            if let Err(e) = responder.post_message(&response) {
                tracing::debug!(connection = %responder.id(), "Dropping reply {}: {e}", request.id);
            }
        });
    });
}

async fn handle_call<S: RemoteService>(service: &S, call: HostCall) -> Result<Value, String> {
    let result = match call {
        HostCall::Get { path } => service
            .get(path)
            .await
            .map(|desc| serde_json::to_value(desc).map_err(|e| e.to_string())),
        HostCall::Set { path, value } => service.set(path, value).await.map(|()| Ok(Value::Null)),
        HostCall::Apply { path, args } => service
            .apply(path, args)
            .await
            .map(|desc| serde_json::to_value(desc).map_err(|e| e.to_string())),
        HostCall::Serialize { path } => service.serialize(path).await.map(Ok),
    };
    result.map_err(|e| e.to_string())?
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;

/// Caller side of the RPC link.
#[derive(Clone)]
pub struct RpcClient {
    endpoint: Endpoint,
    next_id: Arc<AtomicU64>,
    pending: Pending,
}

impl RpcClient {
    /// Wrap an endpoint.
    ///
    /// When the endpoint closes, calls still waiting fail with
    /// [`RpcError::Disconnected`].
    #[must_use]
    pub fn wrap(endpoint: Endpoint) -> Self {
        let pending: Pending = Arc::default();

        let routes = Arc::clone(&pending);
        endpoint.add_event_listener(move |event| {
            let Ok(response) = serde_json::from_value::<RpcResponse>(event.data) else {
                return;
            };
            let Some(waiter) = lock(&routes).remove(&response.id) else {
                tracing::debug!("Reply for unknown request {}", response.id);
                return;
            };
            let outcome = match response.error {
                Some(err) => Err(RpcError::Remote(err.message)),
                None => Ok(response.result),
            };
            let _ = waiter.send(outcome);
        });

        let drained = Arc::clone(&pending);
        let watched = endpoint.clone();
        tokio::spawn(async move {
            watched.closed().await;
            for (_, waiter) in lock(&drained).drain() {
                let _ = waiter.send(Err(RpcError::Disconnected));
            }
        });

        Self {
            endpoint,
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
        }
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a call and wait for its reply.
    ///
    /// # Errors
    /// Returns error if the service fails, the reply is lost, or the
    /// connection closes first.
    pub async fn call(&self, call: HostCall) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        // The close watcher may already have drained the table
        if self.endpoint.is_closed() {
            lock(&self.pending).remove(&id);
            return Err(RpcError::Disconnected);
        }

        if let Err(e) = self.endpoint.post_message(&RpcRequest { id, call }) {
            lock(&self.pending).remove(&id);
            return Err(e.into());
        }

        rx.await.map_err(|_| RpcError::Disconnected)?
    }

    /// # Errors
    /// See [`RpcClient::call`].
    pub async fn get(&self, path: Path) -> Result<Descriptor, RpcError> {
        let value = self.call(HostCall::Get { path }).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// # Errors
    /// See [`RpcClient::call`].
    pub async fn set(&self, path: Path, value: Value) -> Result<(), RpcError> {
        self.call(HostCall::Set { path, value }).await.map(drop)
    }

    /// # Errors
    /// See [`RpcClient::call`].
    pub async fn apply(&self, path: Path, args: Vec<Value>) -> Result<Descriptor, RpcError> {
        let value = self.call(HostCall::Apply { path, args }).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// # Errors
    /// See [`RpcClient::call`].
    pub async fn serialize(&self, path: Path) -> Result<Value, RpcError> {
        self.call(HostCall::Serialize { path }).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::wire::tests::duplex_pair;

    struct EchoService {
        sets: AtomicUsize,
    }

    #[async_trait]
    impl RemoteService for EchoService {
        type Error = String;

        async fn get(&self, path: Path) -> Result<Descriptor, String> {
            match path.last() {
                Some("missing") => Err(format!("Cannot resolve path {path}")),
                Some(last) => Ok(Descriptor::from(last)),
                None => Ok(Descriptor::undefined()),
            }
        }

        async fn set(&self, _path: Path, _value: Value) -> Result<(), String> {
            self.sets.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn apply(&self, _path: Path, args: Vec<Value>) -> Result<Descriptor, String> {
            let sum: f64 = args.iter().filter_map(Value::as_f64).sum();
            Ok(Descriptor::Number(sum))
        }

        async fn serialize(&self, _path: Path) -> Result<Value, String> {
            Ok(json!({ "t1": 1 }))
        }
    }

    struct PanickingService;

    #[async_trait]
    impl RemoteService for PanickingService {
        type Error = String;

        async fn get(&self, path: Path) -> Result<Descriptor, String> {
            panic!("no handler for {path}");
        }

        async fn set(&self, _path: Path, _value: Value) -> Result<(), String> {
            Ok(())
        }

        async fn apply(&self, _path: Path, _args: Vec<Value>) -> Result<Descriptor, String> {
            Ok(Descriptor::undefined())
        }

        async fn serialize(&self, _path: Path) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    fn connected() -> (RpcClient, Arc<EchoService>, Endpoint) {
        let (a, b) = duplex_pair();
        let service = Arc::new(EchoService {
            sets: AtomicUsize::new(0),
        });
        let host = Endpoint::attach(b);
        expose(Arc::clone(&service), &host);
        (RpcClient::wrap(Endpoint::attach(a)), service, host)
    }

    #[test]
    fn test_request_wire_shape() {
        let request = RpcRequest {
            id: 3,
            call: HostCall::Apply {
                path: Path::parse("calc"),
                args: vec![json!(1), json!(2)],
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({ "id": 3, "call": { "type": "apply", "path": ["calc"], "args": [1, 2] } })
        );
    }

    #[test]
    fn test_requests_are_not_mistaken_for_responses() {
        let request = json!({ "id": 1, "call": { "type": "get", "path": [] } });
        assert!(serde_json::from_value::<RpcResponse>(request.clone()).is_err());
        assert!(serde_json::from_value::<RpcRequest>(request).is_ok());
    }

    #[test]
    fn test_null_result_is_not_an_error() {
        let parsed: RpcResponse = serde_json::from_str(r#"{"id":1,"result":null}"#).unwrap();
        assert_eq!(parsed, RpcResponse::success(1, Value::Null));

        let json = serde_json::to_string(&RpcResponse::error(2, "boom")).unwrap();
        assert!(json.contains("\"error\""));
    }

    #[tokio::test]
    async fn test_calls_round_trip() {
        let (client, service, _host) = connected();

        let got = client.get(Path::parse("nested.flag")).await.unwrap();
        assert_eq!(got, Descriptor::from("flag"));

        client.set(Path::parse("num"), json!(5)).await.unwrap();
        assert_eq!(service.sets.load(Ordering::Relaxed), 1);

        let sum = client
            .apply(Path::parse("calc"), vec![json!(1), json!(2)])
            .await
            .unwrap();
        assert_eq!(sum, Descriptor::Number(3.0));

        let raw = client.serialize(Path::parse("o1")).await.unwrap();
        assert_eq!(raw, json!({ "t1": 1 }));
    }

    #[tokio::test]
    async fn test_service_errors_surface_as_remote() {
        let (client, _service, _host) = connected();

        let err = client.get(Path::parse("a.missing")).await.unwrap_err();
        match err {
            RpcError::Remote(message) => assert!(message.contains("a.missing")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_still_answers() {
        let (a, b) = duplex_pair();
        let host = Endpoint::attach(a);
        expose(Arc::new(PanickingService), &host);
        let client = RpcClient::wrap(Endpoint::attach(b));

        let err = tokio::time::timeout(std::time::Duration::from_secs(5), client.get(Path::parse("boom")))
            .await
            .expect("call should be answered")
            .unwrap_err();
        match err {
            RpcError::Remote(message) => assert!(message.starts_with("Host handler failed")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(client.set(Path::parse("x"), json!(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_calls_fail_when_connection_closes() {
        let (a, b) = duplex_pair();
        // Peer that never answers
        let silent = Endpoint::attach(b);
        let client = RpcClient::wrap(Endpoint::attach(a));

        let call = tokio::spawn({
            let client = client.clone();
            async move { client.get(Path::parse("title")).await }
        });
        tokio::task::yield_now().await;
        silent.close();

        let result = call.await.unwrap();
        assert!(matches!(result, Err(RpcError::Disconnected)));
    }
}
