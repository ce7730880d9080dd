//! Blocking bridge to the background runtime.
//!
//! A dedicated thread runs a single-threaded tokio runtime that owns the
//! listener and the active RPC client. Callers send a [`GateRequest`] and
//! block on the reply.

use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
};

use remote_ctx_core::{Descriptor, Path};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{RemoteError, listener::Worker};

#[derive(Debug)]
pub(crate) enum GateRequest {
    Listen { addr: SocketAddr },
    WaitConnection,
    Get { path: Path },
    Set { path: Path, value: Value },
    Apply { path: Path, args: Vec<Value> },
    Serialize { path: Path },
}

#[derive(Debug)]
pub(crate) enum GateReply {
    Port(u16),
    Connected(bool),
    Descriptor(Descriptor),
    Raw(Value),
    Done,
}

type Envelope = (GateRequest, oneshot::Sender<Result<GateReply, RemoteError>>);

pub(crate) struct CallGate {
    requests: Option<mpsc::UnboundedSender<Envelope>>,
    thread: Option<JoinHandle<()>>,
}

impl CallGate {
    /// Start the background thread and its runtime.
    pub(crate) fn spawn() -> Result<Self, RemoteError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RemoteError::Runtime)?;
        let (requests, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let thread = thread::Builder::new()
            .name("remote-ctx-gate".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let worker = Arc::new(Worker::default());
                    while let Some((request, reply)) = rx.recv().await {
                        let worker = Arc::clone(&worker);
                        tokio::spawn(async move {
                            let _ = reply.send(handle(&worker, request).await);
                        });
                    }
                });
                debug!("Gate stopped");
            })
            .map_err(RemoteError::Runtime)?;

        Ok(Self {
            requests: Some(requests),
            thread: Some(thread),
        })
    }

    /// Send a request and block until it is answered.
    ///
    /// Panics if called from within an async runtime.
    pub(crate) fn call(&self, request: GateRequest) -> Result<GateReply, RemoteError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .as_ref()
            .ok_or(RemoteError::GateClosed)?
            .send((request, tx))
            .map_err(|_| RemoteError::GateClosed)?;
        rx.blocking_recv().map_err(|_| RemoteError::GateClosed)?
    }

    pub(crate) fn listen(&self, addr: SocketAddr) -> Result<u16, RemoteError> {
        match self.call(GateRequest::Listen { addr })? {
            GateReply::Port(port) => Ok(port),
            other => Err(unexpected(&other)),
        }
    }

    pub(crate) fn is_connected(&self) -> Result<bool, RemoteError> {
        match self.call(GateRequest::WaitConnection)? {
            GateReply::Connected(connected) => Ok(connected),
            other => Err(unexpected(&other)),
        }
    }

    pub(crate) fn get(&self, path: Path) -> Result<Descriptor, RemoteError> {
        match self.call(GateRequest::Get { path })? {
            GateReply::Descriptor(desc) => Ok(desc),
            other => Err(unexpected(&other)),
        }
    }

    pub(crate) fn set(&self, path: Path, value: Value) -> Result<(), RemoteError> {
        match self.call(GateRequest::Set { path, value })? {
            GateReply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub(crate) fn apply(&self, path: Path, args: Vec<Value>) -> Result<Descriptor, RemoteError> {
        match self.call(GateRequest::Apply { path, args })? {
            GateReply::Descriptor(desc) => Ok(desc),
            other => Err(unexpected(&other)),
        }
    }

    pub(crate) fn serialize(&self, path: Path) -> Result<Value, RemoteError> {
        match self.call(GateRequest::Serialize { path })? {
            GateReply::Raw(value) => Ok(value),
            other => Err(unexpected(&other)),
        }
    }
}

impl Drop for CallGate {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop and drops the runtime
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for CallGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGate")
            .field("open", &self.requests.is_some())
            .finish_non_exhaustive()
    }
}

async fn handle(worker: &Worker, request: GateRequest) -> Result<GateReply, RemoteError> {
    match request {
        GateRequest::Listen { addr } => worker.listen(addr).await.map(GateReply::Port),
        GateRequest::WaitConnection => Ok(GateReply::Connected(worker.is_connected())),
        GateRequest::Get { path } => Ok(GateReply::Descriptor(worker.client()?.get(path).await?)),
        GateRequest::Set { path, value } => {
            worker.client()?.set(path, value).await?;
            Ok(GateReply::Done)
        }
        GateRequest::Apply { path, args } => {
            Ok(GateReply::Descriptor(worker.client()?.apply(path, args).await?))
        }
        GateRequest::Serialize { path } => Ok(GateReply::Raw(worker.client()?.serialize(path).await?)),
    }
}

fn unexpected(reply: &GateReply) -> RemoteError {
    RemoteError::Remote(format!("Unexpected gate reply: {reply:?}"))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn test_listen_is_idempotent() {
        let gate = CallGate::spawn().unwrap();
        let port = gate.listen(loopback()).unwrap();
        assert!(port > 0);
        assert_eq!(gate.listen(loopback()).unwrap(), port);
    }

    #[test]
    fn test_data_ops_fail_fast_without_host() {
        let gate = CallGate::spawn().unwrap();
        gate.listen(loopback()).unwrap();
        assert!(!gate.is_connected().unwrap());
        assert!(matches!(
            gate.get(Path::parse("title")),
            Err(RemoteError::NoHostConnected)
        ));
        assert!(matches!(
            gate.set(Path::parse("title"), Value::Null),
            Err(RemoteError::NoHostConnected)
        ));
    }

    #[test]
    fn test_listen_reports_bind_failure() {
        let gate = CallGate::spawn().unwrap();
        let port = gate.listen(loopback()).unwrap();

        let other = CallGate::spawn().unwrap();
        let taken = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        assert!(matches!(other.listen(taken), Err(RemoteError::Listen(_))));
    }
}
