//! Work-side entry point.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use remote_ctx_core::Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{RemoteError, gate::CallGate, hydrate::Hydrated, proxy::RemoteProxy};

/// Work-side options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCtxOptions {
    /// Port to listen on; 0 picks a free one.
    pub port: u16,
    pub bind_addr: IpAddr,
    /// How often `ready` checks for a Host.
    pub poll_interval_ms: u64,
}

impl Default for RemoteCtxOptions {
    fn default() -> Self {
        Self {
            port: 0,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            poll_interval_ms: 100,
        }
    }
}

impl RemoteCtxOptions {
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }
}

/// Listens for a Host and exposes its root object as [`RemoteCtx::host`].
///
/// All methods block. Dropping the context stops the listener.
#[derive(Debug)]
pub struct RemoteCtx {
    gate: Arc<CallGate>,
    port: u16,
    host: RemoteProxy,
    poll_interval: Duration,
}

impl RemoteCtx {
    /// Start the background runtime and bind the listener.
    ///
    /// # Errors
    /// Returns `Runtime` if the background thread cannot start, or `Listen`
    /// if the address cannot be bound.
    pub fn new(options: RemoteCtxOptions) -> Result<Self, RemoteError> {
        let gate = Arc::new(CallGate::spawn()?);
        let port = gate.listen(SocketAddr::new(options.bind_addr, options.port))?;
        let host = RemoteProxy::new(Arc::clone(&gate), Path::root(), None);
        Ok(Self {
            gate,
            port,
            host,
            poll_interval: Duration::from_millis(options.poll_interval_ms),
        })
    }

    /// Bound port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Proxy for the Host's root object.
    #[must_use]
    pub const fn host(&self) -> &RemoteProxy {
        &self.host
    }

    /// # Errors
    /// Returns `GateClosed` if the background runtime is gone.
    pub fn is_connected(&self) -> Result<bool, RemoteError> {
        self.gate.is_connected()
    }

    /// Block until a Host connects.
    ///
    /// # Errors
    /// Returns `GateClosed` if the background runtime is gone.
    pub fn ready(&self) -> Result<(), RemoteError> {
        while !self.is_connected()? {
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    /// Like [`RemoteCtx::ready`], giving up after `timeout`. Returns whether
    /// a Host is connected.
    ///
    /// # Errors
    /// Returns `GateClosed` if the background runtime is gone.
    pub fn ready_within(&self, timeout: Duration) -> Result<bool, RemoteError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_connected()? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Raw value behind `value`.
    ///
    /// Proxies, and objects fetched at a Host path, are copied by the Host.
    /// Anything else, including objects returned by calls, is already local
    /// and converted in place.
    ///
    /// # Errors
    /// Returns the Host's error, or `NotPlain` for local values holding
    /// proxies.
    pub fn serialize(&self, value: &Hydrated) -> Result<Value, RemoteError> {
        match value {
            Hydrated::Proxy(proxy) => self.gate.serialize(proxy.path().clone()),
            Hydrated::Object(object) => match object.path() {
                Some(path) => self.gate.serialize(path.clone()),
                None => object.to_plain(),
            },
            other => other.to_plain(),
        }
    }
}
