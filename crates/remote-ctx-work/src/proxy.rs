//! Path-keyed handles into the Host object graph.

use std::{fmt, sync::Arc};

use remote_ctx_core::{Path, RefKind};
use serde::Serialize;
use serde_json::Value;

use crate::{
    RemoteError,
    gate::CallGate,
    hydrate::{Hydrated, hydrate, hydrate_detached},
};

/// Handle to a value that lives on the Host.
///
/// Holds nothing but a path, so it is cheap to clone and safe to drop. Every
/// operation is a blocking round trip.
#[derive(Clone)]
pub struct RemoteProxy {
    path: Path,
    kind: Option<RefKind>,
    gate: Arc<CallGate>,
}

impl RemoteProxy {
    pub(crate) const fn new(gate: Arc<CallGate>, path: Path, kind: Option<RefKind>) -> Self {
        Self { path, kind, gate }
    }

    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// What the Host said this handle stands for. `None` for the root.
    #[must_use]
    pub const fn kind(&self) -> Option<RefKind> {
        self.kind
    }

    pub(crate) const fn type_name(&self) -> &'static str {
        match self.kind {
            Some(RefKind::Function) => "function",
            Some(RefKind::Promise) => "promise",
            Some(RefKind::Object) | None => "object",
        }
    }

    /// Fetch `path + key`.
    ///
    /// `then` always reads as undefined without contacting the Host, so a
    /// proxy is never mistaken for a thenable.
    ///
    /// # Errors
    /// Returns `NoHostConnected` without a Host, or the Host's error.
    pub fn read(&self, key: &str) -> Result<Hydrated, RemoteError> {
        if key == "then" {
            return Ok(Hydrated::Undefined);
        }
        let path = self.path.child(key);
        let desc = self.gate.get(path.clone())?;
        Ok(hydrate(&self.gate, desc, &path))
    }

    /// Read a dotted path such as `nested.flag`, one segment at a time.
    ///
    /// # Errors
    /// See [`RemoteProxy::read`] and [`Hydrated::read`].
    pub fn read_path(&self, dotted: &str) -> Result<Hydrated, RemoteError> {
        Path::parse(dotted)
            .segments()
            .iter()
            .try_fold(Hydrated::Proxy(self.clone()), |current, segment| current.read(segment))
    }

    /// Assign `path + key` on the Host.
    ///
    /// # Errors
    /// Returns `NoHostConnected` without a Host, or the Host's error.
    pub fn write<T: Serialize>(&self, key: &str, value: T) -> Result<(), RemoteError> {
        let value = serde_json::to_value(value).map_err(|_| RemoteError::Encode)?;
        self.gate.set(self.path.child(key), value)
    }

    /// Call the function at this path.
    ///
    /// The result has no path of its own on the Host. Objects in it are
    /// local copies; proxies and accessors in it resolve from the root.
    ///
    /// # Errors
    /// Returns `NoHostConnected` without a Host, or the Host's error.
    pub fn invoke(&self, args: &[Value]) -> Result<Hydrated, RemoteError> {
        let desc = self.gate.apply(self.path.clone(), args.to_vec())?;
        Ok(hydrate_detached(&self.gate, desc))
    }
}

impl PartialEq for RemoteProxy {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.kind == other.kind
    }
}

impl fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteProxy<{}>({})", self.type_name(), self.path)
    }
}
