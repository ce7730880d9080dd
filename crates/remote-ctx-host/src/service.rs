//! Path-addressed operations on the Host root object.

use std::sync::Arc;

use async_trait::async_trait;
use remote_ctx_core::{Descriptor, Path};
use remote_ctx_transport::RemoteService;
use serde_json::Value;
use tracing::trace;

use crate::{
    HostError,
    object::{HostObject, ObjectRef},
    sanitize::sanitize,
    value::HostValue,
};

/// Answers get/set/apply/serialize against a root object.
#[derive(Debug, Clone)]
pub struct HostService {
    root: ObjectRef,
}

impl Default for HostService {
    fn default() -> Self {
        Self::new(Arc::new(HostObject::new()))
    }
}

impl HostService {
    #[must_use]
    pub const fn new(root: ObjectRef) -> Self {
        Self { root }
    }

    #[must_use]
    pub const fn root(&self) -> &ObjectRef {
        &self.root
    }

    /// Copy every own property of `source` onto the root, accessors included.
    /// Later calls win on key collisions.
    pub fn expose(&self, source: &HostObject) {
        for (key, property) in source.own_properties() {
            self.root.define(key, property);
        }
    }

    /// Walk `path` from the root.
    ///
    /// Reading a property of a non-object primitive yields undefined; only
    /// descending from undefined or null fails.
    ///
    /// # Errors
    /// Returns `PathResolution` naming the first segment that could not be
    /// reached, or a getter's error.
    pub fn resolve(&self, path: &Path) -> Result<HostValue, HostError> {
        let mut current = HostValue::Object(Arc::clone(&self.root));
        for segment in path {
            if current.is_nullish() {
                return Err(HostError::PathResolution {
                    path: path.clone(),
                    segment: segment.clone(),
                });
            }
            current = current.get(segment)?;
        }
        Ok(current)
    }

    async fn settle(value: HostValue) -> Result<HostValue, HostError> {
        match value {
            HostValue::Promise(promise) => promise.settle().await,
            other => Ok(other),
        }
    }
}

#[async_trait]
impl RemoteService for HostService {
    type Error = HostError;

    async fn get(&self, path: Path) -> Result<Descriptor, HostError> {
        trace!(%path, "get");
        let value = self.resolve(&path)?;
        Ok(sanitize(&value, &path))
    }

    async fn set(&self, path: Path, value: Value) -> Result<(), HostError> {
        trace!(%path, "set");
        let (Some(parent), Some(key)) = (path.parent(), path.last()) else {
            return Err(HostError::EmptyPath);
        };
        let target = self.resolve(&parent)?;
        target.set(key, HostValue::from_json(value))
    }

    async fn apply(&self, path: Path, args: Vec<Value>) -> Result<Descriptor, HostError> {
        trace!(%path, args = args.len(), "apply");
        let HostValue::Function(function) = self.resolve(&path)? else {
            return Err(HostError::NotCallable(path));
        };
        let this = match path.parent() {
            Some(parent) if !parent.is_empty() => self.resolve(&parent)?,
            _ => HostValue::Object(Arc::clone(&self.root)),
        };
        let args = args.into_iter().map(HostValue::from_json).collect();
        let result = Self::settle(function.call(this, args).await?).await?;
        // Call results are not reachable from the root, so they carry no path.
        Ok(sanitize(&result, &Path::root()))
    }

    async fn serialize(&self, path: Path) -> Result<Value, HostError> {
        trace!(%path, "serialize");
        let value = Self::settle(self.resolve(&path)?).await?;
        value.to_raw()
    }
}
