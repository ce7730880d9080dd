//! Descriptor tree: the wire encoding of sanitized Host values.
//!
//! Every value the Host returns is one of:
//! - a primitive, passed through verbatim
//! - a `proxy_ref` marker for values that must stay remote (functions, promises)
//! - an `object_descriptor` mirroring property descriptors up the prototype chain
//! - an array, encoded elementwise
//! - a plain mapping, decoded per key
//!
//! JSON has no `undefined`, so it travels as `{ "__type": "undefined" }`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::Path;

/// A node in a descriptor tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Descriptor {
    Null,
    Bool(bool),
    /// Written in integer form when exact, see [`number_to_json`].
    #[serde(serialize_with = "serialize_number")]
    Number(f64),
    String(String),
    /// Tagged node (`__type` discriminated).
    Marker(Marker),
    Array(Vec<Descriptor>),
    /// Fallback for objects that were not encoded as descriptors.
    Mapping(IndexMap<String, Descriptor>),
}

/// Tagged descriptor nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type", rename_all = "snake_case")]
pub enum Marker {
    Undefined,
    /// Value that cannot be transferred and is re-resolved by path.
    ///
    /// A missing `path` means "the path this value was fetched at".
    ProxyRef {
        #[serde(rename = "type")]
        kind: RefKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<Path>,
    },
    /// Object mirrored through its property descriptors.
    ObjectDescriptor {
        descriptors: IndexMap<String, PropertyDescriptor>,
    },
}

/// What a proxy reference stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Function,
    Promise,
    /// Back-reference to an object already being encoded (cycle).
    Object,
}

/// Mirror of a single property descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyDescriptor {
    Data {
        configurable: bool,
        enumerable: bool,
        writable: bool,
        value: Descriptor,
    },
    Accessor {
        configurable: bool,
        enumerable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        get: Option<AccessorMarker>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set: Option<AccessorMarker>,
    },
}

/// Stand-in for a getter or setter living on the Host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "__type", rename_all = "snake_case")]
pub enum AccessorMarker {
    RemoteGetter { path: Path },
    RemoteSetter { path: Path },
}

impl AccessorMarker {
    /// Path of the property the accessor belongs to.
    #[must_use]
    pub const fn path(&self) -> &Path {
        match self {
            Self::RemoteGetter { path } | Self::RemoteSetter { path } => path,
        }
    }
}

impl Descriptor {
    #[must_use]
    pub const fn undefined() -> Self {
        Self::Marker(Marker::Undefined)
    }

    /// Proxy reference marker.
    #[must_use]
    pub const fn proxy_ref(kind: RefKind, path: Path) -> Self {
        Self::Marker(Marker::ProxyRef {
            kind,
            path: Some(path),
        })
    }

    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Marker(Marker::Undefined))
    }

    /// True for null, booleans, numbers, strings and undefined.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_)
        ) || self.is_undefined()
    }
}

/// JSON number for an `f64`, preferring the integer form when exact.
///
/// Non-finite values have no JSON form and become `null`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_number<S: serde::Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    number_to_json(*n).serialize(serializer)
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::undefined()
    }
}

impl From<bool> for Descriptor {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Descriptor {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Descriptor {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Descriptor {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
