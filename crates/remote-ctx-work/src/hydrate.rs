//! Descriptor tree to local values.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use remote_ctx_core::{
    AccessorMarker, Descriptor, MAX_DENSE_LENGTH, Marker, Path, PropertyDescriptor, array_index,
    number_to_json,
};
use serde_json::Value;

use crate::{RemoteError, gate::CallGate, proxy::RemoteProxy};

/// A value received from the Host.
///
/// Primitives, arrays and objects are local copies. Functions, promises and
/// back-references stay remote as [`RemoteProxy`] handles.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Hydrated {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Hydrated>),
    Object(RemoteObject),
    Proxy(RemoteProxy),
}

impl Hydrated {
    /// Read `key`, issuing a request when the value is remote.
    ///
    /// # Errors
    /// Returns `TypeError` when reading through undefined or null, or any
    /// error raised while contacting the Host.
    pub fn read(&self, key: &str) -> Result<Self, RemoteError> {
        match self {
            Self::Undefined | Self::Null => Err(RemoteError::TypeError(format!(
                "Cannot read properties of {} (reading '{key}')",
                self.type_name()
            ))),
            Self::Proxy(proxy) => proxy.read(key),
            Self::Object(object) => object.get(key),
            #[allow(clippy::cast_precision_loss)]
            Self::Array(items) => Ok(match key {
                "length" => Self::Number(items.len() as f64),
                _ => array_index(key)
                    .and_then(|index| items.get(index).cloned())
                    .unwrap_or_default(),
            }),
            #[allow(clippy::cast_precision_loss)]
            Self::String(s) => Ok(match key {
                "length" => Self::Number(s.chars().count() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| s.chars().nth(index))
                    .map_or(Self::Undefined, |c| Self::String(c.to_string())),
            }),
            Self::Bool(_) | Self::Number(_) => Ok(Self::Undefined),
        }
    }

    /// Assign `key`. Proxies and accessors write through to the Host; local
    /// objects and arrays are updated in place.
    ///
    /// # Errors
    /// Returns `TypeError` for primitive targets or for array writes past
    /// the supported length, or any Host error.
    pub fn write<T: serde::Serialize>(&mut self, key: &str, value: T) -> Result<(), RemoteError> {
        match self {
            Self::Proxy(proxy) => proxy.write(key, value),
            Self::Object(object) => object.set(key, encode(&value)?),
            Self::Array(items) => {
                let Some(index) = array_index(key) else {
                    return Ok(());
                };
                if index >= items.len() {
                    let len = index
                        .checked_add(1)
                        .filter(|len| *len <= MAX_DENSE_LENGTH)
                        .ok_or_else(|| RemoteError::TypeError("Invalid array length".into()))?;
                    items.resize(len, Self::Undefined);
                }
                items[index] = Self::from_json(encode(&value)?);
                Ok(())
            }
            _ => Err(RemoteError::TypeError(format!(
                "Cannot set properties of {} (setting '{key}')",
                self.type_name()
            ))),
        }
    }

    /// Call a remote function.
    ///
    /// # Errors
    /// Returns `TypeError` if this is not a proxy, or any Host error.
    pub fn invoke(&self, args: &[Value]) -> Result<Self, RemoteError> {
        match self {
            Self::Proxy(proxy) => proxy.invoke(args),
            _ => Err(RemoteError::TypeError(format!("{} is not a function", self.type_name()))),
        }
    }

    /// Plain JSON form: enumerable properties only, remote getters invoked,
    /// undefined as null.
    ///
    /// # Errors
    /// Returns `NotPlain` for proxies, or any error from a remote getter.
    pub fn to_plain(&self) -> Result<Value, RemoteError> {
        match self {
            Self::Undefined | Self::Null => Ok(Value::Null),
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Number(n) => Ok(number_to_json(*n)),
            Self::String(s) => Ok(Value::String(s.clone())),
            Self::Array(items) => items.iter().map(Self::to_plain).collect::<Result<_, _>>().map(Value::Array),
            Self::Object(object) => object.to_plain(),
            Self::Proxy(proxy) => Err(RemoteError::NotPlain(proxy.type_name())),
        }
    }

    /// Local value for a JSON value. Objects become plain data properties.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Object(RemoteObject {
                path: None,
                properties: map
                    .into_iter()
                    .map(|(key, value)| (key, HydratedProperty::data(Self::from_json(value))))
                    .collect(),
            }),
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Proxy(proxy) => proxy.type_name(),
        }
    }

    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&RemoteObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_proxy(&self) -> Option<&RemoteProxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Hydrated {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Hydrated {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Hydrated {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for Hydrated {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Hydrated {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|_| RemoteError::Encode)
}

/// Local mirror of a Host object.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    path: Option<Path>,
    properties: IndexMap<String, HydratedProperty>,
}

impl RemoteObject {
    /// Path the object was fetched at.
    ///
    /// `None` for objects with no Host address of their own: call results,
    /// anything nested inside one, and values built locally.
    #[must_use]
    pub const fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    /// Property value, running a remote getter if there is one.
    ///
    /// # Errors
    /// Returns any error from the remote getter.
    pub fn get(&self, key: &str) -> Result<Hydrated, RemoteError> {
        match self.properties.get(key) {
            Some(HydratedProperty::Data { value, .. }) => Ok(value.clone()),
            Some(HydratedProperty::Accessor { get: Some(get), .. }) => get.get(),
            Some(HydratedProperty::Accessor { get: None, .. }) | None => Ok(Hydrated::Undefined),
        }
    }

    /// Assign a property.
    ///
    /// Remote setters write through. Non-writable data properties and
    /// getter-only accessors are left untouched.
    ///
    /// # Errors
    /// Returns any error from the remote setter.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), RemoteError> {
        match self.properties.get_mut(key) {
            Some(HydratedProperty::Accessor { set: Some(set), .. }) => set.set(value),
            Some(HydratedProperty::Data {
                value: slot,
                writable: true,
                ..
            }) => {
                *slot = Hydrated::from_json(value);
                Ok(())
            }
            Some(HydratedProperty::Accessor { set: None, .. } | HydratedProperty::Data { .. }) => {
                Ok(())
            }
            None => {
                self.properties
                    .insert(key.to_owned(), HydratedProperty::data(Hydrated::from_json(value)));
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn descriptor(&self, key: &str) -> Option<&HydratedProperty> {
        self.properties.get(key)
    }

    /// Enumerable keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, property)| property.enumerable())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// All keys in order, enumerable or not.
    #[must_use]
    pub fn own_keys(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    /// # Errors
    /// See [`Hydrated::to_plain`].
    pub fn to_plain(&self) -> Result<Value, RemoteError> {
        let mut map = serde_json::Map::new();
        for key in self.keys() {
            map.insert(key.to_owned(), self.get(key)?.to_plain()?);
        }
        Ok(Value::Object(map))
    }
}

/// Property slot of a [`RemoteObject`].
#[derive(Debug, Clone, PartialEq)]
pub enum HydratedProperty {
    Data {
        value: Hydrated,
        enumerable: bool,
        configurable: bool,
        writable: bool,
    },
    Accessor {
        get: Option<RemoteAccessor>,
        set: Option<RemoteAccessor>,
        enumerable: bool,
        configurable: bool,
    },
}

impl HydratedProperty {
    const fn data(value: Hydrated) -> Self {
        Self::Data {
            value,
            enumerable: true,
            configurable: true,
            writable: true,
        }
    }

    #[must_use]
    pub const fn enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    #[must_use]
    pub const fn configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }
}

/// Getter or setter that runs on the Host, addressed by property path.
#[derive(Clone)]
pub struct RemoteAccessor {
    path: Path,
    gate: Arc<CallGate>,
}

impl RemoteAccessor {
    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch the current value.
    ///
    /// # Errors
    /// Returns any error raised while contacting the Host.
    pub fn get(&self) -> Result<Hydrated, RemoteError> {
        let desc = self.gate.get(self.path.clone())?;
        Ok(hydrate(&self.gate, desc, &self.path))
    }

    /// Assign through the Host setter.
    ///
    /// # Errors
    /// Returns any error raised while contacting the Host.
    pub fn set(&self, value: Value) -> Result<(), RemoteError> {
        self.gate.set(self.path.clone(), value)
    }
}

impl PartialEq for RemoteAccessor {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl fmt::Debug for RemoteAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteAccessor({})", self.path)
    }
}

/// Rebuild a local value from a descriptor fetched at `path`.
pub(crate) fn hydrate(gate: &Arc<CallGate>, desc: Descriptor, path: &Path) -> Hydrated {
    Hydrator { gate, addressable: true }.value(desc, path)
}

/// Rebuild a call result. Objects in it have no Host path, so they are never
/// re-fetched; proxies and accessors still resolve from the root.
pub(crate) fn hydrate_detached(gate: &Arc<CallGate>, desc: Descriptor) -> Hydrated {
    Hydrator { gate, addressable: false }.value(desc, &Path::root())
}

struct Hydrator<'a> {
    gate: &'a Arc<CallGate>,
    addressable: bool,
}

impl Hydrator<'_> {
    fn value(&self, desc: Descriptor, path: &Path) -> Hydrated {
        match desc {
            Descriptor::Null => Hydrated::Null,
            Descriptor::Bool(b) => Hydrated::Bool(b),
            Descriptor::Number(n) => Hydrated::Number(n),
            Descriptor::String(s) => Hydrated::String(s),
            Descriptor::Marker(Marker::Undefined) => Hydrated::Undefined,
            Descriptor::Marker(Marker::ProxyRef { kind, path: target }) => {
                Hydrated::Proxy(RemoteProxy::new(
                    Arc::clone(self.gate),
                    target.unwrap_or_else(|| path.clone()),
                    Some(kind),
                ))
            }
            Descriptor::Marker(Marker::ObjectDescriptor { descriptors }) => {
                let properties = descriptors
                    .into_iter()
                    .map(|(key, desc)| {
                        let child = path.child(key.as_str());
                        (key, self.property(desc, &child))
                    })
                    .collect();
                self.object(path, properties)
            }
            Descriptor::Array(items) => Hydrated::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| self.value(item, &path.index(index)))
                    .collect(),
            ),
            Descriptor::Mapping(map) => {
                let properties = map
                    .into_iter()
                    .map(|(key, desc)| {
                        let child = path.child(key.as_str());
                        (key, HydratedProperty::data(self.value(desc, &child)))
                    })
                    .collect();
                self.object(path, properties)
            }
        }
    }

    fn object(&self, path: &Path, properties: IndexMap<String, HydratedProperty>) -> Hydrated {
        Hydrated::Object(RemoteObject {
            path: self.addressable.then(|| path.clone()),
            properties,
        })
    }

    fn property(&self, desc: PropertyDescriptor, path: &Path) -> HydratedProperty {
        match desc {
            PropertyDescriptor::Data {
                configurable,
                enumerable,
                writable,
                value,
            } => HydratedProperty::Data {
                value: self.value(value, path),
                enumerable,
                configurable,
                writable,
            },
            PropertyDescriptor::Accessor {
                configurable,
                enumerable,
                get,
                set,
            } => {
                // Accessors address the property itself, not the marker's path
                let accessor = |_: AccessorMarker| RemoteAccessor {
                    path: path.clone(),
                    gate: Arc::clone(self.gate),
                };
                HydratedProperty::Accessor {
                    get: get.map(accessor),
                    set: set.map(accessor),
                    enumerable,
                    configurable,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use remote_ctx_core::RefKind;
    use serde_json::json;

    use super::*;

    fn gate() -> Arc<CallGate> {
        Arc::new(CallGate::spawn().unwrap())
    }

    fn wire(value: Value) -> Descriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_primitives_round_trip() {
        let gate = gate();
        let root = Path::root();
        assert_eq!(hydrate(&gate, wire(json!("x")), &root), Hydrated::from("x"));
        assert_eq!(hydrate(&gate, wire(json!(2.5)), &root), Hydrated::from(2.5));
        assert_eq!(hydrate(&gate, wire(json!(null)), &root), Hydrated::Null);
        assert!(hydrate(&gate, Descriptor::undefined(), &root).is_undefined());
    }

    #[test]
    fn test_proxy_ref_uses_own_path_or_falls_back() {
        let gate = gate();
        let base = Path::parse("calc");

        let explicit = hydrate(
            &gate,
            wire(json!({ "__type": "proxy_ref", "type": "function", "path": ["nested", "echo"] })),
            &base,
        );
        assert_eq!(explicit.as_proxy().unwrap().path(), &Path::parse("nested.echo"));
        assert_eq!(explicit.as_proxy().unwrap().kind(), Some(RefKind::Function));

        let implicit = hydrate(&gate, wire(json!({ "__type": "proxy_ref", "type": "promise" })), &base);
        assert_eq!(implicit.as_proxy().unwrap().path(), &base);

        let empty = hydrate(
            &gate,
            wire(json!({ "__type": "proxy_ref", "type": "function", "path": [] })),
            &base,
        );
        assert_eq!(empty.as_proxy().unwrap().path(), &Path::root());
    }

    #[test]
    fn test_object_descriptor_preserves_flags() {
        let gate = gate();
        let desc = wire(json!({
            "__type": "object_descriptor",
            "descriptors": {
                "a": { "configurable": true, "enumerable": true, "writable": true, "value": 1 },
                "z1": {
                    "configurable": true,
                    "enumerable": false,
                    "get": { "__type": "remote_getter", "path": ["o3", "z1"] }
                }
            }
        }));
        let hydrated = hydrate(&gate, desc, &Path::parse("o3"));
        let object = hydrated.as_object().unwrap();

        assert_eq!(object.path(), Some(&Path::parse("o3")));
        assert_eq!(object.keys(), ["a"]);
        assert_eq!(object.own_keys(), ["a", "z1"]);
        match object.descriptor("z1").unwrap() {
            HydratedProperty::Accessor { get, set, enumerable, .. } => {
                assert!(!enumerable);
                assert_eq!(get.as_ref().unwrap().path(), &Path::parse("o3.z1"));
                assert!(set.is_none());
            }
            HydratedProperty::Data { .. } => panic!("expected accessor"),
        }
    }

    #[test]
    fn test_array_elements_address_indices() {
        let gate = gate();
        let desc = wire(json!([1, { "__type": "proxy_ref", "type": "function" }]));
        let hydrated = hydrate(&gate, desc, &Path::parse("list"));
        let items = hydrated.as_array().unwrap();
        assert_eq!(items[0], Hydrated::from(1));
        assert_eq!(items[1].as_proxy().unwrap().path(), &Path::parse("list.1"));
        assert_eq!(hydrated.read("length").unwrap(), Hydrated::from(2));
    }

    #[test]
    fn test_call_results_have_no_object_paths() {
        let gate = gate();
        let desc = wire(json!({
            "__type": "object_descriptor",
            "descriptors": {
                "inner": {
                    "configurable": true,
                    "enumerable": true,
                    "writable": true,
                    "value": { "t": 1 }
                },
                "f": {
                    "configurable": true,
                    "enumerable": true,
                    "writable": true,
                    "value": { "__type": "proxy_ref", "type": "function" }
                }
            }
        }));
        let result = hydrate_detached(&gate, desc.clone());
        let inner = result.read("inner").unwrap();
        assert_eq!(result.as_object().unwrap().path(), None);
        assert_eq!(inner.as_object().unwrap().path(), None);
        assert_eq!(inner.to_plain().unwrap(), json!({ "t": 1 }));
        assert_eq!(result.read("f").unwrap().as_proxy().unwrap().path(), &Path::parse("f"));

        let fetched = hydrate(&gate, desc, &Path::parse("made"));
        let inner = fetched.read("inner").unwrap();
        assert_eq!(inner.as_object().unwrap().path(), Some(&Path::parse("made.inner")));
    }

    #[test]
    fn test_array_writes_past_limits() {
        let mut list = Hydrated::from_json(json!([1]));
        list.write("2", 3).unwrap();
        assert_eq!(list.to_plain().unwrap(), json!([1, null, 3]));

        list.write("18446744073709551615", 1).unwrap();
        assert!(matches!(list.write("4294967294", 1), Err(RemoteError::TypeError(_))));
        assert_eq!(list.read("length").unwrap(), Hydrated::from(3));
    }

    #[test]
    fn test_mapping_fallback_hydrates_per_key() {
        let gate = gate();
        let hydrated = hydrate(&gate, wire(json!({ "k": [true] })), &Path::parse("m"));
        assert_eq!(hydrated.to_plain().unwrap(), json!({ "k": [true] }));
    }

    #[test]
    fn test_local_assignment_rules() {
        let gate = gate();
        let desc = wire(json!({
            "__type": "object_descriptor",
            "descriptors": {
                "w": { "configurable": true, "enumerable": true, "writable": true, "value": 1 },
                "r": { "configurable": false, "enumerable": true, "writable": false, "value": 1 }
            }
        }));
        let mut hydrated = hydrate(&gate, desc, &Path::root());
        hydrated.write("w", 2).unwrap();
        hydrated.write("r", 2).unwrap();
        hydrated.write("fresh", "x").unwrap();
        assert_eq!(hydrated.to_plain().unwrap(), json!({ "w": 2, "r": 1, "fresh": "x" }));
    }

    #[test]
    fn test_reading_through_undefined_is_type_error() {
        let err = Hydrated::Undefined.read("x").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Cannot read properties of undefined (reading 'x')");
    }

    #[test]
    fn test_invoke_requires_proxy() {
        let err = Hydrated::from(1).invoke(&[]).unwrap_err();
        assert!(matches!(err, RemoteError::TypeError(_)));
    }
}
