//! Dynamic values in the Host object graph.

use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{
    FutureExt,
    future::{self, BoxFuture, Shared},
};
use remote_ctx_core::{MAX_DENSE_LENGTH, Path, array_index, number_to_json};
use serde_json::Value;

use crate::{
    HostError,
    object::{HostObject, ObjectRef, Property},
};

/// Getter: receives the object the property was read through.
pub type Getter = Arc<dyn Fn(&HostValue) -> Result<HostValue, HostError> + Send + Sync>;

/// Setter: receives the object the property was assigned through.
pub type Setter = Arc<dyn Fn(&HostValue, HostValue) -> Result<(), HostError> + Send + Sync>;

type NativeFn =
    dyn Fn(HostValue, Vec<HostValue>) -> BoxFuture<'static, Result<HostValue, HostError>> + Send + Sync;

/// A value living on the Host.
///
/// Arrays, objects, functions and promises are shared handles: cloning one
/// clones the reference, and equality is identity.
#[derive(Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(HostFunction),
    Promise(HostPromise),
}

/// Callable host value.
#[derive(Clone)]
pub struct HostFunction(Arc<NativeFn>);

impl HostFunction {
    /// Wrap an async closure `(this, args) -> value`.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HostValue, Vec<HostValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HostValue, HostError>> + Send + 'static,
    {
        Self(Arc::new(move |this, args| f(this, args).boxed()))
    }

    /// Wrap a synchronous closure.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        Self::new(move |this, args| future::ready(f(&this, &args)))
    }

    /// Call with an explicit `this`.
    ///
    /// # Errors
    /// Returns whatever the function raises.
    pub async fn call(&self, this: HostValue, args: Vec<HostValue>) -> Result<HostValue, HostError> {
        (self.0)(this, args).await
    }
}

/// Thenable host value. Settles once; every awaiter sees the same outcome.
#[derive(Clone)]
pub struct HostPromise(Shared<BoxFuture<'static, Result<HostValue, HostError>>>);

impl HostPromise {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<HostValue, HostError>> + Send + 'static,
    {
        Self(future.boxed().shared())
    }

    /// Already-fulfilled promise.
    #[must_use]
    pub fn resolve(value: HostValue) -> Self {
        Self::new(future::ready(Ok(value)))
    }

    /// Already-rejected promise.
    #[must_use]
    pub fn reject(error: HostError) -> Self {
        Self::new(future::ready(Err(error)))
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    /// Returns the rejection reason.
    pub async fn settle(&self) -> Result<HostValue, HostError> {
        self.0.clone().await
    }
}

/// Shared, growable array.
#[derive(Clone, Default)]
pub struct ArrayRef(Arc<RwLock<Vec<HostValue>>>);

impl ArrayRef {
    #[must_use]
    pub fn new(items: Vec<HostValue>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Copy of the current elements.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HostValue> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }

    fn set_property(&self, key: &str, value: HostValue) -> Result<(), HostError> {
        let mut items = self.0.write().unwrap_or_else(PoisonError::into_inner);
        if key == "length" {
            let len = value
                .as_f64()
                .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX))
                .ok_or(HostError::InvalidArrayLength)?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let len = dense_length(len as usize)?;
            items.resize(len, HostValue::Undefined);
            return Ok(());
        }
        let Some(index) = array_index(key) else {
            return Err(HostError::InvalidAssignment {
                target: "array",
                key: key.to_owned(),
            });
        };
        if index >= items.len() {
            let len = index.checked_add(1).ok_or(HostError::InvalidArrayLength)?;
            items.resize(dense_length(len)?, HostValue::Undefined);
        }
        items[index] = value;
        Ok(())
    }
}

fn dense_length(len: usize) -> Result<usize, HostError> {
    if len > MAX_DENSE_LENGTH {
        return Err(HostError::InvalidArrayLength);
    }
    Ok(len)
}

impl HostValue {
    /// `typeof`-style name, with arrays and promises told apart.
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
            Self::Function(_) => "function",
            Self::Promise(_) => "promise",
        }
    }

    #[must_use]
    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
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
    pub const fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Read a property, running getters with `self` as receiver.
    ///
    /// # Errors
    /// Returns error when reading through undefined/null or when a getter fails.
    pub fn get(&self, key: &str) -> Result<Self, HostError> {
        match self {
            Self::Undefined | Self::Null => Err(HostError::ReadNullish {
                target: self.type_name(),
                key: key.to_owned(),
            }),
            Self::Object(obj) => obj.get_with_receiver(key, self),
            Self::Array(items) => Ok(match key {
                "length" => Self::from(items.len()),
                _ => array_index(key)
                    .and_then(|index| items.get(index))
                    .unwrap_or_default(),
            }),
            Self::String(s) => Ok(match key {
                "length" => Self::from(s.chars().count()),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| s.chars().nth(index))
                    .map_or(Self::Undefined, |c| Self::String(c.to_string())),
            }),
            Self::Bool(_) | Self::Number(_) | Self::Function(_) | Self::Promise(_) => {
                Ok(Self::Undefined)
            }
        }
    }

    /// Assign a property, running setters with `self` as receiver.
    ///
    /// # Errors
    /// Returns error for non-object targets, read-only properties,
    /// getter-only accessors, or a failing setter.
    pub fn set(&self, key: &str, value: Self) -> Result<(), HostError> {
        match self {
            Self::Object(obj) => obj.set_with_receiver(key, value, self),
            Self::Array(items) => items.set_property(key, value),
            _ => Err(HostError::InvalidAssignment {
                target: self.type_name(),
                key: key.to_owned(),
            }),
        }
    }

    /// Convert an incoming JSON value into fresh host values.
    ///
    /// `{ "__type": "undefined" }` becomes `Undefined`.
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::String(s),
            Value::Array(items) => {
                Self::Array(ArrayRef::new(items.into_iter().map(Self::from_json).collect()))
            }
            Value::Object(map) => {
                if map.len() == 1 && map.get("__type").and_then(Value::as_str) == Some("undefined") {
                    return Self::Undefined;
                }
                let object = HostObject::new();
                for (key, value) in map {
                    object.define(key, Property::data(Self::from_json(value)));
                }
                Self::Object(Arc::new(object))
            }
        }
    }

    /// Plain JSON copy of this value.
    ///
    /// Objects contribute their own enumerable properties (getters are run);
    /// undefined becomes null.
    ///
    /// # Errors
    /// Returns error for functions, promises, cycles, or a failing getter.
    pub fn to_raw(&self) -> Result<Value, HostError> {
        RawEncoder::default().encode(self, &Path::root())
    }
}

#[derive(Default)]
struct RawEncoder {
    stack: Vec<*const ()>,
}

impl RawEncoder {
    fn enter(&mut self, ptr: *const (), path: &Path) -> Result<(), HostError> {
        if self.stack.contains(&ptr) {
            return Err(HostError::Circular(path.clone()));
        }
        self.stack.push(ptr);
        Ok(())
    }

    fn encode(&mut self, value: &HostValue, path: &Path) -> Result<Value, HostError> {
        match value {
            HostValue::Undefined | HostValue::Null => Ok(Value::Null),
            HostValue::Bool(b) => Ok(Value::Bool(*b)),
            HostValue::Number(n) => Ok(number_to_json(*n)),
            HostValue::String(s) => Ok(Value::String(s.clone())),
            HostValue::Function(_) => Err(HostError::NotCloneable("function")),
            HostValue::Promise(_) => Err(HostError::NotCloneable("promise")),
            HostValue::Array(items) => {
                self.enter(items.as_ptr(), path)?;
                let encoded = items
                    .snapshot()
                    .iter()
                    .enumerate()
                    .map(|(index, item)| self.encode(item, &path.index(index)))
                    .collect::<Result<Vec<_>, _>>()?;
                self.stack.pop();
                Ok(Value::Array(encoded))
            }
            HostValue::Object(obj) => {
                self.enter(Arc::as_ptr(obj).cast(), path)?;
                let mut map = serde_json::Map::new();
                for (key, property) in obj.own_properties() {
                    if !property.enumerable() {
                        continue;
                    }
                    let item = match property {
                        Property::Data { value, .. } => value,
                        Property::Accessor { get: Some(get), .. } => get(value)?,
                        Property::Accessor { get: None, .. } => HostValue::Undefined,
                    };
                    let encoded = self.encode(&item, &path.child(key.as_str()))?;
                    map.insert(key, encoded);
                }
                self.stack.pop();
                Ok(Value::Object(map))
            }
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Self::Promise(a), Self::Promise(b)) => a.0.ptr_eq(&b.0),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => write!(f, "[Array({})]", items.len()),
            Self::Object(obj) => fmt::Debug::fmt(obj, f),
            Self::Function(_) => f.write_str("[Function]"),
            Self::Promise(_) => f.write_str("[Promise]"),
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for HostValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<usize> for HostValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: usize) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Self>> for HostValue {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(ArrayRef::new(items))
    }
}

impl From<ObjectRef> for HostValue {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<HostObject> for HostValue {
    fn from(obj: HostObject) -> Self {
        Self::Object(Arc::new(obj))
    }
}

impl From<HostFunction> for HostValue {
    fn from(f: HostFunction) -> Self {
        Self::Function(f)
    }
}

impl From<HostPromise> for HostValue {
    fn from(promise: HostPromise) -> Self {
        Self::Promise(promise)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_reading_through_nullish_fails() {
        let err = HostValue::Undefined.get("x").unwrap_err();
        assert_eq!(
            err,
            HostError::ReadNullish {
                target: "undefined",
                key: "x".into()
            }
        );
    }

    #[test]
    fn test_array_indexing_and_length() {
        let list = HostValue::from(vec![HostValue::from(1), HostValue::from(2)]);
        assert_eq!(list.get("1").unwrap(), HostValue::from(2));
        assert_eq!(list.get("5").unwrap(), HostValue::Undefined);
        assert_eq!(list.get("length").unwrap(), HostValue::from(2usize));

        list.set("3", "x".into()).unwrap();
        assert_eq!(list.get("length").unwrap(), HostValue::from(4usize));
        assert_eq!(list.get("2").unwrap(), HostValue::Undefined);

        list.set("length", 1.into()).unwrap();
        assert_eq!(list.get("length").unwrap(), HostValue::from(1usize));
    }

    #[test]
    fn test_array_writes_past_limits_are_refused() {
        let list = HostValue::from(vec![HostValue::from(1)]);
        assert_eq!(
            list.set("18446744073709551615", 2.into()).unwrap_err(),
            HostError::InvalidAssignment {
                target: "array",
                key: "18446744073709551615".into()
            }
        );
        assert_eq!(
            list.set("4294967294", 2.into()).unwrap_err(),
            HostError::InvalidArrayLength
        );
        assert_eq!(
            list.set("length", 1e10.into()).unwrap_err(),
            HostError::InvalidArrayLength
        );
        assert_eq!(
            list.set("length", 4_294_967_295.0.into()).unwrap_err(),
            HostError::InvalidArrayLength
        );
        assert_eq!(list.get("length").unwrap(), HostValue::from(1usize));
        assert_eq!(list.get("0").unwrap(), HostValue::from(1));
    }

    #[test]
    fn test_from_json_builds_fresh_objects() {
        let value = HostValue::from_json(json!({ "a": [1, { "b": null }], "u": { "__type": "undefined" } }));
        assert_eq!(value.get("a").unwrap().get("1").unwrap().get("b").unwrap(), HostValue::Null);
        assert_eq!(value.get("u").unwrap(), HostValue::Undefined);
        assert_eq!(value.to_raw().unwrap(), json!({ "a": [1, { "b": null }], "u": null }));
    }

    #[test]
    fn test_to_raw_rejects_functions() {
        let f = HostValue::from(HostFunction::sync(|_, _| Ok(HostValue::Undefined)));
        assert_eq!(f.to_raw().unwrap_err(), HostError::NotCloneable("function"));
    }

    #[test]
    fn test_to_raw_detects_cycles() {
        let obj: ObjectRef = Arc::new(HostObject::new());
        obj.define("me", Property::data(HostValue::Object(Arc::clone(&obj))));
        let err = HostValue::Object(obj).to_raw().unwrap_err();
        assert_eq!(err, HostError::Circular(Path::parse("me")));
    }

    #[test]
    fn test_promise_settles_once_for_all_awaiters() {
        let promise = HostPromise::new(async { Ok(HostValue::from(42)) });
        let first = tokio_test::block_on(promise.settle()).unwrap();
        let second = tokio_test::block_on(promise.settle()).unwrap();
        assert_eq!(first, HostValue::from(42));
        assert_eq!(second, first);
    }

    #[test]
    fn test_function_receives_this_and_args() {
        let f = HostFunction::sync(|this, args| {
            let base = this.get("base")?.as_f64().unwrap_or_default();
            Ok(HostValue::from(base + args[0].as_f64().unwrap_or_default()))
        });
        let this = HostValue::from(HostObject::builder().value("base", 10).build());
        let result = tokio_test::block_on(f.call(this, vec![5.into()])).unwrap();
        assert_eq!(result, HostValue::from(15));
    }
}
