//! Host objects: ordered property tables with accessors and a prototype link.

use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use indexmap::IndexMap;

use crate::{
    HostError,
    value::{Getter, HostFunction, HostValue, Setter},
};

pub type ObjectRef = Arc<HostObject>;

/// A single property slot.
#[derive(Clone)]
pub enum Property {
    Data {
        value: HostValue,
        enumerable: bool,
        configurable: bool,
        writable: bool,
    },
    Accessor {
        get: Option<Getter>,
        set: Option<Setter>,
        enumerable: bool,
        configurable: bool,
    },
}

impl Property {
    /// Plain writable, enumerable, configurable data property.
    pub fn data(value: impl Into<HostValue>) -> Self {
        Self::Data {
            value: value.into(),
            enumerable: true,
            configurable: true,
            writable: true,
        }
    }

    /// Getter-only accessor.
    pub fn getter<G>(get: G) -> Self
    where
        G: Fn(&HostValue) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        Self::Accessor {
            get: Some(Arc::new(get)),
            set: None,
            enumerable: true,
            configurable: true,
        }
    }

    /// Accessor with both halves.
    pub fn accessor<G, S>(get: G, set: S) -> Self
    where
        G: Fn(&HostValue) -> Result<HostValue, HostError> + Send + Sync + 'static,
        S: Fn(&HostValue, HostValue) -> Result<(), HostError> + Send + Sync + 'static,
    {
        Self::Accessor {
            get: Some(Arc::new(get)),
            set: Some(Arc::new(set)),
            enumerable: true,
            configurable: true,
        }
    }

    /// Same property, non-enumerable.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        match &mut self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable = false,
        }
        self
    }

    /// Same property, non-writable. No effect on accessors.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        if let Self::Data { writable, .. } = &mut self {
            *writable = false;
        }
        self
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

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data {
                value,
                enumerable,
                configurable,
                writable,
            } => f
                .debug_struct("Data")
                .field("value", value)
                .field("enumerable", enumerable)
                .field("configurable", configurable)
                .field("writable", writable)
                .finish(),
            Self::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => f
                .debug_struct("Accessor")
                .field("get", &get.is_some())
                .field("set", &set.is_some())
                .field("enumerable", enumerable)
                .field("configurable", configurable)
                .finish(),
        }
    }
}

/// Object with insertion-ordered own properties and an optional prototype.
#[derive(Default)]
pub struct HostObject {
    properties: RwLock<IndexMap<String, Property>>,
    prototype: Option<ObjectRef>,
}

impl HostObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prototype(prototype: ObjectRef) -> Self {
        Self {
            properties: RwLock::default(),
            prototype: Some(prototype),
        }
    }

    #[must_use]
    pub fn builder() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    #[must_use]
    pub const fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    /// Define or replace an own property.
    pub fn define(&self, key: impl Into<String>, property: Property) {
        self.write().insert(key.into(), property);
    }

    #[must_use]
    pub fn own_property(&self, key: &str) -> Option<Property> {
        self.read().get(key).cloned()
    }

    /// Snapshot of own properties in definition order.
    #[must_use]
    pub fn own_properties(&self) -> Vec<(String, Property)> {
        self.read()
            .iter()
            .map(|(key, property)| (key.clone(), property.clone()))
            .collect()
    }

    #[must_use]
    pub fn own_keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Nearest property named `key` on the prototype chain, and whether it is own.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<(Property, bool)> {
        if let Some(property) = self.own_property(key) {
            return Some((property, true));
        }
        let mut next = self.prototype.clone();
        while let Some(object) = next {
            if let Some(property) = object.own_property(key) {
                return Some((property, false));
            }
            next = object.prototype.clone();
        }
        None
    }

    /// Property read with `receiver` as `this` for getters.
    ///
    /// # Errors
    /// Returns the getter's error.
    pub fn get_with_receiver(&self, key: &str, receiver: &HostValue) -> Result<HostValue, HostError> {
        match self.find(key) {
            Some((Property::Data { value, .. }, _)) => Ok(value),
            Some((Property::Accessor { get: Some(get), .. }, _)) => get(receiver),
            Some((Property::Accessor { get: None, .. }, _)) | None => Ok(HostValue::Undefined),
        }
    }

    /// Strict-mode assignment with `receiver` as `this` for setters.
    ///
    /// # Errors
    /// Returns error for read-only data properties, getter-only accessors,
    /// or a failing setter.
    pub fn set_with_receiver(
        &self,
        key: &str,
        value: HostValue,
        receiver: &HostValue,
    ) -> Result<(), HostError> {
        match self.find(key) {
            Some((Property::Data { writable: false, .. }, _)) => {
                Err(HostError::ReadOnly(key.to_owned()))
            }
            Some((Property::Accessor { set: Some(set), .. }, _)) => set(receiver, value),
            Some((Property::Accessor { set: None, .. }, _)) => {
                Err(HostError::GetterOnly(key.to_owned()))
            }
            Some((Property::Data { .. }, true)) => {
                if let Some(Property::Data { value: slot, .. }) = self.write().get_mut(key) {
                    *slot = value;
                }
                Ok(())
            }
            Some((Property::Data { .. }, false)) | None => {
                self.define(key, Property::data(value));
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn into_value(self) -> HostValue {
        HostValue::Object(Arc::new(self))
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Property>> {
        self.properties.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Property>> {
        self.properties.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostObject")
            .field("keys", &self.own_keys())
            .field("has_prototype", &self.prototype.is_some())
            .finish()
    }
}

/// Fluent construction of a `HostObject`.
#[derive(Default)]
pub struct ObjectBuilder {
    properties: IndexMap<String, Property>,
    prototype: Option<ObjectRef>,
}

impl ObjectBuilder {
    /// Plain data property.
    #[must_use]
    pub fn value(self, key: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.property(key, Property::data(value))
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, property: Property) -> Self {
        self.properties.insert(key.into(), property);
        self
    }

    /// Synchronous method `(this, args)`.
    #[must_use]
    pub fn method<F>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HostValue, &[HostValue]) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        self.value(key, HostFunction::sync(f))
    }

    /// Async method `(this, args)`.
    #[must_use]
    pub fn async_method<F, Fut>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(HostValue, Vec<HostValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HostValue, HostError>> + Send + 'static,
    {
        self.value(key, HostFunction::new(f))
    }

    #[must_use]
    pub fn getter<G>(self, key: impl Into<String>, get: G) -> Self
    where
        G: Fn(&HostValue) -> Result<HostValue, HostError> + Send + Sync + 'static,
    {
        self.property(key, Property::getter(get))
    }

    #[must_use]
    pub fn accessor<G, S>(self, key: impl Into<String>, get: G, set: S) -> Self
    where
        G: Fn(&HostValue) -> Result<HostValue, HostError> + Send + Sync + 'static,
        S: Fn(&HostValue, HostValue) -> Result<(), HostError> + Send + Sync + 'static,
    {
        self.property(key, Property::accessor(get, set))
    }

    #[must_use]
    pub fn prototype(mut self, prototype: ObjectRef) -> Self {
        self.prototype = Some(prototype);
        self
    }

    #[must_use]
    pub fn build(self) -> HostObject {
        HostObject {
            properties: RwLock::new(self.properties),
            prototype: self.prototype,
        }
    }

    #[must_use]
    pub fn into_ref(self) -> ObjectRef {
        Arc::new(self.build())
    }

    #[must_use]
    pub fn into_value(self) -> HostValue {
        HostValue::Object(self.into_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> HostValue {
        HostObject::builder()
            .value("_n", 1)
            .accessor(
                "n",
                |this| this.get("_n"),
                |this, value| this.set("_n", value),
            )
            .into_value()
    }

    #[test]
    fn test_accessor_uses_receiver() {
        let obj = counter();
        assert_eq!(obj.get("n").unwrap(), HostValue::from(1));
        obj.set("n", 7.into()).unwrap();
        assert_eq!(obj.get("_n").unwrap(), HostValue::from(7));
    }

    #[test]
    fn test_inherited_getter_sees_instance() {
        let proto = HostObject::builder()
            .getter("double", |this| {
                let n = this.get("n")?.as_f64().unwrap_or_default();
                Ok(HostValue::from(n * 2.0))
            })
            .into_ref();
        let instance = HostObject::builder().value("n", 4).prototype(proto).into_value();
        assert_eq!(instance.get("double").unwrap(), HostValue::from(8));
    }

    #[test]
    fn test_assignment_shadows_inherited_data() {
        let proto = HostObject::builder().value("x", 1).into_ref();
        let instance = HostObject::with_prototype(Arc::clone(&proto)).into_value();
        instance.set("x", 2.into()).unwrap();
        assert_eq!(instance.get("x").unwrap(), HostValue::from(2));
        assert_eq!(proto.own_property("x").map(|p| p.enumerable()), Some(true));
        assert_eq!(HostValue::Object(proto).get("x").unwrap(), HostValue::from(1));
    }

    #[test]
    fn test_strict_assignment_errors() {
        let obj = HostObject::builder()
            .property("fixed", Property::data(1).read_only())
            .getter("g", |_| Ok(HostValue::Null))
            .into_value();
        assert_eq!(
            obj.set("fixed", 2.into()).unwrap_err(),
            HostError::ReadOnly("fixed".into())
        );
        assert_eq!(
            obj.set("g", 2.into()).unwrap_err(),
            HostError::GetterOnly("g".into())
        );
    }

    #[test]
    fn test_hidden_keeps_key_order() {
        let obj = HostObject::builder()
            .value("a", 1)
            .property("b", Property::data(2).hidden())
            .value("c", 3)
            .build();
        assert_eq!(obj.own_keys(), ["a", "b", "c"]);
        assert!(!obj.own_property("b").unwrap().enumerable());
    }
}
