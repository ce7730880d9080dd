//! Host value to descriptor tree.

use std::sync::Arc;

use indexmap::IndexMap;
use remote_ctx_core::{AccessorMarker, Descriptor, Marker, Path, PropertyDescriptor, RefKind};

use crate::{
    object::{HostObject, Property},
    value::HostValue,
};

/// Encode `value`, found at `path`, as a descriptor tree.
///
/// Functions and promises become proxy references to their own path.
/// Objects are mirrored property by property up the prototype chain, with
/// nearer definitions winning and `constructor` left out. Accessors are not
/// invoked; they become getter/setter markers addressed by the property path.
///
/// An object or array reached again while it is still being encoded becomes
/// an `object` proxy reference to the path where it was met.
#[must_use]
pub fn sanitize(value: &HostValue, path: &Path) -> Descriptor {
    Sanitizer::default().encode(value, path)
}

#[derive(Default)]
struct Sanitizer {
    stack: Vec<*const ()>,
}

impl Sanitizer {
    fn encode(&mut self, value: &HostValue, path: &Path) -> Descriptor {
        match value {
            HostValue::Undefined => Descriptor::undefined(),
            HostValue::Null => Descriptor::Null,
            HostValue::Bool(b) => Descriptor::Bool(*b),
            HostValue::Number(n) => Descriptor::Number(*n),
            HostValue::String(s) => Descriptor::String(s.clone()),
            HostValue::Function(_) => Descriptor::proxy_ref(RefKind::Function, path.clone()),
            HostValue::Promise(_) => Descriptor::proxy_ref(RefKind::Promise, path.clone()),
            HostValue::Array(items) => {
                let ptr = items.as_ptr();
                if self.stack.contains(&ptr) {
                    return Descriptor::proxy_ref(RefKind::Object, path.clone());
                }
                self.stack.push(ptr);
                let encoded = items
                    .snapshot()
                    .iter()
                    .enumerate()
                    .map(|(index, item)| self.encode(item, &path.index(index)))
                    .collect();
                self.stack.pop();
                Descriptor::Array(encoded)
            }
            HostValue::Object(obj) => {
                let ptr = Arc::as_ptr(obj).cast();
                if self.stack.contains(&ptr) {
                    return Descriptor::proxy_ref(RefKind::Object, path.clone());
                }
                self.stack.push(ptr);
                let descriptors = self.encode_object(obj, path);
                self.stack.pop();
                Descriptor::Marker(Marker::ObjectDescriptor { descriptors })
            }
        }
    }

    fn encode_object(&mut self, obj: &HostObject, path: &Path) -> IndexMap<String, PropertyDescriptor> {
        let mut descriptors = IndexMap::new();
        let mut level = Some(obj);
        while let Some(current) = level {
            for (key, property) in current.own_properties() {
                if key == "constructor" || descriptors.contains_key(&key) {
                    continue;
                }
                let child = path.child(key.as_str());
                let descriptor = match property {
                    Property::Data {
                        value,
                        enumerable,
                        configurable,
                        writable,
                    } => PropertyDescriptor::Data {
                        configurable,
                        enumerable,
                        writable,
                        value: self.encode(&value, &child),
                    },
                    Property::Accessor {
                        get,
                        set,
                        enumerable,
                        configurable,
                    } => PropertyDescriptor::Accessor {
                        configurable,
                        enumerable,
                        get: get.map(|_| AccessorMarker::RemoteGetter { path: child.clone() }),
                        set: set.map(|_| AccessorMarker::RemoteSetter { path: child }),
                    },
                };
                descriptors.insert(key, descriptor);
            }
            level = current.prototype().map(|proto| &**proto);
        }
        descriptors
    }
}
