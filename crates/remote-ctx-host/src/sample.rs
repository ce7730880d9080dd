//! Reference object graph for demos and end-to-end tests.

use std::time::Duration;

use crate::{
    HostError,
    object::{HostObject, ObjectRef, Property},
    value::{HostPromise, HostValue},
};

fn number_arg(args: &[HostValue], index: usize) -> f64 {
    args.get(index).and_then(HostValue::as_f64).unwrap_or(f64::NAN)
}

fn leaf() -> HostValue {
    HostObject::builder().value("v", 1).into_value()
}

/// `Base` with a `name` getter, extended by `A` which adds `age`.
fn class_instance() -> HostValue {
    let base_proto = HostObject::builder()
        .method("constructor", |_, _| Ok(HostValue::Undefined))
        .property("name", Property::getter(|_| Ok("name1".into())).hidden())
        .into_ref();
    let a_proto: ObjectRef = HostObject::builder()
        .method("constructor", |_, _| Ok(HostValue::Undefined))
        .prototype(base_proto)
        .into_ref();
    HostObject::builder().value("age", 1).prototype(a_proto).into_value()
}

/// Environment with primitives, methods, accessors, hidden properties and a
/// class instance.
#[must_use]
pub fn sample_env() -> HostObject {
    HostObject::builder()
        .value("title", "Remote World")
        .value("num", 0)
        .method("calc", |_, args| Ok((number_arg(args, 0) + number_arg(args, 1)).into()))
        .value(
            "nested",
            HostObject::builder()
                .value("flag", true)
                .method("echo", |_, args| Ok(args.first().cloned().unwrap_or_default()))
                .into_value(),
        )
        .async_method("asyncFn", |_, args| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, HostError>(HostValue::from(number_arg(&args, 0) * 2.0))
        })
        .value("_getter_value", 0)
        .accessor(
            "getter",
            |this| this.get("_getter_value"),
            |this, value| this.set("_getter_value", value),
        )
        .getter("o1", |_| Ok(HostObject::builder().value("t1", 1).into_value()))
        .getter("o2", |_| {
            Ok(HostObject::builder().getter("z1", |_| Ok(leaf())).into_value())
        })
        .property(
            "o3",
            Property::getter(|_| {
                Ok(HostObject::builder()
                    .value("a", class_instance())
                    .property("z1", Property::getter(|_| Ok(leaf())).hidden())
                    .into_value())
            })
            .hidden(),
        )
        .value("pending", HostPromise::resolve(42.into()))
        .value("list", vec![HostValue::from(1), HostValue::from(2), HostValue::from(3)])
        .build()
}
