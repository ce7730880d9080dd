//! Host side of a remote context.
//!
//! The Host owns a live object graph and answers path-addressed requests
//! from a Work process:
//! - `HostValue` / `HostObject` - Dynamic object model with accessors and prototypes
//! - `sanitize` - Encode values as descriptor trees
//! - `HostService` - Resolve paths and apply get/set/apply/serialize
//! - `RemoteCtxHost` - Dial the Work side and reconnect on close

pub mod connection;
pub mod error;
pub mod object;
#[cfg(feature = "sample")]
pub mod sample;
pub mod sanitize;
pub mod service;
pub mod value;

pub use connection::{HostOptions, RemoteCtxHost, normalize_url};
pub use error::HostError;
pub use object::{HostObject, ObjectBuilder, ObjectRef, Property};
pub use sanitize::sanitize;
pub use service::HostService;
pub use value::{ArrayRef, Getter, HostFunction, HostPromise, HostValue, Setter};
