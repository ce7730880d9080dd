//! Core types shared by both ends of a remote context.
//!
//! Provides:
//! - `Path` - Segment addressing into the Host's object graph
//! - `Descriptor` - Wire encoding of sanitized Host values
//! - `PropertyDescriptor` - Data/accessor property mirrors

pub mod descriptor;
pub mod path;

pub use descriptor::{
    AccessorMarker, Descriptor, Marker, PropertyDescriptor, RefKind, number_to_json,
};
pub use path::{MAX_ARRAY_INDEX, MAX_DENSE_LENGTH, Path, array_index};
