//! Work side of a remote context.
//!
//! The Work process listens for a Host connection and reads, writes and
//! calls into the Host's object graph with ordinary blocking calls:
//!
//! ```no_run
//! use remote_ctx_work::{RemoteCtx, RemoteCtxOptions};
//!
//! let ctx = RemoteCtx::new(RemoteCtxOptions::default())?;
//! println!("listening on {}", ctx.port());
//! ctx.ready()?;
//!
//! let host = ctx.host();
//! let title = host.read("title")?;
//! let sum = host.read("calc")?.invoke(&[1.into(), 2.into()])?;
//! host.write("num", 5)?;
//! # Ok::<(), remote_ctx_work::RemoteError>(())
//! ```
//!
//! Every call blocks the current thread until the Host replies. Do not call
//! into a `RemoteCtx` from inside an async runtime.

mod ctx;
mod error;
mod gate;
mod hydrate;
mod listener;
mod proxy;

pub use ctx::{RemoteCtx, RemoteCtxOptions};
pub use error::RemoteError;
pub use hydrate::{Hydrated, HydratedProperty, RemoteAccessor, RemoteObject};
pub use proxy::RemoteProxy;
pub use remote_ctx_core::{Path, RefKind};
