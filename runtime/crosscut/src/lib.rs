//! Dynamic scoping for Rust call chains.
//!
//! A value bound inside one running function can be retrieved by anything
//! that function transitively calls, without threading it through the
//! signatures in between and without process-wide mutable state.
//!
//! # Pieces
//!
//! - [`Receiver`]: a queryable slot with a zero-argument default producer.
//! - [`ExportFn`] + [`bind_exports`]: a function whose declared locals are
//!   exported to receivers for the duration of each call.
//! - [`chain`]: the per-thread activation chain that [`Receiver::get`] walks,
//!   innermost first, for the nearest bound export.
//!
//! # Example
//!
//! ```text
//! let current_request: Receiver<Request, NoRequest> =
//!     Receiver::new("current_request", || Err(NoRequest));
//!
//! let wsgi_app = ExportFn::new(
//!     FnSig::new("wsgi_app").params(["environ"]).locals(["request"]),
//!     |frame: &Frame, environ: Environ| -> Result<Response, CrosscutError> {
//!         frame.set("request", Request::new(environ))?;
//!         Ok(frame.call(render))   // render() calls current_request.get()
//!     },
//! )
//! .bind_exports(&ExportMap::new().export("request", &current_request))?;
//! ```
//!
//! # Threads
//!
//! Each thread has its own chain. Receivers and exporting functions are
//! `Send + Sync` and may be shared; the values exported on one thread are
//! never visible on another.
//!
//! # Cost
//!
//! A lookup walks every activation between the call site and the nearest
//! match. Re-exporting closer to the point of use shortens the walk.

pub mod chain;
mod errors;
mod export;
mod receiver;
mod signature;
mod tracing_setup;

pub use errors::CrosscutError;
pub use export::{bind_exports, ExportFn, ExportMap, Frame};
pub use receiver::{register_receiver, ExportTarget, Receiver, ReceiverId, Registry, ValueType};
pub use signature::FnSig;
pub use tracing_setup::init_tracing;
