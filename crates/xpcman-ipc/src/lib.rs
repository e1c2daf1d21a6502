//! Typed client layer over the host's inter-process messaging facility.
#![deny(missing_docs)]
//!
//! Payloads are [`Dictionary`] values drawn from a closed type universe and
//! converted to native objects by [`codec`]. A [`Connection`] targets a named
//! endpoint in the user or privileged namespace and delivers asynchronous
//! traffic to a single bound [`EventHandler`] in arrival order. The
//! [`service_manager`] module builds the fixed catalogue of service-manager
//! requests on top of reply-expecting sends.
//!
//! The native facility sits behind the [`native::NativeLayer`] trait so the
//! whole stack runs against an in-memory fake in tests.

pub mod codec;
pub mod connection;
mod emitter;
mod error;
pub mod native;
pub mod service_manager;
mod value;

pub use codec::{DecodeError, DecodeReason, KeyPath, PartialDecode};
pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use emitter::{EventHandler, LoggingHandler};
pub use error::{IpcError, TransportErrorKind};
pub use native::{Endpoint, LookupNamespace};
pub use service_manager::{ControlAction, RestartPolicy, ServiceManager, ServiceRequest};
pub use value::{Dictionary, Handle, Value};

#[cfg(test)]
mod tests;
