//! Seam between the typed connection layer and the underlying native IPC
//! facility.
//!
//! A [`NativeLayer`] opens [`NativeChannel`]s and reports asynchronous
//! activity through an [`EventSink`]. Everything above this module is
//! platform independent; the macOS backend wraps `libxpc`, other targets use
//! [`UnsupportedNative`], and tests substitute the in-memory fake.

use std::fmt;
use std::sync::{Arc, mpsc};

use crate::emitter::EventHandler;
use crate::error::{IpcError, TransportErrorKind};

#[cfg(any(test, feature = "test-support"))]
pub mod fake;
mod unsupported;
#[cfg(target_os = "macos")]
mod xpc;

pub use unsupported::UnsupportedNative;
#[cfg(target_os = "macos")]
pub use xpc::XpcNativeLayer;

/// Native object tree exchanged with the native layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeObject {
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    Uint64(u64),
    /// Double-precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Data(Vec<u8>),
    /// Dictionary entries in native iteration order.
    Dictionary(Vec<(String, NativeObject)>),
    /// Array elements.
    Array(Vec<NativeObject>),
    /// File descriptor.
    FileDescriptor(i32),
    /// Raw UUID bytes.
    Uuid([u8; 16]),
    /// A native kind with no counterpart in the value universe.
    Unsupported {
        /// Native type name, for diagnostics.
        type_name: String,
    },
}

impl NativeObject {
    /// Builds a native dictionary from key/object pairs.
    pub fn dictionary<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, NativeObject)>,
    {
        Self::Dictionary(
            entries
                .into_iter()
                .map(|(key, object)| (key.into(), object))
                .collect(),
        )
    }

    /// Native type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Int64(_) => "int64",
            Self::Uint64(_) => "uint64",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Data(_) => "data",
            Self::Dictionary(_) => "dictionary",
            Self::Array(_) => "array",
            Self::FileDescriptor(_) => "fd",
            Self::Uuid(_) => "uuid",
            Self::Unsupported { type_name } => type_name,
        }
    }

    /// Looks up a key in a native dictionary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&NativeObject> {
        match self {
            Self::Dictionary(entries) => entries
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, object)| object),
            _ => None,
        }
    }
}

/// Name-lookup namespace for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LookupNamespace {
    /// The calling user's namespace.
    #[default]
    User,
    /// The privileged system namespace.
    Privileged,
}

impl LookupNamespace {
    /// Maps the `privileged` connect flag to a namespace.
    #[must_use]
    pub const fn from_privileged(privileged: bool) -> Self {
        if privileged {
            Self::Privileged
        } else {
            Self::User
        }
    }
}

impl fmt::Display for LookupNamespace {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::User => "user",
            Self::Privileged => "privileged",
        })
    }
}

/// A named endpoint in a lookup namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    name: String,
    namespace: LookupNamespace,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(name: impl Into<String>, namespace: LookupNamespace) -> Self {
        Self {
            name: name.into(),
            namespace,
        }
    }

    /// Endpoint in the user namespace.
    pub fn user(name: impl Into<String>) -> Self {
        Self::new(name, LookupNamespace::User)
    }

    /// Endpoint in the privileged namespace.
    pub fn privileged(name: impl Into<String>) -> Self {
        Self::new(name, LookupNamespace::Privileged)
    }

    /// Endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lookup namespace.
    #[must_use]
    pub const fn namespace(&self) -> LookupNamespace {
        self.namespace
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} ({})", self.name, self.namespace)
    }
}

/// Failures reported by the native layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeFault {
    /// The endpoint could not be resolved.
    Resolution {
        /// Native diagnostic.
        reason: String,
    },
    /// The peer went away.
    Interrupted,
    /// The channel is no longer usable.
    Invalidated,
}

impl NativeFault {
    /// Converts the fault into the public error for `endpoint`.
    #[must_use]
    pub fn into_error(self, endpoint: &Endpoint) -> IpcError {
        let service = endpoint.name().to_owned();
        match self {
            Self::Resolution { reason } => IpcError::Resolution {
                service,
                namespace: endpoint.namespace(),
                reason,
            },
            Self::Interrupted => IpcError::Transport {
                service,
                kind: TransportErrorKind::Interrupted,
            },
            Self::Invalidated => IpcError::Transport {
                service,
                kind: TransportErrorKind::Invalidated,
            },
        }
    }
}

/// Asynchronous activity on a native channel.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// The channel is established.
    Ready,
    /// An unsolicited message arrived.
    Message(NativeObject),
    /// The channel reported a failure.
    Fault(NativeFault),
}

pub(crate) enum Delivery {
    Native(NativeEvent),
    Bind(Arc<dyn EventHandler>),
    Closed,
}

/// Ordered event queue handed to the native layer on open.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<Delivery>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    /// Queues an event, returning `false` once the connection stopped
    /// listening.
    pub fn post(&self, event: NativeEvent) -> bool {
        self.sender.send(Delivery::Native(event)).is_ok()
    }

    /// Hands `handler` to the delivery thread behind every queued event.
    pub(crate) fn bind(&self, handler: Arc<dyn EventHandler>) -> bool {
        self.sender.send(Delivery::Bind(handler)).is_ok()
    }

    pub(crate) fn close(&self) -> bool {
        self.sender.send(Delivery::Closed).is_ok()
    }
}

/// One-shot reply slot for a reply-expecting send.
#[derive(Debug, Clone)]
pub struct ReplySink {
    sender: mpsc::SyncSender<Result<NativeObject, NativeFault>>,
}

impl ReplySink {
    pub(crate) fn channel() -> (
        Self,
        mpsc::Receiver<Result<NativeObject, NativeFault>>,
    ) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (Self { sender }, receiver)
    }

    /// Delivers the reply. Only the first delivery is observed; later ones
    /// and deliveries after the caller gave up are discarded.
    pub fn deliver(&self, reply: Result<NativeObject, NativeFault>) -> bool {
        self.sender.try_send(reply).is_ok()
    }
}

/// Factory for native channels.
pub trait NativeLayer: Send + Sync {
    /// Opens a channel to `endpoint`. Failures, including resolution
    /// failures, are reported asynchronously through `events`.
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn NativeChannel>;
}

impl<T: NativeLayer + ?Sized> NativeLayer for std::sync::Arc<T> {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn NativeChannel> {
        (**self).open(endpoint, events)
    }
}

impl<T: NativeLayer + ?Sized> NativeLayer for Box<T> {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn NativeChannel> {
        (**self).open(endpoint, events)
    }
}

/// An open native channel.
pub trait NativeChannel: Send {
    /// Sends a message without awaiting a reply.
    fn send(&mut self, message: NativeObject);
    /// Sends a message and arranges for the reply to reach `reply`.
    fn send_with_reply(&mut self, message: NativeObject, reply: ReplySink);
    /// Cancels the channel. Calling it more than once has no effect.
    fn cancel(&mut self);
}

/// Native layer for the current platform.
#[must_use]
pub fn system_layer() -> Box<dyn NativeLayer> {
    #[cfg(target_os = "macos")]
    {
        Box::new(XpcNativeLayer)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Box::new(UnsupportedNative)
    }
}
