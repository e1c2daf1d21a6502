//! Service-manager request catalogue and client.
//!
//! Every operation is a pure dictionary builder plus one reply-expecting send
//! to the reserved service-manager endpoint. The client keeps no state
//! between calls; each call opens, uses, and closes its own connection.

mod requests;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

pub use self::requests::{
    ControlAction, RestartPolicy, ServiceRequest, control, list, load, procinfo, status, submit,
    unload,
};
use crate::codec::{DecodeReason, PartialDecode};
use crate::connection::{Connection, ConnectionOptions};
use crate::emitter::{EventHandler, LoggingHandler};
use crate::error::IpcError;
use crate::native::{Endpoint, NativeLayer};
use crate::value::{Dictionary, Value};

const SERVICE_MANAGER_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::service_manager");

const ESRCH: i64 = 3;
const EINVAL: i64 = 22;
const UNKNOWN_SERVICE: i64 = 113;

/// Client for the service-manager endpoint.
pub struct ServiceManager<'a> {
    layer: &'a dyn NativeLayer,
    endpoint: Endpoint,
    handler: Arc<dyn EventHandler>,
    timeout: Option<Duration>,
    options: ConnectionOptions,
}

impl<'a> ServiceManager<'a> {
    /// Client for the service manager at `name` in the privileged namespace.
    pub fn new(layer: &'a dyn NativeLayer, name: impl Into<String>) -> Self {
        let endpoint = Endpoint::privileged(name);
        let handler = Arc::new(LoggingHandler::new(endpoint.name()));
        Self {
            layer,
            endpoint,
            handler,
            timeout: None,
            options: ConnectionOptions::default(),
        }
    }

    /// Sets the reply timeout; `None` waits indefinitely.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection options.
    #[must_use]
    pub const fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the handler that receives unsolicited events.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Endpoint requests are sent to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Validates, sends, and interprets one catalogue request.
    ///
    /// # Errors
    ///
    /// Validation failures return before any native call. Transport,
    /// resolution, timeout, and decode failures come from the connection;
    /// a non-zero `error` code in the reply maps to [`IpcError::NotFound`],
    /// [`IpcError::InvalidArgument`], or [`IpcError::ServiceError`].
    pub fn execute(&self, request: &ServiceRequest) -> Result<Dictionary, IpcError> {
        let payload = request.to_dictionary()?;
        debug!(
            target: SERVICE_MANAGER_TARGET,
            operation = request.operation(),
            endpoint = %self.endpoint,
            "sending service-manager request"
        );
        let connection = Connection::connect(
            self.layer,
            self.endpoint.clone(),
            Arc::clone(&self.handler),
            self.options,
        );
        let reply = connection.send_with_reply(payload, self.timeout);
        connection.close();
        let reply = reply.map_err(|error| classify_reply_error(request, error))?;
        interpret_reply(request, reply)
    }

    /// Lists services, optionally filtered by label.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn list(&self, name: Option<&str>) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::List {
            name: name.map(str::to_owned),
        })
    }

    /// Starts or stops a service.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn control(&self, name: &str, action: ControlAction) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::Control {
            name: name.to_owned(),
            action,
        })
    }

    /// Loads a property-list job definition.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn load(&self, path: &str) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::Load {
            path: path.to_owned(),
        })
    }

    /// Unloads a property-list job definition.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn unload(&self, path: &str) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::Unload {
            path: path.to_owned(),
        })
    }

    /// Queries one service.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn status(&self, name: &str) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::Status {
            name: name.to_owned(),
        })
    }

    /// Describes a running process.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn procinfo(&self, pid: i64) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::ProcInfo { pid })
    }

    /// Submits a minimal job.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn submit(
        &self,
        label: &str,
        program: &str,
        restart: RestartPolicy,
    ) -> Result<Dictionary, IpcError> {
        self.execute(&ServiceRequest::Submit {
            label: label.to_owned(),
            program: program.to_owned(),
            restart,
        })
    }
}

fn classify_reply_error(request: &ServiceRequest, error: IpcError) -> IpcError {
    match error {
        IpcError::Decode(PartialDecode { errors, .. })
            if errors
                .iter()
                .any(|error| error.path.is_root() && error.reason == DecodeReason::NotADictionary) =>
        {
            IpcError::Malformed {
                operation: request.operation(),
                reason: String::from("reply is not a dictionary"),
            }
        }
        other => other,
    }
}

/// Maps the reply's `error` code onto the error taxonomy.
///
/// # Errors
///
/// Returns the mapped error for any non-zero code, and
/// [`IpcError::Malformed`] when `error` is not an integer.
pub fn interpret_reply(request: &ServiceRequest, reply: Dictionary) -> Result<Dictionary, IpcError> {
    let code = match reply.get("error") {
        None => return Ok(reply),
        Some(Value::Int64(code)) => *code,
        Some(Value::Uint64(code)) => i64::try_from(*code).unwrap_or(i64::MAX),
        Some(other) => {
            return Err(IpcError::Malformed {
                operation: request.operation(),
                reason: format!("`error` is {}, expected an integer", other.kind()),
            });
        }
    };
    match code {
        0 => Ok(reply),
        ESRCH | UNKNOWN_SERVICE => Err(IpcError::NotFound {
            target: request.target(),
        }),
        EINVAL => Err(IpcError::invalid_argument(format!(
            "service manager rejected the {} request",
            request.operation()
        ))),
        code => Err(IpcError::ServiceError {
            operation: request.operation(),
            code,
        }),
    }
}
