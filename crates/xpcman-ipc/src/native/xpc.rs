//! `libxpc` backend.
//!
//! Message trees are converted to and from `xpc_object_t` at the boundary so
//! no native object outlives a call. Connection handlers run on the default
//! XPC target queue and only forward events into the [`EventSink`].

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use block2::{Block, RcBlock, StackBlock};
use tracing::{debug, warn};

use super::{
    Endpoint, EventSink, LookupNamespace, NativeChannel, NativeEvent, NativeFault, NativeLayer,
    NativeObject, ReplySink,
};

type XpcObjectT = *mut c_void;
type XpcTypeT = *const c_void;
type DispatchQueueT = *mut c_void;

const XPC_CONNECTION_MACH_SERVICE_PRIVILEGED: u64 = 1 << 1;
const XPC_ERROR_KEY_DESCRIPTION: &CStr = c"XPCErrorDescription";

#[repr(C)]
struct OpaqueType {
    _private: [u8; 0],
}

unsafe extern "C" {
    static _xpc_type_int64: OpaqueType;
    static _xpc_type_uint64: OpaqueType;
    static _xpc_type_double: OpaqueType;
    static _xpc_type_bool: OpaqueType;
    static _xpc_type_string: OpaqueType;
    static _xpc_type_data: OpaqueType;
    static _xpc_type_dictionary: OpaqueType;
    static _xpc_type_array: OpaqueType;
    static _xpc_type_fd: OpaqueType;
    static _xpc_type_uuid: OpaqueType;
    static _xpc_type_error: OpaqueType;
    static _xpc_error_connection_interrupted: OpaqueType;
    static _xpc_error_connection_invalid: OpaqueType;

    fn xpc_connection_create_mach_service(
        name: *const c_char,
        targetq: DispatchQueueT,
        flags: u64,
    ) -> XpcObjectT;
    fn xpc_connection_set_event_handler(
        connection: XpcObjectT,
        handler: &Block<dyn Fn(XpcObjectT)>,
    );
    fn xpc_connection_resume(connection: XpcObjectT);
    fn xpc_connection_cancel(connection: XpcObjectT);
    fn xpc_connection_send_message(connection: XpcObjectT, message: XpcObjectT);
    fn xpc_connection_send_message_with_reply(
        connection: XpcObjectT,
        message: XpcObjectT,
        replyq: DispatchQueueT,
        handler: &Block<dyn Fn(XpcObjectT)>,
    );

    fn xpc_release(object: XpcObjectT);
    fn xpc_get_type(object: XpcObjectT) -> XpcTypeT;
    fn xpc_type_get_name(object_type: XpcTypeT) -> *const c_char;

    fn xpc_int64_create(value: i64) -> XpcObjectT;
    fn xpc_int64_get_value(object: XpcObjectT) -> i64;
    fn xpc_uint64_create(value: u64) -> XpcObjectT;
    fn xpc_uint64_get_value(object: XpcObjectT) -> u64;
    fn xpc_double_create(value: f64) -> XpcObjectT;
    fn xpc_double_get_value(object: XpcObjectT) -> f64;
    fn xpc_bool_create(value: bool) -> XpcObjectT;
    fn xpc_bool_get_value(object: XpcObjectT) -> bool;
    fn xpc_string_create(string: *const c_char) -> XpcObjectT;
    fn xpc_string_get_string_ptr(object: XpcObjectT) -> *const c_char;
    fn xpc_data_create(bytes: *const c_void, length: usize) -> XpcObjectT;
    fn xpc_data_get_bytes_ptr(object: XpcObjectT) -> *const c_void;
    fn xpc_data_get_length(object: XpcObjectT) -> usize;
    fn xpc_fd_create(fd: c_int) -> XpcObjectT;
    fn xpc_fd_dup(object: XpcObjectT) -> c_int;
    fn xpc_uuid_create(uuid: *const u8) -> XpcObjectT;
    fn xpc_uuid_get_bytes(object: XpcObjectT) -> *const u8;

    fn xpc_dictionary_create_empty() -> XpcObjectT;
    fn xpc_dictionary_set_value(dictionary: XpcObjectT, key: *const c_char, value: XpcObjectT);
    fn xpc_dictionary_get_string(dictionary: XpcObjectT, key: *const c_char) -> *const c_char;
    fn xpc_dictionary_apply(
        dictionary: XpcObjectT,
        applier: &Block<dyn Fn(*const c_char, XpcObjectT) -> bool + '_>,
    ) -> bool;

    fn xpc_array_create_empty() -> XpcObjectT;
    fn xpc_array_append_value(array: XpcObjectT, value: XpcObjectT);
    fn xpc_array_get_count(array: XpcObjectT) -> usize;
    fn xpc_array_get_value(array: XpcObjectT, index: usize) -> XpcObjectT;
}

fn type_pointer(object_type: &'static OpaqueType) -> XpcTypeT {
    ptr::from_ref(object_type).cast()
}

fn is_error(object: XpcObjectT, sentinel: &'static OpaqueType) -> bool {
    ptr::eq(object.cast_const().cast::<OpaqueType>(), sentinel)
}

/// Native layer backed by `libxpc` Mach-service connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct XpcNativeLayer;

impl NativeLayer for XpcNativeLayer {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn NativeChannel> {
        let Ok(name) = CString::new(endpoint.name()) else {
            events.post(NativeEvent::Fault(NativeFault::Resolution {
                reason: String::from("endpoint name contains a NUL byte"),
            }));
            return Box::new(XpcChannel::detached());
        };
        let flags = match endpoint.namespace() {
            LookupNamespace::Privileged => XPC_CONNECTION_MACH_SERVICE_PRIVILEGED,
            LookupNamespace::User => 0,
        };

        // SAFETY: `name` is a valid C string for the duration of the call and
        // a null queue selects the default target queue.
        let connection =
            unsafe { xpc_connection_create_mach_service(name.as_ptr(), ptr::null_mut(), flags) };
        if connection.is_null() {
            events.post(NativeEvent::Fault(NativeFault::Resolution {
                reason: String::from("xpc_connection_create_mach_service returned null"),
            }));
            return Box::new(XpcChannel::detached());
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let handler = event_handler(events, Arc::clone(&cancelled));
        // SAFETY: `connection` is a live connection object; the handler block
        // is copied by libxpc before the call returns.
        unsafe {
            xpc_connection_set_event_handler(connection, &handler);
            xpc_connection_resume(connection);
        }
        debug!(endpoint = %endpoint, "xpc connection resumed");

        Box::new(XpcChannel {
            connection: RawConnection(connection),
            cancelled,
        })
    }
}

fn event_handler(events: EventSink, cancelled: Arc<AtomicBool>) -> RcBlock<dyn Fn(XpcObjectT)> {
    let seen_message = AtomicBool::new(false);
    RcBlock::new(move |event: XpcObjectT| {
        let native_event = if let Some(fault) = classify_error(event) {
            let unresolved = fault == NativeFault::Invalidated
                && !seen_message.load(Ordering::Acquire)
                && !cancelled.load(Ordering::Acquire);
            if unresolved {
                // A Mach-service connection that is invalidated before any
                // traffic was never looked up successfully.
                NativeEvent::Fault(NativeFault::Resolution {
                    reason: error_description(event),
                })
            } else {
                NativeEvent::Fault(fault)
            }
        } else {
            seen_message.store(true, Ordering::Release);
            // SAFETY: libxpc hands the handler a live object for the
            // duration of the invocation.
            NativeEvent::Message(unsafe { from_xpc(event) })
        };
        if !events.post(native_event) {
            debug!("xpc event dropped after the connection stopped listening");
        }
    })
}

fn classify_error(object: XpcObjectT) -> Option<NativeFault> {
    // SAFETY: the sentinel statics are provided by libxpc.
    unsafe {
        if is_error(object, &_xpc_error_connection_interrupted) {
            Some(NativeFault::Interrupted)
        } else if is_error(object, &_xpc_error_connection_invalid) {
            Some(NativeFault::Invalidated)
        } else if xpc_get_type(object) == type_pointer(&_xpc_type_error) {
            Some(NativeFault::Invalidated)
        } else {
            None
        }
    }
}

fn error_description(object: XpcObjectT) -> String {
    // SAFETY: error objects are dictionaries; the returned pointer is owned
    // by `object` and copied before it is released.
    unsafe {
        let description = xpc_dictionary_get_string(object, XPC_ERROR_KEY_DESCRIPTION.as_ptr());
        if description.is_null() {
            String::from("connection invalidated")
        } else {
            CStr::from_ptr(description).to_string_lossy().into_owned()
        }
    }
}

struct RawConnection(XpcObjectT);

// SAFETY: XPC connections are reference-counted and safe to message from any
// thread.
unsafe impl Send for RawConnection {}

struct XpcChannel {
    connection: RawConnection,
    cancelled: Arc<AtomicBool>,
}

impl XpcChannel {
    fn detached() -> Self {
        Self {
            connection: RawConnection(ptr::null_mut()),
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }

    fn is_usable(&self) -> bool {
        !self.connection.0.is_null() && !self.cancelled.load(Ordering::Acquire)
    }
}

impl NativeChannel for XpcChannel {
    fn send(&mut self, message: NativeObject) {
        if !self.is_usable() {
            warn!("dropping message for a cancelled xpc connection");
            return;
        }
        // SAFETY: the connection is live until `cancel`; the message object
        // is released after libxpc has retained it.
        unsafe {
            let Some(object) = to_xpc(&message) else {
                warn!("dropping message with a NUL byte in a key or string");
                return;
            };
            xpc_connection_send_message(self.connection.0, object);
            xpc_release(object);
        }
    }

    fn send_with_reply(&mut self, message: NativeObject, reply: ReplySink) {
        if !self.is_usable() {
            reply.deliver(Err(NativeFault::Invalidated));
            return;
        }
        // SAFETY: the built object is released on every path below.
        let Some(object) = (unsafe { to_xpc(&message) }) else {
            warn!("rejecting message with a NUL byte in a key or string");
            reply.deliver(Err(NativeFault::Invalidated));
            return;
        };
        let handler = RcBlock::new(move |object: XpcObjectT| {
            let outcome = match classify_error(object) {
                Some(fault) => Err(fault),
                // SAFETY: the reply object is live for the invocation.
                None => Ok(unsafe { from_xpc(object) }),
            };
            reply.deliver(outcome);
        });
        // SAFETY: as for `send`; libxpc copies the reply block.
        unsafe {
            xpc_connection_send_message_with_reply(
                self.connection.0,
                object,
                ptr::null_mut(),
                &handler,
            );
            xpc_release(object);
        }
    }

    fn cancel(&mut self) {
        if self.connection.0.is_null() || self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: the connection is live and cancelled exactly once; the
        // final reference is dropped here.
        unsafe {
            xpc_connection_cancel(self.connection.0);
            xpc_release(self.connection.0);
        }
        self.connection = RawConnection(ptr::null_mut());
    }
}

impl Drop for XpcChannel {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Builds a retained XPC object for `object`, or `None` when a key or string
/// contains a NUL byte.
///
/// # Safety
///
/// The caller owns the returned object and must release it.
unsafe fn to_xpc(object: &NativeObject) -> Option<XpcObjectT> {
    unsafe {
        let built = match object {
            NativeObject::Int64(value) => xpc_int64_create(*value),
            NativeObject::Uint64(value) => xpc_uint64_create(*value),
            NativeObject::Double(value) => xpc_double_create(*value),
            NativeObject::Bool(value) => xpc_bool_create(*value),
            NativeObject::String(value) => {
                let text = CString::new(value.as_str()).ok()?;
                xpc_string_create(text.as_ptr())
            }
            NativeObject::Data(bytes) => xpc_data_create(bytes.as_ptr().cast(), bytes.len()),
            NativeObject::Dictionary(entries) => {
                let dictionary = xpc_dictionary_create_empty();
                for (key, value) in entries {
                    let child = CString::new(key.as_str())
                        .ok()
                        .and_then(|key| to_xpc(value).map(|child| (key, child)));
                    let Some((key, child)) = child else {
                        xpc_release(dictionary);
                        return None;
                    };
                    xpc_dictionary_set_value(dictionary, key.as_ptr(), child);
                    xpc_release(child);
                }
                dictionary
            }
            NativeObject::Array(items) => {
                let array = xpc_array_create_empty();
                for item in items {
                    let Some(child) = to_xpc(item) else {
                        xpc_release(array);
                        return None;
                    };
                    xpc_array_append_value(array, child);
                    xpc_release(child);
                }
                array
            }
            // libxpc duplicates the descriptor; the caller keeps ownership of
            // `fd`.
            NativeObject::FileDescriptor(fd) => xpc_fd_create(*fd),
            NativeObject::Uuid(bytes) => xpc_uuid_create(bytes.as_ptr()),
            NativeObject::Unsupported { .. } => xpc_dictionary_create_empty(),
        };
        Some(built)
    }
}

/// Copies an XPC object tree into a [`NativeObject`].
///
/// # Safety
///
/// `object` must be a live XPC object.
unsafe fn from_xpc(object: XpcObjectT) -> NativeObject {
    unsafe {
        let object_type = xpc_get_type(object);
        if object_type == type_pointer(&_xpc_type_int64) {
            NativeObject::Int64(xpc_int64_get_value(object))
        } else if object_type == type_pointer(&_xpc_type_uint64) {
            NativeObject::Uint64(xpc_uint64_get_value(object))
        } else if object_type == type_pointer(&_xpc_type_double) {
            NativeObject::Double(xpc_double_get_value(object))
        } else if object_type == type_pointer(&_xpc_type_bool) {
            NativeObject::Bool(xpc_bool_get_value(object))
        } else if object_type == type_pointer(&_xpc_type_string) {
            let text = xpc_string_get_string_ptr(object);
            match CStr::from_ptr(text).to_str() {
                Ok(text) => NativeObject::String(text.to_owned()),
                Err(_) => invalid_utf8("string"),
            }
        } else if object_type == type_pointer(&_xpc_type_data) {
            let length = xpc_data_get_length(object);
            let bytes = xpc_data_get_bytes_ptr(object).cast::<u8>();
            if bytes.is_null() || length == 0 {
                NativeObject::Data(Vec::new())
            } else {
                NativeObject::Data(std::slice::from_raw_parts(bytes, length).to_vec())
            }
        } else if object_type == type_pointer(&_xpc_type_dictionary) {
            let entries = std::cell::RefCell::new(Vec::new());
            let applier = StackBlock::new(|key: *const c_char, value: XpcObjectT| {
                let key = CStr::from_ptr(key);
                let entry = match key.to_str() {
                    Ok(key) => (key.to_owned(), from_xpc(value)),
                    // The lossy key only names the location of the error.
                    Err(_) => (key.to_string_lossy().into_owned(), invalid_utf8("key")),
                };
                entries.borrow_mut().push(entry);
                true
            });
            xpc_dictionary_apply(object, &applier);
            NativeObject::Dictionary(entries.into_inner())
        } else if object_type == type_pointer(&_xpc_type_array) {
            let count = xpc_array_get_count(object);
            NativeObject::Array(
                (0..count)
                    .map(|index| from_xpc(xpc_array_get_value(object, index)))
                    .collect(),
            )
        } else if object_type == type_pointer(&_xpc_type_fd) {
            // The duplicate belongs to whoever receives the decoded value.
            NativeObject::FileDescriptor(xpc_fd_dup(object))
        } else if object_type == type_pointer(&_xpc_type_uuid) {
            let bytes = xpc_uuid_get_bytes(object);
            let mut uuid = [0_u8; 16];
            if !bytes.is_null() {
                uuid.copy_from_slice(std::slice::from_raw_parts(bytes, 16));
            }
            NativeObject::Uuid(uuid)
        } else {
            let name = xpc_type_get_name(object_type);
            let type_name = if name.is_null() {
                String::from("unknown")
            } else {
                CStr::from_ptr(name).to_string_lossy().into_owned()
            };
            NativeObject::Unsupported { type_name }
        }
    }
}

fn invalid_utf8(what: &str) -> NativeObject {
    NativeObject::Unsupported {
        type_name: format!("{what} (invalid utf-8)"),
    }
}
