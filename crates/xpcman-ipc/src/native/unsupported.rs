use tracing::debug;

use super::{
    Endpoint, EventSink, NativeChannel, NativeEvent, NativeFault, NativeLayer, NativeObject,
    ReplySink,
};

const UNSUPPORTED_REASON: &str = "native XPC is not available on this platform";

/// Native layer for platforms without XPC. Every endpoint fails resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedNative;

impl NativeLayer for UnsupportedNative {
    fn open(&self, endpoint: &Endpoint, events: EventSink) -> Box<dyn NativeChannel> {
        debug!(endpoint = %endpoint, "native layer unavailable");
        events.post(NativeEvent::Fault(fault()));
        Box::new(UnsupportedChannel)
    }
}

struct UnsupportedChannel;

impl NativeChannel for UnsupportedChannel {
    fn send(&mut self, _message: NativeObject) {}

    fn send_with_reply(&mut self, _message: NativeObject, reply: ReplySink) {
        reply.deliver(Err(fault()));
    }

    fn cancel(&mut self) {}
}

fn fault() -> NativeFault {
    NativeFault::Resolution {
        reason: UNSUPPORTED_REASON.to_owned(),
    }
}
