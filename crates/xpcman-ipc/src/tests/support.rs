//! Shared helpers for connection and catalogue tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::emitter::EventHandler;
use crate::error::IpcError;
use crate::value::Dictionary;

/// One handler invocation.
#[derive(Debug)]
pub(crate) struct Received {
    pub(crate) event: Option<Dictionary>,
    pub(crate) error: Option<IpcError>,
}

/// Handler that records every invocation.
#[derive(Clone, Default)]
pub(crate) struct RecordingHandler {
    received: Arc<Mutex<Vec<Received>>>,
}

impl RecordingHandler {
    pub(crate) fn shared(&self) -> Arc<dyn EventHandler> {
        Arc::new(self.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.received.lock().expect("recording lock").len()
    }

    pub(crate) fn take(&self) -> Vec<Received> {
        std::mem::take(&mut *self.received.lock().expect("recording lock"))
    }

    /// Polls until `count` invocations were recorded or a second elapsed.
    pub(crate) fn wait_for(&self, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.len() >= count
    }
}

impl EventHandler for RecordingHandler {
    fn handle_event(&self, event: Option<Dictionary>, error: Option<IpcError>) {
        self.received
            .lock()
            .expect("recording lock")
            .push(Received { event, error });
    }
}
