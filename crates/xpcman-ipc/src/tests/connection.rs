//! Connection lifecycle, ordering, and reply tests against the fake layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use xpcman_config::TransportErrorPolicy;

use crate::connection::{Connection, ConnectionOptions, ConnectionState};
use crate::emitter::MockEventHandler;
use crate::error::{IpcError, TransportErrorKind};
use crate::native::fake::{FakeNativeLayer, FakeReply};
use crate::native::{Endpoint, NativeEvent, NativeFault, NativeObject};
use crate::tests::support::RecordingHandler;
use crate::value::{Dictionary, Value};

fn endpoint() -> Endpoint {
    Endpoint::user("com.example.echo")
}

#[fixture]
fn layer() -> FakeNativeLayer {
    let layer = FakeNativeLayer::new();
    layer.register_reply(
        endpoint(),
        NativeObject::dictionary([
            ("pid", NativeObject::Int64(123)),
            ("state", NativeObject::String(String::from("running"))),
        ]),
    );
    layer
}

fn message(seq: i64) -> NativeEvent {
    NativeEvent::Message(NativeObject::dictionary([("seq", NativeObject::Int64(seq))]))
}

fn wait_for_state(connection: &Connection, expected: ConnectionState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if connection.state() == expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    connection.state() == expected
}

fn connect(
    layer: &FakeNativeLayer,
    handler: &RecordingHandler,
    policy: TransportErrorPolicy,
) -> Connection {
    Connection::connect(
        layer,
        endpoint(),
        handler.shared(),
        ConnectionOptions::with_transport_errors(policy),
    )
}

#[rstest]
fn events_arrive_in_native_order(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    for seq in 1..=50 {
        assert_eq!(layer.inject(&endpoint(), &message(seq)), 1);
    }
    drop(connection);

    let sequence: Vec<_> = handler
        .take()
        .into_iter()
        .map(|received| {
            assert!(received.error.is_none());
            received
                .event
                .and_then(|event| event.get("seq").and_then(Value::as_i64))
                .expect("seq present")
        })
        .collect();
    assert_eq!(sequence, (1..=50).collect::<Vec<_>>());
}

#[rstest]
fn second_bind_is_rejected_and_first_handler_kept(layer: FakeNativeLayer) {
    let first = RecordingHandler::default();
    let second = RecordingHandler::default();
    let connection = Connection::open(&layer, endpoint(), ConnectionOptions::default());

    connection.bind(first.shared()).expect("first bind succeeds");
    let error = connection
        .bind(second.shared())
        .expect_err("second bind rejected");
    assert!(matches!(error, IpcError::HandlerAlreadyBound { .. }));

    layer.inject(&endpoint(), &message(1));
    assert!(first.wait_for(1));
    assert_eq!(second.len(), 0);
}

#[rstest]
fn events_queue_until_a_handler_is_bound(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = Connection::open(&layer, endpoint(), ConnectionOptions::default());
    layer.inject(&endpoint(), &message(7));
    layer.inject(&endpoint(), &message(8));
    assert!(wait_for_state(&connection, ConnectionState::Active));

    connection.bind(handler.shared()).expect("bind succeeds");
    layer.inject(&endpoint(), &message(9));
    drop(connection);

    let sequence: Vec<_> = handler
        .take()
        .into_iter()
        .filter_map(|received| {
            received
                .event
                .and_then(|event| event.get("seq").and_then(Value::as_i64))
        })
        .collect();
    assert_eq!(sequence, vec![7, 8, 9]);
}

#[rstest]
fn unbound_connection_is_invalidated_by_resolution_failure() {
    let layer = FakeNativeLayer::new();
    let connection = Connection::open(&layer, endpoint(), ConnectionOptions::default());
    assert!(wait_for_state(&connection, ConnectionState::Invalid));

    let error = connection
        .send(Dictionary::new().with("k", 1_i64))
        .expect_err("send to an unresolved endpoint fails");
    assert!(matches!(error, IpcError::ConnectionClosed { .. }));
    assert_eq!(layer.call_count(), 0);

    let handler = RecordingHandler::default();
    connection.bind(handler.shared()).expect("late bind succeeds");
    assert!(handler.wait_for(1));
    let received = handler.take();
    assert!(matches!(
        received.first().and_then(|received| received.error.as_ref()),
        Some(IpcError::Resolution { .. })
    ));
}

#[rstest]
fn invalid_connection_rejects_sends_without_native_calls(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    layer.inject(&endpoint(), &NativeEvent::Fault(NativeFault::Invalidated));
    assert!(handler.wait_for(1));

    let received = handler.take();
    let first = received.first().expect("one event");
    assert!(first.event.is_none());
    assert!(
        first
            .error
            .as_ref()
            .is_some_and(|error| error.is_transport(TransportErrorKind::Invalidated))
    );
    assert_eq!(connection.state(), ConnectionState::Invalid);

    let error = connection
        .send(Dictionary::new().with("k", 1_i64))
        .expect_err("send after invalidation fails");
    assert!(matches!(error, IpcError::ConnectionClosed { .. }));
    let error = connection
        .send_with_reply(Dictionary::new(), None)
        .expect_err("reply send after invalidation fails");
    assert!(matches!(error, IpcError::ConnectionClosed { .. }));
    assert_eq!(layer.call_count(), 0);
}

#[rstest]
fn nul_bytes_are_rejected_before_the_native_layer(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);

    let error = connection
        .send(Dictionary::new().with("name", "com.example\0.echo"))
        .expect_err("NUL in a string is rejected");
    assert!(matches!(error, IpcError::InvalidArgument { .. }));
    let error = connection
        .send_with_reply(Dictionary::new().with("bad\0key", 1_i64), None)
        .expect_err("NUL in a key is rejected");
    assert!(matches!(error, IpcError::InvalidArgument { .. }));
    assert_eq!(layer.call_count(), 0);
    assert_ne!(connection.state(), ConnectionState::Invalid);
}

#[rstest]
fn close_is_idempotent_and_not_echoed(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    connection.close();
    connection.close();

    assert_eq!(connection.state(), ConnectionState::Invalid);
    assert_eq!(layer.open_channel_count(), 0);
    assert!(matches!(
        connection.send(Dictionary::new()),
        Err(IpcError::ConnectionClosed { .. })
    ));
    assert!(matches!(
        connection.bind(RecordingHandler::default().shared()),
        Err(IpcError::ConnectionClosed { .. })
    ));
    drop(connection);
    assert_eq!(handler.len(), 0);
    assert_eq!(layer.call_count(), 0);
}

#[rstest]
fn retain_policy_keeps_connection_after_interruption(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    layer.inject(&endpoint(), &NativeEvent::Fault(NativeFault::Interrupted));
    assert!(handler.wait_for(1));
    assert_eq!(connection.state(), ConnectionState::Interrupted);

    connection
        .send(Dictionary::new().with("ping", true))
        .expect("send while interrupted");
    assert_eq!(layer.call_count(), 1);

    layer.inject(&endpoint(), &message(2));
    assert!(handler.wait_for(2));
    assert_eq!(connection.state(), ConnectionState::Active);
}

#[rstest]
fn close_policy_invalidates_on_interruption(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Close);
    layer.inject(&endpoint(), &NativeEvent::Fault(NativeFault::Interrupted));
    assert!(handler.wait_for(1));

    assert_eq!(connection.state(), ConnectionState::Invalid);
    assert_eq!(layer.open_channel_count(), 0);
    assert!(matches!(
        connection.send(Dictionary::new()),
        Err(IpcError::ConnectionClosed { .. })
    ));
}

#[rstest]
fn unresolved_endpoint_reports_resolution_error() {
    let layer = FakeNativeLayer::new();
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    assert!(handler.wait_for(1));

    let received = handler.take();
    let first = received.first().expect("one event");
    assert!(first.event.is_none());
    assert!(matches!(first.error, Some(IpcError::Resolution { .. })));
    assert_eq!(connection.state(), ConnectionState::Invalid);
}

#[rstest]
fn reply_round_trips_through_the_codec(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    let reply = connection
        .send_with_reply(Dictionary::new().with("type", "status"), None)
        .expect("reply arrives");

    assert_eq!(reply.get("pid"), Some(&Value::Int64(123)));
    assert_eq!(reply.get_str("state"), Some("running"));
    let calls = layer.calls();
    let call = calls.first().expect("one call");
    assert!(call.expects_reply);
    assert_eq!(
        call.message.get("type"),
        Some(&NativeObject::String(String::from("status")))
    );
}

#[rstest]
fn stalled_reply_times_out() {
    let layer = FakeNativeLayer::new();
    layer.register(endpoint(), |_| FakeReply::Stall);
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);

    let error = connection
        .send_with_reply(Dictionary::new(), Some(Duration::from_millis(20)))
        .expect_err("reply never arrives");
    assert!(matches!(error, IpcError::Timeout { timeout_ms: 20, .. }));
}

#[rstest]
fn unsolicited_events_reach_handler_during_reply_wait() {
    let layer = FakeNativeLayer::new();
    let injector = layer.clone();
    layer.register(endpoint(), move |_| {
        injector.inject(&endpoint(), &message(99));
        FakeReply::Reply(NativeObject::dictionary([("ok", NativeObject::Bool(true))]))
    });
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);

    let reply = connection
        .send_with_reply(Dictionary::new(), Some(Duration::from_secs(1)))
        .expect("reply arrives");
    assert_eq!(reply.get("ok"), Some(&Value::Bool(true)));
    assert!(handler.wait_for(1));
    let received = handler.take();
    let event = received
        .first()
        .and_then(|received| received.event.as_ref())
        .expect("unsolicited event");
    assert_eq!(event.get("seq"), Some(&Value::Int64(99)));
}

#[rstest]
fn partially_decodable_reply_returns_partial_dictionary() {
    let layer = FakeNativeLayer::new();
    layer.register_reply(
        endpoint(),
        NativeObject::dictionary([
            ("pid", NativeObject::Int64(1)),
            (
                "when",
                NativeObject::Unsupported {
                    type_name: String::from("date"),
                },
            ),
        ]),
    );
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);

    match connection.send_with_reply(Dictionary::new(), None) {
        Err(IpcError::Decode(partial)) => {
            assert_eq!(partial.partial.get("pid"), Some(&Value::Int64(1)));
            let error = partial.errors.first().expect("one decode error");
            assert_eq!(error.path.to_string(), "when");
        }
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[rstest]
fn undecodable_event_carries_partial_payload(layer: FakeNativeLayer) {
    let handler = RecordingHandler::default();
    let connection = connect(&layer, &handler, TransportErrorPolicy::Retain);
    layer.inject(
        &endpoint(),
        &NativeEvent::Message(NativeObject::dictionary([
            ("seq", NativeObject::Int64(5)),
            (
                "shm",
                NativeObject::Unsupported {
                    type_name: String::from("shmem"),
                },
            ),
        ])),
    );
    drop(connection);

    let received = handler.take();
    let first = received.first().expect("one event");
    assert_eq!(
        first.event.as_ref().and_then(|event| event.get("seq")),
        Some(&Value::Int64(5))
    );
    assert!(matches!(first.error, Some(IpcError::Decode(_))));
}

#[rstest]
fn handler_sees_each_event_exactly_once(layer: FakeNativeLayer) {
    let mut handler = MockEventHandler::new();
    handler
        .expect_handle_event()
        .withf(|event, error| {
            error.is_none()
                && event.as_ref().and_then(|event| event.get("seq")) == Some(&Value::Int64(3))
        })
        .times(1)
        .return_const(());
    let connection = Connection::connect(
        &layer,
        endpoint(),
        Arc::new(handler),
        ConnectionOptions::default(),
    );
    layer.inject(&endpoint(), &message(3));
    drop(connection);
}
