//! Behaviour-driven tests for the service-manager catalogue.

use std::str::FromStr;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::error::IpcError;
use crate::native::fake::FakeNativeLayer;
use crate::native::{Endpoint, NativeObject};
use crate::service_manager::{ControlAction, ServiceManager};
use crate::value::{Dictionary, Value};

const ENDPOINT: &str = "com.apple.xpc.launchd.domain.system";

/// A quoted string value from a Gherkin feature file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QuotedString(String);

impl FromStr for QuotedString {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim_matches('"').to_owned()))
    }
}

impl QuotedString {
    fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Default)]
struct ServiceWorld {
    layer: FakeNativeLayer,
    outcome: Option<Result<Dictionary, IpcError>>,
}

impl ServiceWorld {
    fn manager(&self) -> ServiceManager<'_> {
        ServiceManager::new(&self.layer, ENDPOINT)
    }

    fn last_message(&self) -> NativeObject {
        self.layer
            .calls()
            .last()
            .map(|call| call.message.clone())
            .expect("a message was sent")
    }

    fn error(&self) -> &IpcError {
        match &self.outcome {
            Some(Err(error)) => error,
            other => panic!("expected a failed request, got {other:?}"),
        }
    }
}

#[fixture]
fn world() -> ServiceWorld {
    ServiceWorld::default()
}

#[given("a service manager that acknowledges every request")]
fn given_acknowledging(world: &mut ServiceWorld) {
    world.layer.register_reply(
        Endpoint::privileged(ENDPOINT),
        NativeObject::dictionary([("error", NativeObject::Int64(0))]),
    );
}

#[given("a service manager reporting pid {pid} for every service")]
fn given_reporting_pid(world: &mut ServiceWorld, pid: i64) {
    world.layer.register_reply(
        Endpoint::privileged(ENDPOINT),
        NativeObject::dictionary([
            ("pid", NativeObject::Int64(pid)),
            ("state", NativeObject::String(String::from("running"))),
        ]),
    );
}

#[given("a service manager that does not know any service")]
fn given_unknown_services(world: &mut ServiceWorld) {
    world.layer.register_reply(
        Endpoint::privileged(ENDPOINT),
        NativeObject::dictionary([("error", NativeObject::Int64(113))]),
    );
}

#[when("service {name} is started")]
fn when_started(world: &mut ServiceWorld, name: QuotedString) {
    let outcome = world.manager().control(name.as_str(), ControlAction::Start);
    world.outcome = Some(outcome);
}

#[when("the status of service {name} is requested")]
fn when_status(world: &mut ServiceWorld, name: QuotedString) {
    let outcome = world.manager().status(name.as_str());
    world.outcome = Some(outcome);
}

#[when("process info for pid {pid} is requested")]
fn when_procinfo(world: &mut ServiceWorld, pid: i64) {
    let outcome = world.manager().procinfo(pid);
    world.outcome = Some(outcome);
}

#[then("the request succeeds")]
fn then_succeeds(world: &mut ServiceWorld) {
    assert!(
        matches!(world.outcome, Some(Ok(_))),
        "unexpected outcome: {:?}",
        world.outcome
    );
}

#[then("the last request has action {action}")]
fn then_action(world: &mut ServiceWorld, action: QuotedString) {
    assert_eq!(
        world.last_message().get("action"),
        Some(&NativeObject::String(action.as_str().to_owned()))
    );
}

#[then("the last request targets service {name}")]
fn then_targets(world: &mut ServiceWorld, name: QuotedString) {
    assert_eq!(
        world.last_message().get("name"),
        Some(&NativeObject::String(name.as_str().to_owned()))
    );
}

#[then("the reply has pid {pid}")]
fn then_reply_pid(world: &mut ServiceWorld, pid: i64) {
    let reply = match &world.outcome {
        Some(Ok(reply)) => reply,
        other => panic!("expected a reply, got {other:?}"),
    };
    assert_eq!(reply.get("pid"), Some(&Value::Int64(pid)));
}

#[then("the request fails with an invalid argument error")]
fn then_invalid_argument(world: &mut ServiceWorld) {
    assert!(matches!(world.error(), IpcError::InvalidArgument { .. }));
}

#[then("the request fails with a not found error")]
fn then_not_found(world: &mut ServiceWorld) {
    assert!(matches!(world.error(), IpcError::NotFound { .. }));
}

#[then("no message reached the native layer")]
fn then_no_message(world: &mut ServiceWorld) {
    assert_eq!(world.layer.call_count(), 0);
}

#[scenario(
    path = "tests/features/service_manager.feature",
    name = "Control requests carry the action name"
)]
fn control_carries_action(world: ServiceWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/service_manager.feature",
    name = "Status replies decode integer fields"
)]
fn status_decodes_integers(world: ServiceWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/service_manager.feature",
    name = "Invalid pids are rejected before any native call"
)]
fn invalid_pid_rejected(world: ServiceWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/service_manager.feature",
    name = "Unknown services are reported as not found"
)]
fn unknown_service_not_found(world: ServiceWorld) {
    let _ = world;
}
