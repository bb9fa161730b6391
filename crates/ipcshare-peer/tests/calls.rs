mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use ipcshare_codec::{Fault, TypeRef, Value};
use ipcshare_frame::{FrameConfig, FrameError};
use ipcshare_peer::{arg, ConnectionConfig, HostedInstance, PeerError, RemoteObject};

async fn calculator(probe: Arc<Probe>) -> (Arc<RemoteObject>, ipcshare_peer::Connection, ipcshare_peer::Connection) {
    let (initiator, acceptor) = connect(probe);
    let instance = initiator
        .create_remote(calculator_type(), vec![])
        .await
        .expect("peer should host a calculator");
    (stand_in(&instance), initiator, acceptor)
}

fn remote_fault(result: Result<Value, PeerError>) -> Fault {
    match result {
        Err(PeerError::Remote(fault)) => fault,
        other => panic!("expected a remote fault, got {other:?}"),
    }
}

#[tokio::test]
async fn overloads_resolve_by_arity_and_type() {
    let (calc, _i, _a) = calculator(Arc::default()).await;

    let one: String = calc
        .call_as("f", vec![arg(TypeRef::I32, 1)])
        .await
        .expect("one-argument overload");
    assert_eq!(one, "one:1");

    let two: String = calc
        .call_as("f", vec![arg(TypeRef::I32, 2), arg(TypeRef::STRING, "x")])
        .await
        .expect("two-argument overload");
    assert_eq!(two, "two:2:x");
}

#[tokio::test]
async fn unresolvable_calls_return_argument_errors() {
    let (calc, _i, _a) = calculator(Arc::default()).await;

    let fault = remote_fault(calc.call("f", vec![arg(TypeRef::STRING, "1")]).await);
    assert!(fault.is(Fault::ARGUMENT_ERROR), "{fault}");

    let fault = remote_fault(calc.call("g", vec![]).await);
    assert!(fault.is(Fault::ARGUMENT_ERROR), "{fault}");
    assert!(fault.message.contains('g'), "{fault}");

    // The channel keeps working afterwards.
    let quotient: i32 = calc
        .call_as("divide", vec![arg(TypeRef::I32, 9), arg(TypeRef::I32, 3)])
        .await
        .expect("valid call after a rejected one");
    assert_eq!(quotient, 3);
}

#[tokio::test]
async fn faults_keep_their_kind_and_message() {
    let (calc, _i, _a) = calculator(Arc::default()).await;
    let fault = remote_fault(
        calc.call("divide", vec![arg(TypeRef::I32, 1), arg(TypeRef::I32, 0)])
            .await,
    );
    assert_eq!(fault, Fault::new("DivideByZero", "attempted to divide by zero"));
}

#[tokio::test]
async fn panics_become_faults() {
    let (calc, _i, _a) = calculator(Arc::default()).await;
    let fault = remote_fault(calc.call("boom", vec![]).await);
    assert!(fault.is(Fault::METHOD_PANICKED), "{fault}");
    assert_eq!(fault.message, "boom");
}

#[tokio::test]
async fn unencodable_results_become_serialization_faults() {
    let (calc, _i, _a) = calculator(Arc::default()).await;
    let fault = remote_fault(calc.call("leak", vec![]).await);
    assert!(fault.is(Fault::SERIALIZATION_ERROR), "{fault}");

    let value = calc.call("nothing", vec![]).await.expect("null result");
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn fire_and_forget_does_not_wait_and_runs_once() {
    let probe = Arc::new(Probe::default());
    let (calc, _i, _a) = calculator(probe.clone()).await;

    // The host blocks on the gate, so returning proves the caller did not wait.
    within("notify returns", calc.notify("hold", vec![]))
        .await
        .expect("notify should queue the call");
    assert_eq!(probe.held.load(Ordering::SeqCst), 0);

    probe.gate.notify_one();
    within("hold completes", probe.done.notified()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(probe.held.load(Ordering::SeqCst), 1);

    // The discarded response does not disturb later calls.
    let quotient: i32 = calc
        .call_as("divide", vec![arg(TypeRef::I32, 8), arg(TypeRef::I32, 2)])
        .await
        .expect("call after fire-and-forget");
    assert_eq!(quotient, 4);
}

#[tokio::test]
async fn slow_calls_do_not_block_others() {
    let probe = Arc::new(Probe::default());
    let (calc, _i, _a) = calculator(probe.clone()).await;

    let held = tokio::spawn({
        let calc = calc.clone();
        async move { calc.call("hold", vec![]).await }
    });
    let answer: String = within("second call", calc.call_as("f", vec![arg(TypeRef::I32, 5)]))
        .await
        .expect("independent call");
    assert_eq!(answer, "one:5");

    probe.gate.notify_one();
    let value = within("held call", held)
        .await
        .expect("task should not panic")
        .expect("held call completes");
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn stand_ins_travel_as_references() {
    let (calc, initiator, _acceptor) = calculator(Arc::default()).await;
    let counter = initiator
        .create_remote(counter_type(), vec![arg(TypeRef::I64, 41i64)])
        .await
        .expect("peer should host a counter");
    let after: i64 = stand_in(&counter)
        .call_as("increment", vec![])
        .await
        .expect("increment");
    assert_eq!(after, 42);

    let read: i64 = calc
        .call_as("read", vec![arg(counter_type(), Value::Shared(counter))])
        .await
        .expect("the host resolves the reference to its own counter");
    assert_eq!(read, 42);
}

#[tokio::test]
async fn shared_objects_are_called_in_place() {
    let (initiator, acceptor) = connect(Arc::default());
    let counter = Arc::new(Counter::new(0));
    let channel = acceptor
        .share(counter_type(), HostedInstance::new(counter.clone()))
        .await
        .expect("acceptor should share its counter");
    assert!(channel.is_host());

    let stand_in = stand_in(
        &initiator
            .channel(channel.id())
            .and_then(|c| c.instance())
            .expect("initiator holds a stand-in"),
    );
    for _ in 0..3 {
        stand_in
            .call("increment", vec![])
            .await
            .expect("increment");
    }
    assert_eq!(counter.get(), 3);
}

fn small_frames() -> ConnectionConfig {
    ConnectionConfig {
        frame: FrameConfig {
            max_payload_size: 4096,
        },
        ..ConnectionConfig::default()
    }
}

#[tokio::test]
async fn oversized_request_fails_only_the_call() {
    let (initiator, acceptor) = connect_with(small_frames(), Arc::default());
    let echo = stand_in(
        &initiator
            .create_remote(echo_type(), vec![])
            .await
            .expect("peer should host an echo"),
    );

    let err = echo
        .call("echo", vec![arg(TypeRef::BYTES, Bytes::from(vec![7u8; 5000]))])
        .await
        .expect_err("request larger than a frame");
    assert!(
        matches!(err, PeerError::Frame(FrameError::PayloadTooLarge { max: 4096, .. })),
        "{err}"
    );
    assert!(!initiator.is_disposed());
    assert!(!acceptor.is_disposed());

    let small = Bytes::from(vec![7u8; 1000]);
    let back: Bytes = echo
        .call_as("echo", vec![arg(TypeRef::BYTES, small.clone())])
        .await
        .expect("same channel still answers");
    assert_eq!(back, small);

    let other = stand_in(
        &acceptor
            .create_remote(echo_type(), vec![])
            .await
            .expect("connection still opens channels"),
    );
    let back: Bytes = other
        .call_as("echo", vec![arg(TypeRef::BYTES, small.clone())])
        .await
        .expect("new channel answers");
    assert_eq!(back, small);
}

#[tokio::test]
async fn oversized_result_becomes_a_serialization_fault() {
    let (initiator, acceptor) = connect_with(small_frames(), Arc::default());
    let echo = stand_in(
        &initiator
            .create_remote(echo_type(), vec![])
            .await
            .expect("peer should host an echo"),
    );

    let fault = remote_fault(echo.call("grow", vec![arg(TypeRef::I32, 8192)]).await);
    assert!(fault.is(Fault::SERIALIZATION_ERROR), "{fault}");
    assert!(!initiator.is_disposed());
    assert!(!acceptor.is_disposed());

    let grown: Bytes = echo
        .call_as("grow", vec![arg(TypeRef::I32, 100)])
        .await
        .expect("result that fits is delivered");
    assert_eq!(grown.len(), 100);
}
