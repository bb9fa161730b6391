//! Two peers in one process, checked end to end.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ipcshare_codec::{Fault, Instance, TypeRef, Value};
use ipcshare_peer::{arg, Connection, PeerError, RemoteObject, Role};
use ipcshare_transport::StreamPair;
use tracing::debug;

use crate::cmd::{parse_duration, SelftestArgs};
use crate::demo::{self, counter_type, echo_type};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_report, CheckReport, CheckResult, CheckStatus, OutputFormat};

const PIPE_CAPACITY: usize = 64 * 1024;
const MAX_ECHO_LEN: u64 = 4096;

type Outcome = Result<String, String>;

pub async fn run(args: SelftestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let (transport, left, right) = open_pair(args.uds)?;
    let initiator = Connection::builder(Role::Initiator)
        .hosts(demo::hosts())
        .types(demo::types())
        .start(left);
    let acceptor = Connection::builder(Role::Acceptor)
        .hosts(demo::hosts())
        .types(demo::types())
        .start(right);

    let checks = vec![
        check("handshake", timeout, handshake(&initiator, &acceptor)).await,
        check(
            "echo",
            timeout,
            echo(&initiator, &acceptor, args.channels, args.calls),
        )
        .await,
        check("overloads", timeout, overloads(&initiator)).await,
        check("faults", timeout, faults(&initiator)).await,
        check("close", timeout, close(&initiator, &acceptor)).await,
    ];
    initiator.dispose();
    acceptor.dispose();

    let failed = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let report = CheckReport {
        transport,
        checks,
        overall: if failed {
            CheckStatus::Fail
        } else {
            CheckStatus::Pass
        },
    };
    print_report(&report, format);

    Ok(if failed { HEALTH_CHECK_FAILED } else { SUCCESS })
}

#[cfg(unix)]
fn open_pair(uds: bool) -> CliResult<(&'static str, StreamPair, StreamPair)> {
    if uds {
        let (left, right) = ipcshare_transport::unix_pair()
            .map_err(|err| crate::exit::transport_error("socket pair failed", err))?;
        return Ok(("uds", left, right));
    }
    let (left, right) = StreamPair::memory_pair(PIPE_CAPACITY);
    Ok(("memory", left, right))
}

#[cfg(not(unix))]
fn open_pair(uds: bool) -> CliResult<(&'static str, StreamPair, StreamPair)> {
    if uds {
        return Err(crate::exit::CliError::new(
            crate::exit::USAGE,
            "--uds requires Unix domain sockets",
        ));
    }
    let (left, right) = StreamPair::memory_pair(PIPE_CAPACITY);
    Ok(("memory", left, right))
}

async fn check<F>(name: &'static str, timeout: Duration, outcome: F) -> CheckResult
where
    F: Future<Output = Outcome>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, outcome)
        .await
        .unwrap_or_else(|_| Err(format!("timed out after {timeout:?}")));
    let elapsed_ms = started.elapsed().as_millis();
    debug!(
        check = name,
        passed = outcome.is_ok(),
        elapsed_ms = elapsed_ms as u64,
        "check finished"
    );

    let (status, detail) = match outcome {
        Ok(detail) => (CheckStatus::Pass, detail),
        Err(detail) => (CheckStatus::Fail, detail),
    };
    CheckResult {
        name,
        status,
        detail,
        elapsed_ms,
    }
}

fn failed(context: &str, err: impl Display) -> String {
    format!("{context}: {err}")
}

fn stand_in(instance: &Instance) -> Result<Arc<RemoteObject>, String> {
    instance
        .downcast::<RemoteObject>()
        .ok_or_else(|| "stand-in is not a remote object".to_string())
}

async fn handshake(initiator: &Connection, acceptor: &Connection) -> Outcome {
    let channel = initiator
        .create_instance(counter_type(), false, vec![arg(TypeRef::I64, 41i64)])
        .await
        .map_err(|err| failed("create Counter", err))?;
    let mirror = acceptor
        .channel(channel.id())
        .ok_or_else(|| format!("acceptor has no channel {:#x}", channel.id()))?;
    if !mirror.is_host() || channel.is_host() {
        return Err("roles were not settled by the handshake".to_string());
    }

    let counter = stand_in(&channel.instance().ok_or("channel has no stand-in")?)?;
    let value: i64 = counter
        .call_as("increment", vec![])
        .await
        .map_err(|err| failed("increment", err))?;
    if value != 42 {
        return Err(format!("increment returned {value}, expected 42"));
    }
    Ok(format!("channel {:#x}: {} / {}", channel.id(), channel.state(), mirror.state()))
}

async fn echo(initiator: &Connection, acceptor: &Connection, channels: usize, calls: usize) -> Outcome {
    let mut tasks = Vec::with_capacity(channels * 2);
    for (side, connection) in [initiator, acceptor].into_iter().enumerate() {
        for index in 0..channels {
            let instance = connection
                .create_remote(echo_type(), vec![])
                .await
                .map_err(|err| failed("create Echo", err))?;
            let echo = stand_in(&instance)?;
            let seed = (side * channels + index + 1) as u64;
            tasks.push(tokio::spawn(exchange(echo, seed, calls)));
        }
    }

    let mut bytes = 0;
    for task in tasks {
        bytes += task.await.map_err(|err| failed("echo task", err))??;
    }
    Ok(format!(
        "{} channels, {} calls, {bytes} bytes",
        channels * 2,
        channels * 2 * calls
    ))
}

async fn exchange(echo: Arc<RemoteObject>, seed: u64, calls: usize) -> Result<usize, String> {
    let mut rng = XorShift::new(seed);
    let mut bytes = 0;
    for call in 0..calls {
        let len = (rng.next_u64() % (MAX_ECHO_LEN + 1)) as usize;
        let sent: Bytes = (0..len).map(|_| rng.next_u64() as u8).collect();
        let received: Bytes = echo
            .call_as("echo", vec![arg(TypeRef::BYTES, sent.clone())])
            .await
            .map_err(|err| failed("echo", err))?;
        if received != sent {
            return Err(format!("call {call} with seed {seed} returned different bytes"));
        }
        bytes += len;
    }
    Ok(bytes)
}

async fn overloads(initiator: &Connection) -> Outcome {
    let echo = stand_in(
        &initiator
            .create_remote(echo_type(), vec![])
            .await
            .map_err(|err| failed("create Echo", err))?,
    )?;
    let text = echo
        .call("echo", vec![arg(TypeRef::STRING, "hello")])
        .await
        .map_err(|err| failed("echo(string)", err))?;
    let raw = echo
        .call("echo", vec![arg(TypeRef::BYTES, Bytes::from_static(b"hello"))])
        .await
        .map_err(|err| failed("echo(u8[])", err))?;
    match (&text, &raw) {
        (Value::String(_), Value::Bytes(_)) => Ok("echo(string) and echo(u8[]) resolved".to_string()),
        _ => Err(format!("unexpected results {text:?} and {raw:?}")),
    }
}

async fn faults(initiator: &Connection) -> Outcome {
    let counter = stand_in(
        &initiator
            .create_remote(counter_type(), vec![])
            .await
            .map_err(|err| failed("create Counter", err))?,
    )?;

    let divided = counter
        .call("divide", vec![arg(TypeRef::I64, 0i64)])
        .await;
    match divided {
        Err(PeerError::Remote(fault)) if fault.is("DivideByZero") => {}
        other => return Err(format!("divide by zero gave {other:?}")),
    }

    let missing = counter.call("reset", vec![]).await;
    match missing {
        Err(PeerError::Remote(fault)) if fault.is(Fault::ARGUMENT_ERROR) => {}
        other => return Err(format!("unknown method gave {other:?}")),
    }

    let value: i64 = counter
        .call_as("add", vec![arg(TypeRef::I64, 5i64)])
        .await
        .map_err(|err| failed("add after faults", err))?;
    if value != 5 {
        return Err(format!("add returned {value}, expected 5"));
    }
    Ok("remote faults and argument errors surfaced".to_string())
}

async fn close(initiator: &Connection, acceptor: &Connection) -> Outcome {
    let channel = initiator
        .create_instance(echo_type(), false, vec![])
        .await
        .map_err(|err| failed("create Echo", err))?;
    let id = channel.id();
    channel.dispose();
    while acceptor.channel(id).is_some() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(format!("channel {id:#x} closed on both sides"))
}

struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}
