use std::fmt::Display;
use std::str::FromStr;

use ipcshare_codec::{TypeRef, Value};
use ipcshare_peer::{Arg, Connection, RemoteObject, Role};
use ipcshare_transport::UnixDomainSocket;
use tracing::debug;

use crate::cmd::{parse_duration, CallArgs};
use crate::demo;
use crate::exit::{peer_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_value, OutputFormat};

pub async fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let ctor = parse_args(&args.ctor)?;
    let call_args = parse_args(&args.args)?;

    let value = tokio::time::timeout(timeout, invoke(&args, ctor, call_args))
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("call timed out after {timeout:?}")))??;
    print_value(&args.method, &value, format);
    Ok(SUCCESS)
}

async fn invoke(args: &CallArgs, ctor: Vec<Arg>, call_args: Vec<Arg>) -> CliResult<Value> {
    let stream = UnixDomainSocket::connect(&args.path)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let connection = Connection::builder(Role::Initiator)
        .types(demo::types())
        .start(stream);

    let ty = TypeRef::named(&args.type_name);
    let instance = connection
        .create_remote(ty.clone(), ctor)
        .await
        .map_err(|err| peer_error(&format!("creating {ty} failed"), err))?;
    let remote = instance
        .downcast::<RemoteObject>()
        .ok_or_else(|| CliError::new(INTERNAL, "stand-in is not a remote object"))?;
    debug!(%ty, method = %args.method, "calling");

    let value = remote
        .call(&args.method, call_args)
        .await
        .map_err(|err| peer_error(&format!("{ty}.{} failed", args.method), err))?;
    connection.dispose();
    Ok(value)
}

fn parse_args(inputs: &[String]) -> CliResult<Vec<Arg>> {
    inputs.iter().map(|input| parse_arg(input)).collect()
}

/// Parse `TYPE:VALUE` into a typed argument.
fn parse_arg(input: &str) -> CliResult<Arg> {
    let (kind, text) = input
        .split_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("argument {input:?} is not TYPE:VALUE")))?;
    let value = match kind {
        "bool" => Value::Bool(parse(kind, text)?),
        "u8" => Value::U8(parse(kind, text)?),
        "i8" => Value::I8(parse(kind, text)?),
        "i16" => Value::I16(parse(kind, text)?),
        "u16" => Value::U16(parse(kind, text)?),
        "i32" => Value::I32(parse(kind, text)?),
        "u32" => Value::U32(parse(kind, text)?),
        "i64" => Value::I64(parse(kind, text)?),
        "u64" => Value::U64(parse(kind, text)?),
        "f32" => Value::F32(parse(kind, text)?),
        "f64" => Value::F64(parse(kind, text)?),
        "char" => Value::Char(parse(kind, text)?),
        "string" => Value::String(text.to_string()),
        other => {
            return Err(CliError::new(
                USAGE,
                format!("unsupported argument type {other:?}"),
            ))
        }
    };
    Ok((value.type_ref(), value))
}

fn parse<T>(kind: &str, text: &str) -> CliResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    text.parse()
        .map_err(|err| CliError::new(USAGE, format!("invalid {kind} value {text:?}: {err}")))
}
