use std::time::Duration;

use clap::{Args, Subcommand};
#[cfg(unix)]
use std::path::PathBuf;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

#[cfg(unix)]
pub mod call;
#[cfg(unix)]
pub mod serve;
pub mod selftest;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the demo objects (Counter, Echo) on a Unix socket.
    #[cfg(unix)]
    Serve(ServeArgs),
    /// Create an object on a `serve` process and call one method on it.
    #[cfg(unix)]
    Call(CallArgs),
    /// Connect two peers in this process and exercise the protocol.
    Selftest(SelftestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        other => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| io_error("failed to start async runtime", err))?;
            runtime.block_on(run_async(other, format))
        }
    }
}

async fn run_async(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        #[cfg(unix)]
        Command::Serve(args) => serve::run(args).await,
        #[cfg(unix)]
        Command::Call(args) => call::run(args, format).await,
        Command::Selftest(args) => selftest::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[cfg(unix)]
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit once the first peer disconnects.
    #[arg(long)]
    pub once: bool,
}

#[cfg(unix)]
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path of a `serve` process.
    pub path: PathBuf,
    /// Type to construct on the server (e.g. Counter).
    #[arg(value_name = "TYPE")]
    pub type_name: String,
    /// Method to call.
    pub method: String,
    /// Constructor argument as TYPE:VALUE (repeatable).
    #[arg(long = "ctor", value_name = "TYPE:VALUE")]
    pub ctor: Vec<String>,
    /// Method argument as TYPE:VALUE (repeatable).
    #[arg(long = "arg", value_name = "TYPE:VALUE")]
    pub args: Vec<String>,
    /// Maximum time for connect, construction and call (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SelftestArgs {
    /// Run over a Unix socket pair instead of in-memory pipes.
    #[arg(long)]
    pub uds: bool,
    /// Echo channels opened by each side.
    #[arg(long, default_value_t = 4)]
    pub channels: usize,
    /// Echo calls per channel.
    #[arg(long, default_value_t = 100)]
    pub calls: usize,
    /// Time limit per check (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_seconds_and_millis() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration(" 150ms ").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn durations_reject_zero_and_garbage() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }
}
