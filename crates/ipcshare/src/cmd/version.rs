use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("ipcshare {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!("target: {}", env!("IPCSHARE_BUILD_TARGET"));
    println!("os: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!(
        "frame header: {} bytes, max payload {} bytes",
        ipcshare_frame::HEADER_SIZE,
        ipcshare_frame::DEFAULT_MAX_PAYLOAD
    );
    println!("unix sockets: {}", cfg!(unix));

    Ok(SUCCESS)
}
