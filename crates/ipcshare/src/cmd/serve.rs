use ipcshare_peer::{Connection, Role};
use ipcshare_transport::UnixDomainSocket;
use tracing::info;

use crate::cmd::ServeArgs;
use crate::demo;
use crate::exit::{transport_error, CliResult, SUCCESS};

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let socket = UnixDomainSocket::bind(&args.path)
        .map_err(|err| transport_error("bind failed", err))?;
    info!(path = %socket.path().display(), "hosting Counter and Echo");

    loop {
        let stream = socket
            .accept()
            .await
            .map_err(|err| transport_error("accept failed", err))?;
        let connection = Connection::builder(Role::Acceptor)
            .hosts(demo::hosts())
            .types(demo::types())
            .start(stream);
        info!("peer connected");

        if args.once {
            connection.closed().await;
            info!("peer disconnected");
            return Ok(SUCCESS);
        }
        tokio::spawn(async move {
            connection.closed().await;
            info!("peer disconnected");
        });
    }
}
