use std::io;

use log::{debug, info, warn};
use tokio::net::TcpListener;

use super::Coordinator;

/// Accepts workers on `listener` forever, binding each one to `coordinator`.
///
/// # Errors
/// Returns the accept error if the listener can no longer take connections.
pub async fn serve(listener: &TcpListener, coordinator: &mut Coordinator) -> io::Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) if is_transient(&e) => {
                warn!("failed to accept a connection: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("couldn't disable nagle for {addr}: {e}");
        }

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        let id = coordinator.spawn(rx, tx);
        info!(worker = id; "worker connected from {addr}");
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
