//! The `transport` module handles network communication with senders and
//! pollers over plain TCP.
//!
//! Both listeners speak newline-delimited text: message bytes travel as a
//! hex line, responses are single-word tokens. Every connection carries
//! exactly one request; there are no sessions.

pub mod fetch;
pub mod protocol;
pub mod receiver;
pub mod session;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use crate::config::BrokerSettings;

pub use fetch::FetchServer;
pub use protocol::Response;
pub use receiver::InboundReceiver;
pub use session::{DecodeOutcome, ReceiveSession, ReceiveState};

/// Pause after a failed `accept` so persistent errors (e.g. out of file
/// descriptors) do not spin the loop.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection limits shared by both listeners.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub max_msg_size: usize,
    pub max_tries: u32,
    pub read_timeout: Duration,
    pub max_connections: usize,
}

impl From<&BrokerSettings> for ListenerOptions {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            max_msg_size: settings.max_msg_size,
            max_tries: settings.max_tries,
            read_timeout: settings.read_timeout(),
            max_connections: settings.max_connections,
        }
    }
}

/// Accept connections until `shutdown` flips, running `handler` for each
/// one with at most `max_connections` in flight. The stop signal is
/// observed between connections and while waiting in `accept`. The
/// listener is dropped, closing the port, when this returns.
pub(crate) async fn serve<H, Fut>(
    name: &'static str,
    listener: TcpListener,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
    handler: H,
) where
    H: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let limiter = Arc::new(Semaphore::new(max_connections));

    match listener.local_addr() {
        Ok(addr) => info!("{name} listening on {addr}"),
        Err(e) => warn!("{name} listening on unknown address: {e}"),
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            permit = limiter.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => break,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("{name} failed to accept connection: {e}");
                if backoff(ACCEPT_BACKOFF, &mut shutdown).await {
                    continue;
                }
                break;
            }
        };

        debug!("{name} request received from {peer}");
        let connection = handler(stream, peer);
        tokio::spawn(async move {
            let _permit = permit;
            connection.await;
        });
    }

    info!("{name} closed.");
}

/// Sleep for `delay` unless shutdown is signalled first. Returns `false`
/// when the caller should stop.
pub(crate) async fn backoff(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}
