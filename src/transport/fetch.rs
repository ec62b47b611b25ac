//! Fetch server: hands the oldest queued message of one destination to a
//! poller.
//!
//! An address that is too long or not UTF-8 cannot name any queue and is
//! answered `EMPTY`.
//!
//! Popping is final. A message is not requeued if the poller disappears
//! before reading the reply, so delivery is at-most-once.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::{AnyDelimiterCodecError, Framed};
use tracing::{info, warn};

use crate::broker::engine::{BrokerState, OutboundTable};
use crate::broker::message::Message;
use crate::transport::protocol::{self, Response};
use crate::transport::{ListenerOptions, serve};
use crate::utils::{BrokerError, Result};

pub struct FetchServer {
    listener: TcpListener,
    state: Arc<BrokerState>,
    options: ListenerOptions,
}

impl FetchServer {
    pub fn new(listener: TcpListener, state: Arc<BrokerState>, options: ListenerOptions) -> Self {
        Self {
            listener,
            state,
            options,
        }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self {
            listener,
            state,
            options,
        } = self;
        let max_connections = options.max_connections;

        serve(
            "Fetch server",
            listener,
            max_connections,
            shutdown,
            move |stream, peer| {
                let state = state.clone();
                let options = options.clone();
                async move {
                    match handle_fetch(stream, &state.outbound, &options).await {
                        Ok(Some(msg)) => info!("Served {msg} to {peer}"),
                        Ok(None) => info!("Nothing queued for {peer}"),
                        Err(e) => warn!("Fetch connection from {peer} abandoned: {e}"),
                    }
                }
            },
        )
        .await;
    }
}

/// Run the fetch protocol on one connection. Returns the message served,
/// if any.
pub(crate) async fn handle_fetch<S>(
    stream: S,
    outbound: &OutboundTable,
    options: &ListenerOptions,
) -> Result<Option<Message>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, protocol::frame_codec(options.max_msg_size));

    let requested = match timeout(options.read_timeout, framed.next()).await {
        Err(_) => {
            return Err(BrokerError::Timeout {
                timeout_ms: options.read_timeout.as_millis() as u64,
            });
        }
        Ok(None) => return Err(BrokerError::ConnectionClosed),
        // no queued message has an address this long
        Ok(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => None,
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(Some(Ok(line))) => match std::str::from_utf8(line.trim_ascii()) {
            Ok(dest) => Some(dest.to_string()),
            Err(e) => {
                warn!("Fetch address is not valid UTF-8: {e}");
                None
            }
        },
    };

    let msg = match &requested {
        Some(dest) => {
            info!("{dest} fetch requested.");
            outbound.pop(dest)
        }
        None => None,
    };
    let Some(msg) = msg else {
        framed.send(Response::Empty.as_str()).await?;
        return Ok(None);
    };

    framed.send(Response::Ok.as_str()).await?;
    framed.send(msg.to_hex()).await?;
    framed.send(Response::Ok.as_str()).await?;

    Ok(Some(msg))
}
