//! Inbound receiver: accepts send requests and feeds the intake queue.
//!
//! Per connection: read one hex line, try to decode it, answer `OK`,
//! `RETRY` or `FAIL` according to [`ReceiveSession`]. Lines are read as raw
//! bytes, so a line that is not even text is just another malformed
//! attempt. Only a successfully decoded message touches shared state.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::{AnyDelimiterCodecError, Framed};
use tracing::{debug, info, warn};

use crate::broker::engine::BrokerState;
use crate::broker::queue::MessageQueue;
use crate::transport::protocol;
use crate::transport::session::{DecodeOutcome, ReceiveSession, ReceiveState};
use crate::transport::{ListenerOptions, serve};
use crate::utils::{BrokerError, Result};

pub struct InboundReceiver {
    listener: TcpListener,
    state: Arc<BrokerState>,
    options: ListenerOptions,
}

impl InboundReceiver {
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
            "Receiver",
            listener,
            max_connections,
            shutdown,
            move |stream, peer| {
                let state = state.clone();
                let options = options.clone();
                async move {
                    match handle_send(stream, &state.intake, &options).await {
                        Ok(ReceiveState::Acked) => info!("Message accepted from {peer}"),
                        Ok(final_state) => warn!("Send from {peer} ended as {final_state:?}"),
                        Err(e) => warn!("Send connection from {peer} abandoned: {e}"),
                    }
                }
            },
        )
        .await;
    }
}

/// Run the send protocol on one connection and return its terminal state.
pub(crate) async fn handle_send<S>(
    stream: S,
    intake: &MessageQueue,
    options: &ListenerOptions,
) -> Result<ReceiveState>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(
        stream,
        protocol::frame_codec(protocol::max_frame_len(options.max_msg_size)),
    );
    let mut session = ReceiveSession::new(options.max_tries);

    loop {
        let read = timeout(options.read_timeout, framed.next()).await;
        session.begin_attempt();

        let outcome = match read {
            Err(_) => {
                debug!("Read timed out after {:?}", options.read_timeout);
                DecodeOutcome::TimedOut
            }
            Ok(None) => return Err(BrokerError::ConnectionClosed),
            Ok(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => {
                warn!(
                    "Frame exceeds {} bytes of hex",
                    protocol::max_frame_len(options.max_msg_size)
                );
                DecodeOutcome::TooLarge
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(line))) => match protocol::decode_frame(&line, options.max_msg_size) {
                Ok(msg) => {
                    debug!("Decoded {msg}");
                    intake.push(msg);
                    DecodeOutcome::Decoded
                }
                Err(e @ BrokerError::MessageTooLarge { .. }) => {
                    warn!("Transfer failed due to {e}");
                    DecodeOutcome::TooLarge
                }
                Err(e) => {
                    warn!("Transfer failed due to {e}");
                    DecodeOutcome::Malformed
                }
            },
        };

        let state = session.resolve(outcome);
        match state {
            ReceiveState::Retrying => debug!(
                "Will retry (attempt {} of {})",
                session.attempts(),
                options.max_tries
            ),
            ReceiveState::Failed => warn!("Retries exhausted after {} attempt(s)", session.attempts()),
            _ => {}
        }

        if let Some(response) = state.response() {
            framed.send(response.as_str()).await?;
        }
        if state.is_terminal() {
            return Ok(state);
        }
    }
}
