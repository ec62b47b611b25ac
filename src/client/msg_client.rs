use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::broker::message::Message;
use crate::config::{ClientSettings, Settings};
use crate::transport::protocol::{self, Response};
use crate::utils::{BrokerError, Result};

type Connection = Framed<TcpStream, LinesCodec>;

/// Talks the send and fetch protocols against one broker.
#[derive(Debug, Clone)]
pub struct Client {
    send_addr: String,
    fetch_addr: String,
    max_msg_size: usize,
    settings: ClientSettings,
}

impl Client {
    pub fn new(
        send_addr: impl Into<String>,
        fetch_addr: impl Into<String>,
        max_msg_size: usize,
        settings: ClientSettings,
    ) -> Self {
        Self {
            send_addr: send_addr.into(),
            fetch_addr: fetch_addr.into(),
            max_msg_size,
            settings,
        }
    }

    /// Client for the broker described by `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.send_addr(),
            settings.fetch_addr(),
            settings.broker.max_msg_size,
            settings.client.clone(),
        )
    }

    pub fn send_addr(&self) -> &str {
        &self.send_addr
    }

    pub fn fetch_addr(&self) -> &str {
        &self.fetch_addr
    }

    /// Deliver `msg` to the broker, resending on `RETRY` up to
    /// `max_retries` times.
    ///
    /// Oversized messages are rejected with `MessageTooLarge` before any
    /// connection is made.
    pub async fn send_msg(&self, msg: &Message) -> Result<()> {
        msg.check_size(self.max_msg_size)?;

        let responses = self.exchange(&msg.to_hex(), self.settings.max_retries).await?;
        let attempts = responses.len() as u32;
        match responses.last() {
            Some(Response::Ok) => {
                debug!("Sent {msg}");
                Ok(())
            }
            Some(Response::Empty) => Err(BrokerError::UnexpectedResponse {
                got: Response::Empty.to_string(),
            }),
            _ => Err(BrokerError::SendRejected { attempts }),
        }
    }

    /// Push an arbitrary frame, resending it on every `RETRY` until the
    /// broker answers `OK` or `FAIL`. Returns every token received.
    pub async fn send_frame(&self, frame: &str) -> Result<Vec<Response>> {
        self.exchange(frame, u32::MAX).await
    }

    /// Fetch the oldest message queued for `dest`, or `None` when there is
    /// nothing to fetch.
    pub async fn fetch_next_msg(&self, dest: &str) -> Result<Option<Message>> {
        if dest.is_empty() || dest.contains(['\r', '\n']) {
            return Err(BrokerError::malformed(format!(
                "invalid destination address {dest:?}"
            )));
        }

        let mut conn = self.connect(&self.fetch_addr).await?;
        conn.send(dest).await?;

        match self.read_response(&mut conn).await? {
            Response::Empty => Ok(None),
            Response::Ok => {
                let line = self.read_line(&mut conn).await?;
                let msg = Message::from_hex(&line)?;
                match self.read_response(&mut conn).await? {
                    Response::Ok => Ok(Some(msg)),
                    other => Err(BrokerError::UnexpectedResponse {
                        got: other.to_string(),
                    }),
                }
            }
            other => Err(BrokerError::UnexpectedResponse {
                got: other.to_string(),
            }),
        }
    }

    async fn exchange(&self, frame: &str, max_retries: u32) -> Result<Vec<Response>> {
        let mut conn = self.connect(&self.send_addr).await?;
        let mut responses = Vec::new();

        loop {
            conn.send(frame).await?;
            let response = self.read_response(&mut conn).await?;
            responses.push(response);

            match response {
                Response::Retry if (responses.len() as u32) <= max_retries => {
                    warn!("Broker asked for a resend (attempt {})", responses.len());
                }
                _ => return Ok(responses),
            }
        }
    }

    async fn connect(&self, addr: &str) -> Result<Connection> {
        let stream = timeout(self.settings.timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| self.timed_out())??;
        Ok(Framed::new(stream, protocol::line_codec(self.max_msg_size)))
    }

    async fn read_line(&self, conn: &mut Connection) -> Result<String> {
        match timeout(self.settings.timeout(), conn.next()).await {
            Err(_) => Err(self.timed_out()),
            Ok(None) => Err(BrokerError::ConnectionClosed),
            Ok(Some(line)) => Ok(line?),
        }
    }

    async fn read_response(&self, conn: &mut Connection) -> Result<Response> {
        self.read_line(conn).await?.parse()
    }

    fn timed_out(&self) -> BrokerError {
        BrokerError::Timeout {
            timeout_ms: self.settings.timeout_ms,
        }
    }
}
