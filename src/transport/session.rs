//! Per-connection retry/ack state machine for the inbound receiver.
//!
//! ```text
//! AwaitData -> Decoding -> Acked            (terminal, OK)
//!                       -> Retrying         (RETRY, back to Decoding)
//!                       -> Failed           (terminal, FAIL)
//! ```

use crate::transport::protocol::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    AwaitData,
    Decoding,
    Acked,
    Retrying,
    Failed,
}

impl ReceiveState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiveState::Acked | ReceiveState::Failed)
    }

    /// Token sent to the peer on entering this state, if any.
    pub fn response(&self) -> Option<Response> {
        match self {
            ReceiveState::Acked => Some(Response::Ok),
            ReceiveState::Retrying => Some(Response::Retry),
            ReceiveState::Failed => Some(Response::Fail),
            ReceiveState::AwaitData | ReceiveState::Decoding => None,
        }
    }
}

/// What happened to one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Decoded,
    Malformed,
    TooLarge,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ReceiveSession {
    state: ReceiveState,
    attempts: u32,
    max_tries: u32,
}

impl ReceiveSession {
    pub fn new(max_tries: u32) -> Self {
        Self {
            state: ReceiveState::AwaitData,
            attempts: 0,
            max_tries,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Data (or a timeout) arrived; start another attempt. No-op once the
    /// session is terminal.
    pub fn begin_attempt(&mut self) {
        if matches!(self.state, ReceiveState::AwaitData | ReceiveState::Retrying) {
            self.attempts += 1;
            self.state = ReceiveState::Decoding;
        }
    }

    /// Apply the result of the current attempt and return the new state.
    pub fn resolve(&mut self, outcome: DecodeOutcome) -> ReceiveState {
        if self.state != ReceiveState::Decoding {
            return self.state;
        }
        self.state = match outcome {
            DecodeOutcome::Decoded => ReceiveState::Acked,
            // resending the same bytes cannot make them smaller
            DecodeOutcome::TooLarge => ReceiveState::Failed,
            DecodeOutcome::Malformed | DecodeOutcome::TimedOut => {
                if self.attempts < self.max_tries {
                    ReceiveState::Retrying
                } else {
                    ReceiveState::Failed
                }
            }
        };
        self.state
    }
}
