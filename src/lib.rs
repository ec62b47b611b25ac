//! # edgebroker
//!
//! `edgebroker` is a minimal, in-memory message broker for low-volume
//! telemetry: field units send small fixed-format messages, the broker
//! queues them by destination address, and pollers fetch them one at a
//! time. Every send and every fetch is its own TCP connection; there are
//! no sessions and nothing is persisted.
//!
//! ## Core Modules
//!
//! - `broker`: the message codec, the thread-safe queue, and the engine that
//!   owns the intake queue and the per-destination outbound queues.
//! - `transport`: the inbound receiver and fetch server listeners, the line
//!   protocol they speak, and the receive retry state machine.
//! - `client`: the `send_msg` / `fetch_next_msg` helper used by senders and
//!   pollers.
//! - `config`: layered configuration loading.
//! - `console`: the operator command console.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod console;
pub mod transport;
pub mod utils;

pub use crate::broker::{Broker, BrokerHandle, Message, Payload, Value};
pub use crate::client::Client;
pub use crate::config::Settings;
pub use crate::utils::{BrokerError, Result};
