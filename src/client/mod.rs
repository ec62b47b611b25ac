//! The `client` module is the request/response helper used by senders and
//! pollers to talk to a broker over the wire.
//!
//! Every call opens its own connection, performs one exchange and closes it.

pub mod msg_client;
pub use msg_client::Client;

#[cfg(test)]
mod tests;
