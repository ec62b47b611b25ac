pub mod engine;
pub mod message;
pub mod queue;

pub use engine::{Broker, BrokerHandle, BrokerState, BrokerStats, OutboundTable};
pub use message::{Message, MessageType, Payload, Value};
pub use queue::MessageQueue;

#[cfg(test)]
mod tests;
