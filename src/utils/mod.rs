//! The `utils` module provides shared definitions used across the
//! `edgebroker` crate: the error type every fallible operation returns and
//! the tracing bootstrap used by the binary and the tests.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};
