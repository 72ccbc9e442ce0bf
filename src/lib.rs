//! A Modbus TCP field device simulator for exercising PLC clients.

pub use bytes;
pub use log;

pub mod error;
pub use self::error::Error;

pub mod frame;

pub mod codec;
pub use codec::{ClientDecoder, ClientEncoder, ServerDecoder, ServerEncoder};

mod header;

pub mod store;

#[cfg(feature = "tcp")]
pub mod client;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "server")]
pub mod config;
