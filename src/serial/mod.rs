//! Serial port access for the ventilation bus.
//!
//! Three layers, bottom up:
//!
//! - [`port`] — the byte-oriented driver seam: the [`RawPort`](port::RawPort)
//!   trait and its `serialport`-backed implementation.
//! - [`connection`] — [`SerialConnection`]: frame-level open/close/write/
//!   read/transact on one port.
//! - [`manager`] — [`SerialManager`]: owns the port between `start` and
//!   `stop`, consumes a request stream and answers each request on its own
//!   reply channel, one transaction at a time.

pub mod connection;
pub mod manager;
pub mod port;

pub use connection::SerialConnection;
pub use manager::{Request, Response, SerialManager};
