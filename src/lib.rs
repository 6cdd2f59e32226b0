//! # ventio
//!
//! Serial gateway for fleets of ventilation devices speaking a three-digit
//! ASCII protocol.
//!
//! The crate mediates between higher-level controllers and the devices on
//! one half-duplex serial line: requests from any number of independent
//! producers are merged fairly into a single stream, dispatched one
//! transaction at a time over the port, and each response is routed back
//! to its originator on a per-request reply channel.
//!
//! ## Architecture
//!
//! - **Frames & codec** ([`frame`], [`codec`]): typed, range-validated
//!   frames and their exact wire representation, including the device's
//!   `?` no-data sentinel.
//! - **Serial** ([`serial`]): the port driver seam, the frame-level
//!   connection, and the transaction manager that owns the port and
//!   serializes request/response pairs against it.
//! - **Scheduler** ([`scheduler`]): merges N request sources into the
//!   manager's single request channel with bounded unfairness.
//! - **Process plumbing** ([`config`], [`logging`]): environment-variable
//!   configuration and JSON-structured logging for the daemon binary.
//!
//! ## Example
//!
//! ```ignore
//! use tokio::sync::{mpsc, oneshot};
//! use ventio::{FairScheduler, Frame, Request, SerialManager};
//!
//! #[tokio::main]
//! async fn main() -> ventio::Result<()> {
//!     let (mut manager, request_tx) = SerialManager::new("/dev/ttyUSB0");
//!     manager.start()?;
//!
//!     let mut scheduler = FairScheduler::new(request_tx);
//!     let (source_tx, source_rx) = mpsc::channel(1);
//!     scheduler.add_source(source_rx)?;
//!     scheduler.start();
//!
//!     let (reply_tx, reply_rx) = oneshot::channel();
//!     source_tx
//!         .send(Request {
//!             frame: Some(Frame::read_request(10, 20)?),
//!             reply: Some(reply_tx),
//!         })
//!         .await
//!         .ok();
//!     let response = reply_rx.await;
//!
//!     scheduler.stop();
//!     manager.stop().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod scheduler;
pub mod serial;

pub use error::{Result, VentioError};
pub use frame::{Frame, FrameKind};
pub use scheduler::FairScheduler;
pub use serial::{Request, Response, SerialConnection, SerialManager};
