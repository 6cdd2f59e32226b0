//! Serial transaction manager.
//!
//! The [`SerialManager`] owns one serial port for its whole lifetime and is
//! the only task that touches it. Callers submit [`Request`]s on the
//! channel handed out at construction; the manager's worker serves them
//! strictly one at a time — write the request frame, read the response
//! frame — and answers each on the request's own reply channel.
//!
//! # Lifecycle
//!
//! *Created* → *Running* → *Stopped*:
//!
//! 1. [`SerialManager::new`] returns the manager and the request sender.
//! 2. [`SerialManager::start`] opens the port and spawns the worker; an
//!    open failure is fatal to this manager instance.
//! 3. [`SerialManager::stop`] asks the worker to close the port and
//!    returns the close result.
//!
//! Closing the request channel does **not** shut the manager down: the
//! worker parks until `stop()` arrives, because `stop()` is the
//! authoritative shutdown trigger and must receive the close result. This
//! lets the driver of requests retire without forcing port closure.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Result, VentioError};
use crate::frame::Frame;
use crate::serial::connection::{SerialConnection, SerialLink};

/// Capacity of the request channel handed to callers.
const REQUEST_CHANNEL_CAPACITY: usize = 1;

/// The outcome of one transaction: the decoded response frame, or the
/// first error encountered while serving the request.
pub type Response = Result<Frame>;

/// Reply channel inside a stop message, carrying the port-close result.
type StopReply = oneshot::Sender<Result<()>>;

/// A unit of work for the manager: a request frame and the channel the
/// response is delivered on.
///
/// A request missing either part performs no serial I/O; a present reply
/// channel is always closed, with a [`Response`] sent first only if a
/// transaction ran.
#[derive(Debug)]
pub struct Request {
    /// The request frame to put on the wire.
    pub frame: Option<Frame>,
    /// Receives exactly one [`Response`], then is closed.
    pub reply: Option<oneshot::Sender<Response>>,
}

/// Owns a serial port and serializes transactions against it.
pub struct SerialManager {
    port_name: String,
    serial: Option<Box<dyn SerialLink>>,
    requests: Option<mpsc::Receiver<Request>>,
    stop_tx: mpsc::Sender<StopReply>,
    stop_rx: Option<mpsc::Receiver<StopReply>>,
}

impl SerialManager {
    /// Create a manager for `port_name`, returning it together with the
    /// sender side of its request channel. The port is not opened yet.
    pub fn new(port_name: impl Into<String>) -> (Self, mpsc::Sender<Request>) {
        Self::with_serial(port_name, Box::new(SerialConnection::new()))
    }

    fn with_serial(
        port_name: impl Into<String>,
        serial: Box<dyn SerialLink>,
    ) -> (Self, mpsc::Sender<Request>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        (
            Self {
                port_name: port_name.into(),
                serial: Some(serial),
                requests: Some(request_rx),
                stop_tx,
                stop_rx: Some(stop_rx),
            },
            request_tx,
        )
    }

    /// Open the port and spawn the worker task.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// An open failure moves this manager straight to *Stopped* and is
    /// returned to the caller; [`VentioError::ManagerStarted`] if the
    /// manager was started before.
    pub fn start(&mut self) -> Result<()> {
        debug!(port = %self.port_name, "starting serial manager");

        let mut serial = self.serial.take().ok_or(VentioError::ManagerStarted)?;
        let stop_rx = self.stop_rx.take().ok_or(VentioError::ManagerStarted)?;

        // On failure this drops the stop receiver (straight to Stopped) but
        // leaves the request channel usable, so producers fail on their own
        // terms.
        serial.open(&self.port_name)?;

        let requests = self.requests.take().ok_or(VentioError::ManagerStarted)?;
        tokio::spawn(run_worker(serial, requests, stop_rx));
        Ok(())
    }

    /// Ask the worker to close the port and return the close result.
    ///
    /// # Errors
    ///
    /// The port-close error, if closing failed, or
    /// [`VentioError::ManagerNotRunning`] if there is no worker to stop.
    pub async fn stop(&mut self) -> Result<()> {
        debug!(port = %self.port_name, "stopping serial manager");

        let (reply_tx, reply_rx) = oneshot::channel();
        self.stop_tx
            .send(reply_tx)
            .await
            .map_err(|_| VentioError::ManagerNotRunning)?;
        reply_rx
            .await
            .map_err(|_| VentioError::ManagerNotRunning)?
    }
}

/// Worker loop: exactly one transaction runs against the port at any
/// moment, in request-arrival order.
async fn run_worker(
    mut serial: Box<dyn SerialLink>,
    mut requests: mpsc::Receiver<Request>,
    mut stop: mpsc::Receiver<StopReply>,
) {
    loop {
        tokio::select! {
            reply = stop.recv() => {
                report_close(serial.as_mut(), reply);
                return;
            }
            request = requests.recv() => match request {
                Some(request) => serve_request(serial.as_mut(), request),
                None => {
                    // Stream end is not shutdown; park until stop() so the
                    // close result reaches its caller.
                    debug!("request stream closed, awaiting stop signal");
                    let reply = stop.recv().await;
                    report_close(serial.as_mut(), reply);
                    return;
                }
            },
        }
    }
}

fn serve_request(serial: &mut dyn SerialLink, request: Request) {
    match (request.frame, request.reply) {
        (Some(frame), Some(reply)) => {
            trace!(?frame, "serving request");
            let response = serial.send_request(&frame);
            // A gone receiver is the caller's business, not ours.
            let _ = reply.send(response);
        }
        (frame, reply) => {
            warn!(
                has_frame = frame.is_some(),
                has_reply = reply.is_some(),
                "dropping request with missing frame or reply channel"
            );
            // Dropping `reply` (if present) closes it without a response.
        }
    }
}

fn report_close(serial: &mut dyn SerialLink, reply: Option<StopReply>) {
    let result = serial.close();
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        // Stop channel gone without a stop(): owner dropped the manager.
        None => {
            if let Err(error) = result {
                warn!(%error, "failed to close serial port during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::frame::FrameKind;
    use crate::scheduler::FairScheduler;

    #[derive(Default)]
    struct LinkState {
        opened: bool,
        closed: bool,
        frames: Vec<Frame>,
        fail_on_open: bool,
        fail_on_close: bool,
    }

    struct MockLink(Arc<Mutex<LinkState>>);

    impl SerialLink for MockLink {
        fn open(&mut self, port_name: &str) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            if state.fail_on_open {
                return Err(VentioError::OpenPort {
                    port: port_name.to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "mock open failure"),
                });
            }
            state.opened = true;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            state.closed = true;
            if state.fail_on_close {
                return Err(VentioError::ClosePort(io::Error::new(
                    io::ErrorKind::Other,
                    "mock close failure",
                )));
            }
            Ok(())
        }

        fn send_request(&mut self, frame: &Frame) -> Result<Frame> {
            let mut state = self.0.lock().unwrap();
            if !state.opened {
                return Err(VentioError::PortNotOpened);
            }
            if frame.kind() != FrameKind::ReadRequest {
                return Err(VentioError::WriteFrame {
                    data: String::new(),
                    source: io::Error::new(io::ErrorKind::Other, "mock send failure"),
                });
            }
            state.frames.push(*frame);
            Frame::response(
                FrameKind::ReadResponse,
                frame.address(),
                frame.function(),
                frame.value(),
            )
        }
    }

    fn mock_manager() -> (SerialManager, mpsc::Sender<Request>, Arc<Mutex<LinkState>>) {
        let state = Arc::new(Mutex::new(LinkState::default()));
        let (manager, request_tx) =
            SerialManager::with_serial("testPort", Box::new(MockLink(state.clone())));
        (manager, request_tx, state)
    }

    async fn submit(request_tx: &mpsc::Sender<Request>, frame: Frame) -> Response {
        let (reply_tx, reply_rx) = oneshot::channel();
        request_tx
            .send(Request {
                frame: Some(frame),
                reply: Some(reply_tx),
            })
            .await
            .unwrap();
        reply_rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (mut manager, _request_tx, state) = mock_manager();

        manager.start().unwrap();
        assert!(state.lock().unwrap().opened);
        assert!(!state.lock().unwrap().closed);

        manager.stop().await.unwrap();
        assert!(state.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_start_open_failure() {
        let (mut manager, request_tx, state) = mock_manager();
        state.lock().unwrap().fail_on_open = true;

        let err = manager.start().unwrap_err();
        assert!(matches!(err, VentioError::OpenPort { .. }));

        // The request channel is still open; producers are not cut off.
        assert!(!request_tx.is_closed());

        // But there is no worker to stop.
        let err = manager.stop().await.unwrap_err();
        assert!(matches!(err, VentioError::ManagerNotRunning));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (mut manager, _request_tx, _state) = mock_manager();

        manager.start().unwrap();
        let err = manager.start().unwrap_err();
        assert!(matches!(err, VentioError::ManagerStarted));

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_reports_close_failure() {
        let (mut manager, _request_tx, state) = mock_manager();
        state.lock().unwrap().fail_on_close = true;

        manager.start().unwrap();
        let err = manager.stop().await.unwrap_err();
        assert!(matches!(err, VentioError::ClosePort(_)));
    }

    #[tokio::test]
    async fn test_stop_twice_fails() {
        let (mut manager, _request_tx, _state) = mock_manager();

        manager.start().unwrap();
        manager.stop().await.unwrap();

        let err = manager.stop().await.unwrap_err();
        assert!(matches!(err, VentioError::ManagerNotRunning));
    }

    #[tokio::test]
    async fn test_request_stream_closure_does_not_close_port() {
        let (mut manager, request_tx, state) = mock_manager();

        manager.start().unwrap();
        drop(request_tx);

        // Give the worker a chance to observe the closed stream.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!state.lock().unwrap().closed);

        // stop() remains the authoritative shutdown trigger.
        manager.stop().await.unwrap();
        assert!(state.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_read_request_round_trip() {
        let (mut manager, request_tx, state) = mock_manager();
        manager.start().unwrap();

        let request = Frame::read_request(111, 222).unwrap();
        let response = submit(&request_tx, request).await.unwrap();

        assert_eq!(response.kind(), FrameKind::ReadResponse);
        assert_eq!(response.address(), 111);
        assert_eq!(response.function(), 222);
        assert_eq!(state.lock().unwrap().frames, vec![request]);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_error_lands_on_reply_channel() {
        let (mut manager, request_tx, state) = mock_manager();
        manager.start().unwrap();

        // The mock fails write requests.
        let request = Frame::write_request(5, 6, 7).unwrap();
        let err = submit(&request_tx, request).await.unwrap_err();
        assert!(matches!(err, VentioError::WriteFrame { .. }));

        // The port stays open and the manager keeps serving.
        assert!(!state.lock().unwrap().closed);
        let ok = submit(&request_tx, Frame::read_request(8, 9).unwrap()).await;
        assert!(ok.is_ok());

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_frame_closes_reply_unanswered() {
        let (mut manager, request_tx, state) = mock_manager();
        manager.start().unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        request_tx
            .send(Request {
                frame: None,
                reply: Some(reply_tx),
            })
            .await
            .unwrap();

        // Closed without a response, and nothing hit the wire.
        assert!(reply_rx.await.is_err());
        assert!(state.lock().unwrap().frames.is_empty());

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_reply_channel_is_dropped() {
        let (mut manager, request_tx, state) = mock_manager();
        manager.start().unwrap();

        request_tx
            .send(Request {
                frame: Some(Frame::read_request(1, 2).unwrap()),
                reply: None,
            })
            .await
            .unwrap();

        // The next complete request proves the worker moved on.
        submit(&request_tx, Frame::read_request(3, 4).unwrap())
            .await
            .unwrap();

        let frames = state.lock().unwrap().frames.clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address(), 3);

        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_are_served_in_order() {
        let (mut manager, request_tx, state) = mock_manager();
        manager.start().unwrap();

        for address in 1..=5u16 {
            submit(&request_tx, Frame::read_request(address, 0).unwrap())
                .await
                .unwrap();
        }

        let addresses: Vec<u16> = state
            .lock()
            .unwrap()
            .frames
            .iter()
            .map(Frame::address)
            .collect();
        assert_eq!(addresses, vec![1, 2, 3, 4, 5]);

        manager.stop().await.unwrap();
    }

    #[derive(Default)]
    struct ScriptedState {
        read_data: Vec<u8>,
        read_offset: usize,
        written: Vec<u8>,
        closed: bool,
        fail_on_write: bool,
    }

    struct ScriptedPort(Arc<Mutex<ScriptedState>>);

    impl crate::serial::port::RawPort for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut state = self.0.lock().unwrap();
            let left = state.read_data.len() - state.read_offset;
            let n = left.min(buf.len());
            let offset = state.read_offset;
            buf[..n].copy_from_slice(&state.read_data[offset..offset + n]);
            state.read_offset += n;
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            let mut state = self.0.lock().unwrap();
            if state.fail_on_write {
                return Err(io::Error::new(io::ErrorKind::Other, "scripted write failure"));
            }
            state.written.extend_from_slice(buf);
            Ok(())
        }

        fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().closed = true;
            Ok(())
        }
    }

    fn scripted_manager(
        state: Arc<Mutex<ScriptedState>>,
    ) -> (SerialManager, mpsc::Sender<Request>) {
        let connection = SerialConnection::with_opener(Box::new(move |_| {
            Ok(Box::new(ScriptedPort(state.clone())) as Box<dyn crate::serial::port::RawPort>)
        }));
        SerialManager::with_serial("testPort", Box::new(connection))
    }

    /// A full transaction through the real connection over a scripted port.
    #[tokio::test]
    async fn test_manager_round_trip_over_connection() {
        let state = Arc::new(Mutex::new(ScriptedState {
            read_data: b"\n111lW#222333\r".to_vec(),
            ..ScriptedState::default()
        }));
        let (mut manager, request_tx) = scripted_manager(state.clone());
        manager.start().unwrap();

        let response = submit(&request_tx, Frame::read_request(100, 100).unwrap())
            .await
            .unwrap();

        assert_eq!(response.kind(), FrameKind::ReadResponse);
        assert_eq!(response.address(), 111);
        assert_eq!(response.function(), 222);
        assert_eq!(response.value(), 333);
        assert_eq!(state.lock().unwrap().written, b"\n100lW100\r");

        manager.stop().await.unwrap();
        assert!(state.lock().unwrap().closed);
    }

    /// A failing write lands on the reply channel without closing the port.
    #[tokio::test]
    async fn test_manager_write_failure_over_connection() {
        let state = Arc::new(Mutex::new(ScriptedState {
            read_data: b"\n111lW#222333\r".to_vec(),
            fail_on_write: true,
            ..ScriptedState::default()
        }));
        let (mut manager, request_tx) = scripted_manager(state.clone());
        manager.start().unwrap();

        let err = submit(&request_tx, Frame::read_request(100, 100).unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to send serial message"));
        assert!(!state.lock().unwrap().closed);

        // The worker keeps serving once writes recover.
        state.lock().unwrap().fail_on_write = false;
        let response = submit(&request_tx, Frame::read_request(100, 100).unwrap())
            .await
            .unwrap();
        assert_eq!(response.address(), 111);

        manager.stop().await.unwrap();
    }

    /// Producers → fair scheduler → manager, end to end.
    #[tokio::test]
    async fn test_scheduler_feeds_manager() {
        let (mut manager, request_tx, state) = mock_manager();
        manager.start().unwrap();

        let mut scheduler = FairScheduler::new(request_tx);
        let mut replies = Vec::new();
        let mut producers = Vec::new();

        for producer in 0..2u16 {
            let (source_tx, source_rx) = mpsc::channel(1);
            scheduler.add_source(source_rx).unwrap();
            producers.push(tokio::spawn(async move {
                let mut reply_rxs = Vec::new();
                for function in 0..3u16 {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    source_tx
                        .send(Request {
                            frame: Some(Frame::read_request(producer + 1, function).unwrap()),
                            reply: Some(reply_tx),
                        })
                        .await
                        .unwrap();
                    reply_rxs.push(reply_rx);
                }
                reply_rxs
            }));
        }

        scheduler.start();

        for producer in producers {
            for reply_rx in producer.await.unwrap() {
                replies.push(reply_rx.await.unwrap().unwrap());
            }
        }

        assert_eq!(replies.len(), 6);
        assert_eq!(state.lock().unwrap().frames.len(), 6);

        scheduler.stop();
        manager.stop().await.unwrap();
    }
}
