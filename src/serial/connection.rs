//! Frame-level serial connection.
//!
//! [`SerialConnection`] owns one opened port and speaks whole frames over
//! it: encode-and-write on the way out, read-until-CR-and-decode on the way
//! in, and [`SerialConnection::send_request`] for the write-then-read
//! transaction the bus protocol is built around.
//!
//! Reads go through an internal line reader that may buffer beyond a
//! single syscall; callers must not issue raw reads on the same port in
//! parallel.

use tracing::{debug, trace};

use crate::codec::{self, CHAR_CR};
use crate::error::{Result, VentioError};
use crate::frame::Frame;
use crate::serial::port::{system_opener, PortOpener, RawPort, READ_TIMEOUT};

/// How many bytes a single buffered read pulls off the port at most.
const READ_CHUNK: usize = 64;

/// Frame-level operations on one serial port, as the transaction manager
/// consumes them.
pub(crate) trait SerialLink: Send {
    /// Open the named port at the bus line settings.
    fn open(&mut self, port_name: &str) -> Result<()>;

    /// Close the port. Idempotent; closing a never-opened port succeeds.
    fn close(&mut self) -> Result<()>;

    /// Write one request frame, then read and decode one response frame.
    fn send_request(&mut self, frame: &Frame) -> Result<Frame>;
}

/// A serial connection to the ventilation bus.
pub struct SerialConnection {
    opener: PortOpener,
    port: Option<Box<dyn RawPort>>,
    reader: LineReader,
}

impl SerialConnection {
    /// Create a connection that opens ports through the `serialport`
    /// driver. No port is opened yet.
    pub fn new() -> Self {
        Self {
            opener: system_opener(),
            port: None,
            reader: LineReader::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_opener(opener: PortOpener) -> Self {
        Self {
            opener,
            port: None,
            reader: LineReader::default(),
        }
    }

    /// Open `port_name` and apply the per-read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`VentioError::OpenPort`] if the port cannot be opened. If
    /// applying the read timeout fails, the port is closed again and
    /// [`VentioError::SetReadTimeout`] is returned, with the close error
    /// attached should the close fail too.
    pub fn open(&mut self, port_name: &str) -> Result<()> {
        debug!(
            port_name,
            baud_rate = crate::serial::port::BAUD_RATE,
            "opening serial port"
        );

        let mut port = (self.opener)(port_name).map_err(|source| VentioError::OpenPort {
            port: port_name.to_string(),
            source,
        })?;

        if let Err(source) = port.set_read_timeout(READ_TIMEOUT) {
            let close_error = port.close().err();
            return Err(VentioError::SetReadTimeout {
                port: port_name.to_string(),
                source,
                close_error,
            });
        }

        self.reader.clear();
        self.port = Some(port);
        Ok(())
    }

    /// Close the port. A connection that was never opened closes
    /// successfully.
    pub fn close(&mut self) -> Result<()> {
        debug!("closing serial port");
        match self.port.take() {
            Some(mut port) => port.close().map_err(VentioError::ClosePort),
            None => Ok(()),
        }
    }

    /// Encode `frame` and write it to the port.
    ///
    /// # Errors
    ///
    /// [`VentioError::PortNotOpened`] if the port is not open, an encode
    /// error for response kinds, or [`VentioError::WriteFrame`] carrying
    /// the wire data if the write fails.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let port = self.port.as_mut().ok_or(VentioError::PortNotOpened)?;
        let data = codec::encode(frame)?;

        trace!(?frame, "writing frame");

        port.write_all(data.as_bytes())
            .map_err(|source| VentioError::WriteFrame { data, source })
    }

    /// Read bytes until a CR, then decode the accumulated line.
    ///
    /// # Errors
    ///
    /// [`VentioError::PortNotOpened`] if the port is not open;
    /// [`VentioError::NoDataOnSerial`] if the read timed out before any
    /// byte arrived; [`VentioError::ReadFrame`] carrying the partial data
    /// if the read failed midway; otherwise whatever the decoder returns.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let port = self.port.as_mut().ok_or(VentioError::PortNotOpened)?;
        let line = self.reader.read_line(port.as_mut())?;

        trace!(data = %codec::escape_crlf(&line), "read full frame");

        codec::decode(&line)
    }

    /// Perform one transaction: write `frame`, then read the response.
    pub fn send_request(&mut self, frame: &Frame) -> Result<Frame> {
        self.write_frame(frame)?;
        self.read_frame()
    }
}

impl Default for SerialConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for SerialConnection {
    fn open(&mut self, port_name: &str) -> Result<()> {
        SerialConnection::open(self, port_name)
    }

    fn close(&mut self) -> Result<()> {
        SerialConnection::close(self)
    }

    fn send_request(&mut self, frame: &Frame) -> Result<Frame> {
        SerialConnection::send_request(self, frame)
    }
}

/// CR-delimited line reader with a persistent buffer.
///
/// A single syscall may return bytes beyond the CR; those stay buffered
/// for the next frame.
#[derive(Default)]
struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    fn clear(&mut self) {
        self.buf.clear();
    }

    /// Accumulate bytes from `port` until a CR is buffered, then hand out
    /// everything up to and including it.
    fn read_line(&mut self, port: &mut dyn RawPort) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == CHAR_CR) {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            let mut chunk = [0u8; READ_CHUNK];
            match port.read(&mut chunk) {
                Ok(0) => return Err(self.no_progress(None)),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(self.no_progress(Some(err)))
                }
                Err(source) => {
                    return Err(VentioError::ReadFrame {
                        partial: String::from_utf8_lossy(&self.buf).into_owned(),
                        source,
                    })
                }
            }
        }
    }

    /// The read yielded nothing: a silent bus if the buffer is empty, a
    /// broken-off frame otherwise.
    fn no_progress(&self, source: Option<std::io::Error>) -> VentioError {
        if self.buf.is_empty() {
            VentioError::NoDataOnSerial
        } else {
            VentioError::ReadFrame {
                partial: String::from_utf8_lossy(&self.buf).into_owned(),
                source: source.unwrap_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "serial read returned no further data",
                    )
                }),
            }
        }
    }
}
