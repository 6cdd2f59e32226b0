//! Low-level serial port seam.
//!
//! The bus runs at fixed line settings: 9600 baud, 8 data bits, even
//! parity, one stop bit, with a 20 ms timeout on every read syscall. The
//! [`RawPort`] trait is the narrow waist between the frame-level code and
//! the `serialport` driver; tests substitute in-memory ports through a
//! [`PortOpener`].

use std::io;
use std::io::{Read, Write};
use std::time::Duration;

/// Baud rate of the ventilation bus.
pub const BAUD_RATE: u32 = 9600;

/// Timeout applied to every single read syscall.
///
/// This bounds how long a read blocks on a silent bus; it is not a
/// transaction timeout.
pub const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// A byte-oriented serial port: blocking read with timeout, blocking
/// write, close.
pub trait RawPort: Send {
    /// Read up to `buf.len()` bytes, blocking at most [`READ_TIMEOUT`].
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `buf` to the port.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Configure the per-read timeout.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Release the port. Idempotent.
    fn close(&mut self) -> io::Result<()>;
}

/// Factory resolving a port name to an opened [`RawPort`].
pub type PortOpener = Box<dyn Fn(&str) -> io::Result<Box<dyn RawPort>> + Send + Sync>;

/// The production opener: opens `port_name` through the `serialport` crate
/// at the bus line settings (9600 8E1).
pub(crate) fn system_opener() -> PortOpener {
    Box::new(|port_name| {
        let port = serialport::new(port_name, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .open()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(Box::new(SystemPort { inner: Some(port) }) as Box<dyn RawPort>)
    })
}

/// [`RawPort`] backed by a `serialport` device handle.
struct SystemPort {
    inner: Option<Box<dyn serialport::SerialPort>>,
}

impl SystemPort {
    fn port(&mut self) -> io::Result<&mut Box<dyn serialport::SerialPort>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl RawPort for SystemPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port()?.write_all(buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port()?
            .set_timeout(timeout)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }

    fn close(&mut self) -> io::Result<()> {
        // The driver releases the device handle on drop.
        self.inner.take();
        Ok(())
    }
}
