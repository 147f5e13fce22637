//! This module provides the main implementation for the Instrument Interface trait.
//!
//! It can be called with any type that implements [`Port`], such as [`std::net::TcpStream`] or a
//! boxed [`serialport::SerialPort`].

use std::{
    collections::VecDeque,
    io::{ErrorKind, Read, Write},
    net::{Shutdown, TcpStream},
    time::Duration,
};

use thiserror::Error;

use crate::{HARD_RESET_POLL, INTERRUPT_BYTE, InstrumentInterface};

/// A byte channel that an [`Instrument`] can drive.
///
/// On top of [`Read`] and [`Write`], a port may support changing its timeout, dropping its input
/// buffer, sending a line break and shutting down. The defaults do nothing or report the
/// operation as unsupported.
pub trait Port: Read + Write {
    /// Apply a new read (and, if supported, write) timeout to the port.
    fn set_port_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
        Ok(())
    }

    /// Drop all bytes that are waiting in the input buffer.
    fn clear_input_buffer(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    /// Send a line break.
    fn send_break(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            ErrorKind::Unsupported,
            "port cannot send a break",
        ))
    }

    /// Shut the port down.
    fn shutdown(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for VecDeque<u8> {
    fn clear_input_buffer(&mut self) -> std::io::Result<()> {
        self.clear();
        Ok(())
    }
}

impl Port for TcpStream {
    fn set_port_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// A general instrument interface that can be built with any [`Port`].
///
/// This struct can be used to communicate with instruments over the various interfaces. Handy
/// shortcuts for creating serial and TCP/IP interfaces are provided as well, see
/// [`crate::TcpIpInterface`] and `SerialInterface`.
///
/// # Example
///
/// ```no_run
/// use std::{net::TcpStream, time::Duration};
///
/// use ivkit::Instrument;
///
/// let my_interface = TcpStream::connect("192.168.10.1:5025").unwrap();
/// let inst_interface = Instrument::new(my_interface, Duration::from_secs(3));
/// ```
pub struct Instrument<P: Port> {
    port: P,
    terminator: String,
    read_terminator: String,
    timeout: Duration,
    drain_poll: Duration,
}

impl<P: Port> Instrument<P> {
    /// Create a new instance of [`Instrument`] with a given port.
    ///
    /// Both terminators default to `"\n"`.
    pub fn new(port: P, timeout: Duration) -> Self {
        Self {
            port,
            terminator: "\n".to_string(),
            read_terminator: "\n".to_string(),
            timeout,
            drain_poll: HARD_RESET_POLL,
        }
    }

    /// Set the per-read timeout that is used while draining the input buffer.
    pub fn with_drain_poll(mut self, drain_poll: Duration) -> Self {
        self.drain_poll = drain_poll;
        self
    }
}

impl<P: Port> InstrumentInterface for Instrument<P> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError> {
        self.port.read_exact(buf)?;
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<usize, InstrumentError> {
        let written = self.port.write(data)?;
        self.port.flush()?;
        Ok(written)
    }

    fn get_terminator(&self) -> &str {
        self.terminator.as_str()
    }

    fn set_terminator(&mut self, terminator: &str) {
        self.terminator = terminator.to_string();
    }

    fn get_read_terminator(&self) -> &str {
        self.read_terminator.as_str()
    }

    fn set_read_terminator(&mut self, terminator: &str) {
        self.read_terminator = terminator.to_string();
    }

    fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), InstrumentError> {
        self.port.set_port_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), InstrumentError> {
        self.port.clear_input_buffer()?;
        Ok(())
    }

    fn drain_poll(&self) -> Duration {
        self.drain_poll
    }

    fn interrupt(&mut self) -> Result<(), InstrumentError> {
        match self.port.send_break() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Unsupported => {
                return Err(InstrumentError::InterfaceCommandNotSupported("interrupt"));
            }
            Err(err) => return Err(err.into()),
        }
        self.write_raw(&[INTERRUPT_BYTE])?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        self.port.shutdown()?;
        Ok(())
    }
}

/// The error enum for the transport layer.
///
/// For any command sending or querying, interfaces return either an empty result or a result with
/// the query where this Error is the alternative. [`InstrumentError`] makes it easy to propagate
/// all the sending commands, querying errors forward with the `?` operator such that errors
/// propagate nicely.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstrumentError {
    /// The interface does not support the requested operation, e.g., sending a break over a TCP
    /// socket.
    #[error("The interface does not support the operation: {0}")]
    InterfaceCommandNotSupported(&'static str),
    /// An address string could not be parsed.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The address as given.
        address: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Error when an invalid argument is passed to a function. This error contains only an error
    /// message, but no arguments. It is intended for the user.
    #[error("{0}")]
    InvalidArgument(String),
    /// Error when reading from/writing to an interface. See [`std::io::Error`] for more details.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Instrument response could not be parsed because it was unexpected by the driver. This error
    /// contains the response that was received from the instrument.
    #[error("Response from instrument could not be parsed. Response was: {0}")]
    ResponseParseError(String),
    #[cfg(feature = "serial")]
    /// Serial port errors can occur when opening a serial interface. See the [`serialport::Error`]
    /// documentation for more information.
    #[error(transparent)]
    Serialport(#[from] serialport::Error),
    /// Fewer bytes than requested went out on the wire.
    #[error("Short write for command {command:?}: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// The command, without terminator.
        command: String,
        /// Bytes that should have been written, terminator included.
        expected: usize,
        /// Bytes that actually were written.
        written: usize,
    },
    /// Timeout occurred while waiting for a response from the instrument. The error contains the
    /// timeout that was exceeded.
    #[error(
        "Timeout occured while waiting for a response from the instrument. Timeout was set to {0:?}."
    )]
    Timeout(Duration),
    /// Timeout occurred while waiting for a response to a query. The error contains the query
    /// that was sent and the timeout that was exceeded.
    #[error(
        "Timeout occured while waiting for a response to query: {query}. Timeout was set to {timeout:?}."
    )]
    TimeoutQuery {
        /// The query that timed out.
        query: String,
        /// The timeout that was set.
        timeout: Duration,
    },
    /// The address names a scheme that no interface exists for.
    #[error("Unsupported address scheme: {0}")]
    UnsupportedScheme(String),
}

impl InstrumentError {
    /// Whether this error means that a read or write ran into its timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            InstrumentError::Timeout(_) | InstrumentError::TimeoutQuery { .. } => true,
            InstrumentError::Io(err) => {
                matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
            }
            _ => false,
        }
    }
}
