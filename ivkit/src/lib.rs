//! ivkit: the transport layer underneath our source-measure unit drivers.
//!
//! This crate owns everything that sits between a driver and the bytes on the wire. It provides
//! the [`InstrumentInterface`] trait with sensible default implementations for terminator-based
//! ASCII protocols, a generic [`Instrument`] that wraps anything implementing [`Port`], and the
//! constructors for the interfaces we actually use in the lab.
//!
//! # Currently implemented interfaces are:
//! - Serial (blocking) using the [`serialport`] crate, behind the `serial` feature.
//! - TCP/IP (blocking) using [`std::net::TcpStream`].
//!
//! Interfaces are usually not built by hand. Instead, an [`Address`] string such as
//! `socket://10.0.0.5:5025` or `hw:///dev/ttyUSB0?baudrate=57600` is parsed and handed to an
//! [`InterfaceFactory`], which opens the matching interface. The [`SystemInterfaceFactory`] opens
//! real hardware, while the [`LoopbackFactory`] hands out scripted [`LoopbackInterfaceString`]
//! interfaces for driver tests.
//!
//! # Ghost connections
//!
//! Instruments that were left in the middle of a transaction by a crashed client keep streaming
//! stale bytes into a fresh connection. [`InstrumentInterface::hard_reset_input`] drains the input
//! and reports whether the channel went quiet. For sockets, the factory additionally reclaims the
//! instrument's previous session before connecting, see [`dead_session_cleanup`].
//!
//! # License
//!
//! Licensed under either of
//!
//! - Apache License, Version 2.0 ([LICENSE-APACHE](http://www.apache.org/licenses/LICENSE-2.0))
//! - MIT license ([LICENSE-MIT](http://opensource.org/licenses/MIT))
//!
//! at your option.

#![warn(missing_docs)]

mod address;
mod factory;
mod instrument;
mod loopback;
#[cfg(feature = "serial")]
mod serial;
mod tcp_ip;

pub use address::{
    Address, DataBits, FlowControl, Parity, Scheme, SerialSettings, SocketSettings, StopBits,
};
pub use factory::{InterfaceFactory, SystemInterfaceFactory};
pub use instrument::{Instrument, InstrumentError, Port};
pub use loopback::{LoopbackFactory, LoopbackInterfaceString};
#[cfg(feature = "serial")]
pub use serial::SerialInterface;
pub use tcp_ip::{
    DEAD_SESSION_TOKEN, TcpIpInterface, dead_session_cleanup, reclaim_session, socket_cleanup,
};

use std::{
    io::ErrorKind,
    time::{Duration, Instant},
};

use log::{debug, trace};

/// Timeout used if an interface does not specify one itself.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Per-read timeout while draining input in [`InstrumentInterface::hard_reset_input`].
pub const HARD_RESET_POLL: Duration = Duration::from_millis(200);

/// If bytes are still arriving after this long, the drain gives up and reports a ghost.
pub const HARD_RESET_WINDOW: Duration = Duration::from_secs(2);

/// The interrupt byte (DC2) sent after a break to abort a running instrument transaction.
pub const INTERRUPT_BYTE: u8 = 0x12;

/// The main trait that every instrument interface must implement.
///
/// Only [`InstrumentInterface::read_exact`] and [`InstrumentInterface::write_raw`] are required.
/// Everything else has a default implementation that works for terminator-delimited ASCII
/// protocols. Interfaces that can change their timeout, clear their input buffer, or send a line
/// break should override the respective functions.
pub trait InstrumentInterface {
    /// Read exactly as many bytes from the instrument as fit into the buffer.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError>;

    /// Write raw bytes to the instrument and return how many bytes were actually written.
    ///
    /// Implementations must not retry partial writes themselves: the caller compares the count
    /// with the length of what it asked for.
    fn write_raw(&mut self, data: &[u8]) -> Result<usize, InstrumentError>;

    /// Get the terminator that is appended to every command.
    fn get_terminator(&self) -> &str {
        "\n"
    }

    /// Set the terminator that is appended to every command.
    fn set_terminator(&mut self, _terminator: &str) {}

    /// Get the terminator that ends every response. Defaults to the write terminator.
    fn get_read_terminator(&self) -> &str {
        self.get_terminator()
    }

    /// Set the terminator that ends every response.
    fn set_read_terminator(&mut self, _terminator: &str) {}

    /// Get the current timeout of the interface.
    fn get_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Set a new timeout for the interface.
    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), InstrumentError> {
        Err(InstrumentError::InterfaceCommandNotSupported("set_timeout"))
    }

    /// Send a command with the terminator appended.
    ///
    /// Fails with [`InstrumentError::ShortWrite`] if fewer bytes than the command plus its
    /// terminator went out.
    fn sendcmd(&mut self, cmd: &str) -> Result<(), InstrumentError> {
        let data = format!("{cmd}{}", self.get_terminator());
        trace!("-> {data:?}");
        let written = self.write_raw(data.as_bytes())?;
        if written != data.len() {
            return Err(InstrumentError::ShortWrite {
                command: cmd.to_string(),
                expected: data.len(),
                written,
            });
        }
        Ok(())
    }

    /// Write a string as is, without appending the terminator.
    fn write(&mut self, data: &str) -> Result<(), InstrumentError> {
        let written = self.write_raw(data.as_bytes())?;
        if written != data.len() {
            return Err(InstrumentError::ShortWrite {
                command: data.to_string(),
                expected: data.len(),
                written,
            });
        }
        Ok(())
    }

    /// Query the instrument with a command and return the response without terminator.
    fn query(&mut self, cmd: &str) -> Result<String, InstrumentError> {
        self.sendcmd(cmd)?;
        match self.read_until_terminator() {
            Err(InstrumentError::Timeout(timeout)) => Err(InstrumentError::TimeoutQuery {
                query: cmd.to_string(),
                timeout,
            }),
            other => other,
        }
    }

    /// Read from the instrument until the read terminator is found.
    ///
    /// The terminator is stripped exactly once. Anything in front of it, including whitespace,
    /// is returned untouched. If the terminator does not show up within the interface timeout,
    /// [`InstrumentError::Timeout`] is returned.
    fn read_until_terminator(&mut self) -> Result<String, InstrumentError> {
        let terminator = self.get_read_terminator().as_bytes().to_vec();
        let timeout = self.get_timeout();
        let mut response: Vec<u8> = Vec::new();
        let mut single_buf = [0u8];

        let tic = Instant::now();
        while tic.elapsed() < timeout {
            match self.read_exact(&mut single_buf) {
                Ok(()) => response.push(single_buf[0]),
                Err(err) if err.is_timeout() => return Err(InstrumentError::Timeout(timeout)),
                Err(err) => return Err(err),
            }
            if !terminator.is_empty() && response.ends_with(&terminator) {
                response.truncate(response.len() - terminator.len());
                let response = String::from_utf8(response).map_err(|err| {
                    InstrumentError::ResponseParseError(
                        String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    )
                })?;
                trace!("<- {response:?}");
                return Ok(response);
            }
        }
        Err(InstrumentError::Timeout(timeout))
    }

    /// Discard any input that is pending in the receive buffer.
    fn clear_input(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Per-read timeout used while draining the input buffer.
    fn drain_poll(&self) -> Duration {
        HARD_RESET_POLL
    }

    /// Send a break and the interrupt byte to abort whatever the instrument is doing.
    fn interrupt(&mut self) -> Result<(), InstrumentError> {
        Err(InstrumentError::InterfaceCommandNotSupported("interrupt"))
    }

    /// Drain the input buffer and report whether the channel is healthy.
    ///
    /// Reads with a short timeout until a read times out. A clean timeout, or the end of the
    /// stream, returns `true`. If bytes keep arriving for longer than [`HARD_RESET_WINDOW`], or
    /// reading fails for another reason, something else is still talking on this channel and
    /// `false` is returned. The original timeout is restored in any case.
    fn hard_reset_input(&mut self) -> Result<bool, InstrumentError> {
        let original = self.get_timeout();
        self.set_timeout(self.drain_poll())?;

        let mut byte = [0u8];
        let mut drained = 0usize;
        let tic = Instant::now();
        let healthy = loop {
            match self.read_exact(&mut byte) {
                Ok(()) => {
                    drained += 1;
                    if tic.elapsed() > HARD_RESET_WINDOW {
                        break false;
                    }
                }
                Err(err) if err.is_timeout() => break true,
                Err(InstrumentError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    break true;
                }
                Err(err) => {
                    debug!("Input drain stopped on error: {err}");
                    break false;
                }
            }
        };
        if drained > 0 {
            debug!("Discarded {drained} stale bytes from the input buffer");
        }

        self.set_timeout(original)?;
        Ok(healthy)
    }

    /// Close the interface. Further reads and writes will fail.
    fn close(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

impl<T: InstrumentInterface + ?Sized> InstrumentInterface for Box<T> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError> {
        (**self).read_exact(buf)
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<usize, InstrumentError> {
        (**self).write_raw(data)
    }

    fn get_terminator(&self) -> &str {
        (**self).get_terminator()
    }

    fn set_terminator(&mut self, terminator: &str) {
        (**self).set_terminator(terminator)
    }

    fn get_read_terminator(&self) -> &str {
        (**self).get_read_terminator()
    }

    fn set_read_terminator(&mut self, terminator: &str) {
        (**self).set_read_terminator(terminator)
    }

    fn get_timeout(&self) -> Duration {
        (**self).get_timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), InstrumentError> {
        (**self).set_timeout(timeout)
    }

    fn sendcmd(&mut self, cmd: &str) -> Result<(), InstrumentError> {
        (**self).sendcmd(cmd)
    }

    fn write(&mut self, data: &str) -> Result<(), InstrumentError> {
        (**self).write(data)
    }

    fn query(&mut self, cmd: &str) -> Result<String, InstrumentError> {
        (**self).query(cmd)
    }

    fn read_until_terminator(&mut self) -> Result<String, InstrumentError> {
        (**self).read_until_terminator()
    }

    fn clear_input(&mut self) -> Result<(), InstrumentError> {
        (**self).clear_input()
    }

    fn drain_poll(&self) -> Duration {
        (**self).drain_poll()
    }

    fn interrupt(&mut self) -> Result<(), InstrumentError> {
        (**self).interrupt()
    }

    fn hard_reset_input(&mut self) -> Result<bool, InstrumentError> {
        (**self).hard_reset_input()
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        (**self).close()
    }
}
