//! This module provides the implementation for an instrument controlled via TCP/IP.
//!
//! It includes a blocking implementation using the [`std::net::TcpStream`] struct, together with
//! the helpers that reclaim a session a previous client left open.
//!
//! The socket is opened with [`TcpIpInterface::from_settings`], usually by the
//! [`crate::SystemInterfaceFactory`].

use std::{
    io::Write,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

use log::{debug, info};

use crate::{Instrument, InstrumentError, InstrumentInterface, SocketSettings};

/// Timeout for the short-lived connections made during cleanup.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause after cleanup so the instrument can tear its old session down.
pub const CLEANUP_SETTLE: Duration = Duration::from_millis(500);

/// Per-read timeout while draining a socket's input buffer.
pub const SOCKET_DRAIN_POLL: Duration = Duration::from_millis(500);

/// Token that asks an instrument's dead-session port to drop its current client.
pub const DEAD_SESSION_TOKEN: &[u8] = b"goodbye";

/// A blocking TCP/IP implementation using the [`std::net::TcpStream`] struct.
#[derive(Debug)]
pub struct TcpIpInterface {}

impl TcpIpInterface {
    /// Open a socket from parsed settings.
    ///
    /// Terminators and the timeout are taken from the settings. Reclaiming a stale session
    /// beforehand is up to the caller, see [`reclaim_session`].
    pub fn from_settings(
        settings: &SocketSettings,
    ) -> Result<Instrument<TcpStream>, InstrumentError> {
        let addr = resolve(&settings.host, settings.port)?;
        let stream = TcpStream::connect_timeout(&addr, settings.timeout)?;
        stream.set_nodelay(true)?;
        let mut instrument =
            Instrument::new(stream, settings.timeout).with_drain_poll(SOCKET_DRAIN_POLL);
        instrument.set_timeout(settings.timeout)?;
        instrument.set_terminator(&settings.write_terminator);
        instrument.set_read_terminator(&settings.read_terminator);
        info!("Opened socket to {}:{}", settings.host, settings.port);
        Ok(instrument)
    }
}

/// Connect to the instrument and close straight away.
///
/// Some instruments only accept one client. Connecting and shutting down makes them drop a
/// half-open connection that a crashed client left behind. Failures are logged and ignored.
pub fn socket_cleanup(host: &str, port: u16) {
    match short_connection(host, port) {
        Ok(stream) => {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Socket cleanup on {host}:{port} done");
        }
        Err(err) => debug!("Socket cleanup on {host}:{port} skipped: {err}"),
    }
}

/// Tell the instrument's dead-session port to drop whoever is connected.
///
/// Sends [`DEAD_SESSION_TOKEN`] and shuts the connection down. Failures are logged and ignored,
/// since not every instrument listens on this port.
pub fn dead_session_cleanup(host: &str, dead_port: u16) {
    let result = short_connection(host, dead_port).and_then(|mut stream| {
        stream.write_all(DEAD_SESSION_TOKEN)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Both)?;
        Ok(())
    });
    match result {
        Ok(()) => debug!("Dead session cleanup on {host}:{dead_port} done"),
        Err(err) => debug!("Dead session cleanup on {host}:{dead_port} skipped: {err}"),
    }
}

/// Full cleanup sequence for a socket address: plain, dead-session, plain again, then settle.
pub fn reclaim_session(settings: &SocketSettings) {
    socket_cleanup(&settings.host, settings.port);
    if let Some(dead_port) = settings.dead_session_port {
        dead_session_cleanup(&settings.host, dead_port);
        socket_cleanup(&settings.host, settings.port);
    }
    thread::sleep(CLEANUP_SETTLE);
}

fn short_connection(host: &str, port: u16) -> Result<TcpStream, InstrumentError> {
    let addr = resolve(host, port)?;
    let stream = TcpStream::connect_timeout(&addr, CLEANUP_TIMEOUT)?;
    stream.set_read_timeout(Some(CLEANUP_TIMEOUT))?;
    stream.set_write_timeout(Some(CLEANUP_TIMEOUT))?;
    Ok(stream)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, InstrumentError> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        InstrumentError::InvalidArgument(format!("Host {host}:{port} did not resolve"))
    })
}
