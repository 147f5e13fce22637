//! Factories that turn an [`Address`] into an open interface.
//!
//! Drivers take a factory by value instead of opening interfaces themselves, so tests can hand
//! in scripted loopbacks and nothing has to be registered globally.

use log::debug;

use crate::{Address, InstrumentError, InstrumentInterface, reclaim_session};

/// Opens interfaces for addresses, and cleans up after them.
pub trait InterfaceFactory {
    /// The interface type this factory produces.
    type Interface: InstrumentInterface;

    /// Open a new interface for the address.
    fn open(&mut self, address: &Address) -> Result<Self::Interface, InstrumentError>;

    /// Release anything the instrument might still hold for a previous connection.
    ///
    /// Called after an interface was closed. Must never fail.
    fn cleanup(&mut self, _address: &Address) {}
}

/// The factory that opens real serial ports and sockets.
///
/// A socket's stale session is reclaimed once per attempt, see [`crate::reclaim_session`]:
/// either on cleanup, or before opening if no cleanup of the same address came first. Serial
/// addresses need the `serial` feature.
#[derive(Debug, Default)]
pub struct SystemInterfaceFactory {
    reclaimed: Option<Address>,
}

impl InterfaceFactory for SystemInterfaceFactory {
    type Interface = Box<dyn InstrumentInterface + Send>;

    fn open(&mut self, address: &Address) -> Result<Self::Interface, InstrumentError> {
        let reclaimed = self.reclaimed.take();
        if let Some(settings) = address.socket_settings() {
            if reclaimed.as_ref() != Some(address) {
                debug!("Reclaiming socket session on {address}");
                reclaim_session(settings);
            }
            let instrument = crate::TcpIpInterface::from_settings(settings)?;
            return Ok(Box::new(instrument));
        }
        open_serial(address)
    }

    fn cleanup(&mut self, address: &Address) {
        if let Some(settings) = address.socket_settings() {
            debug!("Reclaiming socket session on {address}");
            reclaim_session(settings);
            self.reclaimed = Some(address.clone());
        }
    }
}

#[cfg(feature = "serial")]
fn open_serial(address: &Address) -> Result<Box<dyn InstrumentInterface + Send>, InstrumentError> {
    let settings = address.serial_settings().ok_or_else(|| {
        InstrumentError::InvalidArgument(format!("{address} is not a serial address"))
    })?;
    Ok(Box::new(crate::SerialInterface::from_settings(settings)?))
}

#[cfg(not(feature = "serial"))]
fn open_serial(address: &Address) -> Result<Box<dyn InstrumentInterface + Send>, InstrumentError> {
    Err(InstrumentError::UnsupportedScheme(format!(
        "{address} (serial support not compiled in)"
    )))
}
