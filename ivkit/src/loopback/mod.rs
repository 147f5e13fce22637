//! The loopback module provides an instrument simulator for testing purposes.
//!
//! The [`LoopbackInterfaceString`] allows to test instrument drivers that communicate using
//! strings with a fixed terminator at the end of every line. The [`LoopbackFactory`] hands such
//! interfaces to drivers that open their interface from an [`crate::Address`].

mod loopback_interface_string;

pub use loopback_interface_string::*;

use std::collections::VecDeque;

use crate::{Address, InstrumentError, InterfaceFactory, InstrumentInterface};

/// A self-incrementing index structure that by default starts at 0 and increments whenever `next`
/// is called.
#[derive(Debug, Default)]
struct IncrIndex {
    index: usize,
}

impl IncrIndex {
    fn next(&mut self) -> usize {
        let current = self.index;
        self.index += 1;
        current
    }
}

/// A factory that hands out pre-built interfaces in order.
///
/// Every call to `open` takes the next interface. Once all are used up, `open` fails with an
/// I/O error, just like an instrument that does not answer. Addresses are ignored.
///
/// # Example
///
/// ```
/// use ivkit::{Address, InterfaceFactory, LoopbackFactory, LoopbackInterfaceString};
///
/// let lbk = LoopbackInterfaceString::new(vec![], vec![], "\n");
/// let mut factory = LoopbackFactory::new(vec![lbk]);
/// let addr: Address = "socket://localhost:5025".parse().unwrap();
///
/// assert!(factory.open(&addr).is_ok());
/// assert!(factory.open(&addr).is_err());
/// ```
#[derive(Debug)]
pub struct LoopbackFactory<T: InstrumentInterface> {
    interfaces: VecDeque<T>,
    opened: usize,
    cleanups: usize,
}

impl<T: InstrumentInterface> LoopbackFactory<T> {
    /// Create a new factory that hands out the given interfaces, first one first.
    pub fn new(interfaces: Vec<T>) -> Self {
        Self {
            interfaces: interfaces.into(),
            opened: 0,
            cleanups: 0,
        }
    }

    /// Number of interfaces handed out so far.
    pub fn opened(&self) -> usize {
        self.opened
    }

    /// Number of times `cleanup` was called.
    pub fn cleanups(&self) -> usize {
        self.cleanups
    }
}

impl<T: InstrumentInterface> InterfaceFactory for LoopbackFactory<T> {
    type Interface = T;

    fn open(&mut self, _address: &Address) -> Result<T, InstrumentError> {
        let interface = self.interfaces.pop_front().ok_or_else(|| {
            InstrumentError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no loopback interface left",
            ))
        })?;
        self.opened += 1;
        Ok(interface)
    }

    fn cleanup(&mut self, _address: &Address) {
        self.cleanups += 1;
    }
}

// Tests of internal functionality
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incrementing_index() {
        let mut idx = IncrIndex::default();
        assert_eq!(0, idx.next());
        assert_eq!(1, idx.next());
        assert_eq!(2, idx.next());
    }
}
