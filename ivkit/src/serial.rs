//! This module provides the implementation for an instrument controlled via a serial port.
//!
//! It uses the blocking [`serialport`] crate.

use std::{thread, time::Duration};

use log::info;
use serialport::{ClearBuffer, SerialPort};

use crate::{
    DataBits, FlowControl, Instrument, InstrumentError, InstrumentInterface, Parity, Port,
    SerialSettings, StopBits,
};

/// How long the line is held in the break condition.
const BREAK_DURATION: Duration = Duration::from_millis(50);

impl Port for Box<dyn SerialPort> {
    fn set_port_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.set_timeout(timeout)?;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> std::io::Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn send_break(&mut self) -> std::io::Result<()> {
        self.set_break()?;
        thread::sleep(BREAK_DURATION);
        self.clear_break()?;
        Ok(())
    }
}

/// A blocking serial port implementation using the [`serialport`] crate.
#[derive(Debug)]
pub struct SerialInterface {}

impl SerialInterface {
    /// Open a serial port from parsed address settings.
    ///
    /// With hardware flow control, RTS is asserted right after opening, since some adapters
    /// start with it low.
    pub fn from_settings(
        settings: &SerialSettings,
    ) -> Result<Instrument<Box<dyn SerialPort>>, InstrumentError> {
        let spb = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(match settings.data_bits {
                DataBits::Five => serialport::DataBits::Five,
                DataBits::Six => serialport::DataBits::Six,
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            })
            .parity(match settings.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            })
            .stop_bits(match settings.stop_bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
            })
            .flow_control(match settings.flow_control {
                FlowControl::None => serialport::FlowControl::None,
                FlowControl::Software => serialport::FlowControl::Software,
                FlowControl::Hardware => serialport::FlowControl::Hardware,
            })
            .timeout(settings.timeout);

        let mut port = spb.open()?;
        if settings.flow_control == FlowControl::Hardware {
            port.write_request_to_send(true)?;
        }
        let mut instrument = Instrument::new(port, settings.timeout);
        instrument.set_terminator(&settings.write_terminator);
        instrument.set_read_terminator(&settings.read_terminator);
        info!(
            "Opened serial port {} at {} baud",
            settings.port, settings.baud_rate
        );
        Ok(instrument)
    }
}
