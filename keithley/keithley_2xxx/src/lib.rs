//! A rust driver for Keithley 2400 and 2600 series source-measure units.
//!
//! The driver treats two structurally different instrument families as one device. The 2400
//! series (including the graphical 2450 series in 2400 compatibility mode) speaks SCPI and has a
//! single channel, while the 2600 series speaks TSP and has one or two named channels. Which one
//! is connected is detected from the identity string. All commands come from a per-family
//! [`DialectCommands`] table, so callers only ever use typed operations.
//!
//! A [`Session`] connects to the instrument (retrying while the channel turns out to be a ghost
//! connection), resets it into a known baseline, and then alternates between configuring a DC
//! bias or a linear sweep and measuring. Optionally, contacts are verified before a measurement.
//! Teardown always runs, also when connecting failed halfway.
//!
//! # Example
//!
//! ```no_run
//! use keithley_2xxx::{DcSetup, ResistanceMode, SenseRange, SessionConfig, SourceFunction};
//!
//! let mut smu = keithley_2xxx::connect("socket://192.168.1.10:5025", 3, SessionConfig::default())
//!     .unwrap();
//! smu.configure_dc(&DcSetup {
//!     source: SourceFunction::Voltage,
//!     compliance: 0.04,
//!     set_point: 0.5,
//!     sense_range: SenseRange::FollowCompliance,
//!     resistance: ResistanceMode::Off,
//! })
//! .unwrap();
//! let records = smu.measure(1).unwrap();
//! println!("Current at 0.5 V: {} A", records[0].amps());
//! smu.disconnect();
//! ```

#![warn(missing_docs)]

mod config;
mod configure;
mod contact;
mod dialect;
mod error;
mod identity;
mod measure;
mod session;
mod timing;

pub use config::{
    ContactCheckConfig, ContactCheckMode, SenseRange, SessionConfig, SmuChannel, Terminals, Wiring,
};
pub use configure::{DcSetup, MeasurementSetup, ResistanceMode, STEP_QUERY_TIMEOUT, SweepSetup};
pub use contact::{ContactCheckResult, ContactCheckState, ContactSide};
pub use dialect::{
    CheckedSetting, DialectCommands, SCPI_2400, SCPI_2400G, Syntax, TSP_2600, TSP_2600B,
    Template, commands_for,
};
pub use error::SmuError;
pub use identity::{Family, InstrumentIdentity, Model, StatusBits};
pub use measure::{
    CancelToken, MeasurementRecord, StatusWord, SweepStats, Until, parse_records,
};
pub use session::{
    CONTACT_CHECK_OPTION, MAX_OPC_RETRIES, MeasurementMode, SCPI_NOT_A_NUMBER, SELF_TEST_TIMEOUT,
    Session, SessionPhase, SessionState, SourceFunction, TeardownReport, TeardownStep,
};
pub use timing::{
    AUTO_STEP_DELAY_MS, DEFAULT_LINE_FREQUENCY_HZ, MEASURED_CHANNELS, SAFETY_MARGIN,
    SAMPLE_OVERHEAD_MS, StepDelay, SweepTiming, TRANSPORT_ALLOWANCE_MS,
};

use ivkit::{InterfaceFactory, SystemInterfaceFactory};
use log::warn;

/// Connect to an instrument on real hardware.
///
/// See [`connect_with`].
pub fn connect(
    address: &str,
    max_retries: usize,
    config: SessionConfig,
) -> Result<Session<SystemInterfaceFactory>, SmuError> {
    connect_with(address, max_retries, config, SystemInterfaceFactory::default())
}

/// Connect to an instrument, opening the transport with the given factory.
///
/// If connecting fails at any point, the session is torn down before the error is returned.
///
/// # Arguments
/// - `address`: Address string, e.g. `socket://10.0.0.5:5025` or `/dev/ttyUSB0`.
/// - `max_retries`: How often to reopen the transport while it is a ghost connection.
/// - `config`: The session configuration.
/// - `factory`: Opens the transport for the address.
pub fn connect_with<F: InterfaceFactory>(
    address: &str,
    max_retries: usize,
    config: SessionConfig,
    factory: F,
) -> Result<Session<F>, SmuError> {
    let mut session = Session::new(address, config, factory)?;
    if let Err(err) = session.connect(max_retries) {
        let report = session.disconnect();
        if !report.is_clean() {
            warn!(
                "Teardown after failed connect to {address} left {} failed steps",
                report.failures().len()
            );
        }
        return Err(err);
    }
    Ok(session)
}
