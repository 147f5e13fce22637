//! Errors returned by the driver.

use ivkit::InstrumentError;
use thiserror::Error;

use crate::{ContactSide, Family};

/// The error enum for the Keithley 2xxx driver.
///
/// Transport failures during an operation on a connected session arrive as
/// [`SmuError::Instrument`], so `?` composes with [`InstrumentError`]. Failures while connecting
/// carry the address they happened on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SmuError {
    /// Opening, writing to or reading from the transport failed while connecting.
    #[error("Transport failure on {address}: {source}")]
    Transport {
        /// The address that was being connected to.
        address: String,
        /// The underlying transport error.
        #[source]
        source: InstrumentError,
    },
    /// The channel stayed dirty (or would not open) for every connection attempt.
    #[error("Gave up connecting to {address} after {attempts} attempts. Last error: {last_error}")]
    ConnectionExhausted {
        /// The address that was being connected to.
        address: String,
        /// Number of attempts made.
        attempts: usize,
        /// What went wrong on the last attempt.
        last_error: String,
    },
    /// The identity string did not match any known instrument.
    #[error("Unsupported instrument: {0}")]
    UnsupportedInstrument(String),
    /// The instrument runs the wrong command language. A switch was requested, but it only takes
    /// effect after a power cycle.
    #[error(
        "Instrument at {address} runs command set '{found}', expected '{expected}'. \
         The switch was requested: power cycle the instrument and connect again."
    )]
    LanguageMode {
        /// The address of the instrument.
        address: String,
        /// The language the instrument reported.
        found: String,
        /// The language the driver needs.
        expected: String,
    },
    /// An invalid combination of parameters, or an operation this instrument family does not
    /// offer.
    #[error("{0}")]
    Config(String),
    /// A dialect table lacks a command for an operation.
    #[error("Dialect for {family} has no command for '{operation}'")]
    MissingCommand {
        /// The family whose table is incomplete.
        family: Family,
        /// The operation without command.
        operation: &'static str,
    },
    /// The measurement response did not contain the expected number of fields.
    #[error("Malformed response: expected {expected} fields, got {actual}. Response was: {response}")]
    MalformedResponse {
        /// Number of fields expected.
        expected: usize,
        /// Number of fields received.
        actual: usize,
        /// The raw response.
        response: String,
    },
    /// The contact check did not pass.
    #[error(
        "Contact check failed on {side} side: measured {} against a threshold of {threshold} Ohm{}",
        fmt_resistance(.resistance),
        compliance_note(.in_compliance)
    )]
    ContactCheckFailure {
        /// The side that was checked.
        side: ContactSide,
        /// The measured resistance, if one was taken.
        resistance: Option<f64>,
        /// The pass/fail threshold.
        threshold: f64,
        /// Whether the source was in compliance during the reading.
        in_compliance: bool,
    },
    /// The instrument failed its self test during connect.
    #[error("Instrument self test failed, instrument reported: {0}")]
    SelfTestFailure(String),
    /// The output did not switch off, so relays were not touched.
    #[error("Output did not switch off. Refusing to steer contact relays while it is live.")]
    OutputStillOn,
    /// The session has no open transport.
    #[error("Session is not connected")]
    NotConnected,
    /// Transport error during an operation, see [`InstrumentError`].
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

fn fmt_resistance(resistance: &Option<f64>) -> String {
    match resistance {
        Some(r) => format!("{r} Ohm"),
        None => "no resistance".to_string(),
    }
}

fn compliance_note(in_compliance: &bool) -> &'static str {
    if *in_compliance {
        " (source in compliance)"
    } else {
        ""
    }
}
