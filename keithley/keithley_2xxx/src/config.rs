//! Session configuration as supplied by the caller.
//!
//! Nothing in here reads files. The structures derive [`serde::Deserialize`], so whoever loads
//! the lab configuration can hand a section of it over directly:
//!
//! ```
//! use keithley_2xxx::{SessionConfig, Wiring};
//!
//! let config: SessionConfig = toml::from_str(
//!     r#"
//!     wiring = "four-wire"
//!     nplc = 10.0
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.wiring, Wiring::FourWire);
//! assert_eq!(config.line_frequency_hz, 50.0);
//! ```

use std::{fmt::Display, str::FromStr};

use serde::Deserialize;

use crate::SmuError;

/// How the device under test is wired to the instrument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Wiring {
    /// Sense on the force leads.
    #[default]
    TwoWire,
    /// Separate sense leads (remote sense).
    FourWire,
}

/// Which terminals of the instrument are used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Terminals {
    /// Front panel.
    #[default]
    Front,
    /// Rear panel.
    Rear,
}

/// The source-measure channel of a TSP instrument. SCPI instruments only have one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum SmuChannel {
    /// The first channel.
    #[default]
    #[serde(rename = "smua")]
    A,
    /// The second channel of two-channel models.
    #[serde(rename = "smub")]
    B,
}

impl SmuChannel {
    /// Zero based index of the channel.
    pub fn index(&self) -> usize {
        match self {
            SmuChannel::A => 0,
            SmuChannel::B => 1,
        }
    }

    /// The name of the channel as used in commands.
    pub fn name(&self) -> &'static str {
        match self {
            SmuChannel::A => "smua",
            SmuChannel::B => "smub",
        }
    }

    /// All channels of an instrument with the given number of channels.
    pub(crate) fn all(num_channels: usize) -> impl Iterator<Item = SmuChannel> {
        [SmuChannel::A, SmuChannel::B].into_iter().take(num_channels)
    }
}

impl Display for SmuChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How contacts are verified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContactCheckMode {
    /// No check, every check passes.
    #[default]
    #[serde(rename = "none")]
    Disabled,
    /// The instrument's native contact check.
    Internal,
    /// Relay-steered low current check via the digital output.
    External,
}

/// Parameters of the contact check.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContactCheckConfig {
    /// The mode that `Session::enable_configured_contact_check` enables.
    pub mode: ContactCheckMode,
    /// A contact passes below this resistance.
    pub threshold_ohm: f64,
    /// Time for the relays to settle after switching.
    pub relay_debounce_ms: u64,
    /// Current sourced through the contact in external mode.
    pub sense_current_a: f64,
    /// Compliance voltage while probing in external mode.
    pub compliance_voltage_v: f64,
    /// Integration time while checking.
    pub nplc: f64,
    /// Wait between re-arming and reading the output state back in internal mode.
    pub rearm_settle_ms: u64,
    /// Digital output level that steers the relays to the hi side.
    pub dio_hi: u8,
    /// Digital output level that steers the relays to the lo side.
    pub dio_lo: u8,
    /// Digital output level that releases the relays.
    pub dio_idle: u8,
}

impl Default for ContactCheckConfig {
    fn default() -> Self {
        Self {
            mode: ContactCheckMode::Disabled,
            threshold_ohm: 33.3,
            relay_debounce_ms: 50,
            sense_current_a: 0.001,
            compliance_voltage_v: 3.0,
            nplc: 0.1,
            rearm_settle_ms: 100,
            dio_hi: 13,
            dio_lo: 14,
            dio_idle: 15,
        }
    }
}

/// Everything a session needs to know beyond the address.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Wiring applied during baseline setup.
    pub wiring: Wiring,
    /// Terminals applied during baseline setup.
    pub terminals: Terminals,
    /// Integration time in power-line cycles.
    pub nplc: f64,
    /// Mains frequency for the sweep timing model.
    pub line_frequency_hz: f64,
    /// Voltage protection ceiling.
    pub voltage_protection_v: f64,
    /// Active channel on TSP instruments.
    pub channel: SmuChannel,
    /// Log sweep statistics at info instead of debug level.
    pub log_sweep_stats: bool,
    /// Contact check parameters.
    pub contact_check: ContactCheckConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wiring: Wiring::TwoWire,
            terminals: Terminals::Front,
            nplc: 1.0,
            line_frequency_hz: crate::timing::DEFAULT_LINE_FREQUENCY_HZ,
            voltage_protection_v: 20.0,
            channel: SmuChannel::A,
            log_sweep_stats: false,
            contact_check: ContactCheckConfig::default(),
        }
    }
}

/// Sense range policy of a measurement configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SenseRange {
    /// Lock the sense range to the compliance setting.
    FollowCompliance,
    /// Let the instrument autorange.
    Auto,
    /// A fixed range.
    Fixed(f64),
}

impl FromStr for SenseRange {
    type Err = SmuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f" | "follow-compliance" => Ok(SenseRange::FollowCompliance),
            "a" | "auto" => Ok(SenseRange::Auto),
            other => other
                .parse::<f64>()
                .map(SenseRange::Fixed)
                .map_err(|_| SmuError::Config(format!("Invalid sense range: '{s}'"))),
        }
    }
}
