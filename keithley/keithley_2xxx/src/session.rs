//! The session manager: connecting, identifying, baseline setup and teardown.

use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use ivkit::{Address, InstrumentError, InstrumentInterface, InterfaceFactory, Scheme};
use log::{debug, error, info, warn};

use crate::{
    ContactCheckState, DialectCommands, Family, InstrumentIdentity, MeasurementSetup,
    SessionConfig, SmuChannel, SmuError, SweepStats, Terminals, Wiring,
    dialect::{Template, commands_for, render},
    identity::IDN_QUERY,
};

/// How often the operation complete query is repeated before giving up.
pub const MAX_OPC_RETRIES: usize = 5;

/// Timeout while the instrument runs its self test.
pub const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What SCPI instruments send for a value that is not a number.
pub const SCPI_NOT_A_NUMBER: f64 = 9.91e37;

/// Token in the option query response of instruments with a native contact check.
pub const CONTACT_CHECK_OPTION: &str = "CONTACT-CHECK";

/// Where a session is in its life cycle.
///
/// A session starts out `Disconnected` and ends up `Ready` after a successful connect. A failed
/// connect leaves it in `HandshakeFailed` or `Unsupported` until [`Session::disconnect`] brings
/// it back to `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport is open.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// The transport or the handshake failed.
    HandshakeFailed,
    /// Asking the instrument who it is.
    Identifying,
    /// The identity matched no known instrument.
    Unsupported,
    /// Reset and baseline setup.
    Resetting,
    /// Ready for configuration and measurements.
    Ready,
}

/// What is sourced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFunction {
    /// Source voltage, sense current.
    Voltage,
    /// Source current, sense voltage.
    Current,
}

impl SourceFunction {
    /// The function that is sensed, and limited by compliance, while sourcing this one.
    pub fn sensed(&self) -> SourceFunction {
        match self {
            SourceFunction::Voltage => SourceFunction::Current,
            SourceFunction::Current => SourceFunction::Voltage,
        }
    }
}

/// The currently configured measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeasurementMode {
    /// Nothing configured since connect.
    Unconfigured,
    /// DC bias, with or without resistance.
    Dc {
        /// Whether records carry a resistance field.
        resistance: bool,
    },
    /// A linear sweep.
    Sweep {
        /// Points per sweep.
        n_points: usize,
    },
}

impl MeasurementMode {
    /// Number of fields per record, or `None` if unconfigured.
    pub fn fields_per_sample(&self) -> Option<usize> {
        match self {
            MeasurementMode::Unconfigured => None,
            MeasurementMode::Dc { resistance: true } => Some(5),
            MeasurementMode::Dc { resistance: false } | MeasurementMode::Sweep { .. } => Some(4),
        }
    }
}

/// Mutable state of a session.
///
/// Only the session itself changes it, through its named operations.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    pub(crate) identity: Option<InstrumentIdentity>,
    pub(crate) dialect: Option<&'static DialectCommands>,
    pub(crate) source: SourceFunction,
    pub(crate) wiring: Wiring,
    pub(crate) terminals: Terminals,
    pub(crate) mode: MeasurementMode,
    pub(crate) setup: Option<MeasurementSetup>,
    pub(crate) nplc: f64,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) sweep_timeout: Option<Duration>,
    pub(crate) options: Option<String>,
    pub(crate) has_contact_check_option: bool,
    pub(crate) contact: ContactCheckState,
    pub(crate) last_sweep: Option<SweepStats>,
}

impl SessionState {
    fn new(config: &SessionConfig) -> Self {
        Self {
            identity: None,
            dialect: None,
            source: SourceFunction::Voltage,
            wiring: config.wiring,
            terminals: config.terminals,
            mode: MeasurementMode::Unconfigured,
            setup: None,
            nplc: config.nplc,
            default_timeout: None,
            sweep_timeout: None,
            options: None,
            has_contact_check_option: false,
            contact: ContactCheckState::default(),
            last_sweep: None,
        }
    }

    /// Identity of the connected instrument.
    pub fn identity(&self) -> Option<&InstrumentIdentity> {
        self.identity.as_ref()
    }

    /// The resolved command table.
    pub fn dialect(&self) -> Option<&'static DialectCommands> {
        self.dialect
    }

    /// Current source function.
    pub fn source(&self) -> SourceFunction {
        self.source
    }

    /// Current wiring.
    pub fn wiring(&self) -> Wiring {
        self.wiring
    }

    /// Current terminals.
    pub fn terminals(&self) -> Terminals {
        self.terminals
    }

    /// Currently configured measurement.
    pub fn mode(&self) -> MeasurementMode {
        self.mode
    }

    /// The setup behind the current measurement mode, if a caller configured it.
    pub fn setup(&self) -> Option<&MeasurementSetup> {
        self.setup.as_ref()
    }

    /// Integration time in power-line cycles.
    pub fn nplc(&self) -> f64 {
        self.nplc
    }

    /// The transport timeout found at connect.
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Read timeout of the configured sweep.
    pub fn sweep_timeout(&self) -> Option<Duration> {
        self.sweep_timeout
    }

    /// Installed options as reported by the instrument.
    pub fn options(&self) -> Option<&str> {
        self.options.as_deref()
    }

    /// Whether the instrument has the native contact check option.
    pub fn has_contact_check_option(&self) -> bool {
        self.has_contact_check_option
    }

    /// State of the contact checker.
    pub fn contact(&self) -> &ContactCheckState {
        &self.contact
    }

    /// Statistics of the last sweep read.
    pub fn last_sweep(&self) -> Option<&SweepStats> {
        self.last_sweep.as_ref()
    }
}

/// The steps of a teardown, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    /// Abort any running acquisition.
    Abort,
    /// Reset the instrument to a known state.
    ResetDevice,
    /// Switch the output off.
    OutputOff,
    /// Hand control back to the front panel.
    GoLocal,
    /// Discard pending input.
    DrainInput,
    /// Close the transport.
    CloseTransport,
    /// Reclaim the instrument's socket session.
    SocketCleanup,
}

/// Outcome of [`Session::disconnect`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    failures: Vec<(TeardownStep, String)>,
}

impl TeardownReport {
    fn run<T>(&mut self, step: TeardownStep, result: Result<T, SmuError>) {
        if let Err(err) = result {
            warn!("Teardown step {step:?} failed: {err}");
            self.failures.push((step, err.to_string()));
        }
    }

    /// The steps that failed, with their error messages.
    pub fn failures(&self) -> &[(TeardownStep, String)] {
        &self.failures
    }

    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sets a timeout on an interface and restores the previous one when dropped.
pub(crate) struct TimeoutGuard<'a, I: InstrumentInterface> {
    interface: &'a mut I,
    previous: Duration,
}

impl<'a, I: InstrumentInterface> TimeoutGuard<'a, I> {
    pub(crate) fn new(interface: &'a mut I, timeout: Duration) -> Result<Self, InstrumentError> {
        let previous = interface.get_timeout();
        interface.set_timeout(timeout)?;
        Ok(Self {
            interface,
            previous,
        })
    }
}

impl<I: InstrumentInterface> Deref for TimeoutGuard<'_, I> {
    type Target = I;

    fn deref(&self) -> &Self::Target {
        self.interface
    }
}

impl<I: InstrumentInterface> DerefMut for TimeoutGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.interface
    }
}

impl<I: InstrumentInterface> Drop for TimeoutGuard<'_, I> {
    fn drop(&mut self) {
        if let Err(err) = self.interface.set_timeout(self.previous) {
            warn!("Could not restore timeout of {:?}: {err}", self.previous);
        }
    }
}

/// Compare an instrument response with an expected token.
///
/// Numbers are compared by value, as TSP instruments print `1.00000e+00` where SCPI ones print
/// `1`. Everything else is compared case insensitively.
pub(crate) fn token_matches(response: &str, expected: &str) -> bool {
    let response = response.trim().trim_end_matches('\0');
    match (response.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(r), Ok(e)) => r == e,
        _ => response.eq_ignore_ascii_case(expected),
    }
}

/// Format a level, limit or range for a command.
pub(crate) fn fmt_value(value: f64) -> String {
    format!("{value:.8}")
}

/// A session with one source-measure unit.
///
/// The session owns its transport, which it opens through the [`InterfaceFactory`] it was built
/// with. It is meant for blocking use from a single thread.
///
/// Dropping a session that is not disconnected runs [`Session::disconnect`].
pub struct Session<F: InterfaceFactory> {
    address: Address,
    config: SessionConfig,
    factory: F,
    interface: Option<F::Interface>,
    phase: SessionPhase,
    state: SessionState,
}

impl<F: InterfaceFactory> Session<F> {
    /// Create a disconnected session.
    ///
    /// The address is parsed right away, so an unsupported scheme fails here.
    pub fn new(address: &str, config: SessionConfig, factory: F) -> Result<Self, SmuError> {
        let address = address
            .parse::<Address>()
            .map_err(|source| SmuError::Transport {
                address: address.to_string(),
                source,
            })?;
        let state = SessionState::new(&config);
        Ok(Self {
            address,
            config,
            factory,
            interface: None,
            phase: SessionPhase::Disconnected,
            state,
        })
    }

    /// Connect to the instrument and bring it into its baseline state.
    ///
    /// Opening the transport is retried up to `max_retries` times while the channel turns out to
    /// be a ghost connection or does not open at all. After that, the instrument is identified,
    /// reset, self tested and set up from the session configuration.
    ///
    /// On failure, the transport may still be open. Call [`Session::disconnect`] (or drop the
    /// session) to tear it down.
    pub fn connect(&mut self, max_retries: usize) -> Result<(), SmuError> {
        if self.interface.is_some() {
            self.disconnect();
        }
        self.phase = SessionPhase::Connecting;
        match self.establish(max_retries) {
            Ok(()) => {
                self.phase = SessionPhase::Ready;
                info!("Session at {} is ready", self.address);
                Ok(())
            }
            Err(err) => {
                self.phase = match err {
                    SmuError::UnsupportedInstrument(_) => SessionPhase::Unsupported,
                    _ => SessionPhase::HandshakeFailed,
                };
                match err {
                    SmuError::Instrument(source) => Err(SmuError::Transport {
                        address: self.address.to_string(),
                        source,
                    }),
                    other => Err(other),
                }
            }
        }
    }

    fn establish(&mut self, max_retries: usize) -> Result<(), SmuError> {
        self.open_clean_channel(max_retries)?;
        self.state.default_timeout = Some(self.interface_mut()?.get_timeout());

        self.phase = SessionPhase::Identifying;
        self.identify()?;

        self.phase = SessionPhase::Resetting;
        self.hardware_reset()?;
        self.self_test()?;
        self.baseline()
    }

    /// Open the transport until a clean channel is found.
    fn open_clean_channel(&mut self, max_retries: usize) -> Result<(), SmuError> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!("Opening {} (attempt {attempt}/{attempts})", self.address);
            match self.factory.open(&self.address) {
                Ok(mut interface) => match settle_channel(&mut interface) {
                    Ok(true) => {
                        self.interface = Some(interface);
                        return Ok(());
                    }
                    Ok(false) => {
                        last_error = "ghost connection, input kept streaming".to_string();
                        warn!("Ghost connection on {}, reopening", self.address);
                        if let Err(err) = interface.close() {
                            debug!("Closing ghost connection failed: {err}");
                        }
                    }
                    Err(err) => {
                        last_error = err.to_string();
                        warn!("Could not settle channel on {}: {err}", self.address);
                        if let Err(err) = interface.close() {
                            debug!("Closing failed channel: {err}");
                        }
                    }
                },
                Err(err) => {
                    last_error = err.to_string();
                    warn!("Could not open {}: {err}", self.address);
                }
            }
            self.factory.cleanup(&self.address);
        }

        Err(SmuError::ConnectionExhausted {
            address: self.address.to_string(),
            attempts,
            last_error,
        })
    }

    fn identify(&mut self) -> Result<(), SmuError> {
        let idn = self.query(IDN_QUERY)?;
        let identity = InstrumentIdentity::detect(&idn)?;
        let family = identity.family();
        let dialect = commands_for(family);
        dialect.validate(family)?;

        let nof_channels = identity.model().num_channels();
        let idx = self.config.channel.index();
        if idx >= nof_channels {
            return Err(SmuError::Config(format!(
                "Channel {} is not available, the {} has {nof_channels} channel(s)",
                self.config.channel,
                identity.model()
            )));
        }

        info!(
            "Connected to Keithley {} ({} family) at {}",
            identity.model(),
            family,
            self.address
        );
        self.state.identity = Some(identity);
        self.state.dialect = Some(dialect);

        if let Some(language) = dialect.language {
            let found = self.query(language.query)?;
            if !found.to_uppercase().contains(language.expected) {
                self.write(language.set)?;
                error!(
                    "Instrument at {} runs '{}', switched to '{}'. Power cycle it and reconnect.",
                    self.address,
                    found.trim(),
                    language.expected
                );
                return Err(SmuError::LanguageMode {
                    address: self.address.to_string(),
                    found: found.trim().to_string(),
                    expected: language.expected.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reset the instrument and clear its status. Every step is attempted, the first failure is
    /// returned.
    pub(crate) fn hardware_reset(&mut self) -> Result<(), SmuError> {
        let d = self.dialect()?;
        let mut failures = Vec::new();
        let mut attempt = |step: &str, result: Result<(), SmuError>| {
            if let Err(err) = result {
                warn!("Reset step '{step}' failed: {err}");
                failures.push(err);
            }
        };

        attempt("reset", self.send_all(&[d.reset], &[]));
        attempt("opc", self.wait_opc());
        attempt("clear-status", self.send_all(&[d.clear_status], &[]));
        attempt("event-enable", self.send_all(&[d.event_enable_off], &[]));
        attempt("service-request", self.send_all(&[d.service_request_off], &[]));
        attempt("presets", self.send_all(d.presets, &[]));
        attempt("opc", self.wait_opc());
        attempt(
            "clear-input",
            self.interface_mut()
                .and_then(|i| i.clear_input().map_err(SmuError::from)),
        );

        match failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Block until the instrument completed all pending operations.
    pub(crate) fn wait_opc(&mut self) -> Result<(), SmuError> {
        let cmd = self.dialect()?.opc_query;
        let mut last = String::new();
        for _ in 0..MAX_OPC_RETRIES {
            last = self.query(cmd)?;
            if token_matches(&last, "1") {
                return Ok(());
            }
        }
        Err(InstrumentError::ResponseParseError(format!(
            "Operation complete query answered '{}' {MAX_OPC_RETRIES} times",
            last.trim()
        ))
        .into())
    }

    fn self_test(&mut self) -> Result<(), SmuError> {
        let cmd = self.dialect()?.self_test_query;
        let response = {
            let mut guard = TimeoutGuard::new(self.interface_mut()?, SELF_TEST_TIMEOUT)?;
            guard.query(cmd)?
        };
        if !token_matches(&response, "0") {
            return Err(SmuError::SelfTestFailure(response.trim().to_string()));
        }
        debug!("Self test passed");
        Ok(())
    }

    fn baseline(&mut self) -> Result<(), SmuError> {
        let d = self.dialect()?;

        if let Some(dio) = d.dio_compat {
            let current = self.query(dio.query)?;
            if !token_matches(&current, dio.expected) {
                info!("Switching digital I/O to compatibility mode");
                self.write(dio.set)?;
            }
        }

        self.send_all(&[d.output_off_mode_high_z], &[])?;
        if let Some(protection) = d.voltage_protection {
            let value = fmt_value(self.config.voltage_protection_v);
            self.send_all(&[protection], &[("value", value.as_str())])?;
        }
        self.set_wiring(self.config.wiring)?;
        if let Some(concurrent) = d.concurrent_sense {
            self.send_all(&[concurrent], &[])?;
        }
        self.send_all(d.output_format, &[])?;
        if let Some(pos) = d.power_on_setup {
            self.send_all(&[pos], &[])?;
        }
        self.send_all(&[d.line_frequency_auto], &[])?;
        if d.terminals_front.is_some() {
            self.set_terminals(self.config.terminals)?;
        } else if self.config.terminals != Terminals::Front {
            warn!("Terminal selection is not offered by this instrument, ignoring it");
        }

        let func = self.query_active(d.source_function_query, &[])?;
        if token_matches(&func, d.curr_response) {
            self.state.source = SourceFunction::Current;
        } else {
            if !token_matches(&func, d.volt_response) {
                warn!("Unexpected source function '{}', assuming voltage", func.trim());
            }
            self.state.source = SourceFunction::Voltage;
        }

        self.send_all(&[d.autozero_off], &[])?;
        if let Some(caching) = d.autozero_caching {
            self.send_all(&[caching], &[])?;
        }

        if let Some(options_query) = d.options_query {
            let options = self.query(options_query)?;
            self.state.has_contact_check_option =
                options.to_uppercase().contains(CONTACT_CHECK_OPTION);
            if self.state.has_contact_check_option {
                debug!("Instrument has the contact check option");
                if let Some(off) = d.contact_check_off {
                    self.write(off)?;
                }
            }
            self.state.options = Some(options.trim().to_string());
        }

        self.send_all(&[d.timer_reset], &[])?;
        self.send_all(&[d.beeper_off], &[])?;
        self.set_nplc(self.config.nplc)
    }

    /// Tear the session down.
    ///
    /// Every step runs independently of the others: a failing step is logged and reported, but
    /// never stops the remaining ones. Steps that need an identified instrument are skipped if
    /// the connect did not get that far. Calling this more than once is harmless.
    pub fn disconnect(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.phase == SessionPhase::Disconnected && self.interface.is_none() {
            return report;
        }

        if self.interface.is_some() {
            if let Some(d) = self.state.dialect {
                report.run(TeardownStep::Abort, self.send_all(&[d.abort], &[]));
                report.run(TeardownStep::ResetDevice, self.hardware_reset());
                report.run(TeardownStep::OutputOff, self.send_all(&[d.output_off], &[]));
                if self.address.is_serial() {
                    if let Some(local) = d.go_local {
                        report.run(TeardownStep::GoLocal, self.write(local));
                    }
                }
            }
            if let Some(mut interface) = self.interface.take() {
                report.run(
                    TeardownStep::DrainInput,
                    interface.clear_input().map_err(SmuError::from),
                );
                report.run(
                    TeardownStep::CloseTransport,
                    interface.close().map_err(SmuError::from),
                );
            }
        }
        if self.address.scheme() == Scheme::Socket {
            self.factory.cleanup(&self.address);
        }

        self.phase = SessionPhase::Disconnected;
        self.state = SessionState::new(&self.config);
        info!("Disconnected from {}", self.address);
        report
    }

    /// Send a raw command.
    pub fn write(&mut self, cmd: &str) -> Result<(), SmuError> {
        Ok(self.interface_mut()?.sendcmd(cmd)?)
    }

    /// Send a raw query and return the response.
    pub fn query(&mut self, cmd: &str) -> Result<String, SmuError> {
        Ok(self.interface_mut()?.query(cmd)?)
    }

    /// Set the integration time in power-line cycles on all sense functions.
    pub fn set_nplc(&mut self, nplc: f64) -> Result<(), SmuError> {
        if !nplc.is_finite() || nplc <= 0.0 {
            return Err(SmuError::Config(format!("Invalid NPLC: {nplc}")));
        }
        let d = self.dialect()?;
        let value = nplc.to_string();
        self.send_all(d.set_nplc, &[("nplc", value.as_str())])?;
        self.state.nplc = nplc;
        Ok(())
    }

    /// Read the integration time back from the instrument.
    pub fn nplc(&mut self) -> Result<f64, SmuError> {
        let d = self.dialect()?;
        let response = self.query_active(d.nplc_query, &[])?;
        parse_number(&response)
    }

    /// Switch between 2-wire and 4-wire sensing.
    pub fn set_wiring(&mut self, wiring: Wiring) -> Result<(), SmuError> {
        let d = self.dialect()?;
        let cmd = match wiring {
            Wiring::TwoWire => d.sense_local,
            Wiring::FourWire => d.sense_remote,
        };
        self.send_all(&[cmd], &[])?;
        self.state.wiring = wiring;
        Ok(())
    }

    /// Select front or rear terminals.
    pub fn set_terminals(&mut self, terminals: Terminals) -> Result<(), SmuError> {
        let d = self.dialect()?;
        let cmd = match terminals {
            Terminals::Front => d.terminals_front,
            Terminals::Rear => d.terminals_rear,
        };
        let cmd = cmd.ok_or_else(|| self.not_offered("terminal selection"))?;
        self.send_all(&[cmd], &[])?;
        self.state.terminals = terminals;
        Ok(())
    }

    /// Switch the output of the active channel.
    pub fn set_output(&mut self, on: bool) -> Result<(), SmuError> {
        let d = self.dialect()?;
        let cmd = if on { d.output_on } else { d.output_off };
        self.send_active(&[cmd], &[])
    }

    /// Read back whether the output of the active channel is on.
    pub fn output_enabled(&mut self) -> Result<bool, SmuError> {
        let d = self.dialect()?;
        let response = self.query_active(d.output_query, &[])?;
        Ok(token_matches(&response, "1"))
    }

    /// Change the source level of the current configuration.
    pub fn set_source_level(&mut self, value: f64) -> Result<(), SmuError> {
        if !value.is_finite() {
            return Err(SmuError::Config(format!("Invalid source level: {value}")));
        }
        let d = self.dialect()?;
        let src = self.word(self.state.source);
        let value = fmt_value(value);
        self.send_active(&[d.source_level], &[("src", src), ("value", value.as_str())])
    }

    /// Write the digital output port and read it back.
    ///
    /// A readback that differs from what was written is logged, as some instruments report the
    /// port inverted.
    pub fn set_digital_output(&mut self, value: u8) -> Result<(), SmuError> {
        let d = self.dialect()?;
        let level = value.to_string();
        self.send_active(&[d.digital_output], &[("value", level.as_str())])?;
        let readback = self.query_active(d.digital_output_query, &[])?;
        if !token_matches(&readback, &level) {
            warn!(
                "Digital output set to {value}, but reads back '{}'",
                readback.trim()
            );
        }
        Ok(())
    }

    /// Arm and initiate the trigger model.
    pub fn arm(&mut self) -> Result<(), SmuError> {
        let d = self.dialect()?;
        self.send_active(&[d.arm], &[])
    }

    /// The address of this session.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The configuration of this session.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identity of the connected instrument.
    pub fn identity(&self) -> Option<&InstrumentIdentity> {
        self.state.identity.as_ref()
    }

    /// Family of the connected instrument.
    pub fn family(&self) -> Option<Family> {
        self.state.identity.as_ref().map(|i| i.family())
    }

    /// Where the session is in its life cycle.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The open transport, if any.
    pub fn interface(&self) -> Option<&F::Interface> {
        self.interface.as_ref()
    }

    /// The factory the session opens its transport with.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Whether a transport is open.
    pub fn is_transport_open(&self) -> bool {
        self.interface.is_some()
    }

    pub(crate) fn interface_mut(&mut self) -> Result<&mut F::Interface, SmuError> {
        self.interface.as_mut().ok_or(SmuError::NotConnected)
    }

    pub(crate) fn dialect(&self) -> Result<&'static DialectCommands, SmuError> {
        self.state.dialect.ok_or(SmuError::NotConnected)
    }

    /// The dialect, but only once the session is ready.
    pub(crate) fn ready(&self) -> Result<&'static DialectCommands, SmuError> {
        match self.phase {
            SessionPhase::Ready => self.dialect(),
            _ => Err(SmuError::NotConnected),
        }
    }

    pub(crate) fn family_or_err(&self) -> Result<Family, SmuError> {
        self.family().ok_or(SmuError::NotConnected)
    }

    pub(crate) fn not_offered(&self, operation: &str) -> SmuError {
        match self.family() {
            Some(family) => {
                SmuError::Config(format!("The {family} family does not offer {operation}"))
            }
            None => SmuError::NotConnected,
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// The word of a function in `{src}` and `{snc}`.
    pub(crate) fn word(&self, function: SourceFunction) -> &'static str {
        match (self.state.dialect, function) {
            (Some(d), SourceFunction::Voltage) => d.volt_word,
            (Some(d), SourceFunction::Current) => d.curr_word,
            (None, _) => "",
        }
    }

    fn channels(&self) -> impl Iterator<Item = SmuChannel> {
        let num = self
            .state
            .identity
            .as_ref()
            .map_or(1, |i| i.model().num_channels());
        SmuChannel::all(num)
    }

    /// Render templates for every channel of the instrument.
    fn render_all(&self, templates: &[Template], args: &[(&str, &str)]) -> Vec<String> {
        let mut rendered = Vec::new();
        for template in templates {
            if template.contains("{ch}") {
                for ch in self.channels() {
                    rendered.push(render_for(template, ch, args));
                }
            } else {
                rendered.push(render(template, args));
            }
        }
        rendered
    }

    /// Render a template for the active channel.
    pub(crate) fn render_active(&self, template: &str, args: &[(&str, &str)]) -> String {
        render_for(template, self.config.channel, args)
    }

    /// Send instrument-wide commands, once per channel where they name one.
    pub(crate) fn send_all(
        &mut self,
        templates: &[Template],
        args: &[(&str, &str)],
    ) -> Result<(), SmuError> {
        for cmd in self.render_all(templates, args) {
            self.write(&cmd)?;
        }
        Ok(())
    }

    /// Send commands for the active channel.
    pub(crate) fn send_active(
        &mut self,
        templates: &[Template],
        args: &[(&str, &str)],
    ) -> Result<(), SmuError> {
        for template in templates {
            let cmd = self.render_active(template, args);
            self.write(&cmd)?;
        }
        Ok(())
    }

    /// Query for the active channel.
    pub(crate) fn query_active(
        &mut self,
        template: &str,
        args: &[(&str, &str)],
    ) -> Result<String, SmuError> {
        let cmd = self.render_active(template, args);
        self.query(&cmd)
    }
}

impl<F: InterfaceFactory> Drop for Session<F> {
    fn drop(&mut self) {
        if self.phase != SessionPhase::Disconnected || self.interface.is_some() {
            let report = self.disconnect();
            if !report.is_clean() {
                warn!(
                    "Teardown of {} on drop left {} failed steps",
                    self.address,
                    report.failures().len()
                );
            }
        }
    }
}

/// Drain a freshly opened channel, interrupt whatever the instrument does, and drain again.
///
/// Returns `false` if the channel keeps streaming.
fn settle_channel<I: InstrumentInterface>(interface: &mut I) -> Result<bool, InstrumentError> {
    if !interface.hard_reset_input()? {
        return Ok(false);
    }
    match interface.interrupt() {
        Ok(()) => {}
        Err(InstrumentError::InterfaceCommandNotSupported(_)) => {
            debug!("Transport cannot send an interrupt, skipping it");
        }
        Err(err) => return Err(err),
    }
    interface.clear_input()?;
    interface.hard_reset_input()
}

fn render_for(template: &str, channel: SmuChannel, args: &[(&str, &str)]) -> String {
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(("ch", channel.name()));
    all.extend_from_slice(args);
    render(template, &all)
}

pub(crate) fn parse_number(response: &str) -> Result<f64, SmuError> {
    let field = response.trim().trim_end_matches('\0');
    field
        .parse::<f64>()
        .map_err(|_| InstrumentError::ResponseParseError(field.to_string()).into())
}
