//! Contact verification before measurements that need a good electrical contact.
//!
//! Two ways of checking are supported. Instruments with the native contact check option watch
//! the contact themselves and force the output off if it is lost (internal mode). All others
//! check each side of the device with a small current through relays that are steered by the
//! digital output, and compare the measured resistance with a threshold (external mode).
//!
//! Relays are only ever switched with the output verified off. After switching, the driver waits
//! for the relays to settle before the output goes back on.

use std::{fmt::Display, thread, time::Duration};

use ivkit::InterfaceFactory;
use log::{debug, info, warn};

use crate::{
    ContactCheckMode, DcSetup, MeasurementMode, MeasurementSetup, ResistanceMode, SenseRange,
    Session, SmuError, SourceFunction, Wiring, session::token_matches,
};

/// Side of the device under test that is checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactSide {
    /// High side.
    Hi,
    /// Low side.
    Lo,
}

impl Display for ContactSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactSide::Hi => write!(f, "hi"),
            ContactSide::Lo => write!(f, "lo"),
        }
    }
}

/// State of the contact checker.
///
/// While a check is active, configuration changes are refused. Disabling the check restores the
/// wiring, the integration time and the measurement setup from before.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContactCheckState {
    mode: ContactCheckMode,
    side: Option<ContactSide>,
    saved_wiring: Option<Wiring>,
    saved_nplc: Option<f64>,
    saved_setup: Option<MeasurementSetup>,
}

impl ContactCheckState {
    /// The active mode.
    pub fn mode(&self) -> ContactCheckMode {
        self.mode
    }

    /// The side the relays are steered to.
    pub fn side(&self) -> Option<ContactSide> {
        self.side
    }

    /// Whether a check is enabled.
    pub fn is_active(&self) -> bool {
        self.mode != ContactCheckMode::Disabled
    }

    /// The measurement setup that disabling the check brings back.
    pub fn saved_setup(&self) -> Option<&MeasurementSetup> {
        self.saved_setup.as_ref()
    }
}

/// Outcome of one contact check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactCheckResult {
    /// Whether the contact is good.
    pub passed: bool,
    /// Measured resistance, external mode only.
    pub resistance_ohm: Option<f64>,
    /// Whether the source was in compliance during the reading.
    pub in_compliance: bool,
}

impl<F: InterfaceFactory> Session<F> {
    /// Enable contact checking in the given mode.
    ///
    /// An active check in another mode is disabled first. With [`ContactCheckMode::Disabled`],
    /// every check passes without touching the instrument.
    pub fn enable_contact_check(&mut self, mode: ContactCheckMode) -> Result<(), SmuError> {
        self.ready()?;
        if self.state().contact().is_active() {
            self.disable_contact_check()?;
        }
        match mode {
            ContactCheckMode::Disabled => Ok(()),
            ContactCheckMode::Internal => self.enable_internal(),
            ContactCheckMode::External => self.enable_external(),
        }
    }

    /// Enable contact checking in the mode of the session configuration.
    pub fn enable_configured_contact_check(&mut self) -> Result<(), SmuError> {
        let mode = self.config().contact_check.mode;
        self.enable_contact_check(mode)
    }

    /// Check the contact on one side.
    ///
    /// In external mode, the relays are switched to that side first if needed. In internal mode,
    /// the instrument checks both sides at once and `side` is only recorded.
    pub fn do_contact_check(&mut self, side: ContactSide) -> Result<ContactCheckResult, SmuError> {
        self.ready()?;
        match self.state().contact().mode() {
            ContactCheckMode::Disabled => Ok(ContactCheckResult {
                passed: true,
                resistance_ohm: None,
                in_compliance: false,
            }),
            ContactCheckMode::Internal => {
                self.state_mut().contact.side = Some(side);
                self.check_internal()
            }
            ContactCheckMode::External => self.check_external(side),
        }
    }

    /// Like [`Session::do_contact_check`], but a failed check is an error.
    pub fn require_contact(&mut self, side: ContactSide) -> Result<ContactCheckResult, SmuError> {
        let result = self.do_contact_check(side)?;
        if !result.passed {
            return Err(SmuError::ContactCheckFailure {
                side,
                resistance: result.resistance_ohm,
                threshold: self.config().contact_check.threshold_ohm,
                in_compliance: result.in_compliance,
            });
        }
        Ok(result)
    }

    /// Leave contact checking and restore wiring, integration time and the measurement setup.
    ///
    /// A DC bias or sweep configured before the check is applied again, which switches the output
    /// back on. Without one, the session is left unconfigured.
    pub fn disable_contact_check(&mut self) -> Result<(), SmuError> {
        let d = self.ready()?;
        let contact = self.state().contact().clone();
        let wiring = contact.saved_wiring.unwrap_or(self.state().wiring());
        let nplc = contact.saved_nplc.unwrap_or(self.state().nplc());
        let cfg = self.config().contact_check.clone();

        match contact.mode {
            ContactCheckMode::Disabled => {}
            ContactCheckMode::Internal => {
                self.send_active(&[d.output_off_mode_high_z], &[])?;
                self.set_output(false)?;
                self.set_nplc(nplc)?;
                self.set_wiring(wiring)?;
                if let Some(off) = d.contact_check_off {
                    self.send_active(&[off], &[])?;
                }
            }
            ContactCheckMode::External => {
                self.set_wiring(wiring)?;
                self.set_nplc(nplc)?;
                self.apply_dc(&DcSetup {
                    source: SourceFunction::Current,
                    compliance: cfg.compliance_voltage_v,
                    set_point: 0.0,
                    sense_range: SenseRange::FollowCompliance,
                    resistance: ResistanceMode::Off,
                })?;
                self.set_output(false)?;
                self.steer_relays(cfg.dio_idle)?;
            }
        }
        if contact.is_active() {
            match contact.saved_setup {
                Some(MeasurementSetup::Dc(setup)) => self.apply_dc(&setup)?,
                Some(MeasurementSetup::Sweep(setup)) => {
                    self.apply_sweep(&setup)?;
                }
                None => self.state_mut().mode = MeasurementMode::Unconfigured,
            }
        }
        self.state_mut().contact = Default::default();
        debug!("Contact check disabled");
        Ok(())
    }

    /// Mark the check active and remember what to restore. From here on, a failed enable still
    /// leaves something for `disable_contact_check` to undo.
    fn save_for_contact_check(&mut self, mode: ContactCheckMode) {
        let wiring = self.state().wiring();
        let nplc = self.state().nplc();
        let setup = self.state().setup().copied();
        self.state_mut().contact = ContactCheckState {
            mode,
            side: None,
            saved_wiring: Some(wiring),
            saved_nplc: Some(nplc),
            saved_setup: setup,
        };
    }

    fn enable_internal(&mut self) -> Result<(), SmuError> {
        let d = self.ready()?;
        let (on, guard) = match (d.contact_check_on, d.output_off_mode_guard) {
            (Some(on), Some(guard)) => (on, guard),
            _ => return Err(self.not_offered("a native contact check")),
        };
        if !self.state().has_contact_check_option() {
            return Err(SmuError::Config(
                "The instrument lacks the contact check option".to_string(),
            ));
        }
        let remote = self.query_active(d.sense_remote_query, &[])?;
        if !token_matches(&remote, "1") {
            return Err(SmuError::Config(
                "The internal contact check needs 4-wire sensing".to_string(),
            ));
        }

        let cfg = self.config().contact_check.clone();
        self.save_for_contact_check(ContactCheckMode::Internal);

        self.set_output(false)?;
        self.send_active(&[guard], &[])?;
        self.send_active(&[on], &[])?;
        self.set_nplc(cfg.nplc)?;
        self.apply_dc(&DcSetup {
            source: SourceFunction::Current,
            compliance: cfg.compliance_voltage_v,
            set_point: 0.0,
            sense_range: SenseRange::FollowCompliance,
            resistance: ResistanceMode::Off,
        })?;
        info!("Internal contact check enabled");
        Ok(())
    }

    fn check_internal(&mut self) -> Result<ContactCheckResult, SmuError> {
        let settle = Duration::from_millis(self.config().contact_check.rearm_settle_ms);
        self.set_output(true)?;
        let on_before = self.output_enabled()?;
        self.arm()?;
        thread::sleep(settle);
        let on_after = self.output_enabled()?;

        let passed = on_before && on_after;
        if !passed {
            warn!("Internal contact check failed, the instrument switched the output off");
        }
        Ok(ContactCheckResult {
            passed,
            resistance_ohm: None,
            in_compliance: false,
        })
    }

    fn enable_external(&mut self) -> Result<(), SmuError> {
        let cfg = self.config().contact_check.clone();
        self.save_for_contact_check(ContactCheckMode::External);

        self.set_output(false)?;
        self.set_wiring(Wiring::TwoWire)?;
        self.set_nplc(cfg.nplc)?;
        self.steer_relays(cfg.dio_hi)?;
        self.state_mut().contact.side = Some(ContactSide::Hi);
        self.apply_dc(&DcSetup {
            source: SourceFunction::Current,
            compliance: cfg.compliance_voltage_v,
            set_point: cfg.sense_current_a,
            sense_range: SenseRange::FollowCompliance,
            resistance: ResistanceMode::Manual,
        })?;
        info!("External contact check enabled");
        Ok(())
    }

    fn check_external(&mut self, side: ContactSide) -> Result<ContactCheckResult, SmuError> {
        let cfg = self.config().contact_check.clone();
        let family = self.family_or_err()?;

        if self.state().contact().side() != Some(side) {
            self.set_output(false)?;
            let level = match side {
                ContactSide::Hi => cfg.dio_hi,
                ContactSide::Lo => cfg.dio_lo,
            };
            self.steer_relays(level)?;
            self.state_mut().contact.side = Some(side);
            self.set_output(true)?;
        }

        if !self.output_enabled()? {
            debug!("Output was off for the contact check, switching it on");
            self.set_output(true)?;
        }

        let record = self
            .measure(1)?
            .pop()
            .ok_or_else(|| SmuError::Config("No record for the contact check".to_string()))?;
        let in_compliance = record.status().in_compliance(family);
        let resistance = record.ohms();
        let passed =
            !in_compliance && resistance.is_some_and(|r| r.abs() < cfg.threshold_ohm);

        if !passed {
            warn!(
                "Contact check on {side} side failed: {resistance:?} Ohm against {} Ohm{}",
                cfg.threshold_ohm,
                if in_compliance { ", in compliance" } else { "" }
            );
        }
        Ok(ContactCheckResult {
            passed,
            resistance_ohm: resistance,
            in_compliance,
        })
    }

    /// Steer the relays with the digital output and wait for them to settle.
    ///
    /// Refuses with [`SmuError::OutputStillOn`] unless the output reads back off.
    fn steer_relays(&mut self, level: u8) -> Result<(), SmuError> {
        if self.output_enabled()? {
            return Err(SmuError::OutputStillOn);
        }
        self.set_digital_output(level)?;
        let debounce = Duration::from_millis(self.config().contact_check.relay_debounce_ms);
        thread::sleep(debounce);
        Ok(())
    }
}
