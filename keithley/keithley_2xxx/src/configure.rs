//! Measurement configuration: DC bias and linear sweeps.
//!
//! Every configuration follows the same outline. The record format is selected, the source is
//! set up, compliance and sense range are applied, the output is switched on, and the instrument
//! autozeroes once before the operation complete query returns.

use std::time::Duration;

use ivkit::{InstrumentError, InstrumentInterface, InterfaceFactory};
use log::{debug, warn};

use crate::{
    MeasurementMode, SenseRange, Session, SmuError, SourceFunction, StepDelay, SweepTiming,
    session::{SCPI_NOT_A_NUMBER, TimeoutGuard, fmt_value, parse_number},
};

/// Timeout for reading back the sweep step size.
pub const STEP_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether and how DC records include a resistance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResistanceMode {
    /// Records of voltage, current, time and status.
    #[default]
    Off,
    /// Records with resistance, computed from the sourced and sensed values.
    Manual,
    /// The instrument picks source and ranges by itself. It may apply more voltage or current
    /// than the set point and compliance suggest.
    Auto,
}

/// A DC bias.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DcSetup {
    /// What is sourced.
    pub source: SourceFunction,
    /// Limit of the sensed function.
    pub compliance: f64,
    /// Source level.
    pub set_point: f64,
    /// Sense range policy.
    pub sense_range: SenseRange,
    /// Resistance handling.
    pub resistance: ResistanceMode,
}

/// A linear sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepSetup {
    /// What is sourced.
    pub source: SourceFunction,
    /// Limit of the sensed function.
    pub compliance: f64,
    /// Number of points, including start and end.
    pub n_points: usize,
    /// Delay between setting a point and measuring it.
    pub step_delay: StepDelay,
    /// First source level.
    pub start: f64,
    /// Last source level.
    pub end: f64,
    /// Sense range policy.
    pub sense_range: SenseRange,
}

/// The measurement a caller configured last.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeasurementSetup {
    /// A DC bias.
    Dc(DcSetup),
    /// A linear sweep.
    Sweep(SweepSetup),
}

fn check_compliance(compliance: f64) -> Result<(), SmuError> {
    if !compliance.is_finite() || compliance <= 0.0 {
        return Err(SmuError::Config(format!(
            "Compliance must be a positive number, got {compliance}"
        )));
    }
    Ok(())
}

fn check_level(name: &str, value: f64) -> Result<(), SmuError> {
    if !value.is_finite() {
        return Err(SmuError::Config(format!("{name} must be finite, got {value}")));
    }
    Ok(())
}

fn check_range(range: SenseRange) -> Result<(), SmuError> {
    if let SenseRange::Fixed(r) = range {
        if !r.is_finite() || r <= 0.0 {
            return Err(SmuError::Config(format!(
                "A fixed sense range must be positive, got {r}"
            )));
        }
    }
    Ok(())
}

impl DcSetup {
    /// Check the parameters for consistency.
    pub fn validate(&self) -> Result<(), SmuError> {
        check_compliance(self.compliance)?;
        check_level("Set point", self.set_point)?;
        check_range(self.sense_range)
    }
}

impl SweepSetup {
    /// Check the parameters for consistency.
    pub fn validate(&self) -> Result<(), SmuError> {
        check_compliance(self.compliance)?;
        check_level("Sweep start", self.start)?;
        check_level("Sweep end", self.end)?;
        check_range(self.sense_range)?;
        if self.n_points < 2 {
            return Err(SmuError::Config(format!(
                "A sweep needs at least 2 points, got {}",
                self.n_points
            )));
        }
        Ok(())
    }
}

impl<F: InterfaceFactory> Session<F> {
    /// Configure a DC bias.
    ///
    /// Afterwards, [`Session::measure`] returns records with 4 fields, or 5 if resistance is
    /// included. Refused while a contact check is active.
    pub fn configure_dc(&mut self, setup: &DcSetup) -> Result<(), SmuError> {
        self.ready()?;
        self.refuse_during_contact_check()?;
        self.state_mut().setup = None;
        self.apply_dc(setup)?;
        self.state_mut().setup = Some(MeasurementSetup::Dc(*setup));
        Ok(())
    }

    /// Configure a linear sweep and return the step size as the instrument reports it.
    ///
    /// The read timeout for the sweep is computed from the integration time, the number of
    /// points, and the step delay. Refused while a contact check is active.
    pub fn configure_sweep(&mut self, setup: &SweepSetup) -> Result<f64, SmuError> {
        self.ready()?;
        self.refuse_during_contact_check()?;
        self.state_mut().setup = None;
        let step = self.apply_sweep(setup)?;
        self.state_mut().setup = Some(MeasurementSetup::Sweep(*setup));
        Ok(step)
    }

    fn refuse_during_contact_check(&self) -> Result<(), SmuError> {
        if self.state().contact().is_active() {
            return Err(SmuError::Config(
                "A contact check is active, disable it before reconfiguring".to_string(),
            ));
        }
        Ok(())
    }

    /// DC configuration without the contact check guard, used by the contact checker itself.
    pub(crate) fn apply_dc(&mut self, setup: &DcSetup) -> Result<(), SmuError> {
        setup.validate()?;
        let d = self.ready()?;

        if setup.resistance == ResistanceMode::Auto {
            let steps = d
                .resistance_auto
                .ok_or_else(|| self.not_offered("automatic resistance measurement"))?;
            warn!(
                "Automatic resistance mode may source more voltage or current than set point \
                 and compliance suggest"
            );
            self.send_active(steps, &[])?;
            return self.finish_dc(true);
        }

        let src = self.word(setup.source);
        let snc = self.word(setup.source.sensed());
        let src_func = match setup.source {
            SourceFunction::Voltage => d.volt_func,
            SourceFunction::Current => d.curr_func,
        };
        let with_resistance = setup.resistance == ResistanceMode::Manual;
        let compliance = fmt_value(setup.compliance);
        let set_point = fmt_value(setup.set_point);

        if with_resistance {
            self.send_active(d.elements_five, &[])?;
            if let Some(manual) = d.resistance_manual {
                self.send_active(&[manual], &[])?;
            }
        } else {
            self.send_active(d.elements_four, &[])?;
        }

        self.send_active(&[d.source_function], &[("src_func", src_func)])?;
        self.state_mut().source = setup.source;
        if let Some(fixed) = d.source_mode_fixed {
            self.send_active(&[fixed], &[("src", src)])?;
        }
        self.send_active(
            &[d.source_level],
            &[("src", src), ("value", set_point.as_str())],
        )?;
        self.send_active(&[d.source_delay_auto], &[])?;

        if let Some(sense) = d.sense_function {
            let word = if with_resistance {
                d.resistance_word
            } else {
                snc
            };
            self.send_active(&[sense], &[("sense", word)])?;
        }

        self.apply_limits(snc, &compliance, setup.sense_range)?;
        if with_resistance {
            if let Some(autorange) = d.resistance_autorange {
                self.send_active(&[autorange], &[])?;
            }
        }

        self.send_active(&[d.output_on], &[])?;
        self.finish_dc(with_resistance)
    }

    fn finish_dc(&mut self, resistance: bool) -> Result<(), SmuError> {
        let d = self.ready()?;
        self.send_active(&[d.trigger_count], &[("n", "1")])?;
        self.send_active(&[d.autozero_once], &[])?;
        self.wait_opc()?;
        let state = self.state_mut();
        state.mode = MeasurementMode::Dc { resistance };
        state.sweep_timeout = None;
        Ok(())
    }

    /// Compliance, sense range, and compliance again, as changing the range may move the limit.
    fn apply_limits(
        &mut self,
        snc: &str,
        compliance: &str,
        range: SenseRange,
    ) -> Result<(), SmuError> {
        let d = self.ready()?;
        let limit = [("snc", snc), ("value", compliance)];
        self.send_active(&[d.compliance], &limit)?;
        match range {
            SenseRange::FollowCompliance => self.send_active(d.range_follow, &limit)?,
            SenseRange::Auto => self.send_active(d.range_auto, &[("snc", snc)])?,
            SenseRange::Fixed(r) => {
                let r = fmt_value(r);
                self.send_active(d.range_fixed, &[("snc", snc), ("value", r.as_str())])?;
            }
        }
        self.send_active(&[d.compliance], &limit)
    }

    /// Sweep configuration without the contact check guard.
    pub(crate) fn apply_sweep(&mut self, setup: &SweepSetup) -> Result<f64, SmuError> {
        setup.validate()?;
        let d = self.ready()?;

        let nplc = parse_number(&self.query_active(d.nplc_query, &[])?)?;
        if !nplc.is_finite() || nplc <= 0.0 || nplc >= SCPI_NOT_A_NUMBER {
            return Err(InstrumentError::ResponseParseError(format!(
                "Integration time read back as {nplc} NPLC"
            ))
            .into());
        }

        let src = self.word(setup.source);
        let snc = self.word(setup.source.sensed());
        let src_func = match setup.source {
            SourceFunction::Voltage => d.volt_func,
            SourceFunction::Current => d.curr_func,
        };
        let compliance = fmt_value(setup.compliance);
        let start = fmt_value(setup.start);
        let stop = fmt_value(setup.end);
        let n = setup.n_points.to_string();

        self.send_active(d.elements_four, &[])?;
        self.send_active(&[d.source_function], &[("src_func", src_func)])?;
        self.state_mut().source = setup.source;
        self.send_active(&[d.source_level], &[("src", src), ("value", start.as_str())])?;
        self.apply_limits(snc, &compliance, setup.sense_range)?;
        self.send_active(&[d.output_on], &[])?;

        let sweep = [
            ("src", src),
            ("n", n.as_str()),
            ("start", start.as_str()),
            ("stop", stop.as_str()),
        ];
        self.send_active(d.sweep_setup, &sweep)?;
        match setup.step_delay {
            StepDelay::Auto => self.send_active(&[d.source_delay_auto], &[])?,
            StepDelay::Fixed(delay) => {
                let delay = fmt_value(delay.as_secs_f64());
                self.send_active(d.source_delay_fixed, &[("value", delay.as_str())])?;
            }
        }

        let step_query = self.render_active(d.sweep_step_query, &sweep);
        let response = {
            let mut guard = TimeoutGuard::new(self.interface_mut()?, STEP_QUERY_TIMEOUT)?;
            guard.query(&step_query)?
        };
        let step = parse_number(&response)?.abs();

        if let Some(ranging) = d.sweep_ranging {
            self.send_active(&[ranging], &[])?;
        }
        self.send_active(&[d.autozero_once], &[])?;
        self.wait_opc()?;

        let line_frequency = self.config().line_frequency_hz;
        let timing = SweepTiming::new(nplc, line_frequency, setup.n_points, setup.step_delay);
        let timeout = timing.comms_timeout();
        debug!(
            "Sweep of {} points takes up to {:.1} ms, read timeout {timeout:?}",
            setup.n_points,
            timing.sweep_duration_ms()
        );

        let state = self.state_mut();
        state.nplc = nplc;
        state.sweep_timeout = Some(timeout);
        state.mode = MeasurementMode::Sweep {
            n_points: setup.n_points,
        };
        Ok(step)
    }
}
