//! Measurement execution and record parsing.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use ivkit::{DEFAULT_TIMEOUT, InstrumentError, InstrumentInterface, InterfaceFactory};
use log::{debug, info};
use measurements::{Current, Resistance, Voltage};

use crate::{Family, MeasurementMode, Session, SmuError, SourceFunction, session::TimeoutGuard};

/// The raw status word of a record.
///
/// Which bit means what depends on the family, so the word is kept as received and only decoded
/// on request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusWord(u32);

impl StatusWord {
    /// Wrap a raw status value.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The status as received.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Whether the source was in compliance.
    pub fn in_compliance(&self, family: Family) -> bool {
        self.bit(family.status_bits().compliance)
    }

    /// Whether remote (4-wire) sense was active.
    pub fn remote_sense(&self, family: Family) -> bool {
        self.bit(family.status_bits().remote_sense)
    }

    fn bit(&self, bit: u32) -> bool {
        self.0.checked_shr(bit).is_some_and(|v| v & 1 == 1)
    }
}

/// One sample: voltage, current, optionally resistance, timestamp and status.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementRecord {
    voltage: f64,
    current: f64,
    resistance: Option<f64>,
    time: f64,
    status: StatusWord,
}

impl MeasurementRecord {
    fn from_fields(fields: &[f64]) -> Result<Self, SmuError> {
        let (voltage, current, resistance, time, status) = match *fields {
            [v, i, t, s] => (v, i, None, t, s),
            [v, i, r, t, s] => (v, i, Some(r), t, s),
            _ => {
                return Err(SmuError::Config(format!(
                    "Records have 4 or 5 fields, not {}",
                    fields.len()
                )));
            }
        };
        if !status.is_finite() || status < 0.0 || status > u32::MAX as f64 {
            return Err(
                InstrumentError::ResponseParseError(format!("Invalid status word: {status}")).into(),
            );
        }
        Ok(Self {
            voltage,
            current,
            resistance,
            time,
            status: StatusWord(status as u32),
        })
    }

    /// Voltage in volts.
    pub fn volts(&self) -> f64 {
        self.voltage
    }

    /// Current in amperes.
    pub fn amps(&self) -> f64 {
        self.current
    }

    /// Resistance in ohms, for records that carry one.
    pub fn ohms(&self) -> Option<f64> {
        self.resistance
    }

    /// Voltage.
    pub fn voltage(&self) -> Voltage {
        Voltage::from_volts(self.voltage)
    }

    /// Current.
    pub fn current(&self) -> Current {
        Current::from_amperes(self.current)
    }

    /// Resistance.
    pub fn resistance(&self) -> Option<Resistance> {
        self.resistance.map(Resistance::from_ohms)
    }

    /// Timestamp in seconds, as kept by the instrument.
    pub fn timestamp(&self) -> f64 {
        self.time
    }

    /// Status word.
    pub fn status(&self) -> StatusWord {
        self.status
    }

    /// Number of fields, 4 or 5.
    pub fn len(&self) -> usize {
        if self.resistance.is_some() { 5 } else { 4 }
    }

    /// Always `false`, records are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The fields in instrument order.
    pub fn fields(&self) -> Vec<f64> {
        let mut fields = vec![self.voltage, self.current];
        fields.extend(self.resistance);
        fields.extend([self.time, self.status.0 as f64]);
        fields
    }
}

/// Split a response into `n_points` records of `fields` values each.
///
/// The field count must match exactly, a partial parse is never returned.
pub fn parse_records(
    response: &str,
    n_points: usize,
    fields: usize,
) -> Result<Vec<MeasurementRecord>, SmuError> {
    let body = response.trim().trim_end_matches('\0').trim();
    let values = if body.is_empty() {
        Vec::new()
    } else {
        body.split(',')
            .map(|field| {
                let field = field.trim().trim_end_matches('\0');
                field.parse::<f64>().map_err(|_| {
                    SmuError::from(InstrumentError::ResponseParseError(format!(
                        "Non-numeric field '{field}' in response"
                    )))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let expected = n_points * fields;
    if values.len() != expected || fields == 0 {
        return Err(SmuError::MalformedResponse {
            expected,
            actual: values.len(),
            response: response.to_string(),
        });
    }
    values
        .chunks(fields)
        .map(MeasurementRecord::from_fields)
        .collect()
}

/// Diagnostics of a sweep read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepStats {
    /// Time between the first and the last sample.
    pub duration_s: f64,
    /// Mean step of the sourced quantity.
    pub mean_step: f64,
    /// Mean time between samples.
    pub mean_sample_period_s: f64,
    /// Sourced quantity per second, `None` if the sweep took no measurable time.
    pub sweep_rate: Option<f64>,
}

impl SweepStats {
    /// Compute the statistics, or `None` for fewer than two records.
    pub fn from_records(records: &[MeasurementRecord], source: SourceFunction) -> Option<Self> {
        let (first, last) = match records {
            [first, .., last] => (first, last),
            _ => return None,
        };
        let level = |r: &MeasurementRecord| match source {
            SourceFunction::Voltage => r.voltage,
            SourceFunction::Current => r.current,
        };
        let intervals = (records.len() - 1) as f64;
        let duration_s = last.time - first.time;
        let span = level(last) - level(first);
        let sweep_rate = (duration_s.is_finite() && duration_s > 0.0).then(|| span / duration_s);
        Some(Self {
            duration_s,
            mean_step: span / intervals,
            mean_sample_period_s: duration_s / intervals,
            sweep_rate,
        })
    }
}

/// Bounds of [`Session::measure_until`]. Without any bound, only cancellation stops it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Until {
    /// Stop once this much time has passed.
    pub dwell: Option<Duration>,
    /// Stop after this many samples.
    pub max_samples: Option<usize>,
}

impl Until {
    /// Measure for a while.
    pub fn dwell(dwell: Duration) -> Self {
        Self {
            dwell: Some(dwell),
            max_samples: None,
        }
    }

    /// Measure a number of samples.
    pub fn samples(max_samples: usize) -> Self {
        Self {
            dwell: None,
            max_samples: Some(max_samples),
        }
    }

    /// Whatever comes first.
    pub fn either(dwell: Duration, max_samples: usize) -> Self {
        Self {
            dwell: Some(dwell),
            max_samples: Some(max_samples),
        }
    }

    /// Until cancelled.
    pub fn cancelled() -> Self {
        Self::default()
    }
}

/// A flag to stop [`Session::measure_until`] from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl<F: InterfaceFactory> Session<F> {
    /// Send a bus trigger.
    pub fn trigger(&mut self) -> Result<(), SmuError> {
        let d = self.ready()?;
        self.send_active(&[d.bus_trigger], &[])
    }

    /// Read `n_points` records of the current configuration.
    ///
    /// A DC configuration yields one record per read. A sweep yields exactly its number of
    /// points, read under the sweep timeout, which is restored to the default afterwards, also
    /// on error.
    pub fn measure(&mut self, n_points: usize) -> Result<Vec<MeasurementRecord>, SmuError> {
        let d = self.ready()?;
        let mode = self.state().mode();

        let response = match mode {
            MeasurementMode::Unconfigured => {
                return Err(SmuError::Config(
                    "Configure a DC bias or sweep before measuring".to_string(),
                ));
            }
            MeasurementMode::Sweep { n_points: n } => {
                if n_points != n {
                    return Err(SmuError::Config(format!(
                        "The sweep is configured for {n} points, not {n_points}"
                    )));
                }
                let timeout = self.state().sweep_timeout().unwrap_or(DEFAULT_TIMEOUT);
                let cmd = self.render_active(d.read_sweep, &[]);
                let mut guard = TimeoutGuard::new(self.interface_mut()?, timeout)?;
                guard.query(&cmd)?
            }
            MeasurementMode::Dc { resistance } => {
                if n_points != 1 {
                    return Err(SmuError::Config(format!(
                        "A DC bias reads one record at a time, not {n_points}"
                    )));
                }
                let cmd = if resistance { d.read_dc_ohms } else { d.read_dc };
                self.query_active(cmd, &[])?
            }
        };

        let fields = if mode == (MeasurementMode::Dc { resistance: true }) { 5 } else { 4 };
        let records = parse_records(&response, n_points, fields)?;
        if let Some(stats) = SweepStats::from_records(&records, self.state().source()) {
            let msg = format!(
                "Sweep of {} points took {:.3} s, mean step {:.3e}, mean sample period {:.3e} s, \
                 rate {:?}",
                records.len(),
                stats.duration_s,
                stats.mean_step,
                stats.mean_sample_period_s,
                stats.sweep_rate
            );
            if self.config().log_sweep_stats {
                info!("{msg}");
            } else {
                debug!("{msg}");
            }
            self.state_mut().last_sweep = Some(stats);
        }
        Ok(records)
    }

    /// Measure single records repeatedly until a bound is reached or `cancel` is set.
    ///
    /// Cancellation is checked before every sample, so it takes effect within one sample period.
    /// Every record is passed to `on_each` as it arrives and returned at the end.
    pub fn measure_until(
        &mut self,
        until: Until,
        cancel: &CancelToken,
        mut on_each: impl FnMut(&MeasurementRecord),
    ) -> Result<Vec<MeasurementRecord>, SmuError> {
        let tic = Instant::now();
        let mut records = Vec::new();
        loop {
            if cancel.is_cancelled() {
                debug!("Measurement cancelled after {} samples", records.len());
                break;
            }
            if until.max_samples.is_some_and(|max| records.len() >= max) {
                break;
            }
            if until.dwell.is_some_and(|dwell| tic.elapsed() >= dwell) {
                break;
            }
            for record in self.measure(1)? {
                on_each(&record);
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits() {
        let status = StatusWord::new(8);
        assert!(status.in_compliance(Family::K2400));
        assert!(!status.in_compliance(Family::K2600));
        assert!(StatusWord::new(1 << 22).remote_sense(Family::K2400G));
        assert!(StatusWord::new(1 << 4).remote_sense(Family::K2600B));
    }

    #[test]
    fn test_parse_strips_nul() {
        let records = parse_records("1.0,2.0,3.0,0\0\0", 1, 4).unwrap();
        assert_eq!(records[0].fields(), vec![1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_empty_response() {
        assert!(matches!(
            parse_records("", 1, 4),
            Err(SmuError::MalformedResponse {
                expected: 4,
                actual: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_sweep_stats_zero_duration() {
        let records = parse_records("0,0,1,0,1,0,1,0", 2, 4).unwrap();
        let stats = SweepStats::from_records(&records, SourceFunction::Voltage).unwrap();
        assert_eq!(stats.duration_s, 0.0);
        assert_eq!(stats.mean_step, 1.0);
        assert_eq!(stats.sweep_rate, None);
    }
}
