//! Timing budget of a sweep.
//!
//! A sweep is read back in one go, so the read has to wait for the whole acquisition. The
//! timeout for that read is derived from the physical measurement parameters: each point costs
//! the conversion time of the two measured channels, a fixed protocol overhead, and the step
//! delay. The sum is widened by a small fixed safety margin plus an allowance for the transport.

use std::time::Duration;

use crate::SmuError;

/// Assumed mains frequency if nothing else is configured.
pub const DEFAULT_LINE_FREQUENCY_HZ: f64 = 50.0;

/// Worst case protocol overhead per sample.
pub const SAMPLE_OVERHEAD_MS: f64 = 3.0;

/// Step delay the instrument picks in auto delay mode.
pub const AUTO_STEP_DELAY_MS: f64 = 3.0;

/// Safety margin on the sweep duration.
pub const SAFETY_MARGIN: f64 = 1.2;

/// Fixed allowance for the transport on top of the sweep duration.
pub const TRANSPORT_ALLOWANCE_MS: f64 = 10_000.0;

/// Voltage and current are converted for every sample.
pub const MEASURED_CHANNELS: f64 = 2.0;

/// Delay between setting a sweep point and measuring it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepDelay {
    /// Let the instrument choose.
    Auto,
    /// A fixed delay.
    Fixed(Duration),
}

impl StepDelay {
    /// A fixed step delay in seconds.
    pub fn from_secs(secs: f64) -> Result<Self, SmuError> {
        if secs < 0.0 {
            return Err(SmuError::Config(format!(
                "Step delay must not be negative, got {secs} s"
            )));
        }
        Duration::try_from_secs_f64(secs)
            .map(StepDelay::Fixed)
            .map_err(|_| SmuError::Config(format!("Invalid step delay: {secs} s")))
    }
}

/// Inputs of the timing budget.
///
/// # Example
///
/// ```
/// use keithley_2xxx::{StepDelay, SweepTiming};
///
/// let timing = SweepTiming::new(1.0, 50.0, 101, StepDelay::Auto);
/// assert_eq!(timing.sample_baseline_ms(), 43.0);
/// assert!((timing.comms_timeout().as_secs_f64() - 15.5752).abs() < 1e-6);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepTiming {
    nplc: f64,
    line_frequency_hz: f64,
    n_points: usize,
    step_delay: StepDelay,
}

impl SweepTiming {
    /// Create a timing budget.
    ///
    /// A line frequency that is not a positive number falls back to
    /// [`DEFAULT_LINE_FREQUENCY_HZ`].
    pub fn new(nplc: f64, line_frequency_hz: f64, n_points: usize, step_delay: StepDelay) -> Self {
        let line_frequency_hz = if line_frequency_hz.is_finite() && line_frequency_hz > 0.0 {
            line_frequency_hz
        } else {
            DEFAULT_LINE_FREQUENCY_HZ
        };
        Self {
            nplc,
            line_frequency_hz,
            n_points,
            step_delay,
        }
    }

    /// Conversion time of one sample.
    pub fn adc_time_ms(&self) -> f64 {
        self.nplc * (1000.0 / self.line_frequency_hz) * MEASURED_CHANNELS
    }

    /// Conversion time plus protocol overhead of one sample.
    pub fn sample_baseline_ms(&self) -> f64 {
        self.adc_time_ms() + SAMPLE_OVERHEAD_MS
    }

    /// Delay per point.
    pub fn step_delay_ms(&self) -> f64 {
        match self.step_delay {
            StepDelay::Auto => AUTO_STEP_DELAY_MS,
            StepDelay::Fixed(delay) => delay.as_secs_f64() * 1000.0,
        }
    }

    /// Worst case duration of the whole sweep.
    pub fn sweep_duration_ms(&self) -> f64 {
        self.n_points as f64 * (self.sample_baseline_ms() + self.step_delay_ms()) * SAFETY_MARGIN
    }

    /// Read timeout for the sweep.
    ///
    /// Saturates at [`Duration::MAX`]. A budget that is not a number or comes out below the
    /// transport allowance, e.g. from a negative NPLC, yields the allowance alone.
    pub fn comms_timeout(&self) -> Duration {
        let allowance = Duration::from_millis(TRANSPORT_ALLOWANCE_MS as u64);
        let secs = (self.sweep_duration_ms() + TRANSPORT_ALLOWANCE_MS) / 1000.0;
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => timeout.max(allowance),
            Err(_) if secs > 0.0 => Duration::MAX,
            Err(_) => allowance,
        }
    }
}
