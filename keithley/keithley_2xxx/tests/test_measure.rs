//! Tests for reading measurements.

mod common;

use std::time::Duration;

use measurements::test_utils::assert_almost_eq;
use rstest::*;

use ivkit::{InstrumentInterface, LoopbackInterfaceString};
use keithley_2xxx::{
    CancelToken, DcSetup, Family, ResistanceMode, SenseRange, SmuError, SourceFunction,
    StepDelay, SweepSetup, Until,
};

use common::*;

fn dc_volt(resistance: ResistanceMode) -> DcSetup {
    DcSetup {
        source: SourceFunction::Voltage,
        compliance: 0.04,
        set_point: 0.5,
        sense_range: SenseRange::FollowCompliance,
        resistance,
    }
}

fn with_reads(mut body: Script, reads: &[&'static str]) -> Script {
    body.extend(reads.iter().map(|r| ("read?", Some(*r))));
    body
}

/// One DC record on the 2400.
#[rstest]
fn test_measure_dc() {
    let body = with_reads(dc_2400(), &["5.000000E-01,1.250000E-03,1.234500E+00,0"]);
    let mut smu = crt_smu(Kind::K2400, body);
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();

    let records = smu.measure(1).unwrap();
    assert_eq!(records.len(), 1);
    let rec = records[0];
    assert_eq!(rec.len(), 4);
    assert_eq!(rec.volts(), 0.5);
    assert_eq!(rec.amps(), 0.00125);
    assert_eq!(rec.ohms(), None);
    assert_eq!(rec.timestamp(), 1.2345);
    assert_almost_eq(rec.current().as_milliamperes(), 1.25);
    assert!(!rec.status().in_compliance(Family::K2400));
}

/// A DC record with resistance on the 2400, in compliance.
#[rstest]
fn test_measure_dc_ohms() {
    let body = with_reads(
        dc_ohms_2400(),
        &["5.000000E-01,1.000000E-03,5.000000E+02,2.000000E+00,8"],
    );
    let mut smu = crt_smu(Kind::K2400, body);
    smu.configure_dc(&dc_volt(ResistanceMode::Manual)).unwrap();

    let rec = smu.measure(1).unwrap()[0];
    assert_eq!(rec.len(), 5);
    assert_eq!(rec.ohms(), Some(500.0));
    assert_almost_eq(rec.resistance().unwrap().as_ohms(), 500.0);
    assert_eq!(rec.fields(), vec![0.5, 0.001, 500.0, 2.0, 8.0]);
    assert!(rec.status().in_compliance(Family::K2400));
}

/// The field count has to match exactly.
#[rstest]
#[case("5.000000E-01,1.000000E-03,5.000000E+02,2.000000E+00,0", 5)]
#[case("5.000000E-01,1.000000E-03,2.000000E+00", 3)]
#[case("", 0)]
fn test_measure_malformed(#[case] response: &'static str, #[case] actual_exp: usize) {
    let body = with_reads(dc_2400(), &[response]);
    let mut smu = crt_smu(Kind::K2400, body);
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();

    match smu.measure(1) {
        Err(SmuError::MalformedResponse {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 4);
            assert_eq!(actual, actual_exp);
        }
        other => panic!("Expected MalformedResponse, got {other:?}"),
    }
}

/// A DC record on the 2600, whose compliance bit sits elsewhere.
#[rstest]
fn test_measure_dc_2601() {
    let mut body: Script = vec![
        ("format.data = format.ASCII", None),
        ("smua.source.func = smua.OUTPUT_DCVOLTS", None),
        ("smua.source.levelv = 0.50000000", None),
        ("smua.source.delay = smua.DELAY_AUTO", None),
        ("smua.source.limiti = 0.04000000", None),
        ("smua.measure.autorangei = smua.AUTORANGE_OFF", None),
        ("smua.measure.rangei = 0.04000000", None),
        ("smua.source.limiti = 0.04000000", None),
        ("smua.source.output = smua.OUTPUT_ON", None),
        ("smua.measure.count = 1", None),
        ("smua.measure.autozero = smua.AUTOZERO_ONCE", None),
        (r#"waitcomplete() print("1")"#, Some("1.00000e+00")),
    ];
    body.push((
        "smua.nvbuffer1.clear() smua.nvbuffer2.clear() \
         smua.measure.iv(smua.nvbuffer1, smua.nvbuffer2) \
         printbuffer(1, 1, smua.nvbuffer2.readings, smua.nvbuffer1.readings, \
         smua.nvbuffer1.timestamps, smua.nvbuffer1.statuses)",
        Some("5.00000e-01, 4.00000e-02, 3.20000e+00, 6.40000e+01"),
    ));
    let mut smu = crt_smu(Kind::K2601, body);
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();

    let rec = smu.measure(1).unwrap()[0];
    assert_eq!(rec.amps(), 0.04);
    assert_eq!(rec.status().raw(), 64);
    assert!(rec.status().in_compliance(Family::K2600));
}

/// A sweep is read under its own timeout, and statistics are kept.
#[rstest]
fn test_measure_sweep() {
    let body = with_reads(
        sweep_2400("3", "5.000000E-01"),
        &["0.0,1.0E-03,0.0,0,0.5,2.0E-03,0.1,0,1.0,3.0E-03,0.2,0"],
    );
    let mut smu = crt_smu(Kind::K2400, body);
    smu.configure_sweep(&SweepSetup {
        source: SourceFunction::Voltage,
        compliance: 0.04,
        n_points: 3,
        step_delay: StepDelay::Auto,
        start: 0.0,
        end: 1.0,
        sense_range: SenseRange::FollowCompliance,
    })
    .unwrap();

    let sweep_timeout = smu.state().sweep_timeout().unwrap();
    // 3 * (43 + 3) * 1.2 + 10000 ms
    assert_almost_eq(sweep_timeout.as_secs_f64(), 10.1656);

    let records = smu.measure(3).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].volts(), 1.0);

    let history = smu.interface().unwrap().timeout_history();
    assert_eq!(
        &history[history.len() - 2..],
        &[sweep_timeout, Duration::from_secs(3)]
    );

    let stats = smu.state().last_sweep().unwrap();
    assert_almost_eq(stats.duration_s, 0.2);
    assert_almost_eq(stats.mean_step, 0.5);
    assert_almost_eq(stats.mean_sample_period_s, 0.1);
    assert_almost_eq(stats.sweep_rate.unwrap(), 5.0);
}

/// A sweep read that times out still leaves the default timeout behind.
#[rstest]
fn test_measure_sweep_timeout_restored() {
    let body = with_reads(
        sweep_2400("3", "5.000000E-01"),
        &[LoopbackInterfaceString::NO_RESPONSE],
    );
    let mut smu = crt_smu(Kind::K2400, body);
    smu.configure_sweep(&SweepSetup {
        source: SourceFunction::Voltage,
        compliance: 0.04,
        n_points: 3,
        step_delay: StepDelay::Auto,
        start: 0.0,
        end: 1.0,
        sense_range: SenseRange::FollowCompliance,
    })
    .unwrap();
    let sweep_timeout = smu.state().sweep_timeout().unwrap();

    match smu.measure(3) {
        Err(SmuError::Instrument(err)) => assert!(err.is_timeout()),
        other => panic!("Expected a timeout, got {other:?}"),
    }
    let history = smu.interface().unwrap().timeout_history();
    assert_eq!(
        &history[history.len() - 2..],
        &[sweep_timeout, Duration::from_secs(3)]
    );
    assert_eq!(smu.interface().unwrap().get_timeout(), Duration::from_secs(3));
    assert!(smu.state().last_sweep().is_none());
}

/// A sweep reads exactly its configured number of points.
#[rstest]
fn test_measure_sweep_wrong_count() {
    let mut smu = crt_smu(Kind::K2400, sweep_2400("3", "5.000000E-01"));
    smu.configure_sweep(&SweepSetup {
        source: SourceFunction::Voltage,
        compliance: 0.04,
        n_points: 3,
        step_delay: StepDelay::Auto,
        start: 0.0,
        end: 1.0,
        sense_range: SenseRange::FollowCompliance,
    })
    .unwrap();
    assert!(matches!(smu.measure(5), Err(SmuError::Config(_))));
}

/// Nothing can be measured before something is configured.
#[rstest]
fn test_measure_unconfigured() {
    let mut smu = crt_smu(Kind::K2400, vec![]);
    assert!(matches!(smu.measure(1), Err(SmuError::Config(_))));
}

/// A DC bias reads one record at a time.
#[rstest]
fn test_measure_dc_wrong_count() {
    let mut smu = crt_smu(Kind::K2400, dc_2400());
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();
    assert!(matches!(smu.measure(2), Err(SmuError::Config(_))));
}

/// Repeated measurements stop at the sample bound and report every record.
#[rstest]
fn test_measure_until_samples() {
    let body = with_reads(
        dc_2400(),
        &[
            "5.000000E-01,1.000000E-03,1.0,0",
            "5.000000E-01,1.100000E-03,1.1,0",
            "5.000000E-01,1.200000E-03,1.2,0",
        ],
    );
    let mut smu = crt_smu(Kind::K2400, body);
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();

    let mut seen = Vec::new();
    let records = smu
        .measure_until(Until::samples(3), &CancelToken::new(), |r| {
            seen.push(r.timestamp())
        })
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(seen, vec![1.0, 1.1, 1.2]);
}

/// A cancelled token stops before the first sample.
#[rstest]
fn test_measure_until_cancelled() {
    let mut smu = crt_smu(Kind::K2400, dc_2400());
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let records = smu
        .measure_until(Until::cancelled(), &cancel, |_| {})
        .unwrap();
    assert!(records.is_empty());
}

/// A zero dwell time measures nothing.
#[rstest]
fn test_measure_until_dwell() {
    let mut smu = crt_smu(Kind::K2400, dc_2400());
    smu.configure_dc(&dc_volt(ResistanceMode::Off)).unwrap();

    let records = smu
        .measure_until(Until::dwell(Duration::ZERO), &CancelToken::new(), |_| {})
        .unwrap();
    assert!(records.is_empty());
}

/// The bus trigger.
#[rstest]
fn test_trigger() {
    let mut smu = crt_smu(Kind::K2400, vec![("*TRG", None)]);
    smu.trigger().unwrap();
}
