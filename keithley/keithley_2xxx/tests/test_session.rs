//! Tests for connecting to and disconnecting from the instrument.

mod common;

use std::time::Duration;

use rstest::*;

use ivkit::{InstrumentError, LoopbackFactory, LoopbackInterfaceString};
use keithley_2xxx::{
    Family, Model, SessionConfig, SessionPhase, SmuChannel, SmuError, SourceFunction, Terminals,
    connect_with,
};

use common::*;

/// Connect to each family and check what the session learned.
#[rstest]
#[case(Kind::K2400, Family::K2400, Model::M2400)]
#[case(Kind::K2450, Family::K2400G, Model::M2450)]
#[case(Kind::K2601, Family::K2600, Model::M2601)]
fn test_connect(#[case] kind: Kind, #[case] family: Family, #[case] model: Model) {
    let smu = crt_smu(kind, vec![]);
    assert_eq!(smu.phase(), SessionPhase::Ready);
    assert_eq!(smu.family(), Some(family));
    assert_eq!(smu.identity().unwrap().model(), model);
    assert_eq!(smu.state().source(), SourceFunction::Voltage);
    assert_eq!(smu.state().nplc(), 1.0);
    assert_eq!(smu.state().default_timeout(), Some(Duration::from_secs(3)));
    assert!(smu.is_transport_open());
}

/// The self test runs under a widened timeout, which is restored afterwards.
#[rstest]
fn test_self_test_timeout_restored() {
    let smu = crt_smu(Kind::K2400, vec![]);
    assert_eq!(
        smu.interface().unwrap().timeout_history(),
        &[Duration::from_secs(5), Duration::from_secs(3)]
    );
}

/// The contact check option is recorded and the check switched off.
#[rstest]
fn test_contact_check_option() {
    let smu = crt_smu_opts(Kind::K2400, "CONTACT-CHECK", vec![]);
    assert!(smu.state().has_contact_check_option());
    assert_eq!(smu.state().options(), Some("CONTACT-CHECK"));
}

/// A ghost connection is closed and the channel reopened.
#[rstest]
fn test_ghost_connection_retried() {
    let ghost = LoopbackInterfaceString::new(vec![], vec![], "\n").with_ghost_resets(1);
    let clean = lbk(&session_script(Kind::K2400, "0", vec![]));
    let factory = LoopbackFactory::new(vec![ghost, clean]);

    let smu = connect_with(ADDRESS, 3, SessionConfig::default(), factory).unwrap();
    assert_eq!(smu.phase(), SessionPhase::Ready);
    assert_eq!(smu.factory().opened(), 2);
    assert_eq!(smu.factory().cleanups(), 1);
}

/// A channel that stays dirty exhausts the retries.
#[rstest]
fn test_connection_exhausted() {
    let ghosts = (0..2)
        .map(|_| LoopbackInterfaceString::new(vec![], vec![], "\n").with_ghost_resets(1))
        .collect();
    let factory = LoopbackFactory::new(ghosts);

    match connect_with(ADDRESS, 2, SessionConfig::default(), factory) {
        Err(SmuError::ConnectionExhausted {
            address, attempts, ..
        }) => {
            assert_eq!(address, ADDRESS);
            assert_eq!(attempts, 2);
        }
        other => panic!("Expected ConnectionExhausted, got {:?}", other.err()),
    }
}

/// Failing to open at all also uses up the retries, and the last error is reported.
#[rstest]
fn test_open_failure_exhausts() {
    let factory = LoopbackFactory::<LoopbackInterfaceString>::new(vec![]);
    let mut smu = keithley_2xxx::Session::new(ADDRESS, SessionConfig::default(), factory).unwrap();

    match smu.connect(3) {
        Err(SmuError::ConnectionExhausted {
            attempts,
            last_error,
            ..
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("no loopback interface left"));
        }
        other => panic!("Expected ConnectionExhausted, got {other:?}"),
    }
    assert_eq!(smu.phase(), SessionPhase::HandshakeFailed);
    assert_eq!(smu.factory().cleanups(), 3);
}

/// An unknown instrument fails the handshake, and teardown still works.
#[rstest]
fn test_unsupported_instrument() {
    let script = vec![("*IDN?", Some("ACME Corp.,Model 42,0001,1.0"))];
    let factory = LoopbackFactory::new(vec![lbk(&script)]);
    let mut smu = keithley_2xxx::Session::new(ADDRESS, SessionConfig::default(), factory).unwrap();

    assert!(matches!(
        smu.connect(1),
        Err(SmuError::UnsupportedInstrument(_))
    ));
    assert_eq!(smu.phase(), SessionPhase::Unsupported);
    assert!(smu.is_transport_open());

    let report = smu.disconnect();
    assert!(report.is_clean());
    assert_eq!(smu.phase(), SessionPhase::Disconnected);
    assert!(!smu.is_transport_open());

    // a second disconnect does nothing
    assert!(smu.disconnect().is_clean());
    assert_eq!(smu.factory().cleanups(), 1);
}

/// A 2450 in the wrong language is asked to switch, and the caller told to power cycle.
#[rstest]
fn test_language_mode() {
    let mut script: Script = vec![
        ("*IDN?", Some(IDN_2450)),
        ("*LANG?", Some("TSP")),
        ("*LANG SCPI2400", None),
    ];
    script.extend(teardown_2400());
    let factory = LoopbackFactory::new(vec![lbk(&script)]);

    match connect_with(ADDRESS, 1, SessionConfig::default(), factory) {
        Err(SmuError::LanguageMode {
            found, expected, ..
        }) => {
            assert_eq!(found, "TSP");
            assert_eq!(expected, "SCPI2400");
        }
        other => panic!("Expected LanguageMode, got {:?}", other.err()),
    }
}

/// A failed self test aborts the connect.
#[rstest]
fn test_self_test_failure() {
    let mut script: Script = vec![("*IDN?", Some(IDN_2400))];
    script.extend(reset_2400());
    script.push(("*TST?", Some("1")));
    script.extend(teardown_2400());
    let factory = LoopbackFactory::new(vec![lbk(&script)]);

    match connect_with(ADDRESS, 1, SessionConfig::default(), factory) {
        Err(SmuError::SelfTestFailure(response)) => assert_eq!(response, "1"),
        other => panic!("Expected SelfTestFailure, got {:?}", other.err()),
    }
}

/// Asking for the second channel of a single channel model fails before anything is reset.
#[rstest]
fn test_channel_not_available() {
    let script = vec![("*IDN?", Some(IDN_2601))];
    let factory = LoopbackFactory::new(vec![lbk(&script)]);
    let config = SessionConfig {
        channel: SmuChannel::B,
        ..Default::default()
    };

    let err = connect_with(ADDRESS, 1, config, factory).err().unwrap();
    assert!(matches!(err, SmuError::Config(_)));
}

/// Disconnect runs the teardown once and reclaims the socket session.
#[rstest]
fn test_disconnect() {
    let mut smu = crt_smu(Kind::K2400, vec![]);

    let report = smu.disconnect();
    assert!(report.is_clean());
    assert!(report.failures().is_empty());
    assert_eq!(smu.phase(), SessionPhase::Disconnected);
    assert!(!smu.is_transport_open());
    assert_eq!(smu.factory().cleanups(), 1);
    assert!(smu.identity().is_none());

    assert!(smu.disconnect().is_clean());
    assert_eq!(smu.factory().cleanups(), 1);
}

/// Serial sessions hand the front panel back, and have no socket to reclaim.
#[rstest]
fn test_disconnect_serial() {
    let mut script = connect_2400(Kind::K2400, "0");
    script.extend(teardown_2400());
    script.push(("syst:loc", None));
    let factory = LoopbackFactory::new(vec![lbk(&script)]);

    let mut smu = connect_with(SERIAL_ADDRESS, 1, SessionConfig::default(), factory).unwrap();
    assert!(smu.disconnect().is_clean());
    assert_eq!(smu.factory().cleanups(), 0);
}

/// Operations on a session that is not connected fail.
#[rstest]
fn test_not_connected() {
    let factory = LoopbackFactory::<LoopbackInterfaceString>::new(vec![]);
    let mut smu = keithley_2xxx::Session::new(ADDRESS, SessionConfig::default(), factory).unwrap();
    assert!(matches!(smu.query("*IDN?"), Err(SmuError::NotConnected)));
    assert!(matches!(smu.measure(1), Err(SmuError::NotConnected)));
}

/// Unknown schemes fail when the session is created.
#[rstest]
#[case("gpib://22")]
#[case("tcpip://10.0.0.1:5025")]
fn test_unknown_scheme(#[case] address: &str) {
    let factory = LoopbackFactory::<LoopbackInterfaceString>::new(vec![]);
    match keithley_2xxx::Session::new(address, SessionConfig::default(), factory) {
        Err(SmuError::Transport {
            address: addr,
            source: InstrumentError::UnsupportedScheme(_),
        }) => assert_eq!(addr, address),
        Err(other) => panic!("Expected a transport error, got {other:?}"),
        Ok(_) => panic!("Expected a transport error"),
    }
}

/// Raw queries and the NPLC readback.
#[rstest]
fn test_query_and_nplc() {
    let mut smu = crt_smu(
        Kind::K2400,
        vec![
            ("syst:err?", Some("0,\"No error\"")),
            ("sens:curr:nplc 10", None),
            ("sens:volt:nplc 10", None),
            ("sens:res:nplc 10", None),
            ("sens:curr:nplc?", Some("1.000000E+01")),
        ],
    );
    assert_eq!(smu.query("syst:err?").unwrap(), "0,\"No error\"");
    smu.set_nplc(10.0).unwrap();
    assert_eq!(smu.state().nplc(), 10.0);
    assert_eq!(smu.nplc().unwrap(), 10.0);
    assert!(matches!(smu.set_nplc(0.0), Err(SmuError::Config(_))));
}

/// Terminal selection works on the 2400 and is refused on the 2600.
#[rstest]
fn test_terminals() {
    let mut smu = crt_smu(Kind::K2400, vec![("rout:term rear", None)]);
    smu.set_terminals(Terminals::Rear).unwrap();
    assert_eq!(smu.state().terminals(), Terminals::Rear);

    let mut smu = crt_smu(Kind::K2601, vec![]);
    assert!(matches!(
        smu.set_terminals(Terminals::Rear),
        Err(SmuError::Config(_))
    ));
}

/// The digital output is written and read back, a mismatch is only logged.
#[rstest]
#[case("13")]
#[case("2")]
fn test_digital_output(#[case] readback: &'static str) {
    let mut smu = crt_smu(
        Kind::K2601,
        vec![
            ("digio.writeport(13)", None),
            ("print(digio.readport())", Some(readback)),
        ],
    );
    smu.set_digital_output(13).unwrap();
}

/// Output state on the TSP family.
#[rstest]
fn test_output_tsp() {
    let mut smu = crt_smu(
        Kind::K2601,
        vec![
            ("smua.source.output = smua.OUTPUT_ON", None),
            ("print(smua.source.output)", Some("1.00000e+00")),
        ],
    );
    smu.set_output(true).unwrap();
    assert!(smu.output_enabled().unwrap());
}
