//! Scripted instruments shared by the driver tests.
//!
//! A script is a list of commands from the host, each with the response of the instrument if the
//! command is a query.

#![allow(dead_code)]

use ivkit::{LoopbackFactory, LoopbackInterfaceString};
use keithley_2xxx::{Session, SessionConfig};

pub type Smu = Session<LoopbackFactory<LoopbackInterfaceString>>;
pub type Script = Vec<(&'static str, Option<&'static str>)>;

pub const ADDRESS: &str = "socket://192.168.1.10:5025";
pub const SERIAL_ADDRESS: &str = "/dev/ttyUSB0";

pub const IDN_2400: &str =
    "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234567,C30   Mar 17 2006 09:29:29/A02  /K/J";
pub const IDN_2450: &str = "KEITHLEY INSTRUMENTS,MODEL 2450,04096331,1.6.4c";
pub const IDN_2601: &str = "Keithley Instruments Inc., Model 2601, 1398687, 1.4.2";

/// The instruments we have scripts for.
#[derive(Clone, Copy, Debug)]
pub enum Kind {
    K2400,
    K2450,
    K2601,
}

/// Split a script into the commands from the host and the responses from the instrument.
pub fn split(script: &[(&str, Option<&str>)]) -> (Vec<String>, Vec<String>) {
    let host = script.iter().map(|(cmd, _)| cmd.to_string()).collect();
    let inst = script
        .iter()
        .filter_map(|(_, resp)| resp.map(|r| r.to_string()))
        .collect();
    (host, inst)
}

/// A loopback that runs the script.
pub fn lbk(script: &[(&str, Option<&str>)]) -> LoopbackInterfaceString {
    let (host, inst) = split(script);
    LoopbackInterfaceString::new(host, inst, "\n")
}

pub fn reset_2400() -> Script {
    vec![
        ("*RST", None),
        ("*OPC?", Some("1")),
        ("*CLS", None),
        ("*ESE 0", None),
        ("*SRE 0", None),
        ("syst:pres", None),
        ("stat:pres", None),
        ("stat:que:cle", None),
        ("trac:cle", None),
        ("*OPC?", Some("1")),
    ]
}

pub fn reset_2601() -> Script {
    vec![
        ("reset()", None),
        (r#"waitcomplete() print("1")"#, Some("1.00000e+00")),
        ("errorqueue.clear()", None),
        ("status.standard.enable = 0", None),
        ("status.request_enable = 0", None),
        ("smua.nvbuffer1.clear()", None),
        ("smua.nvbuffer2.clear()", None),
        (r#"waitcomplete() print("1")"#, Some("1.00000e+00")),
    ]
}

/// Connect script of the 2400 and 2450, the latter with its language and digital I/O checks.
pub fn connect_2400(kind: Kind, options: &'static str) -> Script {
    let mut script: Script = Vec::new();
    match kind {
        Kind::K2450 => {
            script.push(("*IDN?", Some(IDN_2450)));
            script.push(("*LANG?", Some("SCPI2400")));
        }
        _ => script.push(("*IDN?", Some(IDN_2400))),
    }
    script.extend(reset_2400());
    script.push(("*TST?", Some("0")));
    if let Kind::K2450 = kind {
        script.push(("syst:tlin?", Some("0")));
    }
    script.extend([
        ("outp:smod himp", None),
        ("sour:volt:prot 20.00000000", None),
        ("syst:rsen 0", None),
        ("sens:func 'curr:dc', 'volt:dc'", None),
        ("form:elem volt,curr,time,stat", None),
        ("syst:pos rst", None),
        ("syst:lfr:auto on", None),
        ("rout:term fron", None),
        ("sour:func:mode?", Some("VOLT")),
        ("syst:azer off", None),
        ("syst:azer:cach:stat on", None),
        ("*OPT?", Some(options)),
    ]);
    if options.contains("CONTACT-CHECK") {
        script.push(("syst:cch off", None));
    }
    script.extend([
        ("syst:time:res", None),
        ("syst:beep:stat 0", None),
        ("sens:curr:nplc 1", None),
        ("sens:volt:nplc 1", None),
        ("sens:res:nplc 1", None),
    ]);
    script
}

pub fn connect_2601() -> Script {
    let mut script: Script = vec![("*IDN?", Some(IDN_2601))];
    script.extend(reset_2601());
    script.extend([
        ("*TST?", Some("0")),
        ("smua.source.offmode = smua.OUTPUT_HIGH_Z", None),
        ("smua.sense = smua.SENSE_LOCAL", None),
        ("format.data = format.ASCII", None),
        ("smua.nvbuffer1.collecttimestamps = 1", None),
        ("smua.nvbuffer2.collecttimestamps = 1", None),
        ("localnode.autolinefreq = true", None),
        ("print(smua.source.func)", Some("1.00000e+00")),
        ("smua.measure.autozero = smua.AUTOZERO_OFF", None),
        ("timer.reset()", None),
        ("beeper.enable = 0", None),
        ("smua.measure.nplc = 1", None),
    ]);
    script
}

pub fn teardown_2400() -> Script {
    let mut script: Script = vec![(":abor", None)];
    script.extend(reset_2400());
    script.push(("outp 0", None));
    script
}

pub fn teardown_2601() -> Script {
    let mut script: Script = vec![("smua.abort()", None)];
    script.extend(reset_2601());
    script.push(("smua.source.output = smua.OUTPUT_OFF", None));
    script
}

/// The full script of a session: connect, the body, and the teardown on drop.
pub fn session_script(kind: Kind, options: &'static str, body: Script) -> Script {
    let (mut script, teardown) = match kind {
        Kind::K2400 | Kind::K2450 => (connect_2400(kind, options), teardown_2400()),
        Kind::K2601 => (connect_2601(), teardown_2601()),
    };
    script.extend(body);
    script.extend(teardown);
    script
}

/// Create a connected session that runs the body after connecting.
pub fn crt_smu(kind: Kind, body: Script) -> Smu {
    crt_smu_opts(kind, "0", body)
}

/// Like [`crt_smu`], with the response to the option query.
pub fn crt_smu_opts(kind: Kind, options: &'static str, body: Script) -> Smu {
    crt_smu_config(kind, options, SessionConfig::default(), body)
}

/// Like [`crt_smu_opts`], with a configuration that leaves the connect script as it is.
pub fn crt_smu_config(
    kind: Kind,
    options: &'static str,
    config: SessionConfig,
    body: Script,
) -> Smu {
    let factory = LoopbackFactory::new(vec![lbk(&session_script(kind, options, body))]);
    let mut smu = Session::new(ADDRESS, config, factory).unwrap();
    smu.connect(1).unwrap();
    smu
}

/// Script of a DC configuration on the 2400: voltage source, 0.5 V, 40 mA compliance, range
/// following compliance, no resistance.
pub fn dc_2400() -> Script {
    vec![
        ("sens:func:off 'res'", None),
        ("form:elem volt,curr,time,stat", None),
        ("sour:func volt", None),
        ("sour:volt:mode fix", None),
        ("sour:volt 0.50000000", None),
        ("sour:del:auto on", None),
        ("sens:func 'curr'", None),
        ("sens:curr:prot 0.04000000", None),
        ("sens:curr:rang:auto off", None),
        ("sens:curr:prot:rsyn on", None),
        ("sens:curr:prot 0.04000000", None),
        ("outp 1", None),
        ("trig:coun 1", None),
        ("syst:azer once", None),
        ("*OPC?", Some("1")),
    ]
}

/// Like [`dc_2400`], with resistance.
pub fn dc_ohms_2400() -> Script {
    vec![
        ("form:elem volt,curr,res,time,stat", None),
        ("sens:res:mode man", None),
        ("sour:func volt", None),
        ("sour:volt:mode fix", None),
        ("sour:volt 0.50000000", None),
        ("sour:del:auto on", None),
        ("sens:func 'res'", None),
        ("sens:curr:prot 0.04000000", None),
        ("sens:curr:rang:auto off", None),
        ("sens:curr:prot:rsyn on", None),
        ("sens:curr:prot 0.04000000", None),
        ("sens:res:rang:auto on", None),
        ("outp 1", None),
        ("trig:coun 1", None),
        ("syst:azer once", None),
        ("*OPC?", Some("1")),
    ]
}

/// Script of a sweep from 0 V to 1 V on the 2400 with the given number of points, as text.
pub fn sweep_2400(n: &'static str, step: &'static str) -> Script {
    vec![
        ("sens:curr:nplc?", Some("1.000000E+00")),
        ("sens:func:off 'res'", None),
        ("form:elem volt,curr,time,stat", None),
        ("sour:func volt", None),
        ("sour:volt 0.00000000", None),
        ("sens:curr:prot 0.04000000", None),
        ("sens:curr:rang:auto off", None),
        ("sens:curr:prot:rsyn on", None),
        ("sens:curr:prot 0.04000000", None),
        ("outp 1", None),
        ("sour:volt:mode swe", None),
        ("sour:swe:spac lin", None),
        (leak(format!("trig:coun {n}")), None),
        (leak(format!("sour:swe:poin {n}")), None),
        ("sour:volt:star 0.00000000", None),
        ("sour:volt:stop 1.00000000", None),
        ("sour:del:auto on", None),
        ("sour:volt:step?", Some(step)),
        ("sour:swe:rang best", None),
        ("syst:azer once", None),
        ("*OPC?", Some("1")),
    ]
}

fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}
