//! Command tables for the instrument families.
//!
//! Each [`Family`] resolves to exactly one [`DialectCommands`] record at connect time. Callers
//! never see a command string: the session renders templates from the record with typed
//! parameters.
//!
//! Templates may contain these placeholders:
//!
//! | placeholder  | replaced with                                                   |
//! |--------------|-----------------------------------------------------------------|
//! | `{ch}`       | channel name, `smua` or `smub`                                  |
//! | `{src}`      | word of the source function, e.g. `volt` or `v`                 |
//! | `{snc}`      | word of the sensed (compliance) function, e.g. `curr` or `i`    |
//! | `{src_func}` | the source function as the instrument names it                  |
//! | `{sense}`    | the sense function word, resistance included                    |
//! | `{value}`    | a numeric level, limit or range                                 |
//! | `{n}`        | a count                                                         |
//! | `{start}`    | sweep start                                                     |
//! | `{stop}`     | sweep stop                                                      |
//! | `{nplc}`     | integration time in power-line cycles                           |
//!
//! A template that contains `{ch}` is sent once per channel for instrument-wide operations, and
//! once for the active channel for measurement operations.

use crate::{Family, SmuError};

/// A command template.
pub type Template = &'static str;

const PLACEHOLDERS: [&str; 10] = [
    "ch", "src", "snc", "src_func", "sense", "value", "n", "start", "stop", "nplc",
];

/// A setting that is queried and only changed if it differs from what we need.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckedSetting {
    /// Query that returns the current setting.
    pub query: Template,
    /// Token the response must contain.
    pub expected: &'static str,
    /// Command that changes the setting.
    pub set: Template,
}

/// Command syntax of a dialect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syntax {
    /// Colon-delimited SCPI with a single addressable channel.
    Scpi,
    /// Dot-method TSP with named channels.
    Tsp,
}

/// All commands the driver uses, for one family.
///
/// Operations a family does not offer are `None`. Every other entry is required to be non-empty,
/// which [`DialectCommands::validate`] checks when the session resolves its dialect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DialectCommands {
    /// Command syntax.
    pub syntax: Syntax,

    /// Word for voltage in `{src}` and `{snc}`.
    pub volt_word: Template,
    /// Word for current in `{src}` and `{snc}`.
    pub curr_word: Template,
    /// Word for resistance in `{sense}`.
    pub resistance_word: Template,
    /// Voltage source function in `{src_func}`.
    pub volt_func: Template,
    /// Current source function in `{src_func}`.
    pub curr_func: Template,
    /// Response of [`Self::source_function_query`] while sourcing voltage.
    pub volt_response: &'static str,
    /// Response of [`Self::source_function_query`] while sourcing current.
    pub curr_response: &'static str,

    /// Reset to factory defaults.
    pub reset: Template,
    /// Block until pending operations completed, answer `1`.
    pub opc_query: Template,
    /// Clear status and error queue.
    pub clear_status: Template,
    /// Disable the standard event enable register.
    pub event_enable_off: Template,
    /// Disable the service request enable register.
    pub service_request_off: Template,
    /// Further family specific presets run after a reset.
    pub presets: &'static [Template],
    /// Self test, answers `0` when passed.
    pub self_test_query: Template,
    /// Abort a running acquisition.
    pub abort: Template,
    /// Hand control back to the front panel.
    pub go_local: Option<Template>,
    /// Required command language.
    pub language: Option<CheckedSetting>,
    /// Digital I/O compatibility mode.
    pub dio_compat: Option<CheckedSetting>,

    /// Output goes high impedance when switched off.
    pub output_off_mode_high_z: Template,
    /// Output goes guarded when switched off.
    pub output_off_mode_guard: Option<Template>,
    /// Voltage protection ceiling.
    pub voltage_protection: Option<Template>,
    /// 2-wire sensing.
    pub sense_local: Template,
    /// 4-wire sensing.
    pub sense_remote: Template,
    /// Query whether 4-wire sensing is active.
    pub sense_remote_query: Template,
    /// Sense current and voltage concurrently.
    pub concurrent_sense: Option<Template>,
    /// Fixed output element ordering.
    pub output_format: &'static [Template],
    /// Power on into the reset state.
    pub power_on_setup: Option<Template>,
    /// Detect the line frequency automatically.
    pub line_frequency_auto: Template,
    /// Use the front terminals.
    pub terminals_front: Option<Template>,
    /// Use the rear terminals.
    pub terminals_rear: Option<Template>,
    /// Query the source function.
    pub source_function_query: Template,
    /// Hardware autozero off.
    pub autozero_off: Template,
    /// Autozero once, now.
    pub autozero_once: Template,
    /// Cache autozero references.
    pub autozero_caching: Option<Template>,
    /// Query installed options.
    pub options_query: Option<Template>,
    /// Reset the timestamp timer.
    pub timer_reset: Template,
    /// Silence the beeper.
    pub beeper_off: Template,
    /// Set the integration time.
    pub set_nplc: &'static [Template],
    /// Query the integration time.
    pub nplc_query: Template,

    /// Output on.
    pub output_on: Template,
    /// Output off.
    pub output_off: Template,
    /// Query the output state.
    pub output_query: Template,

    /// Select records of voltage, current, time and status.
    pub elements_four: &'static [Template],
    /// Select records of voltage, current, resistance, time and status.
    pub elements_five: &'static [Template],
    /// Manual resistance mode.
    pub resistance_manual: Option<Template>,
    /// Fully automatic resistance measurement.
    pub resistance_auto: Option<&'static [Template]>,
    /// Autorange the resistance measurement.
    pub resistance_autorange: Option<Template>,
    /// Select the source function.
    pub source_function: Template,
    /// Source a fixed level.
    pub source_mode_fixed: Option<Template>,
    /// Set the source level.
    pub source_level: Template,
    /// Automatic source delay.
    pub source_delay_auto: Template,
    /// Fixed source delay in seconds.
    pub source_delay_fixed: &'static [Template],
    /// Select the sense function.
    pub sense_function: Option<Template>,
    /// Set the compliance limit.
    pub compliance: Template,
    /// Pin the sense range to the compliance limit.
    pub range_follow: &'static [Template],
    /// Autorange the sense function.
    pub range_auto: &'static [Template],
    /// Fixed sense range.
    pub range_fixed: &'static [Template],
    /// Samples per trigger.
    pub trigger_count: Template,
    /// Linear sweep from `{start}` to `{stop}` in `{n}` points.
    pub sweep_setup: &'static [Template],
    /// Query the step size of the configured sweep.
    pub sweep_step_query: Template,
    /// Use the best fixed source range for the sweep.
    pub sweep_ranging: Option<Template>,

    /// Acquire and return one DC record.
    pub read_dc: Template,
    /// Acquire and return one DC record with resistance.
    pub read_dc_ohms: Template,
    /// Run the configured sweep and return all records.
    pub read_sweep: Template,
    /// Arm and initiate the trigger model.
    pub arm: Template,
    /// Bus trigger.
    pub bus_trigger: Template,

    /// Enable the native contact check.
    pub contact_check_on: Option<Template>,
    /// Disable the native contact check.
    pub contact_check_off: Option<Template>,
    /// Write the digital output port.
    pub digital_output: Template,
    /// Read the digital output port back.
    pub digital_output_query: Template,
}

/// SCPI dialect of the 2400.
pub const SCPI_2400: DialectCommands = DialectCommands {
    syntax: Syntax::Scpi,

    volt_word: "volt",
    curr_word: "curr",
    resistance_word: "res",
    volt_func: "volt",
    curr_func: "curr",
    volt_response: "VOLT",
    curr_response: "CURR",

    reset: "*RST",
    opc_query: "*OPC?",
    clear_status: "*CLS",
    event_enable_off: "*ESE 0",
    service_request_off: "*SRE 0",
    presets: &["syst:pres", "stat:pres", "stat:que:cle", "trac:cle"],
    self_test_query: "*TST?",
    abort: ":abor",
    go_local: Some("syst:loc"),
    language: None,
    dio_compat: None,

    output_off_mode_high_z: "outp:smod himp",
    output_off_mode_guard: Some("outp:smod guar"),
    voltage_protection: Some("sour:volt:prot {value}"),
    sense_local: "syst:rsen 0",
    sense_remote: "syst:rsen 1",
    sense_remote_query: "syst:rsen?",
    concurrent_sense: Some("sens:func 'curr:dc', 'volt:dc'"),
    output_format: &["form:elem volt,curr,time,stat"],
    power_on_setup: Some("syst:pos rst"),
    line_frequency_auto: "syst:lfr:auto on",
    terminals_front: Some("rout:term fron"),
    terminals_rear: Some("rout:term rear"),
    source_function_query: "sour:func:mode?",
    autozero_off: "syst:azer off",
    autozero_once: "syst:azer once",
    autozero_caching: Some("syst:azer:cach:stat on"),
    options_query: Some("*OPT?"),
    timer_reset: "syst:time:res",
    beeper_off: "syst:beep:stat 0",
    set_nplc: &[
        "sens:curr:nplc {nplc}",
        "sens:volt:nplc {nplc}",
        "sens:res:nplc {nplc}",
    ],
    nplc_query: "sens:curr:nplc?",

    output_on: "outp 1",
    output_off: "outp 0",
    output_query: "outp?",

    elements_four: &["sens:func:off 'res'", "form:elem volt,curr,time,stat"],
    elements_five: &["form:elem volt,curr,res,time,stat"],
    resistance_manual: Some("sens:res:mode man"),
    resistance_auto: Some(&[
        "sens:func 'res'",
        "sens:res:mode auto",
        "sens:res:rang:auto on",
        "form:elem volt,curr,res,time,stat",
    ]),
    resistance_autorange: Some("sens:res:rang:auto on"),
    source_function: "sour:func {src_func}",
    source_mode_fixed: Some("sour:{src}:mode fix"),
    source_level: "sour:{src} {value}",
    source_delay_auto: "sour:del:auto on",
    source_delay_fixed: &["sour:del:auto off", "sour:del {value}"],
    sense_function: Some("sens:func '{sense}'"),
    compliance: "sens:{snc}:prot {value}",
    range_follow: &["sens:{snc}:rang:auto off", "sens:{snc}:prot:rsyn on"],
    range_auto: &["sens:{snc}:rang:auto on"],
    range_fixed: &["sens:{snc}:rang {value}"],
    trigger_count: "trig:coun {n}",
    sweep_setup: &[
        "sour:{src}:mode swe",
        "sour:swe:spac lin",
        "trig:coun {n}",
        "sour:swe:poin {n}",
        "sour:{src}:star {start}",
        "sour:{src}:stop {stop}",
    ],
    sweep_step_query: "sour:{src}:step?",
    sweep_ranging: Some("sour:swe:rang best"),

    read_dc: "read?",
    read_dc_ohms: "read?",
    read_sweep: "read?",
    arm: "init",
    bus_trigger: "*TRG",

    contact_check_on: Some("syst:cch on"),
    contact_check_off: Some("syst:cch off"),
    digital_output: "sour2:ttl {value}",
    digital_output_query: "sour2:ttl:act?",
};

/// The 2450 runs the 2400 command set, once told to, and has a native digital I/O mode that
/// must be switched off.
pub const SCPI_2400G: DialectCommands = DialectCommands {
    language: Some(CheckedSetting {
        query: "*LANG?",
        expected: "SCPI2400",
        set: "*LANG SCPI2400",
    }),
    dio_compat: Some(CheckedSetting {
        query: "syst:tlin?",
        expected: "0",
        set: "syst:tlin 0",
    }),
    ..SCPI_2400
};

/// TSP dialect of the 2600.
pub const TSP_2600: DialectCommands = DialectCommands {
    syntax: Syntax::Tsp,

    volt_word: "v",
    curr_word: "i",
    resistance_word: "r",
    volt_func: "OUTPUT_DCVOLTS",
    curr_func: "OUTPUT_DCAMPS",
    volt_response: "1",
    curr_response: "0",

    reset: "reset()",
    opc_query: r#"waitcomplete() print("1")"#,
    clear_status: "errorqueue.clear()",
    event_enable_off: "status.standard.enable = 0",
    service_request_off: "status.request_enable = 0",
    presets: &["{ch}.nvbuffer1.clear()", "{ch}.nvbuffer2.clear()"],
    self_test_query: "*TST?",
    abort: "{ch}.abort()",
    go_local: None,
    language: None,
    dio_compat: None,

    output_off_mode_high_z: "{ch}.source.offmode = {ch}.OUTPUT_HIGH_Z",
    output_off_mode_guard: None,
    voltage_protection: None,
    sense_local: "{ch}.sense = {ch}.SENSE_LOCAL",
    sense_remote: "{ch}.sense = {ch}.SENSE_REMOTE",
    sense_remote_query: "print({ch}.sense)",
    concurrent_sense: None,
    output_format: &[
        "format.data = format.ASCII",
        "{ch}.nvbuffer1.collecttimestamps = 1",
        "{ch}.nvbuffer2.collecttimestamps = 1",
    ],
    power_on_setup: None,
    line_frequency_auto: "localnode.autolinefreq = true",
    terminals_front: None,
    terminals_rear: None,
    source_function_query: "print({ch}.source.func)",
    autozero_off: "{ch}.measure.autozero = {ch}.AUTOZERO_OFF",
    autozero_once: "{ch}.measure.autozero = {ch}.AUTOZERO_ONCE",
    autozero_caching: None,
    options_query: None,
    timer_reset: "timer.reset()",
    beeper_off: "beeper.enable = 0",
    set_nplc: &["{ch}.measure.nplc = {nplc}"],
    nplc_query: "print({ch}.measure.nplc)",

    output_on: "{ch}.source.output = {ch}.OUTPUT_ON",
    output_off: "{ch}.source.output = {ch}.OUTPUT_OFF",
    output_query: "print({ch}.source.output)",

    elements_four: &["format.data = format.ASCII"],
    elements_five: &["format.data = format.ASCII"],
    resistance_manual: None,
    resistance_auto: None,
    resistance_autorange: None,
    source_function: "{ch}.source.func = {ch}.{src_func}",
    source_mode_fixed: None,
    source_level: "{ch}.source.level{src} = {value}",
    source_delay_auto: "{ch}.source.delay = {ch}.DELAY_AUTO",
    source_delay_fixed: &["{ch}.source.delay = {value}"],
    sense_function: None,
    compliance: "{ch}.source.limit{snc} = {value}",
    range_follow: &[
        "{ch}.measure.autorange{snc} = {ch}.AUTORANGE_OFF",
        "{ch}.measure.range{snc} = {value}",
    ],
    range_auto: &["{ch}.measure.autorange{snc} = {ch}.AUTORANGE_ON"],
    range_fixed: &[
        "{ch}.measure.autorange{snc} = {ch}.AUTORANGE_OFF",
        "{ch}.measure.range{snc} = {value}",
    ],
    trigger_count: "{ch}.measure.count = {n}",
    sweep_setup: &[
        "{ch}.trigger.source.linear{src}({start}, {stop}, {n})",
        "{ch}.trigger.source.action = {ch}.ENABLE",
        "{ch}.trigger.measure.iv({ch}.nvbuffer1, {ch}.nvbuffer2)",
        "{ch}.trigger.measure.action = {ch}.ENABLE",
        "{ch}.trigger.count = {n}",
        "{ch}.measure.count = 1",
    ],
    sweep_step_query: "print(({stop} - {start}) / ({n} - 1))",
    sweep_ranging: None,

    read_dc: "{ch}.nvbuffer1.clear() {ch}.nvbuffer2.clear() \
        {ch}.measure.iv({ch}.nvbuffer1, {ch}.nvbuffer2) \
        printbuffer(1, 1, {ch}.nvbuffer2.readings, {ch}.nvbuffer1.readings, \
        {ch}.nvbuffer1.timestamps, {ch}.nvbuffer1.statuses)",
    read_dc_ohms: "{ch}.nvbuffer1.clear() {ch}.nvbuffer2.clear() \
        {ch}.measure.iv({ch}.nvbuffer1, {ch}.nvbuffer2) \
        print(string.format(\"%e,%e,%e,%e,%d\", {ch}.nvbuffer2[1], {ch}.nvbuffer1[1], \
        {ch}.nvbuffer2[1] / {ch}.nvbuffer1[1], {ch}.nvbuffer1.timestamps[1], \
        {ch}.nvbuffer1.statuses[1]))",
    read_sweep: "{ch}.nvbuffer1.clear() {ch}.nvbuffer2.clear() \
        {ch}.trigger.initiate() waitcomplete() \
        printbuffer(1, {ch}.nvbuffer1.n, {ch}.nvbuffer2.readings, {ch}.nvbuffer1.readings, \
        {ch}.nvbuffer1.timestamps, {ch}.nvbuffer1.statuses)",
    arm: "{ch}.trigger.initiate()",
    bus_trigger: "*TRG",

    contact_check_on: None,
    contact_check_off: None,
    digital_output: "digio.writeport({value})",
    digital_output_query: "print(digio.readport())",
};

/// TSP dialect of the 2600B, which names the beeper state.
pub const TSP_2600B: DialectCommands = DialectCommands {
    beeper_off: "beeper.enable = beeper.OFF",
    ..TSP_2600
};

/// The command table for a family.
pub fn commands_for(family: Family) -> &'static DialectCommands {
    match family {
        Family::K2400 => &SCPI_2400,
        Family::K2400G => &SCPI_2400G,
        Family::K2600 => &TSP_2600,
        Family::K2600B => &TSP_2600B,
    }
}

/// Fill the placeholders of a template.
pub(crate) fn render(template: &str, args: &[(&str, &str)]) -> String {
    args.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

impl DialectCommands {
    /// Every command of the table with the name of its operation.
    ///
    /// Optional operations are listed only if present.
    pub fn entries(&self) -> Vec<(&'static str, Template)> {
        let mut entries = vec![
            ("volt-word", self.volt_word),
            ("curr-word", self.curr_word),
            ("resistance-word", self.resistance_word),
            ("volt-func", self.volt_func),
            ("curr-func", self.curr_func),
            ("volt-response", self.volt_response),
            ("curr-response", self.curr_response),
            ("reset", self.reset),
            ("opc", self.opc_query),
            ("clear-status", self.clear_status),
            ("event-enable-off", self.event_enable_off),
            ("service-request-off", self.service_request_off),
            ("self-test", self.self_test_query),
            ("abort", self.abort),
            ("output-off-mode-high-z", self.output_off_mode_high_z),
            ("sense-local", self.sense_local),
            ("sense-remote", self.sense_remote),
            ("sense-remote-query", self.sense_remote_query),
            ("line-frequency-auto", self.line_frequency_auto),
            ("source-function-query", self.source_function_query),
            ("autozero-off", self.autozero_off),
            ("autozero-once", self.autozero_once),
            ("timer-reset", self.timer_reset),
            ("beeper-off", self.beeper_off),
            ("nplc-query", self.nplc_query),
            ("output-on", self.output_on),
            ("output-off", self.output_off),
            ("output-query", self.output_query),
            ("set-source-function", self.source_function),
            ("set-source-level", self.source_level),
            ("source-delay-auto", self.source_delay_auto),
            ("compliance", self.compliance),
            ("trigger-count", self.trigger_count),
            ("sweep-step-query", self.sweep_step_query),
            ("read-dc", self.read_dc),
            ("read-dc-ohms", self.read_dc_ohms),
            ("read-sweep", self.read_sweep),
            ("arm", self.arm),
            ("bus-trigger", self.bus_trigger),
            ("digital-output", self.digital_output),
            ("digital-output-query", self.digital_output_query),
        ];

        let lists: [(&'static str, &'static [Template]); 10] = [
            ("presets", self.presets),
            ("output-format", self.output_format),
            ("set-sense-nplc", self.set_nplc),
            ("elements-four", self.elements_four),
            ("elements-five", self.elements_five),
            ("source-delay-fixed", self.source_delay_fixed),
            ("range-follow", self.range_follow),
            ("range-auto", self.range_auto),
            ("range-fixed", self.range_fixed),
            ("sweep-setup", self.sweep_setup),
        ];
        for (name, list) in lists {
            // an empty list is reported like an empty command
            if list.is_empty() {
                entries.push((name, ""));
            }
            entries.extend(list.iter().map(|t| (name, *t)));
        }

        let optional = [
            ("go-local", self.go_local),
            ("output-off-mode-guard", self.output_off_mode_guard),
            ("voltage-protection", self.voltage_protection),
            ("concurrent-sense", self.concurrent_sense),
            ("power-on-setup", self.power_on_setup),
            ("terminals-front", self.terminals_front),
            ("terminals-rear", self.terminals_rear),
            ("autozero-caching", self.autozero_caching),
            ("options-query", self.options_query),
            ("resistance-manual", self.resistance_manual),
            ("resistance-autorange", self.resistance_autorange),
            ("source-mode-fixed", self.source_mode_fixed),
            ("sense-function", self.sense_function),
            ("sweep-ranging", self.sweep_ranging),
            ("contact-check-on", self.contact_check_on),
            ("contact-check-off", self.contact_check_off),
        ];
        entries.extend(
            optional
                .into_iter()
                .filter_map(|(name, t)| t.map(|t| (name, t))),
        );
        if let Some(list) = self.resistance_auto {
            if list.is_empty() {
                entries.push(("resistance-auto", ""));
            }
            entries.extend(list.iter().map(|t| ("resistance-auto", *t)));
        }
        for (name, setting) in [("language", self.language), ("dio-compat", self.dio_compat)] {
            if let Some(s) = setting {
                entries.extend([(name, s.query), (name, s.expected), (name, s.set)]);
            }
        }
        entries
    }

    /// Check that every operation has a command and only known placeholders are used.
    pub fn validate(&self, family: Family) -> Result<(), SmuError> {
        for (operation, template) in self.entries() {
            if template.trim().is_empty() {
                return Err(SmuError::MissingCommand { family, operation });
            }
            if let Some(unknown) = unknown_placeholder(template) {
                return Err(SmuError::Config(format!(
                    "Dialect for {family} uses unknown placeholder '{{{unknown}}}' in '{operation}'"
                )));
            }
        }
        // source words must be distinct, or source and sense could not be told apart
        if self.volt_word == self.curr_word || self.volt_response == self.curr_response {
            return Err(SmuError::Config(format!(
                "Dialect for {family} cannot distinguish voltage from current"
            )));
        }
        Ok(())
    }
}

fn unknown_placeholder(template: &str) -> Option<&str> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let name = &after[..close];
        if !PLACEHOLDERS.contains(&name) {
            return Some(name);
        }
        rest = &after[close + 1..];
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        assert_eq!(
            render("sens:{snc}:prot {value}", &[("snc", "curr"), ("value", "0.1")]),
            "sens:curr:prot 0.1"
        );
        assert_eq!(
            render("{ch}.source.func = {ch}.{src_func}", &[
                ("src_func", "OUTPUT_DCVOLTS"),
                ("ch", "smua")
            ]),
            "smua.source.func = smua.OUTPUT_DCVOLTS"
        );
    }

    #[test]
    fn test_unknown_placeholder() {
        assert_eq!(unknown_placeholder("sour:{src} {value}"), None);
        assert_eq!(unknown_placeholder("sour:{source}"), Some("source"));
        assert_eq!(unknown_placeholder("no placeholders"), None);
    }

    #[test]
    fn test_incomplete_table_is_rejected() {
        let broken = DialectCommands {
            output_query: "",
            ..SCPI_2400
        };
        assert!(matches!(
            broken.validate(Family::K2400),
            Err(SmuError::MissingCommand {
                operation: "output-query",
                ..
            })
        ));

        let broken = DialectCommands {
            range_auto: &[],
            ..TSP_2600
        };
        assert!(matches!(
            broken.validate(Family::K2600),
            Err(SmuError::MissingCommand {
                operation: "range-auto",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_placeholder_is_rejected() {
        let broken = DialectCommands {
            source_level: "sour:{source} {value}",
            ..SCPI_2400
        };
        assert!(matches!(
            broken.validate(Family::K2400),
            Err(SmuError::Config(_))
        ));
    }
}
