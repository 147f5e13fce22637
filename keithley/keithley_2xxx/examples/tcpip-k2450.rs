use keithley_2xxx::{
    ContactCheckMode, ContactSide, SenseRange, SessionConfig, SourceFunction, StepDelay,
    SweepSetup,
};

fn main() {
    env_logger::init();

    let config: SessionConfig = toml::from_str(
        r#"
        wiring = "four-wire"
        nplc = 1.0
        log-sweep-stats = true

        [contact-check]
        threshold-ohm = 25.0
        "#,
    )
    .unwrap();

    // The 2450 has to run the 2400 command set. If it does not, connecting asks it to switch and
    // fails, power cycle it and run this again.
    let mut smu = keithley_2xxx::connect("socket://192.168.1.20:5025", 3, config).unwrap();
    println!("Connected to: {}", smu.identity().unwrap().raw());

    // Make sure both sides of the device are contacted before sweeping.
    smu.enable_contact_check(ContactCheckMode::External).unwrap();
    for side in [ContactSide::Hi, ContactSide::Lo] {
        let result = smu.require_contact(side).unwrap();
        println!("Contact on {side} side: {:?} Ohm", result.resistance_ohm);
    }
    // Restores 4-wire sensing and the integration time.
    smu.disable_contact_check().unwrap();

    // Sweep from -1 V to 1 V in 201 points.
    let step = smu
        .configure_sweep(&SweepSetup {
            source: SourceFunction::Voltage,
            compliance: 0.1,
            n_points: 201,
            step_delay: StepDelay::Auto,
            start: -1.0,
            end: 1.0,
            sense_range: SenseRange::Auto,
        })
        .unwrap();
    println!("Step size: {step} V");

    let records = smu.measure(201).unwrap();
    for rec in records.iter().step_by(20) {
        println!("{} V: {} A", rec.volts(), rec.amps());
    }
    if let Some(stats) = smu.state().last_sweep() {
        println!("Sweep took {:.2} s", stats.duration_s);
    }
}
