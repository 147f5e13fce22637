use keithley_2xxx::{DcSetup, ResistanceMode, SenseRange, SessionConfig, SourceFunction};

fn main() {
    env_logger::init();

    // Serial device with the default settings of the 2400 (9600 baud, 8N1).
    let mut smu = keithley_2xxx::connect("/dev/ttyUSB0", 3, SessionConfig::default()).unwrap();
    println!("Connected to: {}", smu.identity().unwrap().raw());

    // Bias at 100 mV with a 10 mA compliance and read the resistance along.
    smu.configure_dc(&DcSetup {
        source: SourceFunction::Voltage,
        compliance: 0.01,
        set_point: 0.1,
        sense_range: SenseRange::FollowCompliance,
        resistance: ResistanceMode::Manual,
    })
    .unwrap();

    for _ in 0..5 {
        let rec = smu.measure(1).unwrap()[0];
        println!(
            "{:.3} s: {} V, {} A, {:?} Ohm",
            rec.timestamp(),
            rec.volts(),
            rec.amps(),
            rec.ohms()
        );
    }

    // Output off, front panel back to the user.
    let report = smu.disconnect();
    println!("Teardown clean: {}", report.is_clean());
}
