#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // The command grammar faces the open network; it must reject anything
    // malformed without panicking and without unbounded error strings.
    let pins = flowdose_config::Pins {
        relay: 13,
        valve: 16,
    };
    match flowdose_core::Command::parse(data, pins) {
        Ok(_) => {}
        Err(e) => {
            assert!(e.to_string().len() < 256);
        }
    }
});
