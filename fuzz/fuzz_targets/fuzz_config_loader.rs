#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Config parsing and validation must reject invalid input gracefully,
    // never panic.
    if let Ok(cfg) = flowdose_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
