#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = ems_security::SecurityConfig::from_toml_str(s) {
            // Validation must reject, never panic.
            let _ = config.validate();
        }
    }
});
