#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(role) = ems_security::Role::new(s) {
            assert!(role.matches(s));
            assert!(!role.as_str().is_empty());
        }
    }
});
