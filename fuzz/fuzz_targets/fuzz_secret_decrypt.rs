#![no_main]
use ems_security::security::{CipherSuite, SensitiveFieldProtector};
use libfuzzer_sys::fuzz_target;

// Arbitrary ciphertext and IV must fail cleanly under both suites.
fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    let (iv, ciphertext) = data.split_at(16);
    for suite in [CipherSuite::AesCbc, CipherSuite::AesGcm] {
        if let Ok(protector) = SensitiveFieldProtector::new(suite, &[0u8; 32]) {
            let _ = protector.decrypt(ciphertext, iv);
        }
    }
});
