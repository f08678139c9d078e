#![no_main]

use libfuzzer_sys::fuzz_target;
use sigcarve::database::parse_database;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(db) = parse_database(text) {
            assert!(!db.is_empty());
            assert!(db.max_pattern_len() > 0);
        }
    }
});
