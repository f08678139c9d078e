#![no_main]

use libfuzzer_sys::fuzz_target;
use sigcarve::scanner::reference_scan;
use sigcarve::{CarveSession, MemoryReader, ScanConfig, Scanner, SignatureDatabase};

fuzz_target!(|data: &[u8]| {
    let db = SignatureDatabase::builtin();

    let scanner = Scanner::new(&db, ScanConfig::new().with_window_size(32)).unwrap();
    let out = scanner.scan(&mut MemoryReader::new(data)).unwrap();
    assert_eq!(out.events, reference_scan(&db, data));

    let session = CarveSession::new(db, ScanConfig::default()).unwrap();
    let outcome = session.carve(&mut MemoryReader::new(data)).unwrap();
    for region in &outcome.regions {
        assert!(region.start_offset < region.end_offset);
        assert!(region.end_offset <= data.len() as u64);
    }
});
