use serde_json::Value;
use sha2::{Digest, Sha256};
use sigcarve::database::load_database;
use sigcarve::{CarveSession, Confidence, ScanConfig, SignatureDatabase};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0xAA, 0xBB, 0xFF, 0xD9];
const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_TRAILER: &[u8] = &[0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82];

/// A small "disk image": noise, a JPEG at 0x100, a PNG at 0x400.
fn build_image(dir: &Path) -> std::path::PathBuf {
    let mut data = vec![0x11u8; 0x800];
    data[0x100..0x100 + JPEG.len()].copy_from_slice(JPEG);
    data[0x400..0x408].copy_from_slice(PNG_HEADER);
    data[0x480..0x488].copy_from_slice(PNG_TRAILER);

    let path = dir.join("disk.img");
    fs::write(&path, data).unwrap();
    path
}

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sigcarve"))
}

#[test]
fn builtin_table_carves_and_extracts_with_manifest() {
    let dir = TempDir::new().unwrap();
    let image = build_image(dir.path());
    let session = CarveSession::new(SignatureDatabase::builtin(), ScanConfig::new().with_window_size(64)).unwrap();

    let outcome = session.carve_path(&image, &|_| {}).unwrap();
    let found: Vec<(&str, u64, u64, Confidence)> = outcome
        .regions
        .iter()
        .map(|r| (r.type_id.as_str(), r.start_offset, r.end_offset, r.confidence))
        .collect();
    assert_eq!(
        found,
        vec![
            ("JPEG", 0x100, 0x100 + JPEG.len() as u64, Confidence::Exact),
            ("PNG", 0x400, 0x488, Confidence::Exact),
        ]
    );
    assert!(outcome.identified().is_none());

    let out_dir = dir.path().join("carved");
    let report = session.extract(&outcome.regions, &image, &out_dir).unwrap();
    assert_eq!(report.succeeded(), 2);

    let jpeg_file = out_dir.join("JPEG_000000_0000000000000100.jpg");
    assert_eq!(fs::read(&jpeg_file).unwrap(), JPEG);

    let manifest: Value = serde_json::from_slice(&fs::read(out_dir.join("manifest.json")).unwrap()).unwrap();
    let entries = manifest["extracted"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["file_name"], "JPEG_000000_0000000000000100.jpg");
    assert_eq!(entries[0]["type_id"], "JPEG");
    assert_eq!(entries[0]["confidence"], "EXACT");
    assert_eq!(entries[0]["sha256"], hex::encode(Sha256::digest(JPEG)));
    assert_eq!(entries[1]["start_offset"], 0x400);
    assert!(manifest["failed"].as_array().unwrap().is_empty());
}

#[test]
fn custom_database_file_drives_the_scan() {
    let dir = TempDir::new().unwrap();
    let image = build_image(dir.path());
    let db_path = dir.path().join("signatures.json");
    fs::write(
        &db_path,
        r#"[{"type_id": "PNG", "header": "89 50 4E 47 ?? ?? 1A 0A", "footer": "49454E44AE426082", "extension": "png"}]"#,
    )
    .unwrap();

    let session = CarveSession::new(load_database(&db_path).unwrap(), ScanConfig::default()).unwrap();
    let outcome = session.carve_path(&image, &|_| {}).unwrap();

    assert_eq!(outcome.regions.len(), 1);
    assert_eq!(outcome.regions[0].range(), 0x400..0x488);
}

#[test]
fn cli_identifies_and_prints_json() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("photo.dat");
    fs::write(&input, JPEG).unwrap();

    let output = bin().arg(&input).arg("--json").output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["identified"], "JPEG");
    assert_eq!(json["regions"][0]["end_offset"], JPEG.len());
    assert_eq!(json["cancelled"], false);
}

#[test]
fn cli_extracts_into_output_dir() {
    let dir = TempDir::new().unwrap();
    let image = build_image(dir.path());
    let out_dir = dir.path().join("out");

    let status = bin()
        .arg(&image)
        .arg("--extract")
        .arg("--output")
        .arg(&out_dir)
        .arg("--threads")
        .arg("0")
        .status()
        .unwrap();
    assert!(status.success());
    assert!(out_dir.join("PNG_000001_0000000000000400.png").exists());
    assert!(out_dir.join("manifest.json").exists());
}

#[test]
fn cli_exit_codes_separate_config_and_io_errors() {
    let dir = TempDir::new().unwrap();
    let image = build_image(dir.path());
    let bad_db = dir.path().join("bad.json");
    fs::write(&bad_db, r#"[{"type_id": "A", "header": "01"}, {"type_id": "A", "header": "02"}]"#).unwrap();

    let status = bin().arg(&image).arg("-d").arg(&bad_db).status().unwrap();
    assert_eq!(status.code(), Some(2));

    let status = bin().arg(&image).arg("--window").arg("2").status().unwrap();
    assert_eq!(status.code(), Some(2));

    let status = bin().arg(dir.path().join("missing.img")).status().unwrap();
    assert_eq!(status.code(), Some(1));
}
