use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push("bootcheck-tests");
    let _ = std::fs::create_dir_all(&dir);

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    dir.join(format!("{}-{}.{}", prefix, nonce, ext))
}

fn write_temp_file(prefix: &str, contents: &str) -> PathBuf {
    let path = temp_path(prefix, "yaml");
    std::fs::write(&path, contents).expect("Failed to write temp file");
    path
}

fn row_with<'a>(stdout: &'a str, name: &str) -> &'a str {
    stdout
        .split(['\r', '\n'])
        .find(|line| line.contains(name))
        .unwrap_or_else(|| panic!("no row for {}", name))
}

fn bootcheck(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bootcheck"))
        .args(args)
        .output()
        .expect("Failed to execute command")
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Minimal ARM ELF32 with one 16-byte `PT_LOAD` segment at the start of flash.
fn firmware_elf() -> Vec<u8> {
    const FLASH_BASE: u32 = 0x3200_0000;
    const CODE_OFF: u32 = 84;
    const STRTAB_OFF: u32 = 100;
    let strtab: &[u8] = b"\0.shstrtab\0";
    let shoff = (STRTAB_OFF + strtab.len() as u32 + 3) & !3;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    push_u16(&mut out, 2); // ET_EXEC
    push_u16(&mut out, 40); // EM_ARM
    push_u32(&mut out, 1);
    push_u32(&mut out, FLASH_BASE + 1);
    push_u32(&mut out, 52);
    push_u32(&mut out, shoff);
    push_u32(&mut out, 0);
    push_u16(&mut out, 52);
    push_u16(&mut out, 32);
    push_u16(&mut out, 1);
    push_u16(&mut out, 40);
    push_u16(&mut out, 2);
    push_u16(&mut out, 1);

    for v in [1, CODE_OFF, FLASH_BASE, FLASH_BASE, 16, 16, 5, 4] {
        push_u32(&mut out, v);
    }
    out.extend_from_slice(&[0xA5; 16]);
    out.extend_from_slice(strtab);
    out.resize(shoff as usize, 0);

    out.extend_from_slice(&[0; 40]);
    for v in [1, 3, 0, 0, STRTAB_OFF, strtab.len() as u32, 0, 0, 1, 0] {
        push_u32(&mut out, v);
    }
    out
}

const MANIFEST: &str = r#"
name: "sim-board"
limits:
  max_polls: 500
  settle_delay_ms: 0
"#;

#[test]
fn test_clean_run_exits_zero() {
    let manifest = write_temp_file("clean", MANIFEST);
    let output = bootcheck(&["--system", manifest.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with(
        "****************** Class-B Safety Test for sim-board: Core Peripheral Resources"
    ));
    assert!(stdout.contains("| 1   | Start-Up Register Test"));
    assert!(stdout.contains("END of the Core CPU Test."));
    assert!(stdout.contains("Total number of IPs covered in the Test      15\r\n"));
    assert!(!stdout.contains("ERROR"));
    assert!(!stdout.contains("\x1b[2J"));
}

#[test]
fn test_injected_fault_exits_one() {
    let manifest = write_temp_file("sram-fault", MANIFEST);
    let output = bootcheck(&["--system", manifest.to_str().unwrap(), "--fault", "sram"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(row_with(&stdout, "SRAM March Test").contains("| ERROR"));
    // The rest of the sequence still runs.
    assert!(row_with(&stdout, "Flash Test").contains("| SUCCESS"));
    assert!(stdout.contains("Total number of IPs covered in the Test      15"));
}

#[test]
fn test_clock_stall_hits_poll_budget() {
    let manifest = write_temp_file("clock-stall", MANIFEST);
    let output = bootcheck(&[
        "--system",
        manifest.to_str().unwrap(),
        "--fault",
        "clock-stall",
        "--max-polls",
        "25",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("POLL BUDGET EXHAUSTED after 25 polls"));
    assert!(stdout.contains("count=24\r"));
}

#[test]
fn test_crc_flash_fault_prints_checksum() {
    let manifest = write_temp_file(
        "crc-flash",
        r#"
name: "sim-board"
flash:
  algorithm: crc32
plan: [gpio, flash]
faults: [flash]
"#,
    );
    let output = bootcheck(&["--system", manifest.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FLASH CRC: 0x"));
    assert!(stdout.contains("Total number of IPs covered in the Test      2"));
}

#[test]
fn test_json_summary() {
    let manifest = write_temp_file("json", MANIFEST);
    let json_path = temp_path("summary", "json");
    let output = bootcheck(&[
        "--system",
        manifest.to_str().unwrap(),
        "--fault",
        "gpio",
        "--fault",
        "stack_overflow",
        "--json",
        json_path.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(1));
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(summary["board"], "sim-board");
    assert_eq!(summary["covered"], 15);
    assert_eq!(summary["final_index"], 16);
    assert_eq!(summary["failed"], 2);
    assert!(summary["firmware_hash"].is_null());

    let outcomes = summary["outcomes"].as_array().unwrap();
    let stack = outcomes
        .iter()
        .find(|o| o["test"] == "stack_bounds")
        .unwrap();
    assert_eq!(stack["name"], "Stack Overflow Test");
    assert_eq!(stack["result"], "error");

    let _ = std::fs::remove_file(&json_path);
}

#[test]
fn test_unwritable_json_keeps_test_outcome() {
    let manifest = write_temp_file("json-dir", MANIFEST);
    let json_dir = std::env::temp_dir().join("bootcheck-tests");
    let output = bootcheck(&[
        "--system",
        manifest.to_str().unwrap(),
        "--fault",
        "gpio",
        "--json",
        json_dir.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Total number of IPs covered in the Test      15"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to write summary"));

    let clean = write_temp_file("json-dir-clean", MANIFEST);
    let output = bootcheck(&[
        "--system",
        clean.to_str().unwrap(),
        "--json",
        json_dir.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_firmware_hash_in_summary() {
    let manifest = write_temp_file("firmware", MANIFEST);
    let elf = firmware_elf();
    let firmware = temp_path("firmware", "elf");
    std::fs::write(&firmware, &elf).unwrap();
    let json_path = temp_path("firmware-summary", "json");
    let output = bootcheck(&[
        "--system",
        manifest.to_str().unwrap(),
        "--firmware",
        firmware.to_str().unwrap(),
        "--json",
        json_path.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(0));
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(summary["firmware_hash"], format!("{:x}", Sha256::digest(&elf)));

    let _ = std::fs::remove_file(&json_path);
    let _ = std::fs::remove_file(&firmware);
}

#[test]
fn test_clear_flag_clears_screen() {
    let manifest = write_temp_file("clear", MANIFEST);
    let output = bootcheck(&["--system", manifest.to_str().unwrap(), "--clear"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("\x1b[2J\x1b[;H"));
}

#[test]
fn test_invalid_manifest_exits_two() {
    let manifest = write_temp_file(
        "invalid",
        r#"
name: "sim-board"
limits:
  max_steps: 10
"#,
    );
    let output = bootcheck(&["--system", manifest.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration error"));
}

#[test]
fn test_unknown_fault_name_exits_two() {
    let manifest = write_temp_file("bad-fault", MANIFEST);
    let output = bootcheck(&["--system", manifest.to_str().unwrap(), "--fault", "cosmic-ray"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cosmic-ray"));
}

#[test]
fn test_missing_firmware_exits_two() {
    let manifest = write_temp_file("no-firmware", MANIFEST);
    let output = bootcheck(&[
        "--system",
        manifest.to_str().unwrap(),
        "--firmware",
        "/nonexistent/firmware.elf",
    ]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_failed_clock_init_exits_three() {
    let manifest = write_temp_file("clock-init", MANIFEST);
    let output = bootcheck(&["--system", manifest.to_str().unwrap(), "--fault", "clock_init"]);

    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("IPC Test"));
    assert!(!stdout.contains("Clock Test"));
    assert!(!stdout.contains("Total number of IPs"));
}
