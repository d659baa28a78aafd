use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::tempdir;

fn bin() -> String {
    env!("CARGO_BIN_EXE_oxivcd").to_string()
}

const DICTIONARY: &[u8] = b"<html><head><title>Inbox</title></head><body><ul class=\"messages\"></ul></body></html>";
const TARGET: &[u8] = b"<html><head><title>Inbox (3)</title></head><body><ul class=\"messages\"><li>hi</li></ul></body></html>";

#[test]
fn cli_encode_decode_roundtrip() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    let target = dir.path().join("target.html");
    let delta = dir.path().join("delta.vcdiff");
    let output = dir.path().join("output.html");

    std::fs::write(&dictionary, DICTIONARY).unwrap();
    std::fs::write(&target, TARGET).unwrap();

    let st = Command::new(bin())
        .arg("--force")
        .args(["encode", "-d"])
        .arg(&dictionary)
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());
    assert!(std::fs::metadata(&delta).unwrap().len() < TARGET.len() as u64);

    let st = Command::new(bin())
        .arg("--force")
        .args(["decode", "-d"])
        .arg(&dictionary)
        .arg(&delta)
        .arg(&output)
        .status()
        .unwrap();
    assert!(st.success());
    assert_eq!(std::fs::read(&output).unwrap(), TARGET);
}

#[test]
fn cli_stdio_pipeline() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    std::fs::write(&dictionary, DICTIONARY).unwrap();

    let mut child = Command::new(bin())
        .args(["encode", "--interleaved", "--checksum", "-d"])
        .arg(&dictionary)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(TARGET).unwrap();
    let encoded = child.wait_with_output().unwrap();
    assert!(encoded.status.success());
    assert_eq!(&encoded.stdout[..4], b"\xD6\xC3\xC4S");

    let mut child = Command::new(bin())
        .args(["decode", "-d"])
        .arg(&dictionary)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(&encoded.stdout).unwrap();
    let decoded = child.wait_with_output().unwrap();
    assert!(decoded.status.success());
    assert_eq!(decoded.stdout, TARGET);
}

#[test]
fn cli_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    let target = dir.path().join("target.html");
    let delta = dir.path().join("delta.vcdiff");
    std::fs::write(&dictionary, DICTIONARY).unwrap();
    std::fs::write(&target, TARGET).unwrap();
    std::fs::write(&delta, b"existing").unwrap();

    let st = Command::new(bin())
        .args(["encode", "-d"])
        .arg(&dictionary)
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(!st.success());
    assert_eq!(std::fs::read(&delta).unwrap(), b"existing");
}

#[test]
fn cli_check_only_writes_nothing() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    let input = dir.path().join("in.html");
    std::fs::write(&dictionary, DICTIONARY).unwrap();
    std::fs::write(&input, TARGET).unwrap();

    let out = Command::new(bin())
        .args(["encode", "--check-only", "-d"])
        .arg(&dictionary)
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
}

#[test]
fn cli_decode_of_garbage_fails() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    let delta = dir.path().join("bad.vcdiff");
    std::fs::write(&dictionary, DICTIONARY).unwrap();
    std::fs::write(&delta, b"definitely not vcdiff").unwrap();

    let out = Command::new(bin())
        .args(["decode", "--check-only", "-d"])
        .arg(&dictionary)
        .arg(&delta)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("corrupt delta"));
}

#[test]
fn cli_print_commands() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    let target = dir.path().join("target.html");
    let delta = dir.path().join("delta.vcdiff");
    std::fs::write(&dictionary, DICTIONARY).unwrap();
    std::fs::write(&target, TARGET).unwrap();
    let st = Command::new(bin())
        .args(["encode", "-d"])
        .arg(&dictionary)
        .arg(&target)
        .arg(&delta)
        .status()
        .unwrap();
    assert!(st.success());

    let out = Command::new(bin()).arg("header").arg(&delta).output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("VCDIFF version:               0x00"));
    assert!(text.contains("VCD_SOURCE"));
    assert!(text.contains(&format!("VCDIFF target window length:  {}", TARGET.len())));

    let out = Command::new(bin()).arg("delta").arg(&delta).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("CPY_"));
}

#[test]
fn cli_dict_id_is_stable() {
    let dir = tempdir().unwrap();
    let dictionary = dir.path().join("dict.html");
    std::fs::write(&dictionary, DICTIONARY).unwrap();

    let out = Command::new(bin()).arg("dict-id").arg(&dictionary).output().unwrap();
    assert!(out.status.success());
    let printed = String::from_utf8(out.stdout).unwrap();
    assert_eq!(printed.trim(), oxivcd::DictionaryId::of(DICTIONARY).to_string());
}

#[test]
fn cli_config_works() {
    let out = Command::new(bin()).arg("config").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("DEFAULT_WINDOW_SIZE="));
}
