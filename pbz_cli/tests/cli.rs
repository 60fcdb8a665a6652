use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn pbz(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pbz"))
        .args(args)
        .output()
        .expect("run failed")
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn sample(len: usize) -> Vec<u8> {
    let pattern = b"block parallel compression keeps every core busy. ";
    (0..len).map(|i| pattern[i % pattern.len()] ^ (i / 997) as u8).collect()
}

#[test]
fn compress_decompress_verify_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let packed = dir.path().join("input.pbz");
    let restored = dir.path().join("restored.bin");
    fs::write(&input, sample(100_000)).unwrap();

    for codec in ["deflate", "gzip", "zstd", "lz4", "passthrough"] {
        let out = pbz(&[
            "compress",
            s(&input),
            s(&packed),
            "--codec",
            codec,
            "--block-size",
            "4096",
            "--jobs",
            "3",
            "--force",
        ]);
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains("blocks      : 25"), "{stderr}");

        let out = pbz(&["decompress", s(&packed), s(&restored), "--codec", codec, "--force"]);
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

        let out = pbz(&["verify", s(&input), s(&restored)]);
        assert!(out.status.success());
        assert!(String::from_utf8_lossy(&out.stdout).contains("identical"));
    }
}

#[test]
fn decompress_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    let packed = dir.path().join("input.pbz");
    fs::write(&input, b"hello, stdout").unwrap();

    assert!(pbz(&["compress", s(&input), s(&packed), "-b", "4"]).status.success());
    let out = pbz(&["decompress", s(&packed), "-"]);
    assert!(out.status.success());
    assert_eq!(out.stdout, b"hello, stdout");
}

#[test]
fn refuses_to_overwrite_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    let packed = dir.path().join("exists.pbz");
    fs::write(&input, b"data").unwrap();
    fs::write(&packed, b"precious").unwrap();

    let out = pbz(&["compress", s(&input), s(&packed)]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
    assert_eq!(fs::read(&packed).unwrap(), b"precious");
}

#[test]
fn missing_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let out = pbz(&["compress", s(&dir.path().join("nope")), s(&dir.path().join("out"))]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

#[test]
fn failed_decompress_removes_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let packed = dir.path().join("input.pbz");
    let restored = dir.path().join("restored.bin");
    fs::write(&input, sample(50_000)).unwrap();
    assert!(pbz(&["compress", s(&input), s(&packed), "-b", "1024"]).status.success());

    // Wrong codec: deflate records fed to zstd.
    let out = pbz(&["decompress", s(&packed), s(&restored), "--codec", "zstd"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("codec error"));
    assert!(!restored.exists());
}

#[test]
fn inspect_reports_blocks_and_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let packed = dir.path().join("input.pbz");
    fs::write(&input, sample(10)).unwrap();
    let out = pbz(&["compress", s(&input), s(&packed), "-b", "4", "-c", "passthrough"]);
    assert!(out.status.success());

    let out = pbz(&["inspect", s(&packed), "--blocks"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("declared blocks : 3"), "{stdout}");
    assert!(stdout.contains("records found   : 3"), "{stdout}");

    // Claim five blocks while only three records exist.
    let mut bytes = fs::read(&packed).unwrap();
    bytes[..4].copy_from_slice(&5i32.to_le_bytes());
    fs::write(&packed, &bytes).unwrap();
    let out = pbz(&["inspect", s(&packed)]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("declares 5 blocks but holds 3"));
}

#[test]
fn verify_detects_difference() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::write(&a, b"same length").unwrap();
    fs::write(&b, b"same lengtH").unwrap();

    let out = pbz(&["verify", s(&a), s(&b)]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("files differ"));
}
