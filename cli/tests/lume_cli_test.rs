use std::fs;
use std::path::Path;

use assert_cmd::Command;
use lume_core::chunk::{ChunkImage, ConstImage, LocVarImage, ProtoImage, UpvalImage, decode_chunk, encode_chunk};
use predicates::prelude::*;

fn lume() -> Command {
    let mut cmd = Command::cargo_bin("lume").expect("binary built");
    cmd.env_remove("LUME_TRACE");
    cmd
}

fn sample_chunk() -> ChunkImage {
    let inner = ProtoImage {
        source: Some(b"@demo.lua".to_vec()),
        line_defined: 2,
        last_line_defined: 4,
        num_params: 1,
        max_stack_size: 2,
        code: vec![0x0080_0026],
        constants: vec![ConstImage::Float(0.5)],
        line_info: vec![3],
        loc_vars: vec![LocVarImage {
            name: Some(b"x".to_vec()),
            start_pc: 0,
            end_pc: 1,
        }],
        ..ProtoImage::default()
    };
    ChunkImage {
        num_upvalues: 1,
        main: ProtoImage {
            source: Some(b"@demo.lua".to_vec()),
            is_vararg: 1,
            max_stack_size: 2,
            code: vec![0x0000_0001, 0x0080_0026],
            constants: vec![ConstImage::Str(b"hello".to_vec()), ConstImage::Integer(7)],
            upvalues: vec![UpvalImage {
                name: Some(b"_ENV".to_vec()),
                in_stack: true,
                index: 0,
            }],
            protos: vec![inner],
            line_info: vec![1, 5],
            ..ProtoImage::default()
        },
    }
}

fn write_chunk(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("demo.luac");
    fs::write(&path, encode_chunk(&sample_chunk(), false).unwrap()).unwrap();
    path
}

#[test]
fn inspect_prints_function_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_chunk(dir.path());
    lume()
        .arg("inspect")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("functions 2"))
        .stdout(predicate::str::contains("main/0"))
        .stdout(predicate::str::contains("@demo.lua"));
}

#[test]
fn inspect_json_is_machine_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_chunk(dir.path());
    let output = lume().arg("inspect").arg(&path).arg("--json").output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["total_instructions"], 3);
    assert_eq!(json["functions"][1]["num_params"], 1);
    assert_eq!(json["stripped"], false);
}

#[test]
fn inspect_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.luac");
    fs::write(&path, b"print('hi')").unwrap();
    lume()
        .arg("inspect")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a precompiled chunk"));
}

#[test]
fn strip_writes_chunk_without_debug_info() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_chunk(dir.path());
    let out = dir.path().join("demo.stripped.luac");
    lume().arg("strip").arg(&path).arg(&out).assert().success();

    let stripped = decode_chunk(&fs::read(&out).unwrap()).unwrap();
    assert_eq!(stripped.main, sample_chunk().main.stripped());
    assert!(stripped.summary().stripped);
}

#[test]
fn stress_reports_collections() {
    lume()
        .args(["stress", "--objects", "5000", "--keep", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cycles"))
        .stdout(predicate::str::contains("kept          10"));
}

#[test]
fn stress_reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("lume.toml");
    fs::write(&config, "gc_pause = 100\nseed = 42\n").unwrap();
    let output = lume()
        .args(["stress", "--objects", "1000", "--keep", "0", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["objects"], 1000);
    assert_eq!(json["kept"], 0);
    assert!(json["gc"]["cycles"].as_u64().unwrap() >= 1);
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "gc_step_mul = 0\n").unwrap();
    lume()
        .arg("config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("gc_step_mul must be positive"));
}

#[test]
fn config_prints_defaults() {
    lume()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("gc_pause = 200"))
        .stdout(predicate::str::contains("max_native_calls = 200"));
}
