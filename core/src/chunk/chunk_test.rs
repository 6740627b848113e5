use std::fs;

use crate::obj::func::Proto;
use crate::state::{Runtime, RuntimeError};
use crate::val::{Function, Number, Value};

use super::*;

fn sample_image() -> ChunkImage {
    let inner = ProtoImage {
        source: Some(b"@sample.lua".to_vec()),
        line_defined: 3,
        last_line_defined: 5,
        num_params: 2,
        is_vararg: 0,
        max_stack_size: 4,
        code: vec![0x0000_0026, 0x0080_0026],
        constants: vec![ConstImage::Integer(-7), ConstImage::Str(b"x".repeat(300))],
        upvalues: vec![UpvalImage {
            name: Some(b"y".to_vec()),
            in_stack: true,
            index: 1,
        }],
        protos: vec![],
        line_info: vec![4, 5],
        loc_vars: vec![
            LocVarImage {
                name: Some(b"a".to_vec()),
                start_pc: 0,
                end_pc: 2,
            },
            LocVarImage {
                name: Some(b"b".to_vec()),
                start_pc: 0,
                end_pc: 2,
            },
        ],
    };
    let main = ProtoImage {
        source: Some(b"@sample.lua".to_vec()),
        line_defined: 0,
        last_line_defined: 0,
        num_params: 0,
        is_vararg: 1,
        max_stack_size: 2,
        code: vec![0x0000_0001, 0x0000_4041, 0x0080_0026],
        constants: vec![
            ConstImage::Nil,
            ConstImage::Boolean(true),
            ConstImage::Float(1.5),
            ConstImage::Integer(42),
            ConstImage::Str(b"print".to_vec()),
        ],
        upvalues: vec![UpvalImage {
            name: Some(b"_ENV".to_vec()),
            in_stack: true,
            index: 0,
        }],
        protos: vec![inner],
        line_info: vec![1, 2, 3],
        loc_vars: vec![],
    };
    ChunkImage { num_upvalues: 1, main }
}

fn sample_bytes() -> Vec<u8> {
    encode_chunk(&sample_image(), false).unwrap()
}

#[test]
fn header_layout() {
    let bytes = sample_bytes();
    assert_eq!(&bytes[..4], b"\x1bLua");
    assert_eq!(bytes[4], 0x53);
    assert_eq!(bytes[5], 0);
    assert_eq!(&bytes[6..12], b"\x19\x93\r\n\x1a\n");
    assert_eq!(&bytes[12..17], &[4, 8, 4, 8, 8]);
    assert_eq!(&bytes[17..25], &0x5678i64.to_le_bytes());
    assert_eq!(&bytes[25..33], &370.5f64.to_le_bytes());
    // upvalue count of the main closure
    assert_eq!(bytes[33], 1);
    // main source: size + 1, then the bytes
    assert_eq!(bytes[34] as usize, b"@sample.lua".len() + 1);
}

#[test]
fn decode_reverses_encode() {
    let image = sample_image();
    let decoded = decode_chunk(&sample_bytes()).unwrap();
    assert_eq!(decoded, image);
}

#[test]
fn nested_source_is_written_once() {
    let mut image = sample_image();
    let shared = encode_chunk(&image, false).unwrap();
    image.main.protos[0].source = Some(b"@other.lua".to_vec());
    let distinct = encode_chunk(&image, false).unwrap();
    assert_eq!(distinct.len(), shared.len() + b"@other.lua".len());
    assert_eq!(decode_chunk(&distinct).unwrap(), image);
}

#[test]
fn long_strings_use_escaped_size() {
    let bytes = sample_bytes();
    let needle = [&[0xFFu8][..], &301u64.to_le_bytes()[..]].concat();
    assert!(bytes.windows(needle.len()).any(|w| w == needle.as_slice()));
}

#[test]
fn strip_drops_debug_information() {
    let image = sample_image();
    let full = encode_chunk(&image, false).unwrap();
    let stripped = encode_chunk(&image, true).unwrap();
    assert!(stripped.len() < full.len());

    let decoded = decode_chunk(&stripped).unwrap();
    assert_eq!(decoded.main, image.main.stripped());
    assert_eq!(decoded.main.code, image.main.code);
    assert_eq!(decoded.main.protos[0].constants, image.main.protos[0].constants);
    assert!(decoded.summary().stripped);
    assert!(!image.summary().stripped);
}

#[test]
fn rejects_foreign_or_damaged_chunks() {
    let bytes = sample_bytes();

    let mut foreign = bytes.clone();
    foreign[0] = b'#';
    let err = decode_chunk(&foreign).unwrap_err();
    assert!(format!("{err:#}").contains("not a precompiled chunk"));

    let mut version = bytes.clone();
    version[4] = 0x54;
    let err = decode_chunk(&version).unwrap_err();
    assert!(format!("{err:#}").contains("version mismatch"));

    let mut converted = bytes.clone();
    converted[8] = b'\n';
    let err = decode_chunk(&converted).unwrap_err();
    assert!(format!("{err:#}").contains("corrupted chunk"));

    let mut sizes = bytes.clone();
    sizes[15] = 4;
    let err = decode_chunk(&sizes).unwrap_err();
    assert!(format!("{err:#}").contains("integer size mismatch"));

    let err = decode_chunk(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(format!("{err:#}").contains("truncated chunk"));

    let err = decode_chunk(&bytes[..20]).unwrap_err();
    assert!(format!("{err:#}").contains("truncated chunk"));

    let mut trailing = bytes.clone();
    trailing.push(0);
    let err = decode_chunk(&trailing).unwrap_err();
    assert!(format!("{err:#}").contains("extra data at end of chunk"));
}

#[test]
fn rejects_unknown_constant_tag() {
    let mut image = sample_image();
    image.main.constants = vec![ConstImage::Integer(1)];
    let mut bytes = encode_chunk(&image, true).unwrap();
    let tag_at = bytes.iter().position(|&b| b == TAG_INTEGER).unwrap();
    bytes[tag_at] = 0x42;
    let err = decode_chunk(&bytes).unwrap_err();
    assert!(format!("{err:#}").contains("unknown tag 0x42"));
}

#[test]
fn summary_walks_nested_functions() {
    let summary = sample_image().summary();
    let paths: Vec<_> = summary.functions.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, ["main", "main/0"]);
    assert_eq!(summary.total_instructions, 5);
    assert_eq!(summary.total_constants, 7);
    assert_eq!(summary.distinct_strings, 2);
    assert_eq!(summary.functions[1].num_params, 2);
    assert!(summary.functions[0].is_vararg);
    assert_eq!(summary.functions[0].source.as_deref(), Some("@sample.lua"));
}

#[test]
fn undump_builds_closure_on_stack() {
    let mut rt = Runtime::new().unwrap();
    let th = rt.main_thread();
    let top = rt.stack_top(th);
    let cl = rt.undump(th, &sample_bytes(), "=sample").unwrap();

    assert_eq!(rt.stack_top(th), top + 1);
    let Value::Function(Function::Lua(on_stack)) = rt.stack_get(th, top) else {
        panic!("expected a closure on the stack");
    };
    assert_eq!(on_stack, cl);
    assert!(rt.closure_upvalue(cl, 0).is_none());

    let proto = rt.heap.proto(rt.heap.lua_closure(cl).proto);
    assert_eq!(proto.is_vararg, 1);
    assert_eq!(proto.code.len(), 3);
    assert!(matches!(proto.constants[1], Value::Boolean(true)));
    assert!(matches!(proto.constants[3], Value::Number(Number::Integer(42))));
    let Value::String(s) = proto.constants[4] else {
        panic!("expected a string constant");
    };
    assert_eq!(rt.string_bytes(s), b"print");
    assert_eq!(proto.protos.len(), 1);
    let inner = rt.heap.proto(proto.protos[0]);
    assert_eq!(inner.num_params, 2);
    let Value::String(long) = inner.constants[1] else {
        panic!("expected a string constant");
    };
    assert!(!long.is_short());
    assert_eq!(rt.string_bytes(long).len(), 300);
}

#[test]
fn undumped_chunk_survives_collection_and_dumps_back() {
    let mut rt = Runtime::new().unwrap();
    let th = rt.main_thread();
    let cl = rt.undump(th, &sample_bytes(), "=sample").unwrap();
    rt.full_gc().unwrap();
    rt.full_gc().unwrap();

    let proto = rt.heap.lua_closure(cl).proto;
    let bytes = rt.dump(proto, false).unwrap();
    assert_eq!(decode_chunk(&bytes).unwrap(), sample_image());

    let stripped = rt.dump(proto, true).unwrap();
    assert_eq!(decode_chunk(&stripped).unwrap().main, sample_image().main.stripped());
}

#[test]
fn undump_reports_malformed_input() {
    let mut rt = Runtime::new().unwrap();
    let th = rt.main_thread();
    let top = rt.stack_top(th);
    match rt.undump(th, b"return 1", "=input") {
        Err(RuntimeError::Syntax(msg)) => {
            assert!(msg.starts_with("input: bad binary format"), "{msg}");
            assert!(msg.contains("not a precompiled chunk"), "{msg}");
        }
        other => panic!("expected a syntax error, got {other:?}"),
    }
    assert_eq!(rt.stack_top(th), top);
}

#[test]
fn load_binds_globals_to_first_upvalue() {
    let mut rt = Runtime::new().unwrap();
    let th = rt.main_thread();
    let cl = rt.load(th, &sample_bytes(), "=sample").unwrap();
    let uv = rt.closure_upvalue(cl, 0).expect("upvalue bound");
    assert_eq!(rt.upvalue_value(uv).as_table(), Some(rt.globals()));
}

#[test]
fn dump_refuses_non_literal_constants() {
    let mut rt = Runtime::new().unwrap();
    rt.gc_stop();
    let t = rt.new_table().unwrap();
    let proto = rt
        .new_proto(Proto {
            constants: vec![Value::Table(t)],
            ..Proto::new()
        })
        .unwrap();
    let err = rt.dump(proto, false).unwrap_err();
    assert!(err.to_string().contains("cannot be dumped"));
}

#[test]
fn chunk_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.luac");
    fs::write(&path, sample_bytes()).unwrap();

    let mut rt = Runtime::new().unwrap();
    let th = rt.main_thread();
    let bytes = fs::read(&path).unwrap();
    let cl = rt.undump(th, &bytes, "@sample.luac").unwrap();
    let proto = rt.heap.lua_closure(cl).proto;
    assert_eq!(rt.dump(proto, false).unwrap(), bytes);
}
