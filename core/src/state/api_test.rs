use std::mem::size_of;

use crate::config::RuntimeConfig;
use crate::obj::GcHeader;
use crate::obj::table::KeyError;
use crate::val::{BaseKind, Number, StrRef, Value};

use super::{Runtime, RuntimeError};

fn quiet_runtime() -> Runtime {
    let mut rt = Runtime::new().unwrap();
    rt.gc_stop();
    rt
}

#[test]
fn string_keys_round_trip() {
    let mut rt = quiet_runtime();
    let t = rt.new_table().unwrap();
    rt.table_set_str(t, "answer", Value::integer(42)).unwrap();
    rt.table_set_str(t, "name", Value::Boolean(true)).unwrap();
    assert_eq!(rt.table_get_str(t, "answer").unwrap().as_integer(), Some(42));
    assert_eq!(rt.table_get_str(t, "name").unwrap().as_boolean(), Some(true));
    assert!(rt.table_get_str(t, "missing").unwrap().is_nil());
}

#[test]
fn long_string_keys_match_by_content() {
    let mut rt = quiet_runtime();
    let text = "k".repeat(64);
    let a = rt.new_string(text.as_bytes()).unwrap();
    let b = rt.new_string(text.as_bytes()).unwrap();
    assert!(matches!((a, b), (StrRef::Long(x), StrRef::Long(y)) if x != y));
    assert!(rt.string_eq(a, b));

    let t = rt.new_table().unwrap();
    rt.table_set(t, Value::String(a), Value::integer(1)).unwrap();
    assert_eq!(rt.table_get(t, &Value::String(b)).as_integer(), Some(1));
    assert!(rt.raw_equal(&Value::String(a), &Value::String(b)));
}

#[test]
fn short_strings_are_interned() {
    let mut rt = quiet_runtime();
    let a = rt.new_string(b"hello").unwrap();
    let b = rt.new_string(b"hello").unwrap();
    assert_eq!(a, b);
    assert!(a.is_short());
    assert_eq!(rt.string_hash(a), rt.string_hash(b));
}

#[test]
fn invalid_keys_are_reported() {
    let mut rt = quiet_runtime();
    let t = rt.new_table().unwrap();
    let err = rt.table_set(t, Value::Nil, Value::integer(1)).unwrap_err();
    assert!(matches!(err, RuntimeError::Key(KeyError::Nil)));
    let err = rt.table_set(t, Value::float(f64::NAN), Value::integer(1)).unwrap_err();
    assert_eq!(err.to_string(), "table index is NaN");
    // removing an absent key is fine
    rt.table_set(t, Value::integer(5), Value::Nil).unwrap();
}

#[test]
fn table_charge_follows_growth() {
    let mut rt = quiet_runtime();
    let t = rt.new_table().unwrap();
    let before = rt.total_bytes();
    for i in 0..100 {
        let key = rt.str_value(&format!("key{i}")).unwrap();
        rt.table_set(t, key, Value::integer(i)).unwrap();
    }
    for i in 1..=50 {
        rt.table_set_int(t, i, Value::Boolean(true)).unwrap();
    }
    assert!(rt.total_bytes() > before);
    let footprint = size_of::<GcHeader>() + rt.heap.table(t).footprint();
    assert_eq!(rt.heap.charged(t), footprint);
    assert_eq!(rt.allocator().in_use(), rt.total_bytes());
    assert_eq!(rt.table_len(t), 50);
}

#[test]
fn resize_keeps_entries() {
    let mut rt = quiet_runtime();
    let t = rt.new_table_with(4, 4).unwrap();
    assert_eq!(rt.heap.table(t).array_len(), 4);
    for i in 1..=4 {
        rt.table_set_int(t, i, Value::integer(i * i)).unwrap();
    }
    rt.resize_table(t, 0, 2).unwrap();
    for i in 1..=4 {
        assert_eq!(rt.table_get_int(t, i).as_integer(), Some(i * i));
    }
    assert_eq!(rt.heap.charged(t), size_of::<GcHeader>() + rt.heap.table(t).footprint());
}

#[test]
fn next_walks_every_entry() {
    let mut rt = quiet_runtime();
    let t = rt.new_table().unwrap();
    rt.table_set_int(t, 1, Value::integer(10)).unwrap();
    rt.table_set_str(t, "x", Value::integer(20)).unwrap();
    rt.table_set(t, Value::float(0.5), Value::integer(30)).unwrap();

    let mut sum = 0;
    let mut key = Value::Nil;
    while let Some((k, v)) = rt.table_next(t, &key).unwrap() {
        sum += v.as_integer().unwrap();
        key = k;
    }
    assert_eq!(sum, 60);

    let stranger = rt.str_value("nope").unwrap();
    let err = rt.table_next(t, &stranger).unwrap_err();
    assert_eq!(err.to_string(), "invalid key to 'next'");
}

#[test]
fn metatables_per_object_and_per_kind() {
    let mut rt = quiet_runtime();
    let t = rt.new_table().unwrap();
    let mt = rt.new_table().unwrap();
    rt.set_metatable(&Value::Table(t), Some(mt));
    assert_eq!(rt.get_metatable(&Value::Table(t)), Some(mt));

    rt.set_metatable(&Value::integer(1), Some(mt));
    assert_eq!(rt.get_metatable(&Value::float(2.5)), Some(mt));
    assert_eq!(rt.type_metatable(BaseKind::Number), Some(mt));
    assert_eq!(rt.get_metatable(&Value::Boolean(true)), None);

    // heap-internal kinds have no slot
    rt.set_type_metatable(BaseKind::Proto, Some(mt));
    assert_eq!(rt.type_metatable(BaseKind::Proto), None);

    rt.set_metatable(&Value::Table(t), None);
    assert_eq!(rt.get_metatable(&Value::Table(t)), None);
}

#[test]
fn userdata_blocks_and_user_values() {
    let mut rt = quiet_runtime();
    let u = rt.new_userdata(16).unwrap();
    assert!(rt.userdata_bytes(u).iter().all(|b| *b == 0));
    rt.userdata_bytes_mut(u)[3] = 7;
    assert_eq!(rt.userdata_bytes(u)[3], 7);
    assert_eq!(rt.raw_len(&Value::Userdata(u)), 16);

    assert!(rt.user_value(u).is_nil());
    let t = rt.new_table().unwrap();
    rt.set_user_value(u, Value::Table(t));
    assert_eq!(rt.user_value(u).as_table(), Some(t));
}

#[test]
fn raw_len_by_kind() {
    let mut rt = quiet_runtime();
    let s = rt.str_value("four").unwrap();
    assert_eq!(rt.raw_len(&s), 4);
    assert_eq!(rt.raw_len(&Value::integer(12345)), 0);
    let t = rt.new_table().unwrap();
    for i in 1..=3 {
        rt.table_set_int(t, i, Value::Boolean(true)).unwrap();
    }
    assert_eq!(rt.raw_len(&Value::Table(t)), 3);
}

#[test]
fn number_string_conversions() {
    let mut rt = quiet_runtime();
    let s = rt.number_to_string(Number::Integer(-42)).unwrap();
    assert_eq!(rt.string_lossy(s), "-42");
    let s = rt.number_to_string(Number::Float(1.0)).unwrap();
    assert_eq!(rt.string_lossy(s), "1.0");
    let s = rt.number_to_string(Number::Float(0.1)).unwrap();
    assert_eq!(rt.string_lossy(s), "0.1");

    let hex = rt.str_value(" 0x10 ").unwrap();
    assert!(matches!(rt.to_number(&hex), Some(Number::Integer(16))));
    let frac = rt.str_value("3.5").unwrap();
    assert!(matches!(rt.to_number(&frac), Some(Number::Float(f)) if f == 3.5));
    let junk = rt.str_value("3.5x").unwrap();
    assert!(rt.to_number(&junk).is_none());
    assert!(rt.to_number(&Value::Boolean(true)).is_none());
}

#[test]
fn memory_limit_refuses_then_recovers() {
    let config = RuntimeConfig {
        memory_limit: Some(256 * 1024),
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config).unwrap();
    let th = rt.main_thread();
    let base = rt.stack_top(th);

    let err = loop {
        if let Err(e) = rt.check_stack(th, 1) {
            break e;
        }
        match rt.new_userdata(1024) {
            Ok(u) => rt.push(th, Value::Userdata(u)).unwrap(),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, RuntimeError::Memory));
    assert!(rt.gc_stats().emergency_cycles >= 1);
    assert!(rt.allocator().in_use() <= 256 * 1024);
    let msg = rt.error_value(&err);
    assert_eq!(rt.string_lossy(msg.as_string().unwrap()), "not enough memory");

    rt.set_top(th, base).unwrap();
    rt.full_gc().unwrap();
    rt.new_userdata(1024).unwrap();
}

#[test]
fn host_config_is_validated_on_construction() {
    let small_stack = RuntimeConfig {
        max_stack: 3,
        ..RuntimeConfig::default()
    };
    let Err(err) = Runtime::with_config(small_stack) else {
        panic!("a 3-slot stack limit must be refused");
    };
    assert!(err.to_string().contains("max_stack"), "{err}");

    let stalled = RuntimeConfig {
        gc_step_mul: 0,
        ..RuntimeConfig::default()
    };
    assert!(Runtime::with_config(stalled).is_err());

    let mut rt = Runtime::with_config(RuntimeConfig {
        max_stack: 1_000,
        ..RuntimeConfig::default()
    })
    .unwrap();
    rt.full_gc().unwrap();
}
