use crate::val::Value;

use super::heap::Heap;
use super::table::{InvalidNextKey, KeyError, Table};

fn int(v: Value) -> i64 {
    v.as_integer().expect("integer value")
}

#[test]
fn sequence_keys_move_to_array_part() {
    let heap = Heap::new();
    let mut t = Table::new();
    for i in 1..=8 {
        t.set_int(&heap, i, Value::integer(i * 10));
    }
    assert_eq!(t.array_len(), 8);
    assert_eq!(t.node_len(), 0);
    for i in 1..=8 {
        assert_eq!(int(t.get_int(&heap, i)), i * 10);
    }
    assert!(t.get_int(&heap, 9).is_nil());
    assert!(t.get_int(&heap, 0).is_nil());
}

#[test]
fn integral_float_keys_alias_integers() {
    let heap = Heap::new();
    let mut t = Table::new();
    t.set(&heap, Value::float(2.0), Value::Boolean(true)).unwrap();
    assert_eq!(t.get_int(&heap, 2).as_boolean(), Some(true));
    assert_eq!(t.get(&heap, &Value::float(2.0)).as_boolean(), Some(true));

    t.set(&heap, Value::float(2.5), Value::integer(5)).unwrap();
    assert_eq!(int(t.get(&heap, &Value::float(2.5))), 5);
    assert!(t.get_int(&heap, 3).is_nil());
}

#[test]
fn nil_and_nan_keys_are_rejected() {
    let heap = Heap::new();
    let mut t = Table::new();
    assert_eq!(t.set(&heap, Value::Nil, Value::integer(1)), Err(KeyError::Nil));
    assert_eq!(t.set(&heap, Value::float(f64::NAN), Value::integer(1)), Err(KeyError::NaN));
    assert!(t.get(&heap, &Value::Nil).is_nil());
    assert!(t.get(&heap, &Value::float(f64::NAN)).is_nil());
    assert_eq!(t.count_entries(), 0);
}

#[test]
fn colliding_keys_stay_reachable() {
    let heap = Heap::new();
    let mut t = Table::new();
    // negative and fractional keys never enter the array part
    for i in 0..200 {
        t.set(&heap, Value::integer(-i), Value::integer(i)).unwrap();
        t.set(&heap, Value::float(i as f64 + 0.25), Value::integer(-i)).unwrap();
    }
    assert_eq!(t.array_len(), 0);
    assert_eq!(t.count_entries(), 400);
    assert!(t.node_len().is_power_of_two());
    for i in 0..200 {
        assert_eq!(int(t.get_int(&heap, -i)), i);
        assert_eq!(int(t.get(&heap, &Value::float(i as f64 + 0.25))), -i);
    }
}

#[test]
fn assigning_nil_removes_entries() {
    let heap = Heap::new();
    let mut t = Table::new();
    t.set(&heap, Value::integer(-1), Value::integer(1)).unwrap();
    t.set_int(&heap, 1, Value::integer(2));
    t.set(&heap, Value::integer(-1), Value::Nil).unwrap();
    t.set_int(&heap, 1, Value::Nil);
    assert!(t.get_int(&heap, -1).is_nil());
    assert!(t.get_int(&heap, 1).is_nil());
    assert_eq!(t.count_entries(), 0);
    assert!(t.next(&heap, &Value::Nil).unwrap().is_none());
}

#[test]
fn traversal_visits_each_entry_once() {
    let heap = Heap::new();
    let mut t = Table::new();
    for i in 1..=5 {
        t.set_int(&heap, i, Value::integer(i));
    }
    for i in 0..20 {
        t.set(&heap, Value::float(i as f64 + 0.5), Value::integer(100 + i)).unwrap();
    }

    let mut seen = Vec::new();
    let mut key = Value::Nil;
    while let Some((k, v)) = t.next(&heap, &key).unwrap() {
        seen.push(int(v));
        key = k;
    }
    seen.sort_unstable();
    let expected: Vec<i64> = (1..=5).chain(100..120).collect();
    assert_eq!(seen, expected);

    assert!(matches!(t.next(&heap, &Value::float(99.5)), Err(InvalidNextKey)));
}

#[test]
fn clearing_during_traversal_keeps_cursor_valid() {
    let heap = Heap::new();
    let mut t = Table::new();
    for i in 0..32 {
        t.set(&heap, Value::integer(-i), Value::Boolean(true)).unwrap();
    }
    let mut visited = 0;
    let mut key = Value::Nil;
    while let Some((k, _)) = t.next(&heap, &key).unwrap() {
        t.set(&heap, k, Value::Nil).unwrap();
        visited += 1;
        key = k;
    }
    assert_eq!(visited, 32);
    assert_eq!(t.count_entries(), 0);
}

#[test]
fn border_of_sequences() {
    let heap = Heap::new();
    let mut t = Table::new();
    assert_eq!(t.border(&heap), 0);
    for i in 1..=10 {
        t.set_int(&heap, i, Value::Boolean(true));
    }
    assert_eq!(t.border(&heap), 10);

    // continue the sequence in the hash part
    let mut h = Table::new();
    h.resize(&heap, 0, 8);
    for i in 1..=3 {
        h.set_int(&heap, i, Value::Boolean(true));
    }
    assert_eq!(h.array_len(), 0);
    assert_eq!(h.border(&heap), 3);

    let mut holes = Table::new();
    holes.resize(&heap, 4, 0);
    holes.set_int(&heap, 1, Value::Boolean(true));
    holes.set_int(&heap, 2, Value::Boolean(true));
    assert_eq!(holes.border(&heap), 2);
}

#[test]
fn resize_moves_entries_between_parts() {
    let heap = Heap::new();
    let mut t = Table::new();
    t.resize(&heap, 4, 0);
    for i in 1..=4 {
        t.set_int(&heap, i, Value::integer(i));
    }
    t.resize(&heap, 1, 4);
    assert_eq!(t.array_len(), 1);
    assert_eq!(t.node_len(), 4);
    for i in 1..=4 {
        assert_eq!(int(t.get_int(&heap, i)), i);
    }
    assert_eq!(t.footprint(), Table::footprint_for(1, 4));

    t.resize(&heap, 4, 0);
    assert_eq!(t.node_len(), 0);
    assert_eq!(t.count_entries(), 4);
}

#[test]
fn growth_is_predicted_only_for_rehashing_stores() {
    let heap = Heap::new();
    let mut t = Table::new();
    let grown = t.growth_for(&heap, &Value::integer(1)).expect("empty table must grow");
    t.set_int(&heap, 1, Value::Boolean(true));
    assert_eq!(t.footprint(), grown);

    // existing key and in-array stores fit
    assert_eq!(t.growth_for(&heap, &Value::integer(1)), None);

    let mut h = Table::new();
    h.resize(&heap, 0, 4);
    assert_eq!(h.growth_for(&heap, &Value::integer(-1)), None);
    for i in 1..=4 {
        h.set(&heap, Value::integer(-i), Value::Boolean(true)).unwrap();
    }
    let predicted = h.growth_for(&heap, &Value::integer(-5)).expect("full node part must grow");
    h.set(&heap, Value::integer(-5), Value::Boolean(true)).unwrap();
    assert_eq!(h.footprint(), predicted);
}

#[test]
fn any_write_forgets_absent_metamethods() {
    let heap = Heap::new();
    let mut t = Table::new();
    assert_eq!(t.tm_absent, !0);
    t.set(&heap, Value::float(0.5), Value::integer(1)).unwrap();
    assert_eq!(t.tm_absent, 0);

    t.tm_absent = 0b101;
    t.set_int(&heap, 7, Value::Boolean(true));
    assert_eq!(t.tm_absent, 0);
}
