use crate::obj::GcRef;
use crate::obj::func::NativeOutcome;
use crate::state::{Runtime, RuntimeError, ThreadRef};

use super::*;

fn noop(_rt: &mut Runtime, _th: ThreadRef) -> Result<NativeOutcome, RuntimeError> {
    Ok(NativeOutcome::Return(0))
}

fn other(_rt: &mut Runtime, _th: ThreadRef) -> Result<NativeOutcome, RuntimeError> {
    Ok(NativeOutcome::Return(1))
}

#[test]
fn tags_pack_kind_variant_and_collectable_bit() {
    assert_eq!(Tag::FLOAT.base(), BaseKind::Number);
    assert_eq!(Tag::INTEGER.base(), BaseKind::Number);
    assert_ne!(Tag::FLOAT.variant(), Tag::INTEGER.variant());
    assert_eq!(Tag::SHORT_STRING.variant(), 0);
    assert_eq!(Tag::LONG_STRING.variant(), 1);
    assert_eq!(Tag::LIGHT_FUNCTION.base(), BaseKind::Function);

    for tag in [Tag::NIL, Tag::BOOLEAN, Tag::LIGHT_USERDATA, Tag::FLOAT, Tag::LIGHT_FUNCTION] {
        assert!(!tag.is_collectable(), "{tag}");
    }
    for tag in [
        Tag::SHORT_STRING,
        Tag::TABLE,
        Tag::LUA_CLOSURE,
        Tag::NATIVE_CLOSURE,
        Tag::USERDATA,
        Tag::THREAD,
        Tag::PROTO,
        Tag::UPVALUE,
    ] {
        assert!(tag.is_collectable(), "{tag}");
        assert_eq!(tag.variant_bits() & (1 << 6), 0);
    }
    assert_eq!(Tag::INTEGER.variant_bits(), 0x13);
}

#[test]
fn type_names_follow_base_kind() {
    let r = GcRef::DANGLING;
    let cases = [
        (Value::Nil, "nil"),
        (Value::Boolean(false), "boolean"),
        (Value::LightUserdata(8), "userdata"),
        (Value::Userdata(r), "userdata"),
        (Value::integer(3), "number"),
        (Value::float(3.0), "number"),
        (Value::String(StrRef::Long(r)), "string"),
        (Value::Table(r), "table"),
        (Value::light_function(noop), "function"),
        (Value::Function(Function::Native(r)), "function"),
        (Value::Thread(r), "thread"),
    ];
    for (v, name) in cases {
        assert_eq!(v.type_name(), name, "{v:?}");
    }
}

#[test]
fn falsiness_and_predicates() {
    assert!(Value::Nil.is_falsy());
    assert!(Value::Boolean(false).is_falsy());
    assert!(!Value::Boolean(true).is_falsy());
    assert!(!Value::integer(0).is_falsy());

    let r = GcRef::DANGLING;
    assert!(Value::String(StrRef::Short(r)).is_short_string());
    assert!(Value::String(StrRef::Long(r)).is_long_string());
    assert!(Value::light_function(noop).is_light_function());
    assert!(!Value::light_function(noop).is_closure());
    assert!(Value::Function(Function::Lua(r)).is_closure());
    assert!(Value::LightUserdata(1).is_light_userdata());
    assert!(!Value::LightUserdata(1).is_collectable());
    assert_eq!(Value::Table(r).gc_ref(), Some(r));
    assert_eq!(Value::light_function(noop).gc_ref(), None);
}

#[test]
fn accessors_check_variant() {
    assert_eq!(Value::integer(7).as_integer(), Some(7));
    assert_eq!(Value::float(7.0).as_integer(), None);
    assert_eq!(Value::integer(7).as_number(), Some(7.0));
    assert_eq!(Value::float(0.5).as_float(), Some(0.5));
    assert_eq!(Value::Nil.as_boolean(), None);
    assert_eq!(Value::from(true).bvalue(), true);
    assert_eq!(Value::from(-4i64).ivalue(), -4);
}

#[test]
fn numeric_equality_crosses_subtypes() {
    assert!(Number::Integer(1).num_eq(Number::Float(1.0)));
    assert!(!Number::Integer(1).num_eq(Number::Float(1.5)));
    assert!(!Number::Float(f64::NAN).num_eq(Number::Float(f64::NAN)));
    // 2^63 has no integer counterpart
    assert!(!Number::Integer(i64::MAX).num_eq(Number::Float(9_223_372_036_854_775_808.0)));
}

#[test]
fn raw_identity_compares_payload_bits() {
    let nan = Value::float(f64::NAN);
    assert!(nan.raw_identical(&nan));
    assert!(!Value::integer(1).raw_identical(&Value::float(1.0)));
    assert!(!Value::float(0.0).raw_identical(&Value::float(-0.0)));
    assert!(Value::light_function(noop).raw_identical(&Value::light_function(noop)));
    assert!(!Value::light_function(noop).raw_identical(&Value::light_function(other)));
    let r = GcRef::DANGLING;
    assert!(!Value::Table(r).raw_identical(&Value::Userdata(r)));
}
