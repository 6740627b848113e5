use std::fmt;

use crate::obj::GcRef;
use crate::obj::func::NativeFn;
use crate::util::num::{self, FloatToInt};

use super::tag::{BaseKind, Tag};

/// Numbers keep their integer/float identity.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    #[inline]
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Mathematical equality: `1 == 1.0`, `NaN != NaN`.
    pub fn num_eq(self, other: Number) -> bool {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => a == b,
            (Number::Float(a), Number::Float(b)) => a == b,
            (Number::Integer(i), Number::Float(f)) | (Number::Float(f), Number::Integer(i)) => {
                num::float_to_integer(f, FloatToInt::Exact) == Some(i)
            }
        }
    }
}

/// Reference to an interned short string or a long string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrRef {
    Short(GcRef),
    Long(GcRef),
}

impl StrRef {
    #[inline]
    pub fn gc_ref(self) -> GcRef {
        match self {
            StrRef::Short(r) | StrRef::Long(r) => r,
        }
    }

    #[inline]
    pub fn is_short(self) -> bool {
        matches!(self, StrRef::Short(_))
    }
}

/// The three function variants.
#[derive(Clone, Copy)]
pub enum Function {
    /// Bytecode closure.
    Lua(GcRef),
    /// Bare native function pointer, not a heap object.
    Light(NativeFn),
    /// Native function with captured values.
    Native(GcRef),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Lua(r) => write!(f, "Lua({r:?})"),
            Function::Light(p) => write!(f, "Light({:#x})", *p as usize),
            Function::Native(r) => write!(f, "Native({r:?})"),
        }
    }
}

/// A dynamically typed value. Copy-sized; heap payloads are arena handles.
#[derive(Debug, Clone, Copy, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    LightUserdata(usize),
    Number(Number),
    String(StrRef),
    Table(GcRef),
    Function(Function),
    Userdata(GcRef),
    Thread(GcRef),
}

impl Value {
    #[inline]
    pub const fn integer(i: i64) -> Value {
        Value::Number(Number::Integer(i))
    }

    #[inline]
    pub const fn float(f: f64) -> Value {
        Value::Number(Number::Float(f))
    }

    #[inline]
    pub const fn light_function(f: NativeFn) -> Value {
        Value::Function(Function::Light(f))
    }

    pub fn tag(&self) -> Tag {
        match self {
            Value::Nil => Tag::NIL,
            Value::Boolean(_) => Tag::BOOLEAN,
            Value::LightUserdata(_) => Tag::LIGHT_USERDATA,
            Value::Number(Number::Float(_)) => Tag::FLOAT,
            Value::Number(Number::Integer(_)) => Tag::INTEGER,
            Value::String(StrRef::Short(_)) => Tag::SHORT_STRING,
            Value::String(StrRef::Long(_)) => Tag::LONG_STRING,
            Value::Table(_) => Tag::TABLE,
            Value::Function(Function::Lua(_)) => Tag::LUA_CLOSURE,
            Value::Function(Function::Light(_)) => Tag::LIGHT_FUNCTION,
            Value::Function(Function::Native(_)) => Tag::NATIVE_CLOSURE,
            Value::Userdata(_) => Tag::USERDATA,
            Value::Thread(_) => Tag::THREAD,
        }
    }

    #[inline]
    pub fn base_kind(&self) -> BaseKind {
        self.tag().base()
    }

    pub fn type_name(&self) -> &'static str {
        self.base_kind().name()
    }

    // base-kind predicates

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Boolean(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    #[inline]
    pub fn is_full_userdata(&self) -> bool {
        matches!(self, Value::Userdata(_))
    }

    #[inline]
    pub fn is_light_userdata(&self) -> bool {
        matches!(self, Value::LightUserdata(_))
    }

    #[inline]
    pub fn is_thread(&self) -> bool {
        matches!(self, Value::Thread(_))
    }

    // exact-variant predicates

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Value::Number(Number::Integer(_)))
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Value::Number(Number::Float(_)))
    }

    #[inline]
    pub fn is_short_string(&self) -> bool {
        matches!(self, Value::String(StrRef::Short(_)))
    }

    #[inline]
    pub fn is_long_string(&self) -> bool {
        matches!(self, Value::String(StrRef::Long(_)))
    }

    #[inline]
    pub fn is_lua_closure(&self) -> bool {
        matches!(self, Value::Function(Function::Lua(_)))
    }

    #[inline]
    pub fn is_light_function(&self) -> bool {
        matches!(self, Value::Function(Function::Light(_)))
    }

    #[inline]
    pub fn is_native_closure(&self) -> bool {
        matches!(self, Value::Function(Function::Native(_)))
    }

    /// Any heap-allocated function (not a light function).
    #[inline]
    pub fn is_closure(&self) -> bool {
        self.is_lua_closure() || self.is_native_closure()
    }

    #[inline]
    pub fn is_collectable(&self) -> bool {
        self.tag().is_collectable()
    }

    /// Only `nil` and `false` are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Handle of the heap object behind a collectable value.
    pub fn gc_ref(&self) -> Option<GcRef> {
        match *self {
            Value::String(s) => Some(s.gc_ref()),
            Value::Table(r)
            | Value::Userdata(r)
            | Value::Thread(r)
            | Value::Function(Function::Lua(r))
            | Value::Function(Function::Native(r)) => Some(r),
            _ => None,
        }
    }

    // checked accessors

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(Number::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Number(Number::Float(f)) => Some(*f),
            _ => None,
        }
    }

    /// Any number widened to a float.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.to_f64()),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<StrRef> {
        match self {
            Value::String(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<GcRef> {
        match self {
            Value::Table(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<GcRef> {
        match self {
            Value::Thread(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<GcRef> {
        match self {
            Value::Userdata(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<Function> {
        match self {
            Value::Function(f) => Some(*f),
            _ => None,
        }
    }

    // unchecked accessors: callers must have tested the variant first

    #[inline]
    pub fn ivalue(&self) -> i64 {
        debug_assert!(self.is_integer(), "ivalue on {}", self.tag());
        self.as_integer().unwrap_or_default()
    }

    #[inline]
    pub fn fltvalue(&self) -> f64 {
        debug_assert!(self.is_float(), "fltvalue on {}", self.tag());
        self.as_float().unwrap_or_default()
    }

    #[inline]
    pub fn bvalue(&self) -> bool {
        debug_assert!(self.is_boolean(), "bvalue on {}", self.tag());
        self.as_boolean().unwrap_or_default()
    }

    #[inline]
    pub fn gcvalue(&self) -> GcRef {
        debug_assert!(self.is_collectable(), "gcvalue on {}", self.tag());
        self.gc_ref().unwrap_or(GcRef::DANGLING)
    }

    /// Same variant and same payload bits. Floats compare by bit pattern, so a
    /// NaN is identical to itself; strings compare by handle.
    pub fn raw_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::LightUserdata(a), Value::LightUserdata(b)) => a == b,
            (Value::Number(Number::Integer(a)), Value::Number(Number::Integer(b))) => a == b,
            (Value::Number(Number::Float(a)), Value::Number(Number::Float(b))) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b))
            | (Value::Userdata(a), Value::Userdata(b))
            | (Value::Thread(a), Value::Thread(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => match (a, b) {
                (Function::Lua(x), Function::Lua(y)) | (Function::Native(x), Function::Native(y)) => x == y,
                (Function::Light(x), Function::Light(y)) => std::ptr::fn_addr_eq(*x, *y),
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::float(f)
    }
}

impl From<StrRef> for Value {
    fn from(s: StrRef) -> Self {
        Value::String(s)
    }
}
