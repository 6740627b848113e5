//! Prototypes, closures and upvalues.

use std::mem::size_of;

use crate::state::{Runtime, RuntimeError, ThreadRef};
use crate::val::{StrRef, Value};

use super::GcRef;

pub type Instruction = u32;

/// Signature of every native function. Arguments sit on `thread`'s stack
/// above the called slot; results are pushed before returning.
pub type NativeFn = fn(&mut Runtime, ThreadRef) -> Result<NativeOutcome, RuntimeError>;

/// What a native function asks the caller to do next.
#[derive(Debug, Clone, Copy)]
pub enum NativeOutcome {
    /// Return the top `n` stack values.
    Return(usize),
    /// Suspend the coroutine yielding the top `n` values. When resumed,
    /// `continuation` (if any) runs in place of the native function.
    Yield { n: usize, continuation: Option<NativeFn> },
}

/// Where a closure finds an upvalue when it is instantiated.
#[derive(Debug, Clone, Default)]
pub struct UpvalDesc {
    pub name: Option<StrRef>,
    /// Captures a register of the enclosing function (else one of its upvalues).
    pub in_stack: bool,
    pub index: u8,
}

/// Debug record of a local variable's live range.
#[derive(Debug, Clone, Default)]
pub struct LocVar {
    pub name: Option<StrRef>,
    pub start_pc: i32,
    pub end_pc: i32,
}

/// Compiled function body shared by all closures created from it.
#[derive(Debug, Default)]
pub struct Proto {
    pub num_params: u8,
    /// 0: fixed arity; non-zero: accepts extra arguments.
    pub is_vararg: u8,
    pub max_stack_size: u8,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub constants: Vec<Value>,
    pub code: Vec<Instruction>,
    /// Nested prototypes.
    pub protos: Vec<GcRef>,
    pub upvalues: Vec<UpvalDesc>,
    /// Source line per instruction (debug).
    pub line_info: Vec<i32>,
    pub loc_vars: Vec<LocVar>,
    pub source: Option<StrRef>,
    /// Last closure built from this prototype; cleared when it dies.
    pub(crate) cache: Option<GcRef>,
}

impl Proto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn footprint(&self) -> usize {
        size_of::<Proto>()
            + self.code.len() * size_of::<Instruction>()
            + self.constants.len() * size_of::<Value>()
            + self.protos.len() * size_of::<GcRef>()
            + self.line_info.len() * size_of::<i32>()
            + self.loc_vars.len() * size_of::<LocVar>()
            + self.upvalues.len() * size_of::<UpvalDesc>()
    }

    #[inline]
    pub fn cached_closure(&self) -> Option<GcRef> {
        self.cache
    }
}

/// Bytecode closure: a prototype plus its captured upvalues.
#[derive(Debug)]
pub struct LuaClosure {
    pub proto: GcRef,
    /// `None` until the slot is bound.
    pub upvals: Vec<Option<GcRef>>,
}

impl LuaClosure {
    pub fn footprint(&self) -> usize {
        size_of::<LuaClosure>() + self.upvals.len() * size_of::<Option<GcRef>>()
    }
}

/// Native function with captured values.
pub struct NativeClosure {
    pub f: NativeFn,
    pub upvalues: Vec<Value>,
}

impl NativeClosure {
    pub fn footprint(&self) -> usize {
        size_of::<NativeClosure>() + self.upvalues.len() * size_of::<Value>()
    }
}

impl std::fmt::Debug for NativeClosure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeClosure")
            .field("f", &(self.f as usize))
            .field("upvalues", &self.upvalues)
            .finish()
    }
}

/// A captured variable: open while it aliases a live stack slot, closed once
/// the slot's frame has returned.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { thread: ThreadRef, slot: usize },
    Closed(Value),
}

impl Upvalue {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }
}
