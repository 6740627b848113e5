//! Metamethod events and the per-metatable absence cache.

use crate::obj::GcRef;
use crate::val::Value;

use super::Runtime;

/// Metamethod events. The first six are cached as absent on metatables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagMethod {
    Index,
    NewIndex,
    Gc,
    Mode,
    Len,
    /// Last cached event.
    Eq,
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
    Lt,
    Le,
    Concat,
    Call,
}

impl TagMethod {
    pub const ALL: [TagMethod; 24] = [
        TagMethod::Index,
        TagMethod::NewIndex,
        TagMethod::Gc,
        TagMethod::Mode,
        TagMethod::Len,
        TagMethod::Eq,
        TagMethod::Add,
        TagMethod::Sub,
        TagMethod::Mul,
        TagMethod::Mod,
        TagMethod::Pow,
        TagMethod::Div,
        TagMethod::IDiv,
        TagMethod::BAnd,
        TagMethod::BOr,
        TagMethod::BXor,
        TagMethod::Shl,
        TagMethod::Shr,
        TagMethod::Unm,
        TagMethod::BNot,
        TagMethod::Lt,
        TagMethod::Le,
        TagMethod::Concat,
        TagMethod::Call,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            TagMethod::Index => "__index",
            TagMethod::NewIndex => "__newindex",
            TagMethod::Gc => "__gc",
            TagMethod::Mode => "__mode",
            TagMethod::Len => "__len",
            TagMethod::Eq => "__eq",
            TagMethod::Add => "__add",
            TagMethod::Sub => "__sub",
            TagMethod::Mul => "__mul",
            TagMethod::Mod => "__mod",
            TagMethod::Pow => "__pow",
            TagMethod::Div => "__div",
            TagMethod::IDiv => "__idiv",
            TagMethod::BAnd => "__band",
            TagMethod::BOr => "__bor",
            TagMethod::BXor => "__bxor",
            TagMethod::Shl => "__shl",
            TagMethod::Shr => "__shr",
            TagMethod::Unm => "__unm",
            TagMethod::BNot => "__bnot",
            TagMethod::Lt => "__lt",
            TagMethod::Le => "__le",
            TagMethod::Concat => "__concat",
            TagMethod::Call => "__call",
        }
    }

    #[inline]
    const fn cacheable(self) -> bool {
        (self as u8) <= (TagMethod::Eq as u8)
    }
}

impl Runtime {
    /// Interned name of a metamethod event.
    #[inline]
    pub(crate) fn tm_name(&self, event: TagMethod) -> GcRef {
        self.tm_names[event as usize]
    }

    /// Looks `event` up in metatable `mt`, remembering a miss on the table so
    /// the next lookup is a bit test.
    pub fn fast_tm(&mut self, mt: Option<GcRef>, event: TagMethod) -> Option<Value> {
        let mt = mt?;
        let bit = 1u8 << (event as u8);
        if event.cacheable() && self.heap.table(mt).tm_absent & bit != 0 {
            return None;
        }
        let v = self.heap.table(mt).get_short_str(&self.heap, self.tm_name(event));
        if v.is_nil() {
            if event.cacheable() {
                self.heap.table_mut(mt).tm_absent |= bit;
            }
            None
        } else {
            Some(v)
        }
    }

    /// Read-only variant used while collecting.
    pub(crate) fn peek_tm(&self, mt: Option<GcRef>, event: TagMethod) -> Option<Value> {
        let mt = mt?;
        let bit = 1u8 << (event as u8);
        if event.cacheable() && self.heap.table(mt).tm_absent & bit != 0 {
            return None;
        }
        let v = self.heap.table(mt).get_short_str(&self.heap, self.tm_name(event));
        (!v.is_nil()).then_some(v)
    }

    /// Metamethod for `event` on any value.
    pub fn tm_by_value(&mut self, v: &Value, event: TagMethod) -> Option<Value> {
        let mt = self.metatable_of(v);
        self.fast_tm(mt, event)
    }
}
