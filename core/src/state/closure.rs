//! Prototype and closure construction, and the open/closed upvalue protocol.

use tracing::trace;

use crate::obj::func::{LuaClosure, NativeClosure, NativeFn, Proto, Upvalue};
use crate::obj::{GcRef, ObjectBody};
use crate::val::{Function, Tag, Value};

use super::{Runtime, RuntimeError, ThreadRef};

impl Runtime {
    /// Moves a prototype built by a compiler or loader into the heap.
    pub fn new_proto(&mut self, proto: Proto) -> Result<GcRef, RuntimeError> {
        self.check_gc()?;
        self.alloc_object(Tag::PROTO, ObjectBody::Proto(proto))
    }

    /// Bytecode closure with every upvalue slot unbound.
    pub fn new_lua_closure(&mut self, proto: GcRef) -> Result<GcRef, RuntimeError> {
        self.check_gc()?;
        let n = self.heap.proto(proto).upvalues.len();
        self.alloc_object(
            Tag::LUA_CLOSURE,
            ObjectBody::LuaClosure(LuaClosure {
                proto,
                upvals: vec![None; n],
            }),
        )
    }

    pub fn new_native_closure(&mut self, f: NativeFn, upvalues: Vec<Value>) -> Result<GcRef, RuntimeError> {
        self.check_gc()?;
        for v in &upvalues {
            self.check_liveness(v);
        }
        self.alloc_object(Tag::NATIVE_CLOSURE, ObjectBody::NativeClosure(NativeClosure { f, upvalues }))
    }

    /// Binds every unbound slot of `cl` to a fresh closed upvalue holding nil.
    pub fn init_upvalues(&mut self, cl: GcRef) -> Result<(), RuntimeError> {
        let n = self.heap.lua_closure(cl).upvals.len();
        for i in 0..n {
            if self.heap.lua_closure(cl).upvals[i].is_none() {
                let uv = self.alloc_object(Tag::UPVALUE, ObjectBody::Upvalue(Upvalue::Closed(Value::Nil)))?;
                self.set_closure_upvalue(cl, i, uv);
            }
        }
        Ok(())
    }

    pub fn set_closure_upvalue(&mut self, cl: GcRef, i: usize, uv: GcRef) {
        self.heap.lua_closure_mut(cl).upvals[i] = Some(uv);
        self.barrier_ref(cl, uv);
    }

    pub fn closure_upvalue(&self, cl: GcRef, i: usize) -> Option<GcRef> {
        self.heap.lua_closure(cl).upvals.get(i).copied().flatten()
    }

    /// Upvalue aliasing stack slot `slot` of `th`, shared with any closure
    /// that captured the same slot before.
    pub fn find_upvalue(&mut self, th: ThreadRef, slot: usize) -> Result<GcRef, RuntimeError> {
        if let Some(uv) = self.open_upvalue_at(th, slot) {
            return Ok(uv);
        }
        let uv = self.alloc_object(Tag::UPVALUE, ObjectBody::Upvalue(Upvalue::Open { thread: th, slot }))?;
        let pos = self.open_upvalue_position(th, slot);
        let t = self.heap.thread_mut(th);
        t.open_upvalues.insert(pos, uv);
        if !t.in_twups {
            t.in_twups = true;
            self.gc.twups.push(th);
        }
        trace!(target: "lume::state", thread = ?th, slot, "open_upvalue");
        Ok(uv)
    }

    fn open_upvalue_slot(&self, uv: GcRef) -> usize {
        match *self.heap.upvalue(uv) {
            Upvalue::Open { slot, .. } => slot,
            Upvalue::Closed(_) => usize::MAX,
        }
    }

    fn open_upvalue_position(&self, th: ThreadRef, slot: usize) -> usize {
        self.heap
            .thread(th)
            .first_open_at(slot, |uv| self.open_upvalue_slot(uv))
    }

    fn open_upvalue_at(&self, th: ThreadRef, slot: usize) -> Option<GcRef> {
        let pos = self.open_upvalue_position(th, slot);
        let uv = *self.heap.thread(th).open_upvalues.get(pos)?;
        (self.open_upvalue_slot(uv) == slot).then_some(uv)
    }

    /// Closes every open upvalue of `th` at or above `level`: each copies the
    /// current slot value and stops aliasing the stack.
    pub fn close_upvalues(&mut self, th: ThreadRef, level: usize) {
        let pos = self.open_upvalue_position(th, level);
        let closing: Vec<GcRef> = self.heap.thread_mut(th).open_upvalues.split_off(pos);
        for uv in closing.into_iter().rev() {
            let slot = self.open_upvalue_slot(uv);
            let v = self.heap.thread(th).stack[slot];
            *self.heap.upvalue_mut(uv) = Upvalue::Closed(v);
            let marked = &mut self.heap.header_mut(uv).marked;
            if !marked.is_white() {
                // open upvalues stay gray; a closed one is traversed like any object
                marked.gray_to_black();
                self.barrier(uv, &v);
            }
        }
    }

    pub fn set_upvalue_value(&mut self, uv: GcRef, v: Value) {
        self.check_liveness(&v);
        match *self.heap.upvalue(uv) {
            Upvalue::Open { thread, slot } => self.heap.thread_mut(thread).stack[slot] = v,
            Upvalue::Closed(_) => {
                *self.heap.upvalue_mut(uv) = Upvalue::Closed(v);
                self.barrier(uv, &v);
            }
        }
    }

    /// Instantiates nested prototype `index` of the running closure `parent`,
    /// capturing stack slots relative to `base`. Reuses the prototype's cached
    /// closure when it captured the same upvalues.
    pub fn instantiate_closure(
        &mut self,
        th: ThreadRef,
        parent: GcRef,
        index: usize,
        base: usize,
    ) -> Result<GcRef, RuntimeError> {
        let proto = self.heap.proto(self.heap.lua_closure(parent).proto).protos[index];
        let descs: Vec<(bool, usize)> = self
            .heap
            .proto(proto)
            .upvalues
            .iter()
            .map(|d| (d.in_stack, d.index as usize))
            .collect();
        let mut captured = Vec::with_capacity(descs.len());
        for (in_stack, idx) in descs {
            let uv = if in_stack {
                self.find_upvalue(th, base + idx)?
            } else {
                self.closure_upvalue(parent, idx)
                    .ok_or_else(|| RuntimeError::message("unbound upvalue in enclosing closure"))?
            };
            captured.push(uv);
        }
        if let Some(cached) = self.cached_closure(proto, &captured) {
            return Ok(cached);
        }
        let cl = self.new_lua_closure(proto)?;
        for (i, uv) in captured.into_iter().enumerate() {
            self.set_closure_upvalue(cl, i, uv);
        }
        if !self.heap.header(proto).marked.is_black() {
            self.heap.proto_mut(proto).cache = Some(cl);
        }
        Ok(cl)
    }

    /// The prototype's cached closure, if it captured exactly `upvals`.
    pub fn cached_closure(&self, proto: GcRef, upvals: &[GcRef]) -> Option<GcRef> {
        let cl = self.heap.proto(proto).cache?;
        if !self.heap.contains(cl) || self.heap.header(cl).marked.is_dead(self.gc.other_white()) {
            return None;
        }
        let existing = &self.heap.lua_closure(cl).upvals;
        (existing.len() == upvals.len() && existing.iter().zip(upvals).all(|(a, b)| *a == Some(*b))).then_some(cl)
    }

    pub fn closure_value(&self, cl: GcRef) -> Value {
        match self.heap.body(cl) {
            ObjectBody::NativeClosure(_) => Value::Function(Function::Native(cl)),
            _ => Value::Function(Function::Lua(cl)),
        }
    }
}
