use std::mem;

use crate::state::LuaThread;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{StrRef, Value};

use super::func::{LuaClosure, NativeClosure, Proto, Upvalue};
use super::string::LuaString;
use super::table::Table;
use super::userdata::Userdata;
use super::{GcHeader, GcRef, ObjectBody};

#[cold]
#[inline(never)]
fn dangling(r: GcRef) -> ! {
    panic!("dangling heap reference {r:?}")
}

#[cold]
#[inline(never)]
fn kind_mismatch(r: GcRef, expected: &str, found: &ObjectBody) -> ! {
    panic!("heap reference {r:?} is a {}, expected {expected}", found.kind_name())
}

struct HeaderSlot {
    generation: u32,
    /// Bytes charged for the object currently in the slot.
    size: usize,
    header: Option<GcHeader>,
}

/// Header half of the arena. Marking only needs this half mutably.
pub struct Headers {
    slots: Vec<HeaderSlot>,
}

impl Headers {
    #[inline]
    pub fn try_get(&self, r: GcRef) -> Option<&GcHeader> {
        match self.slots.get(r.index() as usize) {
            Some(slot) if slot.generation == r.generation() => slot.header.as_ref(),
            _ => None,
        }
    }

    #[inline]
    pub fn get(&self, r: GcRef) -> &GcHeader {
        self.try_get(r).unwrap_or_else(|| dangling(r))
    }

    #[inline]
    pub fn get_mut(&mut self, r: GcRef) -> &mut GcHeader {
        match self.slots.get_mut(r.index() as usize) {
            Some(HeaderSlot {
                generation,
                header: Some(h),
                ..
            }) if *generation == r.generation() => h,
            _ => dangling(r),
        }
    }

    #[inline]
    pub fn contains(&self, r: GcRef) -> bool {
        self.try_get(r).is_some()
    }

    #[inline]
    fn validate(&self, r: GcRef) {
        if self.try_get(r).is_none() {
            dangling(r)
        }
    }
}

/// Body half of the arena. Callers hold handles already validated through
/// [`Headers`], so lookups index by slot only.
pub struct Bodies {
    slots: Vec<Option<ObjectBody>>,
}

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty, $what:literal) => {
        #[inline]
        pub fn $get(&self, r: GcRef) -> &$ty {
            match self.get(r) {
                ObjectBody::$variant(v) => v,
                other => kind_mismatch(r, $what, other),
            }
        }

        #[inline]
        pub fn $get_mut(&mut self, r: GcRef) -> &mut $ty {
            match self.get_mut(r) {
                ObjectBody::$variant(v) => v,
                other => kind_mismatch(r, $what, other),
            }
        }
    };
}

impl Bodies {
    #[inline]
    pub fn get(&self, r: GcRef) -> &ObjectBody {
        match self.slots.get(r.index() as usize) {
            Some(Some(body)) => body,
            _ => dangling(r),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, r: GcRef) -> &mut ObjectBody {
        match self.slots.get_mut(r.index() as usize) {
            Some(Some(body)) => body,
            _ => dangling(r),
        }
    }

    typed_access!(string, string_mut, String, LuaString, "string");
    typed_access!(table, table_mut, Table, Table, "table");
    typed_access!(lua_closure, lua_closure_mut, LuaClosure, LuaClosure, "lua closure");
    typed_access!(native_closure, native_closure_mut, NativeClosure, NativeClosure, "native closure");
    typed_access!(proto, proto_mut, Proto, Proto, "proto");
    typed_access!(upvalue, upvalue_mut, Upvalue, Upvalue, "upvalue");
    typed_access!(userdata, userdata_mut, Userdata, Userdata, "userdata");

    #[inline]
    pub fn thread(&self, r: GcRef) -> &LuaThread {
        match self.get(r) {
            ObjectBody::Thread(t) => &**t,
            other => kind_mismatch(r, "thread", other),
        }
    }

    #[inline]
    pub fn thread_mut(&mut self, r: GcRef) -> &mut LuaThread {
        match self.get_mut(r) {
            ObjectBody::Thread(t) => &mut **t,
            other => kind_mismatch(r, "thread", other),
        }
    }

    #[inline]
    pub fn str_bytes(&self, s: StrRef) -> &[u8] {
        self.string(s.gc_ref()).as_bytes()
    }

    /// Primitive equality without metamethods: numbers mathematically, long
    /// strings by content, everything else by identity.
    pub fn raw_equals(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.num_eq(*y),
            (Value::String(StrRef::Long(x)), Value::String(StrRef::Long(y))) => {
                x == y || self.string(*x).as_bytes() == self.string(*y).as_bytes()
            }
            _ => a.raw_identical(b),
        }
    }
}

/// Arena holding every collectable object. Freed slots are recycled with a
/// bumped generation.
pub struct Heap {
    headers: Headers,
    bodies: Bodies,
    free: Vec<u32>,
    live: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            headers: Headers { slots: Vec::new() },
            bodies: Bodies { slots: Vec::new() },
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, header: GcHeader, body: ObjectBody, size: usize) -> GcRef {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.headers.slots[index as usize];
            slot.size = size;
            slot.header = Some(header);
            self.bodies.slots[index as usize] = Some(body);
            return GcRef::new(index, slot.generation);
        }
        let index = self.headers.slots.len() as u32;
        self.headers.slots.push(HeaderSlot {
            generation: 0,
            size,
            header: Some(header),
        });
        self.bodies.slots.push(Some(body));
        GcRef::new(index, 0)
    }

    /// Frees the slot, returning the object and the bytes it was charged.
    pub fn remove(&mut self, r: GcRef) -> Option<(GcHeader, ObjectBody, usize)> {
        let idx = r.index() as usize;
        let slot = self.headers.slots.get_mut(idx)?;
        if slot.generation != r.generation() || slot.header.is_none() {
            return None;
        }
        let header = slot.header.take()?;
        let size = mem::take(&mut slot.size);
        slot.generation = slot.generation.wrapping_add(1);
        let body = self.bodies.slots[idx].take();
        self.free.push(r.index());
        self.live -= 1;
        body.map(|b| (header, b, size))
    }

    #[inline]
    pub fn contains(&self, r: GcRef) -> bool {
        self.headers.contains(r)
    }

    #[inline]
    pub fn live_objects(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn bodies(&self) -> &Bodies {
        &self.bodies
    }

    /// Both halves at once: mark bits mutable while bodies are read or cleared.
    #[inline]
    pub fn split_mut(&mut self) -> (&mut Headers, &mut Bodies) {
        (&mut self.headers, &mut self.bodies)
    }

    #[inline]
    pub fn header(&self, r: GcRef) -> &GcHeader {
        self.headers.get(r)
    }

    #[inline]
    pub fn header_mut(&mut self, r: GcRef) -> &mut GcHeader {
        self.headers.get_mut(r)
    }

    #[inline]
    pub fn body(&self, r: GcRef) -> &ObjectBody {
        self.headers.validate(r);
        self.bodies.get(r)
    }

    #[inline]
    pub fn body_mut(&mut self, r: GcRef) -> &mut ObjectBody {
        self.headers.validate(r);
        self.bodies.get_mut(r)
    }

    /// Bytes currently charged for `r`.
    pub fn charged(&self, r: GcRef) -> usize {
        self.headers.validate(r);
        self.headers.slots[r.index() as usize].size
    }

    /// Records the new charge for `r` and returns the previous one.
    pub fn recharge(&mut self, r: GcRef, size: usize) -> usize {
        self.headers.validate(r);
        mem::replace(&mut self.headers.slots[r.index() as usize].size, size)
    }

    pub fn string(&self, r: GcRef) -> &LuaString {
        self.bodies.string(r)
    }

    pub fn string_mut(&mut self, r: GcRef) -> &mut LuaString {
        self.bodies.string_mut(r)
    }

    pub fn str_bytes(&self, s: StrRef) -> &[u8] {
        self.bodies.str_bytes(s)
    }

    pub fn table(&self, r: GcRef) -> &Table {
        self.bodies.table(r)
    }

    pub fn table_mut(&mut self, r: GcRef) -> &mut Table {
        self.bodies.table_mut(r)
    }

    pub fn lua_closure(&self, r: GcRef) -> &LuaClosure {
        self.bodies.lua_closure(r)
    }

    pub fn lua_closure_mut(&mut self, r: GcRef) -> &mut LuaClosure {
        self.bodies.lua_closure_mut(r)
    }

    pub fn native_closure(&self, r: GcRef) -> &NativeClosure {
        self.bodies.native_closure(r)
    }

    pub fn native_closure_mut(&mut self, r: GcRef) -> &mut NativeClosure {
        self.bodies.native_closure_mut(r)
    }

    pub fn proto(&self, r: GcRef) -> &Proto {
        self.bodies.proto(r)
    }

    pub fn proto_mut(&mut self, r: GcRef) -> &mut Proto {
        self.bodies.proto_mut(r)
    }

    pub fn upvalue(&self, r: GcRef) -> &Upvalue {
        self.bodies.upvalue(r)
    }

    pub fn upvalue_mut(&mut self, r: GcRef) -> &mut Upvalue {
        self.bodies.upvalue_mut(r)
    }

    pub fn userdata(&self, r: GcRef) -> &Userdata {
        self.bodies.userdata(r)
    }

    pub fn userdata_mut(&mut self, r: GcRef) -> &mut Userdata {
        self.bodies.userdata_mut(r)
    }

    pub fn thread(&self, r: GcRef) -> &LuaThread {
        self.bodies.thread(r)
    }

    pub fn thread_mut(&mut self, r: GcRef) -> &mut LuaThread {
        self.bodies.thread_mut(r)
    }

    pub fn raw_equals(&self, a: &Value, b: &Value) -> bool {
        self.bodies.raw_equals(a, b)
    }

    /// Runs `f` with the table detached from the arena so it can be mutated
    /// while other objects (key strings) are read.
    pub fn with_table_mut<R>(&mut self, r: GcRef, f: impl FnOnce(&mut Table, &Heap) -> R) -> R {
        self.headers.validate(r);
        let idx = r.index() as usize;
        let mut body = self.bodies.slots[idx].take().unwrap_or_else(|| dangling(r));
        let out = match &mut body {
            ObjectBody::Table(t) => f(t, self),
            other => kind_mismatch(r, "table", other),
        };
        self.bodies.slots[idx] = Some(body);
        out
    }

    /// Live objects grouped by kind name.
    pub fn census(&self) -> FastHashMap<&'static str, usize> {
        let mut counts = fast_hash_map_new();
        for body in self.bodies.slots.iter().flatten() {
            *counts.entry(body.kind_name()).or_insert(0) += 1;
        }
        counts
    }
}
