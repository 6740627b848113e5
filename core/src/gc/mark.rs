//! Marking: root scan, incremental propagation, the atomic step and weak
//! table clearing.

use crate::obj::func::Upvalue;
use crate::obj::table::{NodeKey, Table};
use crate::obj::{Bodies, GcRef, Headers, ObjectBody};
use crate::state::TagMethod;
use crate::val::{Tag, Value};

use super::{Collector, GcKind, GcPhase, Runtime};

/// Marking view over the arena: header bits are mutable, bodies are read.
struct Marker<'a> {
    headers: &'a mut Headers,
    bodies: &'a Bodies,
    gc: &'a mut Collector,
}

impl Marker<'_> {
    fn mark_value(&mut self, v: &Value) {
        if let Some(r) = v.gc_ref() {
            self.mark_object(r);
        }
    }

    /// Makes a white object gray. Leaves without outgoing references (strings)
    /// and small ones (upvalues, userdata) are finished on the spot; the rest
    /// wait on the gray list.
    fn mark_object(&mut self, r: GcRef) {
        let marked = &mut self.headers.get_mut(r).marked;
        if !marked.is_white() {
            return;
        }
        marked.white_to_gray();
        let bodies = self.bodies;
        match bodies.get(r) {
            ObjectBody::String(_) => self.headers.get_mut(r).marked.gray_to_black(),
            ObjectBody::Upvalue(uv) => {
                let v = match *uv {
                    // open upvalues stay gray; their thread keeps the value alive
                    Upvalue::Open { thread, slot } => bodies.thread(thread).stack.get(slot).copied().unwrap_or_default(),
                    Upvalue::Closed(v) => {
                        self.headers.get_mut(r).marked.gray_to_black();
                        v
                    }
                };
                self.mark_value(&v);
            }
            ObjectBody::Userdata(u) => {
                let (mt, user_value) = (u.metatable, u.user_value);
                self.headers.get_mut(r).marked.gray_to_black();
                if let Some(mt) = mt {
                    self.mark_object(mt);
                }
                self.mark_value(&user_value);
            }
            _ => self.gc.gray.push(r),
        }
    }

    fn is_white(&self, v: &Value) -> bool {
        v.gc_ref().is_some_and(|r| self.headers.get(r).marked.is_white())
    }

    /// Whether a weak entry holding `v` must be cleared. Strings are values,
    /// not objects, for weakness: they get marked instead.
    fn is_cleared(&mut self, v: &Value) -> bool {
        match v.gc_ref() {
            None => false,
            Some(r) if v.is_string() => {
                self.mark_object(r);
                false
            }
            Some(r) => self.headers.get(r).marked.is_white(),
        }
    }

    fn traverse_strong_table(&mut self, t: &Table) {
        for v in t.array() {
            self.mark_value(v);
        }
        for n in t.nodes() {
            if let NodeKey::Live(k) = &n.key
                && !n.value.is_nil()
            {
                self.mark_value(k);
                self.mark_value(&n.value);
            }
        }
    }

    fn traverse_weak_value(&mut self, r: GcRef, t: &Table) {
        // a non-empty array part may hold white values; not worth checking now
        let mut has_clears = t.array_len() > 0;
        for n in t.nodes() {
            if let NodeKey::Live(k) = &n.key
                && !n.value.is_nil()
            {
                self.mark_value(k);
                if !has_clears && self.is_cleared(&n.value) {
                    has_clears = true;
                }
            }
        }
        if self.gc.phase == GcPhase::Propagate {
            self.gc.gray_again.push(r);
        } else if has_clears {
            self.gc.weak.push(r);
        }
    }

    /// Marks values whose keys are already marked. Returns whether anything
    /// was marked.
    fn traverse_ephemeron(&mut self, r: GcRef, t: &Table) -> bool {
        let mut marked = false;
        let mut has_clears = false;
        let mut has_white_white = false;
        for v in t.array() {
            if self.is_white(v) {
                marked = true;
                self.mark_value(v);
            }
        }
        for n in t.nodes() {
            let NodeKey::Live(k) = &n.key else { continue };
            if n.value.is_nil() {
                continue;
            }
            if self.is_cleared(k) {
                has_clears = true;
                if self.is_white(&n.value) {
                    has_white_white = true;
                }
            } else if self.is_white(&n.value) {
                marked = true;
                self.mark_value(&n.value);
            }
        }
        if self.gc.phase == GcPhase::Propagate {
            self.gc.gray_again.push(r);
        } else if has_white_white {
            self.gc.ephemeron.push(r);
        } else if has_clears {
            self.gc.all_weak.push(r);
        }
        marked
    }
}

/// Marks a string reached through a weak entry and reports whether a
/// non-string value is unmarked.
fn cleared(headers: &mut Headers, v: &Value) -> bool {
    let Some(r) = v.gc_ref() else { return false };
    let marked = &mut headers.get_mut(r).marked;
    if v.is_string() {
        if marked.is_white() {
            marked.white_to_gray();
            marked.gray_to_black();
        }
        false
    } else {
        marked.is_white()
    }
}

#[derive(Clone, Copy)]
enum WeakList {
    Weak,
    Ephemeron,
    AllWeak,
}

impl Runtime {
    fn with_marker<R>(&mut self, f: impl FnOnce(&mut Marker<'_>) -> R) -> R {
        let (headers, bodies) = self.heap.split_mut();
        let mut m = Marker {
            headers,
            bodies: &*bodies,
            gc: &mut self.gc,
        };
        f(&mut m)
    }

    pub(crate) fn mark_object(&mut self, r: GcRef) {
        self.with_marker(|m| m.mark_object(r));
    }

    fn mark_type_metatables(&mut self) {
        let mts = self.type_metatables;
        self.with_marker(|m| {
            for mt in mts.into_iter().flatten() {
                m.mark_object(mt);
            }
        });
    }

    /// Starts a cycle by marking the roots.
    pub(super) fn restart_collection(&mut self) {
        let gc = &mut self.gc;
        gc.gray.clear();
        gc.gray_again.clear();
        gc.weak.clear();
        gc.ephemeron.clear();
        gc.all_weak.clear();
        let (main, registry) = (self.main_thread, self.registry);
        self.mark_object(main);
        self.mark_object(registry);
        self.mark_type_metatables();
        self.mark_being_fnz();
    }

    /// Objects awaiting their finalizer stay alive until it has run.
    pub(super) fn mark_being_fnz(&mut self) {
        let mut cur = self.gc.tobefnz;
        while let Some(r) = cur {
            cur = self.heap.header(r).next;
            self.mark_object(r);
        }
    }

    /// Traverses one gray object, returning the work done.
    pub(super) fn propagate_mark(&mut self) -> usize {
        let Some(r) = self.gc.gray.pop() else { return 0 };
        let header = self.heap.header_mut(r);
        header.marked.gray_to_black();
        let tag = header.tag;
        match tag {
            Tag::TABLE => self.traverse_table(r),
            Tag::LUA_CLOSURE => {
                self.with_marker(|m| {
                    let bodies = m.bodies;
                    let cl = bodies.lua_closure(r);
                    m.mark_object(cl.proto);
                    for uv in cl.upvals.iter().flatten() {
                        m.mark_object(*uv);
                    }
                });
                self.heap.charged(r)
            }
            Tag::NATIVE_CLOSURE => {
                self.with_marker(|m| {
                    let bodies = m.bodies;
                    for v in &bodies.native_closure(r).upvalues {
                        m.mark_value(v);
                    }
                });
                self.heap.charged(r)
            }
            Tag::PROTO => self.traverse_proto(r),
            Tag::THREAD => {
                // threads are never black: their stacks change without barriers
                self.heap.header_mut(r).marked.black_to_gray();
                self.gc.gray_again.push(r);
                self.traverse_thread(r)
            }
            other => unreachable!("object of kind {other} on the gray list"),
        }
    }

    pub(super) fn propagate_all(&mut self) -> usize {
        let mut work = 0;
        while !self.gc.gray.is_empty() {
            work += self.propagate_mark();
        }
        work
    }

    /// Reads the `__mode` of a metatable as (weak keys, weak values).
    fn weak_mode(&self, mt: Option<GcRef>) -> (bool, bool) {
        match self.peek_tm(mt, TagMethod::Mode) {
            Some(Value::String(s)) => {
                let mode = self.heap.str_bytes(s);
                (mode.contains(&b'k'), mode.contains(&b'v'))
            }
            _ => (false, false),
        }
    }

    fn traverse_table(&mut self, r: GcRef) -> usize {
        let mt = self.heap.table(r).metatable;
        let (weak_keys, weak_values) = self.weak_mode(mt);
        self.with_marker(|m| {
            let bodies = m.bodies;
            let t = bodies.table(r);
            if let Some(mt) = mt {
                m.mark_object(mt);
            }
            if weak_keys || weak_values {
                // weak tables stay gray
                m.headers.get_mut(r).marked.black_to_gray();
                if !weak_keys {
                    m.traverse_weak_value(r, t);
                } else if !weak_values {
                    m.traverse_ephemeron(r, t);
                } else {
                    m.gc.all_weak.push(r);
                }
            } else {
                m.traverse_strong_table(t);
            }
        });
        self.heap.charged(r)
    }

    fn traverse_proto(&mut self, r: GcRef) -> usize {
        if let Some(cl) = self.heap.proto(r).cache
            && (!self.heap.contains(cl) || self.heap.header(cl).marked.is_white())
        {
            // let the cached closure die
            self.heap.proto_mut(r).cache = None;
        }
        self.with_marker(|m| {
            let bodies = m.bodies;
            let p = bodies.proto(r);
            if let Some(src) = p.source {
                m.mark_object(src.gc_ref());
            }
            for k in &p.constants {
                m.mark_value(k);
            }
            for name in p.upvalues.iter().filter_map(|u| u.name) {
                m.mark_object(name.gc_ref());
            }
            for child in &p.protos {
                m.mark_object(*child);
            }
            for name in p.loc_vars.iter().filter_map(|l| l.name) {
                m.mark_object(name.gc_ref());
            }
        });
        self.heap.charged(r)
    }

    fn traverse_thread(&mut self, th: GcRef) -> usize {
        if !self.heap.thread(th).is_built() {
            return 1;
        }
        self.with_marker(|m| {
            let bodies = m.bodies;
            let t = bodies.thread(th);
            for v in t.stack() {
                m.mark_value(v);
            }
            for uv in t.open_upvalues() {
                m.mark_object(*uv);
            }
        });
        if self.gc.phase == GcPhase::InsideAtomic {
            let t = self.heap.thread_mut(th);
            let top = t.top;
            t.stack[top..].fill(Value::Nil);
            if !t.in_twups && !t.open_upvalues.is_empty() {
                t.in_twups = true;
                self.gc.twups.push(th);
            }
        } else if self.gc.kind != GcKind::Emergency {
            self.shrink_stack(th);
        }
        self.heap.charged(th)
    }

    /// Drops unmarked threads (and threads without open upvalues) from the
    /// open-upvalue list, marking values of their upvalues that are still in
    /// use by marked closures.
    fn remark_upvalues(&mut self) {
        let threads = std::mem::take(&mut self.gc.twups);
        let mut keep = Vec::with_capacity(threads.len());
        for th in threads {
            if !self.heap.contains(th) {
                continue;
            }
            if self.heap.header(th).marked.is_gray() && !self.heap.thread(th).open_upvalues.is_empty() {
                keep.push(th);
                continue;
            }
            self.heap.thread_mut(th).in_twups = false;
            self.with_marker(|m| {
                let bodies = m.bodies;
                let t = bodies.thread(th);
                for uv in t.open_upvalues() {
                    if m.headers.get(*uv).marked.is_white() {
                        continue;
                    }
                    if let Upvalue::Open { slot, .. } = *bodies.upvalue(*uv) {
                        let v = t.stack.get(slot).copied().unwrap_or_default();
                        m.mark_value(&v);
                    }
                }
            });
        }
        self.gc.twups = keep;
    }

    fn converge_ephemerons(&mut self) {
        loop {
            let tables = std::mem::take(&mut self.gc.ephemeron);
            let mut changed = false;
            for r in tables {
                let marked = self.with_marker(|m| {
                    let bodies = m.bodies;
                    m.traverse_ephemeron(r, bodies.table(r))
                });
                if marked {
                    self.propagate_all();
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn weak_list(&self, which: WeakList) -> &Vec<GcRef> {
        match which {
            WeakList::Weak => &self.gc.weak,
            WeakList::Ephemeron => &self.gc.ephemeron,
            WeakList::AllWeak => &self.gc.all_weak,
        }
    }

    /// Removes entries with unmarked keys.
    fn clear_keys(&mut self, which: WeakList) {
        let tables = self.weak_list(which).clone();
        let (headers, bodies) = self.heap.split_mut();
        for r in tables {
            let t = bodies.table_mut(r);
            for i in 0..t.node_len() {
                let n = t.nodes()[i];
                if let NodeKey::Live(k) = n.key
                    && !n.value.is_nil()
                    && cleared(headers, &k)
                {
                    t.kill_node(i);
                }
            }
        }
    }

    /// Removes entries with unmarked values from tables at `from..` of the list.
    fn clear_values(&mut self, which: WeakList, from: usize) {
        let tables = self.weak_list(which)[from..].to_vec();
        let (headers, bodies) = self.heap.split_mut();
        for r in tables {
            let t = bodies.table_mut(r);
            for slot in t.array_mut() {
                if cleared(headers, slot) {
                    *slot = Value::Nil;
                }
            }
            for i in 0..t.node_len() {
                let n = t.nodes()[i];
                if matches!(n.key, NodeKey::Live(_)) && !n.value.is_nil() && cleared(headers, &n.value) {
                    t.kill_node(i);
                }
            }
        }
    }

    /// Finishes marking without interruption, separates unreachable objects
    /// with finalizers, clears weak tables and flips the current white.
    pub(super) fn atomic(&mut self) -> usize {
        let gray_again = std::mem::take(&mut self.gc.gray_again);
        debug_assert!(self.gc.weak.is_empty() && self.gc.ephemeron.is_empty());
        self.gc.phase = GcPhase::InsideAtomic;
        let (current, registry) = (self.current, self.registry);
        self.mark_object(current);
        // the registry and type metatables may have changed without barriers
        self.mark_object(registry);
        self.mark_type_metatables();
        self.remark_upvalues();
        let mut work = self.propagate_all();
        self.gc.gray = gray_again;
        work += self.propagate_all();
        self.converge_ephemerons();
        // every strongly reachable object is marked now
        self.clear_values(WeakList::Weak, 0);
        self.clear_values(WeakList::AllWeak, 0);
        let orig_weak = self.gc.weak.len();
        let orig_all = self.gc.all_weak.len();
        self.separate_tobefnz(false);
        self.gc.fin_num = 1;
        self.mark_being_fnz();
        work += self.propagate_all();
        self.converge_ephemerons();
        // resurrected objects are marked too
        self.clear_keys(WeakList::Ephemeron);
        self.clear_keys(WeakList::AllWeak);
        self.clear_values(WeakList::Weak, orig_weak);
        self.clear_values(WeakList::AllWeak, orig_all);
        self.gc.current_white = self.gc.other_white();
        work
    }
}
