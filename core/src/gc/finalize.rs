//! Finalizer registration and `__gc` calls.

use tracing::{debug, warn};

use crate::obj::GcRef;
use crate::state::{CallStatus, RuntimeError, TagMethod};
use crate::val::{Tag, Value};

use super::{GcList, Link, Runtime};

impl Runtime {
    /// Moves `obj` to the finalizable list if its new metatable `mt` has a
    /// `__gc` field. Only tables and full userdata get here.
    pub(crate) fn check_finalizer(&mut self, obj: GcRef, mt: Option<GcRef>) {
        if self.heap.header(obj).marked.to_finalize() || self.closing || self.fast_tm(mt, TagMethod::Gc).is_none() {
            return;
        }
        if self.gc.is_sweep_phase() {
            let white = self.gc.current_white;
            self.heap.header_mut(obj).marked.set_white(white);
            if self.gc.sweep == Some(Link::After(obj)) {
                self.gc.sweep = self.sweep_to_live(Link::After(obj));
            }
        }
        let mut at = Link::Head(GcList::AllGc);
        loop {
            match self.link_get(at) {
                Some(r) if r == obj => break,
                Some(r) => at = Link::After(r),
                None => {
                    debug_assert!(false, "finalizable object {obj:?} missing from allgc");
                    return;
                }
            }
        }
        let next = self.heap.header(obj).next;
        self.link_set(at, next);
        let header = self.heap.header_mut(obj);
        header.next = self.gc.finobj;
        header.marked.set_finalized(true);
        self.gc.finobj = Some(obj);
        debug!(target: "lume::gc", object = ?obj, "register_finalizer");
    }

    /// Moves unreachable finalizable objects (every one, with `all`) to the
    /// end of the to-be-finalized list.
    pub(crate) fn separate_tobefnz(&mut self, all: bool) {
        let mut last = Link::Head(GcList::ToBeFnz);
        while let Some(r) = self.link_get(last) {
            last = Link::After(r);
        }
        let mut at = Link::Head(GcList::FinObj);
        while let Some(cur) = self.link_get(at) {
            let header = self.heap.header(cur);
            if !(header.marked.is_white() || all) {
                at = Link::After(cur);
                continue;
            }
            let next = header.next;
            self.link_set(at, next);
            self.heap.header_mut(cur).next = None;
            self.link_set(last, Some(cur));
            last = Link::After(cur);
        }
    }

    /// Pops the first object to finalize and returns it to the normal list.
    fn udata_to_finalize(&mut self) -> Option<GcRef> {
        let obj = self.gc.tobefnz?;
        let sweeping = self.gc.is_sweep_phase();
        let white = self.gc.current_white;
        let allgc = self.gc.allgc;
        let header = self.heap.header_mut(obj);
        self.gc.tobefnz = header.next;
        header.next = allgc;
        header.marked.set_finalized(false);
        if sweeping {
            header.marked.set_white(white);
        }
        self.gc.allgc = Some(obj);
        Some(obj)
    }

    /// Runs the finalizer of the next pending object with automatic
    /// collection suspended.
    pub(crate) fn call_gc_tm(&mut self, propagate: bool) -> Result<(), RuntimeError> {
        let Some(obj) = self.udata_to_finalize() else { return Ok(()) };
        let v = match self.heap.header(obj).tag {
            Tag::USERDATA => Value::Userdata(obj),
            _ => Value::Table(obj),
        };
        let Some(tm) = self.tm_by_value(&v, TagMethod::Gc).filter(Value::is_function) else {
            return Ok(());
        };
        let was_running = std::mem::replace(&mut self.gc.running, false);
        self.gc.stats.finalizers_run += 1;
        let th = self.current;
        let res = self.run_finalizer(th, tm, v);
        self.gc.running = was_running;
        let Err(err) = res else { return Ok(()) };
        self.gc.stats.finalizer_errors += 1;
        warn!(target: "lume::gc", object = ?obj, error = %err, "finalizer failed");
        if !propagate {
            return Ok(());
        }
        Err(match err {
            RuntimeError::Memory => RuntimeError::Memory,
            other => RuntimeError::Finalizer(Box::new(RuntimeError::Message(self.error_text(&other)))),
        })
    }

    fn run_finalizer(&mut self, th: GcRef, tm: Value, v: Value) -> Result<(), RuntimeError> {
        self.check_stack(th, 2)?;
        let func = self.stack_top(th);
        self.push(th, tm)?;
        self.push(th, v)?;
        self.heap.thread_mut(th).frames.current_mut().status.insert(CallStatus::FINALIZER);
        let res = self.pcall(th, func, 0);
        self.heap.thread_mut(th).frames.current_mut().status.remove(CallStatus::FINALIZER);
        if res.is_err() {
            // drop the error value left by the protected call
            self.set_top(th, func)?;
        }
        res
    }

    /// Runs up to `fin_num` pending finalizers, doubling the batch for the
    /// next step while work remains.
    pub(crate) fn run_a_few_finalizers(&mut self) -> Result<usize, RuntimeError> {
        let mut n = 0;
        while self.gc.tobefnz.is_some() && n < self.gc.fin_num as usize {
            self.call_gc_tm(true)?;
            n += 1;
        }
        self.gc.fin_num = if self.gc.tobefnz.is_none() {
            0
        } else {
            self.gc.fin_num.saturating_mul(2)
        };
        Ok(n)
    }

    pub(crate) fn call_all_pending_finalizers(&mut self, propagate: bool) -> Result<(), RuntimeError> {
        while self.gc.tobefnz.is_some() {
            self.call_gc_tm(propagate)?;
        }
        Ok(())
    }
}
