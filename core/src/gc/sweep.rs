//! Sweeping the object lists and freeing dead objects.

use tracing::trace;

use crate::intern::MIN_STRTAB_SIZE;
use crate::obj::GcRef;
use crate::obj::func::Upvalue;
use crate::val::Tag;

use super::{GcKind, GcList, GcPhase, Link, Runtime, SWEEP_COST, SWEEP_MAX};

impl Runtime {
    pub(crate) fn link_get(&self, at: Link) -> Option<GcRef> {
        match at {
            Link::Head(GcList::AllGc) => self.gc.allgc,
            Link::Head(GcList::FinObj) => self.gc.finobj,
            Link::Head(GcList::ToBeFnz) => self.gc.tobefnz,
            Link::Head(GcList::FixedGc) => self.gc.fixedgc,
            Link::After(r) => self.heap.header(r).next,
        }
    }

    pub(crate) fn link_set(&mut self, at: Link, next: Option<GcRef>) {
        match at {
            Link::Head(GcList::AllGc) => self.gc.allgc = next,
            Link::Head(GcList::FinObj) => self.gc.finobj = next,
            Link::Head(GcList::ToBeFnz) => self.gc.tobefnz = next,
            Link::Head(GcList::FixedGc) => self.gc.fixedgc = next,
            Link::After(r) => self.heap.header_mut(r).next = next,
        }
    }

    /// Sweeps at most `count` objects starting at `at`: dead ones are freed,
    /// survivors get the current white. Returns where to continue, or `None`
    /// once the list is exhausted.
    pub(super) fn sweep_list(&mut self, mut at: Link, count: usize) -> Option<Link> {
        let other_white = self.gc.other_white();
        let white = self.gc.current_white;
        for _ in 0..count {
            let cur = self.link_get(at)?;
            let header = self.heap.header_mut(cur);
            if header.marked.is_dead(other_white) {
                let next = header.next;
                self.link_set(at, next);
                self.free_object(cur);
            } else {
                header.marked.set_white(white);
                at = Link::After(cur);
            }
        }
        self.link_get(at).map(|_| at)
    }

    /// Sweeps until the cursor moves past a surviving object.
    pub(super) fn sweep_to_live(&mut self, at: Link) -> Option<Link> {
        loop {
            match self.sweep_list(at, 1) {
                Some(next) if next == at => continue,
                other => return other,
            }
        }
    }

    pub(crate) fn sweep_whole_list(&mut self, list: GcList) {
        self.sweep_list(Link::Head(list), usize::MAX);
    }

    pub(super) fn enter_sweep(&mut self) {
        self.enter_phase(GcPhase::SweepAllGc);
        self.gc.sweep = self.sweep_to_live(Link::Head(GcList::AllGc));
    }

    pub(super) fn sweep_step(&mut self, next_phase: GcPhase, next_list: Option<Link>) -> usize {
        if let Some(at) = self.gc.sweep {
            let old_debt = self.gc.debt;
            self.gc.sweep = self.sweep_list(at, SWEEP_MAX);
            self.gc.estimate = (self.gc.estimate as isize + self.gc.debt - old_debt).max(0) as usize;
            if self.gc.sweep.is_some() {
                return SWEEP_MAX * SWEEP_COST;
            }
        }
        self.enter_phase(next_phase);
        self.gc.sweep = next_list;
        0
    }

    /// Shrinks the interner when it is mostly empty.
    pub(super) fn check_sizes(&mut self) {
        if self.gc.kind == GcKind::Emergency {
            return;
        }
        let old_debt = self.gc.debt;
        let size = self.strings.size();
        if self.strings.len() < size / 4 && size / 2 >= MIN_STRTAB_SIZE {
            // shrinking is always granted
            let _ = self.resize_string_table(size / 2);
        }
        self.gc.estimate = (self.gc.estimate as isize + self.gc.debt - old_debt).max(0) as usize;
    }

    /// Releases a dead object, undoing its links into the interner, its
    /// thread, or the open-upvalue list.
    pub(crate) fn free_object(&mut self, r: GcRef) {
        match self.heap.header(r).tag {
            Tag::SHORT_STRING => self.strings.unlink(&mut self.heap, r),
            Tag::THREAD => {
                if self.heap.thread(r).is_built() {
                    self.close_upvalues(r, 0);
                }
                if self.heap.thread(r).in_twups {
                    self.gc.twups.retain(|t| *t != r);
                }
            }
            Tag::UPVALUE => {
                if let Upvalue::Open { thread, .. } = *self.heap.upvalue(r)
                    && self.heap.contains(thread)
                {
                    self.heap.thread_mut(thread).open_upvalues.retain(|uv| *uv != r);
                }
            }
            _ => {}
        }
        if let Some((header, _, size)) = self.heap.remove(r) {
            trace!(target: "lume::gc", object = ?r, tag = %header.tag, size, "free");
            self.release(size);
            self.gc.stats.objects_freed += 1;
            self.gc.stats.bytes_freed += size as u64;
        }
    }
}
