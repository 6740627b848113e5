//! Write barriers keeping black objects from pointing at white ones.

use crate::obj::GcRef;
use crate::val::Value;

use super::Runtime;

impl Runtime {
    /// Forward barrier for storing `v` into `obj`.
    #[inline]
    pub(crate) fn barrier(&mut self, obj: GcRef, v: &Value) {
        if let Some(target) = v.gc_ref() {
            self.barrier_ref(obj, target);
        }
    }

    /// While marking, a black object storing a white one marks the target;
    /// while sweeping, the object is whitened instead.
    pub(crate) fn barrier_ref(&mut self, obj: GcRef, target: GcRef) {
        if !self.heap.header(obj).marked.is_black() || !self.heap.header(target).marked.is_white() {
            return;
        }
        if self.gc.keep_invariant() {
            self.mark_object(target);
        } else {
            let white = self.gc.current_white;
            self.heap.header_mut(obj).marked.set_white(white);
        }
    }

    /// Backward barrier for tables: a black table written with a white value
    /// turns gray again and is re-traversed in the atomic step.
    pub(crate) fn barrier_back(&mut self, table: GcRef, v: &Value) {
        let Some(target) = v.gc_ref() else { return };
        if self.heap.header(table).marked.is_black() && self.heap.header(target).marked.is_white() {
            self.heap.header_mut(table).marked.black_to_gray();
            self.gc.gray_again.push(table);
        }
    }
}
