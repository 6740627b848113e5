//! Execution contexts: a value stack, a frame chain and the list of open
//! upvalues pointing into the stack.

use std::mem::size_of;

use tracing::debug;

use crate::obj::func::Upvalue;
use crate::obj::{GcHeader, GcRef, ObjectBody};
use crate::val::{Tag, Value};

use super::frame::{CallChain, CallInfo, CallStatus};
use super::{Runtime, RuntimeError, ThreadRef};

/// Slots guaranteed to a native function on entry.
pub const MIN_STACK: usize = 20;
/// Initial stack size of a thread.
pub const BASIC_STACK_SIZE: usize = 2 * MIN_STACK;
/// Guard slots past the usable limit; metamethod calls may use them
/// without a stack check.
pub const EXTRA_STACK: usize = 5;

/// Lifecycle of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created, body not started yet.
    Initial,
    Running,
    /// Resumed another coroutine and is waiting for it.
    Normal,
    Suspended,
    /// Finished or died with an error.
    Dead,
}

pub struct LuaThread {
    pub(crate) stack: Vec<Value>,
    /// First free slot.
    pub(crate) top: usize,
    pub(crate) frames: CallChain,
    /// Open upvalues, sorted by stack slot (ascending).
    pub(crate) open_upvalues: Vec<GcRef>,
    pub(crate) status: ThreadStatus,
    /// Count of active non-yieldable calls.
    pub(crate) nny: u32,
    /// Nested native calls and resumes.
    pub(crate) n_ccalls: u32,
    /// Listed among threads with open upvalues.
    pub(crate) in_twups: bool,
}

impl LuaThread {
    /// A thread with no stack yet; the collector skips it until
    /// [`LuaThread::init_stack`] runs.
    pub(crate) fn unbuilt() -> Self {
        Self {
            stack: Vec::new(),
            top: 0,
            frames: CallChain::new(CallInfo::native(0, 0, 0)),
            open_upvalues: Vec::new(),
            status: ThreadStatus::Initial,
            nny: 1,
            n_ccalls: 0,
            in_twups: false,
        }
    }

    pub(crate) fn init_stack(&mut self) {
        self.stack = vec![Value::Nil; BASIC_STACK_SIZE];
        // base frame: the function slot is a dummy nil
        self.top = 1;
        let mut base = CallInfo::native(0, 1 + MIN_STACK, 0);
        base.status = CallStatus::NONE;
        self.frames = CallChain::new(base);
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Usable slots; the guard zone lies above.
    #[inline]
    pub fn stack_last(&self) -> usize {
        self.stack.len().saturating_sub(EXTRA_STACK)
    }

    #[inline]
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    #[inline]
    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    #[inline]
    pub fn frames(&self) -> &CallChain {
        &self.frames
    }

    #[inline]
    pub fn open_upvalues(&self) -> &[GcRef] {
        &self.open_upvalues
    }

    #[inline]
    pub fn stack(&self) -> &[Value] {
        &self.stack[..self.top]
    }

    pub fn footprint(&self) -> usize {
        size_of::<LuaThread>() + self.stack.len() * size_of::<Value>() + self.frames.allocated() * CallChain::NODE_SIZE
    }

    /// Bytes charged for this thread with the given stack and frame sizes.
    fn charge_with(&self, stack_len: usize, frame_nodes: usize) -> usize {
        size_of::<GcHeader>() + size_of::<LuaThread>() + stack_len * size_of::<Value>() + frame_nodes * CallChain::NODE_SIZE
    }

    /// Highest slot any active frame may touch, plus one.
    fn stack_in_use(&self) -> usize {
        let lim = self.frames.active().map(|ci| ci.top).fold(self.top, usize::max);
        lim + 1
    }

    /// Position of the first open upvalue at or above `level`.
    pub(crate) fn first_open_at(&self, level: usize, slot_of: impl Fn(GcRef) -> usize) -> usize {
        self.open_upvalues.partition_point(|uv| slot_of(*uv) < level)
    }
}

impl Runtime {
    /// Creates a coroutine. The new thread is pushed on `creator`'s stack,
    /// which keeps it alive until the host stores it elsewhere.
    pub fn new_thread(&mut self, creator: ThreadRef) -> Result<ThreadRef, RuntimeError> {
        self.check_gc()?;
        self.check_stack(creator, 1)?;
        let th = self.alloc_object(Tag::THREAD, ObjectBody::Thread(Box::new(LuaThread::unbuilt())))?;
        self.push(creator, Value::Thread(th))?;
        self.build_thread_stack(th)?;
        debug!(target: "lume::state", thread = ?th, "new_thread");
        Ok(th)
    }

    pub(crate) fn build_thread_stack(&mut self, th: ThreadRef) -> Result<(), RuntimeError> {
        let old = self.heap.charged(th);
        let new = self.heap.thread(th).charge_with(BASIC_STACK_SIZE, 1);
        self.charge(old, new)?;
        self.heap.thread_mut(th).init_stack();
        self.heap.recharge(th, new);
        Ok(())
    }

    pub fn thread(&self, th: ThreadRef) -> &LuaThread {
        self.heap.thread(th)
    }

    pub fn thread_status(&self, th: ThreadRef) -> ThreadStatus {
        self.heap.thread(th).status
    }

    /// Absolute index of the first free slot.
    pub fn stack_top(&self, th: ThreadRef) -> usize {
        self.heap.thread(th).top
    }

    /// Value at absolute slot `idx`; slots at or above the top read as nil.
    pub fn stack_get(&self, th: ThreadRef, idx: usize) -> Value {
        let t = self.heap.thread(th);
        if idx < t.top { t.stack[idx] } else { Value::Nil }
    }

    pub fn stack_set(&mut self, th: ThreadRef, idx: usize, v: Value) {
        self.check_liveness(&v);
        let t = self.heap.thread_mut(th);
        assert!(idx < t.top, "stack slot {idx} above top {}", t.top);
        t.stack[idx] = v;
    }

    pub fn push(&mut self, th: ThreadRef, v: Value) -> Result<(), RuntimeError> {
        self.check_liveness(&v);
        if self.heap.thread(th).top >= self.heap.thread(th).stack_last() {
            self.grow_stack(th, 1)?;
        }
        let t = self.heap.thread_mut(th);
        t.stack[t.top] = v;
        t.top += 1;
        let ci = t.frames.current_mut();
        if ci.top < t.top {
            ci.top = t.top;
        }
        Ok(())
    }

    pub fn pop(&mut self, th: ThreadRef, n: usize) {
        let t = self.heap.thread_mut(th);
        let base = t.frames.current().func + 1;
        assert!(t.top >= base + n, "popping below the frame base");
        t.top -= n;
        for slot in &mut t.stack[t.top..t.top + n] {
            *slot = Value::Nil;
        }
    }

    /// Moves the top to `idx`, filling new slots with nil.
    pub fn set_top(&mut self, th: ThreadRef, idx: usize) -> Result<(), RuntimeError> {
        let top = self.heap.thread(th).top;
        if idx > top {
            self.check_stack(th, idx - top)?;
        }
        let t = self.heap.thread_mut(th);
        if idx > t.top {
            t.stack[t.top..idx].fill(Value::Nil);
        } else {
            t.stack[idx..t.top].fill(Value::Nil);
        }
        t.top = idx;
        Ok(())
    }

    /// Slot of argument `i` (1-based) of the running frame.
    pub fn arg_slot(&self, th: ThreadRef, i: usize) -> usize {
        self.heap.thread(th).frames.current().func + i
    }

    pub fn arg(&self, th: ThreadRef, i: usize) -> Value {
        self.stack_get(th, self.arg_slot(th, i))
    }

    /// Values above the running frame's function slot.
    pub fn arg_count(&self, th: ThreadRef) -> usize {
        let t = self.heap.thread(th);
        t.top - (t.frames.current().func + 1)
    }

    /// Guarantees `n` free slots above the top for the running frame.
    pub fn check_stack(&mut self, th: ThreadRef, n: usize) -> Result<(), RuntimeError> {
        let (top, last) = {
            let t = self.heap.thread(th);
            (t.top, t.stack_last())
        };
        if last.saturating_sub(top) <= n {
            let in_use = top + EXTRA_STACK;
            if in_use + n > self.config.max_stack {
                return Err(RuntimeError::StackOverflow);
            }
            self.grow_stack(th, n)?;
        }
        let t = self.heap.thread_mut(th);
        let need = t.top + n;
        let ci = t.frames.current_mut();
        if ci.top < need {
            ci.top = need;
        }
        Ok(())
    }

    /// Grows the stack so `n` more slots fit above the top.
    pub(crate) fn grow_stack(&mut self, th: ThreadRef, n: usize) -> Result<(), RuntimeError> {
        let max = self.config.max_stack;
        let (size, top) = {
            let t = self.heap.thread(th);
            (t.stack.len(), t.top)
        };
        if size > max {
            // already using the overflow allowance
            return Err(RuntimeError::ErrorInHandler);
        }
        let needed = top + n + EXTRA_STACK;
        let new_size = (2 * size).min(max).max(needed);
        if new_size > max {
            self.realloc_stack(th, max + super::ERROR_STACK_EXTRA)?;
            debug!(target: "lume::stack", thread = ?th, size, "stack_overflow");
            return Err(RuntimeError::StackOverflow);
        }
        self.realloc_stack(th, new_size)
    }

    /// Resizes the stack array. Frames and open upvalues hold indices, so
    /// nothing needs rebasing.
    pub(crate) fn realloc_stack(&mut self, th: ThreadRef, new_size: usize) -> Result<(), RuntimeError> {
        let (old_bytes, new_bytes, old_size) = {
            let t = self.heap.thread(th);
            (self.heap.charged(th), t.charge_with(new_size, t.frames.allocated()), t.stack.len())
        };
        self.charge(old_bytes, new_bytes)?;
        let t = self.heap.thread_mut(th);
        debug_assert!(new_size >= t.top, "stack shrunk below its top");
        t.stack.resize(new_size, Value::Nil);
        t.stack.shrink_to_fit();
        self.heap.recharge(th, new_bytes);
        debug!(target: "lume::stack", thread = ?th, from = old_size, to = new_size, "realloc_stack");
        Ok(())
    }

    /// Releases stack and frame memory a thread no longer needs.
    pub(crate) fn shrink_stack(&mut self, th: ThreadRef) {
        let max = self.config.max_stack;
        let (in_use, size) = {
            let t = self.heap.thread(th);
            if !t.is_built() {
                return;
            }
            (t.stack_in_use(), t.stack.len())
        };
        let good_size = (in_use + in_use / 8 + 2 * EXTRA_STACK).min(max);
        {
            let t = self.heap.thread_mut(th);
            if size > max {
                t.frames.free_spares();
            } else {
                t.frames.shrink();
            }
        }
        self.sync_thread_charge(th);
        if in_use <= max.saturating_sub(EXTRA_STACK) && good_size < size {
            // shrinking never fails
            let _ = self.realloc_stack(th, good_size);
        }
    }

    /// Re-records a thread's footprint after a change that only released memory.
    pub(crate) fn sync_thread_charge(&mut self, th: ThreadRef) {
        let old = self.heap.charged(th);
        let new = {
            let t = self.heap.thread(th);
            t.charge_with(t.stack.len(), t.frames.allocated())
        };
        if new != old {
            debug_assert!(new < old);
            let _ = self.charge(old, new);
            self.heap.recharge(th, new);
        }
    }

    /// Makes room for one more frame node, charging for it when no spare exists.
    pub(crate) fn reserve_frame(&mut self, th: ThreadRef) -> Result<(), RuntimeError> {
        if !self.heap.thread(th).frames.push_allocates() {
            return Ok(());
        }
        let old = self.heap.charged(th);
        let new = old + CallChain::NODE_SIZE;
        self.charge(old, new)?;
        self.heap.recharge(th, new);
        Ok(())
    }

    /// Moves the top `n` values of `from` onto `to`.
    pub fn xmove(&mut self, from: ThreadRef, to: ThreadRef, n: usize) -> Result<(), RuntimeError> {
        if from == to || n == 0 {
            return Ok(());
        }
        self.check_stack(to, n)?;
        let values: Vec<Value> = {
            let t = self.heap.thread(from);
            t.stack[t.top - n..t.top].to_vec()
        };
        self.pop(from, n);
        for v in values {
            self.push(to, v)?;
        }
        Ok(())
    }

    /// Closes every open upvalue of `th` and releases its stack. The thread
    /// ends up dead.
    pub fn close_thread(&mut self, th: ThreadRef) {
        self.close_upvalues(th, 0);
        let t = self.heap.thread_mut(th);
        t.status = ThreadStatus::Dead;
        t.stack = Vec::new();
        t.top = 0;
        t.frames = CallChain::new(CallInfo::native(0, 0, 0));
        t.nny = 1;
        self.sync_thread_charge(th);
        debug!(target: "lume::state", thread = ?th, "close_thread");
    }

    /// Reads the value an upvalue currently refers to.
    pub fn upvalue_value(&self, uv: GcRef) -> Value {
        match *self.heap.upvalue(uv) {
            Upvalue::Open { thread, slot } => self.heap.thread(thread).stack[slot],
            Upvalue::Closed(v) => v,
        }
    }
}
