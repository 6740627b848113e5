//! Calls, protected calls and coroutine transitions.
//!
//! Errors travel as `Err` values. A protected boundary records the function
//! slot, frame depth and call counters before the call; when an error comes
//! back it closes upvalues above that slot, drops the frames and leaves the
//! error value where the function was. Yields travel the same way as
//! [`CallStep::Yielded`], leaving the yielding frame on the chain so a
//! later [`Runtime::resume`] can finish it.

use tracing::{debug, trace};

use crate::obj::func::{NativeFn, NativeOutcome};
use crate::obj::GcRef;
use crate::val::{Function, Value};

use super::frame::{CallInfo, CallStatus, FrameKind, MULTRET};
use super::thread::{MIN_STACK, ThreadStatus};
use super::{Runtime, RuntimeError, TagMethod, ThreadRef};

/// How a bytecode frame stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The frame returned `count` values starting at stack slot `first`.
    Return { first: usize, count: usize },
    /// A callee yielded `count` values; the frame resumes later.
    Yield { count: usize },
}

/// The bytecode interpreter. The runtime pushes a frame for the closure and
/// hands control over; `execute` runs the topmost frame of `th` (resuming at
/// its saved pc when it was suspended) until it returns or yields.
pub trait Executor {
    fn execute(&self, rt: &mut Runtime, th: ThreadRef) -> Result<ExecOutcome, RuntimeError>;
}

/// Result of a call that may suspend the running coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStep {
    Finished,
    /// The coroutine yielded this many values, left on its stack top.
    Yielded(usize),
}

/// Result of [`Runtime::resume`]; values sit on the coroutine's stack top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Yielded(usize),
    Returned(usize),
}

/// Call counters restored when a protected call fails.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    func: usize,
    depth: usize,
    nny: u32,
    n_ccalls: u32,
}

impl Runtime {
    /// Calls the value at slot `func` with every value above it as
    /// arguments. Results replace the function and arguments: exactly
    /// `nresults` of them (padded with nil), or all with [`MULTRET`].
    ///
    /// The callee may not yield. An error outside any protected call is
    /// reported to the panic handler and leaves the runtime unusable.
    pub fn call(&mut self, th: ThreadRef, func: usize, nresults: i32) -> Result<(), RuntimeError> {
        self.ensure_usable()?;
        let res = self.call_noyield(th, func, nresults);
        if let Err(err) = &res
            && self.protected == 0
        {
            self.raise_panic(err);
        }
        res
    }

    /// Like [`Runtime::call`], but errors are caught: the stack is restored
    /// to the call's slot, which then holds the error value, and the error
    /// is returned.
    pub fn pcall(&mut self, th: ThreadRef, func: usize, nresults: i32) -> Result<(), RuntimeError> {
        self.ensure_usable()?;
        let cp = {
            let t = self.heap.thread(th);
            Checkpoint {
                func,
                depth: t.frames.depth(),
                nny: t.nny,
                n_ccalls: t.n_ccalls,
            }
        };
        self.protected += 1;
        let res = self.call_noyield(th, func, nresults);
        self.protected -= 1;
        if let Err(err) = &res {
            self.recover(th, cp, err);
        }
        res
    }

    /// Call that an executor makes from a bytecode frame: it may yield when
    /// the thread is yieldable.
    pub fn call_yieldable(&mut self, th: ThreadRef, func: usize, nresults: i32) -> Result<CallStep, RuntimeError> {
        self.call_value(th, func, nresults)
    }

    pub fn is_yieldable(&self, th: ThreadRef) -> bool {
        self.heap.thread(th).nny == 0
    }

    fn call_noyield(&mut self, th: ThreadRef, func: usize, nresults: i32) -> Result<(), RuntimeError> {
        self.heap.thread_mut(th).nny += 1;
        let res = self.call_value(th, func, nresults);
        self.heap.thread_mut(th).nny -= 1;
        match res? {
            CallStep::Finished => Ok(()),
            CallStep::Yielded(_) => Err(RuntimeError::message("attempt to yield across a C-call boundary")),
        }
    }

    fn recover(&mut self, th: ThreadRef, cp: Checkpoint, err: &RuntimeError) {
        self.close_upvalues(th, cp.func);
        {
            let t = self.heap.thread_mut(th);
            t.frames.unwind_to(cp.depth);
            t.nny = cp.nny;
            t.n_ccalls = cp.n_ccalls;
        }
        // lowering the top never fails
        let _ = self.set_top(th, cp.func);
        let v = self.error_value(err);
        let t = self.heap.thread_mut(th);
        t.stack[cp.func] = v;
        t.top = cp.func + 1;
        self.shrink_stack(th);
        debug!(target: "lume::state", thread = ?th, depth = cp.depth, error = %err, "recover");
    }

    /// Counts one nested call and runs it.
    fn call_value(&mut self, th: ThreadRef, func: usize, nresults: i32) -> Result<CallStep, RuntimeError> {
        let max = self.config.max_native_calls;
        let n_ccalls = {
            let t = self.heap.thread_mut(th);
            t.n_ccalls += 1;
            t.n_ccalls
        };
        let res = if n_ccalls == max {
            Err(RuntimeError::message("C stack overflow"))
        } else if n_ccalls >= max + (max >> 3) {
            // errors while handling the overflow
            Err(RuntimeError::ErrorInHandler)
        } else {
            self.dispatch(th, func, nresults)
        };
        self.heap.thread_mut(th).n_ccalls -= 1;
        res
    }

    fn dispatch(&mut self, th: ThreadRef, func: usize, nresults: i32) -> Result<CallStep, RuntimeError> {
        if nresults > 0 {
            let top = self.heap.thread(th).top;
            let need = func + nresults as usize;
            if need > top {
                self.check_stack(th, need - top)?;
            }
        }
        match self.resolve_callable(th, func)? {
            Function::Light(f) => self.call_native(th, func, nresults, f),
            Function::Native(cl) => {
                let f = self.heap.native_closure(cl).f;
                self.call_native(th, func, nresults, f)
            }
            Function::Lua(cl) => self.call_lua(th, func, nresults, cl),
        }
    }

    /// Function stored at `func`, going through `__call` for other values:
    /// the handler is inserted below the arguments, the original value
    /// becoming its first argument.
    fn resolve_callable(&mut self, th: ThreadRef, func: usize) -> Result<Function, RuntimeError> {
        loop {
            let v = self.stack_get(th, func);
            if let Value::Function(f) = v {
                return Ok(f);
            }
            let Some(tm) = self.tm_by_value(&v, TagMethod::Call) else {
                return Err(RuntimeError::message(format!("attempt to call a {} value", v.type_name())));
            };
            self.check_stack(th, 1)?;
            let t = self.heap.thread_mut(th);
            let top = t.top;
            t.stack.copy_within(func..top, func + 1);
            t.stack[func] = tm;
            t.top += 1;
        }
    }

    fn call_native(&mut self, th: ThreadRef, func: usize, nresults: i32, f: NativeFn) -> Result<CallStep, RuntimeError> {
        self.check_stack(th, MIN_STACK)?;
        self.reserve_frame(th)?;
        {
            let t = self.heap.thread_mut(th);
            let top = t.top;
            t.frames.push(CallInfo::native(func, top + MIN_STACK, nresults));
        }
        trace!(target: "lume::state", thread = ?th, func, "call_native");
        let out = f(self, th)?;
        self.finish_native(th, out)
    }

    fn finish_native(&mut self, th: ThreadRef, out: NativeOutcome) -> Result<CallStep, RuntimeError> {
        match out {
            NativeOutcome::Return(n) => {
                let top = self.heap.thread(th).top;
                debug_assert!(n <= self.arg_count(th), "native function returned more values than it pushed");
                self.poscall(th, top - n, n);
                Ok(CallStep::Finished)
            }
            NativeOutcome::Yield { n, continuation } => self.yield_native(th, n, continuation),
        }
    }

    fn yield_native(&mut self, th: ThreadRef, n: usize, continuation: Option<NativeFn>) -> Result<CallStep, RuntimeError> {
        if self.heap.thread(th).nny > 0 {
            return Err(RuntimeError::message(if th == self.main_thread {
                "attempt to yield from outside a coroutine"
            } else {
                "attempt to yield across a C-call boundary"
            }));
        }
        let ci = self.heap.thread_mut(th).frames.current_mut();
        ci.kind = FrameKind::Native { continuation };
        ci.status.insert(CallStatus::YIELDED);
        debug!(target: "lume::state", thread = ?th, values = n, "yield");
        Ok(CallStep::Yielded(n))
    }

    fn call_lua(&mut self, th: ThreadRef, func: usize, nresults: i32, cl: GcRef) -> Result<CallStep, RuntimeError> {
        let Some(exec) = self.executor.clone() else {
            return Err(RuntimeError::message("no executor installed for bytecode closures"));
        };
        let (num_params, is_vararg, frame_size) = {
            let p = self.heap.proto(self.heap.lua_closure(cl).proto);
            (p.num_params as usize, p.is_vararg != 0, p.max_stack_size as usize)
        };
        self.check_stack(th, frame_size + num_params)?;
        self.reserve_frame(th)?;
        let nargs = self.heap.thread(th).top - func - 1;
        let base = {
            let t = self.heap.thread_mut(th);
            // missing parameters read as nil
            let mut top = t.top;
            for _ in nargs..num_params {
                t.stack[top] = Value::Nil;
                top += 1;
            }
            t.top = top;
            if is_vararg {
                // fixed parameters move above the varargs
                let fixed = func + 1;
                let base = top;
                for i in 0..num_params {
                    t.stack[base + i] = t.stack[fixed + i];
                    t.stack[fixed + i] = Value::Nil;
                }
                t.top = base + num_params;
                base
            } else {
                func + 1
            }
        };
        {
            let t = self.heap.thread_mut(th);
            t.frames.push(CallInfo {
                func,
                top: base + frame_size,
                nresults,
                kind: FrameKind::Lua { base, saved_pc: 0 },
                status: CallStatus::FRESH,
            });
        }
        trace!(target: "lume::state", thread = ?th, func, base, "call_lua");
        self.run_executor(th, exec.as_ref())
    }

    fn run_executor(&mut self, th: ThreadRef, exec: &dyn Executor) -> Result<CallStep, RuntimeError> {
        match exec.execute(self, th)? {
            ExecOutcome::Return { first, count } => {
                self.poscall(th, first, count);
                Ok(CallStep::Finished)
            }
            ExecOutcome::Yield { count } => Ok(CallStep::Yielded(count)),
        }
    }

    /// Moves `count` results starting at `first` to the finished frame's
    /// function slot, adjusts them to the wanted count and pops the frame.
    pub(crate) fn poscall(&mut self, th: ThreadRef, first: usize, count: usize) {
        let t = self.heap.thread_mut(th);
        let ci = *t.frames.current();
        t.frames.pop();
        let res = ci.func;
        let wanted = if ci.nresults == MULTRET { count } else { ci.nresults as usize };
        for i in 0..wanted {
            t.stack[res + i] = if i < count { t.stack[first + i] } else { Value::Nil };
        }
        let new_top = res + wanted;
        if t.top > new_top {
            t.stack[new_top..t.top].fill(Value::Nil);
        }
        t.top = new_top;
        if ci.nresults == MULTRET {
            let caller = t.frames.current_mut();
            if caller.top < new_top {
                caller.top = new_top;
            }
        }
    }

    // coroutines

    /// Starts or continues coroutine `co` from thread `from` with the top
    /// `nargs` values of `co`'s stack. A fresh coroutine expects its body
    /// function right below them.
    ///
    /// An error inside the coroutine kills it, leaves the error value on its
    /// stack top and is returned. Misuse (resuming a running or dead
    /// coroutine) is returned without touching `co`.
    pub fn resume(&mut self, co: ThreadRef, from: ThreadRef, nargs: usize) -> Result<ResumeOutcome, RuntimeError> {
        self.ensure_usable()?;
        let (status, top, first_slot) = {
            let t = self.heap.thread(co);
            (t.status, t.top, t.frames.base().func + 1)
        };
        match status {
            ThreadStatus::Initial if top >= first_slot + nargs + 1 => {}
            ThreadStatus::Suspended => {}
            ThreadStatus::Initial | ThreadStatus::Dead => {
                return Err(RuntimeError::message("cannot resume dead coroutine"));
            }
            ThreadStatus::Running | ThreadStatus::Normal => {
                return Err(RuntimeError::message("cannot resume non-suspended coroutine"));
            }
        }
        let n_ccalls = self.heap.thread(from).n_ccalls + 1;
        if n_ccalls >= self.config.max_native_calls {
            return Err(RuntimeError::message("C stack overflow"));
        }
        let from_status = self.heap.thread(from).status;
        let old_nny = {
            let t = self.heap.thread_mut(co);
            t.n_ccalls = n_ccalls;
            t.status = ThreadStatus::Running;
            std::mem::replace(&mut t.nny, 0)
        };
        if from != co {
            self.heap.thread_mut(from).status = ThreadStatus::Normal;
        }
        let previous = std::mem::replace(&mut self.current, co);
        debug!(target: "lume::state", thread = ?co, nargs, "resume");

        self.protected += 1;
        let res = if status == ThreadStatus::Initial {
            self.call_value(co, top - nargs - 1, MULTRET)
        } else {
            self.resume_suspended(co, nargs)
        };
        self.protected -= 1;

        self.current = previous;
        if from != co {
            self.heap.thread_mut(from).status = from_status;
        }
        self.heap.thread_mut(co).nny = old_nny;
        match res {
            Ok(CallStep::Yielded(n)) => {
                self.heap.thread_mut(co).status = ThreadStatus::Suspended;
                Ok(ResumeOutcome::Yielded(n))
            }
            Ok(CallStep::Finished) => {
                let t = self.heap.thread_mut(co);
                t.status = ThreadStatus::Dead;
                let n = t.top - (t.frames.base().func + 1);
                debug!(target: "lume::state", thread = ?co, results = n, "coroutine_return");
                Ok(ResumeOutcome::Returned(n))
            }
            Err(err) => {
                self.kill_coroutine(co, &err);
                Err(err)
            }
        }
    }

    /// Finishes the frame that yielded, then every frame below it.
    fn resume_suspended(&mut self, co: ThreadRef, nargs: usize) -> Result<CallStep, RuntimeError> {
        let ci = *self.heap.thread(co).frames.current();
        self.heap
            .thread_mut(co)
            .frames
            .current_mut()
            .status
            .remove(CallStatus::YIELDED);
        let step = match ci.kind {
            FrameKind::Native { continuation: Some(k) } => {
                let out = k(self, co)?;
                self.finish_native(co, out)?
            }
            FrameKind::Native { continuation: None } => {
                // the resume arguments become the results of the yield
                let top = self.heap.thread(co).top;
                self.poscall(co, top - nargs, nargs);
                CallStep::Finished
            }
            FrameKind::Lua { .. } => self.execute_current(co)?,
        };
        if let CallStep::Yielded(n) = step {
            return Ok(CallStep::Yielded(n));
        }
        self.unroll(co)
    }

    /// Runs the remaining frames of a resumed coroutine down to its base.
    fn unroll(&mut self, co: ThreadRef) -> Result<CallStep, RuntimeError> {
        while self.heap.thread(co).frames.depth() > 0 {
            let ci = *self.heap.thread(co).frames.current();
            let step = match ci.kind {
                FrameKind::Lua { .. } => self.execute_current(co)?,
                FrameKind::Native { continuation: Some(k) } => {
                    let out = k(self, co)?;
                    self.finish_native(co, out)?
                }
                FrameKind::Native { continuation: None } => {
                    let n = self.arg_count(co);
                    let top = self.heap.thread(co).top;
                    self.poscall(co, top - n, n);
                    CallStep::Finished
                }
            };
            if let CallStep::Yielded(n) = step {
                return Ok(CallStep::Yielded(n));
            }
        }
        Ok(CallStep::Finished)
    }

    fn execute_current(&mut self, co: ThreadRef) -> Result<CallStep, RuntimeError> {
        let Some(exec) = self.executor.clone() else {
            return Err(RuntimeError::message("no executor installed for bytecode closures"));
        };
        self.run_executor(co, exec.as_ref())
    }

    /// Marks `co` dead with the error value on its stack top. Its frames are
    /// dropped; the stack stays until the thread is collected or closed.
    fn kill_coroutine(&mut self, co: ThreadRef, err: &RuntimeError) {
        let v = self.error_value(err);
        let t = self.heap.thread_mut(co);
        t.status = ThreadStatus::Dead;
        t.frames.unwind_to(0);
        if t.top < t.stack.len() {
            t.stack[t.top] = v;
            t.top += 1;
        }
        debug!(target: "lume::state", thread = ?co, error = %err, "coroutine_error");
    }

    // error values

    /// Value delivered at a protected boundary for `err`.
    pub fn error_value(&mut self, err: &RuntimeError) -> Value {
        let fallback = self.memerrmsg.map_or(Value::Nil, Value::String);
        match err {
            RuntimeError::Raised(v) => *v,
            RuntimeError::Memory => fallback,
            other => {
                let text = other.to_string();
                self.new_string(text.as_bytes()).map_or(fallback, Value::String)
            }
        }
    }

    /// Readable text of an error, for logs and host messages.
    pub fn error_text(&self, err: &RuntimeError) -> String {
        match err {
            RuntimeError::Raised(Value::String(s)) => self.string_lossy(*s),
            RuntimeError::Raised(v) => format!("(error object is a {} value)", v.type_name()),
            other => other.to_string(),
        }
    }
}
