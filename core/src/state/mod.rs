//! Runtime state: the global instance, execution contexts, call machinery
//! and the host-facing object API.

mod alloc;
mod api;
mod call;
mod closure;
mod error;
mod frame;
mod runtime;
mod thread;
mod tm;

#[cfg(test)]
mod api_test;
#[cfg(test)]
mod frame_test;

use crate::obj::GcRef;

pub use alloc::{Allocator, LimitedAllocator, UnboundedAllocator};
pub use call::{CallStep, ExecOutcome, Executor, ResumeOutcome};
pub use error::{ErrorStatus, RuntimeError};
pub use frame::{CallChain, CallInfo, CallStatus, FrameKind, MULTRET};
pub use runtime::{PanicHandler, REGISTRY_GLOBALS, REGISTRY_MAIN_THREAD, Runtime};
pub use thread::{BASIC_STACK_SIZE, EXTRA_STACK, LuaThread, MIN_STACK, ThreadStatus};
pub use tm::TagMethod;

/// Reference to a thread object.
pub type ThreadRef = GcRef;

/// Extra slots granted past `max_stack` so an overflow error can be handled.
pub const ERROR_STACK_EXTRA: usize = 200;
