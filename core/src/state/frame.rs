//! Call frames. Frames are kept in a vector indexed by depth; nodes above
//! the current depth are spares reused by later calls.

use std::mem::size_of;

use crate::obj::func::NativeFn;

/// `nresults` value asking for every result.
pub const MULTRET: i32 = -1;

#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Frame run by the bytecode executor.
    Lua { base: usize, saved_pc: usize },
    /// Frame of a native function. `continuation` runs when a yielded
    /// coroutine is resumed inside this frame.
    Native { continuation: Option<NativeFn> },
}

/// Per-frame status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallStatus(u8);

impl CallStatus {
    pub const NONE: CallStatus = CallStatus(0);
    /// Entered directly from the host rather than from running bytecode.
    pub const FRESH: CallStatus = CallStatus(1 << 0);
    /// Running a `__gc` finalizer.
    pub const FINALIZER: CallStatus = CallStatus(1 << 1);
    /// Set on a frame whose coroutine yielded from it.
    pub const YIELDED: CallStatus = CallStatus(1 << 2);

    #[inline]
    pub const fn contains(self, other: CallStatus) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: CallStatus) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: CallStatus) {
        self.0 &= !other.0;
    }
}

/// One activation record. All positions are stack indices, so they stay
/// valid when the stack is reallocated.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo {
    /// Slot holding the called function; results are written from here.
    pub func: usize,
    /// Highest slot the frame may use.
    pub top: usize,
    /// Results wanted by the caller, or [`MULTRET`].
    pub nresults: i32,
    pub kind: FrameKind,
    pub status: CallStatus,
}

impl CallInfo {
    pub fn native(func: usize, top: usize, nresults: i32) -> Self {
        Self {
            func,
            top,
            nresults,
            kind: FrameKind::Native { continuation: None },
            status: CallStatus::NONE,
        }
    }

    #[inline]
    pub fn is_lua(&self) -> bool {
        matches!(self.kind, FrameKind::Lua { .. })
    }
}

/// Chain of active frames plus reusable spare nodes.
#[derive(Debug, Clone)]
pub struct CallChain {
    nodes: Vec<CallInfo>,
    depth: usize,
}

impl CallChain {
    pub fn new(base: CallInfo) -> Self {
        Self {
            nodes: vec![base],
            depth: 0,
        }
    }

    pub const NODE_SIZE: usize = size_of::<CallInfo>();

    #[inline]
    pub fn current(&self) -> &CallInfo {
        &self.nodes[self.depth]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut CallInfo {
        &mut self.nodes[self.depth]
    }

    /// The base frame every thread starts with.
    #[inline]
    pub fn base(&self) -> &CallInfo {
        &self.nodes[0]
    }

    /// Active frames above the base.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn at(&self, level: usize) -> Option<&CallInfo> {
        if level <= self.depth { self.nodes.get(level) } else { None }
    }

    /// Allocated nodes (active and spare), base included.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.nodes.len()
    }

    /// True when the next push has to allocate a node.
    #[inline]
    pub fn push_allocates(&self) -> bool {
        self.depth + 1 == self.nodes.len()
    }

    pub fn push(&mut self, ci: CallInfo) {
        self.depth += 1;
        if self.depth == self.nodes.len() {
            self.nodes.push(ci);
        } else {
            self.nodes[self.depth] = ci;
        }
    }

    pub fn pop(&mut self) {
        debug_assert!(self.depth > 0, "popping the base frame");
        self.depth -= 1;
    }

    /// Drops frames back to `depth` (after an error unwinds them).
    pub fn unwind_to(&mut self, depth: usize) {
        debug_assert!(depth <= self.depth);
        self.depth = depth;
    }

    /// Frees every spare node.
    pub fn free_spares(&mut self) {
        self.nodes.truncate(self.depth + 1);
    }

    /// Frees every other spare node, halving the spare count (rounding the
    /// kept half up).
    pub fn shrink(&mut self) {
        let spare = self.nodes.len() - self.depth - 1;
        self.nodes.truncate(self.depth + 1 + spare.div_ceil(2));
    }

    /// Active frames from the base upward.
    pub fn active(&self) -> impl Iterator<Item = &CallInfo> {
        self.nodes[..=self.depth].iter()
    }
}
