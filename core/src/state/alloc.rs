//! Pluggable memory policy. Objects live in ordinary Rust allocations; the
//! allocator only decides whether a growth request is granted and keeps the
//! running byte count hosts can observe.

use tracing::trace;

/// Grants or refuses changes in the runtime's memory footprint.
pub trait Allocator {
    /// Request to move a block from `old` to `new` bytes (`old == 0` is a
    /// fresh allocation, `new == 0` a release). Shrinking must always succeed.
    fn resize(&mut self, old: usize, new: usize) -> bool;

    /// Bytes currently granted.
    fn in_use(&self) -> usize;
}

/// Grants everything.
#[derive(Debug, Default)]
pub struct UnboundedAllocator {
    in_use: usize,
}

impl UnboundedAllocator {
    pub const fn new() -> Self {
        Self { in_use: 0 }
    }
}

impl Allocator for UnboundedAllocator {
    fn resize(&mut self, old: usize, new: usize) -> bool {
        self.in_use = self.in_use.saturating_sub(old) + new;
        true
    }

    fn in_use(&self) -> usize {
        self.in_use
    }
}

/// Refuses any growth that would push usage past a fixed limit.
#[derive(Debug)]
pub struct LimitedAllocator {
    limit: usize,
    in_use: usize,
    refusals: u64,
}

impl LimitedAllocator {
    pub const fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: 0,
            refusals: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// How many requests were refused so far.
    pub fn refusals(&self) -> u64 {
        self.refusals
    }
}

impl Allocator for LimitedAllocator {
    fn resize(&mut self, old: usize, new: usize) -> bool {
        let after = self.in_use.saturating_sub(old) + new;
        if new > old && after > self.limit {
            self.refusals += 1;
            trace!(
                target: "lume::alloc",
                requested = new - old,
                in_use = self.in_use,
                limit = self.limit,
                "limited_allocator.refuse"
            );
            return false;
        }
        self.in_use = after;
        true
    }

    fn in_use(&self) -> usize {
        self.in_use
    }
}
