//! Heap object family: every collectable object is a [`GcHeader`] plus an
//! [`ObjectBody`] stored in the [`Heap`] arena and addressed by [`GcRef`].

pub mod func;
mod heap;
pub mod string;
pub mod table;
pub mod userdata;

#[cfg(test)]
mod table_test;

use std::mem::size_of;

pub use heap::{Bodies, Headers, Heap};

use crate::state::LuaThread;
use crate::val::{BaseKind, Tag};

use func::{LuaClosure, NativeClosure, Proto, Upvalue};
use string::LuaString;
use table::Table;
use userdata::Userdata;

/// Handle to a heap object. Generations make stale handles detectable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    /// Never refers to a live object.
    pub const DANGLING: GcRef = GcRef {
        index: u32::MAX,
        generation: u32::MAX,
    };

    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> GcRef {
        GcRef { index, generation }
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Debug for GcRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}.{}", self.index, self.generation)
    }
}

/// Mark bits of an object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marked(u8);

impl Marked {
    pub const WHITE0: u8 = 1 << 0;
    pub const WHITE1: u8 = 1 << 1;
    pub const BLACK: u8 = 1 << 2;
    /// Object was separated for finalization.
    pub const FINALIZED: u8 = 1 << 3;
    pub const WHITE_BITS: u8 = Self::WHITE0 | Self::WHITE1;
    const COLOR_BITS: u8 = Self::WHITE_BITS | Self::BLACK;

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> Marked {
        Marked(bits)
    }

    #[inline]
    pub const fn is_white(self) -> bool {
        self.0 & Self::WHITE_BITS != 0
    }

    #[inline]
    pub const fn is_black(self) -> bool {
        self.0 & Self::BLACK != 0
    }

    #[inline]
    pub const fn is_gray(self) -> bool {
        self.0 & Self::COLOR_BITS == 0
    }

    #[inline]
    pub const fn to_finalize(self) -> bool {
        self.0 & Self::FINALIZED != 0
    }

    /// Dead when carrying the white that is *not* current. With an
    /// `other_white` of zero every object counts as dead.
    #[inline]
    pub const fn is_dead(self, other_white: u8) -> bool {
        (self.0 ^ Self::WHITE_BITS) & other_white == 0
    }

    #[inline]
    pub fn set_white(&mut self, current_white: u8) {
        self.0 = (self.0 & !Self::COLOR_BITS) | current_white;
    }

    #[inline]
    pub fn white_to_gray(&mut self) {
        self.0 &= !Self::WHITE_BITS;
    }

    #[inline]
    pub fn gray_to_black(&mut self) {
        self.0 |= Self::BLACK;
    }

    #[inline]
    pub fn black_to_gray(&mut self) {
        self.0 &= !Self::BLACK;
    }

    #[inline]
    pub fn set_finalized(&mut self, on: bool) {
        if on {
            self.0 |= Self::FINALIZED;
        } else {
            self.0 &= !Self::FINALIZED;
        }
    }
}

/// Tri-color view of the mark bits relative to the collector's current white.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    /// White of the previous cycle: unreachable, awaiting sweep.
    DeadWhite,
    Gray,
    Black,
}

/// The only part of an object generic collector passes touch.
#[derive(Debug, Clone)]
pub struct GcHeader {
    /// Intrusive link in whichever collector list holds the object.
    pub next: Option<GcRef>,
    pub marked: Marked,
    /// Variant tag (collectable bit included), same numbering as [`Tag`].
    pub tag: Tag,
}

impl GcHeader {
    #[inline]
    pub fn kind(&self) -> BaseKind {
        self.tag.base()
    }

    pub fn color(&self, current_white: u8) -> Color {
        if self.marked.is_black() {
            Color::Black
        } else if self.marked.is_gray() {
            Color::Gray
        } else if self.marked.bits() & current_white != 0 {
            Color::White
        } else {
            Color::DeadWhite
        }
    }
}

/// Kind-specific payload of a heap object.
pub enum ObjectBody {
    String(LuaString),
    Table(Table),
    LuaClosure(LuaClosure),
    NativeClosure(NativeClosure),
    Proto(Proto),
    Upvalue(Upvalue),
    Userdata(Userdata),
    Thread(Box<LuaThread>),
}

impl ObjectBody {
    /// Bytes charged to the collector for this object.
    pub fn footprint(&self) -> usize {
        size_of::<GcHeader>()
            + match self {
                ObjectBody::String(s) => size_of::<LuaString>() + s.len() + 1,
                ObjectBody::Table(t) => t.footprint(),
                ObjectBody::LuaClosure(c) => c.footprint(),
                ObjectBody::NativeClosure(c) => c.footprint(),
                ObjectBody::Proto(p) => p.footprint(),
                ObjectBody::Upvalue(_) => size_of::<Upvalue>(),
                ObjectBody::Userdata(u) => u.footprint(),
                ObjectBody::Thread(t) => t.footprint(),
            }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectBody::String(_) => "string",
            ObjectBody::Table(_) => "table",
            ObjectBody::LuaClosure(_) => "lua closure",
            ObjectBody::NativeClosure(_) => "native closure",
            ObjectBody::Proto(_) => "proto",
            ObjectBody::Upvalue(_) => "upvalue",
            ObjectBody::Userdata(_) => "userdata",
            ObjectBody::Thread(_) => "thread",
        }
    }
}
