/// Base kind of a value or heap object. The first nine are the kinds a
/// script can observe; the rest only live inside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BaseKind {
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
    Proto = 9,
    Upvalue = 10,
    DeadKey = 11,
}

/// Number of kinds visible to scripts (per-kind metatables are indexed by these).
pub const NUM_VALUE_KINDS: usize = 9;

impl BaseKind {
    pub const fn from_bits(bits: u8) -> Option<BaseKind> {
        Some(match bits {
            0 => BaseKind::Nil,
            1 => BaseKind::Boolean,
            2 => BaseKind::LightUserdata,
            3 => BaseKind::Number,
            4 => BaseKind::String,
            5 => BaseKind::Table,
            6 => BaseKind::Function,
            7 => BaseKind::Userdata,
            8 => BaseKind::Thread,
            9 => BaseKind::Proto,
            10 => BaseKind::Upvalue,
            11 => BaseKind::DeadKey,
            _ => return None,
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            BaseKind::Nil => "nil",
            BaseKind::Boolean => "boolean",
            BaseKind::LightUserdata | BaseKind::Userdata => "userdata",
            BaseKind::Number => "number",
            BaseKind::String => "string",
            BaseKind::Table => "table",
            BaseKind::Function => "function",
            BaseKind::Thread => "thread",
            BaseKind::Proto => "proto",
            BaseKind::Upvalue => "upvalue",
            BaseKind::DeadKey => "deadkey",
        }
    }
}

/// Packed type tag: bits 0-3 base kind, bits 4-5 variant, bit 6 collectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u8);

const BASE_MASK: u8 = 0x0f;
const VARIANT_SHIFT: u8 = 4;
const COLLECTABLE: u8 = 1 << 6;

const fn variant(base: BaseKind, v: u8) -> u8 {
    base as u8 | (v << VARIANT_SHIFT)
}

impl Tag {
    pub const NIL: Tag = Tag(BaseKind::Nil as u8);
    pub const BOOLEAN: Tag = Tag(BaseKind::Boolean as u8);
    pub const LIGHT_USERDATA: Tag = Tag(BaseKind::LightUserdata as u8);
    pub const FLOAT: Tag = Tag(variant(BaseKind::Number, 0));
    pub const INTEGER: Tag = Tag(variant(BaseKind::Number, 1));
    pub const SHORT_STRING: Tag = Tag(variant(BaseKind::String, 0) | COLLECTABLE);
    pub const LONG_STRING: Tag = Tag(variant(BaseKind::String, 1) | COLLECTABLE);
    pub const TABLE: Tag = Tag(BaseKind::Table as u8 | COLLECTABLE);
    pub const LUA_CLOSURE: Tag = Tag(variant(BaseKind::Function, 0) | COLLECTABLE);
    pub const LIGHT_FUNCTION: Tag = Tag(variant(BaseKind::Function, 1));
    pub const NATIVE_CLOSURE: Tag = Tag(variant(BaseKind::Function, 2) | COLLECTABLE);
    pub const USERDATA: Tag = Tag(BaseKind::Userdata as u8 | COLLECTABLE);
    pub const THREAD: Tag = Tag(BaseKind::Thread as u8 | COLLECTABLE);
    pub const PROTO: Tag = Tag(BaseKind::Proto as u8 | COLLECTABLE);
    pub const UPVALUE: Tag = Tag(BaseKind::Upvalue as u8 | COLLECTABLE);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Tag without the collectable bit, as stored in object headers and chunks.
    #[inline]
    pub const fn variant_bits(self) -> u8 {
        self.0 & !COLLECTABLE
    }

    #[inline]
    pub const fn base(self) -> BaseKind {
        match BaseKind::from_bits(self.0 & BASE_MASK) {
            Some(kind) => kind,
            None => BaseKind::DeadKey,
        }
    }

    #[inline]
    pub const fn variant(self) -> u8 {
        (self.0 >> VARIANT_SHIFT) & 0x3
    }

    #[inline]
    pub const fn is_collectable(self) -> bool {
        self.0 & COLLECTABLE != 0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{:#04x}", self.base().name(), self.0)
    }
}
