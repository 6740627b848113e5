use std::cell::Cell;

use super::GcRef;

/// Strings up to this many bytes are interned.
pub const MAX_SHORT_LEN: usize = 40;

/// Seeded string hash. Long inputs sample roughly 32 bytes.
pub fn hash_bytes(bytes: &[u8], seed: u32) -> u32 {
    let mut h = seed ^ (bytes.len() as u32);
    let step = (bytes.len() >> 5) + 1;
    let mut l = bytes.len();
    while l >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[l - 1] as u32);
        l -= step;
    }
    h
}

/// Immutable byte string.
///
/// Short strings carry their hash from creation and a chain link for the
/// interner. Long strings start with the global seed in `hash` and compute
/// the real hash on first use; `extra` then records that it is cached.
pub struct LuaString {
    bytes: Box<[u8]>,
    hash: Cell<u32>,
    /// Short: reserved-word index (1-based, 0 = none). Long: hash cached flag.
    extra: Cell<u8>,
    pub(crate) hnext: Option<GcRef>,
}

impl LuaString {
    pub(crate) fn new_short(bytes: &[u8], hash: u32) -> Self {
        debug_assert!(bytes.len() <= MAX_SHORT_LEN);
        Self {
            bytes: bytes.into(),
            hash: Cell::new(hash),
            extra: Cell::new(0),
            hnext: None,
        }
    }

    pub(crate) fn new_long(bytes: Box<[u8]>, seed: u32) -> Self {
        Self {
            bytes,
            hash: Cell::new(seed),
            extra: Cell::new(0),
            hnext: None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Hash of a short string.
    #[inline]
    pub fn short_hash(&self) -> u32 {
        self.hash.get()
    }

    /// Hash of a long string, computed once and cached.
    pub fn long_hash(&self) -> u32 {
        if self.extra.get() == 0 {
            self.hash.set(hash_bytes(&self.bytes, self.hash.get()));
            self.extra.set(1);
        }
        self.hash.get()
    }

    #[inline]
    pub fn has_cached_hash(&self) -> bool {
        self.extra.get() != 0
    }

    /// 1-based reserved-word index of a short string, if any.
    pub fn reserved_index(&self) -> Option<u8> {
        match self.extra.get() {
            0 => None,
            n => Some(n),
        }
    }

    pub(crate) fn set_reserved_index(&self, index: u8) {
        self.extra.set(index);
    }
}
