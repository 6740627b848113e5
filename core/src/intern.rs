//! String interner: every short string exists once, so short-string
//! equality is handle equality.

use std::mem::size_of;

use tracing::trace;

use crate::obj::string::{LuaString, MAX_SHORT_LEN, hash_bytes};
use crate::obj::{GcRef, Heap, ObjectBody};
use crate::state::{Runtime, RuntimeError};
use crate::val::{StrRef, Tag, Value};

/// Initial and minimum bucket count.
pub const MIN_STRTAB_SIZE: usize = 128;

/// Reserved words of the language, flagged on their interned strings.
pub const RESERVED_WORDS: [&str; 22] = [
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in", "local", "nil",
    "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Chained hash set of short strings. Chains run through each string's
/// `hnext` link.
#[derive(Debug, Default)]
pub struct StringTable {
    buckets: Vec<Option<GcRef>>,
    len: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interned strings.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bucket count.
    #[inline]
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    pub fn footprint_for(size: usize) -> usize {
        size * size_of::<Option<GcRef>>()
    }

    #[inline]
    fn bucket(&self, hash: u32) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    pub fn find(&self, heap: &Heap, bytes: &[u8], hash: u32) -> Option<GcRef> {
        if self.buckets.is_empty() {
            return None;
        }
        let mut cur = self.buckets[self.bucket(hash)];
        while let Some(r) = cur {
            let s = heap.string(r);
            if s.short_hash() == hash && s.as_bytes() == bytes {
                return Some(r);
            }
            cur = s.hnext;
        }
        None
    }

    /// Links a freshly created short string at the head of its chain.
    pub fn link(&mut self, heap: &mut Heap, r: GcRef) {
        let hash = heap.string(r).short_hash();
        let b = self.bucket(hash);
        heap.string_mut(r).hnext = self.buckets[b];
        self.buckets[b] = Some(r);
        self.len += 1;
    }

    /// Removes a dying string from its chain.
    pub fn unlink(&mut self, heap: &mut Heap, r: GcRef) {
        let hash = heap.string(r).short_hash();
        let b = self.bucket(hash);
        let next = heap.string(r).hnext;
        if self.buckets[b] == Some(r) {
            self.buckets[b] = next;
            self.len -= 1;
            return;
        }
        let mut cur = self.buckets[b];
        while let Some(c) = cur {
            let after = heap.string(c).hnext;
            if after == Some(r) {
                heap.string_mut(c).hnext = next;
                self.len -= 1;
                return;
            }
            cur = after;
        }
        debug_assert!(false, "interned string {r:?} missing from its chain");
    }

    /// Rehashes every string into `new_size` buckets (a power of two).
    pub fn resize(&mut self, heap: &mut Heap, new_size: usize) {
        debug_assert!(new_size.is_power_of_two());
        let old = std::mem::replace(&mut self.buckets, vec![None; new_size]);
        for head in old {
            let mut cur = head;
            while let Some(r) = cur {
                let s = heap.string_mut(r);
                cur = s.hnext.take();
                let b = (s.short_hash() as usize) & (new_size - 1);
                s.hnext = self.buckets[b];
                self.buckets[b] = Some(r);
            }
        }
    }
}

impl Runtime {
    /// Interns a short string, resurrecting it if it is dead but not yet swept.
    /// Longer input becomes a fresh long string.
    pub(crate) fn intern(&mut self, bytes: &[u8]) -> Result<StrRef, RuntimeError> {
        if bytes.len() > MAX_SHORT_LEN {
            return self.new_long_string(bytes);
        }
        let hash = hash_bytes(bytes, self.seed);
        if let Some(r) = self.strings.find(&self.heap, bytes, hash) {
            let other_white = self.gc.other_white();
            let marked = &mut self.heap.header_mut(r).marked;
            if marked.is_dead(other_white) {
                marked.set_white(self.gc.current_white);
                trace!(target: "lume::intern", string = ?r, "resurrect");
            }
            return Ok(StrRef::Short(r));
        }
        if self.strings.len() >= self.strings.size() && self.strings.size() <= i32::MAX as usize / 2 {
            self.resize_string_table(self.strings.size() * 2)?;
        }
        let r = self.alloc_object(Tag::SHORT_STRING, ObjectBody::String(LuaString::new_short(bytes, hash)))?;
        self.strings.link(&mut self.heap, r);
        Ok(StrRef::Short(r))
    }

    /// Creates a string: interned when short, a fresh object otherwise.
    pub fn new_string(&mut self, bytes: &[u8]) -> Result<StrRef, RuntimeError> {
        self.check_gc()?;
        if bytes.len() <= MAX_SHORT_LEN {
            self.intern(bytes)
        } else {
            self.new_long_string(bytes)
        }
    }

    /// Long strings are never interned; equal contents may live in distinct objects.
    pub fn new_long_string(&mut self, bytes: &[u8]) -> Result<StrRef, RuntimeError> {
        let s = LuaString::new_long(bytes.into(), self.seed);
        let r = self.alloc_object(Tag::LONG_STRING, ObjectBody::String(s))?;
        Ok(StrRef::Long(r))
    }

    pub fn str_value(&mut self, text: &str) -> Result<Value, RuntimeError> {
        Ok(Value::String(self.new_string(text.as_bytes())?))
    }

    pub fn string_bytes(&self, s: StrRef) -> &[u8] {
        self.heap.str_bytes(s)
    }

    /// Lossy UTF-8 view of a string value, for messages and tests.
    pub fn string_lossy(&self, s: StrRef) -> String {
        String::from_utf8_lossy(self.heap.str_bytes(s)).into_owned()
    }

    /// Hash of any string; long strings compute and cache theirs on demand.
    pub fn string_hash(&self, s: StrRef) -> u32 {
        match s {
            StrRef::Short(r) => self.heap.string(r).short_hash(),
            StrRef::Long(r) => self.heap.string(r).long_hash(),
        }
    }

    /// Content equality; handle equality suffices for two short strings.
    pub fn string_eq(&self, a: StrRef, b: StrRef) -> bool {
        match (a, b) {
            (StrRef::Short(x), StrRef::Short(y)) => x == y,
            _ => a == b || self.heap.str_bytes(a) == self.heap.str_bytes(b),
        }
    }

    /// 1-based reserved-word index of a string, if it is one.
    pub fn reserved_word_index(&self, s: StrRef) -> Option<u8> {
        match s {
            StrRef::Short(r) => self.heap.string(r).reserved_index(),
            StrRef::Long(_) => None,
        }
    }

    pub(crate) fn resize_string_table(&mut self, new_size: usize) -> Result<(), RuntimeError> {
        let old_size = self.strings.size();
        self.charge(StringTable::footprint_for(old_size), StringTable::footprint_for(new_size))?;
        self.strings.resize(&mut self.heap, new_size);
        trace!(target: "lume::intern", from = old_size, to = new_size, "resize");
        Ok(())
    }

    /// Interns the strings that must never be collected: the out-of-memory
    /// message, metamethod names and reserved words.
    pub(crate) fn init_fixed_strings(&mut self) -> Result<(), RuntimeError> {
        self.resize_string_table(MIN_STRTAB_SIZE)?;
        let msg = self.intern(b"not enough memory")?;
        self.fix_object(msg.gc_ref());
        self.memerrmsg = Some(msg);
        let mut names = Vec::with_capacity(crate::state::TagMethod::ALL.len());
        for tm in crate::state::TagMethod::ALL {
            let s = self.intern(tm.name().as_bytes())?;
            self.fix_object(s.gc_ref());
            names.push(s.gc_ref());
        }
        self.tm_names = names;
        for (i, word) in RESERVED_WORDS.iter().enumerate() {
            let s = self.intern(word.as_bytes())?;
            self.fix_object(s.gc_ref());
            self.heap.string(s.gc_ref()).set_reserved_index(i as u8 + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        let mut rt = Runtime::new().unwrap();
        rt.gc_stop();
        rt
    }

    #[test]
    fn reserved_words_carry_their_index() {
        let mut rt = runtime();
        for (i, word) in RESERVED_WORDS.iter().enumerate() {
            let s = rt.new_string(word.as_bytes()).unwrap();
            assert_eq!(rt.reserved_word_index(s), Some(i as u8 + 1), "{word}");
        }
        let plain = rt.new_string(b"print").unwrap();
        assert_eq!(rt.reserved_word_index(plain), None);
        let long = rt.new_long_string(b"while").unwrap();
        assert_eq!(rt.reserved_word_index(long), None);
    }

    #[test]
    fn bucket_array_doubles_with_load() {
        let mut rt = runtime();
        let (len, size) = rt.interner_stats();
        assert_eq!(size, MIN_STRTAB_SIZE);
        let keep: Vec<StrRef> = (0..300).map(|i| rt.new_string(format!("s{i}").as_bytes()).unwrap()).collect();
        let (grown, size) = rt.interner_stats();
        assert_eq!(grown, len + 300);
        assert!(size.is_power_of_two() && size >= grown);
        for (i, s) in keep.iter().enumerate() {
            assert_eq!(rt.new_string(format!("s{i}").as_bytes()).unwrap(), *s);
        }
    }

    #[test]
    fn boundary_length_decides_interning() {
        let mut rt = runtime();
        let short = vec![b'a'; MAX_SHORT_LEN];
        let long = vec![b'a'; MAX_SHORT_LEN + 1];
        assert!(rt.new_string(&short).unwrap().is_short());
        assert!(!rt.new_string(&long).unwrap().is_short());
        // empty strings are short too
        let empty = rt.new_string(b"").unwrap();
        assert_eq!(rt.new_string(b"").unwrap(), empty);
    }

    #[test]
    fn interning_over_long_input_makes_a_long_string() {
        let mut rt = runtime();
        let long = vec![b'q'; MAX_SHORT_LEN + 1];
        let a = rt.intern(&long).unwrap();
        let b = rt.intern(&long).unwrap();
        assert!(!a.is_short());
        assert_ne!(a, b);
        assert!(rt.string_eq(a, b));
        assert!(rt.intern(&long[..MAX_SHORT_LEN]).unwrap().is_short());
    }

    #[test]
    fn long_string_hash_depends_on_content_only() {
        let mut rt = runtime();
        let text = "z".repeat(200);
        let a = rt.new_string(text.as_bytes()).unwrap();
        let b = rt.new_string(text.as_bytes()).unwrap();
        assert_ne!(a, b);
        assert_eq!(rt.string_hash(a), rt.string_hash(b));
        // cached after the first computation
        assert_eq!(rt.string_hash(a), rt.string_hash(a));
    }

    #[test]
    fn fixed_strings_survive_collection() {
        let mut rt = Runtime::new().unwrap();
        rt.full_gc().unwrap();
        rt.full_gc().unwrap();
        let msg = rt.memory_error_message().unwrap();
        assert_eq!(rt.string_bytes(msg), b"not enough memory");
        let kw = rt.new_string(b"function").unwrap();
        assert_eq!(rt.reserved_word_index(kw), Some(9));
    }

    #[test]
    fn empty_table_finds_nothing() {
        let heap = Heap::new();
        let table = StringTable::new();
        assert!(table.is_empty());
        assert_eq!(table.find(&heap, b"x", 1), None);
    }
}
