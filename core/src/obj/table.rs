//! Hybrid array/hash table.
//!
//! Integer keys `1..=array.len()` live in the array part. Everything else is
//! stored in a power-of-two node vector using chained scatter with Brent's
//! variation: a colliding node that is not in its main position is moved to
//! a free slot so the newcomer can take its place. Free slots are found by a
//! cursor that only walks downward; when it runs out the table is rehashed
//! and both parts are resized from a count of the live integer keys.

use std::fmt;
use std::mem::size_of;

use crate::util::num::{FloatToInt, ceil_log2, float_to_integer};
use crate::val::{Function, Number, StrRef, Value};

use super::GcRef;
use super::heap::Heap;

/// Largest `n` such that `2^n` array slots are considered.
const MAX_ABITS: usize = 31;
const MAX_ASIZE: usize = 1 << MAX_ABITS;
const MAX_HBITS: u32 = 30;

/// Key slot of a hash node.
#[derive(Debug, Clone, Copy, Default)]
pub enum NodeKey {
    #[default]
    Empty,
    Live(Value),
    /// Entry was removed; the key is kept only so traversal can continue
    /// past it. Never compared for lookups.
    Dead(Value),
}

impl NodeKey {
    #[inline]
    pub fn live(&self) -> Option<&Value> {
        match self {
            NodeKey::Live(k) => Some(k),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    pub key: NodeKey,
    pub value: Value,
    /// Offset to the next node of the collision chain (0 = end).
    next: i32,
}

/// Invalid key for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Nil => write!(f, "table index is nil"),
            KeyError::NaN => write!(f, "table index is NaN"),
        }
    }
}

impl std::error::Error for KeyError {}

/// The key handed to `next` is not present in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNextKey;

impl fmt::Display for InvalidNextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid key to 'next'")
    }
}

impl std::error::Error for InvalidNextKey {}

/// Normalizes a key for storage: floats with an integral value become
/// integers, so `t[1.0]` and `t[1]` name the same entry.
pub fn normalize_key(key: Value) -> Result<Value, KeyError> {
    match key {
        Value::Nil => Err(KeyError::Nil),
        Value::Number(Number::Float(f)) => {
            if f.is_nan() {
                Err(KeyError::NaN)
            } else if let Some(i) = float_to_integer(f, FloatToInt::Exact) {
                Ok(Value::integer(i))
            } else {
                Ok(key)
            }
        }
        _ => Ok(key),
    }
}

/// Hash of a non-integral float. Keys never reach here with an integral value.
fn float_hash(f: f64) -> u32 {
    let bits = f.to_bits();
    let folded = (bits ^ (bits >> 32)) as u32;
    folded ^ (folded >> 16)
}

pub struct Table {
    array: Vec<Value>,
    /// Length is zero or a power of two.
    node: Vec<Node>,
    /// Every node at or above this index is in use.
    last_free: usize,
    pub(crate) metatable: Option<GcRef>,
    /// Bit `e` set means metamethod `e` is known to be absent.
    pub(crate) tm_absent: u8,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            array: Vec::new(),
            node: Vec::new(),
            last_free: 0,
            metatable: None,
            tm_absent: !0,
        }
    }

    pub fn footprint(&self) -> usize {
        size_of::<Table>() + self.array.len() * size_of::<Value>() + self.node.len() * size_of::<Node>()
    }

    #[inline]
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Allocated node count (0 for the shared empty part).
    #[inline]
    pub fn node_len(&self) -> usize {
        self.node.len()
    }

    #[inline]
    pub fn metatable(&self) -> Option<GcRef> {
        self.metatable
    }

    #[inline]
    pub fn array(&self) -> &[Value] {
        &self.array
    }

    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.node
    }

    #[inline]
    pub(crate) fn array_mut(&mut self) -> &mut [Value] {
        &mut self.array
    }

    /// Removes the entry at node `i`, leaving a dead key behind.
    pub(crate) fn kill_node(&mut self, i: usize) {
        let n = &mut self.node[i];
        if let NodeKey::Live(k) = n.key {
            n.key = NodeKey::Dead(k);
        }
        n.value = Value::Nil;
    }

    /// Forgets cached metamethod absence after any write.
    #[inline]
    pub(crate) fn invalidate_tm_cache(&mut self) {
        self.tm_absent = 0;
    }

    // hashing

    #[inline]
    fn hash_pow2(&self, h: u64) -> usize {
        (h & (self.node.len() as u64 - 1)) as usize
    }

    #[inline]
    fn hash_mod(&self, h: u64) -> usize {
        (h % ((self.node.len() as u64 - 1) | 1)) as usize
    }

    /// Node index where `key` would ideally live. Requires a non-empty node part.
    fn main_position(&self, heap: &Heap, key: &Value) -> usize {
        debug_assert!(!self.node.is_empty());
        match key {
            Value::Number(Number::Integer(i)) => self.hash_pow2(*i as u64),
            Value::Number(Number::Float(f)) => self.hash_mod(float_hash(*f) as u64),
            Value::String(StrRef::Short(r)) => self.hash_pow2(heap.string(*r).short_hash() as u64),
            Value::String(StrRef::Long(r)) => self.hash_pow2(heap.string(*r).long_hash() as u64),
            Value::Boolean(b) => self.hash_pow2(*b as u64),
            Value::LightUserdata(p) => self.hash_mod(*p as u64),
            Value::Function(Function::Light(f)) => self.hash_mod(*f as usize as u64),
            Value::Table(r)
            | Value::Userdata(r)
            | Value::Thread(r)
            | Value::Function(Function::Lua(r))
            | Value::Function(Function::Native(r)) => self.hash_mod(r.index() as u64),
            Value::Nil => 0,
        }
    }

    #[inline]
    fn chain_next(&self, i: usize) -> Option<usize> {
        match self.node[i].next {
            0 => None,
            off => Some((i as isize + off as isize) as usize),
        }
    }

    /// Node holding a live `key`, if any.
    fn find_node(&self, heap: &Heap, key: &Value) -> Option<usize> {
        if self.node.is_empty() {
            return None;
        }
        let mut i = self.main_position(heap, key);
        loop {
            if let NodeKey::Live(k) = &self.node[i].key
                && key_matches(heap, k, key)
            {
                return Some(i);
            }
            i = self.chain_next(i)?;
        }
    }

    // reads

    pub fn get_int(&self, heap: &Heap, i: i64) -> Value {
        if i >= 1 && (i as u64) <= self.array.len() as u64 {
            return self.array[(i - 1) as usize];
        }
        self.find_node(heap, &Value::integer(i))
            .map_or(Value::Nil, |n| self.node[n].value)
    }

    /// Lookup with an interned short string key; identity comparison only.
    pub fn get_short_str(&self, heap: &Heap, key: GcRef) -> Value {
        if self.node.is_empty() {
            return Value::Nil;
        }
        let mut i = self.hash_pow2(heap.string(key).short_hash() as u64);
        loop {
            if let NodeKey::Live(Value::String(StrRef::Short(k))) = self.node[i].key
                && k == key
            {
                return self.node[i].value;
            }
            match self.chain_next(i) {
                Some(n) => i = n,
                None => return Value::Nil,
            }
        }
    }

    /// Raw read; absent keys (and `nil`/NaN keys) read as `nil`.
    pub fn get(&self, heap: &Heap, key: &Value) -> Value {
        match key {
            Value::Nil => Value::Nil,
            Value::Number(Number::Integer(i)) => self.get_int(heap, *i),
            Value::String(StrRef::Short(r)) => self.get_short_str(heap, *r),
            Value::Number(Number::Float(f)) => match float_to_integer(*f, FloatToInt::Exact) {
                Some(i) => self.get_int(heap, i),
                None if f.is_nan() => Value::Nil,
                None => self.find_node(heap, key).map_or(Value::Nil, |n| self.node[n].value),
            },
            _ => self.find_node(heap, key).map_or(Value::Nil, |n| self.node[n].value),
        }
    }

    // writes

    /// Raw write. Assigning `nil` removes the entry at once.
    pub fn set(&mut self, heap: &Heap, key: Value, value: Value) -> Result<(), KeyError> {
        let key = normalize_key(key)?;
        self.invalidate_tm_cache();
        if let Value::Number(Number::Integer(i)) = key
            && i >= 1
            && (i as u64) <= self.array.len() as u64
        {
            self.array[(i - 1) as usize] = value;
            return Ok(());
        }
        if let Some(n) = self.find_node(heap, &key) {
            if value.is_nil() {
                self.kill_node(n);
            } else {
                self.node[n].value = value;
            }
            return Ok(());
        }
        if value.is_nil() {
            return Ok(());
        }
        self.insert_new(heap, key, value);
        Ok(())
    }

    pub fn set_int(&mut self, heap: &Heap, i: i64, value: Value) {
        // integer keys are always valid
        let _ = self.set(heap, Value::integer(i), value);
    }

    fn free_position(&mut self) -> Option<usize> {
        while self.last_free > 0 {
            self.last_free -= 1;
            if matches!(self.node[self.last_free].key, NodeKey::Empty) {
                return Some(self.last_free);
            }
        }
        None
    }

    /// Inserts a key known to be absent from the table.
    fn insert_new(&mut self, heap: &Heap, key: Value, value: Value) {
        if self.node.is_empty() {
            self.rehash(heap, &key);
            return self.set_after_resize(heap, key, value);
        }
        let mut mp = self.main_position(heap, &key);
        if !self.node[mp].value.is_nil() {
            let Some(free) = self.free_position() else {
                self.rehash(heap, &key);
                return self.set_after_resize(heap, key, value);
            };
            let NodeKey::Live(colliding_key) = self.node[mp].key else {
                unreachable!("occupied node without a live key")
            };
            let mut other = self.main_position(heap, &colliding_key);
            if other != mp {
                // colliding node is out of its main position: move it away
                while let Some(n) = self.chain_next(other)
                    && n != mp
                {
                    other = n;
                }
                self.node[other].next = (free as isize - other as isize) as i32;
                self.node[free] = self.node[mp];
                if self.node[mp].next != 0 {
                    self.node[free].next += (mp as isize - free as isize) as i32;
                    self.node[mp].next = 0;
                }
                self.node[mp].value = Value::Nil;
            } else {
                // colliding node is in its main position: chain the new key in
                if self.node[mp].next != 0 {
                    self.node[free].next = (mp as isize + self.node[mp].next as isize - free as isize) as i32;
                } else {
                    debug_assert_eq!(self.node[free].next, 0);
                }
                self.node[mp].next = (free as isize - mp as isize) as i32;
                mp = free;
            }
        }
        self.node[mp].key = NodeKey::Live(key);
        self.node[mp].value = value;
    }

    fn set_after_resize(&mut self, heap: &Heap, key: Value, value: Value) {
        if let Value::Number(Number::Integer(i)) = key
            && i >= 1
            && (i as u64) <= self.array.len() as u64
        {
            self.array[(i - 1) as usize] = value;
            return;
        }
        self.insert_new(heap, key, value);
    }

    // resizing

    /// Sets the array part to `array_size` slots and the node part to at
    /// least `hash_size` nodes (rounded up to a power of two), moving entries
    /// between the parts as needed.
    pub fn resize(&mut self, heap: &Heap, array_size: usize, hash_size: usize) {
        let old_nodes = self.allocate_nodes(hash_size);
        let old_asize = self.array.len();
        if array_size > old_asize {
            self.array.resize(array_size, Value::Nil);
        } else if array_size < old_asize {
            let vanishing: Vec<Value> = self.array.drain(array_size..).collect();
            for (offset, v) in vanishing.into_iter().enumerate() {
                if !v.is_nil() {
                    let key = Value::integer((array_size + offset + 1) as i64);
                    // a rehash on the way may grow the array part again
                    self.set_after_resize(heap, key, v);
                }
            }
        }
        for n in old_nodes.into_iter().rev() {
            if let NodeKey::Live(k) = n.key
                && !n.value.is_nil()
            {
                self.set_after_resize(heap, k, n.value);
            }
        }
    }

    /// Replaces the node part with an empty one of the requested size and
    /// returns the old nodes.
    fn allocate_nodes(&mut self, size: usize) -> Vec<Node> {
        let new_nodes = if size == 0 {
            Vec::new()
        } else {
            let lsize = ceil_log2(size).min(MAX_HBITS);
            vec![Node::default(); 1usize << lsize]
        };
        self.last_free = new_nodes.len();
        std::mem::replace(&mut self.node, new_nodes)
    }

    fn rehash(&mut self, heap: &Heap, extra_key: &Value) {
        let (asize, hsize) = self.rehash_sizes(extra_key);
        self.resize(heap, asize, hsize);
    }

    /// Array and hash sizes a rehash would pick with `extra_key` added.
    fn rehash_sizes(&self, extra_key: &Value) -> (usize, usize) {
        let mut nums = [0usize; MAX_ABITS + 1];
        let mut na = self.count_array(&mut nums);
        let mut total = na;
        total += self.count_hash(&mut nums, &mut na);
        na += count_int(extra_key, &mut nums);
        total += 1;
        let (asize, na) = compute_sizes(&nums, na);
        (asize, total - na)
    }

    /// Footprint of a table whose parts hold `array_size` slots and
    /// `hash_size` nodes (before rounding).
    pub fn footprint_for(array_size: usize, hash_size: usize) -> usize {
        let nodes = if hash_size == 0 {
            0
        } else {
            1usize << ceil_log2(hash_size).min(MAX_HBITS)
        };
        size_of::<Table>() + array_size * size_of::<Value>() + nodes * size_of::<Node>()
    }

    /// Footprint after storing a non-nil value under `key`, when that store
    /// forces a rehash. `None` means the store fits in place.
    pub fn growth_for(&self, heap: &Heap, key: &Value) -> Option<usize> {
        let key = normalize_key(*key).ok()?;
        if let Value::Number(Number::Integer(i)) = key
            && i >= 1
            && (i as u64) <= self.array.len() as u64
        {
            return None;
        }
        if self.find_node(heap, &key).is_some() {
            return None;
        }
        if !self.node.is_empty() {
            let mp = self.main_position(heap, &key);
            if self.node[mp].value.is_nil()
                || self.node[..self.last_free].iter().any(|n| matches!(n.key, NodeKey::Empty))
            {
                return None;
            }
        }
        let (asize, hsize) = self.rehash_sizes(&key);
        Some(Self::footprint_for(asize, hsize))
    }

    /// Counts non-nil array slots per power-of-two slice.
    fn count_array(&self, nums: &mut [usize; MAX_ABITS + 1]) -> usize {
        let mut used = 0;
        let mut i = 1usize;
        let mut ttlg = 1usize;
        for slot in nums.iter_mut() {
            let mut lim = ttlg;
            if lim > self.array.len() {
                lim = self.array.len();
                if i > lim {
                    break;
                }
            }
            let mut lc = 0;
            while i <= lim {
                if !self.array[i - 1].is_nil() {
                    lc += 1;
                }
                i += 1;
            }
            *slot += lc;
            used += lc;
            ttlg = ttlg.saturating_mul(2);
        }
        used
    }

    fn count_hash(&self, nums: &mut [usize; MAX_ABITS + 1], na: &mut usize) -> usize {
        let mut total = 0;
        for n in &self.node {
            if let NodeKey::Live(k) = &n.key
                && !n.value.is_nil()
            {
                *na += count_int(k, nums);
                total += 1;
            }
        }
        total
    }

    // traversal

    /// Position right after `key` in traversal order.
    fn find_index(&self, heap: &Heap, key: &Value) -> Result<usize, InvalidNextKey> {
        if key.is_nil() {
            return Ok(0);
        }
        let key = normalize_key(*key).map_err(|_| InvalidNextKey)?;
        if let Value::Number(Number::Integer(i)) = key
            && i >= 1
            && (i as u64) <= self.array.len() as u64
        {
            return Ok(i as usize);
        }
        if self.node.is_empty() {
            return Err(InvalidNextKey);
        }
        let mut i = self.main_position(heap, &key);
        let mut dead_match = None;
        loop {
            match &self.node[i].key {
                NodeKey::Live(k) if key_matches(heap, k, &key) => {
                    return Ok(i + 1 + self.array.len());
                }
                // a key removed during traversal is still a valid cursor
                NodeKey::Dead(k) if dead_match.is_none() && k.raw_identical(&key) => {
                    dead_match = Some(i);
                }
                _ => {}
            }
            match self.chain_next(i) {
                Some(n) => i = n,
                None => break,
            }
        }
        dead_match
            .map(|i| i + 1 + self.array.len())
            .ok_or(InvalidNextKey)
    }

    /// Entry following `key` (or the first entry for `nil`).
    pub fn next(&self, heap: &Heap, key: &Value) -> Result<Option<(Value, Value)>, InvalidNextKey> {
        let mut i = self.find_index(heap, key)?;
        while i < self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((Value::integer(i as i64 + 1), self.array[i])));
            }
            i += 1;
        }
        i -= self.array.len();
        while i < self.node.len() {
            let n = &self.node[i];
            if let NodeKey::Live(k) = n.key
                && !n.value.is_nil()
            {
                return Ok(Some((k, n.value)));
            }
            i += 1;
        }
        Ok(None)
    }

    /// A border: some `n` with `t[n] ~= nil` and `t[n+1] == nil` (or 0 when
    /// `t[1]` is nil). Any border may be returned when the sequence has holes.
    pub fn border(&self, heap: &Heap) -> usize {
        let mut j = self.array.len();
        if j > 0 && self.array[j - 1].is_nil() {
            let mut i = 0;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.node.is_empty() {
            return j;
        }
        self.unbound_search(heap, j)
    }

    fn unbound_search(&self, heap: &Heap, start: usize) -> usize {
        let mut i = start;
        let mut j = start + 1;
        while !self.get_int(heap, j as i64).is_nil() {
            i = j;
            if j > (i64::MAX as usize) / 2 {
                // pathological table: linear scan
                let mut k = 1;
                while !self.get_int(heap, k as i64).is_nil() {
                    k += 1;
                }
                return k - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(heap, m as i64).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// Number of live entries in both parts.
    pub fn count_entries(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count()
            + self.node.iter().filter(|n| n.key.live().is_some() && !n.value.is_nil()).count()
    }
}

#[inline]
fn key_matches(heap: &Heap, stored: &Value, key: &Value) -> bool {
    match (stored, key) {
        (Value::Number(Number::Integer(a)), Value::Number(Number::Integer(b))) => a == b,
        (Value::Number(Number::Float(a)), Value::Number(Number::Float(b))) => a == b,
        (Value::Number(_), Value::Number(_)) => false,
        _ => heap.raw_equals(stored, key),
    }
}

fn count_int(key: &Value, nums: &mut [usize; MAX_ABITS + 1]) -> usize {
    match key {
        Value::Number(Number::Integer(k)) if *k > 0 && (*k as u64) <= MAX_ASIZE as u64 => {
            nums[ceil_log2(*k as usize) as usize] += 1;
            1
        }
        _ => 0,
    }
}

/// Picks the largest power of two `n` such that more than half of `1..=n`
/// is in use. Returns the array size and how many keys will live there.
fn compute_sizes(nums: &[usize; MAX_ABITS + 1], total_int: usize) -> (usize, usize) {
    let mut a = 0;
    let mut na = 0;
    let mut optimal = 0;
    let mut twotoi = 1usize;
    for &count in nums.iter() {
        if total_int <= twotoi / 2 {
            break;
        }
        if count > 0 {
            a += count;
            if a > twotoi / 2 {
                optimal = twotoi;
                na = a;
            }
        }
        twotoi = twotoi.saturating_mul(2);
    }
    (optimal, na)
}
