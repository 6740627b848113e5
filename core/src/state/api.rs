//! Host-facing object API: tables, metatables, userdata and number/string
//! conversions. Values handed in must be reachable from a root (a stack, the
//! registry, or an object reachable from them): any allocating call may run
//! a collection step.

use std::mem::size_of;

use tracing::trace;

use crate::obj::table::{Table, normalize_key};
use crate::obj::userdata::Userdata;
use crate::obj::{GcHeader, GcRef, ObjectBody};
use crate::util::num::{ParsedNumber, str_to_number, write_float, write_integer};
use crate::val::{BaseKind, Number, StrRef, Tag, Value};

use super::{Runtime, RuntimeError};

impl Runtime {
    // tables

    pub fn new_table(&mut self) -> Result<GcRef, RuntimeError> {
        self.check_gc()?;
        self.alloc_object(Tag::TABLE, ObjectBody::Table(Table::new()))
    }

    /// Table with room for `narray` sequence entries and `nhash` other keys.
    pub fn new_table_with(&mut self, narray: usize, nhash: usize) -> Result<GcRef, RuntimeError> {
        let t = self.new_table()?;
        if narray > 0 || nhash > 0 {
            self.resize_table(t, narray, nhash)?;
        }
        Ok(t)
    }

    /// Resizes both parts of `t`. Entries that no longer fit the array part
    /// move to the hash part.
    pub fn resize_table(&mut self, t: GcRef, array_size: usize, hash_size: usize) -> Result<(), RuntimeError> {
        let predicted = size_of::<GcHeader>() + Table::footprint_for(array_size, hash_size);
        let charged = self.reserve_table(t, Some(predicted))?;
        self.heap
            .with_table_mut(t, |tab, heap| tab.resize(heap, array_size, hash_size));
        self.settle_table(t, charged)?;
        trace!(target: "lume::alloc", table = ?t, array_size, hash_size, "resize_table");
        Ok(())
    }

    /// Pre-flights a growth of `t` to `predicted` bytes. Returns the bytes
    /// charged for the table afterwards.
    fn reserve_table(&mut self, t: GcRef, predicted: Option<usize>) -> Result<usize, RuntimeError> {
        let old = self.heap.charged(t);
        match predicted {
            Some(new) if new > old => {
                self.charge(old, new)?;
                self.heap.recharge(t, new);
                Ok(new)
            }
            _ => Ok(old),
        }
    }

    /// Records the table's actual footprint after a write or resize.
    fn settle_table(&mut self, t: GcRef, charged: usize) -> Result<(), RuntimeError> {
        let actual = size_of::<GcHeader>() + self.heap.table(t).footprint();
        if actual != charged {
            self.charge(charged, actual)?;
            self.heap.recharge(t, actual);
        }
        Ok(())
    }

    /// Raw read; missing keys read as nil.
    pub fn table_get(&self, t: GcRef, key: &Value) -> Value {
        self.heap.table(t).get(&self.heap, key)
    }

    pub fn table_get_int(&self, t: GcRef, i: i64) -> Value {
        self.heap.table(t).get_int(&self.heap, i)
    }

    /// Raw read with a string key.
    pub fn table_get_str(&mut self, t: GcRef, name: &str) -> Result<Value, RuntimeError> {
        let key = self.str_value(name)?;
        Ok(self.table_get(t, &key))
    }

    /// Raw write. A nil value removes the key; nil and NaN keys are rejected.
    pub fn table_set(&mut self, t: GcRef, key: Value, value: Value) -> Result<(), RuntimeError> {
        self.check_liveness(&key);
        self.check_liveness(&value);
        let key = normalize_key(key)?;
        let growth = if value.is_nil() {
            None
        } else {
            self.heap
                .table(t)
                .growth_for(&self.heap, &key)
                .map(|size| size + size_of::<GcHeader>())
        };
        let charged = self.reserve_table(t, growth)?;
        self.heap
            .with_table_mut(t, |tab, heap| tab.set(heap, key, value))?;
        self.settle_table(t, charged)?;
        self.barrier_back(t, &key);
        self.barrier_back(t, &value);
        Ok(())
    }

    pub fn table_set_int(&mut self, t: GcRef, i: i64, value: Value) -> Result<(), RuntimeError> {
        self.table_set(t, Value::integer(i), value)
    }

    /// Raw write with a string key.
    pub fn table_set_str(&mut self, t: GcRef, name: &str, value: Value) -> Result<(), RuntimeError> {
        let key = self.str_value(name)?;
        self.table_set(t, key, value)
    }

    /// Entry after `key` in traversal order; nil starts the traversal.
    pub fn table_next(&self, t: GcRef, key: &Value) -> Result<Option<(Value, Value)>, RuntimeError> {
        Ok(self.heap.table(t).next(&self.heap, key)?)
    }

    /// A border of `t` (see [`Table::border`]).
    pub fn table_len(&self, t: GcRef) -> usize {
        self.heap.table(t).border(&self.heap)
    }

    /// Length without metamethods: bytes of a string, size of a userdata
    /// block, border of a table, zero otherwise.
    pub fn raw_len(&self, v: &Value) -> usize {
        match v {
            Value::String(s) => self.heap.str_bytes(*s).len(),
            Value::Userdata(u) => self.heap.userdata(*u).data().len(),
            Value::Table(t) => self.table_len(*t),
            _ => 0,
        }
    }

    /// Primitive equality: no metamethods, strings by content.
    pub fn raw_equal(&self, a: &Value, b: &Value) -> bool {
        self.heap.raw_equals(a, b)
    }

    // metatables

    /// Sets the metatable of `v`. Tables and full userdata carry their own;
    /// every other kind shares one per kind.
    pub fn set_metatable(&mut self, v: &Value, mt: Option<GcRef>) {
        match *v {
            Value::Table(t) => {
                self.heap.table_mut(t).metatable = mt;
                if let Some(m) = mt {
                    self.barrier_ref(t, m);
                    self.check_finalizer(t, mt);
                }
            }
            Value::Userdata(u) => {
                self.heap.userdata_mut(u).metatable = mt;
                if let Some(m) = mt {
                    self.barrier_ref(u, m);
                    self.check_finalizer(u, mt);
                }
            }
            ref other => self.type_metatables[other.base_kind() as usize] = mt,
        }
    }

    pub fn get_metatable(&self, v: &Value) -> Option<GcRef> {
        self.metatable_of(v)
    }

    /// Metatable shared by every value of `kind`. Tables and userdata are
    /// not affected: they carry their own.
    /// Kinds internal to the heap have no metatable slot and are ignored.
    pub fn set_type_metatable(&mut self, kind: BaseKind, mt: Option<GcRef>) {
        if let Some(slot) = self.type_metatables.get_mut(kind as usize) {
            *slot = mt;
        }
    }

    pub fn type_metatable(&self, kind: BaseKind) -> Option<GcRef> {
        self.type_metatables.get(kind as usize).copied().flatten()
    }

    // userdata

    /// Zero-filled block of `size` bytes owned by the collector.
    pub fn new_userdata(&mut self, size: usize) -> Result<GcRef, RuntimeError> {
        self.check_gc()?;
        self.alloc_object(Tag::USERDATA, ObjectBody::Userdata(Userdata::new(size)))
    }

    pub fn userdata_bytes(&self, u: GcRef) -> &[u8] {
        self.heap.userdata(u).data()
    }

    pub fn userdata_bytes_mut(&mut self, u: GcRef) -> &mut [u8] {
        self.heap.userdata_mut(u).data_mut()
    }

    pub fn set_user_value(&mut self, u: GcRef, v: Value) {
        self.check_liveness(&v);
        self.heap.userdata_mut(u).user_value = v;
        self.barrier(u, &v);
    }

    pub fn user_value(&self, u: GcRef) -> Value {
        self.heap.userdata(u).user_value()
    }

    // conversions

    /// Textual form of a number as a fresh or interned string.
    pub fn number_to_string(&mut self, n: Number) -> Result<StrRef, RuntimeError> {
        let mut text = String::new();
        match n {
            Number::Integer(i) => write_integer(&mut text, i),
            Number::Float(f) => write_float(&mut text, f),
        }
        self.new_string(text.as_bytes())
    }

    /// Numeric value of `v`; strings holding a numeral convert.
    pub fn to_number(&self, v: &Value) -> Option<Number> {
        match v {
            Value::Number(n) => Some(*n),
            Value::String(s) => match str_to_number(self.heap.str_bytes(*s))? {
                ParsedNumber::Integer(i) => Some(Number::Integer(i)),
                ParsedNumber::Float(f) => Some(Number::Float(f)),
            },
            _ => None,
        }
    }

    /// Re-records an object's footprint after its body grew or shrank in place.
    pub(crate) fn sync_object_charge(&mut self, r: GcRef) -> Result<(), RuntimeError> {
        let old = self.heap.charged(r);
        let new = self.heap.body(r).footprint();
        if new != old {
            self.charge(old, new)?;
            self.heap.recharge(r, new);
        }
        Ok(())
    }
}
