use std::mem::size_of;

use crate::val::Value;

use super::GcRef;

/// Host-owned block of bytes with an optional metatable and one associated value.
#[derive(Debug)]
pub struct Userdata {
    pub(crate) metatable: Option<GcRef>,
    pub(crate) user_value: Value,
    data: Box<[u8]>,
}

impl Userdata {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            metatable: None,
            user_value: Value::Nil,
            data: vec![0; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn metatable(&self) -> Option<GcRef> {
        self.metatable
    }

    #[inline]
    pub fn user_value(&self) -> Value {
        self.user_value
    }

    pub fn footprint(&self) -> usize {
        size_of::<Userdata>() + self.data.len()
    }
}
