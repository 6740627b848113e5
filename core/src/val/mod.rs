//! Tagged values: the uniform representation every slot, constant, table
//! entry and upvalue uses.

mod tag;
mod value;

#[cfg(test)]
mod value_test;

pub use tag::{BaseKind, NUM_VALUE_KINDS, Tag};
pub use value::{Function, Number, StrRef, Value};
