//! Precompiled chunk format.
//!
//! A chunk is a fixed header describing the producer's type sizes followed by
//! the main function body; nested prototypes are written recursively. The
//! codec works on [`ChunkImage`], a heap-independent mirror of a prototype
//! tree, so chunks can be inspected and rewritten without a runtime.
//! [`crate::state::Runtime::undump`] turns an image into heap objects.

mod decode;
mod encode;
mod load;

#[cfg(test)]
mod chunk_test;

use serde::Serialize;

use crate::util::fast_map::{FastHashSet, fast_hash_set_with_capacity};

pub use decode::decode_chunk;
pub use encode::encode_chunk;

pub(crate) const SIGNATURE: &[u8; 4] = b"\x1bLua";
pub(crate) const VERSION: u8 = 0x53;
pub(crate) const FORMAT: u8 = 0;
/// Bytes that catch newline and end-of-file conversions.
pub(crate) const CHECK_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
pub(crate) const INT_SIZE: u8 = 4;
pub(crate) const SIZE_T_SIZE: u8 = 8;
pub(crate) const INSTRUCTION_SIZE: u8 = 4;
pub(crate) const INTEGER_SIZE: u8 = 8;
pub(crate) const NUMBER_SIZE: u8 = 8;
pub(crate) const CHECK_INTEGER: i64 = 0x5678;
pub(crate) const CHECK_NUMBER: f64 = 370.5;

// constant tags
pub(crate) const TAG_NIL: u8 = 0;
pub(crate) const TAG_BOOLEAN: u8 = 1;
pub(crate) const TAG_FLOAT: u8 = 3;
pub(crate) const TAG_INTEGER: u8 = 3 | (1 << 4);
pub(crate) const TAG_SHORT_STRING: u8 = 4;
pub(crate) const TAG_LONG_STRING: u8 = 4 | (1 << 4);

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstImage {
    Nil,
    Boolean(bool),
    Float(f64),
    Integer(i64),
    Str(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpvalImage {
    pub name: Option<Vec<u8>>,
    pub in_stack: bool,
    pub index: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocVarImage {
    pub name: Option<Vec<u8>>,
    pub start_pc: i32,
    pub end_pc: i32,
}

/// One function body of a chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtoImage {
    pub source: Option<Vec<u8>>,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub num_params: u8,
    pub is_vararg: u8,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<ConstImage>,
    pub upvalues: Vec<UpvalImage>,
    pub protos: Vec<ProtoImage>,
    pub line_info: Vec<i32>,
    pub loc_vars: Vec<LocVarImage>,
}

impl ProtoImage {
    /// True when any debug table or the source name is present.
    pub fn has_debug_info(&self) -> bool {
        self.source.is_some()
            || !self.line_info.is_empty()
            || !self.loc_vars.is_empty()
            || self.upvalues.iter().any(|u| u.name.is_some())
    }

    /// Copy without source names and debug tables, nested functions included.
    pub fn stripped(&self) -> ProtoImage {
        ProtoImage {
            source: None,
            code: self.code.clone(),
            constants: self.constants.clone(),
            upvalues: self
                .upvalues
                .iter()
                .map(|u| UpvalImage {
                    name: None,
                    ..u.clone()
                })
                .collect(),
            protos: self.protos.iter().map(ProtoImage::stripped).collect(),
            line_info: Vec::new(),
            loc_vars: Vec::new(),
            ..*self
        }
    }
}

/// A decoded chunk: the main function and the upvalue count of its closure.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkImage {
    pub num_upvalues: u8,
    pub main: ProtoImage,
}

/// Per-function statistics of a chunk.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    /// `main`, `main/0`, `main/0/2`, ... by nesting position.
    pub path: String,
    pub source: Option<String>,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub instructions: usize,
    pub constants: usize,
    pub upvalues: usize,
    pub nested: usize,
    pub has_debug_info: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub num_upvalues: u8,
    pub functions: Vec<FunctionSummary>,
    pub total_instructions: usize,
    pub total_constants: usize,
    /// String constants with distinct contents, across all functions.
    pub distinct_strings: usize,
    pub stripped: bool,
}

impl ChunkImage {
    pub fn summary(&self) -> ChunkSummary {
        let mut functions = Vec::new();
        collect_summaries(&self.main, "main".to_string(), &mut functions);
        let mut strings = fast_hash_set_with_capacity(self.main.constants.len());
        collect_strings(&self.main, &mut strings);
        ChunkSummary {
            num_upvalues: self.num_upvalues,
            total_instructions: functions.iter().map(|f| f.instructions).sum(),
            total_constants: functions.iter().map(|f| f.constants).sum(),
            distinct_strings: strings.len(),
            stripped: functions.iter().all(|f| !f.has_debug_info),
            functions,
        }
    }
}

fn collect_summaries(p: &ProtoImage, path: String, out: &mut Vec<FunctionSummary>) {
    out.push(FunctionSummary {
        path: path.clone(),
        source: p.source.as_ref().map(|s| String::from_utf8_lossy(s).into_owned()),
        line_defined: p.line_defined,
        last_line_defined: p.last_line_defined,
        num_params: p.num_params,
        is_vararg: p.is_vararg != 0,
        max_stack_size: p.max_stack_size,
        instructions: p.code.len(),
        constants: p.constants.len(),
        upvalues: p.upvalues.len(),
        nested: p.protos.len(),
        has_debug_info: p.has_debug_info(),
    });
    for (i, child) in p.protos.iter().enumerate() {
        collect_summaries(child, format!("{path}/{i}"), out);
    }
}

fn collect_strings<'a>(p: &'a ProtoImage, out: &mut FastHashSet<&'a [u8]>) {
    for k in &p.constants {
        if let ConstImage::Str(bytes) = k {
            out.insert(bytes.as_slice());
        }
    }
    for child in &p.protos {
        collect_strings(child, out);
    }
}
