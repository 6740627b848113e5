//! Moving prototypes between the heap and chunk images.

use anyhow::{Context, bail};
use tracing::debug;

use crate::obj::func::{LocVar, LuaClosure, Proto, UpvalDesc};
use crate::obj::{GcHeader, GcRef, ObjectBody};
use crate::state::{Runtime, RuntimeError, ThreadRef};
use crate::util::text::chunk_id;
use crate::val::{Function, Number, Tag, Value};

use super::{ChunkImage, ConstImage, LocVarImage, ProtoImage, UpvalImage, decode_chunk, encode_chunk};

impl Runtime {
    /// Image of `proto` and every prototype nested in it.
    pub fn proto_image(&self, proto: GcRef) -> anyhow::Result<ProtoImage> {
        let p = self.heap.proto(proto);
        let bytes_of = |s: Option<crate::val::StrRef>| s.map(|s| self.string_bytes(s).to_vec());
        let mut constants = Vec::with_capacity(p.constants.len());
        for (i, k) in p.constants.iter().enumerate() {
            constants.push(match k {
                Value::Nil => ConstImage::Nil,
                Value::Boolean(b) => ConstImage::Boolean(*b),
                Value::Number(Number::Float(f)) => ConstImage::Float(*f),
                Value::Number(Number::Integer(n)) => ConstImage::Integer(*n),
                Value::String(s) => ConstImage::Str(self.string_bytes(*s).to_vec()),
                other => bail!("constant {i} is a {} value and cannot be dumped", other.type_name()),
            });
        }
        let mut protos = Vec::with_capacity(p.protos.len());
        for (i, child) in p.protos.iter().enumerate() {
            protos.push(
                self.proto_image(*child)
                    .with_context(|| format!("in nested function {i}"))?,
            );
        }
        Ok(ProtoImage {
            source: bytes_of(p.source),
            line_defined: p.line_defined,
            last_line_defined: p.last_line_defined,
            num_params: p.num_params,
            is_vararg: p.is_vararg,
            max_stack_size: p.max_stack_size,
            code: p.code.clone(),
            constants,
            upvalues: p
                .upvalues
                .iter()
                .map(|u| UpvalImage {
                    name: bytes_of(u.name),
                    in_stack: u.in_stack,
                    index: u.index,
                })
                .collect(),
            protos,
            line_info: p.line_info.clone(),
            loc_vars: p
                .loc_vars
                .iter()
                .map(|l| LocVarImage {
                    name: bytes_of(l.name),
                    start_pc: l.start_pc,
                    end_pc: l.end_pc,
                })
                .collect(),
        })
    }

    /// Serializes `proto` as a precompiled chunk.
    pub fn dump(&self, proto: GcRef, strip: bool) -> anyhow::Result<Vec<u8>> {
        let main = self.proto_image(proto)?;
        let num_upvalues = u8::try_from(main.upvalues.len()).context("too many upvalues in main function")?;
        encode_chunk(&ChunkImage { num_upvalues, main }, strip)
    }

    /// Rebuilds a chunk as a closure pushed on `th`'s stack, with every
    /// upvalue slot unbound. `name` is a source name (`=stdin`, `@file`) and
    /// only labels errors.
    ///
    /// The closure is on the stack before its prototype is filled in, so a
    /// collection (or an error) midway leaves nothing unreachable behind.
    pub fn undump(&mut self, th: ThreadRef, bytes: &[u8], name: &str) -> Result<GcRef, RuntimeError> {
        self.ensure_usable()?;
        let image = decode_chunk(bytes)
            .map_err(|e| RuntimeError::Syntax(format!("{}: bad binary format ({e:#})", chunk_id(name.as_bytes()))))?;
        self.check_gc()?;
        self.check_stack(th, 1)?;

        let proto_body = ObjectBody::Proto(Proto::new());
        let mut closure = LuaClosure {
            proto: GcRef::DANGLING,
            upvals: vec![None; image.num_upvalues as usize],
        };
        let proto_size = proto_body.footprint();
        let closure_size = size_of::<GcHeader>() + closure.footprint();
        // one charge for both, so no collection runs between the two links
        self.charge(0, proto_size + closure_size)?;
        let p = self.link_object(Tag::PROTO, proto_body, proto_size);
        closure.proto = p;
        let cl = self.link_object(Tag::LUA_CLOSURE, ObjectBody::LuaClosure(closure), closure_size);
        self.push(th, Value::Function(Function::Lua(cl)))?;

        self.materialize(p, &image.main)?;
        debug!(
            target: "lume::state",
            name,
            size = bytes.len(),
            functions = image.summary().functions.len(),
            "undump"
        );
        Ok(cl)
    }

    /// [`Runtime::undump`], then binds fresh upvalues and stores the globals
    /// table in the first one.
    pub fn load(&mut self, th: ThreadRef, bytes: &[u8], name: &str) -> Result<GcRef, RuntimeError> {
        let cl = self.undump(th, bytes, name)?;
        self.init_upvalues(cl)?;
        if let Some(uv) = self.closure_upvalue(cl, 0) {
            let globals = Value::Table(self.globals());
            self.set_upvalue_value(uv, globals);
        }
        Ok(cl)
    }

    /// Fills the empty prototype `p` from `img`. Every string or nested
    /// prototype is stored into `p` right after it is created.
    fn materialize(&mut self, p: GcRef, img: &ProtoImage) -> Result<(), RuntimeError> {
        {
            let proto = self.heap.proto_mut(p);
            proto.num_params = img.num_params;
            proto.is_vararg = img.is_vararg;
            proto.max_stack_size = img.max_stack_size;
            proto.line_defined = img.line_defined;
            proto.last_line_defined = img.last_line_defined;
            proto.code = img.code.clone();
            proto.constants = vec![Value::Nil; img.constants.len()];
            proto.upvalues = img
                .upvalues
                .iter()
                .map(|u| UpvalDesc {
                    name: None,
                    in_stack: u.in_stack,
                    index: u.index,
                })
                .collect();
            proto.line_info = img.line_info.clone();
            proto.loc_vars = img
                .loc_vars
                .iter()
                .map(|l| LocVar {
                    name: None,
                    start_pc: l.start_pc,
                    end_pc: l.end_pc,
                })
                .collect();
        }
        self.sync_object_charge(p)?;

        if let Some(src) = &img.source {
            let s = self.new_string(src)?;
            self.heap.proto_mut(p).source = Some(s);
            self.barrier_ref(p, s.gc_ref());
        }
        for (i, k) in img.constants.iter().enumerate() {
            let v = match k {
                ConstImage::Nil => Value::Nil,
                ConstImage::Boolean(b) => Value::Boolean(*b),
                ConstImage::Float(f) => Value::float(*f),
                ConstImage::Integer(n) => Value::integer(*n),
                ConstImage::Str(bytes) => Value::String(self.new_string(bytes)?),
            };
            self.heap.proto_mut(p).constants[i] = v;
            self.barrier(p, &v);
        }
        for (i, uv) in img.upvalues.iter().enumerate() {
            if let Some(name) = &uv.name {
                let s = self.new_string(name)?;
                self.heap.proto_mut(p).upvalues[i].name = Some(s);
                self.barrier_ref(p, s.gc_ref());
            }
        }
        for (i, var) in img.loc_vars.iter().enumerate() {
            if let Some(name) = &var.name {
                let s = self.new_string(name)?;
                self.heap.proto_mut(p).loc_vars[i].name = Some(s);
                self.barrier_ref(p, s.gc_ref());
            }
        }
        for child_img in &img.protos {
            let child = self.new_proto(Proto::new())?;
            self.heap.proto_mut(p).protos.push(child);
            self.barrier_ref(p, child);
            self.sync_object_charge(p)?;
            self.materialize(child, child_img)?;
        }
        debug_assert_eq!(self.heap.charged(p), self.heap.body(p).footprint());
        Ok(())
    }
}
