use anyhow::{Context, Result, bail, ensure};

use super::*;

struct Reader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            bail!("truncated chunk");
        }
        let slice = &self.bytes[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn int(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Entry count of a vector whose entries take at least `min_entry` bytes.
    fn count(&mut self, min_entry: usize, what: &str) -> Result<usize> {
        let n = self.int()?;
        ensure!(n >= 0, "negative {what} count");
        let n = n as usize;
        ensure!(n.saturating_mul(min_entry) <= self.remaining(), "truncated chunk");
        Ok(n)
    }

    fn integer(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn number(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<Option<Vec<u8>>> {
        let mut size = self.byte()? as u64;
        if size == 0xFF {
            size = u64::from_le_bytes(self.array()?);
        }
        if size == 0 {
            return Ok(None);
        }
        let len = usize::try_from(size - 1).context("string constant too large")?;
        Ok(Some(self.take(len)?.to_vec()))
    }
}

/// Parses a chunk produced by [`super::encode_chunk`] (or any producer using
/// the same header). Fails on a foreign header, truncation or trailing bytes.
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkImage> {
    let mut r = Reader { bytes, cursor: 0 };
    check_header(&mut r)?;
    let num_upvalues = r.byte()?;
    let main = decode_function(&mut r, None, 0).context("bad function body")?;
    ensure!(
        main.upvalues.len() == num_upvalues as usize,
        "main function declares {} upvalues but its closure has {}",
        main.upvalues.len(),
        num_upvalues
    );
    ensure!(r.remaining() == 0, "extra data at end of chunk");
    Ok(ChunkImage { num_upvalues, main })
}

fn check_header(r: &mut Reader<'_>) -> Result<()> {
    ensure!(r.take(SIGNATURE.len())? == SIGNATURE, "not a precompiled chunk");
    ensure!(r.byte()? == VERSION, "version mismatch");
    ensure!(r.byte()? == FORMAT, "format mismatch");
    ensure!(r.take(CHECK_DATA.len())? == CHECK_DATA, "corrupted chunk");
    for (expected, what) in [
        (INT_SIZE, "int"),
        (SIZE_T_SIZE, "size_t"),
        (INSTRUCTION_SIZE, "Instruction"),
        (INTEGER_SIZE, "integer"),
        (NUMBER_SIZE, "number"),
    ] {
        ensure!(r.byte()? == expected, "{what} size mismatch");
    }
    ensure!(r.integer()? == CHECK_INTEGER, "endianness mismatch");
    ensure!(r.number()? == CHECK_NUMBER, "float format mismatch");
    Ok(())
}

/// Nesting beyond this is rejected instead of recursing further.
const MAX_NESTING: usize = 200;

fn decode_function(r: &mut Reader<'_>, parent_source: Option<&[u8]>, depth: usize) -> Result<ProtoImage> {
    ensure!(depth < MAX_NESTING, "functions nested too deeply");
    let source = r.string()?.or_else(|| parent_source.map(<[u8]>::to_vec));
    let line_defined = r.int()?;
    let last_line_defined = r.int()?;
    let num_params = r.byte()?;
    let is_vararg = r.byte()?;
    let max_stack_size = r.byte()?;

    let n = r.count(4, "instruction")?;
    let mut code = Vec::with_capacity(n);
    for _ in 0..n {
        code.push(u32::from_le_bytes(r.array()?));
    }

    let n = r.count(1, "constant")?;
    let mut constants = Vec::with_capacity(n);
    for i in 0..n {
        let k = match r.byte()? {
            TAG_NIL => ConstImage::Nil,
            TAG_BOOLEAN => ConstImage::Boolean(r.byte()? != 0),
            TAG_FLOAT => ConstImage::Float(r.number()?),
            TAG_INTEGER => ConstImage::Integer(r.integer()?),
            TAG_SHORT_STRING | TAG_LONG_STRING => {
                let s = r.string()?;
                ConstImage::Str(s.with_context(|| format!("constant {i} is a null string"))?)
            }
            other => bail!("constant {i} has unknown tag {other:#04x}"),
        };
        constants.push(k);
    }

    let n = r.count(2, "upvalue")?;
    let mut upvalues = Vec::with_capacity(n);
    for _ in 0..n {
        let in_stack = r.byte()? != 0;
        let index = r.byte()?;
        upvalues.push(UpvalImage {
            name: None,
            in_stack,
            index,
        });
    }

    let n = r.count(1, "nested function")?;
    let mut protos = Vec::with_capacity(n);
    for i in 0..n {
        let child = decode_function(r, source.as_deref(), depth + 1).with_context(|| format!("in nested function {i}"))?;
        protos.push(child);
    }

    let n = r.count(4, "line")?;
    let mut line_info = Vec::with_capacity(n);
    for _ in 0..n {
        line_info.push(r.int()?);
    }

    let n = r.count(9, "local variable")?;
    let mut loc_vars = Vec::with_capacity(n);
    for _ in 0..n {
        let name = r.string()?;
        let start_pc = r.int()?;
        let end_pc = r.int()?;
        loc_vars.push(LocVarImage { name, start_pc, end_pc });
    }

    let n = r.count(1, "upvalue name")?;
    ensure!(
        n == 0 || n == upvalues.len(),
        "{n} upvalue names for {} upvalues",
        upvalues.len()
    );
    for uv in upvalues.iter_mut().take(n) {
        uv.name = r.string()?;
    }

    Ok(ProtoImage {
        source,
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        constants,
        upvalues,
        protos,
        line_info,
        loc_vars,
    })
}
