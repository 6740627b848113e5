use anyhow::{Result, ensure};

use crate::obj::string::MAX_SHORT_LEN;

use super::*;

/// Serializes a chunk. With `strip`, source names and debug tables are
/// left out.
pub fn encode_chunk(chunk: &ChunkImage, strip: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 + chunk.main.code.len() * 4);
    write_header(&mut out);
    out.push(chunk.num_upvalues);
    encode_function(&mut out, &chunk.main, None, strip)?;
    Ok(out)
}

fn write_header(out: &mut Vec<u8>) {
    out.extend_from_slice(SIGNATURE);
    out.push(VERSION);
    out.push(FORMAT);
    out.extend_from_slice(CHECK_DATA);
    out.extend_from_slice(&[INT_SIZE, SIZE_T_SIZE, INSTRUCTION_SIZE, INTEGER_SIZE, NUMBER_SIZE]);
    write_i64(out, CHECK_INTEGER);
    write_f64(out, CHECK_NUMBER);
}

fn encode_function(out: &mut Vec<u8>, p: &ProtoImage, parent_source: Option<&[u8]>, strip: bool) -> Result<()> {
    let source = p.source.as_deref().filter(|s| !strip && Some(*s) != parent_source);
    write_string(out, source);
    write_int(out, p.line_defined);
    write_int(out, p.last_line_defined);
    out.push(p.num_params);
    out.push(p.is_vararg);
    out.push(p.max_stack_size);

    write_count(out, p.code.len())?;
    for ins in &p.code {
        out.extend_from_slice(&ins.to_le_bytes());
    }

    write_count(out, p.constants.len())?;
    for k in &p.constants {
        match k {
            ConstImage::Nil => out.push(TAG_NIL),
            ConstImage::Boolean(b) => {
                out.push(TAG_BOOLEAN);
                out.push(*b as u8);
            }
            ConstImage::Float(f) => {
                out.push(TAG_FLOAT);
                write_f64(out, *f);
            }
            ConstImage::Integer(i) => {
                out.push(TAG_INTEGER);
                write_i64(out, *i);
            }
            ConstImage::Str(bytes) => {
                out.push(if bytes.len() <= MAX_SHORT_LEN { TAG_SHORT_STRING } else { TAG_LONG_STRING });
                write_string(out, Some(bytes));
            }
        }
    }

    write_count(out, p.upvalues.len())?;
    for uv in &p.upvalues {
        out.push(uv.in_stack as u8);
        out.push(uv.index);
    }

    write_count(out, p.protos.len())?;
    let own_source = p.source.as_deref();
    for child in &p.protos {
        encode_function(out, child, own_source, strip)?;
    }

    // debug tables
    if strip {
        write_int(out, 0);
        write_int(out, 0);
        write_int(out, 0);
        return Ok(());
    }
    write_count(out, p.line_info.len())?;
    for line in &p.line_info {
        write_int(out, *line);
    }
    write_count(out, p.loc_vars.len())?;
    for var in &p.loc_vars {
        write_string(out, var.name.as_deref());
        write_int(out, var.start_pc);
        write_int(out, var.end_pc);
    }
    write_count(out, p.upvalues.len())?;
    for uv in &p.upvalues {
        write_string(out, uv.name.as_deref());
    }
    Ok(())
}

fn write_count(out: &mut Vec<u8>, n: usize) -> Result<()> {
    ensure!(n <= i32::MAX as usize, "vector of {n} entries is too large for a chunk");
    write_int(out, n as i32);
    Ok(())
}

fn write_int(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_f64(out: &mut Vec<u8>, value: f64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Strings carry their size plus one (zero marks an absent string); sizes
/// of 255 or more are escaped with 0xFF and a full-width size.
fn write_string(out: &mut Vec<u8>, s: Option<&[u8]>) {
    let Some(bytes) = s else {
        out.push(0);
        return;
    };
    let size = bytes.len() + 1;
    if size < 0xFF {
        out.push(size as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&(size as u64).to_le_bytes());
    }
    out.extend_from_slice(bytes);
}
