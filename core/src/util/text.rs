//! Byte-string helpers: UTF-8 escapes and human-readable chunk names.

const ID_SIZE: usize = 60;
const PREFIX: &str = "[string \"";
const SUFFIX: &str = "\"]";
const ELLIPSIS: &str = "...";

/// Encodes a code point (up to `0x7FFF_FFFF`) as a UTF-8 style byte
/// sequence of up to six bytes.
pub fn utf8_escape(mut x: u32) -> Vec<u8> {
    debug_assert!(x <= 0x7FFF_FFFF);
    if x < 0x80 {
        return vec![x as u8];
    }
    let mut tail = Vec::with_capacity(6);
    // max value that fits in the first byte
    let mut mfb: u32 = 0x3f;
    loop {
        tail.push(0x80 | (x & 0x3f) as u8);
        x >>= 6;
        mfb >>= 1;
        if x <= mfb {
            break;
        }
    }
    tail.push(((!mfb << 1) | x) as u8);
    tail.reverse();
    tail
}

/// Builds the short printable id of a chunk source name.
///
/// `=name` is shown literally, `@file` as a file name (keeping its tail when
/// too long), anything else as `[string "first line..."]`.
pub fn chunk_id(source: &[u8]) -> String {
    match source.first() {
        Some(b'=') => {
            let body = &source[1..];
            let n = body.len().min(ID_SIZE - 1);
            String::from_utf8_lossy(&body[..n]).into_owned()
        }
        Some(b'@') => {
            let body = &source[1..];
            if body.len() < ID_SIZE {
                String::from_utf8_lossy(body).into_owned()
            } else {
                let keep = ID_SIZE - ELLIPSIS.len() - 1;
                let mut out = String::from(ELLIPSIS);
                out.push_str(&String::from_utf8_lossy(&body[body.len() - keep..]));
                out
            }
        }
        _ => {
            let room = ID_SIZE - (PREFIX.len() + ELLIPSIS.len() + SUFFIX.len()) - 1;
            let newline = source.iter().position(|b| *b == b'\n');
            let mut out = String::from(PREFIX);
            if source.len() < room && newline.is_none() {
                out.push_str(&String::from_utf8_lossy(source));
            } else {
                let n = newline.unwrap_or(source.len()).min(room);
                out.push_str(&String::from_utf8_lossy(&source[..n]));
                out.push_str(ELLIPSIS);
            }
            out.push_str(SUFFIX);
            out
        }
    }
}
