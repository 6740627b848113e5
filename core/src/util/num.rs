//! Numeric helpers shared by the table engine, the chunk codec and the
//! string conversions.

/// `ceil(log2(x))` for `x >= 1`; `0` for `x <= 1`.
#[inline]
pub fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        usize::BITS - (x - 1).leading_zeros()
    }
}

/// Encodes `x` as a "floating point byte" `(eeeeexxx)`, rounding up.
/// The value represented is `(1xxx) * 2^(eeeee - 1)` when `eeeee != 0`, else `xxx`.
pub fn int_to_fb(mut x: u32) -> u8 {
    let mut e: u32 = 0;
    if x < 8 {
        return x as u8;
    }
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    (((e + 1) << 3) | (x - 8)) as u8
}

/// Inverse of [`int_to_fb`].
#[inline]
pub fn fb_to_int(x: u8) -> u32 {
    let x = x as u32;
    if x < 8 { x } else { ((x & 7) + 8) << ((x >> 3) - 1) }
}

/// How a float is rounded when converted to an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatToInt {
    /// Only floats with an exact integral value convert.
    Exact,
    Floor,
    Ceil,
}

/// Converts a float to an `i64` under `mode`; `None` when out of range or inexact.
pub fn float_to_integer(f: f64, mode: FloatToInt) -> Option<i64> {
    let rounded = match mode {
        FloatToInt::Exact => {
            let fl = f.floor();
            if fl != f {
                return None;
            }
            fl
        }
        FloatToInt::Floor => f.floor(),
        FloatToInt::Ceil => f.ceil(),
    };
    // -2^63 is exact as f64; 2^63 is the first value out of range.
    if rounded >= -9_223_372_036_854_775_808.0 && rounded < 9_223_372_036_854_775_808.0 {
        Some(rounded as i64)
    } else {
        None
    }
}

/// Result of [`str_to_number`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedNumber {
    Integer(i64),
    Float(f64),
}

#[inline]
fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn trim_spaces(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|b| !is_space(*b)).unwrap_or(s.len());
    let end = s.iter().rposition(|b| !is_space(*b)).map_or(start, |i| i + 1);
    &s[start..end]
}

/// Parses a numeral the way the language reads them: decimal or `0x`
/// integers (hex wraps around), decimal or hexadecimal floats, with
/// surrounding whitespace allowed. Decimal integers that overflow become floats.
pub fn str_to_number(s: &[u8]) -> Option<ParsedNumber> {
    let s = trim_spaces(s);
    if s.is_empty() {
        return None;
    }
    if let Some(i) = str_to_int(s) {
        return Some(ParsedNumber::Integer(i));
    }
    str_to_float(s).map(ParsedNumber::Float)
}

fn str_to_int(s: &[u8]) -> Option<i64> {
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    if digits.len() > 2 && digits[0] == b'0' && (digits[1] | 0x20) == b'x' {
        let hex = &digits[2..];
        for &b in hex {
            let d = (b as char).to_digit(16)? as u64;
            acc = acc.wrapping_mul(16).wrapping_add(d);
        }
    } else {
        for &b in digits {
            if !b.is_ascii_digit() {
                return None;
            }
            let d = (b - b'0') as u64;
            // overflow falls through to the float reader
            if acc > (i64::MAX as u64) / 10 || (acc == (i64::MAX as u64) / 10 && d > (i64::MAX as u64) % 10 + neg as u64) {
                return None;
            }
            acc = acc * 10 + d;
        }
    }
    let value = acc as i64;
    Some(if neg { value.wrapping_neg() } else { value })
}

fn str_to_float(s: &[u8]) -> Option<f64> {
    // reject 'inf' and 'nan' spellings
    if s.iter().any(|b| *b == b'n' || *b == b'N') {
        return None;
    }
    let (neg, body) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let value = if body.len() > 1 && body[0] == b'0' && (body[1] | 0x20) == b'x' {
        hex_float(&body[2..])?
    } else {
        let text = std::str::from_utf8(body).ok()?;
        if text.starts_with(['+', '-']) {
            return None;
        }
        text.parse::<f64>().ok()?
    };
    Some(if neg { -value } else { value })
}

fn hex_float(s: &[u8]) -> Option<f64> {
    let mut mantissa = 0.0f64;
    let mut exp: i64 = 0;
    let mut any_digit = false;
    let mut seen_dot = false;
    let mut i = 0;
    while i < s.len() {
        let b = s[i];
        if b == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
        } else if let Some(d) = (b as char).to_digit(16) {
            mantissa = mantissa * 16.0 + d as f64;
            if seen_dot {
                exp -= 4;
            }
            any_digit = true;
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    if i < s.len() {
        if (s[i] | 0x20) != b'p' {
            return None;
        }
        let rest = std::str::from_utf8(&s[i + 1..]).ok()?;
        if rest.is_empty() {
            return None;
        }
        exp += rest.parse::<i64>().ok()?;
    }
    Some(mantissa * 2f64.powi(exp.clamp(i32::MIN as i64, i32::MAX as i64) as i32))
}

/// Appends the textual form of an integer.
pub fn write_integer(out: &mut String, i: i64) {
    let mut buf = itoa::Buffer::new();
    out.push_str(buf.format(i));
}

/// Appends the textual form of a float. Integral finite values keep a `.0`
/// suffix so they never read back as integers.
pub fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str(if f.is_sign_negative() { "-nan" } else { "nan" });
        return;
    }
    if f.is_infinite() {
        out.push_str(if f < 0.0 { "-inf" } else { "inf" });
        return;
    }
    let mut buf = ryu::Buffer::new();
    let text = buf.format_finite(f);
    out.push_str(text);
    if text.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        out.push_str(".0");
    }
}
