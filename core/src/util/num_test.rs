use super::num::*;
use super::text::{chunk_id, utf8_escape};

#[test]
fn ceil_log2_boundaries() {
    assert_eq!(ceil_log2(0), 0);
    assert_eq!(ceil_log2(1), 0);
    assert_eq!(ceil_log2(2), 1);
    assert_eq!(ceil_log2(3), 2);
    assert_eq!(ceil_log2(4), 2);
    assert_eq!(ceil_log2(5), 3);
    assert_eq!(ceil_log2(1 << 20), 20);
    assert_eq!(ceil_log2((1 << 20) + 1), 21);
}

#[test]
fn fb_encoding_rounds_up() {
    for x in 0..8u32 {
        assert_eq!(fb_to_int(int_to_fb(x)), x);
    }
    for x in [8u32, 15, 16, 17, 100, 1000, 65_535] {
        let back = fb_to_int(int_to_fb(x));
        assert!(back >= x, "{x} encoded to {back}");
    }
    assert_eq!(fb_to_int(int_to_fb(16)), 16);
}

#[test]
fn float_to_integer_modes() {
    assert_eq!(float_to_integer(3.0, FloatToInt::Exact), Some(3));
    assert_eq!(float_to_integer(3.5, FloatToInt::Exact), None);
    assert_eq!(float_to_integer(3.5, FloatToInt::Floor), Some(3));
    assert_eq!(float_to_integer(-3.5, FloatToInt::Floor), Some(-4));
    assert_eq!(float_to_integer(3.2, FloatToInt::Ceil), Some(4));
    assert_eq!(float_to_integer(f64::NAN, FloatToInt::Exact), None);
    assert_eq!(float_to_integer(9.3e18, FloatToInt::Exact), None);
    assert_eq!(float_to_integer(-9_223_372_036_854_775_808.0, FloatToInt::Exact), Some(i64::MIN));
}

#[test]
fn parses_integers_and_floats() {
    assert_eq!(str_to_number(b"10"), Some(ParsedNumber::Integer(10)));
    assert_eq!(str_to_number(b"  -7 \n"), Some(ParsedNumber::Integer(-7)));
    assert_eq!(str_to_number(b"0x10"), Some(ParsedNumber::Integer(16)));
    assert_eq!(str_to_number(b"0xffffffffffffffff"), Some(ParsedNumber::Integer(-1)));
    assert_eq!(str_to_number(b"1.5"), Some(ParsedNumber::Float(1.5)));
    assert_eq!(str_to_number(b"1e2"), Some(ParsedNumber::Float(100.0)));
    assert_eq!(str_to_number(b"0x1p4"), Some(ParsedNumber::Float(16.0)));
    assert_eq!(str_to_number(b"0xA.8"), Some(ParsedNumber::Float(10.5)));
    assert_eq!(str_to_number(b"-9223372036854775808"), Some(ParsedNumber::Integer(i64::MIN)));
    assert_eq!(
        str_to_number(b"9223372036854775808"),
        Some(ParsedNumber::Float(9_223_372_036_854_775_808.0))
    );
}

#[test]
fn rejects_malformed_numerals() {
    for text in [&b""[..], b"   ", b"abc", b"1x", b"inf", b"nan", b"--1", b"0x", b"1e"] {
        assert_eq!(str_to_number(text), None, "{:?}", String::from_utf8_lossy(text));
    }
}

#[test]
fn formats_numbers() {
    let mut s = String::new();
    write_integer(&mut s, -42);
    assert_eq!(s, "-42");

    let cases = [(1.0, "1.0"), (0.1, "0.1"), (-2.5, "-2.5"), (f64::INFINITY, "inf"), (f64::NEG_INFINITY, "-inf")];
    for (f, expected) in cases {
        let mut s = String::new();
        write_float(&mut s, f);
        assert_eq!(s, expected);
    }
    let mut s = String::new();
    write_float(&mut s, f64::NAN);
    assert!(s.ends_with("nan"));
}

#[test]
fn utf8_escape_lengths() {
    assert_eq!(utf8_escape(0x41), b"A".to_vec());
    assert_eq!(utf8_escape(0xE9), "é".as_bytes().to_vec());
    assert_eq!(utf8_escape(0x20AC), "€".as_bytes().to_vec());
    assert_eq!(utf8_escape(0x1F600), "😀".as_bytes().to_vec());
    assert_eq!(utf8_escape(0x7FFF_FFFF).len(), 6);
}

#[test]
fn chunk_ids() {
    assert_eq!(chunk_id(b"=stdin"), "stdin");
    assert_eq!(chunk_id(b"@main.lume"), "main.lume");
    assert_eq!(chunk_id(b"return 1"), "[string \"return 1\"]");
    assert_eq!(chunk_id(b"x = 1\ny = 2"), "[string \"x = 1...\"]");

    let long_file = format!("@{}", "d/".repeat(40));
    let id = chunk_id(long_file.as_bytes());
    assert!(id.starts_with("..."));
    assert_eq!(id.len(), 59);

    let long_literal = format!("={}", "x".repeat(100));
    assert_eq!(chunk_id(long_literal.as_bytes()).len(), 59);
}
