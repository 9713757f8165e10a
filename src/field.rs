//! Field tokenizer and per-type value parsers.
//!
//! Everything here is pure and re-entrant: the sampler, the chunk planner and
//! the scanner all read fields through [`read_record`] / [`read_field`] and
//! type them through [`parse_field`], so a value that is accepted during
//! detection is accepted the same way during the full scan.

use memchr::{memchr, memchr2, memchr3};
use serde::{Deserialize, Serialize};

use crate::types::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuoteRule {
    /// `"a""b"`: embedded quotes are doubled.
    Doubled,
    /// `"a\"b"`: embedded quotes are backslash-escaped.
    Escaped,
    /// Quotes inside a quoted field are literal; the field closes at a quote
    /// followed by a separator or line end.
    Lenient,
    /// Quote characters carry no meaning.
    None,
}

impl QuoteRule {
    pub const TRIAL_ORDER: [QuoteRule; 4] = [
        QuoteRule::Doubled,
        QuoteRule::Escaped,
        QuoteRule::Lenient,
        QuoteRule::None,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    pub sep: u8,
    pub quote: u8,
    pub quote_rule: QuoteRule,
    pub dec: u8,
    pub strip_white: bool,
}

impl Dialect {
    fn is_blank(&self, byte: u8) -> bool {
        byte == b' ' && self.sep != b' ' || byte == b'\t' && self.sep != b'\t'
    }

    fn quoting(&self) -> bool {
        self.quote_rule != QuoteRule::None
    }
}

/// Position of a field's content within the input, quotes and stripped
/// whitespace excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawField {
    pub start: usize,
    pub end: usize,
    pub quoted: bool,
    /// Content holds escape sequences that must be undone before use.
    pub escaped: bool,
    /// Whitespace surrounded the value (stripped or not).
    pub padded: bool,
}

impl RawField {
    pub fn content<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn view<'a>(&self, buf: &'a [u8]) -> FieldView<'a> {
        FieldView {
            bytes: self.content(buf),
            quoted: self.quoted,
            padded: self.padded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Sep,
    Eol,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    UnterminatedQuote,
    TextAfterQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub offset: usize,
}

impl FieldError {
    pub fn describe(&self) -> &'static str {
        match self.kind {
            FieldErrorKind::UnterminatedQuote => "quoted field is never closed",
            FieldErrorKind::TextAfterQuote => "unexpected text after closing quote",
        }
    }
}

/// Returns the length of the line terminator at `pos`, if any.
pub fn eol_len(buf: &[u8], pos: usize) -> Option<usize> {
    match buf.get(pos) {
        Some(b'\n') => Some(1),
        Some(b'\r') if buf.get(pos + 1) == Some(&b'\n') => Some(2),
        Some(b'\r') => Some(1),
        _ => None,
    }
}

/// Position just past the next line terminator at or after `pos`, ignoring
/// quoting.
pub fn next_line_start(buf: &[u8], pos: usize) -> Option<usize> {
    let found = memchr2(b'\n', b'\r', buf.get(pos..)?)?;
    let at = pos + found;
    Some(at + eol_len(buf, at).unwrap_or(1))
}

fn after_terminator(buf: &[u8], pos: usize, dialect: &Dialect) -> (usize, Terminator) {
    if pos >= buf.len() {
        return (pos, Terminator::Eof);
    }
    if let Some(len) = eol_len(buf, pos) {
        return (pos + len, Terminator::Eol);
    }
    debug_assert_eq!(buf[pos], dialect.sep);
    let mut next = pos + 1;
    if dialect.sep == b' ' {
        while next < buf.len() && buf[next] == b' ' {
            next += 1;
        }
        if next >= buf.len() {
            return (next, Terminator::Eof);
        }
        if let Some(len) = eol_len(buf, next) {
            return (next + len, Terminator::Eol);
        }
    }
    (next, Terminator::Sep)
}

/// Reads one field starting at `pos`. Returns the field, the position where
/// the next field (or record) begins and what ended this one.
pub fn read_field(
    buf: &[u8],
    pos: usize,
    dialect: &Dialect,
) -> Result<(RawField, usize, Terminator), FieldError> {
    let len = buf.len();
    let mut lead = pos;
    while lead < len && dialect.is_blank(buf[lead]) {
        lead += 1;
    }

    if dialect.quoting() && lead < len && buf[lead] == dialect.quote {
        return read_quoted_field(buf, pos, lead, dialect);
    }

    let stop = match memchr3(dialect.sep, b'\n', b'\r', &buf[pos..]) {
        Some(found) => pos + found,
        None => len,
    };
    let mut start = pos;
    let mut end = stop;
    let padded;
    if dialect.strip_white {
        start = lead.min(stop);
        while end > start && dialect.is_blank(buf[end - 1]) {
            end -= 1;
        }
        padded = start > pos || end < stop;
    } else {
        padded = (end > start && dialect.is_blank(buf[start]))
            || (end > start && dialect.is_blank(buf[end - 1]));
    }
    let (next, terminator) = after_terminator(buf, stop, dialect);
    Ok((
        RawField {
            start,
            end,
            quoted: false,
            escaped: false,
            padded,
        },
        next,
        terminator,
    ))
}

fn read_quoted_field(
    buf: &[u8],
    pos: usize,
    lead: usize,
    dialect: &Dialect,
) -> Result<(RawField, usize, Terminator), FieldError> {
    let len = buf.len();
    let quote = dialect.quote;
    let content_start = lead + 1;
    let unterminated = FieldError {
        kind: FieldErrorKind::UnterminatedQuote,
        offset: lead,
    };
    let mut escaped = false;
    let mut cursor = content_start;

    let close = loop {
        match dialect.quote_rule {
            QuoteRule::Doubled => {
                let at = cursor + memchr(quote, &buf[cursor..]).ok_or(unterminated)?;
                if buf.get(at + 1) == Some(&quote) {
                    escaped = true;
                    cursor = at + 2;
                    continue;
                }
                break at;
            }
            QuoteRule::Escaped => {
                let at = cursor + memchr2(quote, b'\\', &buf[cursor..]).ok_or(unterminated)?;
                if buf[at] == b'\\' {
                    if at + 1 >= len {
                        return Err(unterminated);
                    }
                    escaped = true;
                    cursor = at + 2;
                    continue;
                }
                break at;
            }
            QuoteRule::Lenient => {
                let at = cursor + memchr(quote, &buf[cursor..]).ok_or(unterminated)?;
                let mut ahead = at + 1;
                while ahead < len && dialect.is_blank(buf[ahead]) {
                    ahead += 1;
                }
                if ahead >= len || buf[ahead] == dialect.sep || eol_len(buf, ahead).is_some() {
                    break at;
                }
                cursor = at + 1;
            }
            QuoteRule::None => unreachable!("quoted fields require a quoting rule"),
        }
    };

    let mut after = close + 1;
    while after < len && dialect.is_blank(buf[after]) {
        after += 1;
    }
    if after < len && buf[after] != dialect.sep && eol_len(buf, after).is_none() {
        return Err(FieldError {
            kind: FieldErrorKind::TextAfterQuote,
            offset: after,
        });
    }
    let (next, terminator) = after_terminator(buf, after, dialect);
    Ok((
        RawField {
            start: content_start,
            end: close,
            quoted: true,
            escaped,
            padded: lead > pos || after > close + 1,
        },
        next,
        terminator,
    ))
}

/// Reads a full record starting at `pos` into `fields` (cleared first) and
/// returns the position of the next record.
pub fn read_record(
    buf: &[u8],
    pos: usize,
    dialect: &Dialect,
    fields: &mut Vec<RawField>,
) -> Result<usize, FieldError> {
    fields.clear();
    let mut cursor = pos;
    if dialect.sep == b' ' {
        while cursor < buf.len() && buf[cursor] == b' ' {
            cursor += 1;
        }
    }
    loop {
        let (field, next, terminator) = read_field(buf, cursor, dialect)?;
        fields.push(field);
        cursor = next;
        if terminator != Terminator::Sep {
            return Ok(cursor);
        }
    }
}

/// A record made of a single empty, unquoted field.
pub fn is_blank_record(fields: &[RawField]) -> bool {
    fields.len() == 1 && !fields[0].quoted && fields[0].is_empty()
}

/// Undoes the escaping of a quoted field's content.
pub fn unescape_into(content: &[u8], quote: u8, rule: QuoteRule, out: &mut Vec<u8>) {
    let mut idx = 0;
    while idx < content.len() {
        let byte = content[idx];
        match rule {
            QuoteRule::Doubled if byte == quote && content.get(idx + 1) == Some(&quote) => {
                out.push(quote);
                idx += 2;
            }
            QuoteRule::Escaped if byte == b'\\' => match content.get(idx + 1) {
                Some(&next) if next == quote || next == b'\\' => {
                    out.push(next);
                    idx += 2;
                }
                _ => {
                    out.push(byte);
                    idx += 1;
                }
            },
            _ => {
                out.push(byte);
                idx += 1;
            }
        }
    }
}

/// Field content as seen by the value parsers.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    pub bytes: &'a [u8],
    pub quoted: bool,
    pub padded: bool,
}

impl<'a> FieldView<'a> {
    pub fn plain(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            quoted: false,
            padded: false,
        }
    }

    fn trimmed(&self) -> &'a [u8] {
        self.bytes.trim_ascii()
    }
}

/// A successfully parsed value, ready to be staged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parsed {
    Na,
    Bool(i8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// String content stays in the input; only its span is staged.
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldParse {
    Accepted(Parsed),
    Mismatch { required: ColumnType },
}

/// Parses `field` as `ty`. `is_na` reports whether the field matched a
/// configured NA string. A value the type cannot hold is answered with the
/// first later type that accepts it.
pub fn parse_field(ty: ColumnType, field: FieldView<'_>, dec: u8, is_na: bool) -> FieldParse {
    if is_na {
        return FieldParse::Accepted(Parsed::Na);
    }
    if let Some(parsed) = parse_value(ty, field, dec) {
        return FieldParse::Accepted(parsed);
    }
    FieldParse::Mismatch {
        required: required_type(ty, field, dec),
    }
}

/// First type strictly after `from` whose parser accepts `field`.
pub fn required_type(from: ColumnType, field: FieldView<'_>, dec: u8) -> ColumnType {
    let mut candidate = from.next();
    while let Some(ty) = candidate {
        if parse_value(ty, field, dec).is_some() {
            return ty;
        }
        candidate = ty.next();
    }
    ColumnType::String
}

pub fn parse_value(ty: ColumnType, field: FieldView<'_>, dec: u8) -> Option<Parsed> {
    match ty {
        ColumnType::Drop => Some(Parsed::Na),
        ColumnType::String => Some(Parsed::Text),
        _ => {
            let body = field.trimmed();
            if body.is_empty() {
                return Some(Parsed::Na);
            }
            match ty {
                ColumnType::Bool8 => parse_bool(body).map(Parsed::Bool),
                ColumnType::Int32Bare => {
                    if field.quoted || field.padded {
                        return None;
                    }
                    parse_int32(body).map(Parsed::Int32)
                }
                ColumnType::Int32Full => parse_int32(body).map(Parsed::Int32),
                ColumnType::Int64 => parse_int64(body).map(Parsed::Int64),
                ColumnType::Float32Hex => parse_float32_hex(body).map(Parsed::Float32),
                ColumnType::Float64 => parse_float64(body, dec).map(Parsed::Float64),
                ColumnType::Float64Ext => parse_float64_ext(body, dec).map(Parsed::Float64),
                ColumnType::Float64Hex => parse_float64_hex(body).map(Parsed::Float64),
                ColumnType::Drop | ColumnType::String => unreachable!(),
            }
        }
    }
}

pub fn parse_bool(body: &[u8]) -> Option<i8> {
    match body {
        b"true" | b"True" | b"TRUE" => Some(1),
        b"false" | b"False" | b"FALSE" => Some(0),
        _ => None,
    }
}

/// Sign and magnitude of a decimal integer literal.
fn parse_integer_magnitude(body: &[u8]) -> Option<(bool, u64)> {
    let (negative, digits) = match body.first()? {
        b'-' => (true, &body[1..]),
        b'+' => (false, &body[1..]),
        _ => (false, body),
    };
    if digits.is_empty() {
        return None;
    }
    let mut magnitude: u64 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return None;
        }
        magnitude = magnitude
            .checked_mul(10)?
            .checked_add(u64::from(byte - b'0'))?;
    }
    Some((negative, magnitude))
}

pub fn parse_int32(body: &[u8]) -> Option<i32> {
    let (negative, magnitude) = parse_integer_magnitude(body)?;
    if magnitude > i32::MAX as u64 {
        return None;
    }
    let value = magnitude as i32;
    Some(if negative { -value } else { value })
}

pub fn parse_int64(body: &[u8]) -> Option<i64> {
    let (negative, magnitude) = parse_integer_magnitude(body)?;
    if magnitude > i64::MAX as u64 {
        return None;
    }
    let value = magnitude as i64;
    Some(if negative { -value } else { value })
}

/// Checks the decimal float grammar and returns the literal rewritten with
/// `.` as decimal mark when needed.
fn decimal_literal(body: &[u8], dec: u8) -> Option<f64> {
    let mut idx = 0;
    if matches!(body.first(), Some(b'+' | b'-')) {
        idx = 1;
    }
    let mut mantissa_digits = 0;
    let mut seen_dec = false;
    while idx < body.len() {
        let byte = body[idx];
        if byte.is_ascii_digit() {
            mantissa_digits += 1;
        } else if byte == dec && !seen_dec {
            seen_dec = true;
        } else {
            break;
        }
        idx += 1;
    }
    if mantissa_digits == 0 {
        return None;
    }
    if idx < body.len() {
        if !matches!(body[idx], b'e' | b'E') {
            return None;
        }
        idx += 1;
        if matches!(body.get(idx), Some(b'+' | b'-')) {
            idx += 1;
        }
        let exponent_start = idx;
        while idx < body.len() && body[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == exponent_start || idx != body.len() {
            return None;
        }
    }

    if dec == b'.' || !seen_dec {
        return std::str::from_utf8(body).ok()?.parse::<f64>().ok();
    }
    let rewritten: Vec<u8> = body
        .iter()
        .map(|&byte| if byte == dec { b'.' } else { byte })
        .collect();
    std::str::from_utf8(&rewritten).ok()?.parse::<f64>().ok()
}

pub fn parse_float64(body: &[u8], dec: u8) -> Option<f64> {
    decimal_literal(body, dec).filter(|value| value.is_finite())
}

pub fn parse_float64_ext(body: &[u8], dec: u8) -> Option<f64> {
    if let Some(value) = decimal_literal(body, dec) {
        return Some(value);
    }
    let (negative, rest) = split_sign(body);
    let value = match rest {
        b"NaN" | b"nan" | b"NAN" | b"1.#IND" | b"1.#QNAN" | b"#DIV/0!" => f64::NAN,
        b"Inf" | b"inf" | b"INF" | b"Infinity" | b"infinity" | b"INFINITY" | b"1.#INF" => {
            f64::INFINITY
        }
        _ => return None,
    };
    Some(if negative { -value } else { value })
}

fn split_sign(body: &[u8]) -> (bool, &[u8]) {
    match body.first() {
        Some(b'-') => (true, &body[1..]),
        Some(b'+') => (false, &body[1..]),
        _ => (false, body),
    }
}

const MAX_HEX_DIGITS: usize = 15;

/// Parses `[+-]0x<hex>[.<hex>]p[+-]<dec>` into an exact value, provided the
/// significand fits in `mantissa_bits`.
fn hex_literal(body: &[u8], mantissa_bits: u32) -> Option<f64> {
    let (negative, rest) = split_sign(body);
    match rest {
        b"NaN" => return Some(f64::NAN),
        b"Infinity" => {
            return Some(if negative { f64::NEG_INFINITY } else { f64::INFINITY });
        }
        _ => {}
    }
    let digits = rest
        .strip_prefix(b"0x")
        .or_else(|| rest.strip_prefix(b"0X"))?;

    let mut idx = 0;
    let mut mantissa: u64 = 0;
    let mut significant = 0usize;
    let mut frac_digits: i32 = 0;
    let mut any_digit = false;
    let mut seen_point = false;
    while idx < digits.len() {
        let byte = digits[idx];
        if byte == b'.' && !seen_point {
            seen_point = true;
            idx += 1;
            continue;
        }
        let Some(nibble) = (byte as char).to_digit(16) else {
            break;
        };
        any_digit = true;
        if mantissa != 0 || nibble != 0 {
            significant += 1;
            if significant > MAX_HEX_DIGITS {
                return None;
            }
        }
        mantissa = (mantissa << 4) | u64::from(nibble);
        if seen_point {
            frac_digits += 1;
        }
        idx += 1;
    }
    if !any_digit || !matches!(digits.get(idx), Some(b'p' | b'P')) {
        return None;
    }
    let exponent = parse_exponent(&digits[idx + 1..])?;

    if mantissa == 0 {
        return Some(if negative { -0.0 } else { 0.0 });
    }
    let width = 64 - mantissa.leading_zeros() - mantissa.trailing_zeros();
    if width > mantissa_bits {
        return None;
    }
    let value = scale_by_pow2(mantissa as f64, exponent.saturating_sub(4 * frac_digits));
    if !value.is_finite() || value == 0.0 {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn parse_exponent(bytes: &[u8]) -> Option<i32> {
    let (negative, digits) = split_sign(bytes);
    if digits.is_empty() {
        return None;
    }
    let mut value: i32 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value.saturating_mul(10).saturating_add(i32::from(byte - b'0'));
    }
    Some(if negative { -value } else { value })
}

fn scale_by_pow2(mut value: f64, mut exponent: i32) -> f64 {
    while exponent > 1000 {
        value *= 2f64.powi(1000);
        exponent -= 1000;
    }
    while exponent < -1000 {
        value *= 2f64.powi(-1000);
        exponent += 1000;
    }
    value * 2f64.powi(exponent)
}

pub fn parse_float64_hex(body: &[u8]) -> Option<f64> {
    hex_literal(body, 53)
}

pub fn parse_float32_hex(body: &[u8]) -> Option<f32> {
    let value = hex_literal(body, 24)?;
    let narrowed = value as f32;
    if value.is_nan() {
        return Some(f32::NAN);
    }
    if f64::from(narrowed) != value {
        return None;
    }
    Some(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect(rule: QuoteRule) -> Dialect {
        Dialect {
            sep: b',',
            quote: b'"',
            quote_rule: rule,
            dec: b'.',
            strip_white: true,
        }
    }

    fn record(input: &str, rule: QuoteRule) -> Vec<String> {
        let mut fields = Vec::new();
        read_record(input.as_bytes(), 0, &dialect(rule), &mut fields).expect("record");
        fields
            .iter()
            .map(|f| {
                let mut out = Vec::new();
                if f.escaped {
                    unescape_into(f.content(input.as_bytes()), b'"', rule, &mut out);
                } else {
                    out.extend_from_slice(f.content(input.as_bytes()));
                }
                String::from_utf8(out).unwrap()
            })
            .collect()
    }

    #[test]
    fn quoted_separator_stays_in_field() {
        assert_eq!(record("\"a,b\",c\n", QuoteRule::Doubled), vec!["a,b", "c"]);
        assert_eq!(record("\"a,b\",c\n", QuoteRule::None), vec!["\"a", "b\"", "c"]);
    }

    #[test]
    fn each_rule_unescapes_its_own_convention() {
        assert_eq!(record("\"x\"\"y\",1", QuoteRule::Doubled), vec!["x\"y", "1"]);
        assert_eq!(record("\"x\\\"y\",1", QuoteRule::Escaped), vec!["x\"y", "1"]);
        assert_eq!(record("\"x\"y\",1", QuoteRule::Lenient), vec!["x\"y", "1"]);
    }

    #[test]
    fn quoted_field_may_span_lines() {
        let input = "\"line1\nline2\",2\nnext,3\n";
        let mut fields = Vec::new();
        let next = read_record(input.as_bytes(), 0, &dialect(QuoteRule::Doubled), &mut fields)
            .expect("record");
        assert_eq!(fields.len(), 2);
        assert_eq!(&input[next..], "next,3\n");
    }

    #[test]
    fn reports_tokenizer_failures() {
        let mut fields = Vec::new();
        let err = read_record(b"\"open,1\n", 0, &dialect(QuoteRule::Doubled), &mut fields)
            .unwrap_err();
        assert_eq!(err.kind, FieldErrorKind::UnterminatedQuote);
        let err = read_record(b"\"a\"b,1\n", 0, &dialect(QuoteRule::Doubled), &mut fields)
            .unwrap_err();
        assert_eq!(err.kind, FieldErrorKind::TextAfterQuote);
    }

    #[test]
    fn handles_crlf_and_lone_cr() {
        let input = b"a,b\r\nc,d\re,f";
        let mut fields = Vec::new();
        let d = dialect(QuoteRule::Doubled);
        let second = read_record(input, 0, &d, &mut fields).unwrap();
        assert_eq!(second, 5);
        let third = read_record(input, second, &d, &mut fields).unwrap();
        assert_eq!(third, 9);
        let end = read_record(input, third, &d, &mut fields).unwrap();
        assert_eq!(end, input.len());
        assert_eq!(fields[1].content(input), b"f");
    }

    #[test]
    fn space_separator_collapses_runs() {
        let d = Dialect {
            sep: b' ',
            ..dialect(QuoteRule::Doubled)
        };
        let mut fields = Vec::new();
        read_record(b"  a   b  c  \nz", 0, &d, &mut fields).unwrap();
        let values: Vec<&[u8]> = fields.iter().map(|f| f.content(b"  a   b  c  \nz")).collect();
        assert_eq!(values, vec![&b"a"[..], b"b", b"c"]);
    }

    #[test]
    fn strip_white_marks_padding() {
        let mut fields = Vec::new();
        read_record(b" 12 ,3", 0, &dialect(QuoteRule::Doubled), &mut fields).unwrap();
        assert!(fields[0].padded);
        assert!(!fields[1].padded);
        assert_eq!(fields[0].content(b" 12 ,3"), b"12");
    }

    #[test]
    fn integer_widths_and_na_boundaries() {
        assert_eq!(parse_int32(b"2147483647"), Some(i32::MAX));
        assert_eq!(parse_int32(b"-2147483647"), Some(-i32::MAX));
        assert_eq!(parse_int32(b"-2147483648"), None);
        assert_eq!(parse_int64(b"-2147483648"), Some(-2147483648));
        assert_eq!(parse_int64(b"-9223372036854775808"), None);
        assert_eq!(parse_int64(b"99999999999999999999"), None);
        assert_eq!(parse_int32(b"+7"), Some(7));
        assert_eq!(parse_int32(b"-"), None);
    }

    #[test]
    fn bare_ints_reject_quotes_and_spaces() {
        let quoted = FieldView {
            bytes: b"12",
            quoted: true,
            padded: false,
        };
        assert_eq!(parse_value(ColumnType::Int32Bare, quoted, b'.'), None);
        assert_eq!(
            parse_value(ColumnType::Int32Full, quoted, b'.'),
            Some(Parsed::Int32(12))
        );
        assert_eq!(required_type(ColumnType::Int32Bare, quoted, b'.'), ColumnType::Int32Full);
    }

    #[test]
    fn mismatch_names_first_accepting_type() {
        let cases: [(&[u8], ColumnType); 8] = [
            (b"1", ColumnType::Int32Bare),
            (b"3000000000", ColumnType::Int64),
            (b"1.5", ColumnType::Float64),
            (b"1e400", ColumnType::Float64Ext),
            (b"-Inf", ColumnType::Float64Ext),
            (b"0x1.8p+1", ColumnType::Float32Hex),
            (b"0x1.0000000001p+0", ColumnType::Float64Hex),
            (b"hello", ColumnType::String),
        ];
        for (input, expected) in cases {
            let got = required_type(ColumnType::Bool8, FieldView::plain(input), b'.');
            assert_eq!(got, expected, "{}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn floats_use_configured_decimal_mark() {
        assert_eq!(parse_float64(b"1,25", b','), Some(1.25));
        assert_eq!(parse_float64(b"1,25", b'.'), None);
        assert_eq!(parse_float64(b"-.5e2", b'.'), Some(-50.0));
        assert_eq!(parse_float64(b"1e", b'.'), None);
        assert_eq!(parse_float64(b"inf", b'.'), None);
    }

    #[test]
    fn extended_literals_are_not_na() {
        let nan = parse_float64_ext(b"NaN", b'.').unwrap();
        assert!(nan.is_nan());
        assert_ne!(nan.to_bits(), crate::types::NA_FLOAT64_BITS);
        assert_eq!(parse_float64_ext(b"-Infinity", b'.'), Some(f64::NEG_INFINITY));
    }

    #[test]
    fn hex_floats_are_exact() {
        assert_eq!(parse_float64_hex(b"0x1.8p+1"), Some(3.0));
        assert_eq!(parse_float64_hex(b"-0x1p-2"), Some(-0.25));
        assert_eq!(parse_float32_hex(b"0x1.8p+1"), Some(3.0f32));
        assert_eq!(parse_float32_hex(b"0x1.0000000001p+0"), None);
        assert_eq!(parse_float64_hex(b"0x1.8"), None);
    }

    #[test]
    fn empty_and_na_fields() {
        let empty = FieldView::plain(b"");
        assert_eq!(
            parse_field(ColumnType::Int32Bare, empty, b'.', false),
            FieldParse::Accepted(Parsed::Na)
        );
        assert_eq!(
            parse_field(ColumnType::String, empty, b'.', false),
            FieldParse::Accepted(Parsed::Text)
        );
        assert_eq!(
            parse_field(ColumnType::String, FieldView::plain(b"NA"), b'.', true),
            FieldParse::Accepted(Parsed::Na)
        );
    }
}
