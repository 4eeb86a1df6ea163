//! PDF object parser.
//!
//! Recursive descent over [`crate::lexer::token`]: direct objects via
//! [`parse_object`], and `N G obj ... endobj` bodies (including stream
//! data) via [`parse_indirect_object`].

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

/// Maximum nesting of arrays and dictionaries.
const MAX_DEPTH: usize = 128;

/// Decode escape sequences in a literal string body.
///
/// Handles `\n \r \t \b \f \( \) \\`, octal `\ddd` and line continuations.
///
/// ```
/// # use pades_oxide::parser::decode_literal_string;
/// assert_eq!(decode_literal_string(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 >= raw.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'(' | b')' | b'\\' => out.push(next),
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut value = (next - b'0') as u32;
                let mut digits = 1;
                while digits < 3 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            i += 1;
                            digits += 1;
                        },
                        _ => break,
                    }
                }
                out.push((value & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }
    out
}

/// Decode a hex string body; whitespace is ignored and an odd digit is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes.iter().copied().filter(|c| !c.is_ascii_whitespace()).collect();
    let mut out = Vec::with_capacity(digits.len().div_ceil(2));
    for pair in digits.chunks(2) {
        let hi = hex_value(pair[0])?;
        let lo = match pair.get(1) {
            Some(&c) => hex_value(c)?,
            None => 0,
        };
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::ParseError {
            offset: 0,
            reason: format!("invalid hex digit 0x{:02X}", c),
        }),
    }
}

fn nom_error(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Parse one direct object (no stream bodies).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_nested(input, 0)
}

fn parse_nested(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (rest, tok) = token(input)?;
    match tok {
        Token::Integer(i) => {
            // "id gen R" is a reference; otherwise a plain integer
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::Keyword(b"R"))) = token(after_gen) {
                    if i >= 0 && (0..=u16::MAX as i64).contains(&gen) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                    }
                }
            }
            Ok((rest, Object::Integer(i)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string(raw)))),
        Token::HexString(raw) => decode_hex(raw)
            .map(|bytes| (rest, Object::String(bytes)))
            .map_err(|_| nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::HexDigit))),
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::Keyword(b"true") => Ok((rest, Object::Boolean(true))),
        Token::Keyword(b"false") => Ok((rest, Object::Boolean(false))),
        Token::Keyword(b"null") => Ok((rest, Object::Null)),
        Token::ArrayStart => parse_array(rest, depth),
        Token::DictStart => parse_dictionary(rest, depth).map(|(r, d)| (r, Object::Dictionary(d))),
        _ => Err(nom_error(input, nom::error::ErrorKind::Tag)),
    }
}

fn parse_array(mut input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_nested(input, depth + 1)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8], depth: usize) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_nested(rest, depth + 1)?;
                // null-valued entries are equivalent to absent ones
                if !value.is_null() {
                    dict.insert(key, value);
                }
                input = rest;
            },
            _ => return Err(nom_error(input, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Resolves an indirect `/Length` while a stream body is parsed.
pub type LengthResolver<'r> = &'r dyn Fn(ObjectRef) -> Option<i64>;

/// Parse `id gen obj <object> [stream ... endstream] endobj` starting at `input`.
///
/// `offset` is only used for error messages. The stream length comes from
/// `/Length` (direct, or indirect through `resolve_length`); if it does not
/// land on `endstream` the body is scanned for the keyword instead.
pub fn parse_indirect_object(
    input: &[u8],
    offset: usize,
    resolve_length: LengthResolver<'_>,
) -> Result<(ObjectRef, Object)> {
    let err = |reason: &str| Error::ParseError {
        offset,
        reason: reason.to_string(),
    };

    let (rest, id) = match token(input) {
        Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
        _ => return Err(err("expected object number")),
    };
    let (rest, gen) = match token(rest) {
        Ok((rest, Token::Integer(gen))) if (0..=u16::MAX as i64).contains(&gen) => (rest, gen as u16),
        _ => return Err(err("expected generation number")),
    };
    let rest = match token(rest) {
        Ok((rest, Token::Keyword(b"obj"))) => rest,
        _ => return Err(err("expected 'obj' keyword")),
    };
    let obj_ref = ObjectRef::new(id, gen);

    let (rest, object) = parse_object(rest).map_err(|e| err(&format!("invalid object body: {:?}", e.map(|e| e.code))))?;

    let dict = match object {
        Object::Dictionary(dict) => dict,
        other => return Ok((obj_ref, other)),
    };
    let after_keyword = match token(rest) {
        Ok((after, Token::Keyword(b"stream"))) => after,
        _ => return Ok((obj_ref, Object::Dictionary(dict))),
    };

    let body = if after_keyword.starts_with(b"\r\n") {
        &after_keyword[2..]
    } else if after_keyword.starts_with(b"\n") || after_keyword.starts_with(b"\r") {
        &after_keyword[1..]
    } else {
        after_keyword
    };

    let declared = match dict.get("Length") {
        Some(Object::Integer(len)) => Some(*len),
        Some(Object::Reference(r)) => resolve_length(*r),
        _ => None,
    };
    let data = match declared.filter(|&len| len >= 0 && (len as usize) <= body.len()) {
        Some(len) if ends_at_endstream(&body[len as usize..]) => &body[..len as usize],
        _ => {
            log::debug!("stream {} has missing or wrong /Length, scanning for endstream", obj_ref);
            let end = find_keyword(body, b"endstream").ok_or_else(|| err("unterminated stream"))?;
            trim_eol(&body[..end])
        },
    };

    Ok((
        obj_ref,
        Object::Stream {
            dict,
            data: bytes::Bytes::copy_from_slice(data),
        },
    ))
}

fn ends_at_endstream(tail: &[u8]) -> bool {
    skip_ws(tail).starts_with(b"endstream")
}

fn trim_eol(data: &[u8]) -> &[u8] {
    if data.ends_with(b"\r\n") {
        &data[..data.len() - 2]
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        &data[..data.len() - 1]
    } else {
        data
    }
}

/// First occurrence of `keyword` in `haystack`.
pub fn find_keyword(haystack: &[u8], keyword: &[u8]) -> Option<usize> {
    haystack.windows(keyword.len()).position(|window| window == keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lengths(_: ObjectRef) -> Option<i64> {
        None
    }

    #[test]
    fn test_reference_vs_integers() {
        let (_, obj) = parse_object(b"[1 0 R 2 3]").unwrap();
        assert_eq!(
            obj,
            Object::Array(vec![
                Object::Reference(ObjectRef::new(1, 0)),
                Object::Integer(2),
                Object::Integer(3),
            ])
        );
    }

    #[test]
    fn test_nested_dictionary() {
        let (_, obj) =
            parse_object(b"<< /Type /Sig /ByteRange [0 10 20 30] /Prop << /Name /X >> /N null >>")
                .unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Type"), Some(&Object::name("Sig")));
        assert_eq!(dict.get("ByteRange").and_then(Object::as_array).map(Vec::len), Some(4));
        assert!(dict.get("Prop").and_then(Object::as_dict).is_some());
        assert!(!dict.contains_key("N"));
    }

    #[test]
    fn test_string_decoding() {
        let (_, obj) = parse_object(b"(Line\\nTwo \\(x\\))").unwrap();
        assert_eq!(obj, Object::String(b"Line\nTwo (x)".to_vec()));
        let (_, obj) = parse_object(b"<48 65 6C 6C 6F>").unwrap();
        assert_eq!(obj, Object::String(b"Hello".to_vec()));
        assert_eq!(decode_hex(b"ABC").unwrap(), vec![0xAB, 0xC0]);
    }

    #[test]
    fn test_indirect_stream_with_length() {
        let src = b"4 0 obj\n<< /Length 5 >>\nstream\r\nhello\nendstream\nendobj";
        let (r, obj) = parse_indirect_object(src, 0, &no_lengths).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"hello"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_indirect_stream_with_wrong_length() {
        let src = b"4 0 obj\n<< /Length 99 >>\nstream\nabc\nendstream\nendobj";
        let (_, obj) = parse_indirect_object(src, 0, &no_lengths).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_indirect_length_resolver() {
        let src = b"7 0 obj << /Length 8 0 R >> stream\nabcd\nendstream endobj";
        let resolver = |r: ObjectRef| if r.id == 8 { Some(4) } else { None };
        let (_, obj) = parse_indirect_object(src, 0, &resolver).unwrap();
        assert_eq!(obj.is_stream(), true);
    }

    #[test]
    fn test_missing_obj_keyword() {
        assert!(matches!(
            parse_indirect_object(b"1 0 << >>", 42, &no_lengths),
            Err(Error::ParseError { offset: 42, .. })
        ));
    }
}
