//! PDF tokenizer.
//!
//! Splits raw file bytes into the tokens the object parser and the
//! cross-reference reader need. Regular keywords (`obj`, `R`, `xref`,
//! `trailer`, `n`, `f`, ...) are returned as [`Token::Keyword`] so the
//! same tokenizer serves object bodies and classic xref tables.
//!
//! Whitespace (space, \t, \r, \n, \0, \f) and comments (% to EOL) are skipped.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, preceded, tuple},
    IResult,
};

/// Token types recognized by the lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),
    /// Real number (e.g., 3.14, -.5)
    Real(f64),
    /// Raw bytes between `(` and `)`, escapes still encoded
    LiteralString(&'a [u8]),
    /// Raw bytes between `<` and `>`, whitespace preserved
    HexString(&'a [u8]),
    /// Name with `#xx` escapes decoded
    Name(String),
    /// `[`
    ArrayStart,
    /// `]`
    ArrayEnd,
    /// `<<`
    DictStart,
    /// `>>`
    DictEnd,
    /// Any run of regular characters that is not a number
    Keyword(&'a [u8]),
}

fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip whitespace and comments. Never fails.
pub fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let (rest, _) = take_while::<_, _, nom::error::Error<&[u8]>>(is_whitespace)(input)
            .unwrap_or((input, &[][..]));
        input = rest;
        match comment(input) {
            Ok((rest, _)) => input = rest,
            Err(_) => return input,
        }
    }
}

fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = alt((
        recognize(tuple((opt(one_of("+-")), digit1, opt(tuple((char('.'), digit0)))))),
        recognize(tuple((opt(one_of("+-")), char('.'), digit1))),
    ))(input)?;

    // "12abc" is a keyword, not a number followed by garbage
    if rest.first().is_some_and(|&c| is_regular(c) && c != b'.') {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)));
    }

    let text = std::str::from_utf8(text).map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    let failure = || nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit));
    if text.contains('.') {
        text.parse::<f64>().map(|r| (rest, Token::Real(r))).map_err(|_| failure())
    } else {
        text.trim_start_matches('+')
            .parse::<i64>()
            .map(|i| (rest, Token::Integer(i)))
            .map_err(|_| failure())
    }
}

/// Balanced-parenthesis scan; escapes are skipped, not decoded.
fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;
    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof)))
}

fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    delimited(
        char('<'),
        map(
            take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c)),
            Token::HexString,
        ),
        char('>'),
    )(input)
}

/// Decode `#xx` escapes in a raw name.
///
/// ```
/// # use pades_oxide::lexer::decode_name;
/// assert_eq!(decode_name(b"A#20B"), "A B");
/// assert_eq!(decode_name(b"ETSI.CAdES.detached"), "ETSI.CAdES.detached");
/// ```
pub fn decode_name(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(char('/'), map(take_while(is_regular), |raw| Token::Name(decode_name(raw))))(input)
}

fn delimiter(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
}

fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    map(take_while1(is_regular), Token::Keyword)(input)
}

/// Parse a single token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((delimiter, name, number, literal_string, hex_string, keyword))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_and_reals() {
        assert_eq!(token(b"42 ").unwrap().1, Token::Integer(42));
        assert_eq!(token(b"-17").unwrap().1, Token::Integer(-17));
        assert_eq!(token(b"+3").unwrap().1, Token::Integer(3));
        assert_eq!(token(b"0.25").unwrap().1, Token::Real(0.25));
        assert_eq!(token(b"-.5").unwrap().1, Token::Real(-0.5));
        assert_eq!(token(b"4.").unwrap().1, Token::Real(4.0));
        assert_eq!(token(b".5]").unwrap(), (&b"]"[..], Token::Real(0.5)));
    }

    #[test]
    fn test_keywords() {
        assert_eq!(token(b"  obj").unwrap().1, Token::Keyword(b"obj"));
        assert_eq!(token(b"R>>").unwrap(), (&b">>"[..], Token::Keyword(b"R")));
        assert_eq!(token(b"trailer\n<<").unwrap().1, Token::Keyword(b"trailer"));
    }

    #[test]
    fn test_nested_literal_string() {
        let (rest, tok) = token(b"(a (nested\\) one)) tail").unwrap();
        assert_eq!(tok, Token::LiteralString(b"a (nested\\) one)"));
        assert_eq!(rest, b" tail");
    }

    #[test]
    fn test_hex_string_vs_dict() {
        assert_eq!(token(b"<4142>").unwrap().1, Token::HexString(b"4142"));
        assert_eq!(token(b"<< /A 1 >>").unwrap().1, Token::DictStart);
    }

    #[test]
    fn test_names_with_escapes() {
        assert_eq!(token(b"/Adobe.PPKLite").unwrap().1, Token::Name("Adobe.PPKLite".into()));
        assert_eq!(token(b"/A#20B/C").unwrap(), (&b"/C"[..], Token::Name("A B".into())));
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(token(b"% comment\n 7").unwrap().1, Token::Integer(7));
    }
}
