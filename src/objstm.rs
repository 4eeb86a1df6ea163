//! Object streams (`/Type /ObjStm`).
//!
//! The decoded stream starts with `N` pairs of `object-number offset`
//! followed by the objects themselves, offsets relative to `/First`.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Dict, DictExt, Object};
use crate::parser::parse_object;

/// A decoded object stream.
#[derive(Debug)]
pub struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    index: Vec<(u32, usize)>,
}

impl ObjectStream {
    /// Parse the header of an already decrypted and decoded object stream.
    pub fn parse(dict: &Dict, decoded: Vec<u8>) -> Result<Self> {
        if !dict.is_type("ObjStm") {
            return Err(Error::InvalidPdf("object stream without /Type /ObjStm".into()));
        }
        let count = dict.get_int("N").filter(|&n| n >= 0).ok_or_else(|| {
            Error::InvalidPdf("object stream without /N".into())
        })? as usize;
        let first = dict.get_int("First").filter(|&f| f >= 0).ok_or_else(|| {
            Error::InvalidPdf("object stream without /First".into())
        })? as usize;
        if first > decoded.len() {
            return Err(Error::InvalidPdf("object stream /First past end of data".into()));
        }

        let mut index = Vec::with_capacity(count);
        let mut input = &decoded[..first];
        for _ in 0..count {
            let (rest, id) = match token(input) {
                Ok((rest, Token::Integer(id))) if id >= 0 => (rest, id as u32),
                _ => break,
            };
            let (rest, offset) = match token(rest) {
                Ok((rest, Token::Integer(offset))) if offset >= 0 => (rest, offset as usize),
                _ => break,
            };
            index.push((id, offset));
            input = rest;
        }
        if index.len() != count {
            log::warn!("object stream header lists {} of {} objects", index.len(), count);
        }

        Ok(Self {
            data: decoded,
            first,
            index,
        })
    }

    /// Object at position `index`, checked against the expected object number.
    pub fn get(&self, index: u32, expected_id: u32) -> Result<Object> {
        let &(id, offset) = self
            .index
            .get(index as usize)
            .ok_or(Error::ObjectNotFound(expected_id, 0))?;
        if id != expected_id {
            return Err(Error::InvalidPdf(format!(
                "object stream slot {} holds object {}, expected {}",
                index, id, expected_id
            )));
        }
        let start = self.first + offset;
        let body = self.data.get(start..).ok_or(Error::ObjectNotFound(expected_id, 0))?;
        parse_object(body)
            .map(|(_, obj)| obj)
            .map_err(|_| Error::ParseError {
                offset: start,
                reason: format!("invalid object {} in object stream", expected_id),
            })
    }

    /// Number of objects listed in the header.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the header lists no objects.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objstm_dict(n: i64, first: i64) -> Dict {
        let mut dict = Dict::new();
        dict.insert("Type".into(), Object::name("ObjStm"));
        dict.insert("N".into(), Object::Integer(n));
        dict.insert("First".into(), Object::Integer(first));
        dict
    }

    #[test]
    fn test_objects_by_index() {
        let header = b"10 0 11 14 ";
        let body = b"<< /A 1 >>    [1 2 3]";
        let mut data = header.to_vec();
        data.extend_from_slice(body);
        let stream = ObjectStream::parse(&objstm_dict(2, header.len() as i64), data).unwrap();
        assert_eq!(stream.len(), 2);
        assert!(stream.get(0, 10).unwrap().as_dict().is_some());
        assert_eq!(stream.get(1, 11).unwrap().as_array().map(Vec::len), Some(3));
        assert!(stream.get(1, 12).is_err());
        assert!(stream.get(5, 10).is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let mut dict = objstm_dict(0, 0);
        dict.insert("Type".into(), Object::name("XRef"));
        assert!(ObjectStream::parse(&dict, Vec::new()).is_err());
    }
}
