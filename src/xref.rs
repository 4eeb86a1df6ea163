//! Cross-reference loading.
//!
//! Follows the `startxref` → `/Prev` chain through classic tables, xref
//! streams and hybrid files (`/XRefStm`). Newer sections shadow older ones.
//! When the chain is unusable the file is rescanned
//! (see [`crate::xref_reconstruction`]).

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dict, DictExt, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{HashMap, HashSet};

/// Location of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Free or deleted object
    Free,
    /// Object stored directly at a byte offset
    InUse {
        /// Byte offset of `id gen obj`
        offset: usize,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the containing object stream
        stream_id: u32,
        /// Index within the object stream
        index: u32,
    },
}

/// Syntax of the newest cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefFormat {
    /// `xref` keyword table followed by `trailer`
    Table,
    /// `/Type /XRef` stream
    Stream,
}

/// Merged cross-reference information of a document.
#[derive(Debug, Clone)]
pub struct CrossReference {
    entries: HashMap<u32, XrefEntry>,
    /// Trailer dictionary of the newest section (for streams: the stream dictionary)
    pub trailer: Dict,
    /// Offset the final `startxref` points to
    pub startxref: usize,
    /// Format of the newest section
    pub format: XrefFormat,
    /// Whether the table had to be rebuilt by scanning
    pub reconstructed: bool,
}

impl CrossReference {
    /// Build an index directly from entries; used by reconstruction.
    pub fn from_entries(entries: HashMap<u32, XrefEntry>, trailer: Dict) -> Self {
        Self {
            entries,
            trailer,
            startxref: 0,
            format: XrefFormat::Table,
            reconstructed: true,
        }
    }

    /// Look up an object number.
    pub fn get(&self, id: u32) -> Option<XrefEntry> {
        self.entries.get(&id).copied()
    }

    /// Number of known objects (including free entries).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One past the largest object number in use; the `/Size` of the next revision.
    pub fn next_object_id(&self) -> u32 {
        let by_entries = self.entries.keys().max().map(|m| m + 1).unwrap_or(1);
        let by_trailer = self.trailer.get_int("Size").unwrap_or(0).max(0) as u32;
        by_entries.max(by_trailer).max(1)
    }
}

/// Load cross-reference data, rebuilding it by scanning if the chain is broken.
pub fn load(data: &[u8]) -> Result<CrossReference> {
    match load_chain(data) {
        Ok(xref) => Ok(xref),
        Err(e) => {
            log::warn!("cross-reference chain unusable ({}), rebuilding by scan", e);
            crate::xref_reconstruction::reconstruct(data)
        },
    }
}

/// Offset stored after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let window_start = data.len().saturating_sub(4096);
    let tail = &data[window_start..];
    let pos = tail
        .windows(9)
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::InvalidXref("startxref not found".into()))?;
    match token(&tail[pos + 9..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 && (offset as usize) < data.len() => {
            Ok(offset as usize)
        },
        _ => Err(Error::InvalidXref("invalid startxref offset".into())),
    }
}

fn load_chain(data: &[u8]) -> Result<CrossReference> {
    let startxref = find_startxref(data)?;
    let mut entries = HashMap::new();
    let mut newest: Option<(Dict, XrefFormat)> = None;
    let mut visited = HashSet::new();
    let mut next = Some(startxref);

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            log::warn!("xref /Prev loop at offset {}", offset);
            break;
        }
        let (section, trailer, format) = read_section(data, offset)?;
        merge(&mut entries, section);

        if let Some(stm) = trailer.get_int("XRefStm") {
            if stm >= 0 && visited.insert(stm as usize) {
                let (hybrid, _, _) = read_section(data, stm as usize)?;
                merge(&mut entries, hybrid);
            }
        }

        next = trailer.get_int("Prev").filter(|&p| p >= 0).map(|p| p as usize);
        if newest.is_none() {
            newest = Some((trailer, format));
        }
    }

    let (trailer, format) = newest.ok_or_else(|| Error::InvalidXref("no sections".into()))?;
    if !trailer.contains_key("Root") {
        return Err(Error::InvalidXref("trailer has no /Root".into()));
    }
    Ok(CrossReference {
        entries,
        trailer,
        startxref,
        format,
        reconstructed: false,
    })
}

fn merge(entries: &mut HashMap<u32, XrefEntry>, section: Vec<(u32, XrefEntry)>) {
    for (id, entry) in section {
        entries.entry(id).or_insert(entry);
    }
}

type Section = (Vec<(u32, XrefEntry)>, Dict, XrefFormat);

fn read_section(data: &[u8], offset: usize) -> Result<Section> {
    let at = data.get(offset..).ok_or_else(|| Error::InvalidXref(format!("offset {} past EOF", offset)))?;
    if skip_ws(at).starts_with(b"xref") {
        let (entries, trailer) = read_table(data, offset)?;
        Ok((entries, trailer, XrefFormat::Table))
    } else {
        let (entries, trailer) = read_stream(data, offset)?;
        Ok((entries, trailer, XrefFormat::Stream))
    }
}

fn read_table(data: &[u8], offset: usize) -> Result<(Vec<(u32, XrefEntry)>, Dict)> {
    let bad = |reason: &str| Error::InvalidXref(format!("{} (table at {})", reason, offset));
    let mut input = &skip_ws(&data[offset..])[4..];
    let mut entries = Vec::new();

    loop {
        match token(input) {
            Ok((rest, Token::Keyword(b"trailer"))) => {
                let (_, trailer) = parse_object(rest).map_err(|_| bad("unreadable trailer"))?;
                let trailer = match trailer {
                    Object::Dictionary(d) => d,
                    _ => return Err(bad("trailer is not a dictionary")),
                };
                return Ok((entries, trailer));
            },
            Ok((rest, Token::Integer(start))) => {
                let (rest, count) = match token(rest) {
                    Ok((rest, Token::Integer(count))) => (rest, count),
                    _ => return Err(bad("subsection without count")),
                };
                input = rest;
                for i in 0..count.max(0) {
                    let (rest, field_offset) = match token(input) {
                        Ok((rest, Token::Integer(v))) => (rest, v),
                        _ => return Err(bad("truncated entry")),
                    };
                    let (rest, gen) = match token(rest) {
                        Ok((rest, Token::Integer(v))) => (rest, v),
                        _ => return Err(bad("truncated entry")),
                    };
                    let (rest, kind) = match token(rest) {
                        Ok((rest, Token::Keyword(kind))) => (rest, kind),
                        _ => return Err(bad("entry without type")),
                    };
                    input = rest;
                    let id = (start + i) as u32;
                    let entry = match kind {
                        b"n" => XrefEntry::InUse {
                            offset: field_offset as usize,
                            gen: gen.clamp(0, u16::MAX as i64) as u16,
                        },
                        _ => XrefEntry::Free,
                    };
                    entries.push((id, entry));
                }
            },
            _ => return Err(bad("unexpected token")),
        }
    }
}

fn read_stream(data: &[u8], offset: usize) -> Result<(Vec<(u32, XrefEntry)>, Dict)> {
    let (_, object) = parse_indirect_object(&data[offset..], offset, &|_| None)?;
    let (dict, raw) = match &object {
        Object::Stream { dict, data } if dict.is_type("XRef") => (dict.clone(), data.clone()),
        _ => return Err(Error::InvalidXref(format!("no xref stream at {}", offset))),
    };

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().map(|v| v.as_integer().unwrap_or(0).max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 {
        return Err(Error::InvalidXref("xref stream /W must have three entries".into()));
    }
    let size = dict.get_int("Size").unwrap_or(0).max(0);
    let index: Vec<i64> = match dict.get("Index").and_then(Object::as_array) {
        Some(items) => items.iter().filter_map(Object::as_integer).collect(),
        None => vec![0, size],
    };

    let decoded = crate::decoders::decode_stream(&raw, &dict)?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(Error::InvalidXref("xref stream rows are empty".into()));
    }
    let mut rows = decoded.chunks_exact(row);
    let mut entries = Vec::new();

    for pair in index.chunks(2) {
        let (start, count) = match pair {
            [start, count] => (*start, *count),
            _ => break,
        };
        for i in 0..count.max(0) {
            let Some(fields) = rows.next() else {
                break;
            };
            let (f1, rest) = fields.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // a zero-width type field defaults to type 1
            let kind = if widths[0] == 0 { 1 } else { be_value(f1) };
            let id = (start + i) as u32;
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse {
                    offset: be_value(f2) as usize,
                    gen: be_value(f3).min(u16::MAX as u64) as u16,
                },
                2 => XrefEntry::Compressed {
                    stream_id: be_value(f2) as u32,
                    index: be_value(f3) as u32,
                },
                _ => continue,
            };
            entries.push((id, entry));
        }
    }
    Ok((entries, dict))
}

fn be_value(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [] /Count 0 >> endobj\n\
xref\n0 3\n0000000000 65535 f\r\n0000000009 00000 n\r\n0000000058 00000 n\r\n\
trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n110\n%%EOF\n";

    #[test]
    fn test_classic_table() {
        let xref = load(TABLE_PDF).unwrap();
        assert!(!xref.reconstructed);
        assert_eq!(xref.format, XrefFormat::Table);
        assert_eq!(xref.get(1), Some(XrefEntry::InUse { offset: 9, gen: 0 }));
        assert_eq!(xref.get(0), Some(XrefEntry::Free));
        assert_eq!(xref.next_object_id(), 3);
        assert_eq!(xref.startxref, 110);
    }

    #[test]
    fn test_be_value() {
        assert_eq!(be_value(&[0x01, 0x02]), 0x0102);
        assert_eq!(be_value(&[]), 0);
    }

    #[test]
    fn test_broken_startxref_is_reconstructed() {
        let mut broken = TABLE_PDF.to_vec();
        let pos = broken.windows(3).rposition(|w| w == b"110").unwrap();
        broken[pos..pos + 3].copy_from_slice(b"999");
        let xref = load(&broken).unwrap();
        assert!(xref.reconstructed);
        assert!(matches!(xref.get(2), Some(XrefEntry::InUse { .. })));
    }
}
