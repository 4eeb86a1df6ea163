//! Cross-reference reconstruction for damaged files.
//!
//! Scans the whole file for `N G obj` markers. Later occurrences win, which
//! matches how incremental updates shadow earlier object versions. The
//! trailer is taken from the last `trailer` dictionary, else from the last
//! xref stream dictionary, else synthesised from a `/Type /Catalog` object.

use crate::error::{Error, Result};
use crate::object::{Dict, DictExt, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object};
use crate::xref::{CrossReference, XrefEntry};
use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    static ref RE_OBJ: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(?-u)(\d{1,10})[ \t\r\n\x00\x0C]+(\d{1,5})[ \t\r\n\x00\x0C]+obj\b").unwrap();
    static ref RE_TRAILER: regex::bytes::Regex = regex::bytes::Regex::new(r"trailer\s*<<").unwrap();
}

/// Rebuild the object index of `data` by scanning.
pub fn reconstruct(data: &[u8]) -> Result<CrossReference> {
    log::info!("reconstructing cross-reference data by scanning {} bytes", data.len());

    let mut entries = HashMap::new();
    let mut stream_trailer: Option<Dict> = None;
    let mut catalog: Option<ObjectRef> = None;

    for capture in RE_OBJ.captures_iter(data) {
        let (Some(whole), Some(id), Some(gen)) = (capture.get(0), capture.get(1), capture.get(2)) else {
            continue;
        };
        // Reject matches glued to a preceding digit ("12 0 obj" inside "312 0 obj")
        if whole.start() > 0 && data[whole.start() - 1].is_ascii_digit() {
            continue;
        }
        let (Some(id), Some(gen)) = (parse_num(id.as_bytes()), parse_num(gen.as_bytes())) else {
            continue;
        };
        let offset = whole.start();
        entries.insert(
            id as u32,
            XrefEntry::InUse {
                offset,
                gen: gen.min(u16::MAX as u64) as u16,
            },
        );

        if let Ok((obj_ref, object)) = parse_indirect_object(&data[offset..], offset, &|_| None) {
            if let Some(dict) = object.as_dict() {
                if dict.is_type("XRef") && dict.contains_key("Root") {
                    stream_trailer = Some(dict.clone());
                }
                if dict.is_type("Catalog") {
                    catalog = Some(obj_ref);
                }
            }
        }
    }

    if entries.is_empty() {
        return Err(Error::InvalidPdf("no objects found while scanning".into()));
    }

    let trailer = last_trailer(data)
        .or(stream_trailer)
        .or_else(|| {
            catalog.map(|root| {
                let mut dict = Dict::new();
                dict.insert("Root".into(), Object::Reference(root));
                dict
            })
        })
        .ok_or_else(|| Error::InvalidPdf("no trailer or catalog found".into()))?;

    log::info!("reconstructed {} objects", entries.len());
    Ok(CrossReference::from_entries(entries, trailer))
}

fn parse_num(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn last_trailer(data: &[u8]) -> Option<Dict> {
    let found = RE_TRAILER.find_iter(data).last()?;
    let (_, object) = parse_object(&data[found.start() + 7..]).ok()?;
    match object {
        Object::Dictionary(dict) if dict.contains_key("Root") => Some(dict),
        _ => None,
    }
}
