//! Stream filters.
//!
//! Only the filters needed to read document structure are supported:
//! FlateDecode (with PNG predictors) and ASCIIHexDecode. Content streams
//! and images are never decoded by this crate.

mod flate;
mod predictor;

pub use flate::{deflate, inflate};
pub use predictor::{decode_predictor, DecodeParams};

use crate::error::{Error, Result};
use crate::object::{Dict, Object};

/// Apply the filter pipeline named by `/Filter` to already-decrypted data.
pub fn decode_stream(data: &[u8], dict: &Dict) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => Vec::new(),
        Some(Object::Name(name)) => vec![name.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(Error::Decode(format!("invalid /Filter of type {}", other.type_name())));
        },
    };

    let params = DecodeParams::from_object(dict.get("DecodeParms"));
    let mut current = data.to_vec();
    for filter in filters {
        current = match filter {
            "FlateDecode" | "Fl" => {
                let inflated = inflate(&current)?;
                match &params {
                    Some(p) => decode_predictor(&inflated, p)?,
                    None => inflated,
                }
            },
            "ASCIIHexDecode" | "AHx" => crate::parser::decode_hex(
                current.split(|&b| b == b'>').next().unwrap_or_default(),
            )?,
            other => return Err(Error::UnsupportedFilter(other.to_string())),
        };
    }
    Ok(current)
}
