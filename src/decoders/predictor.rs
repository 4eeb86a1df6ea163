//! PNG predictor reversal for FlateDecode streams.
//!
//! Cross-reference streams are almost always written with `/Predictor 12`
//! (PNG Up) so this module only implements the PNG family (10-15); TIFF
//! predictor 2 is rejected.

use crate::error::{Error, Result};
use crate::object::{Dict, DictExt, Object};

/// Decode parameters relevant to predictors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Number of samples per row
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Read parameters from a `/DecodeParms` dictionary.
    pub fn from_dict(dict: &Dict) -> Self {
        let defaults = Self::default();
        Self {
            predictor: dict.get_int("Predictor").unwrap_or(defaults.predictor),
            columns: dict.get_int("Columns").map(|v| v.max(1) as usize).unwrap_or(1),
            colors: dict.get_int("Colors").map(|v| v.max(1) as usize).unwrap_or(1),
            bits_per_component: dict
                .get_int("BitsPerComponent")
                .map(|v| v.max(1) as usize)
                .unwrap_or(8),
        }
    }

    /// Parameters from the optional `/DecodeParms` entry (dictionary or one-element array).
    pub fn from_object(obj: Option<&Object>) -> Option<Self> {
        match obj? {
            Object::Dictionary(d) => Some(Self::from_dict(d)),
            Object::Array(items) => items.first().and_then(Object::as_dict).map(Self::from_dict),
            _ => None,
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }

    fn row_len(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }
}

/// Reverse the predictor described by `params`.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        10..=15 => decode_png(data, params),
        other => Err(Error::UnsupportedFilter(format!("predictor {}", other))),
    }
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.row_len();
    let bpp = params.bytes_per_pixel();
    let mut output = Vec::with_capacity(data.len());
    let mut previous = vec![0u8; row_len];

    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < 2 {
            break;
        }
        let filter = chunk[0];
        let mut row = chunk[1..].to_vec();
        row.resize(row_len, 0);

        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bpp { previous[i - bpp] } else { 0 };
            row[i] = match filter {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(Error::Decode(format!("invalid PNG row filter {}", other)));
                },
            };
        }

        output.extend_from_slice(&row);
        previous = row;
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
