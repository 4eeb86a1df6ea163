//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.
//!
//! Both the ByteRange array and the `/Contents` value are written as
//! fixed-width placeholders first, so filling them in later never moves
//! any other byte of the file.

use crate::error::{Error, Result};
use crate::object::Object;

/// Digits reserved for each ByteRange number.
const BYTE_RANGE_DIGITS: usize = 10;

/// Fixed-width placeholder for the ByteRange array.
pub const BYTE_RANGE_PLACEHOLDER: &str = "[0 0000000000 0000000000 0000000000]";

/// Calculator for PDF signature byte ranges.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a new ByteRange calculator with the specified signature size.
    ///
    /// The placeholder size will be calculated as: (signature_size * 2) + 2
    /// because the signature is hex-encoded and enclosed in angle brackets.
    pub fn new(estimated_signature_size: usize) -> Self {
        let placeholder_size = estimated_signature_size * 2 + 2;
        Self { placeholder_size }
    }

    /// Create a ByteRange calculator with a specific placeholder size.
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Bytes available for the DER container.
    pub fn capacity(&self) -> usize {
        self.placeholder_size.saturating_sub(2) / 2
    }

    /// Generate a placeholder string for the signature contents.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// Calculate the ByteRange array given the position of the /Contents value.
    ///
    /// `contents_offset` is the offset of the opening `<`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;

        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Format a ByteRange array as a PDF array string.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3])
    }

    /// Format a ByteRange padded with spaces to the placeholder width.
    pub fn format_fixed_width(byte_range: &[i64; 4]) -> Result<String> {
        let formatted = Self::format_byte_range(byte_range);
        if byte_range.iter().any(|v| *v < 0 || v.to_string().len() > BYTE_RANGE_DIGITS)
            || formatted.len() > BYTE_RANGE_PLACEHOLDER.len()
        {
            return Err(Error::InvalidPdf(format!("ByteRange {} does not fit its placeholder", formatted)));
        }
        Ok(format!("{:<width$}", formatted, width = BYTE_RANGE_PLACEHOLDER.len()))
    }

    /// Overwrite the ByteRange placeholder at `offset`.
    pub fn write_byte_range(pdf_data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        let end = offset + BYTE_RANGE_PLACEHOLDER.len();
        if pdf_data.get(offset..end) != Some(BYTE_RANGE_PLACEHOLDER.as_bytes()) {
            return Err(Error::InvalidPdf("ByteRange placeholder not found".to_string()));
        }
        let value = Self::format_fixed_width(byte_range)?;
        pdf_data[offset..end].copy_from_slice(value.as_bytes());
        Ok(())
    }

    /// Read a ByteRange array from a signature dictionary entry.
    pub fn parse(object: &Object) -> Option<[i64; 4]> {
        let values: Vec<i64> = object.as_array()?.iter().filter_map(Object::as_integer).collect();
        values.try_into().ok()
    }

    /// Extract the bytes to be signed from a PDF file.
    ///
    /// This returns the concatenation of the two ranges specified by ByteRange.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        if byte_range.iter().any(|v| *v < 0) {
            return Err(Error::InvalidPdf(format!(
                "ByteRange contains a negative value: {}",
                Self::format_byte_range(byte_range)
            )));
        }
        let offset1 = byte_range[0] as usize;
        let length1 = byte_range[1] as usize;
        let offset2 = byte_range[2] as usize;
        let length2 = byte_range[3] as usize;

        let end1 = offset1.checked_add(length1).filter(|end| *end <= pdf_data.len());
        let Some(end1) = end1 else {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range exceeds file size: {} + {} > {}",
                offset1,
                length1,
                pdf_data.len()
            )));
        };
        let end2 = offset2.checked_add(length2).filter(|end| *end <= pdf_data.len());
        let Some(end2) = end2 else {
            return Err(Error::InvalidPdf(format!(
                "ByteRange second range exceeds file size: {} + {} > {}",
                offset2,
                length2,
                pdf_data.len()
            )));
        };

        let mut signed_bytes = Vec::with_capacity(length1 + length2);
        signed_bytes.extend_from_slice(&pdf_data[offset1..end1]);
        signed_bytes.extend_from_slice(&pdf_data[offset2..end2]);

        Ok(signed_bytes)
    }

    /// Check that a ByteRange starts at 0, lies within `file_size` and leaves
    /// only one gap between its two ranges.
    ///
    /// Later incremental revisions may follow the second range, so it does
    /// not have to reach the end of the file.
    pub fn validate_byte_range(byte_range: &[i64; 4], file_size: usize) -> Result<()> {
        let offset1 = byte_range[0];
        let length1 = byte_range[1];
        let offset2 = byte_range[2];
        let length2 = byte_range[3];

        if byte_range.iter().any(|v| *v < 0) {
            return Err(Error::InvalidPdf(format!(
                "ByteRange contains a negative value: {}",
                Self::format_byte_range(byte_range)
            )));
        }

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }

        let Some(actual_end) = offset2.checked_add(length2) else {
            return Err(Error::InvalidPdf(format!(
                "ByteRange second range overflows: {} + {}",
                offset2, length2
            )));
        };
        if actual_end > file_size as i64 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange ends at {}, past the file size {}",
                actual_end, file_size
            )));
        }

        if length1 > offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }

        Ok(())
    }

    /// Whether the gap between the two ranges holds exactly one hex string.
    pub fn gap_is_contents(pdf_data: &[u8], byte_range: &[i64; 4]) -> bool {
        let (start, end) = (byte_range[1] as usize, byte_range[2] as usize);
        match pdf_data.get(start..end) {
            Some(gap) if gap.len() >= 2 => {
                gap[0] == b'<'
                    && gap[gap.len() - 1] == b'>'
                    && gap[1..gap.len() - 1].iter().all(u8::is_ascii_hexdigit)
            },
            _ => false,
        }
    }

    /// Find the /Contents value position in a signature dictionary.
    ///
    /// This searches for the pattern `/Contents <` and returns the offset
    /// of the opening angle bracket.
    pub fn find_contents_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        Self::find_value_offset(pdf_data, sig_dict_offset, b"/Contents", b'<')
    }

    /// Find the `[` of the /ByteRange array in a signature dictionary.
    pub fn find_byte_range_offset(pdf_data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        Self::find_value_offset(pdf_data, sig_dict_offset, b"/ByteRange", b'[')
    }

    fn find_value_offset(pdf_data: &[u8], start: usize, key: &[u8], open: u8) -> Option<usize> {
        let window = pdf_data.get(start..)?;
        let mut pos = 0;
        while pos + key.len() < window.len() {
            if window[pos..].starts_with(key) {
                let after_key = pos + key.len();
                for (i, &byte) in window.iter().enumerate().skip(after_key) {
                    if byte == open {
                        return Some(start + i);
                    }
                    if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                        break;
                    }
                }
            }
            pos += 1;
        }
        None
    }

    /// Replace the placeholder in the PDF with the actual signature.
    ///
    /// The hex value is right-padded with zeros to fill the placeholder.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, signature_hex: &str) -> Result<()> {
        let sig_len = signature_hex.len() + 2;
        if sig_len > self.placeholder_size {
            return Err(Error::SigningProtocol(format!(
                "signature ({} bytes) exceeds placeholder size ({} bytes)",
                sig_len, self.placeholder_size
            )));
        }

        let mut sig_value = String::with_capacity(self.placeholder_size);
        sig_value.push('<');
        sig_value.push_str(signature_hex);
        let padding_needed = (self.placeholder_size - 2) - signature_hex.len();
        sig_value.extend(std::iter::repeat('0').take(padding_needed));
        sig_value.push('>');

        if contents_offset + self.placeholder_size > pdf_data.len() {
            return Err(Error::InvalidPdf("Signature insertion would exceed file bounds".to_string()));
        }

        pdf_data[contents_offset..contents_offset + self.placeholder_size].copy_from_slice(sig_value.as_bytes());

        Ok(())
    }
}

/// Upper-case hex encoding.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}
