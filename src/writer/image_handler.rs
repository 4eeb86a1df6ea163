//! Image XObjects for signature appearances.
//!
//! # Supported Formats
//!
//! - **JPEG**: Pass-through embedding using the DCTDecode filter
//! - **PNG**: Decoded, recompressed with FlateDecode; alpha becomes a soft mask

use crate::decoders::deflate;
use crate::error::{Error, Result};
use crate::object::{Dict, Object};

/// Image encoding inside the PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// JPEG image (DCTDecode filter)
    Jpeg,
    /// Decoded pixels (FlateDecode filter)
    Flate,
}

/// Color space for image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Grayscale (1 component per pixel)
    DeviceGray,
    /// RGB color (3 components per pixel)
    DeviceRGB,
    /// CMYK color (4 components per pixel)
    DeviceCMYK,
}

impl ColorSpace {
    /// PDF name of this color space.
    pub fn pdf_name(&self) -> &'static str {
        match self {
            ColorSpace::DeviceGray => "DeviceGray",
            ColorSpace::DeviceRGB => "DeviceRGB",
            ColorSpace::DeviceCMYK => "DeviceCMYK",
        }
    }
}

/// Image data ready for embedding.
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Color space
    pub color_space: ColorSpace,
    /// Encoding of `data`
    pub format: ImageFormat,
    /// Encoded image data
    pub data: Vec<u8>,
    /// Deflated alpha channel
    pub soft_mask: Option<Vec<u8>>,
}

impl ImageData {
    /// Load an image from raw bytes, detecting JPEG and PNG by signature.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.starts_with(&[0xFF, 0xD8]) {
            return Self::from_jpeg(data.to_vec());
        }
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            return Self::from_png(data);
        }
        Err(Error::Image("unsupported image format, expected PNG or JPEG".into()))
    }

    /// Embed a JPEG without transcoding.
    pub fn from_jpeg(data: Vec<u8>) -> Result<Self> {
        let (width, height, color_space) = parse_jpeg_header(&data)?;
        Ok(Self {
            width,
            height,
            color_space,
            format: ImageFormat::Jpeg,
            data,
            soft_mask: None,
        })
    }

    /// Decode a PNG and deflate its pixels.
    pub fn from_png(data: &[u8]) -> Result<Self> {
        use image::GenericImageView;

        let img = image::load_from_memory_with_format(data, image::ImageFormat::Png)?;
        let (width, height) = img.dimensions();

        let (color_space, pixels, alpha) = match img.color() {
            image::ColorType::L8 | image::ColorType::L16 => {
                (ColorSpace::DeviceGray, img.to_luma8().into_raw(), None)
            },
            image::ColorType::La8 | image::ColorType::La16 => {
                let la = img.to_luma_alpha8();
                let (gray, alpha): (Vec<u8>, Vec<u8>) = la.pixels().map(|p| (p.0[0], p.0[1])).unzip();
                (ColorSpace::DeviceGray, gray, Some(alpha))
            },
            image::ColorType::Rgba8 | image::ColorType::Rgba16 => {
                let rgba = img.to_rgba8();
                let mut rgb = Vec::with_capacity((width * height * 3) as usize);
                let mut alpha = Vec::with_capacity((width * height) as usize);
                for pixel in rgba.pixels() {
                    rgb.extend_from_slice(&pixel.0[..3]);
                    alpha.push(pixel.0[3]);
                }
                (ColorSpace::DeviceRGB, rgb, Some(alpha))
            },
            _ => (ColorSpace::DeviceRGB, img.to_rgb8().into_raw(), None),
        };

        // fully opaque alpha adds nothing
        let alpha = alpha.filter(|a| a.iter().any(|&v| v != 0xFF));

        Ok(Self {
            width,
            height,
            color_space,
            format: ImageFormat::Flate,
            data: deflate(&pixels)?,
            soft_mask: alpha.map(|a| deflate(&a)).transpose()?,
        })
    }

    /// Width over height.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }

    /// Largest size that fits in the box while keeping the aspect ratio.
    pub fn fit_to_box(&self, max_width: f32, max_height: f32) -> (f32, f32) {
        let aspect = self.aspect_ratio();
        if max_height <= 0.0 || max_width <= 0.0 {
            return (0.0, 0.0);
        }
        if aspect > max_width / max_height {
            (max_width, max_width / aspect)
        } else {
            (max_height * aspect, max_height)
        }
    }

    /// Image XObject; `smask` is the reference of the soft mask object, if any.
    pub fn to_xobject(&self, smask: Option<Object>) -> Object {
        let mut dict = base_image_dict(self.width, self.height, self.color_space);
        let filter = match self.format {
            ImageFormat::Jpeg => "DCTDecode",
            ImageFormat::Flate => "FlateDecode",
        };
        dict.insert("Filter".into(), Object::name(filter));
        if self.color_space == ColorSpace::DeviceCMYK && self.format == ImageFormat::Jpeg {
            // Adobe CMYK JPEGs are stored inverted
            dict.insert(
                "Decode".into(),
                Object::Array([1, 0, 1, 0, 1, 0, 1, 0].iter().map(|&v| Object::Integer(v)).collect()),
            );
        }
        if let Some(smask) = smask {
            dict.insert("SMask".into(), smask);
        }
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.data.clone()),
        }
    }

    /// Soft mask XObject for the alpha channel.
    pub fn soft_mask_xobject(&self) -> Option<Object> {
        self.soft_mask.as_ref().map(|mask| {
            let mut dict = base_image_dict(self.width, self.height, ColorSpace::DeviceGray);
            dict.insert("Filter".into(), Object::name("FlateDecode"));
            Object::Stream {
                dict,
                data: bytes::Bytes::from(mask.clone()),
            }
        })
    }
}

fn base_image_dict(width: u32, height: u32, color_space: ColorSpace) -> Dict {
    let mut dict = Dict::new();
    dict.insert("Type".into(), Object::name("XObject"));
    dict.insert("Subtype".into(), Object::name("Image"));
    dict.insert("Width".into(), Object::Integer(width as i64));
    dict.insert("Height".into(), Object::Integer(height as i64));
    dict.insert("ColorSpace".into(), Object::name(color_space.pdf_name()));
    dict.insert("BitsPerComponent".into(), Object::Integer(8));
    dict
}

/// Read dimensions and component count from the first SOF marker.
fn parse_jpeg_header(data: &[u8]) -> Result<(u32, u32, ColorSpace)> {
    let invalid = || Error::Image("invalid JPEG header".into());
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return Err(invalid());
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let seg = data.get(pos + 4..pos + 2 + len).ok_or_else(invalid)?;
            if seg.len() < 6 {
                return Err(invalid());
            }
            let height = u16::from_be_bytes([seg[1], seg[2]]) as u32;
            let width = u16::from_be_bytes([seg[3], seg[4]]) as u32;
            let color_space = match seg[5] {
                1 => ColorSpace::DeviceGray,
                3 => ColorSpace::DeviceRGB,
                4 => ColorSpace::DeviceCMYK,
                n => return Err(Error::Image(format!("unsupported JPEG component count {}", n))),
            };
            return Ok((width, height, color_space));
        }
        pos += 2 + len;
    }
    Err(invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_png_with_alpha_gets_soft_mask() {
        let image = ImageData::from_bytes(&png(4, 2, [255, 0, 0, 128])).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.color_space, ColorSpace::DeviceRGB);
        assert!(image.soft_mask.is_some());
        let xobject = image.to_xobject(Some(Object::Integer(0)));
        assert!(xobject.as_dict().unwrap().contains_key("SMask"));
    }

    #[test]
    fn test_opaque_png_has_no_soft_mask() {
        let image = ImageData::from_bytes(&png(2, 2, [0, 0, 0, 255])).unwrap();
        assert!(image.soft_mask.is_none());
        assert!(image.soft_mask_xobject().is_none());
    }

    #[test]
    fn test_jpeg_header() {
        // SOI, SOF0 for a 3x2 RGB image
        let data = [
            0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x02, 0x00, 0x03, 0x03, 1, 0x11, 0, 2, 0x11, 0, 3, 0x11,
            0,
        ];
        let image = ImageData::from_bytes(&data).unwrap();
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.format, ImageFormat::Jpeg);
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(matches!(ImageData::from_bytes(b"GIF89a"), Err(Error::Image(_))));
    }

    #[test]
    fn test_fit_to_box_keeps_aspect() {
        let image = ImageData::from_bytes(&png(200, 100, [0, 0, 0, 255])).unwrap();
        assert_eq!(image.fit_to_box(100.0, 100.0), (100.0, 50.0));
        assert_eq!(image.fit_to_box(400.0, 50.0), (100.0, 50.0));
    }
}
