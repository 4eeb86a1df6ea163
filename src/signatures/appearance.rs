//! Visible signature stamps.
//!
//! A stamp has an optional background image, drawn centered at 40%
//! opacity, an optional caption and, in the QR style, a QR symbol in the
//! lower-left corner with the caption to its right. In the text style
//! the caption is centered horizontally at the bottom of the box.

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Object, ObjectRef};
use crate::writer::{text_width, AppearanceStreamBuilder, ImageData, IncrementalWriter, LEADING};
use chrono::{DateTime, Utc};

/// Background opacity.
pub const BACKGROUND_OPACITY: f32 = 0.4;

/// Space kept free below the background when a caption is present.
pub const CAPTION_MARGIN: f32 = 20.0;

/// Largest caption font size.
const MAX_FONT_SIZE: f32 = 10.0;

/// Smallest caption font size.
const MIN_FONT_SIZE: f32 = 4.0;

/// Padding between the caption and the box edges.
const TEXT_PADDING: f32 = 2.0;

/// Layout family of a stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppearanceStyle {
    /// No visible stamp
    Invisible,
    /// Background and caption
    Text,
    /// QR symbol, caption and background
    Qr,
}

/// Values substituted into the caption.
#[derive(Debug, Clone)]
pub struct CaptionParams {
    /// Signer common name, for `%(signer)s`
    pub signer: String,
    /// Signing time, for `%(ts)s`
    pub timestamp: DateTime<Utc>,
    /// QR payload, for `%(url)s`
    pub url: Option<String>,
}

/// Replace `%(signer)s`, `%(ts)s` and `%(url)s` in `template`.
pub fn interpolate(template: &str, params: &CaptionParams) -> String {
    template
        .replace("%(signer)s", &params.signer)
        .replace("%(ts)s", &params.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .replace("%(url)s", params.url.as_deref().unwrap_or_default())
}

/// Decoded stamp content, ready to be laid out.
#[derive(Debug, Clone)]
pub struct SignatureAppearance {
    style: AppearanceStyle,
    background: Option<ImageData>,
    qr_data: Option<String>,
    caption: Option<String>,
}

impl SignatureAppearance {
    /// A signature without a visible stamp.
    pub fn invisible() -> Self {
        Self {
            style: AppearanceStyle::Invisible,
            background: None,
            qr_data: None,
            caption: None,
        }
    }

    /// Stamp from its parts; a QR payload selects the QR style.
    ///
    /// Empty strings count as absent. The background is decoded here so a
    /// broken image fails the request before anything is signed.
    pub fn new(background: Option<&[u8]>, qr_data: Option<String>, caption: Option<String>) -> Result<Self> {
        let qr_data = qr_data.filter(|q| !q.is_empty());
        let caption = caption.filter(|c| !c.is_empty());
        let background = match background {
            Some(bytes) => Some(
                ImageData::from_bytes(bytes)
                    .map_err(|e| Error::InvalidRequest(format!("specimen image cannot be decoded: {}", e)))?,
            ),
            None => None,
        };
        let style = if qr_data.is_some() {
            AppearanceStyle::Qr
        } else {
            AppearanceStyle::Text
        };
        Ok(Self {
            style,
            background,
            qr_data,
            caption,
        })
    }

    /// Layout family.
    pub fn style(&self) -> AppearanceStyle {
        self.style
    }

    /// QR payload.
    pub fn qr_data(&self) -> Option<&str> {
        self.qr_data.as_deref()
    }

    /// Whether a background image is present.
    pub fn has_background(&self) -> bool {
        self.background.is_some()
    }

    /// Region of a `width` by `height` box available to the background.
    pub fn background_area(&self, width: f32, height: f32) -> Rect {
        let bottom = if self.caption.is_some() { CAPTION_MARGIN } else { 0.0 };
        Rect::new(0.0, 0.0, width, height).inset(0.0, bottom, 0.0, 0.0)
    }

    /// Build the Form XObject for a `rect`-sized widget.
    ///
    /// Images are added to `writer`; `None` for invisible or empty boxes.
    pub fn render(
        &self,
        rect: &Rect,
        params: &CaptionParams,
        writer: &mut IncrementalWriter<'_>,
    ) -> Result<Option<Object>> {
        if self.style == AppearanceStyle::Invisible || rect.is_empty() {
            return Ok(None);
        }
        let (width, height) = (rect.width, rect.height);
        let mut builder = AppearanceStreamBuilder::new(width, height);

        if let Some(image) = &self.background {
            let area = self.background_area(width, height);
            let (w, h) = image.fit_to_box(area.width, area.height);
            if w > 0.0 && h > 0.0 {
                let image_ref = add_image(image, writer);
                let x = area.x + (area.width - w) / 2.0;
                let y = area.y + (area.height - h) / 2.0;
                builder.image(image_ref, x, y, w, h, BACKGROUND_OPACITY);
            }
        }

        let lines: Vec<String> = self
            .caption
            .as_deref()
            .map(|c| interpolate(c, params).lines().map(str::to_string).collect())
            .unwrap_or_default();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();

        match (&self.style, &self.qr_data) {
            (AppearanceStyle::Qr, Some(data)) => {
                let side = width.min(height);
                let (modules, size) = qr_modules(data)?;
                builder.qr_code(&modules, size, 0.0, 0.0, side);
                if !lines.is_empty() {
                    let text_box = Rect::new(side, 0.0, (width - side).max(0.0), height);
                    let size = fit_font_size(&lines, text_box.width - 2.0 * TEXT_PADDING, height - 2.0 * TEXT_PADDING);
                    builder.text(&lines, size, text_box.x + TEXT_PADDING, baseline(size));
                }
            },
            _ if !lines.is_empty() => {
                let size = fit_font_size(&lines, width - 2.0 * TEXT_PADDING, height - 2.0 * TEXT_PADDING);
                let block = lines.iter().map(|l| text_width(l, size)).fold(0.0, f32::max);
                let x = ((width - block) / 2.0).max(TEXT_PADDING);
                builder.text(&lines, size, x, baseline(size));
            },
            _ => {},
        }

        Ok(Some(builder.build()))
    }
}

fn add_image(image: &ImageData, writer: &mut IncrementalWriter<'_>) -> ObjectRef {
    let smask = image
        .soft_mask_xobject()
        .map(|mask| Object::Reference(writer.add(mask)));
    writer.add(image.to_xobject(smask))
}

/// Baseline of the last caption line, leaving room for descenders.
fn baseline(font_size: f32) -> f32 {
    TEXT_PADDING + font_size * (LEADING - 1.0)
}

/// Largest size up to 10pt at which every line fits the given width and
/// the block fits the given height; never below 4pt.
pub fn fit_font_size(lines: &[&str], max_width: f32, max_height: f32) -> f32 {
    let mut size = MAX_FONT_SIZE;
    while size > MIN_FONT_SIZE {
        let widest = lines.iter().map(|l| text_width(l, size)).fold(0.0, f32::max);
        let tall = size * LEADING * lines.len() as f32;
        if widest <= max_width && tall <= max_height {
            break;
        }
        size -= 0.5;
    }
    size.max(MIN_FONT_SIZE)
}

/// Row-major dark modules and the symbol size.
fn qr_modules(data: &str) -> Result<(Vec<bool>, usize)> {
    let code = qrcode::QrCode::new(data.as_bytes())
        .map_err(|e| Error::InvalidRequest(format!("QR payload cannot be encoded: {}", e)))?;
    let size = code.width();
    let modules = code
        .to_colors()
        .into_iter()
        .map(|c| c == qrcode::Color::Dark)
        .collect();
    Ok((modules, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> CaptionParams {
        CaptionParams {
            signer: "Jane Signer".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
            url: Some("https://verify.test/abc".to_string()),
        }
    }

    #[test]
    fn test_interpolate() {
        let text = interpolate("Signed by %(signer)s\n%(ts)s\n%(url)s", &params());
        assert_eq!(text, "Signed by Jane Signer\n2024-03-01 08:30:00 UTC\nhttps://verify.test/abc");
    }

    #[test]
    fn test_style_selection() {
        let qr = SignatureAppearance::new(None, Some("x".into()), None).unwrap();
        assert_eq!(qr.style(), AppearanceStyle::Qr);
        let text = SignatureAppearance::new(None, Some(String::new()), Some("hi".into())).unwrap();
        assert_eq!(text.style(), AppearanceStyle::Text);
        assert_eq!(SignatureAppearance::invisible().style(), AppearanceStyle::Invisible);
    }

    #[test]
    fn test_background_margin_only_with_caption() {
        let plain = SignatureAppearance::new(None, None, None).unwrap();
        assert_eq!(plain.background_area(100.0, 60.0), Rect::new(0.0, 0.0, 100.0, 60.0));
        let captioned = SignatureAppearance::new(None, None, Some("c".into())).unwrap();
        assert_eq!(captioned.background_area(100.0, 60.0), Rect::new(0.0, 20.0, 100.0, 40.0));
    }

    #[test]
    fn test_broken_image_is_rejected() {
        let err = SignatureAppearance::new(Some(b"not an image"), None, None).unwrap_err();
        assert_eq!(err.code(), "80");
    }

    #[test]
    fn test_font_shrinks_to_fit() {
        assert_eq!(fit_font_size(&["short"], 200.0, 50.0), 10.0);
        let size = fit_font_size(&["a much longer caption line"], 60.0, 50.0);
        assert!(size < 10.0);
        assert!(text_width("a much longer caption line", size) <= 60.0 || size == MIN_FONT_SIZE);
    }

    #[test]
    fn test_qr_modules_square() {
        let (modules, size) = qr_modules("https://verify.test/abc").unwrap();
        assert_eq!(modules.len(), size * size);
        assert!(modules.iter().any(|m| *m));
    }
}
