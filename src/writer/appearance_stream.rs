//! Appearance streams for signature widgets.
//!
//! An appearance stream is a Form XObject referenced from the widget's
//! `/AP /N` entry (ISO 32000-1:2008, §12.5.5). The builder records drawing
//! operations in box-local coordinates and collects the resources they use.
//!
//! ```
//! use pades_oxide::geometry::Rect;
//! use pades_oxide::writer::AppearanceStreamBuilder;
//!
//! let mut ap = AppearanceStreamBuilder::new(200.0, 60.0);
//! ap.text(&["Signed by Jane"], 10.0, 4.0, 4.0);
//! let form = ap.build();
//! assert!(form.is_stream());
//! ```

use crate::object::{Dict, Object, ObjectRef};

/// Resource name of the text font.
pub const FONT_NAME: &str = "F1";

/// Line height as a multiple of the font size.
pub const LEADING: f32 = 1.2;

/// Builder for a signature Form XObject.
#[derive(Debug, Clone)]
pub struct AppearanceStreamBuilder {
    width: f32,
    height: f32,
    content: String,
    fonts: Dict,
    xobjects: Dict,
    ext_gstates: Dict,
}

impl AppearanceStreamBuilder {
    /// New empty appearance of the given size.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            content: String::new(),
            fonts: Dict::new(),
            xobjects: Dict::new(),
            ext_gstates: Dict::new(),
        }
    }

    /// Draw an image XObject scaled into `area` at the given fill opacity.
    pub fn image(&mut self, image: ObjectRef, x: f32, y: f32, width: f32, height: f32, opacity: f32) {
        let name = format!("Im{}", self.xobjects.len());
        self.xobjects.insert(name.clone(), Object::Reference(image));
        self.content.push_str("q\n");
        if opacity < 1.0 {
            let gs = self.add_ext_gstate(opacity);
            self.content.push_str(&format!("/{} gs\n", gs));
        }
        self.content.push_str(&format!(
            "{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
            num(width),
            num(height),
            num(x),
            num(y),
            name
        ));
    }

    /// Draw a QR symbol as filled modules.
    ///
    /// `modules` is row-major with `true` for dark modules, `size` modules
    /// per side. The symbol occupies a `side` by `side` square at `(x, y)`.
    pub fn qr_code(&mut self, modules: &[bool], size: usize, x: f32, y: f32, side: f32) {
        if size == 0 || side <= 0.0 {
            return;
        }
        let unit = side / size as f32;
        self.content.push_str(&format!("q\n0 g\n{} 0 0 {} {} {} cm\n", num(unit), num(unit), num(x), num(y)));
        for (i, _) in modules.iter().enumerate().filter(|(_, dark)| **dark) {
            let row = i / size;
            let col = i % size;
            // row 0 is the top of the symbol
            self.content.push_str(&format!("{} {} 1 1 re\n", col, size - 1 - row));
        }
        self.content.push_str("f\nQ\n");
    }

    /// Draw lines of Helvetica text; `(x, y)` is the baseline of the last line.
    pub fn text(&mut self, lines: &[&str], font_size: f32, x: f32, y: f32) {
        if lines.is_empty() || font_size <= 0.0 {
            return;
        }
        self.fonts.insert(FONT_NAME.into(), helvetica());
        let leading = font_size * LEADING;
        let top_baseline = y + leading * (lines.len() - 1) as f32;
        self.content.push_str(&format!(
            "BT\n0 g\n/{} {} Tf\n{} TL\n{} {} Td\n",
            FONT_NAME,
            num(font_size),
            num(leading),
            num(x),
            num(top_baseline)
        ));
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                self.content.push_str("T*\n");
            }
            self.content.push_str(&format!("({}) Tj\n", escape_text(line)));
        }
        self.content.push_str("ET\n");
    }

    fn add_ext_gstate(&mut self, opacity: f32) -> String {
        let name = format!("GS{}", self.ext_gstates.len());
        let mut gs = Dict::new();
        gs.insert("Type".into(), Object::name("ExtGState"));
        gs.insert("CA".into(), Object::Real(opacity as f64));
        gs.insert("ca".into(), Object::Real(opacity as f64));
        self.ext_gstates.insert(name.clone(), Object::Dictionary(gs));
        name
    }

    /// Raw content stream operators recorded so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Assemble the Form XObject.
    pub fn build(&self) -> Object {
        let mut resources = Dict::new();
        for (key, entries) in [
            ("Font", &self.fonts),
            ("XObject", &self.xobjects),
            ("ExtGState", &self.ext_gstates),
        ] {
            if !entries.is_empty() {
                resources.insert(key.into(), Object::Dictionary(entries.clone()));
            }
        }

        let mut dict = Dict::new();
        dict.insert("Type".into(), Object::name("XObject"));
        dict.insert("Subtype".into(), Object::name("Form"));
        dict.insert("FormType".into(), Object::Integer(1));
        dict.insert(
            "BBox".into(),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(self.width as f64),
                Object::Real(self.height as f64),
            ]),
        );
        dict.insert("Resources".into(), Object::Dictionary(resources));
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.content.clone().into_bytes()),
        }
    }
}

fn helvetica() -> Object {
    let mut font = Dict::new();
    font.insert("Type".into(), Object::name("Font"));
    font.insert("Subtype".into(), Object::name("Type1"));
    font.insert("BaseFont".into(), Object::name("Helvetica"));
    font.insert("Encoding".into(), Object::name("WinAnsiEncoding"));
    Object::Dictionary(font)
}

/// Format a coordinate with at most three decimals.
fn num(value: f32) -> String {
    let formatted = format!("{:.3}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        t => t.to_string(),
    }
}

/// Latin-1 subset of WinAnsi, escaped for a literal string; other characters become `?`.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            },
            ' '..='~' => out.push(c),
            '\u{a0}'..='\u{ff}' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push('?'),
        }
    }
    out
}

/// Helvetica advance widths for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // space - /
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0 - ?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @ - O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P - _
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // ` - o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p - ~
];

/// Width of `text` in Helvetica at `font_size`.
pub fn text_width(text: &str, font_size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize] as u32,
            _ => 556,
        })
        .sum();
    units as f32 * font_size / 1000.0
}
