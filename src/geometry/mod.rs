//! Geometric primitives in PDF user space.
//!
//! Coordinates follow the PDF convention: the origin is the lower-left
//! corner of the page and y grows upwards.

use crate::object::Object;

/// A 2D point in user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// X coordinate of the lower-left corner
    pub x: f32,
    /// Y coordinate of the lower-left corner
    pub y: f32,
    /// Width of rectangle
    pub width: f32,
    /// Height of rectangle
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle from position and dimensions.
    ///
    /// # Examples
    ///
    /// ```
    /// use pades_oxide::geometry::Rect;
    ///
    /// let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
    /// assert_eq!(rect.width, 100.0);
    /// assert_eq!(rect.height, 50.0);
    /// ```
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from two opposite corners in any order.
    ///
    /// # Examples
    ///
    /// ```
    /// use pades_oxide::geometry::Rect;
    ///
    /// let rect = Rect::from_points(110.0, 70.0, 10.0, 20.0);
    /// assert_eq!(rect.x, 10.0);
    /// assert_eq!(rect.y, 20.0);
    /// assert_eq!(rect.width, 100.0);
    /// assert_eq!(rect.height, 50.0);
    /// ```
    pub fn from_points(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    /// Parse a PDF rectangle array `[llx lly urx ury]`.
    pub fn from_object(obj: &Object) -> Option<Self> {
        let arr = obj.as_array()?;
        if arr.len() != 4 {
            return None;
        }
        let n: Vec<f32> = arr.iter().map(|o| o.as_number().map(|v| v as f32)).collect::<Option<_>>()?;
        Some(Self::from_points(n[0], n[1], n[2], n[3]))
    }

    /// Left edge.
    pub fn left(&self) -> f32 {
        self.x
    }

    /// Right edge.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f32 {
        self.y
    }

    /// Top edge.
    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    /// Center point.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Area of the rectangle.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Whether the rectangle covers no area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Shrink by margins (left, bottom, right, top), never below zero size.
    pub fn inset(&self, left: f32, bottom: f32, right: f32, top: f32) -> Rect {
        Rect::new(
            self.x + left,
            self.y + bottom,
            (self.width - left - right).max(0.0),
            (self.height - bottom - top).max(0.0),
        )
    }

    /// PDF rectangle array `[llx lly urx ury]`.
    pub fn to_object(&self) -> Object {
        Object::Array(vec![
            Object::Real(self.left() as f64),
            Object::Real(self.bottom() as f64),
            Object::Real(self.right() as f64),
            Object::Real(self.top() as f64),
        ])
    }
}
