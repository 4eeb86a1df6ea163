//! PDF writing.
//!
//! ## Architecture
//!
//! ```text
//! PdfDocument (original bytes)
//!     ↓
//! [IncrementalWriter] (new and replaced objects, encrypted when needed)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! original bytes + update + xref section + trailer
//! ```
//!
//! Signature widgets get their visible stamp from [`AppearanceStreamBuilder`],
//! with background images embedded through [`ImageData`].

mod appearance_stream;
mod image_handler;
mod incremental;
mod object_serializer;

pub use appearance_stream::{text_width, AppearanceStreamBuilder, LEADING};
pub use image_handler::{ColorSpace, ImageData, ImageFormat};
pub use incremental::{IncrementalUpdate, IncrementalWriter};
pub use object_serializer::{dict, ObjectSerializer};
