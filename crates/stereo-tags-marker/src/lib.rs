//! Fiducial tag model and single-image decoding.
//!
//! This crate focuses on:
//! - the 16-bit tag codec (10-bit id, BCH-protected and masked),
//! - the 8×8 module layout and its tag-local sample points,
//! - candidate quad detection in a grayscale frame,
//! - reading a tag from a quad (pose, polarity, orientation, payload),
//! - rendering tags, both as printable images and into camera frames.
//!
//! Temporal tracking and stereo fusion live in `stereo-tags-tracker`.

mod codec;
pub mod layout;
mod quad;
mod read;
mod render;
mod threshold;
mod types;

pub use codec::{TagCodec, MAX_TAG_ID, TAG_ID_COUNT};
pub use quad::{ContourQuadDetector, QuadDetector, QuadDetectorParams};
pub use read::{Binarization, ReadError, ReaderParams, TagReader};
pub use render::{generate_tag_image, render_modules, render_tag};
pub use types::{min_edge_length, signed_area, Quad, Reflectance, Tag, TagSizeMap};
