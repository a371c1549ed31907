//! # SDI Frame Layer
//!
//! Everything that understands the structure of an uncompressed SDI
//! raster:
//!
//! - [`geometry`]: the static SMPTE line-layout tables
//! - [`decoder`]: full-frame decode into picture + VANC + VBI + audio
//! - [`encoder`]: full-frame encode with timing references, CRCs and
//!   embedded audio
//! - [`framer`]: byte-stream to whole-frame reassembly
//! - [`anc`], [`s337`], [`op47`], [`fvh`]: the supporting wire details
//!   (ancillary packets, non-PCM detection, teletext, timing codes)
//!
//! ## Example: resolving a raster
//!
//! ```rust
//! use sdikit::av::Rational;
//! use sdikit::sdi::geometry::find_geometry;
//!
//! let g = find_geometry(1920, 1080, Rational::new(25, 1)).unwrap();
//! assert_eq!(g.width, 2640);
//! assert_eq!(g.picture.switching_line, 7);
//! ```

/// Raster geometry tables
pub mod geometry;

/// EAV/SAV timing reference codes
pub mod fvh;

/// SMPTE 291 ancillary packets
pub mod anc;

/// SMPTE 337 non-PCM detection
pub mod s337;

/// OP-47 teletext line coding
pub mod op47;

/// SDI frame decoder
pub mod decoder;

/// SDI frame encoder
pub mod encoder;

/// Byte stream to frame reassembly
pub mod framer;

pub use decoder::{DecoderOutput, SdiDecoder};
pub use encoder::SdiEncoder;
pub use framer::SdiFramer;
pub use geometry::{find_geometry, SdiGeometry};
