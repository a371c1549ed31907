//! # Pixel Codec Library
//!
//! Total, side-effect-free conversions between the pixel layouts the SDI
//! path uses:
//!
//! - SDI 10-bit byte packing (5 bytes per 4 samples, transport order)
//! - Interleaved UYVY 16-bit samples
//! - Planar 4:2:2 at 8 and 10 bits
//! - V210 (6 pixels per 16 bytes)
//!
//! plus the SMPTE 292 line CRC. A scalar reference exists for every
//! conversion; [`PixelCodecs`] is the per-process dispatch table that
//! upgrades individual entries to SIMD variants after a one-time CPU
//! feature detection. Accelerated variants are bit-identical to the
//! scalar reference.
//!
//! ## Example
//!
//! ```rust
//! use sdikit::codec::PixelCodecs;
//!
//! let codecs = PixelCodecs::new();
//! let samples = [0x3ffu16, 0x000, 0x2d8, 0x123];
//! let mut packed = [0u8; 5];
//! (codecs.uyvy_to_sdi)(&mut packed, &samples);
//!
//! let mut back = [0u16; 4];
//! (codecs.sdi_to_uyvy)(&packed, &mut back);
//! assert_eq!(back, samples);
//! ```

/// SDI 10-bit and V210 packing
pub mod pack;

/// Planar 4:2:2 interleave/deinterleave
pub mod planar;

/// SMPTE 292 line CRC
pub mod crc;

/// Runtime CPU dispatch table
pub mod dispatch;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod simd;

pub use crc::SdiCrc;
pub use dispatch::{CpuFeatures, PixelCodecs};
