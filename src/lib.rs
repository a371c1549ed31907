#![doc(html_root_url = "https://docs.rs/sdikit/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # sdikit - Rust SDI over IP Toolkit
//!
//! `sdikit` is a broadcast-grade toolkit for building SDI over IP
//! pipelines in Rust. It moves live uncompressed video, embedded audio
//! and ancillary data between three interchangeable transports — native
//! SDI line structure, SMPTE 2022-6 (HBRMT) RTP and RFC 4175
//! pixel-group RTP — while decoding SCTE-35 cueing carried alongside.
//!
//! ## Features
//!
//! ### SDI frame layer
//! - Full-frame decode: active picture, VANC/VBI side channels and
//!   16-channel embedded audio with SMPTE 337 non-PCM detection
//! - Full-frame encode: timing references, HD line CRCs, embedded audio
//!   with channel status and clock phase, SMPTE 352 payload id, OP-47
//!   teletext
//! - Byte-stream to frame reassembly
//!
//! ### Transports
//! - SMPTE 2022-6 (HBRMT) packetization and reassembly
//! - RFC 4175 pixel-group packetization and reassembly
//! - Redundant two-NIC sending with rate pacing and seamless dual-ring
//!   receive merging
//!
//! ### SCTE-35
//! - Event merge with lifecycle tracking and auto-return
//! - Interval-driven section generation with splice-null keep-alive
//! - Observation probing
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sdikit = "0.1.0"
//! ```
//!
//! ### Decoding an SDI frame
//!
//! ```rust,no_run
//! use sdikit::av::{FlowDefinition, FrameUnit, Outputs, PictureFlow, Rational, Stage};
//! use sdikit::sdi::{DecoderOutput, SdiDecoder};
//!
//! # fn main() -> sdikit::Result<()> {
//! let mut decoder = SdiDecoder::new(DecoderOutput::Planar10);
//!
//! decoder.set_input_format(&FlowDefinition::Picture(PictureFlow {
//!     hsize: 1920,
//!     vsize: 1080,
//!     fps: Rational::new(25, 1),
//!     macropixel: 1,
//!     planes: vec![],
//!     progressive: false,
//!     tff: true,
//!     latency: 0,
//! }))?;
//!
//! let frame: FrameUnit = unimplemented!("one full SDI frame");
//! let mut outputs = Outputs::new();
//! decoder.push_frame(frame, &mut outputs)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Packetizing to SMPTE 2022-6
//!
//! ```rust
//! use sdikit::format::hbrmt::HbrmtPacketizer;
//! use sdikit::av::Rational;
//!
//! let mut packetizer = HbrmtPacketizer::new();
//! packetizer.set_format(1920, 1080, Rational::new(25, 1)).unwrap();
//! ```
//!
//! ## Module Overview
//!
//! - `av`: the frame-unit flow model, flow definitions, clocks and the
//!   stage trait
//! - `codec`: pixel codecs (SDI 10-bit packing, V210, planar 4:2:2) and
//!   the SDI line CRC, behind a runtime dispatch table
//! - `sdi`: raster geometry, frame decoder/encoder, framer and the
//!   ancillary-data details
//! - `format`: wire formats (RTP, HBRMT, RFC 4175, SCTE-35)
//! - `net`: redundant two-NIC sending and receiving
//! - `pipeline`: the cooperative event loop
//! - `error`: error types and utilities
//! - `utils`: bit I/O and CRC-32/MPEG-2

/// Core flow types and the stage trait
pub mod av;

/// Pixel codec library
pub mod codec;

/// Error types and utilities
pub mod error;

/// Wire format implementations (RTP, HBRMT, RFC 4175, SCTE-35)
pub mod format;

/// Redundant network plane
pub mod net;

/// Cooperative event loop
pub mod pipeline;

/// SDI frame layer
pub mod sdi;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{Result, SdiError};
