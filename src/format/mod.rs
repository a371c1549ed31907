//! # Wire Format Implementations
//!
//! This module provides the transport encapsulations of the SDI path:
//!
//! - **RTP**: packet parsing, header serialization and transport
//!   fingerprints
//! - **HBRMT**: SMPTE 2022-6 packetization of whole SDI frames
//! - **RFC 4175**: pixel-group packetization of active video
//! - **SCTE-35**: splice event merge, section generation and probing
//!
//! ## Examples
//!
//! ### HBRMT packetization
//!
//! ```rust
//! use sdikit::format::hbrmt::HbrmtPacketizer;
//! use sdikit::av::Rational;
//!
//! let mut packetizer = HbrmtPacketizer::new();
//! packetizer.set_format(1920, 1080, Rational::new(25, 1)).unwrap();
//! ```
//!
//! ### SCTE-35 section generation
//!
//! ```rust
//! use sdikit::format::scte35::{Scte35Generator, Scte35Event};
//! use sdikit::av::clock::UCLOCK_FREQ;
//!
//! let mut generator = Scte35Generator::new();
//! generator.set_interval(UCLOCK_FREQ);
//!
//! // with no live events, the generator keeps the PID alive with
//! // splice-null sections
//! let sections = generator.prepare(2 * UCLOCK_FREQ);
//! assert_eq!(sections.len(), 1);
//! ```

/// Real-time Transport Protocol packet handling
pub mod rtp;

/// SMPTE 2022-6 (HBRMT) packetization
pub mod hbrmt;

/// RFC 4175 packetization
pub mod rfc4175;

/// SCTE-35 splice signalling
pub mod scte35;

// Re-export commonly used types
pub use self::hbrmt::{HbrmtDepacketizer, HbrmtPacketizer};
pub use self::rfc4175::{Rfc4175Depacketizer, Rfc4175Packetizer};
pub use self::rtp::RTPPacket;
pub use self::scte35::{Scte35Generator, Scte35Merge, Scte35Probe};
