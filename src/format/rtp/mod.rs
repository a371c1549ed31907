//! # Real-time Transport Protocol (RTP) Implementation
//!
//! This module provides the RTP packet handling used by the HBRMT and
//! RFC 4175 transports:
//!
//! - RTP packet parsing and creation
//! - Header serialization for the packetizers
//! - Sequence number and timestamp fingerprinting for the redundant
//!   receiver
//!
//! ## Example: Creating and Parsing RTP Packets
//!
//! ```rust
//! use sdikit::format::rtp::RTPPacket;
//! use bytes::Bytes;
//!
//! // Create a new RTP packet
//! let payload = Bytes::from(vec![1, 2, 3, 4]);
//! let packet = RTPPacket::new(
//!     98,            // Payload type
//!     1000,          // Sequence number
//!     90000,         // Timestamp
//!     0x12345678,    // SSRC
//!     true,          // Marker bit
//!     payload,
//! );
//!
//! let mut buf = Vec::new();
//! packet.write_to(&mut buf);
//! let parsed = RTPPacket::parse(&buf).unwrap();
//! assert_eq!(parsed.sequence_number, 1000);
//! assert!(parsed.marker);
//! ```

use bytes::{BufMut, Bytes};
use thiserror::Error;

/// Size of a fixed RTP header in bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// Static payload type of SMPTE 2022-6 (HBRMT) flows
pub const PAYLOAD_TYPE_HBRMT: u8 = 98;

/// Static payload type of RFC 4175 flows
pub const PAYLOAD_TYPE_RFC4175: u8 = 103;

/// Errors that can occur during RTP operations
#[derive(Debug, Error)]
pub enum RTPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTP packet")]
    InvalidPacket,
}

/// Specialized Result type for RTP operations
pub type Result<T> = std::result::Result<T, RTPError>;

/// The transport identity of a received packet: what the redundant
/// receiver needs to merge two rings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// 16-bit sequence number
    pub sequence_number: u16,
    /// 32-bit RTP timestamp
    pub timestamp: u32,
    /// Marker bit
    pub marker: bool,
    /// Extended sequence number (RFC 4175 only)
    pub extended_sequence_number: Option<u16>,
}

/// An RTP packet containing media data and metadata
#[derive(Debug, Clone)]
pub struct RTPPacket {
    /// RTP version (should be 2)
    pub version: u8,
    /// Padding flag
    pub padding: bool,
    /// Header extension flag
    pub extension: bool,
    /// CSRC count
    pub csrc_count: u8,
    /// Marker bit
    pub marker: bool,
    /// Payload type identifier
    pub payload_type: u8,
    /// Packet sequence number
    pub sequence_number: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
    /// Contributing source identifiers
    pub csrc: Vec<u32>,
    /// Optional header extension (profile-specific ID, data)
    pub extension_data: Option<(u16, Bytes)>,
    /// Packet payload data
    pub payload: Bytes,
}

impl RTPPacket {
    /// Creates a new RTP packet with the specified parameters
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: Bytes,
    ) -> Self {
        Self {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_data: None,
            payload,
        }
    }

    /// Parses an RTP packet from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `RTPError` if:
    /// - The packet is shorter than 12 bytes
    /// - The version is not 2
    /// - The packet is malformed
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(RTPError::InvalidPacket);
        }

        let first_byte = data[0];
        let second_byte = data[1];

        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(RTPError::InvalidPacket);
        }

        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0f;

        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7f;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_SIZE;

        let mut csrc = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            if offset + 4 > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            csrc.push(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]));
            offset += 4;
        }

        let extension_data = if extension {
            if offset + 4 > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            let ext_header = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let ext_length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize * 4;
            offset += 4;

            if offset + ext_length > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            let ext_data = Bytes::copy_from_slice(&data[offset..offset + ext_length]);
            offset += ext_length;
            Some((ext_header, ext_data))
        } else {
            None
        };

        let payload = if padding {
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || offset + padding_len > data.len() {
                return Err(RTPError::InvalidPacket);
            }
            Bytes::copy_from_slice(&data[offset..data.len() - padding_len])
        } else {
            Bytes::copy_from_slice(&data[offset..])
        };

        Ok(Self {
            version: 2,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_data,
            payload,
        })
    }

    /// Serializes the packet (fixed header, CSRC list and payload) into
    /// `buf`
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        let first = (2u8 << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc.len() as u8 & 0x0f);
        buf.put_u8(first);
        buf.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7f));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
        buf.put_slice(&self.payload);
    }

    /// Returns the transport fingerprint of this packet
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            marker: self.marker,
            extended_sequence_number: None,
        }
    }
}

/// Writes a 12-byte RTP header straight into a packet buffer (the
/// template-based send path)
pub fn write_header(buf: &mut [u8], pt: u8, seqnum: u16, timestamp: u32, marker: bool) {
    buf[..RTP_HEADER_SIZE].fill(0);
    buf[0] = 2 << 6;
    buf[1] = (u8::from(marker) << 7) | (pt & 0x7f);
    buf[2..4].copy_from_slice(&seqnum.to_be_bytes());
    buf[4..8].copy_from_slice(&timestamp.to_be_bytes());
}

/// Reads the fingerprint fields straight from a packet buffer; returns
/// `None` when the buffer is too short or not RTP version 2
pub fn read_fingerprint(buf: &[u8]) -> Option<Fingerprint> {
    if buf.len() < RTP_HEADER_SIZE || (buf[0] >> 6) != 2 {
        return None;
    }
    Some(Fingerprint {
        sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
        timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        marker: buf[1] & 0x80 != 0,
        extended_sequence_number: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtp_packet_creation() {
        let payload = Bytes::from(vec![1, 2, 3, 4]);
        let packet = RTPPacket::new(98, 1000, 90000, 0x12345678, true, payload.clone());

        assert_eq!(packet.version, 2);
        assert_eq!(packet.payload_type, 98);
        assert_eq!(packet.sequence_number, 1000);
        assert_eq!(packet.timestamp, 90000);
        assert_eq!(packet.ssrc, 0x12345678);
        assert!(packet.marker);
        assert_eq!(packet.payload, payload);
    }

    #[test]
    fn test_rtp_serialize_parse_roundtrip() {
        let payload = Bytes::from(vec![9u8; 32]);
        let packet = RTPPacket::new(103, 0xffff, 0xdead_beef, 0, false, payload.clone());

        let mut buf = Vec::new();
        packet.write_to(&mut buf);
        assert_eq!(buf.len(), RTP_HEADER_SIZE + 32);

        let parsed = RTPPacket::parse(&buf).unwrap();
        assert_eq!(parsed.payload_type, 103);
        assert_eq!(parsed.sequence_number, 0xffff);
        assert_eq!(parsed.timestamp, 0xdead_beef);
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn test_raw_header_fingerprint() {
        let mut buf = [0u8; 16];
        write_header(&mut buf, PAYLOAD_TYPE_HBRMT, 42, 123456, true);
        let fp = read_fingerprint(&buf).unwrap();
        assert_eq!(fp.sequence_number, 42);
        assert_eq!(fp.timestamp, 123456);
        assert!(fp.marker);

        assert!(read_fingerprint(&[0u8; 4]).is_none());
    }
}
