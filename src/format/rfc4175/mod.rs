//! # RFC 4175 Packetization
//!
//! RTP payload format for uncompressed 4:2:2 10-bit video (payload type
//! 103): a 2-byte extended sequence number followed by one or two 6-byte
//! line headers (`length:16 | F:1 line:15 | C:1 offset:15`) and
//! pgroup-packed pixels (15 bytes per 6 pixels). The marker bit rides on
//! the last packet of each field; a marker on a field-2 packet closes the
//! frame.

use crate::av::{
    clock, FrameUnit, Outputs, Payload, Picture, Plane, Port, Rational, CHROMA_U10, CHROMA_U8,
    CHROMA_V10, CHROMA_V210, CHROMA_V8, CHROMA_Y10, CHROMA_Y8,
};
use crate::codec::PixelCodecs;
use crate::format::rtp::{self, PAYLOAD_TYPE_RFC4175, RTP_HEADER_SIZE};
use crate::sdi::decoder::DecoderOutput;
use crate::{Result, SdiError};

/// Length of the extended sequence number field
pub const EXT_SEQ_NUM_LEN: usize = 2;
/// Length of one line header
pub const LINE_HEADER_LEN: usize = 6;
/// Bytes per pixel group (6 pixels of 4:2:2 10-bit)
pub const PGROUP_BYTES: usize = 15;
/// Pixels per pixel group
pub const PGROUP_PIXELS: usize = 6;
/// Bytes per pixel pair
pub const PIXEL_PAIR_BYTES: usize = 5;

/// Ethernet + IP + UDP overhead assumed for MTU packing
const NET_OVERHEAD: usize = 14 + 20 + 8;

/// One parsed line header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineHeader {
    /// Payload bytes belonging to this line
    pub length: u16,
    /// Field identifier (false = field 1)
    pub field: bool,
    /// 1-indexed line number within the field sequence
    pub line_number: u16,
    /// Continuation flag: another line header follows
    pub continuation: bool,
    /// Pixel offset of this fragment within the line
    pub offset: u16,
}

impl LineHeader {
    /// Serializes the 6-byte header
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.length.to_be_bytes());
        let field_line = (u16::from(self.field) << 15) | (self.line_number & 0x7fff);
        buf[2..4].copy_from_slice(&field_line.to_be_bytes());
        let cont_offset = (u16::from(self.continuation) << 15) | (self.offset & 0x7fff);
        buf[4..6].copy_from_slice(&cont_offset.to_be_bytes());
    }

    /// Parses a 6-byte header
    pub fn parse(buf: &[u8]) -> Self {
        let length = u16::from_be_bytes([buf[0], buf[1]]);
        let field_line = u16::from_be_bytes([buf[2], buf[3]]);
        let cont_offset = u16::from_be_bytes([buf[4], buf[5]]);
        Self {
            length,
            field: field_line & 0x8000 != 0,
            line_number: field_line & 0x7fff,
            continuation: cont_offset & 0x8000 != 0,
            offset: cont_offset & 0x7fff,
        }
    }
}

/// Maps a 1-indexed wire line number to the interleaved picture row
/// (field 1 lands on even rows, field 2 on odd rows)
pub fn interleaved_row(line_number: u16, field_lines: u16) -> usize {
    if line_number > field_lines {
        (usize::from(line_number) - usize::from(field_lines)) * 2 - 1
    } else {
        (usize::from(line_number) - 1) * 2
    }
}

/// Raster parameters of an RFC 4175 flow
#[derive(Debug, Clone, Copy)]
pub struct RasterConfig {
    /// Active width in pixels
    pub width: u32,
    /// Active height in lines
    pub height: u32,
    /// Frame rate
    pub fps: Rational,
    /// Interlaced transport (marker at the end of each field)
    pub interlaced: bool,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: Rational::new(30000, 1001),
            interlaced: true,
        }
    }
}

/// Cuts pictures into RFC 4175 RTP packets
pub struct Rfc4175Packetizer {
    config: RasterConfig,
    codecs: PixelCodecs,
    seqnum: u32,
    frame_count: u64,
}

impl Rfc4175Packetizer {
    /// Creates a packetizer for the given raster
    pub fn new(config: RasterConfig) -> Self {
        Self {
            config,
            codecs: PixelCodecs::new(),
            seqnum: 0,
            frame_count: 0,
        }
    }

    fn max_pixels_per_packet() -> usize {
        let headers = NET_OVERHEAD + RTP_HEADER_SIZE + EXT_SEQ_NUM_LEN + LINE_HEADER_LEN;
        let available = 1500 - headers;
        (available / PGROUP_BYTES * PGROUP_BYTES) / PIXEL_PAIR_BYTES * 2
    }

    fn pack_fragment(&self, pic: &Picture, row: usize, offset: usize, pixels: usize, dst: &mut [u8]) {
        let bytes = pixels / 2 * PIXEL_PAIR_BYTES;
        match pic.planes[0].tag {
            CHROMA_V210 => {
                let src = pic.planes[0].row8(row);
                let blocks = &src[offset / PGROUP_PIXELS * 16..];
                let mut samples = vec![0u16; pixels * 2];
                (self.codecs.v210_to_uyvy)(&blocks[..pixels / 6 * 16], &mut samples);
                (self.codecs.uyvy_to_sdi)(&mut dst[..bytes], &samples);
            }
            CHROMA_Y8 => {
                (self.codecs.planar8_to_sdi)(
                    &pic.planes[0].row8(row)[offset..offset + pixels],
                    &pic.planes[1].row8(row)[offset / 2..offset / 2 + pixels / 2],
                    &pic.planes[2].row8(row)[offset / 2..offset / 2 + pixels / 2],
                    &mut dst[..bytes],
                );
            }
            _ => {
                (self.codecs.planar10_to_sdi)(
                    &pic.planes[0].row16(row)[offset..offset + pixels],
                    &pic.planes[1].row16(row)[offset / 2..offset / 2 + pixels / 2],
                    &pic.planes[2].row16(row)[offset / 2..offset / 2 + pixels / 2],
                    &mut dst[..bytes],
                );
            }
        }
    }

    /// Cuts one picture into serialized RTP packets.
    ///
    /// The extended sequence number carries the upper 16 bits of the
    /// 32-bit monotone packet counter.
    pub fn packetize(&mut self, pic: &Picture) -> Result<Vec<Vec<u8>>> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        if pic.width as usize != width || pic.height as usize != height {
            return Err(SdiError::InvalidData(format!(
                "picture size {}x{} does not match flow",
                pic.width, pic.height
            )));
        }

        let field_lines = if self.config.interlaced { height / 2 } else { height };
        let frame_duration = 90_000 * self.config.fps.den / self.config.fps.num;
        let timestamp = (self.frame_count * frame_duration) as u32;

        let mut packets = Vec::new();
        let mut line = 0usize; // 0-indexed across both fields
        let mut pixel_offset = 0usize;

        while line < height {
            let field = line >= field_lines && self.config.interlaced;
            let mut pixels1 = Self::max_pixels_per_packet();
            let mut marker = false;
            let mut continuation = false;

            if pixel_offset + pixels1 >= width {
                pixels1 = width - pixel_offset;
                let line_ends_field =
                    line + 1 == field_lines || line + 1 == height;
                if line_ends_field {
                    marker = true;
                } else {
                    continuation = true;
                }
            }

            let data_len1 = pixels1 / 2 * PIXEL_PAIR_BYTES;
            let mut data_len2 = 0usize;
            let mut pixels2 = 0usize;

            if continuation {
                let used = NET_OVERHEAD
                    + RTP_HEADER_SIZE
                    + EXT_SEQ_NUM_LEN
                    + 2 * LINE_HEADER_LEN
                    + data_len1;
                let available = 1500usize.saturating_sub(used);
                pixels2 = (available / PGROUP_BYTES * PGROUP_BYTES) / PIXEL_PAIR_BYTES * 2;
                pixels2 = pixels2.min(width);
                data_len2 = pixels2 / 2 * PIXEL_PAIR_BYTES;
            }

            let headers = RTP_HEADER_SIZE
                + EXT_SEQ_NUM_LEN
                + LINE_HEADER_LEN * (1 + usize::from(continuation));
            let mut packet = vec![0u8; headers + data_len1 + data_len2];

            rtp::write_header(
                &mut packet,
                PAYLOAD_TYPE_RFC4175,
                (self.seqnum & 0xffff) as u16,
                timestamp,
                marker,
            );

            let ext_seq = ((self.seqnum >> 16) & 0xffff) as u16;
            packet[RTP_HEADER_SIZE..RTP_HEADER_SIZE + 2]
                .copy_from_slice(&ext_seq.to_be_bytes());
            self.seqnum = self.seqnum.wrapping_add(1);

            let interlaced = self.config.interlaced;
            let row_of = move |wire_line: usize| -> usize {
                if interlaced {
                    interleaved_row(wire_line as u16, field_lines as u16)
                } else {
                    wire_line - 1
                }
            };

            let mut pos = RTP_HEADER_SIZE + EXT_SEQ_NUM_LEN;
            LineHeader {
                length: data_len1 as u16,
                field,
                line_number: (line + 1) as u16,
                continuation,
                offset: pixel_offset as u16,
            }
            .write_to(&mut packet[pos..]);
            pos += LINE_HEADER_LEN;

            if continuation {
                // guaranteed to be from the same field, starting at offset 0
                LineHeader {
                    length: data_len2 as u16,
                    field,
                    line_number: (line + 2) as u16,
                    continuation: false,
                    offset: 0,
                }
                .write_to(&mut packet[pos..]);
                pos += LINE_HEADER_LEN;
            }

            let row = row_of(line + 1);
            self.pack_fragment(pic, row, pixel_offset, pixels1, &mut packet[pos..]);
            pos += data_len1;
            pixel_offset += pixels1;

            if continuation || marker {
                pixel_offset = 0;
                if continuation || !field {
                    line += 1;
                }
            }

            if data_len2 > 0 {
                let row = row_of(line + 1);
                self.pack_fragment(pic, row, 0, pixels2, &mut packet[pos..]);
                pixel_offset = pixels2;
                if pixels2 == width {
                    pixel_offset = 0;
                    line += 1;
                }
            }

            packets.push(packet);

            if marker && (field || !self.config.interlaced) {
                break;
            }
        }

        self.frame_count += 1;
        Ok(packets)
    }
}

/// Reassembles RFC 4175 packets into pictures
pub struct Rfc4175Depacketizer {
    config: RasterConfig,
    output: DecoderOutput,
    codecs: PixelCodecs,
    expected_seqnum: Option<u16>,
    discontinuity: bool,
    next_packet_frame_start: bool,
    picture: Option<Picture>,
    last_timestamp: u64,
}

impl Rfc4175Depacketizer {
    /// Creates a depacketizer producing the given picture format
    pub fn new(config: RasterConfig, output: DecoderOutput) -> Self {
        Self {
            config,
            output,
            codecs: PixelCodecs::new(),
            expected_seqnum: None,
            discontinuity: false,
            next_packet_frame_start: true,
            picture: None,
            last_timestamp: u64::from(u32::MAX),
        }
    }

    fn alloc_picture(&self) -> Picture {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let planes = match self.output {
            DecoderOutput::V210 => {
                let aligned = (width + 47) / 48 * 48;
                vec![Plane::new_b8(CHROMA_V210, aligned / 6 * 16, height)]
            }
            DecoderOutput::Planar8 => vec![
                Plane::new_b8(CHROMA_Y8, width, height),
                Plane::new_b8(CHROMA_U8, width / 2, height),
                Plane::new_b8(CHROMA_V8, width / 2, height),
            ],
            DecoderOutput::Planar10 => vec![
                Plane::new_b16(CHROMA_Y10, width, height),
                Plane::new_b16(CHROMA_U10, width / 2, height),
                Plane::new_b16(CHROMA_V10, width / 2, height),
            ],
        };
        Picture {
            width: self.config.width,
            height: self.config.height,
            planes,
        }
    }

    fn write_fragment(&mut self, header: &LineHeader, data: &[u8]) -> Result<()> {
        if header.length as usize % PGROUP_BYTES != 0 {
            return Err(SdiError::Protocol(format!(
                "line length {} not a pgroup multiple",
                header.length
            )));
        }
        let pixels = usize::from(header.length) / PIXEL_PAIR_BYTES * 2;
        if usize::from(header.offset) + pixels > self.config.width as usize {
            return Err(SdiError::Protocol(format!(
                "line fragment past active width: {} + {}",
                header.offset, pixels
            )));
        }

        let field_lines = if self.config.interlaced {
            (self.config.height / 2) as u16
        } else {
            self.config.height as u16
        };
        if header.line_number == 0 || u32::from(header.line_number) > self.config.height {
            return Err(SdiError::Protocol(format!(
                "invalid line number {}",
                header.line_number
            )));
        }
        let row = if self.config.interlaced {
            interleaved_row(header.line_number, field_lines)
        } else {
            usize::from(header.line_number) - 1
        };

        let Some(pic) = self.picture.as_mut() else {
            return Ok(());
        };

        let offset = usize::from(header.offset);
        match self.output {
            DecoderOutput::V210 => {
                let dst = pic.planes[0].row8_mut(row);
                let dst = &mut dst[offset / PGROUP_PIXELS * 16..];
                crate::codec::pack::sdi_to_v210(data, &mut dst[..pixels / 6 * 16]);
            }
            DecoderOutput::Planar8 => {
                let (y, rest) = pic.planes.split_at_mut(1);
                let (u, v) = rest.split_at_mut(1);
                (self.codecs.sdi_to_planar8)(
                    data,
                    &mut y[0].row8_mut(row)[offset..offset + pixels],
                    &mut u[0].row8_mut(row)[offset / 2..offset / 2 + pixels / 2],
                    &mut v[0].row8_mut(row)[offset / 2..offset / 2 + pixels / 2],
                );
            }
            DecoderOutput::Planar10 => {
                let (y, rest) = pic.planes.split_at_mut(1);
                let (u, v) = rest.split_at_mut(1);
                (self.codecs.sdi_to_planar10)(
                    data,
                    &mut y[0].row16_mut(row)[offset..offset + pixels],
                    &mut u[0].row16_mut(row)[offset / 2..offset / 2 + pixels / 2],
                    &mut v[0].row16_mut(row)[offset / 2..offset / 2 + pixels / 2],
                );
            }
        }
        Ok(())
    }

    /// Drops the in-flight picture and resynchronizes on the next frame
    /// boundary; the next emitted frame is flagged discontinuous
    pub fn reset(&mut self) {
        self.picture = None;
        self.expected_seqnum = None;
        self.discontinuity = true;
        self.next_packet_frame_start = false;
    }

    /// Feeds one received packet; completed frames come out as picture
    /// FrameUnits on the main port.
    pub fn push(&mut self, packet: &[u8], out: &mut Outputs) -> Result<()> {
        if packet.len() < RTP_HEADER_SIZE + EXT_SEQ_NUM_LEN + LINE_HEADER_LEN {
            return Err(SdiError::Protocol("too small buffer received".into()));
        }

        let fp = rtp::read_fingerprint(packet)
            .ok_or_else(|| SdiError::Protocol("invalid RTP header".into()))?;

        if let Some(expected) = self.expected_seqnum {
            if fp.sequence_number != expected {
                log::warn!(
                    "potentially lost {} RTP packets, got {} expected {}",
                    fp.sequence_number.wrapping_sub(expected),
                    fp.sequence_number,
                    expected
                );
                self.discontinuity = true;
            }
        }
        self.expected_seqnum = Some(fp.sequence_number.wrapping_add(1));

        if self.next_packet_frame_start {
            self.picture = Some(self.alloc_picture());
            self.next_packet_frame_start = false;
        }

        let mut data = &packet[RTP_HEADER_SIZE + EXT_SEQ_NUM_LEN..];
        let mut headers = Vec::with_capacity(2);
        loop {
            if data.len() < LINE_HEADER_LEN {
                return Err(SdiError::Protocol("truncated line header".into()));
            }
            let header = LineHeader::parse(data);
            data = &data[LINE_HEADER_LEN..];
            let more = header.continuation;
            headers.push(header);
            if !more {
                break;
            }
            if headers.len() >= 2 {
                return Err(SdiError::Protocol("too many line headers".into()));
            }
        }

        let mut field2_seen = false;
        for header in &headers {
            let length = usize::from(header.length);
            if length > data.len() {
                return Err(SdiError::Protocol("truncated line payload".into()));
            }
            if let Err(err) = self.write_fragment(header, &data[..length]) {
                log::warn!("{err}");
            }
            data = &data[length..];
            field2_seen |= header.field;
        }

        let end_of_frame =
            fp.marker && (field2_seen || !self.config.interlaced);
        self.next_packet_frame_start = end_of_frame;

        if !end_of_frame {
            return Ok(());
        }

        let Some(pic) = self.picture.take() else {
            return Ok(());
        };

        // wrap-extend the 32-bit RTP timestamp into the monotone clock
        let delta = (u64::from(u32::MAX) + u64::from(fp.timestamp)
            - (self.last_timestamp % u64::from(u32::MAX)))
            % u64::from(u32::MAX);
        self.last_timestamp += delta;

        let pts = self.last_timestamp * clock::UCLOCK_FREQ / 90_000;
        let pts_orig = u64::from(fp.timestamp) * clock::UCLOCK_FREQ / 90_000;

        let mut unit = FrameUnit::new(Payload::Picture(pic))
            .with_pts_prog(pts)
            .with_pts_orig(pts_orig);
        if self.discontinuity {
            unit.discontinuity = true;
            self.discontinuity = false;
        }
        out.push(Port::Main, unit);
        Ok(())
    }
}

impl crate::av::Stage for Rfc4175Depacketizer {
    fn set_input_format(&mut self, flow: &crate::av::FlowDefinition) -> Result<()> {
        flow.as_block()
            .map(|_| ())
            .ok_or_else(|| SdiError::Format("RFC 4175 depacketizer expects a block flow".into()))
    }

    fn push_frame(&mut self, frame: FrameUnit, out: &mut Outputs) -> Result<()> {
        if frame.flow_def.is_some() {
            return Ok(());
        }
        let block = frame
            .block()
            .ok_or_else(|| SdiError::InvalidData("RFC 4175 depacketizer needs packets".into()))?;
        self.push(block, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_header_roundtrip() {
        let h = LineHeader {
            length: 1425,
            field: true,
            line_number: 541,
            continuation: false,
            offset: 570,
        };
        let mut buf = [0u8; LINE_HEADER_LEN];
        h.write_to(&mut buf);
        assert_eq!(LineHeader::parse(&buf), h);
    }

    #[test]
    fn test_interleaved_rows() {
        // 1080i: field 1 lines 1..=540 on even rows
        assert_eq!(interleaved_row(1, 540), 0);
        assert_eq!(interleaved_row(540, 540), 1078);
        // field 2 lines 541..=1080 on odd rows
        assert_eq!(interleaved_row(541, 540), 1);
        assert_eq!(interleaved_row(1080, 540), 1079);
    }

    fn test_picture(width: usize, height: usize) -> Picture {
        let mut pic = Picture {
            width: width as u32,
            height: height as u32,
            planes: vec![
                Plane::new_b16(CHROMA_Y10, width, height),
                Plane::new_b16(CHROMA_U10, width / 2, height),
                Plane::new_b16(CHROMA_V10, width / 2, height),
            ],
        };
        for row in 0..height {
            for (i, s) in pic.planes[0].row16_mut(row).iter_mut().enumerate() {
                *s = ((row * 7 + i * 3) % 1015) as u16 + 4;
            }
            for (i, s) in pic.planes[1].row16_mut(row).iter_mut().enumerate() {
                *s = ((row * 11 + i * 5) % 1015) as u16 + 4;
            }
            for (i, s) in pic.planes[2].row16_mut(row).iter_mut().enumerate() {
                *s = ((row * 13 + i * 2) % 1015) as u16 + 4;
            }
        }
        pic
    }

    #[test]
    fn test_packetize_depacketize_roundtrip() {
        let config = RasterConfig {
            width: 1920,
            height: 1080,
            fps: Rational::new(25, 1),
            interlaced: true,
        };
        let mut packetizer = Rfc4175Packetizer::new(config);
        let mut depacketizer = Rfc4175Depacketizer::new(config, DecoderOutput::Planar10);

        let pic = test_picture(1920, 1080);
        let packets = packetizer.packetize(&pic).unwrap();
        assert!(packets.len() > 1000);

        let mut out = Outputs::new();
        for p in &packets {
            depacketizer.push(p, &mut out).unwrap();
        }

        let frames: Vec<_> = out.drain().collect();
        assert_eq!(frames.len(), 1);
        let got = frames[0].1.picture().unwrap();
        assert!(!frames[0].1.discontinuity);

        for plane in 0..3 {
            for row in 0..1080 {
                assert_eq!(
                    got.planes[plane].row16(row),
                    pic.planes[plane].row16(row),
                    "plane {plane} row {row}"
                );
            }
        }
    }

    #[test]
    fn test_marker_placement() {
        let config = RasterConfig {
            width: 1920,
            height: 1080,
            fps: Rational::new(25, 1),
            interlaced: true,
        };
        let mut packetizer = Rfc4175Packetizer::new(config);
        let pic = test_picture(1920, 1080);
        let packets = packetizer.packetize(&pic).unwrap();

        let markers: Vec<usize> = packets
            .iter()
            .enumerate()
            .filter(|(_, p)| p[1] & 0x80 != 0)
            .map(|(i, _)| i)
            .collect();
        // one marker at the end of each field
        assert_eq!(markers.len(), 2);
        assert_eq!(*markers.last().unwrap(), packets.len() - 1);
    }
}
