//! # SMPTE 2022-6 (HBRMT) Packetization
//!
//! High Bit-Rate Media Transport carries a whole SDI frame as packed
//! 10-bit payload cut into 1376-byte chunks, each behind a 12-byte RTP
//! header (payload type 98) and the 8-byte HBRMT payload header. The
//! marker bit flags the last chunk of a frame.
//!
//! ## Example: packetize one frame
//!
//! ```rust
//! use sdikit::format::hbrmt::HbrmtPacketizer;
//! use sdikit::av::Rational;
//!
//! let mut packetizer = HbrmtPacketizer::new();
//! packetizer.set_format(1920, 1080, Rational::new(25, 1)).unwrap();
//!
//! // a frame's worth of packed 10-bit payload
//! let payload = vec![0u8; 2640 * 1125 * 2 * 10 / 8];
//! let packets = packetizer.packetize(&payload);
//! assert!(packets.last().unwrap().marker());
//! ```

use crate::av::{clock, FlowDefinition, FrameUnit, Outputs, PictureFlow, Port, Rational};
use crate::format::rtp::{self, PAYLOAD_TYPE_HBRMT, RTP_HEADER_SIZE};
use crate::sdi::geometry::{find_geometry, SdiGeometry};
use crate::{Result, SdiError};
use bytes::BytesMut;

/// HBRMT payload header size in bytes
pub const HBRMT_HEADER_SIZE: usize = 8;
/// HBRMT payload size in bytes
pub const HBRMT_DATA_SIZE: usize = 1376;

/// Frame codes of the HBRMT FRAME field
pub mod frame_code {
    /// 483/486-line interlaced (NTSC)
    pub const SD_486I: u8 = 0x10;
    /// 576-line interlaced (PAL)
    pub const SD_576I: u8 = 0x11;
    /// 1080 interlaced
    pub const HD_1080I: u8 = 0x20;
    /// 1080 progressive
    pub const HD_1080P: u8 = 0x21;
    /// 1080 segmented frame
    pub const HD_1080PSF: u8 = 0x22;
    /// 2K 1080 variants
    pub const HD_2K1080_A: u8 = 0x23;
    /// 2K 1080 variants
    pub const HD_2K1080_B: u8 = 0x24;
    /// 720 progressive
    pub const HD_720P: u8 = 0x30;
}

/// FRATE codes 0x10..=0x1b mapped to frame rates (None = reserved)
static FRATE_FPS: [Option<Rational>; 12] = [
    Some(Rational::new(60, 1)),        // 0x10
    Some(Rational::new(60000, 1001)),  // 0x11
    Some(Rational::new(50, 1)),        // 0x12
    None,                              // 0x13
    Some(Rational::new(48, 1)),        // 0x14
    Some(Rational::new(48000, 1001)),  // 0x15
    Some(Rational::new(30, 1)),        // 0x16
    Some(Rational::new(30000, 1001)),  // 0x17
    Some(Rational::new(25, 1)),        // 0x18
    None,                              // 0x19
    Some(Rational::new(24, 1)),        // 0x1a
    Some(Rational::new(24000, 1001)),  // 0x1b
];

/// Maps a FRATE code to a frame rate
pub fn frate_to_fps(frate: u8) -> Option<Rational> {
    if !(0x10..=0x1b).contains(&frate) {
        return None;
    }
    FRATE_FPS[usize::from(frate - 0x10)]
}

/// Maps a frame rate to its FRATE code
pub fn fps_to_frate(fps: Rational) -> Option<u8> {
    FRATE_FPS
        .iter()
        .position(|f| *f == Some(fps))
        .map(|i| 0x10 + i as u8)
}

/// Accessors over the 8-byte HBRMT payload header
pub mod header {
    /// Extension word count (4 bits)
    pub fn get_ext(p: &[u8]) -> u8 {
        p[0] >> 4
    }

    /// Sets the extension word count
    pub fn set_ext(p: &mut [u8], ext: u8) {
        p[0] = (p[0] & 0x0f) | (ext << 4);
    }

    /// Sets the video-source-format-present flag
    pub fn set_video_source_format(p: &mut [u8]) {
        p[0] |= 0x08;
    }

    /// Sets the video source id (3 bits)
    pub fn set_video_source_id(p: &mut [u8], id: u8) {
        p[0] = (p[0] & 0xf8) | (id & 0x07);
    }

    /// Frame count (8 bits, wraps)
    pub fn get_frame_count(p: &[u8]) -> u8 {
        p[1]
    }

    /// Sets the frame count
    pub fn set_frame_count(p: &mut [u8], count: u8) {
        p[1] = count;
    }

    /// Sets the reference-for-timestamp field (2 bits)
    pub fn set_reference_for_time_stamp(p: &mut [u8], r: u8) {
        p[2] = (p[2] & 0x3f) | ((r & 0x3) << 6);
    }

    /// Sets the video payload scrambling field (2 bits)
    pub fn set_video_payload_scrambling(p: &mut [u8], s: u8) {
        p[2] = (p[2] & 0xcf) | ((s & 0x3) << 4);
    }

    /// Sets the FEC usage field (3 bits)
    pub fn set_fec(p: &mut [u8], f: u8) {
        p[2] = (p[2] & 0xf1) | ((f & 0x7) << 1);
    }

    /// Clock-frequency field (4 bits spanning bytes 2 and 3)
    pub fn get_clock_frequency(p: &[u8]) -> u8 {
        ((p[2] & 0x1) << 3) | (p[3] >> 5)
    }

    /// Sets the clock-frequency field
    pub fn set_clock_frequency(p: &mut [u8], cf: u8) {
        p[2] = (p[2] & 0xfe) | ((cf >> 3) & 0x1);
        p[3] = (p[3] & 0x1f) | ((cf & 0x7) << 5);
    }

    /// MAP field (4 bits); non-zero means level B, which is unsupported
    pub fn get_map(p: &[u8]) -> u8 {
        (p[4] >> 4) & 0xf
    }

    /// Sets the MAP field
    pub fn set_map(p: &mut [u8], map: u8) {
        p[4] = (p[4] & 0x0f) | ((map & 0xf) << 4);
    }

    /// FRAME code (8 bits straddling bytes 4 and 5)
    pub fn get_frame(p: &[u8]) -> u8 {
        ((p[4] & 0xf) << 4) | (p[5] >> 4)
    }

    /// Sets the FRAME code
    pub fn set_frame(p: &mut [u8], frame: u8) {
        p[4] = (p[4] & 0xf0) | (frame >> 4);
        p[5] = (p[5] & 0x0f) | ((frame & 0xf) << 4);
    }

    /// FRATE code (8 bits straddling bytes 5 and 6)
    pub fn get_frate(p: &[u8]) -> u8 {
        ((p[5] & 0xf) << 4) | (p[6] >> 4)
    }

    /// Sets the FRATE code
    pub fn set_frate(p: &mut [u8], frate: u8) {
        p[5] = (p[5] & 0xf0) | (frate >> 4);
        p[6] = (p[6] & 0x0f) | ((frate & 0xf) << 4);
    }

    /// SAMPLE structure code (4 bits; 0x1 is 4:2:2 10-bit)
    pub fn get_sample(p: &[u8]) -> u8 {
        p[6] & 0xf
    }

    /// Sets the SAMPLE structure code
    pub fn set_sample(p: &mut [u8], sample: u8) {
        p[6] = (p[6] & 0xf0) | (sample & 0xf);
    }

    /// Sets the FMT-RESERVE byte
    pub fn set_fmt_reserve(p: &mut [u8]) {
        p[7] = 0x00;
    }
}

/// One serialized HBRMT packet
#[derive(Debug, Clone)]
pub struct HbrmtPacket(pub Vec<u8>);

impl HbrmtPacket {
    /// RTP marker bit of this packet
    pub fn marker(&self) -> bool {
        self.0[1] & 0x80 != 0
    }

    /// RTP sequence number of this packet
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// Raw packet bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Cuts packed 10-bit frames into HBRMT RTP packets
pub struct HbrmtPacketizer {
    seqnum: u16,
    frame_count: u64,
    frame_size: usize,
    frate: u8,
    frame_code: u8,
    fps: Rational,
}

impl HbrmtPacketizer {
    /// Creates a packetizer with no format resolved yet
    pub fn new() -> Self {
        Self {
            seqnum: 0,
            frame_count: 0,
            frame_size: 0,
            frate: 0,
            frame_code: 0,
            fps: Rational::new(25, 1),
        }
    }

    /// Resolves the SDI geometry and header codes for the raster
    pub fn set_format(&mut self, hsize: u32, vsize: u32, fps: Rational) -> Result<()> {
        let geometry = find_geometry(hsize, vsize, fps).ok_or_else(|| {
            SdiError::Format(format!("no SDI geometry for {hsize}x{vsize} @ {fps}"))
        })?;

        self.frame_code = match (hsize, vsize) {
            (720, 486) => frame_code::SD_486I,
            (720, 576) => frame_code::SD_576I,
            (1920, 1080) => frame_code::HD_1080I,
            (1280, 720) => frame_code::HD_720P,
            _ => return Err(SdiError::Format("unsupported HBRMT raster".into())),
        };
        self.frate = fps_to_frate(fps)
            .ok_or_else(|| SdiError::Format(format!("unsupported HBRMT rate {fps}")))?;
        self.fps = fps;
        self.frame_size = usize::from(geometry.width) * usize::from(geometry.height) * 2 * 10 / 8;
        Ok(())
    }

    fn put_header(&self, buf: &mut [u8], chunk: usize, last: bool) {
        let frame_duration = 90_000 * self.fps.den / self.fps.num;
        let timestamp = self.frame_count * frame_duration
            + frame_duration * (chunk * HBRMT_DATA_SIZE) as u64 / self.frame_size as u64;

        rtp::write_header(
            buf,
            PAYLOAD_TYPE_HBRMT,
            self.seqnum.wrapping_add(chunk as u16),
            timestamp as u32,
            last,
        );

        let hbrmt = &mut buf[RTP_HEADER_SIZE..RTP_HEADER_SIZE + HBRMT_HEADER_SIZE];
        hbrmt.fill(0);
        header::set_ext(hbrmt, 0);
        header::set_video_source_format(hbrmt);
        header::set_video_source_id(hbrmt, 0);
        header::set_frame_count(hbrmt, (self.frame_count & 0xff) as u8);
        header::set_reference_for_time_stamp(hbrmt, 0);
        header::set_video_payload_scrambling(hbrmt, 0);
        header::set_fec(hbrmt, 0);
        header::set_clock_frequency(hbrmt, 0);
        header::set_map(hbrmt, 0);
        header::set_frame(hbrmt, self.frame_code);
        header::set_frate(hbrmt, self.frate);
        header::set_sample(hbrmt, 0x1); // 4:2:2 10 bits
        header::set_fmt_reserve(hbrmt);
    }

    /// Cuts one frame of packed 10-bit payload into packets.
    ///
    /// The sequence number is monotone across frames; the marker rides on
    /// the last chunk.
    pub fn packetize(&mut self, payload: &[u8]) -> Vec<HbrmtPacket> {
        debug_assert_eq!(payload.len(), self.frame_size);
        let chunks = payload.len().div_ceil(HBRMT_DATA_SIZE);
        let mut packets = Vec::with_capacity(chunks);

        for (chunk, data) in payload.chunks(HBRMT_DATA_SIZE).enumerate() {
            let mut packet =
                vec![0u8; RTP_HEADER_SIZE + HBRMT_HEADER_SIZE + HBRMT_DATA_SIZE];
            self.put_header(&mut packet, chunk, chunk == chunks - 1);
            packet[RTP_HEADER_SIZE + HBRMT_HEADER_SIZE
                ..RTP_HEADER_SIZE + HBRMT_HEADER_SIZE + data.len()]
                .copy_from_slice(data);
            packets.push(HbrmtPacket(packet));
        }

        self.seqnum = self.seqnum.wrapping_add(chunks as u16);
        self.frame_count += 1;
        packets
    }
}

impl Default for HbrmtPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles HBRMT packets into packed 10-bit frames
pub struct HbrmtDepacketizer {
    expected_seqnum: Option<u16>,
    discontinuity: bool,
    next_packet_frame_start: bool,
    geometry: Option<&'static SdiGeometry>,
    frame_buf: Option<BytesMut>,
    frame_size: usize,
    frame: u64,
    pending_flow: Option<FlowDefinition>,
}

impl HbrmtDepacketizer {
    /// Creates a depacketizer; the first packet fed is taken as a frame
    /// start
    pub fn new() -> Self {
        Self {
            expected_seqnum: None,
            discontinuity: false,
            next_packet_frame_start: true,
            geometry: None,
            frame_buf: None,
            frame_size: 0,
            frame: 0,
            pending_flow: None,
        }
    }

    fn resolve_format(&mut self, frate: u8, frame: u8) -> Result<()> {
        let fps = frate_to_fps(frate)
            .ok_or_else(|| SdiError::Protocol(format!("Invalid hbrmt frate {frate:#x}")))?;

        let (hsize, vsize) = match frame {
            frame_code::SD_486I => (720u32, 486u32),
            frame_code::SD_576I => (720, 576),
            frame_code::HD_1080I | frame_code::HD_1080P | frame_code::HD_1080PSF => (1920, 1080),
            frame_code::HD_720P => (1280, 720),
            _ => {
                return Err(SdiError::Protocol(format!(
                    "Invalid hbrmt frame code {frame:#x}"
                )))
            }
        };

        let geometry = find_geometry(hsize, vsize, fps).ok_or_else(|| {
            SdiError::Protocol(format!("no SDI geometry for {hsize}x{vsize} @ {fps}"))
        })?;

        self.geometry = Some(geometry);
        self.frame_size =
            usize::from(geometry.width) * usize::from(geometry.height) * 2 * 10 / 8;

        let latency = clock::UCLOCK_FREQ * fps.den / fps.num;
        self.pending_flow = Some(FlowDefinition::Picture(PictureFlow {
            hsize,
            vsize,
            fps,
            macropixel: 1,
            planes: vec![],
            progressive: geometry.scan.progressive(),
            tff: !geometry.picture.is_ntsc(),
            latency,
        }));
        Ok(())
    }

    /// Feeds one received packet; completed frames come out as block
    /// FrameUnits on the main port.
    pub fn push(&mut self, packet: &[u8], out: &mut Outputs) -> Result<()> {
        if packet.len() < RTP_HEADER_SIZE + HBRMT_HEADER_SIZE + HBRMT_DATA_SIZE {
            return Err(SdiError::Protocol("too small buffer received".into()));
        }

        let fp = rtp::read_fingerprint(packet)
            .ok_or_else(|| SdiError::Protocol("invalid RTP header".into()))?;
        let hbrmt = &packet[RTP_HEADER_SIZE..];

        if header::get_map(hbrmt) != 0 {
            // level B not supported
            return Ok(());
        }

        if self.geometry.is_none() {
            self.resolve_format(header::get_frate(hbrmt), header::get_frame(hbrmt))?;
        }

        if let Some(expected) = self.expected_seqnum {
            if fp.sequence_number != expected {
                log::warn!(
                    "potentially lost {} RTP packets, got {} expected {}",
                    fp.sequence_number.wrapping_sub(expected),
                    fp.sequence_number,
                    expected
                );
                self.discontinuity = true;
                // drop the in-flight frame
                self.frame_buf = None;
            }
        }
        self.expected_seqnum = Some(fp.sequence_number.wrapping_add(1));

        if self.discontinuity {
            // wait for the next marker to resynchronize
            if fp.marker {
                self.discontinuity = false;
                self.next_packet_frame_start = true;
            }
            return Ok(());
        }

        if self.next_packet_frame_start {
            self.frame_buf = Some(BytesMut::with_capacity(self.frame_size));
        }
        self.next_packet_frame_start = fp.marker;

        let Some(buf) = self.frame_buf.as_mut() else {
            return Ok(());
        };

        let mut payload = &hbrmt[HBRMT_HEADER_SIZE..];
        if header::get_clock_frequency(hbrmt) != 0 {
            payload = &payload[4..];
        }
        let ext = header::get_ext(hbrmt);
        if ext != 0 {
            let skip = 4 * usize::from(ext);
            if skip >= payload.len() {
                return Ok(());
            }
            payload = &payload[skip..];
        }

        let mut to_write = HBRMT_DATA_SIZE.min(payload.len());
        let space = self.frame_size - buf.len();
        if to_write > space {
            to_write = space;
            if !fp.marker {
                log::error!("Not overflowing output frame");
            }
        }
        buf.extend_from_slice(&payload[..to_write]);

        if !fp.marker {
            return Ok(());
        }

        let geometry = self.geometry.expect("geometry resolved");
        let fps = geometry.fps;
        let pts =
            u64::from(u32::MAX) + self.frame * clock::UCLOCK_FREQ * fps.den / fps.num;
        self.frame += 1;

        if let Some(flow) = self.pending_flow.take() {
            out.push(Port::Main, FrameUnit::new_flow(flow));
        }

        let buf = self.frame_buf.take().expect("frame in flight");
        let unit = FrameUnit::from_block(buf)
            .with_pts_orig(pts)
            .with_pts_prog(pts);
        out.push(Port::Main, unit);
        Ok(())
    }
}

impl Default for HbrmtDepacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::av::Stage for HbrmtDepacketizer {
    fn set_input_format(&mut self, flow: &FlowDefinition) -> Result<()> {
        flow.as_block()
            .map(|_| ())
            .ok_or_else(|| SdiError::Format("HBRMT depacketizer expects a block flow".into()))
    }

    fn push_frame(&mut self, frame: FrameUnit, out: &mut Outputs) -> Result<()> {
        if let Some(def) = frame.flow_def.clone() {
            return crate::av::Stage::set_input_format(self, &def);
        }
        let block = frame
            .block()
            .ok_or_else(|| SdiError::InvalidData("HBRMT depacketizer needs packets".into()))?;
        self.push(block, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut h = [0u8; HBRMT_HEADER_SIZE];
        header::set_ext(&mut h, 0);
        header::set_video_source_format(&mut h);
        header::set_frame_count(&mut h, 0x7a);
        header::set_clock_frequency(&mut h, 0x9);
        header::set_map(&mut h, 0);
        header::set_frame(&mut h, frame_code::HD_1080I);
        header::set_frate(&mut h, 0x18);
        header::set_sample(&mut h, 0x1);

        assert_eq!(header::get_ext(&h), 0);
        assert_eq!(header::get_frame_count(&h), 0x7a);
        assert_eq!(header::get_clock_frequency(&h), 0x9);
        assert_eq!(header::get_map(&h), 0);
        assert_eq!(header::get_frame(&h), frame_code::HD_1080I);
        assert_eq!(header::get_frate(&h), 0x18);
        assert_eq!(header::get_sample(&h), 0x1);
    }

    #[test]
    fn test_frate_table() {
        assert_eq!(frate_to_fps(0x18), Some(Rational::new(25, 1)));
        assert_eq!(frate_to_fps(0x17), Some(Rational::new(30000, 1001)));
        assert_eq!(frate_to_fps(0x13), None);
        assert_eq!(frate_to_fps(0x0f), None);
        assert_eq!(fps_to_frate(Rational::new(50, 1)), Some(0x12));
    }

    #[test]
    fn test_sequence_monotone_across_frames() {
        let mut p = HbrmtPacketizer::new();
        p.set_format(1920, 1080, Rational::new(25, 1)).unwrap();
        let payload = vec![0u8; p.frame_size];

        let first = p.packetize(&payload);
        let second = p.packetize(&payload);

        let last_seq = first.last().unwrap().sequence_number();
        assert_eq!(
            second.first().unwrap().sequence_number(),
            last_seq.wrapping_add(1)
        );
        assert!(first.last().unwrap().marker());
        assert!(!first[0].marker());
    }
}
