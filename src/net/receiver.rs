//! Redundant two-NIC RTP receiver.
//!
//! Opens two receive rings and merges them by RTP sequence number:
//! either link alone suffices, both links together only improve loss
//! tolerance. Packets are processed strictly interleaved between rings;
//! duplicates drop, future packets wait in their ring for the other ring
//! to provide the expected sequence first, and only when both rings
//! agree that the expected packet is gone does the receiver declare a
//! discontinuity and resynchronize on the next marker.

use crate::av::{FrameUnit, Outputs, Port};
use crate::codec::PixelCodecs;
use crate::format::hbrmt::{self, HBRMT_DATA_SIZE, HBRMT_HEADER_SIZE};
use crate::format::rfc4175::{RasterConfig, Rfc4175Depacketizer};
use crate::format::rtp::{self, RTP_HEADER_SIZE};
use crate::net::headers::udp_payload;
use crate::net::ring::{NicPort, RxRing};
use crate::sdi::decoder::DecoderOutput;
use crate::sdi::geometry::SdiGeometry;
use bytes::BytesMut;

/// What the receiver expects on the wire
pub enum ReceiverMode {
    /// SMPTE 2022-6; payload is unpacked to UYVY 16-bit on receive
    Hbrmt,
    /// RFC 4175 into pictures
    Rfc4175 {
        /// Raster of the incoming flow
        config: RasterConfig,
        /// Picture format to produce
        output: DecoderOutput,
    },
}

/// One interface of the receiver
pub struct RxPath {
    nic: Box<dyn NicPort>,
    ring: RxRing,
}

impl RxPath {
    /// Creates a path over a NIC and its ring
    pub fn new(nic: Box<dyn NicPort>, ring: RxRing) -> Self {
        Self { nic, ring }
    }
}

enum Verdict {
    /// Broken packet: drop it
    Invalid,
    /// Packet consumed (processed or discarded as duplicate/ancient)
    Handled {
        /// The packet carried the expected sequence number
        got_expected: bool,
    },
    /// Packet is in the future: keep it in the ring and try the other
    /// ring first
    Future,
}

struct HbrmtState {
    geometry: Option<&'static SdiGeometry>,
    frate: u8,
    frame: u8,
    buf: Option<BytesMut>,
    frame_bytes: usize,
    pkts_per_frame: u64,
    packets: u64,
    scratch: [u8; 5],
    scratch_len: usize,
}

/// Redundant two-NIC RTP receiver
pub struct RedundantReceiver {
    paths: [Option<RxPath>; 2],
    codecs: PixelCodecs,
    expected_seqnum: Option<u16>,
    last_timestamp: u32,
    discontinuity: bool,
    hbrmt: Option<HbrmtState>,
    rfc4175: Option<Rfc4175Depacketizer>,
    frames_emitted: u64,
    discontinuity_drops: u64,
}

impl RedundantReceiver {
    /// Creates a receiver in the given mode
    pub fn new(mode: ReceiverMode) -> Self {
        let (hbrmt, rfc4175) = match mode {
            ReceiverMode::Hbrmt => (
                Some(HbrmtState {
                    geometry: None,
                    frate: 0,
                    frame: 0,
                    buf: None,
                    frame_bytes: 0,
                    pkts_per_frame: 0,
                    packets: 0,
                    scratch: [0; 5],
                    scratch_len: 0,
                }),
                None,
            ),
            ReceiverMode::Rfc4175 { config, output } => {
                (None, Some(Rfc4175Depacketizer::new(config, output)))
            }
        };

        Self {
            paths: [None, None],
            codecs: PixelCodecs::new(),
            expected_seqnum: None,
            last_timestamp: 0,
            discontinuity: false,
            hbrmt,
            rfc4175,
            frames_emitted: 0,
            discontinuity_drops: 0,
        }
    }

    /// Attaches an interface; `idx` is 0 or 1
    pub fn add_path(&mut self, idx: usize, nic: Box<dyn NicPort>, ring: RxRing) {
        self.paths[idx] = Some(RxPath::new(nic, ring));
    }

    /// Frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Frames dropped to discontinuities so far
    pub fn discontinuity_drops(&self) -> u64 {
        self.discontinuity_drops
    }

    fn handle_hbrmt_packet(&mut self, rtp: &[u8], marker: bool) -> bool {
        let state = self.hbrmt.as_mut().expect("hbrmt mode");
        let hbrmt_hdr = &rtp[RTP_HEADER_SIZE..];

        if hbrmt::header::get_map(hbrmt_hdr) != 0 {
            // level B not supported
            return true;
        }

        let frate = hbrmt::header::get_frate(hbrmt_hdr);
        let frame = hbrmt::header::get_frame(hbrmt_hdr);

        if state.geometry.is_none() {
            let fps = match hbrmt::frate_to_fps(frate) {
                Some(fps) => fps,
                None => {
                    log::error!("Invalid hbrmt frate {frate:#x}");
                    return true;
                }
            };
            let (hsize, vsize) = match frame {
                hbrmt::frame_code::SD_486I => (720u32, 486u32),
                hbrmt::frame_code::SD_576I => (720, 576),
                hbrmt::frame_code::HD_1080I
                | hbrmt::frame_code::HD_1080P
                | hbrmt::frame_code::HD_1080PSF => (1920, 1080),
                hbrmt::frame_code::HD_720P => (1280, 720),
                _ => {
                    log::error!("Invalid hbrmt frame code {frame:#x}");
                    return true;
                }
            };
            let Some(geometry) = crate::sdi::geometry::find_geometry(hsize, vsize, fps) else {
                log::error!("no SDI geometry for {hsize}x{vsize} @ {fps}");
                return true;
            };
            state.geometry = Some(geometry);
            state.frate = frate;
            state.frame = frame;
            // frame buffer holds UYVY 16-bit samples
            state.frame_bytes =
                usize::from(geometry.width) * usize::from(geometry.height) * 2 * 2;
            let packed = state.frame_bytes / 2 * 10 / 8;
            state.pkts_per_frame = (packed as u64).div_ceil(HBRMT_DATA_SIZE as u64);
        }

        if frate != state.frate || frame != state.frame {
            log::error!("Incorrect format (frate {frate} frame {frame})");
            state.geometry = None;
            state.buf = None;
            return true;
        }

        let Some(buf) = state.buf.as_mut() else {
            return false;
        };

        let mut payload = &rtp[RTP_HEADER_SIZE + HBRMT_HEADER_SIZE..];
        if hbrmt::header::get_clock_frequency(hbrmt_hdr) != 0 {
            payload = &payload[4..];
        }
        let ext = hbrmt::header::get_ext(hbrmt_hdr);
        if ext != 0 {
            let skip = 4 * usize::from(ext);
            if skip >= payload.len() {
                return true;
            }
            payload = &payload[skip..];
        }

        if payload.len() != HBRMT_DATA_SIZE {
            log::debug!("Too small packet, ignoring, {}", payload.len());
            return true; // discontinuity
        }

        let mut src = payload;
        let mut dst_space = state.frame_bytes - buf.len();

        // finish a 5-byte group straddling the previous packet
        if state.scratch_len > 0 && dst_space > 8 {
            let take = 5 - state.scratch_len;
            state.scratch[state.scratch_len..].copy_from_slice(&src[..take]);
            src = &src[take..];

            let mut samples = [0u16; 4];
            (self.codecs.sdi_to_uyvy)(&state.scratch, &mut samples);
            for sample in samples {
                buf.extend_from_slice(&sample.to_le_bytes());
            }
            dst_space -= 8;
            state.scratch_len = 0;
        }

        let mut src_len = src.len();
        if src_len > dst_space * 5 / 8 {
            src_len = dst_space * 5 / 8;
            if !marker {
                return true; // discontinuity
            }
        }

        let unpack_bytes = src_len / 5 * 5;
        let unpack_samples = unpack_bytes * 4 / 5;
        let mut samples = vec![0u16; unpack_samples];
        (self.codecs.sdi_to_uyvy)(&src[..unpack_bytes], &mut samples);
        for sample in &samples {
            buf.extend_from_slice(&sample.to_le_bytes());
        }

        if unpack_bytes < src_len {
            let rest = src_len - unpack_bytes;
            state.scratch[..rest].copy_from_slice(&src[unpack_bytes..src_len]);
            state.scratch_len = rest;
        }

        state.packets += 1;
        false
    }

    fn emit_hbrmt_frame(&mut self, systime: u64, out: &mut Outputs) {
        let state = self.hbrmt.as_mut().expect("hbrmt mode");
        let Some(buf) = state.buf.take() else { return };

        if state.packets != state.pkts_per_frame {
            self.discontinuity = true;
        }

        let mut unit = FrameUnit::from_block(buf);
        unit.clock.cr_sys = Some(systime);
        if self.discontinuity {
            unit.discontinuity = true;
        }
        self.frames_emitted += 1;
        out.push(Port::Main, unit);
    }

    fn do_packet(&mut self, idx: usize, systime: u64, out: &mut Outputs) -> Verdict {
        let frame = {
            let path = self.paths[idx].as_ref().expect("path exists");
            match path.ring.peek() {
                Some(frame) => frame.to_vec(),
                None => return Verdict::Invalid,
            }
        };

        let Some(rtp_packet) = udp_payload(&frame) else {
            return Verdict::Invalid;
        };
        let Some(fp) = rtp::read_fingerprint(rtp_packet) else {
            return Verdict::Invalid;
        };

        if self.hbrmt.is_some()
            && rtp_packet.len() < RTP_HEADER_SIZE + HBRMT_HEADER_SIZE + HBRMT_DATA_SIZE
        {
            return Verdict::Invalid;
        }

        if let Some(expected) = self.expected_seqnum {
            if fp.sequence_number != expected {
                let diff = fp.sequence_number.wrapping_sub(expected);
                let timestamp_diff = fp.timestamp.wrapping_sub(self.last_timestamp);

                if diff > 0x8000 {
                    // seqnum below expected: duplicate from the other ring
                    return Verdict::Handled { got_expected: false };
                }
                if timestamp_diff >= 0x8000_0000 {
                    // way too far in the future: ancient
                    return Verdict::Handled { got_expected: false };
                }
                return Verdict::Future;
            }
        }

        // we have a valid packet with the expected sequence number
        let rtp_packet = rtp_packet.to_vec();
        let marker = fp.marker;

        if self.hbrmt.is_some() {
            if !self.discontinuity && self.handle_hbrmt_packet(&rtp_packet, marker) {
                self.expected_seqnum = Some(fp.sequence_number.wrapping_add(1));
                self.last_timestamp = fp.timestamp;
                return Verdict::Handled { got_expected: true };
            }

            let has_frame = self
                .hbrmt
                .as_ref()
                .map(|s| s.buf.is_some())
                .unwrap_or(false);
            if (marker || self.discontinuity) && has_frame {
                self.emit_hbrmt_frame(systime, out);
            }

            let no_frame = self
                .hbrmt
                .as_ref()
                .map(|s| s.buf.is_none())
                .unwrap_or(true);
            if marker && (self.discontinuity || no_frame) {
                // reset discontinuity when we see the next marker
                self.discontinuity = false;
                if let Some(state) = self.hbrmt.as_mut() {
                    if state.frame_bytes > 0 {
                        state.buf = Some(BytesMut::with_capacity(state.frame_bytes));
                        state.packets = 0;
                        state.scratch_len = 0;
                    }
                }
            }
        } else if let Some(depack) = self.rfc4175.as_mut() {
            // the depacketizer resolves continuation headers and the
            // frame lifecycle itself, including resync after a reset
            let before = out.len();
            if let Err(err) = depack.push(&rtp_packet, out) {
                log::warn!("{err}");
            }
            if out.len() > before {
                self.frames_emitted += 1;
            }
            if self.discontinuity && marker {
                self.discontinuity = false;
            }
        }

        self.expected_seqnum = Some(fp.sequence_number.wrapping_add(1));
        self.last_timestamp = fp.timestamp;
        Verdict::Handled { got_expected: true }
    }

    /// One receive tick at `systime`: synchronizes both rings and merges
    /// their packets into `out`.
    pub fn tick(&mut self, systime: u64, out: &mut Outputs) {
        let mut pkts = [0usize; 2];
        for (i, path) in self.paths.iter_mut().enumerate() {
            let Some(path) = path else { continue };
            let RxPath { nic, ring } = path;
            nic.rx_sync(ring);
            pkts[i] = ring.len();
        }

        let sources = usize::from(pkts[0] > 0) + usize::from(pkts[1] > 0);

        while pkts[0] > 0 || pkts[1] > 0 {
            let mut future = 0;
            for idx in 0..2 {
                if self.paths[idx].is_none() || pkts[idx] == 0 {
                    continue;
                }

                loop {
                    match self.do_packet(idx, systime, out) {
                        Verdict::Future => {
                            future += 1;
                            // the other ring may yet provide the packet we
                            // want; if it is empty, wait for it to refill
                            if pkts[1 - idx] == 0 {
                                pkts[idx] = 0;
                            }
                            break; // keep packet in ring
                        }
                        Verdict::Handled { got_expected } => {
                            if got_expected {
                                future = 0;
                            }
                            self.paths[idx].as_mut().unwrap().ring.pop();
                            pkts[idx] -= 1;
                        }
                        Verdict::Invalid => {
                            self.paths[idx].as_mut().unwrap().ring.pop();
                            pkts[idx] -= 1;
                        }
                    }
                    if pkts[idx] == 0 {
                        break;
                    }
                }
            }

            if future == sources && future > 0 {
                // neither ring can provide the expected packet
                self.discontinuity = true;
                self.discontinuity_drops += 1;
                if let Some(state) = self.hbrmt.as_mut() {
                    state.buf = None;
                }
                if let Some(depack) = self.rfc4175.as_mut() {
                    depack.reset();
                }
                self.expected_seqnum = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::Rational;
    use crate::format::rfc4175::Rfc4175Packetizer;
    use crate::net::headers::{fill_headers, LinkAddress, NET_HEADERS_LEN};
    use crate::net::ring::{MockLink, MockNic};

    fn wrap_eth(rtp: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; NET_HEADERS_LEN + rtp.len()];
        fill_headers(&mut frame, &LinkAddress::default(), rtp.len() as u16);
        frame[NET_HEADERS_LEN..].copy_from_slice(rtp);
        frame
    }

    fn rfc4175_receiver() -> (RedundantReceiver, [MockNic; 2]) {
        let config = RasterConfig {
            width: 1920,
            height: 1080,
            fps: Rational::new(25, 1),
            interlaced: true,
        };
        let receiver = RedundantReceiver::new(ReceiverMode::Rfc4175 {
            config,
            output: DecoderOutput::Planar10,
        });
        let nic0 = MockNic::new(MockLink::new(true));
        let nic1 = MockNic::new(MockLink::new(true));
        (receiver, [nic0, nic1])
    }

    fn test_packets() -> Vec<Vec<u8>> {
        let config = RasterConfig {
            width: 1920,
            height: 1080,
            fps: Rational::new(25, 1),
            interlaced: true,
        };
        let mut packetizer = Rfc4175Packetizer::new(config);

        let mut pic = crate::av::Picture {
            width: 1920,
            height: 1080,
            planes: vec![
                crate::av::Plane::new_b16(crate::av::CHROMA_Y10, 1920, 1080),
                crate::av::Plane::new_b16(crate::av::CHROMA_U10, 960, 1080),
                crate::av::Plane::new_b16(crate::av::CHROMA_V10, 960, 1080),
            ],
        };
        for plane in &mut pic.planes {
            if let crate::av::PlaneData::B16(data) = &mut plane.data {
                for (i, s) in data.iter_mut().enumerate() {
                    *s = (i % 1015) as u16 + 4;
                }
            }
        }
        packetizer.packetize(&pic).unwrap()
    }

    #[test]
    fn test_dual_ring_dedup() {
        let (mut receiver, [nic0, nic1]) = rfc4175_receiver();
        let packets = test_packets();

        // both rings carry the identical stream, ring 1 lagging by 10
        // packets; every duplicate must be absorbed
        for p in &packets {
            nic0.inject(wrap_eth(p));
        }
        for p in &packets[..packets.len() - 10] {
            nic1.inject(wrap_eth(p));
        }

        receiver.add_path(0, Box::new(nic0), RxRing::new());
        receiver.add_path(1, Box::new(nic1), RxRing::new());

        let mut out = Outputs::new();
        receiver.tick(0, &mut out);

        let frames: Vec<_> = out.drain().collect();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].1.discontinuity);
        assert_eq!(receiver.discontinuity_drops(), 0);
    }

    #[test]
    fn test_loss_on_one_ring_is_seamless() {
        let (mut receiver, [nic0, nic1]) = rfc4175_receiver();
        let packets = test_packets();

        // ring 0 loses a burst in the middle; ring 1 has it
        for (i, p) in packets.iter().enumerate() {
            if !(100..130).contains(&i) {
                nic0.inject(wrap_eth(p));
            }
        }
        for p in &packets {
            nic1.inject(wrap_eth(p));
        }

        receiver.add_path(0, Box::new(nic0), RxRing::new());
        receiver.add_path(1, Box::new(nic1), RxRing::new());

        let mut out = Outputs::new();
        receiver.tick(0, &mut out);

        let frames: Vec<_> = out.drain().collect();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].1.discontinuity);
        assert_eq!(receiver.discontinuity_drops(), 0);
    }

    #[test]
    fn test_loss_on_both_rings_declares_discontinuity() {
        let (mut receiver, [nic0, nic1]) = rfc4175_receiver();
        let packets = test_packets();

        // the same burst is missing from both rings
        for (i, p) in packets.iter().enumerate() {
            if !(100..130).contains(&i) {
                nic0.inject(wrap_eth(p));
                nic1.inject(wrap_eth(p));
            }
        }

        receiver.add_path(0, Box::new(nic0), RxRing::new());
        receiver.add_path(1, Box::new(nic1), RxRing::new());

        let mut out = Outputs::new();
        receiver.tick(0, &mut out);
        assert!(receiver.discontinuity_drops() > 0);
    }
}
