//! Redundant two-NIC RTP sender.
//!
//! Owns two transmit rings on two interfaces and keeps them
//! packet-for-packet aligned: every payload packet is written to both
//! rings with identical RTP sequencing, pad packets hold the pacing rate,
//! and a link that comes back up is resynchronized in two passes (coarse
//! to within ~400 packets, then exact) before carrying real data again.
//!
//! The pump calls [`RedundantSender::tick`] at the pacing cadence; frames
//! queue through [`RedundantSender::push_frame`].

use crate::av::{clock::UCLOCK_FREQ, FrameUnit, HoldQueue, Rational};
use crate::codec::PixelCodecs;
use crate::format::hbrmt::{self, HBRMT_DATA_SIZE, HBRMT_HEADER_SIZE};
use crate::format::rfc4175::{RasterConfig, Rfc4175Packetizer};
use crate::format::rtp::{self, PAYLOAD_TYPE_HBRMT, RTP_HEADER_SIZE};
use crate::net::headers::{fill_headers, LinkAddress, NET_HEADERS_LEN};
use crate::net::ring::{NicPort, TxRing, PAD_PACKET_SIZE};
use crate::{Result, SdiError};
use std::collections::VecDeque;

/// Fixed pre-roll ahead of the first transmitted frame; also the maximum
/// delay between two ring refills
pub const FIXED_PRE_ROLL: u64 = UCLOCK_FREQ / 25;

/// Ethernet frame length of one HBRMT packet
const HBRMT_FRAME_LEN: usize =
    NET_HEADERS_LEN + RTP_HEADER_SIZE + HBRMT_HEADER_SIZE + HBRMT_DATA_SIZE;

/// Per-packet wire overhead charged to the pacing budget (ethernet CRC)
const WIRE_CRC: usize = 4;

/// Template length of the per-path packet headers
const TEMPLATE_LEN: usize = NET_HEADERS_LEN + RTP_HEADER_SIZE + HBRMT_HEADER_SIZE;

/// Coarse resync margin in packets
const RESYNC_MARGIN: usize = 400;

/// What the sender accepts on its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderMode {
    /// Pre-interleaved UYVY byte frames, packed to 10 bits on the fly
    Hbrmt,
    /// Picture frames cut into RFC 4175 packets
    Rfc4175,
}

/// One interface of the sender
pub struct TxPath {
    nic: Box<dyn NicPort>,
    ring: TxRing,
    addr: LinkAddress,
    header: [u8; TEMPLATE_LEN],
    up: bool,
    link_up: bool,
    wait: u64,
}

impl TxPath {
    /// Creates a path over a NIC and its ring
    pub fn new(nic: Box<dyn NicPort>, ring: TxRing, addr: LinkAddress) -> Self {
        Self {
            nic,
            ring,
            addr,
            header: [0; TEMPLATE_LEN],
            up: true,
            link_up: true,
            wait: 0,
        }
    }

    fn fill_pads(&mut self, count: usize) {
        for _ in 0..count {
            if self.ring.space() == 0 {
                break;
            }
            let eth = self.header[..14].to_vec();
            let slot = self.ring.slot_mut();
            slot.buf[..PAD_PACKET_SIZE].fill(0);
            slot.buf[..14].copy_from_slice(&eth);
            slot.len = PAD_PACKET_SIZE;
            self.ring.advance();
        }
    }
}

struct CurrentFrame {
    unit: FrameUnit,
    offset: usize,
}

/// Redundant two-NIC RTP sender
pub struct RedundantSender {
    paths: [Option<TxPath>; 2],
    mode: SenderMode,
    fps: Rational,
    latency: u64,
    packetizer: Option<Rfc4175Packetizer>,
    pending_packets: VecDeque<Vec<u8>>,
    queue: HoldQueue,
    current: Option<CurrentFrame>,
    codecs: PixelCodecs,
    frame_size: usize,
    frame_code: u8,
    frate: u8,
    frame_count: u64,
    seqnum: u16,
    pkt: u64,
    carry: [u8; 8],
    carry_len: usize,
    bits: u64,
    start: u64,
    fakes: u64,
    preroll: bool,
}

impl RedundantSender {
    /// Creates a sender in the given mode
    pub fn new(mode: SenderMode) -> Self {
        Self {
            paths: [None, None],
            mode,
            fps: Rational::new(25, 1),
            latency: 0,
            packetizer: None,
            pending_packets: VecDeque::new(),
            queue: HoldQueue::new(crate::config::get_queue_limit()),
            current: None,
            codecs: PixelCodecs::new(),
            frame_size: 0,
            frame_code: 0,
            frate: 0,
            frame_count: 0,
            seqnum: 0,
            pkt: 0,
            carry: [0; 8],
            carry_len: 0,
            bits: 0,
            start: 0,
            fakes: 0,
            preroll: true,
        }
    }

    /// Attaches an interface; `idx` is 0 or 1
    pub fn add_path(&mut self, idx: usize, nic: Box<dyn NicPort>, ring: TxRing, addr: LinkAddress) {
        self.paths[idx] = Some(TxPath::new(nic, ring, addr));
    }

    /// Sets the flow parameters and rebuilds the per-path header
    /// templates
    pub fn set_flow(
        &mut self,
        hsize: u32,
        vsize: u32,
        fps: Rational,
        latency: u64,
    ) -> Result<()> {
        self.fps = fps;
        self.latency = latency;
        self.preroll = true;

        self.frame_code = match (hsize, vsize) {
            (720, 486) => hbrmt::frame_code::SD_486I,
            (720, 576) => hbrmt::frame_code::SD_576I,
            (1920, 1080) => hbrmt::frame_code::HD_1080I,
            (1280, 720) => hbrmt::frame_code::HD_720P,
            _ => return Err(SdiError::Format("unsupported raster".into())),
        };
        self.frate = hbrmt::fps_to_frate(fps)
            .ok_or_else(|| SdiError::Format(format!("unsupported rate {fps}")))?;

        match self.mode {
            SenderMode::Hbrmt => {
                let payload_size = (RTP_HEADER_SIZE + HBRMT_HEADER_SIZE + HBRMT_DATA_SIZE) as u16;
                for path in self.paths.iter_mut().flatten() {
                    let mut header = [0u8; TEMPLATE_LEN];
                    fill_headers(&mut header, &path.addr, payload_size);
                    rtp::write_header(
                        &mut header[NET_HEADERS_LEN..],
                        PAYLOAD_TYPE_HBRMT,
                        0,
                        0,
                        false,
                    );
                    let hbrmt_hdr = &mut header[NET_HEADERS_LEN + RTP_HEADER_SIZE..];
                    hbrmt::header::set_ext(hbrmt_hdr, 0);
                    hbrmt::header::set_video_source_format(hbrmt_hdr);
                    hbrmt::header::set_video_source_id(hbrmt_hdr, 0);
                    hbrmt::header::set_frame_count(hbrmt_hdr, 0);
                    hbrmt::header::set_clock_frequency(hbrmt_hdr, 0);
                    hbrmt::header::set_map(hbrmt_hdr, 0);
                    hbrmt::header::set_frame(hbrmt_hdr, self.frame_code);
                    hbrmt::header::set_frate(hbrmt_hdr, self.frate);
                    hbrmt::header::set_sample(hbrmt_hdr, 0x1);
                    hbrmt::header::set_fmt_reserve(hbrmt_hdr);
                    path.header = header;
                }
            }
            SenderMode::Rfc4175 => {
                for path in self.paths.iter_mut().flatten() {
                    let mut header = [0u8; TEMPLATE_LEN];
                    fill_headers(&mut header, &path.addr, 0);
                    path.header = header;
                }
                self.packetizer = Some(Rfc4175Packetizer::new(RasterConfig {
                    width: hsize,
                    height: vsize,
                    fps,
                    interlaced: vsize == 1080 || vsize == 576 || vsize == 486,
                }));
            }
        }
        Ok(())
    }

    /// Queues a frame for transmission.
    ///
    /// The first data frame fixes the packed frame size and writes the
    /// target rate to both NICs' `tx_maxrate`.
    pub fn push_frame(&mut self, frame: FrameUnit) {
        if self.frame_size == 0 {
            if let Some(block) = frame.block() {
                // block input is UYVY 16-bit samples; packed size is 5/8
                self.frame_size = block.len() * 5 / 8;
            } else if let Some(pic) = frame.picture() {
                self.frame_size =
                    pic.width as usize * pic.height as usize * 2 * 10 / 8;
            }

            if self.frame_size > 0 {
                let rate = self.target_rate();
                for path in self.paths.iter_mut().flatten() {
                    path.nic.set_tx_maxrate(rate);
                }
            }
        }

        self.queue.hold(frame);
    }

    /// Frames waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pad packets inserted so far
    pub fn pad_packets(&self) -> u64 {
        self.fakes
    }

    fn packets_per_frame(&self) -> u64 {
        (self.frame_size as u64).div_ceil(HBRMT_DATA_SIZE as u64)
    }

    fn target_rate(&self) -> u64 {
        8 * (HBRMT_FRAME_LEN + WIRE_CRC) as u64 * self.packets_per_frame() * self.fps.num
            / self.fps.den
    }

    fn check_links(&mut self, now: u64) {
        for (i, path) in self.paths.iter_mut().enumerate() {
            let Some(path) = path else { continue };
            let up = path.nic.is_up();
            path.link_up = up;
            if up != path.up {
                path.up = false; // will come up after resync
                if path.wait == 0 {
                    path.wait = now;
                    log::warn!("LINK {} went {}", i, if up { "UP" } else { "DOWN" });
                }
            }
        }
    }

    fn resync(&mut self, now: u64) {
        for i in 0..2 {
            let (needs, other_up) = {
                let Some(path) = self.paths[i].as_ref() else { continue };
                let other_up = self.paths[1 - i]
                    .as_ref()
                    .map(|p| p.up)
                    .unwrap_or(false);
                (
                    path.wait != 0
                        && now.saturating_sub(path.wait) > UCLOCK_FREQ / 10
                        && path.link_up,
                    other_up,
                )
            };
            if !needs || !other_up {
                continue;
            }

            let (first, second) = self.paths.split_at_mut(1);
            let (recovering, other) = if i == 0 {
                (first[0].as_mut().unwrap(), second[0].as_mut().unwrap())
            } else {
                (second[0].as_mut().unwrap(), first[0].as_mut().unwrap())
            };

            recovering.nic.tx_sync(&mut recovering.ring);
            if recovering.ring.space() < recovering.ring.num_slots() - 1 {
                log::info!("waiting, {}", recovering.ring.space());
                continue;
            }

            // synchronize within the coarse margin
            other.nic.tx_sync(&mut other.ring);
            let queued = other.ring.pending();
            recovering.fill_pads(queued.saturating_sub(RESYNC_MARGIN));

            recovering.nic.tx_sync(&mut recovering.ring);
            other.nic.tx_sync(&mut other.ring);
            log::info!(
                "RESYNCED (#1), tx0 {} tx1 {}",
                other.ring.space(),
                recovering.ring.space()
            );

            // synchronize exactly
            let diff = recovering
                .ring
                .space()
                .saturating_sub(other.ring.space());
            recovering.fill_pads(diff);

            recovering.nic.tx_sync(&mut recovering.ring);
            other.nic.tx_sync(&mut other.ring);

            recovering.up = true;
            recovering.wait = 0;
            log::info!(
                "RESYNCED (#2), tx0 {} tx1 {}",
                other.ring.space(),
                recovering.ring.space()
            );
        }
    }

    fn tx_avail(&self) -> Option<usize> {
        self.paths
            .iter()
            .flatten()
            .filter(|p| p.up)
            .map(|p| p.ring.space())
            .min()
    }

    fn pace(&mut self, now: u64, txavail: &mut usize) {
        if self.start == 0 || now <= self.start || *txavail == 0 {
            return;
        }

        let num_slots = self
            .paths
            .iter()
            .flatten()
            .find(|p| p.up)
            .map(|p| p.ring.num_slots())
            .unwrap_or(0);
        if num_slots == 0 {
            return;
        }

        let in_flight = (num_slots - 1 - *txavail) as u128
            * ((PAD_PACKET_SIZE + WIRE_CRC) * 8) as u128;
        let mut bps = (self.bits as u128).saturating_sub(in_flight);
        bps *= UCLOCK_FREQ as u128;
        bps /= (now - self.start) as u128;

        let rate = 8 * (HBRMT_FRAME_LEN + WIRE_CRC) as u128 * self.packets_per_frame() as u128
            * self.fps.num as u128;
        let err = (bps * self.fps.den as u128) as i128 - rate as i128;
        let err = err / self.fps.den as i128;

        if err > 0 {
            for path in self.paths.iter_mut().flatten() {
                if path.up {
                    path.fill_pads(1);
                }
            }
            *txavail -= 1;
            self.fakes += 1;
        }
    }

    /// Pops the next frame honoring the pre-roll and late-drop policy;
    /// returns false when the loop should stop for this tick
    fn ensure_current(&mut self, now: u64) -> bool {
        if let Some(current) = &self.current {
            if self.preroll {
                if let Some(pts_sys) = current.unit.clock.pts_sys {
                    if pts_sys + self.latency + FIXED_PRE_ROLL > now {
                        return false; // still prerolling
                    }
                }
                log::info!("end of preroll");
                self.preroll = false;
            }
            return true;
        }

        loop {
            let Some(unit) = self.queue.pop() else {
                return false;
            };

            if let Some(pts_sys) = unit.clock.pts_sys {
                let deadline = pts_sys + self.latency;

                if self.preroll && deadline + FIXED_PRE_ROLL > now {
                    // hold until the pre-roll window opens
                    self.current = Some(CurrentFrame { unit, offset: 0 });
                    return false;
                }

                if deadline + FIXED_PRE_ROLL < now {
                    log::warn!(
                        "drop late frame, {} ms",
                        (now - deadline - FIXED_PRE_ROLL) / 27_000
                    );
                    continue;
                }
            }

            self.preroll = false;
            self.current = Some(CurrentFrame { unit, offset: 0 });
            return true;
        }
    }

    fn hbrmt_fill_one(&mut self, now: u64) -> bool {
        if !self.ensure_current(now) {
            return false;
        }

        if self
            .current
            .as_ref()
            .map(|c| c.unit.block().is_none())
            .unwrap_or(false)
        {
            // not a byte frame; skip it
            self.current = None;
            return true;
        }

        let (consumed, samples, marker, payload_len, timestamp) = {
            let current = self.current.as_ref().expect("current frame");
            let block = current.unit.block().expect("block payload");
            let bytes_left = block.len() - current.offset;
            let pack_bytes_left = bytes_left * 5 / 8 + self.carry_len;
            let payload_len = HBRMT_DATA_SIZE.min(pack_bytes_left);
            let need = payload_len - self.carry_len;
            let samples = need.div_ceil(5) * 4;
            let consumed = samples * 2;
            let marker = consumed >= bytes_left;

            let frame_duration = 90_000 * self.fps.den / self.fps.num;
            let timestamp = self.frame_count * frame_duration
                + frame_duration * self.pkt * HBRMT_DATA_SIZE as u64 / self.frame_size as u64;

            (consumed, samples, marker, payload_len, timestamp as u32)
        };
        self.pkt += 1;

        // convert the consumed window to 16-bit samples
        let mut uyvy = vec![0u16; samples];
        {
            let current = self.current.as_ref().expect("current frame");
            let block = current.unit.block().expect("block payload");
            let src = &block[current.offset..current.offset + consumed];
            for (pair, sample) in src.chunks_exact(2).zip(uyvy.iter_mut()) {
                *sample = u16::from_le_bytes([pair[0], pair[1]]);
            }
        }

        let produced = samples * 5 / 4;
        let carry = self.carry;
        let carry_len = self.carry_len;
        let seqnum = self.seqnum;
        let frame_count = self.frame_count;
        let codecs = self.codecs;

        let (first, second) = self.paths.split_at_mut(1);
        let mut dst0 = first[0].as_mut().filter(|p| p.up);
        let mut dst1 = second[0].as_mut().filter(|p| p.up);

        let mut packed_tail = [0u8; 8];
        let mut tail_len = 0usize;

        {
            let write_path = |path: &mut TxPath, payload_area: Option<&[u8]>| {
                let mut header = path.header;
                rtp::write_header(
                    &mut header[NET_HEADERS_LEN..],
                    PAYLOAD_TYPE_HBRMT,
                    seqnum,
                    timestamp,
                    marker,
                );
                hbrmt::header::set_frame_count(
                    &mut header[NET_HEADERS_LEN + RTP_HEADER_SIZE..],
                    (frame_count & 0xff) as u8,
                );
                let slot = path.ring.slot_mut();
                slot.buf[..TEMPLATE_LEN].copy_from_slice(&header);
                slot.buf[TEMPLATE_LEN..TEMPLATE_LEN + carry_len]
                    .copy_from_slice(&carry[..carry_len]);
                if let Some(packed) = payload_area {
                    slot.buf[TEMPLATE_LEN + carry_len..TEMPLATE_LEN + carry_len + produced]
                        .copy_from_slice(packed);
                }
                // zero-pad a short final payload
                slot.buf[TEMPLATE_LEN + payload_len..HBRMT_FRAME_LEN].fill(0);
                slot.len = HBRMT_FRAME_LEN;
            };

            match (&mut dst0, &mut dst1) {
                (Some(p0), Some(p1)) => {
                    // pack once into both NIC buffers
                    let mut scratch0 = vec![0u8; produced];
                    let mut scratch1 = vec![0u8; produced];
                    (codecs.uyvy_to_sdi_2)(&mut scratch0, &mut scratch1, &uyvy);
                    if produced > payload_len - carry_len {
                        tail_len = produced - (payload_len - carry_len);
                        packed_tail[..tail_len]
                            .copy_from_slice(&scratch0[produced - tail_len..]);
                    }
                    write_path(p0, Some(&scratch0));
                    write_path(p1, Some(&scratch1));
                }
                (Some(p), None) | (None, Some(p)) => {
                    let mut scratch = vec![0u8; produced];
                    (codecs.uyvy_to_sdi)(&mut scratch, &uyvy);
                    if produced > payload_len - carry_len {
                        tail_len = produced - (payload_len - carry_len);
                        packed_tail[..tail_len]
                            .copy_from_slice(&scratch[produced - tail_len..]);
                    }
                    write_path(p, Some(&scratch));
                }
                (None, None) => return false,
            }
        }

        if let Some(p) = dst0.as_mut() {
            p.ring.advance();
        }
        if let Some(p) = dst1.as_mut() {
            p.ring.advance();
        }

        self.carry[..tail_len].copy_from_slice(&packed_tail[..tail_len]);
        self.carry_len = tail_len;
        self.seqnum = self.seqnum.wrapping_add(1);
        self.bits += ((HBRMT_FRAME_LEN + WIRE_CRC) * 8) as u64;

        let exhausted = {
            let current = self.current.as_mut().expect("current frame");
            current.offset += consumed;
            current
                .unit
                .block()
                .map(|b| current.offset >= b.len())
                .unwrap_or(true)
        };
        if exhausted {
            self.current = None;
            self.pkt = 0;
            self.frame_count += 1;
            self.carry_len = 0;
        }
        true
    }

    fn rfc4175_fill_one(&mut self, now: u64) -> bool {
        if self.pending_packets.is_empty() {
            if !self.ensure_current(now) {
                return false;
            }
            let current = self.current.take().expect("current frame");
            let Some(pic) = current.unit.picture() else {
                return true;
            };
            let Some(packetizer) = self.packetizer.as_mut() else {
                return false;
            };
            match packetizer.packetize(pic) {
                Ok(packets) => self.pending_packets.extend(packets),
                Err(err) => {
                    log::warn!("{err}");
                    return true;
                }
            }
        }

        let Some(rtp_packet) = self.pending_packets.pop_front() else {
            return false;
        };

        let frame_len = NET_HEADERS_LEN + rtp_packet.len();
        for path in self.paths.iter_mut().flatten() {
            if !path.up {
                continue;
            }
            let mut header = [0u8; NET_HEADERS_LEN];
            fill_headers(&mut header, &path.addr, rtp_packet.len() as u16);

            let slot = path.ring.slot_mut();
            slot.buf[..NET_HEADERS_LEN].copy_from_slice(&header);
            slot.buf[NET_HEADERS_LEN..frame_len].copy_from_slice(&rtp_packet);
            slot.len = frame_len;
            path.ring.advance();
        }

        self.bits += ((frame_len + WIRE_CRC) * 8) as u64;
        true
    }

    /// One pacing pump tick at `now`: refreshes link state, resyncs
    /// recovered links, paces with pad packets and refills the rings.
    pub fn tick(&mut self, now: u64) {
        self.check_links(now);
        self.resync(now);

        let Some(mut txavail) = self.tx_avail() else {
            log::error!("No interface is up!");
            return;
        };

        self.pace(now, &mut txavail);

        while txavail > 0 {
            let filled = match self.mode {
                SenderMode::Hbrmt => self.hbrmt_fill_one(now),
                SenderMode::Rfc4175 => self.rfc4175_fill_one(now),
            };
            if !filled {
                break;
            }
            txavail -= 1;
        }

        if self.start == 0 {
            self.start = now;
        }

        for path in self.paths.iter_mut().flatten() {
            if path.up {
                let TxPath { nic, ring, .. } = path;
                nic.tx_sync(ring);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ring::{MockLink, MockNic};
    use bytes::BytesMut;
    use std::net::Ipv4Addr;

    fn address(last: u8) -> LinkAddress {
        LinkAddress {
            src_mac: [2, 0, 0, 0, 0, last],
            dst_mac: [2, 0, 0, 0, 1, last],
            src_ip: Ipv4Addr::new(192, 168, 1, 1),
            dst_ip: Ipv4Addr::new(192, 168, 1, 3),
            src_port: 2000,
            dst_port: 2000,
        }
    }

    fn uyvy_frame_blanking(samples: usize) -> BytesMut {
        let mut block = BytesMut::with_capacity(samples * 2);
        for i in 0..samples {
            let value: u16 = if i % 2 == 0 { 0x200 } else { 0x040 };
            block.extend_from_slice(&value.to_le_bytes());
        }
        block
    }

    type Capture = std::sync::Arc<parking_lot::Mutex<Vec<Vec<u8>>>>;

    fn sender_with_mocks(ring_slots: usize) -> (RedundantSender, [MockLink; 2], Vec<Capture>) {
        let mut sender = RedundantSender::new(SenderMode::Hbrmt);
        let links = [MockLink::new(true), MockLink::new(true)];
        let mut captures = Vec::new();
        for i in 0..2 {
            let nic = MockNic::new(links[i].clone());
            captures.push(nic.transmitted());
            sender.add_path(i, Box::new(nic), TxRing::new(ring_slots), address(i as u8));
        }
        sender.set_flow(720, 576, Rational::new(25, 1), 0).unwrap();
        (sender, links, captures)
    }

    #[test]
    fn test_hbrmt_packets_identical_on_both_rings() {
        let (mut sender, _links, captures) = sender_with_mocks(4096);

        // one PAL frame of UYVY samples, immediate timing
        let samples = 864 * 625 * 2;
        let frame = FrameUnit::from_block(uyvy_frame_blanking(samples));
        sender.push_frame(frame);
        sender.tick(FIXED_PRE_ROLL * 2);

        let sent0 = captures[0].lock();
        let sent1 = captures[1].lock();
        assert!(!sent0.is_empty());
        assert_eq!(sent0.len(), sent1.len());

        // payloads identical, headers differ only in addressing
        for (a, b) in sent0.iter().zip(sent1.iter()) {
            assert_eq!(a.len(), 1438);
            assert_eq!(a[NET_HEADERS_LEN..], b[NET_HEADERS_LEN..]);
        }

        // monotone RTP sequence numbers
        for (i, frame) in sent0.iter().enumerate() {
            let seq = u16::from_be_bytes([frame[NET_HEADERS_LEN + 2], frame[NET_HEADERS_LEN + 3]]);
            assert_eq!(seq, i as u16);
        }

        // last packet of the frame carries the marker
        let expected_packets =
            (samples * 2 * 5 / 8).div_ceil(HBRMT_DATA_SIZE);
        assert_eq!(sent0.len(), expected_packets);
        assert!(sent0.last().unwrap()[NET_HEADERS_LEN + 1] & 0x80 != 0);
        assert!(sent0[0][NET_HEADERS_LEN + 1] & 0x80 == 0);
    }

    #[test]
    fn test_down_link_carries_no_data() {
        let (mut sender, links, _captures) = sender_with_mocks(4096);
        links[1].set_up(false);

        let samples = 864 * 625 * 2;
        sender.push_frame(FrameUnit::from_block(uyvy_frame_blanking(samples)));
        sender.tick(FIXED_PRE_ROLL * 2);

        // ring 1 saw the link drop: no payload was queued on it
        let p1 = sender.paths[1].as_ref().unwrap();
        assert!(!p1.up);
        assert_eq!(p1.ring.pending(), 0);

        let p0 = sender.paths[0].as_ref().unwrap();
        assert!(p0.up);
    }

    #[test]
    fn test_late_frame_dropped() {
        let (mut sender, _links, _captures) = sender_with_mocks(4096);

        let samples = 864 * 625 * 2;
        let frame = FrameUnit::from_block(uyvy_frame_blanking(samples)).with_pts_sys(0);
        // first frame ends preroll immediately
        sender.push_frame(frame.clone());
        sender.tick(FIXED_PRE_ROLL);

        // a frame whose window has long passed is dropped at dequeue
        let late = FrameUnit::from_block(uyvy_frame_blanking(samples)).with_pts_sys(0);
        sender.push_frame(late);
        sender.tick(UCLOCK_FREQ * 10);
        assert_eq!(sender.queued(), 0);
    }
}
