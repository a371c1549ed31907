//! SDI frame decoder.
//!
//! Consumes byte FrameUnits holding exactly one SDI frame laid out as
//! `full_height` lines of `2 x width` 16-bit samples and emits one
//! picture FrameUnit (V210, planar 8 or planar 10) plus sibling VANC,
//! VBI (SD only) and S32 16-channel 48 kHz audio units.
//!
//! Parse and checksum failures are logged and the affected line blanked;
//! the frame is always emitted.

use crate::av::{
    clock, FlowDefinition, FrameUnit, Outputs, Payload, Picture, PictureFlow, Plane, PlaneDef,
    Port, SoundBuffer, SoundFlow, Stage, CHROMA_U10, CHROMA_U8, CHROMA_V10, CHROMA_V210,
    CHROMA_V8, CHROMA_X10, CHROMA_Y10, CHROMA_Y8,
};
use crate::codec::{PixelCodecs, SdiCrc};
use crate::sdi::anc::{
    audio_ecc, check_checksum, DbnTracker, ADF1, ADF2, ADF3, ANC_FOOTER_WORDS, ANC_HEADER_WORDS,
    DID_HD_AUDIO_GROUP1, PARITY_TAB,
};
use crate::sdi::fvh::{EAV_FVH, HD_EAV_LEN, HD_SAV_LEN, SAV_FVH, SD_EAV_LEN, SD_SAV_LEN};
use crate::sdi::geometry::{find_geometry, SdiGeometry};
use crate::sdi::s337::{S337Detector, TYPE_NONE};
use crate::{Result, SdiError};

/// Number of channels per embedded audio group
pub const CHANNELS_PER_GROUP: usize = 4;
/// Total embedded audio channels
pub const MAX_CHANNELS: usize = 16;

/// Cyclic extra-sample cadences for fractional frame rates
static SAMPLES_INCREMENT: [[u16; 5]; 2] = [
    [1, 0, 1, 0, 1], // 30000 / 1001
    [1, 1, 1, 1, 0], // 60000 / 1001
];

/// Picture format produced by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderOutput {
    /// Packed V210 macropixels
    V210,
    /// 8-bit planar 4:2:2
    Planar8,
    /// 10-bit planar 4:2:2
    Planar10,
}

struct AudioCtx {
    buf: Vec<i32>,
    group_offset: [usize; CHANNELS_PER_GROUP],
    /// line on which a 337 sync was seen, per pair
    aes: [i32; 8],
}

/// SDI frame decoder stage
pub struct SdiDecoder {
    output: DecoderOutput,
    codecs: PixelCodecs,
    crc: SdiCrc,
    crc_c: u32,
    crc_y: u32,
    crc_primed: bool,
    geometry: Option<&'static SdiGeometry>,
    latency: u64,
    dbn: DbnTracker,
    s337: S337Detector,
    eav_clock: i64,
    clock_phase_set: bool,
    audio_samples: [u64; CHANNELS_PER_GROUP],
    audio_fix: usize,
    frame_num: u64,
    pending_flows: Vec<(Port, FrameUnit)>,
}

impl SdiDecoder {
    /// Creates a decoder emitting the given picture format
    pub fn new(output: DecoderOutput) -> Self {
        Self {
            output,
            codecs: PixelCodecs::new(),
            crc: SdiCrc::new(),
            crc_c: 0,
            crc_y: 0,
            crc_primed: false,
            geometry: None,
            latency: 0,
            dbn: DbnTracker::new(),
            s337: S337Detector::new(),
            eav_clock: 0,
            clock_phase_set: false,
            audio_samples: [0; CHANNELS_PER_GROUP],
            audio_fix: 0,
            frame_num: 0,
            pending_flows: Vec::new(),
        }
    }

    fn geometry(&self) -> Result<&'static SdiGeometry> {
        self.geometry
            .ok_or_else(|| SdiError::Format("no flow definition".into()))
    }

    fn output_flow(&self, geometry: &'static SdiGeometry) -> PictureFlow {
        let planes = match self.output {
            DecoderOutput::V210 => vec![PlaneDef {
                tag: CHROMA_V210,
                hsub: 1,
                vsub: 1,
                macropixel_size: 16,
            }],
            DecoderOutput::Planar8 => vec![
                PlaneDef { tag: CHROMA_Y8, hsub: 1, vsub: 1, macropixel_size: 1 },
                PlaneDef { tag: CHROMA_U8, hsub: 2, vsub: 1, macropixel_size: 1 },
                PlaneDef { tag: CHROMA_V8, hsub: 2, vsub: 1, macropixel_size: 1 },
            ],
            DecoderOutput::Planar10 => vec![
                PlaneDef { tag: CHROMA_Y10, hsub: 1, vsub: 1, macropixel_size: 2 },
                PlaneDef { tag: CHROMA_U10, hsub: 2, vsub: 1, macropixel_size: 2 },
                PlaneDef { tag: CHROMA_V10, hsub: 2, vsub: 1, macropixel_size: 2 },
            ],
        };

        PictureFlow {
            hsize: u32::from(geometry.picture.active_width),
            vsize: u32::from(geometry.picture.active_height),
            fps: geometry.fps,
            macropixel: if self.output == DecoderOutput::V210 { 6 } else { 1 },
            planes,
            progressive: geometry.scan.progressive(),
            tff: !geometry.picture.is_ntsc(),
            latency: self.latency,
        }
    }

    fn alloc_picture(&self, geometry: &'static SdiGeometry) -> Picture {
        let width = usize::from(geometry.picture.active_width);
        let height = usize::from(geometry.picture.active_height);

        let planes = match self.output {
            DecoderOutput::V210 => {
                let aligned = (width + 5) / 6 * 6;
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
            width: width as u32,
            height: height as u32,
            planes,
        }
    }

    fn write_active_row(&self, pic: &mut Picture, row: usize, src: &[u16]) {
        let width = pic.width as usize;
        match self.output {
            DecoderOutput::V210 => {
                let plane = &mut pic.planes[0];
                let out = plane.row8_mut(row);
                (self.codecs.uyvy_to_v210)(&src[..width * 2], &mut out[..width / 6 * 16]);
            }
            DecoderOutput::Planar8 => {
                let (y, rest) = pic.planes.split_at_mut(1);
                let (u, v) = rest.split_at_mut(1);
                (self.codecs.uyvy_to_planar8)(
                    y[0].row8_mut(row),
                    u[0].row8_mut(row),
                    v[0].row8_mut(row),
                    &src[..width * 2],
                );
            }
            DecoderOutput::Planar10 => {
                let (y, rest) = pic.planes.split_at_mut(1);
                let (u, v) = rest.split_at_mut(1);
                (self.codecs.uyvy_to_planar10)(
                    y[0].row16_mut(row),
                    u[0].row16_mut(row),
                    v[0].row16_mut(row),
                    &src[..width * 2],
                );
            }
        }
    }

    fn validate_hd_timing(
        &self,
        line: &[u16],
        active_offset: usize,
        line_num: u16,
        f2: bool,
        vbi: bool,
    ) -> bool {
        let fvh = EAV_FVH[usize::from(f2)][usize::from(vbi)];
        let eav_ok = line[0] == 0x3ff
            && line[1] == 0x3ff
            && line[2] == 0x000
            && line[3] == 0x000
            && line[4] == 0x000
            && line[5] == 0x000
            && line[6] == fvh
            && line[7] == fvh;

        let mut ln0 = (line_num & 0x7f) << 2;
        ln0 = crate::sdi::anc::not_bit8(ln0);
        let ln1 = (1 << 9) | (((line_num >> 7) & 0xf) << 2);
        let ln_ok = line[8] == ln0 && line[9] == ln0 && line[10] == ln1 && line[11] == ln1;

        let sav = SAV_FVH[usize::from(f2)][usize::from(vbi)];
        let active_start = 2 * active_offset;
        let sav_ok = line[active_start - 8] == 0x3ff
            && line[active_start - 7] == 0x3ff
            && line[active_start - 6] == 0x000
            && line[active_start - 5] == 0x000
            && line[active_start - 4] == 0x000
            && line[active_start - 3] == 0x000
            && line[active_start - 2] == sav
            && line[active_start - 1] == sav;

        if !eav_ok {
            log::warn!("HD EAV incorrect, line {line_num}");
        }
        if !ln_ok {
            log::warn!("HD line number incorrect, line {line_num}");
        }
        if !sav_ok {
            log::warn!("HD SAV incorrect, line {line_num}");
        }
        eav_ok && ln_ok && sav_ok
    }

    fn validate_sd_timing(
        &self,
        line: &[u16],
        active_offset: usize,
        line_num: u16,
        f2: bool,
        vbi: bool,
    ) -> bool {
        let fvh = EAV_FVH[usize::from(f2)][usize::from(vbi)];
        let eav_ok =
            line[0] == 0x3ff && line[1] == 0x000 && line[2] == 0x000 && line[3] == fvh;

        let sav = SAV_FVH[usize::from(f2)][usize::from(vbi)];
        let active_start = 2 * active_offset;
        let sav_ok = line[active_start - 4] == 0x3ff
            && line[active_start - 3] == 0x000
            && line[active_start - 2] == 0x000
            && line[active_start - 1] == sav;

        if !eav_ok {
            log::warn!("SD EAV incorrect, line {line_num}");
        }
        if !sav_ok {
            log::warn!("SD SAV incorrect, line {line_num}");
        }
        eav_ok && sav_ok
    }

    fn check_line_crc(&mut self, line: &[u16], line_num: u16) {
        if self.crc_primed {
            for pair in line[..12].chunks_exact(2) {
                self.crc.update(&mut self.crc_c, pair[0]);
                self.crc.update(&mut self.crc_y, pair[1]);
            }
            let crc_c = self.crc.finalize(&mut self.crc_c);
            let crc_y = self.crc.finalize(&mut self.crc_y);

            let stream = [line[12], line[13], line[14], line[15]];
            let computed = [crc_c[0], crc_y[0], crc_c[1], crc_y[1]];
            if stream != computed {
                log::warn!(
                    "Line {} CRC does not match: {:#05x?} != {:#05x?}",
                    line_num,
                    computed,
                    stream
                );
            }
        }
        self.crc_primed = true;
    }

    fn accumulate_active_crc(&mut self, active: &[u16]) {
        for block in active.chunks_exact(16) {
            self.crc
                .update_block(&mut self.crc_c, &mut self.crc_y, block);
        }
    }

    fn extract_hd_audio_sample(&self, data: &[u16]) -> i32 {
        let mut sample: u32 = 0;
        sample |= (u32::from(data[0]) & 0xf0) << 4;
        sample |= (u32::from(data[2]) & 0xff) << 12;
        sample |= (u32::from(data[4]) & 0xff) << 20;
        sample |= (u32::from(data[6]) & 0x0f) << 28;

        let mut parity = 0u8;
        parity += u8::from(PARITY_TAB[usize::from(data[0] & 0xf0)]);
        parity += u8::from(PARITY_TAB[usize::from(data[2] & 0xff)]);
        parity += u8::from(PARITY_TAB[usize::from(data[4] & 0xff)]);
        parity += u8::from(PARITY_TAB[usize::from(data[6] & 0x7f)]);
        if u16::from(parity & 1) != ((data[6] >> 7) & 1) {
            log::error!(
                "wrong audio parity: {:#04x} {:#04x} {:#04x} {:#04x}",
                data[0] & 0xff,
                data[2] & 0xff,
                data[4] & 0xff,
                data[6] & 0xff
            );
        }

        sample as i32
    }

    fn extract_hd_audio(
        &mut self,
        packet: &[u16],
        line_num: u16,
        ctx: &mut AudioCtx,
        geometry: &'static SdiGeometry,
    ) {
        let data_count = (packet[10] & 0xff) as usize;
        let group = usize::from(DID_HD_AUDIO_GROUP1 - (packet[6] & 0xff) as u8);

        if data_count != 0x18 {
            log::warn!("Invalid data count {data_count:#x}");
            return;
        }

        let p = geometry.picture;
        let switching_offset = p.field_offset.saturating_sub(1);
        if line_num == p.switching_line + 1
            || (p.field_offset != 0 && line_num == p.switching_line + 1 + switching_offset)
        {
            log::warn!("Audio packet on invalid line {line_num}");
        }

        if let Err((computed, stream)) = check_checksum(&packet[6..], 2) {
            log::error!("Invalid checksum: {computed:#05x} != {stream:#05x}");
        }

        // 24 bytes of data feed the 6-byte ECC trailer
        let computed_ecc = audio_ecc((0..24).map(|i| (packet[2 * i] & 0xff) as u8));
        let stream_ecc: Vec<u8> = (0..6).map(|i| (packet[48 + 2 * i] & 0xff) as u8).collect();
        if computed_ecc != stream_ecc[..] {
            log::debug!("Wrong ECC, {computed_ecc:02x?} != {stream_ecc:02x?}");
        }

        let clock = u16::from((packet[12] & 0xff) as u8)
            | ((packet[14] & 0x0f) << 8)
            | ((packet[14] & 0x20) << 7);
        let mut mpf = packet[14] & 0x10 != 0;

        // the MPF bit is only meaningful just after a switching point
        let near_f1 = line_num > p.switching_line + 1 && line_num <= p.switching_line + 7;
        let near_f2 = p.field_offset != 0
            && line_num > p.switching_line + p.field_offset + 1
            && line_num <= p.switching_line + p.field_offset + 7;
        if !near_f1 && !near_f2 {
            mpf = false;
        }

        let f = geometry;
        let audio_clock = (self.audio_samples[group]
            * u64::from(f.width)
            * u64::from(f.height)
            * f.fps.num
            / f.fps.den
            / 48000) as i64;

        // deliberate one-time phase alignment against the first packet
        if !self.clock_phase_set {
            self.clock_phase_set = true;
            self.eav_clock -= i64::from(clock);
        }

        let offset = audio_clock
            - (self.eav_clock - if mpf { i64::from(f.width) } else { 0 });
        if offset + 1 < i64::from(clock) || offset - 1 > i64::from(clock) {
            self.eav_clock -= i64::from(clock) - offset;
        }

        for i in 0..CHANNELS_PER_GROUP {
            let s = self.extract_hd_audio_sample(&packet[MAX_CHANNELS + i * 8..]);
            let idx = ctx.group_offset[group] * MAX_CHANNELS + CHANNELS_PER_GROUP * group + i;
            if idx >= ctx.buf.len() {
                log::warn!("audio overflow on group {group}");
                return;
            }
            ctx.buf[idx] = s;

            if i & 1 == 1 {
                // check for the second 337 syncword against the previous
                // channel of the pair
                let prev = ctx.buf[idx - 1];
                if crate::sdi::s337::is_sync_pair(prev, s) {
                    let pair = group * 2 + (i >> 1);
                    if ctx.aes[pair] != -1 {
                        log::error!(
                            "SMPTE 337 sync at line {} AND {}",
                            ctx.aes[pair],
                            line_num
                        );
                    }
                    ctx.aes[pair] = i32::from(line_num);
                }
            }
        }

        self.audio_samples[group] += 1;
        ctx.group_offset[group] += 1;
    }

    fn extract_sd_audio_group(&self, dst: &mut [i32], data: &[u16]) {
        for i in 0..CHANNELS_PER_GROUP {
            let w = &data[3 * i..3 * i + 3];
            let channel_idx = usize::from((w[0] & 0x6) >> 1);
            let mut sample: u32 = 0;
            sample |= (u32::from(w[0]) & 0x1f8) << 9;
            sample |= (u32::from(w[1]) & 0x1ff) << 18;
            sample |= (u32::from(w[2]) & 0x01f) << 27;

            let mut parity = 0u8;
            parity += u8::from(PARITY_TAB[usize::from(w[0] & 0x1ff)]);
            parity += u8::from(PARITY_TAB[usize::from(w[1] & 0x1ff)]);
            parity += u8::from(PARITY_TAB[usize::from(w[2] & 0x0ff)]);
            if u16::from(parity & 1) != ((w[2] >> 8) & 1) {
                log::error!(
                    "wrong audio parity: {:#05x} {:#05x} {:#05x}",
                    w[0],
                    w[1],
                    w[2]
                );
            }

            dst[channel_idx] = sample as i32;
        }
    }

    fn extract_sd_audio(&mut self, packet: &[u16], ctx: &mut AudioCtx) {
        let data_count = (packet[5] & 0xff) as usize;
        if data_count % 12 != 0 {
            log::error!("Invalid data count {data_count}");
            return;
        }

        // SD DIDs descend two apart
        let group = usize::from((0xffu8 - (packet[3] & 0xff) as u8) >> 1);

        if let Err((computed, stream)) = check_checksum(&packet[3..], 1) {
            log::error!("Invalid checksum: {computed:#05x} != {stream:#05x}");
            return;
        }

        let src = &packet[6..];
        for i in (0..data_count / 3).step_by(CHANNELS_PER_GROUP) {
            let base = ctx.group_offset[group] * MAX_CHANNELS + group * CHANNELS_PER_GROUP;
            if base + CHANNELS_PER_GROUP > ctx.buf.len() {
                log::warn!("audio overflow on group {group}");
                return;
            }
            let dst = &mut ctx.buf[base..base + CHANNELS_PER_GROUP];
            self.extract_sd_audio_group(dst, &src[3 * i..]);

            self.audio_samples[group] += 1;
            ctx.group_offset[group] += 1;
        }
    }

    fn parse_hd_hanc(
        &mut self,
        packet: &[u16],
        line_num: u16,
        ctx: &mut AudioCtx,
        geometry: &'static SdiGeometry,
    ) -> usize {
        let did = (packet[6] & 0xff) as u8;

        if did >= 0x80 {
            if let Err(expected) = self.dbn.validate(did, (packet[8] & 0xff) as u8) {
                log::error!(
                    "[{}] [DID {:#04x}] Wrong DBN: expected {:#04x} got {:#04x}",
                    line_num,
                    did,
                    expected,
                    packet[8] & 0xff
                );
            }
        }

        if (0xe4..=DID_HD_AUDIO_GROUP1).contains(&did) {
            self.extract_hd_audio(packet, line_num, ctx, geometry);
        }

        2 * (ANC_HEADER_WORDS + usize::from(packet[10] as u8) + ANC_FOOTER_WORDS)
    }

    fn parse_sd_hanc(&mut self, packet: &[u16], ctx: &mut AudioCtx) -> usize {
        let did = (packet[3] & 0xff) as u8;
        if matches!(did, 0xff | 0xfd | 0xfb | 0xf9) {
            self.extract_sd_audio(packet, ctx);
        }

        ANC_HEADER_WORDS + usize::from(packet[5] as u8) + ANC_FOOTER_WORDS
    }

    fn anc_fits(packet: &[u16], left: usize, sd: bool) -> bool {
        let data_count = usize::from((if sd { packet[5] } else { packet[10] }) as u8);
        let mut total = ANC_HEADER_WORDS + data_count + ANC_FOOTER_WORDS;
        if !sd {
            total *= 2;
        }
        left >= total
    }

    fn decode_frame(&mut self, frame: &FrameUnit, out: &mut Outputs) -> Result<()> {
        let geometry = self.geometry()?;
        let p = geometry.picture;
        let block = frame
            .block()
            .ok_or_else(|| SdiError::InvalidData("SDI decoder needs a block input".into()))?;

        if block.len() != geometry.frame_bytes() {
            return Err(SdiError::InvalidData(format!(
                "bad SDI frame size {} != {}",
                block.len(),
                geometry.frame_bytes()
            )));
        }

        let samples: Vec<u16> = block
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();

        let fps = geometry.fps;
        let pts = u64::from(u32::MAX)
            + self.frame_num * clock::UCLOCK_FREQ * fps.den / fps.num;
        self.frame_num += 1;

        let mut picture = self.alloc_picture(geometry);
        let interleave = if p.vbi_f2_part1.start != 0 { 2 } else { 1 };
        let ntsc = p.is_ntsc();
        // NTSC is bottom field first
        let mut next_row: [usize; 2] = if ntsc { [1, 0] } else { [0, 1] };

        let width = usize::from(p.active_width);
        let height_total = usize::from(geometry.height);
        let side_rows = height_total - usize::from(p.active_height);

        let mut vanc = (!p.sd).then(|| Picture {
            width: u32::from(p.active_width) * 2,
            height: side_rows as u32,
            planes: vec![Plane::new_b16(CHROMA_X10, width * 2, side_rows)],
        });
        let mut vanc_row = 0usize;

        let mut vbi = p.sd.then(|| Picture {
            width: 720,
            height: side_rows as u32,
            planes: vec![Plane::new_b8(CHROMA_Y8, 720, side_rows)],
        });
        let mut vbi_row = 0usize;

        let mut audio = AudioCtx {
            buf: vec![0i32; MAX_CHANNELS * height_total * 2],
            group_offset: [0; CHANNELS_PER_GROUP],
            aes: [-1; 8],
        };

        let line_samples = geometry.line_samples();
        let active_offset = usize::from(geometry.active_offset);
        let (hanc_start, sav_len) = if p.sd {
            (SD_EAV_LEN, SD_SAV_LEN)
        } else {
            (HD_EAV_LEN, HD_SAV_LEN)
        };
        let hanc_len = 2 * active_offset - hanc_start - sav_len;

        for h in 0..height_total {
            let line = &samples[h * line_samples..(h + 1) * line_samples];
            let mut line_num = (h + 1) as u16;
            if ntsc {
                // raster starts at line 4
                line_num = ((line_num + 2) % 525) + 1;
            }

            let mut active = p.active_f1.contains(line_num);
            let mut f2 = false;
            if p.vbi_f2_part1.start != 0 {
                f2 = line_num >= p.vbi_f2_part1.start;
                if p.active_f2.contains(line_num) {
                    active = true;
                }
            }

            // NTSC line 20 of field 1 goes to blanking
            let special_case = ntsc && line_num == 20;
            let vbi_line = !active;

            let timing_ok = if p.sd {
                self.validate_sd_timing(line, active_offset, line_num, f2, vbi_line)
            } else {
                self.check_line_crc(line, line_num);
                self.validate_hd_timing(line, active_offset, line_num, f2, vbi_line)
            };

            // HANC ancillary packets are contiguous and left aligned
            let hanc = &line[hanc_start..];
            let mut v = 0usize;
            while v < hanc_len {
                let left = hanc_len - v;
                let packet = &hanc[v..];
                let adf = if p.sd {
                    left > 6 && packet[0] == ADF1 && packet[1] == ADF2 && packet[2] == ADF3
                } else {
                    left > 11 && packet[0] == ADF1 && packet[2] == ADF2 && packet[4] == ADF3
                };
                if !adf || !Self::anc_fits(packet, left, p.sd) {
                    break;
                }
                v += if p.sd {
                    self.parse_sd_hanc(packet, &mut audio)
                } else {
                    self.parse_hd_hanc(packet, line_num, &mut audio, geometry)
                };
            }

            let active_start = &line[2 * active_offset..];
            if !active || special_case {
                if p.sd {
                    // only part 1 of the VBI is captured
                    let capture = (!f2 && line_num <= p.vbi_f1_part1.end)
                        || (f2 && line_num <= p.vbi_f2_part1.end);
                    if capture {
                        if let Some(vbi_pic) = vbi.as_mut() {
                            let row = vbi_pic.planes[0].row8_mut(vbi_row);
                            for (i, out) in row.iter_mut().enumerate().take(720) {
                                *out = ((active_start[2 * i + 1] >> 2) & 0xff) as u8;
                            }
                            vbi_row += 1;
                        }
                    }
                } else if let Some(vanc_pic) = vanc.as_mut() {
                    if vanc_row < side_rows {
                        let row = vanc_pic.planes[0].row16_mut(vanc_row);
                        for i in 0..width {
                            row[i] = active_start[2 * i];
                            row[width + i] = active_start[2 * i + 1];
                        }
                        vanc_row += 1;
                    }
                }
            } else {
                let row = next_row[usize::from(f2)];
                if timing_ok {
                    self.write_active_row(&mut picture, row, active_start);
                } else {
                    // blank the damaged line rather than propagate noise
                    let mut blank_line = vec![0u16; width * 2];
                    crate::codec::planar::blank(&mut blank_line);
                    self.write_active_row(&mut picture, row, &blank_line);
                }
                next_row[usize::from(f2)] += interleave;
            }

            if !p.sd {
                self.accumulate_active_crc(&active_start[..width * 2]);
            }
            self.eav_clock += i64::from(geometry.width);
        }

        // correct short audio frames to the nominal cadence count
        let mut samples_received = *audio.group_offset.iter().max().unwrap_or(&0);
        let expected = (48000 * fps.den / fps.num) as usize;
        if samples_received < expected {
            let wrong = samples_received;
            samples_received = expected;

            if fps.den == 1001 && fps.num != 24000 {
                if fps.num != 30000 && fps.num != 60000 {
                    log::error!("Unsupported rate {fps}");
                } else {
                    self.audio_fix = (self.audio_fix + 1) % 5;
                    let rate5994 = usize::from(fps.num == 60000);
                    samples_received +=
                        usize::from(SAMPLES_INCREMENT[rate5994][self.audio_fix]);
                }
            }
            log::debug!("Not enough audio samples, correcting {wrong} to {samples_received}");
        }

        // SMPTE 337 probing on the pairs that showed a syncword
        for pair in 0..8 {
            let found = if audio.aes[pair] != -1 {
                let t = self
                    .s337
                    .parse(&audio.buf, samples_received, pair, audio.aes[pair]);
                if t == TYPE_NONE && self.s337.detected(pair) != TYPE_NONE {
                    self.s337.detected(pair)
                } else {
                    t
                }
            } else {
                TYPE_NONE
            };

            if let Some((pair, old, new)) = self.s337.track(pair, found) {
                log::error!(
                    "[{}] : {} AES 337 stream {} -> {}",
                    pair,
                    if new != TYPE_NONE { "moved" } else { "lost" },
                    old,
                    new
                );
            }
        }

        let duration = clock::UCLOCK_FREQ * fps.den / fps.num;

        for (port, flow) in self.pending_flows.drain(..) {
            out.push(port, flow);
        }

        let mut unit = FrameUnit::new(Payload::Picture(picture))
            .with_pts_prog(pts)
            .with_pts_orig(pts)
            .with_duration(duration);
        unit.clock.cr_sys = frame.clock.cr_sys;
        unit.discontinuity = frame.discontinuity;
        out.push(Port::Main, unit);

        if let Some(vanc_pic) = vanc.take() {
            let mut unit = FrameUnit::new(Payload::Picture(vanc_pic)).with_pts_prog(pts);
            unit.clock.cr_sys = frame.clock.cr_sys;
            out.push(Port::Vanc, unit);
        }

        if let Some(vbi_pic) = vbi.take() {
            let mut unit = FrameUnit::new(Payload::Picture(vbi_pic)).with_pts_prog(pts);
            unit.clock.cr_sys = frame.clock.cr_sys;
            out.push(Port::Vbi, unit);
        }

        if samples_received > 0 {
            let mut sound = SoundBuffer {
                channels: MAX_CHANNELS,
                samples: audio.buf,
            };
            sound.resize_frames(samples_received);
            let mut unit = FrameUnit::new(Payload::Sound(sound)).with_pts_prog(pts);
            unit.clock.cr_sys = frame.clock.cr_sys;
            out.push(Port::Audio, unit);
        }

        Ok(())
    }
}

impl Stage for SdiDecoder {
    fn set_input_format(&mut self, flow: &FlowDefinition) -> Result<()> {
        let pic = flow
            .as_picture()
            .ok_or_else(|| SdiError::Format("SDI decoder expects a picture flow".into()))?;

        let geometry = find_geometry(pic.hsize, pic.vsize, pic.fps)
            .ok_or_else(|| SdiError::Format(format!(
                "no SDI geometry for {}x{} @ {}",
                pic.hsize, pic.vsize, pic.fps
            )))?;

        self.geometry = Some(geometry);
        self.latency = pic.latency;
        self.eav_clock = 0;
        self.clock_phase_set = false;
        self.audio_samples = [0; CHANNELS_PER_GROUP];

        self.pending_flows.clear();
        self.pending_flows.push((
            Port::Main,
            FrameUnit::new_flow(FlowDefinition::Picture(self.output_flow(geometry))),
        ));
        self.pending_flows.push((
            Port::Audio,
            FrameUnit::new_flow(FlowDefinition::Sound(SoundFlow {
                channels: MAX_CHANNELS as u8,
                rate: 48000,
                latency: self.latency,
            })),
        ));

        Ok(())
    }

    fn push_frame(&mut self, frame: FrameUnit, out: &mut Outputs) -> Result<()> {
        if let Some(def) = frame.flow_def.clone() {
            return self.set_input_format(&def);
        }
        self.decode_frame(&frame, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::Rational;

    #[test]
    fn test_rejects_unknown_format() {
        let mut dec = SdiDecoder::new(DecoderOutput::Planar10);
        let flow = FlowDefinition::Picture(PictureFlow {
            hsize: 123,
            vsize: 456,
            fps: Rational::new(25, 1),
            macropixel: 1,
            planes: vec![],
            progressive: false,
            tff: true,
            latency: 0,
        });
        assert!(dec.set_input_format(&flow).is_err());
    }

    #[test]
    fn test_rejects_bad_frame_size() {
        let mut dec = SdiDecoder::new(DecoderOutput::Planar10);
        let flow = FlowDefinition::Picture(PictureFlow {
            hsize: 1920,
            vsize: 1080,
            fps: Rational::new(25, 1),
            macropixel: 1,
            planes: vec![],
            progressive: false,
            tff: true,
            latency: 0,
        });
        dec.set_input_format(&flow).unwrap();

        let mut out = Outputs::new();
        let frame = FrameUnit::from_block(bytes::BytesMut::from(&[0u8; 16][..]));
        assert!(dec.push_frame(frame, &mut out).is_err());
    }
}
