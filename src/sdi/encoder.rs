//! SDI frame encoder.
//!
//! Dual of the decoder: consumes a picture FrameUnit plus queued S32
//! audio and optional DVB teletext, and emits one byte FrameUnit of
//! `full_height x 2 x width` 16-bit samples with timing references,
//! line numbers, CRCs, embedded audio, payload identifier, audio control
//! packets and OP-47 teletext in place.

use crate::av::{
    BlockFlow, FlowDefinition, FrameUnit, Outputs, Picture, Port, Rational, SoundBuffer, Stage,
};
use crate::codec::{PixelCodecs, SdiCrc};
use crate::sdi::anc::{
    fill_parity_checksum, increment_dbn, not_bit8, ADF1, ADF2, ADF3, DID_HD_AUDIO_CONTROL_GROUP1,
    DID_HD_AUDIO_GROUP1, DID_PAYLOAD_ID, PARITY_TAB, SDID_PAYLOAD_ID,
};
use crate::sdi::decoder::{CHANNELS_PER_GROUP, MAX_CHANNELS};
use crate::sdi::fvh::{EAV_FVH, HD_EAV_LEN, HD_SAV_LEN, SAV_FVH, SD_EAV_LEN, SD_SAV_LEN};
use crate::sdi::geometry::{find_geometry, ScanIdent, SdiGeometry};
use crate::sdi::op47;
use crate::{Result, SdiError};

/// Worst-case audio frames per video frame (48 kHz at 23.98 fps)
const MAX_AUDIO_FRAMES: usize = 48000 * 1001 / 24000;

static SAMPLES_INCREMENT: [[u16; 5]; 2] = [
    [1, 0, 1, 0, 1], // 30000 / 1001
    [1, 1, 1, 1, 0], // 60000 / 1001
];

/// Builds the 24-byte AES/EBU channel status block (professional,
/// 48 kHz, 24-bit) with its CRC-8 trailer
fn init_channel_status(data: &mut [u8; 24]) {
    static AES_CRC_TABLE: [u8; 256] = [
        0x00, 0x1d, 0x3a, 0x27, 0x74, 0x69, 0x4e, 0x53, 0xe8, 0xf5, 0xd2, 0xcf, 0x9c, 0x81, 0xa6,
        0xbb, 0xcd, 0xd0, 0xf7, 0xea, 0xb9, 0xa4, 0x83, 0x9e, 0x25, 0x38, 0x1f, 0x02, 0x51, 0x4c,
        0x6b, 0x76, 0x87, 0x9a, 0xbd, 0xa0, 0xf3, 0xee, 0xc9, 0xd4, 0x6f, 0x72, 0x55, 0x48, 0x1b,
        0x06, 0x21, 0x3c, 0x4a, 0x57, 0x70, 0x6d, 0x3e, 0x23, 0x04, 0x19, 0xa2, 0xbf, 0x98, 0x85,
        0xd6, 0xcb, 0xec, 0xf1, 0x13, 0x0e, 0x29, 0x34, 0x67, 0x7a, 0x5d, 0x40, 0xfb, 0xe6, 0xc1,
        0xdc, 0x8f, 0x92, 0xb5, 0xa8, 0xde, 0xc3, 0xe4, 0xf9, 0xaa, 0xb7, 0x90, 0x8d, 0x36, 0x2b,
        0x0c, 0x11, 0x42, 0x5f, 0x78, 0x65, 0x94, 0x89, 0xae, 0xb3, 0xe0, 0xfd, 0xda, 0xc7, 0x7c,
        0x61, 0x46, 0x5b, 0x08, 0x15, 0x32, 0x2f, 0x59, 0x44, 0x63, 0x7e, 0x2d, 0x30, 0x17, 0x0a,
        0xb1, 0xac, 0x8b, 0x96, 0xc5, 0xd8, 0xff, 0xe2, 0x26, 0x3b, 0x1c, 0x01, 0x52, 0x4f, 0x68,
        0x75, 0xce, 0xd3, 0xf4, 0xe9, 0xba, 0xa7, 0x80, 0x9d, 0xeb, 0xf6, 0xd1, 0xcc, 0x9f, 0x82,
        0xa5, 0xb8, 0x03, 0x1e, 0x39, 0x24, 0x77, 0x6a, 0x4d, 0x50, 0xa1, 0xbc, 0x9b, 0x86, 0xd5,
        0xc8, 0xef, 0xf2, 0x49, 0x54, 0x73, 0x6e, 0x3d, 0x20, 0x07, 0x1a, 0x6c, 0x71, 0x56, 0x4b,
        0x18, 0x05, 0x22, 0x3f, 0x84, 0x99, 0xbe, 0xa3, 0xf0, 0xed, 0xca, 0xd7, 0x35, 0x28, 0x0f,
        0x12, 0x41, 0x5c, 0x7b, 0x66, 0xdd, 0xc0, 0xe7, 0xfa, 0xa9, 0xb4, 0x93, 0x8e, 0xf8, 0xe5,
        0xc2, 0xdf, 0x8c, 0x91, 0xb6, 0xab, 0x10, 0x0d, 0x2a, 0x37, 0x64, 0x79, 0x5e, 0x43, 0xb2,
        0xaf, 0x88, 0x95, 0xc6, 0xdb, 0xfc, 0xe1, 0x5a, 0x47, 0x60, 0x7d, 0x2e, 0x33, 0x14, 0x09,
        0x7f, 0x62, 0x45, 0x58, 0x0b, 0x16, 0x31, 0x2c, 0x97, 0x8a, 0xad, 0xb0, 0xe3, 0xfe, 0xd9,
        0xc4,
    ];

    data.fill(0);
    data[0] = 0x80; // Only indicates professional use and LPCM
    data[1] = 0x40; // Stereophonic Mode
    data[2] = 0x20; // Forces 24 bits, leaves Level regulation default

    let mut crc = 0xffu8;
    for &byte in data.iter().take(23) {
        crc = AES_CRC_TABLE[usize::from(crc ^ byte)];
    }
    data[23] = crc;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    V210,
    Planar8,
    Planar10,
}

/// SDI frame encoder stage.
///
/// The picture travels through `push_frame`; embedded audio and DVB
/// teletext are queued with [`SdiEncoder::queue_audio`] and
/// [`SdiEncoder::queue_teletext`] and consumed one batch per frame.
pub struct SdiEncoder {
    geometry: Option<&'static SdiGeometry>,
    input: InputKind,
    codecs: PixelCodecs,
    crc: SdiCrc,
    crc_c: u32,
    crc_y: u32,
    fps: Rational,
    sample_pos: usize,
    total_audio_samples_put: u64,
    aes_channel_status: [u8; 24],
    eav_clock: u64,
    mpf_packet_bits: [i64; CHANNELS_PER_GROUP],
    dbn: [u8; 8],
    frame_idx: usize,
    audio_buf: Vec<i32>,
    queued_audio_frames: usize,
    /// sample offset for Dolby E to land on the permitted line
    dolby_offset: usize,
    teletext: bool,
    op47_sequence_counter: [u16; 2],
    ttx_units: [Vec<Vec<u8>>; 2],
}

impl SdiEncoder {
    /// Creates an encoder; teletext insertion is off unless enabled
    pub fn new() -> Self {
        Self {
            geometry: None,
            input: InputKind::Planar10,
            codecs: PixelCodecs::new(),
            crc: SdiCrc::new(),
            crc_c: 0,
            crc_y: 0,
            fps: Rational::new(25, 1),
            sample_pos: 0,
            total_audio_samples_put: 0,
            aes_channel_status: [0; 24],
            eav_clock: 0,
            mpf_packet_bits: [0; CHANNELS_PER_GROUP],
            dbn: [1; 8],
            frame_idx: 0,
            audio_buf: vec![0; MAX_CHANNELS * MAX_AUDIO_FRAMES],
            queued_audio_frames: 0,
            dolby_offset: 0,
            teletext: false,
            op47_sequence_counter: [0; 2],
            ttx_units: [Vec::new(), Vec::new()],
        }
    }

    /// Enables or disables OP-47 teletext insertion
    pub fn set_teletext(&mut self, enabled: bool) {
        self.teletext = enabled;
    }

    /// Queues one batch of audio for the next frame.
    ///
    /// `channel_idx` is the stereo-pair position in the 16-channel
    /// layout; `s337` marks non-PCM pairs, which are placed at the
    /// Dolby E line offset.
    pub fn queue_audio(&mut self, sound: &SoundBuffer, channel_idx: usize, s337: bool) {
        let mut frames = sound.frame_count();
        let mut src = 0usize;
        let mut dst = channel_idx;

        if s337 {
            let offset = self.dolby_offset.min(frames);
            dst += offset * MAX_CHANNELS;
            frames -= offset;
        }

        for _ in 0..frames {
            if dst + sound.channels > self.audio_buf.len() {
                break;
            }
            self.audio_buf[dst..dst + sound.channels]
                .copy_from_slice(&sound.samples[src..src + sound.channels]);
            dst += MAX_CHANNELS;
            src += sound.channels;
        }

        self.queued_audio_frames = self.queued_audio_frames.max(sound.frame_count());
    }

    /// Queues a DVB VBI block; its teletext data units are inserted into
    /// the next frame when teletext is enabled
    pub fn queue_teletext(&mut self, block: &[u8]) {
        if !self.teletext {
            return;
        }
        let sd = self
            .geometry
            .map(|g| g.picture.sd)
            .unwrap_or(false);
        let per_field = if sd { 5 } else { 1 };
        let fields = op47::collect_teletext_units(block, per_field);
        for (f, units) in fields.into_iter().enumerate() {
            self.ttx_units[f] = units.into_iter().map(|u| u.to_vec()).collect();
        }
    }

    /// Samples to embed in the current frame, following the fractional
    /// frame-rate cadence
    fn audio_samples_count(&mut self) -> usize {
        let fps = self.fps;
        let samples = (48000 * fps.den / fps.num) as usize;

        if fps.den != 1001 || fps.num == 24000 {
            return samples;
        }

        if fps.num != 30000 && fps.num != 60000 {
            log::error!("Unsupported rate {fps}");
            return samples;
        }

        self.frame_idx = (self.frame_idx + 1) % 5;
        let rate5994 = usize::from(fps.num == 60000);
        samples + usize::from(SAMPLES_INCREMENT[rate5994][self.frame_idx])
    }

    fn put_payload_identifier(&self, dst: &mut [u16], gap: usize, geometry: &SdiGeometry) {
        dst[0] = ADF1;
        dst[gap] = ADF2;
        dst[2 * gap] = ADF3;
        dst[3 * gap] = u16::from(DID_PAYLOAD_ID);
        dst[4 * gap] = u16::from(SDID_PAYLOAD_ID);
        dst[5 * gap] = 4;

        dst[6 * gap] = if geometry.picture.sd {
            0x81
        } else if geometry.height == 750 {
            0x84
        } else {
            0x85
        };
        dst[7 * gap] = (u16::from(geometry.scan.code()) << 6) | u16::from(geometry.frame_rate_code);
        dst[8 * gap] = 0x80;
        dst[9 * gap] = 0x01;

        fill_parity_checksum(&mut dst[3 * gap..], gap, true);
    }

    fn put_audio_control_packet(&mut self, dst: &mut [u16], ch_group: usize) -> usize {
        dst[0] = ADF1;
        dst[2] = ADF2;
        dst[4] = ADF3;

        dst[6] = u16::from(DID_HD_AUDIO_CONTROL_GROUP1 - ch_group as u8);
        dst[8] = u16::from(self.dbn[4 + ch_group]);
        increment_dbn(&mut self.dbn[4 + ch_group]);
        dst[10] = 11;

        dst[12] = 0x00; // No frame numbering available
        dst[14] = 0x00; // 48 kHz sample rate, synchronous
        dst[16] = 0x0f; // All channel groups active
        for i in 0..6 {
            dst[18 + 2 * i] = 0x0; // Delay words
        }
        dst[30] = 0x0; // Reserved
        dst[32] = 0x0; // Reserved

        fill_parity_checksum(&mut dst[6..], 2, true);

        // 18 luma words including the interleaved chroma positions
        36
    }

    fn channel_status_bit(&self, total_samples: u64) -> u8 {
        let byte_pos = ((total_samples % 192) / 8) as usize;
        let bit_pos = 7 - ((total_samples % 24) % 8) as u32;
        (self.aes_channel_status[byte_pos] >> bit_pos) & 1
    }

    fn put_sd_audio_data_packet(
        &mut self,
        dst: &mut [u16],
        ch_group: usize,
        num_samples: usize,
    ) -> usize {
        let sample_pos = self.sample_pos;
        let mut total_samples = self.total_audio_samples_put;

        dst[0] = ADF1;
        dst[1] = ADF2;
        dst[2] = ADF3;

        dst[3] = u16::from(0xffu8 - ((ch_group as u8) << 1));
        dst[4] = u16::from(self.dbn[ch_group]);
        increment_dbn(&mut self.dbn[ch_group]);
        dst[5] = (3 * CHANNELS_PER_GROUP * num_samples) as u16;

        let mut w = 6usize;
        for j in 0..num_samples {
            for i in 0..CHANNELS_PER_GROUP {
                let sample = self.audio_buf
                    [(sample_pos + j) * MAX_CHANNELS + ch_group * CHANNELS_PER_GROUP + i]
                    as u32
                    >> 12;

                let ch_stat = self.channel_status_bit(total_samples);
                // SMPTE 272 says both pairs carry Z = 1
                let block_sync = u16::from(total_samples % 192 == 0);
                // P (calculated later) | C | U | V
                let status_validity = u16::from(ch_stat) << 2;

                dst[w] = (((sample & 0x3f) as u16) << 3) | ((i as u16) << 1) | block_sync;
                dst[w + 1] = ((sample & 0x7fc0) >> 6) as u16;
                dst[w + 2] = ((sample & 0xf8000) >> 15) as u16 | (status_validity << 5);

                let mut parity = 0u8;
                parity += u8::from(PARITY_TAB[usize::from(dst[w] & 0x1ff)]);
                parity += u8::from(PARITY_TAB[usize::from(dst[w + 1] & 0x1ff)]);
                parity += u8::from(PARITY_TAB[usize::from(dst[w + 2] & 0xff)]);
                dst[w + 2] |= u16::from(parity & 1) << 8;
                w += 3;
            }
            total_samples += 1;
        }

        fill_parity_checksum(&mut dst[3..], 1, false);

        6 + 3 * CHANNELS_PER_GROUP * num_samples + 1
    }

    fn put_hd_audio_data_packet(
        &mut self,
        dst: &mut [u16],
        ch_group: usize,
        mpf_bit: bool,
        clk: u16,
    ) -> usize {
        let sample_pos = self.sample_pos;
        let total_samples = self.total_audio_samples_put;

        let clock_1 = clk & 0xff;
        let clock_2 = (clk & 0x1f00) >> 8;

        dst[0] = ADF1;
        dst[2] = ADF2;
        dst[4] = ADF3;

        dst[6] = u16::from(DID_HD_AUDIO_GROUP1 - ch_group as u8);
        dst[8] = u16::from(self.dbn[ch_group]);
        increment_dbn(&mut self.dbn[ch_group]);
        dst[10] = 24;

        dst[12] = clock_1;
        dst[14] = ((clock_2 & 0x10) << 1) | (u16::from(mpf_bit) << 4) | (clock_2 & 0xf);

        for i in 0..CHANNELS_PER_GROUP {
            let sample = self.audio_buf
                [sample_pos * MAX_CHANNELS + ch_group * CHANNELS_PER_GROUP + i]
                as u32
                >> 8;

            let ch_stat = self.channel_status_bit(total_samples);
            // Table 4 of SMPTE 299 makes it clear the second channel has Z=0
            let block_sync = u16::from(total_samples % 192 == 0 && i & 1 == 0);
            // P (calculated later) | C | U | V
            let status_validity = u16::from(ch_stat) << 2;

            let word0 = (((sample & 0xf) as u16) << 4) | (block_sync << 3);
            let word1 = ((sample & 0xff0) >> 4) as u16;
            let word2 = ((sample & 0xff000) >> 12) as u16;
            let mut word3 = ((sample & 0xf0_0000) >> 20) as u16 | (status_validity << 4);

            let mut parity = 0u8;
            parity += u8::from(PARITY_TAB[usize::from(word0 & 0xf0)]);
            parity += u8::from(PARITY_TAB[usize::from(word1 & 0xff)]);
            parity += u8::from(PARITY_TAB[usize::from(word2 & 0xff)]);
            parity += u8::from(PARITY_TAB[usize::from(word3 & 0x7f)]);
            word3 |= u16::from(parity & 1) << 7;

            dst[16 + i * 8] = word0;
            dst[16 + i * 8 + 2] = word1;
            dst[16 + i * 8 + 4] = word2;
            dst[16 + i * 8 + 6] = word3;
        }

        let ecc = crate::sdi::anc::audio_ecc((0..24).map(|i| (dst[2 * i] & 0xff) as u8));
        for (i, byte) in ecc.iter().enumerate() {
            dst[48 + 2 * i] = u16::from(*byte);
        }

        fill_parity_checksum(&mut dst[6..], 2, true);

        // 31 chroma words including the interleaved luma positions
        62
    }

    fn audio_packets_per_line(&self, geometry: &SdiGeometry) -> usize {
        let fps = geometry.fps;
        let samples_per_frame = ((48000 * fps.den + fps.num - 1) / fps.num) as usize;
        let active_lines = usize::from(geometry.height) - 2;
        (samples_per_frame + active_lines - 1) / active_lines
    }

    fn convert_active(&self, dst: &mut [u16], pic: &Picture, row: usize) {
        let width = pic.width as usize;
        match self.input {
            InputKind::V210 => {
                let src = pic.planes[0].row8(row);
                (self.codecs.v210_to_uyvy)(&src[..width / 6 * 16], &mut dst[..width * 2]);
            }
            InputKind::Planar8 => {
                (self.codecs.planar8_to_uyvy)(
                    &mut dst[..width * 2],
                    pic.planes[0].row8(row),
                    pic.planes[1].row8(row),
                    pic.planes[2].row8(row),
                );
            }
            InputKind::Planar10 => {
                (self.codecs.planar10_to_uyvy)(
                    &mut dst[..width * 2],
                    pic.planes[0].row16(row),
                    pic.planes[1].row16(row),
                    pic.planes[2].row16(row),
                );
            }
        }
    }

    fn line_flags(geometry: &SdiGeometry, line_num: u16) -> (bool, bool) {
        let p = geometry.picture;
        let mut vbi = true;
        let mut f2 = false;

        if p.vbi_f1_part1.contains(line_num) {
            vbi = true;
        } else if p.active_f1.contains(line_num) {
            vbi = false;
        } else if p.vbi_f1_part2.contains(line_num) {
            vbi = true;
        } else if p.vbi_f2_part1.start != 0 && p.vbi_f2_part1.contains(line_num) {
            vbi = true;
            f2 = true;
        } else if p.active_f2.start != 0 && p.active_f2.contains(line_num) {
            vbi = false;
            f2 = true;
        } else if p.vbi_f2_part2.start != 0 && p.vbi_f2_part2.contains(line_num) {
            vbi = true;
            f2 = true;
        }

        (vbi, f2)
    }

    fn encode_sd_line(
        &mut self,
        line_num: u16,
        dst: &mut [u16],
        pic: &Picture,
        next_row: &mut [usize; 2],
        interleave: usize,
        samples: usize,
        geometry: &'static SdiGeometry,
    ) {
        let p = geometry.picture;
        let active_offset = usize::from(geometry.active_offset);
        let (vbi, f2) = Self::line_flags(geometry, line_num);
        let special_case = p.is_ntsc() && line_num == 20;

        dst[0] = 0x3ff;
        dst[1] = 0x000;
        dst[2] = 0x000;
        dst[3] = EAV_FVH[usize::from(f2)][usize::from(vbi)];

        (self.codecs.blank)(&mut dst[SD_EAV_LEN..2 * active_offset - SD_SAV_LEN]);

        let mut hanc_pos = SD_EAV_LEN;
        if line_num == p.payload_id_line
            || (p.field_offset != 0 && line_num == p.payload_id_line + p.field_offset - 1)
        {
            self.put_payload_identifier(&mut dst[hanc_pos..], 1, geometry);
            hanc_pos += 11;
        }

        // Ideal number of samples that should have been put by this line
        let samples_put_target = samples * usize::from(line_num) / usize::from(geometry.height);
        let samples_to_put = samples_put_target.saturating_sub(self.sample_pos);

        for ch_group in 0..CHANNELS_PER_GROUP {
            hanc_pos += self.put_sd_audio_data_packet(&mut dst[hanc_pos..], ch_group, samples_to_put);
        }
        self.total_audio_samples_put += samples_to_put as u64;
        self.sample_pos += samples_to_put;

        let active_start = 2 * active_offset;
        dst[active_start - 4] = 0x3ff;
        dst[active_start - 3] = 0x000;
        dst[active_start - 2] = 0x000;
        dst[active_start - 1] = SAV_FVH[usize::from(f2)][usize::from(vbi)];

        let width = pic.width as usize;
        if vbi || special_case {
            (self.codecs.blank)(&mut dst[active_start..active_start + width * 2]);

            let ttx_line = if p.active_height == 576 {
                line_num == op47::OP47_LINE_F1 || line_num == op47::OP47_LINE_F2
            } else {
                false
            };
            if self.teletext && ttx_line && !self.ttx_units[usize::from(f2)].is_empty() {
                let units: Vec<&[u8]> = self.ttx_units[usize::from(f2)]
                    .iter()
                    .map(|u| u.as_slice())
                    .collect();
                let mut buf = vec![0u16; width];
                op47::encode_teletext_line(
                    &mut buf,
                    &units,
                    &mut self.op47_sequence_counter[usize::from(f2)],
                );
                for (i, sample) in buf.iter().enumerate() {
                    dst[active_start + 2 * i + 1] = *sample;
                }
            }
        } else {
            let row = next_row[usize::from(f2)];
            self.convert_active(&mut dst[active_start..], pic, row);
            next_row[usize::from(f2)] += interleave;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_hd_line(
        &mut self,
        line_num: u16,
        dst: &mut [u16],
        pic: &Picture,
        next_row: &mut [usize; 2],
        interleave: usize,
        samples: usize,
        geometry: &'static SdiGeometry,
    ) {
        let p = geometry.picture;
        let active_offset = usize::from(geometry.active_offset);
        let switching_offset = p.field_offset.saturating_sub(1);
        let (vbi, f2) = Self::line_flags(geometry, line_num);

        let fvh = EAV_FVH[usize::from(f2)][usize::from(vbi)];
        dst[0] = 0x3ff;
        dst[1] = 0x3ff;
        dst[2] = 0x000;
        dst[3] = 0x000;
        dst[4] = 0x000;
        dst[5] = 0x000;
        dst[6] = fvh;
        dst[7] = fvh;
        dst[8] = not_bit8((line_num & 0x7f) << 2);
        dst[9] = dst[8];
        dst[10] = (1 << 9) | (((line_num >> 7) & 0xf) << 2);
        dst[11] = dst[10];

        // the CRC of the previous line's active samples closes over this
        // line's EAV and line number words
        for pair in dst[..12].chunks_exact(2) {
            self.crc.update(&mut self.crc_c, pair[0]);
            self.crc.update(&mut self.crc_y, pair[1]);
        }
        let crc_c = self.crc.finalize(&mut self.crc_c);
        let crc_y = self.crc.finalize(&mut self.crc_y);
        dst[12] = crc_c[0];
        dst[13] = crc_y[0];
        dst[14] = crc_c[1];
        dst[15] = crc_y[1];

        (self.codecs.blank)(&mut dst[HD_EAV_LEN..2 * active_offset - HD_SAV_LEN]);

        let not_progressive = geometry.scan != ScanIdent::Progressive;

        // Payload identifier and audio control live in the luma stream
        if line_num == p.payload_id_line
            || (not_progressive && line_num == p.payload_id_line + switching_offset)
        {
            self.put_payload_identifier(&mut dst[HD_EAV_LEN + 1..], 2, geometry);
        } else if line_num == p.switching_line + 2
            || (not_progressive && line_num == p.switching_line + 2 + switching_offset)
        {
            let mut pos = HD_EAV_LEN + 1;
            for ch_group in 0..CHANNELS_PER_GROUP {
                pos += self.put_audio_control_packet(&mut dst[pos..], ch_group);
            }
        }

        let samples_put_target = samples * usize::from(line_num) / usize::from(geometry.height);
        let mut samples_to_put = samples_put_target.saturating_sub(self.sample_pos);
        if samples_to_put > 2 {
            samples_to_put = 2;
        }

        let max_audio_packets = CHANNELS_PER_GROUP * self.audio_packets_per_line(geometry);

        // Audio data packets go anywhere but the switching lines + 1
        let on_switching = line_num == p.switching_line + 1
            || (p.field_offset != 0 && line_num == p.switching_line + p.field_offset + 1);
        if !on_switching {
            let mut packets_put = 0usize;
            let mut pos = HD_EAV_LEN;

            for _sample in 0..samples_to_put {
                if packets_put + 1 > max_audio_packets {
                    log::error!("too many audio packets per line");
                    break;
                }
                for ch_group in 0..CHANNELS_PER_GROUP {
                    let mpf_bit = if self.mpf_packet_bits[ch_group] > 0 {
                        self.mpf_packet_bits[ch_group] -= 1;
                        true
                    } else {
                        false
                    };

                    // the audio clock phase relative to this line's EAV;
                    // MPF packets report against the previous line
                    let aud_clock = (self.total_audio_samples_put
                        * u64::from(geometry.width)
                        * u64::from(geometry.height)
                        * geometry.fps.num
                        / geometry.fps.den
                        / 48000) as u16;
                    let eav_clock = self
                        .eav_clock
                        .wrapping_sub(if mpf_bit { u64::from(geometry.width) } else { 0 });
                    let sample_clock = aud_clock.wrapping_sub(eav_clock as u16);

                    pos += self.put_hd_audio_data_packet(
                        &mut dst[pos..],
                        ch_group,
                        mpf_bit,
                        sample_clock,
                    );
                    packets_put += 1;
                }
                self.total_audio_samples_put += 1;
                self.sample_pos += 1;
            }
        } else {
            // packets deferred across the switching point are flagged MPF
            let deficit = samples_put_target.saturating_sub(self.sample_pos) as i64;
            for bits in self.mpf_packet_bits.iter_mut() {
                *bits = deficit;
            }
        }

        let active_start = 2 * active_offset;
        let sav = SAV_FVH[usize::from(f2)][usize::from(vbi)];
        dst[active_start - 8] = 0x3ff;
        dst[active_start - 7] = 0x3ff;
        dst[active_start - 6] = 0x000;
        dst[active_start - 5] = 0x000;
        dst[active_start - 4] = 0x000;
        dst[active_start - 3] = 0x000;
        dst[active_start - 2] = sav;
        dst[active_start - 1] = sav;

        let width = pic.width as usize;
        if vbi {
            (self.codecs.blank)(&mut dst[active_start..active_start + width * 2]);
        } else {
            let row = next_row[usize::from(f2)];
            self.convert_active(&mut dst[active_start..], pic, row);
            next_row[usize::from(f2)] += interleave;
        }

        for block in dst[active_start..active_start + width * 2].chunks_exact(16) {
            self.crc.update_block(&mut self.crc_c, &mut self.crc_y, block);
        }
    }

    fn encode_frame(&mut self, frame: &FrameUnit, out: &mut Outputs) -> Result<()> {
        let geometry = self
            .geometry
            .ok_or_else(|| SdiError::Format("no flow definition".into()))?;
        let p = geometry.picture;

        let pic = frame
            .picture()
            .ok_or_else(|| SdiError::InvalidData("SDI encoder needs a picture input".into()))?;

        if pic.width != u32::from(p.active_width) || pic.height != u32::from(p.active_height) {
            return Err(SdiError::InvalidData(format!(
                "picture size {}x{} does not match flow",
                pic.width, pic.height
            )));
        }

        let nominal = self.audio_samples_count();
        let samples = nominal.max(self.queued_audio_frames).min(MAX_AUDIO_FRAMES);

        init_channel_status(&mut self.aes_channel_status);
        self.sample_pos = 0;

        let height = usize::from(geometry.height);
        let line_samples = geometry.line_samples();
        let mut raster = vec![0u16; height * line_samples];

        let interleave = if p.vbi_f2_part1.start != 0 { 2 } else { 1 };
        // NTSC is bff, invert fields
        let mut next_row: [usize; 2] = if p.is_ntsc() { [1, 0] } else { [0, 1] };

        for h in 0..height {
            let line_num = (h + 1) as u16;
            let dst = &mut raster[h * line_samples..(h + 1) * line_samples];

            if p.sd {
                self.encode_sd_line(
                    line_num, dst, pic, &mut next_row, interleave, samples, geometry,
                );
            } else {
                self.encode_hd_line(
                    line_num, dst, pic, &mut next_row, interleave, samples, geometry,
                );
                self.eav_clock += u64::from(geometry.width);
            }
        }

        self.queued_audio_frames = 0;
        self.audio_buf.fill(0);
        self.ttx_units = [Vec::new(), Vec::new()];

        let mut bytes = bytes::BytesMut::with_capacity(raster.len() * 2);
        for sample in &raster {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let mut unit = FrameUnit::from_block(bytes);
        unit.clock = frame.clock;
        unit.discontinuity = frame.discontinuity;
        out.push(Port::Main, unit);
        Ok(())
    }
}

impl Default for SdiEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for SdiEncoder {
    fn set_input_format(&mut self, flow: &FlowDefinition) -> Result<()> {
        let pic = flow
            .as_picture()
            .ok_or_else(|| SdiError::Format("SDI encoder expects a picture flow".into()))?;

        let geometry = find_geometry(pic.hsize, pic.vsize, pic.fps)
            .ok_or_else(|| SdiError::Format(format!(
                "no SDI geometry for {}x{} @ {}",
                pic.hsize, pic.vsize, pic.fps
            )))?;

        self.input = if flow.is_v210() {
            InputKind::V210
        } else {
            match flow.bit_depth() {
                Some(8) => InputKind::Planar8,
                Some(10) => InputKind::Planar10,
                _ => {
                    return Err(SdiError::Format(
                        "SDI encoder needs v210 or planar 4:2:2 input".into(),
                    ))
                }
            }
        };

        self.geometry = Some(geometry);
        self.fps = pic.fps;

        // dolby_offset is stored exactly once per flow definition
        self.dolby_offset = 0;
        if geometry.height == 1125 {
            if pic.fps == Rational::new(25, 1) {
                self.dolby_offset = 34;
            } else if pic.fps == Rational::new(30000, 1001) {
                self.dolby_offset = 32;
            }
        }

        Ok(())
    }

    fn push_frame(&mut self, frame: FrameUnit, out: &mut Outputs) -> Result<()> {
        if let Some(def) = frame.flow_def.clone() {
            self.set_input_format(&def)?;
            out.push(
                Port::Main,
                FrameUnit::new_flow(FlowDefinition::Block(BlockFlow {
                    octetrate: None,
                    alignment: Some(32),
                    append_padding: 256, // worst case for the packers
                })),
            );
            return Ok(());
        }
        self.encode_frame(&frame, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_status_block() {
        let mut status = [0u8; 24];
        init_channel_status(&mut status);
        assert_eq!(status[0], 0x80);
        assert_eq!(status[1], 0x40);
        assert_eq!(status[2], 0x20);
        // CRC-8 over the first 23 bytes is stable
        let crc = status[23];
        let mut again = [0u8; 24];
        init_channel_status(&mut again);
        assert_eq!(again[23], crc);
        assert_ne!(crc, 0);
    }
}
