//! Packed pixel formats: 10-bit SDI byte packing and V210.
//!
//! SDI packing is MSB first: groups of 5 bytes carry 4 10-bit samples in
//! transport order. V210 carries 3 samples per little-endian 32-bit word,
//! 6 pixels (12 samples) per 16-byte block.
//!
//! All functions here are total and side-effect free; slice lengths must
//! match (4 samples per 5 packed bytes, 12 samples per 16 V210 bytes).

/// Unpacks SDI 10-bit groups into 16-bit samples.
///
/// `src.len()` must be a multiple of 5; `dst` receives 4 samples per
/// group.
pub fn sdi_to_uyvy(src: &[u8], dst: &mut [u16]) {
    debug_assert_eq!(src.len() % 5, 0);
    debug_assert_eq!(dst.len(), src.len() / 5 * 4);

    for (group, out) in src.chunks_exact(5).zip(dst.chunks_exact_mut(4)) {
        let [a, b, c, d, e] = [
            u16::from(group[0]),
            u16::from(group[1]),
            u16::from(group[2]),
            u16::from(group[3]),
            u16::from(group[4]),
        ];
        out[0] = (a << 2) | (b >> 6); // 1111111122
        out[1] = ((b & 0x3f) << 4) | (c >> 4); // 2222223333
        out[2] = ((c & 0x0f) << 6) | (d >> 2); // 3333444444
        out[3] = ((d & 0x03) << 8) | e; // 4455555555
    }
}

/// Packs 16-bit samples into SDI 10-bit transport order.
///
/// `src.len()` must be a multiple of 4; `dst` receives 5 bytes per group.
pub fn uyvy_to_sdi(dst: &mut [u8], src: &[u16]) {
    debug_assert_eq!(src.len() % 4, 0);
    debug_assert_eq!(dst.len(), src.len() / 4 * 5);

    for (samples, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(5)) {
        let [s0, s1, s2, s3] = [
            samples[0] & 0x3ff,
            samples[1] & 0x3ff,
            samples[2] & 0x3ff,
            samples[3] & 0x3ff,
        ];
        out[0] = (s0 >> 2) as u8;
        out[1] = ((s0 << 6) | (s1 >> 4)) as u8;
        out[2] = ((s1 << 4) | (s2 >> 6)) as u8;
        out[3] = ((s2 << 2) | (s3 >> 8)) as u8;
        out[4] = s3 as u8;
    }
}

/// Packs 16-bit samples into two destinations at once (dual-NIC send path)
pub fn uyvy_to_sdi_2(dst1: &mut [u8], dst2: &mut [u8], src: &[u16]) {
    uyvy_to_sdi(dst1, src);
    dst2[..dst1.len()].copy_from_slice(dst1);
}

/// Unpacks V210 blocks into 16-bit samples.
///
/// `src.len()` must be a multiple of 16 (one block is 6 pixels); `dst`
/// receives 12 samples per block.
pub fn v210_to_uyvy(src: &[u8], dst: &mut [u16]) {
    debug_assert_eq!(src.len() % 16, 0);
    debug_assert_eq!(dst.len(), src.len() / 16 * 12);

    for (block, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(3)) {
        let val = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        out[0] = (val & 0x3ff) as u16;
        out[1] = ((val >> 10) & 0x3ff) as u16;
        out[2] = ((val >> 20) & 0x3ff) as u16;
    }
}

/// Packs 16-bit samples into V210 blocks (3 samples per 32-bit word)
pub fn uyvy_to_v210(src: &[u16], dst: &mut [u8]) {
    debug_assert_eq!(src.len() % 12, 0);
    debug_assert_eq!(dst.len(), src.len() / 12 * 16);

    for (samples, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
        let val = u32::from(samples[0] & 0x3ff)
            | (u32::from(samples[1] & 0x3ff) << 10)
            | (u32::from(samples[2] & 0x3ff) << 20);
        out.copy_from_slice(&val.to_le_bytes());
    }
}

/// Transcodes packed SDI bytes directly into V210 blocks.
///
/// 15 source bytes (12 samples) become one and a third V210 word group;
/// lengths must describe the same sample count, a multiple of 12.
pub fn sdi_to_v210(src: &[u8], dst: &mut [u8]) {
    debug_assert_eq!(src.len() % 15, 0);
    let samples = src.len() / 5 * 4;
    debug_assert_eq!(dst.len(), samples / 12 * 16);

    let mut tmp = [0u16; 12];
    for (group, out) in src.chunks_exact(15).zip(dst.chunks_exact_mut(16)) {
        sdi_to_uyvy(group, &mut tmp);
        uyvy_to_v210(&tmp, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_sdi_pack_known_group() {
        // 4 samples 0x3ff, 0x000, 0x2d8, 0x123
        let src = [0x3ff, 0x000, 0x2d8, 0x123];
        let mut packed = [0u8; 5];
        uyvy_to_sdi(&mut packed, &src);
        assert_eq!(packed, [0xff, 0xc0, 0x0b, 0x61, 0x23]);

        let mut back = [0u16; 4];
        sdi_to_uyvy(&packed, &mut back);
        assert_eq!(back, src);
    }

    #[quickcheck]
    fn prop_sdi_roundtrip(words: Vec<u16>) -> bool {
        let samples: Vec<u16> = words.iter().map(|w| w & 0x3ff).collect();
        let n = samples.len() / 4 * 4;
        let samples = &samples[..n];

        let mut packed = vec![0u8; n / 4 * 5];
        uyvy_to_sdi(&mut packed, samples);
        let mut back = vec![0u16; n];
        sdi_to_uyvy(&packed, &mut back);
        back == samples
    }

    #[quickcheck]
    fn prop_v210_roundtrip(words: Vec<u16>) -> bool {
        let samples: Vec<u16> = words.iter().map(|w| w & 0x3ff).collect();
        let n = samples.len() / 12 * 12;
        let samples = &samples[..n];

        let mut packed = vec![0u8; n / 12 * 16];
        uyvy_to_v210(samples, &mut packed);
        let mut back = vec![0u16; n];
        v210_to_uyvy(&packed, &mut back);
        back == samples
    }

    #[test]
    fn test_dual_destination_pack() {
        let src: Vec<u16> = (0..16u16).map(|i| (i * 61) & 0x3ff).collect();
        let mut d1 = vec![0u8; 20];
        let mut d2 = vec![0u8; 20];
        uyvy_to_sdi_2(&mut d1, &mut d2, &src);
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_sdi_to_v210_matches_two_step() {
        let samples: Vec<u16> = (0..24u16).map(|i| (i * 97 + 3) & 0x3ff).collect();
        let mut packed = vec![0u8; 30];
        uyvy_to_sdi(&mut packed, &samples);

        let mut direct = vec![0u8; 32];
        sdi_to_v210(&packed, &mut direct);

        let mut via = vec![0u8; 32];
        uyvy_to_v210(&samples, &mut via);
        assert_eq!(direct, via);
    }
}
