//! SSE2 variants of the hottest interleave kernels.
//!
//! Each function has the same signature and bit-exact behavior as its
//! scalar reference in [`planar`](super::planar); callers go through the
//! dispatch table, which only selects these when the CPU reports the
//! feature.

#![cfg(any(target_arch = "x86", target_arch = "x86_64"))]

#[cfg(target_arch = "x86")]
use std::arch::x86::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::planar;

/// SSE2 10-bit planar to UYVY interleave with saturation.
///
/// Processes 8 pixels per iteration; the tail goes through the scalar
/// reference.
pub fn planar10_to_uyvy_sse2(dst: &mut [u16], y: &[u16], u: &[u16], v: &[u16]) {
    debug_assert_eq!(dst.len(), y.len() * 2);
    let pixels = y.len();
    let blocks = pixels / 8;

    // SAFETY: selection is gated on runtime SSE2 detection and all
    // accesses stay within the checked slice bounds.
    unsafe {
        planar10_to_uyvy_sse2_inner(dst.as_mut_ptr(), y.as_ptr(), u.as_ptr(), v.as_ptr(), blocks);
    }

    let done = blocks * 8;
    if done < pixels {
        planar::planar10_to_uyvy(
            &mut dst[done * 2..],
            &y[done..],
            &u[done / 2..],
            &v[done / 2..],
        );
    }
}

#[target_feature(enable = "sse2")]
unsafe fn planar10_to_uyvy_sse2_inner(
    dst: *mut u16,
    y: *const u16,
    u: *const u16,
    v: *const u16,
    blocks: usize,
) {
    let min = _mm_set1_epi16(4);
    let max = _mm_set1_epi16(1019);

    for b in 0..blocks {
        let yv = _mm_loadu_si128(y.add(b * 8) as *const __m128i);
        let uv = _mm_loadl_epi64(u.add(b * 4) as *const __m128i);
        let vv = _mm_loadl_epi64(v.add(b * 4) as *const __m128i);

        let yv = _mm_max_epi16(_mm_min_epi16(yv, max), min);
        let uv = _mm_max_epi16(_mm_min_epi16(uv, max), min);
        let vv = _mm_max_epi16(_mm_min_epi16(vv, max), min);

        // u0 v0 u1 v1 u2 v2 u3 v3
        let c = _mm_unpacklo_epi16(uv, vv);

        // c0 y0 c1 y1 ... = u0 y0 v0 y1 u1 y2 v1 y3
        let lo = _mm_unpacklo_epi16(c, yv);
        let hi = _mm_unpackhi_epi16(c, yv);

        _mm_storeu_si128(dst.add(b * 16) as *mut __m128i, lo);
        _mm_storeu_si128(dst.add(b * 16 + 8) as *mut __m128i, hi);
    }
}

/// SSE2 blanking fill (C = 0x200, Y = 0x040).
///
/// Bit-exact with the scalar reference, including leaving a trailing odd
/// sample untouched.
pub fn blank_sse2(dst: &mut [u16]) {
    let pairs = dst.len() / 2;
    let blocks = pairs / 4;

    // SAFETY: gated on runtime SSE2 detection; writes stay within
    // `blocks * 8` samples of the slice.
    unsafe {
        blank_sse2_inner(dst.as_mut_ptr(), blocks);
    }

    planar::blank(&mut dst[blocks * 8..]);
}

#[target_feature(enable = "sse2")]
unsafe fn blank_sse2_inner(dst: *mut u16, blocks: usize) {
    let fill = _mm_set1_epi32(0x0040_0200);
    for b in 0..blocks {
        _mm_storeu_si128(dst.add(b * 8) as *mut __m128i, fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar10_sse2_matches_scalar() {
        if !is_x86_feature_detected!("sse2") {
            return;
        }
        for pixels in [0usize, 2, 6, 8, 10, 16, 22, 1920] {
            let y: Vec<u16> = (0..pixels as u16).map(|i| (i * 29) & 0x3ff).collect();
            let u: Vec<u16> = (0..(pixels / 2) as u16).map(|i| (i * 41) & 0x3ff).collect();
            let v: Vec<u16> = (0..(pixels / 2) as u16).map(|i| (i * 13) & 0x3ff).collect();

            let mut out_simd = vec![0u16; pixels * 2];
            let mut out_ref = vec![0u16; pixels * 2];
            planar10_to_uyvy_sse2(&mut out_simd, &y, &u, &v);
            planar::planar10_to_uyvy(&mut out_ref, &y, &u, &v);
            assert_eq!(out_simd, out_ref, "pixels={pixels}");
        }
    }

    #[test]
    fn test_blank_sse2_matches_scalar() {
        if !is_x86_feature_detected!("sse2") {
            return;
        }
        for len in [0usize, 1, 2, 7, 8, 9, 31, 720] {
            let mut simd = vec![0xffffu16; len];
            let mut scalar = vec![0xffffu16; len];
            blank_sse2(&mut simd);
            planar::blank(&mut scalar);
            assert_eq!(simd, scalar, "len={len}");
        }
    }
}
