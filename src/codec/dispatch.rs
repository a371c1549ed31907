//! Runtime-dispatched pixel codec table.
//!
//! CPU features are detected once at stage init; each conversion slot in
//! [`PixelCodecs`] then holds the best implementation for this machine
//! and is never switched mid-frame. A scalar reference exists for every
//! conversion and is the fallback everywhere; accelerated variants must
//! be bit-identical to it.

use super::{pack, planar};

/// CPU features relevant to the pixel codecs
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuFeatures {
    /// SSE2 available
    pub sse2: bool,
    /// SSSE3 available
    pub ssse3: bool,
    /// AVX available
    pub avx: bool,
    /// AVX2 available
    pub avx2: bool,
}

impl CpuFeatures {
    /// Detects the features of the running CPU
    pub fn detect() -> Self {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            Self {
                sse2: is_x86_feature_detected!("sse2"),
                ssse3: is_x86_feature_detected!("ssse3"),
                avx: is_x86_feature_detected!("avx"),
                avx2: is_x86_feature_detected!("avx2"),
            }
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        {
            Self::default()
        }
    }
}

/// Function-pointer table of pixel conversions, chosen once at init
#[derive(Clone, Copy)]
pub struct PixelCodecs {
    /// SDI packed bytes to UYVY samples
    pub sdi_to_uyvy: fn(&[u8], &mut [u16]),
    /// UYVY samples to SDI packed bytes
    pub uyvy_to_sdi: fn(&mut [u8], &[u16]),
    /// UYVY samples to two SDI destinations at once
    pub uyvy_to_sdi_2: fn(&mut [u8], &mut [u8], &[u16]),
    /// V210 blocks to UYVY samples
    pub v210_to_uyvy: fn(&[u8], &mut [u16]),
    /// UYVY samples to V210 blocks
    pub uyvy_to_v210: fn(&[u16], &mut [u8]),
    /// SDI packed bytes to V210 blocks
    pub sdi_to_v210: fn(&[u8], &mut [u8]),
    /// SDI packed bytes to 8-bit planes
    pub sdi_to_planar8: fn(&[u8], &mut [u8], &mut [u8], &mut [u8]),
    /// SDI packed bytes to 10-bit planes
    pub sdi_to_planar10: fn(&[u8], &mut [u16], &mut [u16], &mut [u16]),
    /// 8-bit planes to UYVY samples (with saturation)
    pub planar8_to_uyvy: fn(&mut [u16], &[u8], &[u8], &[u8]),
    /// 10-bit planes to UYVY samples (with saturation)
    pub planar10_to_uyvy: fn(&mut [u16], &[u16], &[u16], &[u16]),
    /// UYVY samples to 8-bit planes
    pub uyvy_to_planar8: fn(&mut [u8], &mut [u8], &mut [u8], &[u16]),
    /// UYVY samples to 10-bit planes
    pub uyvy_to_planar10: fn(&mut [u16], &mut [u16], &mut [u16], &[u16]),
    /// 8-bit planes to SDI packed bytes
    pub planar8_to_sdi: fn(&[u8], &[u8], &[u8], &mut [u8]),
    /// 10-bit planes to SDI packed bytes
    pub planar10_to_sdi: fn(&[u16], &[u16], &[u16], &mut [u8]),
    /// 10-bit planes to two SDI destinations at once
    pub planar10_to_sdi_2: fn(&[u16], &[u16], &[u16], &mut [u8], &mut [u8]),
    /// Blanking fill (C = 0x200, Y = 0x040)
    pub blank: fn(&mut [u16]),
}

impl PixelCodecs {
    /// The scalar reference table
    pub fn scalar() -> Self {
        Self {
            sdi_to_uyvy: pack::sdi_to_uyvy,
            uyvy_to_sdi: pack::uyvy_to_sdi,
            uyvy_to_sdi_2: pack::uyvy_to_sdi_2,
            v210_to_uyvy: pack::v210_to_uyvy,
            uyvy_to_v210: pack::uyvy_to_v210,
            sdi_to_v210: pack::sdi_to_v210,
            sdi_to_planar8: planar::sdi_to_planar8,
            sdi_to_planar10: planar::sdi_to_planar10,
            planar8_to_uyvy: planar::planar8_to_uyvy,
            planar10_to_uyvy: planar::planar10_to_uyvy,
            uyvy_to_planar8: planar::uyvy_to_planar8,
            uyvy_to_planar10: planar::uyvy_to_planar10,
            planar8_to_sdi: planar::planar8_to_sdi,
            planar10_to_sdi: planar::planar10_to_sdi,
            planar10_to_sdi_2: planar::planar10_to_sdi_2,
            blank: planar::blank,
        }
    }

    /// Selects the best implementations for the given feature set
    #[allow(unused_mut, unused_variables)]
    pub fn select(features: CpuFeatures) -> Self {
        let mut codecs = Self::scalar();

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if features.sse2 {
                codecs.planar10_to_uyvy = super::simd::planar10_to_uyvy_sse2;
                codecs.blank = super::simd::blank_sse2;
            }
        }

        codecs
    }

    /// Detects CPU features and selects the table
    pub fn new() -> Self {
        Self::select(CpuFeatures::detect())
    }
}

impl Default for PixelCodecs {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PixelCodecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelCodecs").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_matches_scalar() {
        let selected = PixelCodecs::new();
        let scalar = PixelCodecs::scalar();

        let y: Vec<u16> = (0..64u16).map(|i| 4 + (i * 37) % 1015).collect();
        let u: Vec<u16> = (0..32u16).map(|i| 4 + (i * 91) % 1015).collect();
        let v: Vec<u16> = (0..32u16).map(|i| 4 + (i * 53) % 1015).collect();

        let mut out_sel = vec![0u16; 128];
        let mut out_ref = vec![0u16; 128];
        (selected.planar10_to_uyvy)(&mut out_sel, &y, &u, &v);
        (scalar.planar10_to_uyvy)(&mut out_ref, &y, &u, &v);
        assert_eq!(out_sel, out_ref);

        let mut blank_sel = vec![1u16; 70];
        let mut blank_ref = vec![1u16; 70];
        (selected.blank)(&mut blank_sel);
        (scalar.blank)(&mut blank_ref);
        assert_eq!(blank_sel, blank_ref);
    }
}
