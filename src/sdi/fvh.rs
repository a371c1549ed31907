//! EAV/SAV timing reference codes.
//!
//! The fourth word of a timing reference carries the F/V/H flags with
//! their Hamming protection bits; indexed by `[field 2][vbi]`.

/// SAV F/V/H control words, indexed `[field][vbi]`
pub static SAV_FVH: [[u16; 2]; 2] = [[0x200, 0x2ac], [0x31c, 0x3b0]];

/// EAV F/V/H control words, indexed `[field][vbi]`
pub static EAV_FVH: [[u16; 2]; 2] = [[0x274, 0x2d8], [0x368, 0x3c4]];

/// EAV length in samples (SD)
pub const SD_EAV_LEN: usize = 4;
/// SAV length in samples (SD)
pub const SD_SAV_LEN: usize = 4;
/// EAV length in samples including the line number and CRC words (HD)
pub const HD_EAV_LEN: usize = 16;
/// SAV length in samples (HD)
pub const HD_SAV_LEN: usize = 8;

/// EAV word of the last line of field 2 (vbi, F=1)
pub const EAV_F2_VBI: u16 = 0x3c4;
/// EAV word of the first line of field 1 (vbi, F=0)
pub const EAV_F1_VBI: u16 = 0x2d8;
