use bytes::BytesMut;
use std::collections::HashMap;

/// A rational number, used for frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    /// Numerator
    pub num: u64,
    /// Denominator
    pub den: u64,
}

impl Rational {
    /// Creates a new rational
    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Chroma plane tag for 8-bit luma
pub const CHROMA_Y8: &str = "y8";
/// Chroma plane tag for 8-bit Cb
pub const CHROMA_U8: &str = "u8";
/// Chroma plane tag for 8-bit Cr
pub const CHROMA_V8: &str = "v8";
/// Chroma plane tag for 10-bit little-endian luma
pub const CHROMA_Y10: &str = "y10l";
/// Chroma plane tag for 10-bit little-endian Cb
pub const CHROMA_U10: &str = "u10l";
/// Chroma plane tag for 10-bit little-endian Cr
pub const CHROMA_V10: &str = "v10l";
/// Chroma plane tag for packed V210 macropixels
pub const CHROMA_V210: &str = "u10y10v10y10u10y10v10y10u10y10v10y10";
/// Chroma plane tag for the interleaved 10-bit VANC side channel
pub const CHROMA_X10: &str = "x10";

/// Description of one plane of a picture flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneDef {
    /// Chroma tag (`y8`, `u10l`, the packed V210 tag, ...)
    pub tag: &'static str,
    /// Horizontal subsampling factor
    pub hsub: u8,
    /// Vertical subsampling factor
    pub vsub: u8,
    /// Bytes per macropixel in this plane
    pub macropixel_size: u8,
}

/// Sticky-state description of a byte-stream flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFlow {
    /// Nominal octet rate of the stream, if known
    pub octetrate: Option<u64>,
    /// Required buffer alignment in bytes (SIMD paths need 32)
    pub alignment: Option<usize>,
    /// Extra writable bytes appended past the payload for packers
    pub append_padding: usize,
}

/// Sticky-state description of a picture flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureFlow {
    /// Active width in pixels
    pub hsize: u32,
    /// Active height in lines
    pub vsize: u32,
    /// Frame rate
    pub fps: Rational,
    /// Pixels per macropixel (6 for V210, 1 for planar)
    pub macropixel: u8,
    /// Plane layout
    pub planes: Vec<PlaneDef>,
    /// Progressive scan flag
    pub progressive: bool,
    /// Top-field-first flag (NTSC is bottom field first)
    pub tff: bool,
    /// Pipeline latency in 27 MHz ticks
    pub latency: u64,
}

/// Sticky-state description of an audio flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundFlow {
    /// Number of interleaved channels
    pub channels: u8,
    /// Sample rate in Hz
    pub rate: u32,
    /// Pipeline latency in 27 MHz ticks
    pub latency: u64,
}

/// Flow definition: the sticky-state sibling of [`FrameUnit`] describing a
/// stream. Cloned on propagation; a flow change travels as an empty
/// FrameUnit with a new definition attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDefinition {
    /// Byte-stream flow (`block.`)
    Block(BlockFlow),
    /// Picture flow (`pic.`)
    Picture(PictureFlow),
    /// S32 audio flow (`sound.s32.`)
    Sound(SoundFlow),
}

impl FlowDefinition {
    /// Returns the picture flow, if this is one
    pub fn as_picture(&self) -> Option<&PictureFlow> {
        match self {
            FlowDefinition::Picture(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the block flow, if this is one
    pub fn as_block(&self) -> Option<&BlockFlow> {
        match self {
            FlowDefinition::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Returns true when the picture flow carries packed V210 data
    pub fn is_v210(&self) -> bool {
        self.as_picture()
            .map(|p| p.planes.len() == 1 && p.planes[0].tag == CHROMA_V210)
            .unwrap_or(false)
    }

    /// Returns the planar bit depth (8 or 10) of a picture flow
    pub fn bit_depth(&self) -> Option<u8> {
        let p = self.as_picture()?;
        if self.is_v210() {
            return None;
        }
        Some(if p.planes.first()?.tag == CHROMA_Y8 { 8 } else { 10 })
    }
}

/// Sample storage of one picture plane
#[derive(Debug, Clone)]
pub enum PlaneData {
    /// 8-bit samples (also packed byte formats like V210)
    B8(Vec<u8>),
    /// 16-bit samples holding 10-bit values
    B16(Vec<u16>),
}

impl PlaneData {
    /// Length in samples
    pub fn len(&self) -> usize {
        match self {
            PlaneData::B8(v) => v.len(),
            PlaneData::B16(v) => v.len(),
        }
    }

    /// Returns true when the plane holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One plane of a picture payload
#[derive(Debug, Clone)]
pub struct Plane {
    /// Chroma tag of this plane
    pub tag: &'static str,
    /// Row stride in samples (elements, not bytes)
    pub stride: usize,
    /// Sample storage
    pub data: PlaneData,
}

impl Plane {
    /// Allocates a zeroed 8-bit plane
    pub fn new_b8(tag: &'static str, stride: usize, rows: usize) -> Self {
        Self {
            tag,
            stride,
            data: PlaneData::B8(vec![0u8; stride * rows]),
        }
    }

    /// Allocates a zeroed 16-bit plane
    pub fn new_b16(tag: &'static str, stride: usize, rows: usize) -> Self {
        Self {
            tag,
            stride,
            data: PlaneData::B16(vec![0u16; stride * rows]),
        }
    }

    /// Returns a row of an 8-bit plane
    pub fn row8(&self, row: usize) -> &[u8] {
        match &self.data {
            PlaneData::B8(v) => &v[row * self.stride..(row + 1) * self.stride],
            PlaneData::B16(_) => panic!("row8 on 16-bit plane"),
        }
    }

    /// Returns a mutable row of an 8-bit plane
    pub fn row8_mut(&mut self, row: usize) -> &mut [u8] {
        match &mut self.data {
            PlaneData::B8(v) => &mut v[row * self.stride..(row + 1) * self.stride],
            PlaneData::B16(_) => panic!("row8_mut on 16-bit plane"),
        }
    }

    /// Returns a row of a 16-bit plane
    pub fn row16(&self, row: usize) -> &[u16] {
        match &self.data {
            PlaneData::B16(v) => &v[row * self.stride..(row + 1) * self.stride],
            PlaneData::B8(_) => panic!("row16 on 8-bit plane"),
        }
    }

    /// Returns a mutable row of a 16-bit plane
    pub fn row16_mut(&mut self, row: usize) -> &mut [u16] {
        match &mut self.data {
            PlaneData::B16(v) => &mut v[row * self.stride..(row + 1) * self.stride],
            PlaneData::B8(_) => panic!("row16_mut on 8-bit plane"),
        }
    }
}

/// A planar picture payload (1 to 3 planes)
#[derive(Debug, Clone)]
pub struct Picture {
    /// Active width in pixels
    pub width: u32,
    /// Active height in lines
    pub height: u32,
    /// Plane storage
    pub planes: Vec<Plane>,
}

impl Picture {
    /// Looks up a plane by chroma tag
    pub fn plane(&self, tag: &str) -> Option<&Plane> {
        self.planes.iter().find(|p| p.tag == tag)
    }

    /// Looks up a mutable plane by chroma tag
    pub fn plane_mut(&mut self, tag: &str) -> Option<&mut Plane> {
        self.planes.iter_mut().find(|p| p.tag == tag)
    }
}

/// Interleaved signed 32-bit audio (16 channels at 48 kHz on the SDI path)
#[derive(Debug, Clone)]
pub struct SoundBuffer {
    /// Number of interleaved channels
    pub channels: usize,
    /// Interleaved samples; length is a multiple of `channels`
    pub samples: Vec<i32>,
}

impl SoundBuffer {
    /// Allocates a silent buffer of `count` frames
    pub fn silence(channels: usize, count: usize) -> Self {
        Self {
            channels,
            samples: vec![0i32; channels * count],
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Truncates to `count` frames, keeping the earliest
    pub fn resize_frames(&mut self, count: usize) {
        self.samples.resize(self.channels * count, 0);
    }
}

/// Payload carried by a [`FrameUnit`]
#[derive(Debug, Clone)]
pub enum Payload {
    /// No payload: flow-definition carrier or control-only unit
    Empty,
    /// Contiguous byte buffer
    Block(BytesMut),
    /// Planar picture
    Picture(Picture),
    /// S32 interleaved audio
    Sound(SoundBuffer),
}

/// Timestamp group in 27 MHz ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockRefs {
    /// System reception time
    pub cr_sys: Option<u64>,
    /// Original PTS, as received
    pub pts_orig: Option<u64>,
    /// Program PTS (presentation)
    pub pts_prog: Option<u64>,
    /// System-clock PTS (scheduling)
    pub pts_sys: Option<u64>,
    /// Duration
    pub duration: Option<u64>,
}

/// The opaque unit of flow between stages.
///
/// A FrameUnit carries either a byte buffer, a planar picture or an audio
/// buffer, a timestamp group, a small attribute dictionary and a
/// discontinuity flag. It is owned by exactly one stage at a time;
/// ownership transfers on `push_frame`.
#[derive(Debug, Clone)]
pub struct FrameUnit {
    /// Payload
    pub payload: Payload,
    /// Timestamps
    pub clock: ClockRefs,
    /// Attribute dictionary keyed by short string
    pub attributes: HashMap<String, String>,
    /// Discontinuity flag, set after losses upstream
    pub discontinuity: bool,
    /// Attached flow definition (format-change carrier)
    pub flow_def: Option<FlowDefinition>,
}

impl FrameUnit {
    /// Creates a unit with the given payload and no timestamps
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            clock: ClockRefs::default(),
            attributes: HashMap::new(),
            discontinuity: false,
            flow_def: None,
        }
    }

    /// Creates a payload-less unit that propagates a format change
    pub fn new_flow(def: FlowDefinition) -> Self {
        let mut unit = Self::new(Payload::Empty);
        unit.flow_def = Some(def);
        unit
    }

    /// Creates a byte-buffer unit
    pub fn from_block(data: BytesMut) -> Self {
        Self::new(Payload::Block(data))
    }

    /// Sets the program PTS
    pub fn with_pts_prog(mut self, pts: u64) -> Self {
        self.clock.pts_prog = Some(pts);
        self
    }

    /// Sets the original PTS
    pub fn with_pts_orig(mut self, pts: u64) -> Self {
        self.clock.pts_orig = Some(pts);
        self
    }

    /// Sets the system PTS
    pub fn with_pts_sys(mut self, pts: u64) -> Self {
        self.clock.pts_sys = Some(pts);
        self
    }

    /// Sets the duration
    pub fn with_duration(mut self, duration: u64) -> Self {
        self.clock.duration = Some(duration);
        self
    }

    /// Flags a discontinuity
    pub fn with_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }

    /// Returns the block payload, if any
    pub fn block(&self) -> Option<&BytesMut> {
        match &self.payload {
            Payload::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the picture payload, if any
    pub fn picture(&self) -> Option<&Picture> {
        match &self.payload {
            Payload::Picture(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the sound payload, if any
    pub fn sound(&self) -> Option<&SoundBuffer> {
        match &self.payload {
            Payload::Sound(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_unit_builders() {
        let unit = FrameUnit::from_block(BytesMut::from(&[1u8, 2, 3][..]))
            .with_pts_prog(90_000)
            .with_duration(1_080_000);
        assert_eq!(unit.clock.pts_prog, Some(90_000));
        assert_eq!(unit.clock.duration, Some(1_080_000));
        assert_eq!(unit.block().unwrap().len(), 3);
        assert!(!unit.discontinuity);
    }

    #[test]
    fn test_flow_def_probes() {
        let flow = FlowDefinition::Picture(PictureFlow {
            hsize: 1920,
            vsize: 1080,
            fps: Rational::new(25, 1),
            macropixel: 1,
            planes: vec![
                PlaneDef { tag: CHROMA_Y10, hsub: 1, vsub: 1, macropixel_size: 2 },
                PlaneDef { tag: CHROMA_U10, hsub: 2, vsub: 1, macropixel_size: 2 },
                PlaneDef { tag: CHROMA_V10, hsub: 2, vsub: 1, macropixel_size: 2 },
            ],
            progressive: false,
            tff: true,
            latency: 0,
        });
        assert!(!flow.is_v210());
        assert_eq!(flow.bit_depth(), Some(10));
    }
}
