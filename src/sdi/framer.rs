//! SDI framer: byte stream to whole frames.
//!
//! Input blocks carry 16-bit SDI samples with no frame alignment
//! guarantee. The framer scans the EAV F/V/H word at line stride for the
//! field-2-end to field-1-start transition, trims the stream there, then
//! accumulates lines until exactly `height` are present. Overshooting
//! blocks are split at the frame boundary and the tail kept for the next
//! frame.

use crate::av::{FlowDefinition, FrameUnit, Outputs, Payload, Port, Stage};
use crate::sdi::fvh::{EAV_F1_VBI, EAV_F2_VBI};
use crate::sdi::geometry::{find_geometry, SdiGeometry};
use crate::{Result, SdiError};
use bytes::BytesMut;

/// Reassembles byte-streamed SDI lines into whole frames
pub struct SdiFramer {
    geometry: Option<&'static SdiGeometry>,
    prev_fvh: u16,
    start: bool,
    pending: Option<FrameUnit>,
    cached_lines: usize,
}

impl SdiFramer {
    /// Creates a framer waiting for a frame boundary
    pub fn new() -> Self {
        Self {
            geometry: None,
            prev_fvh: 0,
            start: false,
            pending: None,
            cached_lines: 0,
        }
    }

    fn geometry(&self) -> Result<&'static SdiGeometry> {
        self.geometry
            .ok_or_else(|| SdiError::Format("no flow definition".into()))
    }

    fn fvh_at(block: &[u8], sample_offset: usize) -> u16 {
        let byte = sample_offset * 2;
        u16::from_le_bytes([block[byte], block[byte + 1]])
    }

    fn handle_block(&mut self, mut frame: FrameUnit, out: &mut Outputs) -> Result<()> {
        let geometry = self.geometry()?;
        let line_bytes = geometry.line_samples() * 2;
        let height = usize::from(geometry.height);

        if !self.start {
            // find top of frame
            let eav_fvh_offset = if geometry.picture.sd { 3 } else { 6 };

            let (found, offset_bytes) = {
                let block = frame
                    .block()
                    .ok_or_else(|| SdiError::InvalidData("framer needs a block input".into()))?;

                let mut found = false;
                let mut offset = 0usize;
                while offset + line_bytes <= block.len() {
                    let fvh = Self::fvh_at(block, offset / 2 + eav_fvh_offset);
                    if self.prev_fvh == EAV_F2_VBI && fvh == EAV_F1_VBI {
                        found = true;
                        break;
                    }
                    self.prev_fvh = fvh;
                    offset += line_bytes;
                }
                (found, offset)
            };

            if !found {
                return Ok(());
            }

            self.start = true;
            if let Payload::Block(block) = &mut frame.payload {
                let _ = block.split_to(offset_bytes);
            }
        }

        let mut frame = frame;
        loop {
            let lines_in_block = frame.block().map(|b| b.len() / line_bytes).unwrap_or(0);
            let total = self.cached_lines + lines_in_block;

            if total < height {
                match self.pending.take() {
                    Some(mut pending) => {
                        if let (Payload::Block(dst), Some(src)) =
                            (&mut pending.payload, frame.block())
                        {
                            dst.extend_from_slice(src);
                        }
                        self.pending = Some(pending);
                    }
                    None => self.pending = Some(frame),
                }
                self.cached_lines = total;
                return Ok(());
            }

            if total == height {
                let done = match self.pending.take() {
                    Some(mut pending) => {
                        if let (Payload::Block(dst), Some(src)) =
                            (&mut pending.payload, frame.block())
                        {
                            dst.extend_from_slice(src);
                        }
                        pending
                    }
                    None => frame,
                };
                self.cached_lines = 0;
                out.push(Port::Main, done);
                return Ok(());
            }

            // split the block at the frame boundary, emit the completed
            // frame and keep the tail as the start of the next
            let lines_needed = height - self.cached_lines;
            let tail = match &mut frame.payload {
                Payload::Block(block) => block.split_off(lines_needed * line_bytes),
                _ => BytesMut::new(),
            };

            let done = match self.pending.take() {
                Some(mut pending) => {
                    if let (Payload::Block(dst), Some(src)) =
                        (&mut pending.payload, frame.block())
                    {
                        dst.extend_from_slice(src);
                    }
                    pending
                }
                None => {
                    let mut head = FrameUnit::from_block(BytesMut::new());
                    if let Some(src) = frame.block() {
                        if let Payload::Block(dst) = &mut head.payload {
                            dst.extend_from_slice(src);
                        }
                    }
                    head.clock = frame.clock;
                    head
                }
            };
            out.push(Port::Main, done);

            self.cached_lines = 0;
            let mut next = FrameUnit::from_block(tail);
            next.clock = frame.clock;
            frame = next;
        }
    }
}

impl Default for SdiFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for SdiFramer {
    fn set_input_format(&mut self, flow: &FlowDefinition) -> Result<()> {
        let pic = flow
            .as_picture()
            .ok_or_else(|| SdiError::Format("framer expects a picture flow".into()))?;
        self.geometry = Some(
            find_geometry(pic.hsize, pic.vsize, pic.fps).ok_or_else(|| {
                SdiError::Format(format!(
                    "no SDI geometry for {}x{} @ {}",
                    pic.hsize, pic.vsize, pic.fps
                ))
            })?,
        );
        Ok(())
    }

    fn push_frame(&mut self, frame: FrameUnit, out: &mut Outputs) -> Result<()> {
        if let Some(def) = frame.flow_def.clone() {
            return self.set_input_format(&def);
        }
        self.handle_block(frame, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{PictureFlow, Rational};
    use crate::sdi::fvh::EAV_FVH;

    fn flow_1080i25() -> FlowDefinition {
        FlowDefinition::Picture(PictureFlow {
            hsize: 1920,
            vsize: 1080,
            fps: Rational::new(25, 1),
            macropixel: 1,
            planes: vec![],
            progressive: false,
            tff: true,
            latency: 0,
        })
    }

    /// Builds `lines` HD lines; `first_line` selects the starting raster
    /// line (1-indexed) so field transitions land where expected.
    fn make_lines(first_line: usize, lines: usize) -> BytesMut {
        let geometry = find_geometry(1920, 1080, Rational::new(25, 1)).unwrap();
        let width = usize::from(geometry.width);
        let mut data = BytesMut::new();
        for l in 0..lines {
            let line_num = (first_line + l - 1) % 1125 + 1;
            let p = geometry.picture;
            let f2 = line_num >= usize::from(p.vbi_f2_part1.start);
            let active = p.active_f1.contains(line_num as u16)
                || p.active_f2.contains(line_num as u16);
            let fvh = EAV_FVH[usize::from(f2)][usize::from(!active)];
            let mut line = vec![0u16; width * 2];
            line[0] = 0x3ff;
            line[1] = 0x3ff;
            line[6] = fvh;
            line[7] = fvh;
            for s in &line {
                data.extend_from_slice(&s.to_le_bytes());
            }
        }
        data
    }

    #[test]
    fn test_framer_locks_and_emits() {
        let mut framer = SdiFramer::new();
        framer.set_input_format(&flow_1080i25()).unwrap();

        let mut out = Outputs::new();

        // the tail of one frame then a full frame: the scan must lock on
        // the 1125 -> 1 transition and emit exactly one frame
        let head = make_lines(1120, 6);
        framer
            .push_frame(FrameUnit::from_block(head), &mut out)
            .unwrap();
        assert!(out.is_empty());

        let body = make_lines(1, 1125);
        framer
            .push_frame(FrameUnit::from_block(body), &mut out)
            .unwrap();

        let frames: Vec<_> = out.drain().collect();
        assert_eq!(frames.len(), 1);
        let geometry = find_geometry(1920, 1080, Rational::new(25, 1)).unwrap();
        assert_eq!(
            frames[0].1.block().unwrap().len(),
            geometry.frame_bytes()
        );
    }

    #[test]
    fn test_framer_splits_overshoot() {
        let mut framer = SdiFramer::new();
        framer.set_input_format(&flow_1080i25()).unwrap();

        let mut out = Outputs::new();

        // last line of a frame followed by a frame and a half
        let head = make_lines(1125, 1);
        framer
            .push_frame(FrameUnit::from_block(head), &mut out)
            .unwrap();

        let overshoot = make_lines(1, 1125 + 500);
        framer
            .push_frame(FrameUnit::from_block(overshoot), &mut out)
            .unwrap();

        let frames: Vec<_> = out.drain().collect();
        assert_eq!(frames.len(), 1);

        // the remaining 500 lines complete with 625 more
        let rest = make_lines(501, 625);
        framer
            .push_frame(FrameUnit::from_block(rest), &mut out)
            .unwrap();
        assert_eq!(out.drain().count(), 1);
    }
}
